// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Defines the TechniquePipeline, the per-frame driver of every technique.

use umbra_core::asset::AssetRegistry;
use umbra_core::config::{PreferenceKey, Preferences};
use umbra_core::renderer::api::util::{CopyState, MultiBuffer};
use umbra_core::renderer::api::{binding, BufferUsage, Perspective, Viewpoint, ViewpointRecord};
use umbra_core::renderer::{GraphicsDevice, ResourceError};
use umbra_core::technique::{
    FrameContext, FramePhase, SceneGeometry, Technique, TechniqueCategory, TechniqueError,
    TechniqueRegistry,
};

/// The collaborators a frame runs against.
pub struct FrameServices<'a> {
    /// The GPU driver.
    pub device: &'a dyn GraphicsDevice,
    /// Asset readiness.
    pub assets: &'a AssetRegistry,
    /// Secondary render path used by re-renders.
    pub geometry: &'a mut dyn SceneGeometry,
}

impl std::fmt::Debug for FrameServices<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameServices")
            .field("assets", &self.assets.len())
            .finish()
    }
}

/// Per-frame statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Techniques that ran this frame.
    pub active: usize,
    /// Techniques skipped because their assets were not ready.
    pub skipped: usize,
    /// Client viewpoints uploaded.
    pub viewpoints: usize,
    /// `true` if uploading the cameras had to wait for the GPU.
    pub camera_waited: bool,
}

/// Logs and panics on resource exhaustion. Every other error is returned.
fn fatal_on_exhaustion(technique: &str, result: Result<(), TechniqueError>) -> Result<(), TechniqueError> {
    if let Err(e) = &result {
        if e.is_exhaustion() {
            log::error!("TechniquePipeline: '{technique}' exhausted GPU memory: {e}");
            panic!("GPU resource exhaustion in '{technique}': {e}");
        }
    }
    result
}

/// Drives every registered technique through the frame phases.
///
/// ```text
/// begin_frame:  BeginFrame -> UpdateCache -> UpdatePass -> Render
/// render:       Render (any number of times)
/// end_frame:    EndFrame -> Idle
/// ```
#[derive(Debug)]
pub struct TechniquePipeline {
    // Techniques in execution order.
    techniques: TechniqueRegistry,
    // Readiness of each technique for the current frame.
    active: Vec<bool>,
    // Readiness seen last frame, to log state changes once.
    was_ready: Vec<Option<bool>>,
    // Camera records of the client viewpoints.
    cameras: MultiBuffer,
    // Client viewpoints with refreshed frustums.
    viewpoints: Vec<Viewpoint>,
    phase: FramePhase,
    now: f64,
    delta_time: f32,
    frame_count: u64,
    last_stats: FrameStats,
}

impl TechniquePipeline {
    /// Creates an empty pipeline whose camera channel holds `BufferingDepth` copies.
    pub fn new(device: &dyn GraphicsDevice, preferences: &Preferences) -> Result<Self, ResourceError> {
        let depth = preferences.get_or_default(PreferenceKey::BufferingDepth) as usize;
        Ok(Self {
            techniques: TechniqueRegistry::new(),
            active: Vec::new(),
            was_ready: Vec::new(),
            cameras: MultiBuffer::new(device, depth, BufferUsage::STORAGE, "Cameras")?,
            viewpoints: Vec::new(),
            phase: FramePhase::Idle,
            now: 0.0,
            delta_time: 0.0,
            frame_count: 0,
            last_stats: FrameStats::default(),
        })
    }

    /// Appends a technique. Techniques run in registration order.
    pub fn register(&mut self, technique: Box<dyn Technique>) {
        self.techniques.register(technique);
        self.active.push(false);
        self.was_ready.push(None);
    }

    /// The registered techniques.
    pub fn techniques(&self) -> &TechniqueRegistry {
        &self.techniques
    }

    /// Mutable access to the registered techniques, for adding producers between frames.
    pub fn techniques_mut(&mut self) -> &mut TechniqueRegistry {
        &mut self.techniques
    }

    /// Number of registered techniques.
    pub fn technique_count(&self) -> usize {
        self.techniques.len()
    }

    /// The current phase.
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Frames completed.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Statistics of the last `begin_frame`.
    pub fn last_stats(&self) -> FrameStats {
        self.last_stats
    }

    /// The client viewpoints of the current frame.
    pub fn viewpoints(&self) -> &[Viewpoint] {
        &self.viewpoints
    }

    fn expect_phase(&self, op: &'static str, allowed: &[FramePhase]) -> Result<(), TechniqueError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(TechniqueError::InvalidPhase {
                op,
                phase: self.phase,
            })
        }
    }

    fn refresh_readiness(&mut self, assets: &AssetRegistry) -> (usize, usize) {
        let mut skipped = 0;
        for (i, technique) in self.techniques.all().iter().enumerate() {
            let ready = technique.is_ready(assets);
            self.active[i] = ready;
            if !ready {
                skipped += 1;
                log::trace!("TechniquePipeline: '{}' waiting on assets", technique.name());
            }
            if self.was_ready[i] != Some(ready) {
                log::debug!(
                    "TechniquePipeline: '{}' is now {}",
                    technique.name(),
                    if ready { "ready" } else { "waiting on assets" }
                );
                self.was_ready[i] = Some(ready);
            }
        }
        (self.active.len() - skipped, skipped)
    }

    fn upload_cameras(&mut self, device: &dyn GraphicsDevice) -> Result<bool, TechniqueError> {
        let records: Vec<ViewpointRecord> = self.viewpoints.iter().map(Viewpoint::to_record).collect();
        let needed = (records.len() * std::mem::size_of::<ViewpointRecord>()) as u64;
        let mut waited = self.cameras.resize(device, needed)?.waited();
        waited |= self.cameras.begin_writing(device)?.waited();
        self.cameras.write_pod(device, 0, &records)?;
        self.cameras.end_writing(device)?;
        Ok(waited)
    }

    /// Runs `phase` on every active technique, stopping at the first error.
    fn run_phase(
        &mut self,
        services: &mut FrameServices<'_>,
        phase: FramePhase,
        mut step: impl FnMut(&mut dyn Technique, &mut FrameContext<'_>) -> Result<(), TechniqueError>,
    ) -> Result<(), TechniqueError> {
        self.phase = phase;
        let mut ctx = FrameContext {
            device: services.device,
            assets: services.assets,
            viewpoints: &self.viewpoints,
            geometry: &mut *services.geometry,
            now: self.now,
            delta_time: self.delta_time,
            frame_index: self.frame_count,
        };
        for (technique, active) in self.techniques.all_mut().iter_mut().zip(&self.active) {
            if !*active {
                continue;
            }
            let name = technique.name();
            fatal_on_exhaustion(name, step(technique.as_mut(), &mut ctx))?;
        }
        Ok(())
    }

    /// Starts a frame for `viewpoints`. Index 0 is the main viewer.
    ///
    /// Uploads the cameras, then culls, schedules and re-renders for every
    /// technique whose assets are ready. Returns one perspective per viewpoint.
    pub fn begin_frame(
        &mut self,
        services: &mut FrameServices<'_>,
        viewpoints: &[Viewpoint],
        now: f64,
        delta_time: f32,
    ) -> Result<Vec<Perspective>, TechniqueError> {
        self.expect_phase("begin_frame", &[FramePhase::Idle])?;
        self.phase = FramePhase::BeginFrame;
        self.now = now;
        self.delta_time = delta_time;

        self.viewpoints.clear();
        self.viewpoints.extend_from_slice(viewpoints);
        for viewpoint in &mut self.viewpoints {
            viewpoint.update_frustum();
        }

        let camera_waited = match self.upload_cameras(services.device) {
            Ok(waited) => waited,
            Err(e) => {
                self.phase = FramePhase::Idle;
                return fatal_on_exhaustion("Cameras", Err(e)).map(|_| Vec::new());
            }
        };
        let (active, skipped) = self.refresh_readiness(services.assets);
        self.last_stats = FrameStats {
            active,
            skipped,
            viewpoints: self.viewpoints.len(),
            camera_waited,
        };

        self.run_phase(services, FramePhase::UpdateCache, |t, ctx| t.update_cache(ctx))?;
        self.cameras.bind_for_reading(services.device, binding::CAMERAS)?;
        self.run_phase(services, FramePhase::UpdatePass, |t, ctx| t.update_pass(ctx))?;

        self.phase = FramePhase::Render;
        Ok((0..self.viewpoints.len())
            .map(|i| Perspective {
                view_index: i,
                layer: i as u32,
            })
            .collect())
    }

    /// Composes every technique whose category intersects `categories`.
    pub fn render(
        &mut self,
        services: &mut FrameServices<'_>,
        categories: TechniqueCategory,
        perspectives: &[Perspective],
    ) -> Result<(), TechniqueError> {
        self.expect_phase("render", &[FramePhase::Render])?;
        self.cameras.bind_for_reading(services.device, binding::CAMERAS)?;
        self.run_phase(services, FramePhase::Render, |t, ctx| {
            if t.category().intersects(categories) {
                t.render_technique(ctx, perspectives)
            } else {
                Ok(())
            }
        })
    }

    /// Fences this frame's camera reads and clears every technique's frame state.
    ///
    /// Also accepted after a failed update phase, to abandon the frame.
    pub fn end_frame(&mut self, services: &mut FrameServices<'_>) -> Result<(), TechniqueError> {
        self.expect_phase(
            "end_frame",
            &[FramePhase::UpdateCache, FramePhase::UpdatePass, FramePhase::Render],
        )?;
        self.phase = FramePhase::EndFrame;
        let cameras = if matches!(self.cameras.state(), CopyState::Written | CopyState::Readable) {
            self.cameras.end_reading(services.device).map_err(TechniqueError::from)
        } else {
            Ok(())
        };
        let result = self.clear_all(services).and(cameras);
        self.phase = FramePhase::Idle;
        self.frame_count += 1;
        result
    }

    /// Runs `clear_cache` on every active technique, even past a failure, and
    /// returns the first error.
    fn clear_all(&mut self, services: &mut FrameServices<'_>) -> Result<(), TechniqueError> {
        let mut ctx = FrameContext {
            device: services.device,
            assets: services.assets,
            viewpoints: &self.viewpoints,
            geometry: &mut *services.geometry,
            now: self.now,
            delta_time: self.delta_time,
            frame_index: self.frame_count,
        };
        let mut first_error = None;
        for (technique, active) in self.techniques.all_mut().iter_mut().zip(&self.active) {
            if !*active {
                continue;
            }
            let name = technique.name();
            if let Err(e) = fatal_on_exhaustion(name, technique.clear_cache(&mut ctx)) {
                log::warn!("TechniquePipeline: '{}' failed to clear its frame state: {}", name, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Releases the camera channel. Techniques release their own resources.
    pub fn destroy(self, device: &dyn GraphicsDevice) {
        self.cameras.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use umbra_core::asset::AssetId;
    use umbra_core::math::Vec3;
    use umbra_core::technique::TechniqueKind;
    use umbra_infra::{HeadlessDevice, RecordingScene};

    /// Records the hooks it receives.
    #[derive(Debug, Default)]
    struct Probe {
        calls: Vec<&'static str>,
        dependencies: Vec<AssetId>,
        category: Option<TechniqueCategory>,
    }

    impl Technique for Probe {
        fn name(&self) -> &'static str {
            "Probe"
        }
        fn kind(&self) -> TechniqueKind {
            TechniqueKind::Custom("probe")
        }
        fn category(&self) -> TechniqueCategory {
            self.category.unwrap_or(TechniqueCategory::EFFECT)
        }
        fn dependencies(&self) -> &[AssetId] {
            &self.dependencies
        }
        fn update_cache(&mut self, _ctx: &mut FrameContext<'_>) -> Result<(), TechniqueError> {
            self.calls.push("update_cache");
            Ok(())
        }
        fn update_pass(&mut self, _ctx: &mut FrameContext<'_>) -> Result<(), TechniqueError> {
            self.calls.push("update_pass");
            Ok(())
        }
        fn render_technique(
            &mut self,
            _ctx: &mut FrameContext<'_>,
            _perspectives: &[Perspective],
        ) -> Result<(), TechniqueError> {
            self.calls.push("render");
            Ok(())
        }
        fn clear_cache(&mut self, _ctx: &mut FrameContext<'_>) -> Result<(), TechniqueError> {
            self.calls.push("clear_cache");
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn viewer() -> Viewpoint {
        Viewpoint::look_at(Vec3::ZERO, -Vec3::Z, Vec3::Y, 90.0, 1.0, 0.5, 100.0)
    }

    fn calls(pipeline: &TechniquePipeline) -> Vec<&'static str> {
        pipeline.techniques().find::<Probe>().unwrap().calls.clone()
    }

    #[test]
    fn test_phases_run_in_order() {
        let device = HeadlessDevice::new();
        let assets = AssetRegistry::new();
        let mut scene = RecordingScene::new();
        let mut services = FrameServices {
            device: &device,
            assets: &assets,
            geometry: &mut scene,
        };
        let mut pipeline = TechniquePipeline::new(&device, &Preferences::new()).unwrap();
        pipeline.register(Box::new(Probe::default()));

        let perspectives = pipeline
            .begin_frame(&mut services, &[viewer(), viewer()], 1.0, 0.016)
            .unwrap();
        assert_eq!(
            perspectives,
            vec![
                Perspective { view_index: 0, layer: 0 },
                Perspective { view_index: 1, layer: 1 }
            ]
        );
        pipeline
            .render(&mut services, TechniqueCategory::ALL, &perspectives)
            .unwrap();
        pipeline.end_frame(&mut services).unwrap();

        assert_eq!(calls(&pipeline), vec!["update_cache", "update_pass", "render", "clear_cache"]);
        assert_eq!(pipeline.phase(), FramePhase::Idle);
        assert_eq!(pipeline.frame_count(), 1);
        assert_eq!(pipeline.technique_count(), 1);
    }

    #[test]
    fn test_out_of_order_calls_are_rejected() {
        let device = HeadlessDevice::new();
        let assets = AssetRegistry::new();
        let mut scene = RecordingScene::new();
        let mut services = FrameServices {
            device: &device,
            assets: &assets,
            geometry: &mut scene,
        };
        let mut pipeline = TechniquePipeline::new(&device, &Preferences::new()).unwrap();

        assert!(matches!(
            pipeline.render(&mut services, TechniqueCategory::ALL, &[]),
            Err(TechniqueError::InvalidPhase { op: "render", phase: FramePhase::Idle })
        ));
        assert!(pipeline.end_frame(&mut services).is_err());

        pipeline.begin_frame(&mut services, &[viewer()], 0.0, 0.0).unwrap();
        assert!(matches!(
            pipeline.begin_frame(&mut services, &[viewer()], 0.0, 0.0),
            Err(TechniqueError::InvalidPhase { op: "begin_frame", phase: FramePhase::Render })
        ));
    }

    #[test]
    fn test_category_filter() {
        let device = HeadlessDevice::new();
        let assets = AssetRegistry::new();
        let mut scene = RecordingScene::new();
        let mut services = FrameServices {
            device: &device,
            assets: &assets,
            geometry: &mut scene,
        };
        let mut pipeline = TechniquePipeline::new(&device, &Preferences::new()).unwrap();
        pipeline.register(Box::new(Probe {
            category: Some(TechniqueCategory::PRIMARY_LIGHTING),
            ..Default::default()
        }));

        let perspectives = pipeline.begin_frame(&mut services, &[viewer()], 0.0, 0.0).unwrap();
        pipeline
            .render(&mut services, TechniqueCategory::SECONDARY_LIGHTING, &perspectives)
            .unwrap();
        assert!(!calls(&pipeline).contains(&"render"));
        pipeline
            .render(
                &mut services,
                TechniqueCategory::PRIMARY_LIGHTING | TechniqueCategory::EFFECT,
                &perspectives,
            )
            .unwrap();
        assert!(calls(&pipeline).contains(&"render"));
        pipeline.end_frame(&mut services).unwrap();
    }

    #[test]
    fn test_not_ready_technique_is_skipped_then_retried() {
        let device = HeadlessDevice::new();
        let mut assets = AssetRegistry::new();
        let mesh = assets.register("probe_mesh");
        let mut scene = RecordingScene::new();
        let mut pipeline = TechniquePipeline::new(&device, &Preferences::new()).unwrap();
        pipeline.register(Box::new(Probe {
            dependencies: vec![mesh],
            ..Default::default()
        }));

        {
            let mut services = FrameServices {
                device: &device,
                assets: &assets,
                geometry: &mut scene,
            };
            let p = pipeline.begin_frame(&mut services, &[viewer()], 0.0, 0.0).unwrap();
            pipeline.render(&mut services, TechniqueCategory::ALL, &p).unwrap();
            pipeline.end_frame(&mut services).unwrap();
        }
        assert!(calls(&pipeline).is_empty());
        assert_eq!(pipeline.last_stats().skipped, 1);

        assets.mark_ready(mesh);
        let mut services = FrameServices {
            device: &device,
            assets: &assets,
            geometry: &mut scene,
        };
        let p = pipeline.begin_frame(&mut services, &[viewer()], 1.0, 1.0).unwrap();
        pipeline.render(&mut services, TechniqueCategory::ALL, &p).unwrap();
        pipeline.end_frame(&mut services).unwrap();
        assert_eq!(calls(&pipeline).len(), 4);
        assert_eq!(pipeline.last_stats().active, 1);
    }

    #[test]
    #[should_panic(expected = "GPU resource exhaustion")]
    fn test_exhaustion_is_fatal() {
        // Room for three empty camera copies and nothing more.
        let device = HeadlessDevice::new().with_budget(3 * 256);
        let mut pipeline = TechniquePipeline::new(&device, &Preferences::new()).unwrap();
        let assets = AssetRegistry::new();
        let mut scene = RecordingScene::new();
        let mut services = FrameServices {
            device: &device,
            assets: &assets,
            geometry: &mut scene,
        };
        let _ = pipeline.begin_frame(&mut services, &[viewer()], 0.0, 0.0);
    }
}
