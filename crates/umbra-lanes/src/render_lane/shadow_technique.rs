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

//! Shadow map scheduling and rendering for spot, point and directional lights.
//!
//! Each light kind owns its own depth array because the kinds use a different
//! number of layers per slot. All kinds share one culler and one scheduler, so
//! `ShadowMaxPerFrame` bounds the re-renders across every light in the scene.

use super::composition::{CompositionBatch, CompositionPool, ProducerRecord};
use super::importance_lane::{ImportanceScheduler, Shortlist};
use super::layered_target::LayeredTarget;
use super::producer::{ProducerId, ProducerKind, ResourceProducer, MAX_CASCADES};
use super::slot_allocator::{Slot, SlotAllocator};
use super::visibility_lane::{CullCandidate, VisibilityCuller};
use std::any::Any;
use umbra_core::asset::AssetId;
use umbra_core::config::{PreferenceKey, Preferences, WatchedPreference};
use umbra_core::renderer::api::util::{CopyState, MultiBuffer};
use umbra_core::renderer::api::{
    binding, BufferUsage, DrawIndirectArgs, Perspective, TextureFormat, TextureId,
};
use umbra_core::renderer::{GraphicsDevice, ResourceError};
use umbra_core::technique::{
    FrameContext, Technique, TechniqueCategory, TechniqueError, TechniqueKind,
};

/// Vertex counts of the meshes drawn to compose each light kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightVolumes {
    /// Cone around a spot light.
    pub spot: u32,
    /// Sphere around a point light.
    pub point: u32,
    /// Full-screen volume for a directional light.
    pub directional: u32,
}

impl Default for LightVolumes {
    /// A unit cube for every kind.
    fn default() -> Self {
        Self {
            spot: 36,
            point: 36,
            directional: 36,
        }
    }
}

impl LightVolumes {
    fn vertex_count(&self, kind: &ProducerKind) -> u32 {
        match kind {
            ProducerKind::Spot { .. } => self.spot,
            ProducerKind::Point => self.point,
            ProducerKind::Directional { .. } | ProducerKind::Reflector { .. } => self.directional,
        }
    }
}

/// Index of the depth array serving each light kind.
fn array_of(kind: &ProducerKind) -> Option<usize> {
    match kind {
        ProducerKind::Spot { .. } => Some(0),
        ProducerKind::Point => Some(1),
        ProducerKind::Directional { .. } => Some(2),
        ProducerKind::Reflector { .. } => None,
    }
}

#[derive(Debug)]
struct ShadowArray {
    slots: SlotAllocator,
    target: LayeredTarget,
}

impl ShadowArray {
    fn new(layers_per_slot: u32, size: u32, label: &'static str) -> Self {
        Self {
            slots: SlotAllocator::new(),
            target: LayeredTarget::new(
                layers_per_slot,
                size,
                1,
                TextureFormat::Depth32Float,
                label,
            ),
        }
    }
}

/// Renders and composes shadow maps for every light in the scene.
#[derive(Debug)]
pub struct ShadowTechnique {
    lights: Vec<ResourceProducer>,
    arrays: [ShadowArray; 3],
    culler: VisibilityCuller,
    scheduler: ImportanceScheduler,
    records: MultiBuffer,
    composition: CompositionPool,
    volumes: LightVolumes,
    dependencies: Vec<AssetId>,
    max_per_frame: WatchedPreference,
    shadow_size: WatchedPreference,
    staleness_window: WatchedPreference,
    cascade_count: WatchedPreference,
}

impl ShadowTechnique {
    /// Creates the technique and subscribes to its preferences.
    pub fn new(device: &dyn GraphicsDevice, preferences: &mut Preferences) -> Result<Self, ResourceError> {
        let max_per_frame = preferences.watched(PreferenceKey::ShadowMaxPerFrame);
        let shadow_size = preferences.watched(PreferenceKey::ShadowSize);
        let staleness_window = preferences.watched(PreferenceKey::StalenessWindow);
        let cascade_count = preferences.watched(PreferenceKey::CascadeCount);
        let depth = preferences.get_or_default(PreferenceKey::BufferingDepth) as usize;

        let size = shadow_size.value() as u32;
        let arrays = [
            ShadowArray::new(1, size, "Spot Shadow Maps"),
            ShadowArray::new(ProducerKind::Point.layers_per_slot(), size, "Point Shadow Maps"),
            ShadowArray::new(MAX_CASCADES, size, "Directional Shadow Maps"),
        ];

        Ok(Self {
            lights: Vec::new(),
            arrays,
            culler: VisibilityCuller::new(),
            scheduler: ImportanceScheduler::new(
                max_per_frame.value().max(0.0) as usize,
                staleness_window.value(),
            ),
            records: MultiBuffer::new(device, depth, BufferUsage::STORAGE, "Shadow Producers")?,
            composition: CompositionPool::new(depth, "Shadow"),
            volumes: LightVolumes::default(),
            dependencies: Vec::new(),
            max_per_frame,
            shadow_size,
            staleness_window,
            cascade_count,
        })
    }

    /// Sets the composition meshes.
    pub fn with_light_volumes(mut self, volumes: LightVolumes) -> Self {
        self.volumes = volumes;
        self
    }

    /// Sets the assets the technique waits on.
    pub fn with_dependencies(mut self, dependencies: Vec<AssetId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Adds a light and assigns it a slot in its kind's depth array.
    ///
    /// Returns `None` for producers that are not lights. Adding a light whose
    /// id is already present replaces it in place.
    pub fn add_light(&mut self, mut light: ResourceProducer) -> Option<Slot> {
        let array = array_of(&light.kind)?;
        let slot = self.arrays[array].slots.acquire(light.id);
        light.slot = Some(slot);
        log::debug!("ShadowTechnique: light {:?} assigned slot {}", light.id, slot.0);
        match self.lights.iter_mut().find(|l| l.id == light.id) {
            Some(existing) => *existing = light,
            None => self.lights.push(light),
        }
        Some(slot)
    }

    /// Removes a light and releases its slot.
    pub fn remove_light(&mut self, id: ProducerId) -> bool {
        let Some(index) = self.lights.iter().position(|l| l.id == id) else {
            return false;
        };
        let light = self.lights.remove(index);
        if let Some(array) = array_of(&light.kind) {
            self.arrays[array].slots.release(id);
        }
        // Producer indices shifted.
        self.scheduler.clear();
        true
    }

    /// Mutable access to a light, for moving it between frames.
    pub fn light_mut(&mut self, id: ProducerId) -> Option<&mut ResourceProducer> {
        self.lights.iter_mut().find(|l| l.id == id)
    }

    /// Every light, in composition order.
    pub fn lights(&self) -> &[ResourceProducer] {
        &self.lights
    }

    /// The entries scheduled for this frame.
    pub fn shortlist(&self) -> &Shortlist {
        self.scheduler.shortlist()
    }

    /// The depth array serving `kind`, if allocated.
    pub fn shadow_map(&self, kind: &ProducerKind) -> Option<TextureId> {
        array_of(kind).and_then(|i| self.arrays[i].target.texture())
    }

    /// Slots currently held by lights of `kind`.
    pub fn live_slots(&self, kind: &ProducerKind) -> usize {
        array_of(kind).map_or(0, |i| self.arrays[i].slots.live_count())
    }

    /// Current layer resolution.
    pub fn shadow_size(&self) -> u32 {
        self.shadow_size.value() as u32
    }

    /// Releases every GPU resource.
    pub fn destroy(self, device: &dyn GraphicsDevice) {
        for array in self.arrays {
            array.target.destroy(device);
        }
        self.records.destroy(device);
        self.composition.destroy(device);
    }

    fn sync_preferences(&mut self, device: &dyn GraphicsDevice) -> Result<(), ResourceError> {
        if let Some(max) = self.max_per_frame.poll() {
            self.scheduler.set_max_per_frame(max.max(0.0) as usize);
        }
        if let Some(window) = self.staleness_window.poll() {
            self.scheduler.set_staleness_window(window);
        }
        self.cascade_count.poll();

        if let Some(size) = self.shadow_size.poll() {
            let mut recreated = false;
            for array in &mut self.arrays {
                recreated |= array.target.set_resolution(device, size as u32)?;
            }
            if recreated {
                for light in &mut self.lights {
                    light.mark_stale();
                }
                log::info!("ShadowTechnique: shadow size changed to {size}, all lights stale");
            }
        }
        Ok(())
    }

    fn upload_records(&mut self, device: &dyn GraphicsDevice) -> Result<(), TechniqueError> {
        let records: Vec<ProducerRecord> = self.lights.iter().map(ProducerRecord::from_producer).collect();
        self.records.begin_writing(device)?;
        self.records.write_pod(device, 0, &records)?;
        self.records.end_writing(device)?;
        Ok(())
    }
}

impl Technique for ShadowTechnique {
    fn name(&self) -> &'static str {
        "Shadow"
    }

    fn kind(&self) -> TechniqueKind {
        TechniqueKind::Shadow
    }

    fn category(&self) -> TechniqueCategory {
        TechniqueCategory::PRIMARY_LIGHTING
    }

    fn dependencies(&self) -> &[AssetId] {
        &self.dependencies
    }

    fn update_cache(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), TechniqueError> {
        let device = ctx.device;
        self.sync_preferences(device)?;

        let viewer = ctx.main_viewpoint().copied();
        let size = self.shadow_size.value() as u32;
        let cascades = self.cascade_count.value().max(1.0) as u32;
        for light in &mut self.lights {
            light.sync_views(size, viewer.as_ref(), cascades);
        }
        for array in &mut self.arrays {
            array.target.ensure_capacity(device, array.slots.high_water())?;
        }

        let candidates: Vec<CullCandidate> = self.lights.iter().map(ResourceProducer::cull_candidate).collect();
        let visibility = self.culler.cull(ctx.viewpoints, &candidates);
        if let Some(viewer) = viewer {
            self.scheduler
                .schedule(&mut self.lights, visibility, &viewer, ctx.now);
        }

        self.upload_records(device)
    }

    fn update_pass(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), TechniqueError> {
        let device = ctx.device;
        let entries = self.scheduler.shortlist().entries().to_vec();
        for entry in entries {
            let Some(light) = self.lights.get(entry.view.producer) else {
                continue;
            };
            let Some(view) = light.views.get(entry.view.face) else {
                continue;
            };
            let Some(array) = array_of(&light.kind).map(|i| &self.arrays[i]) else {
                continue;
            };
            let Some(texture) = array.target.texture() else {
                continue;
            };

            array.target.clear_layers(device, entry.layer, 1)?;
            device.bind_render_target_layer(texture, entry.layer)?;
            ctx.geometry
                .render_geometry(device, &view.viewpoint, TechniqueCategory::GEOMETRY)?;
            ImportanceScheduler::mark_updated(&mut self.lights, entry.view, ctx.now);
        }
        Ok(())
    }

    fn render_technique(
        &mut self,
        ctx: &mut FrameContext<'_>,
        perspectives: &[Perspective],
    ) -> Result<(), TechniqueError> {
        let visibility = self.culler.table();
        let mut batch = CompositionBatch::new();
        for perspective in perspectives {
            for &index in visibility.visible_indices(perspective.view_index) {
                let Some(light) = self.lights.get(index as usize) else {
                    continue;
                };
                batch.push_visible(*perspective, index);
                batch.push_draw(DrawIndirectArgs::instanced(
                    self.volumes.vertex_count(&light.kind),
                    1,
                ));
            }
        }
        if batch.is_empty() {
            return Ok(());
        }

        self.records.bind_for_reading(ctx.device, binding::PRODUCERS)?;
        self.composition.submit(ctx.device, &batch)?;
        Ok(())
    }

    fn clear_cache(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), TechniqueError> {
        self.scheduler.clear();
        self.composition.reset();
        // An abandoned frame may never have uploaded its records.
        if matches!(self.records.state(), CopyState::Written | CopyState::Readable) {
            self.records.end_reading(ctx.device)?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_core::asset::AssetRegistry;
    use umbra_core::math::Vec3;
    use umbra_core::renderer::api::Viewpoint;
    use umbra_infra::{DeviceCommand, HeadlessDevice, RecordingScene};

    fn viewer() -> Viewpoint {
        Viewpoint::look_at(Vec3::ZERO, -Vec3::Z, Vec3::Y, 90.0, 1.0, 0.5, 100.0)
    }

    fn spot(id: u32, z: f32) -> ResourceProducer {
        ResourceProducer::spot(ProducerId(id), Vec3::new(0.0, 0.0, -z), -Vec3::Z, 60.0, 3.0)
    }

    /// Runs one full frame of the technique against the main viewer.
    fn run_frame(
        technique: &mut ShadowTechnique,
        device: &HeadlessDevice,
        scene: &mut RecordingScene,
        now: f64,
    ) {
        let assets = AssetRegistry::new();
        let viewpoints = [viewer()];
        let mut ctx = FrameContext {
            device,
            assets: &assets,
            viewpoints: &viewpoints,
            geometry: scene,
            now,
            delta_time: 1.0 / 60.0,
            frame_index: 0,
        };
        technique.update_cache(&mut ctx).unwrap();
        technique.update_pass(&mut ctx).unwrap();
        technique
            .render_technique(&mut ctx, &[Perspective { view_index: 0, layer: 0 }])
            .unwrap();
        technique.clear_cache(&mut ctx).unwrap();
    }

    fn cleared_layers(device: &HeadlessDevice) -> Vec<(u32, u32)> {
        device
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                DeviceCommand::ClearTextureLayers { first, count, .. } => Some((first, count)),
                _ => None,
            })
            .collect()
    }

    fn draws(device: &HeadlessDevice) -> Vec<Vec<DrawIndirectArgs>> {
        device
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                DeviceCommand::DrawIndirect { args, .. } => Some(args),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_add_and_remove_lights_reuse_slots() {
        let device = HeadlessDevice::new();
        let mut prefs = Preferences::new();
        let mut shadows = ShadowTechnique::new(&device, &mut prefs).unwrap();

        assert_eq!(shadows.add_light(spot(0, 5.0)), Some(Slot(0)));
        assert_eq!(shadows.add_light(spot(1, 10.0)), Some(Slot(1)));
        assert_eq!(
            shadows.add_light(ResourceProducer::point(ProducerId(2), Vec3::ZERO, 2.0)),
            Some(Slot(0)),
            "point lights have their own array"
        );
        assert_eq!(
            shadows.add_light(ResourceProducer::reflector(ProducerId(3), Vec3::ZERO, Vec3::ONE)),
            None
        );

        assert!(shadows.remove_light(ProducerId(0)));
        assert!(!shadows.remove_light(ProducerId(0)));
        assert_eq!(shadows.add_light(spot(4, 15.0)), Some(Slot(0)));
        assert_eq!(shadows.live_slots(&ProducerKind::Point), 1);
        assert_eq!(shadows.lights().len(), 3);
    }

    #[test]
    fn test_frame_refreshes_at_most_k_views() {
        let device = HeadlessDevice::new();
        let mut prefs = Preferences::new();
        prefs.set(PreferenceKey::ShadowMaxPerFrame, 2.0);
        let mut shadows = ShadowTechnique::new(&device, &mut prefs).unwrap();
        for (i, z) in [5.0, 10.0, 15.0].into_iter().enumerate() {
            shadows.add_light(spot(i as u32, z));
        }

        let mut scene = RecordingScene::new();
        run_frame(&mut shadows, &device, &mut scene, 1.0);

        assert_eq!(scene.renders().len(), 2);
        assert!(scene
            .renders()
            .iter()
            .all(|r| r.categories == TechniqueCategory::GEOMETRY));
        assert_eq!(cleared_layers(&device).len(), 2);
        assert!(cleared_layers(&device).iter().all(|(_, count)| *count == 1));

        let refreshed = shadows
            .lights()
            .iter()
            .filter(|l| l.views[0].last_update == Some(1.0))
            .count();
        assert_eq!(refreshed, 2);
        assert!(shadows.shortlist().is_empty(), "cleared at end of frame");
    }

    #[test]
    fn test_every_visible_light_is_composed() {
        let device = HeadlessDevice::new();
        let mut prefs = Preferences::new();
        prefs.set(PreferenceKey::ShadowMaxPerFrame, 1.0);
        let mut shadows = ShadowTechnique::new(&device, &mut prefs)
            .unwrap()
            .with_light_volumes(LightVolumes {
                spot: 24,
                point: 240,
                directional: 6,
            });
        for (i, z) in [5.0, 10.0, 15.0].into_iter().enumerate() {
            shadows.add_light(spot(i as u32, z));
        }
        // Behind the viewer.
        shadows.add_light(spot(9, -50.0));

        let mut scene = RecordingScene::new();
        run_frame(&mut shadows, &device, &mut scene, 1.0);

        assert_eq!(scene.renders().len(), 1);
        assert_eq!(draws(&device), vec![vec![DrawIndirectArgs::instanced(24, 1); 3]]);
    }

    #[test]
    fn test_shadow_size_change_forces_all_stale() {
        let device = HeadlessDevice::new();
        let mut prefs = Preferences::new();
        prefs.set(PreferenceKey::ShadowMaxPerFrame, 8.0);
        let mut shadows = ShadowTechnique::new(&device, &mut prefs).unwrap();
        shadows.add_light(spot(0, 5.0));
        shadows.add_light(spot(1, 10.0));

        let mut scene = RecordingScene::new();
        run_frame(&mut shadows, &device, &mut scene, 1.0);
        assert!(shadows.lights().iter().all(|l| l.views[0].last_update == Some(1.0)));

        prefs.set(PreferenceKey::ShadowSize, 256.0);
        let assets = AssetRegistry::new();
        let viewpoints = [viewer()];
        let mut ctx = FrameContext {
            device: &device,
            assets: &assets,
            viewpoints: &viewpoints,
            geometry: &mut scene,
            now: 2.0,
            delta_time: 1.0,
            frame_index: 1,
        };
        shadows.update_cache(&mut ctx).unwrap();

        assert_eq!(shadows.shadow_size(), 256);
        assert!(shadows.lights().iter().all(|l| l.views[0].last_update.is_none()));
        assert!(shadows
            .lights()
            .iter()
            .all(|l| l.views[0].viewpoint.size == 256));
        shadows.clear_cache(&mut ctx).unwrap();
    }

    #[test]
    fn test_depth_arrays_grow_with_slots() {
        let device = HeadlessDevice::new();
        let mut prefs = Preferences::new();
        let mut shadows = ShadowTechnique::new(&device, &mut prefs).unwrap();
        shadows.add_light(ResourceProducer::point(ProducerId(0), Vec3::new(0.0, 0.0, -5.0), 2.0));
        shadows.add_light(ResourceProducer::point(ProducerId(1), Vec3::new(0.0, 0.0, -9.0), 2.0));

        let mut scene = RecordingScene::new();
        run_frame(&mut shadows, &device, &mut scene, 1.0);

        let texture = shadows.shadow_map(&ProducerKind::Point).unwrap();
        assert_eq!(device.texture_layers(texture), Some(12));
        assert_eq!(device.texture_format(texture), Some(TextureFormat::Depth32Float));
    }
}
