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

// Umbra Sandbox
// Runs a few seconds of a small scene through the scheduler and logs what it refreshes.
//
// Usage: sandbox [preferences.ron]

use anyhow::{Context, Result};
use umbra_agents::render_agent::{FrameServices, TechniquePipeline};
use umbra_core::asset::AssetRegistry;
use umbra_core::config::{PreferenceKey, Preferences};
use umbra_core::math::Vec3;
use umbra_core::renderer::api::Viewpoint;
use umbra_core::technique::TechniqueCategory;
use umbra_infra::{HeadlessDevice, RecordingScene};
use umbra_lanes::render_lane::{
    LightVolumes, ProducerId, ReflectorTechnique, ResourceProducer, ShadowTechnique,
};

const FRAMES: u32 = 120;
const DELTA_TIME: f32 = 1.0 / 60.0;
/// Frame at which the probe mesh finishes loading.
const PROBE_MESH_READY_AT: u32 = 30;
/// Fence polls the simulated GPU lags behind.
const GPU_LATENCY_POLLS: u32 = 2;

fn load_preferences() -> Result<Preferences> {
    match std::env::args().nth(1) {
        Some(path) => Preferences::load(&path).with_context(|| format!("loading preferences from {path}")),
        None => Ok(Preferences::new()),
    }
}

fn build_shadows(device: &HeadlessDevice, prefs: &mut Preferences) -> Result<ShadowTechnique> {
    let mut shadows = ShadowTechnique::new(device, prefs)?.with_light_volumes(LightVolumes {
        spot: 96,
        point: 240,
        directional: 6,
    });
    shadows.add_light(ResourceProducer::directional(
        ProducerId(0),
        Vec3::new(-0.3, -1.0, -0.2).normalize(),
        60.0,
    ));
    for i in 0..8 {
        let x = (i % 4) as f32 * 6.0 - 9.0;
        let z = -((i / 4) as f32) * 10.0 - 6.0;
        shadows.add_light(ResourceProducer::point(ProducerId(1 + i), Vec3::new(x, 2.0, z), 4.0));
    }
    for i in 0..4 {
        shadows.add_light(ResourceProducer::spot(
            ProducerId(10 + i),
            Vec3::new(i as f32 * 5.0 - 7.5, 5.0, -20.0),
            Vec3::new(0.0, -1.0, 0.2).normalize(),
            50.0,
            8.0,
        ));
    }
    Ok(shadows)
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut prefs = load_preferences()?;
    let device = HeadlessDevice::with_fence_latency(GPU_LATENCY_POLLS);
    let mut assets = AssetRegistry::new();
    let probe_mesh = assets.register("meshes/probe_cube");

    let shadows = build_shadows(&device, &mut prefs)?;
    let mut reflectors = ReflectorTechnique::new(&device, &mut prefs)?
        .with_probe_vertex_count(36)
        .with_dependencies(vec![probe_mesh]);
    reflectors.add_reflector(ProducerId(100), Vec3::new(0.0, 1.0, -8.0), Vec3::new(6.0, 3.0, 6.0));
    reflectors.add_reflector(ProducerId(101), Vec3::new(0.0, 1.0, -24.0), Vec3::new(6.0, 3.0, 6.0));

    let mut pipeline = TechniquePipeline::new(&device, &prefs)?;
    pipeline.register(Box::new(shadows));
    pipeline.register(Box::new(reflectors));
    log::info!("Sandbox: {} techniques registered", pipeline.technique_count());

    let mut scene = RecordingScene::new();
    for frame in 0..FRAMES {
        if frame == PROBE_MESH_READY_AT {
            assets.mark_ready(probe_mesh);
            log::info!("Sandbox: probe mesh loaded");
        }
        if frame == FRAMES / 2 {
            prefs.set(PreferenceKey::ShadowSize, 2048.0);
        }

        let now = f64::from(frame) * f64::from(DELTA_TIME);
        let eye = Vec3::new(0.0, 1.7, -(frame as f32) * 0.2);
        let viewer = Viewpoint::look_at(eye, eye - Vec3::Z, Vec3::Y, 70.0, 16.0 / 9.0, 0.1, 200.0);

        scene.clear();
        let mut services = FrameServices {
            device: &device,
            assets: &assets,
            geometry: &mut scene,
        };
        let perspectives = pipeline.begin_frame(&mut services, &[viewer], now, DELTA_TIME)?;
        pipeline.render(&mut services, TechniqueCategory::PRIMARY_LIGHTING, &perspectives)?;
        pipeline.render(&mut services, TechniqueCategory::SECONDARY_LIGHTING, &perspectives)?;
        pipeline.end_frame(&mut services)?;

        let stats = pipeline.last_stats();
        log::debug!(
            "Sandbox: frame {frame}: {} re-renders, {} techniques active, {} skipped, camera wait: {}",
            scene.renders().len(),
            stats.active,
            stats.skipped,
            stats.camera_waited
        );
    }

    log::info!(
        "Sandbox: {} frames done, {} buffers and {} textures live",
        pipeline.frame_count(),
        device.live_buffer_count(),
        device.live_texture_count()
    );
    Ok(())
}
