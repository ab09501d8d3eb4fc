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

//! End-to-end scheduling through the pipeline with real techniques.

use std::collections::HashSet;
use umbra_agents::render_agent::{FrameServices, TechniquePipeline};
use umbra_core::asset::AssetRegistry;
use umbra_core::config::{PreferenceKey, Preferences};
use umbra_core::math::Vec3;
use umbra_core::renderer::api::Viewpoint;
use umbra_core::technique::TechniqueCategory;
use umbra_infra::{HeadlessDevice, RecordingScene};
use umbra_lanes::render_lane::{ImportanceScheduler, ProducerId, ResourceProducer, ShadowTechnique};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn viewer() -> Viewpoint {
    Viewpoint::look_at(Vec3::ZERO, -Vec3::Z, Vec3::Y, 90.0, 1.0, 0.5, 100.0)
}

/// A spot light in front of the viewer with its view already built.
fn caster(id: u32, last_update: f64) -> ResourceProducer {
    let mut light = ResourceProducer::spot(
        ProducerId(id),
        Vec3::new(id as f32 - 4.5, 0.0, -10.0),
        -Vec3::Z,
        60.0,
        3.0,
    );
    light.sync_views(1024, None, 1);
    light.views[0].last_update = Some(last_update);
    light
}

#[test]
fn test_stale_casters_win_the_budget() {
    init_logger();
    let now = 100.0;
    let device = HeadlessDevice::new();
    let mut prefs = Preferences::new();
    prefs.set(PreferenceKey::ShadowMaxPerFrame, 4.0);
    prefs.set(PreferenceKey::StalenessWindow, 5.0);

    let mut shadows = ShadowTechnique::new(&device, &mut prefs).unwrap();
    let fresh: HashSet<ProducerId> = [0, 4, 8].into_iter().map(ProducerId).collect();

    // The four best-scoring stale casters, ranked the way the scheduler ranks them.
    let mut stale: Vec<(ProducerId, f32)> = (0..10)
        .map(ProducerId)
        .filter(|id| !fresh.contains(id))
        .map(|id| {
            let light = caster(id.0, now - 10.0);
            (id, ImportanceScheduler::importance(&viewer(), &light.views[0], now, 5.0))
        })
        .collect();
    stale.sort_by(|a, b| b.1.total_cmp(&a.1));
    assert!(stale[3].1 > stale[4].1, "cut-off must not fall on a tie");
    let expected: HashSet<ProducerId> = stale.iter().take(4).map(|(id, _)| *id).collect();

    for id in 0..10 {
        let last = if fresh.contains(&ProducerId(id)) { now } else { now - 10.0 };
        shadows.add_light(caster(id, last));
    }

    let mut pipeline = TechniquePipeline::new(&device, &prefs).unwrap();
    pipeline.register(Box::new(shadows));

    let assets = AssetRegistry::new();
    let mut scene = RecordingScene::new();
    let mut services = FrameServices {
        device: &device,
        assets: &assets,
        geometry: &mut scene,
    };
    let perspectives = pipeline.begin_frame(&mut services, &[viewer()], now, 0.016).unwrap();

    let shadows = pipeline.techniques().find::<ShadowTechnique>().unwrap();
    let admitted: Vec<ProducerId> = shadows
        .shortlist()
        .iter()
        .map(|e| shadows.lights()[e.view.producer].id)
        .collect();
    assert_eq!(admitted.len(), 4);
    assert!(admitted.iter().all(|id| !fresh.contains(id)), "admitted: {admitted:?}");
    assert_eq!(admitted.iter().copied().collect::<HashSet<_>>(), expected);

    let importances: Vec<f32> = shadows.shortlist().iter().map(|e| e.importance).collect();
    assert!(importances.windows(2).all(|w| w[0] >= w[1]));

    // Only the admitted views were re-rendered, and every light is still composed.
    let refreshed = shadows
        .lights()
        .iter()
        .filter(|l| !fresh.contains(&l.id) && l.views[0].last_update == Some(now))
        .count();
    assert_eq!(refreshed, 4);

    pipeline
        .render(&mut services, TechniqueCategory::PRIMARY_LIGHTING, &perspectives)
        .unwrap();
    pipeline.end_frame(&mut services).unwrap();
    drop(services);
    assert_eq!(scene.renders().len(), 4);
}

#[test]
fn test_every_view_refreshes_within_bounded_frames() {
    init_logger();
    let device = HeadlessDevice::new();
    let mut prefs = Preferences::new();
    prefs.set(PreferenceKey::ShadowMaxPerFrame, 3.0);

    let mut shadows = ShadowTechnique::new(&device, &mut prefs).unwrap();
    for id in 0..9 {
        shadows.add_light(ResourceProducer::spot(
            ProducerId(id),
            Vec3::new(id as f32 - 4.0, 0.0, -12.0),
            -Vec3::Z,
            45.0,
            2.0,
        ));
    }
    let mut pipeline = TechniquePipeline::new(&device, &prefs).unwrap();
    pipeline.register(Box::new(shadows));

    let assets = AssetRegistry::new();
    let mut scene = RecordingScene::new();
    let mut services = FrameServices {
        device: &device,
        assets: &assets,
        geometry: &mut scene,
    };
    for frame in 0..3 {
        let now = frame as f64 * 0.016;
        let perspectives = pipeline.begin_frame(&mut services, &[viewer()], now, 0.016).unwrap();
        pipeline
            .render(&mut services, TechniqueCategory::ALL, &perspectives)
            .unwrap();
        pipeline.end_frame(&mut services).unwrap();
    }

    let shadows = pipeline.techniques().find::<ShadowTechnique>().unwrap();
    assert!(shadows.lights().iter().all(|l| l.views[0].last_update.is_some()));
    assert_eq!(pipeline.frame_count(), 3);
}
