use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use umbra_core::math::Vec3;
use umbra_core::renderer::api::Viewpoint;
use umbra_lanes::render_lane::{
    CullCandidate, ImportanceScheduler, ProducerId, ResourceProducer, SlotAllocator,
    VisibilityCuller,
};

fn bench_scheduling(c: &mut Criterion) {
    let viewer = Viewpoint::look_at(Vec3::ZERO, -Vec3::Z, Vec3::Y, 70.0, 16.0 / 9.0, 0.1, 500.0);

    // 1,000 point lights on a grid in front of the viewer, half of them refreshed recently.
    let mut slots = SlotAllocator::new();
    let mut lights: Vec<ResourceProducer> = (0..1_000)
        .map(|i| {
            let position = Vec3::new((i % 40) as f32 * 4.0 - 80.0, 0.0, -((i / 40) as f32) * 4.0 - 5.0);
            let mut light = ResourceProducer::point(ProducerId(i), position, 3.0);
            light.slot = Some(slots.acquire(light.id));
            light.sync_views(1024, None, 1);
            if i % 2 == 0 {
                for view in &mut light.views {
                    view.last_update = Some(9.0);
                }
            }
            light
        })
        .collect();
    let candidates: Vec<CullCandidate> = lights.iter().map(ResourceProducer::cull_candidate).collect();

    let mut group = c.benchmark_group("Importance Scheduling");

    group.bench_function("Cull 1000 lights", |b| {
        let mut culler = VisibilityCuller::new();
        b.iter(|| {
            let table = culler.cull(std::slice::from_ref(&viewer), &candidates);
            black_box(table.visible_count(0));
        });
    });

    group.bench_function("Cull + schedule 6000 views (K=4)", |b| {
        let mut culler = VisibilityCuller::new();
        let mut scheduler = ImportanceScheduler::new(4, 5.0);
        b.iter(|| {
            let table = culler.cull(std::slice::from_ref(&viewer), &candidates);
            let shortlist = scheduler.schedule(&mut lights, table, &viewer, 10.0);
            black_box(shortlist.len());
            scheduler.clear();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_scheduling);
criterion_main!(benches);
