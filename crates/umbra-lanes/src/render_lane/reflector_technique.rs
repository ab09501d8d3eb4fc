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

//! Reflection probe scheduling, capture and prefiltering.
//!
//! Each probe owns six consecutive layers of a cube-map array. A refresh
//! renders one face into a scratch capture layer, copies it into the probe's
//! layer and rebuilds the rougher mips of that layer by convolution.

use super::composition::{CompositionBatch, CompositionPool, ProducerRecord};
use super::importance_lane::{ImportanceScheduler, Shortlist};
use super::layered_target::LayeredTarget;
use super::producer::{ProducerId, ProducerKind, ResourceProducer};
use super::slot_allocator::{Slot, SlotAllocator};
use super::visibility_lane::{CullCandidate, VisibilityCuller};
use std::any::Any;
use umbra_core::asset::AssetId;
use umbra_core::config::{PreferenceKey, Preferences, WatchedPreference};
use umbra_core::math::Vec3;
use umbra_core::renderer::api::util::{CopyState, MultiBuffer};
use umbra_core::renderer::api::{
    binding, BufferUsage, DrawIndirectArgs, Perspective, TextureFormat, TextureId,
};
use umbra_core::renderer::{GraphicsDevice, ResourceError};
use umbra_core::technique::{
    FrameContext, Technique, TechniqueCategory, TechniqueError, TechniqueKind,
};

/// Mip levels of the cube array. Mip 0 is the sharp capture.
pub const ENVMAP_MIP_LEVELS: u32 = 6;

/// Categories drawn when capturing a probe face.
pub const CAPTURE_CATEGORIES: TechniqueCategory = TechniqueCategory::GEOMETRY
    .union(TechniqueCategory::PRIMARY_LIGHTING)
    .union(TechniqueCategory::SECONDARY_LIGHTING);

/// Roughness used to prefilter `mip`.
pub fn mip_roughness(mip: u32) -> f32 {
    mip as f32 / (ENVMAP_MIP_LEVELS - 1) as f32
}

/// Captures and composes reflection probes.
#[derive(Debug)]
pub struct ReflectorTechnique {
    probes: Vec<ResourceProducer>,
    slots: SlotAllocator,
    cube_array: LayeredTarget,
    capture: LayeredTarget,
    culler: VisibilityCuller,
    scheduler: ImportanceScheduler,
    records: MultiBuffer,
    composition: CompositionPool,
    probe_vertex_count: u32,
    dependencies: Vec<AssetId>,
    max_per_frame: WatchedPreference,
    envmap_size: WatchedPreference,
    staleness_window: WatchedPreference,
}

impl ReflectorTechnique {
    /// Creates the technique and subscribes to its preferences.
    pub fn new(device: &dyn GraphicsDevice, preferences: &mut Preferences) -> Result<Self, ResourceError> {
        let max_per_frame = preferences.watched(PreferenceKey::EnvmapMaxPerFrame);
        let envmap_size = preferences.watched(PreferenceKey::EnvmapSize);
        let staleness_window = preferences.watched(PreferenceKey::StalenessWindow);
        let depth = preferences.get_or_default(PreferenceKey::BufferingDepth) as usize;
        let size = envmap_size.value() as u32;

        Ok(Self {
            probes: Vec::new(),
            slots: SlotAllocator::new(),
            cube_array: LayeredTarget::new(
                ProducerKind::Reflector { scale: Vec3::ONE }.layers_per_slot(),
                size,
                ENVMAP_MIP_LEVELS,
                TextureFormat::Rgba16Float,
                "Envmap Cube Array",
            ),
            capture: LayeredTarget::new(1, size, 1, TextureFormat::Rgba16Float, "Envmap Capture"),
            culler: VisibilityCuller::new(),
            scheduler: ImportanceScheduler::new(
                max_per_frame.value().max(0.0) as usize,
                staleness_window.value(),
            ),
            records: MultiBuffer::new(device, depth, BufferUsage::STORAGE, "Reflector Producers")?,
            composition: CompositionPool::new(depth, "Reflector"),
            probe_vertex_count: 36,
            dependencies: Vec::new(),
            max_per_frame,
            envmap_size,
            staleness_window,
        })
    }

    /// Sets the vertex count of the registered probe mesh.
    pub fn with_probe_vertex_count(mut self, count: u32) -> Self {
        self.probe_vertex_count = count;
        self
    }

    /// Sets the assets the technique waits on.
    pub fn with_dependencies(mut self, dependencies: Vec<AssetId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Adds a probe covering a box of extents `scale` around `position`.
    pub fn add_reflector(&mut self, id: ProducerId, position: Vec3, scale: Vec3) -> Slot {
        let mut probe = ResourceProducer::reflector(id, position, scale);
        let slot = self.slots.acquire(id);
        probe.slot = Some(slot);
        match self.probes.iter_mut().find(|p| p.id == id) {
            Some(existing) => *existing = probe,
            None => self.probes.push(probe),
        }
        log::debug!("ReflectorTechnique: probe {:?} assigned slot {}", id, slot.0);
        slot
    }

    /// Removes a probe and releases its slot.
    pub fn remove_reflector(&mut self, id: ProducerId) -> bool {
        let Some(index) = self.probes.iter().position(|p| p.id == id) else {
            return false;
        };
        self.probes.remove(index);
        self.slots.release(id);
        self.scheduler.clear();
        true
    }

    /// Every probe, in composition order.
    pub fn reflectors(&self) -> &[ResourceProducer] {
        &self.probes
    }

    /// The entries scheduled for this frame.
    pub fn shortlist(&self) -> &Shortlist {
        self.scheduler.shortlist()
    }

    /// The prefiltered cube array, if allocated.
    pub fn cube_array(&self) -> Option<TextureId> {
        self.cube_array.texture()
    }

    /// Current face resolution.
    pub fn envmap_size(&self) -> u32 {
        self.cube_array.size()
    }

    /// Releases every GPU resource.
    pub fn destroy(self, device: &dyn GraphicsDevice) {
        self.cube_array.destroy(device);
        self.capture.destroy(device);
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
        if let Some(size) = self.envmap_size.poll() {
            let size = size as u32;
            self.capture.set_resolution(device, size)?;
            if self.cube_array.set_resolution(device, size)? {
                for probe in &mut self.probes {
                    probe.mark_stale();
                }
                log::info!("ReflectorTechnique: envmap size changed to {size}, all probes stale");
            }
        }
        Ok(())
    }

    fn upload_records(&mut self, device: &dyn GraphicsDevice) -> Result<(), TechniqueError> {
        let records: Vec<ProducerRecord> = self.probes.iter().map(ProducerRecord::from_producer).collect();
        self.records.begin_writing(device)?;
        self.records.write_pod(device, 0, &records)?;
        self.records.end_writing(device)?;
        Ok(())
    }
}

impl Technique for ReflectorTechnique {
    fn name(&self) -> &'static str {
        "Reflector"
    }

    fn kind(&self) -> TechniqueKind {
        TechniqueKind::Reflector
    }

    fn category(&self) -> TechniqueCategory {
        TechniqueCategory::SECONDARY_LIGHTING
    }

    fn dependencies(&self) -> &[AssetId] {
        &self.dependencies
    }

    fn update_cache(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), TechniqueError> {
        let device = ctx.device;
        self.sync_preferences(device)?;

        let size = self.cube_array.size();
        for probe in &mut self.probes {
            probe.sync_views(size, None, 1);
        }
        self.cube_array.ensure_capacity(device, self.slots.high_water())?;
        let captures = self.scheduler.max_per_frame() as u32;
        if captures > self.capture.slot_capacity() {
            self.capture.ensure_capacity(device, captures)?;
        }

        let candidates: Vec<CullCandidate> = self.probes.iter().map(ResourceProducer::cull_candidate).collect();
        let visibility = self.culler.cull(ctx.viewpoints, &candidates);
        if let Some(viewer) = ctx.main_viewpoint() {
            self.scheduler.schedule(&mut self.probes, visibility, viewer, ctx.now);
        }

        self.upload_records(device)
    }

    fn update_pass(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), TechniqueError> {
        let device = ctx.device;
        let (Some(capture), Some(cube_array)) = (self.capture.texture(), self.cube_array.texture()) else {
            return Ok(());
        };

        let entries = self.scheduler.shortlist().entries().to_vec();
        let mut touched = Vec::with_capacity(entries.len());
        for (scratch, entry) in entries.iter().enumerate() {
            let scratch = scratch as u32;
            if scratch >= self.capture.layer_count() {
                break;
            }
            let Some(view) = self
                .probes
                .get(entry.view.producer)
                .and_then(|p| p.views.get(entry.view.face))
            else {
                continue;
            };

            self.capture.clear_layers(device, scratch, 1)?;
            device.bind_render_target_layer(capture, scratch)?;
            ctx.geometry
                .render_geometry(device, &view.viewpoint, CAPTURE_CATEGORIES)?;
            device.copy_texture_layers(capture, scratch, cube_array, entry.layer, 1)?;
            ImportanceScheduler::mark_updated(&mut self.probes, entry.view, ctx.now);
            touched.push(entry.layer);
        }

        for mip in 1..ENVMAP_MIP_LEVELS {
            for &layer in &touched {
                device.convolve_mip(cube_array, layer, 1, mip, mip_roughness(mip))?;
            }
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
                batch.push_visible(*perspective, index);
            }
        }
        if batch.visible_count() == 0 {
            return Ok(());
        }
        // One instanced draw covers every visible probe.
        batch.push_draw(DrawIndirectArgs::instanced(
            self.probe_vertex_count,
            batch.visible_count() as u32,
        ));

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
