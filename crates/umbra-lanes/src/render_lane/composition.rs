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

//! Per-view composition of visible producers.
//!
//! Composition draws each visible producer's light volume (or probe volume)
//! once per perspective. The per-draw inputs live in three multi-buffered
//! channels that are written, bound, drawn from, and fenced within one call,
//! so a technique rendered several times per frame needs several sets of
//! them. [`CompositionPool`] keeps those sets and hands out a fresh one per
//! draw until [`CompositionPool::reset`] is called at the end of the frame.

use super::producer::{ResourceProducer, MAX_SUB_VIEWPOINTS};
use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;
use umbra_core::math::{Mat4, Vec4};
use umbra_core::renderer::api::util::MultiBuffer;
use umbra_core::renderer::api::{binding, BufferUsage, DrawIndirectArgs, Perspective};
use umbra_core::renderer::{ChannelError, GraphicsDevice};

// ─────────────────────────────────────────────────────────────────────────────
// GPU records
// ─────────────────────────────────────────────────────────────────────────────

/// The GPU-side view of one producer, uploaded once per frame at [`binding::PRODUCERS`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ProducerRecord {
    /// `xyz` = position, `w` = radius.
    pub position_radius: Vec4,
    /// `[kind tag, first layer, view count, enabled mask]`.
    pub params: [u32; 4],
    /// View-projection of every sub-viewpoint. Unused entries are identity.
    pub view_proj: [Mat4; MAX_SUB_VIEWPOINTS],
}

impl ProducerRecord {
    /// Packs a producer. Producers without a slot report layer `u32::MAX`.
    pub fn from_producer(producer: &ResourceProducer) -> Self {
        let mut view_proj = [Mat4::IDENTITY; MAX_SUB_VIEWPOINTS];
        let mut enabled_mask = 0u32;
        for (face, view) in producer.views.iter().take(MAX_SUB_VIEWPOINTS).enumerate() {
            view_proj[face] = view.viewpoint.view_proj;
            if view.enabled {
                enabled_mask |= 1 << face;
            }
        }
        let radius = if producer.radius.is_finite() {
            producer.radius
        } else {
            f32::MAX
        };
        Self {
            position_radius: Vec4::new(
                producer.position.x,
                producer.position.y,
                producer.position.z,
                radius,
            ),
            params: [
                producer.kind.tag(),
                producer.layer_of(0).unwrap_or(u32::MAX),
                producer.views.len().min(MAX_SUB_VIEWPOINTS) as u32,
                enabled_mask,
            ],
            view_proj,
        }
    }
}

/// Which perspective a visible producer is composed into.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PerspectiveIndex {
    /// Index into the camera records.
    pub view_index: u32,
    /// Output layer.
    pub layer: u32,
}

impl From<Perspective> for PerspectiveIndex {
    fn from(perspective: Perspective) -> Self {
        Self {
            view_index: perspective.view_index as u32,
            layer: perspective.layer,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Batches
// ─────────────────────────────────────────────────────────────────────────────

/// The inputs of one composition draw, accumulated across perspectives.
///
/// `perspectives` and `producers` are parallel: entry `i` composes producer
/// `producers[i]` into `perspectives[i]`.
#[derive(Debug, Clone, Default)]
pub struct CompositionBatch {
    perspectives: Vec<PerspectiveIndex>,
    producers: Vec<u32>,
    args: Vec<DrawIndirectArgs>,
}

impl CompositionBatch {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one visible producer for one perspective.
    pub fn push_visible(&mut self, perspective: Perspective, producer: u32) {
        self.perspectives.push(perspective.into());
        self.producers.push(producer);
    }

    /// Adds one indirect draw.
    pub fn push_draw(&mut self, args: DrawIndirectArgs) {
        self.args.push(args);
    }

    /// Number of visible `(perspective, producer)` pairs.
    pub fn visible_count(&self) -> usize {
        self.producers.len()
    }

    /// The indirect draws.
    pub fn draws(&self) -> &[DrawIndirectArgs] {
        &self.args
    }

    /// `true` if there is nothing to draw.
    pub fn is_empty(&self) -> bool {
        self.producers.is_empty() || self.args.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pool
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct DrawBuffers {
    perspectives: MultiBuffer,
    visible: MultiBuffer,
    indirect: MultiBuffer,
}

impl DrawBuffers {
    fn new(device: &dyn GraphicsDevice, depth: usize, label: &str, draw: usize) -> Result<Self, ChannelError> {
        Ok(Self {
            perspectives: MultiBuffer::new(
                device,
                depth,
                BufferUsage::STORAGE,
                format!("{label} Perspectives #{draw}"),
            )?,
            visible: MultiBuffer::new(
                device,
                depth,
                BufferUsage::STORAGE,
                format!("{label} Visible #{draw}"),
            )?,
            indirect: MultiBuffer::new(
                device,
                depth,
                BufferUsage::INDIRECT,
                format!("{label} Indirect #{draw}"),
            )?,
        })
    }

    fn upload(&mut self, device: &dyn GraphicsDevice, batch: &CompositionBatch) -> Result<(), ChannelError> {
        self.perspectives.begin_writing(device)?;
        self.perspectives.write_pod(device, 0, &batch.perspectives)?;
        self.perspectives.end_writing(device)?;

        self.visible.begin_writing(device)?;
        self.visible.write_pod(device, 0, &batch.producers)?;
        self.visible.end_writing(device)?;

        self.indirect.begin_writing(device)?;
        self.indirect.write_pod(device, 0, &batch.args)?;
        self.indirect.end_writing(device)
    }

    fn draw(&mut self, device: &dyn GraphicsDevice, draw_count: u32) -> Result<(), ChannelError> {
        self.perspectives.bind_for_reading(device, binding::PERSPECTIVES)?;
        self.visible.bind_for_reading(device, binding::VISIBLE_INDICES)?;
        self.indirect.bind_for_reading(device, binding::INDIRECT_ARGS)?;

        device.draw_indirect(self.indirect.current_buffer(), 0, draw_count)?;

        self.perspectives.end_reading(device)?;
        self.visible.end_reading(device)?;
        self.indirect.end_reading(device)
    }

    fn destroy(self, device: &dyn GraphicsDevice) {
        self.perspectives.destroy(device);
        self.visible.destroy(device);
        self.indirect.destroy(device);
    }
}

/// A growable pool of per-draw channel sets.
#[derive(Debug)]
pub struct CompositionPool {
    draws: Vec<DrawBuffers>,
    draw_index: usize,
    depth: usize,
    label: Cow<'static, str>,
}

impl CompositionPool {
    /// An empty pool whose channels will hold `depth` copies each.
    pub fn new(depth: usize, label: impl Into<Cow<'static, str>>) -> Self {
        Self {
            draws: Vec::new(),
            draw_index: 0,
            depth: depth.max(1),
            label: label.into(),
        }
    }

    /// Draws issued since the last reset.
    pub fn draws_issued(&self) -> usize {
        self.draw_index
    }

    /// Channel sets allocated so far.
    pub fn pooled(&self) -> usize {
        self.draws.len()
    }

    /// Uploads `batch`, binds it, and issues its indirect draws.
    ///
    /// Every channel is closed for reading right after the draw, so its read
    /// fence covers exactly this draw. Returns `false` without touching the
    /// device if the batch is empty.
    pub fn submit(&mut self, device: &dyn GraphicsDevice, batch: &CompositionBatch) -> Result<bool, ChannelError> {
        if batch.is_empty() {
            return Ok(false);
        }
        if self.draw_index == self.draws.len() {
            let set = DrawBuffers::new(device, self.depth, &self.label, self.draw_index)?;
            self.draws.push(set);
        }
        let set = &mut self.draws[self.draw_index];
        set.upload(device, batch)?;
        set.draw(device, batch.args.len() as u32)?;
        self.draw_index += 1;
        Ok(true)
    }

    /// Rewinds to the first channel set. Called once per frame.
    pub fn reset(&mut self) {
        self.draw_index = 0;
    }

    /// Releases every channel.
    pub fn destroy(self, device: &dyn GraphicsDevice) {
        for set in self.draws {
            set.destroy(device);
        }
    }
}
