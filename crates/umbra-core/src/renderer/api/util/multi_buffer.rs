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

//! Fence-gated N-way buffering of a GPU arena.
//!
//! A [`MultiBuffer`] holds `N` independent [`ArenaBuffer`] copies and rotates through
//! them once per frame, so the CPU can fill copy `i + 1` while the GPU still reads
//! copy `i`:
//!
//! ```text
//! Frame N:     [copy 0: begin_writing .. end_writing .. bind_for_reading .. end_reading]
//! Frame N+1:   [copy 1: ...]                 GPU may still be reading copy 0
//! Frame N+3:   [copy 0: begin_writing]       waits on copy 0's fences first
//! ```
//!
//! Each copy moves through `Idle -> Writable -> Written -> Readable -> Idle`.
//! `begin_writing` is the only operation that blocks: it spins on the copy's write
//! and read fences through the [`FenceWait`] primitive. `bind_for_reading` never
//! blocks the CPU, it makes the GPU wait on the write fence instead.

use super::arena_buffer::ArenaBuffer;
use super::fence_wait::{FenceWait, SpinWait};
use crate::renderer::api::buffer::{BufferId, BufferUsage};
use crate::renderer::api::fence::FenceId;
use crate::renderer::error::{ChannelError, ResourceError};
use crate::renderer::traits::GraphicsDevice;
use std::borrow::Cow;

/// Default number of copies.
pub const DEFAULT_BUFFERING_DEPTH: usize = 3;

/// The lifecycle state of one copy of a [`MultiBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyState {
    /// Not in use this frame. May still be referenced by in-flight GPU work.
    Idle,
    /// The CPU may write into it.
    Writable,
    /// Writing is finished and a write fence is installed.
    Written,
    /// Bound for GPU reads.
    Readable,
}

/// How long `begin_writing` had to wait, in fence polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaitReport {
    /// Polls spent on the copy's previous write fence.
    pub write_fence_polls: u32,
    /// Polls spent on the copy's previous read fence.
    pub read_fence_polls: u32,
}

impl WaitReport {
    /// Returns `true` if the CPU had to wait on either fence.
    pub fn waited(&self) -> bool {
        self.write_fence_polls > 0 || self.read_fence_polls > 0
    }

    fn merge(&mut self, other: WaitReport) {
        self.write_fence_polls += other.write_fence_polls;
        self.read_fence_polls += other.read_fence_polls;
    }
}

#[derive(Debug)]
struct BufferCopy {
    arena: ArenaBuffer,
    write_fence: Option<FenceId>,
    read_fence: Option<FenceId>,
    state: CopyState,
}

impl BufferCopy {
    /// Waits on and releases both fences.
    fn drain_fences<W: FenceWait>(
        &mut self,
        device: &dyn GraphicsDevice,
        waiter: &W,
    ) -> Result<WaitReport, ResourceError> {
        let mut report = WaitReport::default();
        if let Some(fence) = self.write_fence {
            report.write_fence_polls = waiter.wait(device, fence)?;
            device.destroy_fence(fence)?;
            self.write_fence = None;
        }
        if let Some(fence) = self.read_fence {
            report.read_fence_polls = waiter.wait(device, fence)?;
            device.destroy_fence(fence)?;
            self.read_fence = None;
        }
        Ok(report)
    }
}

/// `N` fence-synchronized copies of a growable GPU buffer.
#[derive(Debug)]
pub struct MultiBuffer<W: FenceWait = SpinWait> {
    copies: Vec<BufferCopy>,
    index: usize,
    waiter: W,
    label: Cow<'static, str>,
}

impl MultiBuffer<SpinWait> {
    /// Creates a channel of `depth` copies using the default [`SpinWait`].
    pub fn new(
        device: &dyn GraphicsDevice,
        depth: usize,
        usage: BufferUsage,
        label: impl Into<Cow<'static, str>>,
    ) -> Result<Self, ResourceError> {
        Self::with_waiter(device, depth, usage, SpinWait::new(), label)
    }
}

impl<W: FenceWait> MultiBuffer<W> {
    /// Creates a channel of `depth` copies (at least one) with a custom wait strategy.
    pub fn with_waiter(
        device: &dyn GraphicsDevice,
        depth: usize,
        usage: BufferUsage,
        waiter: W,
        label: impl Into<Cow<'static, str>>,
    ) -> Result<Self, ResourceError> {
        let label = label.into();
        let depth = depth.max(1);
        let mut copies = Vec::with_capacity(depth);
        for i in 0..depth {
            let copy_label = match i {
                0 => label.clone(),
                _ => Cow::Owned(format!("{label} [copy {i}]")),
            };
            copies.push(BufferCopy {
                arena: ArenaBuffer::new(device, usage, copy_label)?,
                write_fence: None,
                read_fence: None,
                state: CopyState::Idle,
            });
        }
        Ok(Self {
            copies,
            index: 0,
            waiter,
            label,
        })
    }

    /// Number of copies.
    pub fn depth(&self) -> usize {
        self.copies.len()
    }

    /// Index of the copy currently used for writing and reading.
    pub fn current_index(&self) -> usize {
        self.index
    }

    /// State of the current copy.
    pub fn state(&self) -> CopyState {
        self.copies[self.index].state
    }

    /// Capacity of the current copy in bytes.
    pub fn capacity(&self) -> u64 {
        self.copies[self.index].arena.capacity()
    }

    /// Device buffer of the current copy. Re-fetch after any write or resize.
    pub fn current_buffer(&self) -> BufferId {
        self.copies[self.index].arena.id()
    }

    /// The current copy's arena, for read-back.
    pub fn current_arena(&self) -> &ArenaBuffer {
        &self.copies[self.index].arena
    }

    fn expect_state(&self, op: &'static str, allowed: &[CopyState]) -> Result<(), ChannelError> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(ChannelError::InvalidTransition {
                op,
                index: self.index,
                state,
            })
        }
    }

    /// Waits until the current copy is no longer used by the GPU and opens it for writing.
    ///
    /// Rewriting a copy that was written but not yet read is allowed.
    pub fn begin_writing(&mut self, device: &dyn GraphicsDevice) -> Result<WaitReport, ChannelError> {
        self.expect_state("begin_writing", &[CopyState::Idle, CopyState::Written])?;
        let copy = &mut self.copies[self.index];
        let report = copy.drain_fences(device, &self.waiter)?;
        if report.waited() {
            log::trace!(
                "MultiBuffer({}): copy {} waited {:?}",
                self.label,
                self.index,
                report
            );
        }
        copy.state = CopyState::Writable;
        Ok(report)
    }

    /// Writes bytes into the current copy, growing it if needed.
    pub fn write(
        &mut self,
        device: &dyn GraphicsDevice,
        offset: u64,
        data: &[u8],
    ) -> Result<(), ChannelError> {
        self.expect_state("write", &[CopyState::Writable])?;
        self.copies[self.index].arena.write(device, offset, data)?;
        Ok(())
    }

    /// Writes plain-old-data records into the current copy, starting at element `first`.
    pub fn write_pod<T: bytemuck::Pod>(
        &mut self,
        device: &dyn GraphicsDevice,
        first: usize,
        items: &[T],
    ) -> Result<(), ChannelError> {
        self.expect_state("write", &[CopyState::Writable])?;
        self.copies[self.index].arena.write_pod(device, first, items)?;
        Ok(())
    }

    /// Closes the current copy for writing and installs its write fence.
    pub fn end_writing(&mut self, device: &dyn GraphicsDevice) -> Result<(), ChannelError> {
        self.expect_state("end_writing", &[CopyState::Writable])?;
        let copy = &mut self.copies[self.index];
        if copy.write_fence.is_none() {
            copy.write_fence = Some(device.create_fence()?);
        }
        copy.state = CopyState::Written;
        Ok(())
    }

    /// Binds the current copy for GPU reads at `binding`.
    ///
    /// The GPU is told to wait on the write fence first, so readers never observe
    /// a copy whose writes have not completed. May be called several times per frame.
    pub fn bind_for_reading(
        &mut self,
        device: &dyn GraphicsDevice,
        binding: u32,
    ) -> Result<(), ChannelError> {
        self.expect_state("bind_for_reading", &[CopyState::Written, CopyState::Readable])?;
        let copy = &mut self.copies[self.index];
        if let Some(fence) = copy.write_fence {
            device.gpu_wait_fence(fence)?;
        }
        device.bind_storage_buffer(binding, copy.arena.id())?;
        copy.state = CopyState::Readable;
        Ok(())
    }

    /// Installs a read fence on the current copy and advances to the next one.
    pub fn end_reading(&mut self, device: &dyn GraphicsDevice) -> Result<(), ChannelError> {
        self.expect_state("end_reading", &[CopyState::Written, CopyState::Readable])?;
        let copy = &mut self.copies[self.index];
        if let Some(stale) = copy.read_fence.take() {
            device.destroy_fence(stale)?;
        }
        copy.read_fence = Some(device.create_fence()?);
        copy.state = CopyState::Idle;
        self.index = (self.index + 1) % self.copies.len();
        Ok(())
    }

    /// Grows every copy to at least `size` bytes, preserving contents. Never shrinks.
    ///
    /// Copies still referenced by the GPU are waited on first, since growth
    /// replaces their buffers.
    pub fn resize(&mut self, device: &dyn GraphicsDevice, size: u64) -> Result<WaitReport, ChannelError> {
        let mut total = WaitReport::default();
        if self.copies.iter().all(|copy| copy.arena.capacity() >= size) {
            return Ok(total);
        }
        for copy in &mut self.copies {
            if copy.arena.capacity() >= size {
                continue;
            }
            total.merge(copy.drain_fences(device, &self.waiter)?);
            copy.arena.set_max_size(device, size)?;
        }
        Ok(total)
    }

    /// Releases every copy and any outstanding fences.
    pub fn destroy(self, device: &dyn GraphicsDevice) {
        for copy in self.copies {
            for fence in [copy.write_fence, copy.read_fence].into_iter().flatten() {
                if let Err(e) = device.destroy_fence(fence) {
                    log::warn!("MultiBuffer({}): Failed to destroy fence: {:?}", self.label, e);
                }
            }
            copy.arena.destroy(device);
        }
    }
}
