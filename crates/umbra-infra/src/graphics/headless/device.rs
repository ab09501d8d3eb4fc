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

//! A CPU-only implementation of [`GraphicsDevice`].
//!
//! Buffers live in host memory, fences signal after a configurable number of
//! polls, and every command is appended to a log that tests can inspect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use umbra_core::renderer::api::{
    BufferDescriptor, BufferId, DrawIndirectArgs, FenceId, FenceStatus, TextureArrayDescriptor,
    TextureFormat, TextureId,
};
use umbra_core::renderer::{GraphicsDevice, ResourceError};

/// One recorded device command.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    /// A buffer-to-buffer copy.
    CopyBuffer {
        /// Source buffer.
        source: BufferId,
        /// Destination buffer.
        destination: BufferId,
        /// Bytes copied.
        size: u64,
    },
    /// A layer range copy between texture arrays.
    CopyTextureLayers {
        /// Source array.
        source: TextureId,
        /// First source layer.
        source_layer: u32,
        /// Destination array.
        destination: TextureId,
        /// First destination layer.
        destination_layer: u32,
        /// Layers copied.
        count: u32,
    },
    /// A layer range clear.
    ClearTextureLayers {
        /// Cleared array.
        texture: TextureId,
        /// First cleared layer.
        first: u32,
        /// Layers cleared.
        count: u32,
    },
    /// A mip convolution pass.
    ConvolveMip {
        /// Filtered array.
        texture: TextureId,
        /// First filtered layer.
        first_layer: u32,
        /// Layers filtered.
        count: u32,
        /// Destination mip.
        mip: u32,
        /// Roughness the mip is filtered for.
        roughness: f32,
    },
    /// A GPU-side wait on a fence.
    GpuWait(FenceId),
    /// A storage buffer binding.
    BindStorageBuffer {
        /// Binding point.
        binding: u32,
        /// Bound buffer.
        buffer: BufferId,
    },
    /// A render target binding.
    BindRenderTargetLayer {
        /// Target array.
        texture: TextureId,
        /// Target layer.
        layer: u32,
    },
    /// An indirect draw, with the arguments read from the buffer at issue time.
    DrawIndirect {
        /// Indirect argument buffer.
        buffer: BufferId,
        /// Offset of the first record.
        offset: u64,
        /// The argument records consumed.
        args: Vec<DrawIndirectArgs>,
    },
}

#[derive(Debug)]
struct HeadlessTexture {
    layers: u32,
    bytes: u64,
    format: TextureFormat,
}

/// An in-memory graphics device for tests, tools and the sandbox.
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    buffers: Mutex<HashMap<BufferId, Vec<u8>>>,
    textures: Mutex<HashMap<TextureId, HeadlessTexture>>,
    /// Remaining timed-out polls per fence.
    fences: Mutex<HashMap<FenceId, u32>>,
    commands: Mutex<Vec<DeviceCommand>>,
    next_id: AtomicUsize,
    fence_latency: AtomicU32,
    flushes: AtomicU32,
    budget: Option<u64>,
}

fn poisoned<T>(what: &str, e: std::sync::PoisonError<T>) -> ResourceError {
    ResourceError::BackendError(format!("Mutex poisoned ({what}): {e}"))
}

impl HeadlessDevice {
    /// A device whose fences are signalled on the first poll.
    pub fn new() -> Self {
        Self::default()
    }

    /// A device whose fences time out `polls` times before signalling.
    pub fn with_fence_latency(polls: u32) -> Self {
        let device = Self::default();
        device.fence_latency.store(polls, Ordering::Relaxed);
        device
    }

    /// Fails allocations once live buffer and texture bytes would exceed `bytes`.
    pub fn with_budget(mut self, bytes: u64) -> Self {
        self.budget = Some(bytes);
        self
    }

    /// Latency applied to fences created from now on.
    pub fn set_fence_latency(&self, polls: u32) {
        self.fence_latency.store(polls, Ordering::Relaxed);
    }

    /// Signals every outstanding fence, as if the GPU caught up.
    pub fn signal_all_fences(&self) {
        if let Ok(mut fences) = self.fences.lock() {
            fences.values_mut().for_each(|left| *left = 0);
        }
    }

    /// Fences that would still time out if polled.
    pub fn pending_fence_count(&self) -> usize {
        self.fences
            .lock()
            .map(|f| f.values().filter(|left| **left > 0).count())
            .unwrap_or(0)
    }

    /// Fences that exist, signalled or not.
    pub fn live_fence_count(&self) -> usize {
        self.fences.lock().map(|f| f.len()).unwrap_or(0)
    }

    /// Buffers that exist.
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.lock().map(|b| b.len()).unwrap_or(0)
    }

    /// Texture arrays that exist.
    pub fn live_texture_count(&self) -> usize {
        self.textures.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// Layer count of a texture array.
    pub fn texture_layers(&self, id: TextureId) -> Option<u32> {
        self.textures.lock().ok()?.get(&id).map(|t| t.layers)
    }

    /// Format of a texture array.
    pub fn texture_format(&self, id: TextureId) -> Option<TextureFormat> {
        self.textures.lock().ok()?.get(&id).map(|t| t.format)
    }

    /// Number of fence polls that requested a flush.
    pub fn flush_count(&self) -> u32 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// A copy of the command log.
    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Empties the command log.
    pub fn clear_commands(&self) {
        if let Ok(mut commands) = self.commands.lock() {
            commands.clear();
        }
    }

    fn next_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record(&self, command: DeviceCommand) -> Result<(), ResourceError> {
        self.commands
            .lock()
            .map_err(|e| poisoned("commands", e))?
            .push(command);
        Ok(())
    }

    fn live_bytes(&self) -> Result<u64, ResourceError> {
        let buffers: u64 = self
            .buffers
            .lock()
            .map_err(|e| poisoned("buffers", e))?
            .values()
            .map(|b| b.len() as u64)
            .sum();
        let textures: u64 = self
            .textures
            .lock()
            .map_err(|e| poisoned("textures", e))?
            .values()
            .map(|t| t.bytes)
            .sum();
        Ok(buffers + textures)
    }

    fn check_budget(&self, requested: u64) -> Result<(), ResourceError> {
        if let Some(budget) = self.budget {
            if self.live_bytes()? + requested > budget {
                log::warn!("HeadlessDevice: allocation of {} bytes exceeds budget", requested);
                return Err(ResourceError::OutOfMemory { requested });
            }
        }
        Ok(())
    }

    fn buffers(&self) -> Result<MutexGuard<'_, HashMap<BufferId, Vec<u8>>>, ResourceError> {
        self.buffers.lock().map_err(|e| poisoned("buffers", e))
    }

    fn check_layers(&self, id: TextureId, first: u32, count: u32) -> Result<(), ResourceError> {
        let textures = self.textures.lock().map_err(|e| poisoned("textures", e))?;
        let texture = textures.get(&id).ok_or(ResourceError::InvalidHandle)?;
        if first + count > texture.layers {
            return Err(ResourceError::OutOfBounds {
                offset: u64::from(first),
                size: u64::from(count),
                capacity: u64::from(texture.layers),
            });
        }
        Ok(())
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        self.check_budget(descriptor.size)?;
        let id = BufferId(self.next_id());
        self.buffers()?.insert(id, vec![0; descriptor.size as usize]);
        log::trace!(
            "HeadlessDevice: created buffer {:?} ({:?}, {} bytes)",
            id,
            descriptor.label,
            descriptor.size
        );
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        self.buffers()?
            .remove(&id)
            .map(|_| ())
            .ok_or(ResourceError::InvalidHandle)
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let mut buffers = self.buffers()?;
        let buffer = buffers.get_mut(&id).ok_or(ResourceError::InvalidHandle)?;
        let end = offset as usize + data.len();
        if end > buffer.len() {
            return Err(ResourceError::OutOfBounds {
                offset,
                size: data.len() as u64,
                capacity: buffer.len() as u64,
            });
        }
        buffer[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, id: BufferId, offset: u64, size: u64) -> Result<Vec<u8>, ResourceError> {
        let buffers = self.buffers()?;
        let buffer = buffers.get(&id).ok_or(ResourceError::InvalidHandle)?;
        buffer
            .get(offset as usize..(offset + size) as usize)
            .map(<[u8]>::to_vec)
            .ok_or(ResourceError::OutOfBounds {
                offset,
                size,
                capacity: buffer.len() as u64,
            })
    }

    fn copy_buffer_to_buffer(
        &self,
        source: BufferId,
        source_offset: u64,
        destination: BufferId,
        destination_offset: u64,
        size: u64,
    ) -> Result<(), ResourceError> {
        let bytes = self.read_buffer(source, source_offset, size)?;
        self.write_buffer(destination, destination_offset, &bytes)?;
        self.record(DeviceCommand::CopyBuffer {
            source,
            destination,
            size,
        })
    }

    fn create_fence(&self) -> Result<FenceId, ResourceError> {
        let id = FenceId(self.next_id());
        let latency = self.fence_latency.load(Ordering::Relaxed);
        self.fences
            .lock()
            .map_err(|e| poisoned("fences", e))?
            .insert(id, latency);
        Ok(id)
    }

    fn client_wait_fence(
        &self,
        fence: FenceId,
        _timeout_ns: u64,
        flush: bool,
    ) -> Result<FenceStatus, ResourceError> {
        if flush {
            self.flushes.fetch_add(1, Ordering::Relaxed);
        }
        let mut fences = self.fences.lock().map_err(|e| poisoned("fences", e))?;
        let left = fences.get_mut(&fence).ok_or(ResourceError::InvalidHandle)?;
        if *left == 0 {
            Ok(FenceStatus::Signaled)
        } else {
            *left -= 1;
            Ok(FenceStatus::TimeoutExpired)
        }
    }

    fn gpu_wait_fence(&self, fence: FenceId) -> Result<(), ResourceError> {
        if !self
            .fences
            .lock()
            .map_err(|e| poisoned("fences", e))?
            .contains_key(&fence)
        {
            return Err(ResourceError::InvalidHandle);
        }
        self.record(DeviceCommand::GpuWait(fence))
    }

    fn destroy_fence(&self, fence: FenceId) -> Result<(), ResourceError> {
        self.fences
            .lock()
            .map_err(|e| poisoned("fences", e))?
            .remove(&fence)
            .map(|_| ())
            .ok_or(ResourceError::InvalidHandle)
    }

    fn create_texture_array(&self, descriptor: &TextureArrayDescriptor) -> Result<TextureId, ResourceError> {
        let bytes = descriptor.base_level_bytes();
        self.check_budget(bytes)?;
        let id = TextureId(self.next_id());
        self.textures
            .lock()
            .map_err(|e| poisoned("textures", e))?
            .insert(
                id,
                HeadlessTexture {
                    layers: descriptor.layers,
                    bytes,
                    format: descriptor.format,
                },
            );
        log::trace!(
            "HeadlessDevice: created texture array {:?} ({} layers of {}px)",
            id,
            descriptor.layers,
            descriptor.size
        );
        Ok(id)
    }

    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError> {
        self.textures
            .lock()
            .map_err(|e| poisoned("textures", e))?
            .remove(&id)
            .map(|_| ())
            .ok_or(ResourceError::InvalidHandle)
    }

    fn copy_texture_layers(
        &self,
        source: TextureId,
        source_layer: u32,
        destination: TextureId,
        destination_layer: u32,
        count: u32,
    ) -> Result<(), ResourceError> {
        self.check_layers(source, source_layer, count)?;
        self.check_layers(destination, destination_layer, count)?;
        self.record(DeviceCommand::CopyTextureLayers {
            source,
            source_layer,
            destination,
            destination_layer,
            count,
        })
    }

    fn clear_texture_layers(&self, id: TextureId, first: u32, count: u32) -> Result<(), ResourceError> {
        self.check_layers(id, first, count)?;
        self.record(DeviceCommand::ClearTextureLayers {
            texture: id,
            first,
            count,
        })
    }

    fn convolve_mip(
        &self,
        id: TextureId,
        first_layer: u32,
        count: u32,
        mip: u32,
        roughness: f32,
    ) -> Result<(), ResourceError> {
        self.check_layers(id, first_layer, count)?;
        self.record(DeviceCommand::ConvolveMip {
            texture: id,
            first_layer,
            count,
            mip,
            roughness,
        })
    }

    fn bind_storage_buffer(&self, binding: u32, id: BufferId) -> Result<(), ResourceError> {
        if !self.buffers()?.contains_key(&id) {
            return Err(ResourceError::InvalidHandle);
        }
        self.record(DeviceCommand::BindStorageBuffer { binding, buffer: id })
    }

    fn bind_render_target_layer(&self, id: TextureId, layer: u32) -> Result<(), ResourceError> {
        self.check_layers(id, layer, 1)?;
        self.record(DeviceCommand::BindRenderTargetLayer { texture: id, layer })
    }

    fn draw_indirect(&self, indirect: BufferId, offset: u64, draw_count: u32) -> Result<(), ResourceError> {
        let bytes = self.read_buffer(indirect, offset, DrawIndirectArgs::SIZE * u64::from(draw_count))?;
        let args = bytes
            .chunks_exact(DrawIndirectArgs::SIZE as usize)
            .map(bytemuck::pod_read_unaligned::<DrawIndirectArgs>)
            .collect();
        self.record(DeviceCommand::DrawIndirect {
            buffer: indirect,
            offset,
            args,
        })
    }
}
