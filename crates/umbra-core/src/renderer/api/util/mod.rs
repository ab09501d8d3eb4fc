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

//! GPU memory utilities built on top of [`GraphicsDevice`](crate::renderer::GraphicsDevice).

mod arena_buffer;
mod fence_wait;
mod multi_buffer;

pub use arena_buffer::*;
pub use fence_wait::*;
pub use multi_buffer::*;

#[cfg(test)]
pub(crate) mod test_support {
    //! An in-memory device for unit tests in this crate.

    use crate::renderer::api::{
        BufferDescriptor, BufferId, FenceId, FenceStatus, TextureArrayDescriptor, TextureId,
    };
    use crate::renderer::{GraphicsDevice, ResourceError};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct MockState {
        next_id: usize,
        buffers: HashMap<usize, Vec<u8>>,
        /// Remaining timed-out polls per fence.
        fences: HashMap<usize, u32>,
        textures: HashMap<usize, u32>,
        flushes: u32,
        gpu_waits: u32,
        last_binding: Option<(u32, BufferId)>,
    }

    /// A mock graphics device that stores buffers in memory and delays fences.
    #[derive(Debug)]
    pub(crate) struct MockGraphicsDevice {
        state: Mutex<MockState>,
        fence_latency: u32,
        budget: Option<u64>,
    }

    impl MockGraphicsDevice {
        pub(crate) fn new() -> Self {
            Self::with_fence_latency(0)
        }

        /// Every fence times out `latency` times before signaling.
        pub(crate) fn with_fence_latency(latency: u32) -> Self {
            Self {
                state: Mutex::new(MockState::default()),
                fence_latency: latency,
                budget: None,
            }
        }

        /// Fails buffer allocations once live bytes would exceed `bytes`.
        pub(crate) fn with_budget(mut self, bytes: u64) -> Self {
            self.budget = Some(bytes);
            self
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
            self.state.lock().unwrap()
        }

        pub(crate) fn buffer_exists(&self, id: BufferId) -> bool {
            self.lock().buffers.contains_key(&id.0)
        }

        pub(crate) fn live_buffer_count(&self) -> usize {
            self.lock().buffers.len()
        }

        pub(crate) fn pending_fence_count(&self) -> usize {
            self.lock().fences.values().filter(|left| **left > 0).count()
        }

        pub(crate) fn signal_all_fences(&self) {
            for left in self.lock().fences.values_mut() {
                *left = 0;
            }
        }

        pub(crate) fn flush_requests(&self) -> u32 {
            self.lock().flushes
        }

        pub(crate) fn gpu_wait_count(&self) -> u32 {
            self.lock().gpu_waits
        }

        pub(crate) fn last_binding(&self) -> Option<(u32, BufferId)> {
            self.lock().last_binding
        }
    }

    impl GraphicsDevice for MockGraphicsDevice {
        fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
            let mut state = self.lock();
            if let Some(budget) = self.budget {
                let live: u64 = state.buffers.values().map(|b| b.len() as u64).sum();
                if live + descriptor.size > budget {
                    return Err(ResourceError::OutOfMemory {
                        requested: descriptor.size,
                    });
                }
            }
            state.next_id += 1;
            let id = state.next_id;
            state.buffers.insert(id, vec![0; descriptor.size as usize]);
            Ok(BufferId(id))
        }

        fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
            self.lock()
                .buffers
                .remove(&id.0)
                .map(|_| ())
                .ok_or(ResourceError::InvalidHandle)
        }

        fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
            let mut state = self.lock();
            let buffer = state.buffers.get_mut(&id.0).ok_or(ResourceError::InvalidHandle)?;
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
            let state = self.lock();
            let buffer = state.buffers.get(&id.0).ok_or(ResourceError::InvalidHandle)?;
            let end = (offset + size) as usize;
            buffer
                .get(offset as usize..end)
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
            self.write_buffer(destination, destination_offset, &bytes)
        }

        fn create_fence(&self) -> Result<FenceId, ResourceError> {
            let mut state = self.lock();
            state.next_id += 1;
            let id = state.next_id;
            state.fences.insert(id, self.fence_latency);
            Ok(FenceId(id))
        }

        fn client_wait_fence(
            &self,
            fence: FenceId,
            _timeout_ns: u64,
            flush: bool,
        ) -> Result<FenceStatus, ResourceError> {
            let mut state = self.lock();
            if flush {
                state.flushes += 1;
            }
            let left = state.fences.get_mut(&fence.0).ok_or(ResourceError::InvalidHandle)?;
            if *left == 0 {
                Ok(FenceStatus::Signaled)
            } else {
                *left -= 1;
                Ok(FenceStatus::TimeoutExpired)
            }
        }

        fn gpu_wait_fence(&self, fence: FenceId) -> Result<(), ResourceError> {
            let mut state = self.lock();
            if !state.fences.contains_key(&fence.0) {
                return Err(ResourceError::InvalidHandle);
            }
            state.gpu_waits += 1;
            Ok(())
        }

        fn destroy_fence(&self, fence: FenceId) -> Result<(), ResourceError> {
            self.lock()
                .fences
                .remove(&fence.0)
                .map(|_| ())
                .ok_or(ResourceError::InvalidHandle)
        }

        fn create_texture_array(
            &self,
            descriptor: &TextureArrayDescriptor,
        ) -> Result<TextureId, ResourceError> {
            let mut state = self.lock();
            state.next_id += 1;
            let id = state.next_id;
            state.textures.insert(id, descriptor.layers);
            Ok(TextureId(id))
        }

        fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError> {
            self.lock()
                .textures
                .remove(&id.0)
                .map(|_| ())
                .ok_or(ResourceError::InvalidHandle)
        }

        fn copy_texture_layers(
            &self,
            _source: TextureId,
            _source_layer: u32,
            _destination: TextureId,
            _destination_layer: u32,
            _count: u32,
        ) -> Result<(), ResourceError> {
            Ok(())
        }

        fn clear_texture_layers(&self, _id: TextureId, _first: u32, _count: u32) -> Result<(), ResourceError> {
            Ok(())
        }

        fn convolve_mip(
            &self,
            _id: TextureId,
            _first_layer: u32,
            _count: u32,
            _mip: u32,
            _roughness: f32,
        ) -> Result<(), ResourceError> {
            Ok(())
        }

        fn bind_storage_buffer(&self, binding: u32, id: BufferId) -> Result<(), ResourceError> {
            self.lock().last_binding = Some((binding, id));
            Ok(())
        }

        fn bind_render_target_layer(&self, _id: TextureId, _layer: u32) -> Result<(), ResourceError> {
            Ok(())
        }

        fn draw_indirect(&self, _indirect: BufferId, _offset: u64, _count: u32) -> Result<(), ResourceError> {
            Ok(())
        }
    }
}
