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

//! The backend-agnostic GPU driver contract.

use crate::renderer::api::{
    buffer::{BufferDescriptor, BufferId},
    fence::{FenceId, FenceStatus},
    texture::{TextureArrayDescriptor, TextureId},
};
use crate::renderer::error::ResourceError;
use std::fmt::Debug;

/// The set of GPU operations the scheduler core relies on.
///
/// Every method takes `&self`. Backends use interior mutability, which lets a
/// single device be shared by every technique of a pipeline. Commands are
/// recorded in issue order and executed asynchronously by the GPU; fences are
/// the only way to observe completion.
pub trait GraphicsDevice: Send + Sync + Debug + 'static {
    // ─────────────────────────────────────────────────────────────────────
    // Buffers
    // ─────────────────────────────────────────────────────────────────────

    /// Creates a new GPU buffer.
    /// ## Errors
    /// * `ResourceError::OutOfMemory` - If the allocation cannot be satisfied.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError>;

    /// Destroys a GPU buffer. The handle is invalid afterwards.
    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError>;

    /// Writes `data` into a buffer starting at `offset`.
    /// ## Errors
    /// * `ResourceError::OutOfBounds` - If the write extends past the buffer's size.
    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError>;

    /// Reads `size` bytes starting at `offset`.
    fn read_buffer(&self, id: BufferId, offset: u64, size: u64) -> Result<Vec<u8>, ResourceError>;

    /// Records a GPU-side copy between two buffers.
    fn copy_buffer_to_buffer(
        &self,
        source: BufferId,
        source_offset: u64,
        destination: BufferId,
        destination_offset: u64,
        size: u64,
    ) -> Result<(), ResourceError>;

    // ─────────────────────────────────────────────────────────────────────
    // Fences
    // ─────────────────────────────────────────────────────────────────────

    /// Inserts a fence after every command issued so far.
    fn create_fence(&self) -> Result<FenceId, ResourceError>;

    /// Waits on the CPU for at most `timeout_ns` nanoseconds.
    ///
    /// When `flush` is set the backend submits pending commands first, so the
    /// fence can make progress.
    fn client_wait_fence(
        &self,
        fence: FenceId,
        timeout_ns: u64,
        flush: bool,
    ) -> Result<FenceStatus, ResourceError>;

    /// Makes subsequent GPU commands wait for the fence, without blocking the CPU.
    fn gpu_wait_fence(&self, fence: FenceId) -> Result<(), ResourceError>;

    /// Releases a fence.
    fn destroy_fence(&self, fence: FenceId) -> Result<(), ResourceError>;

    // ─────────────────────────────────────────────────────────────────────
    // Textures
    // ─────────────────────────────────────────────────────────────────────

    /// Creates a square 2D texture array.
    /// ## Errors
    /// * `ResourceError::OutOfMemory` - If the allocation cannot be satisfied.
    fn create_texture_array(
        &self,
        descriptor: &TextureArrayDescriptor,
    ) -> Result<TextureId, ResourceError>;

    /// Destroys a texture.
    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError>;

    /// Copies `count` layers (all mips) from one array to another.
    fn copy_texture_layers(
        &self,
        source: TextureId,
        source_layer: u32,
        destination: TextureId,
        destination_layer: u32,
        count: u32,
    ) -> Result<(), ResourceError>;

    /// Clears `count` layers starting at `first_layer` to their default value.
    fn clear_texture_layers(
        &self,
        id: TextureId,
        first_layer: u32,
        count: u32,
    ) -> Result<(), ResourceError>;

    /// Prefilters mip level `mip` of the given layers from the level above it.
    ///
    /// `roughness` in `[0, 1]` selects the filter width.
    fn convolve_mip(
        &self,
        id: TextureId,
        first_layer: u32,
        count: u32,
        mip: u32,
        roughness: f32,
    ) -> Result<(), ResourceError>;

    // ─────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────

    /// Binds a buffer for shader reads at a storage binding point.
    fn bind_storage_buffer(&self, binding: u32, id: BufferId) -> Result<(), ResourceError>;

    /// Directs subsequent draws into one layer of a texture array.
    fn bind_render_target_layer(&self, id: TextureId, layer: u32) -> Result<(), ResourceError>;

    /// Issues `draw_count` draws whose [`DrawIndirectArgs`](crate::renderer::api::DrawIndirectArgs)
    /// are read from `indirect` starting at `offset`.
    fn draw_indirect(
        &self,
        indirect: BufferId,
        offset: u64,
        draw_count: u32,
    ) -> Result<(), ResourceError>;
}
