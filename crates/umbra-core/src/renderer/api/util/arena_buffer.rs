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

//! A growable GPU buffer written at explicit byte offsets.
//!
//! The [`ArenaBuffer`] owns one device buffer. When a write would overflow it, a
//! larger buffer is allocated, the existing bytes are copied forward on the device,
//! and the old buffer is destroyed:
//!
//! ```text
//! capacity 256  [##########------]   write(200, 100) overflows
//! capacity 606  [##########----------------------------------]
//!                 ^ copied forward, then the write lands at 200
//! ```
//!
//! Growth replaces the underlying [`BufferId`]. Any handle obtained through
//! [`ArenaBuffer::id`] before a `write` must be fetched again afterwards.

use crate::renderer::api::buffer::{BufferDescriptor, BufferId, BufferUsage};
use crate::renderer::error::ResourceError;
use crate::renderer::traits::GraphicsDevice;
use std::borrow::Cow;

/// Capacity of an arena created with [`ArenaBuffer::new`].
pub const DEFAULT_ARENA_CAPACITY: u64 = 256;

/// A contiguous, CPU-written, GPU-read buffer whose capacity only grows.
#[derive(Debug)]
pub struct ArenaBuffer {
    buffer: BufferId,
    capacity: u64,
    usage: BufferUsage,
    label: Cow<'static, str>,
    reallocations: u32,
}

impl ArenaBuffer {
    /// Creates an arena with [`DEFAULT_ARENA_CAPACITY`] bytes.
    pub fn new(
        device: &dyn GraphicsDevice,
        usage: BufferUsage,
        label: impl Into<Cow<'static, str>>,
    ) -> Result<Self, ResourceError> {
        Self::with_capacity(device, usage, DEFAULT_ARENA_CAPACITY, label)
    }

    /// Creates an arena with an explicit starting capacity.
    ///
    /// The copy flags are always added to `usage`, since growth copies the contents.
    pub fn with_capacity(
        device: &dyn GraphicsDevice,
        usage: BufferUsage,
        capacity: u64,
        label: impl Into<Cow<'static, str>>,
    ) -> Result<Self, ResourceError> {
        let label = label.into();
        let usage = usage | BufferUsage::ARENA;
        let buffer = device.create_buffer(&BufferDescriptor {
            label: Some(Cow::Borrowed(label.as_ref())),
            size: capacity,
            usage,
        })?;
        Ok(Self {
            buffer,
            capacity,
            usage,
            label,
            reallocations: 0,
        })
    }

    /// The capacity after growing to fit `size` bytes at `offset`.
    ///
    /// Growth is amortized (`old + offset + 1.5 * size`) rather than exact-fit, so
    /// `n` appends trigger `O(log n)` reallocations.
    #[inline]
    pub fn grown_capacity(capacity: u64, offset: u64, size: u64) -> u64 {
        capacity + offset + size + size.div_ceil(2)
    }

    /// Current device buffer. Invalidated by any growth.
    #[inline]
    pub fn id(&self) -> BufferId {
        self.buffer
    }

    /// Capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of times the arena has been reallocated.
    #[inline]
    pub fn reallocations(&self) -> u32 {
        self.reallocations
    }

    /// Debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Ensures `offset + size <= capacity`, growing if needed.
    ///
    /// Returns `true` if the arena was reallocated.
    ///
    /// # Errors
    ///
    /// Propagates device failures. `ResourceError::OutOfMemory` leaves the arena
    /// untouched with its previous buffer and capacity.
    pub fn expand_to_fit(
        &mut self,
        device: &dyn GraphicsDevice,
        offset: u64,
        size: u64,
    ) -> Result<bool, ResourceError> {
        let required = offset.saturating_add(size);
        if required <= self.capacity {
            return Ok(false);
        }

        let new_capacity = Self::grown_capacity(self.capacity, offset, size);
        let new_buffer = device.create_buffer(&BufferDescriptor {
            label: Some(Cow::Borrowed(self.label.as_ref())),
            size: new_capacity,
            usage: self.usage,
        })?;

        if self.capacity > 0 {
            device.copy_buffer_to_buffer(self.buffer, 0, new_buffer, 0, self.capacity)?;
        }
        device.destroy_buffer(self.buffer)?;

        log::debug!(
            "ArenaBuffer({}): grew {} -> {} bytes to fit {} at offset {}",
            self.label,
            self.capacity,
            new_capacity,
            size,
            offset
        );

        self.buffer = new_buffer;
        self.capacity = new_capacity;
        self.reallocations += 1;
        Ok(true)
    }

    /// Reserves at least `size` bytes without writing anything.
    pub fn set_max_size(&mut self, device: &dyn GraphicsDevice, size: u64) -> Result<(), ResourceError> {
        self.expand_to_fit(device, 0, size).map(|_| ())
    }

    /// Copies `data` into the arena at `offset`, growing first if necessary.
    pub fn write(
        &mut self,
        device: &dyn GraphicsDevice,
        offset: u64,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        if data.is_empty() {
            return Ok(());
        }
        self.expand_to_fit(device, offset, data.len() as u64)?;
        device.write_buffer(self.buffer, offset, data)
    }

    /// Writes a slice of plain-old-data records starting at element `first`.
    pub fn write_pod<T: bytemuck::Pod>(
        &mut self,
        device: &dyn GraphicsDevice,
        first: usize,
        items: &[T],
    ) -> Result<(), ResourceError> {
        let offset = (first * std::mem::size_of::<T>()) as u64;
        self.write(device, offset, bytemuck::cast_slice(items))
    }

    /// Reads back `size` bytes at `offset`.
    pub fn read(
        &self,
        device: &dyn GraphicsDevice,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, ResourceError> {
        if offset.saturating_add(size) > self.capacity {
            return Err(ResourceError::OutOfBounds {
                offset,
                size,
                capacity: self.capacity,
            });
        }
        device.read_buffer(self.buffer, offset, size)
    }

    /// Releases the device buffer.
    pub fn destroy(self, device: &dyn GraphicsDevice) {
        if let Err(e) = device.destroy_buffer(self.buffer) {
            log::warn!("ArenaBuffer({}): Failed to destroy buffer: {:?}", self.label, e);
        }
    }
}
