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

//! GPU-visible command parameter records.

/// Arguments of one indirect draw, read by the GPU from a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct DrawIndirectArgs {
    /// Number of vertices per instance.
    pub count: u32,
    /// Number of instances.
    pub instance_count: u32,
    /// First vertex.
    pub first: u32,
    /// Reserved, always zero.
    pub reserved: u32,
}

impl DrawIndirectArgs {
    /// Size of one record in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Creates draw arguments for `instance_count` instances of a `count`-vertex shape.
    pub const fn instanced(count: u32, instance_count: u32) -> Self {
        Self {
            count,
            instance_count,
            first: 0,
            reserved: 0,
        }
    }
}

/// Well-known storage buffer binding points shared by techniques.
pub mod binding {
    /// Indirect draw arguments.
    pub const INDIRECT_ARGS: u32 = 1;
    /// Camera records written by the frame driver.
    pub const CAMERAS: u32 = 2;
    /// `(view_index, layer)` pairs, parallel to the visible indices.
    pub const PERSPECTIVES: u32 = 3;
    /// Per-technique visible producer indices.
    pub const VISIBLE_INDICES: u32 = 4;
    /// Per-technique producer records.
    pub const PRODUCERS: u32 = 8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indirect_layout_is_four_words() {
        assert_eq!(DrawIndirectArgs::SIZE, 16);
        let args = DrawIndirectArgs::instanced(36, 5);
        let words: &[u32] = bytemuck::cast_slice(std::slice::from_ref(&args));
        assert_eq!(words, &[36, 5, 0, 0]);
    }
}
