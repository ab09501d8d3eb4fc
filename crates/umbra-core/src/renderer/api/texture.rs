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

//! Defines layered texture resources used for shadow maps and probe arrays.

use std::borrow::Cow;

/// Pixel format of a layered texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 32-bit float depth, used for shadow maps.
    Depth32Float,
    /// 16-bit float RGBA, used for reflection probes.
    Rgba16Float,
}

impl TextureFormat {
    /// Size of one texel in bytes.
    pub const fn bytes_per_texel(&self) -> u64 {
        match self {
            TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }
}

/// A descriptor used to create a 2D texture array.
#[derive(Debug, Clone)]
pub struct TextureArrayDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// Width and height of each layer. Arrays here are always square.
    pub size: u32,
    /// Number of array layers.
    pub layers: u32,
    /// Number of mip levels (at least 1).
    pub mip_levels: u32,
    /// Texel format.
    pub format: TextureFormat,
}

impl TextureArrayDescriptor<'_> {
    /// Bytes needed for the base mip of every layer. Used by backends that track budgets.
    pub fn base_level_bytes(&self) -> u64 {
        u64::from(self.size) * u64::from(self.size) * u64::from(self.layers) * self.format.bytes_per_texel()
    }
}

/// An opaque handle to a GPU texture resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub usize);
