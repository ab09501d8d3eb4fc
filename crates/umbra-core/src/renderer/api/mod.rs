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

//! Backend-agnostic data structures: resource handles, descriptors, GPU records
//! and the buffer utilities built on them.

pub mod buffer;
pub mod command;
pub mod fence;
pub mod texture;
pub mod util;
pub mod viewpoint;

pub use self::buffer::{BufferDescriptor, BufferId, BufferUsage};
pub use self::command::{binding, DrawIndirectArgs};
pub use self::fence::{FenceId, FenceStatus};
pub use self::texture::{TextureArrayDescriptor, TextureFormat, TextureId};
pub use self::viewpoint::{
    Perspective, Viewpoint, ViewpointRecord, DEFAULT_NEAR_PLANE, OMNI_FOV_DEGREES,
};
