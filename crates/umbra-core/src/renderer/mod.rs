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

//! Provides the backend-agnostic rendering contracts of the scheduler core.
//!
//! This module defines the GPU driver boundary ([`GraphicsDevice`]), the resource
//! handles it hands out, and the fence-synchronized memory primitives built on top
//! of it ([`ArenaBuffer`](api::util::ArenaBuffer) and
//! [`MultiBuffer`](api::util::MultiBuffer)). Concrete backends live in
//! `umbra-infra`; techniques in `umbra-lanes` only ever talk to these traits.

pub mod api;
pub mod error;
pub mod traits;

pub use self::api::*;
pub use self::error::{ChannelError, ResourceError};
pub use self::traits::GraphicsDevice;
