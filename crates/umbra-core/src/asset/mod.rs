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

//! Asset readiness tracking.
//!
//! The scheduler core never loads assets itself. It only needs to know whether the
//! shaders and meshes a technique depends on have finished loading, so it can skip
//! that technique for a frame instead of failing.

mod registry;

pub use self::registry::{AssetId, AssetRegistry, AssetState};
