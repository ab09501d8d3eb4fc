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

//! Rendering lane - hot path for resource producers.
//!
//! A frame flows through the lane in this order:
//!
//! ```text
//! ResourceProducer --> VisibilityCuller --> ImportanceScheduler --> re-render --> CompositionPool
//!                              |                                        |
//!                        SlotAllocator <------------------------> LayeredTarget
//! ```
//!
//! [`ShadowTechnique`] and [`ReflectorTechnique`] assemble these pieces into
//! [`Technique`](umbra_core::technique::Technique) implementations.

mod composition;
mod importance_lane;
mod layered_target;
mod producer;
mod reflector_technique;
mod shadow_technique;
mod slot_allocator;
mod visibility_lane;

pub use composition::*;
pub use importance_lane::*;
pub use layered_target::*;
pub use producer::*;
pub use reflector_technique::*;
pub use shadow_technique::*;
pub use slot_allocator::*;
pub use visibility_lane::*;
