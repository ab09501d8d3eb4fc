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

//! GPU fence handles.
//!
//! A fence is inserted into the command stream and signals once the GPU has
//! completed every command issued before it.

/// An opaque handle to a GPU fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceId(pub usize);

/// Result of one bounded client-side wait on a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// All commands before the fence have completed.
    Signaled,
    /// The timeout elapsed before the fence signaled.
    TimeoutExpired,
    /// The backend could not wait on the fence.
    Failed,
}
