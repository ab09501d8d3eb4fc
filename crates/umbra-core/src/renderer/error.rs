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

//! Defines the error types for GPU resources and multi-buffered channels.

use crate::renderer::api::fence::FenceId;
use crate::renderer::api::util::CopyState;
use thiserror::Error;

/// An error related to the creation or use of a GPU resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// A generic resource could not be found.
    #[error("Resource not found with ID.")]
    NotFound,
    /// The handle or ID used to reference a resource is invalid.
    #[error("Invalid resource handle or ID.")]
    InvalidHandle,
    /// An access went past the end of a resource.
    #[error("Resource access out of bounds: offset {offset} + size {size} exceeds {capacity}")]
    OutOfBounds {
        /// Start of the access in bytes (or layers for textures).
        offset: u64,
        /// Length of the access.
        size: u64,
        /// Size of the resource.
        capacity: u64,
    },
    /// The device could not satisfy an allocation. Treated as fatal by the frame driver.
    #[error("Out of GPU memory: requested {requested} bytes")]
    OutOfMemory {
        /// Size of the failed allocation in bytes.
        requested: u64,
    },
    /// The backend reported that waiting on a fence failed.
    #[error("Waiting on fence {0:?} failed")]
    FenceFailed(FenceId),
    /// A fence wait gave up after the configured number of polls.
    #[error("Fence {fence:?} still pending after {polls} polls")]
    FenceStalled {
        /// The fence being waited on.
        fence: FenceId,
        /// Number of polls performed.
        polls: u32,
    },
    /// An error originating from the specific graphics backend implementation.
    #[error("Backend-specific resource error: {0}")]
    BackendError(String),
}

impl ResourceError {
    /// Returns `true` for errors the frame driver must treat as unrecoverable.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, ResourceError::OutOfMemory { .. })
    }
}

/// An error raised by a [`MultiBuffer`](crate::renderer::api::util::MultiBuffer)
/// when its write/read protocol is not followed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// An operation was called while the current copy was in the wrong state.
    #[error("'{op}' is not valid while copy {index} is {state:?}")]
    InvalidTransition {
        /// The operation that was attempted.
        op: &'static str,
        /// The copy index the operation targeted.
        index: usize,
        /// The state the copy was in.
        state: CopyState,
    },
    /// The underlying device operation failed.
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_classification() {
        assert!(ResourceError::OutOfMemory { requested: 64 }.is_exhaustion());
        assert!(!ResourceError::InvalidHandle.is_exhaustion());
    }

    #[test]
    fn test_channel_error_wraps_resource_error() {
        let err: ChannelError = ResourceError::NotFound.into();
        assert_eq!(err.to_string(), "Resource not found with ID.");
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = ChannelError::InvalidTransition {
            op: "end_writing",
            index: 1,
            state: CopyState::Idle,
        };
        assert_eq!(err.to_string(), "'end_writing' is not valid while copy 1 is Idle");
    }
}
