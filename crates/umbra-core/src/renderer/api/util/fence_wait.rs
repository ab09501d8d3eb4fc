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

//! The CPU-side fence wait primitive.
//!
//! All client waits go through [`FenceWait`]. [`SpinWait`] is the default strategy:
//! it repeatedly asks the device to wait a tiny amount of time, so the calling
//! thread is never parked by the OS. An event-driven waiter can be substituted
//! without touching any call site.

use crate::renderer::api::fence::{FenceId, FenceStatus};
use crate::renderer::error::ResourceError;
use crate::renderer::traits::GraphicsDevice;
use std::fmt::Debug;

/// Blocks the calling thread until a fence has signaled.
pub trait FenceWait: Send + Sync + Debug {
    /// Waits until `fence` signals.
    ///
    /// Returns the number of unsuccessful polls before the fence was observed as
    /// signaled. `0` means the fence had already signaled.
    fn wait(&self, device: &dyn GraphicsDevice, fence: FenceId) -> Result<u32, ResourceError>;
}

/// Busy-polling fence wait with a bounded per-poll timeout.
#[derive(Debug, Clone)]
pub struct SpinWait {
    /// Timeout handed to each `client_wait_fence` call.
    pub poll_timeout_ns: u64,
    /// Poll count after which a slow-GPU warning is logged.
    pub warn_after_polls: u32,
    /// If set, give up with [`ResourceError::FenceStalled`] after this many polls.
    pub poll_limit: Option<u32>,
}

impl SpinWait {
    /// One nanosecond per poll, warning after 100k polls, no limit.
    pub const fn new() -> Self {
        Self {
            poll_timeout_ns: 1,
            warn_after_polls: 100_000,
            poll_limit: None,
        }
    }

    /// Returns a copy that fails after `limit` polls instead of spinning forever.
    pub const fn with_poll_limit(mut self, limit: u32) -> Self {
        self.poll_limit = Some(limit);
        self
    }
}

impl Default for SpinWait {
    fn default() -> Self {
        Self::new()
    }
}

impl FenceWait for SpinWait {
    fn wait(&self, device: &dyn GraphicsDevice, fence: FenceId) -> Result<u32, ResourceError> {
        let mut polls = 0u32;
        loop {
            // Flush on every poll after the first so the fence can make progress.
            match device.client_wait_fence(fence, self.poll_timeout_ns, polls > 0)? {
                FenceStatus::Signaled => return Ok(polls),
                FenceStatus::Failed => return Err(ResourceError::FenceFailed(fence)),
                FenceStatus::TimeoutExpired => {
                    polls = polls.saturating_add(1);
                    if polls == self.warn_after_polls {
                        log::warn!(
                            "Fence {:?} still pending after {} polls; the GPU is falling behind",
                            fence,
                            polls
                        );
                    }
                    if let Some(limit) = self.poll_limit {
                        if polls >= limit {
                            return Err(ResourceError::FenceStalled { fence, polls });
                        }
                    }
                }
            }
        }
    }
}
