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

//! Acts as the **[A]gent** for resource scheduling.
//!
//! The [`TechniquePipeline`] sequences every registered technique through the
//! frame phases, uploads the client cameras, and enforces the frame budget
//! policy: techniques whose assets are still loading are skipped, and running
//! out of GPU memory aborts the frame.

mod pipeline;

pub use pipeline::*;
