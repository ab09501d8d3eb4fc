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

//! # Technique Abstraction
//!
//! A **Technique** is one rendering strategy driven once per frame by the pipeline
//! driver: shadow mapping, reflection probes, or any other expensive per-entity
//! cache. Every technique exposes the same lifecycle hooks:
//!
//! ```text
//! BeginFrame -> [update_cache]* -> [update_pass]* -> [render_technique]* -> [clear_cache]* -> EndFrame
//! ```
//!
//! - `update_cache` runs culling and scheduling against the latest scene state.
//! - `update_pass` performs the expensive re-renders for the scheduled entries.
//! - `render_technique` performs the cheap composition of every visible producer.
//! - `clear_cache` drops all frame-transient state.
//!
//! Techniques are stored as trait objects in a [`TechniqueRegistry`] and tagged
//! with a closed [`TechniqueKind`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use umbra_core::technique::*;
//!
//! #[derive(Debug)]
//! struct Fog;
//!
//! impl Technique for Fog {
//!     fn name(&self) -> &'static str { "Fog" }
//!     fn kind(&self) -> TechniqueKind { TechniqueKind::Custom("fog") }
//!     fn category(&self) -> TechniqueCategory { TechniqueCategory::EFFECT }
//!     fn update_cache(&mut self, _ctx: &mut FrameContext<'_>) -> Result<(), TechniqueError> { Ok(()) }
//!     fn update_pass(&mut self, _ctx: &mut FrameContext<'_>) -> Result<(), TechniqueError> { Ok(()) }
//!     fn render_technique(&mut self, _ctx: &mut FrameContext<'_>, _p: &[Perspective]) -> Result<(), TechniqueError> { Ok(()) }
//!     fn clear_cache(&mut self, _ctx: &mut FrameContext<'_>) -> Result<(), TechniqueError> { Ok(()) }
//!     fn as_any(&self) -> &dyn std::any::Any { self }
//!     fn as_any_mut(&mut self) -> &mut dyn std::any::Any { self }
//! }
//! ```

use crate::asset::{AssetId, AssetRegistry};
use crate::renderer::api::{Perspective, Viewpoint};
use crate::renderer::error::{ChannelError, ResourceError};
use crate::renderer::traits::GraphicsDevice;
use std::any::Any;
use std::fmt;
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────────────────

/// Which categories of work a technique performs. Used to filter render calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TechniqueCategory {
    bits: u32,
}

impl TechniqueCategory {
    /// No category.
    pub const NONE: Self = Self { bits: 0 };
    /// Scene geometry passes.
    pub const GEOMETRY: Self = Self { bits: 1 << 0 };
    /// Direct lighting, including shadows.
    pub const PRIMARY_LIGHTING: Self = Self { bits: 1 << 1 };
    /// Indirect lighting, including reflection probes.
    pub const SECONDARY_LIGHTING: Self = Self { bits: 1 << 2 };
    /// Post-processing effects.
    pub const EFFECT: Self = Self { bits: 1 << 3 };
    /// Every category.
    pub const ALL: Self = Self {
        bits: Self::GEOMETRY.bits
            | Self::PRIMARY_LIGHTING.bits
            | Self::SECONDARY_LIGHTING.bits
            | Self::EFFECT.bits,
    };

    /// Returns the raw bits.
    pub const fn bits(&self) -> u32 {
        self.bits
    }

    /// Combines two sets of categories.
    pub const fn union(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
        }
    }

    /// Returns `true` if the two sets share at least one category.
    pub const fn intersects(&self, other: Self) -> bool {
        (self.bits & other.bits) != 0
    }
}

impl std::ops::BitOr for TechniqueCategory {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

/// The closed set of technique families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TechniqueKind {
    /// Shadow map scheduling and rendering.
    Shadow,
    /// Reflection probe scheduling and rendering.
    Reflector,
    /// Any other technique, identified by name.
    Custom(&'static str),
}

impl fmt::Display for TechniqueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TechniqueKind::Shadow => write!(f, "Shadow"),
            TechniqueKind::Reflector => write!(f, "Reflector"),
            TechniqueKind::Custom(name) => write!(f, "Custom({name})"),
        }
    }
}

/// The per-frame phases of the pipeline driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramePhase {
    /// Between frames.
    Idle,
    /// Viewpoints are being refreshed and uploaded.
    BeginFrame,
    /// Culling and scheduling.
    UpdateCache,
    /// Expensive re-renders of scheduled entries.
    UpdatePass,
    /// Per-view composition.
    Render,
    /// Channels are fenced and caches cleared.
    EndFrame,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// An error raised by a technique or by the pipeline driving it.
///
/// Missing assets are never reported through this type: a technique whose
/// dependencies are not ready is skipped for the frame.
#[derive(Debug, Error)]
pub enum TechniqueError {
    /// A device operation failed.
    #[error("Technique resource error: {0}")]
    Resource(#[from] ResourceError),
    /// A multi-buffered channel was misused.
    #[error("Technique channel error: {0}")]
    Channel(#[from] ChannelError),
    /// A pipeline operation was called in the wrong frame phase.
    #[error("'{op}' is not valid during {phase:?}")]
    InvalidPhase {
        /// The operation that was attempted.
        op: &'static str,
        /// The phase the pipeline was in.
        phase: FramePhase,
    },
}

impl TechniqueError {
    /// Returns `true` if the error is resource exhaustion, which has no recovery path.
    pub fn is_exhaustion(&self) -> bool {
        match self {
            TechniqueError::Resource(e) => e.is_exhaustion(),
            TechniqueError::Channel(ChannelError::Resource(e)) => e.is_exhaustion(),
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame context
// ─────────────────────────────────────────────────────────────────────────────

/// The secondary render path used to draw scene geometry into a producer's
/// sub-viewpoint (a shadow cascade, a probe face).
pub trait SceneGeometry: fmt::Debug {
    /// Draws the scene as seen from `viewpoint`, restricted to `categories`.
    fn render_geometry(
        &mut self,
        device: &dyn GraphicsDevice,
        viewpoint: &Viewpoint,
        categories: TechniqueCategory,
    ) -> Result<(), ResourceError>;
}

/// Everything a technique may touch during one phase of one frame.
pub struct FrameContext<'a> {
    /// The GPU driver.
    pub device: &'a dyn GraphicsDevice,
    /// Asset readiness, used to skip techniques whose dependencies are loading.
    pub assets: &'a AssetRegistry,
    /// Client viewpoints for this frame. Index 0 is the main viewer.
    pub viewpoints: &'a [Viewpoint],
    /// Secondary render path for producer re-renders.
    pub geometry: &'a mut dyn SceneGeometry,
    /// Current time in seconds.
    pub now: f64,
    /// Seconds since the previous frame.
    pub delta_time: f32,
    /// Monotonic frame counter.
    pub frame_index: u64,
}

impl FrameContext<'_> {
    /// The main viewer, if any viewpoint was supplied.
    pub fn main_viewpoint(&self) -> Option<&Viewpoint> {
        self.viewpoints.first()
    }
}

impl fmt::Debug for FrameContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameContext")
            .field("viewpoints", &self.viewpoints.len())
            .field("now", &self.now)
            .field("frame_index", &self.frame_index)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Technique trait
// ─────────────────────────────────────────────────────────────────────────────

/// The lifecycle hooks shared by every rendering technique.
pub trait Technique: fmt::Debug + Send {
    /// Human-readable name, used in logs.
    fn name(&self) -> &'static str;

    /// The technique's family.
    fn kind(&self) -> TechniqueKind;

    /// Categories of work this technique performs.
    fn category(&self) -> TechniqueCategory;

    /// Assets that must be loaded before the technique can run.
    fn dependencies(&self) -> &[AssetId] {
        &[]
    }

    /// Returns `true` if every dependency is loaded.
    fn is_ready(&self, assets: &AssetRegistry) -> bool {
        assets.all_ready(self.dependencies())
    }

    /// Culls and schedules against the latest scene state.
    fn update_cache(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), TechniqueError>;

    /// Re-renders the entries scheduled by `update_cache`.
    fn update_pass(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), TechniqueError>;

    /// Composes every visible producer into the given perspectives.
    fn render_technique(
        &mut self,
        ctx: &mut FrameContext<'_>,
        perspectives: &[Perspective],
    ) -> Result<(), TechniqueError>;

    /// Drops frame-transient state and fences this frame's reads.
    fn clear_cache(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), TechniqueError>;

    /// Upcast for downcasting to the concrete technique.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete technique.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// ─────────────────────────────────────────────────────────────────────────────
// TechniqueRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// An ordered list of techniques. Order is execution order.
#[derive(Debug, Default)]
pub struct TechniqueRegistry {
    techniques: Vec<Box<dyn Technique>>,
}

impl TechniqueRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a technique.
    pub fn register(&mut self, technique: Box<dyn Technique>) {
        log::debug!(
            "Registered technique '{}' ({})",
            technique.name(),
            technique.kind()
        );
        self.techniques.push(technique);
    }

    /// Finds a technique by name.
    pub fn get(&self, name: &str) -> Option<&dyn Technique> {
        self.techniques
            .iter()
            .find(|t| t.name() == name)
            .map(|b| b.as_ref())
    }

    /// Returns the first technique of type `T`.
    pub fn find<T: Technique + 'static>(&self) -> Option<&T> {
        self.techniques
            .iter()
            .find_map(|t| t.as_any().downcast_ref::<T>())
    }

    /// Returns the first technique of type `T`, mutably.
    pub fn find_mut<T: Technique + 'static>(&mut self) -> Option<&mut T> {
        self.techniques
            .iter_mut()
            .find_map(|t| t.as_any_mut().downcast_mut::<T>())
    }

    /// Returns every technique of the given kind.
    pub fn find_by_kind(&self, kind: TechniqueKind) -> Vec<&dyn Technique> {
        self.techniques
            .iter()
            .filter(|t| t.kind() == kind)
            .map(|b| b.as_ref())
            .collect()
    }

    /// All techniques in execution order.
    pub fn all(&self) -> &[Box<dyn Technique>] {
        &self.techniques
    }

    /// All techniques in execution order, mutably.
    pub fn all_mut(&mut self) -> &mut [Box<dyn Technique>] {
        &mut self.techniques
    }

    /// Number of registered techniques.
    pub fn len(&self) -> usize {
        self.techniques.len()
    }

    /// Returns `true` if no technique is registered.
    pub fn is_empty(&self) -> bool {
        self.techniques.is_empty()
    }
}
