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

//! Conservative per-viewpoint visibility of bounding spheres.
//!
//! Perspective viewpoints test the sphere against their six frustum planes.
//! Omnidirectional viewpoints (`fov >= 360`) only test distance against the far
//! plane. False positives are acceptable; a visible sphere is never rejected.

use super::producer::ProducerId;
use umbra_core::math::{BoundingSphere, Vec3};
use umbra_core::renderer::api::Viewpoint;

/// A sphere submitted for culling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullCandidate {
    /// Producer the sphere belongs to.
    pub id: ProducerId,
    /// Sphere centre before `offset`.
    pub position: Vec3,
    /// Sphere radius.
    pub radius: f32,
    /// Added to `position` before testing.
    pub offset: Vec3,
}

impl CullCandidate {
    /// The sphere actually tested.
    pub fn sphere(&self) -> BoundingSphere {
        BoundingSphere::new(self.position + self.offset, self.radius)
    }
}

/// Returns `true` if `sphere` may be seen from `viewpoint`.
pub fn is_sphere_visible(viewpoint: &Viewpoint, sphere: &BoundingSphere) -> bool {
    if viewpoint.is_omnidirectional() {
        viewpoint.position.distance(sphere.center) - sphere.radius <= viewpoint.far
    } else {
        viewpoint.frustum.intersects_sphere(sphere)
    }
}

/// Visibility of every candidate from every viewpoint of one culling pass.
#[derive(Debug, Clone, Default)]
pub struct VisibilityTable {
    view_count: usize,
    candidate_count: usize,
    /// Row-major `[candidate][view]`.
    visible: Vec<bool>,
    per_view: Vec<Vec<u32>>,
}

impl VisibilityTable {
    /// Number of viewpoints tested.
    pub fn view_count(&self) -> usize {
        self.view_count
    }

    /// Number of candidates tested.
    pub fn candidate_count(&self) -> usize {
        self.candidate_count
    }

    /// Returns `true` if candidate `entity` may be seen from viewpoint `view`.
    ///
    /// Out-of-range indices are reported as not visible.
    pub fn is_visible(&self, entity: usize, view: usize) -> bool {
        entity < self.candidate_count
            && view < self.view_count
            && self.visible[entity * self.view_count + view]
    }

    /// Returns `true` if candidate `entity` may be seen from any viewpoint.
    pub fn visible_in_any(&self, entity: usize) -> bool {
        (0..self.view_count).any(|view| self.is_visible(entity, view))
    }

    /// Candidate indices visible from `view`, ascending. Empty for unknown views.
    pub fn visible_indices(&self, view: usize) -> &[u32] {
        self.per_view.get(view).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of candidates visible from `view`.
    pub fn visible_count(&self, view: usize) -> usize {
        self.visible_indices(view).len()
    }

    fn reset(&mut self, view_count: usize, candidate_count: usize) {
        self.view_count = view_count;
        self.candidate_count = candidate_count;
        self.visible.clear();
        self.visible.resize(view_count * candidate_count, false);
        self.per_view.resize_with(view_count, Vec::new);
        for list in &mut self.per_view {
            list.clear();
        }
    }
}

/// Produces a [`VisibilityTable`] per pass, reusing its allocations.
#[derive(Debug, Default)]
pub struct VisibilityCuller {
    table: VisibilityTable,
}

impl VisibilityCuller {
    /// Creates a culler with an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tests every candidate against every viewpoint.
    pub fn cull(&mut self, viewpoints: &[Viewpoint], candidates: &[CullCandidate]) -> &VisibilityTable {
        self.table.reset(viewpoints.len(), candidates.len());
        for (entity, candidate) in candidates.iter().enumerate() {
            let sphere = candidate.sphere();
            for (view, viewpoint) in viewpoints.iter().enumerate() {
                if is_sphere_visible(viewpoint, &sphere) {
                    self.table.visible[entity * viewpoints.len() + view] = true;
                    self.table.per_view[view].push(entity as u32);
                }
            }
        }
        log::trace!(
            "Culled {} candidates against {} viewpoints",
            candidates.len(),
            viewpoints.len()
        );
        &self.table
    }

    /// The result of the last pass.
    pub fn table(&self) -> &VisibilityTable {
        &self.table
    }
}
