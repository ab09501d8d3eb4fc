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

//! Frustum geometry: planes, bounding spheres and the six-plane view volume.
//!
//! Culling in this crate is conservative. A sphere is only rejected when it lies
//! strictly outside a plane by more than its radius, so anything touching a
//! boundary is reported as visible.

use super::matrix::Mat4;
use super::vector::{Vec3, Vec4};
use super::EPSILON;
use serde::{Deserialize, Serialize};

/// A plane in Hessian normal form: `dot(normal, p) + d = 0`.
///
/// The normal points towards the inside half-space of a frustum.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Plane {
    /// Unit normal of the plane.
    pub normal: Vec3,
    /// Signed offset from the origin along the normal.
    pub d: f32,
}

impl Plane {
    /// A plane every point is inside of. Used when an extracted plane is degenerate.
    pub const PASS_ALL: Self = Self {
        normal: Vec3::ZERO,
        d: 0.0,
    };

    /// Builds a plane from raw `(a, b, c, d)` coefficients, normalizing by the
    /// magnitude of `(a, b, c)`.
    pub fn from_coefficients(v: Vec4) -> Self {
        let normal = v.truncate();
        let magnitude = normal.length();
        if magnitude < EPSILON {
            return Self::PASS_ALL;
        }
        Self {
            normal: normal / magnitude,
            d: v.w / magnitude,
        }
    }

    /// Signed distance from `point` to the plane. Positive is inside.
    #[inline]
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }
}

/// A bounding sphere.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingSphere {
    /// Sphere centre in world space.
    pub center: Vec3,
    /// Sphere radius. Negative radii are treated as zero.
    pub radius: f32,
}

impl BoundingSphere {
    /// Creates a new bounding sphere.
    pub const fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }
}

/// Indices of the six planes stored in a [`Frustum`].
pub mod plane_index {
    /// Left clipping plane.
    pub const LEFT: usize = 0;
    /// Right clipping plane.
    pub const RIGHT: usize = 1;
    /// Bottom clipping plane.
    pub const BOTTOM: usize = 2;
    /// Top clipping plane.
    pub const TOP: usize = 3;
    /// Near clipping plane.
    pub const NEAR: usize = 4;
    /// Far clipping plane.
    pub const FAR: usize = 5;
}

/// The six-plane volume a viewpoint can see.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Frustum {
    /// Planes ordered as in [`plane_index`].
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extracts the frustum from a combined `projection * view` matrix.
    ///
    /// Uses the row-combination identities for a zero-to-one depth range:
    /// left = r3 + r0, right = r3 - r0, bottom = r3 + r1, top = r3 - r1,
    /// near = r2, far = r3 - r2.
    pub fn from_view_proj(view_proj: &Mat4) -> Self {
        let r0 = view_proj.get_row(0);
        let r1 = view_proj.get_row(1);
        let r2 = view_proj.get_row(2);
        let r3 = view_proj.get_row(3);

        Self {
            planes: [
                Plane::from_coefficients(r3 + r0),
                Plane::from_coefficients(r3 - r0),
                Plane::from_coefficients(r3 + r1),
                Plane::from_coefficients(r3 - r1),
                Plane::from_coefficients(r2),
                Plane::from_coefficients(r3 - r2),
            ],
        }
    }

    /// Returns `true` unless the sphere lies entirely outside at least one plane.
    pub fn intersects_sphere(&self, sphere: &BoundingSphere) -> bool {
        let radius = sphere.radius.max(0.0);
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(sphere.center) >= -radius)
    }

    /// Returns `true` if the point is inside or on every plane.
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.intersects_sphere(&BoundingSphere::new(point, 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::FRAC_PI_2;
    use approx::assert_relative_eq;

    fn looking_down_neg_z() -> Frustum {
        let view = Mat4::look_at_rh(Vec3::ZERO, -Vec3::Z, Vec3::Y).unwrap();
        let proj = Mat4::perspective_rh_zo(FRAC_PI_2, 1.0, 0.1, 100.0);
        Frustum::from_view_proj(&(proj * view))
    }

    #[test]
    fn test_planes_are_normalized() {
        let frustum = looking_down_neg_z();
        for plane in &frustum.planes {
            assert_relative_eq!(plane.normal.length(), 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_near_and_far_plane_distances() {
        let frustum = looking_down_neg_z();
        let near = frustum.planes[plane_index::NEAR];
        let far = frustum.planes[plane_index::FAR];
        assert_relative_eq!(near.signed_distance(Vec3::new(0.0, 0.0, -0.1)), 0.0, epsilon = 1e-3);
        assert_relative_eq!(far.signed_distance(Vec3::new(0.0, 0.0, -100.0)), 0.0, epsilon = 1e-3);
        assert!(near.signed_distance(Vec3::new(0.0, 0.0, -50.0)) > 0.0);
        assert!(far.signed_distance(Vec3::new(0.0, 0.0, -50.0)) > 0.0);
    }

    #[test]
    fn test_sphere_fully_inside_is_visible() {
        let frustum = looking_down_neg_z();
        assert!(frustum.intersects_sphere(&BoundingSphere::new(Vec3::new(0.0, 0.0, -20.0), 1.0)));
    }

    #[test]
    fn test_sphere_fully_outside_is_culled() {
        let frustum = looking_down_neg_z();
        // Behind the viewer.
        assert!(!frustum.intersects_sphere(&BoundingSphere::new(Vec3::new(0.0, 0.0, 20.0), 1.0)));
        // Beyond the far plane.
        assert!(!frustum.intersects_sphere(&BoundingSphere::new(Vec3::new(0.0, 0.0, -150.0), 1.0)));
        // Far off to the right at 90 degree fov.
        assert!(!frustum.intersects_sphere(&BoundingSphere::new(Vec3::new(60.0, 0.0, -10.0), 2.0)));
    }

    #[test]
    fn test_sphere_touching_boundary_is_visible() {
        let frustum = looking_down_neg_z();
        // Centre just past the far plane, radius reaches back in.
        assert!(frustum.intersects_sphere(&BoundingSphere::new(Vec3::new(0.0, 0.0, -100.5), 1.0)));
        // Centre just outside the right plane (x = -z at 90 degrees), overlapping it.
        let center = Vec3::new(11.0, 0.0, -10.0);
        assert!(!frustum.contains_point(center));
        assert!(frustum.intersects_sphere(&BoundingSphere::new(center, 1.0)));
    }

    #[test]
    fn test_degenerate_matrix_passes_everything() {
        let frustum = Frustum::from_view_proj(&Mat4 {
            cols: [Vec4::ZERO; 4],
        });
        assert!(frustum.contains_point(Vec3::new(1e6, -1e6, 3.0)));
    }
}
