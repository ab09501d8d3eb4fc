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

//! Provides the column-major [`Mat4`] used for view and projection transforms.

use super::vector::{Vec3, Vec4};
use super::EPSILON;
use std::ops::Mul;

/// A 4x4 column-major matrix.
///
/// Used for viewpoint view and projection matrices. The memory layout is
/// column-major, matching what GPU buffers expect for camera records.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Mat4 {
    /// The columns of the matrix. `cols[0]` is the first column, and so on.
    pub cols: [Vec4; 4],
}

impl Mat4 {
    /// The 4x4 identity matrix.
    pub const IDENTITY: Self = Self {
        cols: [Vec4::X, Vec4::Y, Vec4::Z, Vec4::W],
    };

    /// Creates a new matrix from four column vectors.
    #[inline]
    pub fn from_cols(c0: Vec4, c1: Vec4, c2: Vec4, c3: Vec4) -> Self {
        Self {
            cols: [c0, c1, c2, c3],
        }
    }

    /// Returns a row of the matrix as a `Vec4`.
    #[inline]
    pub fn get_row(&self, index: usize) -> Vec4 {
        Vec4::new(
            self.cols[0].get(index),
            self.cols[1].get(index),
            self.cols[2].get(index),
            self.cols[3].get(index),
        )
    }

    /// Creates a translation matrix.
    #[inline]
    pub fn from_translation(v: Vec3) -> Self {
        Self::from_cols(Vec4::X, Vec4::Y, Vec4::Z, Vec4::from_vec3(v, 1.0))
    }

    /// Creates a right-handed perspective projection matrix with a [0, 1] depth range (ZO).
    ///
    /// # Arguments
    ///
    /// * `fov_y_radians`: Vertical field of view in radians.
    /// * `aspect_ratio`: Width divided by height of the viewport.
    /// * `z_near`: Distance to the near clipping plane (must be positive).
    /// * `z_far`: Distance to the far clipping plane (must be > `z_near`).
    #[inline]
    pub fn perspective_rh_zo(fov_y_radians: f32, aspect_ratio: f32, z_near: f32, z_far: f32) -> Self {
        debug_assert!(z_near > 0.0 && z_far > z_near);
        let f = 1.0 / (fov_y_radians / 2.0).tan();
        let range = z_near - z_far;

        Self::from_cols(
            Vec4::new(f / aspect_ratio, 0.0, 0.0, 0.0),
            Vec4::new(0.0, f, 0.0, 0.0),
            Vec4::new(0.0, 0.0, z_far / range, -1.0),
            Vec4::new(0.0, 0.0, (z_near * z_far) / range, 0.0),
        )
    }

    /// Creates a right-handed orthographic projection matrix with a [0, 1] depth range (ZO).
    #[inline]
    pub fn orthographic_rh_zo(
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        z_near: f32,
        z_far: f32,
    ) -> Self {
        let rml = right - left;
        let tmb = top - bottom;
        let fmn = z_far - z_near;

        Self::from_cols(
            Vec4::new(2.0 / rml, 0.0, 0.0, 0.0),
            Vec4::new(0.0, 2.0 / tmb, 0.0, 0.0),
            Vec4::new(0.0, 0.0, -1.0 / fmn, 0.0),
            Vec4::new(
                -(right + left) / rml,
                -(top + bottom) / tmb,
                -z_near / fmn,
                1.0,
            ),
        )
    }

    /// Creates a right-handed view matrix looking from `eye` towards `target`.
    ///
    /// Returns `None` if `eye` and `target` coincide or `up` is parallel to the
    /// view direction.
    #[inline]
    pub fn look_at_rh(eye: Vec3, target: Vec3, up: Vec3) -> Option<Self> {
        let forward = target - eye;
        if forward.length_squared() < EPSILON * EPSILON {
            return None;
        }
        let f = forward.normalize();
        let s = f.cross(up);
        if s.length_squared() < EPSILON * EPSILON {
            return None;
        }
        let s = s.normalize();
        let u = s.cross(f);

        Some(Self::from_cols(
            Vec4::new(s.x, u.x, -f.x, 0.0),
            Vec4::new(s.y, u.y, -f.y, 0.0),
            Vec4::new(s.z, u.z, -f.z, 0.0),
            Vec4::new(-eye.dot(s), -eye.dot(u), eye.dot(f), 1.0),
        ))
    }

    /// Inverts an affine transform (rotation, scale, translation).
    ///
    /// View matrices are always affine, so this is all viewpoint construction needs.
    /// Returns `None` when the upper 3x3 block is singular.
    pub fn affine_inverse(&self) -> Option<Self> {
        let c0 = self.cols[0].truncate();
        let c1 = self.cols[1].truncate();
        let c2 = self.cols[2].truncate();
        let t = self.cols[3].truncate();

        let det = c0.dot(c1.cross(c2));
        if det.abs() < EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;

        // Rows of the inverse 3x3 are the scaled cross products of the columns.
        let r0 = c1.cross(c2) * inv_det;
        let r1 = c2.cross(c0) * inv_det;
        let r2 = c0.cross(c1) * inv_det;

        Some(Self::from_cols(
            Vec4::new(r0.x, r1.x, r2.x, 0.0),
            Vec4::new(r0.y, r1.y, r2.y, 0.0),
            Vec4::new(r0.z, r1.z, r2.z, 0.0),
            Vec4::new(-r0.dot(t), -r1.dot(t), -r2.dot(t), 1.0),
        ))
    }

    /// Transforms a point (w = 1), applying the perspective divide.
    #[inline]
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        let v = *self * Vec4::from_vec3(p, 1.0);
        if v.w.abs() > EPSILON {
            v.truncate() / v.w
        } else {
            v.truncate()
        }
    }
}

impl Default for Mat4 {
    /// Returns the 4x4 identity matrix.
    #[inline]
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul<Mat4> for Mat4 {
    type Output = Self;
    /// Multiplies this matrix by another `Mat4`. Matrix multiplication is not commutative.
    #[inline]
    fn mul(self, rhs: Mat4) -> Self {
        let rows = [
            self.get_row(0),
            self.get_row(1),
            self.get_row(2),
            self.get_row(3),
        ];
        let col = |c: Vec4| Vec4::new(rows[0].dot(c), rows[1].dot(c), rows[2].dot(c), rows[3].dot(c));
        Self::from_cols(col(rhs.cols[0]), col(rhs.cols[1]), col(rhs.cols[2]), col(rhs.cols[3]))
    }
}

impl Mul<Vec4> for Mat4 {
    type Output = Vec4;
    #[inline]
    fn mul(self, rhs: Vec4) -> Vec4 {
        self.cols[0] * rhs.x + self.cols[1] * rhs.y + self.cols[2] * rhs.z + self.cols[3] * rhs.w
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn assert_vec3_eq(a: Vec3, b: Vec3) {
        assert_abs_diff_eq!(a.x, b.x, epsilon = 1e-4);
        assert_abs_diff_eq!(a.y, b.y, epsilon = 1e-4);
        assert_abs_diff_eq!(a.z, b.z, epsilon = 1e-4);
    }

    #[test]
    fn test_identity_mul() {
        let t = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(t * Mat4::IDENTITY, t);
        assert_eq!(Mat4::IDENTITY * t, t);
    }

    #[test]
    fn test_look_at_moves_eye_to_origin() {
        let eye = Vec3::new(3.0, 4.0, 5.0);
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y).unwrap();
        assert_vec3_eq(view.transform_point(eye), Vec3::ZERO);
        // The target lies straight ahead on -Z.
        let target_vs = view.transform_point(Vec3::ZERO);
        assert_abs_diff_eq!(target_vs.x, 0.0, epsilon = 1e-4);
        assert!(target_vs.z < 0.0);
    }

    #[test]
    fn test_look_at_degenerate_returns_none() {
        assert!(Mat4::look_at_rh(Vec3::ZERO, Vec3::ZERO, Vec3::Y).is_none());
        assert!(Mat4::look_at_rh(Vec3::ZERO, Vec3::Y, Vec3::Y).is_none());
    }

    #[test]
    fn test_affine_inverse_round_trip() {
        let view = Mat4::look_at_rh(Vec3::new(-2.0, 7.0, 1.0), Vec3::new(5.0, 0.0, -3.0), Vec3::Y)
            .unwrap();
        let inv = view.affine_inverse().unwrap();
        let p = Vec3::new(0.5, -1.5, 9.0);
        assert_vec3_eq(inv.transform_point(view.transform_point(p)), p);
    }

    #[test]
    fn test_perspective_maps_near_and_far_to_zero_one() {
        let proj = Mat4::perspective_rh_zo(FRAC_PI_2_TEST, 1.0, 0.5, 50.0);
        assert_abs_diff_eq!(proj.transform_point(Vec3::new(0.0, 0.0, -0.5)).z, 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(proj.transform_point(Vec3::new(0.0, 0.0, -50.0)).z, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_orthographic_maps_box_to_ndc() {
        let proj = Mat4::orthographic_rh_zo(-2.0, 2.0, -1.0, 1.0, 0.0, 10.0);
        assert_vec3_eq(proj.transform_point(Vec3::new(2.0, 1.0, -10.0)), Vec3::new(1.0, 1.0, 1.0));
        assert_vec3_eq(proj.transform_point(Vec3::new(-2.0, -1.0, 0.0)), Vec3::new(-1.0, -1.0, 0.0));
    }

    const FRAC_PI_2_TEST: f32 = std::f32::consts::FRAC_PI_2;
}
