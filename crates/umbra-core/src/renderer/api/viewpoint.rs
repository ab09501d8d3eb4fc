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

//! A single point of view: the client camera, a shadow cascade, a cube face.

use crate::math::{degrees_to_radians, Frustum, Mat4, Vec3, Vec4};

/// Field of view at or above which a viewpoint is treated as omnidirectional.
pub const OMNI_FOV_DEGREES: f32 = 360.0;

/// Near plane used for producer sub-viewpoints.
pub const DEFAULT_NEAR_PLANE: f32 = 0.5;

/// A point of view with its matrices and derived culling data.
///
/// The derived fields (`view_proj`, `frustum`, `frustum_center`) are refreshed by
/// [`Viewpoint::update_frustum`]. Every constructor calls it, so a viewpoint is
/// always consistent unless its matrices are mutated directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewpoint {
    /// Eye position in world space.
    pub position: Vec3,
    /// Field of view in degrees. `>= 360` means omnidirectional.
    pub fov_degrees: f32,
    /// Near plane distance.
    pub near: f32,
    /// Far plane distance.
    pub far: f32,
    /// Square render size in texels.
    pub size: u32,
    /// World to view transform.
    pub view: Mat4,
    /// View to clip transform.
    pub projection: Mat4,
    /// `projection * view`.
    pub view_proj: Mat4,
    /// Planes extracted from `view_proj`.
    pub frustum: Frustum,
    /// The point halfway to the far plane along the view axis.
    pub frustum_center: Vec3,
}

impl Viewpoint {
    /// Builds a viewpoint from explicit matrices.
    pub fn from_matrices(
        position: Vec3,
        view: Mat4,
        projection: Mat4,
        fov_degrees: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let mut viewpoint = Self {
            position,
            fov_degrees,
            near,
            far,
            size: 1,
            view,
            projection,
            view_proj: Mat4::IDENTITY,
            frustum: Frustum::default(),
            frustum_center: position,
        };
        viewpoint.update_frustum();
        viewpoint
    }

    /// Builds a perspective viewpoint looking from `position` towards `target`.
    ///
    /// Falls back to looking down -Z if `target` is degenerate.
    pub fn look_at(
        position: Vec3,
        target: Vec3,
        up: Vec3,
        fov_degrees: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let view = Mat4::look_at_rh(position, target, up)
            .or_else(|| Mat4::look_at_rh(position, position - Vec3::Z, Vec3::Y))
            .unwrap_or(Mat4::IDENTITY);
        let projection = if fov_degrees >= OMNI_FOV_DEGREES {
            Mat4::perspective_rh_zo(degrees_to_radians(90.0), aspect, near, far)
        } else {
            Mat4::perspective_rh_zo(degrees_to_radians(fov_degrees), aspect, near, far)
        };
        Self::from_matrices(position, view, projection, fov_degrees, near, far)
    }

    /// Sets the render size, returning `self` for chaining.
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    /// Returns `true` if plane tests should be skipped for this viewpoint.
    #[inline]
    pub fn is_omnidirectional(&self) -> bool {
        self.fov_degrees >= OMNI_FOV_DEGREES
    }

    /// Recomputes `view_proj`, the six frustum planes and the frustum centre.
    pub fn update_frustum(&mut self) {
        self.view_proj = self.projection * self.view;
        self.frustum = Frustum::from_view_proj(&self.view_proj);
        self.frustum_center = match self.view.affine_inverse() {
            Some(inv_view) => inv_view.transform_point(Vec3::new(0.0, 0.0, -self.far / 2.0)),
            None => self.position,
        };
    }

    /// Packs the viewpoint into its GPU record.
    pub fn to_record(&self) -> ViewpointRecord {
        let inv_view = self.view.affine_inverse().unwrap_or(Mat4::IDENTITY);
        ViewpointRecord {
            projection: self.projection,
            view: self.view,
            inv_view,
            view_proj: self.view_proj,
            eye: Vec4::from_vec3(self.position, 1.0),
            params: Vec4::new(self.size as f32, self.near, self.far, self.fov_degrees),
        }
    }
}

/// GPU layout of a viewpoint, as read by shaders from the camera buffer.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct ViewpointRecord {
    /// View to clip transform.
    pub projection: Mat4,
    /// World to view transform.
    pub view: Mat4,
    /// View to world transform.
    pub inv_view: Mat4,
    /// World to clip transform.
    pub view_proj: Mat4,
    /// Eye position, `w = 1`.
    pub eye: Vec4,
    /// `(size, near, far, fov_degrees)`.
    pub params: Vec4,
}

/// A `(viewpoint index, target layer)` pair passed to composition passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Perspective {
    /// Index into the frame's viewpoint list.
    pub view_index: usize,
    /// Output layer the composition writes to.
    pub layer: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_frustum_center_is_halfway_along_view_axis() {
        let eye = Vec3::new(1.0, 2.0, 3.0);
        let vp = Viewpoint::look_at(eye, eye + Vec3::X, Vec3::Y, 60.0, 1.0, 0.5, 40.0);
        assert_abs_diff_eq!(vp.frustum_center.x, 21.0, epsilon = 1e-3);
        assert_abs_diff_eq!(vp.frustum_center.y, 2.0, epsilon = 1e-3);
        assert_abs_diff_eq!(vp.frustum_center.z, 3.0, epsilon = 1e-3);
    }

    #[test]
    fn test_omnidirectional_flag() {
        let vp = Viewpoint::look_at(Vec3::ZERO, -Vec3::Z, Vec3::Y, 360.0, 1.0, 0.5, 10.0);
        assert!(vp.is_omnidirectional());
        let vp = Viewpoint::look_at(Vec3::ZERO, -Vec3::Z, Vec3::Y, 90.0, 1.0, 0.5, 10.0);
        assert!(!vp.is_omnidirectional());
    }

    #[test]
    fn test_record_carries_params() {
        let vp = Viewpoint::look_at(Vec3::ZERO, -Vec3::Z, Vec3::Y, 75.0, 1.0, 0.5, 10.0).with_size(256);
        let record = vp.to_record();
        assert_eq!(record.params, Vec4::new(256.0, 0.5, 10.0, 75.0));
        assert_eq!(record.view_proj, vp.view_proj);
        assert_eq!(std::mem::size_of::<ViewpointRecord>(), 4 * 64 + 32);
    }
}
