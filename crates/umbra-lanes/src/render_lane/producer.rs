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

//! Resource producers: entities that own an expensive derived GPU resource
//! (a shadow map, a reflection probe) rendered from one or more sub-viewpoints.

use super::slot_allocator::Slot;
use super::visibility_lane::CullCandidate;
use umbra_core::math::{Mat4, Vec3};
use umbra_core::renderer::api::{Viewpoint, DEFAULT_NEAR_PLANE};

/// Most sub-viewpoints a single producer can carry. A cube has six faces.
pub const MAX_SUB_VIEWPOINTS: usize = 6;

/// Upper bound for directional shadow cascades.
pub const MAX_CASCADES: u32 = MAX_SUB_VIEWPOINTS as u32;

/// Blend between logarithmic (1.0) and uniform (0.0) cascade splits.
pub const CASCADE_SPLIT_LAMBDA: f32 = 0.75;

/// Target direction and up vector of each cube face, in `+X -X +Y -Y +Z -Z` order.
pub const CUBE_FACES: [(Vec3, Vec3); 6] = [
    (Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, -1.0, 0.0)),
    (Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.0, -1.0, 0.0)),
    (Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 0.0, 1.0)),
    (Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.0, 0.0, -1.0)),
    (Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, -1.0, 0.0)),
    (Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, -1.0, 0.0)),
];

/// A stable identifier for a producer, assigned by the owning technique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProducerId(pub u32);

/// What a producer is, and how its sub-viewpoints are derived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProducerKind {
    /// A cone light. One sub-viewpoint.
    Spot {
        /// Direction the cone points to.
        direction: Vec3,
        /// Full cone angle in degrees.
        cutoff_degrees: f32,
    },
    /// An omnidirectional light. Six cube faces.
    Point,
    /// A sun-like light. One cascade per split of the main viewer's frustum.
    Directional {
        /// Direction the light travels in.
        direction: Vec3,
        /// Depth of the viewer's frustum covered by the cascades.
        distance: f32,
    },
    /// A reflection probe. Six cube faces.
    Reflector {
        /// World-space extents of the probe volume.
        scale: Vec3,
    },
}

impl ProducerKind {
    /// Layers reserved per slot in the shared layered array.
    pub const fn layers_per_slot(&self) -> u32 {
        match self {
            ProducerKind::Spot { .. } => 1,
            ProducerKind::Point | ProducerKind::Reflector { .. } => 6,
            ProducerKind::Directional { .. } => MAX_CASCADES,
        }
    }

    /// Compact tag written into GPU producer records.
    pub const fn tag(&self) -> u32 {
        match self {
            ProducerKind::Spot { .. } => 0,
            ProducerKind::Point => 1,
            ProducerKind::Directional { .. } => 2,
            ProducerKind::Reflector { .. } => 3,
        }
    }
}

/// One view from which a producer re-renders its resource.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubViewpoint {
    /// Matrices and frustum of this view.
    pub viewpoint: Viewpoint,
    /// Time of the last refresh, `None` if never rendered.
    pub last_update: Option<f64>,
    /// Set by the scheduler when this view was admitted for the current frame.
    pub enabled: bool,
}

impl SubViewpoint {
    /// A never-rendered view.
    pub fn new(viewpoint: Viewpoint) -> Self {
        Self {
            viewpoint,
            last_update: None,
            enabled: false,
        }
    }

    /// Seconds since the last refresh, if there was one.
    pub fn age(&self, now: f64) -> Option<f64> {
        self.last_update.map(|t| (now - t).max(0.0))
    }
}

/// Addresses one sub-viewpoint by index: `producers[producer].views[face]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewRef {
    /// Index into the owning technique's producer list.
    pub producer: usize,
    /// Index into the producer's sub-viewpoints.
    pub face: usize,
}

/// An entity that owns a slot in a shared layered array and refreshes it on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceProducer {
    /// Stable identifier.
    pub id: ProducerId,
    /// Kind and kind-specific parameters.
    pub kind: ProducerKind,
    /// World-space position. Unused for directional lights.
    pub position: Vec3,
    /// Culling radius around `position`.
    pub radius: f32,
    /// Assigned slot, `None` until the owner acquires one.
    pub slot: Option<Slot>,
    /// One entry per rendered view.
    pub views: Vec<SubViewpoint>,
}

impl ResourceProducer {
    /// Creates a producer without views. Call [`ResourceProducer::sync_views`] before use.
    pub fn new(id: ProducerId, kind: ProducerKind, position: Vec3, radius: f32) -> Self {
        Self {
            id,
            kind,
            position,
            radius,
            slot: None,
            views: Vec::new(),
        }
    }

    /// A spot light whose shadow reaches `radius` world units.
    pub fn spot(id: ProducerId, position: Vec3, direction: Vec3, cutoff_degrees: f32, radius: f32) -> Self {
        Self::new(
            id,
            ProducerKind::Spot {
                direction: direction.normalize(),
                cutoff_degrees,
            },
            position,
            radius,
        )
    }

    /// A point light whose shadow reaches `radius` world units.
    pub fn point(id: ProducerId, position: Vec3, radius: f32) -> Self {
        Self::new(id, ProducerKind::Point, position, radius)
    }

    /// A directional light whose cascades cover at most `distance` units of the viewer's frustum.
    ///
    /// Directional lights affect everything, so their culling radius is unbounded.
    pub fn directional(id: ProducerId, direction: Vec3, distance: f32) -> Self {
        Self::new(
            id,
            ProducerKind::Directional {
                direction: direction.normalize(),
                distance,
            },
            Vec3::ZERO,
            f32::MAX,
        )
    }

    /// A reflection probe covering a box of the given extents.
    pub fn reflector(id: ProducerId, position: Vec3, scale: Vec3) -> Self {
        Self::new(id, ProducerKind::Reflector { scale }, position, scale.max_element())
    }

    /// Layers this producer occupies in its array.
    pub fn layers_per_slot(&self) -> u32 {
        self.kind.layers_per_slot()
    }

    /// First array layer of face `face`, if a slot is assigned.
    pub fn layer_of(&self, face: usize) -> Option<u32> {
        self.slot
            .map(|slot| slot.first_layer(self.layers_per_slot()) + face as u32)
    }

    /// The far plane of this producer's views.
    ///
    /// Lights reach the square of their radius, probes the square of their largest extent.
    pub fn far_plane(&self) -> f32 {
        match self.kind {
            ProducerKind::Reflector { scale } => {
                let largest = scale.max_element();
                (largest * largest).max(DEFAULT_NEAR_PLANE * 2.0)
            }
            _ => (self.radius * self.radius).max(DEFAULT_NEAR_PLANE * 2.0),
        }
    }

    /// Rebuilds every sub-viewpoint from the current transform.
    ///
    /// Timestamps survive the rebuild for views that still exist. Directional
    /// lights need the main viewer to fit their cascades; without one their
    /// views are left untouched.
    pub fn sync_views(&mut self, size: u32, viewer: Option<&Viewpoint>, cascades: u32) {
        let viewpoints = match self.kind {
            ProducerKind::Spot {
                direction,
                cutoff_degrees,
            } => {
                let up = if direction.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
                vec![Viewpoint::look_at(
                    self.position,
                    self.position + direction,
                    up,
                    cutoff_degrees,
                    1.0,
                    DEFAULT_NEAR_PLANE,
                    self.far_plane(),
                )]
            }
            ProducerKind::Point | ProducerKind::Reflector { .. } => {
                cube_face_viewpoints(self.position, self.far_plane())
            }
            ProducerKind::Directional { direction, distance } => match viewer {
                Some(viewer) => cascade_viewpoints(
                    viewer,
                    direction,
                    distance,
                    cascades.clamp(1, MAX_CASCADES),
                ),
                None => return,
            },
        };

        self.views.truncate(viewpoints.len());
        for (face, viewpoint) in viewpoints.into_iter().enumerate() {
            let viewpoint = viewpoint.with_size(size);
            match self.views.get_mut(face) {
                Some(view) => view.viewpoint = viewpoint,
                None => self.views.push(SubViewpoint::new(viewpoint)),
            }
        }
    }

    /// Forgets every refresh so all views are rescheduled.
    pub fn mark_stale(&mut self) {
        for view in &mut self.views {
            view.last_update = None;
        }
    }

    /// The bounding sphere used by the visibility culler.
    pub fn cull_candidate(&self) -> CullCandidate {
        CullCandidate {
            id: self.id,
            position: self.position,
            radius: self.radius,
            offset: Vec3::ZERO,
        }
    }
}

/// Six 90 degree views around `position`, one per cube face.
pub fn cube_face_viewpoints(position: Vec3, far: f32) -> Vec<Viewpoint> {
    CUBE_FACES
        .iter()
        .map(|(target, up)| {
            Viewpoint::look_at(position, position + *target, *up, 90.0, 1.0, DEFAULT_NEAR_PLANE, far)
        })
        .collect()
}

/// Split depths `[near, d1, .., far]` blending logarithmic and uniform distributions.
pub fn cascade_splits(near: f32, far: f32, count: u32) -> Vec<f32> {
    let count = count.max(1);
    let mut splits = Vec::with_capacity(count as usize + 1);
    splits.push(near);
    for i in 1..=count {
        let ratio = i as f32 / count as f32;
        let log = near * (far / near).powf(ratio);
        let uniform = near + (far - near) * ratio;
        splits.push(CASCADE_SPLIT_LAMBDA * log + (1.0 - CASCADE_SPLIT_LAMBDA) * uniform);
    }
    splits
}

/// Orthographic views of a directional light, each fitted around one depth slice
/// of the viewer's frustum.
pub fn cascade_viewpoints(viewer: &Viewpoint, direction: Vec3, distance: f32, count: u32) -> Vec<Viewpoint> {
    let near = viewer.near.max(DEFAULT_NEAR_PLANE);
    let far = distance.min(viewer.far).max(near * 2.0);
    let splits = cascade_splits(near, far, count);

    let inv_view = viewer.view.affine_inverse().unwrap_or(Mat4::IDENTITY);
    let tan_y = 1.0 / viewer.projection.cols[1].y;
    let tan_x = 1.0 / viewer.projection.cols[0].x;
    let light_dir = direction.normalize();
    let up = if light_dir.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };

    splits
        .windows(2)
        .map(|pair| {
            let (slice_near, slice_far) = (pair[0], pair[1]);
            let middle = Vec3::new(0.0, 0.0, -(slice_near + slice_far) / 2.0);

            // Bounding sphere of the slice, from its farthest corner.
            let radius = [slice_near, slice_far]
                .iter()
                .map(|d| Vec3::new(d * tan_x, d * tan_y, -d).distance(middle))
                .fold(0.0_f32, f32::max)
                .max(DEFAULT_NEAR_PLANE);

            let center = inv_view.transform_point(middle);
            let eye = center - light_dir * (radius * 2.0);
            let view = Mat4::look_at_rh(eye, center, up).unwrap_or(Mat4::IDENTITY);
            let projection = Mat4::orthographic_rh_zo(-radius, radius, -radius, radius, 0.0, radius * 3.0);
            Viewpoint::from_matrices(eye, view, projection, 180.0, 0.0, radius * 3.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn viewer() -> Viewpoint {
        Viewpoint::look_at(Vec3::ZERO, -Vec3::Z, Vec3::Y, 60.0, 16.0 / 9.0, 0.5, 100.0)
    }

    #[test]
    fn test_view_counts_per_kind() {
        let mut spot = ResourceProducer::spot(ProducerId(0), Vec3::ZERO, -Vec3::Y, 45.0, 10.0);
        let mut point = ResourceProducer::point(ProducerId(1), Vec3::ZERO, 10.0);
        let mut sun = ResourceProducer::directional(ProducerId(2), Vec3::new(0.3, -1.0, 0.2), 80.0);
        let mut probe = ResourceProducer::reflector(ProducerId(3), Vec3::ZERO, Vec3::new(2.0, 3.0, 1.0));
        let v = viewer();

        spot.sync_views(512, Some(&v), 4);
        point.sync_views(512, Some(&v), 4);
        sun.sync_views(512, Some(&v), 4);
        probe.sync_views(512, Some(&v), 4);

        assert_eq!(spot.views.len(), 1);
        assert_eq!(point.views.len(), 6);
        assert_eq!(sun.views.len(), 4);
        assert_eq!(probe.views.len(), 6);
        assert_eq!(probe.views[0].viewpoint.size, 512);
    }

    #[test]
    fn test_sync_preserves_timestamps() {
        let mut point = ResourceProducer::point(ProducerId(0), Vec3::ZERO, 4.0);
        point.sync_views(256, None, 4);
        point.views[2].last_update = Some(3.0);
        point.position = Vec3::new(1.0, 0.0, 0.0);
        point.sync_views(256, None, 4);
        assert_eq!(point.views[2].last_update, Some(3.0));
        assert_relative_eq!(point.views[2].viewpoint.position.x, 1.0);

        point.mark_stale();
        assert!(point.views.iter().all(|v| v.last_update.is_none()));
    }

    #[test]
    fn test_directional_without_viewer_keeps_views() {
        let mut sun = ResourceProducer::directional(ProducerId(0), -Vec3::Y, 50.0);
        sun.sync_views(256, None, 4);
        assert!(sun.views.is_empty());
    }

    #[test]
    fn test_cascade_count_shrinks_views() {
        let mut sun = ResourceProducer::directional(ProducerId(0), -Vec3::Y, 50.0);
        let v = viewer();
        sun.sync_views(256, Some(&v), 4);
        sun.sync_views(256, Some(&v), 2);
        assert_eq!(sun.views.len(), 2);
    }

    #[test]
    fn test_cascade_splits_are_monotonic_and_bounded() {
        let splits = cascade_splits(0.5, 100.0, 4);
        assert_eq!(splits.len(), 5);
        assert_relative_eq!(splits[0], 0.5);
        assert_relative_eq!(splits[4], 100.0, epsilon = 1e-3);
        assert!(splits.windows(2).all(|w| w[1] > w[0]));
        // The logarithmic term pulls the first split closer than a uniform split would.
        assert!(splits[1] < 0.5 + 99.5 / 4.0);
    }

    #[test]
    fn test_layers_follow_slot() {
        let mut point = ResourceProducer::point(ProducerId(0), Vec3::ZERO, 4.0);
        assert_eq!(point.layer_of(0), None);
        point.slot = Some(Slot(2));
        assert_eq!(point.layer_of(0), Some(12));
        assert_eq!(point.layer_of(5), Some(17));
    }

    #[test]
    fn test_far_planes() {
        let light = ResourceProducer::point(ProducerId(0), Vec3::ZERO, 5.0);
        assert_relative_eq!(light.far_plane(), 25.0);
        let probe = ResourceProducer::reflector(ProducerId(1), Vec3::ZERO, Vec3::new(1.0, 4.0, 2.0));
        assert_relative_eq!(probe.far_plane(), 16.0);
        assert_relative_eq!(probe.radius, 4.0);
    }
}
