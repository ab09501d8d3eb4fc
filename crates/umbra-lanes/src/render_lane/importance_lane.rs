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

//! Importance-based refresh scheduling.
//!
//! Every visible producer's sub-viewpoints are scored by proximity to the main
//! viewer and by staleness, and at most `max_per_frame` of them are admitted to
//! the [`Shortlist`]. The score is a heuristic:
//!
//! ```text
//! d          = clamp(1 - (|viewer - frustum_centre| / viewer.far)^2, 0, 1)
//! t          = ((now - last_update) / window)^2
//! importance = d + t * (1 - d)
//! ```
//!
//! Near views dominate when everything is fresh; staleness lifts distant views
//! towards 1 and past it once they are more than one window old.

use super::producer::{ResourceProducer, SubViewpoint, ViewRef};
use super::visibility_lane::VisibilityTable;
use umbra_core::renderer::api::Viewpoint;

/// Staleness, in windows, assigned to views that were never rendered.
pub const NEVER_UPDATED_WINDOWS: f32 = 8.0;

/// One admitted sub-viewpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShortlistEntry {
    /// Score at admission time.
    pub importance: f32,
    /// The admitted sub-viewpoint.
    pub view: ViewRef,
    /// Absolute layer in the owner's layered array.
    pub layer: u32,
}

/// A bounded list of entries sorted by descending importance.
#[derive(Debug, Clone, Default)]
pub struct Shortlist {
    entries: Vec<ShortlistEntry>,
    capacity: usize,
}

impl Shortlist {
    /// An empty list admitting at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Inserts ahead of the first entry with strictly lower importance, or appends
    /// if there is room, then drops whatever falls past the capacity.
    ///
    /// Returns `true` if the entry is still in the list afterwards.
    pub fn insert(&mut self, entry: ShortlistEntry) -> bool {
        let position = self
            .entries
            .iter()
            .position(|existing| existing.importance < entry.importance);
        let admitted = match position {
            Some(index) => {
                self.entries.insert(index, entry);
                true
            }
            None if self.entries.len() < self.capacity => {
                self.entries.push(entry);
                true
            }
            None => false,
        };
        self.entries.truncate(self.capacity);
        admitted
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the capacity, dropping the lowest entries if it shrinks.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.entries.truncate(capacity);
    }

    /// Entries in descending importance.
    pub fn entries(&self) -> &[ShortlistEntry] {
        &self.entries
    }

    /// Iterates entries in descending importance.
    pub fn iter(&self) -> std::slice::Iter<'_, ShortlistEntry> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that may still be admitted.
    pub fn available_room(&self) -> usize {
        self.capacity.saturating_sub(self.entries.len())
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<'a> IntoIterator for &'a Shortlist {
    type Item = &'a ShortlistEntry;
    type IntoIter = std::slice::Iter<'a, ShortlistEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Picks which sub-viewpoints to re-render this frame.
#[derive(Debug, Clone)]
pub struct ImportanceScheduler {
    shortlist: Shortlist,
    staleness_window: f32,
}

impl ImportanceScheduler {
    /// A scheduler admitting `max_per_frame` views, fully stale after `staleness_window` seconds.
    pub fn new(max_per_frame: usize, staleness_window: f32) -> Self {
        Self {
            shortlist: Shortlist::with_capacity(max_per_frame),
            staleness_window: staleness_window.max(f32::EPSILON),
        }
    }

    /// Maximum views admitted per frame.
    pub fn max_per_frame(&self) -> usize {
        self.shortlist.capacity()
    }

    /// Changes the admission budget.
    pub fn set_max_per_frame(&mut self, max_per_frame: usize) {
        if max_per_frame != self.shortlist.capacity() {
            log::debug!("Importance scheduler budget set to {}", max_per_frame);
        }
        self.shortlist.set_capacity(max_per_frame);
    }

    /// Seconds after which a view counts as fully stale.
    pub fn staleness_window(&self) -> f32 {
        self.staleness_window
    }

    /// Changes the staleness window. Non-positive values are clamped.
    pub fn set_staleness_window(&mut self, seconds: f32) {
        self.staleness_window = seconds.max(f32::EPSILON);
    }

    /// Scores one sub-viewpoint as seen by `viewer`.
    pub fn importance(viewer: &Viewpoint, view: &SubViewpoint, now: f64, window: f32) -> f32 {
        let lin_dist =
            viewer.position.distance(view.viewpoint.frustum_center) / viewer.far.max(f32::EPSILON);
        let d = (1.0 - lin_dist * lin_dist).clamp(0.0, 1.0);
        let lin_time = match view.age(now) {
            Some(age) => age as f32 / window,
            None => NEVER_UPDATED_WINDOWS,
        };
        let t = lin_time * lin_time;
        d + t * (1.0 - d)
    }

    /// Runs one admission pass and returns the resulting shortlist.
    ///
    /// `visibility` must come from culling `producers` (in order) against the
    /// client viewpoints. Producers without a slot cannot be rendered and are
    /// ignored. The pass is skipped while the shortlist is still full from a
    /// pass that was not cleared. A zero budget admits nothing and leaves every
    /// view disabled.
    pub fn schedule(
        &mut self,
        producers: &mut [ResourceProducer],
        visibility: &VisibilityTable,
        viewer: &Viewpoint,
        now: f64,
    ) -> &Shortlist {
        if self.shortlist.capacity() > 0 && self.shortlist.available_room() == 0 {
            log::trace!("Importance scheduler: shortlist full, pass skipped");
            return &self.shortlist;
        }

        for producer in producers.iter_mut() {
            for view in &mut producer.views {
                view.enabled = false;
            }
        }
        if self.shortlist.capacity() == 0 {
            return &self.shortlist;
        }

        for (index, producer) in producers.iter().enumerate() {
            if !visibility.visible_in_any(index) {
                continue;
            }
            for (face, view) in producer.views.iter().enumerate() {
                let Some(layer) = producer.layer_of(face) else {
                    continue;
                };
                self.shortlist.insert(ShortlistEntry {
                    importance: Self::importance(viewer, view, now, self.staleness_window),
                    view: ViewRef {
                        producer: index,
                        face,
                    },
                    layer,
                });
            }
        }

        for entry in self.shortlist.iter() {
            if let Some(view) = producers
                .get_mut(entry.view.producer)
                .and_then(|p| p.views.get_mut(entry.view.face))
            {
                view.enabled = true;
            }
        }

        &self.shortlist
    }

    /// The current shortlist.
    pub fn shortlist(&self) -> &Shortlist {
        &self.shortlist
    }

    /// Empties the shortlist once its entries have been consumed.
    pub fn clear(&mut self) {
        self.shortlist.clear();
    }

    /// Records that `view` was re-rendered at `now`.
    pub fn mark_updated(producers: &mut [ResourceProducer], view: ViewRef, now: f64) {
        if let Some(sub) = producers
            .get_mut(view.producer)
            .and_then(|p| p.views.get_mut(view.face))
        {
            sub.last_update = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_lane::producer::ProducerId;
    use crate::render_lane::slot_allocator::Slot;
    use crate::render_lane::visibility_lane::VisibilityCuller;
    use umbra_core::math::Vec3;

    fn viewer() -> Viewpoint {
        Viewpoint::look_at(Vec3::ZERO, -Vec3::Z, Vec3::Y, 90.0, 1.0, 0.5, 100.0)
    }

    /// Spot lights in front of the viewer, pointing away from it, one per distance.
    fn spots(distances: &[f32]) -> Vec<ResourceProducer> {
        distances
            .iter()
            .enumerate()
            .map(|(i, z)| {
                let mut p = ResourceProducer::spot(
                    ProducerId(i as u32),
                    Vec3::new(0.0, 0.0, -z),
                    -Vec3::Z,
                    60.0,
                    3.0,
                );
                p.slot = Some(Slot(i as u32));
                p.sync_views(256, None, 1);
                p
            })
            .collect()
    }

    fn run(scheduler: &mut ImportanceScheduler, producers: &mut [ResourceProducer], now: f64) -> Vec<ShortlistEntry> {
        let candidates: Vec<_> = producers.iter().map(|p| p.cull_candidate()).collect();
        let mut culler = VisibilityCuller::new();
        let table = culler.cull(&[viewer()], &candidates);
        scheduler.schedule(producers, table, &viewer(), now).entries().to_vec()
    }

    #[test]
    fn test_length_is_min_of_candidates_and_budget() {
        for (count, budget) in [(0usize, 4usize), (2, 4), (4, 4), (9, 4), (9, 1), (3, 0)] {
            let distances: Vec<f32> = (0..count).map(|i| 5.0 + i as f32).collect();
            let mut producers = spots(&distances);
            let mut scheduler = ImportanceScheduler::new(budget, 5.0);
            let list = run(&mut scheduler, &mut producers, 10.0);
            assert_eq!(list.len(), count.min(budget), "count {count}, budget {budget}");
        }
    }

    #[test]
    fn test_entries_are_sorted_descending() {
        let mut producers = spots(&[40.0, 5.0, 25.0, 12.0, 60.0, 8.0]);
        producers[1].views[0].last_update = Some(9.9);
        producers[3].views[0].last_update = Some(2.0);
        producers[4].views[0].last_update = Some(0.0);
        let mut scheduler = ImportanceScheduler::new(4, 5.0);
        let list = run(&mut scheduler, &mut producers, 10.0);
        assert!(list.windows(2).all(|w| w[0].importance >= w[1].importance));
    }

    #[test]
    fn test_staler_view_scores_at_least_fresher_at_equal_distance() {
        let producers = spots(&[20.0]);
        let mut fresh = producers[0].views[0];
        let mut stale = fresh;
        fresh.last_update = Some(9.0);
        stale.last_update = Some(4.0);
        let v = viewer();
        let fresh_score = ImportanceScheduler::importance(&v, &fresh, 10.0, 5.0);
        let stale_score = ImportanceScheduler::importance(&v, &stale, 10.0, 5.0);
        assert!(stale_score >= fresh_score);

        let mut never = fresh;
        never.last_update = None;
        assert!(ImportanceScheduler::importance(&v, &never, 10.0, 5.0) >= stale_score);
    }

    #[test]
    fn test_fresh_near_views_win_over_fresh_far_views() {
        let mut producers = spots(&[80.0, 4.0]);
        for p in &mut producers {
            p.views[0].last_update = Some(10.0);
        }
        let mut scheduler = ImportanceScheduler::new(1, 5.0);
        let list = run(&mut scheduler, &mut producers, 10.0);
        assert_eq!(list[0].view.producer, 1);
        assert!(producers[1].views[0].enabled);
        assert!(!producers[0].views[0].enabled);
    }

    #[test]
    fn test_invisible_and_unslotted_producers_are_excluded() {
        let mut producers = spots(&[10.0, 10.0]);
        producers[0].position = Vec3::new(0.0, 0.0, 50.0);
        producers[1].slot = None;
        let mut scheduler = ImportanceScheduler::new(4, 5.0);
        assert!(run(&mut scheduler, &mut producers, 1.0).is_empty());
    }

    #[test]
    fn test_full_shortlist_skips_pass_until_cleared() {
        let mut producers = spots(&[10.0, 20.0, 30.0]);
        let mut scheduler = ImportanceScheduler::new(2, 5.0);
        let first = run(&mut scheduler, &mut producers, 1.0);
        assert_eq!(first.len(), 2);
        for entry in &first {
            ImportanceScheduler::mark_updated(&mut producers, entry.view, 1.0);
        }

        // Still full: the pass is skipped and the old entries remain.
        assert_eq!(run(&mut scheduler, &mut producers, 1.1), first);

        scheduler.clear();
        let next = run(&mut scheduler, &mut producers, 1.1);
        assert_eq!(next[0].view.producer, 0, "never-rendered view goes first");
    }

    #[test]
    fn test_zero_budget_disables_previously_enabled_views() {
        let mut producers = spots(&[10.0, 20.0]);
        let mut scheduler = ImportanceScheduler::new(2, 5.0);
        run(&mut scheduler, &mut producers, 1.0);
        assert!(producers.iter().all(|p| p.views[0].enabled));

        scheduler.clear();
        scheduler.set_max_per_frame(0);
        assert!(run(&mut scheduler, &mut producers, 2.0).is_empty());
        assert!(producers.iter().all(|p| !p.views[0].enabled));
    }

    #[test]
    fn test_zero_far_viewer_scores_are_finite() {
        let producers = spots(&[20.0]);
        let mut v = viewer();
        v.far = 0.0;
        let view = producers[0].views[0];
        let score = ImportanceScheduler::importance(&v, &view, 10.0, 5.0);
        assert!(score.is_finite());
    }

    #[test]
    fn test_mark_updated_stamps_view() {
        let mut producers = spots(&[10.0]);
        ImportanceScheduler::mark_updated(
            &mut producers,
            ViewRef {
                producer: 0,
                face: 0,
            },
            3.5,
        );
        assert_eq!(producers[0].views[0].last_update, Some(3.5));
        // Out-of-range references are ignored.
        ImportanceScheduler::mark_updated(
            &mut producers,
            ViewRef {
                producer: 4,
                face: 0,
            },
            3.5,
        );
    }

    #[test]
    fn test_equal_importance_keeps_first_come_order() {
        let mut list = Shortlist::with_capacity(3);
        let entry = |producer, importance| ShortlistEntry {
            importance,
            view: ViewRef { producer, face: 0 },
            layer: producer as u32,
        };
        assert!(list.insert(entry(0, 0.5)));
        assert!(list.insert(entry(1, 0.5)));
        assert!(list.insert(entry(2, 0.9)));
        assert!(!list.insert(entry(3, 0.5)));
        let order: Vec<usize> = list.iter().map(|e| e.view.producer).collect();
        assert_eq!(order, vec![2, 0, 1]);
    }
}
