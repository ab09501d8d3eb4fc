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

use ahash::AHashMap;

/// A stable identifier for a registered asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetId(pub usize);

/// Loading state of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetState {
    /// Still being loaded by the asset subsystem.
    Loading,
    /// Finished loading and usable.
    Ready,
    /// Loading failed. Dependents stay skipped.
    Failed,
}

#[derive(Debug)]
struct AssetEntry {
    name: String,
    state: AssetState,
}

/// An explicitly constructed table of asset readiness.
///
/// One registry is owned per session and lent to techniques each frame through
/// the [`FrameContext`](crate::technique::FrameContext).
#[derive(Debug, Default)]
pub struct AssetRegistry {
    by_name: AHashMap<String, AssetId>,
    entries: Vec<AssetEntry>,
}

impl AssetRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` in the `Loading` state. Registering the same name twice
    /// returns the existing id.
    pub fn register(&mut self, name: &str) -> AssetId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = AssetId(self.entries.len());
        self.entries.push(AssetEntry {
            name: name.to_owned(),
            state: AssetState::Loading,
        });
        self.by_name.insert(name.to_owned(), id);
        id
    }

    /// Looks up an asset by name.
    pub fn lookup(&self, name: &str) -> Option<AssetId> {
        self.by_name.get(name).copied()
    }

    /// Marks an asset as loaded.
    pub fn mark_ready(&mut self, id: AssetId) {
        self.set_state(id, AssetState::Ready);
    }

    /// Marks an asset as failed.
    pub fn mark_failed(&mut self, id: AssetId) {
        self.set_state(id, AssetState::Failed);
    }

    fn set_state(&mut self, id: AssetId, state: AssetState) {
        match self.entries.get_mut(id.0) {
            Some(entry) => {
                log::debug!("Asset '{}' is now {:?}", entry.name, state);
                entry.state = state;
            }
            None => log::warn!("Ignoring state change for unknown asset {:?}", id),
        }
    }

    /// Current state, or `None` for an unknown id.
    pub fn state(&self, id: AssetId) -> Option<AssetState> {
        self.entries.get(id.0).map(|entry| entry.state)
    }

    /// Returns `true` if the asset has finished loading.
    pub fn is_ready(&self, id: AssetId) -> bool {
        self.state(id) == Some(AssetState::Ready)
    }

    /// Returns `true` if every listed asset has finished loading.
    pub fn all_ready(&self, ids: &[AssetId]) -> bool {
        ids.iter().all(|id| self.is_ready(*id))
    }

    /// Number of registered assets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = AssetRegistry::new();
        let a = registry.register("shaders/shadow");
        let b = registry.register("shaders/shadow");
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("shaders/shadow"), Some(a));
    }

    #[test]
    fn test_all_ready_requires_every_asset() {
        let mut registry = AssetRegistry::new();
        let shader = registry.register("shader");
        let mesh = registry.register("mesh");
        assert!(!registry.all_ready(&[shader, mesh]));
        registry.mark_ready(shader);
        assert!(!registry.all_ready(&[shader, mesh]));
        registry.mark_ready(mesh);
        assert!(registry.all_ready(&[shader, mesh]));
        assert!(registry.all_ready(&[]));
    }

    #[test]
    fn test_failed_and_unknown_assets_are_not_ready() {
        let mut registry = AssetRegistry::new();
        let shader = registry.register("shader");
        registry.mark_failed(shader);
        assert_eq!(registry.state(shader), Some(AssetState::Failed));
        assert!(!registry.is_ready(shader));
        assert!(!registry.is_ready(AssetId(42)));
    }
}
