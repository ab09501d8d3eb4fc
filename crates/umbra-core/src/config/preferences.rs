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

//! A key to float preference store with change notification.
//!
//! Consumers subscribe with [`Preferences::watch`] and receive every subsequent
//! value over a `flume` channel. A subscriber that drops its receiver is pruned
//! on the next [`Preferences::set`], so no explicit unregistration is needed.
//!
//! Values can be loaded from and saved to RON:
//!
//! ```text
//! {
//!     ShadowMaxPerFrame: 6.0,
//!     StalenessWindow: 2.5,
//! }
//! ```

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Keys understood by the scheduler core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PreferenceKey {
    /// Maximum shadow sub-viewpoints re-rendered per frame.
    ShadowMaxPerFrame,
    /// Resolution of each shadow map layer.
    ShadowSize,
    /// Maximum reflection probe faces re-rendered per frame.
    EnvmapMaxPerFrame,
    /// Resolution of each reflection probe face.
    EnvmapSize,
    /// Seconds after which a resource counts as fully stale.
    StalenessWindow,
    /// Number of copies in multi-buffered channels.
    BufferingDepth,
    /// Number of cascades for directional shadows.
    CascadeCount,
}

impl PreferenceKey {
    /// Every key, in declaration order.
    pub const ALL: [PreferenceKey; 7] = [
        PreferenceKey::ShadowMaxPerFrame,
        PreferenceKey::ShadowSize,
        PreferenceKey::EnvmapMaxPerFrame,
        PreferenceKey::EnvmapSize,
        PreferenceKey::StalenessWindow,
        PreferenceKey::BufferingDepth,
        PreferenceKey::CascadeCount,
    ];

    /// The value used when nothing has been configured.
    pub const fn default_value(&self) -> f32 {
        match self {
            PreferenceKey::ShadowMaxPerFrame => 4.0,
            PreferenceKey::ShadowSize => 1024.0,
            PreferenceKey::EnvmapMaxPerFrame => 1.0,
            PreferenceKey::EnvmapSize => 512.0,
            PreferenceKey::StalenessWindow => 5.0,
            PreferenceKey::BufferingDepth => 3.0,
            PreferenceKey::CascadeCount => 4.0,
        }
    }
}

/// Errors raised while loading or saving preferences.
#[derive(Debug, Error)]
pub enum PreferenceError {
    /// The RON document could not be parsed.
    #[error("Failed to parse preferences: {0}")]
    Parse(String),
    /// The preferences could not be serialized.
    #[error("Failed to serialize preferences: {0}")]
    Serialize(String),
    /// Reading or writing the preference file failed.
    #[error("Preference file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// An explicitly owned preference store.
#[derive(Debug, Default)]
pub struct Preferences {
    values: AHashMap<PreferenceKey, f32>,
    watchers: AHashMap<PreferenceKey, Vec<flume::Sender<f32>>>,
}

impl Preferences {
    /// Creates an empty store. Reads fall back to [`PreferenceKey::default_value`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a RON map of key to value.
    pub fn from_ron(source: &str) -> Result<Self, PreferenceError> {
        let values: BTreeMap<PreferenceKey, f32> =
            ron::from_str(source).map_err(|e| PreferenceError::Parse(e.to_string()))?;
        Ok(Self {
            values: values.into_iter().collect(),
            watchers: AHashMap::new(),
        })
    }

    /// Serializes the explicitly set values as pretty RON.
    pub fn to_ron(&self) -> Result<String, PreferenceError> {
        let ordered: BTreeMap<PreferenceKey, f32> =
            self.values.iter().map(|(k, v)| (*k, *v)).collect();
        ron::ser::to_string_pretty(&ordered, ron::ser::PrettyConfig::default())
            .map_err(|e| PreferenceError::Serialize(e.to_string()))
    }

    /// Loads a RON preference file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreferenceError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_ron(&source)
    }

    /// Writes the explicitly set values to a RON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PreferenceError> {
        std::fs::write(path, self.to_ron()?)?;
        Ok(())
    }

    /// Returns the explicitly set value, if any.
    pub fn get(&self, key: PreferenceKey) -> Option<f32> {
        self.values.get(&key).copied()
    }

    /// Returns the set value or the key's default.
    pub fn get_or_default(&self, key: PreferenceKey) -> f32 {
        self.get(key).unwrap_or_else(|| key.default_value())
    }

    /// Returns the set value, storing `default` first if the key is unset.
    pub fn get_or_set(&mut self, key: PreferenceKey, default: f32) -> f32 {
        *self.values.entry(key).or_insert(default)
    }

    /// Stores a value and notifies every live watcher of `key`.
    pub fn set(&mut self, key: PreferenceKey, value: f32) {
        self.values.insert(key, value);
        if let Some(senders) = self.watchers.get_mut(&key) {
            senders.retain(|sender| sender.send(value).is_ok());
            log::debug!(
                "Preference {:?} set to {} ({} watchers)",
                key,
                value,
                senders.len()
            );
        }
    }

    /// Subscribes to changes of `key`.
    pub fn watch(&mut self, key: PreferenceKey) -> flume::Receiver<f32> {
        let (sender, receiver) = flume::unbounded();
        self.watchers.entry(key).or_default().push(sender);
        receiver
    }

    /// Subscribes to `key` and returns a cursor seeded with its current value.
    pub fn watched(&mut self, key: PreferenceKey) -> WatchedPreference {
        let value = self.get_or_default(key);
        WatchedPreference {
            key,
            value,
            receiver: self.watch(key),
        }
    }

    /// Number of live watchers of `key`, as of the last `set`.
    pub fn watcher_count(&self, key: PreferenceKey) -> usize {
        self.watchers.get(&key).map_or(0, Vec::len)
    }
}

/// The consumer side of a watched preference: the last value seen plus its channel.
#[derive(Debug, Clone)]
pub struct WatchedPreference {
    key: PreferenceKey,
    value: f32,
    receiver: flume::Receiver<f32>,
}

impl WatchedPreference {
    /// A cursor with a fixed value and no source. Used when no store is available.
    pub fn fixed(key: PreferenceKey, value: f32) -> Self {
        let (_, receiver) = flume::bounded(0);
        Self {
            key,
            value,
            receiver,
        }
    }

    /// The key being watched.
    pub fn key(&self) -> PreferenceKey {
        self.key
    }

    /// The latest known value.
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Drains pending notifications. Returns the new value if it changed.
    pub fn poll(&mut self) -> Option<f32> {
        let latest = self.receiver.try_iter().last()?;
        if latest == self.value {
            return None;
        }
        self.value = latest;
        Some(latest)
    }
}
