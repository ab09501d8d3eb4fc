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

//! Index allocation into a shared layered array.

use super::producer::ProducerId;
use ahash::AHashMap;

/// An index into a shared layered array. Spans `layers_per_slot` consecutive layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(pub u32);

impl Slot {
    /// First array layer covered by this slot.
    pub const fn first_layer(&self, layers_per_slot: u32) -> u32 {
        self.0 * layers_per_slot
    }
}

/// Hands out slots to producers, reusing released ones before growing.
///
/// Released slots go onto a LIFO free-list; storage never shrinks, so
/// [`SlotAllocator::high_water`] is the depth the backing array must have.
#[derive(Debug, Default)]
pub struct SlotAllocator {
    owners: AHashMap<ProducerId, Slot>,
    free: Vec<Slot>,
    next: u32,
}

impl SlotAllocator {
    /// Creates an empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the producer's slot, assigning one if it has none.
    pub fn acquire(&mut self, producer: ProducerId) -> Slot {
        if let Some(slot) = self.owners.get(&producer) {
            return *slot;
        }
        let slot = self.free.pop().unwrap_or_else(|| {
            let slot = Slot(self.next);
            self.next += 1;
            slot
        });
        self.owners.insert(producer, slot);
        log::trace!("Slot {} acquired by {:?}", slot.0, producer);
        slot
    }

    /// Returns the producer's slot to the free-list.
    pub fn release(&mut self, producer: ProducerId) -> Option<Slot> {
        let slot = self.owners.remove(&producer)?;
        self.free.push(slot);
        log::trace!("Slot {} released by {:?}", slot.0, producer);
        Some(slot)
    }

    /// The producer's current slot.
    pub fn slot_of(&self, producer: ProducerId) -> Option<Slot> {
        self.owners.get(&producer).copied()
    }

    /// Number of producers holding a slot.
    pub fn live_count(&self) -> usize {
        self.owners.len()
    }

    /// Number of distinct slots ever issued.
    pub fn high_water(&self) -> u32 {
        self.next
    }

    /// Number of released slots waiting for reuse.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}
