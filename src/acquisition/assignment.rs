//! Slot to stream mapping owned by the acquisition loop.

use std::collections::BTreeSet;

/// Largest grid the loop will track
pub const MAX_SLOTS: usize = 64;

/// Which URI each slot shows. Indices are always in `0..len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAssignment {
    slots: Vec<Option<String>>,
}

impl SlotAssignment {
    /// A grid of `size` empty slots, clamped to `1..=MAX_SLOTS`
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![None; size.clamp(1, MAX_SLOTS)],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, slot: usize) -> Option<&str> {
        self.slots.get(slot).and_then(|s| s.as_deref())
    }

    /// Assign `uri` to `slot`. Returns false if `slot` is out of range.
    pub fn assign(&mut self, slot: usize, uri: String) -> bool {
        match self.slots.get_mut(slot) {
            Some(entry) => {
                *entry = Some(uri);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }

    /// Grow or shrink to `size` slots (clamped to `1..=MAX_SLOTS`),
    /// dropping assignments past the end
    pub fn resize(&mut self, size: usize) {
        self.slots.resize(size.clamp(1, MAX_SLOTS), None);
    }

    /// Distinct assigned URIs
    pub fn uris(&self) -> BTreeSet<String> {
        self.slots.iter().flatten().cloned().collect()
    }

    /// `(slot, uri)` for every assigned slot
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_deref().map(|uri| (i, uri)))
    }
}
