//! Active/buffer track-pair bookkeeping for the hot-swap engine.
//!
//! Each registered track maps to a pair of sequence track ids; exactly one of
//! the pair is active (audible) at any time, the other is the silent, writable
//! buffer. `swap` exchanges the roles atomically from the reader's point of
//! view: the pair record is replaced in one map update, so a lookup never
//! observes a half-updated mapping.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TrackPair {
    active: usize,
    buffer: usize,
}

/// Bookkeeping of `original id -> {active id, buffer id}` pairs.
#[derive(Debug, Clone, Default)]
pub struct TrackSet {
    pairs: HashMap<usize, TrackPair>,
}

impl TrackSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pair: `original_id` starts as the active half,
    /// `buffer_id` as the buffer half.
    pub fn add_track(&mut self, original_id: usize, buffer_id: usize) {
        self.pairs.insert(
            original_id,
            TrackPair {
                active: original_id,
                buffer: buffer_id,
            },
        );
    }

    /// Exchanges the active and buffer roles for a pair.
    /// Unknown ids are ignored.
    pub fn swap(&mut self, original_id: usize) {
        if let Some(pair) = self.pairs.get_mut(&original_id) {
            *pair = TrackPair {
                active: pair.buffer,
                buffer: pair.active,
            };
        }
    }

    /// Returns the currently active (audible) track id of a pair.
    pub fn active_id(&self, original_id: usize) -> Option<usize> {
        self.pairs.get(&original_id).map(|p| p.active)
    }

    /// Returns the current buffer (silent, writable) track id of a pair.
    pub fn buffer_id(&self, original_id: usize) -> Option<usize> {
        self.pairs.get(&original_id).map(|p| p.buffer)
    }

    /// Returns the number of registered pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns true if no pairs are registered.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterates over the registered original ids.
    pub fn original_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.pairs.keys().copied()
    }
}
