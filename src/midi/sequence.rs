//! The assembled playback sequence.
//!
//! Track 0 is reserved for meta events (song name, tempo, time signature).
//! Tracks 1..N carry the generated voices; trailing optional tracks carry
//! control markers, the playback click, and the count-off, in that fixed
//! order. Track ids are plain indices into the track list — tracks are never
//! removed, only appended or muted, so indices are stable for the lifetime of
//! a session.

use super::Track;
use serde::{Deserialize, Serialize};

/// An ordered collection of tracks forming one rendered playback unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    tracks: Vec<Track>,
}

impl Sequence {
    /// Creates an empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a track and returns its id (index).
    pub fn add_track(&mut self, track: Track) -> usize {
        self.tracks.push(track);
        self.tracks.len() - 1
    }

    /// Returns a reference to a track by id.
    pub fn track(&self, id: usize) -> Option<&Track> {
        self.tracks.get(id)
    }

    /// Returns a mutable reference to a track by id.
    pub fn track_mut(&mut self, id: usize) -> Option<&mut Track> {
        self.tracks.get_mut(id)
    }

    /// Returns all tracks.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Returns the number of tracks.
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Returns the total length in ticks (maximum end tick across tracks).
    pub fn length_ticks(&self) -> u32 {
        self.tracks.iter().map(|t| t.end_tick()).max().unwrap_or(0)
    }

    /// Forces every track's end tick to `length`.
    pub fn set_length(&mut self, length: u32) {
        for track in &mut self.tracks {
            track.set_end_tick(length);
        }
    }

    /// Shifts every track's events and end tick forward by `delta` ticks.
    pub fn shift_all(&mut self, delta: u32) {
        for track in &mut self.tracks {
            track.shift(delta);
        }
    }
}
