//! Timed events carried by sequence tracks.
//!
//! Besides note data, tracks carry meta information (name, tempo, time
//! signature) on track 0 and position markers (beats, chord symbols) on the
//! control track.

use serde::{Deserialize, Serialize};

/// The payload of a timed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    /// Note on: pitch, velocity. The channel comes from the owning track.
    NoteOn { pitch: u8, velocity: u8 },

    /// Note off for a previously started pitch.
    NoteOff { pitch: u8 },

    /// Track name (meta event, track 0 carries the song name).
    TrackName(String),

    /// Tempo in beats per minute (meta event).
    Tempo(u32),

    /// Time signature (meta event).
    TimeSignature { numerator: u8, denominator: u8 },

    /// Beat marker for UI position synchronization (control track only).
    Beat { bar: u32, beat: u32 },

    /// Chord symbol marker, e.g. "Cm7" (control track only).
    ChordSymbol(String),
}

impl EventKind {
    /// Sort priority for events sharing a tick: setup/meta events first,
    /// note-ons before note-offs of other notes starting at the same tick.
    pub(crate) fn sort_priority(&self) -> u8 {
        match self {
            EventKind::TrackName(_) => 0,
            EventKind::TimeSignature { .. } => 1,
            EventKind::Tempo(_) => 2,
            EventKind::Beat { .. } => 3,
            EventKind::ChordSymbol(_) => 4,
            EventKind::NoteOn { .. } => 10,
            EventKind::NoteOff { .. } => 11,
        }
    }

    /// Returns true for beat/chord-symbol markers.
    pub fn is_marker(&self) -> bool {
        matches!(self, EventKind::Beat { .. } | EventKind::ChordSymbol(_))
    }
}

/// A timed event at an absolute tick position within a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Absolute tick position.
    pub tick: u32,

    /// The event payload.
    pub kind: EventKind,
}

impl Event {
    /// Creates a new event.
    pub fn new(tick: u32, kind: EventKind) -> Self {
        Self { tick, kind }
    }

    /// Returns a copy shifted forward by `delta` ticks.
    pub fn shifted(&self, delta: u32) -> Self {
        Self {
            tick: self.tick.saturating_add(delta),
            kind: self.kind.clone(),
        }
    }
}
