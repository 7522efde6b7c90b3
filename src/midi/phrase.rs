//! Generated note material for a single voice.
//!
//! A phrase is the unit of exchange with the generation engine: an ordered
//! collection of timed notes for one instrument part. Phrases use ticks
//! relative to the start of the rendered song slice; the session shifts them
//! when a count-off is present.

use super::{Event, EventKind};
use serde::{Deserialize, Serialize};

/// A single note with timing and dynamics.
///
/// Unlike an editor-facing note there is no identity: two notes with the same
/// pitch, velocity and timing are the same note, which is what makes phrase
/// equivalence checks meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// MIDI note number (0-127). 60 = Middle C (C4).
    pub pitch: u8,

    /// Note velocity (0-127). 0 is silent, 127 is maximum.
    pub velocity: u8,

    /// Start time in ticks from the beginning of the phrase.
    pub start_tick: u32,

    /// Duration in ticks.
    pub duration_ticks: u32,
}

impl Note {
    /// Creates a new note, clamping pitch and velocity to the MIDI range.
    pub fn new(pitch: u8, velocity: u8, start_tick: u32, duration_ticks: u32) -> Self {
        Self {
            pitch: pitch.min(127),
            velocity: velocity.min(127),
            start_tick,
            duration_ticks,
        }
    }

    /// Returns the end tick of this note (start + duration).
    pub fn end_tick(&self) -> u32 {
        self.start_tick.saturating_add(self.duration_ticks)
    }
}

/// An ordered collection of notes for one voice.
///
/// Notes are kept sorted by start tick for efficient conversion into track
/// events. Content equality (`PartialEq`) is the phrase-equivalence test used
/// by the hot-swap path to skip tracks that did not actually change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phrase {
    notes: Vec<Note>,
}

impl Phrase {
    /// Creates an empty phrase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a phrase from notes in any order.
    pub fn from_notes(mut notes: Vec<Note>) -> Self {
        notes.sort_by_key(|n| n.start_tick);
        Self { notes }
    }

    /// Adds a note, maintaining sorted order by start tick.
    pub fn add_note(&mut self, note: Note) {
        // Binary search insertion keeps the vec sorted for O(log n) inserts.
        let pos = self
            .notes
            .binary_search_by_key(&note.start_tick, |n| n.start_tick)
            .unwrap_or_else(|pos| pos);
        self.notes.insert(pos, note);
    }

    /// Returns all notes, sorted by start tick.
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Returns true if the phrase contains no notes.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Returns the number of notes.
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Returns the end tick of the last-sounding note.
    pub fn duration_ticks(&self) -> u32 {
        self.notes.iter().map(|n| n.end_tick()).max().unwrap_or(0)
    }

    /// Converts the phrase into note-on/note-off events, shifted by `offset`.
    ///
    /// Note-offs at the same tick as a note-on of another note sort after it,
    /// matching the ordering the SMF writer expects.
    pub fn to_events(&self, offset: u32) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.notes.len() * 2);
        for note in &self.notes {
            events.push(Event::new(
                note.start_tick + offset,
                EventKind::NoteOn {
                    pitch: note.pitch,
                    velocity: note.velocity,
                },
            ));
            events.push(Event::new(
                note.end_tick() + offset,
                EventKind::NoteOff { pitch: note.pitch },
            ));
        }
        events.sort_by_key(|e| (e.tick, e.kind.sort_priority()));
        events
    }
}
