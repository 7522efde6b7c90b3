//! Sequence track representation.
//!
//! A track is a tick-sorted collection of events on one MIDI channel, with a
//! mute flag read by the playback driver and an explicit end-of-data tick.
//! The end tick is deliberately independent of the last event: the hot-swap
//! path forces it so a rewritten track can never change the sequence length.

use super::Event;
use serde::{Deserialize, Serialize};

/// A single track of the rendered sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Human-readable name for the track.
    pub name: String,

    /// MIDI channel (0-15). Channel 9 is reserved for drums in General MIDI.
    pub channel: u8,

    /// Whether this track is muted (not played during playback).
    pub muted: bool,

    /// Collection of events, sorted by tick.
    events: Vec<Event>,

    /// Explicit end-of-data position in ticks.
    end_tick: u32,
}

impl Track {
    /// Creates a new empty, audible track.
    pub fn new(name: impl Into<String>, channel: u8) -> Self {
        Self {
            name: name.into(),
            channel: channel.min(15),
            muted: false,
            events: Vec::new(),
            end_tick: 0,
        }
    }

    /// Creates a silent buffer twin of this track: same name, channel and end
    /// tick, no events, muted.
    pub fn buffer_twin(&self) -> Self {
        Self {
            name: format!("{} (buffer)", self.name),
            channel: self.channel,
            muted: true,
            events: Vec::new(),
            end_tick: self.end_tick,
        }
    }

    /// Adds an event, maintaining sorted order by tick.
    pub fn push_event(&mut self, event: Event) {
        // Binary search insertion keeps events sorted; equal ticks keep
        // insertion order, which preserves the caller's event ordering.
        let pos = self.events.partition_point(|e| e.tick <= event.tick);
        self.end_tick = self.end_tick.max(event.tick);
        self.events.insert(pos, event);
    }

    /// Adds events in bulk.
    pub fn extend_events(&mut self, events: impl IntoIterator<Item = Event>) {
        for e in events {
            self.push_event(e);
        }
    }

    /// Returns all events, sorted by tick.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Removes all events. The end tick is left untouched.
    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Returns the number of events.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Returns the end-of-data tick.
    pub fn end_tick(&self) -> u32 {
        self.end_tick
    }

    /// Forces the end-of-data tick, regardless of event content.
    pub fn set_end_tick(&mut self, tick: u32) {
        self.end_tick = tick;
    }

    /// Shifts every event and the end tick forward by `delta` ticks.
    pub fn shift(&mut self, delta: u32) {
        for event in &mut self.events {
            event.tick = event.tick.saturating_add(delta);
        }
        self.end_tick = self.end_tick.saturating_add(delta);
    }
}
