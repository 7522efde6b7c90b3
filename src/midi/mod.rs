//! MIDI-like data structures for rendered playback sequences.
//!
//! This module provides the core types for representing timed events, phrases,
//! tracks, and the assembled sequence a playback driver consumes. Tick-based
//! timing is used throughout for precise positioning; wall-clock conversion
//! lives on the session surface, where the effective tempo is known.

mod event;
mod export;
mod phrase;
mod sequence;
mod track;

pub use event::{Event, EventKind};
pub use export::{export_to_midi, write_smf};
pub use phrase::{Note, Phrase};
pub use sequence::Sequence;
pub use track::Track;

/// Ticks per quarter-note beat; the fixed resolution of all sequence timing.
pub const TICKS_PER_BEAT: u32 = 480;
