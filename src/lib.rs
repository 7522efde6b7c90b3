//! Live-updatable playback sessions for rendered song arrangements.
//!
//! `backline` turns an immutable song slice ([`song::RenderingContext`]) into
//! a MIDI-like event [`midi::Sequence`] through a playback [`session::Session`],
//! and — while that sequence plays — keeps it in sync with fine-grained song
//! edits without audible interruption.
//!
//! The moving parts:
//!
//! - [`midi`] — the sequence data model (notes, events, tracks) and a
//!   Standard MIDI File exporter.
//! - [`song`] — the rendering context: bar range, chords, voices.
//! - [`engine`] — contracts for the music-generation collaborators and the
//!   debounced background regeneration worker.
//! - [`session`] — the session state machine ([`session::BaseSession`]), the
//!   hot-swapping [`session::UpdatableSession`], edit classification, and the
//!   find-or-create session caches.
//! - [`settings`] / [`notify`] — observable playback settings, mix state, and
//!   the typed notification hub they are built on.
//!
//! Edits are classified ([`session::classify`]) into one of four outcomes:
//! irrelevant, incremental (regenerate some voices in the background and swap
//! the result in), dirty-only, or update-breaking. Incremental updates go
//! through per-track silent buffer twins, so the playback driver never reads
//! a track mid-rewrite and the sequence tick length never changes.

pub mod engine;
pub mod midi;
pub mod notify;
pub mod session;
pub mod settings;
pub mod song;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{ControlTrackBuilder, GenerationEngine, GenerationError};
pub use session::{
    BaseSession, BaseSessionCache, Session, SessionConfig, SessionError, SessionEvent, SessionId,
    SessionState, UpdatableSession, UpdatableSessionCache,
};
pub use song::RenderingContext;
