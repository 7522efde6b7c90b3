//! Playback sessions: the contract, the one-shot generator, the update-aware
//! wrapper, and the session caches.
//!
//! A session turns a [`RenderingContext`](crate::song::RenderingContext) into
//! a [`Sequence`](crate::midi::Sequence) exactly once, then answers read
//! queries for a playback driver. The updatable variant additionally keeps
//! the sequence in sync with fine-grained song edits while it plays, via the
//! double-buffered hot-swap in [`UpdatableSession`].

mod base;
mod cache;
mod classify;
mod track_set;
mod updatable;

pub use base::BaseSession;
pub use cache::{BaseSessionCache, Cacheable, SessionCache, UpdatableSessionCache};
pub use classify::{classify, SongEdit, UpdateOutcome};
pub use track_set::TrackSet;
pub use updatable::{Update, UpdatableSession};

use crate::engine::GenerationError;
use crate::midi::{Event, Sequence};
use crate::settings::LoopCount;
use crate::song::BarRange;
use crossbeam_channel::Receiver;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a session, used in logs and debug output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a new unique session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session.
///
/// `New -> Generated -> Closed`; `Closed` is terminal and reachable from any
/// state. The dirty flag is orthogonal: a Generated session may be marked
/// dirty any number of times without changing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet generated.
    New,
    /// Sequence generated and readable.
    Generated,
    /// Closed; all subscriptions released. Terminal.
    Closed,
}

/// Mute status per track id. Track 0 (meta) is never present.
pub type MuteStatusMap = BTreeMap<usize, bool>;

/// Immutable per-session configuration; part of the cache key.
#[derive(Clone, Default)]
pub struct SessionConfig {
    /// Include the control-marker track.
    pub control_track: bool,

    /// Include the playback click track.
    pub click_track: bool,

    /// Include the lead-in count-off track.
    pub precount_track: bool,

    /// Overrides the global loop-count setting when set.
    pub loop_count: Option<LoopCount>,

    /// Invoked when playback of the sequence completes. The playback
    /// transport driving the sequence calls it; sessions only carry it and
    /// compare it (by pointer) for cache identity.
    pub on_playback_end: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl SessionConfig {
    /// Configuration with every optional track enabled and no overrides.
    pub fn all_tracks() -> Self {
        Self {
            control_track: true,
            click_track: true,
            precount_track: true,
            loop_count: None,
            on_playback_end: None,
        }
    }
}

impl PartialEq for SessionConfig {
    fn eq(&self, other: &Self) -> bool {
        let callbacks_equal = match (&self.on_playback_end, &other.on_playback_end) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        self.control_track == other.control_track
            && self.click_track == other.click_track
            && self.precount_track == other.precount_track
            && self.loop_count == other.loop_count
            && callbacks_equal
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("control_track", &self.control_track)
            .field("click_track", &self.click_track)
            .field("precount_track", &self.precount_track)
            .field("loop_count", &self.loop_count)
            .field(
                "on_playback_end",
                &self.on_playback_end.as_ref().map(|_| "<fn>"),
            )
            .finish()
    }
}

/// Notifications emitted by a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Lifecycle state changed.
    StateChanged(SessionState),
    /// The dirty flag flipped.
    DirtyChanged(bool),
    /// The global tempo factor changed (no regeneration needed).
    TempoFactorChanged(f32),
    /// The track mute map was re-derived.
    MuteStatusChanged(MuteStatusMap),
    /// The effective loop count changed.
    LoopCountChanged(LoopCount),
    /// A live update was applied; carries the swapped original track ids.
    UpdateApplied { tracks: Vec<usize> },
    /// The control-marker track no longer reflects the song and was muted.
    ControlTrackDisabled,
    /// This session permanently stopped accepting live updates.
    UpdateProvisionDisabled,
    /// A recoverable authoring problem was reported by the background path.
    AuthoringProblem(String),
}

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The operation is not valid in the session's current state.
    #[error("operation not valid in session state {0:?}")]
    IllegalState(SessionState),

    /// The generation engine failed; the session stays unusable.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// An update event's tick exceeds the immutable sequence length.
    #[error("event tick {tick} exceeds sequence length {length}")]
    OutOfRange { tick: u32, length: u32 },
}

/// The read/lifecycle contract every playback session honors.
///
/// All read accessors return `None` unless the session is Generated: that is
/// the defined "no meaningful value" sentinel.
pub trait Session {
    /// Unique id of this session.
    fn id(&self) -> SessionId;

    /// Current lifecycle state.
    fn state(&self) -> SessionState;

    /// Whether the generated sequence is no longer trustworthy.
    fn is_dirty(&self) -> bool;

    /// Generates the sequence. Blocking; succeeds exactly once.
    ///
    /// # Errors
    ///
    /// [`SessionError::IllegalState`] unless the session is New;
    /// [`SessionError::Generation`] if the engine fails (state stays New).
    fn generate(&mut self, silent: bool) -> Result<(), SessionError>;

    /// The generated sequence.
    fn sequence(&self) -> Option<&Sequence>;

    /// Mute status per track id, excluding track 0.
    fn tracks_mute_status(&self) -> Option<MuteStatusMap>;

    /// Tick where looped playback restarts (after the count-off).
    fn loop_start_tick(&self) -> Option<u32>;

    /// Tick where looped playback wraps (loop start + context duration).
    fn loop_end_tick(&self) -> Option<u32>;

    /// Effective loop count (config override, else global setting).
    fn loop_count(&self) -> Option<LoopCount>;

    /// Wall-clock duration of one tick at the effective playback tempo
    /// (song tempo scaled by the global tempo factor).
    fn seconds_per_tick(&self) -> Option<f64>;

    /// Tick position of the given song bar, or `None` if outside the range.
    fn bar_tick(&self, bar: u32) -> Option<u32>;

    /// The bar range this session renders.
    fn bar_range(&self) -> Option<BarRange>;

    /// The flat control-marker event list, if a control track exists.
    fn control_events(&self) -> Option<&[Event]>;

    /// Subscribes to session notifications.
    fn subscribe(&self) -> Receiver<SessionEvent>;

    /// Closes the session: releases subscriptions, terminal, idempotent.
    fn close(&mut self);
}
