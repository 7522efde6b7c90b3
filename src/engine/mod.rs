//! Contracts for the external music-generation collaborators.
//!
//! The session subsystem never generates notes itself: it asks a
//! [`GenerationEngine`] for per-voice phrases and a [`ControlTrackBuilder`]
//! for beat/chord marker events, then assembles and maintains the sequence.

mod worker;

pub use worker::{RegenerationRequest, RegenerationResult, RegenerationWorker, WorkerConfig};

use crate::midi::{Event, EventKind, Phrase};
use crate::song::{RenderingContext, Voice};
use rayon::prelude::*;
use std::collections::HashMap;
use thiserror::Error;

/// Failure of the generation engine.
///
/// `UserAuthoring` is the recoverable subtype: the user wrote something the
/// engine cannot render (e.g. an unparseable chord symbol) and can fix it
/// without discarding the session's update machinery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// The engine could not produce phrases.
    #[error("music generation failed: {0}")]
    Engine(String),

    /// A recoverable authoring mistake, reported to the user.
    #[error("authoring problem: {0}")]
    UserAuthoring(String),
}

impl GenerationError {
    /// Returns true for the recoverable authoring subtype.
    pub fn is_user_authoring(&self) -> bool {
        matches!(self, GenerationError::UserAuthoring(_))
    }
}

/// Turns chord/rhythm data into per-voice note phrases.
///
/// Implementations may take noticeable time in [`build_all`]; callers are
/// expected to block (typically behind a progress indicator).
///
/// [`build_all`]: GenerationEngine::build_all
pub trait GenerationEngine: Send + Sync {
    /// Generates the phrase for a single voice of the context.
    ///
    /// Phrase ticks are relative to the start of the context's bar range.
    fn build_phrase(
        &self,
        context: &RenderingContext,
        voice: &Voice,
    ) -> Result<Phrase, GenerationError>;

    /// Generates phrases for every voice of the context.
    ///
    /// `silent` suppresses user-facing progress reporting in engines that
    /// have any. The default implementation fans out over the voices in
    /// parallel.
    fn build_all(
        &self,
        context: &RenderingContext,
        _silent: bool,
    ) -> Result<HashMap<Voice, Phrase>, GenerationError> {
        context
            .voices
            .par_iter()
            .map(|vc| {
                self.build_phrase(context, &vc.voice)
                    .map(|p| (vc.voice.clone(), p))
            })
            .collect()
    }
}

/// Fills the control-marker track from a context.
///
/// The events are exposed as a flat list so the hot-swap path can rebuild
/// the control track without regenerating any music.
pub trait ControlTrackBuilder: Send + Sync {
    /// Builds beat and chord-symbol marker events, with ticks relative to
    /// the start of the context's bar range.
    fn build_events(&self, context: &RenderingContext) -> Vec<Event>;
}

/// Default control-track builder: one beat marker per beat of the bar range
/// plus one chord-symbol marker per chord change.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardControlTrackBuilder;

impl ControlTrackBuilder for StandardControlTrackBuilder {
    fn build_events(&self, context: &RenderingContext) -> Vec<Event> {
        let ts = context.time_signature;
        let mut events = Vec::new();

        for bar in context.bar_range.start..context.bar_range.end {
            let bar_tick = (bar - context.bar_range.start) * ts.ticks_per_bar();
            for beat in 0..ts.numerator as u32 {
                events.push(Event::new(
                    bar_tick + beat * ts.ticks_per_beat(),
                    EventKind::Beat { bar, beat },
                ));
            }
        }

        for chord in &context.chords {
            if !context.bar_range.contains(chord.bar) {
                continue;
            }
            let tick = (chord.bar - context.bar_range.start) * ts.ticks_per_bar()
                + chord.beat * ts.ticks_per_beat();
            events.push(Event::new(tick, EventKind::ChordSymbol(chord.symbol.clone())));
        }

        events.sort_by_key(|e| (e.tick, e.kind.sort_priority()));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::{BarRange, ChordChange, TimeSignature, VoiceConfig};

    #[test]
    fn test_standard_control_builder_beats_and_chords() {
        let ctx = RenderingContext::new(
            "Test",
            120,
            TimeSignature::four_four(),
            BarRange::new(4, 6),
        )
        .with_chord(ChordChange::new(4, 0, "C"))
        .with_chord(ChordChange::new(99, 0, "ignored")); // outside the range

        let events = StandardControlTrackBuilder.build_events(&ctx);
        let beats = events.iter().filter(|e| matches!(e.kind, EventKind::Beat { .. }));
        let chords: Vec<_> = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::ChordSymbol(_)))
            .collect();

        assert_eq!(beats.count(), 8); // 2 bars of 4/4
        assert_eq!(chords.len(), 1);
        assert_eq!(chords[0].tick, 0); // bar 4 is the slice start

        // Second bar's downbeat sits one bar in.
        assert!(events
            .iter()
            .any(|e| e.tick == 1920 && e.kind == EventKind::Beat { bar: 5, beat: 0 }));
    }

    struct OneNoteEngine;

    impl GenerationEngine for OneNoteEngine {
        fn build_phrase(
            &self,
            _context: &RenderingContext,
            _voice: &Voice,
        ) -> Result<Phrase, GenerationError> {
            Ok(Phrase::from_notes(vec![crate::midi::Note::new(
                60, 100, 0, 480,
            )]))
        }
    }

    #[test]
    fn test_default_build_all_covers_every_voice() {
        let ctx = RenderingContext::new(
            "Test",
            120,
            TimeSignature::four_four(),
            BarRange::new(0, 4),
        )
        .with_voice(VoiceConfig::new(Voice::new("Bass"), 1, 33))
        .with_voice(VoiceConfig::new(Voice::new("Drums"), 9, 0));

        let phrases = OneNoteEngine.build_all(&ctx, true).unwrap();
        assert_eq!(phrases.len(), 2);
        assert!(phrases.contains_key(&Voice::new("Bass")));
        assert!(phrases.contains_key(&Voice::new("Drums")));
    }
}
