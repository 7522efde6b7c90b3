//! The song slice handed to a session for rendering.
//!
//! A [`RenderingContext`] is an immutable value describing what to render:
//! the bar range, time signature, chord changes, and the instrument parts
//! (voices) with their channel configuration. Sessions hold it by value but
//! never mutate it; value equality is what session caches key on.

use crate::midi::TICKS_PER_BEAT;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A named instrument part produced by the generation engine
/// (e.g. "Bass", "Drums", "Piano comp").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Voice(String);

impl Voice {
    /// Creates a voice from a part name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the part name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Time signature of the rendered slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Beats per bar.
    pub numerator: u8,

    /// Beat unit as the actual note value (4 = quarter, 8 = eighth).
    pub denominator: u8,
}

impl TimeSignature {
    /// Creates a time signature, clamping both parts to at least 1.
    pub fn new(numerator: u8, denominator: u8) -> Self {
        Self {
            numerator: numerator.max(1),
            denominator: denominator.max(1),
        }
    }

    /// Common 4/4 time.
    pub fn four_four() -> Self {
        Self::new(4, 4)
    }

    /// Returns the number of ticks in one bar.
    ///
    /// For 4/4: 4 × 480 = 1920 ticks; for 6/8: 6 × 240 = 1440 ticks.
    pub fn ticks_per_bar(&self) -> u32 {
        self.ticks_per_beat() * self.numerator as u32
    }

    /// Returns the number of ticks in one beat of this signature.
    pub fn ticks_per_beat(&self) -> u32 {
        TICKS_PER_BEAT * 4 / self.denominator.max(1) as u32
    }
}

/// A half-open range of bars `[start, end)` within the song.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarRange {
    /// First bar (inclusive, 0-indexed within the song).
    pub start: u32,

    /// One past the last bar (exclusive).
    pub end: u32,
}

impl BarRange {
    /// Creates a bar range. `end` must be greater than `start`.
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(end > start, "empty bar range");
        Self { start, end }
    }

    /// Returns the number of bars in the range.
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    /// Returns true if the range spans no bars.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Returns true if `bar` falls inside the range.
    pub fn contains(&self, bar: u32) -> bool {
        bar >= self.start && bar < self.end
    }
}

/// A chord change at a bar/beat position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordChange {
    /// Bar position (0-indexed within the song).
    pub bar: u32,

    /// Beat within the bar (0-indexed).
    pub beat: u32,

    /// Chord symbol, e.g. "Cm7".
    pub symbol: String,
}

impl ChordChange {
    /// Creates a chord change.
    pub fn new(bar: u32, beat: u32, symbol: impl Into<String>) -> Self {
        Self {
            bar,
            beat,
            symbol: symbol.into(),
        }
    }
}

/// Channel/program configuration for one voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// The instrument part.
    pub voice: Voice,

    /// MIDI channel (0-15).
    pub channel: u8,

    /// MIDI program number (0-127).
    pub program: u8,
}

impl VoiceConfig {
    /// Creates a voice configuration.
    pub fn new(voice: Voice, channel: u8, program: u8) -> Self {
        Self {
            voice,
            channel: channel.min(15),
            program: program.min(127),
        }
    }
}

/// The song slice to render: arrangement data, instrument/channel
/// configuration, and the bar range.
///
/// Supports value equality and cloning; callers own it and sessions never
/// mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderingContext {
    /// Song name, written to the meta track.
    pub song_name: String,

    /// Tempo in beats per minute.
    pub tempo_bpm: u32,

    /// Time signature of the slice.
    pub time_signature: TimeSignature,

    /// Bars of the song covered by this context.
    pub bar_range: BarRange,

    /// Chord changes within the bar range.
    pub chords: Vec<ChordChange>,

    /// Instrument parts to render, in track order.
    pub voices: Vec<VoiceConfig>,
}

impl RenderingContext {
    /// Creates a context with no chords or voices.
    pub fn new(
        song_name: impl Into<String>,
        tempo_bpm: u32,
        time_signature: TimeSignature,
        bar_range: BarRange,
    ) -> Self {
        Self {
            song_name: song_name.into(),
            tempo_bpm,
            time_signature,
            bar_range,
            chords: Vec::new(),
            voices: Vec::new(),
        }
    }

    /// Adds a chord change (builder style).
    pub fn with_chord(mut self, chord: ChordChange) -> Self {
        self.chords.push(chord);
        self
    }

    /// Adds a voice configuration (builder style).
    pub fn with_voice(mut self, config: VoiceConfig) -> Self {
        self.voices.push(config);
        self
    }

    /// Returns the number of bars in the slice.
    pub fn bar_count(&self) -> u32 {
        self.bar_range.len()
    }

    /// Returns the slice duration in ticks (no count-off).
    pub fn duration_ticks(&self) -> u32 {
        self.bar_count() * self.time_signature.ticks_per_bar()
    }

    /// Returns the tick position of a bar relative to the slice start, or
    /// `None` if the bar is outside the range.
    pub fn relative_bar_tick(&self, bar: u32) -> Option<u32> {
        if !self.bar_range.contains(bar) {
            return None;
        }
        Some((bar - self.bar_range.start) * self.time_signature.ticks_per_bar())
    }

    /// Returns the configuration for a voice, if the context uses it.
    pub fn voice_config(&self, voice: &Voice) -> Option<&VoiceConfig> {
        self.voices.iter().find(|vc| &vc.voice == voice)
    }

    /// Returns true if the context uses the given voice.
    pub fn uses_voice(&self, voice: &Voice) -> bool {
        self.voice_config(voice).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RenderingContext {
        RenderingContext::new(
            "Blues in F",
            140,
            TimeSignature::four_four(),
            BarRange::new(0, 12),
        )
        .with_chord(ChordChange::new(0, 0, "F7"))
        .with_voice(VoiceConfig::new(Voice::new("Bass"), 1, 33))
    }

    #[test]
    fn test_time_signature_tick_math() {
        assert_eq!(TimeSignature::four_four().ticks_per_bar(), 4 * TICKS_PER_BEAT);
        assert_eq!(TimeSignature::new(3, 4).ticks_per_bar(), 3 * TICKS_PER_BEAT);
        assert_eq!(
            TimeSignature::new(6, 8).ticks_per_bar(),
            6 * TICKS_PER_BEAT / 2
        );
    }

    #[test]
    fn test_time_signature_clamps_zero_parts() {
        let ts = TimeSignature::new(0, 0);
        assert_eq!(ts.numerator, 1);
        assert_eq!(ts.denominator, 1);
        assert_eq!(ts.ticks_per_beat(), 4 * TICKS_PER_BEAT); // whole-note beat
        assert_eq!(ts.ticks_per_bar(), 4 * TICKS_PER_BEAT);
    }

    #[test]
    fn test_value_equality() {
        assert_eq!(context(), context());

        let mut other = context();
        other.bar_range = BarRange::new(0, 16);
        assert_ne!(context(), other);
    }

    #[test]
    fn test_duration_and_bar_ticks() {
        let ctx = context();
        assert_eq!(ctx.bar_count(), 12);
        assert_eq!(ctx.duration_ticks(), 12 * 4 * crate::midi::TICKS_PER_BEAT);
        assert_eq!(ctx.relative_bar_tick(0), Some(0));
        assert_eq!(ctx.relative_bar_tick(2), Some(2 * 4 * 480));
        assert_eq!(ctx.relative_bar_tick(12), None);
    }

    #[test]
    fn test_voice_lookup() {
        let ctx = context();
        assert!(ctx.uses_voice(&Voice::new("Bass")));
        assert!(!ctx.uses_voice(&Voice::new("Horns")));
        assert_eq!(ctx.voice_config(&Voice::new("Bass")).unwrap().channel, 1);
    }

    #[test]
    fn test_serialization_round_trip() {
        let ctx = context();
        let json = serde_json::to_string(&ctx).unwrap();
        let loaded: RenderingContext = serde_json::from_str(&json).unwrap();
        assert_eq!(ctx, loaded);
    }
}
