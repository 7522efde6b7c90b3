//! Shared fixtures for the crate's unit tests.

use crate::engine::{GenerationEngine, GenerationError, StandardControlTrackBuilder};
use crate::midi::{Note, Phrase};
use crate::session::{BaseSession, SessionConfig};
use crate::settings::{MixConsole, PlaybackSettings};
use crate::song::{BarRange, ChordChange, RenderingContext, TimeSignature, Voice, VoiceConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Engine stub: one configurable phrase per voice, optional failure.
pub(crate) struct StubEngine {
    /// Phrases handed out per voice; voices not present get a default riff.
    pub phrases: Mutex<HashMap<Voice, Phrase>>,
    /// When set, every build fails with this error.
    pub fail_with: Option<GenerationError>,
    /// Number of build_phrase calls.
    pub calls: AtomicUsize,
}

impl StubEngine {
    pub fn new() -> Self {
        Self {
            phrases: Mutex::new(HashMap::new()),
            fail_with: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: GenerationError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::new()
        }
    }

    /// Replaces the phrase the engine will hand out for `voice`.
    pub fn set_phrase(&self, voice: Voice, phrase: Phrase) {
        self.phrases.lock().unwrap().insert(voice, phrase);
    }

    pub fn default_phrase() -> Phrase {
        Phrase::from_notes(vec![
            Note::new(48, 100, 0, 480),
            Note::new(50, 90, 480, 480),
        ])
    }
}

impl GenerationEngine for StubEngine {
    fn build_phrase(
        &self,
        _context: &RenderingContext,
        voice: &Voice,
    ) -> Result<Phrase, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        Ok(self
            .phrases
            .lock()
            .unwrap()
            .get(voice)
            .cloned()
            .unwrap_or_else(Self::default_phrase))
    }
}

/// A 4-bar, one-voice 4/4 context with a couple of chord changes.
pub(crate) fn one_voice_context() -> RenderingContext {
    RenderingContext::new(
        "Test Song",
        120,
        TimeSignature::four_four(),
        BarRange::new(0, 4),
    )
    .with_chord(ChordChange::new(0, 0, "C"))
    .with_chord(ChordChange::new(2, 0, "G7"))
    .with_voice(VoiceConfig::new(Voice::new("Bass"), 1, 33))
}

/// Collaborator bundle for constructing sessions in tests.
pub(crate) struct Fixture {
    pub engine: Arc<StubEngine>,
    pub settings: Arc<PlaybackSettings>,
    pub mix: Arc<MixConsole>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            engine: Arc::new(StubEngine::new()),
            settings: Arc::new(PlaybackSettings::new()),
            mix: Arc::new(MixConsole::new()),
        }
    }

    /// Builds a New-state BaseSession over the given context/config.
    pub fn base_session(&self, context: RenderingContext, config: SessionConfig) -> BaseSession {
        BaseSession::new(
            context,
            config,
            self.engine.clone(),
            Arc::new(StandardControlTrackBuilder),
            self.settings.clone(),
            self.mix.clone(),
        )
    }
}
