//! One-shot session: renders a context into a sequence exactly once.

use super::{
    MuteStatusMap, Session, SessionConfig, SessionError, SessionEvent, SessionId, SessionState,
    TrackSet,
};
use crate::engine::{ControlTrackBuilder, GenerationEngine};
use crate::midi::{Event, EventKind, Phrase, Sequence, Track};
use crate::notify::EventHub;
use crate::settings::{LoopCount, MixChange, MixConsole, PlaybackSettings, SettingsChange};
use crate::song::{BarRange, RenderingContext, TimeSignature, Voice};
use crossbeam_channel::Receiver;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A playback session generating its sequence in a single blocking pass.
///
/// Holds the rendering context and configuration from construction, builds
/// the sequence on [`generate`], then only reacts to the three non-structural
/// external signals (tempo factor, per-voice mute, click/loop-count) without
/// ever regenerating. Structural invalidation is the caller's business: mark
/// the session dirty and replace it via [`fresh_copy`].
///
/// [`generate`]: Session::generate
/// [`fresh_copy`]: BaseSession::fresh_copy
pub struct BaseSession {
    id: SessionId,
    state: SessionState,
    dirty: bool,

    context: RenderingContext,
    config: SessionConfig,

    engine: Arc<dyn GenerationEngine>,
    control_builder: Arc<dyn ControlTrackBuilder>,
    settings: Arc<PlaybackSettings>,
    mix: Arc<MixConsole>,

    sequence: Option<Sequence>,
    phrases: HashMap<Voice, Phrase>,
    voice_tracks: HashMap<Voice, usize>,
    control_track: Option<usize>,
    click_track: Option<usize>,
    precount_track: Option<usize>,
    control_events: Vec<Event>,
    control_muted: bool,
    loop_start: u32,
    loop_end: u32,

    hub: EventHub<SessionEvent>,
    settings_rx: Option<Receiver<SettingsChange>>,
    mix_rx: Option<Receiver<MixChange>>,
}

impl BaseSession {
    /// Creates a New-state session. Nothing is generated yet.
    pub fn new(
        context: RenderingContext,
        config: SessionConfig,
        engine: Arc<dyn GenerationEngine>,
        control_builder: Arc<dyn ControlTrackBuilder>,
        settings: Arc<PlaybackSettings>,
        mix: Arc<MixConsole>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            state: SessionState::New,
            dirty: false,
            context,
            config,
            engine,
            control_builder,
            settings,
            mix,
            sequence: None,
            phrases: HashMap::new(),
            voice_tracks: HashMap::new(),
            control_track: None,
            click_track: None,
            precount_track: None,
            control_events: Vec::new(),
            control_muted: false,
            loop_start: 0,
            loop_end: 0,
            hub: EventHub::new(),
            settings_rx: None,
            mix_rx: None,
        }
    }

    /// The rendering context this session was created for.
    pub fn context(&self) -> &RenderingContext {
        &self.context
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of tracks in the generated sequence (0 before generation).
    pub fn nb_playing_tracks(&self) -> usize {
        self.sequence
            .as_ref()
            .map(|s| s.track_count())
            .unwrap_or(0)
    }

    /// Marks the session dirty: the sequence no longer matches its source
    /// data and should eventually be replaced. Only meaningful once
    /// Generated; repeated calls are fine.
    pub fn mark_dirty(&mut self) {
        if self.state != SessionState::Generated || self.dirty {
            return;
        }
        self.dirty = true;
        debug!(session = %self.id, "session marked dirty");
        self.hub.emit(SessionEvent::DirtyChanged(true));
    }

    /// Returns a pristine New-state session configured like this one,
    /// optionally over a different context.
    ///
    /// The copy never inherits the dirty flag or any subscriptions.
    pub fn fresh_copy(&self, context: Option<RenderingContext>) -> BaseSession {
        BaseSession::new(
            context.unwrap_or_else(|| self.context.clone()),
            self.config.clone(),
            self.engine.clone(),
            self.control_builder.clone(),
            self.settings.clone(),
            self.mix.clone(),
        )
    }

    /// Drains queued external-signal notifications and reacts: re-derives
    /// the mute map or re-fires tempo/loop events. Never regenerates.
    pub fn process_external_changes(&mut self) {
        self.drain_external(None);
    }

    pub(crate) fn drain_external(&mut self, routes: Option<&TrackSet>) {
        if self.state != SessionState::Generated {
            return;
        }

        let mut refresh_mutes = false;

        if let Some(rx) = &self.settings_rx {
            let changes: Vec<_> = rx.try_iter().collect();
            for change in changes {
                match change {
                    SettingsChange::TempoFactor(factor) => {
                        self.hub.emit(SessionEvent::TempoFactorChanged(factor));
                    }
                    SettingsChange::ClickEnabled(_) => refresh_mutes = true,
                    SettingsChange::LoopCount(count) => {
                        // A config override shadows the global setting.
                        if self.config.loop_count.is_none() {
                            self.hub.emit(SessionEvent::LoopCountChanged(count));
                        }
                    }
                    // Resolved at the next generation; nothing to re-derive.
                    SettingsChange::ClickTimbre | SettingsChange::PrecountTiming => {}
                }
            }
        }

        if let Some(rx) = &self.mix_rx {
            let changes: Vec<_> = rx.try_iter().collect();
            for MixChange::VoiceMute(voice, muted) in changes {
                if self.voice_tracks.contains_key(&voice) {
                    debug!(session = %self.id, %voice, muted, "voice mute changed");
                    refresh_mutes = true;
                }
            }
        }

        if refresh_mutes {
            let map = self.rebuild_mute_status(routes);
            self.hub.emit(SessionEvent::MuteStatusChanged(map));
        }
    }

    /// Re-derives every track's mute flag from the current settings/mix and
    /// returns the resulting map. With `routes`, the flag lands on the active
    /// half of each pair while the buffer half stays muted.
    pub(crate) fn rebuild_mute_status(&mut self, routes: Option<&TrackSet>) -> MuteStatusMap {
        let click_on = self.settings.click_enabled();
        let mut desired: Vec<(usize, bool)> = Vec::new();

        for (voice, &track_id) in &self.voice_tracks {
            desired.push((track_id, self.mix.is_muted(voice)));
        }
        if let Some(id) = self.control_track {
            desired.push((id, self.control_muted));
        }
        if let Some(id) = self.click_track {
            desired.push((id, !click_on));
        }
        if let Some(id) = self.precount_track {
            desired.push((id, !click_on));
        }

        if let Some(sequence) = self.sequence.as_mut() {
            for (original_id, muted) in desired {
                let pair = routes.and_then(|set| {
                    Some((set.active_id(original_id)?, set.buffer_id(original_id)?))
                });
                if let Some((active, buffer)) = pair {
                    // Flag lands on the active half; the buffer stays silent.
                    if let Some(track) = sequence.track_mut(active) {
                        track.muted = muted;
                    }
                    if let Some(track) = sequence.track_mut(buffer) {
                        track.muted = true;
                    }
                } else if let Some(track) = sequence.track_mut(original_id) {
                    track.muted = muted;
                }
            }
        }

        self.mute_map_from_sequence()
    }

    fn mute_map_from_sequence(&self) -> MuteStatusMap {
        let mut map = MuteStatusMap::new();
        if let Some(sequence) = &self.sequence {
            for (id, track) in sequence.tracks().iter().enumerate().skip(1) {
                map.insert(id, track.muted);
            }
        }
        map
    }

    fn assemble_sequence(&mut self, phrases: HashMap<Voice, Phrase>) {
        let ts = self.context.time_signature;
        let length = self.context.duration_ticks();
        let mut sequence = Sequence::new();

        // Track 0: meta events.
        let mut meta = Track::new(self.context.song_name.clone(), 0);
        meta.push_event(Event::new(
            0,
            EventKind::TrackName(self.context.song_name.clone()),
        ));
        meta.push_event(Event::new(
            0,
            EventKind::TimeSignature {
                numerator: ts.numerator,
                denominator: ts.denominator,
            },
        ));
        meta.push_event(Event::new(0, EventKind::Tempo(self.context.tempo_bpm)));
        sequence.add_track(meta);

        // Tracks 1..N: one per voice actually used, in context order.
        for vc in &self.context.voices {
            let Some(phrase) = phrases.get(&vc.voice) else {
                continue;
            };
            let mut track = Track::new(vc.voice.name(), vc.channel);
            track.extend_events(phrase.to_events(0));
            let id = sequence.add_track(track);
            self.voice_tracks.insert(vc.voice.clone(), id);
        }
        self.phrases = phrases;

        // Optional control-marker track.
        if self.config.control_track {
            self.control_events = self.control_builder.build_events(&self.context);
            let mut track = Track::new("Control", 0);
            track.extend_events(self.control_events.iter().cloned());
            self.control_track = Some(sequence.add_track(track));
        }

        // Optional playback click track.
        if self.config.click_track {
            let mut track = Track::new("Click", 9);
            track.extend_events(self.click_events(ts, self.context.bar_count()));
            self.click_track = Some(sequence.add_track(track));
        }

        sequence.set_length(length);

        // Count-off goes last: inserting it shifts every other track.
        self.loop_start = 0;
        let precount_bars = self.settings.precount_bars();
        if self.config.precount_track && precount_bars > 0 {
            let precount_ticks = precount_bars as u32 * ts.ticks_per_bar();
            sequence.shift_all(precount_ticks);

            let mut track = Track::new("Count-off", 9);
            track.extend_events(self.click_events(ts, precount_bars as u32));
            self.precount_track = Some(sequence.add_track(track));

            self.loop_start = precount_ticks;
        }

        sequence.set_length(self.loop_start + length);
        self.loop_end = self.loop_start + length;
        self.sequence = Some(sequence);
    }

    /// Click hits on every beat, accented on the downbeat.
    fn click_events(&self, ts: TimeSignature, bars: u32) -> Vec<Event> {
        let pitch = self.settings.click_pitch();
        let velocity = self.settings.click_velocity();
        let mut events = Vec::new();
        for bar in 0..bars {
            for beat in 0..ts.numerator as u32 {
                let tick = bar * ts.ticks_per_bar() + beat * ts.ticks_per_beat();
                let v = if beat == 0 {
                    velocity.saturating_add(15).min(127)
                } else {
                    velocity
                };
                events.push(Event::new(tick, EventKind::NoteOn { pitch, velocity: v }));
                events.push(Event::new(
                    tick + ts.ticks_per_beat() / 2,
                    EventKind::NoteOff { pitch },
                ));
            }
        }
        events
    }

    // Internal accessors for the updatable wrapper.

    pub(crate) fn sequence_mut(&mut self) -> Option<&mut Sequence> {
        self.sequence.as_mut()
    }

    pub(crate) fn voice_track(&self, voice: &Voice) -> Option<usize> {
        self.voice_tracks.get(voice).copied()
    }

    pub(crate) fn phrase(&self, voice: &Voice) -> Option<&Phrase> {
        self.phrases.get(voice)
    }

    pub(crate) fn store_phrase(&mut self, voice: Voice, phrase: Phrase) {
        self.phrases.insert(voice, phrase);
    }

    pub(crate) fn control_track_id(&self) -> Option<usize> {
        self.control_track
    }

    pub(crate) fn set_control_events(&mut self, events: Vec<Event>) {
        self.control_events = events;
    }

    pub(crate) fn set_control_muted(&mut self, muted: bool) {
        self.control_muted = muted;
    }

    pub(crate) fn precount_offset(&self) -> u32 {
        self.loop_start
    }

    pub(crate) fn engine_handle(&self) -> Arc<dyn GenerationEngine> {
        self.engine.clone()
    }

    pub(crate) fn control_builder_handle(&self) -> Arc<dyn ControlTrackBuilder> {
        self.control_builder.clone()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        self.hub.emit(event);
    }
}

impl Session for BaseSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn generate(&mut self, silent: bool) -> Result<(), SessionError> {
        if self.state != SessionState::New {
            return Err(SessionError::IllegalState(self.state));
        }

        info!(session = %self.id, song = %self.context.song_name, "generating sequence");
        let phrases = match self.engine.build_all(&self.context, silent) {
            Ok(phrases) => phrases,
            Err(e) => {
                // State stays New: the session is unusable and must be
                // discarded by the caller.
                warn!(session = %self.id, error = %e, "generation failed");
                return Err(e.into());
            }
        };

        self.assemble_sequence(phrases);
        self.rebuild_mute_status(None);

        // The three non-structural external signals this session reacts to.
        self.settings_rx = Some(self.settings.subscribe());
        self.mix_rx = Some(self.mix.subscribe());

        self.state = SessionState::Generated;
        self.hub.emit(SessionEvent::StateChanged(self.state));
        debug!(
            session = %self.id,
            tracks = self.sequence.as_ref().map(|s| s.track_count()).unwrap_or(0),
            loop_start = self.loop_start,
            loop_end = self.loop_end,
            "sequence generated"
        );
        Ok(())
    }

    fn sequence(&self) -> Option<&Sequence> {
        if self.state != SessionState::Generated {
            return None;
        }
        self.sequence.as_ref()
    }

    fn tracks_mute_status(&self) -> Option<MuteStatusMap> {
        if self.state != SessionState::Generated {
            return None;
        }
        Some(self.mute_map_from_sequence())
    }

    fn loop_start_tick(&self) -> Option<u32> {
        (self.state == SessionState::Generated).then_some(self.loop_start)
    }

    fn loop_end_tick(&self) -> Option<u32> {
        (self.state == SessionState::Generated).then_some(self.loop_end)
    }

    fn loop_count(&self) -> Option<LoopCount> {
        if self.state != SessionState::Generated {
            return None;
        }
        Some(self.config.loop_count.unwrap_or_else(|| self.settings.loop_count()))
    }

    fn seconds_per_tick(&self) -> Option<f64> {
        if self.state != SessionState::Generated {
            return None;
        }
        let bpm = self.context.tempo_bpm.max(1) as f64 * self.settings.tempo_factor() as f64;
        Some(60.0 / (bpm * crate::midi::TICKS_PER_BEAT as f64))
    }

    fn bar_tick(&self, bar: u32) -> Option<u32> {
        if self.state != SessionState::Generated {
            return None;
        }
        self.context
            .relative_bar_tick(bar)
            .map(|t| t + self.loop_start)
    }

    fn bar_range(&self) -> Option<BarRange> {
        (self.state == SessionState::Generated).then_some(self.context.bar_range)
    }

    fn control_events(&self) -> Option<&[Event]> {
        if self.state != SessionState::Generated || self.control_track.is_none() {
            return None;
        }
        Some(&self.control_events)
    }

    fn subscribe(&self) -> Receiver<SessionEvent> {
        self.hub.subscribe()
    }

    fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        info!(session = %self.id, "closing session");
        self.state = SessionState::Closed;
        self.hub.emit(SessionEvent::StateChanged(self.state));
        self.hub.clear();
        self.settings_rx = None;
        self.mix_rx = None;
        self.sequence = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::GenerationError;
    use crate::midi::TICKS_PER_BEAT;
    use crate::testing::{one_voice_context, Fixture, StubEngine};

    #[test]
    fn test_state_machine_and_single_generate() {
        let fixture = Fixture::new();
        let mut session = fixture.base_session(one_voice_context(), SessionConfig::all_tracks());
        assert_eq!(session.state(), SessionState::New);
        assert!(session.sequence().is_none());
        assert!(session.tracks_mute_status().is_none());
        assert!(session.bar_range().is_none());

        session.generate(true).unwrap();
        assert_eq!(session.state(), SessionState::Generated);

        let err = session.generate(true).unwrap_err();
        assert!(matches!(
            err,
            SessionError::IllegalState(SessionState::Generated)
        ));
    }

    #[test]
    fn test_track_layout_one_voice_all_optional_tracks() {
        let fixture = Fixture::new();
        let mut session = fixture.base_session(one_voice_context(), SessionConfig::all_tracks());
        session.generate(true).unwrap();

        // meta + voice + control + click + count-off
        let sequence = session.sequence().unwrap();
        assert_eq!(sequence.track_count(), 5);
        assert_eq!(session.nb_playing_tracks(), 5);
        assert_eq!(session.bar_range(), Some(one_voice_context().bar_range));
    }

    #[test]
    fn test_loop_ticks_with_count_off() {
        let fixture = Fixture::new();
        fixture.settings.set_precount_bars(1);
        let mut session = fixture.base_session(one_voice_context(), SessionConfig::all_tracks());
        session.generate(true).unwrap();

        let bar_ticks = 4 * TICKS_PER_BEAT;
        assert_eq!(session.loop_start_tick(), Some(bar_ticks));
        assert_eq!(
            session.loop_end_tick().unwrap() - session.loop_start_tick().unwrap(),
            4 * bar_ticks // 4 bars x 4 beats x resolution
        );
        assert_eq!(session.bar_tick(0), Some(bar_ticks));
        assert_eq!(session.bar_tick(1), Some(2 * bar_ticks));
        assert_eq!(session.bar_tick(99), None);
    }

    #[test]
    fn test_mute_map_excludes_meta_and_is_stable() {
        let fixture = Fixture::new();
        let mut session = fixture.base_session(one_voice_context(), SessionConfig::all_tracks());
        session.generate(true).unwrap();

        let map = session.tracks_mute_status().unwrap();
        assert!(!map.contains_key(&0));
        assert_eq!(map.len(), 4);
        assert_eq!(map.get(&1), Some(&false)); // voice audible
        assert_eq!(map.get(&2), Some(&false)); // control never muted
        assert_eq!(session.tracks_mute_status().unwrap(), map);
    }

    #[test]
    fn test_voice_mute_change_rederives_map_without_regenerating() {
        let fixture = Fixture::new();
        let mut session = fixture.base_session(one_voice_context(), SessionConfig::all_tracks());
        session.generate(true).unwrap();
        let rx = session.subscribe();
        let calls_after_generate = fixture.engine.calls.load(std::sync::atomic::Ordering::SeqCst);

        fixture.mix.set_muted(crate::song::Voice::new("Bass"), true);
        session.process_external_changes();

        let map = session.tracks_mute_status().unwrap();
        assert_eq!(map.get(&1), Some(&true));
        assert!(rx
            .try_iter()
            .any(|e| matches!(e, SessionEvent::MuteStatusChanged(_))));
        assert_eq!(
            fixture.engine.calls.load(std::sync::atomic::Ordering::SeqCst),
            calls_after_generate
        );
    }

    #[test]
    fn test_click_toggle_mutes_click_and_count_off_tracks() {
        let fixture = Fixture::new();
        let mut session = fixture.base_session(one_voice_context(), SessionConfig::all_tracks());
        session.generate(true).unwrap();

        fixture.settings.set_click_enabled(false);
        session.process_external_changes();

        let map = session.tracks_mute_status().unwrap();
        assert_eq!(map.get(&3), Some(&true)); // click
        assert_eq!(map.get(&4), Some(&true)); // count-off
    }

    #[test]
    fn test_seconds_per_tick_follows_tempo_and_factor() {
        let fixture = Fixture::new();
        let mut session = fixture.base_session(one_voice_context(), SessionConfig::all_tracks());
        assert!(session.seconds_per_tick().is_none());
        session.generate(true).unwrap();

        // 120 BPM: one beat is 0.5 s, spread over the tick resolution.
        let per_tick = session.seconds_per_tick().unwrap();
        assert!((per_tick * TICKS_PER_BEAT as f64 - 0.5).abs() < 1e-9);

        // Halving the tempo factor doubles the wall-clock time per tick.
        fixture.settings.set_tempo_factor(0.5);
        let slowed = session.seconds_per_tick().unwrap();
        assert!((slowed - per_tick * 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_tempo_factor_refires_without_regeneration() {
        let fixture = Fixture::new();
        let mut session = fixture.base_session(one_voice_context(), SessionConfig::all_tracks());
        session.generate(true).unwrap();
        let rx = session.subscribe();

        fixture.settings.set_tempo_factor(0.5);
        session.process_external_changes();

        assert!(rx
            .try_iter()
            .any(|e| matches!(e, SessionEvent::TempoFactorChanged(f) if (f - 0.5).abs() < 1e-6)));
    }

    #[test]
    fn test_generation_failure_leaves_session_new() {
        let fixture = Fixture::new();
        let mut session = BaseSession::new(
            one_voice_context(),
            SessionConfig::all_tracks(),
            std::sync::Arc::new(StubEngine::failing(GenerationError::Engine(
                "no style data".into(),
            ))),
            std::sync::Arc::new(crate::engine::StandardControlTrackBuilder),
            fixture.settings.clone(),
            fixture.mix.clone(),
        );

        let err = session.generate(true).unwrap_err();
        assert!(matches!(err, SessionError::Generation(_)));
        assert_eq!(session.state(), SessionState::New);
        assert!(session.sequence().is_none());
    }

    #[test]
    fn test_dirty_flag_and_event() {
        let fixture = Fixture::new();
        let mut session = fixture.base_session(one_voice_context(), SessionConfig::all_tracks());
        session.generate(true).unwrap();
        let rx = session.subscribe();

        assert!(!session.is_dirty());
        session.mark_dirty();
        session.mark_dirty(); // idempotent
        assert!(session.is_dirty());
        assert_eq!(session.state(), SessionState::Generated);

        let dirty_events = rx
            .try_iter()
            .filter(|e| matches!(e, SessionEvent::DirtyChanged(true)))
            .count();
        assert_eq!(dirty_events, 1);
    }

    #[test]
    fn test_close_is_idempotent_and_terminal() {
        let fixture = Fixture::new();
        let mut session = fixture.base_session(one_voice_context(), SessionConfig::all_tracks());
        session.generate(true).unwrap();

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.sequence().is_none());
        session.close();
        assert_eq!(session.state(), SessionState::Closed);

        let err = session.generate(true).unwrap_err();
        assert!(matches!(
            err,
            SessionError::IllegalState(SessionState::Closed)
        ));
    }

    #[test]
    fn test_fresh_copy_is_pristine() {
        let fixture = Fixture::new();
        let mut session = fixture.base_session(one_voice_context(), SessionConfig::all_tracks());
        session.generate(true).unwrap();
        session.mark_dirty();

        let copy = session.fresh_copy(None);
        assert_eq!(copy.state(), SessionState::New);
        assert!(!copy.is_dirty());
        assert_eq!(copy.context(), session.context());
        assert_ne!(copy.id(), session.id());
    }

    #[test]
    fn test_export_of_generated_sequence() {
        let fixture = Fixture::new();
        let mut session = fixture.base_session(one_voice_context(), SessionConfig::all_tracks());
        session.generate(true).unwrap();

        let bytes = crate::midi::write_smf(session.sequence().unwrap());
        assert_eq!(&bytes[0..4], b"MThd");
        assert_eq!(&bytes[10..12], &5u16.to_be_bytes()); // 5 tracks
    }
}
