//! Update-aware session: keeps a playing sequence in sync with song edits.
//!
//! Wraps a [`BaseSession`] and doubles every track with a silent buffer
//! twin. Incremental updates are written into the buffers only, then
//! the active/buffer roles swap, so the playback driver never reads a track
//! that is being rewritten and the sequence tick length never changes.

use super::classify::{classify, SongEdit, UpdateOutcome};
use super::{
    BaseSession, MuteStatusMap, Session, SessionError, SessionEvent, SessionId, SessionState,
    TrackSet,
};
use crate::engine::{
    ControlTrackBuilder as _, RegenerationRequest, RegenerationResult, RegenerationWorker,
    WorkerConfig,
};
use crate::midi::{Event, Phrase, Sequence};
use crate::settings::LoopCount;
use crate::song::{BarRange, RenderingContext, Voice};
use crossbeam_channel::Receiver;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// The payload of one incremental sequence update.
///
/// Carries only what changed: phrases for some voices (a removed user phrase
/// arrives as an empty phrase) and/or a replacement control-marker list. All
/// ticks are relative to the start of the rendered bar range.
#[derive(Debug, Clone)]
pub struct Update {
    phrases: HashMap<Voice, Phrase>,
    control_events: Option<Vec<Event>>,
}

impl Update {
    /// Creates an update, or `None` when it would carry nothing.
    pub fn new(
        phrases: HashMap<Voice, Phrase>,
        control_events: Option<Vec<Event>>,
    ) -> Option<Self> {
        if phrases.is_empty() && control_events.is_none() {
            return None;
        }
        Some(Self {
            phrases,
            control_events,
        })
    }

    /// The changed phrases per voice.
    pub fn phrases(&self) -> &HashMap<Voice, Phrase> {
        &self.phrases
    }

    /// The replacement control-marker events, if the control data changed.
    pub fn control_events(&self) -> Option<&[Event]> {
        self.control_events.as_deref()
    }
}

/// A session whose sequence follows song edits while it plays.
///
/// Edits arrive through [`notify_edit`]; incremental ones are debounced and
/// regenerated on a background worker, and [`apply_pending`] (called from the
/// thread that owns the session) swaps the results in. Structural edits
/// permanently disable update provision.
///
/// [`notify_edit`]: UpdatableSession::notify_edit
/// [`apply_pending`]: UpdatableSession::apply_pending
pub struct UpdatableSession {
    inner: BaseSession,
    routes: TrackSet,
    worker: Option<RegenerationWorker>,
    worker_config: WorkerConfig,
    updates_enabled: bool,
}

impl UpdatableSession {
    /// Wraps a New-state base session.
    pub fn new(inner: BaseSession) -> Self {
        Self {
            inner,
            routes: TrackSet::new(),
            worker: None,
            worker_config: WorkerConfig::default(),
            updates_enabled: true,
        }
    }

    /// Overrides the worker debounce timing (builder style).
    pub fn with_worker_config(mut self, config: WorkerConfig) -> Self {
        self.worker_config = config;
        self
    }

    /// The rendering context this session was created for.
    pub fn context(&self) -> &RenderingContext {
        self.inner.context()
    }

    /// The session configuration.
    pub fn config(&self) -> &super::SessionConfig {
        self.inner.config()
    }

    /// Whether this session still accepts live updates.
    pub fn updates_enabled(&self) -> bool {
        self.updates_enabled
    }

    /// Number of tracks the playback driver sees, counting each
    /// active/buffer pair once (the undoubled track count).
    pub fn nb_playing_tracks(&self) -> usize {
        self.routes.len()
    }

    /// Marks the session dirty without touching the sequence.
    pub fn mark_dirty(&mut self) {
        self.inner.mark_dirty();
    }

    /// Returns a pristine New-state session with the same configuration,
    /// optionally over a different context.
    pub fn fresh_copy(&self, context: Option<RenderingContext>) -> UpdatableSession {
        UpdatableSession::new(self.inner.fresh_copy(context))
            .with_worker_config(self.worker_config)
    }

    /// Drains queued settings/mix notifications, routing mute re-derivation
    /// through the active/buffer pairs.
    pub fn process_external_changes(&mut self) {
        self.inner.drain_external(Some(&self.routes));
    }

    /// Feeds one song edit through the classifier and reacts accordingly.
    ///
    /// Irrelevant edits are dropped; incremental ones go to the background
    /// worker; settings-only ones mark the session dirty; structural ones
    /// disable update provision for good.
    pub fn notify_edit(&mut self, edit: &SongEdit) {
        if self.state() != SessionState::Generated || !self.updates_enabled {
            return;
        }

        match classify(self.inner.context(), edit) {
            UpdateOutcome::Irrelevant => {
                debug!(session = %self.id(), ?edit, "edit needs nothing");
            }
            UpdateOutcome::Incremental { voices, control } => {
                if voices.is_empty() && !control {
                    // Pure mute/click routing change; no regeneration.
                    self.process_external_changes();
                    return;
                }
                debug!(
                    session = %self.id(),
                    voices = voices.len(),
                    control,
                    "edit queued for regeneration"
                );
                let submitted = match &self.worker {
                    Some(worker) => worker.submit(RegenerationRequest {
                        context: self.inner.context().clone(),
                        voices,
                        control,
                    }),
                    None => false,
                };
                if !submitted {
                    // Worker gone; the sequence can only drift from here.
                    self.inner.mark_dirty();
                }
            }
            UpdateOutcome::MarkDirty => self.inner.mark_dirty(),
            UpdateOutcome::Disable => self.disable_updates(),
        }
    }

    /// Drains finished worker results and swaps them into the sequence.
    /// Returns the number of updates applied. Call from the thread that owns
    /// the session.
    pub fn apply_pending(&mut self) -> usize {
        let results: Vec<RegenerationResult> = match &self.worker {
            Some(worker) => worker.results().try_iter().collect(),
            None => return 0,
        };

        let mut applied = 0;
        for result in results {
            let phrases = match result.phrases {
                Ok(phrases) => phrases,
                Err(e) if e.is_user_authoring() => {
                    // Recoverable: tell the user, keep updates alive.
                    self.inner.mark_dirty();
                    self.inner
                        .emit(SessionEvent::AuthoringProblem(e.to_string()));
                    continue;
                }
                Err(e) => {
                    warn!(session = %self.id(), error = %e, "regeneration failed");
                    self.disable_updates();
                    break;
                }
            };

            let control_events = result
                .control
                .then(|| self.inner.control_builder_handle().build_events(&result.context));

            let Some(update) = Update::new(phrases, control_events) else {
                continue;
            };
            match self.update_sequence(update) {
                Ok(()) => applied += 1,
                Err(e) => {
                    warn!(session = %self.id(), error = %e, "update rejected");
                    self.inner.mark_dirty();
                }
            }
        }
        applied
    }

    /// Applies one incremental update through the buffer twins.
    ///
    /// Validates every staged event against the immutable sequence length
    /// before writing anything: an out-of-range event rejects the whole
    /// update with no mutation. Phrases equivalent to the current ones are
    /// skipped. After update provision has been disabled this is a no-op.
    ///
    /// # Errors
    ///
    /// [`SessionError::IllegalState`] unless the session is Generated;
    /// [`SessionError::OutOfRange`] if a staged event exceeds the length.
    pub fn update_sequence(&mut self, update: Update) -> Result<(), SessionError> {
        if self.state() != SessionState::Generated {
            return Err(SessionError::IllegalState(self.state()));
        }
        if !self.updates_enabled {
            return Ok(());
        }

        let offset = self.inner.precount_offset();
        let length = self
            .inner
            .loop_end_tick()
            .ok_or(SessionError::IllegalState(self.state()))?;

        // Stage: resolve target tracks and shift ticks behind the count-off.
        let mut staged_voices: Vec<(Voice, usize, Phrase, Vec<Event>)> = Vec::new();
        for (voice, phrase) in update.phrases {
            if self.inner.phrase(&voice) == Some(&phrase) {
                continue; // equivalent content, leave the active track alone
            }
            let Some(original_id) = self.inner.voice_track(&voice) else {
                continue; // voice not rendered by this session
            };
            let events = phrase.to_events(offset);
            staged_voices.push((voice, original_id, phrase, events));
        }

        let staged_control: Option<(usize, Vec<Event>, Vec<Event>)> =
            match (update.control_events, self.inner.control_track_id()) {
                (Some(relative), Some(original_id))
                    if self.inner.control_events() != Some(relative.as_slice()) =>
                {
                    let shifted = relative.iter().map(|e| e.shifted(offset)).collect();
                    Some((original_id, relative, shifted))
                }
                _ => None,
            };

        if staged_voices.is_empty() && staged_control.is_none() {
            debug!(session = %self.id(), "update carries no effective change");
            return Ok(());
        }

        // Validate before any write: the sequence length is immutable.
        let all_staged = staged_voices
            .iter()
            .flat_map(|(_, _, _, events)| events.iter())
            .chain(staged_control.iter().flat_map(|(_, _, shifted)| shifted));
        for event in all_staged {
            if event.tick > length {
                return Err(SessionError::OutOfRange {
                    tick: event.tick,
                    length,
                });
            }
        }

        // Write buffers and swap roles.
        let mut swapped = Vec::new();
        for (voice, original_id, phrase, events) in staged_voices {
            swap_in(&mut self.inner, &mut self.routes, original_id, events, length);
            self.inner.store_phrase(voice, phrase);
            swapped.push(original_id);
        }
        if let Some((original_id, relative, shifted)) = staged_control {
            swap_in(&mut self.inner, &mut self.routes, original_id, shifted, length);
            self.inner.set_control_events(relative);
            swapped.push(original_id);
        }

        let map = self.inner.rebuild_mute_status(Some(&self.routes));
        self.inner.emit(SessionEvent::MuteStatusChanged(map));
        info!(session = %self.id(), tracks = ?swapped, "update applied");
        self.inner
            .emit(SessionEvent::UpdateApplied { tracks: swapped });
        Ok(())
    }

    /// Sequence track id currently playing the given voice.
    pub fn active_track_id(&self, voice: &Voice) -> Option<usize> {
        let original = self.inner.voice_track(voice)?;
        self.routes.active_id(original)
    }

    fn disable_updates(&mut self) {
        if !self.updates_enabled {
            return;
        }
        info!(session = %self.id(), "update provision disabled");
        self.updates_enabled = false;
        self.worker = None; // drop joins the thread
        self.inner.mark_dirty();

        // The control markers no longer reflect the song; silence them.
        if self.inner.control_track_id().is_some() {
            self.inner.set_control_muted(true);
            let map = self.inner.rebuild_mute_status(Some(&self.routes));
            self.inner.emit(SessionEvent::MuteStatusChanged(map));
            self.inner.emit(SessionEvent::ControlTrackDisabled);
        }
        self.inner.emit(SessionEvent::UpdateProvisionDisabled);
    }
}

/// Rewrites the buffer half of a pair and makes it the active half: clear,
/// fill, force the end tick, exchange mute flags, swap roles.
fn swap_in(
    inner: &mut BaseSession,
    routes: &mut TrackSet,
    original_id: usize,
    events: Vec<Event>,
    length: u32,
) {
    let (Some(active_id), Some(buffer_id)) =
        (routes.active_id(original_id), routes.buffer_id(original_id))
    else {
        return;
    };
    let Some(sequence) = inner.sequence_mut() else {
        return;
    };

    if let Some(buffer) = sequence.track_mut(buffer_id) {
        buffer.clear_events();
        buffer.extend_events(events);
        buffer.set_end_tick(length);
    }

    let was_muted = sequence.track(active_id).map(|t| t.muted).unwrap_or(false);
    if let Some(buffer) = sequence.track_mut(buffer_id) {
        buffer.muted = was_muted;
    }
    if let Some(active) = sequence.track_mut(active_id) {
        active.muted = true;
    }
    routes.swap(original_id);
}

impl Session for UpdatableSession {
    fn id(&self) -> SessionId {
        self.inner.id()
    }

    fn state(&self) -> SessionState {
        self.inner.state()
    }

    fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }

    fn generate(&mut self, silent: bool) -> Result<(), SessionError> {
        self.inner.generate(silent)?;

        // Double every track, meta included, with a silent equally-long twin.
        if let Some(sequence) = self.inner.sequence_mut() {
            let count = sequence.track_count();
            for id in 0..count {
                let Some(twin) = sequence.track(id).map(|t| t.buffer_twin()) else {
                    continue;
                };
                let buffer_id = sequence.add_track(twin);
                self.routes.add_track(id, buffer_id);
            }
        }
        debug!(
            session = %self.id(),
            pairs = self.routes.len(),
            "buffer twins installed"
        );

        self.worker = Some(RegenerationWorker::new(
            self.inner.engine_handle(),
            self.worker_config,
        ));
        Ok(())
    }

    fn sequence(&self) -> Option<&Sequence> {
        self.inner.sequence()
    }

    fn tracks_mute_status(&self) -> Option<MuteStatusMap> {
        self.inner.tracks_mute_status()
    }

    fn loop_start_tick(&self) -> Option<u32> {
        self.inner.loop_start_tick()
    }

    fn loop_end_tick(&self) -> Option<u32> {
        self.inner.loop_end_tick()
    }

    fn loop_count(&self) -> Option<LoopCount> {
        self.inner.loop_count()
    }

    fn seconds_per_tick(&self) -> Option<f64> {
        self.inner.seconds_per_tick()
    }

    fn bar_tick(&self, bar: u32) -> Option<u32> {
        self.inner.bar_tick(bar)
    }

    fn bar_range(&self) -> Option<BarRange> {
        self.inner.bar_range()
    }

    fn control_events(&self) -> Option<&[Event]> {
        self.inner.control_events()
    }

    fn subscribe(&self) -> Receiver<SessionEvent> {
        self.inner.subscribe()
    }

    fn close(&mut self) {
        self.worker = None;
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::Note;
    use crate::session::SessionConfig;
    use crate::testing::{one_voice_context, Fixture};
    use std::time::Duration;

    fn updatable(fixture: &Fixture) -> UpdatableSession {
        UpdatableSession::new(
            fixture.base_session(one_voice_context(), SessionConfig::all_tracks()),
        )
        .with_worker_config(WorkerConfig {
            quiet_period: Duration::from_millis(20),
            min_gap: Duration::from_millis(20),
        })
    }

    fn phrase(pitch: u8) -> Phrase {
        Phrase::from_notes(vec![Note::new(pitch, 100, 0, 480)])
    }

    #[test]
    fn test_wrapping_doubles_total_track_count() {
        let fixture = Fixture::new();
        let mut session = updatable(&fixture);
        session.generate(true).unwrap();

        // 5 originals (meta + voice + control + click + count-off), each
        // with a buffer twin: 10 tracks total, 5 playing.
        let sequence = session.sequence().unwrap();
        assert_eq!(sequence.track_count(), 10);
        assert_eq!(session.nb_playing_tracks(), 5);

        // Every buffer twin is muted, empty, and as long as its original.
        for id in 5..10 {
            let twin = sequence.track(id).unwrap();
            assert!(twin.muted);
            assert_eq!(twin.event_count(), 0);
            assert_eq!(twin.end_tick(), sequence.track(id - 5).unwrap().end_tick());
        }
    }

    #[test]
    fn test_update_swaps_voice_track() {
        let fixture = Fixture::new();
        let mut session = updatable(&fixture);
        session.generate(true).unwrap();
        let rx = session.subscribe();
        let bass = Voice::new("Bass");
        let length = session.sequence().unwrap().length_ticks();

        let before = session.active_track_id(&bass).unwrap();
        let update = Update::new(
            [(bass.clone(), phrase(40))].into_iter().collect(),
            None,
        )
        .unwrap();
        session.update_sequence(update).unwrap();

        let after = session.active_track_id(&bass).unwrap();
        assert_ne!(before, after);

        let sequence = session.sequence().unwrap();
        let active = sequence.track(after).unwrap();
        assert!(!active.muted);
        assert_eq!(active.event_count(), 2); // one note on/off pair
        assert_eq!(active.end_tick(), length);
        assert!(sequence.track(before).unwrap().muted);
        assert_eq!(sequence.length_ticks(), length);

        assert!(rx
            .try_iter()
            .any(|e| matches!(e, SessionEvent::UpdateApplied { ref tracks } if tracks == &vec![before])));
    }

    #[test]
    fn test_update_events_land_behind_count_off() {
        let fixture = Fixture::new();
        let mut session = updatable(&fixture);
        session.generate(true).unwrap();
        let bass = Voice::new("Bass");
        let offset = session.loop_start_tick().unwrap();
        assert!(offset > 0);

        let update = Update::new(
            [(bass.clone(), phrase(41))].into_iter().collect(),
            None,
        )
        .unwrap();
        session.update_sequence(update).unwrap();

        let active = session.active_track_id(&bass).unwrap();
        let track = session.sequence().unwrap().track(active).unwrap();
        assert_eq!(track.events()[0].tick, offset);
    }

    #[test]
    fn test_equivalent_phrase_is_a_no_op() {
        let fixture = Fixture::new();
        let mut session = updatable(&fixture);
        session.generate(true).unwrap();
        let bass = Voice::new("Bass");
        let before = session.active_track_id(&bass).unwrap();

        let same = crate::testing::StubEngine::default_phrase();
        let update = Update::new([(bass.clone(), same)].into_iter().collect(), None).unwrap();
        session.update_sequence(update).unwrap();

        assert_eq!(session.active_track_id(&bass), Some(before));
    }

    #[test]
    fn test_removed_phrase_swaps_in_an_empty_track() {
        let fixture = Fixture::new();
        let mut session = updatable(&fixture);
        session.generate(true).unwrap();
        let bass = Voice::new("Bass");

        let update = Update::new(
            [(bass.clone(), Phrase::new())].into_iter().collect(),
            None,
        )
        .unwrap();
        session.update_sequence(update).unwrap();

        let active = session.active_track_id(&bass).unwrap();
        let track = session.sequence().unwrap().track(active).unwrap();
        assert_eq!(track.event_count(), 0);
        assert!(!track.muted);
        assert_eq!(track.end_tick(), session.loop_end_tick().unwrap());
    }

    #[test]
    fn test_out_of_range_update_rejected_atomically() {
        let fixture = Fixture::new();
        let mut session = updatable(&fixture);
        session.generate(true).unwrap();
        let bass = Voice::new("Bass");
        let before = session.active_track_id(&bass).unwrap();
        let length = session.loop_end_tick().unwrap();

        // Second voice entry is fine, first overruns: nothing may change.
        let long = Phrase::from_notes(vec![Note::new(40, 100, length, 480)]);
        let update = Update::new([(bass.clone(), long)].into_iter().collect(), None).unwrap();

        let err = session.update_sequence(update).unwrap_err();
        assert!(matches!(err, SessionError::OutOfRange { .. }));
        assert_eq!(session.active_track_id(&bass), Some(before));
        let buffer = session.sequence().unwrap().track(6).unwrap();
        assert_eq!(buffer.event_count(), 0);
    }

    #[test]
    fn test_control_update_swaps_control_pair() {
        let fixture = Fixture::new();
        let mut session = updatable(&fixture);
        session.generate(true).unwrap();

        let new_markers = vec![Event::new(
            0,
            crate::midi::EventKind::ChordSymbol("F7".into()),
        )];
        let update = Update::new(HashMap::new(), Some(new_markers.clone())).unwrap();
        session.update_sequence(update).unwrap();

        assert_eq!(session.control_events(), Some(new_markers.as_slice()));
    }

    #[test]
    fn test_structural_edit_disables_updates() {
        let fixture = Fixture::new();
        let mut session = updatable(&fixture);
        session.generate(true).unwrap();
        let rx = session.subscribe();
        let bass = Voice::new("Bass");
        let before = session.active_track_id(&bass).unwrap();

        session.notify_edit(&SongEdit::StructureChanged);

        assert!(!session.updates_enabled());
        assert!(session.is_dirty());
        let events: Vec<_> = rx.try_iter().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::UpdateProvisionDisabled)));
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::ControlTrackDisabled)));

        // Control track muted, and further updates are no-ops.
        let control_id = 2;
        assert!(session.sequence().unwrap().track(control_id).unwrap().muted);
        let update = Update::new(
            [(bass.clone(), phrase(42))].into_iter().collect(),
            None,
        )
        .unwrap();
        session.update_sequence(update).unwrap();
        assert_eq!(session.active_track_id(&bass), Some(before));
    }

    #[test]
    fn test_notify_edit_end_to_end_through_worker() {
        let fixture = Fixture::new();
        let mut session = updatable(&fixture);
        session.generate(true).unwrap();
        let bass = Voice::new("Bass");
        let before = session.active_track_id(&bass).unwrap();

        // Make the regenerated phrase differ from the generated one.
        fixture.engine.set_phrase(bass.clone(), phrase(43));
        session.notify_edit(&SongEdit::UserPhraseChanged {
            voice: bass.clone(),
        });

        // Wait out the debounce, then pump results.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let mut applied = 0;
        while applied == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
            applied = session.apply_pending();
        }
        assert_eq!(applied, 1);
        assert_ne!(session.active_track_id(&bass), Some(before));
    }

    #[test]
    fn test_irrelevant_edit_changes_nothing() {
        let fixture = Fixture::new();
        let mut session = updatable(&fixture);
        session.generate(true).unwrap();

        session.notify_edit(&SongEdit::ChordSymbolEdited { bar: 99 });
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(session.apply_pending(), 0);
        assert!(!session.is_dirty());
        assert!(session.updates_enabled());
    }

    #[test]
    fn test_fresh_copy_is_pristine() {
        let fixture = Fixture::new();
        let mut session = updatable(&fixture);
        session.generate(true).unwrap();
        session.notify_edit(&SongEdit::StructureChanged);
        assert!(!session.updates_enabled());

        let copy = session.fresh_copy(None);
        assert_eq!(copy.state(), SessionState::New);
        assert!(!copy.is_dirty());
        assert!(copy.updates_enabled());
    }

    #[test]
    fn test_close_stops_the_worker() {
        let fixture = Fixture::new();
        let mut session = updatable(&fixture);
        session.generate(true).unwrap();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.apply_pending(), 0);
    }
}
