//! Global playback settings and the instrument-mix console.
//!
//! These are the external collaborators a session subscribes to after
//! generation. Their values are resolved at playback time rather than baked
//! into track bytes, so changing them re-derives the mute map or re-fires a
//! tempo/loop event without regenerating the sequence.

use crate::notify::EventHub;
use crate::song::Voice;
use crossbeam_channel::Receiver;
use std::collections::HashMap;
use std::sync::Mutex;

/// How many times the rendered slice repeats during playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCount {
    /// Play the slice `n` times total.
    Finite(u32),
    /// Loop until stopped.
    Infinite,
}

/// A change to the global playback settings.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsChange {
    /// Global tempo factor changed (1.0 = song tempo).
    TempoFactor(f32),
    /// Click was switched on or off.
    ClickEnabled(bool),
    /// Loop count changed.
    LoopCount(LoopCount),
    /// Click pitch or velocity changed.
    ClickTimbre,
    /// Count-off bar count or mode changed.
    PrecountTiming,
}

#[derive(Debug, Clone)]
struct SettingsState {
    click_enabled: bool,
    precount_bars: u8,
    loop_count: LoopCount,
    click_pitch: u8,
    click_velocity: u8,
    tempo_factor: f32,
}

impl Default for SettingsState {
    fn default() -> Self {
        Self {
            click_enabled: true,
            precount_bars: 1,
            loop_count: LoopCount::Infinite,
            click_pitch: 37, // side stick
            click_velocity: 100,
            tempo_factor: 1.0,
        }
    }
}

/// Shared, observable playback settings.
///
/// Mutated through setters which broadcast a [`SettingsChange`]; read through
/// getters that lock briefly. Wrapped in an `Arc` by whoever wires sessions.
#[derive(Debug, Default)]
pub struct PlaybackSettings {
    state: Mutex<SettingsState>,
    hub: EventHub<SettingsChange>,
}

impl PlaybackSettings {
    /// Creates settings with defaults: click on, 1 count-off bar, infinite
    /// loop, tempo factor 1.0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to settings changes.
    pub fn subscribe(&self) -> Receiver<SettingsChange> {
        self.hub.subscribe()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SettingsState> {
        self.state.lock().expect("settings state poisoned")
    }

    /// Returns whether the playback click is enabled.
    pub fn click_enabled(&self) -> bool {
        self.state().click_enabled
    }

    /// Enables or disables the playback click.
    pub fn set_click_enabled(&self, enabled: bool) {
        self.state().click_enabled = enabled;
        self.hub.emit(SettingsChange::ClickEnabled(enabled));
    }

    /// Returns the number of count-off bars.
    pub fn precount_bars(&self) -> u8 {
        self.state().precount_bars
    }

    /// Sets the number of count-off bars.
    pub fn set_precount_bars(&self, bars: u8) {
        self.state().precount_bars = bars;
        self.hub.emit(SettingsChange::PrecountTiming);
    }

    /// Returns the loop count.
    pub fn loop_count(&self) -> LoopCount {
        self.state().loop_count
    }

    /// Sets the loop count.
    pub fn set_loop_count(&self, count: LoopCount) {
        self.state().loop_count = count;
        self.hub.emit(SettingsChange::LoopCount(count));
    }

    /// Returns the click pitch.
    pub fn click_pitch(&self) -> u8 {
        self.state().click_pitch
    }

    /// Returns the click velocity.
    pub fn click_velocity(&self) -> u8 {
        self.state().click_velocity
    }

    /// Sets the click pitch and velocity.
    pub fn set_click_timbre(&self, pitch: u8, velocity: u8) {
        {
            let mut s = self.state();
            s.click_pitch = pitch.min(127);
            s.click_velocity = velocity.min(127);
        }
        self.hub.emit(SettingsChange::ClickTimbre);
    }

    /// Returns the global tempo factor (1.0 = song tempo).
    pub fn tempo_factor(&self) -> f32 {
        self.state().tempo_factor
    }

    /// Sets the global tempo factor.
    pub fn set_tempo_factor(&self, factor: f32) {
        self.state().tempo_factor = factor;
        self.hub.emit(SettingsChange::TempoFactor(factor));
    }
}

/// A change to the instrument mix.
#[derive(Debug, Clone, PartialEq)]
pub enum MixChange {
    /// A voice was muted or unmuted.
    VoiceMute(Voice, bool),
}

/// Per-voice mix state (currently mute flags), with change notifications.
///
/// Stands in for the instrument-mix collaborator of the host application;
/// sessions merge its mute flags into their track mute map.
#[derive(Debug, Default)]
pub struct MixConsole {
    muted: Mutex<HashMap<Voice, bool>>,
    hub: EventHub<MixChange>,
}

impl MixConsole {
    /// Creates a console with every voice audible.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to mix changes.
    pub fn subscribe(&self) -> Receiver<MixChange> {
        self.hub.subscribe()
    }

    /// Returns whether a voice is muted (unknown voices are audible).
    pub fn is_muted(&self, voice: &Voice) -> bool {
        self.muted
            .lock()
            .expect("mix state poisoned")
            .get(voice)
            .copied()
            .unwrap_or(false)
    }

    /// Mutes or unmutes a voice.
    pub fn set_muted(&self, voice: Voice, muted: bool) {
        self.muted
            .lock()
            .expect("mix state poisoned")
            .insert(voice.clone(), muted);
        self.hub.emit(MixChange::VoiceMute(voice, muted));
    }
}
