//! Classification of song edits against a live session.
//!
//! Every fine-grained edit notification from the song model maps to exactly
//! one outcome: it needs nothing, it needs an incremental update, it only
//! invalidates the session (dirty), or it breaks update provision entirely.

use crate::song::{RenderingContext, Voice};

/// A fine-grained edit notification from the song model.
#[derive(Debug, Clone, PartialEq)]
pub enum SongEdit {
    /// A chord symbol was added, removed, changed or moved.
    ChordSymbolEdited { bar: u32 },

    /// A section/position marker was added, removed, changed or moved.
    MarkerEdited { bar: u32 },

    /// A rhythm-parameter value changed (global tempo factor excluded).
    RhythmParameterChanged { voice: Voice },

    /// Per-voice mute/transpose/velocity/keymap/routing changed in the mix.
    VoiceMixChanged { voice: Voice },

    /// The content of an existing user phrase changed.
    UserPhraseChanged { voice: Voice },

    /// A user phrase was removed.
    UserPhraseRemoved { voice: Voice },

    /// A brand-new user phrase was added.
    UserPhraseAdded { voice: Voice },

    /// The playback click was switched on or off.
    ClickToggled,

    /// The global tempo factor changed.
    TempoFactorChanged,

    /// Click pitch/velocity settings changed.
    ClickTimbreChanged,

    /// Count-off bar count or mode changed.
    PrecountTimingChanged,

    /// Bar count, section, time signature or song-part structure changed.
    StructureChanged,

    /// A voice was remapped to a different channel/instrument slot.
    VoiceRemapped,
}

/// The classification outcome for one edit.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The edit does not affect this session at all.
    Irrelevant,

    /// Enqueue a background regeneration of the named voices and, if
    /// `control` is set, the control-marker data.
    Incremental { voices: Vec<Voice>, control: bool },

    /// Set the dirty flag only; the sequence remains playable.
    MarkDirty,

    /// Set dirty, disable the control track, and permanently stop
    /// accepting updates.
    Disable,
}

/// Maps an edit to its outcome for a session rendering `context`.
///
/// Chord and marker edits outside the context's bar range, and parameter
/// edits for voices the context does not use, need nothing.
pub fn classify(context: &RenderingContext, edit: &SongEdit) -> UpdateOutcome {
    match edit {
        SongEdit::ChordSymbolEdited { bar } => {
            if !context.bar_range.contains(*bar) {
                return UpdateOutcome::Irrelevant;
            }
            // A chord change can alter every generated phrase and the
            // chord-symbol markers.
            UpdateOutcome::Incremental {
                voices: context.voices.iter().map(|vc| vc.voice.clone()).collect(),
                control: true,
            }
        }
        SongEdit::MarkerEdited { bar } => {
            if !context.bar_range.contains(*bar) {
                return UpdateOutcome::Irrelevant;
            }
            UpdateOutcome::Incremental {
                voices: Vec::new(),
                control: true,
            }
        }
        SongEdit::RhythmParameterChanged { voice }
        | SongEdit::VoiceMixChanged { voice }
        | SongEdit::UserPhraseChanged { voice }
        | SongEdit::UserPhraseRemoved { voice } => {
            if !context.uses_voice(voice) {
                return UpdateOutcome::Irrelevant;
            }
            UpdateOutcome::Incremental {
                voices: vec![voice.clone()],
                control: false,
            }
        }
        SongEdit::ClickToggled => UpdateOutcome::Incremental {
            voices: Vec::new(),
            control: false,
        },
        SongEdit::TempoFactorChanged
        | SongEdit::ClickTimbreChanged
        | SongEdit::PrecountTimingChanged => UpdateOutcome::MarkDirty,
        SongEdit::StructureChanged
        | SongEdit::VoiceRemapped
        | SongEdit::UserPhraseAdded { .. } => UpdateOutcome::Disable,
    }
}
