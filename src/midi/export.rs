//! Standard MIDI File (SMF) export for rendered sequences.
//!
//! Lets a generated sequence be inspected with any external MIDI tool.
//!
//! # Limitations (Information Degradation)
//!
//! - Track mute flags are not exported (every track is written as-is).
//! - Beat and chord-symbol markers become SMF marker meta events; the
//!   structured bar/beat data is flattened into text.
//!
//! # Format Details
//!
//! Exports as SMF Format 1 (multi-track): the sequence's track 0 already
//! carries tempo and time-signature meta events, so tracks map one-to-one
//! onto MTrk chunks.

use super::{Event, EventKind, Sequence, TICKS_PER_BEAT};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes a variable-length quantity (VLQ) used for delta times in MIDI.
///
/// VLQ encodes values using 7 bits per byte, with the MSB indicating
/// whether more bytes follow (1 = more bytes, 0 = last byte).
fn write_vlq(value: u32, buffer: &mut Vec<u8>) {
    if value == 0 {
        buffer.push(0);
        return;
    }

    let mut temp = value;
    let mut bytes = Vec::with_capacity(4);

    while temp > 0 {
        bytes.push((temp & 0x7F) as u8);
        temp >>= 7;
    }

    // Write bytes in reverse order with continuation bits
    for (i, &byte) in bytes.iter().rev().enumerate() {
        if i < bytes.len() - 1 {
            buffer.push(byte | 0x80); // Set continuation bit
        } else {
            buffer.push(byte); // Last byte, no continuation
        }
    }
}

/// Writes a text-carrying meta event (FF type len text).
fn write_meta_text(meta_type: u8, text: &str, buffer: &mut Vec<u8>) {
    buffer.push(0xFF);
    buffer.push(meta_type);
    let bytes = text.as_bytes();
    write_vlq(bytes.len() as u32, buffer);
    buffer.extend_from_slice(bytes);
}

/// Calculates the power of 2 for a time signature denominator.
///
/// E.g., 4 -> 2 (2^2 = 4), 8 -> 3 (2^3 = 8)
fn denominator_to_power(denom: u8) -> u8 {
    match denom {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        16 => 4,
        32 => 5,
        _ => 2, // Default to quarter note
    }
}

/// Writes a single event to the buffer (without delta time).
fn write_event(event: &Event, channel: u8, buffer: &mut Vec<u8>) {
    match &event.kind {
        EventKind::NoteOn { pitch, velocity } => {
            buffer.push(0x90 | (channel & 0x0F));
            buffer.push(*pitch);
            buffer.push(*velocity);
        }
        EventKind::NoteOff { pitch } => {
            buffer.push(0x80 | (channel & 0x0F));
            buffer.push(*pitch);
            buffer.push(0);
        }
        EventKind::Tempo(bpm) => {
            // Meta event: FF 51 03 tt tt tt
            // Convert BPM to microseconds per beat: 60,000,000 / BPM
            let microseconds_per_beat = 60_000_000 / (*bpm).max(1);
            buffer.push(0xFF);
            buffer.push(0x51);
            buffer.push(0x03);
            buffer.push((microseconds_per_beat >> 16) as u8);
            buffer.push((microseconds_per_beat >> 8) as u8);
            buffer.push(microseconds_per_beat as u8);
        }
        EventKind::TimeSignature {
            numerator,
            denominator,
        } => {
            // Meta event: FF 58 04 nn dd cc bb
            buffer.push(0xFF);
            buffer.push(0x58);
            buffer.push(0x04);
            buffer.push(*numerator);
            buffer.push(denominator_to_power(*denominator));
            buffer.push(24); // Clocks per click
            buffer.push(8); // 32nd notes per quarter
        }
        EventKind::TrackName(name) => write_meta_text(0x03, name, buffer),
        EventKind::Beat { bar, beat } => {
            write_meta_text(0x06, &format!("beat {}.{}", bar, beat), buffer)
        }
        EventKind::ChordSymbol(symbol) => write_meta_text(0x06, symbol, buffer),
    }
}

/// Builds one MTrk chunk's data from a track's events plus end-of-track.
fn build_track_data(events: &[Event], channel: u8, end_tick: u32) -> Vec<u8> {
    let mut buffer = Vec::new();
    let mut last_tick = 0u32;

    for event in events {
        let delta = event.tick.saturating_sub(last_tick);
        write_vlq(delta, &mut buffer);
        write_event(event, channel, &mut buffer);
        last_tick = event.tick;
    }

    // End of track at the forced end tick: FF 2F 00
    let delta = end_tick.max(last_tick).saturating_sub(last_tick);
    write_vlq(delta, &mut buffer);
    buffer.push(0xFF);
    buffer.push(0x2F);
    buffer.push(0x00);

    buffer
}

/// Renders a sequence to Standard MIDI File bytes (Format 1).
pub fn write_smf(sequence: &Sequence) -> Vec<u8> {
    let mut out = Vec::new();

    // Header chunk (MThd)
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes()); // Header length (always 6)
    out.extend_from_slice(&1u16.to_be_bytes()); // Format 1 (multi-track)
    out.extend_from_slice(&(sequence.track_count() as u16).to_be_bytes());
    out.extend_from_slice(&(TICKS_PER_BEAT as u16).to_be_bytes()); // Division

    for track in sequence.tracks() {
        let data = build_track_data(track.events(), track.channel, track.end_tick());
        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(&data);
    }

    out
}

/// Exports a sequence to a Standard MIDI File on disk.
///
/// # Errors
///
/// Returns error if file creation or writing fails
pub fn export_to_midi<P: AsRef<Path>>(sequence: &Sequence, path: P) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&write_smf(sequence))?;
    writer.flush()
}
