//! Standard MIDI File import and preview export.
//!
//! Import flattens every track into one timeline of chords: note-ons that
//! start at the same instant form one event. Export writes a single track
//! with fixed-length notes so a prepared timeline can be listened to before
//! punching.

use std::collections::{BTreeSet, VecDeque};

use log::warn;
use midly::num::{u15, u24, u28, u4, u7};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
};

use super::{NoteEvent, NoteTimeline, Pitch};
use crate::error::{PuncherError, Result};

/// Note-ons quieter than this (PPP) are ignored.
pub const MIN_VELOCITY: u8 = 20;

/// Tempo assumed until the file sets one (120 BPM).
const DEFAULT_TEMPO_US: u32 = 500_000;

/// Preview file resolution: 500 ticks per quarter at 120 BPM is 1 tick per ms.
const PREVIEW_TICKS_PER_QUARTER: u16 = 500;
const PREVIEW_PROGRAM: u8 = 11;
const PREVIEW_VELOCITY: u8 = 75;
const PREVIEW_NOTE_LENGTH_MS: u64 = 500;

enum Kind {
    NoteOn { key: u8, vel: u8 },
    NoteOff,
    Tempo(u32),
}

struct Timed {
    tick: u64,
    track: usize,
    seq: usize,
    kind: Kind,
}

/// Decode a Standard MIDI File into a chord timeline.
pub fn parse_midi(bytes: &[u8]) -> Result<NoteTimeline> {
    let smf = Smf::parse(bytes).map_err(|e| PuncherError::Midi(e.to_string()))?;
    let messages = merge_tracks(&smf.tracks);
    let seconds = tick_seconds(&messages, smf.header.timing);

    let mut events = Vec::new();
    let mut chord: BTreeSet<Pitch> = BTreeSet::new();
    let mut chord_tick = 0u64;
    let mut chord_time = 0.0;
    let mut previous_chord_time = 0.0;

    for (msg, &time) in messages.iter().zip(&seconds) {
        if matches!(msg.kind, Kind::Tempo(_)) {
            continue;
        }
        if !chord.is_empty() && msg.tick > chord_tick {
            events.push(NoteEvent {
                delay: chord_time - previous_chord_time,
                notes: std::mem::take(&mut chord),
            });
            previous_chord_time = chord_time;
        }
        if let Kind::NoteOn { key, vel } = msg.kind {
            if vel >= MIN_VELOCITY {
                if chord.is_empty() {
                    chord_tick = msg.tick;
                    chord_time = time;
                }
                chord.insert(Pitch::from(key));
            }
        }
    }
    if !chord.is_empty() {
        events.push(NoteEvent {
            delay: chord_time - previous_chord_time,
            notes: chord,
        });
    }
    Ok(NoteTimeline::new(events))
}

/// Flatten all tracks into one list ordered by absolute tick.
fn merge_tracks(tracks: &[Track<'_>]) -> Vec<Timed> {
    let mut messages = Vec::new();
    for (track_idx, track) in tracks.iter().enumerate() {
        let mut tick = 0u64;
        for (seq, event) in track.iter().enumerate() {
            tick += u64::from(event.delta.as_int());
            let kind = match event.kind {
                TrackEventKind::Midi { message, .. } => match message {
                    MidiMessage::NoteOn { key, vel } => Kind::NoteOn {
                        key: key.as_int(),
                        vel: vel.as_int(),
                    },
                    MidiMessage::NoteOff { .. } => Kind::NoteOff,
                    _ => continue,
                },
                TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => Kind::Tempo(tempo.as_int()),
                _ => continue,
            };
            messages.push(Timed {
                tick,
                track: track_idx,
                seq,
                kind,
            });
        }
    }
    messages.sort_by_key(|m| (m.tick, m.track, m.seq));
    messages
}

/// Absolute time in seconds of every merged message, following tempo changes.
fn tick_seconds(messages: &[Timed], timing: Timing) -> Vec<f64> {
    let mut tempo = DEFAULT_TEMPO_US;
    let mut last_tick = 0u64;
    let mut elapsed = 0.0;
    messages
        .iter()
        .map(|msg| {
            let seconds_per_tick = match timing {
                Timing::Metrical(ppq) => {
                    f64::from(tempo) / 1_000_000.0 / f64::from(ppq.as_int().max(1))
                }
                Timing::Timecode(fps, subframes) => {
                    1.0 / (f64::from(fps.as_f32()) * f64::from(subframes.max(1)))
                }
            };
            elapsed += (msg.tick - last_tick) as f64 * seconds_per_tick;
            last_tick = msg.tick;
            if let Kind::Tempo(t) = msg.kind {
                tempo = t;
            }
            elapsed
        })
        .collect()
}

/// Encode a timeline as a single-track preview file.
pub fn write_midi(timeline: &NoteTimeline) -> Result<Vec<u8>> {
    let channel = u4::new(0);
    let mut track: Track<'static> = Vec::new();
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(DEFAULT_TEMPO_US))),
    });
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Midi {
            channel,
            message: MidiMessage::ProgramChange {
                program: u7::new(PREVIEW_PROGRAM),
            },
        },
    });

    let mut written = 0u64;
    let mut now = 0u64;
    let mut pending_off: VecDeque<(u8, u64)> = VecDeque::new();

    for event in timeline.events() {
        now += (event.delay.max(0.0) * 1000.0).round() as u64;
        release_notes(&mut pending_off, now, &mut written, &mut track);
        for &note in &event.notes {
            let Some(key) = u8::try_from(note).ok().filter(|k| *k <= 127) else {
                warn!("note {note} is outside the MIDI range and left out of the preview");
                continue;
            };
            track.push(TrackEvent {
                delta: u28::new((now - written) as u32),
                kind: TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOn {
                        key: u7::new(key),
                        vel: u7::new(PREVIEW_VELOCITY),
                    },
                },
            });
            written = now;
            pending_off.push_back((key, now + PREVIEW_NOTE_LENGTH_MS));
        }
    }
    release_notes(&mut pending_off, u64::MAX, &mut written, &mut track);
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let mut smf = Smf::new(Header::new(
        Format::SingleTrack,
        Timing::Metrical(u15::new(PREVIEW_TICKS_PER_QUARTER)),
    ));
    smf.tracks.push(track);

    let mut buf = Vec::new();
    smf.write(&mut buf)
        .map_err(|e| PuncherError::Midi(e.to_string()))?;
    Ok(buf)
}

/// Emit every queued note-off due at or before `until`.
fn release_notes(
    pending: &mut VecDeque<(u8, u64)>,
    until: u64,
    written: &mut u64,
    track: &mut Track<'static>,
) {
    while let Some(&(key, at)) = pending.front() {
        if at > until {
            break;
        }
        track.push(TrackEvent {
            delta: u28::new((at - *written) as u32),
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOff {
                    key: u7::new(key),
                    vel: u7::new(0),
                },
            },
        });
        *written = at;
        pending.pop_front();
    }
}
