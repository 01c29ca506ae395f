//! Timeline transforms. Each returns a new timeline and leaves its input
//! untouched.

use std::collections::BTreeSet;

use log::info;

use super::adjust::AdjustmentSpec;
use super::keyboard::Keyboard;
use super::{NoteEvent, NoteTimeline, Pitch};
use crate::error::Result;

/// Apply manual octave adjustments (see [`AdjustmentSpec`]).
///
/// The whole specification is parsed before anything is applied.
pub fn adjust(timeline: &NoteTimeline, spec: &str) -> Result<NoteTimeline> {
    let adjustments: AdjustmentSpec = spec.parse()?;
    info!("adjustments: {adjustments:?}");
    Ok(timeline.map_notes(|notes| {
        notes
            .iter()
            .map(|&n| adjustments.get(n).unwrap_or(n))
            .collect()
    }))
}

/// Shift every note by the single transposition that fits the keyboard.
pub fn transpose(timeline: &NoteTimeline, keyboard: &Keyboard) -> Result<NoteTimeline> {
    let notes = timeline.notes();
    let shift = keyboard.calculate_transposition(&notes, false)?;
    info!("notes: {notes:?}");
    info!("transposed by {shift}");
    Ok(shift_all(timeline, shift))
}

/// Shift every note by `shift`, then fold each event onto the keyboard by
/// octave. Notes whose pitch class is not on the keyboard are dropped, which
/// can leave an event empty.
pub fn autofit(timeline: &NoteTimeline, keyboard: &Keyboard, shift: i32) -> NoteTimeline {
    shift_all(timeline, shift).map_notes(|notes| keyboard.calculate_adjustments(notes).apply(notes))
}

/// Merge note-less events into the next sounding event.
///
/// A run of empty events at the end has nothing to merge into and is dropped
/// together with its delay.
pub fn consolidate(timeline: &NoteTimeline) -> NoteTimeline {
    let mut events = Vec::with_capacity(timeline.len());
    let mut pending = 0.0;
    for event in timeline.events() {
        if event.is_rest() {
            pending += event.delay;
        } else {
            events.push(NoteEvent {
                delay: pending + event.delay,
                notes: event.notes.clone(),
            });
            pending = 0.0;
        }
    }
    NoteTimeline::new(events)
}

/// How a decoded file is fitted onto the keyboard before punching.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PunchOptions {
    /// Manual octave adjustments applied first.
    pub adjust: Option<String>,
    /// Fold notes onto the keyboard after shifting by `transpose` instead of
    /// searching for an exact transposition.
    pub autofit: bool,
    pub transpose: i32,
}

/// Turn a raw timeline into one that only uses keyboard notes and has no
/// empty events.
pub fn prepare(
    timeline: &NoteTimeline,
    keyboard: &Keyboard,
    options: &PunchOptions,
) -> Result<NoteTimeline> {
    let adjusted = match options.adjust.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(spec) => adjust(timeline, spec)?,
        None => timeline.clone(),
    };
    let fitted = if options.autofit {
        autofit(&adjusted, keyboard, options.transpose)
    } else {
        transpose(&adjusted, keyboard)?
    };
    Ok(consolidate(&autofit(&fitted, keyboard, 0)))
}

/// Notes shifted past the range of `Pitch` are dropped.
fn shift_all(timeline: &NoteTimeline, shift: i32) -> NoteTimeline {
    timeline.map_notes(|notes| {
        notes
            .iter()
            .filter_map(|n| n.checked_add(shift))
            .collect::<BTreeSet<Pitch>>()
    })
}
