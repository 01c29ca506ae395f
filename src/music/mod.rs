//! Note sequences — the timeline model, keyboard fitting and the transforms
//! that turn a decoded MIDI file into something the machine can punch.

pub mod adjust;
pub mod keyboard;
pub mod midi;
pub mod sequence;

use std::collections::BTreeSet;

pub use adjust::AdjustmentSpec;
pub use keyboard::{Adjustments, Keyboard, TranspositionCandidate};
pub use midi::{parse_midi, write_midi};
pub use sequence::{adjust, autofit, consolidate, prepare, transpose, PunchOptions};

/// A MIDI note number. Signed so transpositions may leave the MIDI range
/// temporarily.
pub type Pitch = i32;

/// One step of a timeline: wait `delay` seconds, then sound `notes`.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteEvent {
    pub delay: f64,
    pub notes: BTreeSet<Pitch>,
}

impl NoteEvent {
    pub fn new(delay: f64, notes: impl IntoIterator<Item = Pitch>) -> Self {
        Self {
            delay,
            notes: notes.into_iter().collect(),
        }
    }

    /// An event that only carries time.
    pub fn rest(delay: f64) -> Self {
        Self {
            delay,
            notes: BTreeSet::new(),
        }
    }

    pub fn is_rest(&self) -> bool {
        self.notes.is_empty()
    }
}

/// An ordered sequence of note events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteTimeline {
    events: Vec<NoteEvent>,
}

impl NoteTimeline {
    pub fn new(events: Vec<NoteEvent>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<NoteEvent> {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Every pitch that sounds anywhere in the timeline.
    pub fn notes(&self) -> BTreeSet<Pitch> {
        self.events
            .iter()
            .flat_map(|e| e.notes.iter().copied())
            .collect()
    }

    /// Sum of all delays, in seconds.
    pub fn total_delay(&self) -> f64 {
        self.events.iter().map(|e| e.delay).sum()
    }

    /// Build a new timeline by rewriting each event's note set.
    pub(crate) fn map_notes<F>(&self, mut f: F) -> Self
    where
        F: FnMut(&BTreeSet<Pitch>) -> BTreeSet<Pitch>,
    {
        Self {
            events: self
                .events
                .iter()
                .map(|e| NoteEvent {
                    delay: e.delay,
                    notes: f(&e.notes),
                })
                .collect(),
        }
    }
}

impl From<Vec<NoteEvent>> for NoteTimeline {
    fn from(events: Vec<NoteEvent>) -> Self {
        Self::new(events)
    }
}

impl FromIterator<NoteEvent> for NoteTimeline {
    fn from_iter<T: IntoIterator<Item = NoteEvent>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn collects_all_notes() {
        let tl = NoteTimeline::new(vec![
            NoteEvent::new(0.0, [60, 64]),
            NoteEvent::rest(0.5),
            NoteEvent::new(0.5, [64, 67]),
        ]);
        let notes: Vec<Pitch> = tl.notes().into_iter().collect();
        assert_eq!(notes, vec![60, 64, 67]);
    }

    #[test]
    fn total_delay_sums_events() {
        let tl: NoteTimeline = vec![
            NoteEvent::new(0.25, [60]),
            NoteEvent::rest(0.5),
            NoteEvent::new(1.0, [62]),
        ]
        .into();
        assert_approx_eq!(tl.total_delay(), 1.75);
    }

    #[test]
    fn rest_has_no_notes() {
        assert!(NoteEvent::rest(1.0).is_rest());
        assert!(!NoteEvent::new(1.0, [60]).is_rest());
    }
}
