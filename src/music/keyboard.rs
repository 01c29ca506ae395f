//! Keyboard — the fixed set of punchable pitches and the searches that fit a
//! piece onto it.
//!
//! A row index is the position of a pitch in the configured list, which need
//! not be sorted: machines with a reversed strip simply list the keyboard
//! high-to-low.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::warn;
use serde::Serialize;

use super::Pitch;
use crate::error::{PuncherError, Result};

/// Number of ranked candidates reported when no transposition fits.
const REPORTED_CANDIDATES: usize = 5;

/// A transposition candidate and the notes it fails to place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranspositionCandidate {
    pub shift: i32,
    pub misses: Vec<Pitch>,
}

/// Per-pitch octave corrections computed by [`Keyboard::calculate_adjustments`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Adjustments {
    /// Pitches that must move by a non-zero number of octaves.
    pub moves: BTreeMap<Pitch, Pitch>,
    /// Pitches whose pitch class does not exist on the keyboard.
    pub unmappable: BTreeSet<Pitch>,
}

impl Adjustments {
    /// Apply the corrections to a note set, dropping unmappable pitches.
    pub fn apply(&self, notes: &BTreeSet<Pitch>) -> BTreeSet<Pitch> {
        notes
            .iter()
            .filter(|n| !self.unmappable.contains(n))
            .map(|n| self.moves.get(n).copied().unwrap_or(*n))
            .collect()
    }
}

/// The pitches a machine can punch, in physical row order.
#[derive(Debug, Clone)]
pub struct Keyboard {
    keys: Vec<Pitch>,
    index: HashMap<Pitch, usize>,
}

impl Keyboard {
    /// Build a keyboard from pitches listed in row order.
    pub fn new(keys: impl IntoIterator<Item = Pitch>) -> Result<Self> {
        let keys: Vec<Pitch> = keys.into_iter().collect();
        if keys.is_empty() {
            return Err(PuncherError::InvalidKeyboard("no keys configured".into()));
        }
        let mut index = HashMap::with_capacity(keys.len());
        for (row, &pitch) in keys.iter().enumerate() {
            if index.insert(pitch, row).is_some() {
                return Err(PuncherError::InvalidKeyboard(format!(
                    "note {pitch} is listed twice"
                )));
            }
        }
        Ok(Self { keys, index })
    }

    /// Pitches in row order.
    pub fn keys(&self) -> &[Pitch] {
        &self.keys
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn lowest(&self) -> Pitch {
        self.keys.iter().copied().min().unwrap_or_default()
    }

    pub fn highest(&self) -> Pitch {
        self.keys.iter().copied().max().unwrap_or_default()
    }

    /// Row index of `pitch`.
    pub fn get_index(&self, pitch: Pitch) -> Result<usize> {
        self.index
            .get(&pitch)
            .copied()
            .ok_or(PuncherError::UnknownPitch(pitch))
    }

    pub fn contains(&self, pitch: Pitch) -> bool {
        self.index.contains_key(&pitch)
    }

    /// Whether every pitch has a row without transposing.
    pub fn does_fit(&self, notes: &BTreeSet<Pitch>) -> bool {
        notes.iter().all(|n| self.contains(*n))
    }

    /// Find the uniform shift that places the most notes on the keyboard.
    ///
    /// Candidates range one octave beyond the shifts that align the lowest
    /// and highest notes with the keyboard edges. They are ranked by number of
    /// misses, then by distance from zero; a positive shift wins a tie on
    /// distance. A perfect fit is always returned. With `best_effort` the best
    /// imperfect shift is returned instead of an error.
    pub fn calculate_transposition(
        &self,
        notes: &BTreeSet<Pitch>,
        best_effort: bool,
    ) -> Result<i32> {
        let (Some(&low), Some(&high)) = (notes.first(), notes.last()) else {
            return Ok(0);
        };
        let from = self.lowest() - low - 12;
        let to = self.highest() - high + 12;

        let mut candidates: Vec<TranspositionCandidate> = (from.min(to)..=to.max(from))
            .map(|shift| TranspositionCandidate {
                shift,
                misses: notes
                    .iter()
                    .copied()
                    .filter(|n| !self.contains(n + shift))
                    .collect(),
            })
            .collect();
        candidates.sort_by_key(|c| (c.misses.len(), c.shift.unsigned_abs(), c.shift < 0));

        let best = &candidates[0];
        if best.misses.is_empty() || best_effort {
            if !best.misses.is_empty() {
                warn!(
                    "best effort transposition {:+} leaves {:?} unplaced",
                    best.shift, best.misses
                );
            }
            return Ok(best.shift);
        }

        candidates.truncate(REPORTED_CANDIDATES);
        Err(PuncherError::TranspositionInfeasible {
            notes: notes.iter().copied().collect(),
            candidates,
        })
    }

    /// Move each pitch to the nearest keyboard pitch of the same pitch class.
    ///
    /// Pitches already on the keyboard are left out. Equal distances prefer
    /// the lower octave. Pitch classes missing from the keyboard are reported
    /// in [`Adjustments::unmappable`] and logged.
    pub fn calculate_adjustments(&self, notes: &BTreeSet<Pitch>) -> Adjustments {
        let mut adjustments = Adjustments::default();
        for &note in notes {
            let nearest = self
                .keys
                .iter()
                .copied()
                .filter(|&k| (i64::from(k) - i64::from(note)).rem_euclid(12) == 0)
                .min_by_key(|&k| ((i64::from(k) - i64::from(note)).abs(), k));
            match nearest {
                Some(target) if target != note => {
                    adjustments.moves.insert(note, target);
                }
                Some(_) => {}
                None => {
                    adjustments.unmappable.insert(note);
                }
            }
        }
        if !adjustments.unmappable.is_empty() {
            warn!(
                "notes {:?} have no octave equivalent on the keyboard and are dropped",
                adjustments.unmappable
            );
        }
        adjustments
    }
}
