//! Manual octave adjustments, e.g. `"55+,84--"`: each `+` raises the note by
//! an octave, each `-` lowers it. Pitches are MIDI note numbers and a token
//! moves its note by at most ten octaves.

use std::collections::BTreeMap;
use std::str::FromStr;

use super::Pitch;
use crate::error::PuncherError;

const HIGHEST_MIDI_NOTE: Pitch = 127;
const MAX_OCTAVES: usize = 10;

/// Parsed adjustment directives, keyed by the original pitch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdjustmentSpec(BTreeMap<Pitch, Pitch>);

impl AdjustmentSpec {
    pub fn get(&self, pitch: Pitch) -> Option<Pitch> {
        self.0.get(&pitch).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromStr for AdjustmentSpec {
    type Err = PuncherError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let mut map = BTreeMap::new();
        if spec.trim().is_empty() {
            return Ok(Self(map));
        }
        for token in spec.split(',') {
            let (pitch, target) = parse_token(token.trim())
                .ok_or_else(|| PuncherError::InvalidAdjustmentSpec(spec.to_string()))?;
            map.insert(pitch, target);
        }
        Ok(Self(map))
    }
}

/// Parse `<digits><run of '+' or run of '-'>` into a pitch and its target.
fn parse_token(token: &str) -> Option<(Pitch, Pitch)> {
    let split = token.find(|c: char| !c.is_ascii_digit())?;
    let (digits, signs) = token.split_at(split);
    let pitch: Pitch = digits.parse().ok().filter(|p| *p <= HIGHEST_MIDI_NOTE)?;
    if signs.len() > MAX_OCTAVES {
        return None;
    }
    let semitones = Pitch::try_from(signs.len()).ok()?.checked_mul(12)?;
    let shift = if signs.chars().all(|c| c == '+') {
        semitones
    } else if signs.chars().all(|c| c == '-') {
        -semitones
    } else {
        return None;
    };
    Some((pitch, pitch.checked_add(shift)?))
}
