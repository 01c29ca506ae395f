//! Crate-wide error type.

use std::io;

use thiserror::Error;

use crate::music::keyboard::TranspositionCandidate;
use crate::music::Pitch;

/// Errors raised while preparing or punching a note sequence.
#[derive(Debug, Error)]
pub enum PuncherError {
    /// The pitch has no row on the configured keyboard.
    #[error("note {0} is not on the keyboard")]
    UnknownPitch(Pitch),

    /// No uniform shift maps every note onto the keyboard.
    #[error("cannot fit notes {notes:?} on the keyboard; best candidates: {}", format_candidates(.candidates))]
    TranspositionInfeasible {
        notes: Vec<Pitch>,
        candidates: Vec<TranspositionCandidate>,
    },

    /// The adjustment string could not be parsed.
    #[error("illegal adjustment specification: {0}")]
    InvalidAdjustmentSpec(String),

    /// Motion steps were requested for an event without notes.
    #[error("event {index} has no notes, consolidate consecutive delays first")]
    EmptyEvent { index: usize },

    /// The pulse service refused a command or could not be reached.
    #[error("motor service error: {0}")]
    MotorService(String),

    /// The home sensor never triggered.
    #[error("home sensor not reached after {0} steps")]
    HomingFailed(u32),

    #[error("invalid keyboard: {0}")]
    InvalidKeyboard(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("midi error: {0}")]
    Midi(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PuncherError>;

fn format_candidates(candidates: &[TranspositionCandidate]) -> String {
    candidates
        .iter()
        .map(|c| format!("{:+} (misses {:?})", c.shift, c.misses))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            PuncherError::UnknownPitch(61).to_string(),
            "note 61 is not on the keyboard"
        );
        assert_eq!(
            PuncherError::EmptyEvent { index: 3 }.to_string(),
            "event 3 has no notes, consolidate consecutive delays first"
        );
        assert_eq!(
            PuncherError::MotorService("wave_create returned -67".into()).to_string(),
            "motor service error: wave_create returned -67"
        );
    }

    #[test]
    fn infeasible_lists_candidates() {
        let err = PuncherError::TranspositionInfeasible {
            notes: vec![60, 61, 62],
            candidates: vec![
                TranspositionCandidate {
                    shift: 0,
                    misses: vec![61],
                },
                TranspositionCandidate {
                    shift: -1,
                    misses: vec![61],
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("[60, 61, 62]"));
        assert!(msg.contains("+0 (misses [61])"));
        assert!(msg.contains("-1 (misses [61])"));
    }

    #[test]
    fn io_errors_convert() {
        let err: PuncherError = io::Error::other("socket closed").into();
        assert!(matches!(err, PuncherError::Io(_)));
        assert_eq!(err.to_string(), "socket closed");
    }
}
