//! musicpuncher — drives a paper-strip music punching machine from MIDI files.
//!
//! A file is decoded into a note timeline, fitted onto the machine's keyboard,
//! turned into synchronized two-axis stepper moves and punched hole by hole.

pub mod config;
pub mod control;
pub mod error;
pub mod hardware;
pub mod motion;
pub mod music;
pub mod puncher;

pub use config::PuncherConfig;
pub use error::{PuncherError, Result};
pub use puncher::{MusicPuncher, PuncherState, RunOutcome};
