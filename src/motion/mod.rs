//! Motion planning — acceleration profiles, per-axis pulse trains and their
//! synchronization into one two-axis move.
//!
//! Everything here is pure computation. Sending the result to the hardware is
//! the actuator's job, which lets the orchestrator compute the next move while
//! the current one is still running.

pub mod axis;
pub mod profile;
pub mod sync;
pub mod waveform;

use std::time::Duration;

pub use axis::StepperAxis;
pub use profile::AccelerationProfile;
pub use sync::{chunk_for_transmission, synchronize, MAX_PULSES_PER_CHUNK};
pub use waveform::{pulses_duration, AxisWaveform, Pulse};

use crate::config::PuncherConfig;

/// One hole: feed the strip by `feed` steps while moving the punch by `tone`
/// steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionStep {
    pub feed: i64,
    pub tone: i64,
}

impl MotionStep {
    pub fn new(feed: i64, tone: i64) -> Self {
        Self { feed, tone }
    }

    pub fn is_zero(&self) -> bool {
        self.feed == 0 && self.tone == 0
    }
}

/// A synchronized two-axis move, ready to transmit.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedMove {
    pub step: MotionStep,
    /// Feed axis first, tone axis second.
    pub waveforms: Vec<AxisWaveform>,
    /// Common duration of the waveforms in microseconds.
    pub duration_us: u64,
}

impl PreparedMove {
    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.duration_us)
    }

    pub fn is_empty(&self) -> bool {
        self.waveforms.iter().all(AxisWaveform::is_empty)
    }

    pub fn pulse_count(&self) -> usize {
        self.waveforms.iter().map(AxisWaveform::len).sum()
    }
}

/// The feed and tone axes of the machine.
#[derive(Debug, Clone)]
pub struct MotionPlanner {
    feed: StepperAxis,
    tone: StepperAxis,
}

impl MotionPlanner {
    pub fn new(config: &PuncherConfig) -> Self {
        Self {
            feed: StepperAxis::new(&config.feed_stepper),
            tone: StepperAxis::new(&config.tone_stepper),
        }
    }

    pub fn feed(&self) -> &StepperAxis {
        &self.feed
    }

    pub fn tone(&self) -> &StepperAxis {
        &self.tone
    }

    /// Build and synchronize the waveforms for one step.
    pub fn prepare(&self, step: MotionStep) -> PreparedMove {
        let mut waveforms = vec![
            self.feed.create_move_waveform(step.feed),
            self.tone.create_move_waveform(step.tone),
        ];
        let duration_us = synchronize(&mut waveforms);
        PreparedMove {
            step,
            waveforms,
            duration_us,
        }
    }
}
