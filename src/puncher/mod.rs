//! The punching run: homing, step planning, pipelined motion, punch and cut
//! scheduling, and the power-off policy that leaves the machine safe whatever
//! happens.

pub mod actuator;
pub mod run_control;
pub mod steps;

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use log::{error, info, warn};

pub use actuator::{build_actuator, Actuator, ActuatorKind, DebugActuator, PulseActuator, Status};
pub use run_control::RunControl;
pub use steps::plan_steps;

use crate::config::PuncherConfig;
use crate::error::Result;
use crate::motion::{MotionPlanner, MotionStep};
use crate::music::{Keyboard, NoteTimeline};

/// Where the machine is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PuncherState {
    Off,
    On,
    Homing,
    Idle,
    Running,
    Error,
}

/// How a run ended when nothing went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// Controller for one punching machine.
pub struct MusicPuncher {
    config: PuncherConfig,
    keyboard: Keyboard,
    planner: MotionPlanner,
    actuator: Box<dyn Actuator>,
    control: Arc<RunControl>,
    state: PuncherState,
    position: i64,
}

impl MusicPuncher {
    pub fn new(config: PuncherConfig, actuator: Box<dyn Actuator>) -> Result<Self> {
        config.validate()?;
        let keyboard = config.build_keyboard()?;
        let planner = MotionPlanner::new(&config);
        let control = Arc::new(RunControl::new());
        let position = config.idle_position;
        control.set_position(position);
        Ok(Self {
            config,
            keyboard,
            planner,
            actuator,
            control,
            state: PuncherState::Off,
            position,
        })
    }

    /// Share an existing run control, e.g. one a signal handler already holds.
    pub fn with_control(mut self, control: Arc<RunControl>) -> Self {
        control.set_position(self.position);
        self.control = control;
        self
    }

    pub fn control(&self) -> Arc<RunControl> {
        Arc::clone(&self.control)
    }

    pub fn config(&self) -> &PuncherConfig {
        &self.config
    }

    pub fn keyboard(&self) -> &Keyboard {
        &self.keyboard
    }

    pub fn state(&self) -> PuncherState {
        self.state
    }

    /// Tone-axis position in steps from home.
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Energize the drivers.
    pub fn on(&mut self) -> Result<()> {
        info!("switching the music puncher on");
        self.actuator.set_status(Status::On)?;
        self.actuator.enable()?;
        self.state = PuncherState::On;
        Ok(())
    }

    /// Bring the punch to the idle position, homing first if a sensor is
    /// fitted.
    pub fn reset(&mut self) -> Result<()> {
        self.state = PuncherState::Homing;
        let idle = self.config.idle_position;
        if self.actuator.has_home_sensor() {
            info!("homing the tone axis");
            self.actuator.seek_home()?;
            self.set_position(0);
            self.move_by(0, idle)?;
        } else {
            info!("no home sensor, assuming the punch is aligned at step {idle}");
            self.set_position(idle);
        }
        self.state = PuncherState::Idle;
        Ok(())
    }

    /// Motion steps for every hole of a consolidated timeline, starting from
    /// the current position.
    pub fn calculate_all_steps(&self, timeline: &NoteTimeline) -> Result<Vec<MotionStep>> {
        plan_steps(timeline, &self.keyboard, &self.config, self.position)
    }

    /// Punch the planned steps, cut the strip once, then park.
    ///
    /// The next move is computed while the current one runs. The stop request
    /// is honoured between holes.
    pub fn do_run(&mut self, steps: &[MotionStep]) -> Result<RunOutcome> {
        self.state = PuncherState::Running;
        let total_feed: i64 = steps.iter().map(|s| s.feed).sum();
        let cut_at = total_feed + self.config.cutter_position;
        let mut fed = 0;
        let mut did_cut = false;

        self.control.set_progress(0, steps.len());

        let mut next = steps.first().map(|&step| self.planner.prepare(step));
        let mut index = 0;
        while let Some(current) = next.take() {
            if self.control.is_cancelled() {
                info!("stopped after {index} of {} holes", steps.len());
                return Ok(RunOutcome::Cancelled);
            }
            self.actuator.start_move(&current)?;
            next = steps.get(index + 1).map(|&step| self.planner.prepare(step));
            self.actuator.wait_move()?;

            self.set_position(self.position + current.step.tone);
            self.actuator.punch()?;
            self.control.set_progress(index + 1, steps.len());
            fed += current.step.feed;
            if !did_cut && fed >= cut_at {
                self.actuator.cut()?;
                did_cut = true;
            }
            index += 1;
        }

        let idle = self.config.idle_position;
        if !did_cut {
            if self.config.cutter_position > 0 {
                self.move_by(self.config.cutter_position, idle - self.position)?;
            }
            self.actuator.cut()?;
        }
        if self.config.end_feed > 0 {
            self.move_by(self.config.end_feed, idle - self.position)?;
        }
        self.move_by(0, idle - self.position)?;
        self.state = PuncherState::Idle;
        info!("punched {} holes", steps.len());
        Ok(RunOutcome::Completed)
    }

    /// Punch a whole timeline. The machine is switched off afterwards, and
    /// homed first if the run failed. A stop request made during the run is
    /// used up by it.
    pub fn run(&mut self, timeline: &NoteTimeline) -> Result<RunOutcome> {
        info!("punching {} events", timeline.len());
        let mut session = PoweredSession::start(self)?;
        let result = session.reset().and_then(|_| {
            let steps = session.calculate_all_steps(timeline)?;
            session.do_run(&steps)
        });
        session.settle(result)
    }

    /// Punch reference holes at the first and last row to check alignment.
    pub fn calibrate(&mut self) -> Result<()> {
        info!("calibrating");
        let mut session = PoweredSession::start(self)?;
        let result = session.calibration_pattern();
        session.settle(result)
    }

    fn calibration_pattern(&mut self) -> Result<()> {
        self.reset()?;
        let row0 = self.config.row0;
        let last = self.config.last_row_position();
        let feed = (2.0 * self.config.feed_steps).round() as i64;
        let idle = self.config.idle_position;

        self.move_by(0, row0 - self.position)?;
        self.actuator.punch()?;
        self.move_by(0, last - self.position)?;
        self.actuator.punch()?;
        self.move_by(feed, 0)?;
        self.actuator.punch()?;
        self.move_by(0, row0 - self.position)?;
        self.actuator.punch()?;
        self.move_by(0, idle - self.position)?;
        self.state = PuncherState::Idle;
        Ok(())
    }

    /// De-energize the machine. Never fails; problems are logged.
    pub fn off(&mut self, force_reset: bool) {
        if force_reset {
            if let Err(e) = self.reset() {
                warn!("reset before switching off failed: {e}");
            }
        }
        info!("switching the music puncher off");
        if let Err(e) = self.actuator.disable() {
            error!("failed to disable the stepper drivers: {e}");
        }
        if let Err(e) = self.actuator.set_status(Status::Off) {
            error!("failed to switch the status light off: {e}");
        }
        self.state = PuncherState::Off;
    }

    fn move_by(&mut self, feed: i64, tone: i64) -> Result<()> {
        let step = MotionStep::new(feed, tone);
        if step.is_zero() {
            return Ok(());
        }
        let prepared = self.planner.prepare(step);
        self.actuator.start_move(&prepared)?;
        self.actuator.wait_move()?;
        self.set_position(self.position + tone);
        Ok(())
    }

    fn set_position(&mut self, position: i64) {
        self.position = position;
        self.control.set_position(position);
    }
}

/// A switched-on machine. Dropping it switches the machine off, homing first
/// unless the session was settled with a success.
struct PoweredSession<'a> {
    puncher: &'a mut MusicPuncher,
    failed: bool,
}

impl<'a> PoweredSession<'a> {
    fn start(puncher: &'a mut MusicPuncher) -> Result<Self> {
        let mut session = Self {
            puncher,
            failed: true,
        };
        session.puncher.on()?;
        Ok(session)
    }

    /// Record how the powered work went and hand its result back untouched.
    fn settle<T>(mut self, result: Result<T>) -> Result<T> {
        self.failed = result.is_err();
        result
    }
}

impl Deref for PoweredSession<'_> {
    type Target = MusicPuncher;

    fn deref(&self) -> &MusicPuncher {
        &*self.puncher
    }
}

impl DerefMut for PoweredSession<'_> {
    fn deref_mut(&mut self) -> &mut MusicPuncher {
        &mut *self.puncher
    }
}

impl Drop for PoweredSession<'_> {
    fn drop(&mut self) {
        self.puncher.off(self.failed);
        self.puncher.control.clear_stop();
        if self.failed {
            self.puncher.state = PuncherState::Error;
        }
    }
}
