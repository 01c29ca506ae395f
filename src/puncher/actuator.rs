//! The machine as the orchestrator sees it: drivers, home sensor, two-axis
//! moves and the two solenoids.
//!
//! [`PulseActuator`] drives real (or simulated) pins through a
//! [`PulseService`]; [`DebugActuator`] only logs what it would do.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::{PuncherConfig, SolenoidConfig, StatusLedConfig};
use crate::error::{PuncherError, Result};
use crate::hardware::{PigpioClient, PinMode, Pull, PulseService, SimulatedPulseService};
use crate::motion::{chunk_for_transmission, PreparedMove, StepperAxis, MAX_PULSES_PER_CHUNK};

/// Margin added to a move's expected end before asking whether it finished.
const WAIT_MARGIN: Duration = Duration::from_millis(1);

/// Poll interval while the service still reports a wave in flight.
const BUSY_POLL: Duration = Duration::from_millis(100);

/// Status indicator colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    On,
    Off,
}

/// Capabilities the orchestrator needs from the machine.
pub trait Actuator: Send {
    /// Energize the stepper drivers.
    fn enable(&mut self) -> Result<()>;

    fn disable(&mut self) -> Result<()>;

    fn set_status(&mut self, status: Status) -> Result<()>;

    fn has_home_sensor(&self) -> bool;

    /// Move the tone axis slowly towards home until the sensor triggers.
    fn seek_home(&mut self) -> Result<()>;

    /// Start transmitting a move. Returns without waiting for it.
    fn start_move(&mut self, prepared: &PreparedMove) -> Result<()>;

    /// Block until the last started move has finished.
    fn wait_move(&mut self) -> Result<()>;

    fn punch(&mut self) -> Result<()>;

    fn cut(&mut self) -> Result<()>;
}

/// Which actuator to build at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorKind {
    Pigpio { address: String, port: u16 },
    Simulated { seed: u64 },
    Debug { timed: bool },
}

/// Build the actuator selected on the command line.
pub fn build_actuator(kind: &ActuatorKind, config: &PuncherConfig) -> Result<Box<dyn Actuator>> {
    Ok(match kind {
        ActuatorKind::Pigpio { address, port } => {
            let client = PigpioClient::connect(address, *port)?;
            Box::new(PulseActuator::new(client, config)?)
        }
        ActuatorKind::Simulated { seed } => {
            Box::new(PulseActuator::new(SimulatedPulseService::new(*seed), config)?)
        }
        ActuatorKind::Debug { timed } => Box::new(DebugActuator::new(config, *timed)),
    })
}

/// Actuator that drives GPIO pins through a pulse service.
pub struct PulseActuator<S: PulseService> {
    service: S,
    enable_pins: Vec<u32>,
    home_pin: Option<u32>,
    tone: StepperAxis,
    puncher: SolenoidConfig,
    cutter: SolenoidConfig,
    led: Option<StatusLedConfig>,
    homing_limit: u32,
    max_pulses: u32,
    expected_end: Option<Instant>,
}

impl<S: PulseService> PulseActuator<S> {
    /// Configure every pin the machine uses.
    pub fn new(mut service: S, config: &PuncherConfig) -> Result<Self> {
        let mut enable_pins = Vec::new();
        for stepper in [&config.feed_stepper, &config.tone_stepper] {
            service.set_mode(stepper.dir_pin, PinMode::Output)?;
            service.set_mode(stepper.step_pin, PinMode::Output)?;
            if let Some(pin) = stepper.enable_pin {
                service.set_mode(pin, PinMode::Output)?;
                enable_pins.push(pin);
            }
        }

        let home_pin = config.zero_button.as_ref().map(|button| button.pin);
        if let Some(pin) = home_pin {
            service.set_mode(pin, PinMode::Input)?;
            service.set_pull_up_down(pin, Pull::Down)?;
        }

        for solenoid in [&config.puncher, &config.cutter] {
            service.set_mode(solenoid.pin, PinMode::Output)?;
        }

        if let Some(led) = &config.status_led {
            for pin in [led.red_pin, led.green_pin, led.blue_pin] {
                service.set_mode(pin, PinMode::Output)?;
            }
        }

        let max_pulses = service.wave_max_pulses()?;
        info!("pulse service accepts up to {max_pulses} pulses per wave");

        Ok(Self {
            service,
            enable_pins,
            home_pin,
            tone: StepperAxis::new(&config.tone_stepper),
            puncher: config.puncher.clone(),
            cutter: config.cutter.clone(),
            led: config.status_led.clone(),
            homing_limit: config.homing_limit,
            max_pulses,
            expected_end: None,
        })
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut S {
        &mut self.service
    }

    fn fire(&mut self, solenoid: &SolenoidConfig) -> Result<()> {
        self.service.write(solenoid.pin, true)?;
        thread::sleep(Duration::from_secs_f64(solenoid.on_length));
        self.service.write(solenoid.pin, false)?;
        thread::sleep(Duration::from_secs_f64(solenoid.off_length));
        Ok(())
    }

    fn step_slowly(&mut self) -> Result<()> {
        let half = Duration::from_secs_f64(self.tone.slow_delay() / 2.0);
        let pin = self.tone.step_pin();
        self.service.write(pin, true)?;
        thread::sleep(half);
        self.service.write(pin, false)?;
        thread::sleep(half);
        Ok(())
    }
}

impl<S: PulseService> Actuator for PulseActuator<S> {
    fn enable(&mut self) -> Result<()> {
        for pin in self.enable_pins.clone() {
            self.service.write(pin, true)?;
        }
        Ok(())
    }

    fn disable(&mut self) -> Result<()> {
        for pin in self.enable_pins.clone() {
            self.service.write(pin, false)?;
        }
        Ok(())
    }

    fn set_status(&mut self, status: Status) -> Result<()> {
        let Some(led) = self.led.clone() else {
            return Ok(());
        };
        let rgb = match status {
            Status::On => led.rgb_on,
            Status::Off => led.rgb_off,
        };
        for (pin, duty) in [led.red_pin, led.green_pin, led.blue_pin].into_iter().zip(rgb) {
            self.service.set_pwm_dutycycle(pin, duty)?;
        }
        Ok(())
    }

    fn has_home_sensor(&self) -> bool {
        self.home_pin.is_some()
    }

    fn seek_home(&mut self) -> Result<()> {
        let Some(home) = self.home_pin else {
            return Ok(());
        };
        self.service
            .write(self.tone.dir_pin(), self.tone.direction_level(-1))?;
        for taken in 0..self.homing_limit {
            if self.service.read(home)? {
                debug!("home sensor triggered after {taken} steps");
                return Ok(());
            }
            self.step_slowly()?;
        }
        Err(PuncherError::HomingFailed(self.homing_limit))
    }

    fn start_move(&mut self, prepared: &PreparedMove) -> Result<()> {
        if prepared.is_empty() {
            self.expected_end = None;
            return Ok(());
        }
        if prepared.pulse_count() > self.max_pulses as usize {
            warn!(
                "move {:?} needs {} pulses, the pulse service allows {}",
                prepared.step,
                prepared.pulse_count(),
                self.max_pulses
            );
        }

        self.service.wave_clear()?;
        for waveform in &prepared.waveforms {
            for chunk in chunk_for_transmission(waveform, MAX_PULSES_PER_CHUNK) {
                self.service.wave_add_generic(&chunk)?;
            }
        }
        let wave_id = self.service.wave_create()?;
        self.service.wave_send_once(wave_id)?;
        self.expected_end = Some(Instant::now() + prepared.duration());
        debug!(
            "sent move {:?}: {} pulses, {}us",
            prepared.step,
            prepared.pulse_count(),
            prepared.duration_us
        );
        Ok(())
    }

    fn wait_move(&mut self) -> Result<()> {
        let Some(end) = self.expected_end.take() else {
            return Ok(());
        };
        let deadline = end + WAIT_MARGIN;
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
        while self.service.wave_tx_busy()? {
            thread::sleep(BUSY_POLL);
        }
        Ok(())
    }

    fn punch(&mut self) -> Result<()> {
        let puncher = self.puncher.clone();
        self.fire(&puncher)
    }

    fn cut(&mut self) -> Result<()> {
        let cutter = self.cutter.clone();
        self.fire(&cutter)
    }
}

/// Actuator that only logs, optionally taking as long as the machine would.
pub struct DebugActuator {
    timed: bool,
    punch_time: Duration,
    cut_time: Duration,
    pending: Duration,
}

impl DebugActuator {
    pub fn new(config: &PuncherConfig, timed: bool) -> Self {
        let solenoid_time =
            |s: &SolenoidConfig| Duration::from_secs_f64(s.on_length + s.off_length);
        Self {
            timed,
            punch_time: solenoid_time(&config.puncher),
            cut_time: solenoid_time(&config.cutter),
            pending: Duration::ZERO,
        }
    }

    fn pause(&self, duration: Duration) {
        if self.timed {
            thread::sleep(duration);
        }
    }
}

impl Actuator for DebugActuator {
    fn enable(&mut self) -> Result<()> {
        info!("drivers enabled");
        Ok(())
    }

    fn disable(&mut self) -> Result<()> {
        info!("drivers disabled");
        Ok(())
    }

    fn set_status(&mut self, status: Status) -> Result<()> {
        debug!("status {status:?}");
        Ok(())
    }

    fn has_home_sensor(&self) -> bool {
        false
    }

    fn seek_home(&mut self) -> Result<()> {
        Ok(())
    }

    fn start_move(&mut self, prepared: &PreparedMove) -> Result<()> {
        info!(
            "move feed {} tone {} ({:.3}s)",
            prepared.step.feed,
            prepared.step.tone,
            prepared.duration().as_secs_f64()
        );
        self.pending = prepared.duration();
        Ok(())
    }

    fn wait_move(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        self.pause(pending);
        Ok(())
    }

    fn punch(&mut self) -> Result<()> {
        info!("punch");
        self.pause(self.punch_time);
        Ok(())
    }

    fn cut(&mut self) -> Result<()> {
        info!("cut");
        self.pause(self.cut_time);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ButtonConfig, StatusLedConfig};
    use crate::hardware::{SimEvent, SimJournal};
    use crate::motion::{MotionPlanner, MotionStep};

    fn fast_config() -> PuncherConfig {
        let mut config = PuncherConfig::default();
        for stepper in [&mut config.feed_stepper, &mut config.tone_stepper] {
            stepper.min_sps = 20_000.0;
            stepper.max_sps = 40_000.0;
            stepper.acceleration = 1_000_000_000.0;
        }
        config.feed_stepper.enable_pin = Some(27);
        config.puncher.on_length = 0.0;
        config.puncher.off_length = 0.0;
        config.cutter.on_length = 0.0;
        config.cutter.off_length = 0.0;
        config
    }

    fn simulated(config: &PuncherConfig) -> (PulseActuator<SimulatedPulseService>, SimJournal) {
        let journal = SimJournal::new();
        let service = SimulatedPulseService::with_journal(3, journal.clone());
        (PulseActuator::new(service, config).unwrap(), journal)
    }

    #[test]
    fn configures_pins() {
        let mut config = fast_config();
        config.zero_button = Some(ButtonConfig { pin: 2 });
        let (actuator, journal) = simulated(&config);
        assert!(actuator.has_home_sensor());
        let events = journal.events();
        for pin in [17, 18, 22, 23, 27, 3, 4] {
            assert!(events.contains(&SimEvent::Mode {
                pin,
                mode: PinMode::Output
            }));
        }
        assert!(events.contains(&SimEvent::Mode {
            pin: 2,
            mode: PinMode::Input
        }));
        assert!(events.contains(&SimEvent::Pull {
            pin: 2,
            pull: Pull::Down
        }));
    }

    #[test]
    fn enable_and_disable_drive_enable_pins() {
        let (mut actuator, journal) = simulated(&fast_config());
        actuator.enable().unwrap();
        assert_eq!(journal.last_level(27), Some(true));
        actuator.disable().unwrap();
        assert_eq!(journal.last_level(27), Some(false));
    }

    #[test]
    fn status_led_uses_pwm() {
        let mut config = fast_config();
        config.status_led = Some(StatusLedConfig {
            red_pin: 9,
            green_pin: 10,
            blue_pin: 11,
            rgb_on: [0, 255, 0],
            rgb_off: [16, 0, 0],
        });
        let (mut actuator, journal) = simulated(&config);
        actuator.set_status(Status::On).unwrap();
        let events = journal.events();
        assert!(events.contains(&SimEvent::Pwm { pin: 10, duty: 255 }));
        assert!(events.contains(&SimEvent::Pwm { pin: 9, duty: 0 }));
    }

    #[test]
    fn punch_and_cut_pulse_their_pins() {
        let (mut actuator, journal) = simulated(&fast_config());
        actuator.punch().unwrap();
        actuator.punch().unwrap();
        actuator.cut().unwrap();
        assert_eq!(journal.pulses_on(3), 2);
        assert_eq!(journal.pulses_on(4), 1);
        assert_eq!(journal.last_level(3), Some(false));
    }

    #[test]
    fn move_is_sent_and_awaited() {
        let config = fast_config();
        let planner = MotionPlanner::new(&config);
        let (mut actuator, journal) = simulated(&config);
        let prepared = planner.prepare(MotionStep::new(200, -50));
        let started = Instant::now();
        actuator.start_move(&prepared).unwrap();
        actuator.wait_move().unwrap();
        assert!(started.elapsed() >= prepared.duration());
        let sent = journal.sent_waves();
        assert_eq!(sent.len(), 1);
        // the stretched tone axis may round a few microseconds long
        assert!(sent[0].abs_diff(prepared.duration_us) <= 100);
    }

    #[test]
    fn empty_move_sends_nothing() {
        let config = fast_config();
        let planner = MotionPlanner::new(&config);
        let (mut actuator, journal) = simulated(&config);
        actuator.start_move(&planner.prepare(MotionStep::default())).unwrap();
        actuator.wait_move().unwrap();
        assert!(journal.sent_waves().is_empty());
    }

    #[test]
    fn long_moves_are_chunked() {
        let config = fast_config();
        let planner = MotionPlanner::new(&config);
        let (mut actuator, journal) = simulated(&config);
        let prepared = planner.prepare(MotionStep::new(6000, 0));
        actuator.start_move(&prepared).unwrap();
        actuator.wait_move().unwrap();
        assert!(journal.largest_add() <= MAX_PULSES_PER_CHUNK);
        assert_eq!(journal.sent_waves(), vec![prepared.duration_us]);
    }

    #[test]
    fn homing_finds_sensor() {
        let mut config = fast_config();
        config.zero_button = Some(ButtonConfig { pin: 2 });
        let (mut actuator, journal) = simulated(&config);
        actuator.seek_home().unwrap();
        // direction set towards home once, before stepping
        assert_eq!(journal.last_level(22), Some(false));
    }

    #[test]
    fn homing_gives_up() {
        let mut config = fast_config();
        config.zero_button = Some(ButtonConfig { pin: 2 });
        config.homing_limit = 0;
        let (mut actuator, _) = simulated(&config);
        assert!(matches!(
            actuator.seek_home(),
            Err(PuncherError::HomingFailed(0))
        ));
    }

    #[test]
    fn create_failure_is_reported() {
        let config = fast_config();
        let planner = MotionPlanner::new(&config);
        let service = SimulatedPulseService::new(1).fail_wave_create_after(0);
        let mut actuator = PulseActuator::new(service, &config).unwrap();
        let err = actuator
            .start_move(&planner.prepare(MotionStep::new(10, 0)))
            .unwrap_err();
        assert!(matches!(err, PuncherError::MotorService(_)));
    }

    #[test]
    fn debug_actuator_runs_untimed() {
        let config = PuncherConfig::default();
        let planner = MotionPlanner::new(&config);
        let mut actuator = DebugActuator::new(&config, false);
        let started = Instant::now();
        actuator.enable().unwrap();
        actuator.start_move(&planner.prepare(MotionStep::new(1000, 300))).unwrap();
        actuator.wait_move().unwrap();
        actuator.punch().unwrap();
        actuator.cut().unwrap();
        assert!(!actuator.has_home_sensor());
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn builds_simulated_and_debug() {
        let config = fast_config();
        assert!(build_actuator(&ActuatorKind::Simulated { seed: 1 }, &config).is_ok());
        let debug = build_actuator(&ActuatorKind::Debug { timed: false }, &config).unwrap();
        assert!(!debug.has_home_sensor());
    }
}
