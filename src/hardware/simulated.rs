//! In-process stand-in for the pigpio daemon.
//!
//! Keeps pin levels and wave buffers in memory, plays waves back in real time
//! (busy until the longest added pulse list has elapsed) and records every
//! command in a [`SimJournal`] that tests and dry runs can inspect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{PinMode, Pull, PulseService};
use crate::error::{PuncherError, Result};
use crate::motion::{pulses_duration, Pulse};

/// Chance that an input pin reads high on any given poll.
const INPUT_HIGH_PROBABILITY: f64 = 0.1;

const DEFAULT_MAX_PULSES: u32 = 12_000;

/// Something the simulated service was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    Mode { pin: u32, mode: PinMode },
    Pull { pin: u32, pull: Pull },
    Write { pin: u32, level: bool },
    Pwm { pin: u32, duty: u8 },
    WaveClear,
    WaveAdd { pulses: usize, duration_us: u64 },
    WaveSend { wave_id: u32, duration_us: u64 },
}

/// Shared, append-only record of simulated commands.
#[derive(Debug, Clone, Default)]
pub struct SimJournal {
    events: Arc<Mutex<Vec<SimEvent>>>,
}

impl SimJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: SimEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<SimEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times `pin` was driven high.
    pub fn pulses_on(&self, pin: u32) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SimEvent::Write { pin: p, level: true } if *p == pin))
            .count()
    }

    /// Last level written to `pin`, if any.
    pub fn last_level(&self, pin: u32) -> Option<bool> {
        self.events().iter().rev().find_map(|e| match e {
            SimEvent::Write { pin: p, level } if *p == pin => Some(*level),
            _ => None,
        })
    }

    /// Durations of every transmitted wave, in order.
    pub fn sent_waves(&self) -> Vec<u64> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                SimEvent::WaveSend { duration_us, .. } => Some(*duration_us),
                _ => None,
            })
            .collect()
    }

    /// Largest single pulse list ever submitted.
    pub fn largest_add(&self) -> usize {
        self.events()
            .iter()
            .filter_map(|e| match e {
                SimEvent::WaveAdd { pulses, .. } => Some(*pulses),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }
}

/// Pulse service that runs entirely in memory.
pub struct SimulatedPulseService {
    journal: SimJournal,
    rng: ChaCha8Rng,
    modes: HashMap<u32, PinMode>,
    /// Durations of the pulse lists added since the last clear.
    buffer: Vec<u64>,
    /// Created waves by id.
    waves: Vec<u64>,
    busy_until: Option<Instant>,
    max_pulses: u32,
    /// Number of `wave_create` calls that succeed before every later one fails.
    create_budget: Option<usize>,
}

impl SimulatedPulseService {
    pub fn new(seed: u64) -> Self {
        Self::with_journal(seed, SimJournal::new())
    }

    pub fn with_journal(seed: u64, journal: SimJournal) -> Self {
        Self {
            journal,
            rng: ChaCha8Rng::seed_from_u64(seed),
            modes: HashMap::new(),
            buffer: Vec::new(),
            waves: Vec::new(),
            busy_until: None,
            max_pulses: DEFAULT_MAX_PULSES,
            create_budget: None,
        }
    }

    pub fn journal(&self) -> SimJournal {
        self.journal.clone()
    }

    /// Make `wave_create` fail once it has succeeded `count` times.
    pub fn fail_wave_create_after(mut self, count: usize) -> Self {
        self.create_budget = Some(count);
        self
    }

    pub fn with_max_pulses(mut self, max_pulses: u32) -> Self {
        self.max_pulses = max_pulses;
        self
    }
}

impl PulseService for SimulatedPulseService {
    fn set_mode(&mut self, pin: u32, mode: PinMode) -> Result<()> {
        self.modes.insert(pin, mode);
        self.journal.record(SimEvent::Mode { pin, mode });
        Ok(())
    }

    fn set_pull_up_down(&mut self, pin: u32, pull: Pull) -> Result<()> {
        self.journal.record(SimEvent::Pull { pin, pull });
        Ok(())
    }

    fn read(&mut self, pin: u32) -> Result<bool> {
        match self.modes.get(&pin) {
            Some(PinMode::Input) => Ok(self.rng.gen_bool(INPUT_HIGH_PROBABILITY)),
            _ => Ok(self.journal.last_level(pin).unwrap_or(false)),
        }
    }

    fn write(&mut self, pin: u32, level: bool) -> Result<()> {
        self.journal.record(SimEvent::Write { pin, level });
        Ok(())
    }

    fn set_pwm_dutycycle(&mut self, pin: u32, duty: u8) -> Result<()> {
        self.journal.record(SimEvent::Pwm { pin, duty });
        Ok(())
    }

    fn wave_clear(&mut self) -> Result<()> {
        self.buffer.clear();
        self.waves.clear();
        self.journal.record(SimEvent::WaveClear);
        Ok(())
    }

    fn wave_add_generic(&mut self, pulses: &[Pulse]) -> Result<u32> {
        let duration_us = pulses_duration(pulses);
        self.buffer.push(duration_us);
        self.journal.record(SimEvent::WaveAdd {
            pulses: pulses.len(),
            duration_us,
        });
        Ok(pulses.len() as u32)
    }

    fn wave_create(&mut self) -> Result<u32> {
        if let Some(budget) = self.create_budget.as_mut() {
            if *budget == 0 {
                return Err(PuncherError::MotorService(
                    "wave_create failed with pigpio error -67".into(),
                ));
            }
            *budget -= 1;
        }
        // lists are merged from time zero, so the longest one sets the length
        let duration = self.buffer.iter().copied().max().unwrap_or(0);
        self.buffer.clear();
        self.waves.push(duration);
        Ok((self.waves.len() - 1) as u32)
    }

    fn wave_send_once(&mut self, wave_id: u32) -> Result<u32> {
        let duration_us = *self.waves.get(wave_id as usize).ok_or_else(|| {
            PuncherError::MotorService(format!("wave_send_once: unknown wave {wave_id}"))
        })?;
        debug!("simulating wave {wave_id} for {duration_us}us");
        self.busy_until = Some(Instant::now() + Duration::from_micros(duration_us));
        self.journal.record(SimEvent::WaveSend {
            wave_id,
            duration_us,
        });
        Ok(0)
    }

    fn wave_tx_busy(&mut self) -> Result<bool> {
        Ok(self.busy_until.is_some_and(|until| Instant::now() < until))
    }

    fn wave_max_pulses(&mut self) -> Result<u32> {
        Ok(self.max_pulses)
    }
}
