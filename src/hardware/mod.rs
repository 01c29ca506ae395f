//! Pulse service — the only boundary that touches hardware.
//!
//! The contract follows the pigpio daemon: pins are configured and written
//! directly, while motion is described as pulse lists that the service merges
//! into one wave and plays back asynchronously.

pub mod pigpio;
pub mod simulated;

pub use pigpio::PigpioClient;
pub use simulated::{SimEvent, SimJournal, SimulatedPulseService};

use crate::error::Result;
use crate::motion::Pulse;

/// GPIO direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

/// Internal pull resistor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    Off,
    Down,
    Up,
}

/// Commands understood by a pulse generation service.
pub trait PulseService: Send {
    fn set_mode(&mut self, pin: u32, mode: PinMode) -> Result<()>;

    fn set_pull_up_down(&mut self, pin: u32, pull: Pull) -> Result<()>;

    /// Current level of an input pin.
    fn read(&mut self, pin: u32) -> Result<bool>;

    fn write(&mut self, pin: u32, level: bool) -> Result<()>;

    /// PWM duty cycle, 0 (off) to 255 (fully on).
    fn set_pwm_dutycycle(&mut self, pin: u32, duty: u8) -> Result<()>;

    /// Discard all buffered pulses and created waves.
    fn wave_clear(&mut self) -> Result<()>;

    /// Merge `pulses` into the wave buffer from time zero. Returns the total
    /// number of pulses in the buffer.
    fn wave_add_generic(&mut self, pulses: &[Pulse]) -> Result<u32>;

    /// Turn the buffer into a wave and return its id.
    fn wave_create(&mut self) -> Result<u32>;

    /// Start transmitting a wave once. Returns immediately.
    fn wave_send_once(&mut self, wave_id: u32) -> Result<u32>;

    /// Whether a wave is still being transmitted.
    fn wave_tx_busy(&mut self) -> Result<bool>;

    /// Largest number of pulses a single wave may hold.
    fn wave_max_pulses(&mut self) -> Result<u32>;
}
