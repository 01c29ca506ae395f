//! Pulse trains in the pulse service's format.

/// One pulse descriptor: set the `gpio_on` bits, clear the `gpio_off` bits,
/// then hold for `delay_us` microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub gpio_on: u32,
    pub gpio_off: u32,
    pub delay_us: u32,
}

impl Pulse {
    pub fn new(gpio_on: u32, gpio_off: u32, delay_us: u32) -> Self {
        Self {
            gpio_on,
            gpio_off,
            delay_us,
        }
    }

    /// A pulse that touches no pins and only takes time.
    pub fn filler(delay_us: u32) -> Self {
        Self::new(0, 0, delay_us)
    }
}

/// Total duration of a pulse list in microseconds.
pub fn pulses_duration(pulses: &[Pulse]) -> u64 {
    pulses.iter().map(|p| u64::from(p.delay_us)).sum()
}

/// One motor's pulse train for one move.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxisWaveform {
    pulses: Vec<Pulse>,
}

impl AxisWaveform {
    pub fn new(pulses: Vec<Pulse>) -> Self {
        Self { pulses }
    }

    pub fn pulses(&self) -> &[Pulse] {
        &self.pulses
    }

    pub fn len(&self) -> usize {
        self.pulses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pulses.is_empty()
    }

    /// Sum of all pulse delays, in microseconds.
    pub fn duration_us(&self) -> u64 {
        pulses_duration(&self.pulses)
    }

    /// Stretch every pulse by `factor`, rounding each delay.
    pub fn scale(&mut self, factor: f64) {
        for pulse in &mut self.pulses {
            pulse.delay_us = (f64::from(pulse.delay_us) * factor).round() as u32;
        }
    }
}
