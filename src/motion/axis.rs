//! One stepper axis: turns a signed step count into a trapezoidal pulse train.

use super::profile::AccelerationProfile;
use super::waveform::{AxisWaveform, Pulse};
use crate::config::StepperConfig;

/// Waveform generator for a single stepper motor.
#[derive(Debug, Clone)]
pub struct StepperAxis {
    profile: AccelerationProfile,
    /// Per-step delay at cruise speed, in seconds.
    cruise_delay: f64,
    /// Per-step delay at start speed, in seconds.
    slow_delay: f64,
    step_pin: u32,
    dir_pin: u32,
    reverse: bool,
}

impl StepperAxis {
    pub fn new(config: &StepperConfig) -> Self {
        Self {
            profile: AccelerationProfile::build(
                config.min_sps,
                config.max_sps,
                config.acceleration,
            ),
            cruise_delay: 1.0 / config.max_sps,
            slow_delay: 1.0 / config.min_sps,
            step_pin: config.step_pin,
            dir_pin: config.dir_pin,
            reverse: config.reverse,
        }
    }

    pub fn profile(&self) -> &AccelerationProfile {
        &self.profile
    }

    /// Step period used for slow moves such as homing.
    pub fn slow_delay(&self) -> f64 {
        self.slow_delay
    }

    pub fn step_pin(&self) -> u32 {
        self.step_pin
    }

    pub fn dir_pin(&self) -> u32 {
        self.dir_pin
    }

    /// Level of the direction pin for a move of `steps` (sign only).
    pub fn direction_level(&self, steps: i64) -> bool {
        (steps > 0) != self.reverse
    }

    /// Build the pulse train for a move of `steps` (sign gives direction).
    ///
    /// Accelerates along the profile, cruises, then decelerates along the same
    /// profile in reverse so the last step is taken at start speed. Moves too
    /// short to reach cruise speed turn around halfway. Each step is a high
    /// and a low pulse of half the step period; the first pulse also sets the
    /// direction pin.
    pub fn create_move_waveform(&self, steps: i64) -> AxisWaveform {
        let count = steps.unsigned_abs() as usize;
        let step_bit = 1u32 << self.step_pin;
        let dir_bit = 1u32 << self.dir_pin;
        let (mut dir_on, mut dir_off) = if self.direction_level(steps) {
            (dir_bit, 0)
        } else {
            (0, dir_bit)
        };

        let mut pulses = Vec::with_capacity(count * 2);
        let mut steps_to_stop = 0usize;
        for i in 0..count {
            let remaining = count - i - 1;
            let delay = if remaining <= steps_to_stop {
                self.profile.get(remaining)
            } else if i < self.profile.len() {
                steps_to_stop = i;
                self.profile.get(i)
            } else {
                None
            }
            .unwrap_or(self.cruise_delay);

            let half_us = ((delay * 1_000_000.0).round() as u32) >> 1;
            pulses.push(Pulse::new(step_bit | dir_on, dir_off, half_us));
            pulses.push(Pulse::new(0, step_bit, half_us));
            dir_on = 0;
            dir_off = 0;
        }
        AxisWaveform::new(pulses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(reverse: bool) -> StepperAxis {
        StepperAxis::new(&StepperConfig {
            min_sps: 1000.0,
            max_sps: 3000.0,
            acceleration: 1_000_000.0,
            dir_pin: 22,
            step_pin: 23,
            enable_pin: None,
            reverse,
        })
    }

    fn half_delays(wave: &AxisWaveform) -> Vec<u32> {
        wave.pulses().iter().step_by(2).map(|p| p.delay_us).collect()
    }

    #[test]
    fn zero_steps_give_empty_waveform() {
        assert!(axis(false).create_move_waveform(0).is_empty());
    }

    #[test]
    fn two_pulses_per_step() {
        let wave = axis(false).create_move_waveform(-7);
        assert_eq!(wave.len(), 14);
        for pair in wave.pulses().chunks(2) {
            assert_eq!(pair[0].gpio_on & (1 << 23), 1 << 23);
            assert_eq!(pair[1].gpio_off, 1 << 23);
            assert_eq!(pair[0].delay_us, pair[1].delay_us);
        }
    }

    #[test]
    fn direction_bit_only_on_first_pulse() {
        let a = axis(false);
        let forward = a.create_move_waveform(3);
        assert_eq!(forward.pulses()[0].gpio_on, (1 << 23) | (1 << 22));
        assert_eq!(forward.pulses()[0].gpio_off, 0);
        assert!(forward.pulses()[2..]
            .iter()
            .all(|p| (p.gpio_on | p.gpio_off) & (1 << 22) == 0));

        let backward = a.create_move_waveform(-3);
        assert_eq!(backward.pulses()[0].gpio_on, 1 << 23);
        assert_eq!(backward.pulses()[0].gpio_off, 1 << 22);
    }

    #[test]
    fn reverse_flips_direction_level() {
        assert!(axis(false).direction_level(5));
        assert!(!axis(true).direction_level(5));
        assert!(axis(true).direction_level(-5));
        let wave = axis(true).create_move_waveform(3);
        assert_eq!(wave.pulses()[0].gpio_off, 1 << 22);
    }

    #[test]
    fn long_move_is_a_full_trapezoid() {
        let a = axis(false);
        let ramp = a.profile().len();
        assert!(ramp >= 2);
        let wave = a.create_move_waveform(100);
        let halves = half_delays(&wave);
        assert_eq!(halves.len(), 100);
        // starts and ends at the slowest step
        assert_eq!(halves[0], 500);
        assert_eq!(halves[99], 500);
        // cruise in the middle
        assert_eq!(halves[50], ((1_000_000.0f64 / 3000.0).round() as u32) >> 1);
        // symmetric
        for i in 0..halves.len() {
            assert_eq!(halves[i], halves[halves.len() - 1 - i], "step {i}");
        }
        // never faster than cruise, never slower than start
        assert!(halves.iter().all(|&h| (166..=500).contains(&h)));
    }

    #[test]
    fn short_move_turns_around_halfway() {
        let a = axis(false);
        let ramp = a.profile().len();
        let count = ramp; // too short to reach cruise and come back
        let halves = half_delays(&a.create_move_waveform(count as i64));
        for i in 0..halves.len() {
            assert_eq!(halves[i], halves[halves.len() - 1 - i], "step {i}");
        }
        assert_eq!(halves[0], 500);
        assert_eq!(*halves.last().unwrap(), 500);
    }

    #[test]
    fn single_step_uses_start_speed() {
        let halves = half_delays(&axis(false).create_move_waveform(1));
        assert_eq!(halves, vec![500]);
    }

    #[test]
    fn empty_profile_cruises() {
        let a = StepperAxis::new(&StepperConfig {
            min_sps: 2000.0,
            max_sps: 2000.0,
            acceleration: 1000.0,
            dir_pin: 0,
            step_pin: 1,
            enable_pin: None,
            reverse: false,
        });
        assert!(a.profile().is_empty());
        let halves = half_delays(&a.create_move_waveform(4));
        assert_eq!(halves, vec![250; 4]);
    }
}
