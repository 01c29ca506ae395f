//! Acceleration profile — the ramp-up half of a trapezoidal speed curve.
//!
//! The rate is raised by `acceleration / rate` per step, i.e. by
//! `acceleration` times the duration of the step just taken, so the ramp is
//! linear in time without integrating a closed form.

/// Per-step delays in seconds while accelerating from the minimum to the
/// maximum rate. Deceleration walks the same table backwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccelerationProfile {
    delays: Vec<f64>,
}

impl AccelerationProfile {
    /// Build the ramp from `min_sps` up to (not including) `max_sps` steps per
    /// second. Empty when there is nothing to ramp, including the degenerate
    /// non-positive rate or acceleration cases.
    pub fn build(min_sps: f64, max_sps: f64, acceleration: f64) -> Self {
        let mut delays = Vec::new();
        if min_sps <= 0.0 || acceleration <= 0.0 {
            return Self { delays };
        }
        let mut sps = min_sps;
        while sps < max_sps {
            delays.push(1.0 / sps);
            sps += acceleration / sps;
        }
        Self { delays }
    }

    pub fn delays(&self) -> &[f64] {
        &self.delays
    }

    pub fn get(&self, idx: usize) -> Option<f64> {
        self.delays.get(idx).copied()
    }

    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }

    /// Time spent ramping from standstill to full speed.
    pub fn ramp_time(&self) -> f64 {
        self.delays.iter().sum()
    }
}
