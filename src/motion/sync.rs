//! Multi-axis synchronization and transmission chunking.
//!
//! The pulse service merges every added pulse list from time zero, so axes
//! run concurrently. Synchronizing stretches the shorter moves so both axes
//! start and stop together; chunking keeps each submission under the
//! service's per-call limit without moving any pulse in time.

use super::waveform::{pulses_duration, AxisWaveform, Pulse};

/// Pulses per `wave_add_generic` call that the pigpio socket handles safely.
pub const MAX_PULSES_PER_CHUNK: usize = 5000;

/// Stretch every non-empty waveform to the duration of the longest one.
///
/// Returns the common duration in microseconds. Empty waveforms are left
/// alone; a single non-empty waveform is returned unscaled.
pub fn synchronize(waveforms: &mut [AxisWaveform]) -> u64 {
    let longest = waveforms
        .iter()
        .map(AxisWaveform::duration_us)
        .max()
        .unwrap_or(0);
    for wave in waveforms.iter_mut().filter(|w| !w.is_empty()) {
        let length = wave.duration_us();
        if length > 0 && length != longest {
            wave.scale(longest as f64 / length as f64);
        }
    }
    longest
}

/// Split a waveform into submissions of at most `max_chunk` pulses.
///
/// Every chunk after the first starts with a filler pulse as long as all
/// pulses submitted before it, so each chunk lands where it was in the
/// undivided waveform.
pub fn chunk_for_transmission(waveform: &AxisWaveform, max_chunk: usize) -> Vec<Vec<Pulse>> {
    let max_chunk = max_chunk.max(2);
    let pulses = waveform.pulses();
    let mut chunks = Vec::new();
    let mut offset = 0u64;
    let mut start = 0;
    while start < pulses.len() {
        let mut chunk = Vec::with_capacity(max_chunk);
        if offset > 0 {
            chunk.push(Pulse::filler(offset as u32));
        }
        let end = (start + max_chunk - chunk.len()).min(pulses.len());
        chunk.extend_from_slice(&pulses[start..end]);
        offset += pulses_duration(&pulses[start..end]);
        start = end;
        chunks.push(chunk);
    }
    chunks
}
