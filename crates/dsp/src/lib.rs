//! Signal characterization for the re-identification pipeline:
//! rational resampling, carrier-frequency-offset estimation, and the
//! channel-independent spectrogram transform.

pub mod cfo;
pub mod resample;
pub mod spectrogram;

use num_complex::Complex32;

/// Full-scale divisor for the radio's 16-bit sample words.
pub const I16_FULL_SCALE: f32 = 32768.0;

/// Convert raw int16 I/Q arrays to complex samples normalized to [-1, 1).
pub fn iq_to_complex(i: &[i16], q: &[i16]) -> Vec<Complex32> {
    i.iter()
        .zip(q.iter())
        .map(|(&re, &im)| {
            Complex32::new(re as f32 / I16_FULL_SCALE, im as f32 / I16_FULL_SCALE)
        })
        .collect()
}
