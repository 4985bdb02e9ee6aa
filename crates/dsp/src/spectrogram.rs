use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use thiserror::Error;

/// Guard frequency rows removed from the finished spectrogram, indexed
/// on the 80-bin axis: the band edges and the null center subcarrier.
/// Indices beyond the actual axis are ignored.
fn is_guard_row(row: usize) -> bool {
    row < 14 || row == 40 || (67..80).contains(&row)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("insufficient samples: got {got}, window {window}")]
    InsufficientSamples { got: usize, window: usize },
}

/// Standardized log-magnitude spectrogram, row-major `[freq][time]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    pub freq_bins: usize,
    pub time_bins: usize,
    pub data: Vec<f32>,
}

impl Spectrogram {
    pub fn get(&self, freq: usize, time: usize) -> f32 {
        self.data[freq * self.time_bins + time]
    }
}

/// Channel-independent spectrogram generator.
///
/// Dividing each STFT column by its predecessor cancels the static
/// channel response shared between adjacent symbols, leaving the
/// transmitter's own spectral signature.
pub struct SpectrogramBuilder {
    window_len: usize,
    hop: usize,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
}

impl SpectrogramBuilder {
    /// Create a builder for a given STFT window length. The FFT plan and
    /// scratch buffer are reused across frames.
    pub fn new(window_len: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(window_len);
        let scratch_len = fft.get_inplace_scratch_len();
        let overlap = (0.9 * window_len as f64).round() as usize;
        Self {
            window_len,
            hop: (window_len - overlap).max(1),
            fft,
            scratch: vec![Complex32::new(0.0, 0.0); scratch_len],
        }
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// Build the spectrogram for one frame of IQ samples.
    pub fn build(&mut self, iq: &[Complex32]) -> Result<Spectrogram, SpecError> {
        let win = self.window_len;
        if iq.len() < win {
            return Err(SpecError::InsufficientSamples {
                got: iq.len(),
                window: win,
            });
        }

        // Normalize to unit mean power.
        let rms = (iq.iter().map(|c| c.norm_sqr()).sum::<f32>() / iq.len() as f32).sqrt();
        let scale = if rms > 0.0 { 1.0 / rms } else { 1.0 };

        // Rectangular-window STFT, two-sided, zero frequency centered.
        let mut columns: Vec<Vec<Complex32>> = Vec::new();
        let mut pos = 0;
        while pos + win <= iq.len() {
            let mut buf: Vec<Complex32> = iq[pos..pos + win].iter().map(|&c| c * scale).collect();
            self.fft.process_with_scratch(&mut buf, &mut self.scratch);
            buf.rotate_right(win / 2); // fftshift
            columns.push(buf);
            pos += self.hop;
        }

        // Ratio of adjacent columns, then log magnitude. The first
        // column only serves as a reference and is dropped.
        let time_bins = columns.len() - 1;
        let mut values = vec![0f32; win * time_bins];
        for t in 0..time_bins {
            for f in 0..win {
                let ratio = columns[t + 1][f] / columns[t][f];
                let mut mag_sq = ratio.norm_sqr();
                if !mag_sq.is_finite() {
                    mag_sq = f32::MAX;
                }
                // Empty bins would otherwise take log of zero.
                values[f * time_bins + t] = mag_sq.max(f32::MIN_POSITIVE).log10();
            }
        }

        // Standardize to zero mean, unit variance.
        if !values.is_empty() {
            let n = values.len() as f64;
            let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
            let var = values
                .iter()
                .map(|&v| {
                    let d = v as f64 - mean;
                    d * d
                })
                .sum::<f64>()
                / n;
            let std = var.sqrt().max(f64::MIN_POSITIVE);
            for v in values.iter_mut() {
                *v = ((*v as f64 - mean) / std) as f32;
            }
        }

        // Drop the guard rows.
        let kept: Vec<usize> = (0..win).filter(|&f| !is_guard_row(f)).collect();
        let mut data = Vec::with_capacity(kept.len() * time_bins);
        for &f in &kept {
            data.extend_from_slice(&values[f * time_bins..(f + 1) * time_bins]);
        }

        Ok(Spectrogram {
            freq_bins: kept.len(),
            time_bins,
            data,
        })
    }
}
