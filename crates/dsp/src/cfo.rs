use num_complex::{Complex32, Complex64};
use std::f64::consts::PI;

use crate::resample::{rational_approx, RationalResampler};

/// All preamble indexing below assumes this rate.
pub const REFERENCE_RATE_HZ: f64 = 20e6;

const FFT_LEN: usize = 64;
/// The short training field spans the first 160 reference-rate samples,
/// the long training field the next 160.
const STF_LEN: usize = 160;
const LTF_END: usize = 320;
/// Denominator bound for the resampling ratio approximation.
const MAX_DENOMINATOR: u64 = 1_000_000;

/// Carrier-frequency-offset measurement for one preamble.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CfoEstimate {
    pub coarse_hz: f64,
    pub fine_hz: f64,
    pub total_hz: f64,
}

/// CFO from delayed self-correlation with lag `d`:
/// `hz = arg(sum conj(x[k]) * x[k+d]) * fs / (2*pi*d)`.
/// Returns 0.0 when the slice is too short to correlate.
fn cfo_from_lag(x: &[Complex64], d: usize, fs: f64) -> f64 {
    if d == 0 || x.len() <= d {
        return 0.0;
    }
    let mut r = Complex64::new(0.0, 0.0);
    for k in 0..x.len() - d {
        r += x[k].conj() * x[k + d];
    }
    r.arg() * fs / (2.0 * PI * d as f64)
}

/// Coarse CFO from the short training field (repeating 16-sample symbols).
fn coarse_estimate(stf: &[Complex64], fs: f64) -> f64 {
    let m = FFT_LEN / 4;
    let gi = FFT_LEN / 4;
    let offset = (0.75 * gi as f64).round() as usize;
    if stf.len() <= offset {
        return 0.0;
    }
    let use_len = (9 * m).min(stf.len() - offset);
    cfo_from_lag(&stf[offset..offset + use_len], m, fs)
}

/// Fine CFO from the long training field (two repeated 64-sample symbols),
/// expected to already be derotated by the coarse estimate.
fn fine_estimate(ltf: &[Complex64], fs: f64) -> f64 {
    let m = FFT_LEN;
    let gi = FFT_LEN / 2;
    let offset = (0.75 * gi as f64).round() as usize;
    if ltf.len() <= offset {
        return 0.0;
    }
    let use_len = (2 * m).min(ltf.len() - offset);
    cfo_from_lag(&ltf[offset..offset + use_len], m, fs)
}

/// Estimate coarse + fine CFO from a captured preamble.
///
/// When `source_rate` differs from the 20 MHz reference, the preamble is
/// first resampled by the best rational approximation of the rate ratio
/// so the training-field indexing lands on the standard sample positions.
/// Purely a measurement; no state is kept between calls.
pub fn estimate(iq: &[Complex32], source_rate: f64) -> CfoEstimate {
    let mut pre: Vec<Complex64> = iq
        .iter()
        .map(|c| Complex64::new(c.re as f64, c.im as f64))
        .collect();

    if (source_rate - REFERENCE_RATE_HZ).abs() > 1e-6 * REFERENCE_RATE_HZ {
        let (interp, decim) = rational_approx(REFERENCE_RATE_HZ / source_rate, MAX_DENOMINATOR);
        if interp != decim {
            pre = RationalResampler::new(interp as usize, decim as usize).process(&pre);
        }
    }

    let fs = REFERENCE_RATE_HZ;
    let coarse_hz = coarse_estimate(&pre[..STF_LEN.min(pre.len())], fs);

    // Derotate the whole preamble before the fine pass.
    let derotated: Vec<Complex64> = pre
        .iter()
        .enumerate()
        .map(|(n, &x)| x * Complex64::from_polar(1.0, -2.0 * PI * coarse_hz * n as f64 / fs))
        .collect();

    let ltf = &derotated[STF_LEN.min(derotated.len())..LTF_END.min(derotated.len())];
    let fine_hz = fine_estimate(ltf, fs);

    CfoEstimate {
        coarse_hz,
        fine_hz,
        total_hz: coarse_hz + fine_hz,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_offset(x: &[Complex32], offset_hz: f64, fs: f64) -> Vec<Complex32> {
        x.iter()
            .enumerate()
            .map(|(n, &v)| {
                let rot = Complex64::from_polar(1.0, 2.0 * PI * offset_hz * n as f64 / fs);
                let r = Complex64::new(v.re as f64, v.im as f64) * rot;
                Complex32::new(r.re as f32, r.im as f32)
            })
            .collect()
    }

    /// Deterministic unit-magnitude symbol with pseudo-random phases.
    fn symbol(len: usize, mut state: u32) -> Vec<Complex32> {
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                let phase = state as f64 / u32::MAX as f64 * 2.0 * PI;
                Complex32::new(phase.cos() as f32, phase.sin() as f32)
            })
            .collect()
    }

    /// 160 STF samples (period 16) + 160 LTF samples (period 64).
    fn preamble() -> Vec<Complex32> {
        let stf_sym = symbol(16, 1);
        let ltf_sym = symbol(64, 2);
        let mut pre = Vec::with_capacity(LTF_END);
        for n in 0..STF_LEN {
            pre.push(stf_sym[n % 16]);
        }
        for n in 0..STF_LEN {
            pre.push(ltf_sym[n % 64]);
        }
        pre
    }

    #[test]
    fn test_recovers_injected_offset_tone() {
        let flat = vec![Complex32::new(1.0, 0.0); LTF_END];
        let shifted = apply_offset(&flat, 5_000.0, REFERENCE_RATE_HZ);
        let est = estimate(&shifted, REFERENCE_RATE_HZ);
        assert!(
            (est.total_hz - 5_000.0).abs() < 200.0,
            "expected ~5 kHz, got {} Hz",
            est.total_hz
        );
    }

    #[test]
    fn test_recovers_offset_on_structured_preamble() {
        let shifted = apply_offset(&preamble(), 5_000.0, REFERENCE_RATE_HZ);
        let est = estimate(&shifted, REFERENCE_RATE_HZ);
        assert!(
            (est.total_hz - 5_000.0).abs() < 200.0,
            "expected ~5 kHz, got {} Hz",
            est.total_hz
        );
    }

    #[test]
    fn test_negative_offset() {
        let shifted = apply_offset(&preamble(), -12_500.0, REFERENCE_RATE_HZ);
        let est = estimate(&shifted, REFERENCE_RATE_HZ);
        assert!(
            (est.total_hz + 12_500.0).abs() < 200.0,
            "expected ~-12.5 kHz, got {} Hz",
            est.total_hz
        );
    }

    #[test]
    fn test_zero_offset() {
        let est = estimate(&preamble(), REFERENCE_RATE_HZ);
        assert!(est.total_hz.abs() < 50.0, "expected ~0 Hz, got {}", est.total_hz);
        assert_eq!(est.total_hz, est.coarse_hz + est.fine_hz);
    }

    #[test]
    fn test_resampled_source_rate() {
        // Tone captured at 25 Msps; extra tail keeps the training-field
        // windows clear of the resampler's edge transients.
        let fs_in = 25e6;
        let flat = vec![Complex32::new(1.0, 0.0); 480];
        let shifted = apply_offset(&flat, 5_000.0, fs_in);
        let est = estimate(&shifted, fs_in);
        assert!(
            (est.total_hz - 5_000.0).abs() < 250.0,
            "expected ~5 kHz after resampling, got {} Hz",
            est.total_hz
        );
    }

    #[test]
    fn test_short_input_degrades_to_zero() {
        let est = estimate(&[Complex32::new(1.0, 0.0); 8], REFERENCE_RATE_HZ);
        assert_eq!(est.total_hz, 0.0);
    }

    #[test]
    fn test_reproducible() {
        let shifted = apply_offset(&preamble(), 3_000.0, REFERENCE_RATE_HZ);
        let a = estimate(&shifted, REFERENCE_RATE_HZ);
        let b = estimate(&shifted, REFERENCE_RATE_HZ);
        assert_eq!(a, b);
    }
}
