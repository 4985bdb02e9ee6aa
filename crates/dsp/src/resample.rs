use num_complex::Complex64;
use std::f64::consts::PI;

/// Modified Bessel function of the first kind, order 0 (for the Kaiser window)
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    let x_sq_over_4 = x * x / 4.0;
    for k in 1..=30 {
        term *= x_sq_over_4 / (k * k) as f64;
        sum += term;
        if term < sum * 1e-12 {
            break;
        }
    }
    sum
}

/// Kaiser window of length `n` with shape parameter `beta`.
fn kaiser(n: usize, beta: f64) -> Vec<f64> {
    let mut w = Vec::with_capacity(n);
    let n_f = n as f64;
    let denom = bessel_i0(beta);
    for i in 0..n {
        let x = 2.0 * i as f64 / (n_f - 1.0) - 1.0;
        let arg = beta * (1.0 - x * x).max(0.0).sqrt();
        w.push(bessel_i0(arg) / denom);
    }
    w
}

/// Best rational approximation `num/den` of `ratio` with `den <= max_den`,
/// via continued-fraction convergents and the closing semiconvergent.
pub fn rational_approx(ratio: f64, max_den: u64) -> (u64, u64) {
    assert!(ratio.is_finite() && ratio > 0.0, "ratio must be positive and finite");
    assert!(max_den >= 1);

    let (mut p0, mut q0, mut p1, mut q1) = (0u64, 1u64, 1u64, 0u64);
    let mut x = ratio;

    loop {
        let a = x.floor();
        if a > u64::MAX as f64 {
            break;
        }
        let a_int = a as u64;

        let (p2, q2) = match (
            a_int.checked_mul(p1).and_then(|v| v.checked_add(p0)),
            a_int.checked_mul(q1).and_then(|v| v.checked_add(q0)),
        ) {
            (Some(p2), Some(q2)) => (p2, q2),
            _ => break,
        };
        if q2 > max_den {
            break;
        }
        (p0, q0, p1, q1) = (p1, q1, p2, q2);

        let frac = x - a;
        if frac < 1e-12 {
            return (p1, q1);
        }
        x = 1.0 / frac;
    }

    if q1 == 0 {
        return (p0.max(1), q0);
    }
    // Semiconvergent with the largest denominator still within bound.
    let k = (max_den - q0) / q1;
    let (sp, sq) = (p0 + k * p1, q0 + k * q1);
    let err_conv = (p1 as f64 / q1 as f64 - ratio).abs();
    let err_semi = (sp as f64 / sq as f64 - ratio).abs();
    if sq > 0 && err_semi < err_conv {
        (sp, sq)
    } else {
        (p1, q1)
    }
}

/// Polyphase rational resampler: upsample by `interp`, lowpass, downsample
/// by `decim`. The prototype is a Kaiser-windowed sinc with cutoff at the
/// narrower of the two Nyquist bands and group delay compensated, so output
/// sample j sits at input time j*decim/interp.
pub struct RationalResampler {
    interp: usize,
    decim: usize,
    taps: Vec<f64>,
    half_len: usize,
}

impl RationalResampler {
    pub fn new(interp: usize, decim: usize) -> Self {
        assert!(interp > 0 && decim > 0);
        let max_rate = interp.max(decim);
        let half_len = 10 * max_rate;
        let n = 2 * half_len + 1;
        let fc = 0.5 / max_rate as f64; // cycles/sample in the upsampled stream
        let win = kaiser(n, 5.0);

        let mut taps = Vec::with_capacity(n);
        for (k, w) in win.iter().enumerate() {
            let t = k as f64 - half_len as f64;
            let x = 2.0 * fc * t;
            let sinc = if x.abs() < 1e-12 {
                1.0
            } else {
                (PI * x).sin() / (PI * x)
            };
            taps.push(sinc * w);
        }
        // Unity DC gain through the upsample-filter-downsample chain.
        let sum: f64 = taps.iter().sum();
        let scale = interp as f64 / sum;
        for t in taps.iter_mut() {
            *t *= scale;
        }

        Self {
            interp,
            decim,
            taps,
            half_len,
        }
    }

    pub fn interp(&self) -> usize {
        self.interp
    }

    pub fn decim(&self) -> usize {
        self.decim
    }

    /// Resample a whole block. Output length is ceil(len * interp / decim);
    /// samples past either edge of the input are taken as zero.
    pub fn process(&self, input: &[Complex64]) -> Vec<Complex64> {
        let (l, m) = (self.interp, self.decim);
        let n_out = (input.len() * l).div_ceil(m);
        let mut out = Vec::with_capacity(n_out);

        for j in 0..n_out {
            // Position of this output in the upsampled stream, shifted by
            // the filter's group delay.
            let u = j * m + self.half_len;
            let mut acc = Complex64::new(0.0, 0.0);
            let mut k = u % l;
            while k < self.taps.len() && k <= u {
                let idx = (u - k) / l;
                if idx < input.len() {
                    acc += input[idx] * self.taps[k];
                }
                k += l;
            }
            out.push(acc);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(n: usize, cycles_per_sample: f64) -> Vec<Complex64> {
        (0..n)
            .map(|i| Complex64::from_polar(1.0, 2.0 * PI * cycles_per_sample * i as f64))
            .collect()
    }

    /// Mean phase advance per sample, in cycles.
    fn measured_freq(x: &[Complex64]) -> f64 {
        let mut r = Complex64::new(0.0, 0.0);
        for k in 0..x.len() - 1 {
            r += x[k].conj() * x[k + 1];
        }
        r.arg() / (2.0 * PI)
    }

    #[test]
    fn test_rational_approx_exact() {
        assert_eq!(rational_approx(20e6 / 25e6, 1_000_000), (4, 5));
        assert_eq!(rational_approx(2.0, 1_000_000), (2, 1));
        assert_eq!(rational_approx(1.0, 1_000_000), (1, 1));
    }

    #[test]
    fn test_rational_approx_bounded() {
        let (num, den) = rational_approx(PI, 100);
        assert!(den <= 100);
        assert!((num as f64 / den as f64 - PI).abs() < 2e-4);
        assert_eq!((num, den), (311, 99));

        let (num, den) = rational_approx(PI, 1_000_000);
        assert!(den <= 1_000_000);
        assert!((num as f64 / den as f64 - PI).abs() < 1e-9);
    }

    #[test]
    fn test_downsample_tone_frequency() {
        // 4/5 resampling maps f cycles/sample to f*5/4 cycles/sample.
        let r = RationalResampler::new(4, 5);
        let input = tone(640, 0.02);
        let out = r.process(&input);
        assert_eq!(out.len(), 512);

        // Skip edge transients of about half_len/interp samples.
        let guard = 20;
        let f = measured_freq(&out[guard..out.len() - guard]);
        assert!(
            (f - 0.025).abs() < 1e-4,
            "expected 0.025 cycles/sample, got {}",
            f
        );
    }

    #[test]
    fn test_upsample_preserves_dc() {
        let r = RationalResampler::new(5, 4);
        let input = vec![Complex64::new(1.0, 0.0); 200];
        let out = r.process(&input);
        assert_eq!(out.len(), 250);
        // Interior should sit near the DC value; residual ripple comes
        // from the prototype's stopband leakage.
        for &v in &out[40..210] {
            assert!((v.re - 1.0).abs() < 0.05, "DC not preserved: {}", v.re);
            assert!(v.im.abs() < 1e-9);
        }
    }
}
