//! Spectra of the transmitted pulse and of the probe
//!
//! The probe response is a generalized normal window centered at the center
//! frequency whose -6dB width is the fractional bandwidth of the probe.
//! The transmitted pulse is a `tx_now`-cycle sinusoid.

use std::f64::consts::{LN_2, PI};

use num_complex::Complex64;
use rustfft::FftPlanner;

use crate::param::{Param, ParamError};

/// One-way (transmission) or two-way (pulse-echo) propagation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Way {
    One,
    Two,
}

/// `sin(x)/x`
pub fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1f64
    } else {
        x.sin() / x
    }
}

#[derive(Debug, Clone)]
pub struct Spectrum {
    fc: f64,
    wc: f64,
    // probe spectrum shape exponent
    p: f64,
    // probe spectrum scale [rad/s]
    scale: f64,
    // pulse duration
    duration: f64,
}
impl Spectrum {
    pub fn new(param: &Param) -> Self {
        let fc = param.fc;
        let wc = 2f64 * PI * fc;
        let wb = param.bandwidth * wc / 100f64;
        let p = 126f64.ln() / (2f64 * wc / wb).ln();
        Self {
            fc,
            wc,
            p,
            scale: wb / 2f64 / LN_2.powf(1f64 / p),
            duration: param.tx_now / fc,
        }
    }
    /// Probe frequency response at frequency `f`
    pub fn probe(&self, f: f64) -> f64 {
        let w = 2f64 * PI * f;
        (-((w - self.wc).abs() / self.scale).powf(self.p)).exp()
    }
    /// Spectrum of the transmitted pulse at frequency `f`
    pub fn pulse(&self, f: f64) -> Complex64 {
        let w = 2f64 * PI * f;
        let t = self.duration;
        Complex64::new(
            0f64,
            sinc(t * (w - self.wc) / 2f64) - sinc(t * (w + self.wc) / 2f64),
        )
    }
    /// Pulse spectrum filtered by the probe once or twice
    pub fn response(&self, f: f64, way: Way) -> Complex64 {
        let probe = self.probe(f);
        match way {
            Way::One => self.pulse(f) * probe,
            Way::Two => self.pulse(f) * probe * probe,
        }
    }
    /// Upper frequency above which the probe response is below `threshold` (linear)
    pub fn upper_frequency(&self, threshold: f64) -> f64 {
        let dw = self.scale * (-threshold.ln()).max(0f64).powf(1f64 / self.p);
        (self.wc + dw) / 2f64 / PI
    }
    /// Duration of the transmitted pulse plus the ring-down of the probe
    pub fn duration(&self) -> f64 {
        // the probe impulse response lasts about a few inverse half-bandwidths
        self.duration + 4f64 * 2f64 * PI / self.scale
    }
    /// Indices `k` of the frequencies `k df` where the spectrum is above `db` (negative) dB
    pub fn band(&self, df: f64, db: f64, way: Way) -> Vec<usize> {
        let threshold = 10f64.powf(db / 20f64);
        let probe_threshold = match way {
            Way::One => threshold,
            Way::Two => threshold.sqrt(),
        };
        let k_max = (self.upper_frequency(probe_threshold) / df).ceil() as usize;
        let magnitudes: Vec<f64> = (0..=k_max)
            .map(|k| self.response(k as f64 * df, way).norm())
            .collect();
        let max = magnitudes.iter().cloned().fold(0f64, f64::max);
        magnitudes
            .into_iter()
            .enumerate()
            .skip(1)
            .filter(|(_, m)| *m > 0f64 && *m >= threshold * max)
            .map(|(k, _)| k)
            .collect()
    }
}

/// Returns the one-way or two-way pulse and its time vector
///
/// The pulse is normalized to a unit peak magnitude and the time vector is centered on 0.
/// The sampling frequency is `param.fs` or 20 times the center frequency.
pub fn getpulse(param: &Param, way: Way) -> Result<(Vec<f64>, Vec<f64>), ParamError> {
    if !(param.fc > 0f64) {
        return Err(ParamError::CenterFrequency);
    }
    if !(param.bandwidth > 0f64 && param.bandwidth < 200f64) {
        return Err(ParamError::Bandwidth(param.bandwidth));
    }
    let spectrum = Spectrum::new(param);
    let fs = param.fs.unwrap_or(20f64 * param.fc).max(4f64 * param.fc);
    let span = 4f64 * spectrum.duration();
    let nfft = ((span * fs).ceil() as usize).next_power_of_two().max(64);
    let df = fs / nfft as f64;

    let mut buffer = vec![Complex64::new(0f64, 0f64); nfft];
    for k in spectrum.band(df, -100f64, way) {
        if k < nfft / 2 {
            buffer[k] = spectrum.response(k as f64 * df, way);
        }
    }
    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_inverse(nfft).process(&mut buffer);
    let signal: Vec<f64> = buffer.iter().map(|x| 2f64 * df * x.re).collect();

    // the pulse is centered on t=0: rotate it to the middle of the buffer
    let half = nfft / 2;
    let centered: Vec<f64> = signal[half..].iter().chain(&signal[..half]).cloned().collect();
    let peak = centered.iter().fold(0f64, |m, x| m.max(x.abs()));
    let threshold = 1e-3 * peak;
    let first = centered.iter().position(|x| x.abs() > threshold).unwrap_or(0);
    // symmetric trimming
    let extent = half.saturating_sub(first).min(half - 1);
    let (start, end) = (half - extent, (half + extent + 1).min(nfft));
    let pulse: Vec<f64> = centered[start..end].iter().map(|x| x / peak).collect();
    let t: Vec<f64> = (start..end)
        .map(|n| (n as f64 - half as f64) / fs)
        .collect();
    Ok((pulse, t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::{getparam, Probe};

    #[test]
    fn probe_bandwidth() {
        let param = getparam(Probe::L11_5v);
        let spectrum = Spectrum::new(&param);
        assert!((spectrum.probe(param.fc) - 1.).abs() < 1e-12);
        // -6dB at fc(1 +/- B/200)
        let f = param.fc * (1. + param.bandwidth / 200.);
        assert!((spectrum.probe(f) - 0.5).abs() < 1e-9);
        let f = param.fc * (1. - param.bandwidth / 200.);
        assert!((spectrum.probe(f) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn pulse_peak_at_center_frequency() {
        let param = getparam(Probe::P4_2v);
        let spectrum = Spectrum::new(&param);
        assert!((spectrum.pulse(param.fc).im - 1.).abs() < 1e-12);
        assert!(spectrum.pulse(param.fc).re.abs() < 1e-15);
    }

    #[test]
    fn band_contains_center_frequency() {
        let param = getparam(Probe::C5_2v);
        let spectrum = Spectrum::new(&param);
        let df = 10e3;
        let band = spectrum.band(df, -60., Way::Two);
        let kc = (param.fc / df).round() as usize;
        assert!(band.contains(&kc));
        assert!(band.iter().all(|&k| k > 0));
        assert!(*band.last().unwrap() as f64 * df < 3. * param.fc);
    }

    #[test]
    fn pulses_are_normalized_and_centered() {
        let param = getparam(Probe::L11_5v);
        let (one, t1) = getpulse(&param, Way::One).unwrap();
        let (two, t2) = getpulse(&param, Way::Two).unwrap();
        assert_eq!(one.len(), t1.len());
        assert_eq!(two.len(), t2.len());
        let peak = two.iter().fold(0f64, |m, x| m.max(x.abs()));
        assert!((peak - 1.).abs() < 1e-12);
        // time vector is centered on 0
        assert!((t1[0] + t1[t1.len() - 1]).abs() < 1e-12);
    }
}
