//! RF and I/Q signal processing: time-gain compensation, I/Q demodulation and B-mode images

use std::f64::consts::PI;

use nalgebra::DMatrix;
use num_complex::Complex64;
use rustfft::FftPlanner;

use crate::spectrum::sinc;

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("the signals are empty")]
    Empty,
    #[error("the sampling frequency must be positive, found {0}")]
    SamplingFrequency(f64),
    #[error("the center frequency must be in ]0,fs/2[, found {0}")]
    CenterFrequency(f64),
    #[error("the center frequency cannot be estimated from null signals")]
    NullSignals,
    #[error("the dynamic range must be positive, found {0}")]
    DynamicRange(f64),
}
type Result<T> = std::result::Result<T, SignalError>;

/// Centered moving average
fn smooth(x: &[f64], half: usize) -> Vec<f64> {
    let n = x.len();
    let mut cumsum = vec![0f64; n + 1];
    for (i, v) in x.iter().enumerate() {
        cumsum[i + 1] = cumsum[i] + v;
    }
    (0..n)
        .map(|i| {
            let (a, b) = (i.saturating_sub(half), (i + half + 1).min(n));
            (cumsum[b] - cumsum[a]) / (b - a) as f64
        })
        .collect()
}

/// Time-gain compensation of RF signals (one column per channel)
///
/// The mean envelope of the signals is fitted by a decaying exponential `exp(-a n)`
/// and the signals are amplified by `exp(a n)`, `n` being the sample index.
/// Returns the compensated signals and the gain.
pub fn tgc(rf: &DMatrix<f64>) -> Result<(DMatrix<f64>, Vec<f64>)> {
    if rf.is_empty() {
        return Err(SignalError::Empty);
    }
    let (n, m) = rf.shape();
    let envelope: Vec<f64> = rf
        .row_iter()
        .map(|row| row.iter().map(|x| x.abs()).sum::<f64>() / m as f64)
        .collect();
    let envelope = smooth(&envelope, (n / 20).max(1));
    let max = envelope.iter().cloned().fold(0f64, f64::max);
    let a = if max > 0f64 && n > 1 {
        // least-squares fit of the log-envelope
        let log: Vec<f64> = envelope
            .iter()
            .map(|e| (e / max).max(1e-12).ln())
            .collect();
        let mean_t = (n - 1) as f64 / 2f64;
        let mean_log = log.iter().sum::<f64>() / n as f64;
        let (num, den) = log
            .iter()
            .enumerate()
            .fold((0f64, 0f64), |(num, den), (i, l)| {
                let t = i as f64 - mean_t;
                (num + t * (l - mean_log), den + t * t)
            });
        (-num / den).max(0f64)
    } else {
        0f64
    };
    log::debug!("tgc: exponential gain coefficient {:.3e}/sample", a);
    let gain: Vec<f64> = (0..n).map(|i| (a * i as f64).exp()).collect();
    let compensated = DMatrix::from_fn(n, m, |i, j| rf[(i, j)] * gain[i]);
    Ok((compensated, gain))
}

/// Center frequency from the power spectrum of the signals
pub fn center_frequency(rf: &DMatrix<f64>, fs: f64) -> Result<f64> {
    if rf.is_empty() {
        return Err(SignalError::Empty);
    }
    let n = rf.nrows();
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let mut power = vec![0f64; n / 2 + 1];
    let mut buffer = vec![Complex64::new(0f64, 0f64); n];
    for column in rf.column_iter() {
        let mean = column.mean();
        buffer
            .iter_mut()
            .zip(column.iter())
            .for_each(|(b, x)| *b = Complex64::new(x - mean, 0f64));
        fft.process(&mut buffer);
        power
            .iter_mut()
            .zip(&buffer)
            .for_each(|(p, x)| *p += x.norm_sqr());
    }
    let total: f64 = power.iter().sum();
    if total == 0f64 {
        return Err(SignalError::NullSignals);
    }
    let df = fs / n as f64;
    Ok(power
        .iter()
        .enumerate()
        .map(|(k, p)| k as f64 * df * p)
        .sum::<f64>()
        / total)
}

/// Low-pass windowed-sinc (Hamming) filter, normalized to a unit DC gain
fn lowpass(cutoff: f64, fs: f64) -> Vec<f64> {
    let half = (2f64 * fs / cutoff).ceil() as usize;
    let n = 2 * half + 1;
    let wn = 2f64 * cutoff / fs;
    let taps: Vec<f64> = (0..n)
        .map(|i| {
            let k = i as f64 - half as f64;
            let window = 0.54 - 0.46 * (2f64 * PI * i as f64 / (n - 1) as f64).cos();
            wn * sinc(PI * wn * k) * window
        })
        .collect();
    let sum: f64 = taps.iter().sum();
    taps.into_iter().map(|t| t / sum).collect()
}

/// I/Q demodulation of RF signals (one column per channel)
///
/// The signals are down-mixed by `exp(-i 2 pi fc t)`, low-pass filtered with a
/// zero-phase filter of cutoff `min(fc, fs/4)` and multiplied by 2.
/// Without `fc`, the center frequency is estimated from the power spectrum.
pub fn rf2iq(
    rf: &DMatrix<f64>,
    fs: f64,
    fc: Option<f64>,
    t0: f64,
) -> Result<DMatrix<Complex64>> {
    if rf.is_empty() {
        return Err(SignalError::Empty);
    }
    if !(fs > 0f64) {
        return Err(SignalError::SamplingFrequency(fs));
    }
    let fc = match fc {
        Some(fc) => fc,
        None => {
            let fc = center_frequency(rf, fs)?;
            log::info!("rf2iq: estimated center frequency {:.3}MHz", fc * 1e-6);
            fc
        }
    };
    if !(fc > 0f64 && fc < fs / 2f64) {
        return Err(SignalError::CenterFrequency(fc));
    }
    let (n, m) = rf.shape();
    let taps = lowpass(fc.min(fs / 4f64), fs);
    let half = taps.len() / 2;
    let mixer: Vec<Complex64> = (0..n)
        .map(|i| Complex64::from_polar(1f64, -2f64 * PI * fc * (t0 + i as f64 / fs)))
        .collect();
    let mut iq = DMatrix::<Complex64>::zeros(n, m);
    let mut mixed = vec![Complex64::new(0f64, 0f64); n];
    for (column, mut out) in rf.column_iter().zip(iq.column_iter_mut()) {
        mixed
            .iter_mut()
            .zip(column.iter().zip(&mixer))
            .for_each(|(y, (x, w))| *y = *w * *x);
        for (i, out) in out.iter_mut().enumerate() {
            let sum = taps
                .iter()
                .enumerate()
                .filter_map(|(k, t)| {
                    (i + k)
                        .checked_sub(half)
                        .and_then(|j| mixed.get(j))
                        .map(|y| *y * *t)
                })
                .fold(Complex64::new(0f64, 0f64), |s, y| s + y);
            *out = sum * 2f64;
        }
    }
    Ok(iq)
}

/// B-mode image: log-compressed envelope mapped from `[-dynamic_range, 0]` dB to `[0, 255]`
pub fn bmode(iq: &DMatrix<Complex64>, dynamic_range: f64) -> Result<DMatrix<u8>> {
    if iq.is_empty() {
        return Err(SignalError::Empty);
    }
    if !(dynamic_range > 0f64) {
        return Err(SignalError::DynamicRange(dynamic_range));
    }
    let envelope = iq.map(|x| x.norm());
    let max = envelope.max();
    Ok(envelope.map(|e| {
        if max > 0f64 && e > 0f64 {
            let db = 20f64 * (e / max).log10();
            (255f64 * (db + dynamic_range) / dynamic_range)
                .round()
                .clamp(0f64, 255f64) as u8
        } else {
            0u8
        }
    }))
}
