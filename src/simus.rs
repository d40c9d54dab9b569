//! Simulation of the RF signals received by linear, convex and matrix arrays
//!
//! The scatterers are insonified by the transmitted field and act as point sources
//! on receive; the RF spectra are the sums of their contributions and the RF signals
//! are obtained by inverse FFT.

use std::{f64::consts::PI, time::Instant};

use nalgebra::DMatrix;
use num_complex::Complex64;
use rayon::prelude::*;
use rustfft::FftPlanner;

use crate::{
    genscat::Scatterers,
    param::{Param, ParamError},
    spectrum::{Spectrum, Way},
    transducer::Transducer,
};

#[derive(Debug, thiserror::Error)]
pub enum SimusError {
    #[error("invalid transducer parameters")]
    Param(#[from] ParamError),
    #[error("the transmit delays (tx_delay) are required")]
    MissingDelays,
    #[error("the transmit delays must be finite and non-negative")]
    InvalidDelays,
    #[error("the scatterers must have finite coordinates and reflection coefficients")]
    Scatterers,
    #[error("the scatterer coordinates and reflection coefficients must have the same length")]
    Lengths,
    #[error("the dB threshold must be negative, found {0}")]
    Threshold(f64),
    #[error("a matrix array is required")]
    NotMatrix,
    #[error("a linear or convex array is required")]
    NotArray,
}
type Result<T> = std::result::Result<T, SimusError>;

/// RF simulation options
#[derive(Debug, Clone)]
pub struct SimusOptions {
    /// frequency components below this level [dB] of the pulse-echo spectrum maximum are ignored
    pub db_thresh: f64,
    /// number of sub-elements per element (per dimension for matrix arrays)
    pub splitting: Option<usize>,
    /// number of RF samples, derived from the deepest scatterer if `None`
    pub n_samples: Option<usize>,
    pub parallel: bool,
}
impl Default for SimusOptions {
    fn default() -> Self {
        Self {
            db_thresh: -60f64,
            splitting: None,
            n_samples: None,
            parallel: true,
        }
    }
}

/// RF signals, one column per element
#[derive(Debug, Clone)]
pub struct Rf {
    pub data: DMatrix<f64>,
    /// sampling frequency [Hz]
    pub fs: f64,
    /// time of the first sample [s]
    pub t0: f64,
}
impl Rf {
    pub fn n_samples(&self) -> usize {
        self.data.nrows()
    }
    pub fn n_channels(&self) -> usize {
        self.data.ncols()
    }
    /// Sample times [s]
    pub fn time(&self) -> Vec<f64> {
        (0..self.n_samples())
            .map(|i| self.t0 + i as f64 / self.fs)
            .collect()
    }
}

fn validate(scatterers: &Scatterers, param: &Param, options: &SimusOptions) -> Result<()> {
    let n = scatterers.len();
    if scatterers.y.len() != n || scatterers.z.len() != n || scatterers.rc.len() != n {
        return Err(SimusError::Lengths);
    }
    if scatterers
        .x
        .iter()
        .chain(&scatterers.y)
        .chain(&scatterers.z)
        .chain(&scatterers.rc)
        .any(|v| !v.is_finite())
    {
        return Err(SimusError::Scatterers);
    }
    match &param.tx_delay {
        None => return Err(SimusError::MissingDelays),
        Some(delays) if delays.iter().any(|d| !(d.is_finite() && *d >= 0f64)) => {
            return Err(SimusError::InvalidDelays)
        }
        _ => (),
    }
    if !(options.db_thresh < 0f64) {
        return Err(SimusError::Threshold(options.db_thresh));
    }
    Ok(())
}

fn rf(scatterers: &Scatterers, param: &Param, options: &SimusOptions) -> Result<Rf> {
    let now = Instant::now();
    let n_elements = param.len();
    let delays = param
        .tx_delay
        .as_deref()
        .ok_or(SimusError::MissingDelays)?;
    let fs = param.sampling_frequency();
    let spectrum = Spectrum::new(param);
    let threshold = 10f64.powf(options.db_thresh / 20f64);
    let transducer = Transducer::new(
        param,
        spectrum.upper_frequency(threshold.sqrt()),
        options.splitting,
    );

    let points: Vec<[f64; 3]> = scatterers.xyz_iter().collect();
    let max_distance = points
        .iter()
        .flat_map(|p| transducer.elements().iter().map(move |e| e.distance(p)))
        .fold(0f64, f64::max);
    let max_delay = delays.iter().cloned().fold(0f64, f64::max);
    let n_samples = options.n_samples.unwrap_or_else(|| {
        ((2f64 * max_distance / param.c + max_delay + spectrum.duration() - param.t0).max(0f64)
            * fs)
            .ceil() as usize
    });
    let n_samples = n_samples.max(2);
    let nfft = n_samples + n_samples % 2;
    let df = fs / nfft as f64;
    let band: Vec<usize> = spectrum
        .band(df, options.db_thresh, Way::Two)
        .into_iter()
        .filter(|&k| k < nfft / 2)
        .collect();
    if spectrum.upper_frequency(threshold.sqrt()) > fs / 2f64 {
        log::warn!(
            "the sampling frequency ({:.3e}Hz) is below twice the upper frequency of the spectrum",
            fs
        );
    }
    log::debug!(
        "simus: {} scatterers, {} elements, {} samples, {} frequencies",
        scatterers.len(),
        n_elements,
        n_samples,
        band.len()
    );

    let frequencies: Vec<f64> = band.iter().map(|&k| k as f64 * df).collect();
    let pulse: Vec<Complex64> = frequencies
        .iter()
        .map(|&f| spectrum.response(f, Way::Two))
        .collect();
    let tx_apodization = param
        .tx_apodization
        .clone()
        .unwrap_or_else(|| vec![1f64; n_elements]);
    let rx_apodization = param
        .rx_apodization
        .clone()
        .unwrap_or_else(|| vec![1f64; n_elements]);
    let n_freqs = frequencies.len();
    let zeros = || vec![Complex64::new(0f64, 0f64); n_elements * n_freqs];

    // spectra accumulated per scatterer: element e at frequency k is [e + k n_elements]
    let accumulate = |mut acc: Vec<Complex64>, (point, rc): (&[f64; 3], &f64)| {
        let mut responses = vec![Complex64::new(0f64, 0f64); n_elements];
        for (k, (&f, s)) in frequencies.iter().zip(&pulse).enumerate() {
            transducer.responses_into(point, f, &mut responses);
            let w = 2f64 * PI * f;
            let tx = responses
                .iter()
                .zip(&tx_apodization)
                .zip(delays)
                .fold(Complex64::new(0f64, 0f64), |sum, ((r, a), tau)| {
                    sum + *r * Complex64::from_polar(*a, -w * tau)
                });
            let echo = *s * tx * *rc;
            for ((acc, r), a) in acc[k * n_elements..(k + 1) * n_elements]
                .iter_mut()
                .zip(&responses)
                .zip(&rx_apodization)
            {
                *acc += echo * *r * *a;
            }
        }
        acc
    };
    let add = |mut a: Vec<Complex64>, b: Vec<Complex64>| {
        a.iter_mut().zip(b).for_each(|(a, b)| *a += b);
        a
    };
    let spectra = if options.parallel {
        points
            .par_iter()
            .zip(scatterers.rc.par_iter())
            .fold(zeros, accumulate)
            .reduce(zeros, add)
    } else {
        points
            .iter()
            .zip(&scatterers.rc)
            .fold(zeros(), accumulate)
    };

    // inverse FFT of each channel
    let mut planner = FftPlanner::<f64>::new();
    let ifft = planner.plan_fft_inverse(nfft);
    let mut data = DMatrix::<f64>::zeros(n_samples, n_elements);
    let mut buffer = vec![Complex64::new(0f64, 0f64); nfft];
    for e in 0..n_elements {
        buffer.iter_mut().for_each(|x| *x = Complex64::new(0f64, 0f64));
        for (i, &k) in band.iter().enumerate() {
            // signals start at t0
            let shift = Complex64::from_polar(1f64, 2f64 * PI * frequencies[i] * param.t0);
            buffer[k] = spectra[e + i * n_elements] * shift;
        }
        ifft.process(&mut buffer);
        for (sample, x) in data.column_mut(e).iter_mut().zip(&buffer) {
            *sample = 2f64 * df * x.re;
        }
    }
    log::info!(
        "RF signals of {} scatterers simulated in {}ms",
        scatterers.len(),
        now.elapsed().as_millis()
    );
    Ok(Rf {
        data,
        fs,
        t0: param.t0,
    })
}

/// RF signals of a linear or convex array
///
/// The transmit delays are given by `param.tx_delay`.
pub fn simus(scatterers: &Scatterers, param: &Param, options: &SimusOptions) -> Result<Rf> {
    if param.is_matrix() {
        return Err(SimusError::NotArray);
    }
    let param = param.checked()?;
    validate(scatterers, &param, options)?;
    rf(scatterers, &param, options)
}

/// RF signals of a matrix array
pub fn simus3(scatterers: &Scatterers, param: &Param, options: &SimusOptions) -> Result<Rf> {
    if !param.is_matrix() {
        return Err(SimusError::NotMatrix);
    }
    let param = param.checked()?;
    validate(scatterers, &param, options)?;
    rf(scatterers, &param, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::{getparam, Probe};

    fn point(x: f64, z: f64) -> Scatterers {
        Scatterers {
            x: vec![x],
            y: vec![0.],
            z: vec![z],
            rc: vec![1.],
        }
    }

    fn argmax(v: impl Iterator<Item = f64>) -> usize {
        v.enumerate()
            .fold((0, 0.), |(i, m), (j, x)| if x.abs() > m { (j, x.abs()) } else { (i, m) })
            .0
    }

    #[test]
    fn echo_of_a_point_scatterer() {
        let param = getparam(Probe::P4_2v).tx_delay(vec![0.; 64]);
        let rf = simus(&point(0., 2e-2), &param, &SimusOptions::default()).unwrap();
        assert_eq!(rf.n_channels(), 64);
        assert_eq!(rf.fs, 4. * param.fc);
        let i = argmax(rf.data.column(32).iter().cloned());
        let t = rf.time()[i];
        let expected = 2. * 2e-2 / param.c;
        assert!((t - expected).abs() < 1e-6, "echo at {}s", t);
        // the edge elements receive the echo later
        let i_edge = argmax(rf.data.column(0).iter().cloned());
        assert!(i_edge > i);
    }

    #[test]
    fn sequential_and_parallel_agree() {
        let param = getparam(Probe::P4_2v).tx_delay(vec![0.; 64]);
        let scatterers = Scatterers {
            x: vec![-2e-3, 0., 3e-3],
            y: vec![0.; 3],
            z: vec![1e-2, 1.5e-2, 2e-2],
            rc: vec![1., 0.5, 2.],
        };
        let parallel = simus(&scatterers, &param, &SimusOptions::default()).unwrap();
        let sequential = simus(
            &scatterers,
            &param,
            &SimusOptions {
                parallel: false,
                ..Default::default()
            },
        )
        .unwrap();
        let max = parallel.data.amax();
        assert!((parallel.data - sequential.data).amax() < 1e-9 * max);
    }

    #[test]
    fn missing_delays() {
        let param = getparam(Probe::P4_2v);
        assert!(matches!(
            simus(&point(0., 2e-2), &param, &SimusOptions::default()),
            Err(SimusError::MissingDelays)
        ));
    }

    #[test]
    fn matrix_echo() {
        let param = Param::matrix(3e6, 300e-6, 4, 4).tx_delay(vec![0.; 16]);
        let rf = simus3(&point(0., 1e-2), &param, &SimusOptions::default()).unwrap();
        assert_eq!(rf.n_channels(), 16);
        let i = argmax(rf.data.column(5).iter().cloned());
        let expected = 2. * 1e-2 / param.c;
        assert!((rf.time()[i] - expected).abs() < 1e-6);
        assert!(simus(&point(0., 1e-2), &param, &SimusOptions::default()).is_err());
    }
}
