//! Acoustic pressure fields of linear, convex and matrix arrays
//!
//! The pressure at a point is synthesized in the frequency domain:
//! `P(f) = S(f) sum_e a_e exp(-i 2 pi f tau_e) R_e(f)`
//! where `S` is the pulse spectrum filtered by the probe, `a_e` the transmit apodization,
//! `tau_e` the transmit delays and `R_e` the element responses.

use std::{f64::consts::PI, time::Instant};

use nalgebra::DMatrix;
use num_complex::Complex64;
use rayon::prelude::*;

use crate::{
    param::{Param, ParamError},
    spectrum::{Spectrum, Way},
    transducer::Transducer,
};

#[derive(Debug, thiserror::Error)]
pub enum PfieldError {
    #[error("invalid transducer parameters")]
    Param(#[from] ParamError),
    #[error("expected {0} transmit delays, found {1}")]
    Delays(usize, usize),
    #[error("the transmit delays must be finite and non-negative")]
    InvalidDelays,
    #[error("the field points must have finite coordinates")]
    Points,
    #[error("the frequency step must be positive, found {0}")]
    FrequencyStep(f64),
    #[error("the dB threshold must be negative, found {0}")]
    Threshold(f64),
    #[error("a matrix array is required")]
    NotMatrix,
    #[error("a linear or convex array is required")]
    NotArray,
}
type Result<T> = std::result::Result<T, PfieldError>;

/// Field simulation options
#[derive(Debug, Clone)]
pub struct PfieldOptions {
    /// frequency components below this level [dB] of the spectrum maximum are ignored
    pub db_thresh: f64,
    /// number of sub-elements per element (per dimension for matrix arrays)
    pub splitting: Option<usize>,
    /// frequency step [Hz], derived from the geometry if `None`
    pub frequency_step: Option<f64>,
    /// returns the spectra at each point
    pub spectrum: bool,
    pub parallel: bool,
}
impl Default for PfieldOptions {
    fn default() -> Self {
        Self {
            db_thresh: -60f64,
            splitting: None,
            frequency_step: None,
            spectrum: false,
            parallel: true,
        }
    }
}

/// RMS pressure field
#[derive(Debug, Clone)]
pub struct Field {
    /// RMS pressure at each point
    pub rms: Vec<f64>,
    /// complex spectra, one row per point and one column per frequency
    pub spectrum: Option<DMatrix<Complex64>>,
    /// frequencies of the spectra [Hz]
    pub frequencies: Vec<f64>,
}
impl Field {
    /// RMS field in dB relative to its maximum
    ///
    /// A null field is `-inf` dB everywhere.
    pub fn db(&self) -> Vec<f64> {
        let max = self.rms.iter().cloned().fold(0f64, f64::max);
        if !(max > 0f64) {
            return vec![f64::NEG_INFINITY; self.rms.len()];
        }
        self.rms
            .iter()
            .map(|p| 20f64 * (p / max).log10())
            .collect()
    }
}

/// Frequency step such that the signals at all points fit in one period
fn frequency_step(
    transducer: &Transducer,
    points: &[[f64; 3]],
    delays: &[f64],
    c: f64,
    pulse_duration: f64,
) -> f64 {
    let span = points
        .iter()
        .map(|point| {
            let (min, max) = transducer
                .elements()
                .iter()
                .zip(delays)
                .map(|(e, tau)| tau + e.distance(point) / c)
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), t| {
                    (min.min(t), max.max(t))
                });
            max - min
        })
        .fold(0f64, f64::max);
    1f64 / (span + pulse_duration)
}

fn validate(
    points: &[[f64; 3]],
    delays: &[f64],
    param: &Param,
    options: &PfieldOptions,
) -> Result<()> {
    if delays.len() != param.len() {
        return Err(PfieldError::Delays(param.len(), delays.len()));
    }
    if delays.iter().any(|d| !(d.is_finite() && *d >= 0f64)) {
        return Err(PfieldError::InvalidDelays);
    }
    if points.iter().flatten().any(|x| !x.is_finite()) {
        return Err(PfieldError::Points);
    }
    if !(options.db_thresh < 0f64) {
        return Err(PfieldError::Threshold(options.db_thresh));
    }
    if let Some(df) = options.frequency_step {
        if !(df > 0f64) {
            return Err(PfieldError::FrequencyStep(df));
        }
    }
    Ok(())
}

fn field(
    points: &[[f64; 3]],
    delays: &[f64],
    param: &Param,
    options: &PfieldOptions,
) -> Result<Field> {
    let now = Instant::now();
    let spectrum = Spectrum::new(param);
    let threshold = 10f64.powf(options.db_thresh / 20f64);
    let f_max = spectrum.upper_frequency(threshold);
    let transducer = Transducer::new(param, f_max, options.splitting);
    let df = match options.frequency_step {
        Some(df) => df,
        None => frequency_step(&transducer, points, delays, param.c, spectrum.duration()),
    };
    let band = spectrum.band(df, options.db_thresh, Way::One);
    let frequencies: Vec<f64> = band.iter().map(|&k| k as f64 * df).collect();
    log::debug!(
        "pfield: {} points, {} elements x {} sub-elements, {} frequencies (df={:.3e}Hz)",
        points.len(),
        transducer.len(),
        transducer.splitting(),
        frequencies.len(),
        df
    );
    let pulse: Vec<Complex64> = frequencies
        .iter()
        .map(|&f| spectrum.response(f, Way::One))
        .collect();
    let apodization = param
        .tx_apodization
        .clone()
        .unwrap_or_else(|| vec![1f64; param.len()]);

    let keep_spectrum = options.spectrum;
    let point_field = |point: &[f64; 3]| -> (f64, Option<Vec<Complex64>>) {
        let mut responses = vec![Complex64::new(0f64, 0f64); transducer.len()];
        let mut energy = 0f64;
        let mut spectrum = keep_spectrum.then(|| Vec::with_capacity(frequencies.len()));
        for (&f, s) in frequencies.iter().zip(&pulse) {
            transducer.responses_into(point, f, &mut responses);
            let w = 2f64 * PI * f;
            let sum = responses
                .iter()
                .zip(&apodization)
                .zip(delays)
                .fold(Complex64::new(0f64, 0f64), |sum, ((r, a), tau)| {
                    sum + *r * Complex64::from_polar(*a, -w * tau)
                });
            let p = *s * sum;
            energy += p.norm_sqr();
            if let Some(spectrum) = spectrum.as_mut() {
                spectrum.push(p);
            }
        }
        ((energy * df).sqrt(), spectrum)
    };
    let (rms, spectra): (Vec<f64>, Vec<Option<Vec<Complex64>>>) = if options.parallel {
        points.par_iter().map(point_field).unzip()
    } else {
        points.iter().map(point_field).unzip()
    };
    let spectrum = spectra
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .filter(|_| keep_spectrum)
        .map(|spectra| {
            DMatrix::from_fn(points.len(), frequencies.len(), |i, j| spectra[i][j])
        });
    log::info!(
        "pressure field at {} points computed in {}ms",
        points.len(),
        now.elapsed().as_millis()
    );
    Ok(Field {
        rms,
        spectrum,
        frequencies,
    })
}

/// RMS pressure field of a linear or convex array at `points` (x,y,z)
///
/// `delays` are the transmit delays [s]; `y` is the elevation coordinate.
pub fn pfield(
    points: &[[f64; 3]],
    delays: &[f64],
    param: &Param,
    options: &PfieldOptions,
) -> Result<Field> {
    if param.is_matrix() {
        return Err(PfieldError::NotArray);
    }
    let param = param.checked()?;
    validate(points, delays, &param, options)?;
    field(points, delays, &param, options)
}

/// RMS pressure field of a matrix array at `points` (x,y,z)
pub fn pfield3(
    points: &[[f64; 3]],
    delays: &[f64],
    param: &Param,
    options: &PfieldOptions,
) -> Result<Field> {
    if !param.is_matrix() {
        return Err(PfieldError::NotMatrix);
    }
    let param = param.checked()?;
    validate(points, delays, &param, options)?;
    field(points, delays, &param, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        param::{getparam, Probe},
        txdelay::{txdelay, Transmit},
        txdelay3::{txdelay3, Transmit3},
    };

    #[test]
    fn focused_field() {
        let param = getparam(Probe::P4_2v);
        let delays = txdelay(&param, Transmit::Focused { x0: 0., z0: 4e-2 }).unwrap();
        let points: Vec<[f64; 3]> = (1..=20).map(|k| [0., 0., k as f64 * 5e-3]).collect();
        let field = pfield(&points, &delays, &param, &PfieldOptions::default()).unwrap();
        let (i_max, _) = field
            .rms
            .iter()
            .enumerate()
            .fold((0, 0.), |(i, m), (j, p)| if *p > m { (j, *p) } else { (i, m) });
        let z_max = points[i_max][2];
        assert!(z_max > 2e-2 && z_max < 6e-2, "peak at z={}", z_max);
        // off-axis field is weaker at the focus depth
        let off = pfield(&[[1e-2, 0., 4e-2]], &delays, &param, &PfieldOptions::default()).unwrap();
        assert!(off.rms[0] < field.rms[7]);
    }

    #[test]
    fn symmetric_field() {
        let param = getparam(Probe::P4_2v);
        let delays = vec![0.; 64];
        let points = [[-5e-3, 0., 2e-2], [5e-3, 0., 2e-2]];
        let options = PfieldOptions {
            parallel: false,
            ..Default::default()
        };
        let field = pfield(&points, &delays, &param, &options).unwrap();
        assert!((field.rms[0] - field.rms[1]).abs() < 1e-6 * field.rms[0]);
    }

    #[test]
    fn attenuated_field() {
        let param = getparam(Probe::P4_2v);
        let delays = vec![0.; 64];
        let points = [[0., 0., 3e-2]];
        let options = PfieldOptions {
            frequency_step: Some(20e3),
            ..Default::default()
        };
        let lossless = pfield(&points, &delays, &param, &options).unwrap();
        let lossy = Param {
            attenuation: 0.5,
            ..param
        };
        let attenuated = pfield(&points, &delays, &lossy, &options).unwrap();
        assert!(attenuated.rms[0] < lossless.rms[0]);
    }

    #[test]
    fn no_field_behind_the_array() {
        let param = getparam(Probe::P4_2v);
        let delays = vec![0.; 64];
        let field = pfield(&[[0., 0., -1e-2]], &delays, &param, &PfieldOptions::default()).unwrap();
        assert_eq!(field.rms[0], 0.);
        assert!(field.db().iter().all(|p| *p == f64::NEG_INFINITY));
    }

    #[test]
    fn spectra_only_on_request() {
        let param = getparam(Probe::P4_2v);
        let delays = vec![0.; 64];
        let points = [[0., 0., 2e-2], [2e-3, 0., 3e-2]];
        let options = PfieldOptions {
            frequency_step: Some(50e3),
            ..Default::default()
        };
        let field = pfield(&points, &delays, &param, &options).unwrap();
        assert!(field.spectrum.is_none());
        let with_spectra = PfieldOptions {
            spectrum: true,
            ..options
        };
        let full = pfield(&points, &delays, &param, &with_spectra).unwrap();
        let spectrum = full.spectrum.unwrap();
        for (i, rms) in field.rms.iter().enumerate() {
            let energy: f64 = spectrum.row(i).iter().map(|p| p.norm_sqr()).sum();
            assert!(((energy * 50e3).sqrt() - rms).abs() < 1e-9 * rms);
        }
    }

    #[test]
    fn field_spectra() {
        let param = getparam(Probe::P4_2v);
        let delays = vec![0.; 64];
        let options = PfieldOptions {
            spectrum: true,
            db_thresh: -20.,
            ..Default::default()
        };
        let field = pfield(&[[0., 0., 2e-2], [1e-3, 0., 2e-2]], &delays, &param, &options).unwrap();
        let spectrum = field.spectrum.unwrap();
        assert_eq!(spectrum.nrows(), 2);
        assert_eq!(spectrum.ncols(), field.frequencies.len());
        assert!(field
            .frequencies
            .iter()
            .all(|f| *f > param.fc / 3. && *f < 3. * param.fc));
        assert!(pfield(&[[0., 0., 1e-2]], &[0.; 3], &param, &options).is_err());
    }

    #[test]
    fn matrix_field() {
        let param = Param::matrix(3e6, 300e-6, 8, 8);
        let delays = txdelay3(
            &param,
            Transmit3::Focused {
                x0: 0.,
                y0: 0.,
                z0: 1e-2,
            },
        )
        .unwrap();
        let points = [[0., 0., 1e-2], [0., 3e-3, 1e-2], [3e-3, 0., 1e-2]];
        let field = pfield3(&points, &delays, &param, &PfieldOptions::default()).unwrap();
        assert!(field.rms[0] > field.rms[1]);
        assert!((field.rms[1] - field.rms[2]).abs() < 1e-6 * field.rms[1]);
        assert!(matches!(
            pfield(&points, &delays, &param, &PfieldOptions::default()),
            Err(PfieldError::NotArray)
        ));
    }
}
