//! Color Doppler: axial velocities from I/Q ensembles by lag autocorrelation

use std::f64::consts::PI;

use nalgebra::DMatrix;
use num_complex::Complex64;

use crate::param::Param;

#[derive(Debug, thiserror::Error)]
pub enum DopplerError {
    #[error("at least {0} frames are required")]
    Frames(usize),
    #[error("all the frames must have the same shape")]
    Shape,
    #[error("the lag must be positive")]
    Lag,
    #[error("the averaging window must be at least 1x1")]
    Window,
    #[error("a pulse repetition frequency (prf) is required")]
    Prf,
    #[error("a center frequency (fc) is required")]
    CenterFrequency,
    #[error("the speed of sound must be positive")]
    SoundSpeed,
}
type Result<T> = std::result::Result<T, DopplerError>;

/// Doppler velocities and variances
#[derive(Debug, Clone)]
pub struct Doppler {
    /// axial velocity [m/s], positive away from the probe
    pub velocity: DMatrix<f64>,
    /// velocity variance [m^2/s^2]
    pub variance: DMatrix<f64>,
}

/// Box average with a `(rows, cols)` window centered on each pixel, truncated at the borders
fn box_average(m: &DMatrix<Complex64>, window: (usize, usize)) -> DMatrix<Complex64> {
    let (n, p) = m.shape();
    let (hr, hc) = (window.0 / 2, window.1 / 2);
    DMatrix::from_fn(n, p, |i, j| {
        let rows = i.saturating_sub(hr)..(i + window.0 - hr).min(n);
        let cols = j.saturating_sub(hc)..(j + window.1 - hc).min(p);
        let count = (rows.len() * cols.len()) as f64;
        m.view((rows.start, cols.start), (rows.len(), cols.len())).sum() / count
    })
}

/// Kasai autocorrelation estimator of the axial velocities
///
/// `frames` is the ensemble of I/Q images acquired at the pulse repetition frequency `param.prf`.
/// The lag-`lag` autocorrelation is averaged over the ensemble and spatially over `window`.
pub fn iq2doppler(
    frames: &[DMatrix<Complex64>],
    param: &Param,
    window: (usize, usize),
    lag: usize,
) -> Result<Doppler> {
    if lag == 0 {
        return Err(DopplerError::Lag);
    }
    if frames.len() < lag + 1 {
        return Err(DopplerError::Frames(lag + 1));
    }
    if window.0 == 0 || window.1 == 0 {
        return Err(DopplerError::Window);
    }
    let prf = param.prf.filter(|prf| *prf > 0f64).ok_or(DopplerError::Prf)?;
    if !(param.fc > 0f64) {
        return Err(DopplerError::CenterFrequency);
    }
    if !(param.c > 0f64) {
        return Err(DopplerError::SoundSpeed);
    }
    let shape = frames[0].shape();
    if frames.iter().any(|f| f.shape() != shape) {
        return Err(DopplerError::Shape);
    }

    let zero = DMatrix::<Complex64>::zeros(shape.0, shape.1);
    let r1 = frames
        .iter()
        .zip(&frames[lag..])
        .fold(zero.clone(), |acc, (a, b)| {
            acc + a.zip_map(b, |a, b| a.conj() * b)
        });
    let r0 = frames.iter().fold(zero, |acc, a| {
        acc + a.map(|a| Complex64::new(a.norm_sqr(), 0f64))
    });
    let (r1, r0) = (
        box_average(&r1.unscale((frames.len() - lag) as f64), window),
        box_average(&r0.unscale(frames.len() as f64), window),
    );

    let vn = param.c * prf / 4f64 / PI / param.fc / lag as f64;
    log::debug!(
        "iq2doppler: {} frames of {}x{}, Nyquist velocity {:.3}m/s",
        frames.len(),
        shape.0,
        shape.1,
        vn * PI
    );
    Ok(Doppler {
        velocity: r1.map(|r| -vn * r.arg()),
        variance: r1.zip_map(&r0, |r1, r0| {
            if r0.re > 0f64 {
                2f64 * vn * vn * (1f64 - r1.norm() / r0.re)
            } else {
                0f64
            }
        }),
    })
}
