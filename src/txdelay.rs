//! Transmit delays of linear and convex arrays

use std::f64::consts::FRAC_PI_2;

use crate::param::{Param, ParamError};

#[derive(Debug, thiserror::Error)]
pub enum TxDelayError {
    #[error("invalid transducer parameters")]
    Param(#[from] ParamError),
    #[error("the tilt angles must verify |tilt| < pi/2, found {0}")]
    Tilt(f64),
    #[error("the angular width must be in ]0,pi[, found {0}")]
    Width(f64),
    #[error("the focus depth must be non-zero")]
    FocusDepth,
    #[error("the solid angle must be in [0,2pi], found {0}")]
    SolidAngle(f64),
    #[error("the focus line must be defined by two distinct points")]
    FocusLine,
    #[error("the elements must form a plaid grid for a diverging wave")]
    NotPlaid,
    #[error("a matrix array is required")]
    NotMatrix,
    #[error("a linear or convex array is required")]
    NotArray,
}
type Result<T> = std::result::Result<T, TxDelayError>;

/// Transmit beam patterns of a linear or convex array
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transmit {
    /// Focused beam at `(x0,z0)`; a negative `z0` is a virtual source behind the array
    Focused { x0: f64, z0: f64 },
    /// Plane wave tilted by `tilt` radians
    Plane { tilt: f64 },
    /// Diverging wave tilted by `tilt` radians over the angular sector `width`
    Diverging { tilt: f64, width: f64 },
}
impl Transmit {
    /// Returns the transmit delays [s]; the smallest delay is 0
    pub fn delays(&self, param: &Param) -> Result<Vec<f64>> {
        txdelay(param, *self)
    }
}

/// Removes the smallest delay
pub(crate) fn shift_to_zero(mut delays: Vec<f64>) -> Vec<f64> {
    let min = delays.iter().cloned().fold(f64::INFINITY, f64::min);
    delays.iter_mut().for_each(|d| *d -= min);
    delays
}

/// Transmit delays of a linear or convex array
pub fn txdelay(param: &Param, transmit: Transmit) -> Result<Vec<f64>> {
    if param.is_matrix() {
        return Err(TxDelayError::NotArray);
    }
    let param = param.checked()?;
    let c = param.c;
    let positions = param.element_positions();
    let xz = positions.x.iter().zip(positions.z.iter());
    let delays: Vec<f64> = match transmit {
        Transmit::Focused { x0, z0 } => {
            if z0 == 0f64 || !z0.is_finite() {
                return Err(TxDelayError::FocusDepth);
            }
            xz.map(|(x, z)| -(x - x0).hypot(z - z0) / c * z0.signum())
                .collect()
        }
        Transmit::Plane { tilt } => {
            if !(tilt.abs() < FRAC_PI_2) {
                return Err(TxDelayError::Tilt(tilt));
            }
            let (s, co) = tilt.sin_cos();
            xz.map(|(x, z)| (x * s + z * co) / c).collect()
        }
        Transmit::Diverging { tilt, width } => {
            if !(tilt.abs() < FRAC_PI_2) {
                return Err(TxDelayError::Tilt(tilt));
            }
            if !(width > 0f64 && width < std::f64::consts::PI) {
                return Err(TxDelayError::Width(width));
            }
            // the virtual source is at a distance such that the aperture subtends `width`
            let aperture = positions.x.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
                - positions.x.iter().cloned().fold(f64::INFINITY, f64::min)
                + param.element_width();
            let d = aperture / 2f64 / (width / 2f64).tan() + positions.h;
            let (s, co) = tilt.sin_cos();
            let (x0, z0) = (-d * s, -d * co);
            log::debug!("diverging wave: virtual source at ({:.3e},{:.3e})", x0, z0);
            xz.map(|(x, z)| (x - x0).hypot(z - z0) / c).collect()
        }
    };
    Ok(shift_to_zero(delays))
}
