//! # Ultrasound toolbox
//!
//! Simulation of ultrasound pressure fields and RF signals of linear, convex and matrix arrays,
//! and reconstruction of B-mode and color Doppler images.
//!
//! A typical pipeline is
//!  1. [getparam]: transducer parameters,
//!  2. [txdelay]: transmit delays,
//!  3. [genscat]: scatterers of a speckle phantom,
//!  4. [simus]: RF signals,
//!  5. [rf2iq] and [dasmtx]: I/Q demodulation and delay-and-sum beamforming,
//!  6. [bmode]: log-compressed image.
//!
//! ```no_run
//! use must_toolbox::*;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! # fn main() -> Result<(), Error> {
//! let param = getparam(Probe::L11_5v);
//! let delays = txdelay(&param, Transmit::Plane { tilt: 0. })?;
//! let param = param.tx_delay(delays);
//! let mut rng = StdRng::seed_from_u64(0);
//! let roi = Roi::Plane { width: 2e-2, height: 3e-2 };
//! let scatterers = genscat(roi, MeanDist::FromParam(&param), None, None, &mut rng)?;
//! let rf = simus(&scatterers, &param, &SimusOptions::default())?;
//! let iq = rf2iq(&rf.data, rf.fs, Some(param.fc), rf.t0)?;
//! let x: Vec<f64> = (0..128).map(|i| -1e-2 + i as f64 * 2e-2 / 127.).collect();
//! let z: Vec<f64> = (0..200).map(|i| 1e-3 + i as f64 * 3e-2 / 199.).collect();
//! let grid = Grid::cartesian(&x, &z);
//! let das = dasmtx(SignalKind::Iq, iq.shape(), &grid.points(), &param, Interpolation::Linear)?;
//! let image = nalgebra::DMatrix::from_vec(z.len(), x.len(), das.apply_iq(&iq)?);
//! let image = bmode(&image, 40.)?;
//! # Ok(())
//! # }
//! ```

pub mod dasmtx;
pub mod doppler;
mod error;
pub mod genscat;
pub mod io;
pub mod param;
pub mod pfield;
#[cfg(feature = "plot")]
pub mod plot;
pub mod signal;
pub mod simus;
pub mod spectrum;
pub mod transducer;
pub mod txdelay;
pub mod txdelay3;

pub use dasmtx::{
    dasmtx, dasmtx3, impolgrid, linspace, DasMatrix, Grid, Interpolation, SignalKind,
};
pub use doppler::{iq2doppler, Doppler};
pub use error::Error;
pub use genscat::{genscat, MeanDist, Reflectivity, Roi, Scatterers, Volume};
pub use param::{getparam, Baffle, Param, Probe};
pub use pfield::{pfield, pfield3, Field, PfieldOptions};
pub use signal::{bmode, rf2iq, tgc};
pub use simus::{simus, simus3, Rf, SimusOptions};
pub use spectrum::{getpulse, Way};
pub use txdelay::{txdelay, Transmit};
pub use txdelay3::{txdelay3, Transmit3};

/// Environment variable with the default probe of the command line interfaces
pub const PROBE_ENV: &str = "MUST_PROBE";

/// Default probe: `$MUST_PROBE` or the L11-5v
pub fn default_probe() -> Result<Probe, param::ParamError> {
    std::env::var(PROBE_ENV).map_or(Ok(Probe::L11_5v), |name| Probe::try_from(name.as_str()))
}
