//! Delay-and-sum beamforming matrices
//!
//! A [DasMatrix] maps the column-major vectorized RF or I/Q signals
//! (`n_samples` by `n_elements`) onto the points of an image.
//! Row `i` holds the interpolation weights of the samples that are delayed
//! and summed at point `i`, so beamforming is a sparse matrix-vector product.

use std::{f64::consts::PI, time::Instant};

use nalgebra::DMatrix;
use num_complex::Complex64;
use rayon::prelude::*;
use strum_macros::{Display, EnumString};

use crate::{
    param::{Param, ParamError},
    spectrum::sinc,
    transducer::Transducer,
};

#[derive(Debug, thiserror::Error)]
pub enum DasmtxError {
    #[error("invalid transducer parameters")]
    Param(#[from] ParamError),
    #[error("the transmit delays (tx_delay) are required")]
    MissingDelays,
    #[error("the signals must have one column per element ({expected}), found {found}")]
    Channels { expected: usize, found: usize },
    #[error("the signals must have at least one sample")]
    Samples,
    #[error("the image points must have finite coordinates")]
    Points,
    #[error("expected {expected} samples x {channels} channels, found {rows}x{cols}")]
    Data {
        expected: usize,
        channels: usize,
        rows: usize,
        cols: usize,
    },
    #[error("the grid must have at least one row and one column")]
    Grid,
    #[error("the angular width must be in ]0,pi], found {0}")]
    Width(f64),
    #[error("the depth must be positive, found {0}")]
    Depth(f64),
    #[error("a matrix array is required")]
    NotMatrix,
    #[error("a linear or convex array is required")]
    NotArray,
}
type Result<T> = std::result::Result<T, DasmtxError>;

/// Type of the signals the beamforming matrix is applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Rf,
    /// I/Q signals: the weights include the phase rotation `exp(i 2 pi fc tau)`
    Iq,
}

/// Interpolation of the delayed samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum Interpolation {
    Nearest,
    #[default]
    Linear,
    Quadratic,
    Lanczos3,
}
impl Interpolation {
    /// Sample indices and weights for the fractional sample index `s`
    fn weights(&self, s: f64) -> Vec<(isize, f64)> {
        match self {
            Interpolation::Nearest => vec![(s.round() as isize, 1f64)],
            Interpolation::Linear => {
                let i = s.floor();
                let f = s - i;
                vec![(i as isize, 1f64 - f), (i as isize + 1, f)]
            }
            Interpolation::Quadratic => {
                let i = s.round();
                let f = s - i;
                vec![
                    (i as isize - 1, f * (f - 1f64) / 2f64),
                    (i as isize, 1f64 - f * f),
                    (i as isize + 1, f * (f + 1f64) / 2f64),
                ]
            }
            Interpolation::Lanczos3 => {
                let i = s.floor() as isize;
                (i - 2..=i + 3)
                    .map(|k| {
                        let d = s - k as f64;
                        (k, sinc(PI * d) * sinc(PI * d / 3f64))
                    })
                    .collect()
            }
        }
    }
}

/// Sparse delay-and-sum matrix in compressed sparse row format
#[derive(Debug, Clone)]
pub struct DasMatrix {
    row_ptr: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<Complex64>,
    n_samples: usize,
    n_channels: usize,
    kind: SignalKind,
}

impl DasMatrix {
    /// Builds the beamforming matrix of a linear or convex array
    ///
    /// `shape` is the number of samples and the number of channels of the signals;
    /// the sampling frequency, start time and transmit delays are taken from `param`.
    pub fn new(
        kind: SignalKind,
        shape: (usize, usize),
        points: &[[f64; 3]],
        param: &Param,
        method: Interpolation,
    ) -> Result<Self> {
        if param.is_matrix() {
            return Err(DasmtxError::NotArray);
        }
        Self::build(kind, shape, points, param, method)
    }
    fn build(
        kind: SignalKind,
        shape: (usize, usize),
        points: &[[f64; 3]],
        param: &Param,
        method: Interpolation,
    ) -> Result<Self> {
        let now = Instant::now();
        let param = param.checked()?;
        let (n_samples, n_channels) = shape;
        if n_channels != param.len() {
            return Err(DasmtxError::Channels {
                expected: param.len(),
                found: n_channels,
            });
        }
        if n_samples == 0 {
            return Err(DasmtxError::Samples);
        }
        if points.iter().flatten().any(|x| !x.is_finite()) {
            return Err(DasmtxError::Points);
        }
        let delays = param.tx_delay.as_deref().ok_or(DasmtxError::MissingDelays)?;
        let tx_apodization = param
            .tx_apodization
            .clone()
            .unwrap_or_else(|| vec![1f64; n_channels]);
        let rx_apodization = param
            .rx_apodization
            .clone()
            .unwrap_or_else(|| vec![1f64; n_channels]);
        let fnumber = param.rx_fnumber();
        let (c, fs, fc, t0) = (param.c, param.sampling_frequency(), param.fc, param.t0);
        let transducer = Transducer::new(&param, fc, Some(1));
        let elements = transducer.elements();
        log::debug!(
            "dasmtx: {} points, {} samples x {} channels, f-number {:.2}",
            points.len(),
            n_samples,
            n_channels,
            fnumber
        );

        let rows: Vec<Vec<(usize, Complex64)>> = points
            .par_iter()
            .map(|point| {
                // transmit distance: the first wavefront reaching the point
                let d_tx = elements
                    .iter()
                    .zip(delays)
                    .zip(&tx_apodization)
                    .filter(|(_, a)| **a != 0f64)
                    .map(|((e, tau), _)| c * tau + e.distance(point))
                    .fold(f64::INFINITY, f64::min);
                let mut row = vec![];
                for (e, (element, rx)) in elements.iter().zip(&rx_apodization).enumerate() {
                    let (cos, tan) = element.angle(point);
                    if cos <= 0f64 || *rx == 0f64 {
                        continue;
                    }
                    // receive aperture and Hann apodization
                    let apodization = if fnumber > 0f64 {
                        let u = 2f64 * fnumber * tan;
                        if u.abs() > 1f64 {
                            continue;
                        }
                        (PI * u / 2f64).cos().powi(2) * rx
                    } else {
                        *rx
                    };
                    let tau = (d_tx + element.distance(point)) / c;
                    let s = (tau - t0) * fs;
                    let phase = match kind {
                        SignalKind::Rf => Complex64::new(1f64, 0f64),
                        SignalKind::Iq => Complex64::from_polar(1f64, 2f64 * PI * fc * tau),
                    };
                    for (k, w) in method.weights(s) {
                        if k >= 0 && (k as usize) < n_samples && w != 0f64 {
                            row.push((e * n_samples + k as usize, phase * w * apodization));
                        }
                    }
                }
                row.sort_by_key(|(col, _)| *col);
                row
            })
            .collect();

        let mut row_ptr = Vec::with_capacity(rows.len() + 1);
        row_ptr.push(0);
        let nnz: usize = rows.iter().map(|row| row.len()).sum();
        let mut col_indices = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        for row in rows {
            for (col, value) in row {
                col_indices.push(col);
                values.push(value);
            }
            row_ptr.push(col_indices.len());
        }
        log::info!(
            "DAS matrix ({}x{}, {} non-zeros) built in {}ms",
            points.len(),
            n_samples * n_channels,
            nnz,
            now.elapsed().as_millis()
        );
        Ok(Self {
            row_ptr,
            col_indices,
            values,
            n_samples,
            n_channels,
            kind,
        })
    }
    /// Number of rows (image points) and columns (signal samples)
    pub fn shape(&self) -> (usize, usize) {
        (self.row_ptr.len() - 1, self.n_samples * self.n_channels)
    }
    /// Number of non-zero weights
    pub fn nnz(&self) -> usize {
        self.values.len()
    }
    pub fn kind(&self) -> SignalKind {
        self.kind
    }
    fn check<T>(&self, data: &DMatrix<T>) -> Result<()>
    where
        T: nalgebra::Scalar,
    {
        if data.nrows() != self.n_samples || data.ncols() != self.n_channels {
            Err(DasmtxError::Data {
                expected: self.n_samples,
                channels: self.n_channels,
                rows: data.nrows(),
                cols: data.ncols(),
            })
        } else {
            Ok(())
        }
    }
    fn product<T, F>(&self, input: &[T], f: F) -> Vec<Complex64>
    where
        T: Sync,
        F: Fn(&T) -> Complex64 + Sync,
    {
        (0..self.row_ptr.len() - 1)
            .into_par_iter()
            .map(|i| {
                let range = self.row_ptr[i]..self.row_ptr[i + 1];
                self.col_indices[range.clone()]
                    .iter()
                    .zip(&self.values[range])
                    .fold(Complex64::new(0f64, 0f64), |sum, (j, w)| sum + *w * f(&input[*j]))
            })
            .collect()
    }
    /// Beamforms RF signals (`n_samples` by `n_channels`)
    ///
    /// The result is complex for a matrix built for I/Q signals
    pub fn apply_rf(&self, rf: &DMatrix<f64>) -> Result<Vec<Complex64>> {
        self.check(rf)?;
        Ok(self.product(rf.as_slice(), |x| Complex64::new(*x, 0f64)))
    }
    /// Beamforms I/Q signals (`n_samples` by `n_channels`)
    pub fn apply_iq(&self, iq: &DMatrix<Complex64>) -> Result<Vec<Complex64>> {
        self.check(iq)?;
        Ok(self.product(iq.as_slice(), |x| *x))
    }
}

/// Delay-and-sum matrix of a linear or convex array
pub fn dasmtx(
    kind: SignalKind,
    shape: (usize, usize),
    points: &[[f64; 3]],
    param: &Param,
    method: Interpolation,
) -> Result<DasMatrix> {
    DasMatrix::new(kind, shape, points, param, method)
}

/// Delay-and-sum matrix of a matrix array
pub fn dasmtx3(
    kind: SignalKind,
    shape: (usize, usize),
    points: &[[f64; 3]],
    param: &Param,
    method: Interpolation,
) -> Result<DasMatrix> {
    if !param.is_matrix() {
        return Err(DasmtxError::NotMatrix);
    }
    DasMatrix::build(kind, shape, points, param, method)
}

/// Image grid, rows along depth and columns along x
#[derive(Debug, Clone)]
pub struct Grid {
    pub x: DMatrix<f64>,
    pub z: DMatrix<f64>,
}
impl Grid {
    /// Cartesian grid from the `x` and `z` coordinates
    pub fn cartesian(x: &[f64], z: &[f64]) -> Self {
        Self {
            x: DMatrix::from_fn(z.len(), x.len(), |_, j| x[j]),
            z: DMatrix::from_fn(z.len(), x.len(), |i, _| z[i]),
        }
    }
    /// Cartesian grid of `n_x` by `n_z` points evenly spaced over the `x` and `z` ranges
    pub fn regular(x: (f64, f64), z: (f64, f64), n_x: usize, n_z: usize) -> Result<Self> {
        if n_x == 0 || n_z == 0 {
            return Err(DasmtxError::Grid);
        }
        Ok(Self::cartesian(
            &linspace(x.0, x.1, n_x),
            &linspace(z.0, z.1, n_z),
        ))
    }
    pub fn shape(&self) -> (usize, usize) {
        self.x.shape()
    }
    /// Grid points (x,0,z) in column-major order
    pub fn points(&self) -> Vec<[f64; 3]> {
        self.x
            .iter()
            .zip(self.z.iter())
            .map(|(x, z)| [*x, 0f64, *z])
            .collect()
    }
}

/// `n` evenly spaced values from `start` to `end`, `[start]` if `n` is 1
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    let step = (end - start) / n.saturating_sub(1).max(1) as f64;
    (0..n).map(|i| start + i as f64 * step).collect()
}

/// Polar grid for convex and phased arrays
///
/// `shape` is the number of radial and angular samples, `zmax` the depth range and
/// `width` the angular width (the angular aperture of a convex array if `None`).
/// The origin of the polar coordinates is the center of curvature of a convex array
/// and the center of the array otherwise.
pub fn impolgrid(
    shape: (usize, usize),
    zmax: f64,
    width: Option<f64>,
    param: &Param,
) -> Result<Grid> {
    let (n_r, n_theta) = shape;
    if n_r == 0 || n_theta == 0 {
        return Err(DasmtxError::Grid);
    }
    if !(zmax > 0f64) {
        return Err(DasmtxError::Depth(zmax));
    }
    let width = match width {
        Some(width) => width,
        None if param.is_convex() => param.angular_aperture(),
        None => PI / 3f64,
    };
    if !(width > 0f64 && width <= PI) {
        return Err(DasmtxError::Width(width));
    }
    let radius = if param.is_convex() { param.radius } else { 0f64 };
    let theta = |j: usize| {
        if n_theta == 1 {
            0f64
        } else {
            -width / 2f64 + j as f64 * width / (n_theta - 1) as f64
        }
    };
    let r = |i: usize| radius + (i + 1) as f64 * zmax / n_r as f64;
    Ok(Grid {
        x: DMatrix::from_fn(n_r, n_theta, |i, j| r(i) * theta(j).sin()),
        z: DMatrix::from_fn(n_r, n_theta, |i, j| r(i) * theta(j).cos() - radius),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        genscat::Scatterers,
        param::{getparam, Probe},
        simus::{simus, SimusOptions},
    };

    #[test]
    fn interpolation_weights_sum_to_one() {
        for method in [
            Interpolation::Nearest,
            Interpolation::Linear,
            Interpolation::Quadratic,
        ] {
            for s in [10., 10.25, 10.5, 10.8] {
                let sum: f64 = method.weights(s).iter().map(|(_, w)| w).sum();
                assert!((sum - 1.).abs() < 1e-12);
            }
        }
        let sum: f64 = Interpolation::Lanczos3
            .weights(10.3)
            .iter()
            .map(|(_, w)| w)
            .sum();
        assert!((sum - 1.).abs() < 2e-2);
        assert_eq!(Interpolation::Lanczos3.weights(4.0)[2], (4, 1.));
        assert_eq!("lanczos3".parse::<Interpolation>().unwrap(), Interpolation::Lanczos3);
    }

    #[test]
    fn constant_signals() {
        let param = getparam(Probe::P4_2v).tx_delay(vec![0.; 64]);
        let n_samples = 2000;
        let grid = Grid::cartesian(&[-2e-3, 0., 2e-3], &[2e-2, 3e-2]);
        let points = grid.points();
        let ones = DMatrix::from_element(n_samples, 64, 1.);
        let nearest = dasmtx(
            SignalKind::Rf,
            (n_samples, 64),
            &points,
            &param,
            Interpolation::Nearest,
        )
        .unwrap();
        let quadratic = dasmtx(
            SignalKind::Rf,
            (n_samples, 64),
            &points,
            &param,
            Interpolation::Quadratic,
        )
        .unwrap();
        assert_eq!(nearest.shape(), (6, n_samples * 64));
        assert!(nearest.nnz() <= 6 * 64);
        // identical sums of the apodization weights
        let a = nearest.apply_rf(&ones).unwrap();
        let b = quadratic.apply_rf(&ones).unwrap();
        for (a, b) in a.iter().zip(&b) {
            assert!(a.re > 0.);
            assert!((a - b).norm() < 1e-9 * a.re);
        }
        // deeper points have larger apertures
        assert!(a[1].re > a[0].re);
        assert!(nearest
            .apply_rf(&DMatrix::from_element(10, 64, 1.))
            .is_err());
    }

    #[test]
    fn point_scatterer_image() {
        let param = getparam(Probe::P4_2v).tx_delay(vec![0.; 64]);
        let scatterers = Scatterers {
            x: vec![0.],
            y: vec![0.],
            z: vec![2e-2],
            rc: vec![1.],
        };
        let rf = simus(&scatterers, &param, &SimusOptions::default()).unwrap();
        let x: Vec<f64> = (-8..=8).map(|k| k as f64 * 5e-4).collect();
        let z: Vec<f64> = (-6..=6).map(|k| 2e-2 + k as f64 * 5e-5).collect();
        let grid = Grid::cartesian(&x, &z);
        let das = dasmtx(
            SignalKind::Rf,
            rf.data.shape(),
            &grid.points(),
            &param,
            Interpolation::Linear,
        )
        .unwrap();
        let image = das.apply_rf(&rf.data).unwrap();
        let (nz, nx) = grid.shape();
        // lateral profile: maximum over depth of each column
        let profile: Vec<f64> = (0..nx)
            .map(|j| {
                image[j * nz..(j + 1) * nz]
                    .iter()
                    .fold(0f64, |m, v| m.max(v.re.abs()))
            })
            .collect();
        let j_max = profile
            .iter()
            .enumerate()
            .fold((0, 0.), |(i, m), (j, v)| if *v > m { (j, *v) } else { (i, m) })
            .0;
        assert_eq!(x[j_max], 0.);
    }

    #[test]
    fn iq_phase_rotation() {
        let param = getparam(Probe::P4_2v).tx_delay(vec![0.; 64]);
        let points = [[0., 0., 2e-2]];
        let das = dasmtx(
            SignalKind::Iq,
            (2000, 64),
            &points,
            &param,
            Interpolation::Nearest,
        )
        .unwrap();
        assert_eq!(das.kind(), SignalKind::Iq);
        let ones = DMatrix::from_element(2000, 64, Complex64::new(1., 0.));
        let value = das.apply_iq(&ones).unwrap()[0];
        // the weights are rotated: the sum is smaller than the sum of their magnitudes
        let magnitude: f64 = das.values.iter().map(|v| v.norm()).sum();
        assert!(value.norm() <= magnitude + 1e-12);
        assert!(das.values.iter().any(|v| v.im.abs() > 1e-3));
    }

    #[test]
    fn regular_grid() {
        assert!(linspace(0., 1., 0).is_empty());
        assert_eq!(linspace(2., 3., 1), vec![2.]);
        assert_eq!(linspace(-1., 1., 5), vec![-1., -0.5, 0., 0.5, 1.]);
        let grid = Grid::regular((-1e-2, 1e-2), (1e-3, 3e-2), 3, 4).unwrap();
        assert_eq!(grid.shape(), (4, 3));
        assert_eq!(grid.x[(0, 2)], 1e-2);
        assert_eq!(grid.z[(3, 0)], 3e-2);
        assert!(matches!(
            Grid::regular((-1e-2, 1e-2), (1e-3, 3e-2), 0, 4),
            Err(DasmtxError::Grid)
        ));
        assert!(matches!(
            Grid::regular((-1e-2, 1e-2), (1e-3, 3e-2), 3, 0),
            Err(DasmtxError::Grid)
        ));
    }

    #[test]
    fn polar_grid() {
        let param = getparam(Probe::C5_2v);
        let grid = impolgrid((50, 32), 8e-2, None, &param).unwrap();
        assert_eq!(grid.shape(), (50, 32));
        // the first row lies just below the array, the last at the depth range
        assert!(grid.z.row(0).iter().all(|z| *z > -param.radius));
        let r_max = grid
            .x
            .iter()
            .zip(grid.z.iter())
            .map(|(x, z)| x.hypot(z + param.radius))
            .fold(0., f64::max);
        assert!((r_max - param.radius - 8e-2).abs() < 1e-12);
        let phased = impolgrid((10, 11), 5e-2, Some(PI / 2.), &getparam(Probe::P4_2v)).unwrap();
        assert!(phased.x[(9, 5)].abs() < 1e-15);
        assert!((phased.z[(9, 5)] - 5e-2).abs() < 1e-15);
        assert!(impolgrid((0, 10), 5e-2, None, &param).is_err());
    }

    #[test]
    fn matrix_array_beamforming() {
        let param = Param::matrix(3e6, 300e-6, 4, 4).tx_delay(vec![0.; 16]);
        let das = dasmtx3(
            SignalKind::Rf,
            (500, 16),
            &[[0., 0., 1e-2]],
            &param,
            Interpolation::Linear,
        )
        .unwrap();
        assert_eq!(das.shape(), (1, 8000));
        assert!(das.nnz() > 0);
        assert!(dasmtx(
            SignalKind::Rf,
            (500, 16),
            &[[0., 0., 1e-2]],
            &param,
            Interpolation::Linear
        )
        .is_err());
    }
}
