//! Pseudorandom distributions of scatterers
//!
//! The scatterers are placed on a jittered grid so that the mean distance between
//! a scatterer and its nearest neighbor is close to a given value.
//! Their reflection coefficients follow Rayleigh distributions whose means can be
//! derived from a gray-scale image of the region of interest.

use std::{f64::consts::PI, path::Path};

use nalgebra::DMatrix;
use rand::{seq::SliceRandom, Rng};
use rand_distr::StandardNormal;
use serde::Serialize;

use crate::param::Param;

#[derive(Debug, thiserror::Error)]
pub enum GenscatError {
    #[error("the mean distance between scatterers must be positive, found {0}")]
    MeanDistance(f64),
    #[error("the fractional bandwidth (in %) must be in ]0,200[, found {0}")]
    Bandwidth(f64),
    #[error("a center frequency (fc) is required")]
    CenterFrequency,
    #[error("the ROI must have finite positive dimensions when no image is given")]
    Roi,
    #[error("the ROI of a plane needs one or two finite dimensions, of a box one or three")]
    RoiNan,
    #[error("the number of dimensions of the image does not match the ROI")]
    Dimensions,
    #[error("the image must be non-empty with non-negative elements")]
    Image,
    #[error("the dynamic range (or gamma) g must be positive, found {0}")]
    Compression(f64),
    #[error("the dynamic range (or gamma) g requires an image")]
    CompressionWithoutImage,
    #[error("failed to write the scatterers")]
    Csv(#[from] csv::Error),
}
type Result<T> = std::result::Result<T, GenscatError>;

/// Region of interest
///
/// The middle of the lower edge (plane) or the center of the lower face (box) is at the origin.
/// A NaN dimension is derived from the image aspect ratio.
#[derive(Debug, Clone, Copy)]
pub enum Roi {
    /// width (x) and height (z)
    Plane { width: f64, height: f64 },
    /// width (x), height (z) and depth (y)
    Box { width: f64, height: f64, depth: f64 },
}

/// Mean distance between a scatterer and its nearest neighbor
#[derive(Debug, Clone, Copy)]
pub enum MeanDist<'a> {
    Value(f64),
    /// the smallest wavelength at -6dB: `c/(fc(1+bandwidth/200))`
    FromParam(&'a Param),
}
impl MeanDist<'_> {
    fn value(&self) -> Result<f64> {
        match self {
            MeanDist::Value(value) => {
                if *value > 0f64 && value.is_finite() {
                    Ok(*value)
                } else {
                    Err(GenscatError::MeanDistance(*value))
                }
            }
            MeanDist::FromParam(param) => {
                if !(param.fc > 0f64) {
                    return Err(GenscatError::CenterFrequency);
                }
                if !(param.bandwidth > 0f64 && param.bandwidth < 200f64) {
                    return Err(GenscatError::Bandwidth(param.bandwidth));
                }
                Ok(param.min_wavelength())
            }
        }
    }
}

/// A 3-D image stored slice by slice: `data[i + j*rows + k*rows*cols]`
///
/// Rows are along z, columns along x and slices along y.
#[derive(Debug, Clone)]
pub struct Volume {
    pub shape: [usize; 3],
    pub data: Vec<f64>,
}
impl Volume {
    fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        let [m, n, _] = self.shape;
        self.data[i + j * m + k * m * n]
    }
}

/// Image of the reflectivity of the region of interest
#[derive(Debug, Clone, Copy)]
pub enum Reflectivity<'a> {
    /// rows along z, columns along x
    Image(&'a DMatrix<f64>),
    Volume(&'a Volume),
}

/// Scatterer positions [m] and reflection coefficients
#[derive(Debug, Clone, Default)]
pub struct Scatterers {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub rc: Vec<f64>,
}
#[derive(Serialize)]
struct Record {
    #[serde(rename = "X (m)")]
    x: f64,
    #[serde(rename = "Y (m)")]
    y: f64,
    #[serde(rename = "Z (m)")]
    z: f64,
    #[serde(rename = "RC")]
    rc: f64,
}
impl Scatterers {
    pub fn len(&self) -> usize {
        self.x.len()
    }
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
    /// Iterator over the scatterer positions
    pub fn xyz_iter(&self) -> impl Iterator<Item = [f64; 3]> + '_ {
        self.x
            .iter()
            .zip(&self.y)
            .zip(&self.z)
            .map(|((x, y), z)| [*x, *y, *z])
    }
    /// Keeps the scatterers for which `predicate(x,y,z)` is true
    pub fn retain<F: Fn(f64, f64, f64) -> bool>(&mut self, predicate: F) {
        let keep: Vec<bool> = self.xyz_iter().map(|[x, y, z]| predicate(x, y, z)).collect();
        let filter = |v: &mut Vec<f64>| {
            let mut it = keep.iter();
            v.retain(|_| *it.next().unwrap_or(&false));
        };
        filter(&mut self.x);
        filter(&mut self.y);
        filter(&mut self.z);
        filter(&mut self.rc);
    }
    /// Writes the scatterers to a CSV file
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;
        for ([x, y, z], rc) in self.xyz_iter().zip(&self.rc) {
            wtr.serialize(Record { x, y, z, rc: *rc })?;
        }
        wtr.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

/// Rayleigh distributed sample of mean 1
fn rayleigh<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let a: f64 = rng.sample(StandardNormal);
    let b: f64 = rng.sample(StandardNormal);
    a.hypot(b) / (PI / 2f64).sqrt()
}

/// Values `min, min+step, ...` strictly less than `max`
fn arange(min: f64, max: f64, step: f64) -> Vec<f64> {
    let n = ((max - min) / step).ceil().max(0f64) as usize;
    (0..n).map(|k| min + k as f64 * step).collect()
}

/// Linear interpolation weights of `u` on the grid `u0 + k*du`, `k<n`, clamped at the borders
fn weights(u: f64, u0: f64, du: f64, n: usize) -> (usize, usize, f64) {
    if n == 1 {
        return (0, 0, 0f64);
    }
    let f = ((u - u0) / du).clamp(0f64, (n - 1) as f64);
    let i = (f.floor() as usize).min(n - 2);
    (i, i + 1, f - i as f64)
}

/// Generates a pseudorandom distribution of scatterers
///
/// `g` is the dynamic range [dB] of the image (default 40dB); if `g<=1`, the image
/// is assumed gamma-compressed with gamma `g`. `g` cannot be given without an image.
pub fn genscat<R: Rng + ?Sized>(
    roi: Roi,
    meandist: MeanDist,
    image: Option<Reflectivity>,
    g: Option<f64>,
    rng: &mut R,
) -> Result<Scatterers> {
    let meandist = meandist.value()?;
    if image.is_none() && g.is_some() {
        return Err(GenscatError::CompressionWithoutImage);
    }
    let g = g.unwrap_or(40f64);
    if !(g > 0f64) {
        return Err(GenscatError::Compression(g));
    }

    // resolve the dimensions of the ROI
    let roi = match (roi, image) {
        (Roi::Plane { .. }, Some(Reflectivity::Volume(_)))
        | (Roi::Box { .. }, Some(Reflectivity::Image(_))) => {
            return Err(GenscatError::Dimensions)
        }
        (Roi::Plane { width, height }, Some(Reflectivity::Image(image))) => {
            let (m, n) = image.shape();
            match (width.is_finite(), height.is_finite()) {
                (true, true) => Roi::Plane { width, height },
                (false, true) => Roi::Plane {
                    width: n as f64 * height / m as f64,
                    height,
                },
                (true, false) => Roi::Plane {
                    width,
                    height: m as f64 * width / n as f64,
                },
                (false, false) => return Err(GenscatError::RoiNan),
            }
        }
        (Roi::Box { width, height, depth }, Some(Reflectivity::Volume(volume))) => {
            let [m, n, p] = volume.shape.map(|s| s as f64);
            match (width.is_finite(), height.is_finite(), depth.is_finite()) {
                (true, true, true) => Roi::Box { width, height, depth },
                (false, true, false) => Roi::Box {
                    width: n * height / m,
                    height,
                    depth: p * height / m,
                },
                (true, false, false) => Roi::Box {
                    width,
                    height: m * width / n,
                    depth: p * width / n,
                },
                (false, false, true) => Roi::Box {
                    width: n * depth / p,
                    height: m * depth / p,
                    depth,
                },
                _ => return Err(GenscatError::RoiNan),
            }
        }
        (roi, None) => roi,
    };
    let positive = |v: f64| v.is_finite() && v > 0f64;
    match roi {
        Roi::Plane { width, height } if positive(width) && positive(height) => (),
        Roi::Box {
            width,
            height,
            depth,
        } if positive(width) && positive(height) && positive(depth) => (),
        _ => return Err(GenscatError::Roi),
    }
    match image {
        Some(Reflectivity::Image(image))
            if image.is_empty() || image.iter().any(|v| !(*v >= 0f64)) =>
        {
            return Err(GenscatError::Image)
        }
        Some(Reflectivity::Volume(volume))
            if volume.data.is_empty()
                || volume.data.len() != volume.shape.iter().product::<usize>()
                || volume.data.iter().any(|v| !(*v >= 0f64)) =>
        {
            return Err(GenscatError::Image)
        }
        _ => (),
    }

    // jittered grid
    let mut scatterers = Scatterers::default();
    match roi {
        Roi::Plane { width, height } => {
            let inc = meandist / (2f64 / 5f64).sqrt();
            let (xmin, xmax, zmax) = (-width / 2f64, width / 2f64, height);
            for z in arange(0f64, zmax, inc) {
                for x in arange(xmin, xmax, inc) {
                    let xs = x + rng.gen::<f64>() * inc - inc / 2f64;
                    let zs = z + rng.gen::<f64>() * inc - inc / 2f64;
                    if xs > xmin && xs < xmax && zs > 0f64 && zs < zmax {
                        scatterers.x.push(xs);
                        scatterers.y.push(0f64);
                        scatterers.z.push(zs);
                    }
                }
            }
        }
        Roi::Box {
            width,
            height,
            depth,
        } => {
            let inc = meandist / (16f64 / 39f64).sqrt();
            let (xmin, xmax, ymin, ymax, zmax) =
                (-width / 2f64, width / 2f64, -depth / 2f64, depth / 2f64, height);
            for z in arange(0f64, zmax, inc) {
                for y in arange(ymin, ymax, inc) {
                    for x in arange(xmin, xmax, inc) {
                        let xs = x + rng.gen::<f64>() * inc - inc / 2f64;
                        let ys = y + rng.gen::<f64>() * inc - inc / 2f64;
                        let zs = z + rng.gen::<f64>() * inc - inc / 2f64;
                        if xs > xmin && xs < xmax && ys > ymin && ys < ymax && zs > 0f64 && zs < zmax
                        {
                            scatterers.x.push(xs);
                            scatterers.y.push(ys);
                            scatterers.z.push(zs);
                        }
                    }
                }
            }
        }
    }

    // random reordering
    let mut order: Vec<usize> = (0..scatterers.len()).collect();
    order.shuffle(rng);
    let reorder = |v: &[f64]| order.iter().map(|&i| v[i]).collect::<Vec<f64>>();
    scatterers.x = reorder(&scatterers.x);
    scatterers.y = reorder(&scatterers.y);
    scatterers.z = reorder(&scatterers.z);

    // reflection coefficients
    scatterers.rc = match image {
        None => (0..scatterers.len()).map(|_| rayleigh(rng)).collect(),
        Some(reflectivity) => {
            let brightness = interpolate(&scatterers, roi, reflectivity);
            brightness
                .into_iter()
                .map(|b| {
                    let mean = if g > 1f64 {
                        10f64.powf(g / 20f64 * (b - 1f64))
                    } else {
                        b.powf(1f64 / g)
                    };
                    mean * rayleigh(rng)
                })
                .collect()
        }
    };
    log::debug!("{} scatterers generated", scatterers.len());
    Ok(scatterers)
}

/// Normalized image brightness at the scatterer locations (bilinear/trilinear interpolation)
fn interpolate(scatterers: &Scatterers, roi: Roi, reflectivity: Reflectivity) -> Vec<f64> {
    match (roi, reflectivity) {
        (Roi::Plane { width, height }, Reflectivity::Image(image)) => {
            let max = image.max();
            let (nl, nc) = image.shape();
            let (dxi, dzi) = (width / nc as f64, height / nl as f64);
            let (x0, z0) = (-width / 2f64 + dxi / 2f64, dzi / 2f64);
            scatterers
                .x
                .iter()
                .zip(&scatterers.z)
                .map(|(x, z)| {
                    let (j0, j1, u) = weights(*x, x0, dxi, nc);
                    let (i0, i1, v) = weights(*z, z0, dzi, nl);
                    let value = (1f64 - u) * (1f64 - v) * image[(i0, j0)]
                        + u * (1f64 - v) * image[(i0, j1)]
                        + (1f64 - u) * v * image[(i1, j0)]
                        + u * v * image[(i1, j1)];
                    if max > 0f64 {
                        value / max
                    } else {
                        0f64
                    }
                })
                .collect()
        }
        (
            Roi::Box {
                width,
                height,
                depth,
            },
            Reflectivity::Volume(volume),
        ) => {
            let max = volume.data.iter().cloned().fold(0f64, f64::max);
            let [nl, nc, nr] = volume.shape;
            let (dxi, dyi, dzi) = (width / nc as f64, depth / nr as f64, height / nl as f64);
            let (x0, y0, z0) = (
                -width / 2f64 + dxi / 2f64,
                -depth / 2f64 + dyi / 2f64,
                dzi / 2f64,
            );
            scatterers
                .xyz_iter()
                .map(|[x, y, z]| {
                    let (j0, j1, u) = weights(x, x0, dxi, nc);
                    let (k0, k1, w) = weights(y, y0, dyi, nr);
                    let (i0, i1, v) = weights(z, z0, dzi, nl);
                    let mut value = 0f64;
                    for (i, wi) in [(i0, 1f64 - v), (i1, v)] {
                        for (j, wj) in [(j0, 1f64 - u), (j1, u)] {
                            for (k, wk) in [(k0, 1f64 - w), (k1, w)] {
                                value += wi * wj * wk * volume.get(i, j, k);
                            }
                        }
                    }
                    if max > 0f64 {
                        value / max
                    } else {
                        0f64
                    }
                })
                .collect()
        }
        _ => vec![0f64; scatterers.len()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::{getparam, Probe};
    use rand::{rngs::StdRng, SeedableRng};

    fn mean_nearest_distance(s: &Scatterers, inside: impl Fn(f64, f64, f64) -> bool) -> f64 {
        let points: Vec<[f64; 3]> = s.xyz_iter().collect();
        let distances: Vec<f64> = points
            .iter()
            .filter(|p| inside(p[0], p[1], p[2]))
            .map(|p| {
                points
                    .iter()
                    .filter(|q| *q != p)
                    .map(|q| ((p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2) + (p[2] - q[2]).powi(2)).sqrt())
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        distances.iter().sum::<f64>() / distances.len() as f64
    }

    #[test]
    fn plane_distribution() {
        let mut rng = StdRng::seed_from_u64(7);
        let d = 1e-4;
        let s = genscat(
            Roi::Plane {
                width: 40. * d,
                height: 40. * d,
            },
            MeanDist::Value(d),
            None,
            None,
            &mut rng,
        )
        .unwrap();
        assert!(s.x.iter().all(|x| x.abs() < 20. * d));
        assert!(s.z.iter().all(|z| *z > 0. && *z < 40. * d));
        assert!(s.y.iter().all(|y| *y == 0.));
        let mean = mean_nearest_distance(&s, |x, _, z| x.abs() < 15. * d && z > 5. * d && z < 35. * d);
        assert!((mean / d - 1.).abs() < 0.2, "mean distance: {}", mean / d);
        let mean_rc = s.rc.iter().sum::<f64>() / s.len() as f64;
        assert!((mean_rc - 1.).abs() < 0.1);
    }

    #[test]
    fn box_distribution() {
        let mut rng = StdRng::seed_from_u64(11);
        let d = 1e-4;
        let s = genscat(
            Roi::Box {
                width: 12. * d,
                height: 12. * d,
                depth: 12. * d,
            },
            MeanDist::Value(d),
            None,
            None,
            &mut rng,
        )
        .unwrap();
        assert!(!s.is_empty());
        assert!(s.y.iter().all(|y| y.abs() < 6. * d));
        let mean = mean_nearest_distance(&s, |x, y, z| {
            x.abs() < 4. * d && y.abs() < 4. * d && z > 2. * d && z < 10. * d
        });
        assert!((mean / d - 1.).abs() < 0.25, "mean distance: {}", mean / d);
    }

    #[test]
    fn meandist_from_param() {
        let param = getparam(Probe::L11_5v);
        let value = MeanDist::FromParam(&param).value().unwrap();
        assert!((value - 1540. / (7.6e6 * (1. + 77. / 200.))).abs() < 1e-15);
        assert!(MeanDist::Value(-1.).value().is_err());
    }

    #[test]
    fn image_driven_reflectivity() {
        let mut rng = StdRng::seed_from_u64(3);
        // bright left half, dark right half
        let image = DMatrix::from_fn(20, 20, |_, j| if j < 10 { 1. } else { 0. });
        let s = genscat(
            Roi::Plane {
                width: f64::NAN,
                height: 1e-2,
            },
            MeanDist::Value(1e-4),
            Some(Reflectivity::Image(&image)),
            Some(40.),
            &mut rng,
        )
        .unwrap();
        // square image: the width is the height
        assert!(s.x.iter().all(|x| x.abs() < 5e-3));
        let mean = |left: bool| {
            let rc: Vec<f64> = s
                .x
                .iter()
                .zip(&s.rc)
                .filter(|(x, _)| if left { **x < -1e-3 } else { **x > 1e-3 })
                .map(|(_, rc)| *rc)
                .collect();
            rc.iter().sum::<f64>() / rc.len() as f64
        };
        // 40 dB between the two halves
        let ratio = mean(true) / mean(false);
        assert!(ratio > 50. && ratio < 200., "ratio: {}", ratio);
    }

    #[test]
    fn invalid_inputs() {
        let mut rng = StdRng::seed_from_u64(0);
        let image = DMatrix::from_element(4, 4, 1.);
        assert!(genscat(
            Roi::Plane {
                width: f64::NAN,
                height: 1e-2
            },
            MeanDist::Value(1e-4),
            None,
            None,
            &mut rng
        )
        .is_err());
        assert!(genscat(
            Roi::Box {
                width: 1e-2,
                height: 1e-2,
                depth: 1e-2
            },
            MeanDist::Value(1e-4),
            Some(Reflectivity::Image(&image)),
            None,
            &mut rng
        )
        .is_err());
        assert!(matches!(
            genscat(
                Roi::Plane {
                    width: 1e-2,
                    height: 1e-2
                },
                MeanDist::Value(1e-4),
                None,
                Some(30.),
                &mut rng
            ),
            Err(GenscatError::CompressionWithoutImage)
        ));
    }

    #[test]
    fn retain_scatterers() {
        let mut s = Scatterers {
            x: vec![0., 1., 2.],
            y: vec![0.; 3],
            z: vec![1., 1., 1.],
            rc: vec![1., 2., 3.],
        };
        s.retain(|x, _, _| x > 0.5);
        assert_eq!(s.x, vec![1., 2.]);
        assert_eq!(s.rc, vec![2., 3.]);
    }
}
