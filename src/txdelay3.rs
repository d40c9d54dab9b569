//! Transmit delays of matrix arrays

use std::f64::consts::{FRAC_PI_2, PI};

use crate::{
    param::Param,
    txdelay::{shift_to_zero, TxDelayError},
};

type Result<T> = std::result::Result<T, TxDelayError>;

/// Transmit beam patterns of a matrix array
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transmit3 {
    /// Focused beam at `(x0,y0,z0)`; a negative `z0` is a virtual source behind the array
    Focused { x0: f64, y0: f64, z0: f64 },
    /// Beam focused on the line through `p1` and `p2`
    Line { p1: [f64; 3], p2: [f64; 3] },
    /// Plane wave tilted by `tilt_x` about the x-axis and by `tilt_y` about the y-axis
    Plane { tilt_x: f64, tilt_y: f64 },
    /// Diverging wave tilted by `tilt_x` and `tilt_y` over the solid angle `omega` [sr]
    Diverging { tilt_x: f64, tilt_y: f64, omega: f64 },
}
impl Transmit3 {
    /// Returns the transmit delays [s]; the smallest delay is 0
    pub fn delays(&self, param: &Param) -> Result<Vec<f64>> {
        txdelay3(param, *self)
    }
}

/// Solid angle subtended by a `l` by `b` rectangle centered at the origin in the z=0 plane,
/// seen from the point at distance `r`, azimuth `az` and elevation `el`
pub fn solid_angle(r: f64, l: f64, b: f64, az: f64, el: f64) -> f64 {
    let (cos_el, sin_el) = (el.cos(), el.sin());
    let l1 = l / 2f64 + r * cos_el * az.cos();
    let l2 = -l / 2f64 + r * cos_el * az.cos();
    let b1 = b / 2f64 + r * cos_el * az.sin();
    let b2 = b / 2f64 - r * cos_el * az.sin();
    let h = r * sin_el;
    let w = |l: f64, b: f64| (l * b / l.hypot(h) / b.hypot(h)).clamp(-1f64, 1f64).asin();
    w(l1, b1) + w(l1, b2) - w(l2, b1) - w(l2, b2)
}

/// Bounded minimization of a scalar function by golden-section search
pub(crate) fn fminbound<F: Fn(f64) -> f64>(f: F, lower: f64, upper: f64, xtol: f64) -> f64 {
    let ratio = (5f64.sqrt() - 1f64) / 2f64;
    let (mut a, mut b) = (lower, upper);
    let mut c = b - ratio * (b - a);
    let mut d = a + ratio * (b - a);
    let (mut fc, mut fd) = (f(c), f(d));
    while (b - a).abs() > xtol {
        if fc < fd {
            b = d;
            d = c;
            fd = fc;
            c = b - ratio * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + ratio * (b - a);
            fd = f(d);
        }
    }
    (a + b) / 2f64
}

/// Checks that the element positions form a plaid grid
fn is_plaid(elements: &[[f64; 2]]) -> bool {
    let unique = |axis: usize| {
        let mut values: Vec<f64> = elements.iter().map(|e| e[axis]).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup();
        values
    };
    let (ux, uy) = (unique(0), unique(1));
    if ux.len() * uy.len() != elements.len() {
        return false;
    }
    let mut grid: Vec<[f64; 2]> = itertools::iproduct!(ux.iter(), uy.iter())
        .map(|(x, y)| [*x, *y])
        .collect();
    let mut sorted = elements.to_vec();
    let order = |a: &[f64; 2], b: &[f64; 2]| a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1]));
    grid.sort_by(order);
    sorted.sort_by(order);
    grid == sorted
}

/// Transmit delays of a matrix array
pub fn txdelay3(param: &Param, transmit: Transmit3) -> Result<Vec<f64>> {
    let param = param.checked()?;
    let elements = param.elements.as_ref().ok_or(TxDelayError::NotMatrix)?;
    let c = param.c;
    let delays: Vec<f64> = match transmit {
        Transmit3::Plane { tilt_x, tilt_y } => {
            for tilt in [tilt_x, tilt_y] {
                if !(tilt.abs() < FRAC_PI_2) {
                    return Err(TxDelayError::Tilt(tilt));
                }
            }
            elements
                .iter()
                .map(|[x, y]| (x * tilt_y.sin() - y * tilt_x.sin()) / c)
                .collect()
        }
        Transmit3::Diverging {
            tilt_x,
            tilt_y,
            omega,
        } => {
            for tilt in [tilt_x, tilt_y] {
                if !(tilt.abs() < FRAC_PI_2) {
                    return Err(TxDelayError::Tilt(tilt));
                }
            }
            if !(0f64..=2f64 * PI).contains(&omega) {
                return Err(TxDelayError::SolidAngle(omega));
            }
            if !is_plaid(elements) {
                return Err(TxDelayError::NotPlaid);
            }
            // rotation of the point [0,0,-1]
            let x = -tilt_y.sin() * tilt_x.cos();
            let y = tilt_x.sin();
            let z = -tilt_y.cos() * tilt_x.cos();
            let az = y.atan2(x);
            let el = z.atan2(x.hypot(y));
            // dimensions of the matrix array
            let extent = |axis: usize| {
                let values = elements.iter().map(|e| e[axis]);
                values.clone().fold(f64::NEG_INFINITY, f64::max)
                    - values.fold(f64::INFINITY, f64::min)
            };
            let width = param.element_width();
            let l = extent(0) + width;
            let b = extent(1) + param.height.unwrap_or(width);
            let r = fminbound(
                |r| (solid_angle(r, l, b, az, el) - omega).abs(),
                0f64,
                2f64 * PI,
                1e-6,
            );
            let x0 = r * el.cos() * az.cos();
            let y0 = r * el.cos() * az.sin();
            let z0 = r * el.sin();
            log::debug!(
                "diverging wave: virtual source at ({:.3e},{:.3e},{:.3e})",
                x0,
                y0,
                z0
            );
            return txdelay3(&param, Transmit3::Focused { x0, y0, z0 });
        }
        Transmit3::Focused { x0, y0, z0 } => {
            if z0 == 0f64 || !z0.is_finite() {
                return Err(TxDelayError::FocusDepth);
            }
            elements
                .iter()
                .map(|[x, y]| -((x - x0).powi(2) + (y - y0).powi(2) + z0 * z0).sqrt() / c * z0.signum())
                .collect()
        }
        Transmit3::Line { p1, p2 } => {
            let u = [p2[0] - p1[0], p2[1] - p1[1], p2[2] - p1[2]];
            let norm_u = (u[0] * u[0] + u[1] * u[1] + u[2] * u[2]).sqrt();
            if norm_u == 0f64 {
                return Err(TxDelayError::FocusLine);
            }
            let sign = (p1[2] + p2[2]).signum();
            if p1[2] + p2[2] == 0f64 {
                return Err(TxDelayError::FocusDepth);
            }
            elements
                .iter()
                .map(|&[x, y]| {
                    // distance from the element to the line
                    let a = [x - p1[0], y - p1[1], -p1[2]];
                    let b = [x - p2[0], y - p2[1], -p2[2]];
                    let cross = [
                        a[1] * b[2] - a[2] * b[1],
                        a[2] * b[0] - a[0] * b[2],
                        a[0] * b[1] - a[1] * b[0],
                    ];
                    let d = (cross[0] * cross[0] + cross[1] * cross[1] + cross[2] * cross[2])
                        .sqrt()
                        / norm_u;
                    -d / c * sign
                })
                .collect()
        }
    };
    Ok(shift_to_zero(delays))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> Param {
        let mut param = Param::matrix(3e6, 300e-6, 32, 32);
        param.width = Some(250e-6);
        param.kerf = Some(50e-6);
        param.height = Some(250e-6);
        param
    }

    #[test]
    fn plane_wave() {
        let param = matrix();
        let delays = txdelay3(&param, Transmit3::Plane { tilt_x: 0., tilt_y: 0. }).unwrap();
        assert!(delays.iter().all(|d| *d == 0.));
        let delays = txdelay3(
            &param,
            Transmit3::Plane {
                tilt_x: 0.,
                tilt_y: 0.2,
            },
        )
        .unwrap();
        let span = 31. * param.pitch * 0.2f64.sin() / param.c;
        let max = delays.iter().cloned().fold(0., f64::max);
        assert!((max - span).abs() < 1e-15);
    }

    #[test]
    fn focused_point() {
        let param = matrix();
        let delays = txdelay3(
            &param,
            Transmit3::Focused {
                x0: 0.,
                y0: -2e-3,
                z0: 30e-3,
            },
        )
        .unwrap();
        assert_eq!(delays.len(), 1024);
        let min = delays.iter().cloned().fold(f64::INFINITY, f64::min);
        assert_eq!(min, 0.);
        let elements = param.elements.as_ref().unwrap();
        let arrivals: Vec<f64> = elements
            .iter()
            .zip(&delays)
            .map(|([x, y], d)| d + (x * x + (y + 2e-3).powi(2) + 9e-4).sqrt() / param.c)
            .collect();
        assert!(arrivals.iter().all(|a| (a - arrivals[0]).abs() < 1e-15));
    }

    #[test]
    fn focused_line() {
        let param = matrix();
        let delays = txdelay3(
            &param,
            Transmit3::Line {
                p1: [-1e-2, 0., 2.5e-2],
                p2: [1e-2, 0., 2.5e-2],
            },
        )
        .unwrap();
        // a line parallel to x: the delays depend on y only
        let elements = param.elements.as_ref().unwrap();
        for (e, d) in elements.iter().zip(&delays).skip(1) {
            if e[1] == elements[0][1] {
                assert!((d - delays[0]).abs() < 1e-15);
            }
        }
    }

    #[test]
    fn solid_angle_of_a_hemisphere() {
        // seen from its center, a large rectangle subtends almost 2pi
        let omega = solid_angle(1e-6, 1., 1., 0., -FRAC_PI_2);
        assert!((omega - 2. * PI).abs() < 1e-3);
    }

    #[test]
    fn diverging_wave() {
        let param = matrix();
        let omega = 0.5;
        let delays = txdelay3(
            &param,
            Transmit3::Diverging {
                tilt_x: 0.,
                tilt_y: 0.,
                omega,
            },
        )
        .unwrap();
        assert_eq!(delays.len(), 1024);
        // center elements fire first, corners last
        let corner = delays[0];
        assert!(corner > 0.);
        assert!((delays[1023] - corner).abs() < 1e-15);
        let not_plaid = Param {
            elements: Some(vec![[0., 0.], [1e-4, 1e-4], [3e-4, 0.]]),
            ..matrix()
        };
        assert!(matches!(
            txdelay3(
                &not_plaid,
                Transmit3::Diverging {
                    tilt_x: 0.,
                    tilt_y: 0.,
                    omega
                }
            ),
            Err(TxDelayError::NotPlaid)
        ));
    }

    #[test]
    fn diverging_wave_solid_angle() {
        // odd number of elements: the center element fires first
        let mut param = Param::matrix(3e6, 300e-6, 33, 33);
        param.width = Some(250e-6);
        param.kerf = Some(50e-6);
        param.height = Some(250e-6);
        let (l, b) = (32. * 300e-6 + 250e-6, 32. * 300e-6 + 250e-6);
        let elements = param.elements.clone().unwrap();
        let c = param.c;

        let omega = 0.5;
        let delays = txdelay3(
            &param,
            Transmit3::Diverging {
                tilt_x: 0.,
                tilt_y: 0.,
                omega,
            },
        )
        .unwrap();
        let (i, d) = delays
            .iter()
            .enumerate()
            .fold((0, 0.), |(i, m), (j, d)| if *d > m { (j, *d) } else { (i, m) });
        let [xc, yc] = elements[i];
        let r = (xc * xc + yc * yc - (c * d).powi(2)) / (2. * c * d);
        assert!((solid_angle(r, l, b, 0., -FRAC_PI_2) - omega).abs() < 1e-3);

        // tilted: distance of the virtual source fitted to the delays
        let (tilt_x, tilt_y, omega) = (0.1, 0.2, 0.8);
        let delays = txdelay3(
            &param,
            Transmit3::Diverging {
                tilt_x,
                tilt_y,
                omega,
            },
        )
        .unwrap();
        let u = [
            -tilt_y.sin() * tilt_x.cos(),
            tilt_x.sin(),
            -tilt_y.cos() * tilt_x.cos(),
        ];
        let spread = |r: f64| {
            let offsets: Vec<f64> = elements
                .iter()
                .zip(&delays)
                .map(|([x, y], d)| {
                    let dist = ((x - r * u[0]).powi(2) + (y - r * u[1]).powi(2) + (r * u[2]).powi(2))
                        .sqrt();
                    c * d - dist
                })
                .collect();
            let mean = offsets.iter().sum::<f64>() / offsets.len() as f64;
            offsets.iter().map(|o| (o - mean).powi(2)).sum::<f64>()
        };
        let r = fminbound(spread, 1e-3, 0.1, 1e-9);
        let az = u[1].atan2(u[0]);
        let el = u[2].atan2(u[0].hypot(u[1]));
        assert!((solid_angle(r, l, b, az, el) - omega).abs() < 1e-3);
    }

    #[test]
    fn golden_section() {
        let x = fminbound(|x| (x - 1.3).powi(2), 0., 2. * PI, 1e-8);
        assert!((x - 1.3).abs() < 1e-6);
    }
}
