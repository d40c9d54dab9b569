//! Geometry and acoustic response of the transducer elements
//!
//! Each element is split into sub-elements small compared to the wavelength.
//! The response of an element at a point is the sum of the far-field responses
//! of its sub-elements:
//! `sum_m D_m E exp(-i k r_m) exp(-alpha f r_m) / r_m / M`
//! with `D_m` the sub-element directivity and `E` the elevation focusing factor.

use std::f64::consts::PI;

use num_complex::Complex64;

use crate::{
    param::{Baffle, Param},
    spectrum::sinc,
};

type Vec3 = [f64; 3];

fn dot(a: &Vec3, b: &Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// A transducer element
#[derive(Debug, Clone)]
pub struct Element {
    pub center: Vec3,
    /// unit vector normal to the element surface
    pub normal: Vec3,
    /// unit vector along the element width
    pub lateral: Vec3,
    /// unit vector along the element height
    pub elevation: Vec3,
    /// centers of the sub-elements
    subs: Vec<Vec3>,
}
impl Element {
    /// Distance from the element center to `point`
    pub fn distance(&self, point: &Vec3) -> f64 {
        let d = [
            point[0] - self.center[0],
            point[1] - self.center[1],
            point[2] - self.center[2],
        ];
        dot(&d, &d).sqrt()
    }
    /// Cosine and tangent of the angle between the element normal and the direction of `point`
    pub fn angle(&self, point: &Vec3) -> (f64, f64) {
        let d = [
            point[0] - self.center[0],
            point[1] - self.center[1],
            point[2] - self.center[2],
        ];
        let r = dot(&d, &d).sqrt();
        if r == 0f64 {
            return (1f64, 0f64);
        }
        let axial = dot(&d, &self.normal);
        let transverse = (r * r - axial * axial).max(0f64).sqrt();
        (axial / r, transverse / axial)
    }
}

#[derive(Debug, Clone)]
enum Elevation {
    /// Linear or convex array with a finite element height and an elevation focus
    Lens { height: f64, focus: f64 },
    /// No elevation model or matrix array
    None,
}

/// Transducer model used by the field and RF simulators
#[derive(Debug, Clone)]
pub struct Transducer {
    elements: Vec<Element>,
    sub_width: f64,
    sub_height: Option<f64>,
    elevation: Elevation,
    baffle: Baffle,
    c: f64,
    alpha: f64,
}
impl Transducer {
    /// Builds the transducer model from checked parameters
    ///
    /// Without `splitting`, the elements are split so that the sub-elements are
    /// smaller than half the smallest wavelength, given by `f_max`.
    pub fn new(param: &Param, f_max: f64, splitting: Option<usize>) -> Self {
        let width = param.element_width();
        let half_wavelength = param.c / f_max.max(param.fc) / 2f64;
        let split = |size: f64| {
            splitting
                .unwrap_or_else(|| (size / half_wavelength).ceil() as usize)
                .max(1)
        };
        let offsets = |size: f64, n: usize| -> Vec<f64> {
            (0..n)
                .map(|m| -size / 2f64 + (m as f64 + 0.5) * size / n as f64)
                .collect()
        };
        let n_x = split(width);
        let x_offsets = offsets(width, n_x);

        let (elements, sub_height, elevation) = if let Some(centers) = &param.elements {
            let height = param.height.unwrap_or(width);
            let n_y = split(height);
            let y_offsets = offsets(height, n_y);
            let elements = centers
                .iter()
                .map(|&[x, y]| Element {
                    center: [x, y, 0f64],
                    normal: [0f64, 0f64, 1f64],
                    lateral: [1f64, 0f64, 0f64],
                    elevation: [0f64, 1f64, 0f64],
                    subs: y_offsets
                        .iter()
                        .flat_map(|dy| x_offsets.iter().map(move |dx| [x + dx, y + dy, 0f64]))
                        .collect(),
                })
                .collect();
            (elements, Some(height / n_y as f64), Elevation::None)
        } else {
            let positions = param.element_positions();
            let elements = positions
                .x
                .iter()
                .zip(&positions.z)
                .zip(&positions.theta)
                .map(|((&x, &z), &theta)| {
                    let (s, c) = theta.sin_cos();
                    let lateral = [c, 0f64, -s];
                    Element {
                        center: [x, 0f64, z],
                        normal: [s, 0f64, c],
                        lateral,
                        elevation: [0f64, 1f64, 0f64],
                        subs: x_offsets
                            .iter()
                            .map(|dx| [x + dx * lateral[0], 0f64, z + dx * lateral[2]])
                            .collect(),
                    }
                })
                .collect();
            let elevation = match param.height {
                Some(height) => Elevation::Lens {
                    height,
                    focus: param.focus,
                },
                None => Elevation::None,
            };
            (elements, None, elevation)
        };
        Self {
            elements,
            sub_width: width / n_x as f64,
            sub_height,
            elevation,
            baffle: param.baffle,
            c: param.c,
            alpha: param.attenuation_np(),
        }
    }
    pub fn len(&self) -> usize {
        self.elements.len()
    }
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }
    /// Number of sub-elements per element
    pub fn splitting(&self) -> usize {
        self.elements.first().map_or(0, |e| e.subs.len())
    }
    /// Complex responses of all the elements at `point` for frequency `f`
    pub fn responses(&self, point: &Vec3, f: f64) -> Vec<Complex64> {
        let mut out = vec![Complex64::new(0f64, 0f64); self.len()];
        self.responses_into(point, f, &mut out);
        out
    }
    /// Writes the complex responses of all the elements at `point` for frequency `f` into `out`
    pub fn responses_into(&self, point: &Vec3, f: f64, out: &mut [Complex64]) {
        let k = 2f64 * PI * f / self.c;
        let attenuation = self.alpha * f;
        for (element, out) in self.elements.iter().zip(out.iter_mut()) {
            let elevation = self.elevation_factor(element, point, k);
            let mut sum = Complex64::new(0f64, 0f64);
            for sub in &element.subs {
                let d = [point[0] - sub[0], point[1] - sub[1], point[2] - sub[2]];
                let r = dot(&d, &d).sqrt().max(1e-3 * self.sub_width);
                let cos_t = dot(&d, &element.normal) / r;
                if cos_t <= 0f64 {
                    continue;
                }
                let mut directivity = self.baffle.obliquity(cos_t)
                    * sinc(k * self.sub_width / 2f64 * dot(&d, &element.lateral) / r);
                let phase_r = match self.elevation {
                    // the elevation factor carries the phase along y
                    Elevation::Lens { .. } => {
                        (r * r - d[1] * d[1]).max(0f64).sqrt()
                    }
                    Elevation::None => r,
                };
                if let Some(height) = self.sub_height {
                    directivity *= sinc(k * height / 2f64 * dot(&d, &element.elevation) / r);
                }
                sum += Complex64::from_polar(
                    directivity * (-attenuation * r).exp() / r,
                    -k * phase_r,
                );
            }
            *out = sum * elevation / element.subs.len() as f64;
        }
    }
    /// Elevation focusing factor of a linear or convex array element (Fresnel approximation)
    ///
    /// `E = 1/b int_{-b/2}^{b/2} exp(-i k ((y-h)^2/2/R - h^2/2/F)) dh` with `R` the in-plane distance
    fn elevation_factor(&self, element: &Element, point: &Vec3, k: f64) -> Complex64 {
        let (height, focus) = match self.elevation {
            Elevation::Lens { height, focus } => (height, focus),
            Elevation::None => return Complex64::new(1f64, 0f64),
        };
        let d = [
            point[0] - element.center[0],
            point[2] - element.center[2],
        ];
        let r = d[0].hypot(d[1]).max(1e-6);
        let y = point[1];
        let half = height / 2f64;
        let inv_focus = if focus.is_finite() { 1f64 / focus } else { 0f64 };
        let phase = |h: f64| -k * ((y - h).powi(2) / 2f64 / r - h * h * inv_focus / 2f64);
        // Simpson's rule with enough nodes to sample the phase
        let span = k * ((y.abs() + half).powi(2) / 2f64 / r + half * half * inv_focus / 2f64);
        let mut n = ((span / (PI / 8f64)).ceil() as usize).clamp(2, 512);
        if n % 2 == 1 {
            n += 1;
        }
        let dh = height / n as f64;
        let sum = (0..=n).fold(Complex64::new(0f64, 0f64), |s, i| {
            let weight = if i == 0 || i == n {
                1f64
            } else if i % 2 == 1 {
                4f64
            } else {
                2f64
            };
            s + Complex64::from_polar(weight, phase(-half + i as f64 * dh))
        });
        sum * dh / 3f64 / height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::{getparam, Probe};

    #[test]
    fn sub_element_splitting() {
        let param = getparam(Probe::L11_5v).checked().unwrap();
        let transducer = Transducer::new(&param, 12e6, None);
        assert_eq!(transducer.len(), 128);
        let half_wavelength = param.c / 12e6 / 2.;
        let m = transducer.splitting();
        assert!(param.element_width() / m as f64 <= half_wavelength);
        assert_eq!(Transducer::new(&param, 12e6, Some(1)).splitting(), 1);
    }

    #[test]
    fn no_response_behind_the_array() {
        let param = getparam(Probe::P4_2v).checked().unwrap();
        let transducer = Transducer::new(&param, 4e6, None);
        let responses = transducer.responses(&[0., 0., -1e-2], 2.7e6);
        assert!(responses.iter().all(|r| r.norm() == 0.));
        let responses = transducer.responses(&[0., 0., 1e-2], 2.7e6);
        assert!(responses.iter().all(|r| r.norm() > 0.));
    }

    #[test]
    fn symmetric_responses() {
        let param = getparam(Probe::P4_2v).checked().unwrap();
        let transducer = Transducer::new(&param, 4e6, None);
        let responses = transducer.responses(&[0., 0., 3e-2], 2.7e6);
        let n = responses.len();
        for i in 0..n / 2 {
            assert!((responses[i] - responses[n - 1 - i]).norm() < 1e-9 * responses[i].norm());
        }
    }

    #[test]
    fn elevation_focus_gain() {
        // the elevation lens focuses the field at the elevation focus
        let param = getparam(Probe::L11_5v).checked().unwrap();
        let transducer = Transducer::new(&param, 10e6, None);
        let element = &transducer.elements()[64];
        let k = 2. * PI * param.fc / param.c;
        let at_focus = transducer.elevation_factor(element, &[0., 0., param.focus], k);
        let off_plane = transducer.elevation_factor(element, &[0., 2e-3, param.focus], k);
        assert!((at_focus.norm() - 1.).abs() < 1e-3);
        assert!(off_plane.norm() < at_focus.norm());
    }

    #[test]
    fn attenuation_reduces_the_response() {
        let param = getparam(Probe::L11_5v).checked().unwrap();
        let lossy = Param {
            attenuation: 0.5,
            ..param.clone()
        };
        let point = [0., 0., 2e-2];
        let r0 = Transducer::new(&param, 10e6, None).responses(&point, 7.6e6)[64].norm();
        let r1 = Transducer::new(&lossy, 10e6, None).responses(&point, 7.6e6)[64].norm();
        // 0.5 dB/cm/MHz over 2 cm at 7.6 MHz
        let expected = 10f64.powf(-0.5 * 2. * 7.6 / 20.);
        assert!((r1 / r0 - expected).abs() < 1e-2 * expected);
    }

    #[test]
    fn matrix_elements() {
        let param = Param::matrix(3e6, 300e-6, 4, 4).checked().unwrap();
        let transducer = Transducer::new(&param, 4e6, Some(2));
        assert_eq!(transducer.len(), 16);
        assert_eq!(transducer.splitting(), 4);
        let responses = transducer.responses(&[0., 0., 1e-2], 3e6);
        assert!(responses.iter().all(|r| r.norm() > 0.));
    }
}
