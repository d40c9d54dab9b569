use std::{f64::consts::PI, fmt, fs::File, path::Path};

use serde::{Deserialize, Serialize};
use serde_pickle as pickle;
use strum_macros::EnumIter;

#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("unknown probe: {0}")]
    UnknownProbe(String),
    #[error("a center frequency (fc) is required and must be positive")]
    CenterFrequency,
    #[error("the fractional bandwidth (in %) must be in ]0,200[, found {0}")]
    Bandwidth(f64),
    #[error("the element pitch must be positive")]
    Pitch,
    #[error("the number of elements must be positive")]
    NumberOfElements,
    #[error("the element width must be in ]0,pitch], found {0}")]
    Width(f64),
    #[error("the element kerf must be in [0,pitch[, found {0}")]
    Kerf(f64),
    #[error("the kerf ({kerf}) plus the width ({width}) must be equal to the pitch ({pitch})")]
    Geometry { pitch: f64, width: f64, kerf: f64 },
    #[error("the radius of curvature must be positive")]
    Radius,
    #[error("the speed of sound must be positive")]
    SoundSpeed,
    #[error("the attenuation must be non-negative")]
    Attenuation,
    #[error("the sampling frequency must be positive")]
    SamplingFrequency,
    #[error("the number of cycles of the transmit pulse must be positive")]
    Cycles,
    #[error("{0} must have one value per element ({1})")]
    PerElement(&'static str, usize),
    #[error("the f-number must be non-negative")]
    FNumber,
    #[error("the impedance ratio of the baffle must be positive")]
    Baffle,
    #[error("the element height must be positive")]
    Height,
    #[error("the elevation focus must be positive")]
    ElevationFocus,
    #[error("failed to open the parameter file")]
    Io(#[from] std::io::Error),
    #[error("failed to (de)serialize the parameter file")]
    Pickle(#[from] serde_pickle::Error),
}
type Result<T> = std::result::Result<T, ParamError>;

/// Commercial probes with known parameters
#[allow(non_camel_case_types)]
#[derive(EnumIter, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    L11_5v,
    L12_3v,
    L22_14v,
    C5_2v,
    P4_2v,
    P6_3,
    PA4_2,
    L14_5,
    LA530,
    L7_4,
    P4_1,
}
impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Probe::*;
        match self {
            L11_5v => write!(f, "L11-5v"),
            L12_3v => write!(f, "L12-3v"),
            L22_14v => write!(f, "L22-14v"),
            C5_2v => write!(f, "C5-2v"),
            P4_2v => write!(f, "P4-2v"),
            P6_3 => write!(f, "P6-3"),
            PA4_2 => write!(f, "PA4-2/20"),
            L14_5 => write!(f, "L14-5/38"),
            LA530 => write!(f, "LA530"),
            L7_4 => write!(f, "L7-4"),
            P4_1 => write!(f, "P4-1"),
        }
    }
}
impl TryFrom<&str> for Probe {
    type Error = ParamError;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        use Probe::*;
        match value.trim().to_uppercase().as_str() {
            "L11-5V" => Ok(L11_5v),
            "L12-3V" => Ok(L12_3v),
            "L22-14V" => Ok(L22_14v),
            "C5-2V" => Ok(C5_2v),
            "P4-2V" => Ok(P4_2v),
            "P6-3" => Ok(P6_3),
            "PA4-2/20" | "PA4-2" => Ok(PA4_2),
            "L14-5/38" | "L14-5" => Ok(L14_5),
            "LA530" => Ok(LA530),
            "L7-4" => Ok(L7_4),
            "P4-1" => Ok(P4_1),
            _ => Err(ParamError::UnknownProbe(value.to_string())),
        }
    }
}
impl std::str::FromStr for Probe {
    type Err = ParamError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Probe::try_from(s)
    }
}

/// Acoustic boundary condition around the elements
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum Baffle {
    /// Pressure-release baffle: obliquity factor `cos(theta)`
    #[default]
    Soft,
    /// Rigid baffle: no obliquity factor
    Rigid,
    /// Baffle of impedance ratio `r`: `cos(theta)/(cos(theta)+r)`
    Impedance(f64),
}
impl Baffle {
    /// Obliquity factor for the angle `theta` between the element normal and the observation direction
    pub fn obliquity(&self, cos_theta: f64) -> f64 {
        match self {
            Baffle::Soft => cos_theta,
            Baffle::Rigid => 1f64,
            Baffle::Impedance(ratio) => cos_theta / (cos_theta + ratio),
        }
    }
}

/// Transducer and medium parameters
///
/// Lengths are in m, frequencies in Hz, times in s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    /// center frequency
    pub fc: f64,
    /// element pitch (linear and convex arrays)
    pub pitch: f64,
    /// element width
    pub width: Option<f64>,
    /// gap between adjacent elements
    pub kerf: Option<f64>,
    /// number of elements (linear and convex arrays)
    pub n_elements: usize,
    /// radius of curvature, infinite for linear and phased arrays
    pub radius: f64,
    /// element height, `None` disables the elevation model
    pub height: Option<f64>,
    /// elevation focus
    pub focus: f64,
    /// fractional bandwidth at -6dB [%]
    pub bandwidth: f64,
    pub baffle: Baffle,
    /// speed of sound [m/s]
    pub c: f64,
    /// attenuation coefficient [dB/cm/MHz]
    pub attenuation: f64,
    /// sampling frequency of the RF signals
    pub fs: Option<f64>,
    /// start time of the RF signals
    pub t0: f64,
    /// number of cycles of the transmit pulse
    pub tx_now: f64,
    pub tx_delay: Option<Vec<f64>>,
    pub tx_apodization: Option<Vec<f64>>,
    pub rx_apodization: Option<Vec<f64>>,
    /// receive f-number, `None` derives it from the element directivity
    pub fnumber: Option<f64>,
    /// pulse repetition frequency
    pub prf: Option<f64>,
    /// (x,y) centers of the elements of a matrix array
    pub elements: Option<Vec<[f64; 2]>>,
}
impl Default for Param {
    fn default() -> Self {
        Self {
            fc: 0f64,
            pitch: 0f64,
            width: None,
            kerf: None,
            n_elements: 0,
            radius: f64::INFINITY,
            height: None,
            focus: f64::INFINITY,
            bandwidth: 75f64,
            baffle: Baffle::Soft,
            c: 1540f64,
            attenuation: 0f64,
            fs: None,
            t0: 0f64,
            tx_now: 1f64,
            tx_delay: None,
            tx_apodization: None,
            rx_apodization: None,
            fnumber: None,
            prf: None,
            elements: None,
        }
    }
}

/// Returns the parameters of a commercial probe
pub fn getparam(probe: Probe) -> Param {
    Param::from(probe)
}

impl From<Probe> for Param {
    fn from(probe: Probe) -> Self {
        use Probe::*;
        // (fc, kerf, width, pitch, n_elements, bandwidth, radius, height, focus)
        let (fc, kerf, width, pitch, n_elements, bandwidth, radius, height, focus) = match probe {
            L11_5v => (7.6e6, 30e-6, 270e-6, 300e-6, 128, 77., f64::INFINITY, 5e-3, 18e-3),
            L12_3v => (7.54e6, 30e-6, 170e-6, 200e-6, 192, 93., f64::INFINITY, 5e-3, 20e-3),
            L22_14v => (18.5e6, 22e-6, 78e-6, 100e-6, 128, 40., f64::INFINITY, 1.5e-3, 8e-3),
            C5_2v => (3.57e6, 48e-6, 460e-6, 508e-6, 128, 79., 49.57e-3, 13.5e-3, 60e-3),
            P4_2v => (2.72e6, 50e-6, 250e-6, 300e-6, 64, 74., f64::INFINITY, 14e-3, 60e-3),
            P6_3 => (4.5e6, 40e-6, 178e-6, 218e-6, 128, 65., f64::INFINITY, 5e-3, 40e-3),
            PA4_2 => (2.5e6, 50e-6, 250e-6, 300e-6, 64, 60., f64::INFINITY, 14e-3, 70e-3),
            L14_5 => (7.2e6, 25e-6, 279.8e-6, 304.8e-6, 128, 70., f64::INFINITY, 4e-3, 16e-3),
            LA530 => (3e6, 30e-6, 215e-6, 245e-6, 192, 65., f64::INFINITY, 6e-3, 20e-3),
            L7_4 => (5.2e6, 48e-6, 250e-6, 298e-6, 128, 65., f64::INFINITY, 7e-3, 25e-3),
            P4_1 => (2.5e6, 50e-6, 245e-6, 295e-6, 96, 80., f64::INFINITY, 16e-3, 80e-3),
        };
        Self {
            fc,
            pitch,
            width: Some(width),
            kerf: Some(kerf),
            n_elements,
            radius,
            height: Some(height),
            focus,
            bandwidth,
            ..Default::default()
        }
    }
}

/// Positions and orientations of the element centers of a linear or convex array
#[derive(Debug, Clone, Default)]
pub struct ElementPositions {
    pub x: Vec<f64>,
    pub z: Vec<f64>,
    /// angle between the element normal and the z-axis
    pub theta: Vec<f64>,
    /// sagitta of the convex array
    pub h: f64,
}

impl Param {
    /// Creates a plaid matrix array of `n_x` by `n_y` elements centered at the origin
    pub fn matrix(fc: f64, pitch: f64, n_x: usize, n_y: usize) -> Self {
        let offset = |k: usize, n: usize| (k as f64 - (n as f64 - 1f64) / 2f64) * pitch;
        let elements: Vec<[f64; 2]> = (0..n_y)
            .flat_map(|j| (0..n_x).map(move |i| [offset(i, n_x), offset(j, n_y)]))
            .collect();
        Self {
            fc,
            pitch,
            n_elements: elements.len(),
            width: Some(pitch),
            kerf: Some(0f64),
            height: Some(pitch),
            elements: Some(elements),
            ..Default::default()
        }
    }
    /// Sets the transmit delays
    pub fn tx_delay(mut self, delays: Vec<f64>) -> Self {
        self.tx_delay = Some(delays);
        self
    }
    /// Sets the sampling frequency
    pub fn fs(mut self, fs: f64) -> Self {
        self.fs = Some(fs);
        self
    }
    /// Returns true for a matrix array
    pub fn is_matrix(&self) -> bool {
        self.elements.is_some()
    }
    /// Returns true for a convex array
    pub fn is_convex(&self) -> bool {
        self.radius.is_finite()
    }
    /// Number of transducer elements
    pub fn len(&self) -> usize {
        self.elements
            .as_ref()
            .map_or(self.n_elements, |elements| elements.len())
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Wavelength at the center frequency
    pub fn wavelength(&self) -> f64 {
        self.c / self.fc
    }
    /// Minimum wavelength at -6dB
    pub fn min_wavelength(&self) -> f64 {
        self.c / (self.fc * (1f64 + self.bandwidth / 200f64))
    }
    /// Element width, derived from the kerf if needed
    pub fn element_width(&self) -> f64 {
        match (self.width, self.kerf) {
            (Some(width), _) => width,
            (None, Some(kerf)) => self.pitch - kerf,
            (None, None) => self.pitch,
        }
    }
    /// Sampling frequency, 4 times the center frequency by default
    pub fn sampling_frequency(&self) -> f64 {
        self.fs.unwrap_or(4f64 * self.fc)
    }
    /// Validates the parameters and returns a copy with the defaults filled in
    pub fn checked(&self) -> Result<Self> {
        let mut param = self.clone();
        if !(param.fc > 0f64) {
            return Err(ParamError::CenterFrequency);
        }
        if !(param.bandwidth > 0f64 && param.bandwidth < 200f64) {
            return Err(ParamError::Bandwidth(param.bandwidth));
        }
        if !(param.c > 0f64) {
            return Err(ParamError::SoundSpeed);
        }
        if !(param.attenuation >= 0f64) {
            return Err(ParamError::Attenuation);
        }
        if !(param.tx_now > 0f64) {
            return Err(ParamError::Cycles);
        }
        if let Some(fs) = param.fs {
            if !(fs > 0f64) {
                return Err(ParamError::SamplingFrequency);
            }
        }
        if let Some(fnumber) = param.fnumber {
            if !(fnumber >= 0f64) {
                return Err(ParamError::FNumber);
            }
        }
        if let Baffle::Impedance(ratio) = param.baffle {
            if !(ratio > 0f64) {
                return Err(ParamError::Baffle);
            }
        }
        if let Some(height) = param.height {
            if !(height > 0f64) {
                return Err(ParamError::Height);
            }
        }
        if !(param.focus > 0f64) {
            return Err(ParamError::ElevationFocus);
        }
        if let Some(elements) = &param.elements {
            param.n_elements = elements.len();
        } else {
            if !(param.pitch > 0f64) {
                return Err(ParamError::Pitch);
            }
            if !(param.radius > 0f64) {
                return Err(ParamError::Radius);
            }
        }
        if param.n_elements == 0 {
            return Err(ParamError::NumberOfElements);
        }
        if let Some(width) = param.width {
            if !(width > 0f64 && width <= param.pitch) {
                return Err(ParamError::Width(width));
            }
        }
        if let Some(kerf) = param.kerf {
            if !(kerf >= 0f64 && kerf < param.pitch) {
                return Err(ParamError::Kerf(kerf));
            }
        }
        match (param.width, param.kerf) {
            (Some(width), Some(kerf)) => {
                if (width + kerf - param.pitch).abs() > 1e-3 * param.pitch {
                    return Err(ParamError::Geometry {
                        pitch: param.pitch,
                        width,
                        kerf,
                    });
                }
            }
            (Some(width), None) => param.kerf = Some(param.pitch - width),
            (None, Some(kerf)) => param.width = Some(param.pitch - kerf),
            (None, None) => {
                param.width = Some(param.pitch);
                param.kerf = Some(0f64);
            }
        }
        let n = param.n_elements;
        for (name, values) in [
            ("tx_delay", &param.tx_delay),
            ("tx_apodization", &param.tx_apodization),
            ("rx_apodization", &param.rx_apodization),
        ] {
            if let Some(values) = values {
                if values.len() != n {
                    return Err(ParamError::PerElement(name, n));
                }
            }
        }
        if param.tx_apodization.is_none() {
            param.tx_apodization = Some(vec![1f64; n]);
        }
        if param.rx_apodization.is_none() {
            param.rx_apodization = Some(vec![1f64; n]);
        }
        if param.fs.is_none() {
            param.fs = Some(4f64 * param.fc);
        }
        Ok(param)
    }
    /// Positions of the element centers of a linear or convex array
    ///
    /// For a convex array, the elements lie on a circle of center `(0,-radius)`
    /// so that the center of the array is at the origin and `z<=0`.
    pub fn element_positions(&self) -> ElementPositions {
        let n = self.n_elements;
        let index = |k: usize| k as f64 - (n as f64 - 1f64) / 2f64;
        if self.radius.is_finite() {
            let r = self.radius;
            let dtheta = 2f64 * (self.pitch / 2f64 / r).asin();
            let theta: Vec<f64> = (0..n).map(|k| index(k) * dtheta).collect();
            let x = theta.iter().map(|t| r * t.sin()).collect();
            let z = theta.iter().map(|t| r * t.cos() - r).collect();
            let theta_max = theta.last().copied().unwrap_or_default();
            ElementPositions {
                x,
                z,
                h: r * (1f64 - theta_max.cos()),
                theta,
            }
        } else {
            ElementPositions {
                x: (0..n).map(|k| index(k) * self.pitch).collect(),
                z: vec![0f64; n],
                theta: vec![0f64; n],
                h: 0f64,
            }
        }
    }
    /// Angular aperture of a convex array (0 for a linear array)
    pub fn angular_aperture(&self) -> f64 {
        if self.radius.is_finite() {
            let dtheta = 2f64 * (self.pitch / 2f64 / self.radius).asin();
            dtheta * (self.n_elements as f64 - 1f64)
        } else {
            0f64
        }
    }
    /// Attenuation coefficient in Np/m/Hz
    pub fn attenuation_np(&self) -> f64 {
        self.attenuation / (20f64 * std::f64::consts::LOG10_E) * 1e2 / 1e6
    }
    /// Receive f-number, from the element directivity if it is not set
    ///
    /// The directivity of the element at the center frequency is `sinc(k w/2 sin(t)) cos(t)`
    /// and the f-number is `1/2/tan(t)` where the directivity drops to `1/sqrt(2)`
    pub fn rx_fnumber(&self) -> f64 {
        if let Some(fnumber) = self.fnumber {
            return fnumber;
        }
        let k = 2f64 * PI * self.fc / self.c;
        let w = self.element_width();
        let directivity = |t: f64| {
            let u = k * w / 2f64 * t.sin();
            let sinc = if u.abs() < 1e-12 { 1f64 } else { u.sin() / u };
            (sinc * self.baffle.obliquity(t.cos())).abs()
        };
        let target = std::f64::consts::FRAC_1_SQRT_2;
        let (mut lo, mut hi) = (0f64, PI / 2f64);
        for _ in 0..60 {
            let mid = 0.5 * (lo + hi);
            if directivity(mid) > target {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        1f64 / 2f64 / lo.tan()
    }
    /// Saves the parameters to a pickle file
    pub fn to_pickle<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        pickle::to_writer(&mut file, self, Default::default())?;
        Ok(())
    }
    /// Loads the parameters from a pickle file
    pub fn from_pickle<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        Ok(pickle::from_reader(&mut file, Default::default())?)
    }
}
