//! Coherent plane-wave compounding
//!
//! A speckle phantom with an anechoic cyst is insonified by plane waves of several tilts;
//! the beamformed I/Q images of all the transmits are summed before log compression.

use std::path::PathBuf;

use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use must_toolbox::{
    bmode, dasmtx, default_probe, genscat, getparam, io, linspace, rf2iq, simus, txdelay,
    Grid, Interpolation, MeanDist, Probe, Roi, SignalKind, SimusOptions, Transmit,
};
use nalgebra::DMatrix;
use num_complex::Complex64;
use rand::{rngs::StdRng, SeedableRng};
use rayon::prelude::*;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "compound", about = "Coherent plane-wave compounding")]
struct Opt {
    /// Probe name, defaults to $MUST_PROBE or L11-5v
    #[structopt(short, long)]
    probe: Option<Probe>,
    /// Number of plane waves
    #[structopt(short, long, default_value = "7")]
    n_tilt: usize,
    /// Largest tilt [deg]
    #[structopt(long, default_value = "10")]
    max_tilt: f64,
    /// Depth of the phantom [mm]
    #[structopt(long, default_value = "30")]
    depth: f64,
    /// Radius of the cyst [mm]
    #[structopt(long, default_value = "4")]
    cyst: f64,
    /// Dynamic range [dB]
    #[structopt(long, default_value = "40")]
    dynamic_range: f64,
    /// Seed of the scatterer generator
    #[structopt(long, default_value = "0")]
    seed: u64,
    /// Output file
    #[structopt(short, long, default_value = "compound.npy")]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let probe = opt.probe.map_or_else(default_probe, Ok)?;
    let param = getparam(probe).checked()?;
    let half_width = param.pitch * (param.n_elements as f64 - 1f64) / 2f64;
    let depth = opt.depth * 1e-3;

    let mut rng = StdRng::seed_from_u64(opt.seed);
    let roi = Roi::Plane {
        width: 2f64 * half_width,
        height: depth,
    };
    let mut scatterers = genscat(roi, MeanDist::FromParam(&param), None, None, &mut rng)?;
    let (radius, zc) = (opt.cyst * 1e-3, depth / 2f64);
    scatterers.retain(|x, _, z| x.hypot(z - zc) > radius);
    println!("{}: {} scatterers", probe, scatterers.len());

    let tilts: Vec<f64> = (0..opt.n_tilt)
        .map(|i| {
            if opt.n_tilt > 1 {
                -opt.max_tilt + 2f64 * opt.max_tilt * i as f64 / (opt.n_tilt - 1) as f64
            } else {
                0f64
            }
        })
        .map(f64::to_radians)
        .collect();

    let (nx, nz) = (256, 256);
    let x = linspace(-half_width, half_width, nx);
    let z = linspace(depth / nz as f64, depth, nz);
    let grid = Grid::cartesian(&x, &z);
    let points = grid.points();

    let pb = ProgressBar::new(tilts.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("#>-"),
    );
    let images = tilts
        .par_iter()
        .progress_with(pb)
        .map(|&tilt| -> anyhow::Result<Vec<Complex64>> {
            let delays = txdelay(&param, Transmit::Plane { tilt })?;
            let param = param.clone().tx_delay(delays);
            let options = SimusOptions {
                parallel: false,
                ..Default::default()
            };
            let rf = simus(&scatterers, &param, &options)?;
            let iq = rf2iq(&rf.data, rf.fs, Some(param.fc), rf.t0)?;
            let das = dasmtx(SignalKind::Iq, iq.shape(), &points, &param, Interpolation::Linear)?;
            Ok(das.apply_iq(&iq)?)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let compound = images
        .into_iter()
        .map(|image| DMatrix::from_vec(nz, nx, image))
        .fold(DMatrix::<Complex64>::zeros(nz, nx), |acc, image| acc + image);
    let image = bmode(&compound, opt.dynamic_range)?;
    io::save_matrix(&opt.output, &image)?;
    println!(
        "{} plane waves compounded into {:?}",
        tilts.len(),
        opt.output
    );

    #[cfg(feature = "plot")]
    {
        use must_toolbox::plot::{Colormap, Heatmap};
        Heatmap {
            image: &image.map(f64::from),
            x: (x[0] * 1e3, x[nx - 1] * 1e3),
            z: (z[0] * 1e3, z[nz - 1] * 1e3),
            caption: &format!("{} compound B-mode ({} plane waves)", probe, tilts.len()),
            colormap: Colormap::Gray,
        }
        .save(opt.output.with_extension("png"))?;
    }
    Ok(())
}
