//! RF signals of a speckle phantom insonified by a plane wave
//!
//! The RF signals are saved to `rf.npy` and the transducer parameters, including the
//! transmit delays and the sampling frequency, to `param.pkl`.

use std::{fs, path::PathBuf};

use must_toolbox::{
    default_probe, genscat, getparam, io, simus, txdelay, MeanDist, Probe, Roi, SimusOptions,
    Transmit,
};
use rand::{rngs::StdRng, SeedableRng};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "simus", about = "Ultrasound RF signals simulation")]
struct Opt {
    /// Probe name, defaults to $MUST_PROBE or L11-5v
    #[structopt(short, long)]
    probe: Option<Probe>,
    /// Plane wave tilt [deg]
    #[structopt(long, default_value = "0", allow_hyphen_values = true)]
    tilt: f64,
    /// Width of the phantom [mm]
    #[structopt(long, default_value = "20")]
    width: f64,
    /// Depth of the phantom [mm]
    #[structopt(long, default_value = "30")]
    depth: f64,
    /// Radius of an anechoic cyst at the center of the phantom [mm]
    #[structopt(long)]
    cyst: Option<f64>,
    /// Seed of the scatterer generator
    #[structopt(long, default_value = "0")]
    seed: u64,
    /// Saves the scatterers to `scatterers.csv`
    #[structopt(long)]
    scatterers: bool,
    /// Output directory
    #[structopt(short, long, default_value = ".")]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let probe = opt.probe.map_or_else(default_probe, Ok)?;
    let param = getparam(probe);
    let delays = txdelay(
        &param,
        Transmit::Plane {
            tilt: opt.tilt.to_radians(),
        },
    )?;
    let param = param.tx_delay(delays).checked()?;

    let mut rng = StdRng::seed_from_u64(opt.seed);
    let roi = Roi::Plane {
        width: opt.width * 1e-3,
        height: opt.depth * 1e-3,
    };
    let mut scatterers = genscat(roi, MeanDist::FromParam(&param), None, None, &mut rng)?;
    if let Some(radius) = opt.cyst {
        let (r, zc) = (radius * 1e-3, opt.depth * 0.5e-3);
        scatterers.retain(|x, _, z| x.hypot(z - zc) > r);
    }
    println!("{}: {} scatterers", probe, scatterers.len());

    let rf = simus(&scatterers, &param, &SimusOptions::default())?;
    println!(
        "{} RF samples x {} channels at {:.1}MHz",
        rf.n_samples(),
        rf.n_channels(),
        rf.fs * 1e-6
    );

    fs::create_dir_all(&opt.output)?;
    io::save_matrix(opt.output.join("rf.npy"), &rf.data)?;
    param.to_pickle(opt.output.join("param.pkl"))?;
    if opt.scatterers {
        scatterers.to_csv(opt.output.join("scatterers.csv"))?;
    }
    Ok(())
}
