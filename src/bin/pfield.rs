//! RMS pressure field of a probe in the x-z plane
//!
//! The field is saved in dB to a NumPy file (and to a PNG file with the `plot` feature)

use std::path::PathBuf;

use must_toolbox::{
    default_probe, getparam, io, linspace, pfield, txdelay, Grid, PfieldOptions, Probe,
    Transmit,
};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "pfield", about = "Ultrasound pressure field")]
struct Opt {
    /// Probe name, defaults to $MUST_PROBE or L11-5v
    #[structopt(short, long)]
    probe: Option<Probe>,
    /// Focus position x,z [mm]
    #[structopt(long, number_of_values = 2, use_delimiter = true)]
    focus: Option<Vec<f64>>,
    /// Plane wave tilt [deg] (ignored if the focus is set)
    #[structopt(long, default_value = "0")]
    tilt: f64,
    /// Lateral half-width of the field [mm]
    #[structopt(long, default_value = "20")]
    width: f64,
    /// Depth of the field [mm]
    #[structopt(long, default_value = "40")]
    depth: f64,
    /// Grid size (nx,nz)
    #[structopt(long, number_of_values = 2, use_delimiter = true, default_value = "101,101")]
    grid: Vec<usize>,
    /// Frequency components below this level [dB] are ignored
    #[structopt(long, default_value = "-60", allow_hyphen_values = true)]
    db_thresh: f64,
    /// Output file
    #[structopt(short, long, default_value = "pfield.npy")]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let probe = opt.probe.map_or_else(default_probe, Ok)?;
    let param = getparam(probe);
    let transmit = match opt.focus.as_deref() {
        Some([x0, z0]) => Transmit::Focused {
            x0: x0 * 1e-3,
            z0: z0 * 1e-3,
        },
        _ => Transmit::Plane {
            tilt: opt.tilt.to_radians(),
        },
    };
    let delays = txdelay(&param, transmit)?;
    println!("{}: {:?}", probe, transmit);

    let (nx, nz) = (opt.grid[0], opt.grid[1]);
    let (width, depth) = (opt.width * 1e-3, opt.depth * 1e-3);
    let grid = Grid::regular((-width, width), (depth / nz.max(1) as f64, depth), nx, nz)?;
    let x = linspace(-width, width, nx);
    let z = linspace(depth / nz as f64, depth, nz);
    let options = PfieldOptions {
        db_thresh: opt.db_thresh,
        ..Default::default()
    };
    let field = pfield(&grid.points(), &delays, &param, &options)?;

    let db = nalgebra::DMatrix::from_vec(nz, nx, field.db());
    io::save_matrix(&opt.output, &db)?;
    io::save_vec(opt.output.with_file_name("x.npy"), &x)?;
    io::save_vec(opt.output.with_file_name("z.npy"), &z)?;
    println!("RMS pressure field [dB] saved to {:?}", opt.output);

    #[cfg(feature = "plot")]
    {
        use must_toolbox::plot::{Colormap, Heatmap};
        let path = opt.output.with_extension("png");
        Heatmap {
            image: &db.map(|v| v.max(-40f64)),
            x: (-opt.width, opt.width),
            z: (z[0] * 1e3, opt.depth),
            caption: &format!("{} RMS pressure field [dB]", probe),
            colormap: Colormap::Inferno,
        }
        .save(&path)?;
    }
    Ok(())
}
