//! B-mode image from RF signals
//!
//! Reads the RF signals and the transducer parameters written by `simus`,
//! demodulates and beamforms the signals and saves the log-compressed image.

use std::path::PathBuf;

use must_toolbox::{
    bmode, dasmtx, impolgrid, io, rf2iq, tgc, Grid, Interpolation, Param, SignalKind,
};
use nalgebra::DMatrix;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "bmode", about = "B-mode image reconstruction")]
struct Opt {
    /// RF signals
    #[structopt(long, default_value = "rf.npy")]
    rf: PathBuf,
    /// Transducer parameters with the transmit delays
    #[structopt(long, default_value = "param.pkl")]
    param: PathBuf,
    /// Time-gain compensation
    #[structopt(long)]
    tgc: bool,
    /// Dynamic range [dB]
    #[structopt(long, default_value = "40")]
    dynamic_range: f64,
    /// Depth of the image [mm]
    #[structopt(long, default_value = "30")]
    depth: f64,
    /// Grid size (nx,nz)
    #[structopt(long, number_of_values = 2, use_delimiter = true, default_value = "256,256")]
    grid: Vec<usize>,
    /// Interpolation: nearest, linear, quadratic or lanczos3
    #[structopt(long, default_value = "linear")]
    method: Interpolation,
    /// Output file
    #[structopt(short, long, default_value = "bmode.npy")]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let param = Param::from_pickle(&opt.param)?.checked()?;
    let rf: DMatrix<f64> = io::load_matrix(&opt.rf)?;
    let rf = if opt.tgc { tgc(&rf)?.0 } else { rf };
    let fs = param.sampling_frequency();
    let iq = rf2iq(&rf, fs, Some(param.fc), param.t0)?;

    let (nx, nz) = (opt.grid[0], opt.grid[1]);
    let depth = opt.depth * 1e-3;
    let grid = if param.is_convex() {
        impolgrid((nz, nx), depth, None, &param)?
    } else {
        let half_width = param.pitch * (param.n_elements as f64 - 1f64) / 2f64;
        Grid::regular(
            (-half_width, half_width),
            (depth / nz.max(1) as f64, depth),
            nx,
            nz,
        )?
    };
    let das = dasmtx(SignalKind::Iq, iq.shape(), &grid.points(), &param, opt.method)?;
    let (n_rows, n_cols) = grid.shape();
    let beamformed = DMatrix::from_vec(n_rows, n_cols, das.apply_iq(&iq)?);
    let image = bmode(&beamformed, opt.dynamic_range)?;
    io::save_matrix(&opt.output, &image)?;
    io::save_matrix(opt.output.with_file_name("x.npy"), &grid.x)?;
    io::save_matrix(opt.output.with_file_name("z.npy"), &grid.z)?;
    println!("{}x{} B-mode image saved to {:?}", n_rows, n_cols, opt.output);

    #[cfg(feature = "plot")]
    {
        use must_toolbox::plot::{Colormap, Heatmap};
        if param.is_convex() {
            log::warn!("B-mode images of convex arrays are not plotted");
        } else {
            let (x0, x1) = (grid.x.min() * 1e3, grid.x.max() * 1e3);
            let (z0, z1) = (grid.z.min() * 1e3, grid.z.max() * 1e3);
            Heatmap {
                image: &image.map(f64::from),
                x: (x0, x1),
                z: (z0, z1),
                caption: "B-mode",
                colormap: Colormap::Gray,
            }
            .save(opt.output.with_extension("png"))?;
        }
    }
    Ok(())
}
