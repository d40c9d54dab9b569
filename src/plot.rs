//! PNG heat maps of pressure fields and B-mode images

use std::path::Path;

use nalgebra::DMatrix;
use plotters::prelude::*;

#[derive(Debug, thiserror::Error)]
pub enum PlotError {
    #[error("Failed to draw {0}")]
    Drawing(String),
    #[error("The image is empty")]
    Empty,
}
type Result<T> = std::result::Result<T, PlotError>;

fn drawing<E: std::fmt::Display>(e: E) -> PlotError {
    PlotError::Drawing(e.to_string())
}

#[derive(Debug, Clone, Copy, Default)]
pub enum Colormap {
    /// B-mode gray levels
    #[default]
    Gray,
    Inferno,
}
impl Colormap {
    fn rgb(&self, u: f64) -> RGBColor {
        let u = u.clamp(0f64, 1f64);
        match self {
            Colormap::Gray => {
                let v = (255f64 * u).round() as u8;
                RGBColor(v, v, v)
            }
            Colormap::Inferno => {
                let c = colorous::INFERNO.eval_continuous(u);
                RGBColor(c.r, c.g, c.b)
            }
        }
    }
}

/// Heat map of an image whose rows span the depth range `z` and columns the lateral range `x` [mm]
pub struct Heatmap<'a> {
    pub image: &'a DMatrix<f64>,
    pub x: (f64, f64),
    pub z: (f64, f64),
    pub caption: &'a str,
    pub colormap: Colormap,
}
impl Heatmap<'_> {
    /// Writes the heat map to a PNG file, the depth axis pointing down
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let (nz, nx) = self.image.shape();
        if nz == 0 || nx == 0 {
            return Err(PlotError::Empty);
        }
        let (min, max) = (self.image.min(), self.image.max());
        let range = if max > min { max - min } else { 1f64 };
        let (x0, x1) = self.x;
        let (z0, z1) = self.z;
        let dx = if nx > 1 { (x1 - x0) / (nx - 1) as f64 } else { 1f64 };
        let dz = if nz > 1 { (z1 - z0) / (nz - 1) as f64 } else { 1f64 };

        let width = 768u32;
        let height = ((width as f64) * (z1 - z0 + dz) / (x1 - x0 + dx)).clamp(256f64, 2048f64) as u32;
        let root = BitMapBackend::new(path.as_ref(), (width, height)).into_drawing_area();
        root.fill(&WHITE).map_err(drawing)?;
        let mut chart = ChartBuilder::on(&root)
            .caption(self.caption, ("sans-serif", 20))
            .set_label_area_size(LabelAreaPosition::Left, 60)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .margin(10)
            .build_cartesian_2d(
                x0 - dx / 2f64..x1 + dx / 2f64,
                z1 + dz / 2f64..z0 - dz / 2f64,
            )
            .map_err(drawing)?;
        chart
            .configure_mesh()
            .disable_mesh()
            .x_desc("x [mm]")
            .y_desc("z [mm]")
            .draw()
            .map_err(drawing)?;
        chart
            .draw_series((0..nx).flat_map(|j| {
                (0..nz).map(move |i| {
                    let (x, z) = (x0 + j as f64 * dx, z0 + i as f64 * dz);
                    let u = (self.image[(i, j)] - min) / range;
                    Rectangle::new(
                        [
                            (x - dx / 2f64, z - dz / 2f64),
                            (x + dx / 2f64, z + dz / 2f64),
                        ],
                        self.colormap.rgb(u).filled(),
                    )
                })
            }))
            .map_err(drawing)?;
        root.present().map_err(drawing)?;
        log::info!("heat map saved to {:?}", path.as_ref());
        Ok(())
    }
}
