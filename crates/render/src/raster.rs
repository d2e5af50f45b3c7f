//! Raster-to-terminal conversion.

use std::path::Path;

use crossterm::style::{Color, ResetColor, SetBackgroundColor, SetForegroundColor};
use image::imageops::FilterType;

/// Printable rows of a rasterized image, produced lazily.
pub type Rows = Box<dyn Iterator<Item = String> + Send>;

#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("cannot decode {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("target width must be positive")]
    ZeroWidth,
}

/// Turns an image file into printable rows no wider than `width` columns.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, path: &Path, width: usize) -> Result<Rows, RasterError>;
}

/// Truecolor upper-half-block rendering: each cell shows two vertically
/// stacked pixels, foreground on top and background below.
///
/// Height is capped at `width / 2` rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct HalfBlockRasterizer;

impl Rasterizer for HalfBlockRasterizer {
    fn rasterize(&self, path: &Path, width: usize) -> Result<Rows, RasterError> {
        if width == 0 {
            return Err(RasterError::ZeroWidth);
        }

        let img = image::open(path).map_err(|e| RasterError::Decode {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        // Pixel height of `width` fills at most width / 2 text rows
        let max = width as u32;
        let rgb = img.resize(max, max, FilterType::Triangle).to_rgb8();
        let (w, h) = rgb.dimensions();

        let rows = (0..h).step_by(2).map(move |y| {
            let mut line = String::with_capacity(w as usize * 40);
            for x in 0..w {
                let top = rgb.get_pixel(x, y);
                line.push_str(&SetForegroundColor(rgb_color(top.0)).to_string());
                if y + 1 < h {
                    let bottom = rgb.get_pixel(x, y + 1);
                    line.push_str(&SetBackgroundColor(rgb_color(bottom.0)).to_string());
                } else {
                    line.push_str(&SetBackgroundColor(Color::Reset).to_string());
                }
                line.push('▀');
            }
            line.push_str(&ResetColor.to_string());
            line
        });

        Ok(Box::new(rows))
    }
}

fn rgb_color([r, g, b]: [u8; 3]) -> Color {
    Color::Rgb { r, g, b }
}
