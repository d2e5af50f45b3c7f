//! Terminal rendering for Glimpse: a column grid of image previews with
//! their descriptions, sized to the terminal.

pub mod grid;
pub mod raster;
pub mod text;

pub use grid::{GridEntry, GridLayout, GridRenderer};
pub use raster::{HalfBlockRasterizer, RasterError, Rasterizer, Rows};
pub use text::{hyperlink, pad, truncate, visible_width};

/// Columns used when the terminal size cannot be queried.
pub const DEFAULT_WIDTH: usize = 80;

/// Current terminal width in columns.
pub fn terminal_width() -> usize {
    crossterm::terminal::size()
        .map(|(cols, _)| cols as usize)
        .ok()
        .filter(|w| *w > 0)
        .unwrap_or(DEFAULT_WIDTH)
}
