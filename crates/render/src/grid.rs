//! Grid layout of analyzed images.
//!
//! Each grid row prints a label line (hyperlinked identifier and file name),
//! the previews side by side padded to equal height, then each image's
//! description wrapped to at most three lines.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::raster::Rasterizer;
use crate::text::{hyperlink, pad, truncate};

pub const MIN_CELL_WIDTH: usize = 30;
pub const MAX_CELL_WIDTH: usize = 80;
pub const COLUMN_GAP: usize = 2;
pub const MAX_COLUMNS: usize = 3;
pub const DESCRIPTION_LINES: usize = 3;

/// Column count and per-cell width for a terminal width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub columns: usize,
    pub cell_width: usize,
}

impl GridLayout {
    pub fn for_width(width: usize) -> Self {
        let columns = ((width + COLUMN_GAP) / (MIN_CELL_WIDTH + COLUMN_GAP)).clamp(1, MAX_COLUMNS);
        let gaps = COLUMN_GAP * (columns - 1);
        let cell_width = (width.saturating_sub(gaps) / columns).clamp(MIN_CELL_WIDTH, MAX_CELL_WIDTH);
        Self {
            columns,
            cell_width,
        }
    }
}

/// One image to display.
#[derive(Debug, Clone, PartialEq)]
pub struct GridEntry {
    pub id: String,
    pub url: String,
    pub file_name: String,
    /// Stored file; entries without one render as a label only
    pub path: Option<PathBuf>,
    pub description: String,
}

impl GridEntry {
    fn link_target(&self) -> String {
        match &self.path {
            Some(path) => file_url(path),
            None => self.url.clone(),
        }
    }
}

pub struct GridRenderer {
    rasterizer: Box<dyn Rasterizer>,
    layout: GridLayout,
}

impl GridRenderer {
    pub fn new(rasterizer: Box<dyn Rasterizer>, terminal_width: usize) -> Self {
        Self {
            rasterizer,
            layout: GridLayout::for_width(terminal_width),
        }
    }

    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    /// Write the grid for `entries` to `out`.
    pub fn render<W: Write>(&self, entries: &[GridEntry], out: &mut W) -> io::Result<()> {
        for row in entries.chunks(self.layout.columns) {
            self.render_row(row, out)?;
            writeln!(out)?;
        }
        out.flush()
    }

    fn render_row<W: Write>(&self, row: &[GridEntry], out: &mut W) -> io::Result<()> {
        let width = self.layout.cell_width;
        let gap = " ".repeat(COLUMN_GAP);

        let labels: Vec<String> = row.iter().map(|e| label(e, width)).collect();
        writeln!(out, "{}", join_cells(&labels, width, &gap))?;

        let previews: Vec<Vec<String>> = row.iter().map(|e| self.preview(e)).collect();
        let height = previews.iter().map(Vec::len).max().unwrap_or(0);
        for line in 0..height {
            let cells: Vec<String> = previews
                .iter()
                .map(|p| p.get(line).cloned().unwrap_or_default())
                .collect();
            writeln!(out, "{}", join_cells(&cells, width, &gap))?;
        }

        let descriptions: Vec<Vec<String>> = row
            .iter()
            .map(|e| wrap_description(&e.description, width))
            .collect();
        let height = descriptions.iter().map(Vec::len).max().unwrap_or(0);
        for line in 0..height {
            let cells: Vec<String> = descriptions
                .iter()
                .map(|d| d.get(line).cloned().unwrap_or_default())
                .collect();
            writeln!(out, "{}", join_cells(&cells, width, &gap).trim_end())?;
        }

        Ok(())
    }

    fn preview(&self, entry: &GridEntry) -> Vec<String> {
        let Some(path) = entry.path.as_deref() else {
            return Vec::new();
        };
        match self.rasterizer.rasterize(path, self.layout.cell_width) {
            Ok(rows) => rows.collect(),
            Err(e) => {
                debug!(id = %entry.id, error = %e, "Preview unavailable; showing label only");
                Vec::new()
            }
        }
    }
}

fn label(entry: &GridEntry, width: usize) -> String {
    let id_width = unicode_width::UnicodeWidthStr::width(entry.id.as_str());
    let name = truncate(&entry.file_name, width.saturating_sub(id_width + 1));
    format!("{} {name}", hyperlink(&entry.link_target(), &entry.id))
}

fn join_cells(cells: &[String], width: usize, gap: &str) -> String {
    cells
        .iter()
        .map(|c| pad(c, width))
        .collect::<Vec<_>>()
        .join(gap)
}

/// Word-wrap to the cell width, keeping at most [`DESCRIPTION_LINES`] lines.
fn wrap_description(text: &str, width: usize) -> Vec<String> {
    let mut lines: Vec<String> = textwrap::wrap(text.trim(), width)
        .into_iter()
        .map(|l| l.into_owned())
        .collect();

    if lines.len() > DESCRIPTION_LINES {
        lines.truncate(DESCRIPTION_LINES);
        if let Some(last) = lines.last_mut() {
            let kept = truncate(last, width.saturating_sub(1));
            *last = format!("{}…", kept.trim_end_matches('…').trim_end());
        }
    }
    lines
}

fn file_url(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", absolute.display())
}
