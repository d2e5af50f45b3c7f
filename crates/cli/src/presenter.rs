//! Terminal presentation of agent events.

use std::io::Write;

use crossterm::style::Stylize;
use glimpse_agent::{AgentStreamEvent, Presenter};
use glimpse_render::{GridEntry, GridRenderer, HalfBlockRasterizer, hyperlink};
use glimpse_tools::{Citation, ImageAnalysis};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, warn};

/// Writes the transcript: streamed text, tool notices, image grids and
/// references.
pub struct TerminalPresenter<W: Write + Send> {
    out: W,
    width: usize,
    /// Whether the cursor sits at the start of a line
    line_start: bool,
}

impl<W: Write + Send> TerminalPresenter<W> {
    pub fn new(out: W, width: usize) -> Self {
        Self {
            out,
            width,
            line_start: true,
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn end_line(&mut self) -> std::io::Result<()> {
        if !self.line_start {
            writeln!(self.out)?;
            self.line_start = true;
        }
        Ok(())
    }

    fn write_event(&mut self, event: &AgentStreamEvent) -> std::io::Result<()> {
        match event {
            AgentStreamEvent::Chunk { content } => {
                write!(self.out, "{content}")?;
                self.line_start = content.ends_with('\n');
                self.out.flush()
            }
            AgentStreamEvent::ToolCall { name, input, .. } => {
                self.end_line()?;
                let notice = format!("  ⚙ {name} {}", summarize(input));
                writeln!(self.out, "{}", notice.dark_grey())
            }
            AgentStreamEvent::ToolResult {
                name,
                output,
                success: false,
                ..
            } => {
                let first = output.lines().next().unwrap_or_default();
                writeln!(self.out, "{}", format!("  ✗ {name}: {first}").red())
            }
            AgentStreamEvent::ToolResult { .. } => Ok(()),
            AgentStreamEvent::Images { analyses } => {
                self.end_line()?;
                writeln!(self.out)?;
                let entries = grid_entries(analyses);
                let width = self.width;
                // Decoding and scaling every preview is CPU-bound
                let grid = off_scheduler(move || {
                    let mut grid = Vec::new();
                    GridRenderer::new(Box::new(HalfBlockRasterizer), width)
                        .render(&entries, &mut grid)
                        .map(|()| grid)
                })?;
                self.out.write_all(&grid)?;
                self.out.flush()
            }
            AgentStreamEvent::References { citations } => {
                self.end_line()?;
                writeln!(self.out)?;
                writeln!(self.out, "{}", "References".bold())?;
                for line in reference_lines(citations) {
                    writeln!(self.out, "{line}")?;
                }
                Ok(())
            }
            AgentStreamEvent::Done {
                usage,
                steps,
                tool_calls_made,
                budget_exhausted,
            } => {
                self.end_line()?;
                if *budget_exhausted {
                    writeln!(
                        self.out,
                        "{}",
                        format!("  (stopped after {steps} steps; the answer may be incomplete)")
                            .dark_yellow()
                    )?;
                }
                writeln!(self.out)?;
                debug!(steps, tool_calls_made, ?usage, "Turn complete");
                self.out.flush()
            }
            AgentStreamEvent::Error { message } => {
                self.end_line()?;
                writeln!(self.out, "{}", format!("  [Error] {message}").red())
            }
        }
    }
}

impl<W: Write + Send> Presenter for TerminalPresenter<W> {
    fn on_event(&mut self, event: &AgentStreamEvent) {
        if let Err(e) = self.write_event(event) {
            warn!(event = event.event_type(), error = %e, "Failed to write to terminal");
        }
    }
}

/// Run `work` where it cannot stall other tasks: in place of the current
/// worker on a multi-threaded runtime, inline anywhere else.
fn off_scheduler<T>(work: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

pub fn grid_entries(analyses: &[ImageAnalysis]) -> Vec<GridEntry> {
    analyses
        .iter()
        .map(|a| GridEntry {
            id: a.id.clone(),
            url: a.url.clone(),
            file_name: a.file_name(),
            path: a.storage_path.clone(),
            description: a.description.text().to_string(),
        })
        .collect()
}

fn reference_lines(citations: &[Citation]) -> Vec<String> {
    citations
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let title = if c.title.trim().is_empty() { &c.url } else { &c.title };
            format!("  [{}] {}  {}", i + 1, hyperlink(&c.url, title), c.url.as_str().dark_grey())
        })
        .collect()
}

/// One-line view of tool arguments.
fn summarize(input: &serde_json::Value) -> String {
    if let Some(query) = input["query"].as_str() {
        return format!("\"{query}\"");
    }
    if let Some(urls) = input["urls"].as_array() {
        return format!("({} image(s))", urls.len());
    }
    String::new()
}
