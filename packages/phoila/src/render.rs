//! Where session entries end up.

use std::io::Write;

use tracing::warn;

use crate::error::SessionError;
use crate::outputs::{Output, OutputArea};
use crate::record::ContentEntry;
use crate::widgets::WidgetManager;

/// Receives a session's entries in stream order.
pub trait RenderSink: Send {
    fn render_entry(&mut self, entry: &ContentEntry);

    /// Called at most once, when the kernel handoff succeeds.
    fn bind_manager(&mut self, _manager: &WidgetManager) {}

    fn render_failure(&mut self, _error: &SessionError) {}
}

/// Plain-text rendering for terminals and logs.
pub struct TerminalRenderer<W> {
    out: W,
    kernel: Option<String>,
}

impl<W: Write + Send> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out, kernel: None }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_output(&mut self, output: &Output) -> std::io::Result<()> {
        if let Some(model_id) = output.widget_model_id() {
            return match &self.kernel {
                Some(kernel) => writeln!(self.out, "  [widget {model_id} @ kernel {kernel}]"),
                None => writeln!(self.out, "  [widget {model_id}]"),
            };
        }
        match output.plain_text() {
            Some(text) => {
                for line in text.lines() {
                    writeln!(self.out, "  {line}")?;
                }
                Ok(())
            }
            None => writeln!(self.out, "  [rich output]"),
        }
    }

    fn write_areas(&mut self, header: &str, areas: &[OutputArea]) -> std::io::Result<()> {
        writeln!(self.out, "{header}")?;
        for area in areas {
            for output in &area.outputs {
                self.write_output(output)?;
            }
        }
        self.out.flush()
    }

    fn write_note(&mut self, note: &str) -> std::io::Result<()> {
        writeln!(self.out, "{note}")?;
        self.out.flush()
    }

    /// Write a standalone set of output areas under `header`.
    pub fn render_outputs(&mut self, header: &str, areas: &[OutputArea]) {
        if let Err(e) = self.write_areas(header, areas) {
            warn!(header, error = %e, "failed to write outputs");
        }
    }
}

impl<W: Write + Send> RenderSink for TerminalRenderer<W> {
    fn render_entry(&mut self, entry: &ContentEntry) {
        if let Err(e) = self.write_areas(&format!("[{}]", entry.index), &entry.outputs) {
            warn!(index = entry.index, error = %e, "failed to write entry");
        }
    }

    fn bind_manager(&mut self, manager: &WidgetManager) {
        let kernel = manager.kernel();
        self.kernel = Some(kernel.id.clone());
        let note = format!("# connected to kernel {} ({})", kernel.id, kernel.name);
        if let Err(e) = self.write_note(&note) {
            warn!(kernel_id = %kernel.id, error = %e, "failed to write kernel binding");
        }
    }

    fn render_failure(&mut self, error: &SessionError) {
        if let Err(e) = self.write_note(&format!("# render stream failed: {error}")) {
            warn!(error = %e, "failed to write stream failure");
        }
    }
}
