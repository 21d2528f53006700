//! Render surfaces consuming controller state

use std::io::Write;

use crate::controller::SyncState;
use crate::error::Result;

/// Consumer of state snapshots
pub trait RenderSurface: Send {
    fn render(&mut self, state: &SyncState) -> Result<()>;
}

/// Line-oriented renderer for a terminal or any other writer.
///
/// Each record prints a `Status:` and a `Name from API:` line; absent
/// fields print as empty values.
#[derive(Debug)]
pub struct TerminalRenderer<W: Write> {
    out: W,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl TerminalRenderer<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> RenderSurface for TerminalRenderer<W> {
    fn render(&mut self, state: &SyncState) -> Result<()> {
        writeln!(self.out, "---")?;
        for record in &state.deployments {
            writeln!(
                self.out,
                "Status: {}",
                record.status.as_deref().unwrap_or_default()
            )?;
            writeln!(
                self.out,
                "Name from API: {}",
                record.name.as_deref().unwrap_or_default()
            )?;
        }
        writeln!(self.out, "Pending name: {}", state.pending_name)?;
        self.out.flush()?;
        Ok(())
    }
}
