//! Output formatting
//!
//! Human-readable and JSON rendering of command results, plus the progress
//! display used by transfer commands.

mod formatter;
mod progress;

pub use formatter::{Formatter, SummaryOutput};
pub use progress::ProgressBar;

use stow_core::{TransferEvent, TransferSummary};

/// Output configuration derived from CLI flags
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Use JSON output format
    pub json: bool,
    /// Disable colored output
    pub no_color: bool,
    /// Disable progress bar
    pub no_progress: bool,
    /// Suppress non-error output
    pub quiet: bool,
}

/// Renders the event stream of one transfer or removal run
pub struct Reporter {
    formatter: Formatter,
    progress: ProgressBar,
    dry_run: bool,
}

impl Reporter {
    pub fn new(config: OutputConfig, message: &str, dry_run: bool) -> Self {
        // dry runs print every planned item, a spinner would only get in the way
        let progress = if dry_run {
            ProgressBar::hidden()
        } else {
            ProgressBar::spinner(config, message)
        };
        Self {
            formatter: Formatter::new(config),
            progress,
            dry_run,
        }
    }

    pub fn formatter(&self) -> &Formatter {
        &self.formatter
    }

    pub fn event(&self, event: &TransferEvent) {
        match event {
            TransferEvent::Copied { size, .. } => self.progress.record(*size),
            TransferEvent::Removed { .. } => self.progress.record(0),
            _ => {}
        }
        if self.formatter.is_json() {
            self.formatter.json_line(event);
            return;
        }
        if let Some(line) = self.formatter.describe(event, self.progress.is_visible()) {
            if event.is_failure() {
                self.progress.suspend(|| self.formatter.error(&line));
            } else {
                self.progress.println(&line);
            }
        }
    }

    pub fn finish(&self, summary: &TransferSummary) {
        self.progress.finish_and_clear();
        self.formatter.summary(summary, self.dry_run);
    }
}
