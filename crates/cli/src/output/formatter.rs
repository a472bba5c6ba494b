//! Human-readable and JSON output
//!
//! In JSON mode every result is strict JSON on stdout, without colors or
//! progress. Streams (transfer events) are written one compact object per line.

use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{ContentArrangement, Table};
use console::style;
use humansize::{BINARY, format_size};
use serde::Serialize;
use stow_core::{TransferEvent, TransferSummary};

use super::OutputConfig;

/// Final line of a transfer run in JSON mode
#[derive(Debug, Serialize)]
pub struct SummaryOutput<'a> {
    pub status: &'static str,
    #[serde(flatten)]
    pub summary: &'a TransferSummary,
    pub dry_run: bool,
}

/// Formatter for CLI output
#[derive(Debug, Clone)]
pub struct Formatter {
    config: OutputConfig,
}

impl Formatter {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    pub fn is_json(&self) -> bool {
        self.config.json
    }

    pub fn colors_enabled(&self) -> bool {
        !self.config.no_color && !self.config.json
    }

    pub fn success(&self, message: &str) {
        if self.config.quiet || self.config.json {
            return;
        }
        if self.colors_enabled() {
            println!("{} {message}", style("✓").green());
        } else {
            println!("✓ {message}");
        }
    }

    /// Errors are printed even in quiet mode
    pub fn error(&self, message: &str) {
        if self.config.json {
            let error = serde_json::json!({ "error": message });
            eprintln!("{error}");
        } else if self.colors_enabled() {
            eprintln!("{} {message}", style("✗").red());
        } else {
            eprintln!("✗ {message}");
        }
    }

    pub fn warning(&self, message: &str) {
        if self.config.quiet || self.config.json {
            return;
        }
        if self.colors_enabled() {
            eprintln!("{} {message}", style("⚠").yellow());
        } else {
            eprintln!("⚠ {message}");
        }
    }

    /// Pretty-printed JSON document
    pub fn json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Error serializing output: {e}"),
        }
    }

    /// One compact JSON object per line
    pub fn json_line<T: Serialize>(&self, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Error serializing output: {e}"),
        }
    }

    pub fn println(&self, message: &str) {
        if self.config.quiet {
            return;
        }
        println!("{message}");
    }

    pub fn size(&self, bytes: u64) -> String {
        format_size(bytes, BINARY)
    }

    fn path(&self, path: &str) -> String {
        if self.colors_enabled() {
            style(format!("`{path}`")).cyan().to_string()
        } else {
            format!("`{path}`")
        }
    }

    /// Human line for an event
    ///
    /// Completed items are left to the progress display when one is shown.
    /// Failures are always described.
    pub fn describe(&self, event: &TransferEvent, progress_visible: bool) -> Option<String> {
        if let TransferEvent::Failed {
            source,
            target,
            error,
        } = event
        {
            return Some(match target {
                Some(target) => format!("{} -> {}: {error}", self.path(source), self.path(target)),
                None => format!("{}: {error}", self.path(source)),
            });
        }
        if self.config.quiet {
            return None;
        }
        match event {
            TransferEvent::Planned {
                source,
                target,
                size,
            } => Some(format!(
                "{} -> {} ({})",
                self.path(source),
                self.path(target),
                self.size((*size).max(0) as u64)
            )),
            TransferEvent::PlannedRemoval { target } => {
                Some(format!("Would remove {}", self.path(target)))
            }
            TransferEvent::Copied { source, target, .. } if !progress_visible => {
                Some(format!("{} -> {}", self.path(source), self.path(target)))
            }
            TransferEvent::Removed { target } if !progress_visible => {
                Some(format!("Removed {}", self.path(target)))
            }
            TransferEvent::Skipped { source, reason } => {
                tracing::debug!(source = %source, %reason, "skipped");
                None
            }
            _ => None,
        }
    }

    /// Closing summary of a run
    pub fn summary(&self, summary: &TransferSummary, dry_run: bool) {
        if self.config.json {
            self.json_line(&SummaryOutput {
                status: "summary",
                summary,
                dry_run,
            });
            return;
        }
        if dry_run {
            return;
        }

        let mut parts = Vec::new();
        if summary.copied > 0 || (summary.removed == 0 && summary.failed == 0) {
            parts.push(format!(
                "copied {} ({})",
                summary.copied,
                self.size(summary.bytes)
            ));
        }
        if summary.removed > 0 {
            parts.push(format!("removed {}", summary.removed));
        }
        if summary.skipped > 0 {
            parts.push(format!("skipped {}", summary.skipped));
        }
        if summary.failed > 0 {
            parts.push(format!("failed {}", summary.failed));
        }
        let mut line = capitalize(&parts.join(", "));
        if summary.cancelled {
            line.push_str(" (interrupted)");
        }

        if summary.is_success() {
            self.success(&line);
        } else {
            self.warning(&line);
        }
    }

    /// Table with a header row
    pub fn table(&self, header: &[&str], rows: Vec<Vec<String>>) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(header.to_vec());
        if !self.colors_enabled() {
            table.force_no_tty();
        }
        for row in rows {
            table.add_row(row);
        }
        table
    }
}

fn capitalize(line: &str) -> String {
    let mut chars = line.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new(OutputConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stow_core::SkipReason;

    fn plain() -> Formatter {
        Formatter::new(OutputConfig {
            no_color: true,
            ..Default::default()
        })
    }

    #[test]
    fn test_formatter_modes() {
        let formatter = Formatter::default();
        assert!(!formatter.is_json());
        assert!(formatter.colors_enabled());

        let json = Formatter::new(OutputConfig {
            json: true,
            ..Default::default()
        });
        assert!(json.is_json());
        assert!(!json.colors_enabled());
    }

    #[test]
    fn test_describe_copied_depends_on_progress() {
        let event = TransferEvent::Copied {
            source: "/tmp/a".into(),
            target: "s3/b/a".into(),
            size: 3,
        };
        assert_eq!(
            plain().describe(&event, false).as_deref(),
            Some("`/tmp/a` -> `s3/b/a`")
        );
        assert_eq!(plain().describe(&event, true), None);
    }

    #[test]
    fn test_describe_failures_even_when_quiet() {
        let quiet = Formatter::new(OutputConfig {
            quiet: true,
            no_color: true,
            ..Default::default()
        });
        let event = TransferEvent::Failed {
            source: "s3/b/k".into(),
            target: None,
            error: "Access denied".into(),
        };
        assert_eq!(
            quiet.describe(&event, false).as_deref(),
            Some("`s3/b/k`: Access denied")
        );
        let skipped = TransferEvent::Skipped {
            source: "s3/b/k".into(),
            reason: SkipReason::Excluded,
        };
        assert_eq!(quiet.describe(&skipped, false), None);
    }

    #[test]
    fn test_describe_planned_includes_size() {
        let event = TransferEvent::Planned {
            source: "a".into(),
            target: "b".into(),
            size: 2048,
        };
        assert_eq!(
            plain().describe(&event, false).as_deref(),
            Some("`a` -> `b` (2 KiB)")
        );
    }

    #[test]
    fn test_summary_json_shape() {
        let summary = TransferSummary {
            copied: 5,
            bytes: 1024,
            skipped: 1,
            removed: 0,
            failed: 2,
            cancelled: false,
        };
        let output = SummaryOutput {
            status: "summary",
            summary: &summary,
            dry_run: false,
        };
        insta::assert_json_snapshot!(output, @r#"
        {
          "status": "summary",
          "copied": 5,
          "bytes": 1024,
          "skipped": 1,
          "removed": 0,
          "failed": 2,
          "cancelled": false,
          "dry_run": false
        }
        "#);
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("copied 1 (1 B), failed 2"), "Copied 1 (1 B), failed 2");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_table_has_header() {
        let table = plain().table(&["ID", "Command"], vec![vec!["abc".into(), "cp".into()]]);
        let rendered = table.to_string();
        assert!(rendered.contains("ID"));
        assert!(rendered.contains("abc"));
    }
}
