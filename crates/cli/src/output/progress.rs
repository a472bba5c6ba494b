//! Progress display for transfer and removal runs

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use humansize::{BINARY, format_size};

use super::OutputConfig;

/// Spinner counting finished items and bytes
///
/// Suppressed in quiet, JSON and `--no-progress` modes.
#[derive(Debug)]
pub struct ProgressBar {
    bar: Option<indicatif::ProgressBar>,
    items: AtomicU64,
    bytes: AtomicU64,
}

impl ProgressBar {
    fn enabled(config: OutputConfig) -> bool {
        !(config.quiet || config.json || config.no_progress)
    }

    /// A progress display that never draws
    pub fn hidden() -> Self {
        Self {
            bar: None,
            items: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// Create a spinner for a run of unknown length
    pub fn spinner(config: OutputConfig, message: &str) -> Self {
        let bar = Self::enabled(config).then(|| {
            let bar = indicatif::ProgressBar::new_spinner();
            if let Ok(style) = indicatif::ProgressStyle::with_template(
                "{spinner:.green} {msg} [{elapsed_precise}]",
            ) {
                bar.set_style(style);
            }
            bar.set_message(message.to_string());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        });
        Self {
            bar,
            items: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// Count one finished item of `bytes` bytes
    pub fn record(&self, bytes: u64) {
        let items = self.items.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if let Some(bar) = &self.bar {
            bar.set_message(format!("{items} objects, {}", format_size(total, BINARY)));
        }
    }

    pub fn items(&self) -> u64 {
        self.items.load(Ordering::Relaxed)
    }

    /// Print a line above the spinner
    pub fn println(&self, line: &str) {
        match &self.bar {
            Some(bar) => bar.println(line),
            None => println!("{line}"),
        }
    }

    /// Run `f` with the spinner hidden
    pub fn suspend<F: FnOnce()>(&self, f: F) {
        match &self.bar {
            Some(bar) => bar.suspend(f),
            None => f(),
        }
    }

    pub fn finish_and_clear(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }

    pub fn is_visible(&self) -> bool {
        self.bar.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_hidden_in_quiet_and_json_modes() {
        for config in [
            OutputConfig {
                quiet: true,
                ..Default::default()
            },
            OutputConfig {
                json: true,
                ..Default::default()
            },
            OutputConfig {
                no_progress: true,
                ..Default::default()
            },
        ] {
            assert!(!ProgressBar::spinner(config, "copying").is_visible());
        }
    }

    #[test]
    fn test_progress_visible_by_default() {
        let bar = ProgressBar::spinner(OutputConfig::default(), "copying");
        assert!(bar.is_visible());
        bar.finish_and_clear();
    }

    #[test]
    fn test_record_counts_items() {
        let bar = ProgressBar::hidden();
        bar.record(10);
        bar.record(0);
        assert_eq!(bar.items(), 2);
    }
}
