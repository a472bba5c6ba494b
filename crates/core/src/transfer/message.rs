//! Typed transfer events consumed by the renderer

use serde::Serialize;

use crate::filter::SkipReason;

/// One event from a transfer run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum TransferEvent {
    /// Would be copied (dry run)
    Planned {
        source: String,
        target: String,
        size: i64,
    },
    /// Copied successfully
    Copied {
        source: String,
        target: String,
        size: u64,
    },
    /// Filtered out before scheduling
    Skipped { source: String, reason: SkipReason },
    /// Would be removed (dry run)
    PlannedRemoval { target: String },
    /// Removed after a move or during a mirror
    Removed { target: String },
    /// The unit failed; the run continues
    Failed {
        source: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        error: String,
    },
}

impl TransferEvent {
    pub fn is_failure(&self) -> bool {
        matches!(self, TransferEvent::Failed { .. })
    }
}

/// Totals for a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferSummary {
    pub copied: u64,
    pub bytes: u64,
    pub skipped: u64,
    pub removed: u64,
    pub failed: u64,
    pub cancelled: bool,
}

impl TransferSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }

    pub(crate) fn record(&mut self, event: &TransferEvent) {
        match event {
            TransferEvent::Copied { size, .. } => {
                self.copied += 1;
                self.bytes += size;
            }
            TransferEvent::Skipped { .. } => self.skipped += 1,
            TransferEvent::Removed { .. } => self.removed += 1,
            TransferEvent::Failed { .. } => self.failed += 1,
            TransferEvent::Planned { .. } | TransferEvent::PlannedRemoval { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = TransferEvent::Skipped {
            source: "m/b/k".into(),
            reason: SkipReason::TooNew,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "too-new");

        let failed = TransferEvent::Failed {
            source: "a".into(),
            target: None,
            error: "boom".into(),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert!(json.get("target").is_none());
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = TransferSummary::default();
        summary.record(&TransferEvent::Copied {
            source: "a".into(),
            target: "b".into(),
            size: 10,
        });
        summary.record(&TransferEvent::Removed { target: "a".into() });
        assert_eq!(summary.copied, 1);
        assert_eq!(summary.bytes, 10);
        assert_eq!(summary.removed, 1);
        assert!(summary.is_success());

        summary.record(&TransferEvent::Failed {
            source: "c".into(),
            target: None,
            error: "x".into(),
        });
        assert!(!summary.is_success());
    }
}
