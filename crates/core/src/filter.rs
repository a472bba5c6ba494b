//! Per-entry filters applied before a unit is scheduled

use glob::{MatchOptions, Pattern};
use jiff::Timestamp;
use serde::Serialize;

use crate::content::ClientContent;
use crate::duration::Duration;
use crate::error::{Error, Result};

/// Why an entry was filtered out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Younger than `--older-than`
    TooNew,
    /// At least as old as `--newer-than`
    TooOld,
    /// Matched an `--exclude` pattern
    Excluded,
    /// Modification time unknown while an age filter is active
    UnknownAge,
    /// Target already holds the same object
    Unchanged,
    /// Confirmed by an earlier run of the same session
    Completed,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SkipReason::TooNew => "newer than --older-than",
            SkipReason::TooOld => "older than --newer-than",
            SkipReason::Excluded => "excluded",
            SkipReason::UnknownAge => "modification time unknown",
            SkipReason::Unchanged => "unchanged",
            SkipReason::Completed => "already done in this session",
        })
    }
}

/// `--older-than` / `--newer-than` window
#[derive(Debug, Clone, Copy, Default)]
pub struct AgeFilter {
    pub older_than: Option<Duration>,
    pub newer_than: Option<Duration>,
}

impl AgeFilter {
    pub fn new(older_than: Option<Duration>, newer_than: Option<Duration>) -> Self {
        Self {
            older_than,
            newer_than,
        }
    }

    pub fn is_active(&self) -> bool {
        self.older_than.is_some() || self.newer_than.is_some()
    }

    /// Reason to skip `content`, if any
    pub fn check(&self, content: &ClientContent, now: Timestamp) -> Option<SkipReason> {
        if !self.is_active() {
            return None;
        }
        let Some(age) = content.age(now) else {
            return Some(SkipReason::UnknownAge);
        };
        if let Some(older) = self.older_than {
            if age < i128::from(older.as_nanos()) {
                return Some(SkipReason::TooNew);
            }
        }
        if let Some(newer) = self.newer_than {
            if age >= i128::from(newer.as_nanos()) {
                return Some(SkipReason::TooOld);
            }
        }
        None
    }
}

/// `--exclude` glob patterns
#[derive(Debug, Clone, Default)]
pub struct ExcludeFilter {
    patterns: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

impl ExcludeFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p.as_ref()).map_err(|e| {
                    Error::InvalidArgument(format!("invalid exclude pattern '{}': {e}", p.as_ref()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Match a `/`-separated path relative to the recursion root, or its basename
    pub fn is_excluded(&self, relative: &str) -> bool {
        let relative = relative.trim_end_matches('/');
        let base = relative.rsplit('/').next().unwrap_or(relative);
        self.patterns.iter().any(|p| {
            p.matches_with(relative, MATCH_OPTIONS) || p.matches_with(base, MATCH_OPTIONS)
        })
    }
}

/// Age and exclude filters together
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub age: AgeFilter,
    pub exclude: ExcludeFilter,
}

impl EntryFilter {
    pub fn check(&self, content: &ClientContent, relative: &str, now: Timestamp) -> Option<SkipReason> {
        if self.exclude.is_excluded(relative) {
            return Some(SkipReason::Excluded);
        }
        self.age.check(content, now)
    }
}
