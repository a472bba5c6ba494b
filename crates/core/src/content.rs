//! Listing entries and the options that shape a listing

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::url::ClientUrl;

/// Entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    File,
    Dir,
}

/// One listing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientContent {
    pub url: ClientUrl,

    /// Size in bytes (0 for directories)
    pub size: i64,

    /// Last modified time, when the backend reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<Timestamp>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    #[serde(default)]
    pub is_delete_marker: bool,

    #[serde(default = "default_true")]
    pub is_latest: bool,

    pub kind: ContentKind,
}

fn default_true() -> bool {
    true
}

impl ClientContent {
    /// Create a file entry
    pub fn file(url: ClientUrl, size: i64) -> Self {
        Self {
            url,
            size,
            modified: None,
            etag: None,
            version_id: None,
            storage_class: None,
            is_delete_marker: false,
            is_latest: true,
            kind: ContentKind::File,
        }
    }

    /// Create a directory entry. The URL gets a trailing separator.
    pub fn dir(url: ClientUrl) -> Self {
        Self {
            url: url.as_dir(),
            kind: ContentKind::Dir,
            ..Self::file(url, 0)
        }
    }

    pub fn with_modified(mut self, modified: Timestamp) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == ContentKind::Dir
    }

    /// Age relative to `now`; `None` when the modification time is unknown
    pub fn age(&self, now: Timestamp) -> Option<i128> {
        self.modified
            .map(|m| now.as_nanosecond() - m.as_nanosecond())
    }
}

/// Where directory entries appear relative to their contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirOpt {
    /// Directories are not emitted on recursive listings
    #[default]
    None,
    /// Directory entry precedes its contents
    First,
    /// Directory entry follows its contents
    Last,
}

/// Options for list operations
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Descend into subdirectories / ignore the delimiter
    pub recursive: bool,

    /// Include every object version and delete marker
    pub include_versions: bool,

    /// Placement of directory entries in recursive listings
    pub dir_opt: DirOpt,
}

impl ListOptions {
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_entry_gets_separator() {
        let url = ClientUrl::object("http", "h", "/bucket/dir");
        let content = ClientContent::dir(url);
        assert!(content.is_dir());
        assert_eq!(content.url.path, "/bucket/dir/");
        assert_eq!(content.size, 0);
    }

    #[test]
    fn test_age() {
        let now: Timestamp = "2024-06-10T00:00:00Z".parse().unwrap();
        let then: Timestamp = "2024-06-09T00:00:00Z".parse().unwrap();
        let content =
            ClientContent::file(ClientUrl::local("f"), 1).with_modified(then);
        assert_eq!(content.age(now), Some(86_400 * 1_000_000_000));
        assert_eq!(ClientContent::file(ClientUrl::local("f"), 1).age(now), None);
    }
}
