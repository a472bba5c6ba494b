//! Client URL model
//!
//! A `ClientUrl` is the normalized location handed to an [`ObjectClient`](crate::ObjectClient).
//! Local paths keep the OS separator; object URLs always use `/` and carry
//! `/bucket/key` as their path.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which kind of client a URL addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlKind {
    /// Local filesystem path
    Local,
    /// Object storage endpoint
    Object,
}

/// A normalized path for a local or remote client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientUrl {
    pub kind: UrlKind,
    /// URL scheme ("http", "https"); empty for local paths
    pub scheme: String,
    /// Host and optional port; empty for local paths
    pub host: String,
    /// Path portion. For objects this is `/bucket/key`.
    pub path: String,
    /// Path separator for this client
    pub separator: char,
}

impl ClientUrl {
    /// Build a local filesystem URL
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            kind: UrlKind::Local,
            scheme: String::new(),
            host: String::new(),
            path: path.into(),
            separator: std::path::MAIN_SEPARATOR,
        }
    }

    /// Build an object storage URL. Backslashes in `path` become `/`.
    pub fn object(scheme: impl Into<String>, host: impl Into<String>, path: &str) -> Self {
        let mut path = path.replace('\\', "/");
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self {
            kind: UrlKind::Object,
            scheme: scheme.into(),
            host: host.into(),
            path,
            separator: '/',
        }
    }

    pub fn is_local(&self) -> bool {
        self.kind == UrlKind::Local
    }

    /// Split an object path into bucket and key
    ///
    /// Returns empty strings for the parts that are absent. For local URLs the
    /// bucket is empty and the key is the full path.
    pub fn bucket_and_key(&self) -> (&str, &str) {
        match self.kind {
            UrlKind::Local => ("", self.path.as_str()),
            UrlKind::Object => {
                let trimmed = self.path.trim_start_matches('/');
                match trimmed.split_once('/') {
                    Some((bucket, key)) => (bucket, key),
                    None => (trimmed, ""),
                }
            }
        }
    }

    /// True for object URLs naming a bucket with no key
    pub fn is_bucket_root(&self) -> bool {
        let (bucket, key) = self.bucket_and_key();
        self.kind == UrlKind::Object && !bucket.is_empty() && key.is_empty()
    }

    /// True for object URLs that name only the endpoint (no bucket)
    pub fn is_alias_root(&self) -> bool {
        self.kind == UrlKind::Object && self.bucket_and_key().0.is_empty()
    }

    pub fn ends_with_separator(&self) -> bool {
        self.path.ends_with(self.separator)
    }

    /// Append a `/`-separated relative path, converting to this URL's separator
    pub fn join(&self, relative: &str) -> Self {
        let base = self.path.trim_end_matches(self.separator);
        let relative = relative.trim_start_matches('/');
        let relative = if self.separator == '/' {
            relative.to_string()
        } else {
            relative.replace('/', &self.separator.to_string())
        };
        let path = if base.is_empty() && !self.path.starts_with(self.separator) {
            relative
        } else {
            format!("{base}{}{relative}", self.separator)
        };
        Self {
            path,
            ..self.clone()
        }
    }

    /// Last non-empty path component
    pub fn base_name(&self) -> &str {
        self.path
            .trim_end_matches(self.separator)
            .rsplit(self.separator)
            .next()
            .unwrap_or("")
    }

    /// A copy of this URL with a trailing separator
    pub fn as_dir(&self) -> Self {
        if self.ends_with_separator() {
            return self.clone();
        }
        Self {
            path: format!("{}{}", self.path, self.separator),
            ..self.clone()
        }
    }

    /// Path relative to `root`, always `/`-separated
    ///
    /// Returns `None` when this URL does not live under `root`.
    pub fn relative_to(&self, root: &str) -> Option<String> {
        let rest = self.path.strip_prefix(root)?;
        let rest = rest.trim_start_matches(self.separator);
        Some(if self.separator == '/' {
            rest.to_string()
        } else {
            rest.replace(self.separator, "/")
        })
    }
}

impl fmt::Display for ClientUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            UrlKind::Local => write!(f, "{}", self.path),
            UrlKind::Object => write!(f, "{}://{}{}", self.scheme, self.host, self.path),
        }
    }
}

/// Check if a string is a valid alias name
pub fn is_valid_alias_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
