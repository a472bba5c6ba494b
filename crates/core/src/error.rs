//! The error type shared by every stow crate
//!
//! Each variant maps onto one process exit code through [`Error::exit_code`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A full URL was given where an alias-prefixed path was expected
    #[error("Invalid aliased URL: {0}. Use an alias, e.g. myalias/bucket/key")]
    InvalidAliasedUrl(String),

    #[error("No configuration found for alias: {0}")]
    AliasNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Source is not something that can be copied
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// Source is a directory where a file was expected
    #[error("Source is a directory: {0}. Use --recursive to copy directories")]
    SourceIsDir(String),

    /// Source and target resolve to the same location
    #[error("Source and target are the same: {0}")]
    SourceTargetSame(String),

    /// Malformed encryption key specification
    #[error("Invalid encryption key: {0}")]
    EncryptionKey(String),

    #[error("Invalid duration: {0}")]
    Duration(String),

    /// Snapshot packet checksum mismatch
    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Snapshot stream is malformed
    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// Session files cannot be read back
    #[error("Session {id} is corrupt: {reason}. Remove it with `stow session clear {id}`")]
    CorruptSession { id: String, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Network error (retryable)
    #[error("Network error: {0}")]
    Network(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Feature not supported by backend
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("{0}")]
    General(String),
}

impl Error {
    /// Process exit code for a command that fails with this error
    ///
    /// Usage mistakes are 2, a missing alias or object is 5 and anything
    /// unclassified is 1.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_)
            | Error::InvalidPath(_)
            | Error::InvalidAliasedUrl(_)
            | Error::InvalidArgument(_)
            | Error::InvalidSource(_)
            | Error::SourceIsDir(_)
            | Error::SourceTargetSame(_)
            | Error::EncryptionKey(_)
            | Error::Duration(_) => 2,
            Error::Network(_) => 3,
            Error::Auth(_) => 4,
            Error::NotFound(_) | Error::AliasNotFound(_) => 5,
            Error::Conflict(_) => 6,
            Error::UnsupportedFeature(_) => 7,
            Error::Cancelled => 130,
            _ => 1,
        }
    }

    /// Errors that end a remove or list stream instead of being reported per item
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::Network(_) | Error::Cancelled)
    }

    /// Filesystem conditions that a recursive walk skips over
    pub fn is_soft_fs_error(err: &std::io::Error) -> bool {
        use std::io::ErrorKind;
        matches!(err.kind(), ErrorKind::NotFound) || err.raw_os_error() == Some(ELOOP)
    }
}

#[cfg(target_os = "macos")]
const ELOOP: i32 = 62;
#[cfg(not(target_os = "macos"))]
const ELOOP: i32 = 40;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(Error::InvalidPath("test".into()).exit_code(), 2);
        assert_eq!(Error::Config("test".into()).exit_code(), 2);
        assert_eq!(Error::InvalidArgument("test".into()).exit_code(), 2);
        assert_eq!(Error::EncryptionKey("test".into()).exit_code(), 2);
        assert_eq!(Error::Network("test".into()).exit_code(), 3);
        assert_eq!(Error::Auth("test".into()).exit_code(), 4);
        assert_eq!(Error::NotFound("test".into()).exit_code(), 5);
        assert_eq!(Error::AliasNotFound("test".into()).exit_code(), 5);
        assert_eq!(Error::Conflict("test".into()).exit_code(), 6);
        assert_eq!(Error::UnsupportedFeature("test".into()).exit_code(), 7);
        assert_eq!(Error::Cancelled.exit_code(), 130);
        assert_eq!(Error::General("test".into()).exit_code(), 1);
        assert_eq!(
            Error::ChecksumMismatch {
                expected: 1,
                actual: 2
            }
            .exit_code(),
            1
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::AliasNotFound("minio".into());
        assert_eq!(err.to_string(), "No configuration found for alias: minio");

        let err = Error::InvalidPath("/bad/path".into());
        assert_eq!(err.to_string(), "Invalid path: /bad/path");

        let err = Error::ChecksumMismatch {
            expected: 0xdead_beef,
            actual: 0x0000_0001,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch: expected 0xdeadbeef, got 0x00000001"
        );
    }

    #[test]
    fn test_fatal_errors() {
        assert!(Error::Auth("denied".into()).is_fatal());
        assert!(Error::Network("reset".into()).is_fatal());
        assert!(!Error::NotFound("x".into()).is_fatal());
    }

    #[test]
    fn test_soft_fs_errors() {
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(Error::is_soft_fs_error(&missing));

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(!Error::is_soft_fs_error(&denied));
    }
}
