//! Process exit codes
//!
//! Scripts depend on these values; changing one is a breaking change.

use stow_core::{Error, TransferSummary};

/// Exit status of a stow invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Every item succeeded
    Success = 0,

    /// Unclassified error, or at least one item failed
    GeneralError = 1,

    /// Bad arguments, malformed path or key, invalid configuration
    UsageError = 2,

    /// Network failure; retrying may help
    NetworkError = 3,

    /// Credentials rejected or access denied
    AuthError = 4,

    /// Alias, bucket, object or session missing
    NotFound = 5,

    /// Target exists with different content
    Conflict = 6,

    /// Backend does not support the request
    UnsupportedFeature = 7,

    /// Cancelled by SIGINT or SIGTERM
    Interrupted = 130,
}

impl ExitCode {
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    pub const fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::GeneralError),
            2 => Some(Self::UsageError),
            3 => Some(Self::NetworkError),
            4 => Some(Self::AuthError),
            5 => Some(Self::NotFound),
            6 => Some(Self::Conflict),
            7 => Some(Self::UnsupportedFeature),
            130 => Some(Self::Interrupted),
            _ => None,
        }
    }

    /// Exit code for a run that finished and reported per-item results
    pub fn from_summary(summary: &TransferSummary) -> Self {
        if summary.cancelled {
            Self::Interrupted
        } else if summary.failed > 0 {
            Self::GeneralError
        } else {
            Self::Success
        }
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        Self::from_i32(err.exit_code()).unwrap_or(Self::GeneralError)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.as_i32()
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        // 130 fits in a u8
        std::process::ExitCode::from(code.as_i32() as u8)
    }
}
