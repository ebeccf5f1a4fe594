//! Error taxonomy for file transfer execution
//!
//! The menu engine decides what the remote user sees for each kind, so every
//! variant carries a stable machine-readable kind string. `BinaryNotFound`
//! is kept distinct from everything else: it means the sysop has not
//! installed the external driver, and callers show "this protocol is
//! unavailable" instead of a generic transfer failure.

use std::fmt;
use std::io;

/// Why a transfer invocation failed
#[derive(Debug)]
pub enum TransferError {
    /// The external send/receive executable was not found on the search path
    BinaryNotFound {
        /// Program name as configured in the protocol registry
        program: String,
    },

    /// Caller contract violation (empty file list, relative path, ...),
    /// rejected before any process was spawned
    InvalidInput(String),

    /// The caller's cancellation token fired mid-transfer
    Cancelled,

    /// The remote client sent an in-band abort run (consecutive CAN bytes)
    Aborted,

    /// No inbound activity within the configured idle window
    IdleTimeout,

    /// The external process was killed or exited non-zero
    AbnormalExit {
        /// Process exit code, if it exited rather than being signaled
        code: Option<i32>,
    },

    /// An I/O failure outside the expected shutdown races
    Io(io::Error),
}

impl TransferError {
    /// Stable machine-readable kind string
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BinaryNotFound { .. } => "binary_not_found",
            Self::InvalidInput(_) => "invalid",
            Self::Cancelled => "cancelled",
            Self::Aborted => "aborted",
            Self::IdleTimeout => "idle_timeout",
            Self::AbnormalExit { .. } => "abnormal_exit",
            Self::Io(_) => "io_error",
        }
    }

    /// Create an `InvalidInput` error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// True when the failure means the sysop has not installed the driver
    #[must_use]
    pub fn is_binary_not_found(&self) -> bool {
        matches!(self, Self::BinaryNotFound { .. })
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BinaryNotFound { program } => {
                write!(f, "transfer program '{program}' not found on search path")
            }
            Self::InvalidInput(msg) => write!(f, "invalid transfer request: {msg}"),
            Self::Cancelled => write!(f, "transfer cancelled"),
            Self::Aborted => write!(f, "transfer aborted by remote client"),
            Self::IdleTimeout => write!(f, "transfer timed out waiting for inbound data"),
            Self::AbnormalExit { code: Some(code) } => {
                write!(f, "transfer program exited with status {code}")
            }
            Self::AbnormalExit { code: None } => {
                write!(f, "transfer program was killed before completing")
            }
            Self::Io(e) => write!(f, "transfer I/O error: {e}"),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransferError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings() {
        assert_eq!(
            TransferError::BinaryNotFound {
                program: "sz".to_string()
            }
            .kind(),
            "binary_not_found"
        );
        assert_eq!(TransferError::invalid("empty").kind(), "invalid");
        assert_eq!(TransferError::Cancelled.kind(), "cancelled");
        assert_eq!(TransferError::Aborted.kind(), "aborted");
        assert_eq!(TransferError::IdleTimeout.kind(), "idle_timeout");
        assert_eq!(
            TransferError::AbnormalExit { code: Some(1) }.kind(),
            "abnormal_exit"
        );
    }

    #[test]
    fn test_binary_not_found_is_distinguished() {
        let err = TransferError::BinaryNotFound {
            program: "rz".to_string(),
        };
        assert!(err.is_binary_not_found());
        assert!(!TransferError::Cancelled.is_binary_not_found());
        assert!(format!("{err}").contains("rz"));
    }

    #[test]
    fn test_io_conversion() {
        let err: TransferError = io::Error::other("boom").into();
        assert_eq!(err.kind(), "io_error");
    }
}
