//! Error types for remote session operations.
//!
//! Errors are categorized so callers can tell a host that cannot be reached
//! from a host that rejected our credentials or a command that ran and failed.

use thiserror::Error;

/// Categories of session errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// No usable credentials, or the remote rejected them
    Authentication,
    /// Network dial or handshake failure (transient, retryable)
    Connection,
    /// The remote refused the session or channel type
    Protocol,
    /// Operation attempted on a closed session
    Closed,
    /// Remote command exited with a non-zero status
    Command,
    /// File copy over the session failed
    Transfer,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Authentication => "SSH authentication failed",
            Self::Connection => "Could not reach host",
            Self::Protocol => "Remote host rejected the session",
            Self::Closed => "Session already closed",
            Self::Command => "Remote command failed",
            Self::Transfer => "File transfer failed",
            Self::Other => "Unexpected error",
        }
    }
}

/// Errors that can occur while talking to a remote host.
#[derive(Debug, Error)]
pub enum Error {
    /// No credential material configured, or the remote rejected it
    #[error("authentication failed for {address}: {message}")]
    Authentication {
        /// Host public address
        address: String,
        /// What went wrong
        message: String,
    },

    /// Dial or handshake failure
    #[error("failed to connect to {address}: {message}")]
    Connection {
        /// Host public address
        address: String,
        /// Output of the failed dial
        message: String,
    },

    /// The remote rejected the session type
    #[error("session rejected by {address}: {message}")]
    Protocol {
        /// Host public address
        address: String,
        /// Output of the rejected request
        message: String,
    },

    /// Operation on a session that was already closed
    #[error("session to {address} is already closed")]
    Closed {
        /// Host public address
        address: String,
    },

    /// Remote command exited with a non-zero status
    #[error("command exited with status {exit_code}: {stderr}")]
    CommandFailed {
        /// Remote exit status
        exit_code: i32,
        /// Captured standard error
        stderr: String,
    },

    /// Upload or download failure
    #[error("transfer of {path} failed: {message}")]
    Transfer {
        /// Remote path being copied
        path: String,
        /// Details of the failure
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Authentication { .. } => ErrorCategory::Authentication,
            Error::Connection { .. } => ErrorCategory::Connection,
            Error::Protocol { .. } => ErrorCategory::Protocol,
            Error::Closed { .. } => ErrorCategory::Closed,
            Error::CommandFailed { .. } => ErrorCategory::Command,
            Error::Transfer { .. } => ErrorCategory::Transfer,
            Error::Io(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Create an error from the stderr of a failed `ssh` invocation.
    ///
    /// `ssh` reports its own failures with exit status 255, so the message
    /// text is what separates a bad key from an unreachable host.
    pub fn from_ssh_output(address: &str, stderr: &str) -> Self {
        let stderr_lower = stderr.to_lowercase();
        let message = stderr.trim().to_string();

        if stderr_lower.contains("permission denied")
            || stderr_lower.contains("no more authentication methods")
            || stderr_lower.contains("too many authentication failures")
            || stderr_lower.contains("load key")
        {
            return Error::Authentication {
                address: address.to_string(),
                message,
            };
        }

        if stderr_lower.contains("session open refused")
            || stderr_lower.contains("administratively prohibited")
            || stderr_lower.contains("shell request failed")
            || stderr_lower.contains("subsystem request failed")
            || stderr_lower.contains("protocol major versions differ")
        {
            return Error::Protocol {
                address: address.to_string(),
                message,
            };
        }

        Error::Connection {
            address: address.to_string(),
            message,
        }
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;
