//! Error types for Stager

use std::time::Duration;

use thiserror::Error;

/// Result type alias for Stager operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for Stager operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A git subprocess exited unsuccessfully
    #[error("git {command} failed (exit code {}): {stderr}", .code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    Git {
        /// The git subcommand and arguments, with credentials redacted
        command: String,
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Captured standard error
        stderr: String,
    },

    /// The reconciliation pass exceeded its deadline
    #[error("Reconciliation pass exceeded its deadline of {}s", .0.as_secs())]
    Timeout(Duration),

    /// Pull-request tracking API error
    #[error("Tracking API error: {0}")]
    Tracker(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is the pass deadline expiring
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_error_display() {
        let err = Error::Git {
            command: "fetch --prune origin".to_string(),
            code: Some(128),
            stderr: "fatal: could not read from remote".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "git fetch --prune origin failed (exit code 128): fatal: could not read from remote"
        );
    }

    #[test]
    fn test_git_error_display_without_code() {
        let err = Error::Git {
            command: "clone".to_string(),
            code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("exit code none"));
    }

    #[test]
    fn test_timeout_is_distinguishable() {
        let err = Error::Timeout(Duration::from_secs(120));
        assert!(err.is_timeout());
        assert!(err.to_string().contains("120s"));
        assert!(!Error::Other("x".to_string()).is_timeout());
    }
}
