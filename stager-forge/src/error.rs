//! Error types for tracking service operations

use thiserror::Error;

/// Result type for tracking service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur talking to Bitbucket or GitHub
#[derive(Error, Debug)]
pub enum Error {
    /// GitHub API error
    #[error("GitHub API error: {0}")]
    Api(#[from] octocrab::Error),

    /// Transport error talking to Bitbucket
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Credentials rejected or client could not be built
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Unexpected HTTP status
    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    /// Response did not have the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl From<Error> for stager_core::Error {
    fn from(err: Error) -> Self {
        stager_core::Error::Tracker(err.to_string())
    }
}
