//! Stager Forge - pull-request tracking services
//!
//! Implements [`stager_core::PullRequestTracker`] for Bitbucket Server's
//! REST API and for GitHub (including Enterprise) through octocrab.

mod bitbucket;
mod error;
mod github;

pub use bitbucket::BitbucketTracker;
pub use error::{Error, Result};
pub use github::GitHubTracker;

use stager_core::{Backend, Config, PullRequestTracker, Secrets};
use tracing::info;

/// Build the tracker selected by `config.backend`
pub fn build_tracker(config: &Config, secrets: &Secrets) -> Result<Box<dyn PullRequestTracker>> {
    info!(backend = %config.backend, server = %config.git_server, "Connecting to tracking service");

    Ok(match config.backend {
        Backend::Bitbucket => Box::new(BitbucketTracker::new(config, secrets)?),
        Backend::Github => Box::new(GitHubTracker::new(config, secrets)?),
    })
}

/// Owner and repository from the configured slug
fn slug(config: &Config) -> Result<(String, String)> {
    let (owner, repo) = config
        .slug_parts()
        .map_err(|e| Error::Other(e.to_string()))?;
    Ok((owner.to_string(), repo.to_string()))
}

fn credentials(secrets: &Secrets) -> Result<(String, String)> {
    let (username, token) = secrets.require().map_err(|e| Error::Auth(e.to_string()))?;
    Ok((username.to_string(), token.to_string()))
}
