//! Pull-request tracking service abstraction

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::mirror::MirrorName;
use crate::Result;

/// An open pull request as seen by the reconciler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Tracker-assigned id (Bitbucket id, GitHub number)
    pub id: u64,
    /// Source branch name
    pub head_ref: String,
    /// Commit the source branch points at
    pub head_sha: String,
    /// HTTPS clone URL of the source repository (may be a fork)
    pub head_clone_url: String,
    /// Target branch name
    pub base_ref: String,
    /// Default branch of the target repository
    pub base_default_branch: String,
    /// HTTPS clone URL of the target repository
    pub base_clone_url: String,
    /// Author's user slug or login
    pub author_slug: String,
}

impl PullRequest {
    /// Mirror directory name for this pull request
    pub fn mirror_name(&self) -> Result<MirrorName> {
        MirrorName::for_pull_request(&self.author_slug, &self.head_ref)
    }
}

/// A pull-request tracking service bound to one repository
#[async_trait]
pub trait PullRequestTracker: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// HTTPS clone URL of the tracked repository, without credentials
    fn repository_clone_url(&self) -> String;

    /// Name of the repository's default branch
    async fn default_branch(&self) -> Result<String>;

    /// Every open pull request, across all result pages
    async fn list_open_pull_requests(&self) -> Result<Vec<PullRequest>>;

    /// Add a comment to a pull request
    async fn post_comment(&self, pr_id: u64, text: &str) -> Result<()>;

    /// Close (GitHub) or decline (Bitbucket) a pull request
    async fn close_pull_request(&self, pr_id: u64) -> Result<()>;

    /// File an alert about the default branch
    async fn create_alert_issue(&self, title: &str, body: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_name_from_author_and_branch() {
        let pr = PullRequest {
            id: 12,
            head_ref: "feature/new-role".to_string(),
            head_sha: "0123abcd".to_string(),
            head_clone_url: "https://git.example.com/scm/~alice/puppet.git".to_string(),
            base_ref: "production".to_string(),
            base_default_branch: "production".to_string(),
            base_clone_url: "https://git.example.com/scm/ops/puppet.git".to_string(),
            author_slug: "alice".to_string(),
        };
        assert_eq!(pr.mirror_name().unwrap().as_str(), "alice_feature_new_role");
    }
}
