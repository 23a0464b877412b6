//! GitHub API client using octocrab

use async_trait::async_trait;
use octocrab::models::pulls::PullRequest as OctocrabPR;
use octocrab::models::IssueState;
use octocrab::Octocrab;
use stager_core::{Config, PullRequest, PullRequestTracker, Secrets};
use tracing::{debug, info, warn};

use crate::{credentials, slug, Error, Result};

const PER_PAGE: u8 = 100;

/// Tracker for one repository on GitHub or GitHub Enterprise
pub struct GitHubTracker {
    client: Octocrab,
    server: String,
    owner: String,
    repo: String,
}

impl std::fmt::Debug for GitHubTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubTracker")
            .field("server", &self.server)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}

/// REST base URI for a git server; `None` means public GitHub
fn enterprise_base_uri(server: &str) -> Option<String> {
    if server.eq_ignore_ascii_case("github.com") || server.eq_ignore_ascii_case("api.github.com") {
        None
    } else {
        Some(format!("https://{}/api/v3", server))
    }
}

impl GitHubTracker {
    pub fn new(config: &Config, secrets: &Secrets) -> Result<Self> {
        let (owner, repo) = slug(config)?;
        let (_, token) = credentials(secrets)?;

        let mut builder = Octocrab::builder().personal_token(token);
        if let Some(base) = enterprise_base_uri(&config.git_server) {
            debug!(base = %base, "Using GitHub Enterprise API");
            builder = builder
                .base_uri(base)
                .map_err(|e| Error::Auth(format!("Invalid GitHub API address: {}", e)))?;
        }
        let client = builder
            .build()
            .map_err(|e| Error::Auth(format!("Failed to create GitHub client: {}", e)))?;

        info!(owner = %owner, repo = %repo, "Created GitHub client");

        Ok(Self {
            client,
            server: config.git_server.clone(),
            owner,
            repo,
        })
    }

    async fn fetch_default_branch(&self) -> Result<String> {
        let repo = self
            .client
            .repos(&self.owner, &self.repo)
            .get()
            .await?;

        repo.default_branch
            .ok_or_else(|| Error::Parse(format!("{}/{} has no default branch", self.owner, self.repo)))
    }

    /// Every open pull request, paging until an empty page
    async fn fetch_open_pull_requests(&self) -> Result<Vec<OctocrabPR>> {
        let mut all = Vec::new();
        let mut page_num = 1u32;

        loop {
            let page = self
                .client
                .pulls(&self.owner, &self.repo)
                .list()
                .state(octocrab::params::State::Open)
                .per_page(PER_PAGE)
                .page(page_num)
                .send()
                .await?;

            let count = page.items.len();
            all.extend(page.items);
            if count < PER_PAGE as usize {
                break;
            }
            page_num += 1;
        }

        Ok(all)
    }
}

/// Convert an octocrab pull request, skipping ones whose source is gone
fn convert(pr: OctocrabPR, default_branch: &str) -> Option<PullRequest> {
    let head_clone_url = pr.head.repo.as_ref().and_then(|r| r.clone_url.as_ref());
    let base_clone_url = pr.base.repo.as_ref().and_then(|r| r.clone_url.as_ref());
    let author = pr.user.as_ref().map(|u| u.login.clone());

    let (Some(head_clone_url), Some(base_clone_url), Some(author_slug)) =
        (head_clone_url, base_clone_url, author)
    else {
        warn!(pr = pr.number, "Skipping pull request without a source repository or author");
        return None;
    };

    Some(PullRequest {
        id: pr.number,
        head_ref: pr.head.ref_field.clone(),
        head_sha: pr.head.sha.clone(),
        head_clone_url: head_clone_url.to_string(),
        base_ref: pr.base.ref_field.clone(),
        base_default_branch: pr
            .base
            .repo
            .as_ref()
            .and_then(|r| r.default_branch.clone())
            .unwrap_or_else(|| default_branch.to_string()),
        base_clone_url: base_clone_url.to_string(),
        author_slug,
    })
}

#[async_trait]
impl PullRequestTracker for GitHubTracker {
    fn name(&self) -> &'static str {
        "github"
    }

    fn repository_clone_url(&self) -> String {
        format!("https://{}/{}/{}.git", self.server, self.owner, self.repo)
    }

    async fn default_branch(&self) -> stager_core::Result<String> {
        Ok(self.fetch_default_branch().await?)
    }

    async fn list_open_pull_requests(&self) -> stager_core::Result<Vec<PullRequest>> {
        let default_branch = self.fetch_default_branch().await?;
        let pulls: Vec<PullRequest> = self
            .fetch_open_pull_requests()
            .await?
            .into_iter()
            .filter_map(|pr| convert(pr, &default_branch))
            .collect();

        info!(count = pulls.len(), "Fetched open pull requests from GitHub");
        Ok(pulls)
    }

    async fn post_comment(&self, pr_id: u64, text: &str) -> stager_core::Result<()> {
        self.client
            .issues(&self.owner, &self.repo)
            .create_comment(pr_id, text)
            .await
            .map_err(Error::Api)?;
        debug!(pr = pr_id, "Posted comment");
        Ok(())
    }

    async fn close_pull_request(&self, pr_id: u64) -> stager_core::Result<()> {
        self.client
            .issues(&self.owner, &self.repo)
            .update(pr_id)
            .state(IssueState::Closed)
            .send()
            .await
            .map_err(Error::Api)?;
        info!(pr = pr_id, "Closed pull request");
        Ok(())
    }

    async fn create_alert_issue(&self, title: &str, body: &str) -> stager_core::Result<()> {
        let issue = self
            .client
            .issues(&self.owner, &self.repo)
            .create(title)
            .body(body)
            .send()
            .await
            .map_err(Error::Api)?;
        info!(number = issue.number, title = %title, "Opened alert issue");
        Ok(())
    }
}
