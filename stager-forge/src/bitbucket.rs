//! Bitbucket Server REST client

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use stager_core::{Config, PullRequest, PullRequestTracker, Secrets};
use tracing::{debug, error, info};

use crate::{credentials, slug, Error, Result};

/// Tracker for one repository on a Bitbucket Server instance
pub struct BitbucketTracker {
    http: Client,
    server: String,
    project: String,
    repo: String,
    username: String,
    token: String,
}

impl std::fmt::Debug for BitbucketTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitbucketTracker")
            .field("server", &self.server)
            .field("project", &self.project)
            .field("repo", &self.repo)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// One page of a paged Bitbucket collection
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    values: Vec<T>,
    #[serde(default = "default_true")]
    is_last_page: bool,
    next_page_start: Option<u64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Branch {
    display_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BbPullRequest {
    id: u64,
    #[serde(default)]
    version: i64,
    from_ref: Ref,
    to_ref: Ref,
    author: Participant,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ref {
    display_id: String,
    latest_commit: String,
    repository: Repository,
}

#[derive(Debug, Deserialize)]
struct Repository {
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    clone: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Participant {
    user: User,
}

#[derive(Debug, Deserialize)]
struct User {
    slug: String,
}

impl Repository {
    /// First HTTP(S) clone link; SSH links are skipped
    fn http_clone_url(&self) -> Option<&str> {
        self.links
            .clone
            .iter()
            .find(|link| link.name.starts_with("http") || link.href.starts_with("http"))
            .map(|link| link.href.as_str())
    }
}

impl BbPullRequest {
    fn into_pull_request(self, default_branch: &str) -> Result<PullRequest> {
        let head_clone_url = self
            .from_ref
            .repository
            .http_clone_url()
            .ok_or_else(|| Error::Parse(format!("Pull request {} source has no HTTP clone link", self.id)))?
            .to_string();
        let base_clone_url = self
            .to_ref
            .repository
            .http_clone_url()
            .ok_or_else(|| Error::Parse(format!("Pull request {} target has no HTTP clone link", self.id)))?
            .to_string();

        Ok(PullRequest {
            id: self.id,
            head_ref: self.from_ref.display_id,
            head_sha: self.from_ref.latest_commit,
            head_clone_url,
            base_ref: self.to_ref.display_id,
            base_default_branch: default_branch.to_string(),
            base_clone_url,
            author_slug: self.author.user.slug,
        })
    }
}

impl BitbucketTracker {
    pub fn new(config: &Config, secrets: &Secrets) -> Result<Self> {
        let (project, repo) = slug(config)?;
        let (username, token) = credentials(secrets)?;

        let http = Client::builder()
            .user_agent(concat!("stager/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| Error::Auth(format!("Failed to create HTTP client: {}", e)))?;

        info!(server = %config.git_server, project = %project, repo = %repo, "Created Bitbucket client");

        Ok(Self {
            http,
            server: config.git_server.clone(),
            project,
            repo,
            username,
            token,
        })
    }

    /// URL of a repository-scoped REST resource
    fn endpoint(&self, path: &str) -> String {
        format!(
            "https://{}/rest/api/1.0/projects/{}/repos/{}/{}",
            self.server, self.project, self.repo, path
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.token))
            .header(reqwest::header::ACCEPT, "application/json")
    }

    /// Send a request and decode its JSON body
    async fn send<T: DeserializeOwned>(&self, method: Method, url: &str, builder: RequestBuilder) -> Result<T> {
        debug!(method = %method, url = %url, "Bitbucket request");

        let response = builder.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Auth(format!(
                "Bitbucket rejected the credentials for {} ({})",
                self.username, status
            )));
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response".to_string());
            return Err(Error::Status {
                method: if method == Method::GET { "GET" } else { "POST" },
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| Error::Parse(format!("Failed to parse response from {}: {}", url, e)))
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let builder = self.request(Method::GET, url).query(query);
        self.send(Method::GET, url, builder).await
    }

    async fn post(&self, url: &str, body: Option<serde_json::Value>) -> Result<serde_json::Value> {
        let mut builder = self.request(Method::POST, url);
        builder = match body {
            Some(body) => builder.json(&body),
            None => builder.header(reqwest::header::CONTENT_TYPE, "application/json"),
        };
        self.send(Method::POST, url, builder).await
    }

    async fn fetch_default_branch(&self) -> Result<String> {
        let branch: Branch = self.get(&self.endpoint("branches/default"), &[]).await?;
        Ok(branch.display_id)
    }

    async fn fetch_open_pull_requests(&self) -> Result<Vec<BbPullRequest>> {
        let url = self.endpoint("pull-requests");
        let mut all = Vec::new();
        let mut start = 0u64;

        loop {
            let page: Page<BbPullRequest> = self
                .get(&url, &[("state", "OPEN".to_string()), ("start", start.to_string())])
                .await?;
            all.extend(page.values);

            match page.next_page_start {
                Some(next) if !page.is_last_page && next > start => start = next,
                _ => break,
            }
        }

        Ok(all)
    }
}

#[async_trait]
impl PullRequestTracker for BitbucketTracker {
    fn name(&self) -> &'static str {
        "bitbucket"
    }

    fn repository_clone_url(&self) -> String {
        format!("https://{}/scm/{}/{}.git", self.server, self.project, self.repo)
    }

    async fn default_branch(&self) -> stager_core::Result<String> {
        Ok(self.fetch_default_branch().await?)
    }

    async fn list_open_pull_requests(&self) -> stager_core::Result<Vec<PullRequest>> {
        let default_branch = self.fetch_default_branch().await?;
        let pulls = self
            .fetch_open_pull_requests()
            .await?
            .into_iter()
            .map(|pr| pr.into_pull_request(&default_branch))
            .collect::<Result<Vec<_>>>()?;

        info!(count = pulls.len(), "Fetched open pull requests from Bitbucket");
        Ok(pulls)
    }

    async fn post_comment(&self, pr_id: u64, text: &str) -> stager_core::Result<()> {
        let url = self.endpoint(&format!("pull-requests/{}/comments", pr_id));
        self.post(&url, Some(json!({ "text": text }))).await?;
        debug!(pr = pr_id, "Posted comment");
        Ok(())
    }

    async fn close_pull_request(&self, pr_id: u64) -> stager_core::Result<()> {
        let pr_url = self.endpoint(&format!("pull-requests/{}", pr_id));
        let current: BbPullRequest = self.get(&pr_url, &[]).await?;

        let url = format!("{}/decline?version={}", pr_url, current.version);
        self.post(&url, None).await?;
        info!(pr = pr_id, version = current.version, "Declined pull request");
        Ok(())
    }

    async fn create_alert_issue(&self, title: &str, body: &str) -> stager_core::Result<()> {
        // Bitbucket Server has no issue tracker
        error!(
            project = %self.project,
            repo = %self.repo,
            title = %title,
            body = %body,
            "Staging alert"
        );
        Ok(())
    }
}
