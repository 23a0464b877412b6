//! Reconciliation driver
//!
//! One pass stages the default branch, lists open pull requests, removes
//! mirrors whose pull requests are gone, and stages every open pull request.
//! Within a branch the order is fixed: git mutation, then safety check, then
//! discard, then tracker notifications. Any error aborts the whole pass.

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::{info, warn};

use crate::classify::{decide, is_safe, MirrorAction};
use crate::config::Config;
use crate::credentials::authenticated_url;
use crate::deadline::Deadline;
use crate::gc::collect_garbage;
use crate::git::MirrorGit;
use crate::mirror::{BranchKind, MirrorName, MirrorRoot, StagingOutcome, TrackedBranch};
use crate::secrets::Secrets;
use crate::tracker::{PullRequest, PullRequestTracker};
use crate::{Error, Result};

/// Outcome for one pull request in a pass
#[derive(Debug, Clone)]
pub struct PullRequestReport {
    pub id: u64,
    pub mirror: MirrorName,
    pub outcome: StagingOutcome,
}

/// Everything one pass did
#[derive(Debug, Clone)]
pub struct PassReport {
    pub default_branch: String,
    pub default_outcome: StagingOutcome,
    pub pull_requests: Vec<PullRequestReport>,
    /// Mirror entries removed by garbage collection
    pub removed: Vec<String>,
}

/// Drives one reconciliation pass
pub struct Reconciler<'a> {
    config: &'a Config,
    root: MirrorRoot,
    git: &'a dyn MirrorGit,
    tracker: &'a dyn PullRequestTracker,
    deadline: Deadline,
    username: String,
    token: String,
    hostname: String,
}

impl std::fmt::Debug for Reconciler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("root", &self.root)
            .field("tracker", &self.tracker.name())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl<'a> Reconciler<'a> {
    /// Create a reconciler; fails if credentials are missing
    pub fn new(
        config: &'a Config,
        secrets: &Secrets,
        git: &'a dyn MirrorGit,
        tracker: &'a dyn PullRequestTracker,
        deadline: Deadline,
    ) -> Result<Self> {
        let (username, token) = secrets.require()?;

        Ok(Self {
            config,
            root: MirrorRoot::new(&config.mirror_root),
            git,
            tracker,
            deadline,
            username: username.to_string(),
            token: token.to_string(),
            hostname: config
                .hostname
                .clone()
                .unwrap_or_else(|| "localhost".to_string()),
        })
    }

    /// Run one full pass
    pub async fn run_pass(&self) -> Result<PassReport> {
        info!(
            tracker = self.tracker.name(),
            root = %self.root.path().display(),
            budget_secs = self.deadline.budget().as_secs(),
            "Starting reconciliation pass"
        );

        let (default_branch, default_outcome, pulls) = self
            .deadline
            .run(async {
                let default_branch = self.tracker.default_branch().await?;
                let outcome = self.stage_default_branch(&default_branch).await?;
                let pulls = self.tracker.list_open_pull_requests().await?;
                Ok((default_branch, outcome, pulls))
            })
            .await?;

        info!(count = pulls.len(), "Fetched open pull requests");

        let mut protected = self.config.safe_dirs.clone();
        protected.push(MirrorName::new(&default_branch)?.to_string());

        let mut stageable = Vec::with_capacity(pulls.len());
        for pr in pulls {
            let name = pr.mirror_name()?;
            if protected.iter().any(|p| p == name.as_str()) {
                warn!(
                    pr = pr.id,
                    mirror = %name,
                    "Skipping pull request whose mirror name is reserved"
                );
                continue;
            }
            stageable.push(pr);
        }
        let pulls = stageable;

        let desired = pulls
            .iter()
            .map(|pr| pr.mirror_name().map(|n| n.to_string()))
            .collect::<Result<BTreeSet<_>>>()?;
        let removed = collect_garbage(&self.root, &desired, &protected)?;

        let pull_requests = self
            .deadline
            .run(async {
                let mut reports = Vec::with_capacity(pulls.len());
                for pr in &pulls {
                    let outcome = self.stage_pull_request(pr).await?;
                    reports.push(PullRequestReport {
                        id: pr.id,
                        mirror: pr.mirror_name()?,
                        outcome,
                    });
                }
                Ok(reports)
            })
            .await?;

        info!(
            default_outcome = %default_outcome,
            pull_requests = pull_requests.len(),
            removed = removed.len(),
            "Reconciliation pass complete"
        );

        Ok(PassReport {
            default_branch,
            default_outcome,
            pull_requests,
            removed,
        })
    }

    /// Clone or fast-forward the default branch mirror
    ///
    /// A refused fast-forward files an alert and is not an error.
    pub async fn stage_default_branch(&self, name: &str) -> Result<StagingOutcome> {
        let mirror_name = MirrorName::new(name)?;
        let clone_url = self.credentialed(&self.tracker.repository_clone_url())?;
        let branch = TrackedBranch {
            name: name.to_string(),
            source_clone_url: clone_url.clone(),
            mirror_dir: self.root.dir_for(&mirror_name)?,
            mirror_name,
            dest_branch: name.to_string(),
            upstream_clone_url: clone_url,
            kind: BranchKind::Default,
        };

        info!(branch = %name, "Staging default branch");
        let outcome = self.apply(&branch).await?;

        if outcome == StagingOutcome::AlertRaised {
            let title = format!("Default branch `{}` could not be fast-forwarded", branch.name);
            let body = format!(
                "The mirror at `{}` on {} could not be fast-forwarded to `{}`.\n\n\
                 This usually means the branch history was rewritten upstream. \
                 The mirror was left untouched.\n\nDetected at {}.",
                branch.mirror_dir.display(),
                self.hostname,
                branch.upstream_ref(),
                Utc::now().to_rfc3339(),
            );
            warn!(branch = %branch.name, "Default branch diverged from upstream, raising alert");
            self.tracker.create_alert_issue(&title, &body).await?;
        }

        Ok(outcome)
    }

    /// Stage one pull request and act on the safety check
    pub async fn stage_pull_request(&self, pr: &PullRequest) -> Result<StagingOutcome> {
        let mirror_name = pr.mirror_name()?;
        let branch = TrackedBranch {
            name: pr.head_ref.clone(),
            source_clone_url: self.credentialed(&pr.head_clone_url)?,
            mirror_dir: self.root.dir_for(&mirror_name)?,
            mirror_name,
            dest_branch: pr.base_ref.clone(),
            upstream_clone_url: self.credentialed(&pr.base_clone_url)?,
            kind: BranchKind::PullRequest {
                id: pr.id,
                head_sha: pr.head_sha.clone(),
            },
        };

        info!(pr = pr.id, mirror = %branch.mirror_name, "Staging pull request");
        let outcome = self.apply(&branch).await?;

        let upstream_ref = branch.upstream_ref();
        if !is_safe(self.git, &branch.mirror_dir, &upstream_ref).await? {
            warn!(
                pr = pr.id,
                mirror = %branch.mirror_name,
                upstream = %upstream_ref,
                "Mirror is dangerously behind upstream, discarding"
            );
            self.root.remove(branch.mirror_name.as_str())?;
            self.tracker
                .post_comment(pr.id, &behind_comment(&branch.mirror_name))
                .await?;
            self.tracker.close_pull_request(pr.id).await?;
            return Ok(StagingOutcome::UnstagedDiscarded);
        }

        if outcome == StagingOutcome::StagedNoChange {
            info!(pr = pr.id, mirror = %branch.mirror_name, "Nothing to do");
            return Ok(outcome);
        }

        let sha = self.git.local_sha(&branch.mirror_dir).await?;
        let comment = staged_comment(&branch.mirror_name, &sha, &self.hostname);
        self.tracker.post_comment(pr.id, &comment).await?;
        info!(pr = pr.id, mirror = %branch.mirror_name, sha = %sha, outcome = %outcome, "Staged");

        Ok(outcome)
    }

    /// Run the classifier's git steps for `branch`
    ///
    /// Returns [`StagingOutcome::AlertRaised`] if a fast-forward was refused;
    /// the caller decides what to do about it.
    async fn apply(&self, branch: &TrackedBranch) -> Result<StagingOutcome> {
        let dir = &branch.mirror_dir;
        let staged = self.git.is_staged(dir, &branch.name);
        let mut outcome = StagingOutcome::StagedNoChange;

        for action in decide(&branch.kind, staged) {
            match action {
                MirrorAction::Clone => {
                    self.clone_fresh(branch).await?;
                    outcome = StagingOutcome::StagedNew;
                }
                MirrorAction::FetchRebase => {
                    let before = self.git.local_sha(dir).await?;
                    self.git.fetch(dir).await?;
                    if !self.git.rebase(dir, &branch.dest_branch).await? {
                        return Ok(StagingOutcome::AlertRaised);
                    }
                    if outcome != StagingOutcome::StagedNew && self.git.local_sha(dir).await? != before {
                        outcome = StagingOutcome::StagedUpdated;
                    }
                }
                MirrorAction::FetchResetIfChanged => {
                    let BranchKind::PullRequest { head_sha, .. } = &branch.kind else {
                        return Err(Error::Other(format!(
                            "Refusing to hard-reset default branch mirror {}",
                            dir.display()
                        )));
                    };

                    self.git.fetch(dir).await?;
                    let local = self.git.local_sha(dir).await?;
                    if &local != head_sha {
                        info!(mirror = %branch.mirror_name, from = %local, to = %head_sha, "Resetting to new head");
                        self.git.reset_hard(dir, &branch.name).await?;
                        outcome = StagingOutcome::StagedUpdated;
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Clone, first clearing anything at the mirror path that is not a
    /// mirror of this branch
    async fn clone_fresh(&self, branch: &TrackedBranch) -> Result<()> {
        if std::fs::symlink_metadata(&branch.mirror_dir).is_ok() {
            warn!(
                dir = %branch.mirror_dir.display(),
                branch = %branch.name,
                "Replacing leftover directory that is not a mirror of this branch"
            );
            self.root.remove(branch.mirror_name.as_str())?;
        }

        self.git.clone_mirror(branch).await
    }

    fn credentialed(&self, clone_url: &str) -> Result<String> {
        authenticated_url(clone_url, &self.username, &self.token)
    }
}

/// Comment posted when a mirror was created or moved
pub fn staged_comment(mirror: &MirrorName, sha: &str, hostname: &str) -> String {
    format!(":bell: Staged `{}` at revision {} on {}", mirror, sha, hostname)
}

/// Comment posted before a dangerously-behind pull request is closed
pub fn behind_comment(mirror: &MirrorName) -> String {
    format!(":boom: Unstaged since `{}` is dangerously behind upstream.", mirror)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// In-memory git: mirrors are empty directories plus a recorded SHA
    #[derive(Default)]
    struct FakeGit {
        state: Mutex<GitState>,
    }

    #[derive(Default)]
    struct GitState {
        /// Current local tip per mirror directory
        local: HashMap<PathBuf, String>,
        /// Tip of `origin/<branch>` after a fetch
        origin: HashMap<String, String>,
        /// Mirrors that do not contain their upstream ref
        behind: HashSet<PathBuf>,
        refuse_fast_forward: bool,
        fail_fetch: bool,
        hang_fetch: bool,
        calls: Vec<String>,
    }

    impl FakeGit {
        fn with_origin(self, branch: &str, sha: &str) -> Self {
            self.state.lock().unwrap().origin.insert(branch.to_string(), sha.to_string());
            self
        }

        fn stage_existing(&self, dir: &Path, sha: &str) {
            std::fs::create_dir_all(dir).unwrap();
            self.state.lock().unwrap().local.insert(dir.to_path_buf(), sha.to_string());
        }

        fn mark_behind(&self, dir: &Path) {
            self.state.lock().unwrap().behind.insert(dir.to_path_buf());
        }

        fn calls(&self) -> Vec<String> {
            self.state.lock().unwrap().calls.clone()
        }

        fn count(&self, op: &str) -> usize {
            self.calls().iter().filter(|c| c.starts_with(op)).count()
        }

        fn record(&self, call: String) {
            self.state.lock().unwrap().calls.push(call);
        }
    }

    #[async_trait]
    impl MirrorGit for FakeGit {
        fn is_staged(&self, dir: &Path, _branch: &str) -> bool {
            dir.exists() && self.state.lock().unwrap().local.contains_key(dir)
        }

        async fn clone_mirror(&self, branch: &TrackedBranch) -> Result<()> {
            self.record(format!("clone {}", branch.mirror_name));
            std::fs::create_dir_all(&branch.mirror_dir)?;
            let mut state = self.state.lock().unwrap();
            let sha = state.origin.get(&branch.name).cloned().unwrap_or_default();
            state.local.insert(branch.mirror_dir.clone(), sha);
            Ok(())
        }

        async fn fetch(&self, dir: &Path) -> Result<()> {
            self.record(format!("fetch {}", dir.display()));
            let (fail, hang) = {
                let state = self.state.lock().unwrap();
                (state.fail_fetch, state.hang_fetch)
            };
            if hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if fail {
                return Err(Error::Git {
                    command: "fetch --prune origin".to_string(),
                    code: Some(128),
                    stderr: "fatal: unable to access".to_string(),
                });
            }
            Ok(())
        }

        async fn rebase(&self, dir: &Path, dest_branch: &str) -> Result<bool> {
            self.record(format!("rebase {}", dir.display()));
            let mut state = self.state.lock().unwrap();
            if state.refuse_fast_forward {
                return Ok(false);
            }
            let sha = state.origin.get(dest_branch).cloned().unwrap_or_default();
            state.local.insert(dir.to_path_buf(), sha);
            Ok(true)
        }

        async fn reset_hard(&self, dir: &Path, branch: &str) -> Result<()> {
            self.record(format!("reset {}", dir.display()));
            let mut state = self.state.lock().unwrap();
            let sha = state.origin.get(branch).cloned().unwrap_or_default();
            state.local.insert(dir.to_path_buf(), sha);
            Ok(())
        }

        async fn local_sha(&self, dir: &Path) -> Result<String> {
            Ok(self.state.lock().unwrap().local.get(dir).cloned().unwrap_or_default())
        }

        async fn is_ancestor_of(&self, dir: &Path, _reference: &str) -> Result<bool> {
            Ok(!self.state.lock().unwrap().behind.contains(dir))
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Comment { id: u64, text: String, mirror_present: bool },
        Close(u64),
        Alert(String),
    }

    struct FakeTracker {
        root: PathBuf,
        default_branch: String,
        pulls: Vec<PullRequest>,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeTracker {
        fn new(root: &Path, pulls: Vec<PullRequest>) -> Self {
            Self {
                root: root.to_path_buf(),
                default_branch: "main".to_string(),
                pulls,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PullRequestTracker for FakeTracker {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn repository_clone_url(&self) -> String {
            "https://git.example.com/scm/ops/puppet.git".to_string()
        }

        async fn default_branch(&self) -> Result<String> {
            Ok(self.default_branch.clone())
        }

        async fn list_open_pull_requests(&self) -> Result<Vec<PullRequest>> {
            Ok(self.pulls.clone())
        }

        async fn post_comment(&self, pr_id: u64, text: &str) -> Result<()> {
            let mirror_present = self
                .pulls
                .iter()
                .find(|pr| pr.id == pr_id)
                .map(|pr| self.root.join(pr.mirror_name().unwrap().as_str()).exists())
                .unwrap_or(false);
            self.calls.lock().unwrap().push(Call::Comment {
                id: pr_id,
                text: text.to_string(),
                mirror_present,
            });
            Ok(())
        }

        async fn close_pull_request(&self, pr_id: u64) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Close(pr_id));
            Ok(())
        }

        async fn create_alert_issue(&self, title: &str, _body: &str) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Alert(title.to_string()));
            Ok(())
        }
    }

    fn pull(id: u64, author: &str, head: &str, sha: &str) -> PullRequest {
        PullRequest {
            id,
            head_ref: head.to_string(),
            head_sha: sha.to_string(),
            head_clone_url: format!("https://git.example.com/scm/~{}/puppet.git", author),
            base_ref: "main".to_string(),
            base_default_branch: "main".to_string(),
            base_clone_url: "https://git.example.com/scm/ops/puppet.git".to_string(),
            author_slug: author.to_string(),
        }
    }

    fn config(root: &Path) -> Config {
        Config {
            repo_slug: Some("ops/puppet".to_string()),
            mirror_root: root.to_path_buf(),
            safe_dirs: vec![".".to_string(), "..".to_string(), "main".to_string()],
            hostname: Some("stage01".to_string()),
            ..Config::default()
        }
    }

    fn secrets() -> Secrets {
        Secrets {
            username: Some("deploy".to_string()),
            access_token: Some("tok".to_string()),
        }
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_unchanged_head_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        let pr = pull(1, "alice", "feature1", "aaa");
        let git = FakeGit::default().with_origin("feature1", "aaa");
        let dir = tmp.path().join("alice_feature1");
        git.stage_existing(&dir, "aaa");
        let tracker = FakeTracker::new(tmp.path(), vec![pr.clone()]);

        let reconciler = Reconciler::new(&cfg, &secrets(), &git, &tracker, deadline()).unwrap();
        let outcome = reconciler.stage_pull_request(&pr).await.unwrap();

        assert_eq!(outcome, StagingOutcome::StagedNoChange);
        assert_eq!(git.count("reset"), 0);
        assert_eq!(git.count("clone"), 0);
        assert!(tracker.calls().is_empty());
        assert!(dir.exists());
    }

    #[tokio::test]
    async fn test_changed_head_resets_once_and_comments_once() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        let pr = pull(2, "alice", "feature1", "bbb");
        let git = FakeGit::default().with_origin("feature1", "bbb");
        git.stage_existing(&tmp.path().join("alice_feature1"), "aaa");
        let tracker = FakeTracker::new(tmp.path(), vec![pr.clone()]);

        let reconciler = Reconciler::new(&cfg, &secrets(), &git, &tracker, deadline()).unwrap();
        let outcome = reconciler.stage_pull_request(&pr).await.unwrap();

        assert_eq!(outcome, StagingOutcome::StagedUpdated);
        assert_eq!(git.count("reset"), 1);
        assert_eq!(
            tracker.calls(),
            vec![Call::Comment {
                id: 2,
                text: ":bell: Staged `alice_feature1` at revision bbb on stage01".to_string(),
                mirror_present: true,
            }]
        );
    }

    #[tokio::test]
    async fn test_new_pull_request_is_cloned_and_announced() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        let pr = pull(3, "bob", "fix/typo", "ccc");
        let git = FakeGit::default().with_origin("fix/typo", "ccc");
        let tracker = FakeTracker::new(tmp.path(), vec![pr.clone()]);

        let reconciler = Reconciler::new(&cfg, &secrets(), &git, &tracker, deadline()).unwrap();
        let outcome = reconciler.stage_pull_request(&pr).await.unwrap();

        assert_eq!(outcome, StagingOutcome::StagedNew);
        assert_eq!(git.calls(), vec!["clone bob_fix_typo".to_string()]);
        assert!(tmp.path().join("bob_fix_typo").exists());
        assert_eq!(tracker.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_leftover_directory_is_replaced_by_clone() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        let pr = pull(4, "bob", "wip", "ddd");
        let leftover = tmp.path().join("bob_wip");
        std::fs::create_dir_all(&leftover).unwrap();
        std::fs::write(leftover.join("half-written"), "x").unwrap();
        let git = FakeGit::default().with_origin("wip", "ddd");
        let tracker = FakeTracker::new(tmp.path(), vec![pr.clone()]);

        let reconciler = Reconciler::new(&cfg, &secrets(), &git, &tracker, deadline()).unwrap();
        let outcome = reconciler.stage_pull_request(&pr).await.unwrap();

        assert_eq!(outcome, StagingOutcome::StagedNew);
        assert!(!leftover.join("half-written").exists());
    }

    #[tokio::test]
    async fn test_stale_but_behind_is_discarded_before_notifying() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        let pr = pull(5, "carol", "old", "eee");
        let git = FakeGit::default().with_origin("old", "eee");
        let dir = tmp.path().join("carol_old");
        git.stage_existing(&dir, "eee");
        git.mark_behind(&dir);
        let tracker = FakeTracker::new(tmp.path(), vec![pr.clone()]);

        let reconciler = Reconciler::new(&cfg, &secrets(), &git, &tracker, deadline()).unwrap();
        let outcome = reconciler.stage_pull_request(&pr).await.unwrap();

        assert_eq!(outcome, StagingOutcome::UnstagedDiscarded);
        assert!(!dir.exists());
        assert_eq!(
            tracker.calls(),
            vec![
                Call::Comment {
                    id: 5,
                    text: ":boom: Unstaged since `carol_old` is dangerously behind upstream.".to_string(),
                    mirror_present: false,
                },
                Call::Close(5),
            ]
        );
    }

    #[tokio::test]
    async fn test_safe_and_discarded_are_exclusive() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        let safe = pull(6, "dave", "a", "111");
        let behind = pull(7, "erin", "b", "222");
        let git = FakeGit::default().with_origin("a", "111").with_origin("b", "333");
        git.stage_existing(&tmp.path().join("erin_b"), "222");
        git.mark_behind(&tmp.path().join("erin_b"));
        let tracker = FakeTracker::new(tmp.path(), vec![safe.clone(), behind.clone()]);

        let reconciler = Reconciler::new(&cfg, &secrets(), &git, &tracker, deadline()).unwrap();
        for pr in [&safe, &behind] {
            let outcome = reconciler.stage_pull_request(pr).await.unwrap();
            let dir = tmp.path().join(pr.mirror_name().unwrap().as_str());
            let closed = tracker.calls().contains(&Call::Close(pr.id));
            match outcome {
                StagingOutcome::UnstagedDiscarded => assert!(!dir.exists() && closed),
                _ => assert!(dir.exists() && !closed),
            }
        }
    }

    #[tokio::test]
    async fn test_default_branch_fast_forward_failure_raises_alert_and_continues() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        let pr = pull(8, "alice", "feature1", "fff");
        let git = FakeGit::default()
            .with_origin("main", "m1")
            .with_origin("feature1", "fff");
        git.state.lock().unwrap().refuse_fast_forward = true;
        let tracker = FakeTracker::new(tmp.path(), vec![pr]);

        let reconciler = Reconciler::new(&cfg, &secrets(), &git, &tracker, deadline()).unwrap();
        let report = reconciler.run_pass().await.unwrap();

        assert_eq!(report.default_outcome, StagingOutcome::AlertRaised);
        let alerts: Vec<_> = tracker
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Alert(_)))
            .collect();
        assert_eq!(alerts, vec![Call::Alert("Default branch `main` could not be fast-forwarded".to_string())]);
        assert_eq!(report.pull_requests.len(), 1);
        assert_eq!(report.pull_requests[0].outcome, StagingOutcome::StagedNew);
        assert_eq!(git.count("reset"), 0);
        assert!(tmp.path().join("main").exists());
    }

    #[tokio::test]
    async fn test_default_branch_fast_forward_updates() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        let git = FakeGit::default().with_origin("main", "m2");
        git.stage_existing(&tmp.path().join("main"), "m1");
        let tracker = FakeTracker::new(tmp.path(), Vec::new());

        let reconciler = Reconciler::new(&cfg, &secrets(), &git, &tracker, deadline()).unwrap();
        assert_eq!(
            reconciler.stage_default_branch("main").await.unwrap(),
            StagingOutcome::StagedUpdated
        );
        assert_eq!(
            reconciler.stage_default_branch("main").await.unwrap(),
            StagingOutcome::StagedNoChange
        );
        assert!(tracker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pass_collects_closed_mirrors() {
        let tmp = TempDir::new().unwrap();
        let cfg = Config {
            safe_dirs: vec![".".to_string(), "..".to_string()],
            ..config(tmp.path())
        };
        let pr = pull(9, "alice", "feature1", "aaa");
        let git = FakeGit::default().with_origin("main", "m1").with_origin("feature1", "aaa");
        git.stage_existing(&tmp.path().join("main"), "m1");
        git.stage_existing(&tmp.path().join("alice_feature1"), "aaa");
        std::fs::create_dir_all(tmp.path().join("bob_old")).unwrap();
        let tracker = FakeTracker::new(tmp.path(), vec![pr]);

        let reconciler = Reconciler::new(&cfg, &secrets(), &git, &tracker, deadline()).unwrap();
        let report = reconciler.run_pass().await.unwrap();

        assert_eq!(report.removed, vec!["bob_old".to_string()]);
        // The default branch mirror is protected even when not allow-listed
        assert!(tmp.path().join("main").exists());
        assert!(tmp.path().join("alice_feature1").exists());
        assert_eq!(report.default_outcome, StagingOutcome::StagedNoChange);
        assert_eq!(report.pull_requests[0].outcome, StagingOutcome::StagedNoChange);
    }

    #[tokio::test]
    async fn test_git_failure_aborts_pass() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        let first = pull(10, "alice", "one", "a1");
        let second = pull(11, "bob", "two", "b1");
        let git = FakeGit::default().with_origin("main", "m1");
        git.stage_existing(&tmp.path().join("alice_one"), "old");
        git.stage_existing(&tmp.path().join("main"), "m1");
        git.state.lock().unwrap().fail_fetch = true;
        let tracker = FakeTracker::new(tmp.path(), vec![first, second]);

        let reconciler = Reconciler::new(&cfg, &secrets(), &git, &tracker, deadline()).unwrap();
        let err = reconciler.run_pass().await.unwrap_err();

        assert!(matches!(err, Error::Git { .. }));
        assert_eq!(git.count("clone"), 0);
        assert!(tracker.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_git_times_out_the_pass() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        let git = FakeGit::default().with_origin("main", "m1");
        git.stage_existing(&tmp.path().join("main"), "m1");
        git.state.lock().unwrap().hang_fetch = true;
        let tracker = FakeTracker::new(tmp.path(), Vec::new());

        let reconciler = Reconciler::new(
            &cfg,
            &secrets(),
            &git,
            &tracker,
            Deadline::after(Duration::from_secs(5)),
        )
        .unwrap();
        let err = reconciler.run_pass().await.unwrap_err();

        assert!(err.is_timeout());
    }

    #[test]
    fn test_missing_credentials_rejected_up_front() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        let git = FakeGit::default();
        let tracker = FakeTracker::new(tmp.path(), Vec::new());

        let result = Reconciler::new(&cfg, &Secrets::default(), &git, &tracker, deadline());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_pull_request_colliding_with_reserved_mirror_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(tmp.path());
        cfg.safe_dirs.push("ops_hotfix".to_string());
        let clash_default = pull(12, "alice", "fix", "a1");
        let clash_safe = pull(13, "ops", "hotfix", "b1");
        let fine = pull(14, "bob", "feature", "c1");
        let git = FakeGit::default()
            .with_origin("alice_fix", "t1")
            .with_origin("fix", "a1")
            .with_origin("feature", "c1");
        let trunk = tmp.path().join("alice_fix");
        git.stage_existing(&trunk, "t1");
        let mut tracker = FakeTracker::new(tmp.path(), vec![clash_default, clash_safe, fine]);
        tracker.default_branch = "alice_fix".to_string();

        let reconciler = Reconciler::new(&cfg, &secrets(), &git, &tracker, deadline()).unwrap();
        let report = reconciler.run_pass().await.unwrap();

        let staged: Vec<u64> = report.pull_requests.iter().map(|pr| pr.id).collect();
        assert_eq!(staged, vec![14]);
        assert_eq!(report.default_outcome, StagingOutcome::StagedNoChange);
        assert_eq!(git.count("reset"), 0);
        assert!(trunk.exists());
        assert!(!tracker
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Comment { id: 12 | 13, .. } | Call::Close(12 | 13))));
    }
}
