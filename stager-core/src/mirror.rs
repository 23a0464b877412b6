//! Mirror naming, path confinement and per-branch staging types

use std::fmt;
use std::path::{Component, Path, PathBuf};

use tracing::info;

use crate::{Error, Result};

/// A filesystem-safe mirror directory name
///
/// Every character outside `[A-Za-z0-9_]` is rewritten to `_`, so a name
/// can never contain a path separator or be `.`/`..`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MirrorName(String);

impl MirrorName {
    /// Sanitize an arbitrary string into a mirror name
    pub fn new(raw: &str) -> Result<Self> {
        let name: String = raw
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();

        if name.is_empty() {
            return Err(Error::Config("Mirror name must not be empty".to_string()));
        }

        Ok(Self(name))
    }

    /// Name for a pull request mirror: `<author>:<head branch>` sanitized
    pub fn for_pull_request(author_slug: &str, head_ref: &str) -> Result<Self> {
        Self::new(&format!("{}:{}", author_slug, head_ref))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MirrorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The directory under which every mirror lives
#[derive(Debug, Clone)]
pub struct MirrorRoot {
    root: PathBuf,
}

impl MirrorRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Path of the mirror directory for `name`
    pub fn dir_for(&self, name: &MirrorName) -> Result<PathBuf> {
        self.confined(name.as_str())
    }

    /// Join a raw entry name onto the root, refusing anything that is not a
    /// single normal path component
    pub fn confined(&self, entry: &str) -> Result<PathBuf> {
        let mut components = Path::new(entry).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(entry)),
            _ => Err(Error::Config(format!(
                "Refusing to touch '{}': not a direct child of mirror root {}",
                entry,
                self.root.display()
            ))),
        }
    }

    /// Irreversibly delete one mirror entry
    ///
    /// Directories are removed recursively; symlinks and files are unlinked
    /// without following them. A missing entry is not an error.
    pub fn remove(&self, entry: &str) -> Result<()> {
        let path = self.confined(entry)?;

        let metadata = match std::fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::Io(e)),
        };

        if metadata.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }

        info!(path = %path.display(), "Removed mirror");
        Ok(())
    }
}

/// What a tracked branch represents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchKind {
    /// The repository's trunk branch; fast-forward only
    Default,
    /// An open pull request's head branch
    PullRequest {
        /// Tracker-assigned pull request id
        id: u64,
        /// Commit the pull request head currently points at
        head_sha: String,
    },
}

/// One unit of staging work, rebuilt every pass
#[derive(Debug, Clone)]
pub struct TrackedBranch {
    /// Branch to check out from the source repository
    pub name: String,
    /// Credentialed clone URL of the source (remote `origin`)
    pub source_clone_url: String,
    /// Sanitized mirror directory name
    pub mirror_name: MirrorName,
    /// Mirror directory, a direct child of the mirror root
    pub mirror_dir: PathBuf,
    /// Branch on `upstream` the mirror must contain
    pub dest_branch: String,
    /// Credentialed clone URL of the destination (remote `upstream`)
    pub upstream_clone_url: String,
    pub kind: BranchKind,
}

impl TrackedBranch {
    /// Remote-tracking ref of the destination branch
    pub fn upstream_ref(&self) -> String {
        format!("upstream/{}", self.dest_branch)
    }

    pub fn is_default(&self) -> bool {
        matches!(self.kind, BranchKind::Default)
    }
}

/// Result of reconciling one tracked branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingOutcome {
    /// Mirror already matched its remote tip
    StagedNoChange,
    /// Mirror existed and was moved to a new tip
    StagedUpdated,
    /// Mirror was cloned this pass
    StagedNew,
    /// Mirror was dangerously behind upstream and was deleted
    UnstagedDiscarded,
    /// Default branch could not be fast-forwarded; an alert was filed
    AlertRaised,
}

impl StagingOutcome {
    /// Whether a mirror directory is left on disk
    pub fn is_staged(&self) -> bool {
        !matches!(self, StagingOutcome::UnstagedDiscarded)
    }
}

impl fmt::Display for StagingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StagingOutcome::StagedNoChange => "staged (no change)",
            StagingOutcome::StagedUpdated => "staged (updated)",
            StagingOutcome::StagedNew => "staged (new)",
            StagingOutcome::UnstagedDiscarded => "unstaged (discarded)",
            StagingOutcome::AlertRaised => "alert raised",
        };
        f.write_str(s)
    }
}
