//! Git operations for Stager
//!
//! All mutations of a mirror directory go through [`MirrorGit`]. The
//! production implementation, [`GitCli`], runs the git executable as a child
//! process bounded by the pass [`crate::Deadline`].

mod cli;

use std::path::Path;

use async_trait::async_trait;

use crate::mirror::TrackedBranch;
use crate::Result;

pub use cli::GitCli;

/// Operations the reconciler needs on one mirror directory
#[async_trait]
pub trait MirrorGit: Send + Sync {
    /// Whether `dir` is already a working tree of `branch`
    fn is_staged(&self, dir: &Path, branch: &str) -> bool {
        crate::classify::is_staged(dir, branch)
    }

    /// Clone the branch's source into its mirror directory and add the
    /// `upstream` remote
    async fn clone_mirror(&self, branch: &TrackedBranch) -> Result<()>;

    /// Fetch both `origin` and `upstream`
    async fn fetch(&self, dir: &Path) -> Result<()>;

    /// Fast-forward onto `upstream/<dest_branch>`
    ///
    /// Returns `false`, not an error, when git refuses to fast-forward.
    async fn rebase(&self, dir: &Path, dest_branch: &str) -> Result<bool>;

    /// Force the checked-out branch to `origin/<branch>`
    async fn reset_hard(&self, dir: &Path, branch: &str) -> Result<()>;

    /// Commit hash of HEAD
    async fn local_sha(&self, dir: &Path) -> Result<String>;

    /// Whether HEAD is equal to or a descendant of `reference`
    async fn is_ancestor_of(&self, dir: &Path, reference: &str) -> Result<bool>;
}
