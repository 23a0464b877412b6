//! Mirror state classification
//!
//! Decides whether a directory already holds a mirror and which git
//! operations bring it up to date.

use std::path::Path;

use git2::Repository;
use tracing::debug;

use crate::git::MirrorGit;
use crate::mirror::BranchKind;
use crate::Result;

/// One step of bringing a mirror up to date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorAction {
    /// Create the mirror from scratch
    Clone,
    /// Fetch, then fast-forward onto upstream
    FetchRebase,
    /// Fetch, then hard-reset if the remote head moved
    FetchResetIfChanged,
}

/// Whether `dir` is itself the root of a working tree with `branch`
/// checked out
///
/// Unlike repository discovery this never looks at parent directories, so a
/// plain subdirectory of some other checkout is not mistaken for a mirror.
pub fn is_staged(dir: &Path, branch: &str) -> bool {
    if !dir.join(".git").exists() {
        return false;
    }

    let repo = match Repository::open(dir) {
        Ok(repo) => repo,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Not a usable git repository");
            return false;
        }
    };

    if repo.is_bare() {
        return false;
    }

    let head = match repo.head() {
        Ok(head) => head,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Repository has no HEAD");
            return false;
        }
    };

    head.is_branch() && head.shorthand() == Some(branch)
}

/// The ordered git steps for a branch of the given kind
///
/// The default branch is only ever fast-forwarded; pull request branches
/// are expected to be force-pushed and are reset instead.
pub fn decide(kind: &BranchKind, staged: bool) -> &'static [MirrorAction] {
    match (kind, staged) {
        (BranchKind::Default, false) => &[MirrorAction::Clone, MirrorAction::FetchRebase],
        (BranchKind::Default, true) => &[MirrorAction::FetchRebase],
        (BranchKind::PullRequest { .. }, false) => &[MirrorAction::Clone],
        (BranchKind::PullRequest { .. }, true) => &[MirrorAction::FetchResetIfChanged],
    }
}

/// Whether the mirror at `dir` still contains `upstream_ref`
///
/// Checked after the mirror was updated, to validate the result.
pub async fn is_safe(git: &dyn MirrorGit, dir: &Path, upstream_ref: &str) -> Result<bool> {
    git.is_ancestor_of(dir, upstream_ref).await
}
