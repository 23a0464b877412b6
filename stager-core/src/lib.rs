//! Stager Core - Reconciliation engine for staged branch mirrors
//!
//! This crate keeps one working-tree mirror per open pull request (plus the
//! default branch) cloned, fast-forwarded or reset against its upstream, and
//! removes mirrors that are stale or dangerously behind.

pub mod classify;
pub mod config;
pub mod credentials;
pub mod deadline;
pub mod error;
pub mod gc;
pub mod git;
pub mod mirror;
pub mod reconcile;
pub mod secrets;
pub mod tracker;

pub use classify::{decide, is_safe, is_staged, MirrorAction};
pub use config::{Backend, Config};
pub use credentials::authenticated_url;
pub use deadline::Deadline;
pub use error::{Error, Result};
pub use gc::{collect_garbage, stale_mirrors};
pub use git::{GitCli, MirrorGit};
pub use mirror::{BranchKind, MirrorName, MirrorRoot, StagingOutcome, TrackedBranch};
pub use reconcile::{PassReport, PullRequestReport, Reconciler};
pub use secrets::Secrets;
pub use tracker::{PullRequest, PullRequestTracker};
