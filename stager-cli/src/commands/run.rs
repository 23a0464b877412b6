//! Run command - one reconciliation pass

use anyhow::Context;
use stager_core::{Config, Deadline, GitCli, PassReport, Reconciler, Secrets};

/// Execute one pass and print what it did
pub async fn execute(config: &Config, secrets: &Secrets, verbose: bool) -> anyhow::Result<()> {
    // Credentials are checked before any git or network work
    secrets.require()?;

    let deadline = Deadline::after(config.timeout()?);
    let git = GitCli::new(config.git_path.clone(), deadline);
    let tracker = stager_forge::build_tracker(config, secrets)?;

    if verbose {
        tracing::info!(
            backend = %config.backend,
            repo = ?config.repo_slug,
            root = %config.mirror_root.display(),
            timeout_secs = config.timeout_secs,
            "Configuration loaded"
        );
    }

    let reconciler = Reconciler::new(config, secrets, &git, tracker.as_ref(), deadline)?;
    let report = reconciler
        .run_pass()
        .await
        .context("Reconciliation pass failed")?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &PassReport) {
    println!("Default branch {}: {}", report.default_branch, report.default_outcome);

    for pr in &report.pull_requests {
        println!("  #{:<6} {:<40} {}", pr.id, pr.mirror, pr.outcome);
    }
    for name in &report.removed {
        println!("  removed {}", name);
    }

    println!(
        "{} pull request(s) staged, {} mirror(s) removed",
        report.pull_requests.iter().filter(|pr| pr.outcome.is_staged()).count(),
        report.removed.len()
    );
}
