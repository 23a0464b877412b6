//! Stager CLI - keeps pull-request branch mirrors staged on disk
//!
//! Meant to be run periodically by an external scheduler; each invocation is
//! one idempotent reconciliation pass.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use stager_core::config::Overrides;
use stager_core::{Backend, Config, Secrets};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Stager: clone, update and retire per-pull-request mirrors
#[derive(Parser, Debug)]
#[command(name = "stager")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.config/stager/config.toml)
    #[arg(long, global = true, env = "STAGER_CONFIG")]
    config: Option<PathBuf>,

    /// Repository in project/repo form
    #[arg(long, global = true, env = "STAGER_REPO_SLUG")]
    repo_slug: Option<String>,

    /// Tracking service: bitbucket or github
    #[arg(long, global = true, env = "STAGER_BACKEND")]
    backend: Option<Backend>,

    /// Hostname of the git server
    #[arg(long, global = true, env = "STAGER_GIT_SERVER")]
    git_server: Option<String>,

    /// Directory holding the mirrors
    #[arg(long, global = true, env = "STAGER_MIRROR_ROOT")]
    mirror_root: Option<PathBuf>,

    /// Pass deadline in whole seconds
    #[arg(long, global = true, env = "STAGER_TIMEOUT")]
    timeout: Option<String>,

    /// Path to the git executable
    #[arg(long, global = true, env = "STAGER_GIT_PATH")]
    git_path: Option<String>,

    /// Hostname to report in staging comments
    #[arg(long, global = true, env = "STAGER_HOSTNAME")]
    hostname: Option<String>,

    /// Account for the git server and its API
    #[arg(long, global = true, env = "STAGER_USERNAME")]
    username: Option<String>,

    /// Access token for the git server and its API
    #[arg(long, global = true, env = "STAGER_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Skip TLS certificate verification for the tracking API
    #[arg(long, global = true, env = "STAGER_INSECURE_TLS")]
    insecure_tls: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one reconciliation pass (default)
    #[command(visible_alias = "r")]
    Run,

    /// Show the effective configuration
    Config,

    /// Show version information
    Version,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            repo_slug: self.repo_slug.clone(),
            backend: self.backend,
            git_server: self.git_server.clone(),
            mirror_root: self.mirror_root.clone(),
            timeout: self.timeout.clone(),
            git_path: self.git_path.clone(),
            hostname: self.hostname.clone().or_else(system_hostname),
            insecure_tls: self.insecure_tls,
        }
    }

    fn load(&self) -> anyhow::Result<(Config, Secrets)> {
        let config = Config::load_with_overrides(self.config.as_deref(), self.overrides())?;
        let secrets = Secrets::load()?.with_overrides(self.username.clone(), self.access_token.clone());
        Ok((config, secrets))
    }
}

/// Hostname of this machine, if it can be read
fn system_hostname() -> Option<String> {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match dispatch(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            eprintln!();
            eprintln!("Hint: check STAGER_USERNAME, STAGER_ACCESS_TOKEN and STAGER_REPO_SLUG,");
            eprintln!("      or the config and secrets files under ~/.config/stager/");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Version) => {
            println!("stager {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Config) => {
            let (config, secrets) = cli.load()?;
            commands::config::show(&config, &secrets, cli.config.as_deref());
            Ok(())
        }
        Some(Commands::Run) | None => {
            let (config, secrets) = cli.load()?;
            commands::run::execute(&config, &secrets, cli.verbose).await
        }
    }
}
