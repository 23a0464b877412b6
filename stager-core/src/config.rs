//! Configuration management for Stager
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags (which also read `STAGER_*` environment variables)
//! 2. Config file (~/.config/stager/config.toml)
//! 3. Default values
//!
//! The resulting [`Config`] is built once at startup and passed by reference;
//! nothing in this crate reads the process environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::deadline::MAX_BUDGET;
use crate::{Error, Result};

/// Default pass deadline in seconds
pub const DEFAULT_TIMEOUT_SECS: i64 = 120;

/// Which pull-request tracking service hosts the repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Self-hosted Bitbucket Server REST API
    #[default]
    Bitbucket,
    /// GitHub or GitHub Enterprise
    Github,
}

impl std::str::FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bitbucket" => Ok(Backend::Bitbucket),
            "github" => Ok(Backend::Github),
            other => Err(Error::Config(format!(
                "Unknown backend '{}'. Expected 'bitbucket' or 'github'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Bitbucket => f.write_str("bitbucket"),
            Backend::Github => f.write_str("github"),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Repository identifier in `project/repo` form
    pub repo_slug: Option<String>,

    /// Tracking service backend
    pub backend: Backend,

    /// Hostname of the git server
    pub git_server: String,

    /// Directory holding one subdirectory per mirror
    pub mirror_root: PathBuf,

    /// Pass deadline in seconds; must be positive
    pub timeout_secs: i64,

    /// Mirror directory names that are never garbage collected
    pub safe_dirs: Vec<String>,

    /// Path to the git executable
    pub git_path: String,

    /// Hostname reported in staging comments
    pub hostname: Option<String>,

    /// Verify TLS certificates of the tracking API
    pub verify_tls: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repo_slug: None,
            backend: Backend::default(),
            git_server: "github.com".to_string(),
            mirror_root: PathBuf::from("/opt/puppet/environments"),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            safe_dirs: [".", "..", "master", "main", "production"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            git_path: "git".to_string(),
            hostname: None,
            verify_tls: true,
        }
    }
}

/// Overrides collected from the command line and environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub repo_slug: Option<String>,
    pub backend: Option<Backend>,
    pub git_server: Option<String>,
    pub mirror_root: Option<PathBuf>,
    /// Raw timeout value; parsed and validated by [`parse_timeout`]
    pub timeout: Option<String>,
    pub git_path: Option<String>,
    pub hostname: Option<String>,
    pub insecure_tls: bool,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config {}: {}", path.display(), e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/stager/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("stager").join("config.toml"))
    }

    /// Apply CLI flag overrides
    pub fn with_overrides(mut self, overrides: Overrides) -> Result<Self> {
        if let Some(slug) = overrides.repo_slug {
            self.repo_slug = Some(slug);
        }
        if let Some(backend) = overrides.backend {
            self.backend = backend;
        }
        if let Some(server) = overrides.git_server {
            self.git_server = server;
        }
        if let Some(root) = overrides.mirror_root {
            self.mirror_root = root;
        }
        if let Some(raw) = overrides.timeout {
            self.timeout_secs = parse_timeout(&raw)?.as_secs() as i64;
        }
        if let Some(git) = overrides.git_path {
            self.git_path = git;
        }
        if let Some(host) = overrides.hostname {
            self.hostname = Some(host);
        }
        if overrides.insecure_tls {
            self.verify_tls = false;
        }

        Ok(self)
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > config file > defaults
    pub fn load_with_overrides(path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let base = match path {
            Some(p) => Self::load_from_file(p)?,
            None => Self::load()?,
        };
        let config = base.with_overrides(overrides)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value the engine depends on before any git or network work
    pub fn validate(&self) -> Result<()> {
        self.slug_parts()?;
        self.timeout()?;

        if self.git_server.trim().is_empty() || self.git_server.contains('/') {
            return Err(Error::Config(format!(
                "Invalid git server '{}'. Expected a bare hostname such as bitbucket.example.com",
                self.git_server
            )));
        }
        if !self.mirror_root.is_absolute() {
            return Err(Error::Config(format!(
                "Mirror root must be an absolute path, got {}",
                self.mirror_root.display()
            )));
        }
        if self.git_path.trim().is_empty() {
            return Err(Error::Config("git_path must not be empty".to_string()));
        }

        Ok(())
    }

    /// Split the repository slug into `(project, repo)`
    pub fn slug_parts(&self) -> Result<(&str, &str)> {
        let slug = self.repo_slug.as_deref().ok_or_else(|| {
            Error::Config("Repository slug not set. Use --repo-slug or STAGER_REPO_SLUG".to_string())
        })?;

        match slug.split_once('/') {
            Some((project, repo))
                if !project.is_empty() && !repo.is_empty() && !repo.contains('/') =>
            {
                Ok((project, repo))
            }
            _ => Err(Error::Config(format!(
                "Invalid repository slug '{}'. Expected project/repo",
                slug
            ))),
        }
    }

    /// The pass deadline as a duration
    pub fn timeout(&self) -> Result<Duration> {
        checked_timeout(self.timeout_secs)
    }
}

/// Parse a pass deadline given in whole seconds
///
/// Non-numeric, zero and negative values are configuration errors.
pub fn parse_timeout(raw: &str) -> Result<Duration> {
    let secs: i64 = raw.trim().parse().map_err(|_| {
        Error::Config(format!("timeout must be a whole number of seconds, got '{}'", raw))
    })?;

    checked_timeout(secs)
}

fn checked_timeout(secs: i64) -> Result<Duration> {
    if secs <= 0 {
        return Err(Error::Config(format!(
            "timeout must be greater than zero seconds, got {}",
            secs
        )));
    }

    let timeout = Duration::from_secs(secs as u64);
    if timeout > MAX_BUDGET {
        return Err(Error::Config(format!(
            "timeout must be at most {} seconds, got {}",
            MAX_BUDGET.as_secs(),
            secs
        )));
    }

    Ok(timeout)
}
