//! Secrets management for Stager
//!
//! Credentials are stored separately from configuration to avoid accidental
//! sharing. The secrets file is located at `~/.config/stager/secrets.toml` and
//! must have restrictive permissions (0600 on Unix).
//!
//! Loading priority:
//! 1. CLI flags / `STAGER_USERNAME` and `STAGER_ACCESS_TOKEN`
//! 2. Secrets file (~/.config/stager/secrets.toml)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Credentials for the git server and its tracking API
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Secrets {
    /// Account name used for API calls and clone URLs
    pub username: Option<String>,
    /// Personal access token or app password
    pub access_token: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("username", &self.username)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Secrets {
    /// Load secrets from the default location
    ///
    /// Returns default (empty) secrets if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::default_secrets_path() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load secrets from a specific file with permission checking
    pub fn load_from_file(path: &Path) -> Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let metadata = std::fs::metadata(path).map_err(Error::Io)?;
            let mode = metadata.permissions().mode();

            if mode & 0o077 != 0 {
                return Err(Error::Config(format!(
                    "Secrets file {} has insecure permissions {:o}. \
                     Please run: chmod 600 {}",
                    path.display(),
                    mode & 0o777,
                    path.display()
                )));
            }

            debug!(path = %path.display(), mode = format!("{:o}", mode & 0o777), "Secrets file permissions OK");
        }

        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        let mut secrets: Secrets = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse secrets: {}", e)))?;

        secrets.username = secrets.username.map(|u| u.trim().to_string());
        secrets.access_token = secrets.access_token.map(|t| t.trim().to_string());

        Ok(secrets)
    }

    /// Get the default secrets file path
    ///
    /// Returns `~/.config/stager/secrets.toml` on Unix
    pub fn default_secrets_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("stager").join("secrets.toml"))
    }

    /// Apply values given on the command line or through the environment
    pub fn with_overrides(mut self, username: Option<String>, access_token: Option<String>) -> Self {
        if let Some(user) = username.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) {
            debug!("Using username from command line or environment");
            self.username = Some(user);
        }
        if let Some(token) = access_token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
            debug!("Using access token from command line or environment");
            self.access_token = Some(token);
        }
        self
    }

    /// Both credentials, or a configuration error naming what is missing
    pub fn require(&self) -> Result<(&str, &str)> {
        let username = self
            .username
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::Config("username not set (STAGER_USERNAME)".to_string()))?;
        let token = self
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Config("access token not set (STAGER_ACCESS_TOKEN)".to_string()))?;
        Ok((username, token))
    }
}
