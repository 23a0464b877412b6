//! Config command - print the effective configuration

use std::path::Path;

use stager_core::{Config, Secrets};

pub fn show(config: &Config, secrets: &Secrets, explicit_path: Option<&Path>) {
    println!("Stager Configuration");
    println!("====================");
    println!();
    println!("  repo_slug:   {}", config.repo_slug.as_deref().unwrap_or("(not set)"));
    println!("  backend:     {}", config.backend);
    println!("  git_server:  {}", config.git_server);
    println!("  mirror_root: {}", config.mirror_root.display());
    println!("  timeout:     {}s", config.timeout_secs);
    println!("  safe_dirs:   {}", config.safe_dirs.join(", "));
    println!("  git_path:    {}", config.git_path);
    println!("  hostname:    {}", config.hostname.as_deref().unwrap_or("(unknown)"));
    println!("  verify_tls:  {}", config.verify_tls);
    println!();
    println!("Credentials:");
    println!("  username:     {}", secrets.username.as_deref().unwrap_or("(not set)"));
    println!("  access_token: {}", mask(secrets.access_token.as_deref()));
    println!();

    let path = explicit_path
        .map(Path::to_path_buf)
        .or_else(Config::default_config_path);
    if let Some(path) = path {
        println!("Config file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found - using defaults)");
        }
    }
    if let Some(path) = Secrets::default_secrets_path() {
        println!("Secrets file: {}", path.display());
    }
}

fn mask(token: Option<&str>) -> String {
    match token {
        None | Some("") => "(not set)".to_string(),
        Some(t) if t.chars().count() <= 4 => "****".to_string(),
        Some(t) => {
            let tail: String = t.chars().skip(t.chars().count() - 4).collect();
            format!("****{}", tail)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask() {
        assert_eq!(mask(None), "(not set)");
        assert_eq!(mask(Some("abc")), "****");
        assert_eq!(mask(Some("ghp_secretvalue1234")), "****1234");
    }
}
