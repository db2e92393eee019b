use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use stowage_backend::SwiftConfig;
use stowage_snapshot::{ManagerConfig, DEFAULT_CONTAINER};

use crate::cli::Cli;

pub const CONFIG_FILE_NAME: &str = ".stowage.toml";

/// Settings read from the config file, then overridden by flags.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub user: String,
    pub password: String,
    pub auth_url: String,
    pub container: String,
    pub chunk_size: usize,
    pub upload_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        let manager = ManagerConfig::default();
        Self {
            user: String::new(),
            password: String::new(),
            auth_url: SwiftConfig::default().auth_url,
            container: DEFAULT_CONTAINER.to_string(),
            chunk_size: manager.chunk_size,
            upload_concurrency: manager.concurrency,
        }
    }
}

impl Config {
    /// `~/.stowage.toml`, or the current directory when no home is known.
    pub fn default_path() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_FILE_NAME)
    }

    /// Read `path` if it is a regular file, otherwise use the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("bad config file {}", path.display()))
    }

    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(user) = &cli.user {
            self.user = user.clone();
        }
        if let Some(password) = &cli.password {
            self.password = password.clone();
        }
        if let Some(auth_url) = &cli.auth_url {
            self.auth_url = auth_url.clone();
        }
        if let Some(container) = &cli.container {
            self.container = container.clone();
        }
        if let Some(chunk_size) = cli.chunk_size {
            self.chunk_size = chunk_size;
        }
        if let Some(concurrency) = cli.upload_concurrency {
            self.upload_concurrency = concurrency;
        }
    }

    pub fn require_credentials(&self) -> anyhow::Result<()> {
        if self.user.is_empty() || self.password.is_empty() {
            bail!("flags --user and --password or config file entries \"user\" and \"password\" are required");
        }
        Ok(())
    }

    pub fn swift_config(&self) -> SwiftConfig {
        SwiftConfig {
            user: self.user.clone(),
            key: self.password.clone(),
            auth_url: self.auth_url.clone(),
            ..SwiftConfig::default()
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            container: self.container.clone(),
            chunk_size: self.chunk_size,
            concurrency: self.upload_concurrency,
            ..ManagerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn default_config() {
        let c = Config::default();
        assert_eq!(c.container, "miniserver-snapshots");
        assert_eq!(c.chunk_size, 64 * 1024 * 1024);
        assert_eq!(c.upload_concurrency, 2);
        assert_eq!(c.auth_url, "https://auth.storage.memset.com/v1.0");
        assert!(c.require_credentials().is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let c = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(c, Config::default());
    }

    #[test]
    fn file_values_fill_in_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "user = \"me\"\npassword = \"secret\"\nchunk_size = 1048576\n").unwrap();

        let c = Config::load(&path).unwrap();
        assert_eq!(c.user, "me");
        assert_eq!(c.chunk_size, 1024 * 1024);
        assert_eq!(c.container, DEFAULT_CONTAINER);
        assert!(c.require_credentials().is_ok());
    }

    #[test]
    fn bad_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "chunk_size = \"big\"\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn flags_override_file() {
        let mut c = Config {
            user: "file-user".into(),
            password: "file-pass".into(),
            ..Config::default()
        };
        let cli = Cli::try_parse_from([
            "stowage", "list", "--user", "flag-user", "--container", "elsewhere", "--upload-concurrency", "4",
        ])
        .unwrap();
        c.apply_overrides(&cli);
        assert_eq!(c.user, "flag-user");
        assert_eq!(c.password, "file-pass");
        assert_eq!(c.container, "elsewhere");

        let manager = c.manager_config();
        assert_eq!(manager.container, "elsewhere");
        assert_eq!(manager.concurrency, 4);
        assert_eq!(c.swift_config().key, "file-pass");
    }
}
