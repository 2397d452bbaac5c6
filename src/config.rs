use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::mail::HeaderCache;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maildir to thread (tilde-expanded)
    pub maildir: String,
    /// Header cache file; defaults to the user cache directory
    pub cache: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            maildir: "~/Mail/INBOX".to_string(),
            cache: None,
        }
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

impl Config {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("mailthread/config.toml"))
            .unwrap_or_else(|| PathBuf::from("~/.config/mailthread/config.toml"))
    }

    /// Load the user config, falling back to defaults when it is missing or
    /// unreadable.
    pub fn load() -> Self {
        let config_path = Self::config_path();

        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => log::warn!("{:#}", e),
            }
        } else {
            log::debug!("no config file at {}", config_path.display());
        }

        Self::default()
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("could not parse config {}", path.display()))
    }

    pub fn maildir_path(&self) -> PathBuf {
        expand(&self.maildir)
    }

    pub fn cache_path(&self) -> PathBuf {
        match &self.cache {
            Some(cache) => expand(cache),
            None => HeaderCache::default_path()
                .unwrap_or_else(|| expand("~/.cache/mailthread/headers.bin")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "maildir = \"/srv/mail/INBOX\"\ncache = \"/tmp/mt/headers.bin\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.maildir_path(), PathBuf::from("/srv/mail/INBOX"));
        assert_eq!(config.cache_path(), PathBuf::from("/tmp/mt/headers.bin"));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.maildir, "~/Mail/INBOX");
        assert!(config.cache.is_none());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "maildir = [").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("could not parse config"));
    }
}
