use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Per-user settings, read from `config.toml` in the platform config dir.
///
/// ```toml
/// [repositories.home]
/// urls = ["/mnt/disk1/backup", "/mnt/disk2/backup", "/mnt/nas/backup"]
/// compression = "zstd"
/// tolerance = 1
/// excludes = ["*.tmp", "target/"]
/// ```
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryConfig>,
}

/// Store defaults for one repository alias. Command-line flags override
/// these; these override the defaults recorded in the repository.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub urls: Vec<String>,
    pub compression: Option<String>,
    pub encryption: Option<String>,
    pub tolerance: Option<usize>,
    #[serde(default)]
    pub excludes: Vec<String>,
    pub pedantic: Option<bool>,
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "shardsnap").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads `path`, or the default location. A missing file is an empty
    /// config.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            return Ok(Self::default());
        };
        if !path.exists() {
            debug!("No config file at {}", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(Self::default_path)
            .context("No config directory available")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, toml::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(path)
    }

    pub fn repository(&self, alias: Option<&str>) -> Option<&RepositoryConfig> {
        alias.and_then(|alias| self.repositories.get(alias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repositories() {
        let config: Config = toml::from_str(
            r#"
            [repositories.home]
            urls = ["/a", "/b"]
            compression = "zstd"
            tolerance = 1
            excludes = ["*.tmp"]
            "#,
        )
        .unwrap();

        let home = config.repository(Some("home")).unwrap();
        assert_eq!(home.urls, vec!["/a".to_string(), "/b".to_string()]);
        assert_eq!(home.compression.as_deref(), Some("zstd"));
        assert_eq!(home.tolerance, Some(1));
        assert_eq!(home.pedantic, None);
        assert!(config.repository(Some("work")).is_none());
        assert!(config.repository(None).is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        assert!(Config::load(Some(&path)).unwrap().repositories.is_empty());

        let mut config = Config::default();
        config.repositories.insert(
            "nas".to_string(),
            RepositoryConfig {
                urls: vec!["/mnt/nas".to_string()],
                pedantic: Some(true),
                ..Default::default()
            },
        );
        config.save(Some(&path)).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.repositories["nas"].pedantic, Some(true));
    }
}
