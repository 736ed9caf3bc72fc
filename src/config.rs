use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// User preferences persisted in `prefs.toml`.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Config {
  pub api_key: Option<String>,
  /// TMDB `images.secure_base_url`, cached after the first configuration fetch.
  pub image_base_url: Option<String>,
  /// Optional TMDB `language` parameter, e.g. `en-US`.
  pub language: Option<String>,
}

fn project_dirs() -> Option<ProjectDirs> {
  ProjectDirs::from("", "", "moviefinder")
}

impl Config {
  pub fn default_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("prefs.toml"))
  }

  /// Load preferences, falling back to defaults when missing or unreadable.
  pub fn load() -> Self {
    match Self::default_path() {
      Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
        debug!(err = %format!("{:#}", e), "config: using defaults");
        Self::default()
      }),
      None => Self::default(),
    }
  }

  pub fn load_from(path: &Path) -> Result<Self> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Invalid preferences in {}", path.display()))
  }

  pub fn save_to(&self, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
      std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let content = toml::to_string(self).context("Failed to serialize preferences")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
  }

  /// The API key to use: an explicit one (flag or environment) beats the stored one.
  pub fn resolve_api_key(&self, explicit: Option<&str>) -> Option<String> {
    explicit
      .map(str::trim)
      .filter(|k| !k.is_empty())
      .map(str::to_string)
      .or_else(|| self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()).map(str::to_string))
  }
}

/// Directory for log files.
pub fn log_dir() -> Option<PathBuf> {
  project_dirs().map(|dirs| dirs.data_local_dir().join("logs"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("prefs.toml");
    let config = Config {
      api_key: Some("abc".to_string()),
      image_base_url: Some("https://image.tmdb.org/t/p/".to_string()),
      language: None,
    };
    config.save_to(&path).unwrap();
    assert_eq!(Config::load_from(&path).unwrap(), config);
  }

  #[test]
  fn partial_file_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.toml");
    std::fs::write(&path, "language = \"fr-FR\"\n").unwrap();
    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.language.as_deref(), Some("fr-FR"));
    assert_eq!(config.api_key, None);
  }

  #[test]
  fn invalid_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.toml");
    std::fs::write(&path, "api_key = [").unwrap();
    assert!(Config::load_from(&path).is_err());
  }

  #[test]
  fn explicit_key_wins() {
    let config = Config { api_key: Some("stored".to_string()), ..Config::default() };
    assert_eq!(config.resolve_api_key(Some("flag")).as_deref(), Some("flag"));
    assert_eq!(config.resolve_api_key(Some("  ")).as_deref(), Some("stored"));
    assert_eq!(config.resolve_api_key(None).as_deref(), Some("stored"));
    assert_eq!(Config::default().resolve_api_key(None), None);
  }
}
