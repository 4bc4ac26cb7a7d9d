//! Application configuration management.
//!
//! Configuration is stored at `~/.config/racetrack/config.json` and holds
//! where race data lives plus what the offline cache should precache.
//! A few `RACETRACK_*` environment variables override the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::offline::{scan_dir, AssetManifest, DEFAULT_EXTERNAL_ASSETS, DEFAULT_ROUTES};

/// Application name used for config/data/cache directory paths
const APP_NAME: &str = "racetrack";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Origin used when none is configured
const DEFAULT_ORIGIN: &str = "http://localhost:4173";

/// Version token used when none is configured
const DEFAULT_VERSION: &str = "dev";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub origin: Option<String>,
    pub version: Option<String>,
    pub build_dir: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub routes: Option<Vec<String>>,
    pub external_assets: Option<Vec<String>>,
    pub data_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
}

impl Config {
    /// Load the config file (defaults when absent) and apply env overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("RACETRACK_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = var("RACETRACK_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(origin) = var("RACETRACK_ORIGIN") {
            self.origin = Some(origin);
        }
        if let Some(version) = var("RACETRACK_VERSION") {
            self.version = Some(version);
        }
    }

    /// Directory holding the race record storage area.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Root directory for offline cache partitions.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join("assets"))
    }

    pub fn origin(&self) -> Result<Url> {
        let origin = self.origin.as_deref().unwrap_or(DEFAULT_ORIGIN);
        Url::parse(origin).with_context(|| format!("Invalid origin: {}", origin))
    }

    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or(DEFAULT_VERSION)
    }

    /// Asset manifest from the configured build and static directories.
    pub fn manifest(&self) -> Result<AssetManifest> {
        let build = self.build_dir.as_deref().map(scan_dir).unwrap_or_default();
        let files = self.static_dir.as_deref().map(scan_dir).unwrap_or_default();
        let routes = self
            .routes
            .clone()
            .unwrap_or_else(|| DEFAULT_ROUTES.iter().map(|s| s.to_string()).collect());
        let external = self
            .external_assets
            .clone()
            .unwrap_or_else(|| DEFAULT_EXTERNAL_ASSETS.iter().map(|s| s.to_string()).collect());

        Ok(AssetManifest::new(
            self.origin()?,
            self.version(),
            &build,
            &files,
            &routes,
            &external,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert!(config.origin.is_none());
        assert_eq!(config.version(), "dev");
        assert_eq!(config.origin().unwrap().as_str(), "http://localhost:4173/");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            origin: Some("https://race.example.com".to_string()),
            version: Some("42".to_string()),
            ..Default::default()
        };

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.origin.as_deref(), Some("https://race.example.com"));
        assert_eq!(loaded.version(), "42");
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_overrides_win_over_file_values() {
        let vars: HashMap<&str, &str> = [
            ("RACETRACK_DATA_DIR", "/tmp/races"),
            ("RACETRACK_VERSION", "7"),
        ]
        .into_iter()
        .collect();

        let mut config = Config {
            version: Some("1".to_string()),
            ..Default::default()
        };
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/races"));
        assert_eq!(config.version(), "7");
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn test_manifest_uses_configured_directories() {
        let dir = tempfile::tempdir().unwrap();
        let static_dir = dir.path().join("static");
        std::fs::create_dir_all(static_dir.join("icons")).unwrap();
        std::fs::write(static_dir.join("icons").join("original.png"), "x").unwrap();
        std::fs::write(static_dir.join("manifest.json"), "{}").unwrap();

        let config = Config {
            origin: Some("https://race.example.com".to_string()),
            version: Some("3".to_string()),
            static_dir: Some(static_dir),
            external_assets: Some(Vec::new()),
            ..Default::default()
        };
        let manifest = config.manifest().unwrap();

        assert_eq!(manifest.cache_names().static_name, "cache3");
        assert_eq!(
            manifest.to_cache(),
            &[
                "https://race.example.com/manifest.json".to_string(),
                "https://race.example.com/".to_string(),
            ]
        );
    }
}
