use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::{AmendPolicy, DEFAULT_MAX_RECORDS, DEFAULT_SLOT_KEY};

/// Env var that overrides `prescriptions.token`
pub const TOKEN_ENV_VAR: &str = "LEAFSCAN_GITHUB_TOKEN";

/// Main configuration structure
///
/// Loaded from the config file, then env vars, then CLI flags on top.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub prescriptions: PrescriptionsConfig,
}

impl Config {
    /// Load config from default location, defaults if there is no file yet
    pub fn load() -> crate::Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env();
        Ok(config)
    }

    /// Load from an explicit path. A missing file is not an error.
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)
                .map_err(|e| crate::Error::ConfigError(format!("Failed to parse config: {}", e)))?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Save config to the default location
    pub fn save(&self) -> crate::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Pick up overrides from the environment
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
            if !token.trim().is_empty() {
                self.prescriptions.token = Some(token);
            }
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.store.max_records == 0 {
            return Err(crate::Error::ConfigError(
                "store.max_records must be at least 1".into(),
            ));
        }
        if self.store.slot_key.trim().is_empty() {
            return Err(crate::Error::ConfigError("store.slot_key must not be empty".into()));
        }
        if self.classifier.base_url.trim().is_empty() {
            return Err(crate::Error::ConfigError("classifier.base_url must not be empty".into()));
        }
        Ok(())
    }

    /// Config file path, XDG on Linux/macOS and AppData on Windows
    pub fn config_path() -> crate::Result<PathBuf> {
        Ok(dirs::config_dir()
            .ok_or_else(|| crate::Error::ConfigError("Could not find config directory".into()))?
            .join("leafscan")
            .join("config.toml"))
    }

    fn data_dir() -> crate::Result<PathBuf> {
        Ok(dirs::data_dir()
            .ok_or_else(|| crate::Error::ConfigError("Could not find data directory".into()))?
            .join("leafscan"))
    }

    /// Where the history database lives
    pub fn database_path(&self) -> crate::Result<PathBuf> {
        match &self.store.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("history.db")),
        }
    }

    /// Local copy of the prescriptions document for offline use
    pub fn prescriptions_cache_path(&self) -> crate::Result<PathBuf> {
        match &self.prescriptions.cache_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("disease_prescriptions.txt")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How many captures to keep, oldest dropped first
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Storage key holding the serialized history
    #[serde(default = "default_slot_key")]
    pub slot_key: String,

    /// SQLite file, defaults to the data directory
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub amend_policy: AmendPolicy,
}

fn default_max_records() -> usize {
    DEFAULT_MAX_RECORDS
}

fn default_slot_key() -> String {
    DEFAULT_SLOT_KEY.to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            slot_key: default_slot_key(),
            database_path: None,
            amend_policy: AmendPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Service root, `/predict` is appended
    #[serde(default = "default_classifier_url")]
    pub base_url: String,

    #[serde(default = "default_classifier_timeout")]
    pub timeout_secs: u64,
}

fn default_classifier_url() -> String {
    leafscan_api::DEFAULT_CLASSIFIER_URL.to_string()
}

fn default_classifier_timeout() -> u64 {
    60 // free-tier hosting can take a while to wake up
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: default_classifier_url(),
            timeout_secs: default_classifier_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescriptionsConfig {
    /// Contents API URL of the prescriptions file
    #[serde(default = "default_prescriptions_url")]
    pub api_url: String,

    /// Only needed to publish changes
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub cache_path: Option<PathBuf>,

    #[serde(default = "default_prescriptions_timeout")]
    pub timeout_secs: u64,
}

fn default_prescriptions_url() -> String {
    leafscan_api::DEFAULT_PRESCRIPTIONS_URL.to_string()
}

fn default_prescriptions_timeout() -> u64 {
    15
}

impl PrescriptionsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for PrescriptionsConfig {
    fn default() -> Self {
        Self {
            api_url: default_prescriptions_url(),
            token: None,
            cache_path: None,
            timeout_secs: default_prescriptions_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store.max_records, 20);
        assert_eq!(config.store.slot_key, "@recent_images");
        assert_eq!(config.store.amend_policy, AmendPolicy::InPlace);
        assert!(config.classifier.base_url.starts_with("https://"));
        assert!(config.prescriptions.token.is_none());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        assert!(toml.contains("max_records"));
        assert!(toml.contains("amend_policy = \"in_place\""));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[store]\nmax_records = 5\namend_policy = \"append\"\n\n[classifier]\nbase_url = \"http://localhost:8000\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.store.max_records, 5);
        assert_eq!(config.store.amend_policy, AmendPolicy::Append);
        assert_eq!(config.store.slot_key, "@recent_images");
        assert_eq!(config.classifier.base_url, "http://localhost:8000");
        assert_eq!(config.classifier.timeout_secs, 60);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.store.max_records, 20);
    }

    #[test]
    fn test_zero_bound_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[store]\nmax_records = 0\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, crate::Error::ConfigError(_)));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.store.database_path = Some(dir.path().join("h.db"));
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.database_path().unwrap(), dir.path().join("h.db"));
    }
}
