//! Configuration for filechat.
//!
//! Settings come from `~/.filechat/config.json` (missing file means
//! defaults), then environment overrides, then command-line flags applied by
//! the binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::PromptCacheStore;
use crate::documents::{ExtensionFilter, DEFAULT_EXTENSIONS};
use crate::error::{FilechatError, Result};
use crate::kv::CachePrecision;

/// Model used when neither the config file nor `MODEL_ID` names one.
pub const DEFAULT_MODEL_ID: &str = "mlx-community/Qwen3-4B-Instruct-2507-4bit-DWQ-2510";

/// Environment variable overriding [`Config::model_id`].
pub const ENV_MODEL_ID: &str = "MODEL_ID";
/// Environment variable overriding [`Config::cache_root`].
pub const ENV_CACHE_DIR: &str = "FILECHAT_CACHE_DIR";
/// Environment variable overriding [`Config::cache_precision`].
pub const ENV_CACHE_PRECISION: &str = "FILECHAT_CACHE_PRECISION";

/// Resolved settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model_id: String,
    pub cache_precision: CachePrecision,
    /// Root of the prompt cache. `None` uses the user cache directory.
    pub cache_root: Option<PathBuf>,
    pub extensions: Vec<String>,
    pub exclude: Vec<String>,
    /// Ring size for the first layer of the built-in model.
    pub chunk_window: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            cache_precision: CachePrecision::default(),
            cache_root: None,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            exclude: Vec::new(),
            chunk_window: None,
        }
    }
}

impl Config {
    /// `~/.filechat`
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".filechat")
    }

    /// `~/.filechat/config.json`
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load the default config file and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_path(&Self::path())?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load `path` without environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw).map_err(|e| {
            FilechatError::Config(format!("Invalid config file {}: {e}", path.display()))
        })
    }

    /// Apply `MODEL_ID`, `FILECHAT_CACHE_DIR` and `FILECHAT_CACHE_PRECISION`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model_id) = lookup(ENV_MODEL_ID).filter(|v| !v.trim().is_empty()) {
            self.model_id = model_id;
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.trim().is_empty()) {
            self.cache_root = Some(PathBuf::from(dir));
        }
        if let Some(raw) = lookup(ENV_CACHE_PRECISION) {
            self.cache_precision = raw.parse()?;
        }
        Ok(())
    }

    /// Effective cache root.
    pub fn cache_root(&self) -> PathBuf {
        self.cache_root
            .clone()
            .unwrap_or_else(PromptCacheStore::default_root)
    }

    /// Prompt-cache store for the configured model.
    pub fn store(&self) -> PromptCacheStore {
        PromptCacheStore::new(self.cache_root(), &self.model_id)
    }

    /// Extension filter from `extensions` and `exclude`.
    pub fn extension_filter(&self) -> Result<ExtensionFilter> {
        ExtensionFilter::from_lists(&self.extensions, &self.exclude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.model_id, DEFAULT_MODEL_ID);
        assert_eq!(config.cache_precision, CachePrecision::ReducedBit);
        assert_eq!(config.extensions, vec!["txt"]);
        assert!(config.cache_root.is_none());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = tokio_test::assert_ok!(Config::load_from_path(&tmp.path().join("config.json")));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"cache_precision":"bf16","extensions":["md","txt"],"chunk_window":256}"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.cache_precision, CachePrecision::HalfPrecision);
        assert_eq!(config.extensions, vec!["md", "txt"]);
        assert_eq!(config.chunk_window, Some(256));
        assert_eq!(config.model_id, DEFAULT_MODEL_ID);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = tokio_test::assert_err!(Config::load_from_path(&path));
        assert!(matches!(err, FilechatError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides_from(lookup(&[
                (ENV_MODEL_ID, "org/other"),
                (ENV_CACHE_DIR, "/var/cache/fc"),
                (ENV_CACHE_PRECISION, " BF16 "),
            ]))
            .unwrap();
        assert_eq!(config.model_id, "org/other");
        assert_eq!(config.cache_root(), PathBuf::from("/var/cache/fc"));
        assert_eq!(config.cache_precision, CachePrecision::HalfPrecision);
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let mut config = Config::default();
        config
            .apply_overrides_from(lookup(&[(ENV_MODEL_ID, "  "), (ENV_CACHE_DIR, "")]))
            .unwrap();
        assert_eq!(config.model_id, DEFAULT_MODEL_ID);
        assert!(config.cache_root.is_none());
    }

    #[test]
    fn test_invalid_env_precision_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_overrides_from(lookup(&[(ENV_CACHE_PRECISION, "fp32")]))
            .unwrap_err();
        assert!(err.to_string().contains("Invalid cache precision"));
    }

    #[test]
    fn test_store_uses_model_directory() {
        let config = Config {
            model_id: "org/model".into(),
            cache_root: Some(PathBuf::from("/cache")),
            ..Config::default()
        };
        assert_eq!(config.store().dir(), Path::new("/cache/org/model"));
    }

    #[test]
    fn test_extension_filter_from_config() {
        let config = Config {
            extensions: vec!["md".into()],
            exclude: vec!["txt".into()],
            ..Config::default()
        };
        let filter = config.extension_filter().unwrap();
        assert!(filter.allows(Path::new("a.MD")));
        assert!(!filter.allows(Path::new("a.txt")));
    }
}
