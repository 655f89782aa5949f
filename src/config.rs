use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::entity::Locale;
use crate::error::{EffectError, Result};

/// Name of the project data directory.
pub const DATA_DIR: &str = ".effectdeck";
pub const CONFIG_FILE: &str = "config.json";

pub const ENV_BIND: &str = "EFFECTDECK_BIND";
pub const ENV_LOCALE: &str = "EFFECTDECK_LOCALE";
pub const ENV_SERVER: &str = "EFFECTDECK_SERVER";

/// Runtime configuration, read from `<data dir>/config.json` and the
/// environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckConfig {
    /// File holding the read-only built-in catalog
    pub default_file: String,
    /// File holding user-created entries
    pub custom_file: String,
    /// File holding hidden keys and built-in patches
    pub overrides_file: String,
    /// Address the HTTP server listens on
    pub bind: String,
    /// Display locale for listings
    pub locale: String,
    /// When set, catalogs are read and written through this server
    pub server_url: Option<String>,
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            default_file: "default_prompt.json".to_string(),
            custom_file: "custom_prompt.json".to_string(),
            overrides_file: "overrides.json".to_string(),
            bind: "127.0.0.1:4317".to_string(),
            locale: "en".to_string(),
            server_url: None,
        }
    }
}

impl DeckConfig {
    /// Load `config.json` from `data_dir` if present, then apply the
    /// environment.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw).map_err(|e| EffectError::CorruptCatalog {
                path: path.clone(),
                message: e.to_string(),
            })?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `EFFECTDECK_*` values from `lookup`; blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(bind) = get(ENV_BIND) {
            self.bind = bind;
        }
        if let Some(locale) = get(ENV_LOCALE) {
            self.locale = locale;
        }
        if let Some(server) = get(ENV_SERVER) {
            self.server_url = Some(server);
        }
    }

    /// The configured locale, or English when it does not parse.
    pub fn locale(&self) -> Locale {
        Locale::parse(&self.locale).unwrap_or_default()
    }

    pub fn default_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.default_file)
    }

    pub fn custom_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.custom_file)
    }

    pub fn overrides_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.overrides_file)
    }
}
