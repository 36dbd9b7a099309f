use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Result, anyhow};
use tracing::warn;

use crate::ollama::Endpoint;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 5;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub default_model: Option<String>,
    pub endpoint: Endpoint,
    pub probe_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: None,
            endpoint: Endpoint::default(),
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
        }
    }
}

impl Config {
    /// Load the user's config, falling back to defaults when it is missing or
    /// unreadable, then apply environment overrides.
    pub fn load() -> Self {
        let mut config = match Self::path() {
            Ok(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("ignoring config at {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                warn!("{}", e);
                Self::default()
            }
        };

        if let Ok(host) = std::env::var("OLLAMA_HOST") {
            config.base_url = normalize_host(&host);
        }

        config
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let config_content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        Ok(())
    }

    /// Update `default_model` in the file at `path`, keeping its other
    /// settings. An unreadable file is left alone.
    pub fn save_default_model(path: &Path, model: &str) -> Result<()> {
        let mut config = Self::load_from(path)
            .map_err(|e| anyhow!("not overwriting {}: {}", path.display(), e))?;
        config.default_model = Some(model.to_string());
        config.save_to(path)
    }

    pub fn path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("chatllama").join("config.json"))
    }

    pub fn log_path() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?;

        Ok(data_dir.join("chatllama").join("chatllama.log"))
    }
}

/// `OLLAMA_HOST` is often just `host:port`.
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}
