//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.dispatch/config.json`) and environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Dispatcher backend settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Widget configuration host and runtime bridge.
    #[serde(default)]
    pub widget: WidgetSettings,
}

/// Dispatcher backend base URL (topics and resolution endpoints live under it).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Default "http://127.0.0.1:8000/api". Overridden by DISPATCH_API_BASE_URL env.
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
}

/// Where widget configurations are fetched from and where the runtime bridge listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetSettings {
    /// Host of `{token}/index.json` widget configurations.
    #[serde(default = "default_config_base_url")]
    pub config_base_url: String,

    /// WebSocket URL of the widget-runtime bridge. Overridden by DISPATCH_BRIDGE_URL env.
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:8000/api".to_string()
}

fn default_config_base_url() -> String {
    crate::widget::DEFAULT_CONFIG_BASE_URL.to_string()
}

fn default_bridge_url() -> String {
    "ws://127.0.0.1:15152/ws".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
        }
    }
}

impl Default for WidgetSettings {
    fn default() -> Self {
        Self {
            config_base_url: default_config_base_url(),
            bridge_url: default_bridge_url(),
        }
    }
}

/// Non-empty, trimmed value of an environment variable.
fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the dispatcher base URL: env DISPATCH_API_BASE_URL overrides config.
pub fn resolve_api_base_url(config: &Config) -> String {
    env_override("DISPATCH_API_BASE_URL").unwrap_or_else(|| config.api.base_url.trim().to_string())
}

/// Resolve the bridge URL: env DISPATCH_BRIDGE_URL overrides config.
pub fn resolve_bridge_url(config: &Config) -> String {
    env_override("DISPATCH_BRIDGE_URL")
        .unwrap_or_else(|| config.widget.bridge_url.trim().to_string())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("DISPATCH_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".dispatch").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, or the default path (or DISPATCH_CONFIG_PATH).
/// Missing file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
