//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.chatrelay/config.json`) and environment.
//! Every field has a default, so an empty `{}` file (or no file at all) is a valid config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Relay server bind and port.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// External text-generation API the relay forwards to.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Chat client settings (gateway URL, context window).
    #[serde(default)]
    pub client: ClientConfig,

    /// Where collections and backups live on disk.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Gateway bind and port settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 3001).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    3001
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Upstream completion API: endpoint, model, fixed generation parameters and credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_upstream_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Bearer credential. Overridden by DASHSCOPE_API_KEY env.
    pub api_key: Option<String>,
}

fn default_upstream_endpoint() -> String {
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation".to_string()
}

fn default_upstream_model() -> String {
    "qwen-turbo".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.8
}

fn default_max_tokens() -> u32 {
    2000
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_upstream_endpoint(),
            model: default_upstream_model(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            api_key: None,
        }
    }
}

/// Chat client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Full URL of the relay's chat endpoint. When unset, derived from `gateway` bind/port.
    pub gateway_url: Option<String>,

    /// Maximum number of recent messages sent as context (default 10).
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

fn default_context_window() -> usize {
    10
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: None,
            context_window: default_context_window(),
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Data directory. Relative paths are resolved against the config file's parent; default `<config dir>/data`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Backups older than this many days are removed by `prune-backups` (default 7).
    #[serde(default = "default_backup_retention_days")]
    pub backup_retention_days: u32,
}

fn default_backup_retention_days() -> u32 {
    7
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            backup_retention_days: default_backup_retention_days(),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the upstream API key: env DASHSCOPE_API_KEY overrides config.
pub fn resolve_api_key(config: &Config) -> Option<String> {
    non_empty_env("DASHSCOPE_API_KEY").or_else(|| {
        config
            .upstream
            .api_key
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// `host:port`, with IPv6 literals bracketed (`[::1]:3001`).
pub fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Resolve the chat endpoint the client posts to.
pub fn resolve_gateway_url(config: &Config) -> String {
    match config
        .client
        .gateway_url
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        Some(url) => url.to_string(),
        None => {
            let bind = config.gateway.bind.trim();
            let host = if bind == "0.0.0.0" || bind == "::" {
                "127.0.0.1"
            } else {
                bind
            };
            format!("http://{}/api/chat", host_port(host, config.gateway.port))
        }
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("CHATRELAY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".chatrelay").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the data directory: `storage.dataDir` if set (relative to the config file's parent), otherwise `<config dir>/data`.
pub fn resolve_data_dir(config: &Config, config_path: &Path) -> PathBuf {
    let parent = config_parent(config_path);
    match &config.storage.data_dir {
        Some(d) if !d.as_os_str().is_empty() => {
            if d.is_absolute() {
                d.clone()
            } else {
                parent.join(d)
            }
        }
        _ => parent.join("data"),
    }
}

/// Load config from the given path (or the default path). Missing file => default config.
/// Returns the config and the path that was used (for resolving the data directory).
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
