//! Load config from file and environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use oesp_core::{TransportConfig, WireFormat};
use serde::Deserialize;
use tracing::warn;

/// Host configuration. File: ~/.config/oesp/config.toml or /etc/oesp/config.toml.
/// Env overrides: OESP_SYNC_BASE_URL, OESP_SYNC_API_KEY, OESP_SYNC_TIMEOUT_SECS,
/// OESP_SYNC_MAX_CHUNK_BYTES, OESP_BLE_MAX_CHUNK_BYTES, OESP_BLE_TIMEOUT_MS, OESP_WIRE_FORMAT.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Sync server base URL (default http://oesp-sync-server:8000).
    #[serde(default = "default_sync_base_url")]
    pub sync_base_url: String,
    /// Bearer token for the sync server.
    #[serde(default)]
    pub sync_api_key: Option<String>,
    /// Per-request timeout in seconds (default 30).
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
    /// Upload chunk size (default 500000).
    #[serde(default = "default_sync_max_chunk_bytes")]
    pub sync_max_chunk_bytes: usize,
    /// Chunk uploads in flight at once (default 4).
    #[serde(default = "default_sync_window")]
    pub sync_window: usize,
    /// Retries per chunk after the first upload (default 3).
    #[serde(default = "default_sync_retry_max")]
    pub sync_retry_max: u32,
    /// BLE chunk size before MTU fitting (default 1024).
    #[serde(default = "default_ble_max_chunk_bytes")]
    pub ble_max_chunk_bytes: usize,
    /// Wait for each BLE acknowledgment in milliseconds (default 3000).
    #[serde(default = "default_ble_timeout_ms")]
    pub ble_timeout_ms: u64,
    /// Sends of each BLE frame before giving up (default 3).
    #[serde(default = "default_ble_attempts")]
    pub ble_attempts: u32,
    /// Frame encoding on BLE links, "json" or "binary" (default json).
    #[serde(default)]
    pub wire_format: WireFormat,
}

fn default_sync_base_url() -> String {
    "http://oesp-sync-server:8000".to_string()
}
fn default_sync_timeout_secs() -> u64 {
    30
}
fn default_sync_max_chunk_bytes() -> usize {
    500_000
}
fn default_sync_window() -> usize {
    4
}
fn default_sync_retry_max() -> u32 {
    3
}
fn default_ble_max_chunk_bytes() -> usize {
    1024
}
fn default_ble_timeout_ms() -> u64 {
    3000
}
fn default_ble_attempts() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_base_url: default_sync_base_url(),
            sync_api_key: None,
            sync_timeout_secs: default_sync_timeout_secs(),
            sync_max_chunk_bytes: default_sync_max_chunk_bytes(),
            sync_window: default_sync_window(),
            sync_retry_max: default_sync_retry_max(),
            ble_max_chunk_bytes: default_ble_max_chunk_bytes(),
            ble_timeout_ms: default_ble_timeout_ms(),
            ble_attempts: default_ble_attempts(),
            wire_format: WireFormat::default(),
        }
    }
}

impl Config {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    /// Stop-and-wait settings for BLE links.
    pub fn ble_transport(&self) -> TransportConfig {
        TransportConfig {
            max_chunk_bytes: self.ble_max_chunk_bytes,
            ack_timeout: Duration::from_millis(self.ble_timeout_ms),
            max_attempts: self.ble_attempts,
            wire_format: self.wire_format,
            ..TransportConfig::default()
        }
    }

    /// Windowed settings for HTTP upload. An upload's timeout is the request timeout.
    pub fn sync_transport(&self) -> TransportConfig {
        TransportConfig {
            max_chunk_bytes: self.sync_max_chunk_bytes,
            ack_timeout: self.sync_timeout(),
            max_attempts: self.sync_retry_max.saturating_add(1),
            window_size: self.sync_window,
            ..TransportConfig::default()
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

/// Apply overrides from `lookup`; unparsable values are ignored.
pub fn apply_env(c: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(s) = lookup("OESP_SYNC_BASE_URL") {
        c.sync_base_url = s.trim_end_matches('/').to_string();
    }
    if let Some(s) = lookup("OESP_SYNC_API_KEY") {
        c.sync_api_key = (!s.is_empty()).then_some(s);
    }
    if let Some(s) = lookup("OESP_SYNC_TIMEOUT_SECS") {
        if let Ok(v) = s.parse::<u64>() {
            c.sync_timeout_secs = v;
        }
    }
    if let Some(s) = lookup("OESP_SYNC_MAX_CHUNK_BYTES") {
        if let Ok(v) = s.parse::<usize>() {
            c.sync_max_chunk_bytes = v;
        }
    }
    if let Some(s) = lookup("OESP_BLE_MAX_CHUNK_BYTES") {
        if let Ok(v) = s.parse::<usize>() {
            c.ble_max_chunk_bytes = v;
        }
    }
    if let Some(s) = lookup("OESP_BLE_TIMEOUT_MS") {
        if let Ok(v) = s.parse::<u64>() {
            c.ble_timeout_ms = v;
        }
    }
    if let Some(s) = lookup("OESP_WIRE_FORMAT") {
        if let Ok(v) = s.parse::<WireFormat>() {
            c.wire_format = v;
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/oesp/config.toml"));
    }
    out.push(PathBuf::from("/etc/oesp/config.toml"));
    out
}

/// Parse one config file. Missing keys take their defaults.
pub fn parse_file(path: &Path) -> Option<Config> {
    let s = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<Config>(&s) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring invalid config file");
            None
        }
    }
}

fn load_file() -> Option<Config> {
    // Only the first existing file is considered.
    let path = config_paths().into_iter().find(|p| p.exists())?;
    parse_file(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.sync_base_url, "http://oesp-sync-server:8000");
        assert_eq!(c.sync_timeout(), Duration::from_secs(30));
        assert_eq!(c.sync_max_chunk_bytes, 500_000);
        assert_eq!(c.sync_transport().max_attempts, 4);
        assert_eq!(c.ble_transport().max_chunk_bytes, 1024);
        assert_eq!(c.ble_transport().ack_timeout, Duration::from_millis(3000));
        assert_eq!(c.ble_transport().max_attempts, 3);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let c: Config = toml::from_str(
            r#"
            sync_base_url = "https://sync.example"
            wire_format = "binary"
            "#,
        )
        .unwrap();
        assert_eq!(c.sync_base_url, "https://sync.example");
        assert_eq!(c.wire_format, WireFormat::Binary);
        assert_eq!(c.sync_window, 4);
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 3128").is_err());
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OESP_SYNC_BASE_URL", "http://localhost:9000/"),
            ("OESP_SYNC_API_KEY", "secret"),
            ("OESP_SYNC_TIMEOUT_SECS", "5"),
            ("OESP_BLE_TIMEOUT_MS", "not-a-number"),
            ("OESP_WIRE_FORMAT", "binary"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.sync_base_url, "http://localhost:9000");
        assert_eq!(c.sync_api_key.as_deref(), Some("secret"));
        assert_eq!(c.sync_timeout_secs, 5);
        assert_eq!(c.ble_timeout_ms, 3000);
        assert_eq!(c.wire_format, WireFormat::Binary);
    }
}
