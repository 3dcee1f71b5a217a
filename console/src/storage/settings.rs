//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Console settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Logging
    #[serde(default)]
    pub log: LogSettings,

    /// Backend configuration
    #[serde(default)]
    pub backend: BackendSettings,

    /// Watched project
    #[serde(default)]
    pub project: ProjectSettings,

    /// Push channel configuration
    #[serde(default)]
    pub push: PushSettings,

    /// Polling fallback configuration
    #[serde(default)]
    pub polling: PollingSettings,

    /// Reconciliation tuning
    #[serde(default)]
    pub reconcile: ReconcileSettings,

    /// Local HTTP server
    #[serde(default)]
    pub server: ServerSettings,
}

fn default_true() -> bool {
    true
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default)]
    pub level: LogLevel,

    /// Also write rolling log files
    #[serde(default)]
    pub file: bool,

    /// Where log files go; defaults to the `logs` directory of the storage layout
    #[serde(default)]
    pub dir: Option<PathBuf>,

    #[serde(default)]
    pub json: bool,
}

/// Backend API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Base URL for the backend API
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    /// Bearer token for the backend and the push broker
    #[serde(default)]
    pub api_token: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            api_token: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Project settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,
}

/// Push channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// `ws://` or `wss://` broker endpoint; derived from the backend URL when absent
    #[serde(default)]
    pub broker_url: Option<String>,

    /// Topic namespace prepended to `deployments`
    #[serde(default)]
    pub topic_prefix: Option<String>,

    /// Optional path to a PEM-encoded CA certificate for broker TLS verification.
    /// When absent, the system certificate store is used.
    #[serde(default)]
    pub ca_cert_path: Option<String>,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            broker_url: None,
            topic_prefix: None,
            ca_cert_path: None,
            base_delay_ms: default_base_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Polling fallback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_fast_interval")]
    pub fast_interval_secs: u64,

    #[serde(default = "default_slow_interval")]
    pub slow_interval_secs: u64,
}

fn default_fast_interval() -> u64 {
    5
}

fn default_slow_interval() -> u64 {
    120
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            fast_interval_secs: default_fast_interval(),
            slow_interval_secs: default_slow_interval(),
        }
    }
}

/// Reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Build-number-less matching window in seconds
    #[serde(default = "default_fallback_window")]
    pub fallback_window_secs: u64,

    /// Lifetime of an unconfirmed speculative record in seconds
    #[serde(default = "default_speculative_ttl")]
    pub speculative_ttl_secs: u64,

    /// Prefix for auto-generated versions
    #[serde(default = "default_version_prefix")]
    pub version_prefix: String,
}

fn default_fallback_window() -> u64 {
    600
}

fn default_speculative_ttl() -> u64 {
    1800
}

fn default_version_prefix() -> String {
    "1.0.0".to_string()
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            fallback_window_secs: default_fallback_window(),
            speculative_ttl_secs: default_speculative_ttl(),
            version_prefix: default_version_prefix(),
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}
