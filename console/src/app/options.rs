//! Application configuration options

use std::time::Duration;

use secrecy::SecretString;

use crate::errors::ConsoleError;
use crate::push::fsm::ReconnectPolicy;
use crate::push::transport::BrokerAddress;
use crate::reconcile::matcher::MatchPolicy;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::sync::feed::FeedOptions;
use crate::workers::{poller, push};

const MAX_RECONNECT_ATTEMPTS: u32 = 20;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Backend API base URL
    pub backend_base_url: String,

    /// Bearer token for the backend and the push broker
    pub api_token: Option<SecretString>,

    /// Backend request timeout
    pub request_timeout: Duration,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Deployment feed configuration
    pub feed: FeedOptions,

    /// Prefix for auto-generated versions
    pub version_prefix: String,

    /// Enable local HTTP server
    pub enable_server: bool,

    /// Enable push channel worker
    pub enable_push: bool,

    /// Enable polling workers
    pub enable_poller: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Push worker options
    pub push: push::Options,

    /// Poller worker options
    pub poller: poller::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            backend_base_url: "http://localhost:8000/api".to_string(),
            api_token: None,
            request_timeout: Duration::from_secs(30),
            storage: StorageOptions::default(),
            feed: FeedOptions::default(),
            version_prefix: "1.0.0".to_string(),
            enable_server: true,
            enable_push: true,
            enable_poller: true,
            server: ServerOptions::default(),
            push: push::Options::default(),
            poller: poller::Options::default(),
        }
    }
}

impl AppOptions {
    /// Build runtime options from a settings file
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Result<Self, ConsoleError> {
        if settings.project.id.trim().is_empty() {
            return Err(ConsoleError::ConfigError("project.id is required".to_string()));
        }

        if !(1..=MAX_RECONNECT_ATTEMPTS).contains(&settings.push.max_attempts) {
            return Err(ConsoleError::ConfigError(format!(
                "push.max_attempts must be between 1 and {}",
                MAX_RECONNECT_ATTEMPTS
            )));
        }

        let broker_address = if settings.push.enabled {
            let address = match &settings.push.broker_url {
                Some(url) => BrokerAddress::parse(url, settings.push.ca_cert_path.clone())?,
                None => BrokerAddress::from_backend_url(
                    &settings.backend.base_url,
                    settings.push.ca_cert_path.clone(),
                )?,
            };
            Some(address)
        } else {
            None
        };

        Ok(Self {
            lifecycle: LifecycleOptions::default(),
            backend_base_url: settings.backend.base_url.clone(),
            api_token: settings.backend.api_token.clone().map(SecretString::from),
            request_timeout: Duration::from_secs(settings.backend.request_timeout_secs),
            storage: StorageOptions { layout },
            feed: FeedOptions {
                project_id: settings.project.id.clone(),
                project_name: settings.project.name.clone(),
                match_policy: MatchPolicy {
                    fallback_window: Duration::from_secs(settings.reconcile.fallback_window_secs),
                },
                speculative_ttl: Duration::from_secs(settings.reconcile.speculative_ttl_secs),
            },
            version_prefix: settings.reconcile.version_prefix.clone(),
            enable_server: settings.server.enabled,
            enable_push: settings.push.enabled,
            enable_poller: settings.polling.enabled,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            push: push::Options {
                broker_address,
                topic_prefix: settings.push.topic_prefix.clone(),
                reconnect: ReconnectPolicy {
                    base_delay: Duration::from_millis(settings.push.base_delay_ms),
                    max_attempts: settings.push.max_attempts,
                },
                ..Default::default()
            },
            poller: poller::Options {
                fast_interval: Duration::from_secs(settings.polling.fast_interval_secs),
                slow_interval: Duration::from_secs(settings.polling.slow_interval_secs),
            },
        })
    }
}

/// Lifecycle options for the console
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
