//! Configuration types for the HTTP service
//!
//! Every section carries serde defaults so an empty configuration source
//! yields a runnable service.

use crate::errors::ConfigError;
use lead_keeper_core::authz::Role;
use lead_keeper_core::notification::NotificationRouting;
use lead_keeper_core::pipeline::DEFAULT_EVENT_TYPE;
use lead_keeper_core::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Placeholder shown instead of secrets
pub const REDACTED: &str = "***";

/// Prefix of environment overrides, e.g. `LK__SERVER__PORT=9090`
pub const ENV_PREFIX: &str = "LK";

/// Environment variable naming an extra configuration file
pub const CONFIG_FILE_ENV: &str = "LK_CONFIG_FILE";

/// Service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Inbound lead webhooks
    pub webhooks: WebhookConfig,

    /// Background processing of receipts
    pub pipeline: PipelineConfig,

    pub storage: StorageConfig,

    /// Static bearer tokens
    pub access: AccessConfig,

    /// Event-to-recipient routes
    pub notifications: NotificationRouting,

    /// Audit retention
    pub audit: AuditConfig,

    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Load configuration from the layered sources, later ones winning:
    ///
    /// 1. `/etc/lead-keeper/service.yaml`
    /// 2. `./config/service.yaml`
    /// 3. `explicit`, which must exist when given
    /// 4. `LK__`-prefixed environment variables (`__` separates sections)
    ///
    /// The result is not validated; call [`ServiceConfig::validate`].
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name("/etc/lead-keeper/service")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            )
            .add_source(
                config::File::with_name("config/service")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );

        if let Some(path) = explicit {
            info!(path = %path.display(), "Loading configuration from explicit path");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Load {
                message: e.to_string(),
            })
    }

    /// Path named by [`CONFIG_FILE_ENV`], if set and non-empty
    pub fn explicit_path_from_env() -> Option<PathBuf> {
        std::env::var(CONFIG_FILE_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid {
                message: "server.port must not be 0".to_string(),
            });
        }

        if self.server.max_body_size == 0 {
            return Err(ConfigError::Invalid {
                message: "server.max_body_size must be positive".to_string(),
            });
        }

        if !self.webhooks.path_prefix.starts_with('/') {
            return Err(ConfigError::Invalid {
                message: format!(
                    "webhooks.path_prefix must start with '/': {}",
                    self.webhooks.path_prefix
                ),
            });
        }

        if self.webhooks.require_signature
            && self
                .webhooks
                .signing_secret
                .as_deref()
                .map_or(true, |s| s.is_empty())
        {
            return Err(ConfigError::Missing {
                key: "webhooks.signing_secret".to_string(),
            });
        }

        if self.pipeline.workers == 0 {
            return Err(ConfigError::Invalid {
                message: "pipeline.workers must be at least 1".to_string(),
            });
        }

        self.pipeline
            .retry
            .validate()
            .map_err(|e| ConfigError::Invalid {
                message: format!("pipeline: {}", e),
            })?;

        let mut seen = BTreeSet::new();
        for token in &self.access.tokens {
            if token.token.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    message: format!("access token for '{}' is empty", token.name),
                });
            }
            if !seen.insert(token.token.as_str()) {
                return Err(ConfigError::Invalid {
                    message: format!("access token for '{}' is not unique", token.name),
                });
            }
        }

        Ok(())
    }

    /// Copy with every secret replaced by [`REDACTED`]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.webhooks.signing_secret.is_some() {
            copy.webhooks.signing_secret = Some(REDACTED.to_string());
        }
        for token in &mut copy.access.tokens {
            token.token = REDACTED.to_string();
        }
        copy
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Maximum request size in bytes
    pub max_body_size: usize,

    pub enable_cors: bool,

    pub enable_compression: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            max_body_size: 1024 * 1024, // 1MB
            enable_cors: true,
            enable_compression: true,
        }
    }
}

/// Inbound lead webhook configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Route prefix; the source name follows it
    pub path_prefix: String,

    /// Reject unsigned deliveries
    pub require_signature: bool,

    /// HMAC-SHA256 secret; when set, signatures are always checked
    pub signing_secret: Option<String>,

    /// Accepted sources (empty = all)
    pub allowed_sources: Vec<String>,

    /// Event type stored when the sender gives none
    pub default_event_type: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            path_prefix: "/webhooks/leads".to_string(),
            require_signature: false,
            signing_secret: None,
            allowed_sources: vec![],
            default_event_type: DEFAULT_EVENT_TYPE.to_string(),
        }
    }
}

impl WebhookConfig {
    /// Whether deliveries from the source are accepted
    pub fn accepts_source(&self, source: &str) -> bool {
        self.allowed_sources.is_empty() || self.allowed_sources.iter().any(|s| s == source)
    }
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("path_prefix", &self.path_prefix)
            .field("require_signature", &self.require_signature)
            .field("signing_secret", &self.signing_secret.as_ref().map(|_| REDACTED))
            .field("allowed_sources", &self.allowed_sources)
            .field("default_event_type", &self.default_event_type)
            .finish()
    }
}

/// Background pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of worker tasks
    pub workers: usize,

    /// Idle poll interval when the queue is empty
    pub poll_interval_ms: u64,

    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval_ms: 250,
            retry: RetryPolicy::default(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON snapshot file; in-memory only when unset
    pub snapshot_path: Option<PathBuf>,
}

/// Static bearer tokens
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub tokens: Vec<AccessToken>,
}

/// One bearer token and the user it stands for
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub user_id: u64,
    pub name: String,
    pub role: Role,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &REDACTED)
            .field("user_id", &self.user_id)
            .field("name", &self.name)
            .field("role", &self.role)
            .finish()
    }
}

/// Audit retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Entries older than this are pruned (0 keeps everything)
    pub retention_days: u32,

    pub prune_interval_seconds: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: 365,
            prune_interval_seconds: 3600,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
