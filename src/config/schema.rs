//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aging::{AgingPolicy, AgingSettings, CleanupAction};
use crate::notfound::NotFoundSettings;
use crate::rules::types::Provenance;

/// Placeholder admin key; an enabled admin API refuses to start with it.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

/// Root configuration for the redirect engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Redirect listener settings.
    pub server: ServerConfig,

    /// Rule store location.
    pub store: StoreConfig,

    /// Rule cache settings.
    pub cache: CacheConfig,

    /// Matching behavior.
    pub matching: MatchingConfig,

    /// How request context is derived from incoming requests.
    pub request: RequestConfig,

    /// Rule aging.
    pub aging: AgingConfig,

    /// Logging of requests no rule answered.
    pub not_found: NotFoundConfig,

    pub admin: AdminConfig,

    pub observability: ObservabilityConfig,
}

/// Redirect listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Rule store configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding the rules. Unset means an in-memory store.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a compiled rule snapshot is served before reloading.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 3600 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MatchingConfig {
    /// Path prefixes that are never redirected (e.g. "/admin", "/api").
    pub excluded_paths: Vec<String>,

    /// Record hit counts for fired rules.
    pub track_hits: bool,

    /// How often accumulated hits are written to the store.
    pub hit_flush_interval_secs: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            excluded_paths: Vec::new(),
            track_hits: true,
            hit_flush_interval_secs: 30,
        }
    }
}

/// Request context derivation.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RequestConfig {
    /// Take the client IP from forwarding headers instead of the socket peer.
    /// Only enable behind a proxy that overwrites these headers.
    pub trust_forwarded_headers: bool,

    /// Header carrying the authenticated user id, set by an upstream auth layer.
    pub identity_header: Option<String>,

    /// Header carrying the comma-separated roles of that user.
    pub roles_header: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AgingConfig {
    pub enabled: bool,

    /// Seconds between scheduled runs.
    pub interval_secs: u64,

    pub min_age_days: u32,

    pub min_idle_days: u32,

    pub action: CleanupAction,

    /// Provenance tags never aged.
    pub excluded_provenance: Vec<Provenance>,
}

impl Default for AgingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 86_400,
            min_age_days: 365,
            min_idle_days: 90,
            action: CleanupAction::Deactivate,
            excluded_provenance: vec![Provenance::Manual],
        }
    }
}

impl AgingConfig {
    pub fn settings(&self) -> AgingSettings {
        AgingSettings {
            enabled: self.enabled,
            policy: AgingPolicy {
                min_age_days: self.min_age_days,
                min_idle_days: self.min_idle_days,
                excluded_provenance: self.excluded_provenance.clone(),
            },
            action: self.action,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NotFoundConfig {
    pub enabled: bool,

    /// Fold repeated requests for a path into one entry.
    pub group: bool,

    pub max_entries: usize,

    /// Days an entry is kept. `0` keeps entries until evicted.
    pub retention_days: u32,

    /// Seconds between retention sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for NotFoundConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            group: true,
            max_entries: 10_000,
            retention_days: 30,
            sweep_interval_secs: 3600,
        }
    }
}

impl NotFoundConfig {
    pub fn settings(&self) -> NotFoundSettings {
        NotFoundSettings {
            enabled: self.enabled,
            group: self.group,
            max_entries: self.max_entries,
            retention_days: self.retention_days,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.cache.ttl(), Duration::from_secs(3600));
        assert_eq!(config.aging.excluded_provenance, vec![Provenance::Manual]);
    }

    #[test]
    fn test_partial_sections() {
        let config: EngineConfig = toml::from_str(
            r#"
            [matching]
            excluded_paths = ["/admin", "/api"]

            [aging]
            action = "convert_410"
            excluded_provenance = ["manual", "import"]

            [not_found]
            group = false
            retention_days = 0

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.matching.excluded_paths, vec!["/admin", "/api"]);
        assert!(config.matching.track_hits);
        assert_eq!(config.aging.action, CleanupAction::ConvertTo410);
        assert_eq!(config.aging.min_age_days, 365);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert!(!config.not_found.settings().group);
        assert_eq!(config.not_found.max_entries, 10_000);

        let settings = config.aging.settings();
        assert_eq!(
            settings.policy.excluded_provenance,
            vec![Provenance::Manual, Provenance::Import]
        );
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        assert!(toml::from_str::<EngineConfig>("[observability]\nlog_format = \"xml\"").is_err());
    }
}
