//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ttl > 0, intervals > 0, addresses parse)
//! - Refuse an exposed admin API without a real key
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EngineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{EngineConfig, PLACEHOLDER_API_KEY};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: '{value}' is not a valid socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("matching.excluded_paths: '{0}' must start with '/'")]
    RelativeExcludedPath(String),

    #[error("matching.excluded_paths: '{0}' would exclude every path")]
    RootExcludedPath(String),

    #[error("admin.api_key must be set to a non-placeholder value when the admin API is enabled")]
    WeakAdminKey,

    #[error("observability.log_level: unknown level '{0}'")]
    UnknownLogLevel(String),
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "server.bind_address", &config.server.bind_address);
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        let key = config.admin.api_key.trim();
        if key.is_empty() || key == PLACEHOLDER_API_KEY {
            errors.push(ValidationError::WeakAdminKey);
        }
    }
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    let positive: [(&'static str, u64); 8] = [
        ("server.request_timeout_secs", config.server.request_timeout_secs),
        ("cache.ttl_secs", config.cache.ttl_secs),
        ("matching.hit_flush_interval_secs", config.matching.hit_flush_interval_secs),
        ("aging.interval_secs", config.aging.interval_secs),
        ("aging.min_age_days", u64::from(config.aging.min_age_days)),
        ("aging.min_idle_days", u64::from(config.aging.min_idle_days)),
        ("not_found.max_entries", config.not_found.max_entries as u64),
        ("not_found.sweep_interval_secs", config.not_found.sweep_interval_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    for path in &config.matching.excluded_paths {
        let trimmed = path.trim();
        if !trimmed.starts_with('/') {
            errors.push(ValidationError::RelativeExcludedPath(path.clone()));
        } else if trimmed.trim_end_matches('/').is_empty() {
            errors.push(ValidationError::RootExcludedPath(path.clone()));
        }
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::UnknownLogLevel(config.observability.log_level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
