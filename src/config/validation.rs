//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, ratio > 1)
//! - Detect duplicate backend addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RouterConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use thiserror::Error;

use crate::config::schema::RouterConfig;

/// A single semantic problem in a config.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Check a parsed config for semantic errors.
pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let balance = &config.balance;
    if balance.rebalance_interval_ms == 0 {
        errors.push(ValidationError::new("balance.rebalance_interval_ms", "must be greater than 0"));
    }
    if balance.conns_per_loop == 0 {
        errors.push(ValidationError::new("balance.conns_per_loop", "must be greater than 0"));
    }
    if !balance.max_score_ratio.is_finite() || balance.max_score_ratio <= 1.0 {
        errors.push(ValidationError::new(
            "balance.max_score_ratio",
            format!("must be a finite number above 1.0, got {}", balance.max_score_ratio),
        ));
    }

    let mut seen = HashSet::new();
    for (i, backend) in config.discovery.backends.iter().enumerate() {
        let field = format!("discovery.backends[{}].address", i);
        if backend.address.trim().is_empty() {
            errors.push(ValidationError::new(&field, "cannot be empty"));
        } else if !seen.insert(backend.address.as_str()) {
            errors.push(ValidationError::new(
                &field,
                format!("duplicate backend {}", backend.address),
            ));
        }
        if let Some(status) = &backend.status_address {
            if status.trim().is_empty() {
                errors.push(ValidationError::new(
                    &format!("discovery.backends[{}].status_address", i),
                    "cannot be empty when set",
                ));
            }
        }
    }

    let health = &config.health_check;
    if health.interval_ms == 0 {
        errors.push(ValidationError::new("health_check.interval_ms", "must be greater than 0"));
    }
    if health.enabled {
        if health.timeout_ms == 0 {
            errors.push(ValidationError::new("health_check.timeout_ms", "must be greater than 0"));
        }
        if health.max_retries == 0 {
            errors.push(ValidationError::new("health_check.max_retries", "must be at least 1"));
        }
        if !health.status_path.starts_with('/') {
            errors.push(ValidationError::new("health_check.status_path", "must start with '/'"));
        }
    }

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }
    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "cannot exceed retries.max_delay_ms",
        ));
    }

    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!("unknown format {:?}", config.observability.log_format),
        ));
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "cannot be empty when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
