//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (deadline > 0, buffers > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a configuration for values that deserialize fine but cannot run.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = config.listener.bind_address.parse::<SocketAddr>() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address: {}", config.listener.bind_address, e),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be at least 1"));
    }
    if config.registry.extensions.is_empty() {
        errors.push(ValidationError::new("registry.extensions", "at least one extension is required"));
    }
    if config.cluster.localities == 0 {
        errors.push(ValidationError::new("cluster.localities", "must be at least 1"));
    }
    if config.cluster.compute_slots == 0 {
        errors.push(ValidationError::new("cluster.compute_slots", "must be at least 1"));
    }
    // The size travels to the guest as an i32 argument.
    if config.sandbox.alloc_size == 0 || config.sandbox.alloc_size > i32::MAX as u32 {
        errors.push(ValidationError::new(
            "sandbox.alloc_size",
            format!("must be between 1 and {}", i32::MAX),
        ));
    }
    if config.streaming.read_buffer_size == 0 {
        errors.push(ValidationError::new("streaming.read_buffer_size", "must be at least 1"));
    }
    if config.streaming.write_buffer_size == 0 {
        errors.push(ValidationError::new("streaming.write_buffer_size", "must be at least 1"));
    }
    if config.timeouts.connection_secs == 0 {
        errors.push(ValidationError::new("timeouts.connection_secs", "must be at least 1"));
    }
    if config.runtime.transport_threads == 0 {
        errors.push(ValidationError::new("runtime.transport_threads", "must be at least 1"));
    }
    if config.runtime.max_blocking_threads == 0 {
        errors.push(ValidationError::new("runtime.max_blocking_threads", "must be at least 1"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
