//! # Logging
//!
//! Process-wide `tracing` subscriber for the governance daemon. Library code
//! only emits events; installing the subscriber is the binary's job.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::{LoopError, Result};

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset (trace, debug, info, warn, error).
    pub level: String,
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

impl LoggingConfig {
    /// GOVERNANCE_LOG_LEVEL and GOVERNANCE_LOG_JSON ("1", "true", "yes", "on").
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(level) = std::env::var("GOVERNANCE_LOG_LEVEL") {
            if !level.trim().is_empty() {
                cfg.level = level.trim().to_string();
            }
        }
        if let Ok(raw) = std::env::var("GOVERNANCE_LOG_JSON") {
            cfg.json_format = matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        cfg
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let json_layer = config.json_format.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
    });
    let text_layer = (!config.json_format).then(|| fmt::layer().with_target(true));

    let subscriber = Registry::default().with(filter).with(json_layer).with(text_layer);

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        LOGGING_INITIALIZED.store(false, Ordering::SeqCst);
        return Err(LoopError::Logging(err.to_string()));
    }

    tracing::info!(level = %config.level, json = config.json_format, "logging initialized");
    Ok(())
}
