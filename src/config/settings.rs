//! Application settings loaded from config.toml
//!
//! Every section is optional; missing values fall back to the defaults the service was
//! designed around (2 second session floor, 60 second throttle, 365 day gift expiry,
//! 12 character codes with 10 attempts). Secrets such as the webhook signing secret are
//! never read from the file, only from the environment.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Environment variable holding the payment webhook signing secret.
pub const WEBHOOK_SECRET_ENV: &str = "PAYMENT_WEBHOOK_SECRET";

/// Environment variable holding the hint generator API key.
pub const HINT_API_KEY_ENV: &str = "HINT_API_KEY";

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP server settings
    pub server: ServerConfig,
    /// Session timing and gating settings
    pub progression: ProgressionConfig,
    /// Hint generation settings
    pub hints: HintsConfig,
    /// Payment webhook and claim code settings
    pub payments: PaymentsConfig,
}

/// HTTP server settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub bind_address: String,
    /// Capacity of the goal event channel
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            event_capacity: 256,
        }
    }
}

/// Session timing and gating settings
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ProgressionConfig {
    /// Minimum seconds a session timer must run before it can be finished
    pub min_session_seconds: i64,
    /// Minimum seconds between two logged sessions
    pub min_interval_seconds: i64,
    /// Allows finishing several sessions on the same calendar day (testing only).
    /// Only the first session of a day is counted.
    pub debug_mode: bool,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            min_session_seconds: 2,
            min_interval_seconds: 60,
            debug_mode: false,
        }
    }
}

/// Hint generation settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HintsConfig {
    /// Endpoint of the text generation service; `None` disables generation
    pub generator_url: Option<String>,
    /// Text shown when generation fails
    pub fallback_text: String,
    /// How many recent hints are sent along to avoid repetition
    pub history_window: u64,
    /// Timeout for one generation request
    pub request_timeout_seconds: u64,
}

impl Default for HintsConfig {
    fn default() -> Self {
        Self {
            generator_url: None,
            fallback_text: "Every session counts. Keep going, your reward is getting closer!"
                .to_string(),
            history_window: 3,
            request_timeout_seconds: 15,
        }
    }
}

/// Payment webhook and claim code settings
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct PaymentsConfig {
    /// Days a gift can be claimed after purchase
    pub gift_expiry_days: i64,
    /// Length of generated claim codes
    pub code_length: usize,
    /// Attempts before code generation gives up
    pub max_code_attempts: u32,
    /// Maximum age of a webhook signature timestamp
    pub signature_tolerance_seconds: i64,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            gift_expiry_days: 365,
            code_length: 12,
            max_code_attempts: 10,
            signature_tolerance_seconds: 300,
        }
    }
}

/// Loads the application configuration from a TOML file
///
/// # Arguments
/// * `path` - Path to the config.toml file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A value has the wrong type
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    tracing::debug!("Attempting to load configuration from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path_ref.display()),
    })?;

    toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })
}

/// Loads the configuration from `./config.toml`, or the defaults when the file is absent.
pub fn load_default_config() -> Result<AppConfig> {
    let path = Path::new("config.toml");
    if path.exists() {
        load_config(path)
    } else {
        tracing::info!("No config.toml found, using default settings");
        Ok(AppConfig::default())
    }
}

/// Reads the webhook signing secret from the environment.
pub fn webhook_secret() -> Result<String> {
    std::env::var(WEBHOOK_SECRET_ENV).map_err(|e| Error::Config {
        message: format!("{WEBHOOK_SECRET_ENV} is not set: {e}"),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            [server]
            bind_address = "0.0.0.0:9000"

            [progression]
            min_session_seconds = 5
            min_interval_seconds = 120
            debug_mode = true

            [hints]
            generator_url = "http://localhost:7000/hints"
            history_window = 5

            [payments]
            gift_expiry_days = 30
        "#;

        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:9000");
        assert_eq!(config.server.event_capacity, 256);
        assert_eq!(config.progression.min_session_seconds, 5);
        assert_eq!(config.progression.min_interval_seconds, 120);
        assert!(config.progression.debug_mode);
        assert_eq!(
            config.hints.generator_url.as_deref(),
            Some("http://localhost:7000/hints")
        );
        assert_eq!(config.hints.history_window, 5);
        assert_eq!(config.payments.gift_expiry_days, 30);
        assert_eq!(config.payments.code_length, 12);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.progression.min_session_seconds, 2);
        assert_eq!(config.progression.min_interval_seconds, 60);
        assert!(!config.progression.debug_mode);
        assert!(config.hints.generator_url.is_none());
        assert_eq!(config.payments.max_code_attempts, 10);
        assert_eq!(config.payments.gift_expiry_days, 365);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("definitely/not/here.toml");
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
