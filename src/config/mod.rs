/// Database configuration and connection management
pub mod database;

/// Application settings loaded from config.toml
pub mod settings;

pub use settings::{
    AppConfig, HINT_API_KEY_ENV, HintsConfig, PaymentsConfig, ProgressionConfig, ServerConfig,
    WEBHOOK_SECRET_ENV, load_config, load_default_config, webhook_secret,
};
