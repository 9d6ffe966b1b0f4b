//! Configuration loading and validation for the event notifier.
//!
//! Configuration is loaded from multiple sources in order of precedence:
//! 1. Environment variables (highest, `NOTIFIER_` prefix)
//! 2. Environment-specific file (e.g., `development.toml`)
//! 3. Default file (`default.toml`)
//!
//! # Example
//!
//! ```ignore
//! use chain_event_notifier::config::Settings;
//!
//! let settings = Settings::load("development")?;
//! println!("api type: {}", settings.api_type);
//! ```

mod settings;

pub use settings::{
    ApiType, ConnectorApiSettings, ExchangeSettings, LoggingSettings, MetricsSettings,
    RabbitMqSettings, RedisConnectionType, RedisSettings, SessionBusSettings, Settings,
};
