use std::time::Duration;

use serde::Deserialize;

use crate::{limiter::Quota, middleware::KeyStrategy, redis::RedisSettings};

/// Process configuration, layered from an optional YAML file and
/// `GATEKEEPER`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub redis: RedisConnSettings,
    pub limit: LimitSettings,
    pub auth: AuthSettings,
    pub admission: AdmissionSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConnSettings {
    pub url: String,
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for RedisConnSettings {
    fn default() -> Self {
        let defaults = RedisSettings::default();
        Self {
            url: defaults.url,
            connect_timeout_ms: defaults.connect_timeout.as_millis() as u64,
            command_timeout_ms: defaults.command_timeout.as_millis() as u64,
            max_retries: defaults.max_retries,
        }
    }
}

impl RedisConnSettings {
    pub fn to_client_settings(&self) -> RedisSettings {
        RedisSettings {
            url: self.url.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            max_retries: self.max_retries,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    /// Requests permitted per period.
    pub rate: u32,
    pub period_secs: u64,
    /// Maximum instantaneous overshoot; defaults to `rate`.
    pub burst: Option<u32>,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            rate: 100,
            period_secs: 60,
            burst: None,
        }
    }
}

impl LimitSettings {
    pub fn quota(&self) -> Quota {
        Quota::new(
            self.rate,
            Duration::from_secs(self.period_secs),
            self.burst.unwrap_or(self.rate),
        )
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthSettings {
    pub jwt_secret: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AdmissionSettings {
    /// Forward requests when the counter store is down. Off by default; an
    /// availability-prioritized deployment must opt in explicitly.
    pub fail_open: bool,
    pub key_strategy: KeyStrategy,
}

impl Settings {
    /// Load settings from `$GATEKEEPER_CONFIG` (YAML, optional) overlaid with
    /// `GATEKEEPER_`-prefixed environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("GATEKEEPER_CONFIG").unwrap_or_else(|_| "gatekeeper".to_string());

        let settings: Settings = config::Config::builder()
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(config::Environment::with_prefix("GATEKEEPER").separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        self.limit
            .quota()
            .validate()
            .map_err(config::ConfigError::Message)?;
        if self.auth.jwt_secret.is_empty() {
            return Err(config::ConfigError::Message(
                "auth.jwt_secret must be set".to_string(),
            ));
        }
        Ok(())
    }
}
