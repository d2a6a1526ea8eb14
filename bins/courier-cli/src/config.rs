use courier_core::config::{CoreConfig, DrainPolicy};
use courier_core::crypto::DEFAULT_PREKEY_LIMIT;
use courier_core::ids::PeerId;
use log::LevelFilter;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CourierConfig {
    pub identity: IdentityConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    pub peer_id: String,
    pub username: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    #[serde(default)]
    pub drain_policy: DrainPolicy,
    #[serde(default)]
    pub max_queue_len: Option<usize>,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default)]
    pub polling_interval_ms: u64,
    #[serde(default = "default_prekey_limit")]
    pub prekey_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            drain_policy: DrainPolicy::default(),
            max_queue_len: None,
            event_buffer: default_event_buffer(),
            polling_interval_ms: 0,
            prekey_limit: default_prekey_limit(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_event_buffer() -> usize {
    256
}

fn default_prekey_limit() -> usize {
    DEFAULT_PREKEY_LIMIT
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("invalid: {0}")]
    Invalid(String),
}

impl CourierConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if PeerId::parse(&self.identity.peer_id).is_none() {
            return Err(ConfigError::Invalid("identity.peer_id is empty".to_string()));
        }
        if self.session.max_queue_len == Some(0) {
            return Err(ConfigError::Invalid(
                "session.max_queue_len must be at least 1".to_string(),
            ));
        }
        if self.session.event_buffer == 0 {
            return Err(ConfigError::Invalid(
                "session.event_buffer must be at least 1".to_string(),
            ));
        }
        if self.session.prekey_limit == 0 {
            return Err(ConfigError::Invalid(
                "session.prekey_limit must be at least 1".to_string(),
            ));
        }
        if parse_level(&self.logging.level).is_none() {
            return Err(ConfigError::Invalid(format!(
                "logging.level {} is not a log level",
                self.logging.level
            )));
        }
        Ok(())
    }

    pub fn core_config(&self) -> Result<CoreConfig, ConfigError> {
        self.validate()?;
        let local_id = PeerId::parse(&self.identity.peer_id)
            .ok_or_else(|| ConfigError::Invalid("identity.peer_id is empty".to_string()))?;
        let username = self
            .identity
            .username
            .clone()
            .unwrap_or_else(|| local_id.to_string());
        Ok(CoreConfig {
            local_id,
            username,
            drain_policy: self.session.drain_policy,
            max_queue_len: self.session.max_queue_len,
            event_buffer: self.session.event_buffer,
            polling_interval_ms: self.session.polling_interval_ms,
        })
    }

    pub fn level_filter(&self) -> LevelFilter {
        parse_level(&self.logging.level).unwrap_or(LevelFilter::Info)
    }
}

pub fn parse_level(level: &str) -> Option<LevelFilter> {
    match level.to_lowercase().as_str() {
        "off" => Some(LevelFilter::Off),
        "trace" => Some(LevelFilter::Trace),
        "debug" => Some(LevelFilter::Debug),
        "info" => Some(LevelFilter::Info),
        "warn" => Some(LevelFilter::Warn),
        "error" => Some(LevelFilter::Error),
        _ => None,
    }
}

pub fn parse_config(content: &str) -> Result<CourierConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
}

pub fn load_config(path: &Path) -> Result<CourierConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
    parse_config(&content)
}
