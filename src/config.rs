//! Configuration file for the communicator
//!
//! A TOML file with three sections: `[communicator]` names the client and its
//! default topics, `[mqtt]` describes the broker connection and `[reconnect]`
//! tunes the network thread's backoff after a lost connection.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommunicatorConfig {
    pub communicator: CommunicatorSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// Identity and default topics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommunicatorSection {
    /// MQTT client identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    /// Topic subscribed to right after connecting
    pub subscribe_topic: String,
    /// Topic used by `send` when no topic is given
    pub publish_topic: String,
}

/// Broker connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Give up connecting after this many milliseconds (absent = retry forever)
    pub connect_timeout_ms: Option<u64>,
    /// Interval between reconnect requests while waiting for a connection
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
}

/// Backoff of the network thread after a connection error
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_backoff_pattern")]
    pub backoff_pattern_ms: Vec<u64>,
    #[serde(default = "default_sustained_delay_ms")]
    pub sustained_delay_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            backoff_pattern_ms: default_backoff_pattern(),
            sustained_delay_ms: default_sustained_delay_ms(),
        }
    }
}

fn default_port() -> u16 {
    1883
}

fn default_keepalive_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_backoff_pattern() -> Vec<u64> {
    vec![25, 50, 100, 250]
}

fn default_sustained_delay_ms() -> u64 {
    250
}

/// Shortest keepalive the MQTT client accepts
pub const MIN_KEEPALIVE_SECS: u64 = 5;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid client ID format: {0}")]
    InvalidClientId(String),
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CommunicatorConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CommunicatorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_client_id(&self.communicator.id)?;
        validate_topic_filter(&self.communicator.subscribe_topic)?;
        validate_publish_topic(&self.communicator.publish_topic)?;

        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.host must not be empty".to_string(),
            ));
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.port must be non-zero".to_string(),
            ));
        }
        if self.mqtt.keepalive_secs < MIN_KEEPALIVE_SECS {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt.keepalive_secs must be at least {MIN_KEEPALIVE_SECS}"
            )));
        }
        if self.mqtt.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.poll_interval_ms must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt.keepalive_secs)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.mqtt.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.mqtt.poll_interval_ms)
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.password_env.as_ref())
    }

    /// Username and password, when a username is configured and present
    ///
    /// A configured but unset password variable is an error rather than an
    /// empty password.
    pub fn credentials(&self) -> Result<Option<(String, String)>, ConfigError> {
        let Some(username) = self.get_mqtt_username() else {
            return Ok(None);
        };
        let password = match &self.mqtt.password_env {
            Some(name) => self
                .get_mqtt_password()
                .ok_or_else(|| ConfigError::EnvVarNotFound(name.clone()))?,
            None => String::new(),
        };
        Ok(Some((username, password)))
    }
}

/// Validate client ID format
pub fn validate_client_id(client_id: &str) -> Result<(), ConfigError> {
    let valid_chars = client_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if client_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidClientId(format!(
            "Client ID '{client_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

/// Subscription topics may use wildcards but must not be empty
pub fn validate_topic_filter(topic: &str) -> Result<(), ConfigError> {
    if topic.is_empty() {
        return Err(ConfigError::InvalidTopic("topic must not be empty".to_string()));
    }
    if topic.contains('\0') {
        return Err(ConfigError::InvalidTopic(format!(
            "topic '{}' contains a NUL character",
            topic.escape_default()
        )));
    }
    Ok(())
}

/// Publish topics additionally must not contain wildcards
pub fn validate_publish_topic(topic: &str) -> Result<(), ConfigError> {
    validate_topic_filter(topic)?;
    if topic.contains(['+', '#']) {
        return Err(ConfigError::InvalidTopic(format!(
            "publish topic '{topic}' must not contain wildcards"
        )));
    }
    Ok(())
}
