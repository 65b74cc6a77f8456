//! Pure connection configuration for the rumqttc backend
//!
//! Builds `MqttOptions` from a connect request and computes the network
//! thread's backoff after connection errors.

use crate::config::ReconnectSection;
use crate::transport::ClientError;
use rumqttc::MqttOptions;
use std::time::Duration;

/// Shortest keepalive accepted by the client
pub const MIN_KEEPALIVE: Duration = Duration::from_secs(5);

/// Largest packet accepted in either direction
pub const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Backoff applied by the network thread after a connection error
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delays in milliseconds for the first failures
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![25, 50, 100, 250], // 25ms, 50ms, 100ms, 250ms pattern
            sustained_delay: 250,                    // Stay at 250ms after pattern exhausted
        }
    }
}

impl From<&ReconnectSection> for ReconnectConfig {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            backoff_pattern: section.backoff_pattern_ms.clone(),
            sustained_delay: section.sustained_delay_ms,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay in milliseconds for the given consecutive failure (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// Validate a connect request and turn it into `MqttOptions`
pub fn configure_mqtt_options(
    client_id: &str,
    host: &str,
    port: u16,
    keepalive: Duration,
    credentials: Option<&(String, String)>,
) -> Result<MqttOptions, ClientError> {
    if client_id.is_empty() || client_id.starts_with(' ') {
        return Err(ClientError::invalid_argument(format!(
            "client id '{client_id}' must be non-empty and not start with a space"
        )));
    }
    if host.trim().is_empty() {
        return Err(ClientError::invalid_argument("host must not be empty"));
    }
    if port == 0 {
        return Err(ClientError::invalid_argument("port must be non-zero"));
    }
    if keepalive < MIN_KEEPALIVE {
        return Err(ClientError::invalid_argument(format!(
            "keepalive must be at least {}s",
            MIN_KEEPALIVE.as_secs()
        )));
    }

    let mut mqtt_options = MqttOptions::new(client_id, host, port);
    mqtt_options
        .set_keep_alive(Duration::from_secs(keepalive.as_secs()))
        .set_clean_session(true)
        .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    if let Some((username, password)) = credentials {
        mqtt_options.set_credentials(username.as_str(), password.as_str());
    }

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.backoff_pattern, vec![25, 50, 100, 250]);
        assert_eq!(config.sustained_delay, 250);
    }

    #[test]
    fn test_calculate_backoff_delay() {
        let config = ReconnectConfig::default();

        assert_eq!(config.calculate_backoff_delay(1), 25);
        assert_eq!(config.calculate_backoff_delay(2), 50);
        assert_eq!(config.calculate_backoff_delay(3), 100);
        assert_eq!(config.calculate_backoff_delay(4), 250);

        // Sustained delay after pattern exhausted
        assert_eq!(config.calculate_backoff_delay(5), 250);
        assert_eq!(config.calculate_backoff_delay(100), 250);
    }

    #[test]
    fn test_empty_pattern_uses_sustained_delay() {
        let config = ReconnectConfig {
            backoff_pattern: vec![],
            sustained_delay: 1000,
        };
        assert_eq!(config.calculate_backoff_delay(0), 1000);
        assert_eq!(config.calculate_backoff_delay(1), 1000);
    }

    #[test]
    fn test_from_reconnect_section() {
        let section = ReconnectSection {
            backoff_pattern_ms: vec![5, 10],
            sustained_delay_ms: 40,
        };
        let config = ReconnectConfig::from(&section);
        assert_eq!(config.calculate_backoff_delay(2), 10);
        assert_eq!(config.calculate_backoff_delay(3), 40);
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options =
            configure_mqtt_options("node-01", "localhost", 1883, Duration::from_secs(60), None)
                .unwrap();

        assert_eq!(options.client_id(), "node-01");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
    }

    #[test]
    fn test_configure_mqtt_options_with_credentials() {
        let credentials = ("alice".to_string(), "s3cret".to_string());
        let options = configure_mqtt_options(
            "node-01",
            "localhost",
            1883,
            Duration::from_secs(60),
            Some(&credentials),
        );
        assert!(options.is_ok());
    }

    #[test]
    fn test_configure_mqtt_options_rejects_bad_arguments() {
        let keepalive = Duration::from_secs(60);

        let cases = vec![
            configure_mqtt_options("", "localhost", 1883, keepalive, None),
            configure_mqtt_options(" padded", "localhost", 1883, keepalive, None),
            configure_mqtt_options("node", "", 1883, keepalive, None),
            configure_mqtt_options("node", "localhost", 0, keepalive, None),
            configure_mqtt_options("node", "localhost", 1883, Duration::from_secs(1), None),
        ];

        for result in cases {
            assert!(matches!(result, Err(ClientError::InvalidArgument(_))));
        }
    }
}
