use dotenvy::dotenv;
use log::info;
use std::env;
use std::time::Duration;

use crate::common::crypto::IteratedSha256;
use crate::common::protocol::{
    LegacyLineSchema, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RESPONSE_BUFFER,
    LEGACY_LINE_V1,
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// How many unclaimed server replies are kept before the oldest is dropped.
    pub response_buffer: usize,
    pub hash_salt: String,
    pub hash_iterations: u32,
    pub legacy_line: LegacyLineSchema,
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_millis(3000),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            response_buffer: DEFAULT_RESPONSE_BUFFER,
            hash_salt: "pulsar".to_string(),
            hash_iterations: 16,
            legacy_line: LEGACY_LINE_V1,
            log_level: "info".to_string(),
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl ClientConfig {
    pub fn from_env() -> Self {
        dotenv().ok();
        let defaults = Self::default();

        let legacy_line = LegacyLineSchema::new(
            parsed("PULSAR_LEGACY_ID_WIDTH").unwrap_or(defaults.legacy_line.id_width),
            parsed("PULSAR_LEGACY_TIME_WIDTH").unwrap_or(defaults.legacy_line.time_width),
            defaults.legacy_line.separator,
        );

        Self {
            host: env::var("PULSAR_HOST").unwrap_or(defaults.host),
            port: parsed("PULSAR_PORT").unwrap_or(defaults.port),
            connect_timeout: parsed("PULSAR_CONNECT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            request_timeout: parsed("PULSAR_REQUEST_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            response_buffer: parsed::<usize>("PULSAR_RESPONSE_BUFFER")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.response_buffer),
            hash_salt: env::var("PULSAR_HASH_SALT").unwrap_or(defaults.hash_salt),
            hash_iterations: parsed("PULSAR_HASH_ITERATIONS").unwrap_or(defaults.hash_iterations),
            legacy_line,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }

    /// Called once the logger is installed, since the level comes from this config.
    pub fn log_summary(&self) {
        info!("Client configuration loaded:");
        info!("  Server: {}:{}", self.host, self.port);
        info!("  Request timeout: {:?}", self.request_timeout);
        info!("  Response buffer: {}", self.response_buffer);
        info!("  Log level: {}", self.log_level);
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn hasher(&self) -> IteratedSha256 {
        IteratedSha256::new(self.hash_salt.clone(), self.hash_iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.address(), "127.0.0.1:4171");
        assert_eq!(config.legacy_line, LEGACY_LINE_V1);
        assert!(config.response_buffer > 0);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_log_level_from_env() {
        env::set_var("LOG_LEVEL", "debug");
        let config = ClientConfig::from_env();
        env::remove_var("LOG_LEVEL");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.legacy_line, LEGACY_LINE_V1);
    }
}
