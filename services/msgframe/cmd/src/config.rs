//! Configuration handling for the msgframe binary.
//!
//! Settings come from the `services.msgframe` section of a shared YAML file,
//! then from `MSGFRAME_*` environment variables. Command-line flags are
//! applied on top by the caller.

use anyhow::Result;
use msgframe_transport::TransportConfig;
use msgframe_wire::HARD_MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// msgframe binary configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgframeConfig {
    /// Address servers bind to and clients connect to
    pub endpoint: String,
    /// Largest envelope accepted or produced, in bytes
    pub max_frame_size: usize,
    /// Largest multi-part message accepted from a peer, in bytes
    pub max_message_size: usize,
    /// Messages queued per direction
    pub queue_capacity: usize,
    /// Time allowed for the HELLO exchange (seconds)
    pub handshake_timeout: u64,
}

impl Default for MsgframeConfig {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            endpoint: "127.0.0.1:5555".to_string(),
            max_frame_size: transport.max_frame_size,
            max_message_size: transport.max_message_size,
            queue_capacity: transport.queue_capacity,
            handshake_timeout: transport.handshake_timeout.as_secs(),
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    msgframe: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    config: Option<HashMap<String, String>>,
}

impl MsgframeConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?}, using defaults: {}",
                    config_path.as_ref(),
                    e
                ),
            },
            Err(_) => warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            ),
        }

        config.apply_environment_overrides();
        config.validate()?;

        info!(
            "Final msgframe configuration: endpoint={}, max_frame_size={}, max_message_size={}, queue_capacity={}, handshake_timeout={}s",
            config.endpoint,
            config.max_frame_size,
            config.max_message_size,
            config.queue_capacity,
            config.handshake_timeout
        );

        Ok(config)
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        let entries = root_config
            .services
            .and_then(|services| services.msgframe)
            .and_then(|service| service.config);

        for (key, value) in entries.into_iter().flatten() {
            match key.as_str() {
                "services.msgframe.endpoint" => self.endpoint = value,
                "services.msgframe.max_frame_size" => {
                    if let Ok(size) = value.parse::<usize>() {
                        self.max_frame_size = size;
                    }
                }
                "services.msgframe.max_message_size" => {
                    if let Ok(size) = value.parse::<usize>() {
                        self.max_message_size = size;
                    }
                }
                "services.msgframe.queue_capacity" => {
                    if let Ok(capacity) = value.parse::<usize>() {
                        self.queue_capacity = capacity;
                    }
                }
                "services.msgframe.handshake_timeout" => {
                    if let Ok(secs) = value.parse::<u64>() {
                        self.handshake_timeout = secs;
                    }
                }
                _ => {}
            }
        }
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var("MSGFRAME_ENDPOINT") {
            self.endpoint = endpoint;
            info!("Endpoint overridden by environment: {}", self.endpoint);
        }

        if let Ok(size) = std::env::var("MSGFRAME_MAX_FRAME_SIZE") {
            if let Ok(size) = size.parse::<usize>() {
                self.max_frame_size = size;
                info!("Max frame size overridden by environment: {}", size);
            }
        }

        if let Ok(capacity) = std::env::var("MSGFRAME_QUEUE_CAPACITY") {
            if let Ok(capacity) = capacity.parse::<usize>() {
                self.queue_capacity = capacity;
                info!("Queue capacity overridden by environment: {}", capacity);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_frame_size == 0 || self.max_frame_size > HARD_MAX_FRAME_SIZE {
            anyhow::bail!(
                "max_frame_size must be between 1 and {}, got {}",
                HARD_MAX_FRAME_SIZE,
                self.max_frame_size
            );
        }
        if self.max_message_size == 0 {
            anyhow::bail!("max_message_size must be at least 1");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be at least 1");
        }
        if self.handshake_timeout == 0 {
            anyhow::bail!("handshake_timeout must be at least 1 second");
        }
        Ok(())
    }

    /// Endpoint tuning derived from this configuration
    pub fn to_transport_config(&self) -> TransportConfig {
        TransportConfig {
            max_frame_size: self.max_frame_size,
            max_message_size: self.max_message_size,
            queue_capacity: self.queue_capacity,
            handshake_timeout: Duration::from_secs(self.handshake_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = MsgframeConfig::default();
        assert_eq!(config.endpoint, "127.0.0.1:5555");
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.handshake_timeout, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
services:
  msgframe:
    enabled: true
    config:
      services.msgframe.endpoint: "0.0.0.0:7000"
      services.msgframe.max_frame_size: "65536"
      services.msgframe.handshake_timeout: "2"
      services.msgframe.max_message_size: "1048576"
      services.msgframe.unknown: "ignored"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = MsgframeConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.endpoint, "0.0.0.0:7000");
        assert_eq!(config.max_frame_size, 65536);
        assert_eq!(config.handshake_timeout, 2);

        let transport = config.to_transport_config();
        assert_eq!(transport.max_frame_size, 65536);
        assert_eq!(transport.handshake_timeout, Duration::from_secs(2));
        assert_eq!(transport.max_message_size, 1048576);
    }

    #[test]
    fn test_malformed_file_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"services: [not, a, map").unwrap();

        let config = MsgframeConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.max_frame_size, MsgframeConfig::default().max_frame_size);
    }

    #[test]
    fn test_rejects_oversized_limit() {
        let config = MsgframeConfig {
            max_frame_size: HARD_MAX_FRAME_SIZE + 1,
            ..MsgframeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_handshake_timeout() {
        let config = MsgframeConfig {
            handshake_timeout: 0,
            ..MsgframeConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("handshake_timeout"));

        let config = MsgframeConfig {
            max_message_size: 0,
            ..MsgframeConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
