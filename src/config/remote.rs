//! Remote progress channel configuration
//!
//! Broker address and credentials live in a small JSON file:
//!
//! ```json
//! { "stomp": { "server": "broker.example.org", "port": 61613,
//!              "user": "snap", "password": "secret" } }
//! ```
//!
//! Any problem loading it is a [`SnapError::Config`], which disables
//! remote publishing without stopping the copy.

use crate::error::{Result, SnapError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/e2snap.json";

/// Default STOMP port
pub const DEFAULT_STOMP_PORT: u16 = 61613;

fn default_port() -> u16 {
    DEFAULT_STOMP_PORT
}

/// STOMP broker connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StompSettings {
    /// Broker hostname or IP
    pub server: String,
    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login
    #[serde(default)]
    pub user: String,
    /// Passcode
    #[serde(default)]
    pub password: String,
}

impl StompSettings {
    /// `host:port` for connecting
    pub fn address(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}

/// Contents of the remote configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Broker used for progress publishing
    pub stomp: StompSettings,
}

impl RemoteSettings {
    /// Placeholder settings for a fresh configuration file
    pub fn sample() -> Self {
        Self {
            stomp: StompSettings {
                server: "stompserver.domain.tld".to_string(),
                port: DEFAULT_STOMP_PORT,
                user: "username".to_string(),
                password: "secure_enough_password".to_string(),
            },
        }
    }

    /// Parse settings from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(text)?;
        if settings.stomp.server.trim().is_empty() {
            return Err(SnapError::config("stomp server is empty"));
        }
        Ok(settings)
    }

    /// Load settings from a file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading remote settings from {:?}", path);
        let text = std::fs::read_to_string(path)
            .map_err(|e| SnapError::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&text)
            .map_err(|e| SnapError::config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Write the sample configuration, refusing to replace an existing file
    pub fn write_sample(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(SnapError::config(format!("{} already exists", path.display())));
        }
        let text = serde_json::to_string_pretty(&Self::sample())?;
        std::fs::write(path, text + "\n")
            .map_err(|e| SnapError::config(format!("cannot write {}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_settings() {
        let settings = RemoteSettings::from_json(
            r#"{"stomp": {"server": "mq.local", "user": "u", "password": "p"}}"#,
        )
        .unwrap();
        assert_eq!(settings.stomp.port, DEFAULT_STOMP_PORT);
        assert_eq!(settings.stomp.address(), "mq.local:61613");
    }

    #[test]
    fn test_missing_section_is_config_error() {
        let err = RemoteSettings::from_json(r#"{"other": {}}"#).unwrap_err();
        assert!(matches!(err, SnapError::Config(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = RemoteSettings::load(Path::new("/nonexistent/e2snap.json")).unwrap_err();
        assert!(matches!(err, SnapError::Config(_)));
    }

    #[test]
    fn test_sample_roundtrip_and_no_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("e2snap.json");

        RemoteSettings::write_sample(&path).unwrap();
        assert_eq!(RemoteSettings::load(&path).unwrap(), RemoteSettings::sample());
        assert!(RemoteSettings::write_sample(&path).is_err());
    }
}
