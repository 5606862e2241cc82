//! Server configuration.
//!
//! Configuration is loaded from the first TOML file found in the default
//! paths, falling back to defaults. `PARLEY_*` environment variables
//! override either.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default config file locations, in lookup order.
const CONFIG_PATHS: [&str; 3] = [
    "parley.toml",
    "/etc/parley/parley.toml",
    "~/.config/parley/parley.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP and WebSocket port.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub encryption: EncryptionConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            auth: AuthConfig::default(),
            encryption: EncryptionConfig::default(),
            storage: StorageConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// `[transport]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Route the WebSocket upgrade is served on.
    pub websocket_path: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: "/ws".into(),
        }
    }
}

/// `[limits]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Concurrent WebSocket sessions; upgrades past this get 503.
    pub max_connections: usize,
    /// Largest inbound WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Upper bound on `limit` for history requests.
    pub max_history: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_message_size: 64 * 1024,
            max_history: parley_core::pipeline::DEFAULT_MAX_HISTORY,
        }
    }
}

/// `[auth]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for session tokens.
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    /// bcrypt work factor for password hashes.
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "jwt-secret-2024".into(),
            token_ttl_hours: parley_core::auth::DEFAULT_TOKEN_TTL_HOURS,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

/// `[encryption]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Passphrase the message key is derived from.
    pub key: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key: "16byteencryptionkey".into(),
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory; lost on restart.
    Memory,
    /// JSON-lines logs under `data_dir`.
    File,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the file backend.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            data_dir: PathBuf::from("data"),
        }
    }
}

/// `[metrics]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve the Prometheus exporter.
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

impl Config {
    /// Load configuration from the default paths, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override holds an invalid value.
    pub fn load() -> Result<Self> {
        let found = CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        let mut config = match found {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse one TOML file. Missing sections and keys take their defaults.
    ///
    /// # Errors
    ///
    /// Fails when the file is unreadable or not valid config TOML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Apply `PARLEY_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if `PARLEY_PORT` is not a valid port.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("PARLEY_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PARLEY_PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("Invalid PARLEY_PORT: {port}"))?;
        }
        if let Some(secret) = lookup("PARLEY_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(key) = lookup("PARLEY_ENCRYPTION_KEY") {
            self.encryption.key = key;
        }
        if let Some(dir) = lookup("PARLEY_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(shellexpand::tilde(&dir).as_ref());
        }
        Ok(())
    }

    /// `host:port` as a socket address.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.limits.max_history, 100);
        assert_eq!(config.storage.backend, StorageBackend::File);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 5000);

        let config = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_connections = 500

            [storage]
            backend = "memory"

            [auth]
            jwt_secret = "from-file"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_connections, 500);
        assert_eq!(config.limits.max_history, 100);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.auth.jwt_secret, "from-file");
        assert_eq!(config.auth.token_ttl_hours, 24);
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.toml");
        std::fs::write(&path, "port = 7000\n").unwrap();

        assert_eq!(Config::from_file(&path).unwrap().port, 7000);
        assert!(Config::from_file(dir.path().join("missing.toml")).is_err());

        std::fs::write(&path, "port = \"high\"\n").unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PARLEY_HOST", "0.0.0.0"),
            ("PARLEY_PORT", "8081"),
            ("PARLEY_JWT_SECRET", "env-secret"),
            ("PARLEY_ENCRYPTION_KEY", "env-key"),
            ("PARLEY_DATA_DIR", "/var/lib/parley"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8081);
        assert_eq!(config.auth.jwt_secret, "env-secret");
        assert_eq!(config.encryption.key, "env-key");
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/parley"));
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = Config::default();
        let result = config.apply_overrides(|key| (key == "PARLEY_PORT").then(|| "abc".to_string()));
        assert!(result.is_err());
    }
}
