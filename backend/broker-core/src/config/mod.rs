use crate::error::config::ConfigError;

use common::{ErrorLocation, RedactedSecret};

use std::panic::Location;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "broker.json";
pub const CONFIG_DIR_ENV: &str = "RHOST_BROKER_CONFIG_DIR";
const CONFIG_DIR_NAME: &str = "rhost-broker";
const CONFIG_VERSION: u32 = 1;

const MIN_CHUNK_SIZE: usize = 1024;
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

// ============================================
// CONFIG STRUCTS
// ============================================

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// A user the broker accepts. `expires_at` is seconds since the Unix epoch.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub user: String,
    pub secret: RedactedSecret,
    #[serde(default)]
    pub expires_at: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    /// Empty means every configured account may open sessions.
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default = "default_token_lifetime_secs")]
    pub token_lifetime_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            allowed_users: Vec::new(),
            token_lifetime_secs: default_token_lifetime_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    pub host_path: Option<PathBuf>,
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    #[serde(default = "default_interrupt_timeout_ms")]
    pub interrupt_timeout_ms: u64,
    pub log_folder: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host_path: None,
            startup_timeout_ms: default_startup_timeout_ms(),
            interrupt_timeout_ms: default_interrupt_timeout_ms(),
            log_folder: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlobConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_max_out_of_order")]
    pub max_out_of_order: usize,
    /// Inbound blobs kept without a reader before the oldest is discarded.
    #[serde(default = "default_max_unclaimed")]
    pub max_unclaimed: usize,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_out_of_order: default_max_out_of_order(),
            max_unclaimed: default_max_unclaimed(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_relay_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub blobs: BlobConfig,

    #[serde(default)]
    pub relay: RelayConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            host: HostConfig::default(),
            blobs: BlobConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

// ============================================
// DEFAULT FUNCTIONS
// ============================================

fn default_version() -> u32 {
    CONFIG_VERSION
}
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5444
}
fn default_token_lifetime_secs() -> u64 {
    3600
}
fn default_startup_timeout_ms() -> u64 {
    30_000
}
fn default_interrupt_timeout_ms() -> u64 {
    5_000
}
fn default_chunk_size() -> usize {
    64 * 1024
}
fn default_max_out_of_order() -> usize {
    64
}
fn default_max_unclaimed() -> usize {
    64
}
fn default_relay_timeout_ms() -> u64 {
    30_000
}

// ============================================
// IMPLEMENTATION
// ============================================

/// `$RHOST_BROKER_CONFIG_DIR`, else `{config_dir}/rhost-broker`.
pub fn config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME)),
    }
}

impl BrokerConfig {
    /// Load config from {config_dir}/broker.json.
    ///
    /// A missing file yields defaults. A file that exists but cannot be read,
    /// parsed or validated is an error.
    #[track_caller]
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            info!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path).map_err(|e| {
            warn!("Failed to read config file: {e}");
            ConfigError::ReadError {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                source: e,
            }
        })?;

        let config: BrokerConfig = serde_json::from_str(&contents).map_err(|e| {
            warn!("Failed to parse config JSON: {e}");
            ConfigError::ParseError {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                reason: e.to_string(),
            }
        })?;

        config.validate()?;

        info!("Config loaded from {}", config_path.display());
        Ok(config)
    }

    #[track_caller]
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::ValidationError {
            location: ErrorLocation::from(Location::caller()),
            reason,
        };

        if self.version == 0 || self.version > CONFIG_VERSION {
            return Err(invalid(format!(
                "Invalid version: {} (expected 1-{CONFIG_VERSION})",
                self.version
            )));
        }

        if self.server.bind_address.is_empty() {
            return Err(invalid("server.bind_address cannot be empty".to_string()));
        }

        for account in &self.auth.accounts {
            if account.user.is_empty() {
                return Err(invalid("auth account with empty user".to_string()));
            }
            if account.secret.is_empty() {
                return Err(invalid(format!(
                    "auth account '{}' has an empty secret",
                    account.user
                )));
            }
        }

        if self.auth.token_lifetime_secs == 0 {
            return Err(invalid("auth.token_lifetime_secs must be > 0".to_string()));
        }

        if self.host.startup_timeout_ms == 0 || self.host.interrupt_timeout_ms == 0 {
            return Err(invalid("host timeouts must be > 0".to_string()));
        }

        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.blobs.chunk_size) {
            return Err(invalid(format!(
                "Invalid blob chunk size: {} (must be {MIN_CHUNK_SIZE}-{MAX_CHUNK_SIZE})",
                self.blobs.chunk_size
            )));
        }

        if self.blobs.max_out_of_order == 0 {
            return Err(invalid("blobs.max_out_of_order must be > 0".to_string()));
        }

        if self.blobs.max_unclaimed == 0 {
            return Err(invalid("blobs.max_unclaimed must be > 0".to_string()));
        }

        if self.relay.timeout_ms == 0 {
            return Err(invalid("relay.timeout_ms must be > 0".to_string()));
        }

        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.host.startup_timeout_ms)
    }

    pub fn interrupt_timeout(&self) -> Duration {
        Duration::from_millis(self.host.interrupt_timeout_ms)
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.auth.token_lifetime_secs)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay.timeout_ms)
    }
}
