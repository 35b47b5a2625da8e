//! File configuration for a device connection.
//!
//! Every section deserializes with defaults and is checked with `validator`
//! when turned into runtime values, so a bad file fails at startup rather than
//! at the first connection attempt.
//!
//! ```toml
//! [device]
//! project_id = "my-project"
//! region = "us-central1"
//! registry_id = "my-registry"
//! device_id = "my-device"
//! private_key_path = "/etc/iotcore/device.pem"
//!
//! [broker]
//! preset = "lts"
//!
//! [tls]
//! ca_certs_path = "/etc/iotcore/roots.pem"
//!
//! [auth]
//! jwt_ttl = 3600
//! cache = "disk"
//! cache_path = "/var/lib/iotcore/jwt"
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::info;
use validator::{Validate, ValidationError};

use crate::{
    backoff::Backoff,
    broker::Broker,
    cert::device_id_from_certificate,
    client::{build_connection_config_from_file, ConnectionConfig},
    device::Device,
    error::{IotCoreError, Result},
    options::{self, ConfigOption},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub device: DeviceConfig,
    #[validate(nested)]
    pub broker: BrokerConfig,
    #[validate(nested)]
    pub tls: TlsConfig,
    #[validate(nested)]
    pub auth: AuthConfig,
    #[validate(nested)]
    pub connection: ConnectionSettings,
}

/// Identity of the device in the registry hierarchy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DeviceConfig {
    #[validate(length(min = 1, message = "Project id must not be empty"))]
    pub project_id: String,

    #[validate(length(min = 1, message = "Region must not be empty"))]
    pub region: String,

    #[validate(length(min = 1, message = "Registry id must not be empty"))]
    pub registry_id: String,

    /// Leave empty to take the id from `certificate_path`.
    pub device_id: String,

    /// EC P-256 key in PEM form. Read at every mint, so it is not checked here.
    #[validate(length(min = 1, message = "Private key path must not be empty"))]
    pub private_key_path: String,

    /// Provisioned device certificate whose subject CN is the device id.
    pub certificate_path: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerPreset {
    #[default]
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "default-443")]
    Default443,
    #[serde(rename = "lts")]
    Lts,
    #[serde(rename = "lts-443")]
    Lts443,
}

/// Bridge address: a preset, optionally overridden field by field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BrokerConfig {
    pub preset: BrokerPreset,

    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: Option<String>,

    #[validate(range(min = 1, message = "Port must be between 1 and 65535"))]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TlsConfig {
    /// PEM bundle of CA certificates trusted for the bridge.
    #[validate(custom(function = "validate_file_exists"))]
    pub ca_certs_path: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca_certs_path: "/etc/iotcore/roots.pem".to_string(),
        }
    }
}

/// Where minted tokens are kept between connection attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenCacheMode {
    /// Mint on every attempt.
    None,
    /// Reuse the last token while it verifies.
    #[default]
    Memory,
    /// Keep the token only in `cache_path`, read back on every attempt, so
    /// it survives restarts.
    Disk,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AuthConfig {
    /// Token lifetime in seconds. The bridge refuses tokens valid for more than a day.
    #[validate(range(
        min = 1,
        max = 86400,
        message = "JWT ttl must be between 1 second and 24 hours"
    ))]
    pub jwt_ttl: u64,

    pub cache: TokenCacheMode,

    /// Required with `cache = "disk"`.
    pub cache_path: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_ttl: 3600,
            cache: TokenCacheMode::default(),
            cache_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Seconds.
    #[validate(range(
        min = 5,
        max = 1200,
        message = "Keep alive must be between 5 and 1200 seconds"
    ))]
    pub keep_alive: u64,

    pub clean_session: bool,

    #[validate(range(
        min = 1,
        max = 1024,
        message = "Request channel capacity must be between 1 and 1024"
    ))]
    pub request_channel_capacity: usize,

    /// First reconnect delay, seconds.
    #[validate(range(
        min = 1,
        max = 60,
        message = "Reconnect delay must be between 1 and 60 seconds"
    ))]
    pub reconnect_delay: u64,

    /// Reconnect delay plateau, seconds.
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Max reconnect delay must be between 1 and 3600 seconds"
    ))]
    pub max_reconnect_delay: u64,

    #[validate(range(
        min = 1.0,
        max = 10.0,
        message = "Reconnect backoff multiplier must be between 1.0 and 10.0"
    ))]
    pub reconnect_backoff_multiplier: f64,

    /// 0 retries forever.
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            keep_alive: 60,
            clean_session: true,
            request_channel_capacity: 10,
            reconnect_delay: 1,
            max_reconnect_delay: 120,
            reconnect_backoff_multiplier: 2.0,
            max_reconnect_attempts: 0,
        }
    }
}

impl Config {
    /// The device identity, deriving the device id from the certificate when
    /// `device_id` is empty.
    pub fn device(&self) -> Result<Device> {
        self.validate()?;
        let d = &self.device;

        let device_id = match (d.device_id.is_empty(), &d.certificate_path) {
            (false, _) => d.device_id.clone(),
            (true, Some(cert)) => {
                let id = device_id_from_certificate(cert)?;
                info!("Using device id {id:?} from {cert}");
                id
            }
            (true, None) => {
                return Err(IotCoreError::Config(
                    "either device.device_id or device.certificate_path must be set".into(),
                ))
            }
        };

        Ok(Device::new(
            &d.project_id,
            &d.region,
            &d.registry_id,
            device_id,
            &d.private_key_path,
        ))
    }

    pub fn broker(&self) -> Broker {
        let mut broker = match self.broker.preset {
            BrokerPreset::Default => Broker::default_bridge(),
            BrokerPreset::Default443 => Broker::default_bridge_443(),
            BrokerPreset::Lts => Broker::lts_bridge(),
            BrokerPreset::Lts443 => Broker::lts_bridge_443(),
        };
        if let Some(host) = &self.broker.host {
            broker.host = host.clone();
        }
        if let Some(port) = self.broker.port {
            broker.port = port;
        }
        broker
    }

    /// Configuration options matching the `[auth]` and `[connection]` sections.
    pub fn options(&self) -> Result<Vec<ConfigOption>> {
        let ttl = Duration::from_secs(self.auth.jwt_ttl);
        let credentials = match (self.auth.cache, &self.auth.cache_path) {
            (TokenCacheMode::None, _) => options::jwt_ttl(ttl),
            (TokenCacheMode::Memory, _) => options::cache_jwt(ttl),
            (TokenCacheMode::Disk, Some(path)) => options::persistently_cache_jwt(ttl, path),
            (TokenCacheMode::Disk, None) => {
                return Err(IotCoreError::Config(
                    "auth.cache = \"disk\" requires auth.cache_path".into(),
                ))
            }
        };

        let c = &self.connection;
        Ok(vec![
            credentials,
            options::keep_alive(Duration::from_secs(c.keep_alive)),
            options::clean_session(c.clean_session),
            options::request_channel_capacity(c.request_channel_capacity),
        ])
    }

    /// Validates the whole configuration and builds the connection for `device`.
    pub fn connection_config(&self, device: &Device) -> Result<ConnectionConfig> {
        self.validate()?;
        build_connection_config_from_file(
            device,
            &self.broker(),
            &self.tls.ca_certs_path,
            self.options()?,
        )
    }

    pub fn backoff(&self) -> Backoff {
        let c = &self.connection;
        Backoff::new(
            Duration::from_secs(c.reconnect_delay),
            Duration::from_secs(c.max_reconnect_delay),
            c.reconnect_backoff_multiplier,
        )
        .with_max_attempts(c.max_reconnect_attempts)
    }
}

fn validate_file_exists(path: &str) -> std::result::Result<(), ValidationError> {
    if path.is_empty() {
        return Err(
            ValidationError::new("empty_path").with_message("File path cannot be empty".into())
        );
    }
    if !Path::new(path).is_file() {
        return Err(ValidationError::new("file_not_found")
            .with_message(format!("File does not exist: {path}").into()));
    }
    Ok(())
}
