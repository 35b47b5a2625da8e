//! # iotcore: device connectivity for a managed IoT MQTT bridge
//!
//! The bridge identifies a device by a fully-qualified client id and
//! authenticates every connection with a short-lived ES256 JWT signed by the
//! device key. This crate takes care of both:
//!
//! - **Naming**: client id and the config, command, telemetry and state topics
//! - **Tokens**: minting and verifying device JWTs
//! - **Credential strategies**: mint per attempt, cache in memory, or cache on disk
//! - **Connection configuration**: TLS trust bundle, credentials, ordered options
//! - **Connection kernel**: reconnects with backoff and fresh credentials on every attempt
//!
//! # Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use iotcore::{options, Broker, ConnectionBuilder, Device};
//! use tokio_util::sync::CancellationToken;
//!
//! let device = Device::new("my-project", "us-central1", "my-registry", "my-device", "device.pem");
//! let config = iotcore::build_connection_config_from_file(
//!     &device,
//!     &Broker::default_bridge(),
//!     "roots.pem",
//!     vec![options::cache_jwt(Duration::from_secs(3600))],
//! )?;
//!
//! let mut kernel = ConnectionBuilder::new(config).into_kernel(CancellationToken::new());
//! kernel.subscribe(device.config_topic(), rumqttc::QoS::AtLeastOnce);
//! let client = kernel.client();
//! tokio::spawn(async move { kernel.run().await });
//!
//! client
//!     .publish(device.telemetry_topic(), rumqttc::QoS::AtLeastOnce, false, "21.5")
//!     .await?;
//! ```
//!
//! # Credential strategies
//!
//! The transport asks for credentials at the start of every connection
//! attempt. Which token it gets depends on the option chosen:
//!
//! ```text
//! jwt_ttl(ttl)                      mint ─────────────────────────► password
//! cache_jwt(ttl)                    verify cached ─ ok ───────────► password
//!                                          └─ stale ─ mint, store ─► password
//! persistently_cache_jwt(ttl, path) verify file ─ ok ─────────────► password
//!                                          └─ stale ─ mint, write ─► password
//! ```
//!
//! A token that cannot be minted is replaced by [`credentials::INVALID_TOKEN`]:
//! the broker refuses that attempt and the kernel retries later.

pub mod backoff;
pub mod broker;
pub mod cert;
pub mod client;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod device;
pub mod error;
pub mod options;
pub mod state;
pub mod token;

#[cfg(test)]
mod test_support;

pub use backoff::{Backoff, BackoffError};
pub use broker::Broker;
pub use cert::device_id_from_certificate;
pub use client::{
    build_connection_config, build_connection_config_from_file, load_trust_bundle,
    ConnectionConfig, DEFAULT_JWT_TTL,
};
pub use config::Config;
pub use connection::{ConnectionBuilder, ConnectionKernel};
pub use credentials::{CredentialsProvider, PersistErrorHook};
pub use device::Device;
pub use error::{IotCoreError, Result};
pub use options::ConfigOption;
pub use state::ConnectionState;
// The transport types that appear in this crate's API.
pub use rumqttc::{AsyncClient, Publish, QoS};
