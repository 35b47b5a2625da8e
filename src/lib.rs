//! iotcore-agent: a device agent for a managed IoT MQTT bridge.
//!
//! The agent authenticates with short-lived ES256 tokens, keeps the session
//! alive across network failures, reports the device online after each
//! connect and publishes a periodic heartbeat.
//!
//! ## Modules
//!
//! * `config`: The TOML configuration file, its validation and the console
//!   macros used before logging is up.
//!
//! * `core`: Runtime tasks:
//!   - Heartbeat and state executor
//!   - Inbound configuration and command listener
//!
//! * `logger`: `tracing` subscriber installation with console output in
//!   several formats and optional journald.
//!
//! Connection handling itself lives in the `iotcore` crate.

pub mod config;
pub mod core;
pub mod logger;
