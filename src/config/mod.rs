//! Agent configuration: loading, validation and early console output.
//!
//! One TOML file configures the whole agent. The connection sections
//! (`[device]`, `[broker]`, `[tls]`, `[auth]`, `[connection]`) sit at the top
//! level next to `[logger]` and `[agent]`.
//!
//! The configuration is loaded once at startup and never changes afterwards.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use validator::Validate;

use crate::config::{agent::AgentConfig, logger::LoggerConfig};

pub mod agent;
pub mod logger;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "IOTCORE_AGENT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/iotcore-agent/config.toml";

/// Timestamped messages for use before the tracing subscriber exists.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::timestamp()).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::timestamp()).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::timestamp()).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    };
}

#[doc(hidden)]
pub fn timestamp() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error while reading configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error while reading configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    #[validate(nested)]
    pub agent: AgentConfig,

    /// Device, broker, TLS, auth and connection settings.
    #[serde(flatten)]
    #[validate(nested)]
    pub iotcore: iotcore::Config,
}

impl Config {
    /// Locates the configuration file and loads it.
    pub fn new() -> Result<Self, ConfigError> {
        let path = resolve_config_path(
            std::env::var(CONFIG_ENV).ok(),
            std::env::args().nth(1),
            Path::new(DEFAULT_CONFIG_PATH),
        )?;
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&raw)?;

        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        if !config.logger.has_output() {
            return Err(ConfigError::Config(
                "at least one of logger.console and logger.journald must be enabled".into(),
            ));
        }
        Ok(config)
    }
}

/// Picks the configuration file, in order: the environment variable, the
/// first command line argument, the default path.
fn resolve_config_path(
    from_env: Option<String>,
    from_args: Option<String>,
    fallback: &Path,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = from_env.filter(|p| !p.is_empty()) {
        print_info!("Using config from {CONFIG_ENV}: {path}");
        return Ok(PathBuf::from(path));
    }

    if let Some(path) = from_args {
        print_info!("Using config from command line: {path}");
        return Ok(PathBuf::from(path));
    }

    if fallback.exists() {
        print_info!("Using default config path: {}", fallback.display());
        return Ok(fallback.to_path_buf());
    }

    Err(ConfigError::Config(format!(
        "no configuration file found: set {CONFIG_ENV}, pass a path, or create {}",
        fallback.display()
    )))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn sample(dir: &Path) -> String {
        let roots = dir.join("roots.pem");
        fs::write(&roots, "placeholder").unwrap();
        format!(
            r#"
            [logger]
            level = "debug"

            [agent]
            heartbeat_interval = 10

            [device]
            project_id = "my-project"
            region = "us-central1"
            registry_id = "my-registry"
            device_id = "my-device"
            private_key_path = "/etc/iotcore/device.pem"

            [broker]
            preset = "lts"

            [tls]
            ca_certs_path = "{}"

            [auth]
            cache = "none"
            jwt_ttl = 1200
            "#,
            roots.display()
        )
    }

    #[test]
    fn test_parse_full_file() {
        let dir = TempDir::new().unwrap();
        let config = Config::parse(&sample(dir.path())).unwrap();

        assert_eq!(config.logger.level, "debug");
        assert_eq!(config.agent.heartbeat_interval, 10);
        assert_eq!(config.iotcore.device.project_id, "my-project");
        assert_eq!(config.iotcore.broker().url(), "ssl://mqtt.2030.ltsapis.goog:8883");
        assert_eq!(config.iotcore.auth.jwt_ttl, 1200);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, sample(dir.path())).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.iotcore.device.device_id, "my-device");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = Config::load(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            Config::parse("[device\nproject_id = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validation_reaches_nested_sections() {
        let dir = TempDir::new().unwrap();
        let raw = sample(dir.path()).replace("jwt_ttl = 1200", "jwt_ttl = 0");
        assert!(matches!(
            Config::parse(&raw),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_logger_needs_an_output() {
        let dir = TempDir::new().unwrap();
        let raw = sample(dir.path()).replace(
            "level = \"debug\"",
            "level = \"debug\"\n[logger.console]\nenabled = false",
        );
        assert!(matches!(Config::parse(&raw), Err(ConfigError::Config(_))));
    }

    #[test]
    fn test_config_path_order() {
        let dir = TempDir::new().unwrap();
        let fallback = dir.path().join("config.toml");

        let path = resolve_config_path(Some("/a.toml".into()), Some("/b.toml".into()), &fallback);
        assert_eq!(path.unwrap(), PathBuf::from("/a.toml"));

        let path = resolve_config_path(None, Some("/b.toml".into()), &fallback);
        assert_eq!(path.unwrap(), PathBuf::from("/b.toml"));

        assert!(resolve_config_path(None, None, &fallback).is_err());

        fs::write(&fallback, "").unwrap();
        assert_eq!(resolve_config_path(None, None, &fallback).unwrap(), fallback);
    }

    #[test]
    fn test_empty_env_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = resolve_config_path(Some(String::new()), Some("/b.toml".into()), dir.path());
        assert_eq!(path.unwrap(), PathBuf::from("/b.toml"));
    }
}
