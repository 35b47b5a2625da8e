//! Configuration options for [`build_connection_config`](crate::build_connection_config).
//!
//! An option is a one-shot function that receives the device and the partially
//! built configuration. Options run in the order given, so a later option
//! overrides an earlier one touching the same field. An option returning an
//! error aborts the build.

use std::{path::PathBuf, time::Duration};

use crate::{
    client::ConnectionConfig,
    credentials::{CredentialsProvider, PersistErrorHook},
    device::Device,
    error::{IotCoreError, Result},
};

/// A fallible mutation of a connection configuration.
pub type ConfigOption = Box<dyn FnOnce(&Device, &mut ConnectionConfig) -> Result<()> + Send>;

/// Token lifetimes below one second cannot be expressed in the claims.
fn check_ttl(ttl: Duration) -> Result<()> {
    if ttl < Duration::from_secs(1) {
        return Err(IotCoreError::InvalidOption(format!(
            "token ttl must be at least 1s, got {ttl:?}"
        )));
    }
    Ok(())
}

/// Mints a fresh token with the given lifetime on every connection attempt.
pub fn jwt_ttl(ttl: Duration) -> ConfigOption {
    Box::new(move |device, config| {
        check_ttl(ttl)?;
        config.credentials = device.credentials_provider(ttl);
        Ok(())
    })
}

/// Keeps the last token in memory and reuses it while it verifies.
pub fn cache_jwt(ttl: Duration) -> ConfigOption {
    Box::new(move |device, config| {
        check_ttl(ttl)?;
        config.credentials = device.cached_credentials_provider(ttl);
        Ok(())
    })
}

/// Like [`cache_jwt`], and also stores the token in `path` so it survives restarts.
///
/// Write failures are logged and otherwise ignored.
pub fn persistently_cache_jwt(ttl: Duration, path: impl Into<PathBuf>) -> ConfigOption {
    let path = path.into();
    Box::new(move |device, config| {
        check_ttl(ttl)?;
        config.credentials = device.persistently_cached_credentials_provider(ttl, path, None);
        Ok(())
    })
}

/// [`persistently_cache_jwt`] with a hook that receives every write failure.
pub fn persistently_cache_jwt_observed(
    ttl: Duration,
    path: impl Into<PathBuf>,
    on_persist_error: PersistErrorHook,
) -> ConfigOption {
    let path = path.into();
    Box::new(move |device, config| {
        check_ttl(ttl)?;
        config.credentials =
            device.persistently_cached_credentials_provider(ttl, path, Some(on_persist_error));
        Ok(())
    })
}

/// Replaces the credential-supply function outright.
pub fn credentials(provider: CredentialsProvider) -> ConfigOption {
    Box::new(move |_, config| {
        config.credentials = provider;
        Ok(())
    })
}

/// MQTT keep alive interval. Zero disables keep alive; otherwise at least one second.
pub fn keep_alive(interval: Duration) -> ConfigOption {
    Box::new(move |_, config| {
        if !interval.is_zero() && interval < Duration::from_secs(1) {
            return Err(IotCoreError::InvalidOption(format!(
                "keep alive must be zero or at least 1s, got {interval:?}"
            )));
        }
        config.keep_alive = interval;
        Ok(())
    })
}

pub fn clean_session(clean: bool) -> ConfigOption {
    Box::new(move |_, config| {
        config.clean_session = clean;
        Ok(())
    })
}

/// Capacity of the request channel between client handles and the event loop.
pub fn request_channel_capacity(capacity: usize) -> ConfigOption {
    Box::new(move |_, config| {
        if capacity == 0 {
            return Err(IotCoreError::InvalidOption(
                "request channel capacity must be positive".into(),
            ));
        }
        config.request_channel_capacity = capacity;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        broker::Broker,
        build_connection_config,
        credentials::{INVALID_TOKEN, USERNAME},
        test_support::{self_signed_cert, TestDir},
    };

    const TTL: Duration = Duration::from_secs(600);

    fn build(device: &Device, opts: Vec<ConfigOption>) -> Result<ConnectionConfig> {
        let bundle = self_signed_cert("Test Root");
        build_connection_config(device, &Broker::default_bridge(), bundle.as_bytes(), opts)
    }

    #[test]
    fn test_jwt_ttl_mints_every_time() {
        let dir = TestDir::new();
        let device = dir.device("myproject");
        let config = build(&device, vec![jwt_ttl(TTL)]).unwrap();

        config.credentials();
        config.credentials();
        assert_eq!(device.cache.mint_count(), 2);
    }

    #[test]
    fn test_cache_jwt_reuses_token() {
        let dir = TestDir::new();
        let device = dir.device("myproject");
        let config = build(&device, vec![cache_jwt(TTL)]).unwrap();

        let (_, first) = config.credentials();
        let (_, second) = config.credentials();
        assert_eq!(first, second);
        assert_eq!(device.cache.mint_count(), 1);
    }

    #[test]
    fn test_later_credential_option_wins() {
        let dir = TestDir::new();
        let device = dir.device("myproject");
        let config = build(&device, vec![cache_jwt(TTL), jwt_ttl(TTL)]).unwrap();

        config.credentials();
        config.credentials();
        assert_eq!(device.cache.mint_count(), 2);
    }

    #[test]
    fn test_persistently_cache_jwt_writes_file() {
        let dir = TestDir::new();
        let device = dir.device("myproject");
        let path = dir.path().join("jwt");
        let config = build(&device, vec![persistently_cache_jwt(TTL, &path)]).unwrap();

        let (_, token) = config.credentials();
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), token);
    }

    #[test]
    fn test_persistently_cache_jwt_observed_reports_failures() {
        let dir = TestDir::new();
        let device = dir.device("myproject");
        let path = dir.path().join("missing-dir").join("jwt");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let hook: PersistErrorHook = Arc::new(move |err| {
            sink.lock().unwrap().push(err.to_string());
        });

        let config = build(&device, vec![persistently_cache_jwt_observed(TTL, &path, hook)]).unwrap();
        let (_, token) = config.credentials();

        assert!(device.verify_jwt(&token).unwrap());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_custom_credentials() {
        let dir = TestDir::new();
        let device = dir.device("myproject");
        let provider: CredentialsProvider =
            Arc::new(|| (USERNAME.to_string(), INVALID_TOKEN.to_string()));

        let config = build(&device, vec![credentials(provider)]).unwrap();
        assert_eq!(config.credentials().1, INVALID_TOKEN);
        assert_eq!(device.cache.mint_count(), 0);
    }

    #[test]
    fn test_keep_alive() {
        let dir = TestDir::new();
        let device = dir.device("myproject");

        let config = build(&device, vec![keep_alive(Duration::ZERO)]).unwrap();
        assert_eq!(config.keep_alive, Duration::ZERO);

        let result = build(&device, vec![keep_alive(Duration::from_millis(500))]);
        assert!(matches!(result, Err(IotCoreError::InvalidOption(_))));
    }

    #[test]
    fn test_sub_second_ttl_rejected() {
        let dir = TestDir::new();
        let device = dir.device("myproject");
        let cache_path = dir.path().join("jwt");
        let short = Duration::from_millis(900);

        for opt in [
            jwt_ttl(short),
            cache_jwt(short),
            persistently_cache_jwt(short, &cache_path),
            jwt_ttl(Duration::ZERO),
        ] {
            let result = build(&device, vec![opt]);
            assert!(matches!(result, Err(IotCoreError::InvalidOption(_))));
        }

        let config = build(&device, vec![cache_jwt(Duration::from_secs(2))]).unwrap();
        let (_, first) = config.credentials();
        let (_, second) = config.credentials();
        assert_eq!(first, second);
    }

    #[test]
    fn test_clean_session() {
        let dir = TestDir::new();
        let device = dir.device("myproject");
        let config = build(&device, vec![clean_session(false)]).unwrap();
        assert!(!config.clean_session);
    }

    #[test]
    fn test_request_channel_capacity() {
        let dir = TestDir::new();
        let device = dir.device("myproject");

        let config = build(&device, vec![request_channel_capacity(64)]).unwrap();
        assert_eq!(config.request_channel_capacity, 64);

        let result = build(&device, vec![request_channel_capacity(0)]);
        assert!(matches!(result, Err(IotCoreError::InvalidOption(_))));
    }
}
