//! Credential-supply strategies invoked by the transport on every connection attempt.
//!
//! The transport asks for `(username, password)` at the start of each attempt
//! through a plain callback with no error channel. The bridge ignores the
//! username; the password carries the device JWT.
//!
//! Three strategies are available:
//!
//! | Strategy   | Constructor                                           | Token reuse                   |
//! |------------|-------------------------------------------------------|-------------------------------|
//! | no cache   | [`Device::credentials_provider`]                      | never, mint per attempt       |
//! | in memory  | [`Device::cached_credentials_provider`]               | while the cached token verifies |
//! | durable    | [`Device::persistently_cached_credentials_provider`]  | while the token file verifies |
//!
//! The caching strategies hold the device's cache lock across the whole
//! verify, mint and store sequence, so concurrent reconnect attempts never
//! mint more than one token for an empty or stale cache.
//!
//! If a token cannot be minted the strategies return [`INVALID_TOKEN`] as the
//! password. The following authentication attempt is then refused by the
//! broker instead of the client crashing or hanging.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tracing::{debug, error, warn};

use crate::{device::Device, error::IotCoreError};

/// Username sent to the bridge, which ignores it.
pub const USERNAME: &str = "unused";

/// Password sent when no token could be minted. Never a valid JWT.
pub const INVALID_TOKEN: &str = "invalid-jwt";

/// Callback returning `(username, password)` for a connection attempt.
pub type CredentialsProvider = Arc<dyn Fn() -> (String, String) + Send + Sync>;

/// Observer for failed writes of the durable token cache.
///
/// Receives an [`IotCoreError::Persistence`]. The freshly minted token is used
/// for the connection attempt regardless.
pub type PersistErrorHook = Arc<dyn Fn(&IotCoreError) + Send + Sync>;

/// Most recently minted token of a device, guarded by the device's cache lock.
#[derive(Debug, Default)]
pub(crate) struct TokenCache {
    token: Mutex<String>,
    #[cfg(test)]
    mints: std::sync::atomic::AtomicUsize,
}

impl TokenCache {
    /// Acquires the cache lock. A poisoned lock is recovered: the guarded value
    /// is a plain string and at worst holds a token that fails verification.
    fn lock(&self) -> MutexGuard<'_, String> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn mint_count(&self) -> usize {
        self.mints.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Device {
    /// Mints a fresh token on every invocation.
    pub fn credentials_provider(&self, ttl: Duration) -> CredentialsProvider {
        let device = self.clone();
        Arc::new(move || credentials(mint_or_invalid(&device, ttl)))
    }

    /// Reuses the last minted token while it verifies, otherwise mints and
    /// caches a new one.
    pub fn cached_credentials_provider(&self, ttl: Duration) -> CredentialsProvider {
        let device = self.clone();
        Arc::new(move || {
            let mut cached = device.cache.lock();

            if matches!(device.verify_jwt(&cached), Ok(true)) {
                debug!("Reusing cached token");
                return credentials(cached.clone());
            }

            match mint(&device, ttl) {
                Ok(token) => {
                    *cached = token.clone();
                    credentials(token)
                }
                Err(e) => {
                    error!("Failed to mint token, sending invalid credentials: {e}");
                    credentials(INVALID_TOKEN.to_string())
                }
            }
        })
    }

    /// Reuses the token stored at `path` while it verifies, otherwise mints a
    /// new one and writes it to `path` with owner-only permissions.
    ///
    /// Write failures do not affect the returned credentials. They are logged
    /// and passed to `on_persist_error` when one is given.
    pub fn persistently_cached_credentials_provider(
        &self,
        ttl: Duration,
        path: impl Into<PathBuf>,
        on_persist_error: Option<PersistErrorHook>,
    ) -> CredentialsProvider {
        let device = self.clone();
        let path = path.into();
        Arc::new(move || {
            let _guard = device.cache.lock();

            if let Ok(stored) = fs::read_to_string(&path) {
                let stored = stored.trim();
                if matches!(device.verify_jwt(stored), Ok(true)) {
                    debug!("Reusing token stored at {}", path.display());
                    return credentials(stored.to_string());
                }
            }

            let token = match mint(&device, ttl) {
                Ok(token) => token,
                Err(e) => {
                    error!("Failed to mint token, sending invalid credentials: {e}");
                    return credentials(INVALID_TOKEN.to_string());
                }
            };

            if let Err(source) = write_token(&path, &token) {
                let err = IotCoreError::Persistence {
                    path: path.clone(),
                    source,
                };
                warn!("{err}");
                if let Some(hook) = &on_persist_error {
                    hook(&err);
                }
            }

            credentials(token)
        })
    }
}

fn credentials(token: String) -> (String, String) {
    (USERNAME.to_string(), token)
}

fn mint(device: &Device, ttl: Duration) -> Result<String, IotCoreError> {
    #[cfg(test)]
    device
        .cache
        .mints
        .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let token = device.new_jwt(ttl)?;
    debug!(ttl_secs = ttl.as_secs(), "Minted new token for {}", device.client_id());
    Ok(token)
}

fn mint_or_invalid(device: &Device, ttl: Duration) -> String {
    mint(device, ttl).unwrap_or_else(|e| {
        error!("Failed to mint token, sending invalid credentials: {e}");
        INVALID_TOKEN.to_string()
    })
}

/// Replaces the token file wholesale, restricting it to owner read/write.
fn write_token(path: &Path, token: &str) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    // `mode` only applies on creation.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    file.write_all(token.as_bytes())?;
    file.flush()
}
