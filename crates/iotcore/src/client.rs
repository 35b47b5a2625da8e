//! Connection configuration for the bridge.
//!
//! `build_connection_config` assembles everything the MQTT transport needs to
//! reach the bridge as a given device:
//!
//! - broker URL, host and port
//! - the fully-qualified client identifier of the device
//! - a rustls client configuration trusting the supplied CA bundle, TLS 1.2+
//! - a credential-supply function (by default: fresh token per attempt, 1 minute ttl)
//!
//! Options are applied afterwards, in order, and may reject the configuration.
//!
//! # Examples
//!
//! ```ignore
//! use std::{fs::File, time::Duration};
//! use iotcore::{options, Broker, Device};
//!
//! let device = Device::new("my-project", "us-central1", "my-registry", "my-device", "device.pem");
//! let config = iotcore::build_connection_config(
//!     &device,
//!     &Broker::default_bridge(),
//!     File::open("roots.pem")?,
//!     vec![options::cache_jwt(Duration::from_secs(3600))],
//! )?;
//! let (client, event_loop) = iotcore::ConnectionBuilder::new(config).into_parts();
//! ```

use std::{
    fmt,
    fs::File,
    io::{BufReader, Read},
    path::Path,
    sync::Arc,
    time::Duration,
};

use rumqttc::{MqttOptions, TlsConfiguration, Transport};
use rustls::{ClientConfig, RootCertStore};
use tracing::{debug, info};

use crate::{
    broker::Broker,
    credentials::CredentialsProvider,
    device::Device,
    error::{IotCoreError, Result},
    options::ConfigOption,
};

/// Token lifetime used when no credential option is given.
pub const DEFAULT_JWT_TTL: Duration = Duration::from_secs(60);

/// Everything the transport needs to connect a device to the bridge.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// `ssl://{host}:{port}`
    pub broker_url: String,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// TLS client configuration trusting the CA bundle.
    pub tls: Arc<ClientConfig>,
    /// Invoked at the start of every connection attempt.
    pub credentials: CredentialsProvider,
    pub keep_alive: Duration,
    pub clean_session: bool,
    /// Capacity of the request channel between client handles and the event loop.
    pub request_channel_capacity: usize,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("broker_url", &self.broker_url)
            .field("client_id", &self.client_id)
            .field("keep_alive", &self.keep_alive)
            .field("clean_session", &self.clean_session)
            .field("request_channel_capacity", &self.request_channel_capacity)
            .finish_non_exhaustive()
    }
}

impl ConnectionConfig {
    /// Asks the credential-supply function for a username/password pair.
    pub fn credentials(&self) -> (String, String) {
        (self.credentials)()
    }

    /// Renders transport options for one connection attempt.
    ///
    /// Each call invokes the credential-supply function, so the options carry
    /// credentials that are valid right now.
    pub fn mqtt_options(&self) -> MqttOptions {
        let mut opts = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        opts.set_keep_alive(self.keep_alive);
        opts.set_clean_session(self.clean_session);

        let (username, password) = self.credentials();
        opts.set_credentials(username, password);

        opts.set_transport(Transport::Tls(TlsConfiguration::Rustls(self.tls.clone())));
        opts
    }
}

/// Builds the connection configuration for `device` on `broker`.
///
/// `trust_bundle` is a PEM stream of CA certificates. `options` are applied in
/// order; the first failing option aborts the build and its error is returned
/// unchanged.
///
/// # Errors
/// - `TrustBundle` if no certificate can be parsed from `trust_bundle`
/// - whatever a failing option returns
pub fn build_connection_config<R, I>(
    device: &Device,
    broker: &Broker,
    trust_bundle: R,
    options: I,
) -> Result<ConnectionConfig>
where
    R: Read,
    I: IntoIterator<Item = ConfigOption>,
{
    let roots = load_trust_bundle(trust_bundle)?;
    debug!("Loaded {} trusted CA certificates", roots.len());

    let mut config = ConnectionConfig {
        broker_url: broker.url(),
        host: broker.host.clone(),
        port: broker.port,
        client_id: device.client_id(),
        tls: tls_config(roots),
        credentials: device.credentials_provider(DEFAULT_JWT_TTL),
        keep_alive: Duration::from_secs(60),
        clean_session: true,
        request_channel_capacity: 10,
    };

    for option in options {
        option(device, &mut config)?;
    }

    info!(
        "Connection configured for {} via {}",
        config.client_id, config.broker_url
    );
    Ok(config)
}

/// Same as [`build_connection_config`], reading the trust bundle from a file.
pub fn build_connection_config_from_file<I>(
    device: &Device,
    broker: &Broker,
    ca_certs_path: impl AsRef<Path>,
    options: I,
) -> Result<ConnectionConfig>
where
    I: IntoIterator<Item = ConfigOption>,
{
    let path = ca_certs_path.as_ref();
    let file = File::open(path).map_err(|e| {
        IotCoreError::TrustBundle(format!("failed to read CA certs {}: {e}", path.display()))
    })?;
    build_connection_config(device, broker, file, options)
}

/// Parses every PEM certificate in `reader` into a root store.
///
/// Certificates rustls cannot use as trust anchors are skipped. At least one
/// usable certificate is required.
pub fn load_trust_bundle(reader: impl Read) -> Result<RootCertStore> {
    let mut reader = BufReader::new(reader);
    let mut roots = RootCertStore::empty();

    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert
            .map_err(|e| IotCoreError::TrustBundle(format!("failed to read CA certs: {e}")))?;
        if let Err(e) = roots.add(cert) {
            debug!("Skipping unusable CA certificate: {e}");
        }
    }

    if roots.is_empty() {
        return Err(IotCoreError::TrustBundle(
            "no CA certificates could be parsed".into(),
        ));
    }
    Ok(roots)
}

/// Server-authenticated TLS, 1.2 at minimum, no client certificate.
fn tls_config(roots: RootCertStore) -> Arc<ClientConfig> {
    let config = ClientConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS13,
        &rustls::version::TLS12,
    ])
    .with_root_certificates(roots)
    .with_no_client_auth();
    Arc::new(config)
}
