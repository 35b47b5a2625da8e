//! Drives the bridge session: event loop, reconnects and fresh credentials.
//!
//! - `ConnectionBuilder` turns a [`ConnectionConfig`] into a `rumqttc` client
//!   and event loop. Creating it invokes the credential-supply function once,
//!   for the first attempt.
//! - `ConnectionKernel` polls the event loop until cancelled. After a failed
//!   or lost session it waits out the backoff delay and asks the
//!   credential-supply function again before the next attempt, so every
//!   CONNECT carries a token that is valid at that moment.
//!
//! ```text
//! application ── AsyncClient ──┐
//!                              ▼
//!                     ConnectionKernel ── credentials() on every reconnect
//!                              │
//!                      rumqttc EventLoop ── TLS ── bridge
//! ```

use std::{io, time::Duration};

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet, Publish,
    QoS, StateError,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    backoff::Backoff,
    client::ConnectionConfig,
    credentials::CredentialsProvider,
    error::Result,
    state::ConnectionState,
};

const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Client and event loop for one device, not yet running.
pub struct ConnectionBuilder {
    client: AsyncClient,
    event_loop: EventLoop,
    credentials: CredentialsProvider,
}

impl ConnectionBuilder {
    pub fn new(config: ConnectionConfig) -> Self {
        let (client, event_loop) =
            AsyncClient::new(config.mqtt_options(), config.request_channel_capacity);
        debug!("Created MQTT client {}", config.client_id);

        Self {
            client,
            event_loop,
            credentials: config.credentials,
        }
    }

    pub fn client(&self) -> &AsyncClient {
        &self.client
    }

    /// Raw parts, for callers that drive the event loop themselves.
    ///
    /// Credentials are then only refreshed if the caller does it.
    pub fn into_parts(self) -> (AsyncClient, EventLoop) {
        (self.client, self.event_loop)
    }

    pub fn into_kernel(self, cancel: CancellationToken) -> ConnectionKernel {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        ConnectionKernel {
            client: self.client,
            event_loop: self.event_loop,
            credentials: self.credentials,
            backoff: Backoff::default(),
            subscriptions: Vec::new(),
            inbound: None,
            cancel,
            state_tx,
        }
    }
}

/// Runs the event loop of a device session on a single task.
///
/// The client handle returned by [`ConnectionKernel::client`] can be cloned and
/// used from other tasks while the kernel runs.
pub struct ConnectionKernel {
    client: AsyncClient,
    event_loop: EventLoop,
    credentials: CredentialsProvider,
    backoff: Backoff,
    /// Re-issued after every accepted CONNACK.
    subscriptions: Vec<(String, QoS)>,
    inbound: Option<mpsc::Sender<Publish>>,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionKernel {
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Registers a subscription made on every (re)connect.
    pub fn subscribe(&mut self, topic: impl Into<String>, qos: QoS) {
        self.subscriptions.push((topic.into(), qos));
    }

    /// Forwards inbound publishes to `tx`. Publishes arriving while the
    /// channel is full are dropped.
    pub fn forward_publishes(&mut self, tx: mpsc::Sender<Publish>) {
        self.inbound = Some(tx);
    }

    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Polls the session until the cancellation token fires.
    ///
    /// Returns `Ok(())` on cancellation. Returns an error on a fatal connection
    /// error or when the backoff gives up. The state channel ends in
    /// [`ConnectionState::Stopped`] either way.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting connection kernel");
        self.update_state(ConnectionState::Connecting);

        let result = self.drive().await;
        self.update_state(ConnectionState::Stopped);
        result
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Shutdown requested, disconnecting");
                    self.disconnect().await;
                    return Ok(());
                }

                polled = self.event_loop.poll() => match polled {
                    Ok(event) => self.handle_event(event),
                    Err(e) => self.recover(e).await?,
                },
            }
        }
    }

    /// Decides what follows a failed poll. Returns once the next attempt may
    /// start, or with an error when the kernel must stop.
    async fn recover(&mut self, err: ConnectionError) -> Result<()> {
        let reason = root_cause(&err);
        self.update_state(ConnectionState::Disconnected(reason.clone()));

        if is_fatal_error(&err) {
            error!("Fatal connection error: {reason}");
            return Err(err.into());
        }

        let delay = match self.backoff.next_delay() {
            Ok(delay) => delay,
            Err(e) => {
                error!("{e}");
                return Err(e.into());
            }
        };

        warn!(
            attempt = self.backoff.attempt(),
            "Reconnecting in {:.2}s after error: {reason}",
            delay.as_secs_f64()
        );
        self.update_state(ConnectionState::Reconnecting(delay));

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }

        self.refresh_credentials();
        self.update_state(ConnectionState::Connecting);
        Ok(())
    }

    /// Loads fresh credentials into the options used for the next CONNECT.
    fn refresh_credentials(&mut self) {
        let (username, password) = (self.credentials)();
        self.event_loop.mqtt_options.set_credentials(username, password);
        trace!("Credentials refreshed for next attempt");
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    info!(
                        session_present = ack.session_present,
                        "Connected to {}",
                        self.event_loop.mqtt_options.broker_address().0
                    );
                    self.backoff.reset();
                    self.update_state(ConnectionState::Connected);
                    self.resubscribe();
                }
            }
            Event::Incoming(Packet::Publish(publish)) => self.forward(publish),
            Event::Incoming(Packet::Disconnect) => {
                warn!("Disconnected by broker");
                self.update_state(ConnectionState::Disconnected("disconnected by broker".into()));
            }
            Event::Incoming(packet) => trace!("Incoming {packet:?}"),
            Event::Outgoing(outgoing) => trace!("Outgoing {outgoing:?}"),
        }
    }

    // The kernel is the only poller of the event loop, so awaiting on the
    // request channel here could deadlock. `try_*` calls only.
    fn resubscribe(&self) {
        for (topic, qos) in &self.subscriptions {
            match self.client.try_subscribe(topic.as_str(), *qos) {
                Ok(()) => debug!("Subscribed to {topic}"),
                Err(e) => warn!("Failed to subscribe to {topic}: {e}"),
            }
        }
    }

    fn forward(&mut self, publish: Publish) {
        let Some(tx) = &self.inbound else {
            trace!("Dropping publish on {}, no receiver", publish.topic);
            return;
        };

        match tx.try_send(publish) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(p)) => {
                warn!("Inbound channel full, dropping publish on {}", p.topic);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Inbound receiver gone, no longer forwarding publishes");
                self.inbound = None;
            }
        }
    }

    /// Best effort: the DISCONNECT only reaches the broker if the event loop
    /// is polled once more, so give it a short grace period.
    async fn disconnect(&mut self) {
        if !self.state_tx.borrow().is_connected() {
            return;
        }
        if let Err(e) = self.client.try_disconnect() {
            warn!("Failed to queue DISCONNECT: {e}");
            return;
        }

        let flush = async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_GRACE, flush).await.is_err() {
            debug!("DISCONNECT not flushed within {DISCONNECT_GRACE:?}");
        }
    }

    fn update_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state.clone();
            true
        });
        if changed {
            info!("Connection state: {state}");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Fatal,
    Reconnect,
}

fn classify_connection_error(err: &ConnectionError) -> Disposition {
    use Disposition::*;

    match err {
        // Certificates or crypto setup; another attempt fails the same way.
        ConnectionError::Tls(_) => Fatal,

        // Broken pipe or missed ping response: the link died under us.
        ConnectionError::MqttState(StateError::Io(_) | StateError::AwaitPingResp) => Reconnect,
        ConnectionError::MqttState(_) => Fatal,

        ConnectionError::NotConnAck(_) => Fatal,

        // Every client handle was dropped.
        ConnectionError::RequestsDone => Fatal,

        ConnectionError::Io(e) => match e.kind() {
            io::ErrorKind::AddrInUse
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::InvalidInput => Fatal,
            _ => Reconnect,
        },

        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => Reconnect,

        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::RefusedProtocolVersion | ConnectReturnCode::BadClientId => Fatal,
            // The token is re-minted before the next attempt.
            ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => Reconnect,
            _ => Reconnect,
        },

        #[allow(unreachable_patterns)]
        _ => Reconnect,
    }
}

fn is_fatal_error(err: &ConnectionError) -> bool {
    classify_connection_error(err) == Disposition::Fatal
}

/// Innermost message of an error chain.
fn root_cause(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string().trim_matches('"').to_string()
}
