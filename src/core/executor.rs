//! Periodic device reporting.
//!
//! The `Executor` follows the connection state of the kernel. On every
//! transition to connected it reports the device online on the state topic,
//! and while connected it publishes a heartbeat to the telemetry topic at the
//! configured interval. Heartbeats due while disconnected are skipped, not
//! queued.

use std::sync::Arc;

use iotcore::{AsyncClient, ConnectionState, Device, QoS};
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::{
    sync::watch,
    time::{self as tokio_time, Duration, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

pub type PublishError = Box<dyn std::error::Error + Send + Sync>;

/// Sends a payload to a topic.
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

/// Device reports are published with QoS 1 and never retained.
#[async_trait::async_trait]
impl Publisher for AsyncClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        AsyncClient::publish(self, topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(Into::into)
    }
}

/// Telemetry payload sent every heartbeat interval.
#[derive(Debug, Clone, Serialize)]
pub struct Heartbeat {
    pub seq: u64,
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub uptime_secs: u64,
}

#[derive(Serialize)]
struct DeviceState<'a> {
    status: &'a str,
}

pub struct Executor {
    publisher: Arc<dyn Publisher>,
    telemetry_topic: String,
    state_topic: String,
    interval: Duration,
    report_state: bool,
    connection: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        device: &Device,
        interval: Duration,
        connection: watch::Receiver<ConnectionState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            publisher,
            telemetry_topic: device.telemetry_topic(),
            state_topic: device.state_topic(),
            interval,
            report_state: true,
            connection,
            cancel,
        }
    }

    pub fn with_state_reports(mut self, enabled: bool) -> Self {
        self.report_state = enabled;
        self
    }

    /// Runs until cancelled or until the kernel drops its state channel.
    pub async fn run(mut self) {
        let started = Instant::now();
        let mut seq = 0u64;
        let mut ticker = tokio_time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Heartbeat every {}s to {}",
            self.interval.as_secs(),
            self.telemetry_topic
        );

        if self.connection.borrow_and_update().is_connected() {
            self.report_online().await;
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Executor cancelled");
                    break;
                }

                changed = self.connection.changed() => {
                    if changed.is_err() {
                        debug!("Connection state channel closed, stopping executor");
                        break;
                    }
                    let connected = self.connection.borrow_and_update().is_connected();
                    if connected {
                        self.report_online().await;
                    }
                }

                _ = ticker.tick() => {
                    let state = self.connection.borrow().clone();
                    if !state.is_connected() {
                        trace!("Skipping heartbeat while {state}");
                        continue;
                    }
                    seq += 1;
                    self.send_heartbeat(seq, started.elapsed()).await;
                }
            }
        }
    }

    async fn report_online(&self) {
        if !self.report_state {
            return;
        }
        self.send(&self.state_topic, &DeviceState { status: "online" }, "state")
            .await;
    }

    async fn send_heartbeat(&self, seq: u64, uptime: Duration) {
        let heartbeat = Heartbeat {
            seq,
            timestamp: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            uptime_secs: uptime.as_secs(),
        };
        self.send(&self.telemetry_topic, &heartbeat, "heartbeat").await;
    }

    async fn send<T: Serialize + Sync>(&self, topic: &str, payload: &T, what: &str) {
        let bytes = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to serialize {what}: {e}");
                return;
            }
        };

        match self.publisher.publish(topic, bytes).await {
            Ok(()) => debug!("Published {what} to {topic}"),
            Err(e) => error!("Failed to publish {what} to {topic}: {e}"),
        }
    }
}
