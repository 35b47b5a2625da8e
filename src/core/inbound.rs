//! Configuration and command messages pushed by the bridge.

use iotcore::{Device, Publish};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// A new configuration version for the device.
    Config,
    /// A command, optionally addressed to a subfolder such as `reboot` or
    /// `lights/front`.
    Command { subfolder: Option<&'a str> },
    Other,
}

/// Sorts a topic into configuration, command, or anything else.
pub fn classify<'a>(device: &Device, topic: &'a str) -> Inbound<'a> {
    if topic == device.config_topic() {
        return Inbound::Config;
    }

    let commands = device.command_topic();
    let root = commands.trim_end_matches("/#");
    match topic.strip_prefix(root) {
        Some("") => Inbound::Command { subfolder: None },
        Some(rest) => match rest.strip_prefix('/') {
            Some("") => Inbound::Command { subfolder: None },
            Some(subfolder) => Inbound::Command {
                subfolder: Some(subfolder),
            },
            None => Inbound::Other,
        },
        None => Inbound::Other,
    }
}

/// Logs every message from `rx` until the kernel drops its sender.
pub async fn listen(mut rx: mpsc::Receiver<Publish>, device: Device) {
    while let Some(publish) = rx.recv().await {
        handle(&device, &publish);
    }
    debug!("Inbound channel closed");
}

fn handle(device: &Device, publish: &Publish) {
    let payload = String::from_utf8_lossy(&publish.payload);
    match classify(device, &publish.topic) {
        Inbound::Config => {
            info!(bytes = publish.payload.len(), "Received configuration");
            debug!("Configuration payload: {payload}");
        }
        Inbound::Command { subfolder } => {
            info!(
                subfolder = subfolder.unwrap_or("-"),
                bytes = publish.payload.len(),
                "Received command"
            );
            debug!("Command payload: {payload}");
        }
        Inbound::Other => warn!("Ignoring message on unexpected topic {}", publish.topic),
    }
}

#[cfg(test)]
mod tests {
    use iotcore::QoS;
    use tracing_test::traced_test;

    use super::*;

    fn device() -> Device {
        Device::new("p", "r", "reg", "dev", "/unused/key.pem")
    }

    #[test]
    fn test_classify_config() {
        assert_eq!(classify(&device(), "/devices/dev/config"), Inbound::Config);
    }

    #[test]
    fn test_classify_commands() {
        let device = device();
        assert_eq!(
            classify(&device, "/devices/dev/commands"),
            Inbound::Command { subfolder: None }
        );
        assert_eq!(
            classify(&device, "/devices/dev/commands/"),
            Inbound::Command { subfolder: None }
        );
        assert_eq!(
            classify(&device, "/devices/dev/commands/lights/front"),
            Inbound::Command {
                subfolder: Some("lights/front")
            }
        );
    }

    #[test]
    fn test_classify_other() {
        let device = device();
        assert_eq!(classify(&device, "/devices/dev/commandsX"), Inbound::Other);
        assert_eq!(classify(&device, "/devices/other/config"), Inbound::Other);
        assert_eq!(classify(&device, "/devices/dev/events"), Inbound::Other);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_listen_logs_until_closed() {
        let (tx, rx) = mpsc::channel(4);

        tx.send(Publish::new("/devices/dev/config", QoS::AtLeastOnce, "{}"))
            .await
            .unwrap();
        tx.send(Publish::new(
            "/devices/dev/commands/reboot",
            QoS::AtMostOnce,
            "now",
        ))
        .await
        .unwrap();
        tx.send(Publish::new("/elsewhere", QoS::AtMostOnce, ""))
            .await
            .unwrap();
        drop(tx);
        listen(rx, device()).await;

        assert!(logs_contain("Received configuration"));
        assert!(logs_contain("Received command"));
        assert!(logs_contain("reboot"));
        assert!(logs_contain("Ignoring message on unexpected topic /elsewhere"));
    }
}
