//! MQTT bridge addresses.

use std::fmt;

/// An MQTT server reachable over TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub host: String,
    pub port: u16,
}

impl Broker {
    /// The global bridge on the standard MQTT over TLS port.
    pub const DEFAULT_HOST: &'static str = "mqtt.googleapis.com";
    /// The long term support bridge.
    pub const LTS_HOST: &'static str = "mqtt.2030.ltsapis.goog";

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `mqtt.googleapis.com:8883`
    pub fn default_bridge() -> Self {
        Self::new(Self::DEFAULT_HOST, 8883)
    }

    /// `mqtt.googleapis.com:443`, for networks that block 8883.
    pub fn default_bridge_443() -> Self {
        Self::new(Self::DEFAULT_HOST, 443)
    }

    /// `mqtt.2030.ltsapis.goog:8883`
    pub fn lts_bridge() -> Self {
        Self::new(Self::LTS_HOST, 8883)
    }

    /// `mqtt.2030.ltsapis.goog:443`
    pub fn lts_bridge_443() -> Self {
        Self::new(Self::LTS_HOST, 443)
    }

    /// Returns the connection URL. The scheme is always `ssl`.
    pub fn url(&self) -> String {
        format!("ssl://{}:{}", self.host, self.port)
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::default_bridge()
    }
}

impl fmt::Display for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url() {
        let broker = Broker::new("localhost", 8883);
        assert_eq!(broker.url(), "ssl://localhost:8883");
    }

    #[test]
    fn test_presets() {
        assert_eq!(Broker::default_bridge().url(), "ssl://mqtt.googleapis.com:8883");
        assert_eq!(Broker::default_bridge_443().url(), "ssl://mqtt.googleapis.com:443");
        assert_eq!(Broker::lts_bridge().url(), "ssl://mqtt.2030.ltsapis.goog:8883");
        assert_eq!(Broker::lts_bridge_443().url(), "ssl://mqtt.2030.ltsapis.goog:443");
        assert_eq!(Broker::default(), Broker::default_bridge());
    }

    #[test]
    fn test_display_is_url() {
        let broker = Broker::lts_bridge();
        assert_eq!(broker.to_string(), broker.url());
    }
}
