//! Connection state published by the connection kernel.

use std::{fmt, time::Duration};

/// Lifecycle of the bridge session as observed by the kernel.
///
/// `Connecting -> Connected -> Disconnected(reason) -> Reconnecting(delay) -> Connecting ...`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// CONNECT sent, waiting for CONNACK.
    #[default]
    Connecting,
    /// CONNACK accepted. Publishes and subscriptions go through.
    Connected,
    /// Session lost or refused, with the reason reported by the transport.
    Disconnected(String),
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting(Duration),
    /// The kernel stopped: cancelled, fatal error or attempts exhausted.
    Stopped,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected(_) => "disconnected",
            Self::Reconnecting(_) => "reconnecting",
            Self::Stopped => "stopped",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether the kernel will not attempt any further connection.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected(reason) => write!(f, "disconnected: {reason}"),
            Self::Reconnecting(delay) => {
                write!(f, "reconnecting in {:.1}s", delay.as_secs_f64())
            }
            other => f.write_str(other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::Disconnected("not authorized".into()).to_string(),
            "disconnected: not authorized"
        );
        assert_eq!(
            ConnectionState::Reconnecting(Duration::from_millis(2500)).to_string(),
            "reconnecting in 2.5s"
        );
        assert_eq!(ConnectionState::Stopped.to_string(), "stopped");
    }

    #[test]
    fn test_predicates() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(ConnectionState::Stopped.is_terminal());
        assert!(!ConnectionState::Reconnecting(Duration::ZERO).is_terminal());
    }

    #[test]
    fn test_default_is_connecting() {
        assert_eq!(ConnectionState::default(), ConnectionState::Connecting);
    }
}
