//! Common types, enums, and error definitions for the scanner session

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Error types for the BLE session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),

    #[error("Service {0} not present on peripheral")]
    ServiceMissing(Uuid),

    #[error("Characteristic {0} not present on peripheral")]
    CharacteristicMissing(Uuid),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle states of a scanner session
///
/// Exactly one state exists per session; it is mutated only by the session
/// actor in response to radio events or caller commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    Ready,
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Scanning => write!(f, "Scanning"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::DiscoveringServices => write!(f, "DiscoveringServices"),
            SessionState::Ready => write!(f, "Ready"),
            SessionState::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Why a session ended up in the Disconnected state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Transport-level connect attempt failed
    ConnectFailed(String),
    /// Service or a required characteristic was absent (firmware mismatch)
    ServiceMissing(String),
    /// The transport reported an unexpected disconnect
    LinkLost,
    /// Caller issued an explicit disconnect
    Requested,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ConnectFailed(e) => write!(f, "Connect Failed: {}", e),
            DisconnectReason::ServiceMissing(e) => write!(f, "Service Missing: {}", e),
            DisconnectReason::LinkLost => write!(f, "Link Lost"),
            DisconnectReason::Requested => write!(f, "Requested"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Idle.to_string(), "Idle");
        assert_eq!(
            SessionState::DiscoveringServices.to_string(),
            "DiscoveringServices"
        );
        assert_eq!(SessionState::Ready.to_string(), "Ready");
    }

    #[test]
    fn test_disconnect_reason_display() {
        assert_eq!(DisconnectReason::LinkLost.to_string(), "Link Lost");
        assert_eq!(
            DisconnectReason::ConnectFailed("timeout".to_string()).to_string(),
            "Connect Failed: timeout"
        );
    }
}
