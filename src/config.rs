//! Session configuration
//!
//! All identifiers the firmware and server expect are carried here and passed
//! in at construction. Nothing in the session core reads global state.

use std::time::Duration;
use uuid::{uuid, Uuid};

/// Default login server URL
pub const DEFAULT_SERVER_URL: &str = "https://license-server-production-e83a.up.railway.app";

/// Advertised name of the ESP32 scanner
pub const DEFAULT_DEVICE_NAME: &str = "한진택배 스캐너";

/// Name prefix accepted as a match (truncated/garbled advertisements)
pub const DEFAULT_DEVICE_NAME_PREFIX: &str = "한진";

/// GATT service exposed by the scanner firmware
pub const SCANNER_SERVICE_UUID: Uuid = uuid!("12345678-1234-1234-1234-123456789abc");

/// Characteristic receiving the bearer token
pub const TOKEN_CHAR_UUID: Uuid = uuid!("12345678-1234-1234-1234-123456789def");

/// Characteristic receiving the periodic keep-alive
pub const HEARTBEAT_CHAR_UUID: Uuid = uuid!("12345678-1234-1234-1234-123456789012");

/// Configuration for a scanner session
///
/// The UUIDs must match the scanner firmware exactly; a mismatch is fatal for
/// the session (no retry).
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Exact advertised/bonded name of the target device
    pub device_name: String,

    /// Accepted name prefix for truncated advertisements
    pub device_name_prefix: String,

    /// GATT service UUID on the scanner
    pub service_uuid: Uuid,

    /// Token write characteristic UUID
    pub token_char_uuid: Uuid,

    /// Heartbeat write characteristic UUID
    pub heartbeat_char_uuid: Uuid,

    /// Period between keep-alive writes while Ready
    pub heartbeat_period: Duration,

    /// How long an active scan may run before reporting "not found"
    pub scan_timeout: Duration,

    /// How often the link watcher polls the transport for connection loss
    pub link_check_period: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            device_name_prefix: DEFAULT_DEVICE_NAME_PREFIX.to_string(),
            service_uuid: SCANNER_SERVICE_UUID,
            token_char_uuid: TOKEN_CHAR_UUID,
            heartbeat_char_uuid: HEARTBEAT_CHAR_UUID,
            heartbeat_period: Duration::from_secs(30),
            scan_timeout: Duration::from_secs(10),
            link_check_period: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ScannerConfig::default();
        assert_eq!(config.heartbeat_period, Duration::from_secs(30));
        assert_eq!(config.scan_timeout, Duration::from_secs(10));
        assert_eq!(
            config.service_uuid.to_string(),
            "12345678-1234-1234-1234-123456789abc"
        );
        assert_ne!(config.token_char_uuid, config.heartbeat_char_uuid);
    }
}
