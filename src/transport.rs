//! BLE transport seam
//!
//! The session core talks to the radio through these traits so the state
//! machine can be driven by a mock transport in tests and by BlueZ in
//! production (see the `bluez` module).

use crate::types::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Opaque reference to a discovered or bonded peripheral
///
/// Created from a scan result or the bonded-device list and discarded once a
/// connection attempt is made or the candidate is rejected by the name filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralHandle {
    /// Advertised or bonded name
    pub name: String,
    /// Hardware address (AA:BB:CC:DD:EE:FF)
    pub address: String,
    /// Signal strength, scan results only
    pub rssi: Option<i16>,
}

/// Handle to a resolved BLE characteristic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    pub uuid: Uuid,
}

impl CharacteristicHandle {
    pub fn new(uuid: Uuid) -> Self {
        Self { uuid }
    }
}

/// Platform BLE operations used by discovery and connection setup
#[async_trait::async_trait]
pub trait BleTransport: Send + Sync {
    /// List peripherals already bonded at the OS level
    async fn bonded_peripherals(&self) -> Result<Vec<PeripheralHandle>>;

    /// Start an active advertisement scan
    ///
    /// Results are delivered on the returned channel until `stop_scan` is
    /// called or the receiver is dropped.
    async fn scan_peripherals(&self) -> Result<mpsc::Receiver<PeripheralHandle>>;

    /// Stop a running scan; safe to call when no scan is active
    async fn stop_scan(&self);

    /// Open a transport-level connection to a peripheral
    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<Arc<dyn ScannerLink>>;
}

/// A live connection to a scanner peripheral
#[async_trait::async_trait]
pub trait ScannerLink: Send + Sync {
    /// Resolve and cache the characteristics of the given service
    ///
    /// Fails with `ServiceMissing` when the peripheral does not expose the
    /// service at all.
    async fn resolve_characteristics(&self, service: Uuid) -> Result<()>;

    /// Look up a resolved characteristic by UUID
    fn characteristic(&self, uuid: Uuid) -> Option<CharacteristicHandle>;

    /// Write data to a characteristic; completion implies the peer or stack
    /// acknowledged the request
    async fn write_characteristic(&self, handle: &CharacteristicHandle, data: &[u8]) -> Result<()>;

    /// Whether the transport still considers the link up
    async fn is_connected(&self) -> bool;

    /// Close the connection and release all handles; idempotent
    async fn close(&self) -> Result<()>;
}
