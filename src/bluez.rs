//! BlueZ transport
//!
//! Production implementation of the transport seam on top of `bluer`. Bonded
//! peripherals come from the adapter's known-device list; active scanning
//! bridges the BlueZ discovery stream into an mpsc channel; characteristic
//! resolution waits for BlueZ to resolve GATT services and caches the
//! characteristics of the designated scanner service in a UUID-keyed map.

use crate::transport::{BleTransport, CharacteristicHandle, PeripheralHandle, ScannerLink};
use crate::types::{Result, SessionError};
use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, AdapterEvent, Address, Device};
use futures::stream::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

fn ble_err(e: bluer::Error) -> SessionError {
    SessionError::Bluetooth(e.to_string())
}

/// BlueZ-backed implementation of [`BleTransport`]
pub struct BlueZTransport {
    adapter: Adapter,
    scan_task: StdMutex<Option<JoinHandle<()>>>,
}

impl BlueZTransport {
    pub fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            scan_task: StdMutex::new(None),
        }
    }

    /// Initialize the default adapter, powering it on when needed
    pub async fn from_default_adapter() -> Result<Self> {
        let session = bluer::Session::new().await.map_err(ble_err)?;
        let adapter = session.default_adapter().await.map_err(ble_err)?;
        debug!("Using Bluetooth adapter {}", adapter.name());

        if !adapter.is_powered().await.map_err(ble_err)? {
            info!("Bluetooth adapter is off, powering on");
            adapter.set_powered(true).await.map_err(ble_err)?;
            sleep(Duration::from_secs(2)).await;
        }

        Ok(Self::new(adapter))
    }

    async fn peripheral_from_device(device: &Device) -> Option<PeripheralHandle> {
        let name = device.name().await.ok().flatten()?;
        let rssi = device.rssi().await.ok().flatten();
        Some(PeripheralHandle {
            name,
            address: device.address().to_string(),
            rssi,
        })
    }
}

#[async_trait::async_trait]
impl BleTransport for BlueZTransport {
    async fn bonded_peripherals(&self) -> Result<Vec<PeripheralHandle>> {
        let mut peripherals = Vec::new();
        for address in self.adapter.device_addresses().await.map_err(ble_err)? {
            let device = match self.adapter.device(address) {
                Ok(device) => device,
                Err(e) => {
                    debug!("Could not open device {}: {}", address, e);
                    continue;
                }
            };
            if !device.is_paired().await.unwrap_or(false) {
                continue;
            }
            if let Some(peripheral) = Self::peripheral_from_device(&device).await {
                peripherals.push(peripheral);
            }
        }
        debug!("Found {} bonded peripheral(s)", peripherals.len());
        Ok(peripherals)
    }

    async fn scan_peripherals(&self) -> Result<mpsc::Receiver<PeripheralHandle>> {
        let (tx, rx) = mpsc::channel(16);
        let mut events = self.adapter.discover_devices().await.map_err(ble_err)?;
        let adapter = self.adapter.clone();

        let task = tokio::spawn(async move {
            // The discovery session ends when this task is aborted and the
            // stream is dropped
            while let Some(event) = events.next().await {
                if let AdapterEvent::DeviceAdded(address) = event {
                    let device = match adapter.device(address) {
                        Ok(device) => device,
                        Err(e) => {
                            debug!("Could not open scanned device {}: {}", address, e);
                            continue;
                        }
                    };
                    if let Some(peripheral) = Self::peripheral_from_device(&device).await {
                        if tx.send(peripheral).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        *self.scan_task.lock().unwrap() = Some(task);

        info!("BLE discovery started");
        Ok(rx)
    }

    async fn stop_scan(&self) {
        if let Some(task) = self.scan_task.lock().unwrap().take() {
            task.abort();
            info!("BLE discovery stopped");
        }
    }

    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<Arc<dyn ScannerLink>> {
        let address: Address = peripheral
            .address
            .parse()
            .map_err(|_| SessionError::Bluetooth(format!("Invalid address {}", peripheral.address)))?;
        let device = self.adapter.device(address).map_err(ble_err)?;

        if !device.is_connected().await.map_err(ble_err)? {
            device.connect().await.map_err(ble_err)?;
            info!("Connected to {}", peripheral.address);
        } else {
            debug!("Already connected to {}", peripheral.address);
        }

        // Let the connection settle before GATT traffic
        sleep(Duration::from_millis(500)).await;

        Ok(Arc::new(BlueZLink {
            device,
            characteristics: StdMutex::new(HashMap::new()),
        }))
    }
}

/// A live BlueZ connection to the scanner
pub struct BlueZLink {
    device: Device,
    characteristics: StdMutex<HashMap<Uuid, Characteristic>>,
}

#[async_trait::async_trait]
impl ScannerLink for BlueZLink {
    async fn resolve_characteristics(&self, service: Uuid) -> Result<()> {
        // Wait for BlueZ to finish GATT resolution
        let mut attempts = 0;
        const MAX_ATTEMPTS: u32 = 30;
        loop {
            match self.device.is_services_resolved().await {
                Ok(true) => break,
                Ok(false) => {
                    attempts += 1;
                    if attempts >= MAX_ATTEMPTS {
                        return Err(SessionError::Bluetooth(
                            "Timeout waiting for GATT services to be resolved".to_string(),
                        ));
                    }
                    sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    warn!("Could not check services resolved status: {}", e);
                    sleep(Duration::from_secs(2)).await;
                    break;
                }
            }
        }

        let mut found_service = false;
        for candidate in self.device.services().await.map_err(ble_err)? {
            if candidate.uuid().await.map_err(ble_err)? != service {
                continue;
            }
            found_service = true;
            let mut map = HashMap::new();
            for characteristic in candidate.characteristics().await.map_err(ble_err)? {
                let uuid = characteristic.uuid().await.map_err(ble_err)?;
                map.insert(uuid, characteristic);
            }
            debug!(
                "Resolved {} characteristic(s) on service {}",
                map.len(),
                service
            );
            *self.characteristics.lock().unwrap() = map;
            break;
        }

        if !found_service {
            return Err(SessionError::ServiceMissing(service));
        }
        Ok(())
    }

    fn characteristic(&self, uuid: Uuid) -> Option<CharacteristicHandle> {
        self.characteristics
            .lock()
            .unwrap()
            .contains_key(&uuid)
            .then(|| CharacteristicHandle::new(uuid))
    }

    async fn write_characteristic(&self, handle: &CharacteristicHandle, data: &[u8]) -> Result<()> {
        let characteristic = self
            .characteristics
            .lock()
            .unwrap()
            .get(&handle.uuid)
            .cloned()
            .ok_or(SessionError::CharacteristicMissing(handle.uuid))?;
        characteristic.write(data).await.map_err(ble_err)?;
        debug!("Wrote {} bytes to {}", data.len(), handle.uuid);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.device.is_connected().await.unwrap_or(false)
    }

    async fn close(&self) -> Result<()> {
        self.characteristics.lock().unwrap().clear();
        match self.device.disconnect().await {
            Ok(()) => {
                info!("Disconnected from {}", self.device.address());
                Ok(())
            }
            // Already gone is fine; close must be idempotent
            Err(e) => {
                debug!("Disconnect returned: {}", e);
                Ok(())
            }
        }
    }
}
