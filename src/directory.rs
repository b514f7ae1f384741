//! Device Directory
//!
//! Resolves the target scanner from either the OS bonded-device list or an
//! active advertisement scan. The bonded list is consulted first because a
//! previously paired device needs no radio scan at all.

use crate::transport::{BleTransport, PeripheralHandle};
use crate::types::Result;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

/// Name matching policy for the target device
///
/// A candidate matches on the exact configured name, or on the configured
/// prefix plus any suffix (advertised names are sometimes truncated).
#[derive(Debug, Clone)]
pub struct DeviceMatcher {
    name: String,
    prefix: String,
}

impl DeviceMatcher {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
        }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        candidate == self.name || candidate.starts_with(&self.prefix)
    }
}

/// Finds the scanner peripheral through bonded lookup or active scan
pub struct DeviceDirectory {
    transport: Arc<dyn BleTransport>,
    matcher: DeviceMatcher,
}

impl DeviceDirectory {
    pub fn new(transport: Arc<dyn BleTransport>, matcher: DeviceMatcher) -> Self {
        Self { transport, matcher }
    }

    /// Find the first matching peripheral
    ///
    /// Returns `Ok(None)` when nothing matched within `timeout` — "not found"
    /// is a status the caller may retry on, not an error. A match from either
    /// source halts further scanning and yields exactly one handle.
    pub async fn find(&self, timeout: Duration) -> Result<Option<PeripheralHandle>> {
        // Bonded devices first: no radio time needed
        for peripheral in self.transport.bonded_peripherals().await? {
            if self.matcher.matches(&peripheral.name) {
                info!(
                    "Found bonded scanner '{}' at {}",
                    peripheral.name, peripheral.address
                );
                return Ok(Some(peripheral));
            }
            debug!("Bonded device '{}' does not match", peripheral.name);
        }

        debug!("No bonded match, starting active scan ({:?})", timeout);
        let mut results = self.transport.scan_peripherals().await?;

        let found = tokio::time::timeout(timeout, async {
            while let Some(peripheral) = results.recv().await {
                if self.matcher.matches(&peripheral.name) {
                    return Some(peripheral);
                }
                debug!(
                    "Scan result '{}' ({}) does not match",
                    peripheral.name, peripheral.address
                );
            }
            None
        })
        .await
        .unwrap_or(None);

        self.transport.stop_scan().await;

        match &found {
            Some(peripheral) => info!(
                "Found scanner '{}' at {} (rssi: {:?})",
                peripheral.name, peripheral.address, peripheral.rssi
            ),
            None => info!("No matching scanner found within {:?}", timeout),
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScannerLink;
    use crate::types::SessionError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    fn handle(name: &str) -> PeripheralHandle {
        PeripheralHandle {
            name: name.to_string(),
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            rssi: None,
        }
    }

    struct MockTransport {
        bonded: Vec<PeripheralHandle>,
        scan_results: Vec<PeripheralHandle>,
        scan_started: AtomicBool,
    }

    impl MockTransport {
        fn new(bonded: Vec<PeripheralHandle>, scan_results: Vec<PeripheralHandle>) -> Self {
            Self {
                bonded,
                scan_results,
                scan_started: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl BleTransport for MockTransport {
        async fn bonded_peripherals(&self) -> Result<Vec<PeripheralHandle>> {
            Ok(self.bonded.clone())
        }

        async fn scan_peripherals(&self) -> Result<mpsc::Receiver<PeripheralHandle>> {
            self.scan_started.store(true, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(8);
            for peripheral in self.scan_results.clone() {
                let _ = tx.send(peripheral).await;
            }
            // tx dropped here; an empty result set ends the stream
            Ok(rx)
        }

        async fn stop_scan(&self) {}

        async fn connect(&self, _peripheral: &PeripheralHandle) -> Result<Arc<dyn ScannerLink>> {
            Err(SessionError::Bluetooth("not supported in mock".to_string()))
        }
    }

    #[test]
    fn test_exact_name_matches() {
        let matcher = DeviceMatcher::new("한진택배 스캐너", "한진");
        assert!(matcher.matches("한진택배 스캐너"));
    }

    #[test]
    fn test_prefix_matches() {
        let matcher = DeviceMatcher::new("한진택배 스캐너", "한진");
        assert!(matcher.matches("한진-SCN-01"));
    }

    #[test]
    fn test_unrelated_name_does_not_match() {
        let matcher = DeviceMatcher::new("한진택배 스캐너", "한진");
        assert!(!matcher.matches("JBL Flip 5"));
        assert!(!matcher.matches(""));
    }

    #[tokio::test]
    async fn test_bonded_match_skips_active_scan() {
        let transport = Arc::new(MockTransport::new(
            vec![handle("한진택배 스캐너")],
            vec![handle("한진택배 스캐너")],
        ));
        let directory = DeviceDirectory::new(
            transport.clone(),
            DeviceMatcher::new("한진택배 스캐너", "한진"),
        );

        let found = directory.find(Duration::from_millis(100)).await.unwrap();
        assert_eq!(found.unwrap().name, "한진택배 스캐너");
        assert!(!transport.scan_started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_scan_yields_prefix_match() {
        let transport = Arc::new(MockTransport::new(
            vec![handle("JBL Flip 5")],
            vec![handle("Some Speaker"), handle("한진-SCN-01")],
        ));
        let directory = DeviceDirectory::new(
            transport.clone(),
            DeviceMatcher::new("한진택배 스캐너", "한진"),
        );

        let found = directory.find(Duration::from_millis(100)).await.unwrap();
        assert_eq!(found.unwrap().name, "한진-SCN-01");
        assert!(transport.scan_started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_no_match_reports_not_found() {
        let transport = Arc::new(MockTransport::new(vec![], vec![handle("JBL Flip 5")]));
        let directory = DeviceDirectory::new(
            transport,
            DeviceMatcher::new("한진택배 스캐너", "한진"),
        );

        let found = directory.find(Duration::from_millis(50)).await.unwrap();
        assert!(found.is_none());
    }
}
