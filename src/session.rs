//! Session State Machine
//!
//! This module implements the scanner session actor. Every radio event,
//! caller command, and heartbeat tick arrives on one mpsc queue and is
//! handled by a single task, so `SessionState` and the connection context are
//! never mutated concurrently. Radio operations (scan, connect, resolve,
//! write) run in spawned tasks and report back through the same queue.
//!
//! Lifecycle: Idle → Scanning → Connecting → DiscoveringServices → Ready →
//! Disconnected. Entry to Ready arms the heartbeat scheduler; every exit from
//! Ready disarms it and tears the connection down. The session can be
//! restarted from scratch after a disconnect; no state is carried over.

use crate::config::ScannerConfig;
use crate::directory::{DeviceDirectory, DeviceMatcher};
use crate::heartbeat::{HeartbeatScheduler, HEARTBEAT_PAYLOAD};
use crate::relay::TokenRelay;
use crate::transport::{BleTransport, CharacteristicHandle, PeripheralHandle, ScannerLink};
use crate::types::{DisconnectReason, SessionState};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Callback for session lifecycle events
///
/// All methods default to no-ops; implementors override what they need.
/// Callbacks are invoked from the session actor task and must not block.
pub trait SessionCallback: Send + Sync {
    /// A matching peripheral was found; the session connects automatically
    fn on_peripheral_found(&self, _peripheral: &PeripheralHandle) {}

    /// Discovery finished without a match; the caller may retry
    fn on_not_found(&self) {}

    /// Service discovery succeeded, token writes are accepted
    fn on_ready(&self) {}

    /// The session left Ready (or failed to get there)
    fn on_disconnected(&self, _reason: &DisconnectReason) {}

    /// Outcome of a submitted token write, exactly once per submission
    fn on_token_result(&self, _success: bool) {}
}

/// Snapshot of the session's internal state, for callers and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub heartbeat_armed: bool,
    pub write_in_flight: bool,
}

/// Events processed by the session actor
enum SessionEvent {
    // Caller commands
    StartDiscovery,
    Disconnect,
    Shutdown,
    SendToken {
        token: String,
        submitted: oneshot::Sender<bool>,
    },
    Status(oneshot::Sender<SessionStatus>),

    // Radio and timer events
    PeripheralFound(PeripheralHandle),
    DiscoveryEnded,
    Connected(Arc<dyn ScannerLink>),
    ConnectFailed(String),
    CharacteristicsResolved {
        token_char: CharacteristicHandle,
        heartbeat_char: CharacteristicHandle,
    },
    ResolutionFailed(String),
    LinkLost,
    HeartbeatTick,
    TokenWriteComplete(bool),
}

/// Live transport handle plus resolved characteristics
///
/// At most one exists per session; created on successful service discovery,
/// destroyed on disconnect.
struct ConnectionContext {
    link: Arc<dyn ScannerLink>,
    token_char: CharacteristicHandle,
    heartbeat_char: CharacteristicHandle,
    link_watch: JoinHandle<()>,
}

/// Handle to a running scanner session
///
/// All operations are non-blocking: they submit a command to the actor and
/// return; results surface through the [`SessionCallback`].
pub struct ScannerSession {
    events: mpsc::Sender<SessionEvent>,
    actor: JoinHandle<()>,
}

impl ScannerSession {
    /// Spawn the session actor
    pub fn spawn(
        config: ScannerConfig,
        transport: Arc<dyn BleTransport>,
        callback: Arc<dyn SessionCallback>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(32);
        let actor = SessionActor::new(config, transport, callback, events_tx.clone());
        let task = tokio::spawn(actor.run(events_rx));
        Self {
            events: events_tx,
            actor: task,
        }
    }

    /// Start scanning for the configured scanner device
    pub async fn start_discovery(&self) {
        let _ = self.events.send(SessionEvent::StartDiscovery).await;
    }

    /// Submit a token write
    ///
    /// The returned bool reports whether the write was *submitted*; the
    /// acknowledged outcome arrives later via `on_token_result`. Submission
    /// fails when the session is not Ready or a write is already in flight.
    pub async fn send_token(&self, token: &str) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self
            .events
            .send(SessionEvent::SendToken {
                token: token.to_string(),
                submitted: reply_tx,
            })
            .await;
        if sent.is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Tear down any connection or scan; a no-op when idle
    pub async fn disconnect(&self) {
        let _ = self.events.send(SessionEvent::Disconnect).await;
    }

    /// Snapshot the current session status
    pub async fn status(&self) -> SessionStatus {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.events.send(SessionEvent::Status(reply_tx)).await;
        reply_rx.await.unwrap_or(SessionStatus {
            state: SessionState::Disconnected,
            heartbeat_armed: false,
            write_in_flight: false,
        })
    }

    /// Disconnect and stop the actor
    pub async fn shutdown(self) {
        let _ = self.events.send(SessionEvent::Shutdown).await;
        let _ = self.actor.await;
    }
}

struct SessionActor {
    config: ScannerConfig,
    transport: Arc<dyn BleTransport>,
    callback: Arc<dyn SessionCallback>,
    events_tx: mpsc::Sender<SessionEvent>,
    state: SessionState,
    context: Option<ConnectionContext>,
    /// Connected link awaiting service discovery
    pending_link: Option<Arc<dyn ScannerLink>>,
    scan_task: Option<JoinHandle<()>>,
    setup_task: Option<JoinHandle<()>>,
    heartbeat: HeartbeatScheduler,
    relay: TokenRelay,
}

impl SessionActor {
    fn new(
        config: ScannerConfig,
        transport: Arc<dyn BleTransport>,
        callback: Arc<dyn SessionCallback>,
        events_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let heartbeat = HeartbeatScheduler::new(config.heartbeat_period);
        Self {
            config,
            transport,
            callback,
            events_tx,
            state: SessionState::Idle,
            context: None,
            pending_link: None,
            scan_task: None,
            setup_task: None,
            heartbeat,
            relay: TokenRelay::new(),
        }
    }

    async fn run(mut self, mut events_rx: mpsc::Receiver<SessionEvent>) {
        debug!("Session actor started");
        while let Some(event) = events_rx.recv().await {
            if !self.handle(event).await {
                break;
            }
        }
        debug!("Session actor stopped");
    }

    /// Process one event; returns false to stop the actor
    async fn handle(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::StartDiscovery => self.handle_start_discovery(),
            SessionEvent::Disconnect => self.handle_disconnect().await,
            SessionEvent::Shutdown => {
                self.handle_disconnect().await;
                return false;
            }
            SessionEvent::SendToken { token, submitted } => {
                let accepted = self.handle_send_token(&token);
                let _ = submitted.send(accepted);
            }
            SessionEvent::Status(reply) => {
                let _ = reply.send(SessionStatus {
                    state: self.state,
                    heartbeat_armed: self.heartbeat.is_armed(),
                    write_in_flight: self.relay.in_flight(),
                });
            }
            SessionEvent::PeripheralFound(peripheral) => self.handle_peripheral_found(peripheral),
            SessionEvent::DiscoveryEnded => self.handle_discovery_ended(),
            SessionEvent::Connected(link) => self.handle_connected(link).await,
            SessionEvent::ConnectFailed(error) => self.handle_connect_failed(error).await,
            SessionEvent::CharacteristicsResolved {
                token_char,
                heartbeat_char,
            } => self.handle_resolved(token_char, heartbeat_char),
            SessionEvent::ResolutionFailed(error) => self.handle_resolution_failed(error).await,
            SessionEvent::LinkLost => self.handle_link_lost().await,
            SessionEvent::HeartbeatTick => self.handle_heartbeat_tick(),
            SessionEvent::TokenWriteComplete(success) => {
                if self.relay.in_flight() {
                    self.relay.complete();
                    self.callback.on_token_result(success);
                }
            }
        }
        true
    }

    fn handle_start_discovery(&mut self) {
        match self.state {
            SessionState::Idle | SessionState::Disconnected => {}
            other => {
                warn!("Ignoring start-discovery in state {}", other);
                return;
            }
        }

        info!(
            "Starting discovery for '{}' (prefix '{}')",
            self.config.device_name, self.config.device_name_prefix
        );
        self.state = SessionState::Scanning;

        let directory = DeviceDirectory::new(
            self.transport.clone(),
            DeviceMatcher::new(
                self.config.device_name.clone(),
                self.config.device_name_prefix.clone(),
            ),
        );
        let timeout = self.config.scan_timeout;
        let events = self.events_tx.clone();
        self.scan_task = Some(tokio::spawn(async move {
            let event = match directory.find(timeout).await {
                Ok(Some(peripheral)) => SessionEvent::PeripheralFound(peripheral),
                Ok(None) => SessionEvent::DiscoveryEnded,
                Err(e) => {
                    error!("Discovery failed: {}", e);
                    SessionEvent::DiscoveryEnded
                }
            };
            let _ = events.send(event).await;
        }));
    }

    fn handle_peripheral_found(&mut self, peripheral: PeripheralHandle) {
        if self.state != SessionState::Scanning {
            debug!("Dropping stale scan result in state {}", self.state);
            return;
        }
        self.scan_task = None;
        self.callback.on_peripheral_found(&peripheral);

        info!(
            "Connecting to '{}' at {}",
            peripheral.name, peripheral.address
        );
        self.state = SessionState::Connecting;

        let transport = self.transport.clone();
        let events = self.events_tx.clone();
        self.setup_task = Some(tokio::spawn(async move {
            let event = match transport.connect(&peripheral).await {
                Ok(link) => SessionEvent::Connected(link),
                Err(e) => SessionEvent::ConnectFailed(e.to_string()),
            };
            let _ = events.send(event).await;
        }));
    }

    fn handle_discovery_ended(&mut self) {
        if self.state != SessionState::Scanning {
            return;
        }
        self.scan_task = None;
        self.state = SessionState::Idle;
        info!("Scanner not found; discovery can be retried");
        self.callback.on_not_found();
    }

    async fn handle_connected(&mut self, link: Arc<dyn ScannerLink>) {
        if self.state != SessionState::Connecting {
            debug!("Dropping stale connect result in state {}", self.state);
            let _ = link.close().await;
            return;
        }
        self.setup_task = None;
        info!("Transport connected, discovering services");
        self.state = SessionState::DiscoveringServices;
        self.pending_link = Some(link.clone());

        let service = self.config.service_uuid;
        let token_uuid = self.config.token_char_uuid;
        let heartbeat_uuid = self.config.heartbeat_char_uuid;
        let events = self.events_tx.clone();
        self.setup_task = Some(tokio::spawn(async move {
            let event = match link.resolve_characteristics(service).await {
                Ok(()) => match (
                    link.characteristic(token_uuid),
                    link.characteristic(heartbeat_uuid),
                ) {
                    (Some(token_char), Some(heartbeat_char)) => {
                        SessionEvent::CharacteristicsResolved {
                            token_char,
                            heartbeat_char,
                        }
                    }
                    (None, _) => SessionEvent::ResolutionFailed(format!(
                        "token characteristic {} not found",
                        token_uuid
                    )),
                    (_, None) => SessionEvent::ResolutionFailed(format!(
                        "heartbeat characteristic {} not found",
                        heartbeat_uuid
                    )),
                },
                Err(e) => SessionEvent::ResolutionFailed(e.to_string()),
            };
            let _ = events.send(event).await;
        }));
    }

    async fn handle_connect_failed(&mut self, error: String) {
        if self.state != SessionState::Connecting {
            return;
        }
        self.setup_task = None;
        error!("Connection failed: {}", error);
        self.teardown(DisconnectReason::ConnectFailed(error)).await;
    }

    fn handle_resolved(
        &mut self,
        token_char: CharacteristicHandle,
        heartbeat_char: CharacteristicHandle,
    ) {
        if self.state != SessionState::DiscoveringServices {
            debug!("Dropping stale resolution result in state {}", self.state);
            return;
        }
        self.setup_task = None;
        let link = match self.pending_link.take() {
            Some(link) => link,
            None => {
                warn!("Characteristics resolved but no pending link");
                return;
            }
        };

        // Watch the transport for unexpected link loss while Ready
        let watch_link = link.clone();
        let period = self.config.link_check_period;
        let events = self.events_tx.clone();
        let link_watch = tokio::spawn(async move {
            loop {
                sleep(period).await;
                if !watch_link.is_connected().await {
                    let _ = events.send(SessionEvent::LinkLost).await;
                    break;
                }
            }
        });

        self.context = Some(ConnectionContext {
            link,
            token_char,
            heartbeat_char,
            link_watch,
        });
        self.state = SessionState::Ready;
        info!("Session ready, arming heartbeat");
        self.heartbeat
            .arm(self.events_tx.clone(), || SessionEvent::HeartbeatTick);
        self.callback.on_ready();
    }

    async fn handle_resolution_failed(&mut self, error: String) {
        if self.state != SessionState::DiscoveringServices {
            return;
        }
        self.setup_task = None;
        // Configuration/firmware mismatch is fatal for this session
        error!("Service discovery failed: {}", error);
        self.teardown(DisconnectReason::ServiceMissing(error)).await;
    }

    async fn handle_link_lost(&mut self) {
        if self.state != SessionState::Ready {
            return;
        }
        warn!("Transport reported link loss");
        self.teardown(DisconnectReason::LinkLost).await;
    }

    fn handle_heartbeat_tick(&mut self) {
        if self.state != SessionState::Ready {
            return;
        }
        let ctx = match &self.context {
            Some(ctx) => ctx,
            None => return,
        };
        // Fire-and-forget: a failed heartbeat is not a disconnect signal
        let link = ctx.link.clone();
        let heartbeat_char = ctx.heartbeat_char.clone();
        tokio::spawn(async move {
            match link.write_characteristic(&heartbeat_char, HEARTBEAT_PAYLOAD).await {
                Ok(()) => debug!("Heartbeat written"),
                Err(e) => debug!("Heartbeat write failed (absorbed): {}", e),
            }
        });
    }

    fn handle_send_token(&mut self, token: &str) -> bool {
        if self.state != SessionState::Ready {
            warn!("Rejecting token write in state {}", self.state);
            return false;
        }
        let ctx = match &self.context {
            Some(ctx) => ctx,
            None => return false,
        };
        let payload = match self.relay.submit(token) {
            Some(payload) => payload,
            None => return false,
        };

        info!("Submitting token write ({} bytes)", payload.len());
        let link = ctx.link.clone();
        let token_char = ctx.token_char.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let success = match link.write_characteristic(&token_char, &payload).await {
                Ok(()) => true,
                Err(e) => {
                    error!("Token write failed: {}", e);
                    false
                }
            };
            let _ = events.send(SessionEvent::TokenWriteComplete(success)).await;
        });
        true
    }

    async fn handle_disconnect(&mut self) {
        // Idle and Disconnected hold no context and no in-flight setup, so
        // there is nothing to tear down and nothing to report
        if self.context.is_none()
            && matches!(
                self.state,
                SessionState::Idle | SessionState::Disconnected
            )
        {
            debug!("Disconnect in {} is a no-op", self.state);
            return;
        }
        self.teardown(DisconnectReason::Requested).await;
    }

    /// Disarm the heartbeat, release all handles, and close the transport.
    /// Runs entirely inside the actor so a heartbeat tick can never fire
    /// against a half-closed context.
    async fn teardown(&mut self, reason: DisconnectReason) {
        self.heartbeat.disarm();

        if let Some(task) = self.scan_task.take() {
            task.abort();
            self.transport.stop_scan().await;
        }
        if let Some(task) = self.setup_task.take() {
            task.abort();
        }
        if let Some(link) = self.pending_link.take() {
            if let Err(e) = link.close().await {
                debug!("Error closing pending link: {}", e);
            }
        }
        if let Some(ctx) = self.context.take() {
            ctx.link_watch.abort();
            if let Err(e) = ctx.link.close().await {
                debug!("Error closing link: {}", e);
            }
        }

        self.state = SessionState::Disconnected;
        info!("Session disconnected: {}", reason);
        self.callback.on_disconnected(&reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HEARTBEAT_CHAR_UUID, TOKEN_CHAR_UUID};
    use crate::types::{Result, SessionError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use uuid::Uuid;

    fn test_config() -> ScannerConfig {
        ScannerConfig {
            heartbeat_period: Duration::from_millis(30),
            scan_timeout: Duration::from_millis(80),
            link_check_period: Duration::from_millis(10),
            ..ScannerConfig::default()
        }
    }

    fn scanner_handle() -> PeripheralHandle {
        PeripheralHandle {
            name: "한진택배 스캐너".to_string(),
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            rssi: Some(-60),
        }
    }

    struct MockLink {
        has_token_char: bool,
        has_heartbeat_char: bool,
        connected: AtomicBool,
        write_delay: Duration,
        writes: StdMutex<Vec<(Uuid, Vec<u8>)>>,
    }

    impl MockLink {
        fn new() -> Self {
            Self {
                has_token_char: true,
                has_heartbeat_char: true,
                connected: AtomicBool::new(false),
                write_delay: Duration::ZERO,
                writes: StdMutex::new(Vec::new()),
            }
        }

        fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
            self.writes.lock().unwrap().clone()
        }

        fn heartbeat_count(&self) -> usize {
            self.writes()
                .iter()
                .filter(|(uuid, _)| *uuid == HEARTBEAT_CHAR_UUID)
                .count()
        }
    }

    #[async_trait::async_trait]
    impl ScannerLink for MockLink {
        async fn resolve_characteristics(&self, _service: Uuid) -> Result<()> {
            Ok(())
        }

        fn characteristic(&self, uuid: Uuid) -> Option<CharacteristicHandle> {
            let present = (uuid == TOKEN_CHAR_UUID && self.has_token_char)
                || (uuid == HEARTBEAT_CHAR_UUID && self.has_heartbeat_char);
            present.then(|| CharacteristicHandle::new(uuid))
        }

        async fn write_characteristic(
            &self,
            handle: &CharacteristicHandle,
            data: &[u8],
        ) -> Result<()> {
            if !self.write_delay.is_zero() {
                sleep(self.write_delay).await;
            }
            if !self.connected.load(Ordering::SeqCst) {
                return Err(SessionError::Bluetooth("link closed".to_string()));
            }
            self.writes
                .lock()
                .unwrap()
                .push((handle.uuid, data.to_vec()));
            Ok(())
        }

        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn close(&self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MockTransport {
        bonded: Vec<PeripheralHandle>,
        scan_results: Vec<PeripheralHandle>,
        link: Arc<MockLink>,
    }

    impl MockTransport {
        fn with_link(link: Arc<MockLink>) -> Self {
            Self {
                bonded: vec![scanner_handle()],
                scan_results: Vec::new(),
                link,
            }
        }
    }

    #[async_trait::async_trait]
    impl BleTransport for MockTransport {
        async fn bonded_peripherals(&self) -> Result<Vec<PeripheralHandle>> {
            Ok(self.bonded.clone())
        }

        async fn scan_peripherals(&self) -> Result<mpsc::Receiver<PeripheralHandle>> {
            let (tx, rx) = mpsc::channel(8);
            for peripheral in self.scan_results.clone() {
                let _ = tx.send(peripheral).await;
            }
            Ok(rx)
        }

        async fn stop_scan(&self) {}

        async fn connect(&self, _peripheral: &PeripheralHandle) -> Result<Arc<dyn ScannerLink>> {
            self.link.connected.store(true, Ordering::SeqCst);
            Ok(self.link.clone())
        }
    }

    #[derive(Default)]
    struct RecordingCallback {
        found: AtomicBool,
        not_found: AtomicBool,
        ready: AtomicBool,
        disconnects: StdMutex<Vec<DisconnectReason>>,
        token_results: StdMutex<Vec<bool>>,
    }

    impl SessionCallback for RecordingCallback {
        fn on_peripheral_found(&self, _peripheral: &PeripheralHandle) {
            self.found.store(true, Ordering::SeqCst);
        }

        fn on_not_found(&self) {
            self.not_found.store(true, Ordering::SeqCst);
        }

        fn on_ready(&self) {
            self.ready.store(true, Ordering::SeqCst);
        }

        fn on_disconnected(&self, reason: &DisconnectReason) {
            self.disconnects.lock().unwrap().push(reason.clone());
        }

        fn on_token_result(&self, success: bool) {
            self.token_results.lock().unwrap().push(success);
        }
    }

    async fn ready_session(
        link: Arc<MockLink>,
        config: ScannerConfig,
    ) -> (ScannerSession, Arc<RecordingCallback>) {
        let transport = Arc::new(MockTransport::with_link(link));
        let callback = Arc::new(RecordingCallback::default());
        let session = ScannerSession::spawn(config, transport, callback.clone());
        session.start_discovery().await;
        sleep(Duration::from_millis(50)).await;
        (session, callback)
    }

    #[tokio::test]
    async fn test_happy_path_reaches_ready_and_heartbeats() {
        let link = Arc::new(MockLink::new());
        let (session, callback) = ready_session(link.clone(), test_config()).await;

        let status = session.status().await;
        assert_eq!(status.state, SessionState::Ready);
        assert!(status.heartbeat_armed);
        assert!(callback.found.load(Ordering::SeqCst));
        assert!(callback.ready.load(Ordering::SeqCst));

        // First heartbeat fires on entry to Ready, not after one period
        assert!(link.heartbeat_count() >= 1);
        let (_, payload) = link
            .writes()
            .into_iter()
            .find(|(uuid, _)| *uuid == HEARTBEAT_CHAR_UUID)
            .unwrap();
        assert_eq!(payload, b"HEARTBEAT");

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_token_writes_utf8_and_reports_once() {
        let link = Arc::new(MockLink::new());
        let (session, callback) = ready_session(link.clone(), test_config()).await;

        assert!(session.send_token("abc123").await);
        sleep(Duration::from_millis(30)).await;

        let token_writes: Vec<_> = link
            .writes()
            .into_iter()
            .filter(|(uuid, _)| *uuid == TOKEN_CHAR_UUID)
            .collect();
        assert_eq!(token_writes.len(), 1);
        assert_eq!(
            token_writes[0].1,
            vec![0x61, 0x62, 0x63, 0x31, 0x32, 0x33]
        );
        assert_eq!(*callback.token_results.lock().unwrap(), vec![true]);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_token_write_rejected_while_in_flight() {
        let mut link = MockLink::new();
        link.write_delay = Duration::from_millis(80);
        let link = Arc::new(link);
        let (session, callback) = ready_session(link.clone(), test_config()).await;

        assert!(session.send_token("one").await);
        assert!(!session.send_token("two").await);

        sleep(Duration::from_millis(150)).await;
        // Exactly one outcome for the one accepted submission
        assert_eq!(callback.token_results.lock().unwrap().len(), 1);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_heartbeat_char_is_fatal() {
        let mut link = MockLink::new();
        link.has_heartbeat_char = false;
        let link = Arc::new(link);
        let (session, callback) = ready_session(link.clone(), test_config()).await;

        let status = session.status().await;
        assert_eq!(status.state, SessionState::Disconnected);
        assert!(!status.heartbeat_armed);
        assert!(!session.send_token("abc123").await);
        assert!(matches!(
            callback.disconnects.lock().unwrap().as_slice(),
            [DisconnectReason::ServiceMissing(_)]
        ));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_in_idle_is_noop() {
        let link = Arc::new(MockLink::new());
        let transport = Arc::new(MockTransport::with_link(link));
        let callback = Arc::new(RecordingCallback::default());
        let session = ScannerSession::spawn(test_config(), transport, callback.clone());

        session.disconnect().await;
        let status = session.status().await;
        assert_eq!(status.state, SessionState::Idle);
        assert!(callback.disconnects.lock().unwrap().is_empty());

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_repeated_disconnect_reports_once() {
        let link = Arc::new(MockLink::new());
        let (session, callback) = ready_session(link.clone(), test_config()).await;
        assert_eq!(session.status().await.state, SessionState::Ready);

        session.disconnect().await;
        session.disconnect().await;
        sleep(Duration::from_millis(20)).await;

        assert_eq!(session.status().await.state, SessionState::Disconnected);
        assert_eq!(
            *callback.disconnects.lock().unwrap(),
            vec![DisconnectReason::Requested]
        );

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_link_loss_cancels_heartbeat_and_fails_token_writes() {
        let link = Arc::new(MockLink::new());
        let (session, callback) = ready_session(link.clone(), test_config()).await;
        assert_eq!(session.status().await.state, SessionState::Ready);

        link.connected.store(false, Ordering::SeqCst);
        sleep(Duration::from_millis(40)).await;

        let status = session.status().await;
        assert_eq!(status.state, SessionState::Disconnected);
        assert!(!status.heartbeat_armed);
        assert!(!session.send_token("abc123").await);
        assert!(callback
            .disconnects
            .lock()
            .unwrap()
            .contains(&DisconnectReason::LinkLost));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_ready_reentry_keeps_single_heartbeat_timer() {
        let link = Arc::new(MockLink::new());
        let (session, _callback) = ready_session(link.clone(), test_config()).await;
        assert_eq!(session.status().await.state, SessionState::Ready);

        session.disconnect().await;
        sleep(Duration::from_millis(20)).await;
        assert_eq!(session.status().await.state, SessionState::Disconnected);

        session.start_discovery().await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(session.status().await.state, SessionState::Ready);

        // With a 30ms period, a single timer produces roughly one write per
        // period; a leaked second timer would double the rate.
        let before = link.heartbeat_count();
        sleep(Duration::from_millis(120)).await;
        let ticks = link.heartbeat_count() - before;
        assert!(ticks >= 2, "heartbeat stopped ticking: {}", ticks);
        assert!(ticks <= 6, "duplicate heartbeat timers: {} ticks", ticks);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_discovery_timeout_reports_not_found() {
        let link = Arc::new(MockLink::new());
        let transport = Arc::new(MockTransport {
            bonded: Vec::new(),
            scan_results: vec![PeripheralHandle {
                name: "JBL Flip 5".to_string(),
                address: "11:22:33:44:55:66".to_string(),
                rssi: None,
            }],
            link,
        });
        let callback = Arc::new(RecordingCallback::default());
        let session = ScannerSession::spawn(test_config(), transport, callback.clone());

        session.start_discovery().await;
        sleep(Duration::from_millis(40)).await;

        let status = session.status().await;
        assert_eq!(status.state, SessionState::Idle);
        assert!(callback.not_found.load(Ordering::SeqCst));
        assert!(!callback.found.load(Ordering::SeqCst));

        session.shutdown().await;
    }
}
