//! Heartbeat Scheduler
//!
//! Fires a fixed-interval keep-alive while the session is Ready. Ticks are
//! delivered into the session's event queue rather than performing the write
//! here, so a tick can never race connection teardown.

use log::debug;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Literal payload written to the heartbeat characteristic
pub const HEARTBEAT_PAYLOAD: &[u8] = b"HEARTBEAT";

/// Owns the single recurring keep-alive timer of a session
///
/// At most one timer task exists at a time; arming always cancels any prior
/// timer first. The first tick fires immediately, not after the first period.
pub struct HeartbeatScheduler {
    period: Duration,
    timer: Option<JoinHandle<()>>,
}

impl HeartbeatScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            timer: None,
        }
    }

    /// Arm the timer, cancelling any prior one
    ///
    /// Each tick sends `make_tick()` on `events`; the task ends when the
    /// receiving side goes away.
    pub fn arm<E, F>(&mut self, events: mpsc::Sender<E>, make_tick: F)
    where
        E: Send + 'static,
        F: Fn() -> E + Send + 'static,
    {
        self.disarm();

        let period = self.period;
        self.timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if events.send(make_tick()).await.is_err() {
                    debug!("Heartbeat tick receiver gone, stopping timer");
                    break;
                }
            }
        }));
        debug!("Heartbeat timer armed (period: {:?})", period);
    }

    /// Cancel the timer; safe to call when not armed
    pub fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
            debug!("Heartbeat timer disarmed");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}
