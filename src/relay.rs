//! Token Relay
//!
//! Tracks the one-shot token write into the scanner. The write itself is
//! performed by the session actor; this type enforces the single-in-flight
//! guard so a second submission cannot race an unacknowledged write.

use log::warn;

/// Submission guard for token writes
///
/// `submit` yields the UTF-8 payload for a write, or `None` while a prior
/// write is still awaiting its acknowledgement. `complete` must be called
/// exactly once per accepted submission.
#[derive(Debug, Default)]
pub struct TokenRelay {
    in_flight: bool,
}

impl TokenRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a token for writing, unless a write is already outstanding
    pub fn submit(&mut self, token: &str) -> Option<Vec<u8>> {
        if self.in_flight {
            warn!("Rejecting token write: a write is already in flight");
            return None;
        }
        self.in_flight = true;
        Some(token.as_bytes().to_vec())
    }

    /// Record that the outstanding write completed (either outcome)
    pub fn complete(&mut self) {
        self.in_flight = false;
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }
}
