//! Session orchestration: handshake state machines, the relay-polling
//! fallback, and dual-path delivery reconciliation.

pub mod host;
pub mod peer;
pub mod receive;
pub mod reconcile;

use crate::core::config::{
    ANSWER_POLL_INTERVAL, ANSWER_WAIT_TIMEOUT, LISTING_POLL_INTERVAL, OFFER_LOOKUP_ATTEMPTS,
    OFFER_LOOKUP_INTERVAL,
};
use crate::core::protocol::codec::CompletedFile;
use crate::core::store::RemoteFile;
use std::time::Duration;

// ── App-facing events ────────────────────────────────────────────────────────

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Info,
    Success,
    Error,
}

/// Events sent from the session orchestrators to the application layer.
///
/// The application performs the side effects (saving files, fetching
/// download URLs, showing notices); the orchestrators only decide.
#[derive(Debug)]
pub enum SessionEvent {
    /// The data channel opened.
    P2pConnected,
    /// The link reached a terminal state; this attempt is over.
    P2pClosed,
    /// A file arrived over the data channel and should be saved.
    Received(CompletedFile),
    /// Exactly one new file appeared on the relay; download it now.
    AutoDownload(RemoteFile),
    /// Several new files appeared on the relay; list them for the user.
    FilesListed(Vec<RemoteFile>),
    /// The host gave up waiting for an answer; the relay path remains.
    HostTimedOut,
    /// The host finished streaming its queued files.
    SendComplete { files: usize },
    /// A user-facing notice.
    Notice { text: String, tone: Tone },
}

// ── Timing ───────────────────────────────────────────────────────────────────

/// Polling intervals and deadlines for one session.
///
/// Defaults come from [`crate::core::config`]; tests shrink them to
/// milliseconds.
#[derive(Debug, Clone)]
pub struct SessionTiming {
    pub answer_poll_interval: Duration,
    pub answer_wait_timeout: Duration,
    pub listing_poll_interval: Duration,
    pub offer_lookup_attempts: u32,
    pub offer_lookup_interval: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            answer_poll_interval: ANSWER_POLL_INTERVAL,
            answer_wait_timeout: ANSWER_WAIT_TIMEOUT,
            listing_poll_interval: LISTING_POLL_INTERVAL,
            offer_lookup_attempts: OFFER_LOOKUP_ATTEMPTS,
            offer_lookup_interval: OFFER_LOOKUP_INTERVAL,
        }
    }
}
