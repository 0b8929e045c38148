//! Centralized configuration constants for codedrop.
//!
//! All tunable parameters live here so they can be reviewed and adjusted
//! in a single place. Wire-format details (frame shapes, signal record
//! naming) stay in their respective modules.

use std::time::Duration;

// ── Transfer / Chunking ──────────────────────────────────────────────────────

/// Data-channel chunk size in bytes (16 KB).
///
/// Chosen conservatively small so every chunk stays well under the 64 KB
/// SCTP message-size limit that browser and webrtc-rs endpoints apply by
/// default. Chunks are sent back-to-back with no end-of-file marker; the
/// receiver detects completion by byte count against the declared size.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Label of the single data channel carrying metadata frames and chunks.
pub const DATA_CHANNEL_LABEL: &str = "file-transfer";

// ── Share codes ──────────────────────────────────────────────────────────────

/// Length of a generated share code.
pub const CODE_LENGTH: usize = 6;

/// Alphabet for share codes. `0` and `O` are excluded so codes stay
/// unambiguous when read aloud or typed from another screen.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNPQRSTUVWXYZ123456789";

/// Shortest code accepted on manual entry (legacy codes were 4 chars).
pub const MIN_CODE_LENGTH: usize = 4;

// ── Storage lifetimes ────────────────────────────────────────────────────────

/// How long an uploaded file lives before its auto-delete timer fires.
pub const FILE_TTL: Duration = Duration::from_secs(60);

/// How long a published signal record (SDP blob) lives. Long enough to
/// cover the full answer-polling window, short enough that stale records
/// from abandoned sessions disappear on their own.
pub const SIGNAL_TTL: Duration = Duration::from_secs(120);

/// Upload size cap (50 MB), matching the relay path's limit.
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Maximum stored filename length after sanitization.
pub const MAX_FILENAME_LENGTH: usize = 180;

// ── Signaling / Polling ──────────────────────────────────────────────────────

/// Host-side interval between polls for a PEER answer record.
pub const ANSWER_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Overall deadline for the host's answer polling loop. Once exceeded the
/// loop stops for good and performs no further relay reads.
pub const ANSWER_WAIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Receiver-side interval between relay file-listing polls while waiting.
pub const LISTING_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Interval between repeated HOST-record lookups on the peer side, when
/// more than one attempt is configured.
pub const OFFER_LOOKUP_INTERVAL: Duration = Duration::from_secs(2);

/// How many times the joining peer looks for a HOST record before falling
/// back to the relay path. The default of 1 preserves the original
/// give-up-after-one-miss behavior; raise it to tolerate a host that has
/// not published its offer yet.
pub const OFFER_LOOKUP_ATTEMPTS: u32 = 1;

// ── Connection / ICE ─────────────────────────────────────────────────────────

/// Timeout for ICE candidate gathering. There is no trickle-ICE path (the
/// relay cannot exchange candidates incrementally), so the full candidate
/// set must be gathered before a description is published.
pub const ICE_GATHER_TIMEOUT: Duration = Duration::from_secs(15);

/// STUN servers used for server-reflexive candidates. No TURN fallback.
pub const STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Whether to gather loopback candidates. Enabled so the loopback demo and
/// same-machine sessions can connect without a reachable STUN server.
pub const INCLUDE_LOOPBACK_CANDIDATES: bool = true;
