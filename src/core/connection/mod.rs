//! Peer connection wrapper: one WebRTC connection, one data channel.
//!
//! The wrapper owns no protocol logic. It translates the native connection
//! and channel events into the three callbacks the caller supplies at
//! construction, and exposes the offer/answer/send/close surface the
//! session orchestrators drive.

mod link;

pub use link::PeerLink;

use bytes::Bytes;

/// A frame crossing the data channel.
///
/// Text carries JSON metadata frames; Binary carries file chunks. The
/// discriminant comes from the channel's own message flag, never from
/// content sniffing.
#[derive(Debug, Clone)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

/// Caller-supplied event hooks, fixed at construction.
///
/// `on_close` fires at most once, on the first transition to a terminal
/// transport state (disconnected, failed, or closed); callers must treat
/// it as the end of this link and never retry the same instance.
pub struct LinkEvents {
    pub on_connect: Box<dyn Fn() + Send + Sync>,
    pub on_data: Box<dyn Fn(Payload) + Send + Sync>,
    pub on_close: Box<dyn Fn() + Send + Sync>,
}
