//! Transfer protocol codec: metadata frame + fixed-size chunk reassembly.
//!
//! # Wire format
//!
//! For each file the sender emits:
//!
//! 1. one text frame: `{"type":"metadata","file":{"name","size","type"}}`
//! 2. the raw bytes split into [`CHUNK_SIZE`] binary frames, back-to-back,
//!    with no end-of-file marker.
//!
//! The receiver keeps a single current-transfer slot (no interleaving of
//! concurrent files). A metadata frame resets the slot, discarding any
//! partial predecessor; binary frames accumulate until the received byte
//! count reaches the declared size, at which point the chunks are
//! concatenated and surfaced as a [`CompletedFile`].
//!
//! There is no checksum; correctness rests entirely on the data channel's
//! ordered, reliable delivery.

use crate::core::config::CHUNK_SIZE;
use anyhow::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::connection::Payload;

// ── Frames ───────────────────────────────────────────────────────────────────

/// Declared attributes of one transfer unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    /// Declared MIME type; `"type"` on the wire.
    #[serde(rename = "type")]
    pub content_type: String,
}

/// Text frames carried on the data channel, discriminated by the `type` tag.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TextFrame {
    Metadata { file: FileMeta },
}

/// Encode the metadata frame announcing `meta`.
pub fn metadata_frame(meta: &FileMeta) -> Result<String> {
    Ok(serde_json::to_string(&TextFrame::Metadata {
        file: meta.clone(),
    })?)
}

/// Split a payload into wire chunks. Every chunk is [`CHUNK_SIZE`] bytes
/// except possibly the last; `Bytes::slice` keeps them zero-copy views.
pub fn chunk_payload(bytes: &Bytes) -> impl Iterator<Item = Bytes> + '_ {
    (0..bytes.len())
        .step_by(CHUNK_SIZE)
        .map(move |off| bytes.slice(off..bytes.len().min(off + CHUNK_SIZE)))
}

/// Number of chunks a payload of `size` bytes occupies on the wire.
pub fn chunk_count(size: u64) -> u64 {
    (size + CHUNK_SIZE as u64 - 1) / CHUNK_SIZE as u64
}

// ── Reassembly ───────────────────────────────────────────────────────────────

/// A fully reassembled inbound transfer.
#[derive(Debug)]
pub struct CompletedFile {
    pub meta: FileMeta,
    pub bytes: Vec<u8>,
}

struct IncomingTransfer {
    meta: FileMeta,
    chunks: Vec<Bytes>,
    received: u64,
}

/// Inbound side of the codec: one current-transfer slot.
#[derive(Default)]
pub struct TransferAssembler {
    current: Option<IncomingTransfer>,
}

impl TransferAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received frame; returns the completed file once the byte
    /// count reaches the declared size.
    ///
    /// Malformed metadata is ignored without tearing down the channel, and
    /// binary frames arriving with no active metadata are dropped.
    pub fn accept(&mut self, payload: Payload) -> Option<CompletedFile> {
        match payload {
            Payload::Text(text) => match serde_json::from_str::<TextFrame>(&text) {
                Ok(TextFrame::Metadata { file }) => {
                    if let Some(stale) = self.current.take() {
                        warn!(
                            event = "partial_transfer_discarded",
                            name = %stale.meta.name,
                            received = stale.received,
                            declared = stale.meta.size,
                            "New metadata frame preempted an unfinished transfer"
                        );
                    }
                    debug!(
                        event = "transfer_started",
                        name = %file.name,
                        bytes = file.size,
                        chunks = chunk_count(file.size)
                    );
                    self.current = Some(IncomingTransfer {
                        meta: file,
                        chunks: Vec::new(),
                        received: 0,
                    });
                    // Zero-byte files have no chunks to wait for.
                    self.try_complete()
                }
                Err(e) => {
                    debug!(event = "frame_ignored", error = %e, "Unparseable text frame");
                    None
                }
            },
            Payload::Binary(data) => {
                let Some(current) = self.current.as_mut() else {
                    warn!(
                        event = "orphan_chunk_dropped",
                        bytes = data.len(),
                        "Binary frame with no active metadata"
                    );
                    return None;
                };
                current.received += data.len() as u64;
                current.chunks.push(data);
                self.try_complete()
            }
        }
    }

    fn try_complete(&mut self) -> Option<CompletedFile> {
        if self.current.as_ref()?.received < self.current.as_ref()?.meta.size {
            return None;
        }
        let done = self.current.take()?;
        let mut bytes = Vec::with_capacity(done.received as usize);
        for chunk in &done.chunks {
            bytes.extend_from_slice(chunk);
        }
        debug!(
            event = "transfer_complete",
            name = %done.meta.name,
            bytes = bytes.len()
        );
        Some(CompletedFile {
            meta: done.meta,
            bytes,
        })
    }
}
