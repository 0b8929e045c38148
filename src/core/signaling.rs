//! Signaling relay client: SDP exchange through the passive blob store.
//!
//! The relay has no protocol logic and no push channel. Each side publishes
//! its serialized session description under the well-known object name
//! `SIGNAL-{code}-{ROLE}` and the other side polls for it. At most one
//! record exists per `(code, role)`: publishing deletes any stale record
//! first, so the last writer wins. Records expire on their own after
//! [`SIGNAL_TTL`]; readers never delete them.

use crate::core::code::normalize_code;
use crate::core::config::SIGNAL_TTL;
use crate::core::store::{ObjectStore, SIGNAL_PREFIX};
use anyhow::Result;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Which side of the handshake a signal record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalRole {
    /// The offering side (sender).
    Host,
    /// The answering side (receiver).
    Peer,
}

impl SignalRole {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalRole::Host => "HOST",
            SignalRole::Peer => "PEER",
        }
    }
}

impl fmt::Display for SignalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn signal_name(code: &str, role: SignalRole) -> String {
    format!("{SIGNAL_PREFIX}{code}-{role}")
}

/// Thin façade over the object store for publishing and fetching SDP blobs.
#[derive(Clone)]
pub struct RelayClient {
    store: Arc<dyn ObjectStore>,
    ttl: Duration,
}

impl RelayClient {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            ttl: SIGNAL_TTL,
        }
    }

    /// Override the record expiry (tests use millisecond TTLs).
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Store `payload` at `(code, role)`, replacing any stale record, and
    /// schedule the new record's expiry.
    pub async fn publish(&self, code: &str, role: SignalRole, payload: &str) -> Result<()> {
        let code = normalize_code(code);
        let name = signal_name(&code, role);

        for stale in self.store.find_by_name(&name).await? {
            // A leftover from a previous attempt under the same code.
            let _ = self.store.delete(&stale.id).await;
        }

        let info = self
            .store
            .create(&name, "application/json", Bytes::from(payload.to_owned()))
            .await?;
        info!(event = "signal_published", code = %code, role = %role, bytes = info.size);

        let store = self.store.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if store.delete(&info.id).await.is_ok() {
                debug!(event = "signal_expired", name = %info.name);
            }
        });
        Ok(())
    }

    /// Current payload at `(code, role)`, or `None` when absent.
    pub async fn fetch(&self, code: &str, role: SignalRole) -> Result<Option<String>> {
        let code = normalize_code(code);
        let name = signal_name(&code, role);

        let Some(record) = self.store.find_by_name(&name).await?.into_iter().next() else {
            return Ok(None);
        };
        let bytes = self.store.read(&record.id).await?;
        Ok(Some(String::from_utf8(bytes.to_vec())?))
    }
}
