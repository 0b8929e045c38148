//! Host side of a share: offer, wait for the answer, stream the files.
//!
//! The host publishes its offer once and then polls the relay for the
//! peer's answer until a deadline. Streaming is armed up front and fires
//! exactly once, when the data channel first opens; every queued file goes
//! out in order and the link is left open afterwards.

use super::{SessionEvent, SessionTiming};
use crate::core::connection::{LinkEvents, Payload, PeerLink};
use crate::core::protocol::codec::{chunk_payload, metadata_frame, FileMeta};
use crate::core::signaling::{RelayClient, SignalRole};
use crate::utils::sos::SignalOfStop;
use anyhow::Result;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Where the host currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPhase {
    Idle,
    OfferCreated,
    AwaitingAnswer,
    Connected,
    Sending,
    Done,
    TimedOut,
}

/// A file queued for the data channel, fully in memory.
#[derive(Debug, Clone)]
pub struct OutboundFile {
    pub meta: FileMeta,
    pub bytes: Bytes,
}

impl OutboundFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            meta: FileMeta {
                name: name.into(),
                size: bytes.len() as u64,
                content_type: content_type.into(),
            },
            bytes,
        }
    }
}

/// One hosting attempt under one share code.
///
/// A timed-out or closed session is never restarted; callers create a new
/// one, which republishes a fresh offer under the same code.
pub struct HostSession {
    link: Arc<PeerLink>,
    phase_rx: watch::Receiver<HostPhase>,
    sos: SignalOfStop,
}

impl HostSession {
    /// Create the link, publish the offer, and spawn the answer poll and
    /// the armed one-shot sender.
    pub async fn start(
        relay: RelayClient,
        code: &str,
        files: Vec<OutboundFile>,
        timing: SessionTiming,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self> {
        let (phase_tx, phase_rx) = watch::channel(HostPhase::Idle);
        let connected = Arc::new(Notify::new());
        let sos = SignalOfStop::new();

        let link = {
            let connected = connected.clone();
            let on_connect_events = events.clone();
            let on_close_events = events.clone();
            Arc::new(
                PeerLink::new(LinkEvents {
                    on_connect: Box::new(move || {
                        let _ = on_connect_events.send(SessionEvent::P2pConnected);
                        connected.notify_one();
                    }),
                    // The host never expects inbound frames.
                    on_data: Box::new(|_| {}),
                    on_close: Box::new(move || {
                        let _ = on_close_events.send(SessionEvent::P2pClosed);
                    }),
                })
                .await?,
            )
        };

        // A failed negotiation must not strand the connection's ICE/DTLS
        // tasks; tear the link down before propagating.
        let offer = match link.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                link.close().await;
                return Err(e);
            }
        };
        let _ = phase_tx.send(HostPhase::OfferCreated);
        if let Err(e) = relay.publish(code, SignalRole::Host, &offer).await {
            link.close().await;
            return Err(e);
        }
        let _ = phase_tx.send(HostPhase::AwaitingAnswer);
        info!(event = "host_started", code = %code, files = files.len());

        let phase_tx = Arc::new(phase_tx);

        // Armed sender: waits for the channel to open, then streams every
        // queued file exactly once.
        {
            let link = link.clone();
            let phase_tx = phase_tx.clone();
            let events = events.clone();
            let sos = sos.clone();
            tokio::spawn(async move {
                let armed = connected.clone();
                if sos.select(async move { armed.notified().await }).await.is_err() {
                    return;
                }
                let _ = phase_tx.send(HostPhase::Connected);
                let _ = phase_tx.send(HostPhase::Sending);
                stream_files(&link, &files, &sos).await;
                let _ = phase_tx.send_if_modified(|p| {
                    if *p == HostPhase::Connected || *p == HostPhase::Sending {
                        *p = HostPhase::Done;
                        true
                    } else {
                        false
                    }
                });
                let _ = events.send(SessionEvent::SendComplete { files: files.len() });
            });
        }

        // Answer poll: bounded by the wait deadline; a timeout leaves the
        // relay fallback as the only remaining path.
        {
            let link = link.clone();
            let relay = relay.clone();
            let code = code.to_string();
            let sos = sos.clone();
            tokio::spawn(async move {
                match await_answer(&relay, &code, &timing, &sos).await {
                    AnswerOutcome::Answer(answer) => {
                        if let Err(e) = link.set_answer(&answer).await {
                            warn!(event = "answer_rejected", error = %e, "Discarding bad answer");
                        }
                    }
                    AnswerOutcome::TimedOut => {
                        info!(event = "host_answer_timeout", code = %code, "No peer answered");
                        let _ = phase_tx.send(HostPhase::TimedOut);
                        let _ = events.send(SessionEvent::HostTimedOut);
                    }
                    AnswerOutcome::Cancelled => {}
                }
            });
        }

        Ok(Self {
            link,
            phase_rx,
            sos,
        })
    }

    pub fn phase(&self) -> HostPhase {
        *self.phase_rx.borrow()
    }

    /// Watch phase transitions; useful for waiting on `Done` or `TimedOut`.
    pub fn phase_watch(&self) -> watch::Receiver<HostPhase> {
        self.phase_rx.clone()
    }

    /// Stop polling and tear the link down. Idempotent.
    pub async fn close(&self) {
        self.sos.cancel();
        self.link.close().await;
    }
}

async fn stream_files(link: &Arc<PeerLink>, files: &[OutboundFile], sos: &SignalOfStop) {
    for file in files {
        if sos.cancelled() {
            return;
        }
        let frame = match metadata_frame(&file.meta) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event = "metadata_encode_failed", name = %file.meta.name, error = %e);
                continue;
            }
        };
        link.send(Payload::Text(frame)).await;
        for chunk in chunk_payload(&file.bytes) {
            if sos.cancelled() {
                return;
            }
            link.send(Payload::Binary(chunk)).await;
        }
        info!(
            event = "file_streamed",
            name = %file.meta.name,
            bytes = file.meta.size
        );
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AnswerOutcome {
    Answer(String),
    TimedOut,
    Cancelled,
}

/// Poll the relay for the peer's answer until it appears, the deadline
/// passes, or the session is cancelled. Fetch errors are transient and
/// only logged; the next tick retries.
pub(crate) async fn await_answer(
    relay: &RelayClient,
    code: &str,
    timing: &SessionTiming,
    sos: &SignalOfStop,
) -> AnswerOutcome {
    let deadline = Instant::now() + timing.answer_wait_timeout;
    loop {
        if sos
            .select(tokio::time::sleep(timing.answer_poll_interval))
            .await
            .is_err()
        {
            return AnswerOutcome::Cancelled;
        }
        if Instant::now() >= deadline {
            return AnswerOutcome::TimedOut;
        }
        match relay.fetch(code, SignalRole::Peer).await {
            Ok(Some(answer)) => {
                debug!(event = "answer_received", code = %code);
                return AnswerOutcome::Answer(answer);
            }
            Ok(None) => {}
            Err(e) => debug!(event = "answer_poll_error", error = %e),
        }
    }
}
