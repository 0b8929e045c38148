//! Peer side of a share: look up the offer, answer it, reassemble inbound
//! files.
//!
//! Joining is best-effort. When no offer is on the relay the join resolves
//! to `None` without error and the caller quietly falls back to relay
//! delivery; the sender may simply not be live anymore.

use super::reconcile::{FileIdentity, Reconciler};
use super::{SessionEvent, SessionTiming};
use crate::core::code::normalize_code;
use crate::core::connection::{LinkEvents, PeerLink};
use crate::core::protocol::codec::TransferAssembler;
use crate::core::signaling::{RelayClient, SignalRole};
use anyhow::Result;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// One answering attempt against a host's published offer.
pub struct PeerSession {
    link: Arc<PeerLink>,
}

impl PeerSession {
    /// Try to join the P2P path for `code`.
    ///
    /// Returns `Ok(None)` when no offer is published. Completed inbound
    /// files pass through `reconciler` before surfacing, so a copy already
    /// delivered via the relay listing is silently dropped.
    pub async fn join(
        relay: RelayClient,
        code: &str,
        timing: &SessionTiming,
        reconciler: Arc<Mutex<Reconciler>>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Option<Self>> {
        let code = normalize_code(code);
        let Some(offer) = lookup_offer(&relay, &code, timing).await? else {
            debug!(event = "no_offer_published", code = %code, "Relay delivery only");
            return Ok(None);
        };

        let assembler = Arc::new(Mutex::new(TransferAssembler::new()));
        let link = {
            let on_connect_events = events.clone();
            let on_close_events = events.clone();
            let data_events = events.clone();
            let code = code.clone();
            Arc::new(
                PeerLink::new(LinkEvents {
                    on_connect: Box::new(move || {
                        let _ = on_connect_events.send(SessionEvent::P2pConnected);
                    }),
                    on_data: Box::new(move |payload| {
                        let completed = match assembler.lock() {
                            Ok(mut asm) => asm.accept(payload),
                            Err(_) => return,
                        };
                        let Some(file) = completed else { return };
                        let identity = FileIdentity::new(&code, &file.meta.name, file.meta.size);
                        let fresh = reconciler
                            .lock()
                            .map(|mut rec| rec.mark_delivered(identity))
                            .unwrap_or(false);
                        if fresh {
                            let _ = data_events.send(SessionEvent::Received(file));
                        } else {
                            debug!(
                                event = "p2p_copy_skipped",
                                name = %file.meta.name,
                                "Already delivered via relay"
                            );
                        }
                    }),
                    on_close: Box::new(move || {
                        let _ = on_close_events.send(SessionEvent::P2pClosed);
                    }),
                })
                .await?,
            )
        };

        // A bad offer or a failed publish aborts this attempt; close the
        // link so its ICE/DTLS tasks do not outlive it.
        let answer = match link.create_answer(&offer).await {
            Ok(answer) => answer,
            Err(e) => {
                link.close().await;
                return Err(e);
            }
        };
        if let Err(e) = relay.publish(&code, SignalRole::Peer, &answer).await {
            link.close().await;
            return Err(e);
        }
        info!(event = "peer_joined", code = %code, "Answer published");

        Ok(Some(Self { link }))
    }

    /// Tear the link down. Idempotent.
    pub async fn close(&self) {
        self.link.close().await;
    }
}

/// Bounded offer lookup. One attempt by default; extra attempts sleep the
/// lookup interval between fetches.
pub(crate) async fn lookup_offer(
    relay: &RelayClient,
    code: &str,
    timing: &SessionTiming,
) -> Result<Option<String>> {
    let attempts = timing.offer_lookup_attempts.max(1);
    for attempt in 1..=attempts {
        if attempt > 1 {
            tokio::time::sleep(timing.offer_lookup_interval).await;
        }
        if let Some(offer) = relay.fetch(code, SignalRole::Host).await? {
            debug!(event = "offer_found", code = %code, attempt);
            return Ok(Some(offer));
        }
        debug!(event = "offer_missing", code = %code, attempt);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryObjectStore;
    use std::time::Duration;

    fn relay() -> RelayClient {
        RelayClient::new(Arc::new(MemoryObjectStore::new()))
    }

    #[tokio::test]
    async fn test_lookup_offer_absent() {
        let timing = SessionTiming::default();
        assert!(lookup_offer(&relay(), "7K2M9A", &timing)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_lookup_offer_found() {
        let relay = relay();
        relay
            .publish("7K2M9A", SignalRole::Host, "{\"type\":\"offer\"}")
            .await
            .unwrap();

        let timing = SessionTiming::default();
        assert_eq!(
            lookup_offer(&relay, "7K2M9A", &timing).await.unwrap().as_deref(),
            Some("{\"type\":\"offer\"}")
        );
    }

    #[tokio::test]
    async fn test_lookup_offer_retries_until_published() {
        let relay = relay();
        {
            let relay = relay.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(25)).await;
                relay
                    .publish("7K2M9A", SignalRole::Host, "late-offer")
                    .await
                    .unwrap();
            });
        }

        let timing = SessionTiming {
            offer_lookup_attempts: 10,
            offer_lookup_interval: Duration::from_millis(10),
            ..SessionTiming::default()
        };
        assert_eq!(
            lookup_offer(&relay, "7K2M9A", &timing).await.unwrap().as_deref(),
            Some("late-offer")
        );
    }

    #[tokio::test]
    async fn test_join_with_malformed_offer_fails_cleanly() {
        let relay = relay();
        relay
            .publish("7K2M9A", SignalRole::Host, "not a session description")
            .await
            .unwrap();

        let reconciler = Arc::new(Mutex::new(Reconciler::new()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let joined = PeerSession::join(
            relay.clone(),
            "7K2M9A",
            &SessionTiming::default(),
            reconciler,
            tx,
        )
        .await;
        assert!(joined.is_err());

        // The aborted attempt left no answer behind.
        assert!(relay
            .fetch("7K2M9A", SignalRole::Peer)
            .await
            .unwrap()
            .is_none());
    }
}
