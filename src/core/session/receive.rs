//! Receiver entry point: one share code, both delivery paths.
//!
//! A receive session always tries the P2P path first and keeps the relay
//! listing as a safety net. In session mode the listing is polled on a
//! timer and poll failures stay silent; in manual mode there is a single
//! immediate pass whose failures surface as user-facing notices.

use super::peer::PeerSession;
use super::reconcile::{plan_delivery, DeliveryPlan, Reconciler};
use super::{SessionEvent, SessionTiming, Tone};
use crate::core::code::{is_valid_code, normalize_code};
use crate::core::signaling::RelayClient;
use crate::core::store::FileIndex;
use crate::utils::sos::SignalOfStop;
use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

/// How the relay listing is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    /// Poll on a timer for the life of the session.
    Session,
    /// One immediate pass, triggered by explicit user action.
    Manual,
}

/// A running receive session for one code.
pub struct ReceiveSession {
    code: String,
    index: FileIndex,
    reconciler: Arc<Mutex<Reconciler>>,
    /// Filled by the initial join or by a later retry from the poll loop.
    p2p: Arc<AsyncMutex<Option<PeerSession>>>,
    sos: SignalOfStop,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl ReceiveSession {
    /// Validate the code, attempt the P2P join, and start the relay path
    /// in the requested mode.
    ///
    /// A failed P2P join is not an error; the session degrades to relay
    /// delivery only.
    pub async fn start(
        index: FileIndex,
        relay: RelayClient,
        code: &str,
        mode: ReceiveMode,
        timing: SessionTiming,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self> {
        let code = normalize_code(code);
        if !is_valid_code(&code) {
            return Err(anyhow!("Invalid share code: {code:?}"));
        }

        let reconciler = Arc::new(Mutex::new(Reconciler::new()));
        let sos = SignalOfStop::new();

        let p2p = match PeerSession::join(
            relay.clone(),
            &code,
            &timing,
            reconciler.clone(),
            events.clone(),
        )
        .await
        {
            Ok(p2p) => p2p,
            Err(e) => {
                warn!(event = "p2p_join_failed", error = %e, "Relay delivery only");
                None
            }
        };
        info!(event = "receive_started", code = %code, ?mode, p2p = p2p.is_some());

        let session = Self {
            code,
            index,
            reconciler,
            p2p: Arc::new(AsyncMutex::new(p2p)),
            sos,
            events,
        };

        match mode {
            ReceiveMode::Session => session.spawn_poll_loop(relay, timing),
            ReceiveMode::Manual => session.fetch_now().await,
        }
        Ok(session)
    }

    /// Run one user-triggered listing pass, surfacing failures and empty
    /// results as notices.
    pub async fn fetch_now(&self) {
        match poll_pass(
            &self.index,
            &self.code,
            ReceiveMode::Manual,
            &self.reconciler,
            &self.events,
        )
        .await
        {
            Ok(true) => {}
            Ok(false) => {
                let _ = self.events.send(SessionEvent::Notice {
                    text: format!("No files found for code {}", self.code),
                    tone: Tone::Error,
                });
            }
            Err(e) => {
                warn!(event = "manual_fetch_failed", error = %e);
                let _ = self.events.send(SessionEvent::Notice {
                    text: "Could not fetch files, try again".to_string(),
                    tone: Tone::Error,
                });
            }
        }
    }

    fn spawn_poll_loop(&self, relay: RelayClient, timing: SessionTiming) {
        let index = self.index.clone();
        let code = self.code.clone();
        let reconciler = self.reconciler.clone();
        let events = self.events.clone();
        let sos = self.sos.clone();
        let p2p = self.p2p.clone();
        tokio::spawn(async move {
            loop {
                if sos
                    .select(tokio::time::sleep(timing.listing_poll_interval))
                    .await
                    .is_err()
                {
                    break;
                }

                // The host may publish its offer after this session started;
                // keep retrying the join on the poll cadence until it lands.
                {
                    let mut slot = p2p.lock().await;
                    if slot.is_none() {
                        match PeerSession::join(
                            relay.clone(),
                            &code,
                            &timing,
                            reconciler.clone(),
                            events.clone(),
                        )
                        .await
                        {
                            Ok(Some(joined)) => *slot = Some(joined),
                            Ok(None) => {}
                            Err(e) => debug!(event = "p2p_rejoin_failed", error = %e),
                        }
                    }
                }

                // Background poll errors are transient; the next tick retries.
                if let Err(e) =
                    poll_pass(&index, &code, ReceiveMode::Session, &reconciler, &events).await
                {
                    debug!(event = "listing_poll_error", error = %e);
                }
            }
            debug!(event = "listing_poll_stopped", code = %code);
        });
    }

    /// End the session: stop polling, close the P2P link, forget the
    /// delivered set so a reused code starts clean.
    pub async fn stop(&self) {
        self.sos.cancel();
        if let Some(p2p) = self.p2p.lock().await.take() {
            p2p.close().await;
        }
        if let Ok(mut rec) = self.reconciler.lock() {
            rec.clear();
        }
        info!(event = "receive_stopped", code = %self.code);
    }
}

/// One listing pass: list, drop already-delivered files, emit the plan.
/// Returns whether anything new surfaced.
pub(crate) async fn poll_pass(
    index: &FileIndex,
    code: &str,
    mode: ReceiveMode,
    reconciler: &Arc<Mutex<Reconciler>>,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> Result<bool> {
    let listed = index.list_by_code(code).await?;
    let new_files = match reconciler.lock() {
        Ok(mut rec) => rec.filter_new(listed),
        Err(_) => return Ok(false),
    };

    match plan_delivery(new_files, mode == ReceiveMode::Session) {
        DeliveryPlan::Nothing => Ok(false),
        DeliveryPlan::AutoDownload(file) => {
            info!(event = "auto_download", name = %file.name, bytes = file.size);
            let _ = events.send(SessionEvent::AutoDownload(file));
            Ok(true)
        }
        DeliveryPlan::Listed(files) => {
            info!(event = "files_listed", count = files.len());
            let _ = events.send(SessionEvent::Notice {
                text: match files.len() {
                    1 => "Received 1 new file".to_string(),
                    n => format!("Received {n} new files"),
                },
                tone: Tone::Success,
            });
            let _ = events.send(SessionEvent::FilesListed(files));
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::reconcile::FileIdentity;
    use crate::core::store::{MemoryObjectStore, ObjectInfo, ObjectStore};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn setup() -> (FileIndex, RelayClient) {
        let store = Arc::new(MemoryObjectStore::new());
        (FileIndex::new(store.clone()), RelayClient::new(store))
    }

    fn channel() -> (
        mpsc::UnboundedSender<SessionEvent>,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn test_poll_pass_single_file_auto_downloads() {
        let (index, _) = setup();
        index
            .upload(Some("7K2M9A"), "a.txt", "text/plain", Bytes::from_static(b"abc"))
            .await
            .unwrap();

        let rec = Arc::new(Mutex::new(Reconciler::new()));
        let (tx, mut rx) = channel();

        assert!(poll_pass(&index, "7K2M9A", ReceiveMode::Session, &rec, &tx)
            .await
            .unwrap());
        match rx.try_recv().unwrap() {
            SessionEvent::AutoDownload(file) => assert_eq!(file.name, "a.txt"),
            other => panic!("expected AutoDownload, got {other:?}"),
        }

        // Same listing again: nothing new.
        assert!(!poll_pass(&index, "7K2M9A", ReceiveMode::Session, &rec, &tx)
            .await
            .unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_poll_pass_manual_lists_single_file() {
        let (index, _) = setup();
        index
            .upload(Some("7K2M9A"), "a.txt", "text/plain", Bytes::from_static(b"abc"))
            .await
            .unwrap();

        let rec = Arc::new(Mutex::new(Reconciler::new()));
        let (tx, mut rx) = channel();
        assert!(poll_pass(&index, "7K2M9A", ReceiveMode::Manual, &rec, &tx)
            .await
            .unwrap());

        match rx.try_recv().unwrap() {
            SessionEvent::Notice { tone, .. } => assert_eq!(tone, Tone::Success),
            other => panic!("expected Notice, got {other:?}"),
        }
        match rx.try_recv().unwrap() {
            SessionEvent::FilesListed(files) => assert_eq!(files.len(), 1),
            other => panic!("expected FilesListed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_poll_pass_batch_is_listed() {
        let (index, _) = setup();
        for name in ["a.txt", "b.txt", "c.txt"] {
            index
                .upload(Some("7K2M9A"), name, "text/plain", Bytes::from_static(b"x"))
                .await
                .unwrap();
        }

        let rec = Arc::new(Mutex::new(Reconciler::new()));
        let (tx, mut rx) = channel();
        assert!(poll_pass(&index, "7K2M9A", ReceiveMode::Session, &rec, &tx)
            .await
            .unwrap());

        match rx.try_recv().unwrap() {
            SessionEvent::Notice { tone, .. } => assert_eq!(tone, Tone::Success),
            other => panic!("expected Notice, got {other:?}"),
        }
        match rx.try_recv().unwrap() {
            SessionEvent::FilesListed(files) => assert_eq!(files.len(), 3),
            other => panic!("expected FilesListed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_poll_pass_skips_p2p_delivered_file() {
        let (index, _) = setup();
        index
            .upload(Some("7K2M9A"), "a.txt", "text/plain", Bytes::from_static(b"abc"))
            .await
            .unwrap();

        let rec = Arc::new(Mutex::new(Reconciler::new()));
        // The data channel already delivered this exact file.
        rec.lock()
            .unwrap()
            .mark_delivered(FileIdentity::new("7K2M9A", "a.txt", 3));

        let (tx, mut rx) = channel();
        assert!(!poll_pass(&index, "7K2M9A", ReceiveMode::Session, &rec, &tx)
            .await
            .unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_session_mode_polls_on_timer() {
        let (index, relay) = setup();
        let (tx, mut rx) = channel();
        let timing = SessionTiming {
            listing_poll_interval: Duration::from_millis(10),
            ..SessionTiming::default()
        };

        let session = ReceiveSession::start(
            index.clone(),
            relay,
            "7K2M9A",
            ReceiveMode::Session,
            timing,
            tx,
        )
        .await
        .unwrap();

        // The file appears after the session started; a later tick finds it.
        index
            .upload(Some("7K2M9A"), "late.txt", "text/plain", Bytes::from_static(b"hi"))
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            SessionEvent::AutoDownload(file) => assert_eq!(file.name, "late.txt"),
            other => panic!("expected AutoDownload, got {other:?}"),
        }
        session.stop().await;
    }

    /// Counts lookups of HOST signal records to observe join attempts.
    struct HostLookupStore {
        inner: MemoryObjectStore,
        host_lookups: AtomicUsize,
    }

    impl HostLookupStore {
        fn new() -> Self {
            Self {
                inner: MemoryObjectStore::new(),
                host_lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for HostLookupStore {
        async fn create(&self, name: &str, ct: &str, bytes: Bytes) -> anyhow::Result<ObjectInfo> {
            self.inner.create(name, ct, bytes).await
        }
        async fn find_by_name(&self, name: &str) -> anyhow::Result<Vec<ObjectInfo>> {
            if name.ends_with("-HOST") {
                self.host_lookups.fetch_add(1, Ordering::SeqCst);
            }
            self.inner.find_by_name(name).await
        }
        async fn list_by_prefix(&self, prefix: &str) -> anyhow::Result<Vec<ObjectInfo>> {
            self.inner.list_by_prefix(prefix).await
        }
        async fn read(&self, id: &str) -> anyhow::Result<Bytes> {
            self.inner.read(id).await
        }
        async fn delete(&self, id: &str) -> anyhow::Result<()> {
            self.inner.delete(id).await
        }
        fn download_url(&self, id: &str) -> String {
            self.inner.download_url(id)
        }
    }

    #[tokio::test]
    async fn test_session_mode_retries_p2p_join() {
        let store = Arc::new(HostLookupStore::new());
        let index = FileIndex::new(store.clone());
        let relay = RelayClient::new(store.clone());
        let (tx, _rx) = channel();
        let timing = SessionTiming {
            listing_poll_interval: Duration::from_millis(10),
            ..SessionTiming::default()
        };

        // No host ever publishes an offer; the session keeps looking for
        // one on the poll cadence instead of giving up after the first miss.
        let session = ReceiveSession::start(
            index,
            relay,
            "7K2M9A",
            ReceiveMode::Session,
            timing,
            tx,
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.host_lookups.load(Ordering::SeqCst) >= 2);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_manual_mode_reports_empty_code() {
        let (index, relay) = setup();
        let (tx, mut rx) = channel();

        ReceiveSession::start(
            index,
            relay,
            "7K2M9A",
            ReceiveMode::Manual,
            SessionTiming::default(),
            tx,
        )
        .await
        .unwrap();

        match rx.try_recv().unwrap() {
            SessionEvent::Notice { tone, text } => {
                assert_eq!(tone, Tone::Error);
                assert!(text.contains("7K2M9A"));
            }
            other => panic!("expected Notice, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_code_rejected() {
        let (index, relay) = setup();
        let (tx, _rx) = channel();
        let err = ReceiveSession::start(
            index,
            relay,
            "x!",
            ReceiveMode::Manual,
            SessionTiming::default(),
            tx,
        )
        .await;
        assert!(err.is_err());
    }
}
