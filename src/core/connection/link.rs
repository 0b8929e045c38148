//! [`PeerLink`]: lifecycle of one peer connection and its data channel.

use crate::core::config::{
    DATA_CHANNEL_LABEL, ICE_GATHER_TIMEOUT, INCLUDE_LOOPBACK_CANDIDATES, STUN_SERVERS,
};
use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::{LinkEvents, Payload};

/// One WebRTC peer connection plus at most one data channel.
///
/// Exclusively owned by the orchestrator that created it; closed and
/// discarded on teardown. A failed link is never reused; the caller
/// builds a fresh one for the next attempt.
pub struct PeerLink {
    peer_connection: Arc<RTCPeerConnection>,
    data_channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
    events: Arc<LinkEvents>,
    /// Set when the terminal close event has been delivered.
    close_fired: Arc<AtomicBool>,
    /// Set by the first `close()` call; makes teardown idempotent.
    closed: AtomicBool,
}

/// Deliver the terminal close callback exactly once.
fn fire_close(events: &Arc<LinkEvents>, close_fired: &Arc<AtomicBool>) {
    if !close_fired.swap(true, Ordering::SeqCst) {
        (events.on_close)();
    }
}

/// Wire a data channel's native events into the caller's hooks.
fn attach_channel(
    dc: &Arc<RTCDataChannel>,
    events: Arc<LinkEvents>,
    close_fired: Arc<AtomicBool>,
) {
    {
        let events = events.clone();
        dc.on_open(Box::new(move || {
            let events = events.clone();
            Box::pin(async move {
                debug!(event = "data_channel_open");
                (events.on_connect)();
            })
        }));
    }

    {
        let events = events.clone();
        let close_fired = close_fired.clone();
        dc.on_close(Box::new(move || {
            let events = events.clone();
            let close_fired = close_fired.clone();
            Box::pin(async move {
                debug!(event = "data_channel_closed");
                fire_close(&events, &close_fired);
            })
        }));
    }

    let events_msg = events;
    dc.on_message(Box::new(move |msg| {
        let events = events_msg.clone();
        Box::pin(async move {
            if msg.is_string {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => (events.on_data)(Payload::Text(text)),
                    Err(e) => warn!(event = "text_frame_dropped", error = %e),
                }
            } else {
                (events.on_data)(Payload::Binary(msg.data));
            }
        })
    }));
}

impl PeerLink {
    /// Build the API stack and one peer connection with the STUN config.
    pub async fn new(events: LinkEvents) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let mut setting_engine = SettingEngine::default();
        setting_engine.set_include_loopback_candidate(INCLUDE_LOOPBACK_CANDIDATES);

        let api = APIBuilder::new()
            .with_setting_engine(setting_engine)
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let peer_connection = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers: STUN_SERVERS
                    .iter()
                    .map(|url| RTCIceServer {
                        urls: vec![(*url).to_string()],
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            })
            .await?,
        );

        let events = Arc::new(events);
        let close_fired = Arc::new(AtomicBool::new(false));

        {
            let events = events.clone();
            let close_fired = close_fired.clone();
            peer_connection.on_peer_connection_state_change(Box::new(move |state| {
                let events = events.clone();
                let close_fired = close_fired.clone();
                Box::pin(async move {
                    match state {
                        RTCPeerConnectionState::Connected => {
                            info!(event = "link_connected", "Peer connection established");
                        }
                        RTCPeerConnectionState::Disconnected
                        | RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Closed => {
                            info!(event = "link_terminal", ?state, "Peer connection ended");
                            fire_close(&events, &close_fired);
                        }
                        _ => {}
                    }
                })
            }));
        }

        Ok(Self {
            peer_connection,
            data_channel: Arc::new(RwLock::new(None)),
            events,
            close_fired,
            closed: AtomicBool::new(false),
        })
    }

    // ── Offer / Answer ───────────────────────────────────────────────────

    /// Open the data channel, create a local offer, wait for the full ICE
    /// candidate set, and return the serialized description.
    ///
    /// The channel is created before the offer so its negotiation rides
    /// inside the SDP; there is no trickle path to add it later.
    pub async fn create_offer(&self) -> Result<String> {
        let dc = self
            .peer_connection
            .create_data_channel(
                DATA_CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    // Ordered + fully reliable: the codec depends on it.
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await?;
        attach_channel(&dc, self.events.clone(), self.close_fired.clone());
        *self.data_channel.write().await = Some(dc);

        let offer = self.peer_connection.create_offer(None).await?;
        self.peer_connection.set_local_description(offer).await?;
        gather_local_description(&self.peer_connection).await
    }

    /// Apply a remote offer, produce an answer, wait for ICE gathering,
    /// and return the serialized description. The data channel arrives
    /// reactively via the incoming-channel event.
    pub async fn create_answer(&self, remote_offer: &str) -> Result<String> {
        {
            let slot = self.data_channel.clone();
            let events = self.events.clone();
            let close_fired = self.close_fired.clone();
            self.peer_connection.on_data_channel(Box::new(move |dc| {
                let slot = slot.clone();
                let events = events.clone();
                let close_fired = close_fired.clone();
                Box::pin(async move {
                    debug!(event = "data_channel_adopted", label = %dc.label());
                    attach_channel(&dc, events, close_fired);
                    *slot.write().await = Some(dc);
                })
            }));
        }

        let offer: RTCSessionDescription =
            serde_json::from_str(remote_offer).context("Malformed remote offer")?;
        self.peer_connection.set_remote_description(offer).await?;

        let answer = self.peer_connection.create_answer(None).await?;
        self.peer_connection.set_local_description(answer).await?;
        gather_local_description(&self.peer_connection).await
    }

    /// Apply the remote answer, completing the handshake on the offering
    /// side.
    pub async fn set_answer(&self, remote_answer: &str) -> Result<()> {
        let answer: RTCSessionDescription =
            serde_json::from_str(remote_answer).context("Malformed remote answer")?;
        self.peer_connection.set_remote_description(answer).await?;
        Ok(())
    }

    // ── Data path ────────────────────────────────────────────────────────

    /// Write to the data channel iff it is open; otherwise the frame is
    /// dropped, never queued. Errors are logged, not raised.
    pub async fn send(&self, payload: Payload) {
        let dc = self.data_channel.read().await;
        match dc.as_ref() {
            Some(dc) if dc.ready_state() == RTCDataChannelState::Open => {
                let result = match payload {
                    Payload::Text(text) => dc.send_text(text).await,
                    Payload::Binary(bytes) => dc.send(&bytes).await,
                };
                if let Err(e) = result {
                    warn!(event = "send_failed", error = %e, "Data channel write failed");
                }
            }
            Some(dc) => {
                warn!(
                    event = "send_dropped",
                    state = ?dc.ready_state(),
                    "Data channel not open, dropping frame"
                );
            }
            None => {
                warn!(event = "send_dropped", "No data channel yet, dropping frame");
            }
        }
    }

    /// Close the data channel (if any) and the connection. Idempotent;
    /// safe on a link that never finished negotiating.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(dc) = self.data_channel.write().await.take() {
            if let Err(e) = dc.close().await {
                debug!(event = "channel_close_error", error = %e);
            }
        }
        if let Err(e) = self.peer_connection.close().await {
            debug!(event = "connection_close_error", error = %e);
        }
        info!(event = "link_closed");
    }
}

/// Wait for ICE candidate gathering to report complete, then return the
/// fully-gathered local description as JSON.
async fn gather_local_description(pc: &Arc<RTCPeerConnection>) -> Result<String> {
    if pc.ice_gathering_state() != RTCIceGatheringState::Complete {
        let (tx, rx) = oneshot::channel::<()>();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));
        pc.on_ice_gathering_state_change(Box::new(move |state| {
            let tx = tx.clone();
            Box::pin(async move {
                if state == RTCIceGathererState::Complete {
                    if let Ok(mut guard) = tx.lock() {
                        if let Some(tx) = guard.take() {
                            let _ = tx.send(());
                        }
                    }
                }
            })
        }));

        // Re-check after registering: gathering may have finished in between.
        if pc.ice_gathering_state() != RTCIceGatheringState::Complete {
            timeout(ICE_GATHER_TIMEOUT, rx)
                .await
                .context("ICE gathering timeout")?
                .context("ICE gathering watcher dropped")?;
        }
    }

    let desc = pc
        .local_description()
        .await
        .ok_or_else(|| anyhow!("No local description after ICE gathering"))?;
    Ok(serde_json::to_string(&desc)?)
}
