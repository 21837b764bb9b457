use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::WebRtcChannel;
use crate::core::channel::ChannelRef;
use crate::core::config::SCTP_MAX_MESSAGE_SIZE;
use crate::core::connection::{EventSender, Link, LinkRef, LinkState, SdpRole, TransportEvent};
use crate::core::error::{CoreError, Result};

pub struct WebRtcLink {
    pc: Arc<RTCPeerConnection>,
    peer_id: String,
    events: EventSender,
    gathered: watch::Receiver<bool>,
}

impl WebRtcLink {
    pub fn new(pc: Arc<RTCPeerConnection>, peer_id: &str, events: EventSender) -> LinkRef {
        let (gather_tx, gathered) = watch::channel(false);

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            if state == RTCIceGathererState::Complete {
                let _ = gather_tx.send(true);
            }
            Box::pin(async {})
        }));

        {
            let (tx, pid) = (events.clone(), peer_id.to_string());
            pc.on_ice_connection_state_change(Box::new(move |state| {
                let (tx, pid) = (tx.clone(), pid.clone());
                Box::pin(async move {
                    let Some(state) = map_ice_state(state) else {
                        return;
                    };
                    match state {
                        LinkState::Connected => {
                            info!(event = "webrtc_connected", peer_id = %pid, "WebRTC connection established");
                        }
                        LinkState::Failed | LinkState::Disconnected => {
                            warn!(event = "webrtc_lost", peer_id = %pid, ?state, "WebRTC connection lost");
                        }
                        _ => {}
                    }
                    let _ = tx.send(TransportEvent::LinkStateChanged { peer_id: pid, state });
                })
            }));
        }

        {
            let (tx, pid) = (events.clone(), peer_id.to_string());
            pc.on_data_channel(Box::new(move |dc| {
                let (tx, pid) = (tx.clone(), pid.clone());
                Box::pin(async move {
                    debug!(event = "dc_incoming", peer_id = %pid, channel = %dc.label(), "Remote opened a DataChannel");
                    let channel: ChannelRef = WebRtcChannel::attach(dc, &pid, tx.clone());
                    let _ = tx.send(TransportEvent::IncomingChannel { peer_id: pid, channel });
                })
            }));
        }

        Arc::new(Self {
            pc,
            peer_id: peer_id.to_string(),
            events,
            gathered,
        })
    }
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<LinkState> {
    Some(match state {
        RTCIceConnectionState::New => LinkState::New,
        RTCIceConnectionState::Checking => LinkState::Checking,
        RTCIceConnectionState::Connected => LinkState::Connected,
        RTCIceConnectionState::Completed => LinkState::Completed,
        RTCIceConnectionState::Disconnected => LinkState::Disconnected,
        RTCIceConnectionState::Failed => LinkState::Failed,
        RTCIceConnectionState::Closed => LinkState::Closed,
        _ => return None,
    })
}

/// Advertise `a=max-message-size` so the remote side sends us frames larger
/// than the 64 KiB default.
fn inject_max_message_size(mut desc: RTCSessionDescription) -> RTCSessionDescription {
    if !desc.sdp.contains("a=max-message-size:") {
        desc.sdp
            .push_str(&format!("a=max-message-size:{}\r\n", SCTP_MAX_MESSAGE_SIZE));
    }
    desc
}

#[async_trait]
impl Link for WebRtcLink {
    async fn create_channel(&self, label: &str) -> Result<ChannelRef> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self.pc.create_data_channel(label, Some(init)).await?;
        Ok(WebRtcChannel::attach(dc, &self.peer_id, self.events.clone()))
    }

    async fn create_local_descriptor(&self, role: SdpRole) -> Result<()> {
        let desc = match role {
            SdpRole::Offer => self.pc.create_offer(None).await?,
            SdpRole::Answer => self.pc.create_answer(None).await?,
        };
        self.pc.set_local_description(desc).await?;
        Ok(())
    }

    async fn wait_gathering_complete(&self) {
        if self.pc.ice_gathering_state() == RTCIceGatheringState::Complete {
            return;
        }
        let mut rx = self.gathered.clone();
        if rx.wait_for(|done| *done).await.is_err() {
            // Sender gone with the peer connection; never resolve so the
            // caller's timeout decides.
            std::future::pending::<()>().await;
        }
    }

    async fn local_descriptor(&self) -> Result<Value> {
        let desc = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| CoreError::Transport("no local description".into()))?;
        Ok(serde_json::to_value(inject_max_message_size(desc))?)
    }

    async fn apply_remote_descriptor(&self, sdp: Value) -> Result<()> {
        let desc: RTCSessionDescription = serde_json::from_value(sdp)
            .map_err(|e| CoreError::MalformedInput(format!("invalid session description: {e}")))?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| CoreError::MalformedInput(format!("session description rejected: {e}")))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            debug!(event = "peer_connection_close_failure", peer_id = %self.peer_id, error = %e, "Close failed");
        }
    }
}
