use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;

use crate::core::channel::{Channel, ReadyState};
use crate::core::connection::{EventSender, TransportEvent};
use crate::core::error::Result;

pub struct WebRtcChannel {
    dc: Arc<RTCDataChannel>,
    label: String,
}

impl WebRtcChannel {
    /// Wrap `dc` and forward its lifecycle to `events`, tagged with `peer_id`.
    pub fn attach(dc: Arc<RTCDataChannel>, peer_id: &str, events: EventSender) -> Arc<Self> {
        let label = dc.label().to_string();
        // `on_open` may race with a channel that is already open.
        let announced = Arc::new(AtomicBool::new(false));

        {
            let (tx, pid, announced) = (events.clone(), peer_id.to_string(), announced.clone());
            dc.on_open(Box::new(move || {
                Box::pin(async move {
                    announce_open(&tx, &pid, &announced);
                })
            }));
        }

        {
            let (tx, pid, label) = (events.clone(), peer_id.to_string(), label.clone());
            dc.on_close(Box::new(move || {
                let (tx, pid, label) = (tx.clone(), pid.clone(), label.clone());
                Box::pin(async move {
                    debug!(event = "dc_closed", channel = %label, peer_id = %pid, "DataChannel closed");
                    let _ = tx.send(TransportEvent::ChannelClosed { peer_id: pid });
                })
            }));
        }

        {
            let (tx, pid, label) = (events.clone(), peer_id.to_string(), label.clone());
            dc.on_error(Box::new(move |err| {
                let (tx, pid, label) = (tx.clone(), pid.clone(), label.clone());
                Box::pin(async move {
                    warn!(event = "dc_error", channel = %label, peer_id = %pid, %err, "DataChannel transport error");
                    let _ = tx.send(TransportEvent::ChannelError {
                        peer_id: pid,
                        error: err.to_string(),
                    });
                })
            }));
        }

        {
            let (tx, pid) = (events.clone(), peer_id.to_string());
            dc.on_message(Box::new(move |msg: DataChannelMessage| {
                let (tx, pid) = (tx.clone(), pid.clone());
                Box::pin(async move {
                    match String::from_utf8(msg.data.to_vec()) {
                        Ok(data) => {
                            let _ = tx.send(TransportEvent::ChannelMessage { peer_id: pid, data });
                        }
                        Err(_) => {
                            debug!(event = "dc_binary_dropped", peer_id = %pid, bytes = msg.data.len(), "Non UTF-8 frame dropped");
                        }
                    }
                })
            }));
        }

        if dc.ready_state() == RTCDataChannelState::Open {
            announce_open(&events, peer_id, &announced);
        }

        Arc::new(Self { dc, label })
    }
}

fn announce_open(tx: &EventSender, peer_id: &str, announced: &AtomicBool) {
    if !announced.swap(true, Ordering::SeqCst) {
        debug!(event = "dc_open", peer_id = %peer_id, "DataChannel open");
        let _ = tx.send(TransportEvent::ChannelOpen {
            peer_id: peer_id.to_string(),
        });
    }
}

fn map_state(state: RTCDataChannelState) -> ReadyState {
    match state {
        RTCDataChannelState::Open => ReadyState::Open,
        RTCDataChannelState::Closing => ReadyState::Closing,
        RTCDataChannelState::Closed => ReadyState::Closed,
        _ => ReadyState::Connecting,
    }
}

#[async_trait]
impl Channel for WebRtcChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> ReadyState {
        map_state(self.dc.ready_state())
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.dc.send_text(text.to_string()).await?;
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        self.dc.buffered_amount().await
    }

    async fn close(&self) {
        if let Err(e) = self.dc.close().await {
            debug!(event = "dc_close_failure", channel = %self.label, error = %e, "DataChannel close failed");
        }
    }
}
