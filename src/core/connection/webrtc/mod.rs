//! WebRTC transport built on `webrtc-rs`.
//!
//! Each [`WebRtcLink`] wraps one `RTCPeerConnection`; each
//! [`WebRtcChannel`] wraps one ordered, reliable `RTCDataChannel`. All
//! callbacks registered on them only forward [`TransportEvent`]s, so no
//! state lives inside the transport besides the handles themselves.
//!
//! [`TransportEvent`]: crate::core::connection::TransportEvent

mod channel;
mod link;

pub use channel::WebRtcChannel;
pub use link::WebRtcLink;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::{SctpMaxMessageSize, SettingEngine};
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;

use crate::core::config::SCTP_MAX_MESSAGE_SIZE;
use crate::core::connection::{EventSender, LinkRef, Transport};
use crate::core::error::{CoreError, Result};

impl From<webrtc::Error> for CoreError {
    fn from(e: webrtc::Error) -> Self {
        CoreError::Transport(e.to_string())
    }
}

pub struct WebRtcTransport {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcTransport {
    pub fn new(stun_urls: &[String]) -> Result<Self> {
        let mut me = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut me)?;

        // Chunk frames are JSON arrays of byte values, several times larger
        // than the raw chunk; lift the default 64 KiB send cap.
        let mut se = SettingEngine::default();
        se.set_sctp_max_message_size_can_send(SctpMaxMessageSize::Bounded(SCTP_MAX_MESSAGE_SIZE));

        let api = APIBuilder::new()
            .with_setting_engine(se)
            .with_media_engine(me)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            ice_servers: ice_servers(stun_urls),
        })
    }
}

fn ice_servers(stun_urls: &[String]) -> Vec<RTCIceServer> {
    stun_urls
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .collect()
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn open_link(&self, peer_id: &str, events: EventSender) -> Result<LinkRef> {
        let pc = self
            .api
            .new_peer_connection(RTCConfiguration {
                ice_servers: self.ice_servers.clone(),
                ..Default::default()
            })
            .await?;
        debug!(event = "peer_connection_created", peer_id = %peer_id, "RTCPeerConnection created");
        Ok(WebRtcLink::new(Arc::new(pc), peer_id, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_ice_server_per_url() {
        let servers = ice_servers(&["stun:a:1".into(), "stun:b:2".into()]);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].urls, vec!["stun:b:2".to_string()]);
        assert!(servers[0].username.is_empty());
    }

    #[test]
    fn webrtc_errors_are_transport_errors() {
        let err: CoreError = webrtc::Error::ErrConnectionClosed.into();
        assert!(matches!(err, CoreError::Transport(_)));
    }
}
