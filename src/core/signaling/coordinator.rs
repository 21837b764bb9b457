//! Drives connections through the descriptor exchange.
//!
//! There is no back-channel: the offer leaves as pasted text and the answer
//! may arrive much later, or never. Every operation either finishes with a
//! descriptor for the user to copy, or leaves the registry exactly as it
//! was before the call.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::config::{CHAT_CHANNEL_LABEL, ICE_GATHER_TIMEOUT};
use crate::core::connection::{EventSender, LinkRef, LinkState, SdpRole, Transport};
use crate::core::error::{CoreError, Result};
use crate::core::identity::SharedIdentity;
use crate::core::peer_registry::{PeerEntry, RemoteIdentity, SharedRegistry};
use crate::core::signaling::descriptor::Descriptor;
use crate::core::signaling::state::SignalingState;

/// What a link state change meant for the registry.
#[derive(Debug, PartialEq)]
pub enum LinkOutcome {
    Connected { remote: Option<RemoteIdentity> },
    /// The entry was removed and its channel and link closed.
    Lost { remote: Option<RemoteIdentity> },
    Ignored,
}

pub struct SignalingCoordinator {
    transport: Arc<dyn Transport>,
    registry: SharedRegistry,
    events: EventSender,
    identity: SharedIdentity,
    gather_timeout: Duration,
}

impl SignalingCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: SharedRegistry,
        events: EventSender,
        identity: SharedIdentity,
    ) -> Self {
        Self {
            transport,
            registry,
            events,
            identity,
            gather_timeout: ICE_GATHER_TIMEOUT,
        }
    }

    /// Start a connection as the offering side and return the offer to paste.
    pub async fn create_offer(&self) -> Result<Descriptor> {
        let peer_id = Uuid::new_v4().to_string();
        let link = self
            .register(&peer_id, peer_id.clone(), SignalingState::Idle, None)
            .await?;

        match self.build_offer(&peer_id, &link).await {
            Ok(descriptor) => {
                info!(event = "offer_created", peer_id = %peer_id, "Offer ready to share");
                Ok(descriptor)
            }
            Err(e) => {
                warn!(event = "offer_failed", peer_id = %peer_id, error = %e, "Offer creation failed");
                self.abandon(&peer_id).await;
                Err(e)
            }
        }
    }

    async fn build_offer(&self, peer_id: &str, link: &LinkRef) -> Result<Descriptor> {
        self.advance(peer_id, SignalingState::LocalDescriptorPending).await;

        let channel = link.create_channel(CHAT_CHANNEL_LABEL).await?;
        self.registry.write().await.attach_channel(peer_id, channel);

        link.create_local_descriptor(SdpRole::Offer).await?;
        let sdp = self.gathered_descriptor(peer_id, link).await?;

        self.advance(peer_id, SignalingState::HaveLocalOffer).await;
        self.descriptor(SdpRole::Offer, sdp, Some(peer_id.to_string()))
            .await
    }

    /// Answer a pasted offer and return the answer to paste back.
    pub async fn accept_offer(&self, text: &str) -> Result<Descriptor> {
        let offer = Descriptor::parse(text, SdpRole::Offer)?;

        let peer_id = Uuid::new_v4().to_string();
        let connection_id = offer
            .connection_id
            .clone()
            .unwrap_or_else(|| peer_id.clone());
        let remote = RemoteIdentity {
            user_id: offer.user_id.clone(),
            nickname: offer.nickname.clone(),
        };
        let link = self
            .register(&peer_id, connection_id, SignalingState::Idle, Some(remote))
            .await?;

        match self.build_answer(&peer_id, &link, offer).await {
            Ok(descriptor) => {
                info!(event = "answer_created", peer_id = %peer_id, "Answer ready to share");
                Ok(descriptor)
            }
            Err(e) => {
                warn!(event = "answer_failed", peer_id = %peer_id, error = %e, "Answer creation failed");
                self.abandon(&peer_id).await;
                Err(e)
            }
        }
    }

    async fn build_answer(
        &self,
        peer_id: &str,
        link: &LinkRef,
        offer: Descriptor,
    ) -> Result<Descriptor> {
        link.apply_remote_descriptor(offer.sdp).await?;
        self.advance(peer_id, SignalingState::RemoteDescriptorApplied)
            .await;

        self.advance(peer_id, SignalingState::LocalDescriptorPending)
            .await;
        link.create_local_descriptor(SdpRole::Answer).await?;
        let sdp = self.gathered_descriptor(peer_id, link).await?;

        self.advance(peer_id, SignalingState::HaveLocalAnswer).await;
        self.descriptor(SdpRole::Answer, sdp, offer.connection_id)
            .await
    }

    /// Apply a pasted answer to the pending offer it belongs to. Returns the
    /// local peer id of that connection.
    ///
    /// An answer naming a `connectionId` only matches that connection; an
    /// answer without one goes to the oldest pending offer.
    pub async fn complete_with_answer(&self, text: &str) -> Result<String> {
        let answer = Descriptor::parse(text, SdpRole::Answer)?;

        let (peer_id, link) = {
            let reg = self.registry.read().await;
            let entry = match &answer.connection_id {
                Some(cid) => reg.find_by_connection_id(cid),
                None => reg.first_in_state(SignalingState::HaveLocalOffer),
            };
            entry
                .filter(|e| e.signaling == SignalingState::HaveLocalOffer)
                .map(|e| (e.peer_id.clone(), e.link.clone()))
                .ok_or(CoreError::NoPendingOffer)?
        };

        // A rejected answer leaves the offer pending so another can be pasted.
        link.apply_remote_descriptor(answer.sdp).await?;

        let mut reg = self.registry.write().await;
        reg.set_signaling(&peer_id, SignalingState::RemoteDescriptorApplied);
        reg.set_remote(
            &peer_id,
            RemoteIdentity {
                user_id: answer.user_id,
                nickname: answer.nickname,
            },
        );
        info!(event = "answer_applied", peer_id = %peer_id, "Answer applied, waiting for link");
        Ok(peer_id)
    }

    /// React to a connectivity change reported by the transport.
    pub async fn handle_link_state(&self, peer_id: &str, state: LinkState) -> LinkOutcome {
        if state.is_up() {
            let mut reg = self.registry.write().await;
            if !reg.set_signaling(peer_id, SignalingState::Connected) {
                return LinkOutcome::Ignored;
            }
            info!(event = "peer_link_up", peer_id = %peer_id, state = ?state, "Peer link connected");
            let remote = reg.get(peer_id).and_then(|e| e.remote.clone());
            return LinkOutcome::Connected { remote };
        }

        if state.is_lost() {
            let Some(entry) = self.take(peer_id, SignalingState::Failed).await else {
                return LinkOutcome::Ignored;
            };
            info!(event = "peer_link_lost", peer_id = %peer_id, state = ?state, "Peer link lost");
            let remote = entry.remote.clone();
            close_entry(entry).await;
            return LinkOutcome::Lost { remote };
        }

        debug!(event = "peer_link_state", peer_id = %peer_id, state = ?state, "Link state changed");
        LinkOutcome::Ignored
    }

    /// Close every connection, for shutdown.
    pub async fn close_all(&self) {
        let entries = self.registry.write().await.drain();
        for entry in entries {
            close_entry(entry).await;
        }
    }

    async fn register(
        &self,
        peer_id: &str,
        connection_id: String,
        signaling: SignalingState,
        remote: Option<RemoteIdentity>,
    ) -> Result<LinkRef> {
        let link = self
            .transport
            .open_link(peer_id, self.events.clone())
            .await?;
        self.registry.write().await.insert(PeerEntry {
            peer_id: peer_id.to_string(),
            link: link.clone(),
            channel: None,
            signaling,
            connection_id,
            remote,
        });
        Ok(link)
    }

    async fn advance(&self, peer_id: &str, state: SignalingState) {
        if !self.registry.write().await.set_signaling(peer_id, state) {
            debug!(event = "signaling_transition_skipped", peer_id = %peer_id, state = %state, "Transition not applied");
        }
    }

    /// Wait for gathering, bounded by the gather timeout, then read the
    /// local descriptor with whatever candidates were found.
    async fn gathered_descriptor(&self, peer_id: &str, link: &LinkRef) -> Result<Value> {
        if tokio::time::timeout(self.gather_timeout, link.wait_gathering_complete())
            .await
            .is_err()
        {
            warn!(
                event = "ice_gather_timeout",
                peer_id = %peer_id,
                timeout_secs = self.gather_timeout.as_secs(),
                "ICE gathering timed out, using partial candidates"
            );
        }
        link.local_descriptor().await
    }

    async fn descriptor(
        &self,
        kind: SdpRole,
        sdp: Value,
        connection_id: Option<String>,
    ) -> Result<Descriptor> {
        let identity = self.identity.read().await;
        Ok(Descriptor {
            kind,
            sdp,
            user_id: identity.user_id.clone(),
            nickname: identity.nickname(),
            connection_id,
        })
    }

    async fn take(&self, peer_id: &str, state: SignalingState) -> Option<PeerEntry> {
        let mut reg = self.registry.write().await;
        reg.set_signaling(peer_id, state);
        reg.remove(peer_id)
    }

    async fn abandon(&self, peer_id: &str) {
        if let Some(entry) = self.take(peer_id, SignalingState::Failed).await {
            close_entry(entry).await;
        }
    }
}

async fn close_entry(entry: PeerEntry) {
    if let Some(channel) = &entry.channel {
        channel.close().await;
    }
    entry.link.close().await;
}
