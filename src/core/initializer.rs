//! Node wiring: the [`PeerNode`] handle used by front ends and the
//! [`Dispatcher`] task that consumes every transport event.
//!
//! The dispatcher is the only task touching incoming transfer state. User
//! actions that need that state are sent to it as [`NodeCommand`]s.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::channel::{ChannelRef, ReadyState};
use crate::core::config::TRANSFER_SWEEP_INTERVAL;
use crate::core::connection::{EventReceiver, Transport, TransportEvent};
use crate::core::error::{CoreError, Result};
use crate::core::identity::{LocalIdentity, SharedIdentity};
use crate::core::peer_registry::{PeerRegistry, PeerSummary, RemoteIdentity, SharedRegistry};
use crate::core::pipeline::receiver::CompletedFile;
use crate::core::protocol::inbound::Inbound;
use crate::core::protocol::message::TextMessage;
use crate::core::protocol::outbound::{OutgoingFile, Outbound};
use crate::core::signaling::{LinkOutcome, SignalingCoordinator};
use crate::utils::sos::SignalOfStop;

/// One line of chat, local or remote.
#[derive(Debug, Clone)]
pub struct ChatLine {
    /// Local peer id of the connection it arrived on; `None` for our own.
    pub peer_id: Option<String>,
    pub user_id: String,
    pub nickname: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub own: bool,
}

impl ChatLine {
    pub fn own(msg: TextMessage) -> Self {
        Self::from_message(None, msg, true)
    }

    pub fn remote(peer_id: &str, msg: TextMessage) -> Self {
        Self::from_message(Some(peer_id.to_string()), msg, false)
    }

    fn from_message(peer_id: Option<String>, msg: TextMessage, own: bool) -> Self {
        Self {
            peer_id,
            user_id: msg.user_id,
            nickname: msg.nickname,
            content: msg.content,
            timestamp: msg.timestamp,
            own,
        }
    }
}

/// Events sent from the node to the front end.
#[derive(Debug, Clone)]
pub enum AppEvent {
    Chat(ChatLine),
    PeerConnected { peer_id: String, remote: Option<RemoteIdentity> },
    PeerDisconnected { peer_id: String, remote: Option<RemoteIdentity> },
    ChannelOpened { peer_id: String },
    ChannelClosed { peer_id: String },
    /// Number of peers with an open channel changed (or may have).
    Connectivity { open_peers: usize },
    FileIncoming { peer_id: String, transfer_id: String, file_name: String, file_size: u64, nickname: String },
    FileProgress { peer_id: String, transfer_id: String, received: u32, total: u32 },
    FileReceived(CompletedFile),
    SendStarted { transfer_id: String, file_name: String, file_size: u64, peers: usize },
    SendProgress { transfer_id: String, sent: u32, total: u32 },
    SendComplete { transfer_id: String, file_name: String, delivered: usize },
    RecipientDeclined { peer_id: String, transfer_id: String, file_name: String },
    TransferCancelled { transfer_id: String, file_name: String, reason: String },
    TransferFailed { transfer_id: String, reason: String },
}

/// Which side of a transfer a cancel request hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cancelled {
    Outgoing,
    Incoming { file_name: String },
}

pub enum NodeCommand {
    CancelIncoming {
        id: String,
        reply: oneshot::Sender<Option<String>>,
    },
}

#[derive(Clone)]
pub struct PeerNode {
    coordinator: Arc<SignalingCoordinator>,
    outbound: Outbound,
    registry: SharedRegistry,
    identity: SharedIdentity,
    commands: mpsc::UnboundedSender<NodeCommand>,
}

impl PeerNode {
    /// Build the node and its dispatcher. The dispatcher must be driven with
    /// [`Dispatcher::run`] for anything to happen.
    pub fn new(
        transport: Arc<dyn Transport>,
        identity: LocalIdentity,
        sos: SignalOfStop,
        app_tx: mpsc::UnboundedSender<AppEvent>,
    ) -> (Self, Dispatcher) {
        let registry = PeerRegistry::shared();
        let identity = identity.shared();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let coordinator = Arc::new(SignalingCoordinator::new(
            transport,
            registry.clone(),
            events_tx,
            identity.clone(),
        ));
        let outbound = Outbound::new(registry.clone(), identity.clone(), app_tx.clone());

        let dispatcher = Dispatcher {
            sos,
            coordinator: coordinator.clone(),
            registry: registry.clone(),
            inbound: Inbound::new(outbound.clone(), app_tx.clone()),
            events: events_rx,
            commands: cmd_rx,
            app_tx,
        };

        (
            Self {
                coordinator,
                outbound,
                registry,
                identity,
                commands: cmd_tx,
            },
            dispatcher,
        )
    }

    /// Create an offer and return it as pretty JSON for the user to share.
    pub async fn create_offer(&self) -> Result<String> {
        self.coordinator.create_offer().await?.to_pretty_json()
    }

    /// Answer a pasted offer; returns the answer as pretty JSON.
    pub async fn accept_offer(&self, text: &str) -> Result<String> {
        self.coordinator.accept_offer(text).await?.to_pretty_json()
    }

    pub async fn complete_with_answer(&self, text: &str) -> Result<String> {
        self.coordinator.complete_with_answer(text).await
    }

    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.outbound.send_text(text).await.map(|_| ())
    }

    /// Start sending a file from disk. Returns the transfer id.
    pub async fn send_file(&self, path: &Path) -> Result<String> {
        let file = OutgoingFile::from_path(path).await?;
        Ok(self.outbound.start_file(file).await?.0)
    }

    /// Cancel a transfer in either direction by id or id prefix.
    pub async fn cancel(&self, id: &str) -> Result<Option<Cancelled>> {
        if self.outbound.cancel_outgoing(id).await {
            return Ok(Some(Cancelled::Outgoing));
        }
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(NodeCommand::CancelIncoming {
                id: id.to_string(),
                reply,
            })
            .map_err(|_| CoreError::Transport("node is shut down".into()))?;
        let file_name = rx
            .await
            .map_err(|_| CoreError::Transport("node is shut down".into()))?;
        Ok(file_name.map(|file_name| Cancelled::Incoming { file_name }))
    }

    pub async fn peers(&self) -> Vec<PeerSummary> {
        self.registry.read().await.snapshot()
    }

    pub async fn open_count(&self) -> usize {
        self.registry.read().await.open_count()
    }

    pub async fn active_sends(&self) -> Vec<(String, String)> {
        self.outbound.active_sends().await
    }

    pub async fn identity(&self) -> LocalIdentity {
        self.identity.read().await.clone()
    }

    pub async fn set_nickname(&self, nickname: &str) -> String {
        let mut id = self.identity.write().await;
        id.set_nickname(nickname);
        id.nickname()
    }

    /// Stop outgoing sends and close every connection.
    pub async fn shutdown(&self) {
        self.outbound.cancel_all().await;
        self.coordinator.close_all().await;
    }
}

pub struct Dispatcher {
    sos: SignalOfStop,
    coordinator: Arc<SignalingCoordinator>,
    registry: SharedRegistry,
    inbound: Inbound,
    events: EventReceiver,
    commands: mpsc::UnboundedReceiver<NodeCommand>,
    app_tx: mpsc::UnboundedSender<AppEvent>,
}

impl Dispatcher {
    fn notify(&self, event: AppEvent) {
        let _ = self.app_tx.send(event);
    }

    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(TRANSFER_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(event = "dispatcher_started", "Node dispatcher running");

        loop {
            tokio::select! {
                _ = self.sos.wait() => break,
                Some(event) = self.events.recv() => self.on_transport(event).await,
                Some(cmd) = self.commands.recv() => self.on_command(cmd).await,
                _ = sweep.tick() => {
                    self.inbound.sweep(Instant::now());
                }
            }
        }

        info!(event = "dispatcher_stopped", "Node dispatcher stopped");
    }

    async fn on_command(&mut self, cmd: NodeCommand) {
        match cmd {
            NodeCommand::CancelIncoming { id, reply } => {
                let _ = reply.send(self.inbound.cancel_incoming(&id).await);
            }
        }
    }

    async fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ChannelMessage { peer_id, data } => {
                self.inbound.handle(&peer_id, &data).await;
            }
            TransportEvent::ChannelOpen { peer_id } => {
                info!(event = "channel_open", peer_id = %peer_id, "Chat channel open");
                self.notify(AppEvent::ChannelOpened { peer_id });
                self.connectivity().await;
            }
            TransportEvent::ChannelClosed { peer_id } => {
                let detached = self.registry.write().await.detach_channel(&peer_id);
                if detached.is_some() {
                    info!(event = "channel_closed", peer_id = %peer_id, "Chat channel closed");
                    self.inbound.drop_peer(&peer_id).await;
                    self.notify(AppEvent::ChannelClosed { peer_id });
                    self.connectivity().await;
                }
            }
            TransportEvent::ChannelError { peer_id, error } => {
                warn!(event = "channel_error", peer_id = %peer_id, error = %error, "Chat channel error");
            }
            TransportEvent::IncomingChannel { peer_id, channel } => {
                self.attach_incoming(peer_id, channel).await;
            }
            TransportEvent::LinkStateChanged { peer_id, state } => {
                match self.coordinator.handle_link_state(&peer_id, state).await {
                    LinkOutcome::Connected { remote } => {
                        self.notify(AppEvent::PeerConnected { peer_id, remote });
                    }
                    LinkOutcome::Lost { remote } => {
                        self.inbound.drop_peer(&peer_id).await;
                        self.notify(AppEvent::PeerDisconnected { peer_id, remote });
                        self.connectivity().await;
                    }
                    LinkOutcome::Ignored => {}
                }
            }
        }
    }

    async fn attach_incoming(&mut self, peer_id: String, channel: ChannelRef) {
        let attached = self
            .registry
            .write()
            .await
            .attach_channel(&peer_id, channel.clone());
        if !attached {
            debug!(event = "incoming_channel_orphan", peer_id = %peer_id, "Channel for unknown peer, closing");
            channel.close().await;
            return;
        }
        debug!(event = "incoming_channel_attached", peer_id = %peer_id, label = %channel.label(), "Incoming channel attached");
        if channel.ready_state() == ReadyState::Open {
            self.connectivity().await;
        }
    }

    async fn connectivity(&self) {
        let open_peers = self.registry.read().await.open_count();
        self.notify(AppEvent::Connectivity { open_peers });
    }
}
