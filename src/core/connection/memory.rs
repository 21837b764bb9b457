//! Scriptable in-memory transport used by the test suites.

use super::{EventSender, Link, LinkRef, LinkState, SdpRole, Transport, TransportEvent};
use crate::core::channel::{Channel, ChannelRef};
use crate::core::channel::memory::MemoryChannel;
use crate::core::error::{CoreError, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct MemoryTransport {
    pub fail_open: AtomicBool,
    pub fail_descriptor: AtomicBool,
    pub gathering_hangs: AtomicBool,
    links: Mutex<Vec<Arc<MemoryLink>>>,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn links(&self) -> Vec<Arc<MemoryLink>> {
        self.links.lock().unwrap().clone()
    }

    pub fn link(&self, peer_id: &str) -> Option<Arc<MemoryLink>> {
        self.links().into_iter().find(|l| l.peer_id == peer_id)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open_link(&self, peer_id: &str, events: EventSender) -> Result<LinkRef> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(CoreError::Transport("peer connection refused".into()));
        }
        let link = Arc::new(MemoryLink {
            peer_id: peer_id.to_string(),
            events,
            fail_descriptor: self.fail_descriptor.load(Ordering::SeqCst),
            gathering_hangs: self.gathering_hangs.load(Ordering::SeqCst),
            gathered: AtomicBool::new(false),
            local_role: Mutex::new(None),
            remote: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.links.lock().unwrap().push(link.clone());
        Ok(link)
    }
}

pub struct MemoryLink {
    pub peer_id: String,
    events: EventSender,
    fail_descriptor: bool,
    gathering_hangs: bool,
    gathered: AtomicBool,
    local_role: Mutex<Option<SdpRole>>,
    remote: Mutex<Vec<Value>>,
    channels: Mutex<Vec<Arc<MemoryChannel>>>,
    pub closed: AtomicBool,
}

impl MemoryLink {
    pub fn applied_remote(&self) -> Vec<Value> {
        self.remote.lock().unwrap().clone()
    }

    pub fn channels(&self) -> Vec<Arc<MemoryChannel>> {
        self.channels.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Report a link state change, as the transport would.
    pub fn set_state(&self, state: LinkState) {
        let _ = self.events.send(TransportEvent::LinkStateChanged {
            peer_id: self.peer_id.clone(),
            state,
        });
    }

    /// Finish the connection between an offering and an answering link:
    /// the answerer receives the offerer's channel as an incoming channel,
    /// both channels open and both links report `Connected`.
    pub fn connect_links(offerer: &MemoryLink, answerer: &MemoryLink) -> Arc<MemoryChannel> {
        let ours = offerer.channels().into_iter().next().unwrap();
        let theirs = MemoryChannel::new(ours.label(), &answerer.peer_id, Some(answerer.events.clone()));
        MemoryChannel::connect(&ours, &theirs);
        let _ = answerer.events.send(TransportEvent::IncomingChannel {
            peer_id: answerer.peer_id.clone(),
            channel: theirs.clone(),
        });
        answerer.channels.lock().unwrap().push(theirs.clone());
        ours.open();
        theirs.open();
        offerer.set_state(LinkState::Connected);
        answerer.set_state(LinkState::Connected);
        theirs
    }
}

#[async_trait]
impl Link for MemoryLink {
    async fn create_channel(&self, label: &str) -> Result<ChannelRef> {
        let ch = MemoryChannel::new(label, &self.peer_id, Some(self.events.clone()));
        self.channels.lock().unwrap().push(ch.clone());
        Ok(ch)
    }

    async fn create_local_descriptor(&self, role: SdpRole) -> Result<()> {
        if self.fail_descriptor {
            return Err(CoreError::Transport(format!("cannot create {role}")));
        }
        *self.local_role.lock().unwrap() = Some(role);
        Ok(())
    }

    async fn wait_gathering_complete(&self) {
        if self.gathering_hangs {
            std::future::pending::<()>().await;
        }
        self.gathered.store(true, Ordering::SeqCst);
    }

    async fn local_descriptor(&self) -> Result<Value> {
        let role = self
            .local_role
            .lock()
            .unwrap()
            .ok_or_else(|| CoreError::Transport("no local description".into()))?;
        Ok(json!({
            "type": role,
            "sdp": format!("v=0 memory {}", self.peer_id),
            "complete": self.gathered.load(Ordering::SeqCst),
        }))
    }

    async fn apply_remote_descriptor(&self, sdp: Value) -> Result<()> {
        if sdp.get("sdp").and_then(Value::as_str).is_none() {
            return Err(CoreError::MalformedInput(
                "not a session description".into(),
            ));
        }
        self.remote.lock().unwrap().push(sdp);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
