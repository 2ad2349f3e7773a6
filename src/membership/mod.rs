pub mod dynamic;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use actix::Addr;

use crate::raft::rpc::Envelope;
use crate::raft::server::{Deliver, RaftServer, Shutdown, Start, Submit};
use crate::raft::types::{Command, CommandListener, ServerId};

pub use dynamic::{DynamicMembership, MEMBERSHIP_COMMAND_ID};

/// A cluster member as seen from one server: an endpoint that accepts
/// decoded messages and client commands, delivered asynchronously.
pub trait Peer: Send + Sync {
    fn id(&self) -> ServerId;

    /// Tells the member to start running. Idempotent.
    fn start(&self);

    /// Tells the member to stop running.
    fn shutdown(&self);

    /// Hands a message to the member. Never blocks; delivery is
    /// best-effort and may be reordered in flight.
    fn invoke(&self, envelope: Envelope);

    /// Hands a client command to the member, optionally tracking the
    /// outcome through a listener.
    fn send(&self, command: Command, listener: Option<CommandListener>);
}

/// The cluster membership as seen from one server.
pub trait Membership: Send + Sync {
    /// Number of members participating in consensus.
    fn count(&self) -> usize;

    /// Looks up a member by identifier.
    fn find(&self, id: ServerId) -> Option<Arc<dyn Peer>>;

    /// Delivers `envelope` to every member except its sender.
    fn broadcast(&self, envelope: Envelope);

    /// A snapshot of the current members.
    fn peers(&self) -> Vec<Arc<dyn Peer>>;
}

/// The [`Peer`] endpoint of a local [`RaftServer`], backed by its actor
/// mailbox. `do_send` enqueues without blocking, so callers hand off
/// messages the way they would to a transport.
pub struct ServerHandle {
    id: ServerId,
    addr: Addr<RaftServer>,
}

impl ServerHandle {
    pub fn new(id: ServerId, addr: Addr<RaftServer>) -> Self {
        Self { id, addr }
    }
}

impl Peer for ServerHandle {
    fn id(&self) -> ServerId {
        self.id
    }

    fn start(&self) {
        self.addr.do_send(Start);
    }

    fn shutdown(&self) {
        self.addr.do_send(Shutdown);
    }

    fn invoke(&self, envelope: Envelope) {
        self.addr.do_send(Deliver(envelope));
    }

    fn send(&self, command: Command, listener: Option<CommandListener>) {
        self.addr.do_send(Submit { command, listener });
    }
}

/// Sentinel for a member known to the cluster but not bound to any
/// endpoint. Messages are dropped; tracked commands fail immediately.
pub struct UnavailablePeer {
    id: ServerId,
}

impl UnavailablePeer {
    pub fn new(id: ServerId) -> Self {
        Self { id }
    }
}

impl Peer for UnavailablePeer {
    fn id(&self) -> ServerId {
        self.id
    }

    fn start(&self) {}

    fn shutdown(&self) {}

    fn invoke(&self, _envelope: Envelope) {}

    fn send(&self, _command: Command, listener: Option<CommandListener>) {
        if let Some(listener) = listener {
            listener.failed();
        }
    }
}

/// A fixed membership known at bootstrap. Peers are registered once while
/// the cluster is assembled and never change afterwards.
#[derive(Default)]
pub struct StaticMembership {
    peers: RwLock<HashMap<ServerId, Arc<dyn Peer>>>,
}

impl StaticMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: Arc<dyn Peer>) {
        self.peers
            .write()
            .expect("membership lock poisoned")
            .insert(peer.id(), peer);
    }
}

impl Membership for StaticMembership {
    fn count(&self) -> usize {
        self.peers.read().expect("membership lock poisoned").len()
    }

    fn find(&self, id: ServerId) -> Option<Arc<dyn Peer>> {
        self.peers
            .read()
            .expect("membership lock poisoned")
            .get(&id)
            .cloned()
    }

    fn broadcast(&self, envelope: Envelope) {
        for peer in self.peers() {
            if peer.id() != envelope.sender_id {
                peer.invoke(envelope.clone());
            }
        }
    }

    fn peers(&self) -> Vec<Arc<dyn Peer>> {
        self.peers
            .read()
            .expect("membership lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}
