use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::machine::StateMachine;
use crate::raft::rpc::Envelope;
use crate::raft::types::{Command, ServerId};

use super::{Membership, Peer, UnavailablePeer};

/// Stable identifier for the commands consumed by [`DynamicMembership`].
pub const MEMBERSHIP_COMMAND_ID: &str = "membership";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum MembershipAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MembershipChange {
    action: MembershipAction,
    server_id: ServerId,
}

/// Membership driven through the replicated log.
///
/// This view is both a [`Membership`] and a [`StateMachine`]: add/remove
/// commands committed through the log mutate the member set, so every
/// server converges on the same membership in the same order.
///
/// Member state changes independently of endpoint registration. A member
/// added by command stays in the membership until removed by command; while
/// no endpoint instance is registered for it, lookups yield an unavailable
/// sentinel. Registered instances that are not yet committed into the
/// membership are held pending and served only by direct lookup, since a
/// joining server talks to the leader before the local log has replayed
/// its admission. A pending instance is started exactly once, when its
/// admission commits.
#[derive(Default)]
pub struct DynamicMembership {
    /// Members applied through the replicated log
    committed: RwLock<HashMap<ServerId, Arc<dyn Peer>>>,
    /// Registered endpoint instances not yet in the membership
    pending: Mutex<HashMap<ServerId, Arc<dyn Peer>>>,
}

impl DynamicMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the command admitting `server_id` to the membership.
    pub fn add_command(server_id: ServerId) -> Command {
        Self::change_command(MembershipAction::Add, server_id)
    }

    /// Builds the command removing `server_id` from the membership.
    pub fn remove_command(server_id: ServerId) -> Command {
        Self::change_command(MembershipAction::Remove, server_id)
    }

    fn change_command(action: MembershipAction, server_id: ServerId) -> Command {
        let change = MembershipChange { action, server_id };
        let payload = bincode::serialize(&change).expect("membership change serializes");
        Command::new(MEMBERSHIP_COMMAND_ID, payload)
    }

    /// Registers the endpoint instance for a server identifier. If the
    /// server is already a member the instance replaces the current one and
    /// is started; otherwise it is held pending until a matching add
    /// command commits.
    pub fn register(&self, peer: Arc<dyn Peer>) {
        let id = peer.id();
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        let mut committed = self.committed.write().expect("membership lock poisoned");
        if committed.contains_key(&id) {
            committed.insert(id, peer.clone());
            drop(committed);
            drop(pending);
            peer.start();
        } else {
            pending.insert(id, peer);
        }
    }

    /// Drops any endpoint instance registered for `server_id`. The
    /// committed membership is unchanged: a still-admitted member is
    /// demoted to the unavailable sentinel.
    pub fn deregister(&self, server_id: ServerId) {
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        if pending.remove(&server_id).is_some() {
            return;
        }
        drop(pending);

        let mut committed = self.committed.write().expect("membership lock poisoned");
        if committed.contains_key(&server_id) {
            committed.insert(server_id, Arc::new(UnavailablePeer::new(server_id)));
        }
    }
}

impl Membership for DynamicMembership {
    fn count(&self) -> usize {
        self.committed
            .read()
            .expect("membership lock poisoned")
            .len()
    }

    fn find(&self, id: ServerId) -> Option<Arc<dyn Peer>> {
        if let Some(peer) = self
            .committed
            .read()
            .expect("membership lock poisoned")
            .get(&id)
        {
            return Some(peer.clone());
        }

        self.pending
            .lock()
            .expect("pending lock poisoned")
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
        self.committed
            .read()
            .expect("membership lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

impl StateMachine for DynamicMembership {
    fn apply(&self, command: &Command) {
        if command.identifier() != MEMBERSHIP_COMMAND_ID {
            panic!("unknown command routed to membership: '{}'", command.identifier());
        }
        let change: MembershipChange =
            bincode::deserialize(command.payload()).expect("malformed membership command");

        match change.action {
            MembershipAction::Add => {
                let mut pending = self.pending.lock().expect("pending lock poisoned");
                let mut committed = self.committed.write().expect("membership lock poisoned");
                if committed.contains_key(&change.server_id) {
                    // replayed admission for an existing member
                    pending.remove(&change.server_id);
                    return;
                }

                let peer = pending
                    .remove(&change.server_id)
                    .unwrap_or_else(|| Arc::new(UnavailablePeer::new(change.server_id)));
                committed.insert(change.server_id, peer.clone());
                drop(committed);
                drop(pending);

                tracing::info!("server {} admitted to the membership", change.server_id);
                peer.start();
            }
            MembershipAction::Remove => {
                self.committed
                    .write()
                    .expect("membership lock poisoned")
                    .remove(&change.server_id);
                tracing::info!("server {} removed from the membership", change.server_id);
            }
        }
    }
}
