use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::membership::Peer;
use crate::raft::rpc::Envelope;
use crate::raft::types::{Command, CommandListener, ServerId};

/// A [`Peer`] wrapper whose link can be cut.
///
/// While disconnected, incoming messages and commands are silently
/// dropped, the way a partitioned network drops them; a tracked command's
/// listener is dropped with it, resolving its waiter as failed. Delivery
/// through the wrapped endpoint is already an asynchronous hand-off, so
/// callers never block here either way.
pub struct ProxyPeer {
    inner: Arc<dyn Peer>,
    connected: AtomicBool,
}

impl ProxyPeer {
    pub fn new(inner: Arc<dyn Peer>) -> Self {
        Self {
            inner,
            connected: AtomicBool::new(true),
        }
    }

    /// Cuts the link: traffic to the wrapped endpoint vanishes.
    pub fn disconnect(&self) {
        tracing::info!("server {} disconnected", self.inner.id());
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Restores the link.
    pub fn reconnect(&self) {
        tracing::info!("server {} reconnected", self.inner.id());
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Peer for ProxyPeer {
    fn id(&self) -> ServerId {
        self.inner.id()
    }

    fn start(&self) {
        self.inner.start();
    }

    fn shutdown(&self) {
        self.inner.shutdown();
    }

    fn invoke(&self, envelope: Envelope) {
        if self.is_connected() {
            self.inner.invoke(envelope);
        }
    }

    fn send(&self, command: Command, listener: Option<CommandListener>) {
        if self.is_connected() {
            self.inner.send(command, listener);
        }
    }
}
