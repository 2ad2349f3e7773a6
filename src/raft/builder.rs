use std::path::PathBuf;
use std::sync::Arc;

use actix::{Actor, Addr};

use crate::config::RaftConfig;
use crate::machine::StateMachine;
use crate::membership::{Membership, ServerHandle};
use crate::storage::durable_log::DurableLog;
use crate::storage::log::Log;
use crate::storage::server_state::DurableServerState;
use crate::util::errors::{RaftError, Result};

use super::server::RaftServer;
use super::types::ServerId;

/// Assembles a [`RaftServer`] from its collaborators.
///
/// The log can be supplied directly, or built as a [`DurableLog`] from a
/// log directory and a state machine. `init` creates fresh durable state
/// under the given identifier; without it the builder loads existing state
/// from the state directory.
///
/// Must be called with an actix system running; the server's mailbox
/// starts immediately, but the server itself participates only once its
/// [`Start`](super::server::Start) message arrives.
#[derive(Default)]
pub struct ServerBuilder {
    log: Option<Box<dyn Log>>,
    log_dir: Option<PathBuf>,
    machine: Option<Arc<dyn StateMachine>>,
    membership: Option<Arc<dyn Membership>>,
    state_dir: Option<PathBuf>,
    heartbeat_ms: Option<u64>,
    term_timeout_ms: Option<u64>,
    server_id: Option<ServerId>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(mut self, log: Box<dyn Log>) -> Self {
        self.log = Some(log);
        self
    }

    /// Uses a [`DurableLog`] in `log_dir`, feeding committed commands to
    /// the state machine given via [`with_state_machine`](Self::with_state_machine).
    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    pub fn with_state_machine(mut self, machine: Arc<dyn StateMachine>) -> Self {
        self.machine = Some(machine);
        self
    }

    pub fn with_membership(mut self, membership: Arc<dyn Membership>) -> Self {
        self.membership = Some(membership);
        self
    }

    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(state_dir.into());
        self
    }

    pub fn with_heartbeat_interval(mut self, millis: u64) -> Self {
        self.heartbeat_ms = Some(millis);
        self
    }

    pub fn with_term_timeout(mut self, millis: u64) -> Self {
        self.term_timeout_ms = Some(millis);
        self
    }

    /// Creates fresh durable state for `server_id` instead of loading
    /// existing state from the state directory.
    pub fn init(mut self, server_id: ServerId) -> Self {
        self.server_id = Some(server_id);
        self
    }

    pub fn build(self) -> Result<(Addr<RaftServer>, Arc<ServerHandle>)> {
        let membership = self
            .membership
            .ok_or(RaftError::IncompleteBuilder("a membership handle"))?;
        let state_dir = self
            .state_dir
            .ok_or(RaftError::IncompleteBuilder("a state directory"))?;

        let mut config = RaftConfig::new(state_dir);
        if let Some(heartbeat_ms) = self.heartbeat_ms {
            config.heartbeat_ms = heartbeat_ms;
        }
        config.term_timeout_ms = self.term_timeout_ms;
        config.log_dir = self.log_dir.clone();

        let log: Box<dyn Log> = match (self.log, self.log_dir) {
            (Some(log), _) => log,
            (None, Some(log_dir)) => {
                let machine = self
                    .machine
                    .ok_or(RaftError::IncompleteBuilder("a state machine for the log"))?;
                Box::new(DurableLog::open(&log_dir, machine)?)
            }
            (None, None) => return Err(RaftError::IncompleteBuilder("a log")),
        };

        let durable = DurableServerState::open(&config.state_dir, self.server_id)?;
        let server_id = durable.server_id();
        let server = RaftServer::new(durable, log, membership, &config)?;
        let addr = server.start();
        let handle = Arc::new(ServerHandle::new(server_id, addr.clone()));

        Ok((addr, handle))
    }
}
