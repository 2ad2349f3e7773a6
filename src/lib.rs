//! A Raft-style replicated consensus core.
//!
//! Each server runs the follower/candidate/leader state machine over a
//! replicated log, communicating with its peers by message passing through
//! an abstract [`membership::Peer`] seam. Committed commands are handed to
//! user state machines registered with a [`machine::MachineRouter`].
//!
//! The wire transport, cluster bootstrap and the state machines themselves
//! live outside this crate; tests drive whole clusters in-process through
//! [`transport::ProxyPeer`] links that can be cut to simulate partitions.

pub mod config;
pub mod machine;
pub mod membership;
pub mod raft;
pub mod storage;
pub mod transport;
pub mod util;

pub use config::RaftConfig;
pub use machine::{MachineRouter, StateMachine};
pub use membership::{
    DynamicMembership, Membership, Peer, ServerHandle, StaticMembership, UnavailablePeer,
    MEMBERSHIP_COMMAND_ID,
};
pub use raft::{
    Command, CommandListener, CommandOutcome, CommandWaiter, Envelope, RaftMessage, RaftServer,
    Role, ServerBuilder, StatusInfo,
};
pub use storage::{DurableLog, DurableServerState, Log, MemoryLog};
pub use transport::ProxyPeer;
pub use util::errors::{RaftError, Result};
