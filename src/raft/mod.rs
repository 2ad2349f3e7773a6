pub(crate) mod append;
pub mod builder;
pub(crate) mod election;
pub mod rpc;
pub mod server;
pub mod state;
pub mod tracker;
pub mod types;

pub use builder::ServerBuilder;
pub use rpc::{Envelope, RaftMessage, NO_INDEX};
pub use server::{Deliver, RaftServer, Shutdown, Start, Status, StatusInfo, Submit};
pub use state::Role;
pub use tracker::MajorityTracker;
pub use types::{
    Command, CommandListener, CommandOutcome, CommandWaiter, LogEntry, LogIndex, RequestId,
    ServerId, Term,
};
