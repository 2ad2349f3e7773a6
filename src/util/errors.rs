use std::io;

use thiserror::Error;

use crate::raft::types::{LogIndex, ServerId, Term};

/// Errors surfaced by the consensus core.
///
/// Transient protocol rejections (stale terms, refused votes, append
/// mismatches) are not errors; they travel inside response messages and the
/// sender retries on its own cadence. Everything here is either a local
/// fault (I/O, encoding, configuration) or a safety violation.
#[derive(Debug, Error)]
pub enum RaftError {
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    #[error("encoding failure: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("no durable state found and no server identifier supplied")]
    MissingIdentity,

    #[error("durable state belongs to server {stored}, not {supplied}")]
    IdentityMismatch { stored: ServerId, supplied: ServerId },

    #[error("unsupported state file version {0}")]
    InvalidStateVersion(u64),

    #[error("unsupported log file version {0}")]
    InvalidLogVersion(u64),

    #[error("append term {term} precedes last log term {last_term}")]
    StaleTerm { term: Term, last_term: Term },

    #[error("log index {0} out of range")]
    IndexOutOfRange(LogIndex),

    /// Truncation was requested at or below the commit index. A committed
    /// entry can never be rewritten; observing this means the cluster has
    /// already violated its safety guarantees and the server must stop.
    #[error("log diverged at index {index}, at or below commit index {commit_index}")]
    DivergedPastCommit {
        index: LogIndex,
        commit_index: LogIndex,
    },

    #[error("command of {0} bytes exceeds the log record limit")]
    CommandTooLarge(usize),

    #[error("frame of {0} bytes exceeds the wire limit")]
    FrameTooLarge(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("server builder is missing {0}")]
    IncompleteBuilder(&'static str),
}

pub type Result<T> = std::result::Result<T, RaftError>;
