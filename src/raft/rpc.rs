use serde::{Deserialize, Serialize};

use super::types::{Command, LogIndex, RequestId, ServerId, Term};

/// Index value carried by a rejecting [`AppendResponse`] when the follower
/// has no resync hint to offer.
pub const NO_INDEX: LogIndex = 0;

/// RequestVote RPC - invoked by candidates to gather votes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    /// Index of the candidate's last log entry
    pub last_log_index: LogIndex,
    /// Term of the candidate's last log entry
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    /// True means the candidate received this server's vote
    pub granted: bool,
}

/// AppendEntries RPC - invoked by the leader to replicate commands and as
/// the heartbeat (empty `entries`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendRequest {
    /// Index of the log entry immediately preceding the new ones
    pub prev_log_index: LogIndex,
    /// Term of the entry at `prev_log_index`
    pub prev_log_term: Term,
    /// Commands to store, in index order (empty for heartbeat)
    pub entries: Vec<Command>,
    /// Leader's commit index
    pub leader_commit: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendResponse {
    /// True if the follower held the entry matching
    /// `prev_log_index`/`prev_log_term` and appended the payload
    pub ok: bool,
    /// On success the follower's last appended index; on rejection a
    /// suggested resync point, or [`NO_INDEX`] when there is none
    pub index: LogIndex,
}

/// Command submission forwarded to the leader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: Command,
    /// Present when the sender wants a [`CommandResponse`] correlated back
    pub request_id: Option<RequestId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub request_id: RequestId,
    /// Index assigned to the appended command, or `None` if the submission
    /// was rejected
    pub entry_index: Option<LogIndex>,
}

/// The closed set of RPC payloads exchanged between servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RaftMessage {
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    AppendRequest(AppendRequest),
    AppendResponse(AppendResponse),
    CommandRequest(CommandRequest),
    CommandResponse(CommandResponse),
}

impl RaftMessage {
    /// Stable identifier used in logs and traces.
    pub fn kind(&self) -> &'static str {
        match self {
            RaftMessage::VoteRequest(_) => "VoteRequest",
            RaftMessage::VoteResponse(_) => "VoteResponse",
            RaftMessage::AppendRequest(_) => "AppendRequest",
            RaftMessage::AppendResponse(_) => "AppendResponse",
            RaftMessage::CommandRequest(_) => "CommandRequest",
            RaftMessage::CommandResponse(_) => "CommandResponse",
        }
    }
}

/// A routable message: the common header shared by every RPC kind plus the
/// payload itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub sender_id: ServerId,
    pub term: Term,
    pub message: RaftMessage,
}

impl Envelope {
    pub fn new(sender_id: ServerId, term: Term, message: RaftMessage) -> Self {
        Self {
            sender_id,
            term,
            message,
        }
    }

    pub fn vote_request(
        sender_id: ServerId,
        term: Term,
        last_log_index: LogIndex,
        last_log_term: Term,
    ) -> Self {
        Self::new(
            sender_id,
            term,
            RaftMessage::VoteRequest(VoteRequest {
                last_log_index,
                last_log_term,
            }),
        )
    }

    pub fn vote_response(sender_id: ServerId, term: Term, granted: bool) -> Self {
        Self::new(
            sender_id,
            term,
            RaftMessage::VoteResponse(VoteResponse { granted }),
        )
    }

    pub fn append_request(
        sender_id: ServerId,
        term: Term,
        prev_log_index: LogIndex,
        prev_log_term: Term,
        entries: Vec<Command>,
        leader_commit: LogIndex,
    ) -> Self {
        Self::new(
            sender_id,
            term,
            RaftMessage::AppendRequest(AppendRequest {
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            }),
        )
    }

    pub fn append_response(sender_id: ServerId, term: Term, ok: bool, index: LogIndex) -> Self {
        Self::new(
            sender_id,
            term,
            RaftMessage::AppendResponse(AppendResponse { ok, index }),
        )
    }

    pub fn command_request(
        sender_id: ServerId,
        term: Term,
        command: Command,
        request_id: Option<RequestId>,
    ) -> Self {
        Self::new(
            sender_id,
            term,
            RaftMessage::CommandRequest(CommandRequest {
                command,
                request_id,
            }),
        )
    }

    pub fn command_response(
        sender_id: ServerId,
        term: Term,
        request_id: RequestId,
        entry_index: Option<LogIndex>,
    ) -> Self {
        Self::new(
            sender_id,
            term,
            RaftMessage::CommandResponse(CommandResponse {
                request_id,
                entry_index,
            }),
        )
    }
}
