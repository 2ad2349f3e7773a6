use crate::storage::log::Log;
use crate::storage::server_state::DurableServerState;
use crate::util::errors::Result;

use super::rpc::{Envelope, VoteRequest, VoteResponse};
use super::types::{ServerId, Term};

/// Handles an incoming vote request.
///
/// The vote is granted when the candidate's term is current, this server
/// has not voted for anyone else this term, and the candidate's log is at
/// least as up-to-date as ours: a later last term wins outright, an equal
/// last term is compared by last index. A granted vote is persisted before
/// the response is produced; the caller falls back to follower with an
/// unknown leader.
pub(crate) fn handle_vote_request(
    durable: &mut DurableServerState,
    log: &dyn Log,
    candidate_id: ServerId,
    msg_term: Term,
    request: &VoteRequest,
) -> Result<VoteResponse> {
    if msg_term < durable.current_term() {
        tracing::debug!(
            "server {} denied vote to {candidate_id}: stale term {msg_term} < {}",
            durable.server_id(),
            durable.current_term()
        );
        return Ok(VoteResponse { granted: false });
    }

    if let Some(voted_for) = durable.voted_for() {
        if voted_for != candidate_id {
            tracing::debug!(
                "server {} denied vote to {candidate_id}: already voted for {voted_for}",
                durable.server_id()
            );
            return Ok(VoteResponse { granted: false });
        }
    }

    let behind = request.last_log_term < log.last_term()
        || (request.last_log_term == log.last_term() && request.last_log_index < log.last_index());
    if behind {
        tracing::debug!(
            "server {} denied vote to {candidate_id}: log behind ({}/{} < {}/{})",
            durable.server_id(),
            request.last_log_term,
            request.last_log_index,
            log.last_term(),
            log.last_index()
        );
        return Ok(VoteResponse { granted: false });
    }

    durable.update_voted_for(candidate_id)?;
    tracing::info!(
        "server {} granted vote to {candidate_id} in term {msg_term}",
        durable.server_id()
    );
    Ok(VoteResponse { granted: true })
}

/// Builds the vote request broadcast when announcing candidacy.
pub(crate) fn create_vote_request(server_id: ServerId, term: Term, log: &dyn Log) -> Envelope {
    Envelope::vote_request(server_id, term, log.last_index(), log.last_term())
}
