use crate::storage::log::Log;
use crate::storage::server_state::DurableServerState;
use crate::util::errors::Result;

use super::rpc::{AppendRequest, AppendResponse, Envelope, NO_INDEX};
use super::types::{LogIndex, ServerId, Term};

/// What a processed append request asks of the role engine.
pub(crate) struct AppendOutcome {
    pub response: AppendResponse,
    /// The request came from a valid leader; fall back to following it
    pub accepted: bool,
    /// Commit target to apply once accepted
    pub commit_to: LogIndex,
    /// The log conflicts at or below the commit index; the server must
    /// report the divergence and stop
    pub fatal: bool,
}

impl AppendOutcome {
    fn rejected(index: LogIndex) -> Self {
        Self {
            response: AppendResponse { ok: false, index },
            accepted: false,
            commit_to: 0,
            fatal: false,
        }
    }
}

/// Handles an incoming append request (replication or heartbeat).
///
/// A missing previous entry is answered with a resync hint: the local last
/// index when the log is simply lagging, otherwise the local commit index,
/// which is always safe to restart from in a correct cluster. A conflict at
/// or below the commit index cannot happen in a correct cluster and is
/// flagged fatal.
///
/// On acceptance any divergent suffix past the previous entry is truncated,
/// the supplied commands not already present are appended under the
/// leader's term, and the leader's commit index (clamped to the local log)
/// becomes the commit target.
pub(crate) fn handle_append_request(
    durable: &DurableServerState,
    log: &mut dyn Log,
    leader_id: ServerId,
    msg_term: Term,
    request: &AppendRequest,
) -> Result<AppendOutcome> {
    let server_id = durable.server_id();

    if msg_term < durable.current_term() {
        tracing::debug!(
            "server {server_id} rejected append from {leader_id}: stale term {msg_term} < {}",
            durable.current_term()
        );
        return Ok(AppendOutcome::rejected(NO_INDEX));
    }

    if !log.has_entry(request.prev_log_index, request.prev_log_term) {
        if log.last_index() < request.prev_log_index {
            // lagging: restart from the last appended point
            tracing::debug!(
                "server {server_id} behind leader {leader_id}: resync from {}",
                log.last_index()
            );
            return Ok(AppendOutcome::rejected(log.last_index()));
        }

        if durable.commit_index() < request.prev_log_index {
            // diverged: restart from the last committed point
            tracing::debug!(
                "server {server_id} diverged from leader {leader_id}: resync from {}",
                durable.commit_index()
            );
            return Ok(AppendOutcome::rejected(durable.commit_index()));
        }

        // the conflict sits at or below our commit index; a correct
        // cluster can never produce this
        tracing::error!(
            "server {server_id} log diverged at or below commit index {} (prev {}@{})",
            durable.commit_index(),
            request.prev_log_index,
            request.prev_log_term
        );
        let mut outcome = AppendOutcome::rejected(NO_INDEX);
        outcome.fatal = true;
        return Ok(outcome);
    }

    log.validate_entry(request.prev_log_index + 1, msg_term)?;

    // a server that fell behind may see overlapping catch-up payloads, so
    // skip anything already present at the next index
    for (offset, command) in request.entries.iter().enumerate() {
        let index = request.prev_log_index + 1 + offset as LogIndex;
        if !log.has_entry(index, msg_term) {
            log.append(command.clone(), msg_term)?;
        }
    }

    if !request.entries.is_empty() {
        tracing::debug!(
            "server {server_id} appended {} entries from leader {leader_id}",
            request.entries.len()
        );
    }

    Ok(AppendOutcome {
        response: AppendResponse {
            ok: true,
            index: log.last_index(),
        },
        accepted: true,
        commit_to: request.leader_commit.min(log.last_index()),
        fatal: false,
    })
}

/// Builds the empty append request the leader broadcasts as a heartbeat.
pub(crate) fn create_heartbeat(server_id: ServerId, term: Term, log: &dyn Log) -> Envelope {
    Envelope::append_request(
        server_id,
        term,
        log.last_index(),
        log.last_term(),
        Vec::new(),
        log.commit_index(),
    )
}

/// Builds the targeted catch-up request for a follower that asked to
/// resync from `from`.
pub(crate) fn create_catch_up(
    server_id: ServerId,
    term: Term,
    log: &dyn Log,
    from: LogIndex,
) -> Result<Envelope> {
    Ok(Envelope::append_request(
        server_id,
        term,
        from,
        log.term_at(from)?,
        log.entries_from(from + 1),
        log.commit_index(),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tempfile::TempDir;

    use crate::machine::StateMachine;
    use crate::raft::types::Command;
    use crate::storage::log::MemoryLog;

    use super::*;

    #[derive(Default)]
    struct RecordingMachine {
        applied: Mutex<Vec<Command>>,
    }

    impl StateMachine for RecordingMachine {
        fn apply(&self, command: &Command) {
            self.applied.lock().unwrap().push(command.clone());
        }
    }

    fn cmd(tag: &str) -> Command {
        Command::new("test", tag.as_bytes().to_vec())
    }

    fn state(dir: &TempDir) -> DurableServerState {
        DurableServerState::open(dir.path(), Some(1)).unwrap()
    }

    #[test]
    fn appends_entries_from_a_valid_leader() {
        let dir = TempDir::new().unwrap();
        let mut durable = state(&dir);
        durable.update_current_term(1).unwrap();
        let mut log = MemoryLog::new(Arc::new(RecordingMachine::default()));

        let request = AppendRequest {
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![cmd("a"), cmd("b")],
            leader_commit: 0,
        };
        let outcome = handle_append_request(&durable, &mut log, 2, 1, &request).unwrap();

        assert!(outcome.accepted);
        assert!(outcome.response.ok);
        assert_eq!(outcome.response.index, 2);
        assert_eq!(log.last_index(), 2);
    }

    #[test]
    fn rejects_stale_terms() {
        let dir = TempDir::new().unwrap();
        let mut durable = state(&dir);
        durable.update_current_term(2).unwrap();
        let mut log = MemoryLog::new(Arc::new(RecordingMachine::default()));

        let request = AppendRequest {
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![],
            leader_commit: 0,
        };
        let outcome = handle_append_request(&durable, &mut log, 2, 1, &request).unwrap();

        assert!(!outcome.accepted);
        assert!(!outcome.response.ok);
        assert_eq!(outcome.response.index, NO_INDEX);
    }

    #[test]
    fn lagging_follower_hints_its_last_index() {
        let dir = TempDir::new().unwrap();
        let mut durable = state(&dir);
        durable.update_current_term(1).unwrap();
        let mut log = MemoryLog::new(Arc::new(RecordingMachine::default()));
        log.append(cmd("a"), 1).unwrap();

        // leader is three entries ahead
        let request = AppendRequest {
            prev_log_index: 3,
            prev_log_term: 1,
            entries: vec![cmd("d")],
            leader_commit: 3,
        };
        let outcome = handle_append_request(&durable, &mut log, 2, 1, &request).unwrap();

        assert!(!outcome.response.ok);
        assert_eq!(outcome.response.index, 1);
        assert_eq!(log.last_index(), 1);
    }

    #[test]
    fn divergence_truncates_back_to_the_match_point() {
        let dir = TempDir::new().unwrap();
        let mut durable = state(&dir);
        durable.update_current_term(3).unwrap();
        let machine = Arc::new(RecordingMachine::default());
        let mut log = MemoryLog::new(machine);
        log.append(cmd("a"), 1).unwrap();
        log.append(cmd("x"), 1).unwrap();
        log.append(cmd("y"), 1).unwrap();

        // the new leader's term-3 entry replaces the stale suffix
        let request = AppendRequest {
            prev_log_index: 1,
            prev_log_term: 1,
            entries: vec![cmd("b")],
            leader_commit: 0,
        };
        let outcome = handle_append_request(&durable, &mut log, 2, 3, &request).unwrap();

        assert!(outcome.response.ok);
        assert_eq!(log.last_index(), 2);
        assert!(log.has_entry(2, 3));
    }

    #[test]
    fn heartbeat_advances_the_commit_target() {
        let dir = TempDir::new().unwrap();
        let mut durable = state(&dir);
        durable.update_current_term(1).unwrap();
        let mut log = MemoryLog::new(Arc::new(RecordingMachine::default()));
        log.append(cmd("a"), 1).unwrap();
        log.append(cmd("b"), 1).unwrap();

        let request = AppendRequest {
            prev_log_index: 2,
            prev_log_term: 1,
            entries: vec![],
            leader_commit: 2,
        };
        let outcome = handle_append_request(&durable, &mut log, 2, 1, &request).unwrap();

        assert!(outcome.accepted);
        assert_eq!(outcome.commit_to, 2);
    }

    #[test]
    fn commit_target_is_clamped_to_the_local_log() {
        let dir = TempDir::new().unwrap();
        let mut durable = state(&dir);
        durable.update_current_term(1).unwrap();
        let mut log = MemoryLog::new(Arc::new(RecordingMachine::default()));
        log.append(cmd("a"), 1).unwrap();

        let request = AppendRequest {
            prev_log_index: 1,
            prev_log_term: 1,
            entries: vec![],
            leader_commit: 9,
        };
        let outcome = handle_append_request(&durable, &mut log, 2, 1, &request).unwrap();

        assert_eq!(outcome.commit_to, 1);
    }

    #[test]
    fn conflict_below_commit_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut durable = state(&dir);
        durable.update_current_term(2).unwrap();
        let mut log = MemoryLog::new(Arc::new(RecordingMachine::default()));
        log.append(cmd("a"), 1).unwrap();
        log.applied(1);
        durable.update_commit_index(1);

        // prev entry 1@2 does not match our 1@1 even though it is committed
        let request = AppendRequest {
            prev_log_index: 1,
            prev_log_term: 2,
            entries: vec![],
            leader_commit: 1,
        };
        let outcome = handle_append_request(&durable, &mut log, 2, 2, &request).unwrap();

        assert!(outcome.fatal);
        assert!(!outcome.response.ok);
        assert_eq!(outcome.response.index, NO_INDEX);
    }

    #[test]
    fn overlapping_catch_up_payloads_are_deduplicated() {
        let dir = TempDir::new().unwrap();
        let mut durable = state(&dir);
        durable.update_current_term(1).unwrap();
        let mut log = MemoryLog::new(Arc::new(RecordingMachine::default()));
        log.append(cmd("a"), 1).unwrap();
        log.append(cmd("b"), 1).unwrap();

        let request = AppendRequest {
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![cmd("a"), cmd("b"), cmd("c")],
            leader_commit: 0,
        };
        let outcome = handle_append_request(&durable, &mut log, 2, 1, &request).unwrap();

        assert!(outcome.response.ok);
        assert_eq!(log.last_index(), 3);
        assert_eq!(log.entries_from(1), vec![cmd("a"), cmd("b"), cmd("c")]);
    }
}
