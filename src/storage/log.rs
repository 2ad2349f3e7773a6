use std::sync::Arc;

use crate::machine::StateMachine;
use crate::raft::types::{Command, LogEntry, LogIndex, Term};
use crate::util::errors::{RaftError, Result};

/// The replicated log: an ordered sequence of `(index, term, command)`
/// entries plus the commit pointer that drives the state machine.
///
/// Entries are created by `append`, may be truncated by `validate_entry`
/// while still uncommitted, and are immutable once the commit pointer has
/// passed them.
pub trait Log: Send {
    /// Highest index known to be committed and applied locally.
    fn commit_index(&self) -> LogIndex;

    /// Index of the last appended entry (0 when the log is empty).
    fn last_index(&self) -> LogIndex;

    /// Term of the last appended entry (0 when the log is empty).
    fn last_term(&self) -> Term;

    /// True iff an entry exists at `index` with a matching `term`.
    fn has_entry(&self, index: LogIndex, term: Term) -> bool;

    /// Term of the entry at `index`.
    fn term_at(&self, index: LogIndex) -> Result<Term>;

    /// Checks the entry at `index` against `term` and truncates the log
    /// from `index` onward if they conflict. A no-op past the end of the
    /// log or when the terms match. Refuses to truncate at or below the
    /// commit index.
    fn validate_entry(&mut self, index: LogIndex, term: Term) -> Result<()>;

    /// Appends a command at `last_index() + 1`, durably for durable
    /// variants, before returning. Rejects terms older than the last
    /// appended term.
    fn append(&mut self, command: Command, term: Term) -> Result<LogIndex>;

    /// Advances the commit pointer to `min(up_to, last_index())`, applying
    /// every newly committed entry to the state machine in index order,
    /// exactly once, before returning.
    fn applied(&mut self, up_to: LogIndex);

    /// Commands from `start` through the end of the log, for leader
    /// catch-up.
    fn entries_from(&self, start: LogIndex) -> Vec<Command>;
}

/// In-memory [`Log`] with no durability. Suitable for tests and for
/// deployments that accept losing the log on restart.
pub struct MemoryLog {
    entries: Vec<LogEntry>,
    commit_index: LogIndex,
    machine: Arc<dyn StateMachine>,
}

impl MemoryLog {
    pub fn new(machine: Arc<dyn StateMachine>) -> Self {
        Self {
            entries: vec![LogEntry::sentinel()],
            commit_index: 0,
            machine,
        }
    }
}

impl Log for MemoryLog {
    fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    fn last_index(&self) -> LogIndex {
        (self.entries.len() - 1) as LogIndex
    }

    fn last_term(&self) -> Term {
        self.entries[self.entries.len() - 1].term
    }

    fn has_entry(&self, index: LogIndex, term: Term) -> bool {
        match self.entries.get(index as usize) {
            Some(entry) => entry.term == term,
            None => false,
        }
    }

    fn term_at(&self, index: LogIndex) -> Result<Term> {
        self.entries
            .get(index as usize)
            .map(|entry| entry.term)
            .ok_or(RaftError::IndexOutOfRange(index))
    }

    fn validate_entry(&mut self, index: LogIndex, term: Term) -> Result<()> {
        if index > self.last_index() {
            return Ok(());
        }
        if self.entries[index as usize].term == term {
            return Ok(());
        }
        if index <= self.commit_index {
            tracing::error!(
                "refusing to truncate at index {index}: commit index is {}",
                self.commit_index
            );
            return Err(RaftError::DivergedPastCommit {
                index,
                commit_index: self.commit_index,
            });
        }

        tracing::info!("truncating divergent log suffix from index {index}");
        self.entries.truncate(index as usize);
        Ok(())
    }

    fn append(&mut self, command: Command, term: Term) -> Result<LogIndex> {
        if term < self.last_term() {
            return Err(RaftError::StaleTerm {
                term,
                last_term: self.last_term(),
            });
        }

        let index = self.entries.len() as LogIndex;
        self.entries.push(LogEntry::new(index, term, Some(command)));
        Ok(index)
    }

    fn applied(&mut self, up_to: LogIndex) {
        if up_to <= self.commit_index {
            return;
        }

        let prev_commit = self.commit_index;
        self.commit_index = up_to.min(self.last_index());
        for i in (prev_commit + 1)..=self.commit_index {
            if let Some(command) = &self.entries[i as usize].command {
                self.machine.apply(command);
            }
        }
    }

    fn entries_from(&self, start: LogIndex) -> Vec<Command> {
        if start < 1 || start > self.last_index() {
            return Vec::new();
        }

        self.entries[start as usize..]
            .iter()
            .filter_map(|entry| entry.command.clone())
            .collect()
    }
}
