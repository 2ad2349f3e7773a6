use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::raft::types::{LogIndex, ServerId, Term};
use crate::util::errors::{RaftError, Result};

// fixed-length record of five big-endian u64s:
// version, server_id, current_term, commit_index, last_voted_id
const STATE_VERSION: u64 = 1;
const RECORD_LEN: usize = 5 * 8;

// on-disk marker for "no vote cast this term"
const NO_VOTE: u64 = u64::MAX;

/// File name for the durable record inside the state directory.
pub const STATE_FILE: &str = "server.state";

/// Durable record of the server states that must survive a crash: the
/// current term, the vote cast in that term and the commit index. The file
/// is overwritten in place on every update and so stays fixed-length.
pub struct DurableServerState {
    file: File,
    server_id: ServerId,
    current_term: Term,
    commit_index: LogIndex,
    voted_for: Option<ServerId>,
}

impl DurableServerState {
    /// Opens the state in `state_dir`, creating it when absent.
    ///
    /// With existing state on disk, a supplied `server_id` must match the
    /// stored one. With no state on disk, a `server_id` must be supplied.
    pub fn open(state_dir: &Path, server_id: Option<ServerId>) -> Result<Self> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(STATE_FILE);
        let exists = path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut state = Self {
            file,
            server_id: 0,
            current_term: 0,
            commit_index: 0,
            voted_for: None,
        };

        if exists {
            state.read_record()?;
            if let Some(supplied) = server_id {
                if supplied != state.server_id {
                    return Err(RaftError::IdentityMismatch {
                        stored: state.server_id,
                        supplied,
                    });
                }
            }
        } else {
            state.server_id = server_id.ok_or(RaftError::MissingIdentity)?;
            state.write_record()?;
        }

        Ok(state)
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    pub fn current_term(&self) -> Term {
        self.current_term
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn voted_for(&self) -> Option<ServerId> {
        self.voted_for
    }

    /// Updates the current term, clearing the recorded vote, and persists
    /// both before returning. A failure here is fatal to the role engine.
    pub fn update_current_term(&mut self, term: Term) -> Result<()> {
        if term == self.current_term {
            return Ok(());
        }

        self.current_term = term;
        self.voted_for = None;
        self.write_record()
    }

    /// Records the vote cast in the current term. Idempotent; persisted
    /// before returning.
    pub fn update_voted_for(&mut self, server_id: ServerId) -> Result<()> {
        if self.voted_for == Some(server_id) {
            return Ok(());
        }

        self.voted_for = Some(server_id);
        self.write_record()
    }

    /// Records the latest commit index. Persistence is best-effort: the
    /// commit index is recoverable by replay, so a failed write is logged
    /// and swallowed.
    pub fn update_commit_index(&mut self, index: LogIndex) {
        if index == self.commit_index {
            return;
        }

        self.commit_index = index;
        if let Err(err) = self.write_record() {
            tracing::warn!("failed to persist commit index {index}: {err}");
        }
    }

    fn read_record(&mut self) -> Result<()> {
        let mut buf = [0u8; RECORD_LEN];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut buf)?;

        let mut fields = buf
            .chunks_exact(8)
            .map(|chunk| u64::from_be_bytes(chunk.try_into().expect("8-byte chunk")));
        let version = fields.next().expect("version field");
        if version != STATE_VERSION {
            return Err(RaftError::InvalidStateVersion(version));
        }

        self.server_id = fields.next().expect("server id field");
        self.current_term = fields.next().expect("term field");
        self.commit_index = fields.next().expect("commit index field");
        self.voted_for = match fields.next().expect("vote field") {
            NO_VOTE => None,
            id => Some(id),
        };

        Ok(())
    }

    fn write_record(&mut self) -> Result<()> {
        let mut buf = [0u8; RECORD_LEN];
        for (slot, value) in buf.chunks_exact_mut(8).zip([
            STATE_VERSION,
            self.server_id,
            self.current_term,
            self.commit_index,
            self.voted_for.unwrap_or(NO_VOTE),
        ]) {
            slot.copy_from_slice(&value.to_be_bytes());
        }

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        self.file.sync_data()?;
        Ok(())
    }
}
