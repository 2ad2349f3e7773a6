use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use crate::machine::StateMachine;
use crate::raft::types::{Command, LogEntry, LogIndex, Term};
use crate::storage::log::Log;
use crate::util::errors::{RaftError, Result};

// on-disk layout: a leading big-endian u64 version, then one record per
// entry: u64 index, u64 term, i16 blob length, blob bytes (bincode Command,
// empty for the sentinel)
const LOG_VERSION: u64 = 1;
const RECORD_HEADER_LEN: u64 = 8 + 8 + 2;

/// File name for the command data inside the log directory.
pub const COMMAND_FILE: &str = "commands";

struct DurableEntry {
    /// Byte offset of this entry's record, used to rewind on truncation
    position: u64,
    entry: LogEntry,
}

/// A [`Log`] that persists every entry to a local append-only file.
///
/// Makes no attempt at compaction; it is the simple, correct durable
/// variant. An existing file is replayed on open, and the caller replays
/// committed entries into the state machine by calling `applied` with the
/// recovered commit index.
pub struct DurableLog {
    file: File,
    entries: Vec<DurableEntry>,
    end_pos: u64,
    commit_index: LogIndex,
    machine: Arc<dyn StateMachine>,
}

impl DurableLog {
    /// Opens the log in `log_dir`, creating directory and file as needed.
    pub fn open(log_dir: &Path, machine: Arc<dyn StateMachine>) -> Result<Self> {
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(COMMAND_FILE);
        let exists = path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut log = Self {
            file,
            entries: Vec::new(),
            end_pos: 0,
            commit_index: 0,
            machine,
        };

        if exists {
            log.load()?;
        } else {
            log.initialize()?;
        }

        Ok(log)
    }

    fn initialize(&mut self) -> Result<()> {
        self.file.write_all(&LOG_VERSION.to_be_bytes())?;
        self.end_pos = 8;
        let position = self.write_record(&LogEntry::sentinel())?;
        self.entries.push(DurableEntry {
            position,
            entry: LogEntry::sentinel(),
        });
        Ok(())
    }

    fn load(&mut self) -> Result<()> {
        let file_len = self.file.metadata()?.len();

        let mut version = [0u8; 8];
        self.file.read_exact(&mut version)?;
        let version = u64::from_be_bytes(version);
        if version != LOG_VERSION {
            return Err(RaftError::InvalidLogVersion(version));
        }

        let mut pos = 8u64;
        while pos + RECORD_HEADER_LEN <= file_len {
            let mut header = [0u8; RECORD_HEADER_LEN as usize];
            self.file.read_exact(&mut header)?;
            let index = u64::from_be_bytes(header[0..8].try_into().expect("8-byte slice"));
            let term = u64::from_be_bytes(header[8..16].try_into().expect("8-byte slice"));
            let blob_len = i16::from_be_bytes(header[16..18].try_into().expect("2-byte slice"));

            if blob_len < 0 || pos + RECORD_HEADER_LEN + blob_len as u64 > file_len {
                break;
            }

            let command = if blob_len == 0 {
                None
            } else {
                let mut blob = vec![0u8; blob_len as usize];
                self.file.read_exact(&mut blob)?;
                Some(bincode::deserialize(&blob)?)
            };

            self.entries.push(DurableEntry {
                position: pos,
                entry: LogEntry::new(index, term, command),
            });
            pos += RECORD_HEADER_LEN + blob_len as u64;
        }

        if pos < file_len {
            // a torn record from an interrupted append; drop the tail
            tracing::warn!(
                "discarding {} trailing bytes of incomplete log record",
                file_len - pos
            );
            self.file.set_len(pos)?;
            self.file.sync_data()?;
        }

        self.file.seek(SeekFrom::Start(pos))?;
        self.end_pos = pos;

        tracing::info!("loaded {} log entries from disk", self.entries.len());
        Ok(())
    }

    fn write_record(&mut self, entry: &LogEntry) -> Result<u64> {
        let blob = match &entry.command {
            Some(command) => bincode::serialize(command)?,
            None => Vec::new(),
        };
        if blob.len() > i16::MAX as usize {
            return Err(RaftError::CommandTooLarge(blob.len()));
        }

        let mut buf = Vec::with_capacity(RECORD_HEADER_LEN as usize + blob.len());
        buf.extend_from_slice(&entry.index.to_be_bytes());
        buf.extend_from_slice(&entry.term.to_be_bytes());
        buf.extend_from_slice(&(blob.len() as i16).to_be_bytes());
        buf.extend_from_slice(&blob);

        let position = self.end_pos;
        self.file.seek(SeekFrom::Start(position))?;
        self.file.write_all(&buf)?;
        self.file.sync_data()?;
        self.end_pos = position + buf.len() as u64;

        Ok(position)
    }
}

impl Log for DurableLog {
    fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    fn last_index(&self) -> LogIndex {
        (self.entries.len() - 1) as LogIndex
    }

    fn last_term(&self) -> Term {
        self.entries[self.entries.len() - 1].entry.term
    }

    fn has_entry(&self, index: LogIndex, term: Term) -> bool {
        match self.entries.get(index as usize) {
            Some(held) => held.entry.term == term,
            None => false,
        }
    }

    fn term_at(&self, index: LogIndex) -> Result<Term> {
        self.entries
            .get(index as usize)
            .map(|held| held.entry.term)
            .ok_or(RaftError::IndexOutOfRange(index))
    }

    fn validate_entry(&mut self, index: LogIndex, term: Term) -> Result<()> {
        if index > self.last_index() {
            return Ok(());
        }
        if self.entries[index as usize].entry.term == term {
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
        let position = self.entries[index as usize].position;
        self.file.set_len(position)?;
        self.file.seek(SeekFrom::Start(position))?;
        self.file.sync_data()?;
        self.end_pos = position;
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
        let entry = LogEntry::new(index, term, Some(command));
        let position = self.write_record(&entry)?;
        self.entries.push(DurableEntry { position, entry });
        Ok(index)
    }

    fn applied(&mut self, up_to: LogIndex) {
        if up_to <= self.commit_index {
            return;
        }

        let prev_commit = self.commit_index;
        self.commit_index = up_to.min(self.last_index());
        for i in (prev_commit + 1)..=self.commit_index {
            if let Some(command) = &self.entries[i as usize].entry.command {
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
            .filter_map(|held| held.entry.command.clone())
            .collect()
    }
}
