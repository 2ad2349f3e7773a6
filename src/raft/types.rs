use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Type alias for term numbers
pub type Term = u64;

/// Type alias for log indices
pub type LogIndex = u64;

/// Unique identifier for a server in the cluster
pub type ServerId = u64;

/// Correlation identifier for a forwarded command request
pub type RequestId = u64;

/// An opaque command to be replicated through the log.
///
/// The core never interprets the payload; the identifier selects which
/// registered state machine consumes the command once it commits. Two
/// commands are the same command iff they are byte-equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    identifier: String,
    payload: Vec<u8>,
}

impl Command {
    pub fn new(identifier: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            identifier: identifier.into(),
            payload,
        }
    }

    /// The tag used to route this command to a state machine.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// A single entry in the replicated log.
///
/// Index 0 is a sentinel with term 0 and no command; every real entry has
/// index >= 1 and carries a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub index: LogIndex,
    pub term: Term,
    pub command: Option<Command>,
}

impl LogEntry {
    pub fn new(index: LogIndex, term: Term, command: Option<Command>) -> Self {
        Self {
            index,
            term,
            command,
        }
    }

    pub(crate) fn sentinel() -> Self {
        Self::new(0, 0, None)
    }
}

/// Result of a tracked command submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command committed and was applied to the local state machine.
    Applied,
    /// The command was rejected, or its submission path went away.
    Failed,
}

/// Sending half of a one-shot command completion.
///
/// A listener is consumed when it fires; `Applied` is reported at most once
/// per successful submission. Dropping a listener without firing resolves
/// the paired [`CommandWaiter`] as `Failed`.
#[derive(Debug)]
pub struct CommandListener {
    tx: oneshot::Sender<CommandOutcome>,
}

impl CommandListener {
    /// Creates a connected listener/waiter pair.
    pub fn channel() -> (CommandListener, CommandWaiter) {
        let (tx, rx) = oneshot::channel();
        (CommandListener { tx }, CommandWaiter { rx })
    }

    pub fn applied(self) {
        let _ = self.tx.send(CommandOutcome::Applied);
    }

    pub fn failed(self) {
        let _ = self.tx.send(CommandOutcome::Failed);
    }
}

/// Receiving half of a one-shot command completion.
#[derive(Debug)]
pub struct CommandWaiter {
    rx: oneshot::Receiver<CommandOutcome>,
}

impl CommandWaiter {
    /// Waits for the submission outcome. A listener dropped anywhere along
    /// the submission path (proxy disconnect, server shutdown) resolves as
    /// `Failed`.
    pub async fn wait(self) -> CommandOutcome {
        self.rx.await.unwrap_or(CommandOutcome::Failed)
    }
}
