use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::errors::{RaftError, Result};

/// Default interval between leader heartbeats, in milliseconds.
pub const DEFAULT_HEARTBEAT_MS: u64 = 5000;

/// Configuration for a single server.
///
/// All servers in a cluster should run with the same heartbeat and term
/// timeout values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftConfig {
    /// Directory where the durable server state is stored
    pub state_dir: PathBuf,

    /// Interval between heartbeats from the leader, in milliseconds
    pub heartbeat_ms: u64,

    /// How long a follower waits without hearing a heartbeat before it
    /// announces candidacy, in milliseconds. Defaults to twice the
    /// heartbeat interval and must stay strictly above it.
    pub term_timeout_ms: Option<u64>,

    /// Directory for the durable log, when one is used
    pub log_dir: Option<PathBuf>,
}

impl RaftConfig {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            heartbeat_ms: DEFAULT_HEARTBEAT_MS,
            term_timeout_ms: None,
            log_dir: None,
        }
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    /// The resolved term timeout in milliseconds.
    pub fn term_timeout_ms(&self) -> u64 {
        self.term_timeout_ms.unwrap_or(self.heartbeat_ms * 2)
    }

    pub fn term_timeout(&self) -> Duration {
        Duration::from_millis(self.term_timeout_ms())
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_ms == 0 {
            return Err(RaftError::InvalidConfig(
                "heartbeat interval must be non-zero".to_string(),
            ));
        }

        if self.term_timeout_ms() <= self.heartbeat_ms {
            return Err(RaftError::InvalidConfig(format!(
                "term timeout ({}ms) must be greater than the heartbeat interval ({}ms)",
                self.term_timeout_ms(),
                self.heartbeat_ms
            )));
        }

        Ok(())
    }
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self::new("./data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_timeout_defaults_to_twice_the_heartbeat() {
        let config = RaftConfig::new("/tmp/state");
        assert_eq!(config.heartbeat_ms, DEFAULT_HEARTBEAT_MS);
        assert_eq!(config.term_timeout_ms(), 2 * DEFAULT_HEARTBEAT_MS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn term_timeout_must_exceed_the_heartbeat() {
        let mut config = RaftConfig::new("/tmp/state");
        config.heartbeat_ms = 500;
        config.term_timeout_ms = Some(500);
        assert!(matches!(
            config.validate(),
            Err(RaftError::InvalidConfig(_))
        ));

        config.term_timeout_ms = Some(501);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_heartbeat_is_rejected() {
        let mut config = RaftConfig::new("/tmp/state");
        config.heartbeat_ms = 0;
        assert!(config.validate().is_err());
    }
}
