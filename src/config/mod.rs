pub mod config;

pub use config::{RaftConfig, DEFAULT_HEARTBEAT_MS};
