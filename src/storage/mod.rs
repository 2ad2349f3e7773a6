pub mod durable_log;
pub mod log;
pub mod server_state;

pub use durable_log::DurableLog;
pub use log::{Log, MemoryLog};
pub use server_state::DurableServerState;
