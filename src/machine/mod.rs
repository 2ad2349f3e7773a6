use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::raft::types::Command;

/// Consumer of committed commands.
///
/// `apply` is called exactly once per committed entry, in index order, on
/// every server. Implementations must tolerate replay from the start of a
/// durable log after a restart.
pub trait StateMachine: Send + Sync {
    fn apply(&self, command: &Command);
}

/// Dispatches committed commands to one of several state machines keyed by
/// command identifier.
///
/// Routing is configuration, not data: an unknown identifier or a second
/// registration under the same identifier is a programmer error and panics.
#[derive(Default)]
pub struct MachineRouter {
    machines: RwLock<HashMap<String, Arc<dyn StateMachine>>>,
}

impl MachineRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the machine consuming commands tagged `identifier`.
    ///
    /// # Panics
    ///
    /// Panics if the identifier already has a machine registered.
    pub fn register(&self, identifier: impl Into<String>, machine: Arc<dyn StateMachine>) {
        let identifier = identifier.into();
        let mut machines = self.machines.write().expect("router lock poisoned");
        if machines.insert(identifier.clone(), machine).is_some() {
            panic!("state machine already registered for '{identifier}'");
        }
    }
}

impl StateMachine for MachineRouter {
    fn apply(&self, command: &Command) {
        let machine = {
            let machines = self.machines.read().expect("router lock poisoned");
            machines.get(command.identifier()).cloned()
        };

        match machine {
            Some(machine) => machine.apply(command),
            None => panic!(
                "no state machine registered for command '{}'",
                command.identifier()
            ),
        }
    }
}
