use super::types::ServerId;

/// The three roles a server can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Following updates from a known (or not yet known) leader
    Follower,
    /// Waiting to hear the result of an election
    Candidate,
    /// Leading all other servers in the cluster
    Leader,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Follower => write!(f, "Follower"),
            Role::Candidate => write!(f, "Candidate"),
            Role::Leader => write!(f, "Leader"),
        }
    }
}

/// Volatile role state for a single server.
///
/// Exactly one role at a time; the durable pieces (term, vote, commit
/// index) live in `DurableServerState`, not here.
#[derive(Debug, Clone)]
pub(crate) struct RoleState {
    pub server_id: ServerId,
    pub role: Role,
    /// The server currently believed to be leader, if any
    pub leader_id: Option<ServerId>,
}

impl RoleState {
    pub fn new(server_id: ServerId) -> Self {
        Self {
            server_id,
            role: Role::Follower,
            leader_id: None,
        }
    }

    pub fn become_follower(&mut self, leader_id: Option<ServerId>) {
        if self.role != Role::Follower {
            tracing::info!(
                "server {} transitioning to Follower (leader: {:?})",
                self.server_id,
                leader_id
            );
        }
        self.role = Role::Follower;
        self.leader_id = leader_id;
    }

    pub fn become_candidate(&mut self) {
        tracing::info!("server {} transitioning to Candidate", self.server_id);
        self.role = Role::Candidate;
        self.leader_id = None;
    }

    pub fn become_leader(&mut self) {
        tracing::info!("server {} transitioning to Leader", self.server_id);
        self.role = Role::Leader;
        self.leader_id = Some(self.server_id);
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn is_candidate(&self) -> bool {
        self.role == Role::Candidate
    }

    pub fn leader_is_self(&self) -> bool {
        self.leader_id == Some(self.server_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_track_leader() {
        let mut state = RoleState::new(7);
        assert_eq!(state.role, Role::Follower);
        assert_eq!(state.leader_id, None);

        state.become_candidate();
        assert!(state.is_candidate());
        assert_eq!(state.leader_id, None);

        state.become_leader();
        assert!(state.is_leader());
        assert!(state.leader_is_self());

        state.become_follower(Some(3));
        assert_eq!(state.role, Role::Follower);
        assert_eq!(state.leader_id, Some(3));
        assert!(!state.leader_is_self());
    }
}
