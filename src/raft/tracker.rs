use std::collections::HashMap;
use std::sync::Arc;

use crate::membership::Membership;

use super::types::{LogIndex, ServerId, Term};

/// Tracks the two consensus questions a server cares about: has a majority
/// acknowledged an appended entry, and has a majority granted its vote.
///
/// The match map and the vote tally are scoped to a single term and reset
/// whenever the term moves. Majority is measured against the live
/// membership count, so the tracker follows membership changes.
pub struct MajorityTracker {
    membership: Arc<dyn Membership>,
    /// Per-peer highest acknowledged append index for the current term
    match_map: HashMap<ServerId, LogIndex>,
    /// Vote tally for the most recent (or active) election
    election_tally: usize,
    /// Term of the most recent (or active) election
    election_term: Term,
}

impl MajorityTracker {
    pub fn new(membership: Arc<dyn Membership>) -> Self {
        Self {
            membership,
            match_map: HashMap::new(),
            election_tally: 0,
            election_term: 0,
        }
    }

    /// Resets tracking for a new term.
    pub fn update_term(&mut self, term: Term) {
        self.match_map.clear();
        if term != self.election_term {
            self.election_term = term;
            self.election_tally = 0;
        }
    }

    /// Records that `sender_id` has appended up to `match_index` and scans
    /// forward from the commit index for entries now acknowledged by a
    /// majority. Returns the highest index that may be applied, or 0 when
    /// nothing advanced. Commitment is contiguous: the scan stops at the
    /// first index short of a majority.
    pub fn appended(
        &mut self,
        sender_id: ServerId,
        match_index: LogIndex,
        current_commit: LogIndex,
    ) -> LogIndex {
        if match_index <= current_commit {
            return 0;
        }

        self.match_map.insert(sender_id, match_index);

        let mut applied_index = 0;
        for i in (current_commit + 1)..=match_index {
            let count = self.match_map.values().filter(|&&index| index >= i).count();
            if !self.is_majority(count) {
                break;
            }
            applied_index = i;
        }

        applied_index
    }

    /// Records a granted vote for `term`. Votes for an older election are
    /// ignored; a newer term restarts the tally. Returns true once the
    /// tally reaches a majority.
    pub fn received_vote(&mut self, sender_id: ServerId, term: Term) -> bool {
        if term < self.election_term {
            tracing::debug!("ignoring stale vote from {sender_id} for term {term}");
            return false;
        }

        if term > self.election_term {
            self.election_term = term;
            self.election_tally = 0;
        }

        self.election_tally += 1;
        self.is_majority(self.election_tally)
    }

    // strictly more than half of the membership, for odd and even sizes
    fn is_majority(&self, count: usize) -> bool {
        2 * count > self.membership.count()
    }
}
