use std::collections::HashMap;

use crate::api::{Vote, VoteTarget};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct PendingVote {
    /// Vote the server knew about when the local vote was cast
    previous: Vote,
    predicted: Vote,
}

/// Votes cast locally that the last fetch does not reflect yet
///
/// Entries live until the next successful fetch, which replaces them with the
/// server's view, or until they are discarded because a call failed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VoteOverlay(HashMap<VoteTarget, PendingVote>);

impl VoteOverlay {
    pub fn new() -> VoteOverlay {
        VoteOverlay(HashMap::new())
    }

    /// Records a local vote; `server_vote` is the vote from the last fetch
    pub fn cast(&mut self, target: VoteTarget, server_vote: Vote, vote: Vote) {
        self.0
            .entry(target)
            .and_modify(|p| p.predicted = vote)
            .or_insert(PendingVote {
                previous: server_vote,
                predicted: vote,
            });
    }

    pub fn discard(&mut self, target: &VoteTarget) {
        self.0.remove(target);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The vote to show for `target`
    pub fn vote(&self, target: &VoteTarget, server_vote: Vote) -> Vote {
        self.0.get(target).map_or(server_vote, |p| p.predicted)
    }

    /// The score to show for `target`
    pub fn score(&self, target: &VoteTarget, server_score: i64) -> i64 {
        match self.0.get(target) {
            None => server_score,
            Some(p) => server_score + Vote::score_delta(p.previous, p.predicted),
        }
    }
}
