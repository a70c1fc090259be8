//! Validator membership and per-round vote tallying (§3, §4.6).

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::hash::{Address, Hash};

/// A validator is identified by its [`Address`].
pub type ValidatorId = Address;

/// `Approve`/`Reject` ballot cast by a validator in the Prepare or Commit
/// phase.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VoteType {
    Approve,
    Reject,
}

/// A single Prepare or Commit ballot (§3, §6).
#[derive(Clone, Debug)]
pub struct Vote {
    pub block_hash: Hash,
    pub height: i64,
    pub view_id: u64,
    pub sequence_id: u64,
    pub voter_id: ValidatorId,
    pub vote_type: VoteType,
    pub signature: Vec<u8>,
    pub timestamp_ns: u64,
}

/// Membership roster, guarded by a shared/exclusive lock outside of an
/// active round (§5): `isValidator` is O(1), `snapshot` clones the current
/// set so a round can freeze it.
#[derive(Default)]
pub struct ValidatorSet {
    members: RwLock<BTreeSet<ValidatorId>>,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_members<I: IntoIterator<Item = ValidatorId>>(members: I) -> Self {
        Self {
            members: RwLock::new(members.into_iter().collect()),
        }
    }

    pub fn add(&self, id: ValidatorId) {
        self.members.write().insert(id);
    }

    pub fn remove(&self, id: &ValidatorId) {
        self.members.write().remove(id);
    }

    pub fn is_validator(&self, id: &ValidatorId) -> bool {
        self.members.read().contains(id)
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clones the current membership into an ordered, immutable snapshot.
    /// [`RoundState::new_round`] freezes exactly this snapshot for the
    /// lifetime of a round.
    pub fn snapshot(&self) -> Vec<ValidatorId> {
        self.members.read().iter().copied().collect()
    }
}

/// Identifies a consensus round: `(height, viewId, sequenceId)` (§3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RoundKey {
    pub height: i64,
    pub view_id: u64,
    pub sequence_id: u64,
}

/// Three-phase round lifecycle, plus the two terminal states (§4.7).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RoundPhase {
    PrePrepare,
    Prepare,
    Commit,
    Finalized,
    Expired,
}

/// Per-round vote tally and phase tracker (§3, §4.6).
///
/// `validators` is frozen at construction: membership changes applied to
/// the owning [`ValidatorSet`] mid-round never affect an in-flight round.
pub struct RoundState {
    pub key: RoundKey,
    pub block_hash: Hash,
    pub validators: Vec<ValidatorId>,
    pub quorum: usize,
    pub state: RoundPhase,
    pub deadline: Instant,
    prepare_votes: HashMap<ValidatorId, Vote>,
    commit_votes: HashMap<ValidatorId, Vote>,
}

/// `quorum = 2f+1` where `f = (N-1)/3` (floor division).
pub fn quorum_for(validator_count: usize) -> usize {
    if validator_count == 0 {
        return 0;
    }
    let f = (validator_count - 1) / 3;
    2 * f + 1
}

impl RoundState {
    /// Opens a new round, freezing `validators` and computing the quorum
    /// from its size.
    pub fn new_round(
        key: RoundKey,
        block_hash: Hash,
        validators: Vec<ValidatorId>,
        timeout: Duration,
    ) -> RoundState {
        let quorum = quorum_for(validators.len());
        RoundState {
            key,
            block_hash,
            validators,
            quorum,
            state: RoundPhase::PrePrepare,
            deadline: Instant::now() + timeout,
            prepare_votes: HashMap::new(),
            commit_votes: HashMap::new(),
        }
    }

    pub fn is_validator(&self, id: &ValidatorId) -> bool {
        self.validators.contains(id)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Idempotently records a Prepare vote; a second vote from the same
    /// voter in the same round is dropped silently (§4.6).
    pub fn add_prepare(&mut self, vote: Vote) {
        self.prepare_votes.entry(vote.voter_id).or_insert(vote);
    }

    pub fn add_commit(&mut self, vote: Vote) {
        self.commit_votes.entry(vote.voter_id).or_insert(vote);
    }

    fn approvals(votes: &HashMap<ValidatorId, Vote>) -> usize {
        votes.values().filter(|v| v.vote_type == VoteType::Approve).count()
    }

    pub fn has_prepare_quorum(&self) -> bool {
        Self::approvals(&self.prepare_votes) >= self.quorum
    }

    pub fn has_commit_quorum(&self) -> bool {
        Self::approvals(&self.commit_votes) >= self.quorum
    }

    pub fn prepare_vote_count(&self) -> usize {
        self.prepare_votes.len()
    }

    pub fn commit_vote_count(&self) -> usize {
        self.commit_votes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::from_bytes(&[b; crate::hash::ADDRESS_LEN])
    }

    fn approve(voter: Address, key: RoundKey, hash: Hash) -> Vote {
        Vote {
            block_hash: hash,
            height: key.height,
            view_id: key.view_id,
            sequence_id: key.sequence_id,
            voter_id: voter,
            vote_type: VoteType::Approve,
            signature: Vec::new(),
            timestamp_ns: 0,
        }
    }

    #[test]
    fn quorum_matches_four_validator_example() {
        // 4 validators, f = (4-1)/3 = 1, quorum = 2*1+1 = 3.
        assert_eq!(quorum_for(4), 3);
    }

    #[test]
    fn validator_set_add_remove_and_snapshot() {
        let set = ValidatorSet::new();
        let a = addr(1);
        let b = addr(2);
        set.add(a);
        set.add(b);
        assert!(set.is_validator(&a));
        assert_eq!(set.len(), 2);

        set.remove(&a);
        assert!(!set.is_validator(&a));
        assert_eq!(set.snapshot(), vec![b]);
    }

    #[test]
    fn prepare_votes_are_idempotent_per_voter() {
        let key = RoundKey { height: 1, view_id: 0, sequence_id: 0 };
        let hash = Hash::blake2b256(b"block");
        let validators = vec![addr(1), addr(2), addr(3), addr(4)];
        let mut round = RoundState::new_round(key, hash, validators, Duration::from_secs(10));

        let voter = addr(1);
        round.add_prepare(approve(voter, key, hash));
        round.add_prepare(approve(voter, key, hash));
        assert_eq!(round.prepare_vote_count(), 1);
    }

    #[test]
    fn prepare_quorum_triggers_at_threshold() {
        let key = RoundKey { height: 1, view_id: 0, sequence_id: 0 };
        let hash = Hash::blake2b256(b"block");
        let validators = vec![addr(1), addr(2), addr(3), addr(4)];
        let mut round = RoundState::new_round(key, hash, validators, Duration::from_secs(10));

        assert!(!round.has_prepare_quorum());
        round.add_prepare(approve(addr(1), key, hash));
        round.add_prepare(approve(addr(2), key, hash));
        assert!(!round.has_prepare_quorum()); // 2 < quorum (3)
        round.add_prepare(approve(addr(3), key, hash));
        assert!(round.has_prepare_quorum()); // 3 >= quorum (3)
    }

    #[test]
    fn round_expires_after_deadline() {
        let key = RoundKey { height: 1, view_id: 0, sequence_id: 0 };
        let hash = Hash::blake2b256(b"block");
        let round = RoundState::new_round(key, hash, vec![addr(1)], Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(round.is_expired(Instant::now()));
    }
}
