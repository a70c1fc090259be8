//! Three-phase voting state machine (§4.7).
//!
//! [`VotingManager`] owns at most one active [`RoundState`] at a time. It
//! buffers out-of-order Prepare/Commit votes, enforces the equivocation
//! guard (first-seen block hash wins a round key), and drives the
//! `PrePrepare -> Prepare -> Commit -> Finalized` phase transitions.

use std::collections::HashMap;
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::block::Block;
use crate::consensus::config::VotingConfig;
use crate::consensus::error::VotingError;
use crate::consensus::validator_set::{RoundKey, RoundPhase, RoundState, ValidatorId, ValidatorSet, Vote, VoteType};
use crate::hash::Hash;

/// Consensus wire message (§6). `PrePrepare` is the only variant that
/// carries the candidate block.
#[derive(Clone, Debug)]
pub enum ConsensusMessage {
    PrePrepare {
        block_hash: Hash,
        height: i64,
        view_id: u64,
        sequence_id: u64,
        voter_id: ValidatorId,
        block: Option<Block>,
        signature: Vec<u8>,
        timestamp_ns: u64,
    },
    Prepare(Vote),
    Commit(Vote),
    ViewChange {
        new_view_id: u64,
        voter_id: ValidatorId,
        signature: Vec<u8>,
        timestamp_ns: u64,
    },
}

impl ConsensusMessage {
    fn vote_type_code(vt: VoteType) -> u64 {
        match vt {
            VoteType::Approve => 0,
            VoteType::Reject => 1,
        }
    }

    /// Renders the message as its JSON wire envelope (§6), independent of
    /// signing concerns.
    fn to_json(&self) -> Value {
        match self {
            ConsensusMessage::PrePrepare {
                block_hash,
                height,
                view_id,
                sequence_id,
                voter_id,
                signature,
                timestamp_ns,
                ..
            } => json!({
                "type": "PrePrepare",
                "blockHash": block_hash.to_string(),
                "blockHeight": height,
                "viewId": view_id,
                "sequenceId": sequence_id,
                "voterId": voter_id.to_string(),
                "signature": hex::encode(signature),
                "timestampNs": timestamp_ns,
            }),
            ConsensusMessage::Prepare(v) | ConsensusMessage::Commit(v) => json!({
                "type": if matches!(self, ConsensusMessage::Prepare(_)) { "Prepare" } else { "Commit" },
                "blockHash": v.block_hash.to_string(),
                "blockHeight": v.height,
                "viewId": v.view_id,
                "sequenceId": v.sequence_id,
                "voterId": v.voter_id.to_string(),
                "voteType": Self::vote_type_code(v.vote_type),
                "signature": hex::encode(&v.signature),
                "timestampNs": v.timestamp_ns,
            }),
            ConsensusMessage::ViewChange { new_view_id, voter_id, signature, timestamp_ns } => json!({
                "type": "ViewChange",
                "newViewId": new_view_id,
                "voterId": voter_id.to_string(),
                "signature": hex::encode(signature),
                "timestampNs": timestamp_ns,
            }),
        }
    }
}

/// `SignBytes(msg)`: the message's JSON with `signature` (and `block`, for
/// `PrePrepare`) nulled, so attaching or stripping the block never changes
/// what is actually signed (§4.7).
pub fn sign_bytes(msg: &ConsensusMessage) -> Vec<u8> {
    let mut value = msg.to_json();
    if let Value::Object(ref mut obj) = value {
        obj.insert("signature".to_string(), Value::Null);
        obj.insert("block".to_string(), Value::Null);
    }
    serde_json::to_vec(&value).unwrap_or_default()
}

/// Errors from a bounded [`Broadcaster::broadcast`] call.
#[derive(Debug)]
pub enum BroadcastError {
    Closed,
}

/// Outbound message sink. `broadcast` is a *blocking* send onto a bounded
/// queue: a full queue applies back-pressure to the caller rather than
/// silently dropping the message (§9).
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, msg: ConsensusMessage) -> Result<(), BroadcastError>;
}

/// [`Broadcaster`] backed by a bounded `std::sync::mpsc` channel.
///
/// `send` (not `try_send`) is used deliberately: the caller blocks until
/// queue space frees up instead of observing a dropped message.
pub struct ChannelBroadcaster {
    sender: SyncSender<ConsensusMessage>,
}

impl ChannelBroadcaster {
    /// Builds a bounded channel pair; the receiver drains messages a
    /// transport layer (out of scope here) would forward to peers.
    pub fn new(capacity: usize) -> (ChannelBroadcaster, mpsc::Receiver<ConsensusMessage>) {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        (ChannelBroadcaster { sender: tx }, rx)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn broadcast(&self, msg: ConsensusMessage) -> Result<(), BroadcastError> {
        self.sender.send(msg).map_err(|_| BroadcastError::Closed)
    }
}

/// Loopback [`Broadcaster`] for single-process tests and demos: every
/// broadcast message is also delivered back into this node's own inbound
/// handlers via `try_send`, and dropped (with a warning) only if the
/// in-process queue is actually full.
pub struct LoopbackBroadcaster {
    sender: SyncSender<ConsensusMessage>,
}

impl LoopbackBroadcaster {
    pub fn new(capacity: usize) -> (LoopbackBroadcaster, mpsc::Receiver<ConsensusMessage>) {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        (LoopbackBroadcaster { sender: tx }, rx)
    }
}

impl Broadcaster for LoopbackBroadcaster {
    fn broadcast(&self, msg: ConsensusMessage) -> Result<(), BroadcastError> {
        match self.sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!("loopback broadcast queue full, message dropped");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(BroadcastError::Closed),
        }
    }
}

/// Callback seam for round-level events (§4.7). Default no-op methods let
/// callers implement only the events they care about.
pub trait VotingObserver: Send + Sync {
    fn on_prepare_quorum(&self, _block_hash: Hash, _height: i64) {}
    fn on_commit_quorum(&self, _block_hash: Hash, _height: i64) {}
    fn on_round_timeout(&self, _key: RoundKey, _block_hash: Hash) {}
}

/// Observer that does nothing; the default for a [`VotingManager`] built
/// without an explicit observer.
pub struct NoopObserver;
impl VotingObserver for NoopObserver {}

struct VotingInner {
    current_round: Option<RoundState>,
    pending_prepare: HashMap<RoundKey, Vec<Vote>>,
    pending_commit: HashMap<RoundKey, Vec<Vote>>,
    pending_count: usize,
}

impl VotingInner {
    fn new() -> Self {
        Self {
            current_round: None,
            pending_prepare: HashMap::new(),
            pending_commit: HashMap::new(),
            pending_count: 0,
        }
    }

    /// Evicts arbitrary buffered votes until usage is back under half of
    /// `bound` (§4.7's `MaxPendingVotes` policy).
    fn enforce_pending_bound(&mut self, bound: usize) {
        if self.pending_count <= bound {
            return;
        }
        let target = bound / 2;
        'outer: for buffers in [&mut self.pending_prepare, &mut self.pending_commit] {
            let keys: Vec<RoundKey> = buffers.keys().copied().collect();
            for key in keys {
                while self.pending_count > target {
                    let Some(list) = buffers.get_mut(&key) else { break };
                    if list.pop().is_none() {
                        buffers.remove(&key);
                        break;
                    }
                    self.pending_count -= 1;
                    if self.pending_count <= target {
                        break 'outer;
                    }
                }
            }
        }
    }
}

/// Three-phase voting engine: one active round at a time, pending-vote
/// buffering, equivocation guard, and a cleanup loop for expired rounds.
pub struct VotingManager {
    inner: Mutex<VotingInner>,
    validators: Arc<ValidatorSet>,
    cfg: VotingConfig,
    broadcaster: Arc<dyn Broadcaster>,
    observer: Arc<dyn VotingObserver>,
    local_voter_id: ValidatorId,
}

impl VotingManager {
    pub fn new(
        validators: Arc<ValidatorSet>,
        cfg: VotingConfig,
        broadcaster: Arc<dyn Broadcaster>,
        observer: Arc<dyn VotingObserver>,
        local_voter_id: ValidatorId,
    ) -> Self {
        Self {
            inner: Mutex::new(VotingInner::new()),
            validators,
            cfg,
            broadcaster,
            observer,
            local_voter_id,
        }
    }

    fn key_matches_round(round: &RoundState, key: RoundKey) -> bool {
        round.key == key
    }

    /// Builds this node's own Approve vote for `key`/`block_hash`, recorded
    /// directly into the round's tally rather than relying on the
    /// broadcaster to echo it back (a node always implicitly agrees with
    /// the phase transition it just made).
    fn local_approve_vote(&self, key: RoundKey, block_hash: Hash) -> Vote {
        Vote {
            block_hash,
            height: key.height,
            view_id: key.view_id,
            sequence_id: key.sequence_id,
            voter_id: self.local_voter_id,
            vote_type: VoteType::Approve,
            signature: Vec::new(),
            timestamp_ns: 0,
        }
    }

    /// Opens a round for `block` and broadcasts `PrePrepare`. Fails if a
    /// non-expired round is already active.
    pub fn start_round(&self, block: Block, view_id: u64, sequence_id: u64) -> Result<(), VotingError> {
        let key = RoundKey { height: block.header.height, view_id, sequence_id };
        let block_hash = block.hash;

        let mut inner = self.inner.lock();
        if let Some(round) = &inner.current_round {
            if !round.is_expired(Instant::now()) {
                return Err(VotingError::RoundAlreadyActive);
            }
        }

        let validators = self.validators.snapshot();
        let mut round = RoundState::new_round(key, block_hash, validators, self.cfg.round_timeout);
        self.drain_pending_locked(&mut inner, &mut round, key);
        // The proposer's own PrePrepare is the equivalent of having already
        // received (and implicitly accepted) it, so the round is immediately
        // eligible for Prepare votes -- otherwise a round this node opens
        // itself could never reach Prepare quorum.
        round.state = RoundPhase::Prepare;
        round.add_prepare(self.local_approve_vote(key, block_hash));
        inner.current_round = Some(round);
        drop(inner);

        self.broadcaster
            .broadcast(ConsensusMessage::PrePrepare {
                block_hash,
                height: key.height,
                view_id,
                sequence_id,
                voter_id: self.local_voter_id,
                block: Some(block),
                signature: Vec::new(),
                timestamp_ns: 0,
            })
            .map_err(|_| VotingError::BroadcastClosed)
    }

    fn drain_pending_locked(&self, inner: &mut VotingInner, round: &mut RoundState, key: RoundKey) {
        if let Some(votes) = inner.pending_prepare.remove(&key) {
            inner.pending_count -= votes.len();
            for v in votes {
                if v.block_hash == round.block_hash && round.is_validator(&v.voter_id) {
                    round.add_prepare(v);
                }
            }
        }
        if let Some(votes) = inner.pending_commit.remove(&key) {
            inner.pending_count -= votes.len();
            for v in votes {
                if v.block_hash == round.block_hash && round.is_validator(&v.voter_id) {
                    round.add_commit(v);
                }
            }
        }
    }

    /// Handles an inbound `PrePrepare`. Opens a round from the message if
    /// none is active; ignores conflicting (equivocating) proposals for an
    /// already-open round key.
    pub fn handle_pre_prepare(
        &self,
        block_hash: Hash,
        height: i64,
        view_id: u64,
        sequence_id: u64,
        from: ValidatorId,
        block: Option<Block>,
    ) -> Result<(), VotingError> {
        if !self.validators.is_validator(&from) {
            return Err(VotingError::NotAValidator);
        }
        let block = block.ok_or(VotingError::MalformedPrePrepare)?;
        if block.hash != block_hash || block.header.height != height {
            return Err(VotingError::MalformedPrePrepare);
        }

        let key = RoundKey { height, view_id, sequence_id };
        let mut inner = self.inner.lock();

        let should_open = match &inner.current_round {
            None => true,
            Some(round) if round.key != key => false, // different round active; ignore
            Some(round) => {
                if round.block_hash != block_hash {
                    tracing::warn!(?key, "equivocating PrePrepare ignored");
                }
                false
            }
        };

        if !should_open {
            return Ok(());
        }

        let validators = self.validators.snapshot();
        let mut round = RoundState::new_round(key, block_hash, validators, self.cfg.round_timeout);
        self.drain_pending_locked(&mut inner, &mut round, key);
        round.state = RoundPhase::Prepare;
        round.add_prepare(self.local_approve_vote(key, block_hash));
        inner.current_round = Some(round);
        drop(inner);

        self.broadcaster
            .broadcast(ConsensusMessage::Prepare(Vote {
                block_hash,
                height,
                view_id,
                sequence_id,
                voter_id: self.local_voter_id,
                vote_type: VoteType::Approve,
                signature: Vec::new(),
                timestamp_ns: 0,
            }))
            .map_err(|_| VotingError::BroadcastClosed)
    }

    /// Handles an inbound Prepare vote, buffering it if no matching round
    /// is active yet.
    pub fn handle_prepare(&self, vote: Vote, from: ValidatorId) -> Result<(), VotingError> {
        if !self.validators.is_validator(&from) {
            return Err(VotingError::NotAValidator);
        }

        let key = RoundKey { height: vote.height, view_id: vote.view_id, sequence_id: vote.sequence_id };
        let mut inner = self.inner.lock();

        let matches = inner.current_round.as_ref().map(|r| Self::key_matches_round(r, key)).unwrap_or(false);
        if !matches {
            self.buffer_pending(&mut inner, true, key, vote);
            return Ok(());
        }

        let round = inner.current_round.as_mut().expect("checked above");
        if vote.block_hash != round.block_hash {
            return Ok(()); // mismatched hash under an open round: ignore
        }
        if !round.is_validator(&from) {
            return Ok(());
        }

        round.add_prepare(vote);
        let fire = round.state == RoundPhase::Prepare && round.has_prepare_quorum();
        if fire {
            round.state = RoundPhase::Commit;
            // This node's own Commit vote must count toward its own
            // quorum independent of whether the broadcaster loops
            // messages back to this manager's inbound handlers.
            let local_commit = self.local_approve_vote(round.key, round.block_hash);
            round.add_commit(local_commit);
        }
        let (block_hash, height, view_id, sequence_id) = (round.block_hash, round.key.height, round.key.view_id, round.key.sequence_id);
        drop(inner);

        if fire {
            self.observer.on_prepare_quorum(block_hash, height);
            self.broadcaster
                .broadcast(ConsensusMessage::Commit(Vote {
                    block_hash,
                    height,
                    view_id,
                    sequence_id,
                    voter_id: self.local_voter_id,
                    vote_type: VoteType::Approve,
                    signature: Vec::new(),
                    timestamp_ns: 0,
                }))
                .map_err(|_| VotingError::BroadcastClosed)?;
        }
        Ok(())
    }

    /// Handles an inbound Commit vote; symmetric to [`Self::handle_prepare`].
    pub fn handle_commit(&self, vote: Vote, from: ValidatorId) -> Result<(), VotingError> {
        if !self.validators.is_validator(&from) {
            return Err(VotingError::NotAValidator);
        }

        let key = RoundKey { height: vote.height, view_id: vote.view_id, sequence_id: vote.sequence_id };
        let mut inner = self.inner.lock();

        let matches = inner.current_round.as_ref().map(|r| Self::key_matches_round(r, key)).unwrap_or(false);
        if !matches {
            self.buffer_pending(&mut inner, false, key, vote);
            return Ok(());
        }

        let round = inner.current_round.as_mut().expect("checked above");
        if vote.block_hash != round.block_hash {
            return Ok(());
        }
        if !round.is_validator(&from) {
            return Ok(());
        }

        round.add_commit(vote);
        let fire = round.state == RoundPhase::Commit && round.has_commit_quorum();
        let (block_hash, height) = (round.block_hash, round.key.height);
        if fire {
            round.state = RoundPhase::Finalized;
        }
        if fire {
            inner.current_round = None;
        }
        drop(inner);

        if fire {
            self.observer.on_commit_quorum(block_hash, height);
        }
        Ok(())
    }

    fn buffer_pending(&self, inner: &mut VotingInner, is_prepare: bool, key: RoundKey, vote: Vote) {
        let bucket = if is_prepare { &mut inner.pending_prepare } else { &mut inner.pending_commit };
        bucket.entry(key).or_default().push(vote);
        inner.pending_count += 1;
        let bound = self.cfg.max_pending_votes;
        inner.enforce_pending_bound(bound);
    }

    /// Current active round key, if any (for diagnostics/tests).
    pub fn current_round_key(&self) -> Option<RoundKey> {
        self.inner.lock().current_round.as_ref().map(|r| r.key)
    }

    pub fn current_round_hash(&self) -> Option<Hash> {
        self.inner.lock().current_round.as_ref().map(|r| r.block_hash)
    }

    /// Single sweep of the cleanup loop (§5): if the active round's
    /// deadline has passed, clear it and fire `on_round_timeout` *after*
    /// releasing the lock, to avoid re-entrancy if the callback calls back
    /// into this manager.
    pub fn sweep_expired_round(&self) {
        let expired = {
            let mut inner = self.inner.lock();
            match &inner.current_round {
                Some(round) if round.is_expired(Instant::now()) => {
                    let key = round.key;
                    let hash = round.block_hash;
                    inner.current_round = None;
                    Some((key, hash))
                }
                _ => None,
            }
        };

        if let Some((key, hash)) = expired {
            self.observer.on_round_timeout(key, hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, Header};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn addr(b: u8) -> ValidatorId {
        ValidatorId::from_bytes(&[b; crate::hash::ADDRESS_LEN])
    }

    fn four_validators() -> Arc<ValidatorSet> {
        Arc::new(ValidatorSet::from_members([addr(1), addr(2), addr(3), addr(4)]))
    }

    fn block_at(height: i64) -> Block {
        let header = Header { height, ..Header::default() };
        Block::new(header, Vec::new())
    }

    struct CountingObserver {
        prepare_quorums: AtomicUsize,
        commit_quorums: AtomicUsize,
    }
    impl VotingObserver for CountingObserver {
        fn on_prepare_quorum(&self, _block_hash: Hash, _height: i64) {
            self.prepare_quorums.fetch_add(1, Ordering::SeqCst);
        }
        fn on_commit_quorum(&self, _block_hash: Hash, _height: i64) {
            self.commit_quorums.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn manager(validators: Arc<ValidatorSet>, observer: Arc<CountingObserver>) -> (VotingManager, Arc<dyn Broadcaster>) {
        let (bcast, _rx) = ChannelBroadcaster::new(64);
        let bcast: Arc<dyn Broadcaster> = Arc::new(bcast);
        let mgr = VotingManager::new(validators, VotingConfig::default(), bcast.clone(), observer, addr(1));
        (mgr, bcast)
    }

    fn approve(voter: ValidatorId, key: RoundKey, hash: Hash) -> Vote {
        Vote { block_hash: hash, height: key.height, view_id: key.view_id, sequence_id: key.sequence_id, voter_id: voter, vote_type: VoteType::Approve, signature: Vec::new(), timestamp_ns: 0 }
    }

    #[test]
    fn basic_flow_reaches_prepare_and_commit_quorum_once() {
        let validators = four_validators();
        let observer = Arc::new(CountingObserver { prepare_quorums: AtomicUsize::new(0), commit_quorums: AtomicUsize::new(0) });
        let (mgr, _b) = manager(validators, observer.clone());

        let block = block_at(1);
        let hash = block.hash;
        let key = RoundKey { height: 1, view_id: 0, sequence_id: 1 };
        // local == addr(1), the proposer; its own Prepare/Commit are
        // recorded implicitly, so only B and C (addr(2), addr(3)) need to
        // vote to reach the 2f+1=3 quorum.
        mgr.start_round(block, 0, 1).unwrap();

        mgr.handle_prepare(approve(addr(2), key, hash), addr(2)).unwrap();
        mgr.handle_prepare(approve(addr(3), key, hash), addr(3)).unwrap();
        assert_eq!(observer.prepare_quorums.load(Ordering::SeqCst), 1);

        mgr.handle_commit(approve(addr(2), key, hash), addr(2)).unwrap();
        mgr.handle_commit(approve(addr(3), key, hash), addr(3)).unwrap();
        assert_eq!(observer.commit_quorums.load(Ordering::SeqCst), 1);
        assert!(mgr.current_round_key().is_none());
    }

    #[test]
    fn pending_prepare_before_pre_prepare_is_drained_on_round_open() {
        let validators = four_validators();
        let observer = Arc::new(CountingObserver { prepare_quorums: AtomicUsize::new(0), commit_quorums: AtomicUsize::new(0) });
        let (mgr, _b) = manager(validators, observer.clone());

        let block = block_at(1);
        let hash = block.hash;
        let key = RoundKey { height: 1, view_id: 0, sequence_id: 1 };

        mgr.handle_prepare(approve(addr(2), key, hash), addr(2)).unwrap();
        assert_eq!(observer.prepare_quorums.load(Ordering::SeqCst), 0);

        // start_round records local's own Prepare (addr(1)); the buffered
        // vote from B (addr(2)) drains in behind it, so one more vote from
        // C (addr(3)) is enough to reach quorum.
        mgr.start_round(block, 0, 1).unwrap();
        mgr.handle_prepare(approve(addr(3), key, hash), addr(3)).unwrap();
        assert_eq!(observer.prepare_quorums.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn equivocating_pre_prepare_is_ignored() {
        let validators = four_validators();
        let observer = Arc::new(CountingObserver { prepare_quorums: AtomicUsize::new(0), commit_quorums: AtomicUsize::new(0) });
        let (mgr, _b) = manager(validators, observer);

        let block1 = block_at(1);
        let hash1 = block1.hash;
        mgr.start_round(block1, 0, 1).unwrap();

        let header2 = Header { timestamp: 1, ..block_at(1).header };
        let block2 = Block::new(header2, Vec::new());
        assert_ne!(block2.hash, hash1);
        mgr.handle_pre_prepare(block2.hash, 1, 0, 1, addr(2), Some(block2)).unwrap();

        assert_eq!(mgr.current_round_hash(), Some(hash1));
    }

    #[test]
    fn round_timeout_clears_current_round() {
        let validators = four_validators();
        let observer = Arc::new(CountingObserver { prepare_quorums: AtomicUsize::new(0), commit_quorums: AtomicUsize::new(0) });
        let (mgr, _b) = manager(validators, observer);

        let block = block_at(1);
        mgr.start_round(block, 0, 1).unwrap();
        {
            let mut inner = mgr.inner.lock();
            inner.current_round.as_mut().unwrap().deadline = Instant::now() - std::time::Duration::from_secs(1);
        }
        mgr.sweep_expired_round();
        assert!(mgr.current_round_key().is_none());
    }
}
