//! Consensus manager: membership control, view/sequence bookkeeping, and
//! the `ServiceProvider` seam to the ledger/PoW layer (§4.8, §9, §13).
//!
//! This breaks the engine/consensus/network cycle the source expressed as
//! mutually-referencing globals: callers hand the manager a
//! [`ServiceProvider`] at construction, and the manager never reaches back
//! into engine internals directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;

use crate::block::Block;
use crate::consensus::config::{ConsensusConfig, VotingConfig};
use crate::consensus::error::ConsensusError;
use crate::consensus::validator_set::{ValidatorId, ValidatorSet, Vote, VoteType};
use crate::consensus::voting::{Broadcaster, ConsensusMessage, VotingManager, VotingObserver};
use crate::hash::Hash;

/// The ledger/PoW seam the consensus manager validates proposed blocks
/// against, and the chain-query surface it exposes to callers (§9, §13).
///
/// Implementations typically wrap a [`crate::ledger::Vault`] plus whatever
/// block index the binary crate maintains; both are out of `cerera-core`'s
/// scope (the ledger only applies transactions from already-finalized
/// blocks, it does not itself decide chain membership).
pub trait ServiceProvider: Send + Sync {
    /// Validates a candidate block: PoW target, header linkage, and every
    /// transaction's legality against the current ledger state.
    fn validate_block(&self, block: &Block) -> Result<(), String>;
    /// Applies a finalized block's transactions and appends it to the chain.
    fn add_block(&self, block: &Block) -> Result<(), String>;
    fn genesis_hash(&self) -> Hash;
    fn current_height(&self) -> i64;
    fn latest_hash(&self) -> Hash;
    fn chain_id(&self) -> i32;
    fn block_by_height(&self, height: i64) -> Option<Block>;
    fn block_by_hash(&self, hash: &Hash) -> Option<Block>;
    /// PoW-only check, split out from [`Self::validate_block`] for callers
    /// (e.g. a miner) that want to probe a nonce without touching the ledger.
    fn validate_block_pow(&self, block: &Block) -> Result<(), String>;
}

/// Owns the validator set, view/sequence counters, and the broadcast hook;
/// delegates phase transitions to an internal [`VotingManager`] (§4.8).
pub struct ConsensusManager {
    validators: Arc<ValidatorSet>,
    voting: Arc<VotingManager>,
    broadcaster: Arc<dyn Broadcaster>,
    service_provider: RwLock<Option<Arc<dyn ServiceProvider>>>,
    view_id: AtomicU64,
    sequence_id: AtomicU64,
    local_voter_id: ValidatorId,
}

impl ConsensusManager {
    pub fn new(
        cfg: ConsensusConfig,
        validators: Arc<ValidatorSet>,
        broadcaster: Arc<dyn Broadcaster>,
        observer: Arc<dyn VotingObserver>,
        local_voter_id: ValidatorId,
    ) -> Self {
        let voting_cfg = VotingConfig {
            round_timeout: cfg.round_timeout,
            ..VotingConfig::default()
        };
        let voting = Arc::new(VotingManager::new(
            validators.clone(),
            voting_cfg,
            broadcaster.clone(),
            observer,
            local_voter_id,
        ));
        Self {
            validators,
            voting,
            broadcaster,
            service_provider: RwLock::new(None),
            view_id: AtomicU64::new(0),
            sequence_id: AtomicU64::new(0),
            local_voter_id,
        }
    }

    pub fn with_service_provider(self, provider: Arc<dyn ServiceProvider>) -> Self {
        *self.service_provider.write() = Some(provider);
        self
    }

    pub fn set_service_provider(&self, provider: Arc<dyn ServiceProvider>) {
        *self.service_provider.write() = Some(provider);
    }

    pub fn voting(&self) -> &Arc<VotingManager> {
        &self.voting
    }

    pub fn validators(&self) -> &Arc<ValidatorSet> {
        &self.validators
    }

    pub fn current_view(&self) -> u64 {
        self.view_id.load(Ordering::SeqCst)
    }

    /// `proposer = validators[viewId % N]` (§9 resolved open question):
    /// the leader rotates with the view over the frozen, lexicographically
    /// ordered validator snapshot, so every honest node derives the same
    /// leader for a given view without a separate canonical-ordering pass.
    pub fn leader_for_view(&self, view_id: u64) -> Option<ValidatorId> {
        let snapshot = self.validators.snapshot();
        if snapshot.is_empty() {
            return None;
        }
        Some(snapshot[(view_id as usize) % snapshot.len()])
    }

    pub fn current_leader(&self) -> Option<ValidatorId> {
        self.leader_for_view(self.current_view())
    }

    /// Validates `block` against the configured [`ServiceProvider`] (if
    /// any), then opens a round for it at the next sequence number.
    pub fn propose_block(&self, block: Block) -> Result<(), ConsensusError> {
        if let Some(provider) = self.service_provider.read().as_ref() {
            provider.validate_block(&block).map_err(ConsensusError::Validation)?;
        }

        let sequence_id = self.sequence_id.fetch_add(1, Ordering::SeqCst) + 1;
        let view_id = self.current_view();
        self.voting.start_round(block, view_id, sequence_id)?;
        Ok(())
    }

    /// Dispatches an already-decoded consensus message to the matching
    /// voting-manager handler, or applies a view change directly.
    pub fn handle_message(&self, msg: ConsensusMessage, from: ValidatorId) -> Result<(), ConsensusError> {
        match msg {
            ConsensusMessage::PrePrepare { block_hash, height, view_id, sequence_id, block, .. } => {
                self.voting.handle_pre_prepare(block_hash, height, view_id, sequence_id, from, block)?;
            }
            ConsensusMessage::Prepare(vote) => self.voting.handle_prepare(vote, from)?,
            ConsensusMessage::Commit(vote) => self.voting.handle_commit(vote, from)?,
            ConsensusMessage::ViewChange { new_view_id, .. } => {
                self.apply_inbound_view_change(new_view_id);
            }
        }
        Ok(())
    }

    /// Wire-level entry point (§6, §13): dispatches by the message's raw
    /// `type` string, returning [`ConsensusError::UnknownMessageType`] for
    /// anything else -- this is the boundary a network transport (out of
    /// this crate's scope) would call after framing/JSON-decoding a message.
    pub fn handle_wire_message(&self, msg_type: &str, payload: &Value, from: ValidatorId) -> Result<(), ConsensusError> {
        let msg = parse_wire_message(msg_type, payload)
            .ok_or_else(|| ConsensusError::UnknownMessageType(msg_type.to_string()))?;
        self.handle_message(msg, from)
    }

    /// Inbound `ViewChange` handling: a non-increasing request is accepted
    /// syntactically and silently ignored (§4.8), unlike a locally
    /// originated [`Self::request_view_change`], which rejects it outright.
    fn apply_inbound_view_change(&self, new_view_id: u64) {
        let current = self.view_id.load(Ordering::SeqCst);
        if new_view_id > current {
            self.view_id.store(new_view_id, Ordering::SeqCst);
        }
    }

    /// Locally requests a view change: `newViewId` must strictly exceed the
    /// current view. Applies the change immediately and broadcasts it so
    /// peers converge on the same view.
    pub fn request_view_change(&self, new_view_id: u64) -> Result<(), ConsensusError> {
        let current = self.view_id.load(Ordering::SeqCst);
        if new_view_id <= current {
            return Err(ConsensusError::StaleViewChange { requested: new_view_id, current });
        }
        self.view_id.store(new_view_id, Ordering::SeqCst);

        self.broadcaster
            .broadcast(ConsensusMessage::ViewChange {
                new_view_id,
                voter_id: self.local_voter_id,
                signature: Vec::new(),
                timestamp_ns: 0,
            })
            .map_err(|_| crate::consensus::error::VotingError::BroadcastClosed.into())
    }

    /// Mutates the validator roster directly; never applied to an
    /// already-open round, whose frozen snapshot is immune to this change
    /// until the round finalizes or expires (§4.6, §4.8).
    pub fn add_validator(&self, id: ValidatorId) {
        self.validators.add(id);
    }

    pub fn remove_validator(&self, id: &ValidatorId) {
        self.validators.remove(id);
    }

    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }

    /// Registers this node and every currently connected peer as a
    /// validator (§4.8). Peer discovery itself belongs to the out-of-scope
    /// transport layer; callers pass in whatever peer set they currently
    /// know about.
    pub fn auto_register_validators<I: IntoIterator<Item = ValidatorId>>(&self, self_id: ValidatorId, peers: I) {
        self.validators.add(self_id);
        for peer in peers {
            self.validators.add(peer);
        }
    }
}

/// Parses a §6 wire envelope into a [`ConsensusMessage`], or `None` for an
/// unrecognized `type` tag.
fn parse_wire_message(msg_type: &str, payload: &Value) -> Option<ConsensusMessage> {
    match msg_type {
        "PrePrepare" => {
            let block_hash: Hash = payload.get("blockHash")?.as_str()?.parse().ok()?;
            let height = payload.get("blockHeight")?.as_i64()?;
            let view_id = payload.get("viewId")?.as_u64()?;
            let sequence_id = payload.get("sequenceId")?.as_u64()?;
            let voter_id: ValidatorId = payload.get("voterId")?.as_str()?.parse().ok()?;
            let signature = payload.get("signature").and_then(Value::as_str).map(|s| hex::decode(s).unwrap_or_default()).unwrap_or_default();
            let timestamp_ns = payload.get("timestampNs").and_then(Value::as_u64).unwrap_or(0);
            let block = match payload.get("block") {
                Some(Value::Null) | None => None,
                Some(v) => crate::block::Block::from_json(v).ok(),
            };
            Some(ConsensusMessage::PrePrepare { block_hash, height, view_id, sequence_id, voter_id, block, signature, timestamp_ns })
        }
        "Prepare" | "Commit" => {
            let vote = parse_wire_vote(payload)?;
            Some(if msg_type == "Prepare" { ConsensusMessage::Prepare(vote) } else { ConsensusMessage::Commit(vote) })
        }
        "ViewChange" => {
            let new_view_id = payload.get("newViewId")?.as_u64()?;
            let voter_id: ValidatorId = payload.get("voterId")?.as_str()?.parse().ok()?;
            let signature = payload.get("signature").and_then(Value::as_str).map(|s| hex::decode(s).unwrap_or_default()).unwrap_or_default();
            let timestamp_ns = payload.get("timestampNs").and_then(Value::as_u64).unwrap_or(0);
            Some(ConsensusMessage::ViewChange { new_view_id, voter_id, signature, timestamp_ns })
        }
        _ => None,
    }
}

fn parse_wire_vote(payload: &Value) -> Option<Vote> {
    let block_hash: Hash = payload.get("blockHash")?.as_str()?.parse().ok()?;
    let height = payload.get("blockHeight")?.as_i64()?;
    let view_id = payload.get("viewId")?.as_u64()?;
    let sequence_id = payload.get("sequenceId")?.as_u64()?;
    let voter_id: ValidatorId = payload.get("voterId")?.as_str()?.parse().ok()?;
    let vote_type = match payload.get("voteType")?.as_u64()? {
        0 => VoteType::Approve,
        _ => VoteType::Reject,
    };
    let signature = payload.get("signature").and_then(Value::as_str).map(|s| hex::decode(s).unwrap_or_default()).unwrap_or_default();
    let timestamp_ns = payload.get("timestampNs").and_then(Value::as_u64).unwrap_or(0);
    Some(Vote { block_hash, height, view_id, sequence_id, voter_id, vote_type, signature, timestamp_ns })
}
