//! Consensus engine and related abstractions.
//!
//! This module provides a modular, testable consensus layer consisting of:
//!
//! - configuration parameters ([`config::ConsensusConfig`], [`config::VotingConfig`]),
//! - validator membership and per-round vote tallying ([`validator_set`]),
//! - the three-phase PrePrepare/Prepare/Commit voting state machine ([`voting`]),
//! - the top-level [`manager::ConsensusManager`] that owns membership, view
//!   bookkeeping, and the [`manager::ServiceProvider`] seam to the ledger.

pub mod config;
pub mod error;
pub mod manager;
pub mod validator_set;
pub mod voting;

pub use config::{ConsensusConfig, VotingConfig};
pub use error::{ConsensusError, VotingError};
pub use manager::{ConsensusManager, ServiceProvider};
pub use validator_set::{RoundKey, RoundPhase, RoundState, ValidatorId, ValidatorSet, Vote, VoteType, quorum_for};
pub use voting::{
    Broadcaster, BroadcastError, ChannelBroadcaster, ConsensusMessage, LoopbackBroadcaster, NoopObserver,
    VotingManager, VotingObserver, sign_bytes,
};
