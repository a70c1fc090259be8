//! Consensus and voting error taxonomy (§4.7, §4.8, §7).

use std::fmt;

/// Errors surfaced by the [`super::voting::VotingManager`].
#[derive(Debug)]
pub enum VotingError {
    /// A round is already active and has not expired.
    RoundAlreadyActive,
    /// The sender is not a member of the current validator set.
    NotAValidator,
    /// A `PrePrepare` carried no block, or its embedded hash disagreed with
    /// the block it wrapped.
    MalformedPrePrepare,
    /// Broadcasting a message failed because the outbound queue is closed.
    BroadcastClosed,
}

impl fmt::Display for VotingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VotingError::RoundAlreadyActive => write!(f, "a round is already active"),
            VotingError::NotAValidator => write!(f, "sender is not a validator"),
            VotingError::MalformedPrePrepare => write!(f, "malformed PrePrepare message"),
            VotingError::BroadcastClosed => write!(f, "broadcast channel is closed"),
        }
    }
}
impl std::error::Error for VotingError {}

/// Errors surfaced by the [`super::manager::ConsensusManager`].
#[derive(Debug)]
pub enum ConsensusError {
    /// The configured [`super::manager::ServiceProvider`] rejected the block.
    Validation(String),
    /// The voting manager rejected the round start/message.
    Voting(VotingError),
    /// A view-change request did not advance the view counter.
    StaleViewChange { requested: u64, current: u64 },
    /// `HandleConsensusMessage` was given a message type it does not recognize.
    UnknownMessageType(String),
}

impl From<VotingError> for ConsensusError {
    fn from(e: VotingError) -> Self {
        ConsensusError::Voting(e)
    }
}

impl fmt::Display for ConsensusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusError::Validation(msg) => write!(f, "block rejected: {msg}"),
            ConsensusError::Voting(e) => write!(f, "{e}"),
            ConsensusError::StaleViewChange { requested, current } => write!(
                f,
                "view change to {requested} rejected: current view is {current}"
            ),
            ConsensusError::UnknownMessageType(t) => write!(f, "unknown consensus message type `{t}`"),
        }
    }
}
impl std::error::Error for ConsensusError {}
