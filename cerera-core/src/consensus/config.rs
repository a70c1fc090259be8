//! Consensus and voting configuration (§3, §4.6, §4.7).

use std::time::Duration;

/// Consensus-manager-level configuration: view/sequence bookkeeping and the
/// round timeout handed to every new round.
#[derive(Clone, Debug)]
pub struct ConsensusConfig {
    /// Chain id echoed into proposed headers.
    pub chain_id: i32,
    /// Wall-clock deadline granted to a freshly opened round before the
    /// cleanup loop expires it.
    pub round_timeout: Duration,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            round_timeout: Duration::from_secs(10),
        }
    }
}

/// [`super::voting::VotingManager`] configuration: cleanup cadence and the
/// pending-vote backlog bound.
#[derive(Clone, Debug)]
pub struct VotingConfig {
    /// Interval between cleanup-loop sweeps for expired rounds.
    pub cleanup_interval: Duration,
    /// Hard cap on total buffered pending prepare+commit votes; once
    /// exceeded, entries are evicted until usage is back under half the
    /// bound.
    pub max_pending_votes: usize,
    /// Capacity of the bounded broadcast queue backing [`super::voting::ChannelBroadcaster`].
    pub broadcast_queue_len: usize,
    /// Wall-clock deadline granted to a freshly opened round. Mirrors
    /// [`ConsensusConfig::round_timeout`]; [`super::manager::ConsensusManager`]
    /// threads its own value through when it builds the [`super::voting::VotingManager`]
    /// it owns, so this default only applies when a `VotingManager` is built
    /// standalone (e.g. in tests).
    pub round_timeout: Duration,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(5),
            max_pending_votes: 1024,
            broadcast_queue_len: 256,
            round_timeout: Duration::from_secs(10),
        }
    }
}
