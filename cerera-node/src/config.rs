//! Top-level configuration for a runnable node.
//!
//! Aggregates configuration for:
//!
//! - consensus parameters (`ConsensusConfig`),
//! - the ledger (supply/faucet constants, `LedgerConfig`),
//! - persistent storage (RocksDB path, or an in-memory demo backend),
//! - the proposer loop's block interval.

use std::time::Duration;

use cerera_core::{ConsensusConfig, LedgerConfig, RocksDbConfig};

/// Selects the ledger's backing key-value store.
#[derive(Clone, Debug)]
pub enum StorageBackend {
    /// Volatile, in-process storage; convenient for local demos and tests.
    InMemory,
    /// RocksDB-backed persistent storage.
    RocksDb(RocksDbConfig),
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::InMemory
    }
}

/// Top-level configuration for a node process.
///
/// Higher-level entry points construct this from defaults, a config file,
/// or environment variables as needed; `main.rs` currently just uses
/// defaults.
#[derive(Clone, Debug, Default)]
pub struct NodeConfig {
    pub consensus: ConsensusConfig,
    pub ledger: LedgerConfig,
    pub storage: StorageBackend,
    /// Interval between proposer-loop attempts.
    pub block_interval: BlockInterval,
}

/// Newtype so `Default` can express a sensible demo cadence without
/// hand-writing a `Default` impl for the whole [`NodeConfig`].
#[derive(Clone, Copy, Debug)]
pub struct BlockInterval(pub Duration);

impl Default for BlockInterval {
    fn default() -> Self {
        BlockInterval(Duration::from_secs(5))
    }
}
