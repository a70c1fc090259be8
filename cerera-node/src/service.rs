//! In-process [`ServiceProvider`] backed by a [`Vault`] and a simple
//! in-memory block index.
//!
//! It owns chain membership (which block is the tip, what `height` maps
//! to what block) and applies a finalized block's transactions to the
//! ledger.

use std::collections::HashMap;
use std::sync::Arc;

use cerera_core::{Address, Block, Hash, HeaderEncoding, LedgerConfig, ServiceProvider, Transaction, Vault, is_valid_pow};
use parking_lot::Mutex;

struct ChainIndex {
    by_height: HashMap<i64, Hash>,
    by_hash: HashMap<Hash, Block>,
    tip_height: i64,
    tip_hash: Hash,
}

/// Wires a [`Vault`] and an in-memory block index behind the
/// [`ServiceProvider`] seam the consensus manager validates and applies
/// proposed blocks through.
pub struct ChainService {
    vault: Vault,
    chain_id: i32,
    index: Mutex<ChainIndex>,
}

impl ChainService {
    /// Builds the service over `vault` and seeds the index with `genesis`.
    pub fn new(vault: Vault, chain_id: i32, mut genesis: Block) -> Self {
        genesis.refresh_hash();
        let genesis_hash = genesis.hash;
        let genesis_height = genesis.header.height;

        let mut by_height = HashMap::new();
        by_height.insert(genesis_height, genesis_hash);
        let mut by_hash = HashMap::new();
        by_hash.insert(genesis_hash, genesis);

        Self {
            vault,
            chain_id,
            index: Mutex::new(ChainIndex {
                by_height,
                by_hash,
                tip_height: genesis_height,
                tip_hash: genesis_hash,
            }),
        }
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }
}

/// Applies one already-finalized transaction's effect to `vault`.
///
/// Transaction application is intentionally lenient about sender recovery
/// failures for `Coinbase`/`Faucet` (they are never signed, §4.2) but
/// requires it for `Transfer`.
fn apply_transaction(vault: &Vault, block_height: i64, tx: &mut Transaction) -> Result<(), String> {
    let tx_hash = tx.hash();
    match tx.kind() {
        cerera_core::TxKind::Transfer => {
            let from = tx.sender().map_err(|e| format!("height {block_height}: cannot recover sender: {e}"))?;
            let to = tx.common().to;
            let value = tx.common().value.clone();
            vault.update_balance(&from, &to, &value, tx_hash).map_err(|e| e.to_string())
        }
        cerera_core::TxKind::Coinbase => {
            let to = tx.common().to;
            let value = tx.common().value.clone();
            vault.reward_miner(&to, &value, tx_hash).map_err(|e| e.to_string())
        }
        cerera_core::TxKind::Faucet => {
            let to = tx.common().to;
            let value = tx.common().value.clone();
            vault.drop_faucet(&to, &value, tx_hash).map_err(|e| e.to_string())
        }
    }
}

impl ServiceProvider for ChainService {
    fn validate_block(&self, block: &Block) -> Result<(), String> {
        self.validate_block_pow(block)?;

        if block.header.chain_id != self.chain_id {
            return Err(format!(
                "chain id mismatch: block has {}, expected {}",
                block.header.chain_id, self.chain_id
            ));
        }

        let index = self.index.lock();
        if block.header.prev_hash != index.tip_hash {
            return Err(format!(
                "prev_hash mismatch: block points at {}, current tip is {}",
                block.header.prev_hash, index.tip_hash
            ));
        }
        if block.header.height != index.tip_height + 1 {
            return Err(format!(
                "non-contiguous height: block is {}, expected {}",
                block.header.height,
                index.tip_height + 1
            ));
        }
        Ok(())
    }

    fn validate_block_pow(&self, block: &Block) -> Result<(), String> {
        let recomputed = block.compute_hash(HeaderEncoding::Legacy);
        if recomputed != block.hash {
            return Err("block hash does not match its header and transactions".to_string());
        }
        match is_valid_pow(&block.hash, block.header.difficulty) {
            Ok(true) => Ok(()),
            Ok(false) => Err("block hash does not satisfy the proof-of-work target".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    fn add_block(&self, block: &Block) -> Result<(), String> {
        let mut applied = block.clone();
        for tx in &mut applied.transactions {
            apply_transaction(&self.vault, block.header.height, tx)?;
        }

        let mut index = self.index.lock();
        index.by_height.insert(block.header.height, block.hash);
        index.by_hash.insert(block.hash, applied);
        index.tip_height = block.header.height;
        index.tip_hash = block.hash;
        Ok(())
    }

    fn genesis_hash(&self) -> Hash {
        self.index
            .lock()
            .by_height
            .get(&0)
            .copied()
            .unwrap_or(Hash::ZERO)
    }

    fn current_height(&self) -> i64 {
        self.index.lock().tip_height
    }

    fn latest_hash(&self) -> Hash {
        self.index.lock().tip_hash
    }

    fn chain_id(&self) -> i32 {
        self.chain_id
    }

    fn block_by_height(&self, height: i64) -> Option<Block> {
        let index = self.index.lock();
        let hash = index.by_height.get(&height)?;
        index.by_hash.get(hash).cloned()
    }

    fn block_by_hash(&self, hash: &Hash) -> Option<Block> {
        self.index.lock().by_hash.get(hash).cloned()
    }
}

/// Builds the genesis block for a fresh chain: height 0, zero `prev_hash`,
/// no transactions, and `node` set to the root address so the block's
/// provenance is traceable even though no reward was minted for it.
pub fn genesis_block(chain_id: i32, root: Address, _ledger_cfg: &LedgerConfig) -> Block {
    let header = cerera_core::Header {
        chain_id,
        node: root,
        difficulty: 1,
        height: 0,
        timestamp: 0,
        ..cerera_core::Header::default()
    };
    Block::new(header, Vec::new())
}

pub type SharedChainService = Arc<ChainService>;
