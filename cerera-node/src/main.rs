// src/main.rs
//
// Single-process demo node: wires a `Vault`-backed `ChainService`, a
// `ValidatorSet` of one, a `LoopbackBroadcaster`, and a `ConsensusManager`
// behind a proposer loop that mints a coinbase reward into its own block
// every `block_interval`.

mod config;
mod service;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cerera_core::{
    Block, ConsensusManager, Header, Hash, InMemoryKvStore, KvStore, LoopbackBroadcaster, RoundKey, RocksDbKvStore,
    TxCommon, Transaction, Vault, VotingObserver, find_valid_nonce,
};
use config::{NodeConfig, StorageBackend};
use parking_lot::Mutex;
use service::{ChainService, genesis_block};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "cerera_node=info,cerera_core=info".to_string()))
        .init();

    if let Err(e) = run().await {
        eprintln!("fatal error: {e}");
        std::process::exit(1);
    }
}

/// Fires when a round this node proposed reaches commit quorum or expires.
///
/// `VotingObserver` only carries `(block_hash, height)`, so the observer
/// keeps the full block bodies it has proposed in `pending`, keyed by
/// hash, and hands the matching one to the chain service once it finalizes.
struct NodeObserver {
    service: Arc<ChainService>,
    pending: Arc<Mutex<HashMap<Hash, Block>>>,
}

impl VotingObserver for NodeObserver {
    fn on_commit_quorum(&self, block_hash: Hash, height: i64) {
        let block = self.pending.lock().remove(&block_hash);
        match block {
            Some(block) => match self.service.add_block(&block) {
                Ok(()) => tracing::info!(height, hash = %block_hash, "block finalized"),
                Err(e) => tracing::error!(height, hash = %block_hash, error = %e, "failed to apply finalized block"),
            },
            None => tracing::warn!(height, hash = %block_hash, "commit quorum reached for an unknown block"),
        }
    }

    fn on_round_timeout(&self, key: RoundKey, block_hash: Hash) {
        self.pending.lock().remove(&block_hash);
        tracing::warn!(height = key.height, view_id = key.view_id, hash = %block_hash, "round timed out");
    }
}

async fn run() -> Result<(), String> {
    let cfg = NodeConfig::default();

    // ---------------------------
    // Ledger
    // ---------------------------

    let kv: Arc<dyn KvStore> = match &cfg.storage {
        StorageBackend::InMemory => Arc::new(InMemoryKvStore::new()),
        StorageBackend::RocksDb(rocks_cfg) => {
            Arc::new(RocksDbKvStore::open(rocks_cfg).map_err(|e| format!("failed to open rocksdb store: {e}"))?)
        }
    };

    let vault = Vault::open(kv, cfg.ledger.clone()).map_err(|e| format!("failed to open ledger: {e}"))?;

    let (_signing_key, _pubkey, mnemonic, local_id) =
        vault.create("demo-node").map_err(|e| format!("failed to create node identity: {e}"))?;
    tracing::info!(address = %local_id, "node identity created (demo only -- mnemonic logged for recovery, never do this in production)");
    tracing::debug!(mnemonic, "node identity mnemonic");

    // ---------------------------
    // Chain service + validator set
    // ---------------------------

    let genesis = genesis_block(cfg.consensus.chain_id, local_id, &cfg.ledger);
    let service = Arc::new(ChainService::new(vault, cfg.consensus.chain_id, genesis));

    let validators = Arc::new(cerera_core::ValidatorSet::from_members([local_id]));

    // ---------------------------
    // Broadcaster + consensus manager
    // ---------------------------

    let (broadcaster, rx) = LoopbackBroadcaster::new(256);
    let broadcaster = Arc::new(broadcaster);

    let pending = Arc::new(Mutex::new(HashMap::new()));
    let observer = Arc::new(NodeObserver {
        service: service.clone(),
        pending: pending.clone(),
    });

    let manager = Arc::new(
        ConsensusManager::new(cfg.consensus.clone(), validators.clone(), broadcaster.clone(), observer, local_id)
            .with_service_provider(service.clone() as Arc<dyn cerera_core::ServiceProvider>),
    );

    // Self-dispatch loop: this single-node demo is its own only peer, so
    // every broadcast message it emits is fed straight back into its own
    // manager. A networked node would instead hand `rx` to a transport
    // that relays to peers and feeds their replies into `handle_message`.
    {
        let manager = manager.clone();
        tokio::task::spawn_blocking(move || {
            while let Ok(msg) = rx.recv() {
                if let Err(e) = manager.handle_message(msg, local_id) {
                    tracing::warn!(error = %e, "failed to handle looped-back consensus message");
                }
            }
        });
    }

    // Cleanup loop: periodically expires stale rounds (§4.7).
    {
        let manager = manager.clone();
        let interval = cerera_core::VotingConfig::default().cleanup_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                manager.voting().sweep_expired_round();
            }
        });
    }

    tracing::info!(
        chain_id = cfg.consensus.chain_id,
        block_interval_secs = cfg.block_interval.0.as_secs(),
        "starting proposer loop"
    );

    // ---------------------------
    // Proposer loop
    // ---------------------------

    loop {
        let height = service.current_height() + 1;
        let prev_hash = service.latest_hash();
        let timestamp = current_unix_timestamp();

        let reward_tx = Transaction::Coinbase(TxCommon::new(
            local_id,
            cerera_core::cer_to_units(1.0),
            height as u64,
            timestamp,
        ));

        let header = Header {
            chain_id: cfg.consensus.chain_id,
            node: local_id,
            difficulty: 1,
            height,
            prev_hash,
            timestamp,
            ..Header::default()
        };
        let mut block = Block::new(header, vec![reward_tx]);

        match find_valid_nonce(&mut block, 0, 1_000_000) {
            Ok(nonce) => {
                pending.lock().insert(block.hash, block.clone());
                match manager.propose_block(block.clone()) {
                    Ok(()) => tracing::info!(height, nonce, hash = %block.hash, "proposed block"),
                    Err(e) => {
                        pending.lock().remove(&block.hash);
                        tracing::warn!(height, error = %e, "failed to propose block");
                    }
                }
            }
            Err(e) => tracing::error!(height, error = %e, "failed to find a valid nonce"),
        }

        tokio::time::sleep(cfg.block_interval.0).await;
    }
}

fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}
