//! Core library crate for the `cerera` permissioned chain node.
//!
//! This crate provides the building blocks a validator node is assembled
//! from:
//!
//! - hashing and addressing primitives (`hash`),
//! - the transaction tagged union and its wire codec (`types`),
//! - account state and its binary codec (`account`),
//! - arbitrary-precision money helpers (`bigint`),
//! - blocks, headers, and proof-of-work (`block`),
//! - the ledger ("vault") that applies finalized transactions (`ledger`),
//! - and a modular three-phase BFT consensus layer (`consensus`).
//!
//! A binary crate composes these into a running node: wiring a
//! [`consensus::ServiceProvider`] over a [`ledger::Vault`] and driving
//! [`consensus::ConsensusManager`] from a proposer loop and a network
//! transport, neither of which live in this crate.

pub mod account;
pub mod bigint;
pub mod block;
pub mod consensus;
pub mod hash;
pub mod ledger;
pub mod types;

// Re-export hashing/addressing primitives at the crate root.
pub use hash::{ADDRESS_LEN, Address, HASH_LEN, Hash, HexParseError};

// Re-export the transaction tagged union.
pub use types::{Transaction, TxCommon, TxError, TxKind, TxSignature};

// Re-export account state and its codec.
pub use account::{AccountCodecError, AccountStatus, CODEC_VERSION_MAX, StateAccount, decode_account, encode_account};

// Re-export money helpers.
pub use bigint::{BigIntParseError, CER_SCALE, cer_to_units, units_to_cer};

// Re-export block/header/PoW types.
pub use block::{Block, BlockError, Header, HeaderEncoding, PowError, find_valid_nonce, is_valid_pow};

// Re-export the ledger and its storage backends.
pub use ledger::{InMemoryKvStore, KvStore, LedgerConfig, LedgerError, RocksDbConfig, RocksDbKvStore, StorageError, Vault};

// Re-export the consensus layer.
pub use consensus::{
    Broadcaster, BroadcastError, ChannelBroadcaster, ConsensusConfig, ConsensusError, ConsensusManager,
    ConsensusMessage, LoopbackBroadcaster, NoopObserver, RoundKey, RoundPhase, RoundState, ServiceProvider,
    ValidatorId, ValidatorSet, Vote, VoteType, VotingConfig, VotingError, VotingManager, VotingObserver, quorum_for,
    sign_bytes,
};
