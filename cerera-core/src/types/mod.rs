//! Core domain types shared across the chain.
//!
//! This module re-exports [`Hash`](crate::hash::Hash) and
//! [`Address`](crate::hash::Address) at the crate's `types` path for callers
//! that think in terms of "domain types" rather than primitives, and hosts
//! the transaction tagged union (`tx`).

pub mod tx;

pub use crate::hash::{ADDRESS_LEN, Address, HASH_LEN, Hash, HexParseError};
pub use tx::{Transaction, TxCommon, TxError, TxKind, TxSignature};
