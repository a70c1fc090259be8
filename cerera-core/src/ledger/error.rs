//! Ledger error taxonomy (§4.5, §7).

use num_bigint::BigUint;

use crate::account::AccountCodecError;
use crate::hash::Address;
use crate::ledger::kv::StorageError;

#[derive(Debug)]
pub enum LedgerError {
    AddressAlreadyExists,
    GenerationFailure(String),
    MnemonicEmpty,
    AccountNotFound,
    WrongPassphrase,
    InvalidAmount,
    AccountMissing(Address),
    InsufficientBalance { available: BigUint, requested: BigUint },
    SupplyCapExceeded { requested: BigUint, current: BigUint, cap: BigUint },
    FaucetCooldown { address: Address, retry_after_secs: u64 },
    FaucetAmountOutOfBounds { requested: BigUint, min: BigUint, max: BigUint },
    Storage(StorageError),
    Codec(AccountCodecError),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::AddressAlreadyExists => write!(f, "generated address already in use"),
            LedgerError::GenerationFailure(msg) => write!(f, "key generation failed: {msg}"),
            LedgerError::MnemonicEmpty => write!(f, "mnemonic must not be empty"),
            LedgerError::AccountNotFound => write!(f, "no account matches the given mnemonic"),
            LedgerError::WrongPassphrase => write!(f, "wrong passphrase"),
            LedgerError::InvalidAmount => write!(f, "amount must be greater than zero"),
            LedgerError::AccountMissing(addr) => write!(f, "account {addr} does not exist"),
            LedgerError::InsufficientBalance { available, requested } => write!(
                f,
                "insufficient balance: available {available}, requested {requested}"
            ),
            LedgerError::SupplyCapExceeded { requested, current, cap } => write!(
                f,
                "supply cap exceeded: requested {requested}, current supply {current}, cap {cap}"
            ),
            LedgerError::FaucetCooldown { address, retry_after_secs } => write!(
                f,
                "faucet cooldown active for {address}, retry in {retry_after_secs}s"
            ),
            LedgerError::FaucetAmountOutOfBounds { requested, min, max } => write!(
                f,
                "faucet amount {requested} out of bounds [{min}, {max}]"
            ),
            LedgerError::Storage(e) => write!(f, "{e}"),
            LedgerError::Codec(e) => write!(f, "{e}"),
        }
    }
}
impl std::error::Error for LedgerError {}

impl From<StorageError> for LedgerError {
    fn from(e: StorageError) -> Self {
        LedgerError::Storage(e)
    }
}
impl From<AccountCodecError> for LedgerError {
    fn from(e: AccountCodecError) -> Self {
        LedgerError::Codec(e)
    }
}
