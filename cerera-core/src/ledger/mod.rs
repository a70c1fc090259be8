//! The ledger ("vault"): account map, supply accounting, persistence,
//! and contract-side storage (§4.5).

pub mod error;
pub mod kv;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use num_bigint::BigUint;
use num_traits::Zero;
use p256::ecdsa::{SigningKey, VerifyingKey};
use parking_lot::{Mutex, RwLock};
use rand_core::OsRng;

pub use error::LedgerError;
pub use kv::{InMemoryKvStore, KvStore, RocksDbConfig, RocksDbKvStore, StorageError};

use crate::account::{decode_account, encode_account, AccountStatus, StateAccount};
use crate::hash::{ADDRESS_LEN, Address, Hash};

/// Supply and faucet constants (§6, in smallest units).
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub total_cap: BigUint,
    pub faucet_initial: BigUint,
    pub block_reward: BigUint,
    pub faucet_min_amount: BigUint,
    pub faucet_max_amount: BigUint,
    pub faucet_cooldown: Duration,
    pub root_address: Address,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            total_cap: BigUint::from(10u64).pow(18),
            faucet_initial: BigUint::from(10u64).pow(17),
            block_reward: BigUint::from(10u64).pow(16),
            faucet_min_amount: BigUint::from(1u64),
            faucet_max_amount: BigUint::from(10u64).pow(17),
            faucet_cooldown: Duration::from_secs(3600),
            root_address: Address::EMPTY,
        }
    }
}

const CODE_PREFIX: &[u8] = b"code:";
const STORAGE_PREFIX: &[u8] = b"storage:";
const MNEMONIC_PREFIX: &[u8] = b"mnemonic:";

/// Account-keyed ledger with supply-cap enforcement and KV-backed persistence.
///
/// Reads take the accounts map's shared lock; writes take the exclusive
/// lock and hold it across the matching KV write(s), so the in-memory and
/// on-disk views are equal by the time any mutating call returns (§4.5
/// invariant: "in-memory and on-disk views are equal after any externally
/// visible mutation returns").
pub struct Vault {
    accounts: RwLock<HashMap<Address, StateAccount>>,
    kv: Arc<dyn KvStore>,
    cfg: LedgerConfig,
    faucet_last_drop: Mutex<HashMap<Address, Instant>>,
}

impl Vault {
    /// Opens the ledger: syncs the in-memory map from `kv`, skipping (and
    /// warning on) undecodable records, then ensures the root account exists.
    pub fn open(kv: Arc<dyn KvStore>, cfg: LedgerConfig) -> Result<Vault, LedgerError> {
        let mut accounts = HashMap::new();

        for (key, value) in kv.iter()? {
            if key.len() != ADDRESS_LEN {
                continue; // "code:"/"storage:"/"mnemonic:" entries, not accounts
            }
            match decode_account(&value) {
                Ok(account) => {
                    accounts.insert(account.address, account);
                }
                Err(e) => {
                    tracing::warn!(key = %hex::encode(&key), error = %e, "skipping undecodable account record during ledger sync");
                }
            }
        }

        let vault = Vault {
            accounts: RwLock::new(accounts),
            kv,
            cfg,
            faucet_last_drop: Mutex::new(HashMap::new()),
        };

        vault.ensure_root_account()?;
        Ok(vault)
    }

    fn ensure_root_account(&self) -> Result<(), LedgerError> {
        let root = self.cfg.root_address;
        if root.is_empty() {
            return Ok(());
        }
        let exists = self.accounts.read().contains_key(&root);
        if !exists {
            let account = StateAccount::new_empty(root);
            self.persist_account(&account)?;
            self.accounts.write().insert(root, account);
        }
        Ok(())
    }

    fn persist_account(&self, account: &StateAccount) -> Result<(), LedgerError> {
        let bytes = encode_account(account);
        self.kv.put(account.address.as_bytes(), &bytes)?;
        Ok(())
    }

    /// Returns a clone of the stored account, if any.
    pub fn get(&self, address: &Address) -> Option<StateAccount> {
        self.accounts.read().get(address).cloned()
    }

    /// `sum(balance)` across every known account; used by [`Self::check_supply_limit`].
    pub fn total_supply(&self) -> BigUint {
        self.accounts.read().values().map(|a| a.balance.clone()).sum()
    }

    /// `sum(balance) + amount <= total_cap`, else a descriptive
    /// [`LedgerError::SupplyCapExceeded`].
    pub fn check_supply_limit(&self, amount: &BigUint) -> Result<(), LedgerError> {
        let current = self.total_supply();
        if &current + amount > self.cfg.total_cap {
            return Err(LedgerError::SupplyCapExceeded {
                requested: amount.clone(),
                current,
                cap: self.cfg.total_cap.clone(),
            });
        }
        Ok(())
    }

    /// Generates a fresh keypair and a zero-balance, status-`New` account.
    ///
    /// Retries on address collision (exceedingly unlikely given the
    /// derivation's 48-byte output space); a persistent collision across
    /// `max_attempts` tries surfaces [`LedgerError::AddressAlreadyExists`].
    pub fn create(&self, pass: &str) -> Result<(SigningKey, Vec<u8>, String, Address), LedgerError> {
        const MAX_ATTEMPTS: u32 = 8;

        for _ in 0..MAX_ATTEMPTS {
            let signing_key = SigningKey::random(&mut OsRng);
            let verifying_key = VerifyingKey::from(&signing_key);
            let pubkey_bytes = verifying_key.to_encoded_point(false).as_bytes().to_vec();
            let address = Address::from_public_key(&pubkey_bytes);

            if self.accounts.read().contains_key(&address) {
                continue;
            }

            let mnemonic = generate_mnemonic();
            let mnemonic_key = mnemonic_index_key(&mnemonic);
            if self.kv.get(&mnemonic_key)?.is_some() {
                continue;
            }

            let mut account = StateAccount::new_empty(address);
            account.passphrase = Hash::blake2b256(pass.as_bytes());
            account.mpub = pubkey_bytes.clone();
            account.status = AccountStatus::Active;

            self.persist_account(&account)?;
            self.kv.put(&mnemonic_key, address.as_bytes())?;
            self.accounts.write().insert(address, account);

            return Ok((signing_key, pubkey_bytes, mnemonic, address));
        }

        Err(LedgerError::AddressAlreadyExists)
    }

    /// Recovers an address from a mnemonic, keyed through the index written
    /// in [`Self::create`]; mnemonic/BIP32 derivation itself is an
    /// out-of-scope external collaborator here, so this ledger treats the
    /// mnemonic as an opaque recovery secret rather than re-deriving a
    /// full HD wallet from it.
    pub fn restore(&self, mnemonic: &str, pass: &str) -> Result<(Address, SigningKey), LedgerError> {
        if mnemonic.trim().is_empty() {
            return Err(LedgerError::MnemonicEmpty);
        }

        let mnemonic_key = mnemonic_index_key(mnemonic);
        let address_bytes = self.kv.get(&mnemonic_key)?.ok_or(LedgerError::AccountNotFound)?;
        let address = Address::from_bytes(&address_bytes);

        let account = self.get(&address).ok_or(LedgerError::AccountNotFound)?;
        if account.passphrase != Hash::blake2b256(pass.as_bytes()) {
            return Err(LedgerError::WrongPassphrase);
        }

        let signing_key = derive_signing_key_from_mnemonic(mnemonic);
        Ok((address, signing_key))
    }

    /// Transfers `amount` from `from` to `to`, creating `to` lazily if
    /// absent. Atomic from the caller's point of view: both balances and
    /// `to`'s `inputs` entry are updated, then both accounts persisted,
    /// before the write lock is released.
    pub fn update_balance(
        &self,
        from: &Address,
        to: &Address,
        amount: &BigUint,
        tx_hash: Hash,
    ) -> Result<(), LedgerError> {
        if amount.is_zero() {
            return Ok(()); // no-op per §4.5
        }

        let mut accounts = self.accounts.write();

        let from_balance = {
            let from_account = accounts.get(from).ok_or(LedgerError::AccountMissing(*from))?;
            from_account.balance.clone()
        };
        if from_balance < *amount {
            return Err(LedgerError::InsufficientBalance {
                available: from_balance,
                requested: amount.clone(),
            });
        }

        accounts
            .entry(*to)
            .or_insert_with(|| StateAccount::new_empty(*to));

        {
            let from_account = accounts.get_mut(from).expect("checked above");
            from_account.balance -= amount;
        }
        {
            let to_account = accounts.get_mut(to).expect("just inserted or existing");
            to_account.balance += amount;
            to_account.inputs.insert(tx_hash, amount.clone());
        }

        let from_snapshot = accounts.get(from).unwrap().clone();
        let to_snapshot = accounts.get(to).unwrap().clone();

        self.persist_account(&from_snapshot)?;
        self.persist_account(&to_snapshot)?;
        Ok(())
    }

    /// Credit-only mint for the block proposer's reward, subject to the
    /// supply cap.
    pub fn reward_miner(&self, to: &Address, amount: &BigUint, tx_hash: Hash) -> Result<(), LedgerError> {
        self.mint(to, amount, tx_hash)
    }

    /// Credit-only mint from the system faucet, subject to the supply cap,
    /// a per-address cooldown, and min/max amount bounds.
    pub fn drop_faucet(&self, to: &Address, amount: &BigUint, tx_hash: Hash) -> Result<(), LedgerError> {
        if *amount < self.cfg.faucet_min_amount || *amount > self.cfg.faucet_max_amount {
            return Err(LedgerError::FaucetAmountOutOfBounds {
                requested: amount.clone(),
                min: self.cfg.faucet_min_amount.clone(),
                max: self.cfg.faucet_max_amount.clone(),
            });
        }

        {
            let mut last_drop = self.faucet_last_drop.lock();
            if let Some(last) = last_drop.get(to) {
                let elapsed = last.elapsed();
                if elapsed < self.cfg.faucet_cooldown {
                    return Err(LedgerError::FaucetCooldown {
                        address: *to,
                        retry_after_secs: (self.cfg.faucet_cooldown - elapsed).as_secs(),
                    });
                }
            }
            last_drop.insert(*to, Instant::now());
        }

        self.mint(to, amount, tx_hash)
    }

    fn mint(&self, to: &Address, amount: &BigUint, tx_hash: Hash) -> Result<(), LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount);
        }
        self.check_supply_limit(amount)?;

        let mut accounts = self.accounts.write();
        let account = accounts.entry(*to).or_insert_with(|| StateAccount::new_empty(*to));
        account.balance += amount;
        account.inputs.insert(tx_hash, amount.clone());
        let snapshot = account.clone();

        self.persist_account(&snapshot)
    }

    /// Sweeps faucet cooldown entries older than `2 * faucet_cooldown`, per
    /// §4.5's maintenance-task requirement to bound the table's memory.
    pub fn sweep_faucet_cooldowns(&self) {
        let bound = self.cfg.faucet_cooldown * 2;
        self.faucet_last_drop.lock().retain(|_, last| last.elapsed() < bound);
    }

    /// Hashes `code` with blake2b-256, stores it under `"code:"+addr`, and
    /// sets `account.codeHash`.
    pub fn store_contract_code(&self, addr: &Address, code: &[u8]) -> Result<(), LedgerError> {
        let code_hash = Hash::blake2b256(code);
        self.kv.put(&code_key(addr), code)?;

        let mut accounts = self.accounts.write();
        let account = accounts.get_mut(addr).ok_or(LedgerError::AccountMissing(*addr))?;
        account.code_hash = code_hash.as_bytes().to_vec();
        let snapshot = account.clone();

        self.persist_account(&snapshot)
    }

    /// Writes a 32-byte big-endian storage slot under `"storage:"+addr+":"+key`.
    ///
    /// In-memory-only ledgers (§4.5) still accept the write through the
    /// `kv` trait object; callers that want the "never persists" behavior
    /// should back the vault with an [`InMemoryKvStore`] explicitly.
    pub fn set_storage(&self, addr: &Address, key: &BigUint, value: &BigUint) -> Result<(), LedgerError> {
        let key_bytes = big_endian_32(key);
        let value_bytes = big_endian_32(value);
        self.kv.put(&storage_key(addr, &key_bytes), &value_bytes)?;
        Ok(())
    }

    /// Reads a storage slot; a missing key reads as zero.
    pub fn get_storage(&self, addr: &Address, key: &BigUint) -> Result<BigUint, LedgerError> {
        let key_bytes = big_endian_32(key);
        match self.kv.get(&storage_key(addr, &key_bytes))? {
            Some(bytes) => Ok(BigUint::from_bytes_be(&bytes)),
            None => Ok(BigUint::zero()),
        }
    }
}

fn code_key(addr: &Address) -> Vec<u8> {
    let mut key = CODE_PREFIX.to_vec();
    key.extend_from_slice(addr.as_bytes());
    key
}

fn storage_key(addr: &Address, slot_key: &[u8; 32]) -> Vec<u8> {
    let mut key = STORAGE_PREFIX.to_vec();
    key.extend_from_slice(addr.as_bytes());
    key.push(b':');
    key.extend_from_slice(slot_key);
    key
}

fn mnemonic_index_key(mnemonic: &str) -> Vec<u8> {
    let mut key = MNEMONIC_PREFIX.to_vec();
    key.extend_from_slice(Hash::blake2b256(mnemonic.as_bytes()).as_bytes());
    key
}

fn big_endian_32(value: &BigUint) -> [u8; 32] {
    let bytes = value.to_bytes_be();
    let mut buf = [0u8; 32];
    let n = bytes.len().min(32);
    buf[32 - n..].copy_from_slice(&bytes[bytes.len() - n..]);
    buf
}

/// Placeholder mnemonic generator: the real BIP39 wordlist/derivation
/// belongs to the out-of-scope mnemonic/BIP32 wrapper (§1); this produces a
/// syntactically mnemonic-shaped, uniquely-recoverable secret in its place.
fn generate_mnemonic() -> String {
    use rand::Rng;
    const WORDS: &[&str] = &[
        "anchor", "basalt", "cedar", "delta", "ember", "fossil", "granite", "harbor", "indigo",
        "jasper", "karst", "lumen", "marble", "nectar", "opal", "pebble", "quartz", "ridge",
        "summit", "talus", "umber", "vertex", "willow", "zephyr",
    ];
    let mut rng = rand::thread_rng();
    (0..12)
        .map(|_| WORDS[rng.gen_range(0..WORDS.len())])
        .collect::<Vec<_>>()
        .join(" ")
}

fn derive_signing_key_from_mnemonic(mnemonic: &str) -> SigningKey {
    let seed = Hash::blake2b256(mnemonic.as_bytes());
    SigningKey::from_slice(seed.as_bytes().as_slice()).unwrap_or_else(|_| SigningKey::random(&mut OsRng))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault(cap: u64) -> Vault {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let cfg = LedgerConfig {
            total_cap: BigUint::from(cap),
            ..LedgerConfig::default()
        };
        Vault::open(kv, cfg).expect("open vault")
    }

    fn addr(byte: u8) -> Address {
        Address::from_bytes(&[byte; ADDRESS_LEN])
    }

    #[test]
    fn supply_cap_rejects_minting_past_the_cap() {
        let vault = test_vault(100);
        let x = addr(1);
        let y = addr(2);

        vault.reward_miner(&x, &BigUint::from(60u8), Hash::from_bytes(&[1; 32])).unwrap();
        let err = vault
            .reward_miner(&y, &BigUint::from(50u8), Hash::from_bytes(&[2; 32]))
            .unwrap_err();
        assert!(matches!(err, LedgerError::SupplyCapExceeded { .. }));
        assert_eq!(vault.total_supply(), BigUint::from(60u8));
    }

    #[test]
    fn update_balance_preserves_total_supply() {
        let vault = test_vault(1_000_000);
        let a = addr(1);
        let b = addr(2);

        vault.reward_miner(&a, &BigUint::from(1000u32), Hash::from_bytes(&[1; 32])).unwrap();
        let before = vault.total_supply();

        vault
            .update_balance(&a, &b, &BigUint::from(400u32), Hash::from_bytes(&[2; 32]))
            .unwrap();

        assert_eq!(vault.total_supply(), before);
        assert_eq!(vault.get(&a).unwrap().balance, BigUint::from(600u32));
        assert_eq!(vault.get(&b).unwrap().balance, BigUint::from(400u32));
    }

    #[test]
    fn update_balance_rejects_insufficient_funds() {
        let vault = test_vault(1_000_000);
        let a = addr(1);
        let b = addr(2);
        vault.reward_miner(&a, &BigUint::from(10u32), Hash::from_bytes(&[1; 32])).unwrap();

        let err = vault
            .update_balance(&a, &b, &BigUint::from(999u32), Hash::from_bytes(&[2; 32]))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    }

    #[test]
    fn update_balance_requires_existing_from_account() {
        let vault = test_vault(1_000_000);
        let err = vault
            .update_balance(&addr(9), &addr(10), &BigUint::from(1u32), Hash::from_bytes(&[1; 32]))
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountMissing(_)));
    }

    #[test]
    fn update_balance_is_noop_for_nonpositive_amount() {
        let vault = test_vault(1_000_000);
        let a = addr(1);
        vault.reward_miner(&a, &BigUint::from(10u32), Hash::from_bytes(&[1; 32])).unwrap();
        vault
            .update_balance(&a, &addr(2), &BigUint::zero(), Hash::from_bytes(&[2; 32]))
            .unwrap();
        assert_eq!(vault.get(&a).unwrap().balance, BigUint::from(10u32));
        assert!(vault.get(&addr(2)).is_none());
    }

    #[test]
    fn faucet_enforces_cooldown_per_address() {
        let vault = test_vault(1_000_000);
        let x = addr(1);
        let y = addr(2);

        vault.drop_faucet(&x, &BigUint::from(10u32), Hash::from_bytes(&[1; 32])).unwrap();
        let err = vault
            .drop_faucet(&x, &BigUint::from(10u32), Hash::from_bytes(&[2; 32]))
            .unwrap_err();
        assert!(matches!(err, LedgerError::FaucetCooldown { .. }));

        // A different address is unaffected by x's cooldown.
        vault.drop_faucet(&y, &BigUint::from(10u32), Hash::from_bytes(&[3; 32])).unwrap();
    }

    #[test]
    fn faucet_rejects_amount_out_of_bounds() {
        let mut cfg = LedgerConfig::default();
        cfg.total_cap = BigUint::from(1_000_000u64);
        cfg.faucet_max_amount = BigUint::from(5u64);
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let vault = Vault::open(kv, cfg).unwrap();

        let err = vault
            .drop_faucet(&addr(1), &BigUint::from(6u32), Hash::from_bytes(&[1; 32]))
            .unwrap_err();
        assert!(matches!(err, LedgerError::FaucetAmountOutOfBounds { .. }));
    }

    #[test]
    fn create_and_restore_roundtrips_through_mnemonic() {
        let vault = test_vault(1_000_000);
        let (_, _, mnemonic, address) = vault.create("hunter2").unwrap();

        let (restored_addr, _signing_key) = vault.restore(&mnemonic, "hunter2").unwrap();
        assert_eq!(restored_addr, address);
    }

    #[test]
    fn restore_rejects_wrong_passphrase() {
        let vault = test_vault(1_000_000);
        let (_, _, mnemonic, _address) = vault.create("correct-horse").unwrap();

        let err = vault.restore(&mnemonic, "wrong-horse").unwrap_err();
        assert!(matches!(err, LedgerError::WrongPassphrase));
    }

    #[test]
    fn restore_rejects_empty_mnemonic() {
        let vault = test_vault(1_000_000);
        let err = vault.restore("   ", "pass").unwrap_err();
        assert!(matches!(err, LedgerError::MnemonicEmpty));
    }

    #[test]
    fn contract_code_and_storage_roundtrip() {
        let vault = test_vault(1_000_000);
        let (_, _, _, address) = vault.create("pass").unwrap();

        vault.store_contract_code(&address, b"\x60\x00\x60\x00").unwrap();
        assert!(vault.get(&address).unwrap().is_contract());

        let key = BigUint::from(7u32);
        assert_eq!(vault.get_storage(&address, &key).unwrap(), BigUint::zero());

        vault.set_storage(&address, &key, &BigUint::from(99u32)).unwrap();
        assert_eq!(vault.get_storage(&address, &key).unwrap(), BigUint::from(99u32));
    }
}
