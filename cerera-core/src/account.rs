//! Per-address account state and its custom binary codec (§3, §4.3).

use std::collections::BTreeMap;
use std::fmt;

use num_bigint::BigUint;
use num_traits::Zero;

use crate::bigint::{decode_biguint_be, encode_biguint_be};
use crate::hash::{ADDRESS_LEN, Address, HASH_LEN, Hash};

/// Account lifecycle status (§3). `Void` is the soft-delete marker --
/// accounts are never physically removed, only marked void.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum AccountStatus {
    New = 0,
    Active = 1,
    Void = 2,
}

impl AccountStatus {
    fn from_u8(b: u8) -> AccountStatus {
        match b {
            0 => AccountStatus::New,
            2 => AccountStatus::Void,
            _ => AccountStatus::Active,
        }
    }
}

/// Per-address account record (§3).
#[derive(Clone, Debug)]
pub struct StateAccount {
    pub address: Address,
    pub balance: BigUint,
    pub nonce: u64,
    pub code_hash: Vec<u8>,
    pub root: Hash,
    pub bloom: [u8; 10],
    pub status: AccountStatus,
    pub account_type: u8,
    pub passphrase: Hash,
    pub mpub: Vec<u8>,
    /// Per-account audit log of credits received, keyed by the crediting
    /// transaction hash. Kept as a `BTreeMap` for deterministic iteration
    /// order so binary re-encoding round-trips byte-for-byte.
    pub inputs: BTreeMap<Hash, BigUint>,
}

impl StateAccount {
    /// Creates a fresh zero-balance account with status `New`.
    pub fn new_empty(address: Address) -> Self {
        Self {
            address,
            balance: BigUint::zero(),
            nonce: 0,
            code_hash: Vec::new(),
            root: Hash::ZERO,
            bloom: [0u8; 10],
            status: AccountStatus::New,
            account_type: 0,
            passphrase: Hash::ZERO,
            mpub: Vec::new(),
            inputs: BTreeMap::new(),
        }
    }

    pub fn is_contract(&self) -> bool {
        !self.code_hash.is_empty()
    }
}

/// Errors from the account binary codec.
#[derive(Debug)]
pub enum AccountCodecError {
    UnexpectedEof,
    LengthOverflow,
    TrailingBytes,
}

impl fmt::Display for AccountCodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountCodecError::UnexpectedEof => write!(f, "unexpected end of account record"),
            AccountCodecError::LengthOverflow => {
                write!(f, "declared field length runs past end of account record")
            }
            AccountCodecError::TrailingBytes => {
                write!(f, "account record has trailing bytes after decode")
            }
        }
    }
}
impl std::error::Error for AccountCodecError {}

/// Current codec version. Streams whose first byte exceeds this are assumed
/// pre-versioned (no leading type byte) per the §4.3 compatibility rule.
pub const CODEC_VERSION_MAX: u8 = 4;

/// Encodes `account` using the field layout fixed by §4.3.
pub fn encode_account(account: &StateAccount) -> Vec<u8> {
    let mut buf = Vec::new();

    buf.push(account.account_type);
    write_len_prefixed(&mut buf, account.address.as_bytes());
    buf.extend_from_slice(account.passphrase.as_bytes());
    write_len_prefixed(&mut buf, &account.mpub);
    write_len_prefixed(&mut buf, &account.bloom);
    write_len_prefixed(&mut buf, &account.code_hash);
    buf.extend_from_slice(&account.nonce.to_le_bytes());
    buf.extend_from_slice(account.root.as_bytes());
    buf.push(account.status as u8);
    write_len_prefixed(&mut buf, &encode_biguint_be(&account.balance));

    buf.extend_from_slice(&(account.inputs.len() as u32).to_le_bytes());
    for (hash, value) in &account.inputs {
        buf.extend_from_slice(hash.as_bytes());
        write_len_prefixed(&mut buf, &encode_biguint_be(value));
    }

    buf
}

/// Decodes an account record, including the pre-version-4 fallback where a
/// stream with no type byte (first byte > [`CODEC_VERSION_MAX`]) is decoded
/// with an implicit `type = 0`.
pub fn decode_account(bytes: &[u8]) -> Result<StateAccount, AccountCodecError> {
    let mut cursor = Cursor::new(bytes);

    let first_byte = cursor.peek_u8()?;
    let account_type = if first_byte > CODEC_VERSION_MAX {
        0
    } else {
        cursor.read_u8()?
    };

    let address_bytes = cursor.read_len_prefixed()?;
    let address = Address::from_bytes(&address_bytes);

    let passphrase_bytes = cursor.read_fixed(HASH_LEN)?;
    let passphrase = Hash::from_bytes(passphrase_bytes);

    let mpub = cursor.read_len_prefixed()?.to_vec();
    let bloom_vec = cursor.read_len_prefixed()?;
    let mut bloom = [0u8; 10];
    let n = bloom_vec.len().min(10);
    bloom[..n].copy_from_slice(&bloom_vec[..n]);

    let code_hash = cursor.read_len_prefixed()?.to_vec();

    let nonce_bytes = cursor.read_fixed(8)?;
    let nonce = u64::from_le_bytes(nonce_bytes.try_into().unwrap());

    let root_bytes = cursor.read_fixed(HASH_LEN)?;
    let root = Hash::from_bytes(root_bytes);

    let status = AccountStatus::from_u8(cursor.read_u8()?);

    let balance_bytes = cursor.read_len_prefixed()?;
    let balance = decode_biguint_be(balance_bytes);

    let inputs_count_bytes = cursor.read_fixed(4)?;
    let inputs_count = u32::from_le_bytes(inputs_count_bytes.try_into().unwrap());

    let mut inputs = BTreeMap::new();
    for _ in 0..inputs_count {
        let hash_bytes = cursor.read_fixed(HASH_LEN)?;
        let hash = Hash::from_bytes(hash_bytes);
        let value_bytes = cursor.read_len_prefixed()?;
        let value = decode_biguint_be(value_bytes);
        inputs.insert(hash, value);
    }

    if !cursor.is_exhausted() {
        return Err(AccountCodecError::TrailingBytes);
    }

    Ok(StateAccount {
        address,
        balance,
        nonce,
        code_hash,
        root,
        bloom,
        status,
        account_type,
        passphrase,
        mpub,
        inputs,
    })
}

fn write_len_prefixed(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
}

/// Minimal forward-only byte cursor used by the decoder.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn is_exhausted(&self) -> bool {
        self.pos == self.bytes.len()
    }

    fn peek_u8(&self) -> Result<u8, AccountCodecError> {
        self.bytes.get(self.pos).copied().ok_or(AccountCodecError::UnexpectedEof)
    }

    fn read_u8(&mut self) -> Result<u8, AccountCodecError> {
        let b = self.peek_u8()?;
        self.pos += 1;
        Ok(b)
    }

    fn read_fixed(&mut self, n: usize) -> Result<&'a [u8], AccountCodecError> {
        if self.pos + n > self.bytes.len() {
            return Err(AccountCodecError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_len_prefixed(&mut self) -> Result<&'a [u8], AccountCodecError> {
        let len_bytes = self.read_fixed(4)?;
        let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
        if self.pos + len > self.bytes.len() {
            return Err(AccountCodecError::LengthOverflow);
        }
        self.read_fixed(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_account() -> StateAccount {
        let mut acc = StateAccount::new_empty(Address::from_bytes(&[7u8; ADDRESS_LEN]));
        acc.balance = BigUint::from(123_456_789_u64);
        acc.nonce = 42;
        acc.status = AccountStatus::Active;
        acc.mpub = vec![1, 2, 3, 4];
        acc.bloom = [9u8; 10];
        acc.inputs.insert(Hash::from_bytes(&[1u8; HASH_LEN]), BigUint::from(10u8));
        acc.inputs.insert(Hash::from_bytes(&[2u8; HASH_LEN]), BigUint::from(20u8));
        acc
    }

    #[test]
    fn encode_decode_roundtrips_every_field() {
        let acc = sample_account();
        let bytes = encode_account(&acc);
        let decoded = decode_account(&bytes).expect("decode should succeed");

        assert_eq!(decoded.address, acc.address);
        assert_eq!(decoded.balance, acc.balance);
        assert_eq!(decoded.nonce, acc.nonce);
        assert_eq!(decoded.status, acc.status);
        assert_eq!(decoded.mpub, acc.mpub);
        assert_eq!(decoded.bloom, acc.bloom);
        assert_eq!(decoded.inputs, acc.inputs);
        assert_eq!(decoded.code_hash, acc.code_hash);
    }

    #[test]
    fn system_account_has_empty_code_hash() {
        let acc = StateAccount::new_empty(Address::EMPTY);
        assert!(!acc.is_contract());
        let bytes = encode_account(&acc);
        let decoded = decode_account(&bytes).unwrap();
        assert!(!decoded.is_contract());
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let acc = sample_account();
        let mut bytes = encode_account(&acc);
        bytes.push(0xff);
        assert!(matches!(
            decode_account(&bytes),
            Err(AccountCodecError::TrailingBytes)
        ));
    }

    #[test]
    fn legacy_stream_with_no_type_byte_defaults_type_zero() {
        // A pre-version-4 stream omits the type byte entirely; its first
        // byte is the low byte of the address length prefix (ADDRESS_LEN =
        // 48 > CODEC_VERSION_MAX), so the decoder should treat it as such
        // rather than consuming it as a type tag.
        let acc = sample_account();
        let normal = encode_account(&acc);
        let legacy = normal[1..].to_vec();

        let decoded = decode_account(&legacy).expect("legacy stream should decode");
        assert_eq!(decoded.account_type, 0);
        assert_eq!(decoded.address, acc.address);
        assert_eq!(decoded.balance, acc.balance);
    }
}
