//! Transaction tagged union: `Transfer | Coinbase | Faucet`.
//!
//! All three variants share a common field set (`TxCommon`); the variant
//! tag alone distinguishes their intent to the ledger (value transfer,
//! block-reward mint, faucet mint). The canonical digest excludes the
//! signature, so unsigned (`Coinbase`/`Faucet`) and signed (`Transfer`)
//! transactions hash the same way.

use std::fmt;

use ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use num_bigint::BigUint;
use num_traits::Zero;
use p256::ecdsa::{Signature as P256Signature, SigningKey, VerifyingKey};
use serde_json::{Value, json};

use crate::bigint::{from_decimal_string, to_decimal_string};
use crate::hash::{ADDRESS_LEN, Address, Hash};

/// Maximum length in bytes of the `dna` tag (§3).
pub const MAX_DNA_LEN: usize = 128;

/// Discriminates the three transaction variants and their wire type code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxKind {
    Transfer,
    Coinbase,
    Faucet,
}

impl TxKind {
    /// Wire type code used in the JSON `type` discriminator (§6).
    pub fn type_code(self) -> u64 {
        match self {
            TxKind::Transfer => 0,
            TxKind::Coinbase => 1,
            TxKind::Faucet => 2,
        }
    }

    pub fn from_type_code(code: u64) -> Option<TxKind> {
        match code {
            0 => Some(TxKind::Transfer),
            1 => Some(TxKind::Coinbase),
            2 => Some(TxKind::Faucet),
            _ => None,
        }
    }

    /// Unsigned variants mint directly; they are never signed by a wallet.
    pub fn is_unsigned(self) -> bool {
        matches!(self, TxKind::Coinbase | TxKind::Faucet)
    }
}

/// Detached ECDSA P-256 signature with a recovery hint.
///
/// `v` does not carry a 1-bit recovery id as in the textbook scheme; it
/// carries the raw uncompressed SEC1 public-key point bytes, encoded as a
/// big integer. Recovery is therefore "decode `v` back into a public key
/// and verify `(r, s)` against it", rather than true EC point recovery --
/// this mirrors the source's framing of `v` as "64 bytes of `r||s` followed
/// by the raw public point bytes".
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxSignature {
    pub r: BigUint,
    pub s: BigUint,
    pub v: BigUint,
}

/// Fields shared by every transaction variant (§3).
#[derive(Clone, Debug)]
pub struct TxCommon {
    pub nonce: u64,
    pub gas_price: BigUint,
    pub gas: u64,
    pub to: Address,
    pub value: BigUint,
    pub data: Vec<u8>,
    pub payload: Vec<u8>,
    pub dna: Vec<u8>,
    pub time: u64,
    pub signature: Option<TxSignature>,
    /// Cached canonical digest, populated on first [`Transaction::hash`] call.
    pub hash: Option<Hash>,
    /// Cached serialized JSON size in bytes.
    pub size: Option<u64>,
    /// Cached sender address, populated on first successful [`Transaction::sender`].
    pub from: Option<Address>,
}

impl TxCommon {
    pub fn new(to: Address, value: BigUint, nonce: u64, time: u64) -> Self {
        Self {
            nonce,
            gas_price: BigUint::zero(),
            gas: 0,
            to,
            value,
            data: Vec::new(),
            payload: Vec::new(),
            dna: Vec::new(),
            time,
            signature: None,
            hash: None,
            size: None,
            from: None,
        }
    }
}

/// Tagged transaction union (§3, §4.2).
#[derive(Clone, Debug)]
pub enum Transaction {
    Transfer(TxCommon),
    Coinbase(TxCommon),
    Faucet(TxCommon),
}

/// Failure modes for transaction signing, verification, and codec operations.
#[derive(Debug)]
pub enum TxError {
    InvalidSignatureLen,
    InvalidRecoveryId,
    InvalidTxType(u64),
    UnsupportedType,
    BadKey,
    InvalidSignature,
    DnaTooLong(usize),
    MissingField(&'static str),
    HashMismatch,
    Codec(String),
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxError::InvalidSignatureLen => write!(f, "invalid signature length"),
            TxError::InvalidRecoveryId => write!(f, "invalid recovery hint in signature.v"),
            TxError::InvalidTxType(t) => write!(f, "invalid transaction type code {t}"),
            TxError::UnsupportedType => write!(f, "operation unsupported for this transaction type"),
            TxError::BadKey => write!(f, "bad signing key"),
            TxError::InvalidSignature => write!(f, "signature verification failed"),
            TxError::DnaTooLong(n) => write!(f, "dna field is {n} bytes, exceeds {MAX_DNA_LEN}"),
            TxError::MissingField(name) => write!(f, "missing required field `{name}`"),
            TxError::HashMismatch => write!(f, "unmarshaled hash does not match recomputed digest"),
            TxError::Codec(msg) => write!(f, "transaction codec error: {msg}"),
        }
    }
}
impl std::error::Error for TxError {}

impl Transaction {
    pub fn kind(&self) -> TxKind {
        match self {
            Transaction::Transfer(_) => TxKind::Transfer,
            Transaction::Coinbase(_) => TxKind::Coinbase,
            Transaction::Faucet(_) => TxKind::Faucet,
        }
    }

    pub fn common(&self) -> &TxCommon {
        match self {
            Transaction::Transfer(c) | Transaction::Coinbase(c) | Transaction::Faucet(c) => c,
        }
    }

    pub fn common_mut(&mut self) -> &mut TxCommon {
        match self {
            Transaction::Transfer(c) | Transaction::Coinbase(c) | Transaction::Faucet(c) => c,
        }
    }

    /// Recomputes the canonical digest (§4.2), ignoring any cache.
    ///
    /// Concatenation order: `data, dna, value.bytes(), nonce(LE,16),
    /// to(48), gasPrice.bytes(), gas(LE,16), time(binary)`. Signature
    /// fields are never part of the digest.
    pub fn canonical_digest(&self) -> Hash {
        let c = self.common();
        let mut buf = Vec::with_capacity(c.data.len() + c.dna.len() + 64 + ADDRESS_LEN + 32);

        buf.extend_from_slice(&c.data);
        buf.extend_from_slice(&c.dna);
        buf.extend_from_slice(&crate::bigint::encode_biguint_be(&c.value));

        let mut nonce_le = [0u8; 16];
        nonce_le[..8].copy_from_slice(&c.nonce.to_le_bytes());
        buf.extend_from_slice(&nonce_le);

        buf.extend_from_slice(c.to.as_bytes());
        buf.extend_from_slice(&crate::bigint::encode_biguint_be(&c.gas_price));

        let mut gas_le = [0u8; 16];
        gas_le[..8].copy_from_slice(&c.gas.to_le_bytes());
        buf.extend_from_slice(&gas_le);

        // "binary-marshaled" timestamp: 8-byte little-endian unix seconds.
        buf.extend_from_slice(&c.time.to_le_bytes());

        Hash::blake2b256(&buf)
    }

    /// Returns the cached hash, computing and caching it if absent.
    pub fn hash(&mut self) -> Hash {
        if let Some(h) = self.common().hash {
            return h;
        }
        let h = self.canonical_digest();
        self.common_mut().hash = Some(h);
        h
    }

    /// Signs the transaction with `signer`, storing `(r, s, v)` on success.
    ///
    /// Fails with [`TxError::UnsupportedType`] for unsigned variants
    /// (`Coinbase`/`Faucet`), which are minted directly by the ledger.
    pub fn sign(&mut self, signer: &SigningKey) -> Result<(), TxError> {
        if self.kind().is_unsigned() {
            return Err(TxError::UnsupportedType);
        }
        if self.common().dna.len() > MAX_DNA_LEN {
            return Err(TxError::DnaTooLong(self.common().dna.len()));
        }

        let digest = self.hash();
        let prehash = Hash::blake2b256(digest.as_bytes());

        let sig: P256Signature = signer
            .sign_prehash(prehash.as_bytes())
            .map_err(|_| TxError::BadKey)?;
        let (r, s) = sig.split_scalars();

        let verifying_key = VerifyingKey::from(signer);
        let pubkey_bytes = verifying_key.to_encoded_point(false).as_bytes().to_vec();

        self.common_mut().signature = Some(TxSignature {
            r: BigUint::from_bytes_be(&r.to_bytes()),
            s: BigUint::from_bytes_be(&s.to_bytes()),
            v: BigUint::from_bytes_be(&pubkey_bytes),
        });
        Ok(())
    }

    /// Recovers and caches the sender address from the attached signature.
    ///
    /// The public key is decoded directly out of `v` (see [`TxSignature`]),
    /// then `(r, s)` is verified against it before deriving the address via
    /// [`Address::from_public_key`].
    pub fn sender(&mut self) -> Result<Address, TxError> {
        if let Some(from) = self.common().from {
            return Ok(from);
        }
        if self.kind().is_unsigned() {
            return Err(TxError::UnsupportedType);
        }

        let digest = self.hash();
        let prehash = Hash::blake2b256(digest.as_bytes());

        let sig_bytes = {
            let sig = self
                .common()
                .signature
                .as_ref()
                .ok_or(TxError::InvalidSignature)?;
            let pubkey_bytes = sig.v.to_bytes_be();
            if pubkey_bytes.len() != 65 || pubkey_bytes[0] != 0x04 {
                return Err(TxError::InvalidRecoveryId);
            }

            let verifying_key =
                VerifyingKey::from_sec1_bytes(&pubkey_bytes).map_err(|_| TxError::InvalidRecoveryId)?;

            let r_bytes = sig.r.to_bytes_be();
            let s_bytes = sig.s.to_bytes_be();
            if r_bytes.len() > 32 || s_bytes.len() > 32 {
                return Err(TxError::InvalidSignatureLen);
            }

            let mut r_buf = [0u8; 32];
            r_buf[32 - r_bytes.len()..].copy_from_slice(&r_bytes);
            let mut s_buf = [0u8; 32];
            s_buf[32 - s_bytes.len()..].copy_from_slice(&s_bytes);

            let p256_sig = P256Signature::from_scalars(r_buf, s_buf)
                .map_err(|_| TxError::InvalidSignature)?;

            verifying_key
                .verify_prehash(prehash.as_bytes(), &p256_sig)
                .map_err(|_| TxError::InvalidSignature)?;

            pubkey_bytes
        };

        let address = Address::from_public_key(&sig_bytes);
        self.common_mut().from = Some(address);
        Ok(address)
    }

    /// Serializes this transaction to its JSON wire form (§6).
    ///
    /// Monetary fields are decimal strings; byte fields and hashes are
    /// `0x`-prefixed hex. Unsigned variants omit `r`/`s`/`v`.
    pub fn to_json(&mut self) -> Value {
        let hash = self.hash();
        let c = self.common();
        let mut obj = serde_json::Map::new();

        obj.insert("hash".into(), json!(hash.to_string()));
        obj.insert("type".into(), json!(self.kind().type_code()));
        obj.insert("to".into(), json!(c.to.to_string()));
        obj.insert(
            "time".into(),
            json!(
                chrono::DateTime::<chrono::Utc>::from_timestamp(c.time as i64, 0)
                    .unwrap_or_default()
                    .to_rfc3339()
            ),
        );
        obj.insert("nonce".into(), json!(c.nonce));
        obj.insert("gas".into(), json!(c.gas));
        obj.insert("gasPrice".into(), json!(to_decimal_string(&c.gas_price)));
        obj.insert("value".into(), json!(to_decimal_string(&c.value)));
        obj.insert("input".into(), json!(format!("0x{}", hex::encode(&c.data))));
        obj.insert(
            "payload".into(),
            json!(format!("0x{}", hex::encode(&c.payload))),
        );
        obj.insert("dna".into(), json!(format!("0x{}", hex::encode(&c.dna))));

        if let Some(sig) = &c.signature {
            obj.insert("r".into(), json!(to_decimal_string(&sig.r)));
            obj.insert("s".into(), json!(to_decimal_string(&sig.s)));
            obj.insert("v".into(), json!(to_decimal_string(&sig.v)));
        }

        Value::Object(obj)
    }

    /// Parses a transaction from its JSON wire form, discriminated by `type`.
    ///
    /// `Transfer` requires `nonce, gas, gasPrice, value, r, s, v` (and the
    /// common fields); `Coinbase`/`Faucet` make those optional.
    pub fn from_json(v: &Value) -> Result<Transaction, TxError> {
        let obj = v.as_object().ok_or(TxError::Codec("not a JSON object".into()))?;

        let type_code = obj
            .get("type")
            .and_then(Value::as_u64)
            .ok_or(TxError::MissingField("type"))?;
        let kind = TxKind::from_type_code(type_code).ok_or(TxError::InvalidTxType(type_code))?;

        let to = obj
            .get("to")
            .and_then(Value::as_str)
            .ok_or(TxError::MissingField("to"))?;
        let to = Address::from_hex(to).map_err(|e| TxError::Codec(e.to_string()))?;

        let time = obj
            .get("time")
            .and_then(Value::as_str)
            .ok_or(TxError::MissingField("time"))?;
        let time = chrono::DateTime::parse_from_rfc3339(time)
            .map_err(|e| TxError::Codec(e.to_string()))?
            .timestamp() as u64;

        let sig_required = !kind.is_unsigned();

        let nonce = read_u64_field(obj, "nonce", true)?.unwrap_or(0);
        let gas = read_u64_field(obj, "gas", true)?.unwrap_or(0);
        let gas_price = read_decimal_field(obj, "gasPrice", true)?.unwrap_or_else(BigUint::zero);
        let value = read_decimal_field(obj, "value", true)?.unwrap_or_else(BigUint::zero);
        let data = read_hex_field(obj, "input", false)?.unwrap_or_default();
        let payload = read_hex_field(obj, "payload", false)?.unwrap_or_default();
        let dna = read_hex_field(obj, "dna", false)?.unwrap_or_default();
        if dna.len() > MAX_DNA_LEN {
            return Err(TxError::DnaTooLong(dna.len()));
        }

        let signature = match (
            read_decimal_field(obj, "r", sig_required)?,
            read_decimal_field(obj, "s", sig_required)?,
            read_decimal_field(obj, "v", sig_required)?,
        ) {
            (Some(r), Some(s), Some(vv)) => Some(TxSignature { r, s, v: vv }),
            (None, None, None) => None,
            _ => return Err(TxError::MissingField("r/s/v")),
        };

        let mut common = TxCommon {
            nonce,
            gas_price,
            gas,
            to,
            value,
            data,
            payload,
            dna,
            time,
            signature,
            hash: None,
            size: None,
            from: None,
        };

        let declared_hash = obj
            .get("hash")
            .and_then(Value::as_str)
            .ok_or(TxError::MissingField("hash"))?;
        let declared_hash: Hash = declared_hash
            .parse()
            .map_err(|e: crate::hash::HexParseError| TxError::Codec(e.to_string()))?;

        let bytes_len = serde_json::to_vec(v).map(|b| b.len() as u64).unwrap_or(0);
        common.size = Some(bytes_len);

        let mut tx = match kind {
            TxKind::Transfer => Transaction::Transfer(common),
            TxKind::Coinbase => Transaction::Coinbase(common),
            TxKind::Faucet => Transaction::Faucet(common),
        };

        let recomputed = tx.hash();
        if recomputed != declared_hash {
            return Err(TxError::HashMismatch);
        }

        Ok(tx)
    }
}

fn read_u64_field(
    obj: &serde_json::Map<String, Value>,
    name: &'static str,
    required: bool,
) -> Result<Option<u64>, TxError> {
    match obj.get(name) {
        Some(v) => v.as_u64().map(Some).ok_or(TxError::Codec(format!("{name} not a u64"))),
        None if required => Err(TxError::MissingField(name)),
        None => Ok(None),
    }
}

fn read_decimal_field(
    obj: &serde_json::Map<String, Value>,
    name: &'static str,
    required: bool,
) -> Result<Option<BigUint>, TxError> {
    match obj.get(name).and_then(Value::as_str) {
        Some(s) => from_decimal_string(s).map(Some).map_err(|e| TxError::Codec(e.to_string())),
        None if required => Err(TxError::MissingField(name)),
        None => Ok(None),
    }
}

fn read_hex_field(
    obj: &serde_json::Map<String, Value>,
    name: &'static str,
    required: bool,
) -> Result<Option<Vec<u8>>, TxError> {
    match obj.get(name).and_then(Value::as_str) {
        Some(s) => {
            let stripped = s.strip_prefix("0x").unwrap_or(s);
            hex::decode(stripped).map(Some).map_err(|e| TxError::Codec(e.to_string()))
        }
        None if required => Err(TxError::MissingField(name)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    fn dummy_addr(byte: u8) -> Address {
        Address::from_bytes(&[byte; ADDRESS_LEN])
    }

    #[test]
    fn unsigned_variants_reject_signing_and_sender() {
        let mut tx = Transaction::Coinbase(TxCommon::new(dummy_addr(1), BigUint::from(10u8), 0, 0));
        let key = SigningKey::random(&mut OsRng);
        assert!(matches!(tx.sign(&key), Err(TxError::UnsupportedType)));
        assert!(matches!(tx.sender(), Err(TxError::UnsupportedType)));
    }

    #[test]
    fn sign_and_recover_sender_roundtrips() {
        let key = SigningKey::random(&mut OsRng);
        let verifying = VerifyingKey::from(&key);
        let expected_addr =
            Address::from_public_key(verifying.to_encoded_point(false).as_bytes());

        let mut tx = Transaction::Transfer(TxCommon::new(dummy_addr(2), BigUint::from(500u32), 1, 1_700_000_000));
        tx.sign(&key).expect("sign should succeed");

        let recovered = tx.sender().expect("sender recovery should succeed");
        assert_eq!(recovered, expected_addr);
    }

    #[test]
    fn hash_excludes_signature_fields() {
        let key = SigningKey::random(&mut OsRng);
        let mut tx = Transaction::Transfer(TxCommon::new(dummy_addr(3), BigUint::from(1u8), 0, 0));
        let unsigned_hash = tx.hash();

        tx.common_mut().hash = None; // force recompute after signing
        tx.sign(&key).expect("sign");
        let signed_hash = tx.canonical_digest();

        assert_eq!(unsigned_hash, signed_hash);
    }

    #[test]
    fn json_roundtrip_preserves_hash_and_sender() {
        let key = SigningKey::random(&mut OsRng);
        let mut tx = Transaction::Transfer(TxCommon::new(dummy_addr(4), BigUint::from(42u32), 3, 1_700_000_050));
        tx.sign(&key).expect("sign");
        let original_hash = tx.hash();
        let original_sender = tx.sender().expect("sender");

        let json = tx.to_json();
        let mut decoded = Transaction::from_json(&json).expect("from_json");

        assert_eq!(decoded.hash(), original_hash);
        assert_eq!(decoded.sender().expect("sender"), original_sender);
    }

    #[test]
    fn dna_over_max_len_is_rejected_on_sign() {
        let key = SigningKey::random(&mut OsRng);
        let mut tx = Transaction::Transfer(TxCommon::new(dummy_addr(5), BigUint::from(1u8), 0, 0));
        tx.common_mut().dna = vec![0u8; MAX_DNA_LEN + 1];
        assert!(matches!(tx.sign(&key), Err(TxError::DnaTooLong(_))));
    }
}
