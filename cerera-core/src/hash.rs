//! Fixed-width content hashes and checksummed addresses.
//!
//! [`Hash`] is the 32-byte content digest used throughout the chain
//! (transaction hashes, block hashes, account roots). [`Address`] is the
//! 48-byte value identifying accounts, derived from a public key via a
//! one-way blake2b-based map.

use std::fmt;
use std::str::FromStr;

use blake2::Blake2b512;
use blake2::Digest;

/// Length in bytes of a [`Hash`].
pub const HASH_LEN: usize = 32;
/// Length in bytes of an [`Address`].
pub const ADDRESS_LEN: usize = 48;

/// Fixed 32-byte opaque content hash with lexicographic ordering.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Serialize, serde::Deserialize)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    /// All-zero hash, used as the genesis block's `prevHash`.
    pub const ZERO: Hash = Hash([0u8; HASH_LEN]);

    /// Computes the blake2b-256 digest of `data`.
    ///
    /// Implemented as the first 32 bytes of blake2b-512, the crate's only
    /// available output width; all callers treat this as "blake2b-256".
    pub fn blake2b256(data: &[u8]) -> Hash {
        let mut hasher = Blake2b512::new();
        hasher.update(data);
        let out = hasher.finalize();
        let mut buf = [0u8; HASH_LEN];
        buf.copy_from_slice(&out[..HASH_LEN]);
        Hash(buf)
    }

    /// Left-pads (or truncates leading bytes of) `b` to exactly [`HASH_LEN`] bytes.
    ///
    /// Mirrors the source's `BytesToHash`: shorter inputs are zero-padded on
    /// the left, longer inputs are truncated by dropping their leading bytes.
    pub fn from_bytes(b: &[u8]) -> Hash {
        let mut buf = [0u8; HASH_LEN];
        if b.len() >= HASH_LEN {
            buf.copy_from_slice(&b[b.len() - HASH_LEN..]);
        } else {
            buf[HASH_LEN - b.len()..].copy_from_slice(b);
        }
        Hash(buf)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Parse error for [`Hash`]/[`Address`] hex parsing.
#[derive(Debug)]
pub struct HexParseError(pub String);

impl fmt::Display for HexParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid hex: {}", self.0)
    }
}
impl std::error::Error for HexParseError {}

impl FromStr for Hash {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex_padded(s)?;
        Ok(Hash::from_bytes(&bytes))
    }
}

/// Fixed 48-byte address, displayed as checksummed hex.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Serialize, serde::Deserialize)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// The empty (all-zero) address, e.g. unset `to` fields.
    pub const EMPTY: Address = Address([0u8; ADDRESS_LEN]);

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; ADDRESS_LEN]
    }

    /// Left-pads/truncates `b` to exactly [`ADDRESS_LEN`] bytes, mirroring [`Hash::from_bytes`].
    pub fn from_bytes(b: &[u8]) -> Address {
        let mut buf = [0u8; ADDRESS_LEN];
        if b.len() >= ADDRESS_LEN {
            buf.copy_from_slice(&b[b.len() - ADDRESS_LEN..]);
        } else {
            buf[ADDRESS_LEN - b.len()..].copy_from_slice(b);
        }
        Address(buf)
    }

    /// Derives an address from a public key's raw (SEC1) byte encoding.
    ///
    /// One-way map: blake2b-512 of the public key bytes, keeping the last
    /// [`ADDRESS_LEN`] bytes of the 64-byte digest. Deterministic and
    /// idempotent for a given input.
    pub fn from_public_key(pubkey_bytes: &[u8]) -> Address {
        let mut hasher = Blake2b512::new();
        hasher.update(pubkey_bytes);
        let digest = hasher.finalize();
        Address::from_bytes(&digest[digest.len() - ADDRESS_LEN..])
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Parses a hex address string, accepting an optional `0x` prefix.
    ///
    /// Odd-length input is left-padded with one `0` nibble before decoding,
    /// mirroring the source's `HexToAddress`.
    pub fn from_hex(s: &str) -> Result<Address, HexParseError> {
        let bytes = decode_hex_padded(s)?;
        Ok(Address::from_bytes(&bytes))
    }

    /// Renders this address as checksummed hex (no `0x` prefix).
    ///
    /// Computes blake2b-512 over the first 4 raw address bytes; for each hex
    /// digit at index >= 4 in the unchecksummed lowercase hex string, the
    /// digit is uppercased iff the corresponding nibble of the digest is > 7.
    pub fn checksum_hex(&self) -> String {
        let unchecksummed = hex::encode(self.0);
        let mut hasher = Blake2b512::new();
        hasher.update(&self.0[0..4]);
        let digest = hasher.finalize();

        unchecksummed
            .char_indices()
            .map(|(i, c)| {
                if i < 4 || !c.is_ascii_alphabetic() {
                    return c;
                }
                let nibble_index = i - 4;
                let byte = digest[nibble_index / 2];
                let nibble = if nibble_index % 2 == 0 {
                    byte >> 4
                } else {
                    byte & 0x0f
                };
                if nibble > 7 {
                    c.to_ascii_uppercase()
                } else {
                    c.to_ascii_lowercase()
                }
            })
            .collect()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.checksum_hex())
    }
}

impl FromStr for Address {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_hex(s)
    }
}

/// Decodes a hex string (optional `0x` prefix, left-padded if odd length).
fn decode_hex_padded(s: &str) -> Result<Vec<u8>, HexParseError> {
    let stripped = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    let padded;
    let even = if stripped.len() % 2 != 0 {
        padded = format!("0{stripped}");
        padded.as_str()
    } else {
        stripped
    };
    hex::decode(even).map_err(|e| HexParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_from_bytes_pads_and_truncates() {
        let short = Hash::from_bytes(&[1, 2, 3]);
        assert_eq!(&short.0[HASH_LEN - 3..], &[1, 2, 3]);
        assert!(short.0[..HASH_LEN - 3].iter().all(|&b| b == 0));

        let long: Vec<u8> = (0..40u8).collect();
        let truncated = Hash::from_bytes(&long);
        assert_eq!(truncated.0.len(), HASH_LEN);
        assert_eq!(truncated.0[0], 8); // first 8 bytes (40-32) dropped
    }

    #[test]
    fn hash_display_roundtrips_through_fromstr() {
        let h = Hash::blake2b256(b"hello");
        let s = h.to_string();
        let parsed: Hash = s.parse().unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn address_from_hex_accepts_prefix_and_odd_length() {
        let a1 = Address::from_hex("0x1").unwrap();
        let a2 = Address::from_hex("01").unwrap();
        assert_eq!(a1, a2);
    }

    #[test]
    fn address_derivation_is_deterministic() {
        let pk = b"some-public-key-bytes";
        let a1 = Address::from_public_key(pk);
        let a2 = Address::from_public_key(pk);
        assert_eq!(a1, a2);
    }

    #[test]
    fn checksum_hex_preserves_first_four_chars_and_is_case_consistent() {
        let addr = Address::from_public_key(b"checksum-test");
        let checksummed = addr.checksum_hex();
        let unchecksummed = hex::encode(addr.0);
        assert_eq!(&checksummed[..4], &unchecksummed[..4]);
        assert_eq!(checksummed.to_lowercase(), unchecksummed);
    }
}
