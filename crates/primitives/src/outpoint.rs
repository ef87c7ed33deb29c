//! Transaction outpoint type: the coin coordinate.

use crate::encoding::{DecodeError, Decoder, Encoder};
use crate::hash::Hash256;

pub const OUTPOINT_KEY_LEN: usize = 36;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OutPoint {
    pub hash: Hash256,
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: Hash256, index: u32) -> Self {
        Self { hash, index }
    }

    pub fn null() -> Self {
        Self {
            hash: [0u8; 32],
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.hash == [0u8; 32] && self.index == u32::MAX
    }

    /// Fixed-width storage key: txid followed by the output index.
    pub fn key_bytes(&self) -> [u8; OUTPOINT_KEY_LEN] {
        let mut key = [0u8; OUTPOINT_KEY_LEN];
        key[..32].copy_from_slice(&self.hash);
        key[32..].copy_from_slice(&self.index.to_le_bytes());
        key
    }

    pub fn from_key_bytes(key: &[u8]) -> Option<Self> {
        if key.len() != OUTPOINT_KEY_LEN {
            return None;
        }
        let hash: Hash256 = key[..32].try_into().ok()?;
        let index = u32::from_le_bytes(key[32..].try_into().ok()?);
        Some(Self { hash, index })
    }

    pub fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash_le(&self.hash);
        encoder.write_u32_le(self.index);
    }

    pub fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let hash = decoder.read_hash_le()?;
        let index = decoder.read_u32_le()?;
        Ok(Self { hash, index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_roundtrip() {
        let outpoint = OutPoint::new([7u8; 32], 42);
        let key = outpoint.key_bytes();
        assert_eq!(OutPoint::from_key_bytes(&key), Some(outpoint));
        assert_eq!(OutPoint::from_key_bytes(&key[..35]), None);
    }

    #[test]
    fn null_outpoint() {
        assert!(OutPoint::null().is_null());
        assert!(!OutPoint::new([1u8; 32], 0).is_null());
    }
}
