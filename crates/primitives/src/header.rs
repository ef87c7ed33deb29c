//! Fixed 80-byte block header.

use crate::encoding::{DecodeError, Decoder, Encoder};
use crate::hash::{sha256d, Hash256};

pub const RAW_HEADER_LEN: usize = 80;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl Header {
    pub fn consensus_encode(&self) -> [u8; RAW_HEADER_LEN] {
        let mut encoder = Encoder::new();
        encoder.write_i32_le(self.version);
        encoder.write_hash_le(&self.prev_block);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
        let bytes = encoder.into_inner();
        let mut out = [0u8; RAW_HEADER_LEN];
        out.copy_from_slice(&bytes);
        out
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != RAW_HEADER_LEN {
            return Err(DecodeError::InvalidData("header must be 80 bytes"));
        }
        let mut decoder = Decoder::new(bytes);
        let version = decoder.read_i32_le()?;
        let prev_block = decoder.read_hash_le()?;
        let merkle_root = decoder.read_hash_le()?;
        let time = decoder.read_u32_le()?;
        let bits = decoder.read_u32_le()?;
        let nonce = decoder.read_u32_le()?;
        Ok(Self {
            version,
            prev_block,
            merkle_root,
            time,
            bits,
            nonce,
        })
    }

    pub fn hash(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }
}
