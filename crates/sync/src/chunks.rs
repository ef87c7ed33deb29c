//! In-memory header chain, partitioned into protocol-sized chunks.
//!
//! A full chunk holds 2016 consecutive raw headers in one contiguous buffer,
//! matching the difficulty-retarget boundary used by client sync protocols:
//! `chunk(i)` can be handed out verbatim as a protocol frame.

use coindexd_primitives::{bytes_to_hex, hash_to_hex, sha256d, Hash256, RAW_HEADER_LEN, ZERO_HASH};

pub const CHUNK_SIZE: usize = 2016;

const CHUNK_RAW_LEN: usize = CHUNK_SIZE * RAW_HEADER_LEN;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RangeError {
    pub index: usize,
    pub len: usize,
}

impl std::fmt::Display for RangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "index {} out of range ({} available)", self.index, self.len)
    }
}

impl std::error::Error for RangeError {}

pub struct HeaderChunks {
    chunks: Vec<Vec<u8>>,
    last_block_hash: Hash256,
}

impl Default for HeaderChunks {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderChunks {
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            last_block_hash: ZERO_HASH,
        }
    }

    pub fn push_header(&mut self, header: &[u8; RAW_HEADER_LEN]) {
        let start_new = match self.chunks.last() {
            None => true,
            Some(chunk) => chunk.len() == CHUNK_RAW_LEN,
        };
        if start_new {
            self.chunks.push(Vec::with_capacity(CHUNK_RAW_LEN));
        }
        let chunk = self.chunks.last_mut().expect("chunk just ensured");
        chunk.extend_from_slice(header);
        self.update_last_block_hash();
    }

    pub fn pop_header(&mut self) -> Option<[u8; RAW_HEADER_LEN]> {
        let chunk = self.chunks.last_mut()?;
        let split_at = chunk.len() - RAW_HEADER_LEN;
        let tail = chunk.split_off(split_at);
        let header: [u8; RAW_HEADER_LEN] = tail.as_slice().try_into().expect("header length");
        if chunk.is_empty() {
            self.chunks.pop();
        }
        self.update_last_block_hash();
        Some(header)
    }

    pub fn block_count(&self) -> usize {
        match self.chunks.split_last() {
            None => 0,
            Some((last, full)) => full.len() * CHUNK_SIZE + last.len() / RAW_HEADER_LEN,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Hex header at global index `index`.
    pub fn header(&self, index: usize) -> Result<String, RangeError> {
        let count = self.block_count();
        if index >= count {
            return Err(RangeError { index, len: count });
        }
        let chunk = &self.chunks[index / CHUNK_SIZE];
        let offset = (index % CHUNK_SIZE) * RAW_HEADER_LEN;
        Ok(bytes_to_hex(&chunk[offset..offset + RAW_HEADER_LEN]))
    }

    /// Full hex frame of chunk `index`.
    pub fn chunk(&self, index: usize) -> Result<String, RangeError> {
        let chunk = self.chunks.get(index).ok_or(RangeError {
            index,
            len: self.chunks.len(),
        })?;
        Ok(bytes_to_hex(chunk))
    }

    pub fn last_block_hash(&self) -> &Hash256 {
        &self.last_block_hash
    }

    pub fn last_block_hash_hex(&self) -> String {
        hash_to_hex(&self.last_block_hash)
    }

    fn update_last_block_hash(&mut self) {
        self.last_block_hash = match self.chunks.last() {
            None => ZERO_HASH,
            Some(chunk) => {
                let start = chunk.len() - RAW_HEADER_LEN;
                sha256d(&chunk[start..])
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(tag: u16) -> [u8; RAW_HEADER_LEN] {
        let mut out = [0u8; RAW_HEADER_LEN];
        out[0] = (tag & 0xff) as u8;
        out[1] = (tag >> 8) as u8;
        out
    }

    #[test]
    fn empty_cache() {
        let chunks = HeaderChunks::new();
        assert_eq!(chunks.block_count(), 0);
        assert_eq!(chunks.chunk_count(), 0);
        assert_eq!(chunks.last_block_hash(), &ZERO_HASH);
        assert_eq!(chunks.last_block_hash_hex(), "0".repeat(64));
        assert_eq!(chunks.header(0), Err(RangeError { index: 0, len: 0 }));
        assert_eq!(chunks.chunk(0), Err(RangeError { index: 0, len: 0 }));
    }

    #[test]
    fn push_pop_tracks_last_hash() {
        let mut chunks = HeaderChunks::new();
        chunks.push_header(&header(1));
        assert_eq!(chunks.block_count(), 1);
        assert_eq!(chunks.last_block_hash(), &sha256d(&header(1)));

        chunks.push_header(&header(2));
        assert_eq!(chunks.last_block_hash(), &sha256d(&header(2)));

        assert_eq!(chunks.pop_header(), Some(header(2)));
        assert_eq!(chunks.last_block_hash(), &sha256d(&header(1)));

        assert_eq!(chunks.pop_header(), Some(header(1)));
        assert_eq!(chunks.block_count(), 0);
        assert_eq!(chunks.last_block_hash(), &ZERO_HASH);
        assert_eq!(chunks.pop_header(), None);
    }

    #[test]
    fn chunk_boundary_at_2016() {
        let mut chunks = HeaderChunks::new();
        for tag in 0..(CHUNK_SIZE as u16 + 1) {
            chunks.push_header(&header(tag));
        }
        assert_eq!(chunks.block_count(), CHUNK_SIZE + 1);
        assert_eq!(chunks.chunk_count(), 2);
        assert_eq!(chunks.chunk(0).unwrap().len(), CHUNK_SIZE * RAW_HEADER_LEN * 2);
        assert_eq!(chunks.chunk(1).unwrap().len(), RAW_HEADER_LEN * 2);
        assert_eq!(
            chunks.header(CHUNK_SIZE).unwrap(),
            bytes_to_hex(&header(CHUNK_SIZE as u16))
        );

        // Popping back across the boundary drops the short chunk.
        assert_eq!(chunks.pop_header(), Some(header(CHUNK_SIZE as u16)));
        assert_eq!(chunks.chunk_count(), 1);
        assert_eq!(chunks.block_count(), CHUNK_SIZE);
    }

    #[test]
    fn headers_concatenate_in_order() {
        let mut chunks = HeaderChunks::new();
        for tag in 0..5 {
            chunks.push_header(&header(tag));
        }
        for tag in 0..5 {
            assert_eq!(
                chunks.header(tag as usize).unwrap(),
                bytes_to_hex(&header(tag))
            );
        }
        let frame = chunks.chunk(0).unwrap();
        assert_eq!(frame.len(), 5 * RAW_HEADER_LEN * 2);
        assert!(frame.starts_with(&bytes_to_hex(&header(0))));
    }
}
