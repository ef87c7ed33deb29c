//! Core hashing, encoding, and transaction parsing for the indexer.

pub mod encoding;
pub mod hash;
pub mod header;
pub mod hex;
pub mod merkle;
pub mod network;
pub mod outpoint;
pub mod transaction;

pub use hash::{hash160, sha256, sha256d, Hash256, ZERO_HASH};
pub use header::{Header, RAW_HEADER_LEN};
pub use hex::{bytes_to_hex, hash_from_hex, hash_to_hex, hex_to_bytes, HexError};
pub use merkle::{merkle_branch, merkle_root};
pub use network::Network;
pub use outpoint::OutPoint;
pub use transaction::{Transaction, TxIn, TxOut};
