//! Address-centric coin index and header log.
//!
//! The [`IndexStore`] trait is the complete persistence contract consumed by
//! the synchronizer; [`KvIndexStore`] implements it over any ordered
//! key-value backend.

pub mod coin;
mod kv;

use coindexd_primitives::{Hash256, OutPoint, RAW_HEADER_LEN};
use coindexd_storage::StoreError;

pub use coin::Coin;
pub use kv::KvIndexStore;

#[derive(Debug)]
pub enum IndexError {
    Store(StoreError),
    Corrupt(&'static str),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::Store(err) => write!(f, "{err}"),
            IndexError::Corrupt(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for IndexError {}

impl From<StoreError> for IndexError {
    fn from(err: StoreError) -> Self {
        IndexError::Store(err)
    }
}

/// Persistence contract for the coin index and the header log.
///
/// Writes carry at-least-once semantics; idempotence at the coin-identity
/// level (`(txid, index)`) is the caller's responsibility. `all_headers`
/// returns a gap-free sequence in height order.
pub trait IndexStore: Send + Sync {
    /// Prepare schema/collections. Safe to call more than once.
    fn initialize(&self) -> Result<(), IndexError>;

    fn push_header(&self, header: &[u8; RAW_HEADER_LEN], height: u32) -> Result<(), IndexError>;
    fn pop_header(&self) -> Result<Option<[u8; RAW_HEADER_LEN]>, IndexError>;
    fn all_headers(&self) -> Result<Vec<[u8; RAW_HEADER_LEN]>, IndexError>;

    /// Owning address of a stored coin, or `None` when the outpoint is not
    /// indexed (unknown prevouts, coinbase inputs).
    fn address_of(&self, outpoint: &OutPoint) -> Result<Option<String>, IndexError>;

    /// Insert an unspent coin.
    fn add_coin(
        &self,
        address: &str,
        outpoint: &OutPoint,
        value: i64,
        height: u32,
    ) -> Result<(), IndexError>;

    /// Inverse of `add_coin`. Removing an absent coin is a no-op.
    fn remove_coin(&self, outpoint: &OutPoint) -> Result<(), IndexError>;

    /// Mark a coin spent. The row must exist.
    fn set_spent(
        &self,
        outpoint: &OutPoint,
        spending_txid: &Hash256,
        height: u32,
    ) -> Result<(), IndexError>;

    /// Inverse of `set_spent`, leaving the row in place.
    fn set_unspent(&self, outpoint: &OutPoint) -> Result<(), IndexError>;

    fn coins(&self, address: &str) -> Result<Vec<Coin>, IndexError>;
}
