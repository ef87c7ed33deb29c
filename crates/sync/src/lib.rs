//! Blockchain synchronizer: reconciles the local header/coin index with a
//! trusted node, overlays the unconfirmed mempool view, and publishes
//! `newHeight` / `touchedAddress` events.

pub mod chunks;
pub mod error;
pub mod events;
pub mod mempool;
pub mod rpc;
mod sync;

pub use chunks::{HeaderChunks, RangeError, CHUNK_SIZE};
pub use error::SyncError;
pub use events::{ChainEventSink, Publisher};
pub use mempool::MempoolView;
pub use rpc::{BlockInfo, NodeClient, NodeInfo, NodeRpc, RpcError};
pub use sync::{BlockTx, FullBlock, MerkleProof, Synchronizer};
