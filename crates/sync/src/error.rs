use coindexd_index::IndexError;
use coindexd_primitives::encoding::DecodeError;
use coindexd_primitives::{HexError, Network};

use crate::rpc::RpcError;

#[derive(Debug)]
pub enum SyncError {
    Rpc(RpcError),
    Index(IndexError),
    Decode(DecodeError),
    Hex(HexError),
    NetworkMismatch {
        configured: Network,
        node_testnet: bool,
    },
    OutOfSync(&'static str),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Rpc(err) => write!(f, "rpc: {err}"),
            SyncError::Index(err) => write!(f, "index: {err}"),
            SyncError::Decode(err) => write!(f, "decode: {err}"),
            SyncError::Hex(err) => write!(f, "hex: {err}"),
            SyncError::NetworkMismatch {
                configured,
                node_testnet,
            } => write!(
                f,
                "node network mismatch: configured {} but node testnet flag is {}",
                configured.as_str(),
                node_testnet
            ),
            SyncError::OutOfSync(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<RpcError> for SyncError {
    fn from(err: RpcError) -> Self {
        SyncError::Rpc(err)
    }
}

impl From<IndexError> for SyncError {
    fn from(err: IndexError) -> Self {
        SyncError::Index(err)
    }
}

impl From<DecodeError> for SyncError {
    fn from(err: DecodeError) -> Self {
        SyncError::Decode(err)
    }
}

impl From<HexError> for SyncError {
    fn from(err: HexError) -> Self {
        SyncError::Hex(err)
    }
}
