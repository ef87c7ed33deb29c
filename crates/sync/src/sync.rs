//! Catch-up state machine, block import/revert, and query overlay.

use std::collections::BTreeSet;
use std::time::Instant;

use coindexd_index::{Coin, IndexStore};
use coindexd_log::{log_debug, log_info};
use coindexd_primitives::{
    hash_from_hex, hash_to_hex, hex_to_bytes, sha256d, Hash256, Header, Network, OutPoint,
    Transaction, ZERO_HASH,
};
use coindexd_script::script_to_address;
use tokio::sync::watch;

use crate::chunks::{HeaderChunks, RangeError};
use crate::error::SyncError;
use crate::events::{ChainEventSink, Publisher};
use crate::mempool::MempoolView;
use crate::rpc::{NodeRpc, RpcError};

#[derive(Clone, Debug)]
pub struct BlockTx {
    pub txid: Hash256,
    pub tx: Transaction,
}

/// Block metadata plus its parsed transactions, in block order.
#[derive(Clone, Debug)]
pub struct FullBlock {
    pub hash: String,
    pub height: u32,
    pub prev_hash: String,
    pub header: Header,
    pub txs: Vec<BlockTx>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MerkleProof {
    pub branch: Vec<String>,
    pub pos: i32,
}

pub struct Synchronizer<R, S> {
    rpc: R,
    store: S,
    network: Network,
    chunks: HeaderChunks,
    mempool: MempoolView,
    publisher: Publisher,
    shutdown: watch::Receiver<bool>,
}

impl<R: NodeRpc, S: IndexStore> Synchronizer<R, S> {
    pub fn new(rpc: R, store: S, network: Network, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            rpc,
            store,
            network,
            chunks: HeaderChunks::new(),
            mempool: MempoolView::new(),
            publisher: Publisher::new(),
            shutdown,
        }
    }

    /// Register an event sink. Sinks must be in place before `initialize`
    /// returns; emission is synchronous and in registration order.
    pub fn subscribe(&mut self, sink: Box<dyn ChainEventSink>) {
        self.publisher.subscribe(sink);
    }

    /// Verify the node network, prepare storage, and mirror the persisted
    /// header log into the chunk cache.
    pub async fn initialize(&mut self) -> Result<(), SyncError> {
        let info = self.rpc.get_info().await?;
        if info.testnet != self.network.is_testnet() {
            return Err(SyncError::NetworkMismatch {
                configured: self.network,
                node_testnet: info.testnet,
            });
        }
        self.store.initialize()?;
        for header in self.store.all_headers()? {
            self.chunks.push_header(&header);
        }
        log_info!(
            "index initialized on {} at height {} (node version {})",
            self.network.as_str(),
            self.chunks.block_count(),
            info.version,
        );
        Ok(())
    }

    /// Reconcile the local tip with the node's, one block per iteration:
    /// import when the node's next block extends our tip, revert one block
    /// otherwise. Returns cleanly when caught up or when the interrupt flag
    /// is raised at a block boundary.
    pub async fn catch_up(&mut self) -> Result<(), SyncError> {
        loop {
            if *self.shutdown.borrow() {
                log_info!("interrupt requested; leaving catch-up at a block boundary");
                return Ok(());
            }

            let node_count = self.rpc.get_block_count().await?;
            let node_tip = self.rpc.get_block_hash(node_count).await?;
            if node_tip == self.chunks.last_block_hash_hex() {
                return Ok(());
            }

            let next_hash = self.rpc.get_block_hash(self.chunks.block_count() as u64).await?;
            let block = self.full_block(&next_hash).await?;
            if block.prev_hash == self.chunks.last_block_hash_hex() {
                self.import_block(&block)?;
            } else {
                let tip_hex = self.chunks.last_block_hash_hex();
                let tip_block = self.full_block(&tip_hex).await?;
                self.revert_block(&tip_block)?;
            }

            // The overlay is replaced exactly once per height change, before
            // any subscriber or later mempool update can observe stale state.
            self.mempool = MempoolView::new();
            self.publisher.emit_new_height();
        }
    }

    /// Fetch block metadata plus every raw transaction (one batched request),
    /// parsed in block order. Genesis carries no spendable history and is
    /// returned with an empty transaction list.
    pub async fn full_block(&self, hash: &str) -> Result<FullBlock, SyncError> {
        let info = self.rpc.get_block(hash).await?;
        let prev_hash = if info.height == 0 {
            hash_to_hex(&ZERO_HASH)
        } else {
            info.previousblockhash
                .clone()
                .ok_or(SyncError::Rpc(RpcError::Malformed("missing previousblockhash")))?
        };
        let bits = u32::from_str_radix(info.bits.trim(), 16)
            .map_err(|_| SyncError::Rpc(RpcError::Malformed("invalid bits field")))?;
        let header = Header {
            version: info.version,
            prev_block: hash_from_hex(&prev_hash)?,
            merkle_root: hash_from_hex(&info.merkleroot)?,
            time: info.time,
            bits,
            nonce: info.nonce,
        };

        let txs = if info.height == 0 {
            Vec::new()
        } else {
            let raws = self.rpc.get_raw_transactions(&info.tx).await?;
            if raws.len() != info.tx.len() {
                return Err(SyncError::Rpc(RpcError::Malformed(
                    "batched transaction count mismatch",
                )));
            }
            let mut txs = Vec::with_capacity(raws.len());
            for raw in &raws {
                let bytes = hex_to_bytes(raw)?;
                let txid = sha256d(&bytes);
                let tx = Transaction::consensus_decode(&bytes)?;
                txs.push(BlockTx { txid, tx });
            }
            txs
        };

        Ok(FullBlock {
            hash: info.hash,
            height: info.height,
            prev_hash,
            header,
            txs,
        })
    }

    fn import_block(&mut self, block: &FullBlock) -> Result<(), SyncError> {
        let started = Instant::now();
        let raw_header = block.header.consensus_encode();
        self.store.push_header(&raw_header, block.height)?;
        self.chunks.push_header(&raw_header);

        let mut touched = BTreeSet::new();
        let mut inputs = 0usize;
        let mut outputs = 0usize;
        for entry in &block.txs {
            // Input-side spends land before output-side credits so a chain
            // of transactions within one block settles like the node's own
            // processing order.
            for input in &entry.tx.vin {
                inputs += 1;
                if input.prevout.is_null() {
                    continue;
                }
                if let Some(address) = self.store.address_of(&input.prevout)? {
                    self.store
                        .set_spent(&input.prevout, &entry.txid, block.height)?;
                    touched.insert(address);
                }
            }
            for (index, output) in entry.tx.vout.iter().enumerate() {
                outputs += 1;
                if let Some(address) = script_to_address(&output.script_pubkey, self.network) {
                    let outpoint = OutPoint::new(entry.txid, index as u32);
                    self.store
                        .add_coin(&address, &outpoint, output.value, block.height)?;
                    touched.insert(address);
                }
            }
        }

        for address in &touched {
            self.publisher.emit_touched_address(address);
        }
        log_info!(
            "import height {} ({} tx, {} in, {} out) in {}ms",
            block.height,
            block.txs.len(),
            inputs,
            outputs,
            started.elapsed().as_millis(),
        );
        Ok(())
    }

    fn revert_block(&mut self, block: &FullBlock) -> Result<(), SyncError> {
        let started = Instant::now();
        if self.store.pop_header()?.is_none() {
            return Err(SyncError::OutOfSync("revert with empty header log"));
        }
        if self.chunks.pop_header().is_none() {
            return Err(SyncError::OutOfSync("revert with empty header cache"));
        }

        let mut touched = BTreeSet::new();
        let mut inputs = 0usize;
        let mut outputs = 0usize;
        for entry in &block.txs {
            for index in 0..entry.tx.vout.len() {
                outputs += 1;
                let outpoint = OutPoint::new(entry.txid, index as u32);
                if let Some(address) = self.store.address_of(&outpoint)? {
                    self.store.remove_coin(&outpoint)?;
                    touched.insert(address);
                }
            }
            for input in &entry.tx.vin {
                inputs += 1;
                if input.prevout.is_null() {
                    continue;
                }
                if let Some(address) = self.store.address_of(&input.prevout)? {
                    self.store.set_unspent(&input.prevout)?;
                    touched.insert(address);
                }
            }
        }

        for address in &touched {
            self.publisher.emit_touched_address(address);
        }
        log_info!(
            "revert height {} ({} tx, {} in, {} out) in {}ms",
            block.height,
            block.txs.len(),
            inputs,
            outputs,
            started.elapsed().as_millis(),
        );
        Ok(())
    }

    /// Fold the node's current mempool into the overlay. Children observed
    /// before their parents are tolerated: an unresolved parent coordinate
    /// simply widens the touched set on a later cycle.
    pub async fn update_mempool(&mut self) -> Result<(), SyncError> {
        let txids = self.rpc.get_raw_mempool().await?;
        let mut touched = BTreeSet::new();
        let mut pending: Vec<OutPoint> = Vec::new();

        for txid_hex in &txids {
            let txid = hash_from_hex(txid_hex)?;
            if !self.mempool.mark_processed(txid) {
                continue;
            }
            let raw = self.rpc.get_raw_transaction(txid_hex).await?;
            let bytes = hex_to_bytes(&raw)?;
            let tx = Transaction::consensus_decode(&bytes)?;

            for input in &tx.vin {
                if input.prevout.is_null() {
                    continue;
                }
                self.mempool.record_spend(input.prevout, txid);
                pending.push(input.prevout);
            }
            for (index, output) in tx.vout.iter().enumerate() {
                if let Some(address) = script_to_address(&output.script_pubkey, self.network) {
                    self.mempool
                        .record_output(&address, OutPoint::new(txid, index as u32), output.value);
                    touched.insert(address);
                }
            }
        }

        // Resolve staged spend coordinates: the prevout may be an earlier
        // mempool output, otherwise consult storage. Unknown prevouts are
        // dropped silently.
        for outpoint in pending {
            if let Some(address) = self.mempool.address_of(&outpoint) {
                touched.insert(address.to_string());
            } else if let Some(address) = self.store.address_of(&outpoint)? {
                touched.insert(address);
            }
        }

        for address in &touched {
            self.publisher.emit_touched_address(address);
        }
        if !touched.is_empty() {
            log_debug!(
                "mempool update: {} tx listed, {} address(es) touched",
                txids.len(),
                touched.len(),
            );
        }
        Ok(())
    }

    // --- query surface -----------------------------------------------------

    pub fn block_count(&self) -> usize {
        self.chunks.block_count()
    }

    pub fn header(&self, index: usize) -> Result<String, RangeError> {
        self.chunks.header(index)
    }

    pub fn chunk(&self, index: usize) -> Result<String, RangeError> {
        self.chunks.chunk(index)
    }

    pub fn last_block_hash(&self) -> String {
        self.chunks.last_block_hash_hex()
    }

    /// Owning address of an outpoint, overlay first, then storage.
    pub fn address_of(&self, outpoint: &OutPoint) -> Result<Option<String>, SyncError> {
        if let Some(address) = self.mempool.address_of(outpoint) {
            return Ok(Some(address.to_string()));
        }
        Ok(self.store.address_of(outpoint)?)
    }

    /// Coins of an address: the stored set plus unconfirmed overlay outputs
    /// (`height == 0`), with unconfirmed spends stamped onto both.
    pub fn coins(&self, address: &str) -> Result<Vec<Coin>, SyncError> {
        let mut coins = self.store.coins(address)?;
        for (outpoint, value) in self.mempool.coins_for(address) {
            coins.push(Coin::unspent(outpoint, address.to_string(), value, 0));
        }
        for coin in &mut coins {
            if let Some(spender) = self.mempool.spender_of(&coin.outpoint) {
                coin.spent_txid = Some(*spender);
            }
        }
        Ok(coins)
    }

    pub fn mempool(&self) -> &MempoolView {
        &self.mempool
    }

    pub async fn raw_transaction(&self, txid: &str) -> Result<String, SyncError> {
        Ok(self.rpc.get_raw_transaction(txid).await?)
    }

    pub async fn broadcast_transaction(&self, raw_hex: &str) -> Result<String, SyncError> {
        Ok(self.rpc.send_raw_transaction(raw_hex).await?)
    }

    pub async fn estimate_fee(&self, blocks: u32) -> Result<f64, SyncError> {
        Ok(self.rpc.estimate_fee(blocks).await?)
    }

    /// Merkle path of `tx_hash` within the block at `height`. A transaction
    /// missing from the block reports position -1.
    pub async fn merkle_proof(&self, tx_hash: &str, height: u64) -> Result<MerkleProof, SyncError> {
        let block_hash = self.rpc.get_block_hash(height).await?;
        let info = self.rpc.get_block(&block_hash).await?;
        let mut txids = Vec::with_capacity(info.tx.len());
        for txid_hex in &info.tx {
            txids.push(hash_from_hex(txid_hex)?);
        }
        let target = hash_from_hex(tx_hash)?;
        let (branch, pos) = coindexd_primitives::merkle_branch(&txids, &target);
        Ok(MerkleProof {
            branch: branch.iter().map(hash_to_hex).collect(),
            pos,
        })
    }
}
