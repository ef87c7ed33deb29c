//! Volatile view of unconfirmed transactions.
//!
//! The view is strictly additive within one cycle: entries are inserted by
//! `update_mempool` and never mutated until the whole structure is replaced
//! at the next `newHeight`. A transaction dropped by the node mid-cycle
//! leaves its entries behind until that replacement; reads overlay onto
//! storage, so the residue is harmless.

use std::collections::{HashMap, HashSet};

use coindexd_primitives::{Hash256, OutPoint};

#[derive(Default)]
pub struct MempoolView {
    txids: HashSet<Hash256>,
    spent: HashMap<OutPoint, Hash256>,
    addrs: HashMap<OutPoint, String>,
    coins: HashMap<String, HashMap<Hash256, HashMap<u32, i64>>>,
}

impl MempoolView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.txids.is_empty()
            && self.spent.is_empty()
            && self.addrs.is_empty()
            && self.coins.is_empty()
    }

    /// Returns false when the transaction was already processed this cycle.
    pub fn mark_processed(&mut self, txid: Hash256) -> bool {
        self.txids.insert(txid)
    }

    pub fn record_spend(&mut self, outpoint: OutPoint, spending_txid: Hash256) {
        self.spent.insert(outpoint, spending_txid);
    }

    pub fn record_output(&mut self, address: &str, outpoint: OutPoint, value: i64) {
        self.addrs.insert(outpoint, address.to_string());
        self.coins
            .entry(address.to_string())
            .or_default()
            .entry(outpoint.hash)
            .or_default()
            .insert(outpoint.index, value);
    }

    pub fn address_of(&self, outpoint: &OutPoint) -> Option<&str> {
        self.addrs.get(outpoint).map(String::as_str)
    }

    pub fn spender_of(&self, outpoint: &OutPoint) -> Option<&Hash256> {
        self.spent.get(outpoint)
    }

    /// Unconfirmed outputs credited to `address` this cycle.
    pub fn coins_for(&self, address: &str) -> Vec<(OutPoint, i64)> {
        let mut out = Vec::new();
        if let Some(by_tx) = self.coins.get(address) {
            for (txid, outputs) in by_tx {
                for (index, value) in outputs {
                    out.push((OutPoint::new(*txid, *index), *value));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        assert!(MempoolView::new().is_empty());
    }

    #[test]
    fn processed_set_deduplicates() {
        let mut view = MempoolView::new();
        assert!(view.mark_processed([1u8; 32]));
        assert!(!view.mark_processed([1u8; 32]));
    }

    #[test]
    fn outputs_are_indexed_both_ways() {
        let mut view = MempoolView::new();
        let outpoint = OutPoint::new([2u8; 32], 1);
        view.record_output("maddr", outpoint, 777);

        assert_eq!(view.address_of(&outpoint), Some("maddr"));
        assert_eq!(view.coins_for("maddr"), vec![(outpoint, 777)]);
        assert!(view.coins_for("other").is_empty());
    }

    #[test]
    fn spends_resolve_by_coordinate() {
        let mut view = MempoolView::new();
        let prevout = OutPoint::new([3u8; 32], 0);
        view.record_spend(prevout, [4u8; 32]);
        assert_eq!(view.spender_of(&prevout), Some(&[4u8; 32]));
        assert_eq!(view.spender_of(&OutPoint::new([3u8; 32], 1)), None);
    }
}
