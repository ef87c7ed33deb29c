//! Merkle path computation over a block's txid list.

use crate::hash::{sha256d, Hash256};

fn parent(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    sha256d(&buf)
}

/// Compute the sibling path for `target` within `txids`.
///
/// Levels with an odd element count duplicate their last element before
/// pairing. Returns the siblings bottom-up plus the target's position in the
/// original list, or -1 when the target is not in the block (the path
/// collected along the way is still returned).
pub fn merkle_branch(txids: &[Hash256], target: &Hash256) -> (Vec<Hash256>, i32) {
    let pos = txids
        .iter()
        .position(|txid| txid == target)
        .map(|index| index as i32)
        .unwrap_or(-1);

    let mut branch = Vec::new();
    let mut level: Vec<Hash256> = txids.to_vec();
    let mut current = *target;
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = *level.last().expect("non-empty level");
            level.push(last);
        }
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            let combined = parent(&pair[0], &pair[1]);
            if pair[0] == current || pair[1] == current {
                let sibling = if pair[0] == current { pair[1] } else { pair[0] };
                branch.push(sibling);
                current = combined;
            }
            next.push(combined);
        }
        level = next;
    }
    (branch, pos)
}

/// Root of the tree over `txids`; the zero hash for an empty list.
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return [0u8; 32];
    }
    let mut level: Vec<Hash256> = txids.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = *level.last().expect("non-empty level");
            level.push(last);
        }
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            next.push(parent(&pair[0], &pair[1]));
        }
        level = next;
    }
    level[0]
}
