use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use coindexd_index::{IndexStore, KvIndexStore};
use coindexd_primitives::{OutPoint, RAW_HEADER_LEN};
use coindexd_storage::fjall::FjallStore;
use coindexd_storage::memory::MemoryStore;

fn memory_index() -> KvIndexStore<MemoryStore> {
    let index = KvIndexStore::new(MemoryStore::new());
    index.initialize().expect("initialize");
    index
}

fn temp_dir(label: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    dir.push(format!("coindexd_index_{label}_{nanos}"));
    dir
}

fn header(tag: u8) -> [u8; RAW_HEADER_LEN] {
    [tag; RAW_HEADER_LEN]
}

// Contract checks shared by every backend.

fn check_initialize_idempotent(index: &impl IndexStore) {
    index.initialize().expect("second initialize");
    index.initialize().expect("third initialize");
}

fn check_header_log(index: &impl IndexStore) {
    assert!(index.all_headers().unwrap().is_empty());
    assert_eq!(index.pop_header().unwrap(), None);

    index.push_header(&header(1), 0).unwrap();
    index.push_header(&header(2), 1).unwrap();
    index.push_header(&header(3), 2).unwrap();

    assert_eq!(
        index.all_headers().unwrap(),
        vec![header(1), header(2), header(3)]
    );

    assert_eq!(index.pop_header().unwrap(), Some(header(3)));
    assert_eq!(index.all_headers().unwrap(), vec![header(1), header(2)]);
    assert_eq!(index.pop_header().unwrap(), Some(header(2)));
    assert_eq!(index.pop_header().unwrap(), Some(header(1)));
    assert_eq!(index.pop_header().unwrap(), None);
}

fn check_coin_lifecycle(index: &impl IndexStore) {
    let outpoint = OutPoint::new([5u8; 32], 1);

    assert_eq!(index.address_of(&outpoint).unwrap(), None);

    index.add_coin("mzAddr", &outpoint, 5000, 42).unwrap();
    assert_eq!(
        index.address_of(&outpoint).unwrap(),
        Some("mzAddr".to_string())
    );

    let coins = index.coins("mzAddr").unwrap();
    assert_eq!(coins.len(), 1);
    assert_eq!(coins[0].outpoint, outpoint);
    assert_eq!(coins[0].value, 5000);
    assert_eq!(coins[0].height, 42);
    assert!(!coins[0].is_spent());

    let spender = [6u8; 32];
    index.set_spent(&outpoint, &spender, 43).unwrap();
    let coins = index.coins("mzAddr").unwrap();
    assert_eq!(coins[0].spent_txid, Some(spender));
    assert_eq!(coins[0].spent_height, 43);

    index.set_unspent(&outpoint).unwrap();
    let coins = index.coins("mzAddr").unwrap();
    assert!(!coins[0].is_spent());
    assert_eq!(coins[0].spent_height, 0);

    index.remove_coin(&outpoint).unwrap();
    assert!(index.coins("mzAddr").unwrap().is_empty());
    assert_eq!(index.address_of(&outpoint).unwrap(), None);
}

fn check_absent_rows(index: &impl IndexStore) {
    let absent = OutPoint::new([0xAAu8; 32], 0);
    index.remove_coin(&absent).unwrap();
    index.set_unspent(&absent).unwrap();
    assert!(index.set_spent(&absent, &[2u8; 32], 10).is_err());
}

fn check_address_isolation(index: &impl IndexStore) {
    index
        .add_coin("mabc", &OutPoint::new([1u8; 32], 0), 10, 1)
        .unwrap();
    index
        .add_coin("mabcd", &OutPoint::new([2u8; 32], 0), 20, 1)
        .unwrap();

    let coins = index.coins("mabc").unwrap();
    assert_eq!(coins.len(), 1);
    assert_eq!(coins[0].value, 10);

    let coins = index.coins("mabcd").unwrap();
    assert_eq!(coins.len(), 1);
    assert_eq!(coins[0].value, 20);
}

fn check_single_row_identity(index: &impl IndexStore) {
    let outpoint = OutPoint::new([7u8; 32], 0);
    index.add_coin("maddr", &outpoint, 10, 1).unwrap();
    index.add_coin("maddr", &outpoint, 10, 1).unwrap();
    assert_eq!(index.coins("maddr").unwrap().len(), 1);
}

// Memory backend.

#[test]
fn memory_initialize_idempotent() {
    check_initialize_idempotent(&memory_index());
}

#[test]
fn memory_header_log() {
    check_header_log(&memory_index());
}

#[test]
fn memory_coin_lifecycle() {
    check_coin_lifecycle(&memory_index());
}

#[test]
fn memory_absent_rows() {
    check_absent_rows(&memory_index());
}

#[test]
fn memory_address_isolation() {
    check_address_isolation(&memory_index());
}

#[test]
fn memory_single_row_identity() {
    check_single_row_identity(&memory_index());
}

// Fjall backend: the same contract, once per open handle.

#[test]
fn fjall_backend_contract() {
    let dir = temp_dir("contract");
    {
        let index = KvIndexStore::new(FjallStore::open(&dir).expect("open fjall"));
        index.initialize().expect("initialize");
        check_initialize_idempotent(&index);
        check_header_log(&index);
        check_coin_lifecycle(&index);
        check_absent_rows(&index);
        check_address_isolation(&index);
        check_single_row_identity(&index);
    }
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn fjall_state_survives_reopen() {
    let dir = temp_dir("reopen");
    let outpoint = OutPoint::new([3u8; 32], 2);
    let spender = [4u8; 32];
    {
        let index = KvIndexStore::new(FjallStore::open(&dir).expect("open fjall"));
        index.initialize().expect("initialize");
        index.push_header(&header(1), 0).unwrap();
        index.push_header(&header(2), 1).unwrap();
        index.add_coin("mzAddr", &outpoint, 777, 1).unwrap();
        index.set_spent(&outpoint, &spender, 1).unwrap();
    }
    {
        let index = KvIndexStore::new(FjallStore::open(&dir).expect("reopen fjall"));
        index.initialize().expect("initialize after reopen");
        assert_eq!(index.all_headers().unwrap(), vec![header(1), header(2)]);
        assert_eq!(
            index.address_of(&outpoint).unwrap(),
            Some("mzAddr".to_string())
        );
        let coins = index.coins("mzAddr").unwrap();
        assert_eq!(coins.len(), 1);
        assert_eq!(coins[0].value, 777);
        assert_eq!(coins[0].spent_txid, Some(spender));

        assert_eq!(index.pop_header().unwrap(), Some(header(2)));
        assert_eq!(index.all_headers().unwrap(), vec![header(1)]);
    }
    let _ = std::fs::remove_dir_all(&dir);
}
