//! Key-value backed implementation of the index contract.

use coindexd_primitives::{Hash256, OutPoint, RAW_HEADER_LEN};
use coindexd_storage::{Column, KeyValueStore, WriteBatch};

use crate::coin::Coin;
use crate::{IndexError, IndexStore};

const META_SCHEMA_KEY: &[u8] = b"schema";
const META_HEADER_COUNT_KEY: &[u8] = b"header_count";
const SCHEMA_VERSION: u8 = 1;

// Base58 never contains NUL, so it safely terminates the address part of an
// address-coin key.
const ADDRESS_SEPARATOR: u8 = 0x00;

pub struct KvIndexStore<S> {
    store: S,
}

impl<S> KvIndexStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> KvIndexStore<S> {
    fn header_count(&self) -> Result<u32, IndexError> {
        let bytes = match self.store.get(Column::Meta, META_HEADER_COUNT_KEY)? {
            Some(bytes) => bytes,
            None => return Ok(0),
        };
        let bytes: [u8; 4] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| IndexError::Corrupt("invalid header count entry"))?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn coin_row(&self, outpoint: &OutPoint) -> Result<Option<Coin>, IndexError> {
        let bytes = match self.store.get(Column::Coin, &outpoint.key_bytes())? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        Coin::decode_value(*outpoint, &bytes)
            .ok_or(IndexError::Corrupt("invalid coin entry"))
            .map(Some)
    }

    fn put_coin_row(&self, coin: &Coin) -> Result<(), IndexError> {
        self.store
            .put(Column::Coin, &coin.outpoint.key_bytes(), &coin.encode_value())?;
        Ok(())
    }
}

fn address_coin_key(address: &str, outpoint: &OutPoint) -> Vec<u8> {
    let address = address.as_bytes();
    let outpoint_key = outpoint.key_bytes();
    let mut key = Vec::with_capacity(address.len() + 1 + outpoint_key.len());
    key.extend_from_slice(address);
    key.push(ADDRESS_SEPARATOR);
    key.extend_from_slice(&outpoint_key);
    key
}

fn address_prefix(address: &str) -> Vec<u8> {
    let address = address.as_bytes();
    let mut prefix = Vec::with_capacity(address.len() + 1);
    prefix.extend_from_slice(address);
    prefix.push(ADDRESS_SEPARATOR);
    prefix
}

impl<S: KeyValueStore> IndexStore for KvIndexStore<S> {
    fn initialize(&self) -> Result<(), IndexError> {
        if self.store.get(Column::Meta, META_SCHEMA_KEY)?.is_none() {
            self.store
                .put(Column::Meta, META_SCHEMA_KEY, &[SCHEMA_VERSION])?;
        }
        Ok(())
    }

    fn push_header(&self, header: &[u8; RAW_HEADER_LEN], height: u32) -> Result<(), IndexError> {
        let mut batch = WriteBatch::new();
        batch.put(Column::Header, height.to_be_bytes(), *header);
        batch.put(
            Column::Meta,
            META_HEADER_COUNT_KEY,
            (height + 1).to_le_bytes(),
        );
        self.store.write_batch(&batch)?;
        Ok(())
    }

    fn pop_header(&self) -> Result<Option<[u8; RAW_HEADER_LEN]>, IndexError> {
        let count = self.header_count()?;
        if count == 0 {
            return Ok(None);
        }
        let height = count - 1;
        let bytes = self
            .store
            .get(Column::Header, &height.to_be_bytes())?
            .ok_or(IndexError::Corrupt("missing header at tip"))?;
        let header: [u8; RAW_HEADER_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| IndexError::Corrupt("invalid header entry"))?;
        let mut batch = WriteBatch::new();
        batch.delete(Column::Header, height.to_be_bytes());
        batch.put(Column::Meta, META_HEADER_COUNT_KEY, height.to_le_bytes());
        self.store.write_batch(&batch)?;
        Ok(Some(header))
    }

    fn all_headers(&self) -> Result<Vec<[u8; RAW_HEADER_LEN]>, IndexError> {
        let entries = self.store.scan_prefix(Column::Header, &[])?;
        let mut headers = Vec::with_capacity(entries.len());
        for (_, value) in entries {
            let header: [u8; RAW_HEADER_LEN] = value
                .as_slice()
                .try_into()
                .map_err(|_| IndexError::Corrupt("invalid header entry"))?;
            headers.push(header);
        }
        Ok(headers)
    }

    fn address_of(&self, outpoint: &OutPoint) -> Result<Option<String>, IndexError> {
        Ok(self.coin_row(outpoint)?.map(|coin| coin.address))
    }

    fn add_coin(
        &self,
        address: &str,
        outpoint: &OutPoint,
        value: i64,
        height: u32,
    ) -> Result<(), IndexError> {
        let coin = Coin::unspent(*outpoint, address.to_string(), value, height);
        let mut batch = WriteBatch::new();
        batch.put(Column::Coin, outpoint.key_bytes(), coin.encode_value());
        batch.put(Column::AddressCoin, address_coin_key(address, outpoint), []);
        self.store.write_batch(&batch)?;
        Ok(())
    }

    fn remove_coin(&self, outpoint: &OutPoint) -> Result<(), IndexError> {
        let coin = match self.coin_row(outpoint)? {
            Some(coin) => coin,
            None => return Ok(()),
        };
        let mut batch = WriteBatch::new();
        batch.delete(Column::Coin, outpoint.key_bytes());
        batch.delete(
            Column::AddressCoin,
            address_coin_key(&coin.address, outpoint),
        );
        self.store.write_batch(&batch)?;
        Ok(())
    }

    fn set_spent(
        &self,
        outpoint: &OutPoint,
        spending_txid: &Hash256,
        height: u32,
    ) -> Result<(), IndexError> {
        let mut coin = self
            .coin_row(outpoint)?
            .ok_or(IndexError::Corrupt("spend target missing from coin index"))?;
        coin.spent_txid = Some(*spending_txid);
        coin.spent_height = height;
        self.put_coin_row(&coin)
    }

    fn set_unspent(&self, outpoint: &OutPoint) -> Result<(), IndexError> {
        let mut coin = match self.coin_row(outpoint)? {
            Some(coin) => coin,
            None => return Ok(()),
        };
        coin.spent_txid = None;
        coin.spent_height = 0;
        self.put_coin_row(&coin)
    }

    fn coins(&self, address: &str) -> Result<Vec<Coin>, IndexError> {
        let entries = self
            .store
            .scan_prefix(Column::AddressCoin, &address_prefix(address))?;
        let mut coins = Vec::with_capacity(entries.len());
        for (key, _) in entries {
            let outpoint_bytes = &key[address.len() + 1..];
            let outpoint = OutPoint::from_key_bytes(outpoint_bytes)
                .ok_or(IndexError::Corrupt("invalid address coin key"))?;
            let coin = self
                .coin_row(&outpoint)?
                .ok_or(IndexError::Corrupt("address entry without coin row"))?;
            coins.push(coin);
        }
        Ok(coins)
    }
}
