//! Stored coin record and its fixed-prefix byte layout.

use coindexd_primitives::{Hash256, OutPoint};

// value(8) + height(4) + spent flag(1) + spending txid(32) + spent height(4)
const COIN_FIXED_LEN: usize = 49;

/// One tracked transaction output. `height == 0` marks an unconfirmed coin
/// surfaced from the mempool overlay; a confirmed spend carries the spending
/// txid plus its height, an unconfirmed spend carries the txid alone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Coin {
    pub outpoint: OutPoint,
    pub address: String,
    pub value: i64,
    pub height: u32,
    pub spent_txid: Option<Hash256>,
    pub spent_height: u32,
}

impl Coin {
    pub fn unspent(outpoint: OutPoint, address: String, value: i64, height: u32) -> Self {
        Self {
            outpoint,
            address,
            value,
            height,
            spent_txid: None,
            spent_height: 0,
        }
    }

    pub fn is_spent(&self) -> bool {
        self.spent_txid.is_some()
    }

    pub(crate) fn encode_value(&self) -> Vec<u8> {
        let address = self.address.as_bytes();
        let mut out = Vec::with_capacity(COIN_FIXED_LEN + address.len());
        out.extend_from_slice(&self.value.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        match &self.spent_txid {
            Some(txid) => {
                out.push(1);
                out.extend_from_slice(txid);
            }
            None => {
                out.push(0);
                out.extend_from_slice(&[0u8; 32]);
            }
        }
        out.extend_from_slice(&self.spent_height.to_le_bytes());
        out.extend_from_slice(address);
        out
    }

    pub(crate) fn decode_value(outpoint: OutPoint, bytes: &[u8]) -> Option<Self> {
        if bytes.len() < COIN_FIXED_LEN {
            return None;
        }
        let value = i64::from_le_bytes(bytes[0..8].try_into().ok()?);
        let height = u32::from_le_bytes(bytes[8..12].try_into().ok()?);
        let spent_txid = match bytes[12] {
            0 => None,
            1 => Some(bytes[13..45].try_into().ok()?),
            _ => return None,
        };
        let spent_height = u32::from_le_bytes(bytes[45..49].try_into().ok()?);
        let address = std::str::from_utf8(&bytes[COIN_FIXED_LEN..]).ok()?.to_string();
        Some(Self {
            outpoint,
            address,
            value,
            height,
            spent_txid,
            spent_height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_roundtrip() {
        let coin = Coin {
            outpoint: OutPoint::new([9u8; 32], 3),
            address: "1BoatSLRHtKNngkdXEeobR76b53LETtpyT".to_string(),
            value: 12_3456,
            height: 800_000,
            spent_txid: Some([4u8; 32]),
            spent_height: 800_001,
        };
        let bytes = coin.encode_value();
        assert_eq!(Coin::decode_value(coin.outpoint, &bytes), Some(coin));
    }

    #[test]
    fn unspent_roundtrip() {
        let coin = Coin::unspent(OutPoint::new([1u8; 32], 0), "addr".to_string(), 50, 1);
        let bytes = coin.encode_value();
        let decoded = Coin::decode_value(coin.outpoint, &bytes).unwrap();
        assert!(!decoded.is_spent());
        assert_eq!(decoded, coin);
    }

    #[test]
    fn short_record_rejected() {
        assert_eq!(Coin::decode_value(OutPoint::new([0u8; 32], 0), &[0u8; 10]), None);
    }
}
