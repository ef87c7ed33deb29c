//! Typed JSON-RPC client for the trusted node.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum RpcError {
    Transport(String),
    Node { code: i64, message: String },
    Malformed(&'static str),
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Transport(message) => write!(f, "transport: {message}"),
            RpcError::Node { code, message } => write!(f, "node error {code}: {message}"),
            RpcError::Malformed(message) => write!(f, "malformed response: {message}"),
        }
    }
}

impl std::error::Error for RpcError {}

#[derive(Clone, Debug, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub blocks: u64,
    #[serde(default)]
    pub testnet: bool,
}

/// Verbose `getblock` result. `bits` arrives as compact-target hex;
/// `previousblockhash` is absent on the genesis block.
#[derive(Clone, Debug, Deserialize)]
pub struct BlockInfo {
    pub hash: String,
    pub height: u32,
    pub version: i32,
    pub merkleroot: String,
    pub tx: Vec<String>,
    pub time: u32,
    pub bits: String,
    pub nonce: u32,
    #[serde(default)]
    pub previousblockhash: Option<String>,
}

/// The node RPC surface the synchronizer consumes. The concrete transport is
/// an external collaborator; tests script this trait directly.
#[allow(async_fn_in_trait)]
pub trait NodeRpc {
    async fn get_info(&self) -> Result<NodeInfo, RpcError>;
    async fn get_block_count(&self) -> Result<u64, RpcError>;
    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError>;
    async fn get_block(&self, hash: &str) -> Result<BlockInfo, RpcError>;
    async fn get_raw_transaction(&self, txid: &str) -> Result<String, RpcError>;
    /// Batched form: one JSON-RPC array request, results in request order.
    async fn get_raw_transactions(&self, txids: &[String]) -> Result<Vec<String>, RpcError>;
    async fn get_raw_mempool(&self) -> Result<Vec<String>, RpcError>;
    async fn send_raw_transaction(&self, raw_hex: &str) -> Result<String, RpcError>;
    async fn estimate_fee(&self, blocks: u32) -> Result<f64, RpcError>;
}

pub struct NodeClient {
    http: reqwest::Client,
    endpoint: String,
    user: String,
    password: String,
    next_id: AtomicU64,
}

impl NodeClient {
    pub fn new(host: &str, port: u16, user: &str, password: &str) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|err| RpcError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            endpoint: format!("http://{host}:{port}/"),
            user: user.to_string(),
            password: password.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|err| RpcError::Transport(err.to_string()))?;
        let payload: Value = response
            .json()
            .await
            .map_err(|err| RpcError::Transport(err.to_string()))?;
        let result = extract_result(payload)?;
        serde_json::from_value(result).map_err(|_| RpcError::Malformed("unexpected result shape"))
    }

    async fn call_batch(&self, method: &str, param_sets: Vec<Value>) -> Result<Vec<Value>, RpcError> {
        if param_sets.is_empty() {
            return Ok(Vec::new());
        }
        let count = param_sets.len() as u64;
        let base_id = self.next_id.fetch_add(count, Ordering::Relaxed);
        let body: Vec<Value> = param_sets
            .into_iter()
            .enumerate()
            .map(|(offset, params)| {
                json!({
                    "jsonrpc": "1.0",
                    "id": base_id + offset as u64,
                    "method": method,
                    "params": params,
                })
            })
            .collect();
        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|err| RpcError::Transport(err.to_string()))?;
        let payload: Value = response
            .json()
            .await
            .map_err(|err| RpcError::Transport(err.to_string()))?;
        let entries = match payload {
            Value::Array(entries) => entries,
            _ => return Err(RpcError::Malformed("expected batch array")),
        };
        if entries.len() as u64 != count {
            return Err(RpcError::Malformed("batch response count mismatch"));
        }

        // The node may answer a batch in any order; ids restore request order.
        let mut results: Vec<Option<Value>> = (0..count).map(|_| None).collect();
        for entry in entries {
            let id = entry
                .get("id")
                .and_then(Value::as_u64)
                .ok_or(RpcError::Malformed("batch entry without id"))?;
            let slot = id
                .checked_sub(base_id)
                .and_then(|offset| usize::try_from(offset).ok())
                .filter(|offset| *offset < results.len())
                .ok_or(RpcError::Malformed("batch entry with unknown id"))?;
            results[slot] = Some(extract_result(entry)?);
        }
        results
            .into_iter()
            .map(|slot| slot.ok_or(RpcError::Malformed("batch entry missing")))
            .collect()
    }
}

fn extract_result(mut payload: Value) -> Result<Value, RpcError> {
    if let Some(error) = payload.get("error") {
        if !error.is_null() {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-1);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(RpcError::Node { code, message });
        }
    }
    match payload.get_mut("result") {
        Some(result) if !result.is_null() => Ok(result.take()),
        _ => Err(RpcError::Malformed("missing result")),
    }
}

impl NodeRpc for NodeClient {
    async fn get_info(&self) -> Result<NodeInfo, RpcError> {
        self.call("getinfo", json!([])).await
    }

    async fn get_block_count(&self) -> Result<u64, RpcError> {
        self.call("getblockcount", json!([])).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError> {
        self.call("getblockhash", json!([height])).await
    }

    async fn get_block(&self, hash: &str) -> Result<BlockInfo, RpcError> {
        self.call("getblock", json!([hash])).await
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<String, RpcError> {
        self.call("getrawtransaction", json!([txid])).await
    }

    async fn get_raw_transactions(&self, txids: &[String]) -> Result<Vec<String>, RpcError> {
        let param_sets = txids.iter().map(|txid| json!([txid])).collect();
        let results = self.call_batch("getrawtransaction", param_sets).await?;
        results
            .into_iter()
            .map(|value| {
                serde_json::from_value(value)
                    .map_err(|_| RpcError::Malformed("raw transaction is not a string"))
            })
            .collect()
    }

    async fn get_raw_mempool(&self) -> Result<Vec<String>, RpcError> {
        self.call("getrawmempool", json!([])).await
    }

    async fn send_raw_transaction(&self, raw_hex: &str) -> Result<String, RpcError> {
        self.call("sendrawtransaction", json!([raw_hex])).await
    }

    async fn estimate_fee(&self, blocks: u32) -> Result<f64, RpcError> {
        self.call("estimatefee", json!([blocks])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_result_surfaces_node_errors() {
        let payload = json!({"result": null, "error": {"code": -8, "message": "bad"}, "id": 1});
        match extract_result(payload) {
            Err(RpcError::Node { code, message }) => {
                assert_eq!(code, -8);
                assert_eq!(message, "bad");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn extract_result_takes_value() {
        let payload = json!({"result": 42, "error": null, "id": 1});
        assert_eq!(extract_result(payload).unwrap(), json!(42));
    }

    #[test]
    fn block_info_parses_without_prev_hash() {
        let info: BlockInfo = serde_json::from_value(json!({
            "hash": "00ab",
            "height": 0,
            "version": 1,
            "merkleroot": "11",
            "tx": [],
            "time": 1_296_688_602,
            "bits": "1d00ffff",
            "nonce": 2,
        }))
        .unwrap();
        assert_eq!(info.previousblockhash, None);
        assert_eq!(info.bits, "1d00ffff");
    }
}
