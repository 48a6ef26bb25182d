//! JSON-RPC clients for the main chain and side chains (spec §6).
//!
//! Transport follows the teacher's request-building idiom in
//! `monitor.rs::index_block_from_rpc`: a plain `reqwest` client posting a
//! `{"jsonrpc": "1.0", ...}` body with HTTP Basic auth. This crate uses
//! the async `reqwest::Client` rather than `reqwest::blocking`, since every
//! call site here already runs inside a `tokio` task.

pub mod main_chain;
pub mod side_chain;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::RpcConfig;
use crate::error::{Classify, Kind};

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("transport error calling {method}: {source}")]
    Transport {
        method: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("rpc {method} returned error {code}: {message}")]
    Remote {
        method: String,
        code: i64,
        message: String,
    },
    #[error("malformed response from {method}: {reason}")]
    Malformed { method: String, reason: String },
}

impl Classify for RpcError {
    fn kind(&self) -> Kind {
        match self {
            RpcError::Transport { .. } => Kind::TransientNetwork,
            RpcError::Remote { .. } => Kind::TransientNetwork,
            RpcError::Malformed { .. } => Kind::DataCorruption,
        }
    }
}

/// A JSON-RPC error payload with the numeric code the main chain uses to
/// distinguish the two sentinel outcomes named in spec §4.6.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RpcErrorPayload {
    pub code: i64,
    pub message: String,
}

/// Low-level call: POST a JSON-RPC request, return the raw `result` or a
/// structured remote error. Shared by both the main-chain and side-chain
/// clients since both speak the same wire dialect.
pub async fn call(
    client: &reqwest::Client,
    cfg: &RpcConfig,
    method: &str,
    params: Value,
) -> Result<Value, RpcError> {
    let body = serde_json::json!({
        "jsonrpc": "1.0",
        "id": "elabridge",
        "method": method,
        "params": params,
    });

    let response = client
        .post(&cfg.host)
        .basic_auth(&cfg.user, Some(&cfg.pass))
        .json(&body)
        .send()
        .await
        .map_err(|source| RpcError::Transport {
            method: method.to_string(),
            source,
        })?;

    let json: Value = response.json().await.map_err(|source| RpcError::Transport {
        method: method.to_string(),
        source,
    })?;

    if let Some(err) = json.get("error").filter(|e| !e.is_null()) {
        let payload: RpcErrorPayload =
            serde_json::from_value(err.clone()).map_err(|e| RpcError::Malformed {
                method: method.to_string(),
                reason: e.to_string(),
            })?;
        return Err(RpcError::Remote {
            method: method.to_string(),
            code: payload.code,
            message: payload.message,
        });
    }

    json.get("result").cloned().ok_or_else(|| RpcError::Malformed {
        method: method.to_string(),
        reason: "missing result field".to_string(),
    })
}

/// Call and deserialize the `result` field into `T`.
pub async fn call_typed<T: DeserializeOwned>(
    client: &reqwest::Client,
    cfg: &RpcConfig,
    method: &str,
    params: Value,
) -> Result<T, RpcError> {
    let result = call(client, cfg, method, params).await?;
    serde_json::from_value(result).map_err(|e| RpcError::Malformed {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

/// Byte-reverse a hex-encoded hash, used at every RPC boundary to
/// translate between the wire's little-endian digest convention and this
/// crate's domain (big-endian) representation. Applying it twice is the
/// identity (spec §8, Laws).
pub fn reverse_hash_hex(hex_str: &str) -> Result<String, hex::FromHexError> {
    let mut bytes = hex::decode(hex_str)?;
    bytes.reverse();
    Ok(hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_hash_hex_is_involution() {
        let h = "0011223344556677889900aabbccddeeff00112233445566778899aabbccdd";
        let once = reverse_hash_hex(h).unwrap();
        let twice = reverse_hash_hex(&once).unwrap();
        assert_eq!(twice, h);
        assert_ne!(once, h);
    }
}
