//! Main-chain JSON-RPC client (spec §6 "Main-chain RPC").

use serde::Deserialize;
use serde_json::json;

use crate::config::RpcConfig;
use crate::types::{SubmissionOutcome, MC_ERR_DOUBLE_SPEND, MC_ERR_SIDECHAIN_TX_DUPLICATE};

use super::{call_typed, RpcError};

#[derive(Debug, Clone, Deserialize)]
pub struct ArbitratorGroupInfo {
    #[serde(rename = "onDutyArbitratorIndex")]
    pub on_duty_arbitrator_index: usize,
    pub arbitrators: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressUtxo {
    pub txid: String,
    pub vout: u32,
    pub amount: String,
    #[serde(rename = "outputLock", default)]
    pub output_lock: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerInfo {
    #[serde(rename = "nodepublickey")]
    pub node_public_key: String,
    pub ip: String,
}

/// Thin wrapper over the shared `rpc::call*` helpers, scoped to the
/// main-chain endpoints this crate needs.
pub struct MainChainClient {
    http: reqwest::Client,
    cfg: RpcConfig,
}

impl MainChainClient {
    pub fn new(cfg: RpcConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            cfg,
        }
    }

    /// `getblockcount`. Wire height is 1-based; returns `height - 1`.
    pub async fn get_block_count(&self) -> Result<u32, RpcError> {
        let raw: serde_json::Value =
            call_typed(&self.http, &self.cfg, "getblockcount", json!([])).await?;
        let height = raw.as_u64().ok_or_else(|| RpcError::Malformed {
            method: "getblockcount".to_string(),
            reason: "expected numeric result".to_string(),
        })?;
        Ok(height.saturating_sub(1) as u32)
    }

    pub async fn get_arbitrator_group_by_height(
        &self,
        height: u32,
    ) -> Result<ArbitratorGroupInfo, RpcError> {
        call_typed(
            &self.http,
            &self.cfg,
            "getarbitratorgroupbyheight",
            json!([height]),
        )
        .await
    }

    /// Returns the subset of `hashes` already confirmed on the main chain.
    pub async fn get_exist_withdraw_transactions(
        &self,
        hashes: &[String],
    ) -> Result<Vec<String>, RpcError> {
        call_typed(
            &self.http,
            &self.cfg,
            "getexistwithdrawtransactions",
            json!([hashes]),
        )
        .await
    }

    pub async fn list_unspent(&self, addresses: &[String]) -> Result<Vec<AddressUtxo>, RpcError> {
        call_typed(&self.http, &self.cfg, "listunspent", json!([addresses])).await
    }

    pub async fn get_dpos_peers_info(&self) -> Result<Vec<PeerInfo>, RpcError> {
        call_typed(&self.http, &self.cfg, "getdpospeersinfo", json!([])).await
    }

    /// Submits a signed withdraw transaction. Classifies the response per
    /// spec §4.6: success or `SidechainTxDuplicate` (45012) both count as
    /// succeeded; `DoubleSpend` (45010) is transient; anything else is
    /// terminal.
    pub async fn submit_withdraw_transaction(
        &self,
        serialized_tx_hex: &str,
    ) -> Result<SubmissionOutcome, RpcError> {
        let result = super::call(
            &self.http,
            &self.cfg,
            "sendrechargetransaction",
            json!([serialized_tx_hex]),
        )
        .await;

        match result {
            Ok(_) => Ok(SubmissionOutcome::Succeeded),
            Err(RpcError::Remote { code, .. }) if code == MC_ERR_SIDECHAIN_TX_DUPLICATE => {
                Ok(SubmissionOutcome::Succeeded)
            }
            Err(RpcError::Remote { code, .. }) if code == MC_ERR_DOUBLE_SPEND => {
                Ok(SubmissionOutcome::DoubleSpendTransient)
            }
            Err(RpcError::Remote { .. }) => Ok(SubmissionOutcome::Failed),
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arbitrator_group_info_deserializes() {
        let json = serde_json::json!({
            "onDutyArbitratorIndex": 1,
            "arbitrators": ["aa", "bb", "cc"]
        });
        let info: ArbitratorGroupInfo = serde_json::from_value(json).unwrap();
        assert_eq!(info.on_duty_arbitrator_index, 1);
        assert_eq!(info.arbitrators.len(), 3);
    }
}
