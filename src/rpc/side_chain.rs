//! Side-chain JSON-RPC client: the RPC surface the block monitor (C3)
//! polls for withdraw transactions (spec §6, §4.3).

use serde::Deserialize;
use serde_json::json;

use crate::config::RpcConfig;

use super::{call_typed, RpcError};

#[derive(Debug, Clone, Deserialize)]
pub struct CrossChainAsset {
    #[serde(rename = "crossChainAddress")]
    pub cross_chain_address: String,
    #[serde(rename = "outputAmount")]
    pub output_amount: String,
    #[serde(rename = "crossChainAmount")]
    pub cross_chain_amount: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawTxInfo {
    pub txid: String,
    #[serde(rename = "crossChainAssets")]
    pub cross_chain_assets: Vec<CrossChainAsset>,
}

pub struct SideChainClient {
    http: reqwest::Client,
    cfg: RpcConfig,
}

impl SideChainClient {
    pub fn new(cfg: RpcConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            cfg,
        }
    }

    /// `getblockcount`. Wire height is 1-based; returns `height - 1`.
    pub async fn get_current_height(&self) -> Result<u32, RpcError> {
        let raw: serde_json::Value =
            call_typed(&self.http, &self.cfg, "getblockcount", json!([])).await?;
        let height = raw.as_u64().ok_or_else(|| RpcError::Malformed {
            method: "getblockcount".to_string(),
            reason: "expected numeric result".to_string(),
        })?;
        Ok(height.saturating_sub(1) as u32)
    }

    pub async fn get_withdraw_transactions_by_height(
        &self,
        height: u32,
    ) -> Result<Vec<WithdrawTxInfo>, RpcError> {
        call_typed(
            &self.http,
            &self.cfg,
            "getwithdrawtransactionsbyheight",
            json!([height]),
        )
        .await
    }
}
