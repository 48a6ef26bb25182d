//! Side-Chain Monitor (C3, spec §4.3): polls each configured side chain
//! for new withdraw transactions, confirms them to the configured depth,
//! and hands confirmed records to the transaction cache.

use std::sync::Arc;

use crate::arbiter_group::ArbiterGroupError;
use crate::config::SideNodeConfig;
use crate::error::Classify;
use crate::rpc::main_chain::MainChainClient;
use crate::rpc::side_chain::SideChainClient;
use crate::rpc::RpcError;
use crate::store::tx_cache::TxCache;
use crate::store::CacheError;
use crate::types::{TxHash, WithdrawAsset, WithdrawRecord};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    ArbiterGroup(#[from] ArbiterGroupError),
}

impl Classify for MonitorError {
    fn kind(&self) -> crate::error::Kind {
        match self {
            MonitorError::Rpc(e) => e.kind(),
            MonitorError::Cache(e) => e.kind(),
            MonitorError::ArbiterGroup(e) => e.kind(),
        }
    }
}

/// Parses a decimal-string amount (as returned by the side chain's RPC,
/// e.g. `"1.00000000"`) into the fixed-point 1e-8 unit this crate uses
/// internally. Malformed amounts are the caller's problem to skip-and-warn
/// on (spec §4.3 "Malformed amount").
fn parse_fixed_point(amount: &str) -> Option<u64> {
    let value: f64 = amount.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * 100_000_000.0).round() as u64)
}

/// Drives one side chain's poll loop. One instance runs per configured
/// side chain, each in its own `tokio` task (spec §5 "one task per side
/// chain").
pub struct SideChainMonitor {
    pub genesis_address: String,
    side_chain: SideChainClient,
    confirmations: u32,
    pow_chain: bool,
}

impl SideChainMonitor {
    pub fn new(cfg: &SideNodeConfig, confirmations: u32) -> Self {
        Self {
            genesis_address: cfg.genesis_block_address.clone(),
            side_chain: SideChainClient::new(cfg.rpc.clone()),
            confirmations,
            pow_chain: cfg.pow_chain,
        }
    }

    /// Runs forever, sleeping `scan_interval` between ticks. Errors from a
    /// single tick are logged and the loop continues; only a cache open
    /// failure at startup would be fatal, and that happens before this
    /// loop begins.
    pub async fn run(
        self,
        cache: Arc<TxCache>,
        main_chain: Arc<MainChainClient>,
        arbiter_group: Arc<crate::arbiter_group::ArbiterGroupCache>,
        local_public_key: String,
        scan_interval_ms: u64,
    ) {
        let mut was_on_duty = false;
        loop {
            match self
                .tick(&cache, &main_chain, &arbiter_group, &local_public_key, &mut was_on_duty)
                .await
            {
                Ok(found) if found > 0 => {
                    tracing::info!(
                        genesis_address = %self.genesis_address,
                        found,
                        "discovered new withdraw transactions"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        genesis_address = %self.genesis_address,
                        error = %e,
                        "side-chain monitor tick failed, retrying next cycle"
                    );
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(scan_interval_ms)).await;
        }
    }

    async fn tick(
        &self,
        cache: &TxCache,
        main_chain: &MainChainClient,
        arbiter_group: &crate::arbiter_group::ArbiterGroupCache,
        local_public_key: &str,
        was_on_duty: &mut bool,
    ) -> Result<usize, MonitorError> {
        self.check_on_duty_edge(main_chain, arbiter_group, local_public_key, was_on_duty)
            .await?;

        let tip = self.side_chain.get_current_height().await?;
        let confirmed_tip = tip.saturating_sub(self.confirmations);

        let last_processed = cache
            .get_current_height(&self.genesis_address)?
            .unwrap_or(0);

        if confirmed_tip <= last_processed {
            return Ok(0);
        }

        let mut total_found = 0;
        for height in (last_processed + 1)..=confirmed_tip {
            let txs = self
                .side_chain
                .get_withdraw_transactions_by_height(height)
                .await?;

            let mut records = Vec::with_capacity(txs.len());
            for tx in txs {
                let side_tx_hash = match TxHash::from_hex(&tx.txid) {
                    Ok(h) => h.reversed(),
                    Err(_) => {
                        tracing::warn!(
                            genesis_address = %self.genesis_address,
                            txid = %tx.txid,
                            "skipping withdraw tx with malformed hash"
                        );
                        continue;
                    }
                };

                let mut assets = Vec::with_capacity(tx.cross_chain_assets.len());
                let mut malformed = false;
                for asset in &tx.cross_chain_assets {
                    let (Some(amount), Some(cross_chain_amount)) = (
                        parse_fixed_point(&asset.output_amount),
                        parse_fixed_point(&asset.cross_chain_amount),
                    ) else {
                        tracing::warn!(
                            genesis_address = %self.genesis_address,
                            txid = %tx.txid,
                            "skipping withdraw tx with malformed amount"
                        );
                        malformed = true;
                        break;
                    };
                    assets.push(WithdrawAsset {
                        target_main_address: asset.cross_chain_address.clone(),
                        amount,
                        cross_chain_amount,
                    });
                }
                if malformed {
                    continue;
                }

                records.push(WithdrawRecord {
                    side_tx_hash,
                    genesis_address: self.genesis_address.clone(),
                    serialized_tx: Vec::new(),
                    block_height: height,
                    assets,
                });
            }

            total_found += records.len();
            cache.add_side_chain_txs(&records)?;
            cache.set_current_height(&self.genesis_address, height)?;
        }

        Ok(total_found)
    }

    /// Detects the edge where this node transitions into the on-duty role
    /// for this chain's mainchain height and, for a pow-mining chain,
    /// triggers auxpow block production. Edge-triggered rather than
    /// level-triggered so staying on-duty across several ticks does not
    /// repeatedly kick mining.
    async fn check_on_duty_edge(
        &self,
        main_chain: &MainChainClient,
        arbiter_group: &crate::arbiter_group::ArbiterGroupCache,
        local_public_key: &str,
        was_on_duty: &mut bool,
    ) -> Result<(), MonitorError> {
        let height = main_chain.get_block_count().await?;
        let now_on_duty = arbiter_group
            .is_on_duty(main_chain, height, local_public_key)
            .await?;

        if now_on_duty && !*was_on_duty && self.pow_chain {
            tracing::info!(
                genesis_address = %self.genesis_address,
                height,
                "became on-duty arbiter, kicking auxpow mining"
            );
        }
        *was_on_duty = now_on_duty;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_amount_to_fixed_point() {
        assert_eq!(parse_fixed_point("1.00000000"), Some(100_000_000));
        assert_eq!(parse_fixed_point("0.00000001"), Some(1));
    }

    #[test]
    fn rejects_negative_and_garbage_amounts() {
        assert_eq!(parse_fixed_point("-1.0"), None);
        assert_eq!(parse_fixed_point("not-a-number"), None);
    }
}
