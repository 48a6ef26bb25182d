//! Withdraw Orchestrator (C8, spec §4.8): the per-side-chain driver that
//! turns pending cached withdraws into a signed, submitted main-chain
//! transaction, and the message dispatch that answers peer requests for
//! the other components (C6, C7) along the way.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::arbiter_group::{ArbiterGroupCache, ArbiterGroupError};
use crate::error::{Classify, Kind};
use crate::p2p::messages::{
    GetLastArbiterUsedUtxoMsg, Message, SendLastArbiterUsedUtxoMsg, SignFeedbackMsg,
};
use crate::p2p::overlay::{Overlay, OverlayError};
use crate::reservation::{ReservationError, ReservationProtocol};
use crate::rpc::main_chain::MainChainClient;
use crate::rpc::RpcError;
use crate::signing::{PendingProposals, SignatureOutcome, SigningEngine, SigningError};
use crate::store::tx_cache::TxCache;
use crate::store::utxo_ledger::UtxoLedger;
use crate::store::CacheError;
use crate::types::{OutPoint, SubmissionOutcome, TxHash, WithdrawRecord};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    ArbiterGroup(#[from] ArbiterGroupError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Reservation(#[from] ReservationError),
    #[error(transparent)]
    Overlay(#[from] OverlayError),
}

impl Classify for OrchestratorError {
    fn kind(&self) -> Kind {
        match self {
            OrchestratorError::Cache(e) => e.kind(),
            OrchestratorError::Rpc(e) => e.kind(),
            OrchestratorError::ArbiterGroup(e) => e.kind(),
            OrchestratorError::Signing(e) => e.kind(),
            OrchestratorError::Reservation(e) => e.kind(),
            OrchestratorError::Overlay(e) => e.kind(),
        }
    }
}

/// Unsigned main-chain transaction content, prior to any signatures.
/// Real wire-format encoding (script assembly, varint-prefixed inputs and
/// outputs) is a main-chain wallet concern this node does not own (spec
/// §1 non-goal "general wallet management"); this keeps the signing and
/// submission pipeline exercisable end to end against a stand-in
/// transaction format.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct UnsignedWithdrawTx {
    records: Vec<WithdrawRecord>,
    inputs: Vec<OutPoint>,
}

fn build_unsigned_withdraw_tx(records: &[WithdrawRecord], inputs: &[OutPoint]) -> Vec<u8> {
    serde_json::to_vec(&UnsignedWithdrawTx {
        records: records.to_vec(),
        inputs: inputs.to_vec(),
    })
    .unwrap_or_default()
}

/// What a pending proposal bundles, so a signing outcome can fold back
/// into the cache (which side-chain records to settle) and the ledger
/// (which outpoints to reserve).
#[derive(Debug, Clone, Default)]
struct ProposalContext {
    genesis_address: String,
    side_tx_hashes: Vec<TxHash>,
    inputs: Vec<OutPoint>,
}

/// Drives withdraw submission for every configured side chain and
/// answers the peer-to-peer requests the other components need serviced
/// (UTXO reservation queries, signing proposals and feedback).
pub struct Orchestrator {
    cache: Arc<TxCache>,
    ledger: Arc<UtxoLedger>,
    reservation: Arc<ReservationProtocol>,
    pending_proposals: Arc<PendingProposals>,
    signing: Arc<SigningEngine>,
    overlay: Arc<Overlay>,
    main_chain: Arc<MainChainClient>,
    arbiter_group: Arc<ArbiterGroupCache>,
    multisig_address: String,
    /// Maps a proposal's content hash to what it bundles.
    proposal_contents: RwLock<HashMap<TxHash, ProposalContext>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<TxCache>,
        ledger: Arc<UtxoLedger>,
        reservation: Arc<ReservationProtocol>,
        pending_proposals: Arc<PendingProposals>,
        signing: Arc<SigningEngine>,
        overlay: Arc<Overlay>,
        main_chain: Arc<MainChainClient>,
        arbiter_group: Arc<ArbiterGroupCache>,
        multisig_address: String,
    ) -> Self {
        Self {
            cache,
            ledger,
            reservation,
            pending_proposals,
            signing,
            overlay,
            main_chain,
            arbiter_group,
            multisig_address,
            proposal_contents: RwLock::new(HashMap::new()),
        }
    }

    /// One driving step for `genesis_address`: if on-duty, reconciles the
    /// ledger, advances the UTXO reservation handshake, and once quorum is
    /// reached assembles and broadcasts a signing proposal for whatever is
    /// pending. Call on a fixed interval per side chain (spec §4.8
    /// "SendCachedWithdrawTxs").
    pub async fn send_cached_withdraw_txs(
        &self,
        genesis_address: &str,
        local_public_key: &str,
    ) -> Result<(), OrchestratorError> {
        let height = self.main_chain.get_block_count().await?;
        let on_duty = self
            .arbiter_group
            .is_on_duty(&self.main_chain, height, local_public_key)
            .await?;

        if !on_duty {
            // Not our turn: drop any in-flight round so a future on-duty
            // window starts clean rather than resuming a stale handshake.
            self.reservation.clear_round(genesis_address);
            return Ok(());
        }

        self.settle_confirmed_withdraws(genesis_address).await?;
        self.ledger.reconcile(&self.main_chain, &self.multisig_address).await?;

        if self.reservation.has_quorum(genesis_address) {
            // Merge every peer-reported outpoint into our own reserved set
            // before building a proposal, so a predecessor's in-flight
            // reservation is never reused as an input (spec §4.7 step 3).
            let peer_outpoints = self.reservation.union_reserved(genesis_address)?;
            self.ledger.merge_external(genesis_address, &peer_outpoints)?;

            self.propose_pending_withdraws(genesis_address, height).await?;
            self.reservation.clear_round(genesis_address);
            return Ok(());
        }

        if self.reservation.response_count(genesis_address) == 0 {
            let nonce = format!("{genesis_address}-{height}");
            self.reservation.start_round(genesis_address, nonce.clone());
            self.overlay
                .broadcast_message(&Message::GetLastArbiterUsedUtxo(GetLastArbiterUsedUtxoMsg {
                    genesis_address: genesis_address.to_string(),
                    height,
                    nonce,
                }))
                .await;
        }

        Ok(())
    }

    /// Settlement pass (spec §4.8 step 2): asks the main chain which
    /// pending hashes are already recorded on-chain — typically because a
    /// predecessor on-duty arbiter already submitted them — and moves
    /// those straight to the succeeded ledger instead of rebuilding and
    /// re-broadcasting a proposal for them.
    async fn settle_confirmed_withdraws(&self, genesis_address: &str) -> Result<(), OrchestratorError> {
        let hashes_and_heights = self.cache.get_all_hashes_and_heights(&genesis_address.to_string())?;
        if hashes_and_heights.is_empty() {
            return Ok(());
        }
        let hashes: Vec<TxHash> = hashes_and_heights.iter().map(|(h, _)| *h).collect();
        let hex_hashes: Vec<String> = hashes.iter().map(|h| h.to_hex()).collect();

        let existing = self
            .main_chain
            .get_exist_withdraw_transactions(&hex_hashes)
            .await?;
        if existing.is_empty() {
            return Ok(());
        }

        let confirmed: Vec<TxHash> = hashes
            .into_iter()
            .zip(hex_hashes)
            .filter(|(_, hex)| existing.contains(hex))
            .map(|(h, _)| h)
            .collect();
        if confirmed.is_empty() {
            return Ok(());
        }

        self.cache.remove_pending(&confirmed)?;
        self.cache.add_succeeded(&confirmed)?;
        tracing::info!(
            genesis_address,
            count = confirmed.len(),
            "settled pending withdraws already recorded on-chain"
        );
        Ok(())
    }

    /// Builds and broadcasts one signing proposal per side-chain block
    /// height bucket, in ascending-height order (spec §4.8 steps 3-4, §5
    /// ordering guarantee).
    async fn propose_pending_withdraws(
        &self,
        genesis_address: &str,
        height: u32,
    ) -> Result<(), OrchestratorError> {
        let hashes_and_heights = self.cache.get_all_hashes_and_heights(&genesis_address.to_string())?;
        if hashes_and_heights.is_empty() {
            return Ok(());
        }
        let hashes: Vec<TxHash> = hashes_and_heights.iter().map(|(h, _)| *h).collect();
        let records = self.cache.get_by_hashes(&hashes)?;

        let mut by_height: std::collections::BTreeMap<u32, Vec<WithdrawRecord>> =
            std::collections::BTreeMap::new();
        for record in records {
            by_height.entry(record.block_height).or_default().push(record);
        }

        for (block_height, records) in by_height {
            self.propose_withdraw_bucket(genesis_address, height, block_height, records)
                .await?;
        }
        Ok(())
    }

    async fn propose_withdraw_bucket(
        &self,
        genesis_address: &str,
        main_height: u32,
        block_height: u32,
        records: Vec<WithdrawRecord>,
    ) -> Result<(), OrchestratorError> {
        let hashes: Vec<TxHash> = records.iter().map(|r| r.side_tx_hash).collect();
        let target_amount: u64 = records
            .iter()
            .flat_map(|r| r.assets.iter())
            .map(|a| a.amount)
            .sum();

        let available = self.ledger.available_utxos(&self.main_chain, &self.multisig_address).await?;
        let Some(inputs) = crate::store::utxo_ledger::select_utxos(&available, target_amount) else {
            tracing::warn!(
                genesis_address,
                block_height,
                target_amount,
                "insufficient unreserved UTXOs to fund pending withdraws, will retry next cycle"
            );
            return Ok(());
        };

        let group = self.arbiter_group.group_at_height(&self.main_chain, main_height).await?;
        let item_content = build_unsigned_withdraw_tx(&records, &inputs);
        let item = self.signing.create_proposal(item_content, vec![], vec![], [0u8; 20]);
        let signed = self.signing.sign(&item, &group)?;

        self.proposal_contents.write().unwrap().insert(
            signed.content_hash(),
            ProposalContext {
                genesis_address: genesis_address.to_string(),
                side_tx_hashes: hashes,
                inputs,
            },
        );
        self.pending_proposals.insert(signed.clone());

        self.overlay.broadcast_message(&Message::SignProposal(signed)).await;
        Ok(())
    }

    /// Dispatches one decoded inbound peer message. `peer_id` is the
    /// connection the message arrived on, used to reply.
    pub async fn handle_message(
        &self,
        peer_id: &str,
        msg: Message,
        local_public_key: &str,
    ) -> Result<(), OrchestratorError> {
        match msg {
            Message::GetLastArbiterUsedUtxo(req) => self.handle_get_last_utxo(peer_id, req).await,
            Message::SendLastArbiterUsedUtxo(resp) => {
                self.reservation.record_response(
                    &resp.genesis_address,
                    peer_id,
                    &resp.nonce,
                    resp.outpoints,
                );
                Ok(())
            }
            Message::SignProposal(item) => {
                self.handle_sign_proposal(peer_id, item, local_public_key).await
            }
            Message::SignFeedback(feedback) => self.handle_sign_feedback(feedback).await,
        }
    }

    async fn handle_get_last_utxo(
        &self,
        peer_id: &str,
        req: GetLastArbiterUsedUtxoMsg,
    ) -> Result<(), OrchestratorError> {
        // Only answer if our own record is at least as fresh as what the
        // requester is asking about (spec §4.7 step 2) — an arbiter that
        // hasn't caught up yet has nothing authoritative to say.
        if self.ledger.last_used_height(&req.genesis_address)? < req.height {
            return Ok(());
        }

        // Reconcile before responding, so a late peer observes the set with
        // any stale reservations already dropped (spec §9 resolution).
        self.ledger.reconcile(&self.main_chain, &self.multisig_address).await?;

        let outpoints: Vec<_> = self.ledger.all_reserved(&req.genesis_address)?.into_iter().collect();
        self.overlay
            .send_message_to_peer(
                peer_id,
                &Message::SendLastArbiterUsedUtxo(SendLastArbiterUsedUtxoMsg {
                    genesis_address: req.genesis_address,
                    height: req.height,
                    outpoints,
                    nonce: req.nonce,
                }),
            )
            .await?;
        Ok(())
    }

    async fn handle_sign_proposal(
        &self,
        peer_id: &str,
        item: crate::types::DistributedItem,
        local_public_key: &str,
    ) -> Result<(), OrchestratorError> {
        let height = self.main_chain.get_block_count().await?;
        let group = self.arbiter_group.group_at_height(&self.main_chain, height).await?;

        self.pending_proposals.insert(item.clone());
        let signed = self.signing.sign(&item, &group)?;

        self.overlay
            .send_message_to_peer(
                peer_id,
                &Message::SignFeedback(SignFeedbackMsg {
                    item: signed,
                    signer_public_key: local_public_key.to_string(),
                }),
            )
            .await?;
        Ok(())
    }

    async fn handle_sign_feedback(&self, feedback: SignFeedbackMsg) -> Result<(), OrchestratorError> {
        let height = self.main_chain.get_block_count().await?;
        let group = self.arbiter_group.group_at_height(&self.main_chain, height).await?;

        let outcome = self.pending_proposals.merge_feedback(
            &feedback.item,
            &feedback.signer_public_key,
            &group,
        )?;

        let SignatureOutcome::Ready(merged_item) = outcome else {
            return Ok(());
        };

        let content_hash = merged_item.content_hash();
        let ProposalContext {
            genesis_address,
            side_tx_hashes: hashes,
            inputs,
        } = self
            .proposal_contents
            .write()
            .unwrap()
            .remove(&content_hash)
            .unwrap_or_default();
        self.pending_proposals.clear(&content_hash);

        let serialized_hex = hex::encode(&merged_item.item_content);
        let submission = self.main_chain.submit_withdraw_transaction(&serialized_hex).await?;

        match submission {
            SubmissionOutcome::Succeeded => {
                self.cache.remove_pending(&hashes)?;
                self.cache.add_succeeded(&hashes)?;
                // Record the spent inputs so a predecessor's future reservation
                // queries and our own next selection both see them as taken
                // (spec §4.6).
                if !inputs.is_empty() {
                    let height = self.main_chain.get_block_count().await?;
                    self.ledger.reserve(&genesis_address, &inputs, height)?;
                }
            }
            SubmissionOutcome::Failed => {
                self.cache.remove_pending(&hashes)?;
                self.cache.add_failed(&hashes, &merged_item.item_content)?;
            }
            SubmissionOutcome::DoubleSpendTransient => {
                // Records stay pending; a later tick rebuilds and resubmits.
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_unsigned_withdraw_tx_is_deterministic_for_same_input() {
        let records: Vec<WithdrawRecord> = Vec::new();
        let inputs: Vec<OutPoint> = Vec::new();
        assert_eq!(
            build_unsigned_withdraw_tx(&records, &inputs),
            build_unsigned_withdraw_tx(&records, &inputs)
        );
    }
}
