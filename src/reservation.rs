//! UTXO Reservation Protocol (C7, spec §4.7): before assembling a new
//! withdraw transaction, the on-duty arbiter polls its peers for the
//! main-chain outpoints *they* believe are already committed, so a
//! recently-rotated on-duty arbiter does not double-spend an output a
//! predecessor reserved moments earlier.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::types::OutPoint;

/// One in-flight reservation round for a single side chain. `nonce` is a
/// caller-chosen correlation value for log lines; it carries no security
/// meaning (spec §4.7 "Nonce").
struct Round {
    nonce: String,
    responses: HashMap<String, Vec<OutPoint>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("no reservation round in progress for {0}")]
    NoActiveRound(String),
    #[error("response nonce {got} does not match active round nonce {want} for {genesis_address}")]
    NonceMismatch {
        genesis_address: String,
        want: String,
        got: String,
    },
}

impl crate::error::Classify for ReservationError {
    fn kind(&self) -> crate::error::Kind {
        crate::error::Kind::TransientState
    }
}

/// Coordinates the `GetLastArbiterUsedUTXO` / `SendLastArbiterUsedUTXO`
/// handshake across the arbiter group for every side chain this node
/// tracks, one round at a time per chain.
pub struct ReservationProtocol {
    rounds: RwLock<HashMap<String, Round>>,
    min_quorum: usize,
}

impl ReservationProtocol {
    pub fn new(min_quorum: usize) -> Self {
        Self {
            rounds: RwLock::new(HashMap::new()),
            min_quorum,
        }
    }

    /// Starts (or restarts) a reservation round for `genesis_address`,
    /// discarding any previous round's partial responses.
    pub fn start_round(&self, genesis_address: &str, nonce: String) {
        self.rounds.write().unwrap().insert(
            genesis_address.to_string(),
            Round {
                nonce,
                responses: HashMap::new(),
            },
        );
    }

    /// Records a peer's reported outpoints for the active round. Silently
    /// ignored if no round is active or the nonce is stale, since a late
    /// response from a prior round carries no information about the
    /// current one.
    pub fn record_response(
        &self,
        genesis_address: &str,
        peer_public_key: &str,
        nonce: &str,
        outpoints: Vec<OutPoint>,
    ) {
        let mut rounds = self.rounds.write().unwrap();
        let Some(round) = rounds.get_mut(genesis_address) else {
            return;
        };
        if round.nonce != nonce {
            return;
        }
        round.responses.insert(peer_public_key.to_string(), outpoints);
    }

    pub fn response_count(&self, genesis_address: &str) -> usize {
        self.rounds
            .read()
            .unwrap()
            .get(genesis_address)
            .map(|r| r.responses.len())
            .unwrap_or(0)
    }

    /// Whether enough peers have responded to proceed with transaction
    /// assembly (`MinReceivedUsedUtxoMsgNumber`).
    pub fn has_quorum(&self, genesis_address: &str) -> bool {
        self.response_count(genesis_address) >= self.min_quorum
    }

    /// Union of every outpoint any peer reported as already used, once
    /// quorum is reached. The caller excludes these from the next
    /// withdraw transaction's inputs.
    pub fn union_reserved(&self, genesis_address: &str) -> Result<Vec<OutPoint>, ReservationError> {
        let rounds = self.rounds.read().unwrap();
        let round = rounds
            .get(genesis_address)
            .ok_or_else(|| ReservationError::NoActiveRound(genesis_address.to_string()))?;

        let mut set: std::collections::BTreeSet<OutPoint> = std::collections::BTreeSet::new();
        for outpoints in round.responses.values() {
            set.extend(outpoints.iter().copied());
        }
        Ok(set.into_iter().collect())
    }

    /// Clears the round once its outpoints have been folded into a
    /// proposal, so a stale response cannot leak into the next round.
    pub fn clear_round(&self, genesis_address: &str) {
        self.rounds.write().unwrap().remove(genesis_address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxHash;

    fn op(byte: u8) -> OutPoint {
        let mut bytes = [0u8; 32];
        bytes[31] = byte;
        OutPoint {
            main_tx_id: TxHash(bytes),
            index: 0,
        }
    }

    #[test]
    fn quorum_requires_configured_response_count() {
        let protocol = ReservationProtocol::new(2);
        protocol.start_round("side1", "n1".into());
        assert!(!protocol.has_quorum("side1"));

        protocol.record_response("side1", "peerA", "n1", vec![op(1)]);
        assert!(!protocol.has_quorum("side1"));

        protocol.record_response("side1", "peerB", "n1", vec![op(2)]);
        assert!(protocol.has_quorum("side1"));
    }

    #[test]
    fn stale_nonce_response_is_ignored() {
        let protocol = ReservationProtocol::new(1);
        protocol.start_round("side1", "n1".into());
        protocol.record_response("side1", "peerA", "stale-nonce", vec![op(1)]);
        assert_eq!(protocol.response_count("side1"), 0);
    }

    #[test]
    fn union_reserved_deduplicates_across_peers() {
        let protocol = ReservationProtocol::new(1);
        protocol.start_round("side1", "n1".into());
        protocol.record_response("side1", "peerA", "n1", vec![op(1), op(2)]);
        protocol.record_response("side1", "peerB", "n1", vec![op(2), op(3)]);

        let union = protocol.union_reserved("side1").unwrap();
        assert_eq!(union.len(), 3);
    }
}
