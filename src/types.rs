//! Core data model (spec §3).
//!
//! Hashes are kept in their main-chain-native byte order (big-endian
//! digest, matching how the rest of the system hashes and compares them);
//! the byte-reversal called for in spec §6 happens only at the RPC wire
//! boundary, in `rpc::reverse_hash_hex`.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a side chain. All per-chain state is keyed by it.
pub type GenesisAddress = String;

/// 32-byte transaction digest, domain byte order (not wire byte order).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxHash(pub [u8; 32]);

impl TxHash {
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let mut arr = [0u8; 32];
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        arr.copy_from_slice(&bytes);
        Ok(TxHash(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Reverse byte order, used to translate between the wire's
    /// little-endian convention and this crate's internal representation.
    pub fn reversed(&self) -> Self {
        let mut out = self.0;
        out.reverse();
        TxHash(out)
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self.to_hex())
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A main-chain outpoint: the 32-byte id of the transaction that created
/// the output, plus the output's index within it. Equality is bitwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub main_tx_id: TxHash,
    pub index: u16,
}

/// A withdraw target on the main chain. `cross_chain_amount` allows
/// partial crediting when the side-chain asset has a different
/// denomination than the main-chain asset being withdrawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawAsset {
    pub target_main_address: String,
    /// Fixed-point, 1e-8 scaled, matching the main chain's native amount unit.
    pub amount: u64,
    pub cross_chain_amount: u64,
}

/// A withdraw discovered on a side chain, pending submission to the main
/// chain. Invariant: at most one record per `side_tx_hash` across the
/// pending set; once moved to the finished ledger it is never reinserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRecord {
    pub side_tx_hash: TxHash,
    pub genesis_address: GenesisAddress,
    /// Serialized unsigned (or partially-signed, once proposed) main-chain
    /// withdraw transaction.
    pub serialized_tx: Vec<u8>,
    pub block_height: u32,
    pub assets: Vec<WithdrawAsset>,
}

/// A failed submission retained for audit, with the main-chain transaction
/// bytes that were rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedWithdraw {
    pub side_tx_hash: TxHash,
    pub serialized_tx: Vec<u8>,
}

/// The on-the-wire multisig proposal. Content-addressed by the hash of
/// `item_content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedItem {
    /// Serialized unsigned main-chain transaction.
    pub item_content: Vec<u8>,
    pub target_arbiter_pub_key: Vec<u8>,
    pub target_arbiter_program_hash: [u8; 20],
    pub redeem_script: Vec<u8>,
    /// Accumulated signer-indexed signature blob, filled in as the item
    /// travels through signers.
    pub signed_data: Vec<u8>,
}

impl DistributedItem {
    /// Content address: hash of `item_content` alone, independent of the
    /// (mutable) signature payload.
    pub fn content_hash(&self) -> TxHash {
        use sha2::{Digest, Sha256};
        let first = Sha256::digest(&self.item_content);
        let second = Sha256::digest(first);
        let mut out = [0u8; 32];
        out.copy_from_slice(&second);
        TxHash(out)
    }
}

/// The rotating arbiter set and on-duty index at a given main-chain
/// height. The same height must return the same group for all arbiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbiterGroup {
    pub height: u32,
    pub on_duty_index: usize,
    /// Hex-encoded compressed public keys, ordered — this order is the
    /// multisig signer order used throughout signing and reservation.
    pub public_keys: Vec<String>,
    /// Minimum signature count required to authorize a withdraw
    /// (`WithdrawMajorityCount` from configuration).
    pub threshold: usize,
}

impl ArbiterGroup {
    pub fn on_duty_key(&self) -> Option<&str> {
        self.public_keys.get(self.on_duty_index).map(String::as_str)
    }

    pub fn signer_index(&self, public_key_hex: &str) -> Option<usize> {
        self.public_keys.iter().position(|k| k == public_key_hex)
    }
}

/// Ordered set of outpoints the arbiters have collectively committed to
/// spend but whose spending transaction may not yet be confirmed. Never
/// shrinks except by explicit reconciliation or explicit role-transition
/// clear.
pub type ReservedOutpoints = BTreeSet<OutPoint>;

/// Outcome of submitting a signed withdraw transaction to the main chain,
/// as classified from the RPC response per spec §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// RPC success, or `SidechainTxDuplicate` (45012).
    Succeeded,
    /// `DoubleSpend` (45010): transient, records stay pending.
    DoubleSpendTransient,
    /// Any other error: terminal, records move to the failed ledger.
    Failed,
}

pub const MC_ERR_DOUBLE_SPEND: i64 = 45010;
pub const MC_ERR_SIDECHAIN_TX_DUPLICATE: i64 = 45012;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_hash_reversal_is_involution() {
        let h = TxHash::from_hex(
            "0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20",
        )
        .unwrap();
        assert_eq!(h.reversed().reversed(), h);
        assert_ne!(h.reversed(), h);
    }

    #[test]
    fn outpoint_equality_is_bitwise() {
        let h = TxHash::from_hex(
            "00000000000000000000000000000000000000000000000000000000000000aa",
        )
        .unwrap();
        let a = OutPoint { main_tx_id: h, index: 0 };
        let b = OutPoint { main_tx_id: h, index: 0 };
        let c = OutPoint { main_tx_id: h, index: 1 };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn arbiter_group_signer_index_lookup() {
        let group = ArbiterGroup {
            height: 100,
            on_duty_index: 1,
            public_keys: vec!["aa".into(), "bb".into(), "cc".into()],
            threshold: 2,
        };
        assert_eq!(group.signer_index("bb"), Some(1));
        assert_eq!(group.signer_index("zz"), None);
        assert_eq!(group.on_duty_key(), Some("bb"));
    }
}
