//! UTXO Ledger (C2, spec §4.2): the per-genesis-address set of main-chain
//! outpoints the arbiter group has reserved for in-flight withdraw
//! transactions, plus availability queries and reconciliation against the
//! main chain's actual unspent set.

use std::collections::HashSet;
use std::sync::Arc;

use rocksdb::{WriteBatch, DB};

use crate::rpc::main_chain::{AddressUtxo, MainChainClient};
use crate::types::OutPoint;

use super::{CacheError, CF_LAST_USED_UTXO_HEIGHT, CF_RESERVED_OUTPOINTS};

pub struct UtxoLedger {
    db: Arc<DB>,
}

/// Key layout: `genesis_address || 0x00 || main_tx_id(32) || index(be u16)`.
/// The genesis-address prefix is what makes `ReservedOutpoints` a
/// per-genesis-address set (spec §3), while still letting a single
/// prefix scan recover every reservation regardless of which chain made
/// it (needed for `available_utxos`, since all side chains draw from the
/// same arbiter-group multisig address).
fn outpoint_key(genesis_address: &str, op: &OutPoint) -> Vec<u8> {
    let mut key = genesis_address.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(&op.main_tx_id.0);
    key.extend_from_slice(&op.index.to_be_bytes());
    key
}

fn outpoint_from_key(key: &[u8]) -> Option<OutPoint> {
    if key.len() < 35 {
        return None;
    }
    let tail = &key[key.len() - 34..];
    let mut tx_id = [0u8; 32];
    tx_id.copy_from_slice(&tail[..32]);
    let index = u16::from_be_bytes([tail[32], tail[33]]);
    Some(OutPoint {
        main_tx_id: crate::types::TxHash(tx_id),
        index,
    })
}

impl UtxoLedger {
    pub fn new(db: Arc<DB>) -> Self {
        Self { db }
    }

    fn cf(&self) -> Result<Arc<rocksdb::BoundColumnFamily<'_>>, CacheError> {
        self.db
            .cf_handle(CF_RESERVED_OUTPOINTS)
            .ok_or(CacheError::MissingColumnFamily(CF_RESERVED_OUTPOINTS))
    }

    fn last_used_height_cf(&self) -> Result<Arc<rocksdb::BoundColumnFamily<'_>>, CacheError> {
        self.db
            .cf_handle(CF_LAST_USED_UTXO_HEIGHT)
            .ok_or(CacheError::MissingColumnFamily(CF_LAST_USED_UTXO_HEIGHT))
    }

    /// The main-chain height at which this arbiter last reserved an
    /// outpoint for `genesis_address`. Used to answer
    /// `GetLastArbiterUsedUTXO` only when this node's own record is at
    /// least as recent as the requested height (spec §4.7 step 2).
    pub fn last_used_height(&self, genesis_address: &str) -> Result<u32, CacheError> {
        let cf = self.last_used_height_cf()?;
        match self.db.get_cf(&cf, genesis_address.as_bytes())? {
            Some(bytes) => Ok(u32::from_be_bytes(bytes.as_slice().try_into().map_err(
                |_| CacheError::Corrupt(genesis_address.to_string(), "malformed height".to_string()),
            )?)),
            None => Ok(0),
        }
    }

    fn set_last_used_height(&self, genesis_address: &str, height: u32) -> Result<(), CacheError> {
        let cf = self.last_used_height_cf()?;
        self.db
            .put_cf(&cf, genesis_address.as_bytes(), height.to_be_bytes())?;
        Ok(())
    }

    /// Reserve outpoints as committed to an in-flight withdraw for
    /// `genesis_address`, recording `height` as this arbiter's
    /// `LastUsedUtxoHeight` for that chain. Idempotent: reserving an
    /// already-reserved outpoint is a no-op.
    pub fn reserve(
        &self,
        genesis_address: &str,
        outpoints: &[OutPoint],
        height: u32,
    ) -> Result<(), CacheError> {
        if outpoints.is_empty() {
            return Ok(());
        }
        let cf = self.cf()?;
        let mut batch = WriteBatch::default();
        for op in outpoints {
            batch.put_cf(&cf, outpoint_key(genesis_address, op), []);
        }
        self.db.write(batch)?;
        self.set_last_used_height(genesis_address, height)
    }

    /// Merges outpoints a peer reported as already reserved into our own
    /// set, without touching our own `LastUsedUtxoHeight` marker — this
    /// arbiter didn't spend them, it is only recording what a predecessor
    /// already committed to (spec §4.7 step 3).
    pub fn merge_external(&self, genesis_address: &str, outpoints: &[OutPoint]) -> Result<(), CacheError> {
        if outpoints.is_empty() {
            return Ok(());
        }
        let cf = self.cf()?;
        let mut batch = WriteBatch::default();
        for op in outpoints {
            batch.put_cf(&cf, outpoint_key(genesis_address, op), []);
        }
        self.db.write(batch)?;
        Ok(())
    }

    pub fn release(&self, genesis_address: &str, outpoints: &[OutPoint]) -> Result<(), CacheError> {
        if outpoints.is_empty() {
            return Ok(());
        }
        let cf = self.cf()?;
        let mut batch = WriteBatch::default();
        for op in outpoints {
            batch.delete_cf(&cf, outpoint_key(genesis_address, op));
        }
        self.db.write(batch)?;
        Ok(())
    }

    pub fn is_reserved(&self, genesis_address: &str, outpoint: &OutPoint) -> Result<bool, CacheError> {
        let cf = self.cf()?;
        Ok(self.db.get_cf(&cf, outpoint_key(genesis_address, outpoint))?.is_some())
    }

    /// The `ReservedOutpoints(genesisAddress)` set.
    pub fn all_reserved(&self, genesis_address: &str) -> Result<crate::types::ReservedOutpoints, CacheError> {
        let cf = self.cf()?;
        let mut prefix = genesis_address.as_bytes().to_vec();
        prefix.push(0);
        let mut out = crate::types::ReservedOutpoints::new();
        for item in self.db.prefix_iterator_cf(&cf, &prefix) {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(op) = outpoint_from_key(&key) {
                out.insert(op);
            }
        }
        Ok(out)
    }

    /// Union of every reservation across every genesis address. All side
    /// chains share one arbiter-group multisig address (spec glossary,
    /// "withdraw bank"), so an outpoint reserved by one chain's in-flight
    /// withdraw must not be handed out to another chain's proposal.
    fn all_reserved_any_chain(&self) -> Result<HashSet<OutPoint>, CacheError> {
        let cf = self.cf()?;
        let mut out = HashSet::new();
        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (key, _) = item?;
            if let Some(op) = outpoint_from_key(&key) {
                out.insert(op);
            }
        }
        Ok(out)
    }

    /// `GetAvailableUtxos(addr)`: the main chain's unspent outputs for the
    /// withdraw-bank address, minus every outpoint any side chain has
    /// reserved (spec §4.2 "MUST subtract the ReservedOutpoints set").
    pub async fn available_utxos(
        &self,
        main_chain: &MainChainClient,
        multisig_address: &str,
    ) -> Result<Vec<(OutPoint, u64)>, CacheError> {
        let unspent = self.list_unspent_as_outpoints(main_chain, multisig_address).await?;
        let reserved = self.all_reserved_any_chain()?;
        Ok(unspent
            .into_iter()
            .filter(|(op, _)| !reserved.contains(op))
            .collect())
    }

    async fn list_unspent_as_outpoints(
        &self,
        main_chain: &MainChainClient,
        multisig_address: &str,
    ) -> Result<Vec<(OutPoint, u64)>, CacheError> {
        let unspent: Vec<AddressUtxo> = main_chain
            .list_unspent(&[multisig_address.to_string()])
            .await
            .map_err(|_| CacheError::Corrupt(multisig_address.to_string(), "rpc unavailable".into()))?;

        Ok(unspent
            .iter()
            .filter_map(|u| {
                let tx_id = crate::types::TxHash::from_hex(&u.txid).ok()?;
                let amount: f64 = u.amount.parse().ok()?;
                Some((
                    OutPoint {
                        main_tx_id: tx_id,
                        index: u.vout as u16,
                    },
                    (amount * 100_000_000.0).round() as u64,
                ))
            })
            .collect())
    }

    /// Drop every reservation, across every genesis address, whose
    /// outpoint is no longer present in the main chain's unspent set for
    /// `multisig_address` — it has either confirmed (spent) or was
    /// rejected and recycled upstream (spec §4.2 "Reconciliation").
    pub async fn reconcile(
        &self,
        main_chain: &MainChainClient,
        multisig_address: &str,
    ) -> Result<usize, CacheError> {
        let still_unspent: HashSet<OutPoint> = self
            .list_unspent_as_outpoints(main_chain, multisig_address)
            .await?
            .into_iter()
            .map(|(op, _)| op)
            .collect();

        let cf = self.cf()?;
        let mut batch = WriteBatch::default();
        let mut dropped = 0;
        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (key, _) = item?;
            let Some(op) = outpoint_from_key(&key) else {
                continue;
            };
            if !still_unspent.contains(&op) {
                batch.delete_cf(&cf, key);
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.db.write(batch)?;
        }
        Ok(dropped)
    }
}

/// Greedily selects outpoints from `available` (assumed already reserved-
/// filtered) totaling at least `target_amount`, in the order given. A real
/// wallet's coin-selection policy (fee accounting, change outputs) is a
/// main-chain wallet concern this node does not own (spec §1 non-goal
/// "general wallet management"); this is the minimum needed to produce a
/// deterministic, non-conflicting input set for a withdraw proposal.
pub fn select_utxos(available: &[(OutPoint, u64)], target_amount: u64) -> Option<Vec<OutPoint>> {
    let mut selected = Vec::new();
    let mut total = 0u64;
    for (op, amount) in available {
        if total >= target_amount {
            break;
        }
        selected.push(*op);
        total += amount;
    }
    if total >= target_amount {
        Some(selected)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxHash;

    fn open_temp() -> (tempfile::TempDir, Arc<DB>) {
        let dir = tempfile::tempdir().unwrap();
        let db = crate::store::open_db(dir.path().to_str().unwrap()).unwrap();
        (dir, Arc::new(db))
    }

    fn op(byte: u8, index: u16) -> OutPoint {
        let mut bytes = [0u8; 32];
        bytes[31] = byte;
        OutPoint {
            main_tx_id: TxHash(bytes),
            index,
        }
    }

    #[test]
    fn reserve_is_idempotent() {
        let (_dir, db) = open_temp();
        let ledger = UtxoLedger::new(db);
        let outpoint = op(1, 0);

        ledger.reserve("side1", &[outpoint], 100).unwrap();
        ledger.reserve("side1", &[outpoint], 100).unwrap();

        assert_eq!(ledger.all_reserved("side1").unwrap().len(), 1);
        assert!(ledger.is_reserved("side1", &outpoint).unwrap());
    }

    #[test]
    fn release_removes_from_set() {
        let (_dir, db) = open_temp();
        let ledger = UtxoLedger::new(db);
        let a = op(1, 0);
        let b = op(2, 0);

        ledger.reserve("side1", &[a, b], 100).unwrap();
        ledger.release("side1", &[a]).unwrap();

        assert!(!ledger.is_reserved("side1", &a).unwrap());
        assert!(ledger.is_reserved("side1", &b).unwrap());
    }

    #[test]
    fn reservations_are_scoped_per_genesis_address() {
        let (_dir, db) = open_temp();
        let ledger = UtxoLedger::new(db);
        let a = op(1, 0);

        ledger.reserve("side1", &[a], 100).unwrap();

        assert!(ledger.is_reserved("side1", &a).unwrap());
        assert!(!ledger.is_reserved("side2", &a).unwrap());
        assert_eq!(ledger.all_reserved("side2").unwrap().len(), 0);
    }

    #[test]
    fn select_utxos_picks_enough_to_cover_target() {
        let available = vec![(op(1, 0), 50_000_000u64), (op(2, 0), 60_000_000u64)];
        let selected = select_utxos(&available, 100_000_000).unwrap();
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn select_utxos_returns_none_when_insufficient() {
        let available = vec![(op(1, 0), 10_000_000u64)];
        assert!(select_utxos(&available, 100_000_000).is_none());
    }
}
