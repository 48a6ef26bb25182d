//! Transaction Cache (C1, spec §4.1): the persisted set of pending
//! side→main withdraw records and the finished ledger of succeeded/failed
//! hashes.

use std::sync::Arc;

use rocksdb::{WriteBatch, DB};

use crate::types::{FailedWithdraw, GenesisAddress, TxHash, WithdrawRecord};

use super::{
    CacheError, CF_FINISHED_FAILED, CF_FINISHED_SUCCEEDED, CF_PENDING_BY_KEY,
    CF_PENDING_COUNTERS, CF_PENDING_HASH_INDEX, CF_SIDE_CHAIN_HEIGHTS,
};

pub struct TxCache {
    db: Arc<DB>,
}

fn cf<'a>(db: &'a DB, name: &'static str) -> Result<Arc<rocksdb::BoundColumnFamily<'a>>, CacheError> {
    db.cf_handle(name).ok_or(CacheError::MissingColumnFamily(name))
}

fn pending_key(genesis: &str, seq: u64) -> Vec<u8> {
    let mut key = genesis.as_bytes().to_vec();
    key.push(0); // separator, genesis addresses never contain NUL
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

impl TxCache {
    pub fn new(db: Arc<DB>) -> Self {
        Self { db }
    }

    fn next_seq(&self, batch: &mut WriteBatch, genesis: &str) -> Result<u64, CacheError> {
        let counters = cf(&self.db, CF_PENDING_COUNTERS)?;
        let current = match self.db.get_cf(&counters, genesis.as_bytes())? {
            Some(bytes) => u64::from_be_bytes(bytes.as_slice().try_into().map_err(|_| {
                CacheError::Corrupt(genesis.to_string(), "malformed counter".to_string())
            })?),
            None => 0,
        };
        batch.put_cf(&counters, genesis.as_bytes(), (current + 1).to_be_bytes());
        Ok(current)
    }

    /// Insert-or-ignore by `side_tx_hash`. Atomic at the batch level: a
    /// partial failure leaves the store unchanged.
    pub fn add_side_chain_txs(&self, records: &[WithdrawRecord]) -> Result<(), CacheError> {
        if records.is_empty() {
            return Ok(());
        }

        let pending = cf(&self.db, CF_PENDING_BY_KEY)?;
        let index = cf(&self.db, CF_PENDING_HASH_INDEX)?;

        let mut batch = WriteBatch::default();
        // Track per-genesis next seq locally so a batch of records for the
        // same genesis address does not read a stale counter twice.
        let mut next_seq_cache: std::collections::HashMap<String, u64> = std::collections::HashMap::new();

        for record in records {
            if self
                .db
                .get_cf(&index, record.side_tx_hash.0)?
                .is_some()
            {
                continue; // already present; insert-or-ignore
            }

            let seq = match next_seq_cache.get(&record.genesis_address) {
                Some(s) => {
                    let s = *s;
                    next_seq_cache.insert(record.genesis_address.clone(), s + 1);
                    s
                }
                None => {
                    let s = self.next_seq(&mut batch, &record.genesis_address)?;
                    next_seq_cache.insert(record.genesis_address.clone(), s + 1);
                    s
                }
            };

            let key = pending_key(&record.genesis_address, seq);
            let value = serde_json::to_vec(record)
                .map_err(|e| CacheError::Corrupt(record.side_tx_hash.to_hex(), e.to_string()))?;

            batch.put_cf(&pending, &key, &value);
            batch.put_cf(&index, record.side_tx_hash.0, &key);
        }

        self.db.write(batch)?;
        Ok(())
    }

    pub fn has_side_chain_tx(&self, hash: &TxHash) -> Result<bool, CacheError> {
        let index = cf(&self.db, CF_PENDING_HASH_INDEX)?;
        Ok(self.db.get_cf(&index, hash.0)?.is_some())
    }

    /// Returns `(hash, block_height)` pairs in insertion order.
    pub fn get_all_hashes_and_heights(
        &self,
        genesis_address: &GenesisAddress,
    ) -> Result<Vec<(TxHash, u32)>, CacheError> {
        let pending = cf(&self.db, CF_PENDING_BY_KEY)?;
        let mut prefix = genesis_address.as_bytes().to_vec();
        prefix.push(0);

        let mut out = Vec::new();
        let iter = self.db.prefix_iterator_cf(&pending, &prefix);
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let record: WithdrawRecord = serde_json::from_slice(&value)
                .map_err(|e| CacheError::Corrupt(hex::encode(&key), e.to_string()))?;
            out.push((record.side_tx_hash, record.block_height));
        }
        Ok(out)
    }

    pub fn get_by_hashes(&self, hashes: &[TxHash]) -> Result<Vec<WithdrawRecord>, CacheError> {
        let pending = cf(&self.db, CF_PENDING_BY_KEY)?;
        let index = cf(&self.db, CF_PENDING_HASH_INDEX)?;

        let mut out = Vec::new();
        for hash in hashes {
            let Some(key) = self.db.get_cf(&index, hash.0)? else {
                continue;
            };
            if let Some(value) = self.db.get_cf(&pending, &key)? {
                let record: WithdrawRecord = serde_json::from_slice(&value)
                    .map_err(|e| CacheError::Corrupt(hash.to_hex(), e.to_string()))?;
                out.push(record);
            }
        }
        Ok(out)
    }

    pub fn remove_pending(&self, hashes: &[TxHash]) -> Result<(), CacheError> {
        if hashes.is_empty() {
            return Ok(());
        }
        let pending = cf(&self.db, CF_PENDING_BY_KEY)?;
        let index = cf(&self.db, CF_PENDING_HASH_INDEX)?;

        let mut batch = WriteBatch::default();
        for hash in hashes {
            if let Some(key) = self.db.get_cf(&index, hash.0)? {
                batch.delete_cf(&pending, &key);
            }
            batch.delete_cf(&index, hash.0);
        }
        self.db.write(batch)?;
        Ok(())
    }

    /// Moves hashes to the succeeded ledger. Used for both genuine
    /// success and `SidechainTxDuplicate` collapses (spec §3 "duplicate
    /// set merged with succeeded for user visibility").
    pub fn add_succeeded(&self, hashes: &[TxHash]) -> Result<(), CacheError> {
        if hashes.is_empty() {
            return Ok(());
        }
        let succeeded = cf(&self.db, CF_FINISHED_SUCCEEDED)?;
        let mut batch = WriteBatch::default();
        for hash in hashes {
            batch.put_cf(&succeeded, hash.0, []);
        }
        self.db.write(batch)?;
        Ok(())
    }

    pub fn add_failed(&self, hashes: &[TxHash], serialized_tx: &[u8]) -> Result<(), CacheError> {
        if hashes.is_empty() {
            return Ok(());
        }
        let failed = cf(&self.db, CF_FINISHED_FAILED)?;
        let mut batch = WriteBatch::default();
        for hash in hashes {
            let record = FailedWithdraw {
                side_tx_hash: *hash,
                serialized_tx: serialized_tx.to_vec(),
            };
            let value = serde_json::to_vec(&record)
                .map_err(|e| CacheError::Corrupt(hash.to_hex(), e.to_string()))?;
            batch.put_cf(&failed, hash.0, value);
        }
        self.db.write(batch)?;
        Ok(())
    }

    pub fn is_succeeded(&self, hash: &TxHash) -> Result<bool, CacheError> {
        let succeeded = cf(&self.db, CF_FINISHED_SUCCEEDED)?;
        Ok(self.db.get_cf(&succeeded, hash.0)?.is_some())
    }

    pub fn is_failed(&self, hash: &TxHash) -> Result<bool, CacheError> {
        let failed = cf(&self.db, CF_FINISHED_FAILED)?;
        Ok(self.db.get_cf(&failed, hash.0)?.is_some())
    }

    /// Current processed height for a side chain, or `None` if never set.
    pub fn get_current_height(
        &self,
        genesis_address: &GenesisAddress,
    ) -> Result<Option<u32>, CacheError> {
        let heights = cf(&self.db, CF_SIDE_CHAIN_HEIGHTS)?;
        match self.db.get_cf(&heights, genesis_address.as_bytes())? {
            Some(bytes) => Ok(Some(u32::from_be_bytes(bytes.as_slice().try_into().map_err(
                |_| CacheError::Corrupt(genesis_address.clone(), "malformed height".to_string()),
            )?))),
            None => Ok(None),
        }
    }

    /// Updates the processed height. Callers must only invoke this after
    /// all withdraws at the committed height have been durably added to
    /// the pending set (spec §6 "Persisted state").
    pub fn set_current_height(
        &self,
        genesis_address: &GenesisAddress,
        height: u32,
    ) -> Result<(), CacheError> {
        let heights = cf(&self.db, CF_SIDE_CHAIN_HEIGHTS)?;
        self.db
            .put_cf(&heights, genesis_address.as_bytes(), height.to_be_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WithdrawAsset;

    fn open_temp() -> (tempfile::TempDir, Arc<DB>) {
        let dir = tempfile::tempdir().unwrap();
        let db = crate::store::open_db(dir.path().to_str().unwrap()).unwrap();
        (dir, Arc::new(db))
    }

    fn sample_record(hash_byte: u8, genesis: &str, height: u32) -> WithdrawRecord {
        let mut bytes = [0u8; 32];
        bytes[31] = hash_byte;
        WithdrawRecord {
            side_tx_hash: TxHash(bytes),
            genesis_address: genesis.to_string(),
            serialized_tx: vec![1, 2, 3],
            block_height: height,
            assets: vec![WithdrawAsset {
                target_main_address: "Eaddr".into(),
                amount: 100_000_000,
                cross_chain_amount: 100_000_000,
            }],
        }
    }

    #[test]
    fn add_is_idempotent() {
        let (_dir, db) = open_temp();
        let cache = TxCache::new(db);
        let record = sample_record(1, "side1", 100);

        cache.add_side_chain_txs(&[record.clone()]).unwrap();
        cache.add_side_chain_txs(&[record.clone()]).unwrap();

        let all = cache.get_all_hashes_and_heights(&"side1".to_string()).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn preserves_insertion_order() {
        let (_dir, db) = open_temp();
        let cache = TxCache::new(db);
        let r1 = sample_record(1, "side1", 100);
        let r2 = sample_record(2, "side1", 101);
        let r3 = sample_record(3, "side1", 102);

        cache.add_side_chain_txs(&[r1.clone()]).unwrap();
        cache.add_side_chain_txs(&[r2.clone(), r3.clone()]).unwrap();

        let all = cache.get_all_hashes_and_heights(&"side1".to_string()).unwrap();
        assert_eq!(
            all.iter().map(|(h, _)| *h).collect::<Vec<_>>(),
            vec![r1.side_tx_hash, r2.side_tx_hash, r3.side_tx_hash]
        );
    }

    #[test]
    fn pending_moves_to_succeeded_exactly_once() {
        let (_dir, db) = open_temp();
        let cache = TxCache::new(db);
        let record = sample_record(1, "side1", 100);
        cache.add_side_chain_txs(&[record.clone()]).unwrap();

        cache.remove_pending(&[record.side_tx_hash]).unwrap();
        cache.add_succeeded(&[record.side_tx_hash]).unwrap();

        assert!(!cache.has_side_chain_tx(&record.side_tx_hash).unwrap());
        assert!(cache.is_succeeded(&record.side_tx_hash).unwrap());
        assert!(!cache.is_failed(&record.side_tx_hash).unwrap());
    }

    #[test]
    fn height_is_only_visible_after_set() {
        let (_dir, db) = open_temp();
        let cache = TxCache::new(db);
        assert_eq!(cache.get_current_height(&"side1".to_string()).unwrap(), None);
        cache.set_current_height(&"side1".to_string(), 42).unwrap();
        assert_eq!(cache.get_current_height(&"side1".to_string()).unwrap(), Some(42));
    }
}
