//! Persisted state (spec §6 "Persisted state"): the transaction cache
//! (C1) and the UTXO ledger (C2), both backed by `rocksdb`, matching the
//! teacher's column-family usage in `main.rs`/`src/db_handles.rs`.

pub mod tx_cache;
pub mod utxo_ledger;

use rocksdb::{ColumnFamilyDescriptor, Options, DB};

pub const CF_PENDING_BY_KEY: &str = "pending_by_key";
pub const CF_PENDING_HASH_INDEX: &str = "pending_hash_index";
pub const CF_PENDING_COUNTERS: &str = "pending_counters";
pub const CF_FINISHED_SUCCEEDED: &str = "finished_succeeded";
pub const CF_FINISHED_FAILED: &str = "finished_failed";
pub const CF_SIDE_CHAIN_HEIGHTS: &str = "side_chain_heights";
pub const CF_RESERVED_OUTPOINTS: &str = "reserved_outpoints";
pub const CF_LAST_USED_UTXO_HEIGHT: &str = "last_used_utxo_height";

pub const COLUMN_FAMILIES: [&str; 8] = [
    CF_PENDING_BY_KEY,
    CF_PENDING_HASH_INDEX,
    CF_PENDING_COUNTERS,
    CF_FINISHED_SUCCEEDED,
    CF_FINISHED_FAILED,
    CF_SIDE_CHAIN_HEIGHTS,
    CF_RESERVED_OUTPOINTS,
    CF_LAST_USED_UTXO_HEIGHT,
];

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("rocksdb error: {0}")]
    Db(#[from] rocksdb::Error),
    #[error("missing column family: {0}")]
    MissingColumnFamily(&'static str),
    #[error("corrupt record for key {0}: {1}")]
    Corrupt(String, String),
}

impl crate::error::Classify for CacheError {
    fn kind(&self) -> crate::error::Kind {
        // Storage errors are transient: callers retry on the next poll
        // cycle (spec §4.1 "Failure semantics").
        crate::error::Kind::TransientNetwork
    }
}

/// Open the rocksdb handle with every column family this crate needs.
/// Fatal on failure per spec §7 ("database open failure ... do not start
/// the monitors").
pub fn open_db(path: &str) -> Result<DB, rocksdb::Error> {
    let mut cf_descriptors = vec![ColumnFamilyDescriptor::new("default", Options::default())];
    for cf in COLUMN_FAMILIES.iter() {
        cf_descriptors.push(ColumnFamilyDescriptor::new(cf.to_string(), Options::default()));
    }

    let mut db_options = Options::default();
    db_options.create_if_missing(true);
    db_options.create_missing_column_families(true);

    DB::open_cf_descriptors(&db_options, path, cf_descriptors)
}
