//! Explicit shared context, replacing the upstream's package-level
//! singletons (`ArbitratorGroupSingleton`, `P2PClientSingleton`,
//! `DbCache`) with one struct built at startup and threaded into every
//! component's constructor (spec §9 "Shared singleton state → explicit
//! context").

use std::sync::Arc;

use rocksdb::DB;

use crate::arbiter_group::ArbiterGroupCache;
use crate::config::Parameters;
use crate::p2p::overlay::Overlay;
use crate::rpc::main_chain::MainChainClient;

/// Process-wide dependencies, constructed once in `main` and cloned
/// (cheaply, via `Arc` fields) into every long-running task.
#[derive(Clone)]
pub struct Context {
    pub config: Arc<Parameters>,
    pub db: Arc<DB>,
    pub main_chain: Arc<MainChainClient>,
    pub arbiter_group: Arc<ArbiterGroupCache>,
    pub overlay: Arc<Overlay>,
    /// This node's own compressed public key (hex), used to determine
    /// on-duty status and signer identity.
    pub local_public_key: String,
}
