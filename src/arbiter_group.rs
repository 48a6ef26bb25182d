//! Arbiter Group (C4, spec §4.4): the rotating on-duty arbiter set, kept
//! as a small bounded cache keyed by main-chain height so repeated lookups
//! for heights already seen this rotation window avoid an RPC round trip.

use std::collections::VecDeque;
use std::sync::RwLock;

use crate::rpc::main_chain::MainChainClient;
use crate::rpc::RpcError;
use crate::types::ArbiterGroup;

/// Heights are kept only this far back; the on-duty rotation period is far
/// shorter than this in practice, so it is generous headroom rather than a
/// tight budget.
const MAX_CACHED_HEIGHTS: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum ArbiterGroupError {
    #[error("rpc error fetching arbitrator group: {0}")]
    Rpc(#[from] RpcError),
    #[error("arbitrator group for height {0} reported no arbitrators")]
    Empty(u32),
}

impl crate::error::Classify for ArbiterGroupError {
    fn kind(&self) -> crate::error::Kind {
        match self {
            ArbiterGroupError::Rpc(e) => e.kind(),
            ArbiterGroupError::Empty(_) => crate::error::Kind::ProtocolInvalid,
        }
    }
}

use crate::error::Classify as _;

struct Cache {
    by_height: VecDeque<ArbiterGroup>,
}

/// Bounded in-memory cache over the main chain's on-duty arbitrator group,
/// replacing the upstream's single mutable `CurrentArbitrators` singleton
/// (spec §9 "Shared singleton state → explicit context") with a
/// fine-grained `RwLock` the rest of the node reads through the shared
/// `Context`.
pub struct ArbiterGroupCache {
    inner: RwLock<Cache>,
    threshold: usize,
}

impl ArbiterGroupCache {
    pub fn new(threshold: usize) -> Self {
        Self {
            inner: RwLock::new(Cache {
                by_height: VecDeque::new(),
            }),
            threshold,
        }
    }

    fn cached(&self, height: u32) -> Option<ArbiterGroup> {
        self.inner
            .read()
            .unwrap()
            .by_height
            .iter()
            .find(|g| g.height == height)
            .cloned()
    }

    fn insert(&self, group: ArbiterGroup) {
        let mut inner = self.inner.write().unwrap();
        if inner.by_height.iter().any(|g| g.height == group.height) {
            return;
        }
        if inner.by_height.len() >= MAX_CACHED_HEIGHTS {
            inner.by_height.pop_front();
        }
        inner.by_height.push_back(group);
    }

    /// Returns the group for `height`, fetching and caching it from the
    /// main chain if not already cached. `SyncFromMainNode` in the
    /// upstream.
    pub async fn group_at_height(
        &self,
        main_chain: &MainChainClient,
        height: u32,
    ) -> Result<ArbiterGroup, ArbiterGroupError> {
        if let Some(group) = self.cached(height) {
            return Ok(group);
        }

        let info = main_chain.get_arbitrator_group_by_height(height).await?;
        if info.arbitrators.is_empty() {
            return Err(ArbiterGroupError::Empty(height));
        }

        let group = ArbiterGroup {
            height,
            on_duty_index: info.on_duty_arbitrator_index,
            public_keys: info.arbitrators,
            threshold: self.threshold,
        };
        self.insert(group.clone());
        Ok(group)
    }

    /// Whether `public_key_hex` is the on-duty arbiter at `height`.
    pub async fn is_on_duty(
        &self,
        main_chain: &MainChainClient,
        height: u32,
        public_key_hex: &str,
    ) -> Result<bool, ArbiterGroupError> {
        let group = self.group_at_height(main_chain, height).await?;
        Ok(group.on_duty_key() == Some(public_key_hex))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_do_not_refetch_same_height() {
        let cache = ArbiterGroupCache::new(2);
        let group = ArbiterGroup {
            height: 100,
            on_duty_index: 0,
            public_keys: vec!["aa".into(), "bb".into()],
            threshold: 2,
        };
        cache.insert(group.clone());
        assert_eq!(cache.cached(100), Some(group));
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let cache = ArbiterGroupCache::new(2);
        for height in 0..(MAX_CACHED_HEIGHTS as u32 + 1) {
            cache.insert(ArbiterGroup {
                height,
                on_duty_index: 0,
                public_keys: vec!["aa".into()],
                threshold: 1,
            });
        }
        assert!(cache.cached(0).is_none());
        assert!(cache.cached(MAX_CACHED_HEIGHTS as u32).is_some());
    }
}
