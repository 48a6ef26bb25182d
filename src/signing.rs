//! Distributed Signing Engine (C6, spec §4.6): turns an unsigned withdraw
//! transaction into a multisig proposal, collects peer signatures in
//! signer-index order, and recognizes when a proposal has reached quorum.

use std::collections::HashMap;
use std::sync::RwLock;

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};

use crate::error::{Classify, Kind};
use crate::types::{ArbiterGroup, DistributedItem, TxHash};

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("local signer is not a member of the current arbiter group")]
    NotInGroup,
    #[error("signature feedback does not match any pending proposal")]
    UnknownProposal,
    #[error("signer public key {0} is not a member of the arbiter group")]
    SignerNotInGroup(String),
    #[error("signature verification failed: {0}")]
    Secp(#[from] secp256k1::Error),
    #[error("failed to read keystore {path}: {source}")]
    KeystoreIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed keystore content in {0}")]
    MalformedKeystore(String),
}

impl Classify for SigningError {
    fn kind(&self) -> Kind {
        match self {
            SigningError::NotInGroup
            | SigningError::UnknownProposal
            | SigningError::SignerNotInGroup(_)
            | SigningError::Secp(_) => Kind::ProtocolInvalid,
            SigningError::KeystoreIo { .. } | SigningError::MalformedKeystore(_) => Kind::Fatal,
        }
    }
}

/// Accumulated per-signer-index signatures for one proposal, serialized
/// into `DistributedItem::signed_data`. Kept index-ordered so the final
/// `ProgramParameter` assembly (outside this crate's scope) can read
/// signatures out in the multisig redeem script's expected order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SignatureSet(Vec<(u8, Vec<u8>)>);

impl SignatureSet {
    fn decode(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self::default();
        }
        serde_json::from_slice(bytes).unwrap_or_default()
    }

    fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(&self.0).unwrap_or_default()
    }

    /// Idempotent: inserting the same signer index again is a no-op (spec
    /// §8, Laws: "idempotent duplicate-signature receipt").
    fn insert(&mut self, index: u8, signature: Vec<u8>) {
        if self.0.iter().any(|(i, _)| *i == index) {
            return;
        }
        self.0.push((index, signature));
        self.0.sort_by_key(|(i, _)| *i);
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

/// Loads the local secp256k1 signing key and produces signatures and
/// feedback on behalf of this arbiter.
pub struct SigningEngine {
    secret_key: SecretKey,
    pub public_key_hex: String,
}

impl SigningEngine {
    /// Keystore format: a single hex-encoded 32-byte secp256k1 secret key,
    /// optionally with trailing whitespace.
    pub fn load_from_keystore(path: &str) -> Result<Self, SigningError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SigningError::KeystoreIo {
            path: path.to_string(),
            source,
        })?;
        let bytes = hex::decode(raw.trim())
            .map_err(|_| SigningError::MalformedKeystore(path.to_string()))?;
        let secret_key = SecretKey::from_slice(&bytes)?;
        let public_key = PublicKey::from_secret_key(&Secp256k1::new(), &secret_key);
        Ok(Self {
            secret_key,
            public_key_hex: hex::encode(public_key.serialize()),
        })
    }

    /// Builds a fresh proposal with no signatures yet.
    pub fn create_proposal(
        &self,
        item_content: Vec<u8>,
        redeem_script: Vec<u8>,
        target_arbiter_pub_key: Vec<u8>,
        target_arbiter_program_hash: [u8; 20],
    ) -> DistributedItem {
        DistributedItem {
            item_content,
            target_arbiter_pub_key,
            target_arbiter_program_hash,
            redeem_script,
            signed_data: Vec::new(),
        }
    }

    /// Signs `item`'s content hash and returns a copy with this signer's
    /// signature merged into `signed_data`.
    pub fn sign(&self, item: &DistributedItem, group: &ArbiterGroup) -> Result<DistributedItem, SigningError> {
        let index = group
            .signer_index(&self.public_key_hex)
            .ok_or(SigningError::NotInGroup)?;

        let digest = item.content_hash();
        let message = Message::from_digest_slice(&digest.0)?;
        let secp = Secp256k1::new();
        let signature = secp.sign_ecdsa(&message, &self.secret_key);

        let mut set = SignatureSet::decode(&item.signed_data);
        set.insert(index as u8, signature.serialize_der().to_vec());

        let mut signed = item.clone();
        signed.signed_data = set.encode();
        Ok(signed)
    }
}

/// Verifies that `signer_public_key_hex`'s entry in `item.signed_data`
/// (if present) is a valid ECDSA signature over `item.content_hash()`.
pub fn verify_signer(
    item: &DistributedItem,
    group: &ArbiterGroup,
    signer_public_key_hex: &str,
) -> Result<bool, SigningError> {
    let index = group
        .signer_index(signer_public_key_hex)
        .ok_or_else(|| SigningError::SignerNotInGroup(signer_public_key_hex.to_string()))?;

    let set = SignatureSet::decode(&item.signed_data);
    let Some((_, sig_bytes)) = set.0.iter().find(|(i, _)| *i as usize == index) else {
        return Ok(false);
    };

    let public_key_bytes = hex::decode(signer_public_key_hex).map_err(|_| {
        SigningError::SignerNotInGroup(signer_public_key_hex.to_string())
    })?;
    let public_key = PublicKey::from_slice(&public_key_bytes)?;
    let signature = Signature::from_der(sig_bytes)?;
    let digest = item.content_hash();
    let message = Message::from_digest_slice(&digest.0)?;

    Ok(Secp256k1::new().verify_ecdsa(&message, &signature, &public_key).is_ok())
}

/// Result of merging a peer's signature feedback into a pending proposal.
#[derive(Debug, Clone)]
pub enum SignatureOutcome {
    /// Not yet at threshold; carries the current signer count.
    Pending(usize),
    /// Threshold reached; carries the fully merged item ready to submit.
    Ready(DistributedItem),
}

/// Tracks in-flight multisig proposals this node has originated or is
/// countersigning, keyed by content hash. Replaces the upstream's
/// package-level `TxCache.PendingProposals` map with an explicit,
/// independently lockable structure (spec §9).
pub struct PendingProposals {
    items: RwLock<HashMap<TxHash, DistributedItem>>,
}

impl PendingProposals {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, item: DistributedItem) {
        self.items.write().unwrap().insert(item.content_hash(), item);
    }

    pub fn get(&self, hash: &TxHash) -> Option<DistributedItem> {
        self.items.read().unwrap().get(hash).cloned()
    }

    /// Always clears on a terminal outcome, successful or not (spec §9
    /// "PendingProposals always cleared on terminal outcome").
    pub fn clear(&self, hash: &TxHash) {
        self.items.write().unwrap().remove(hash);
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merges a peer's signed item into the matching pending proposal and
    /// reports whether quorum has now been reached.
    pub fn merge_feedback(
        &self,
        feedback_item: &DistributedItem,
        signer_public_key: &str,
        group: &ArbiterGroup,
    ) -> Result<SignatureOutcome, SigningError> {
        if !verify_signer(feedback_item, group, signer_public_key)? {
            return Err(SigningError::SignerNotInGroup(signer_public_key.to_string()));
        }

        let hash = feedback_item.content_hash();
        let mut items = self.items.write().unwrap();
        let current = items.get(&hash).ok_or(SigningError::UnknownProposal)?;

        let mut merged_set = SignatureSet::decode(&current.signed_data);
        for (index, sig) in SignatureSet::decode(&feedback_item.signed_data).0 {
            merged_set.insert(index, sig);
        }

        let mut merged_item = current.clone();
        merged_item.signed_data = merged_set.encode();
        let count = merged_set.len();
        items.insert(hash, merged_item.clone());
        drop(items);

        if count >= group.threshold {
            Ok(SignatureOutcome::Ready(merged_item))
        } else {
            Ok(SignatureOutcome::Pending(count))
        }
    }
}

impl Default for PendingProposals {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        (secret_key, public_key)
    }

    fn engine_with(secret_key: SecretKey, public_key: PublicKey) -> SigningEngine {
        SigningEngine {
            secret_key,
            public_key_hex: hex::encode(public_key.serialize()),
        }
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let (sk, pk) = keypair();
        let engine = engine_with(sk, pk);
        let group = ArbiterGroup {
            height: 1,
            on_duty_index: 0,
            public_keys: vec![engine.public_key_hex.clone()],
            threshold: 1,
        };

        let item = engine.create_proposal(vec![1, 2, 3], vec![], vec![], [0u8; 20]);
        let signed = engine.sign(&item, &group).unwrap();

        assert!(verify_signer(&signed, &group, &engine.public_key_hex).unwrap());
    }

    #[test]
    fn duplicate_signature_receipt_is_idempotent() {
        let (sk, pk) = keypair();
        let engine = engine_with(sk, pk);
        let group = ArbiterGroup {
            height: 1,
            on_duty_index: 0,
            public_keys: vec![engine.public_key_hex.clone()],
            threshold: 1,
        };

        let item = engine.create_proposal(vec![9, 9, 9], vec![], vec![], [0u8; 20]);
        let signed_once = engine.sign(&item, &group).unwrap();
        let signed_twice = engine.sign(&signed_once, &group).unwrap();

        let set = SignatureSet::decode(&signed_twice.signed_data);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn quorum_reached_when_threshold_met() {
        let (sk1, pk1) = keypair();
        let (sk2, pk2) = {
            let secp = Secp256k1::new();
            let secret_key = SecretKey::from_slice(&[9u8; 32]).unwrap();
            let public_key = PublicKey::from_secret_key(&secp, &secret_key);
            (secret_key, public_key)
        };

        let engine1 = engine_with(sk1, pk1);
        let engine2 = engine_with(sk2, pk2);

        let group = ArbiterGroup {
            height: 1,
            on_duty_index: 0,
            public_keys: vec![engine1.public_key_hex.clone(), engine2.public_key_hex.clone()],
            threshold: 2,
        };

        let item = engine1.create_proposal(vec![1, 2, 3], vec![], vec![], [0u8; 20]);
        let signed1 = engine1.sign(&item, &group).unwrap();

        let pending = PendingProposals::new();
        pending.insert(signed1.clone());

        let signed2 = engine2.sign(&signed1, &group).unwrap();
        let outcome = pending
            .merge_feedback(&signed2, &engine2.public_key_hex, &group)
            .unwrap();

        assert!(matches!(outcome, SignatureOutcome::Ready(_)));
    }
}
