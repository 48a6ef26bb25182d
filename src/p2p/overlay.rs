//! Authenticated broadcast / point-to-point delivery to peer arbiters
//! (spec §4.5, C5).
//!
//! Delivery is best-effort and unordered; retries and timeouts are the
//! caller's responsibility, per spec. Connection handling follows the
//! teacher's `websocket.rs` broadcaster shape (`tokio::sync::mpsc` fanned
//! out to live connections), adapted from server-push to peer-to-peer
//! push over plain TCP rather than websockets, since arbiters are not
//! browsers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

use super::messages::{Message, CMD_LEN};

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("no connection to peer {0}")]
    PeerUnknown(String),
    #[error("send to peer {peer} failed: {reason}")]
    SendFailed { peer: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl crate::error::Classify for OverlayError {
    fn kind(&self) -> crate::error::Kind {
        crate::error::Kind::TransientNetwork
    }
}

struct PeerHandle {
    outbound: mpsc::Sender<Vec<u8>>,
}

/// A peer-keyed TCP overlay. Peers are identified by their hex-encoded
/// compressed public key.
pub struct Overlay {
    peers: RwLock<HashMap<String, PeerHandle>>,
    inbound_tx: mpsc::Sender<(String, Message)>,
}

impl Overlay {
    /// `inbound_tx` receives every successfully decoded message along with
    /// the sending peer's public key, for a caller-owned dispatch loop to
    /// drain (the signing engine and reservation protocol each subscribe
    /// to the commands relevant to them there).
    pub fn new(inbound_tx: mpsc::Sender<(String, Message)>) -> Arc<Self> {
        Arc::new(Self {
            peers: RwLock::new(HashMap::new()),
            inbound_tx,
        })
    }

    /// Accept inbound connections forever. Each connection is assumed to
    /// announce its public key is discovered by whichever peer dials it
    /// (`connect_peer`); inbound-only links exist solely to read frames.
    pub async fn listen(self: Arc<Self>, bind_addr: &str) -> Result<(), OverlayError> {
        let listener = TcpListener::bind(bind_addr).await?;
        loop {
            let (stream, _addr) = listener.accept().await?;
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                // Anonymous inbound peer: its key is whatever it later
                // tells us via the first frame it sends, which for this
                // protocol is unnecessary since replies travel back over
                // the same connection the request arrived on. We still
                // drain frames so transient spurious connections do not
                // leak file descriptors.
                let _ = this.read_loop(stream, "inbound".to_string()).await;
            });
        }
    }

    /// Dial and register a named peer, keeping the connection open for
    /// both directions.
    pub async fn connect_peer(&self, peer_id: &str, addr: &str) -> Result<(), OverlayError> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, mut write_half) = stream.into_split();

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if write_half.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });

        self.peers
            .write()
            .await
            .insert(peer_id.to_string(), PeerHandle { outbound: tx });

        let inbound_tx = self.inbound_tx.clone();
        let peer_id_owned = peer_id.to_string();
        tokio::spawn(async move {
            let _ = Self::drain_frames(read_half, peer_id_owned, inbound_tx).await;
        });

        Ok(())
    }

    async fn read_loop(&self, stream: TcpStream, peer_id: String) -> Result<(), OverlayError> {
        let inbound_tx = self.inbound_tx.clone();
        Self::drain_frames(stream, peer_id, inbound_tx).await
    }

    async fn drain_frames<R: AsyncReadExt + Unpin>(
        mut reader: R,
        peer_id: String,
        inbound_tx: mpsc::Sender<(String, Message)>,
    ) -> Result<(), OverlayError> {
        loop {
            let mut tag = [0u8; CMD_LEN];
            if reader.read_exact(&mut tag).await.is_err() {
                return Ok(());
            }
            let mut len_buf = [0u8; 4];
            if reader.read_exact(&mut len_buf).await.is_err() {
                return Ok(());
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut payload = vec![0u8; len];
            if reader.read_exact(&mut payload).await.is_err() {
                return Ok(());
            }

            match Message::decode(&tag, &payload) {
                Ok(msg) => {
                    if inbound_tx.send((peer_id.clone(), msg)).await.is_err() {
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::warn!(peer = %peer_id, error = %e, "dropping malformed p2p frame");
                }
            }
        }
    }

    /// Send to every currently-connected peer. Best-effort: a send failure
    /// to one peer does not abort delivery to the rest.
    pub async fn broadcast_message(&self, msg: &Message) {
        let frame = msg.encode();
        let peers = self.peers.read().await;
        for (peer_id, handle) in peers.iter() {
            if handle.outbound.try_send(frame.clone()).is_err() {
                tracing::warn!(peer = %peer_id, "broadcast queue full or peer gone, dropping");
            }
        }
    }

    pub async fn send_message_to_peer(
        &self,
        peer_id: &str,
        msg: &Message,
    ) -> Result<(), OverlayError> {
        let peers = self.peers.read().await;
        let handle = peers
            .get(peer_id)
            .ok_or_else(|| OverlayError::PeerUnknown(peer_id.to_string()))?;
        handle
            .outbound
            .try_send(msg.encode())
            .map_err(|e| OverlayError::SendFailed {
                peer: peer_id.to_string(),
                reason: e.to_string(),
            })
    }

    /// Active peer set: the union of the current arbiter group and, below
    /// `activation_height`, the configured static origin sets (spec §4.5).
    /// Connects to every newly-known peer and drops ones no longer active.
    pub async fn sync_peers(&self, active: &[(String, String)]) {
        let mut peers = self.peers.write().await;
        let active_ids: std::collections::HashSet<&str> =
            active.iter().map(|(id, _)| id.as_str()).collect();
        peers.retain(|id, _| active_ids.contains(id.as_str()));
        drop(peers);

        for (peer_id, addr) in active {
            let already = self.peers.read().await.contains_key(peer_id);
            if !already {
                if let Err(e) = self.connect_peer(peer_id, addr).await {
                    tracing::warn!(peer = %peer_id, error = %e, "failed to connect to arbiter peer");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::messages::GetLastArbiterUsedUtxoMsg;

    #[tokio::test]
    async fn broadcast_to_no_peers_is_a_no_op() {
        let (tx, _rx) = mpsc::channel(8);
        let overlay = Overlay::new(tx);
        overlay
            .broadcast_message(&Message::GetLastArbiterUsedUtxo(GetLastArbiterUsedUtxoMsg {
                genesis_address: "side1".into(),
                height: 1,
                nonce: "1".into(),
            }))
            .await;
    }

    #[tokio::test]
    async fn send_to_unknown_peer_errors() {
        let (tx, _rx) = mpsc::channel(8);
        let overlay = Overlay::new(tx);
        let result = overlay
            .send_message_to_peer(
                "nope",
                &Message::GetLastArbiterUsedUtxo(GetLastArbiterUsedUtxoMsg {
                    genesis_address: "side1".into(),
                    height: 1,
                    nonce: "1".into(),
                }),
            )
            .await;
        assert!(matches!(result, Err(OverlayError::PeerUnknown(_))));
    }
}
