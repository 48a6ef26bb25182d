//! Peer-to-peer overlay (spec §4.5, C5): authenticated broadcast and
//! point-to-point delivery to peer arbiters.

pub mod messages;
pub mod overlay;
