//! Cross-chain arbitration node: mediates deposit and withdraw traffic
//! between the main chain and a set of registered side chains.

pub mod api;
pub mod arbiter_group;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod orchestrator;
pub mod p2p;
pub mod reservation;
pub mod rpc;
pub mod signing;
pub mod store;
pub mod telemetry;
pub mod types;
