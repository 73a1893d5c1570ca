//! The overlay state engine.
//!
//! Dependency order, leaves first: `rpc` (batched JSON-RPC capability),
//! `fetcher` (pinned-block upstream reads with retry), `coalescer`
//! (timer-windowed request aggregation), `overlay` (copy-on-write layer
//! chain and the get pipeline), `statedb` (the EVM-facing facade),
//! `key_cache` (hot-key warm-up), `diff` (`StateOverride` export).

pub(crate) mod bridge;
pub(crate) mod coalescer;
pub mod diff;
pub mod fetcher;
pub(crate) mod key_cache;
pub mod keys;
pub mod overlay;
pub mod rpc;
pub mod statedb;
