//! Overlay state engine for a forked EVM sandbox.
//!
//! The engine presents a standard account-state surface (balance, nonce,
//! code, storage, suicide flag, logs, receipts) over a live upstream
//! JSON-RPC endpoint pinned at a single block height. Anything missing
//! locally is fetched lazily; concurrent reads are coalesced into batched
//! upstream calls; transactions and internal calls run on a stack of
//! copy-on-write overlays that can be snapshotted, reverted, or merged;
//! and the cumulative dirty set exports as a JSON-RPC `StateOverride` for
//! pass-through execution on upstream.

pub mod error;
pub mod state;
pub mod utils;

pub use error::{FetchError, KeyCacheError, Result, StateError};
pub use state::diff::{OverrideAccount, StateOverride};
pub use state::fetcher::{AccountTriple, ProofAccountResult, SlotReq};
pub use state::overlay::{TxLog, TxReceipt};
pub use state::rpc::{BatchEntry, BatchReply, BatchRpc, HttpRpc};
pub use state::statedb::OverlayStateDb;
pub use utils::config::StateConfig;
