//! Pinned-block upstream reads.
//!
//! All fetches execute at one block height and travel as JSON-RPC batch
//! arrays, windowed so no transport batch exceeds the configured size.
//! Transport failures retry with a fixed backoff; per-element JSON-RPC
//! errors are logged and resolve to the zero value, which is what the EVM
//! layer expects for absent state.

use crate::error::FetchError;
use crate::state::rpc::{BatchEntry, BatchReply, BatchRpc};
use crate::utils::hex::{hex_to_bytes, hex_to_word, quantity_to_u256, quantity_to_u64};
use alloy::primitives::{keccak256, Address, B256, U256, U64};
use dashmap::DashSet;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Account metadata fetched as one `(nonce, balance, code)` triple. The
/// code hash is derived locally and is zero for empty code.
#[derive(Debug, Clone, Default)]
pub struct AccountTriple {
    pub account: Address,
    pub nonce: u64,
    pub balance: U256,
    pub code: Vec<u8>,
    pub code_hash: B256,
}

/// One storage read, filled in place by [`UpstreamFetcher::fetch_slots`].
#[derive(Debug, Clone)]
pub struct SlotReq {
    pub address: Address,
    pub slot: B256,
    pub value: B256,
    pub error: Option<String>,
}

impl SlotReq {
    pub fn new(address: Address, slot: B256) -> Self {
        Self {
            address,
            slot,
            value: B256::ZERO,
            error: None,
        }
    }
}

/// Account metadata decoded from `eth_getProof`. Proof contents are not
/// verified; this is an alternative metadata fetch only.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProofAccountResult {
    pub address: Address,
    pub account_proof: Vec<String>,
    pub balance: U256,
    pub code_hash: B256,
    pub nonce: U64,
    pub storage_hash: B256,
    pub storage_proof: Vec<StorageProofEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageProofEntry {
    pub key: String,
    pub value: U256,
    pub proof: Vec<String>,
}

pub(crate) fn derive_code_hash(code: &[u8]) -> B256 {
    if code.is_empty() {
        B256::ZERO
    } else {
        keccak256(code)
    }
}

/// Upstream reader pinned to a single block.
pub struct UpstreamFetcher {
    rpc: Arc<dyn BatchRpc>,
    pinned_block: u64,
    batch_size: AtomicUsize,
    rpc_calls: AtomicU64,
    accessed_accounts: DashSet<Address>,
    retry_limit: usize,
    retry_backoff: Duration,
}

impl UpstreamFetcher {
    pub fn new(
        rpc: Arc<dyn BatchRpc>,
        pinned_block: u64,
        batch_size: usize,
        retry_limit: usize,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            rpc,
            pinned_block,
            batch_size: AtomicUsize::new(batch_size.max(1)),
            rpc_calls: AtomicU64::new(0),
            accessed_accounts: DashSet::new(),
            retry_limit: retry_limit.max(1),
            retry_backoff,
        }
    }

    pub fn pinned_block(&self) -> u64 {
        self.pinned_block
    }

    fn block_tag(&self) -> String {
        format!("0x{:x}", self.pinned_block)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.load(Ordering::Relaxed)
    }

    pub fn set_batch_size(&self, batch_size: usize) {
        self.batch_size.store(batch_size.max(1), Ordering::Relaxed);
    }

    /// Transport batches issued so far, retries included.
    pub fn rpc_call_count(&self) -> u64 {
        self.rpc_calls.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_accessed(&self, account: Address) {
        self.accessed_accounts.insert(account);
    }

    pub(crate) fn accessed_snapshot(&self) -> Vec<Address> {
        self.accessed_accounts.iter().map(|a| *a).collect()
    }

    pub(crate) fn clear_accessed(&self) {
        self.accessed_accounts.clear();
    }

    /// Fetch `(nonce, balance, code)` for each address at the pinned block,
    /// marking every address as accessed.
    pub async fn fetch_accounts(
        &self,
        accounts: &[Address],
    ) -> Result<Vec<AccountTriple>, FetchError> {
        if accounts.is_empty() {
            return Ok(Vec::new());
        }
        let tag = self.block_tag();
        let mut entries = Vec::with_capacity(accounts.len() * 3);
        for account in accounts {
            self.mark_accessed(*account);
            entries.push(BatchEntry {
                method: "eth_getTransactionCount",
                params: json!([account, tag]),
            });
            entries.push(BatchEntry {
                method: "eth_getBalance",
                params: json!([account, tag]),
            });
            entries.push(BatchEntry {
                method: "eth_getCode",
                params: json!([account, tag]),
            });
        }

        let replies = self.dispatch_windowed(&entries, "loadAccount").await?;

        let mut out = Vec::with_capacity(accounts.len());
        for (i, account) in accounts.iter().enumerate() {
            let nonce = reply_str(&replies[i * 3], "eth_getTransactionCount", *account)
                .and_then(|raw| quantity_to_u64(&raw))
                .unwrap_or_default();
            let balance = reply_str(&replies[i * 3 + 1], "eth_getBalance", *account)
                .and_then(|raw| quantity_to_u256(&raw))
                .unwrap_or_default();
            let code = reply_str(&replies[i * 3 + 2], "eth_getCode", *account)
                .and_then(|raw| hex_to_bytes(&raw))
                .unwrap_or_default();
            let code_hash = derive_code_hash(&code);
            out.push(AccountTriple {
                account: *account,
                nonce,
                balance,
                code,
                code_hash,
            });
        }
        Ok(out)
    }

    /// Resolve storage reads in place via `eth_getStorageAt`.
    pub async fn fetch_slots(&self, reqs: &mut [SlotReq]) -> Result<(), FetchError> {
        if reqs.is_empty() {
            return Ok(());
        }
        let tag = self.block_tag();
        let entries: Vec<BatchEntry> = reqs
            .iter()
            .map(|req| BatchEntry {
                method: "eth_getStorageAt",
                params: json!([req.address, req.slot, tag]),
            })
            .collect();

        let replies = self.dispatch_windowed(&entries, "loadState").await?;

        for (req, reply) in reqs.iter_mut().zip(&replies) {
            if let Some(err) = &reply.error {
                tracing::warn!(
                    "[RPC] eth_getStorageAt for {:#x}[{:#x}] returned error: {err}",
                    req.address,
                    req.slot
                );
                req.error = Some(err.clone());
                req.value = B256::ZERO;
                continue;
            }
            req.value = reply
                .result
                .as_ref()
                .and_then(|v| v.as_str())
                .and_then(hex_to_word)
                .unwrap_or_default();
        }
        Ok(())
    }

    /// Fetch one account's metadata through `eth_getProof` + `eth_getCode`.
    pub async fn load_account_via_proof(
        &self,
        account: Address,
    ) -> Result<(ProofAccountResult, Vec<u8>), FetchError> {
        let tag = self.block_tag();
        let entries = [
            BatchEntry {
                method: "eth_getProof",
                params: json!([account, [], tag]),
            },
            BatchEntry {
                method: "eth_getCode",
                params: json!([account, tag]),
            },
        ];
        let started = Instant::now();
        let replies = self.call_with_retry(&entries, "getProof").await?;

        let proof = match &replies[0].error {
            Some(err) => {
                tracing::error!("[RPC] eth_getProof for {account:#x} returned error: {err}");
                ProofAccountResult::default()
            }
            None => replies[0]
                .result
                .clone()
                .map(serde_json::from_value::<ProofAccountResult>)
                .transpose()
                .map_err(|err| FetchError::Decode(format!("eth_getProof payload: {err}")))?
                .unwrap_or_default(),
        };
        let code = reply_str(&replies[1], "eth_getCode", account)
            .and_then(|raw| hex_to_bytes(&raw))
            .unwrap_or_default();

        tracing::debug!(
            "[RPC] fetched account batched@{} {{proof, code}}: {account:#x} (consumed: {:?})",
            self.pinned_block,
            started.elapsed()
        );
        Ok((proof, code))
    }

    async fn dispatch_windowed(
        &self,
        entries: &[BatchEntry],
        what: &str,
    ) -> Result<Vec<BatchReply>, FetchError> {
        let step = self.batch_size();
        let started = Instant::now();
        let mut replies = Vec::with_capacity(entries.len());
        for begin in (0..entries.len()).step_by(step) {
            let end = (begin + step).min(entries.len());
            tracing::debug!(
                "[RPC] {what} batch req(total={}): begin: {begin}, end: {end}",
                entries.len()
            );
            replies.extend(self.call_with_retry(&entries[begin..end], what).await?);
        }
        tracing::debug!(
            "[RPC] fetched {} {what} elements batched@{} (consumed: {:?})",
            entries.len(),
            self.pinned_block,
            started.elapsed()
        );
        Ok(replies)
    }

    async fn call_with_retry(
        &self,
        window: &[BatchEntry],
        what: &str,
    ) -> Result<Vec<BatchReply>, FetchError> {
        let mut attempt = 1usize;
        loop {
            self.rpc_calls.fetch_add(1, Ordering::Relaxed);
            match self.rpc.batch_call(window).await {
                Ok(replies) => return Ok(replies),
                Err(err) if attempt >= self.retry_limit => {
                    return Err(FetchError::Exhausted {
                        attempts: attempt,
                        last: err.to_string(),
                    });
                }
                Err(err) => {
                    tracing::warn!("[RPC] retrying {what} after transport error: {err}");
                    tokio::time::sleep(self.retry_backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn reply_str(reply: &BatchReply, method: &str, account: Address) -> Option<String> {
    if let Some(err) = &reply.error {
        tracing::warn!("[RPC] {method} for {account:#x} returned error: {err}");
        return None;
    }
    reply
        .result
        .as_ref()
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
