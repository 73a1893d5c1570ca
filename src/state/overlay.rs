//! Copy-on-write overlay chain.
//!
//! The bottom (root) layer caches upstream data for the pinned block and
//! uniquely owns the fetcher, the coalescer, and the runtime attachment.
//! Every layer above records writes only. Reads walk child to parent and
//! the first hit wins; writes land in the current layer; a root miss
//! resolves through the coalescer and is written back insert-if-absent so
//! concurrent fetches converge without clobbering newer local values.

use crate::state::bridge::RuntimeBridge;
use crate::state::coalescer::{self, AccountRequest, CoalescerHandle, SlotRequest};
use crate::state::fetcher::UpstreamFetcher;
use crate::state::keys::{self, Domain};
use crate::state::rpc::BatchRpc;
use crate::utils::config::StateConfig;
use alloy::primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::oneshot;

pub type ScratchPad = HashMap<Vec<u8>, Vec<u8>>;

/// Ethereum-shaped log record captured during sandbox execution. The tx
/// and block hashes are stamped from the layer's current collection
/// target when the log is added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub transaction_hash: B256,
    pub block_hash: B256,
    pub log_index: u64,
}

/// Minimal receipt record; `logs` is refilled from the layer chain on
/// every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: B256,
    pub status: u64,
    pub gas_used: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
    #[serde(default)]
    pub logs: Vec<TxLog>,
}

#[derive(Clone, Copy)]
struct LogTarget {
    tx_hash: B256,
    block_hash: B256,
}

/// One read against the overlay chain.
#[derive(Debug, Clone, Copy)]
pub(crate) enum StateQuery {
    Balance,
    Nonce,
    Code,
    CodeHash,
    Storage(B256),
}

impl StateQuery {
    fn canonical_key(self, account: Address) -> Vec<u8> {
        match self {
            StateQuery::Balance => keys::account_key(Domain::Balance, account),
            StateQuery::Nonce => keys::account_key(Domain::Nonce, account),
            StateQuery::Code => keys::account_key(Domain::Code, account),
            StateQuery::CodeHash => keys::account_key(Domain::CodeHash, account),
            StateQuery::Storage(slot) => keys::state_key(account, slot),
        }
    }
}

/// Resources only the bottom layer owns.
pub(crate) struct RootState {
    pinned_block: u64,
    fetcher: Arc<UpstreamFetcher>,
    coalescer: CoalescerHandle,
    coalescer_task: tokio::task::JoinHandle<()>,
    bridge: RuntimeBridge,
    exec_lock: Arc<tokio::sync::Mutex<()>>,
}

impl RootState {
    pub(crate) fn pinned_block(&self) -> u64 {
        self.pinned_block
    }

    pub(crate) fn fetcher(&self) -> &UpstreamFetcher {
        &self.fetcher
    }

    pub(crate) fn fetcher_arc(&self) -> Arc<UpstreamFetcher> {
        self.fetcher.clone()
    }

    pub(crate) fn bridge(&self) -> &RuntimeBridge {
        &self.bridge
    }

    pub(crate) fn exec_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        self.exec_lock.clone()
    }
}

impl Drop for RootState {
    fn drop(&mut self) {
        // Kill-switch for the retry-forever loop: a broken upstream must
        // not outlive the engine.
        self.coalescer_task.abort();
    }
}

fn next_state_id() -> u64 {
    static SEQ: AtomicU64 = AtomicU64::new(0x9e37_79b9_7f4a_7c15);
    let mut x = SEQ.fetch_add(0x9e37_79b9_7f4a_7c15, Ordering::Relaxed);
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

pub(crate) struct OverlayLayer {
    parent: Option<Arc<OverlayLayer>>,
    root: Option<RootState>,
    scratchpad: RwLock<ScratchPad>,
    tx_logs: RwLock<HashMap<B256, Vec<TxLog>>>,
    receipts: RwLock<HashMap<B256, TxReceipt>>,
    log_target: Mutex<LogTarget>,
    derive_cnt: u64,
    state_id: u64,
    reason: &'static str,
}

impl OverlayLayer {
    /// Build the root layer: attach a runtime, spawn the coalescer, pin
    /// the block.
    pub(crate) fn new_root(
        rpc: Arc<dyn BatchRpc>,
        pinned_block: u64,
        cfg: &StateConfig,
    ) -> anyhow::Result<Arc<Self>> {
        let bridge = RuntimeBridge::attach()?;
        let fetcher = Arc::new(UpstreamFetcher::new(
            rpc,
            pinned_block,
            cfg.batch_size,
            cfg.retry_limit,
            cfg.retry_backoff,
        ));
        let (coalescer, coalescer_task) = coalescer::spawn(
            bridge.handle(),
            fetcher.clone(),
            cfg.slot_tick,
            cfg.account_tick,
            cfg.coalescer_retry_backoff,
        );
        Ok(Arc::new(Self {
            parent: None,
            root: Some(RootState {
                pinned_block,
                fetcher,
                coalescer,
                coalescer_task,
                bridge,
                exec_lock: Arc::new(tokio::sync::Mutex::new(())),
            }),
            scratchpad: RwLock::new(ScratchPad::new()),
            tx_logs: RwLock::new(HashMap::new()),
            receipts: RwLock::new(HashMap::new()),
            log_target: Mutex::new(LogTarget {
                tx_hash: B256::ZERO,
                block_hash: B256::ZERO,
            }),
            derive_cnt: 0,
            state_id: next_state_id(),
            reason: "root",
        }))
    }

    pub(crate) fn derive(self: &Arc<Self>, reason: &'static str) -> Arc<Self> {
        let target = *self.target_lock();
        let child = Arc::new(Self {
            parent: Some(self.clone()),
            root: None,
            scratchpad: RwLock::new(ScratchPad::new()),
            tx_logs: RwLock::new(HashMap::new()),
            receipts: RwLock::new(HashMap::new()),
            log_target: Mutex::new(target),
            derive_cnt: self.derive_cnt + 1,
            state_id: next_state_id(),
            reason,
        });
        tracing::debug!(
            "[OVERLAY] derive reason: {reason} from: {:02x}, id: {:02x}, depth: {}",
            self.state_id,
            child.state_id,
            child.derive_cnt
        );
        child
    }

    /// Step to the parent, logging the discarded layer. Walking past the
    /// bottom of the chain is a caller bug.
    pub(crate) fn pop(self: &Arc<Self>) -> Arc<Self> {
        tracing::debug!(
            "[OVERLAY] popping id: {:02x}, reason: {}",
            self.state_id,
            self.reason
        );
        match &self.parent {
            Some(parent) => parent.clone(),
            None => panic!("cannot pop past the root overlay layer"),
        }
    }

    pub(crate) fn parent(&self) -> Option<Arc<Self>> {
        self.parent.clone()
    }

    pub(crate) fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub(crate) fn derive_cnt(&self) -> u64 {
        self.derive_cnt
    }

    pub(crate) fn root_layer(self: &Arc<Self>) -> Arc<Self> {
        let mut cur = self.clone();
        loop {
            let parent = match &cur.parent {
                Some(parent) => parent.clone(),
                None => return cur,
            };
            cur = parent;
        }
    }

    pub(crate) fn root_state(&self) -> &RootState {
        self.root
            .as_ref()
            .expect("root resources live on the bottom layer only")
    }

    fn pad_read(&self) -> RwLockReadGuard<'_, ScratchPad> {
        self.scratchpad.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn pad_write(&self) -> RwLockWriteGuard<'_, ScratchPad> {
        self.scratchpad
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn target_lock(&self) -> std::sync::MutexGuard<'_, LogTarget> {
        self.log_target.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve one datum through the chain, fetching at the root on miss.
    pub(crate) fn get(&self, account: Address, query: StateQuery) -> Vec<u8> {
        let key = query.canonical_key(account);
        let mut layer = self;
        loop {
            match layer.parent.as_deref() {
                None => return layer.root_get(account, query, key),
                Some(parent) => {
                    if let Some(val) = layer.pad_read().get(&key) {
                        return val.clone();
                    }
                    layer = parent;
                }
            }
        }
    }

    fn root_get(&self, account: Address, query: StateQuery, key: Vec<u8>) -> Vec<u8> {
        if let Some(val) = self.pad_read().get(&key) {
            return val.clone();
        }

        let root = self.root_state();
        match query {
            StateQuery::Storage(slot) => {
                let slot_tx = root.coalescer.slot_tx.clone();
                let value = root.bridge.block_on(async move {
                    let (tx, rx) = oneshot::channel();
                    if slot_tx
                        .send(SlotRequest {
                            address: account,
                            slot,
                            reply: tx,
                        })
                        .await
                        .is_err()
                    {
                        panic!("storage coalescer terminated while the root layer is alive");
                    }
                    match rx.await {
                        Ok(value) => value,
                        Err(_) => panic!("storage coalescer dropped a pending reply"),
                    }
                });

                let mut pad = self.pad_write();
                pad.entry(key)
                    .or_insert_with(|| value.as_slice().to_vec())
                    .clone()
            }
            StateQuery::Balance | StateQuery::Nonce | StateQuery::Code | StateQuery::CodeHash => {
                let account_tx = root.coalescer.account_tx.clone();
                let triple = root.bridge.block_on(async move {
                    let (tx, rx) = oneshot::channel();
                    if account_tx
                        .send(AccountRequest {
                            account,
                            reply: tx,
                        })
                        .await
                        .is_err()
                    {
                        panic!("account coalescer terminated while the root layer is alive");
                    }
                    match rx.await {
                        Ok(triple) => triple,
                        Err(_) => panic!("account coalescer dropped a pending reply"),
                    }
                });

                // The triple lands as a unit, but never over a newer local
                // value.
                let mut pad = self.pad_write();
                pad.entry(keys::account_key(Domain::Balance, account))
                    .or_insert_with(|| keys::encode_u256(triple.balance));
                pad.entry(keys::account_key(Domain::Nonce, account))
                    .or_insert_with(|| keys::encode_u64(triple.nonce));
                pad.entry(keys::account_key(Domain::Code, account))
                    .or_insert_with(|| triple.code.clone());
                pad.entry(keys::account_key(Domain::CodeHash, account))
                    .or_insert_with(|| triple.code_hash.as_slice().to_vec());
                pad.get(&key).cloned().unwrap_or_default()
            }
        }
    }

    /// Write into this layer only.
    pub(crate) fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.pad_write().insert(key, value);
    }

    /// Direct lookup in this layer's scratchpad, no chain walk.
    pub(crate) fn local_get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.pad_read().get(key).cloned()
    }

    /// Copy this layer's writes into `parent`, overwriting shadowed keys.
    pub(crate) fn fold_into(&self, parent: &OverlayLayer) {
        let writes = self.pad_read();
        let mut parent_pad = parent.pad_write();
        for (k, v) in writes.iter() {
            parent_pad.insert(k.clone(), v.clone());
        }
    }

    /// Replace this layer's scratchpad wholesale (diff-export view).
    pub(crate) fn install_scratchpad(&self, pad: ScratchPad) {
        *self.pad_write() = pad;
    }

    pub(crate) fn snapshot_scratchpad(&self) -> ScratchPad {
        self.pad_read().clone()
    }

    pub(crate) fn set_log_target(&self, tx_hash: B256, block_hash: B256) {
        let mut target = self.target_lock();
        target.tx_hash = tx_hash;
        target.block_hash = block_hash;
    }

    /// Append a log under the current collection target, stamping its tx
    /// and block hashes.
    pub(crate) fn add_log(&self, mut log: TxLog) {
        let target = *self.target_lock();
        log.transaction_hash = target.tx_hash;
        log.block_hash = target.block_hash;
        tracing::debug!(
            "[OVERLAY] stateID: {:02x}, addLog: {:#x} topics: {}",
            self.state_id,
            log.address,
            log.topics.len()
        );
        self.tx_logs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(target.tx_hash)
            .or_default()
            .push(log);
    }

    /// Concatenate logs for `tx_hash` across the chain, root-first. The
    /// root layer is included.
    pub(crate) fn collect_logs(&self, tx_hash: B256) -> Vec<TxLog> {
        let mut logs: Vec<TxLog> = Vec::new();
        let mut layer = self;
        loop {
            if let Some(batch) = layer
                .tx_logs
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&tx_hash)
            {
                let mut head = batch.clone();
                head.extend(logs);
                logs = head;
            }
            match layer.parent.as_deref() {
                Some(parent) => layer = parent,
                None => break,
            }
        }
        logs
    }

    pub(crate) fn add_receipt(&self, tx_hash: B256, receipt: TxReceipt) {
        tracing::debug!(
            "[OVERLAY] stateID: {:02x}, addReceipt: {tx_hash:#x}",
            self.state_id
        );
        self.receipts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tx_hash, receipt);
    }

    /// First receipt hit walking up the chain. The root layer is not
    /// consulted.
    pub(crate) fn find_receipt(&self, tx_hash: B256) -> Option<TxReceipt> {
        let mut layer = self;
        while let Some(parent) = layer.parent.as_deref() {
            if let Some(receipt) = layer
                .receipts
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&tx_hash)
            {
                return Some(receipt.clone());
            }
            layer = parent;
        }
        None
    }

    /// Σ (len(k) + len(v)) over this layer's scratchpad.
    pub(crate) fn cache_size(&self) -> usize {
        self.pad_read()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}
