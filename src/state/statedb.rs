//! EVM-facing state-DB facade.
//!
//! Operation names and semantics follow the broader Ethereum state-DB
//! convention so an interpreter can drive the sandbox unmodified. Each
//! facade is used by a single logical executor; facades sharing a root
//! share its scratchpad, coalescer, and pinned block.

use crate::error::Result;
use crate::state::key_cache;
use crate::state::keys::{self, Domain};
use crate::state::overlay::{OverlayLayer, StateQuery, TxLog, TxReceipt};
use crate::state::rpc::BatchRpc;
use crate::utils::config::StateConfig;
use alloy::primitives::{address, Address, B256, U256};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Well-known sandbox accounts seeded with spendable balances.
pub const FAKE_ACCOUNT_0: Address = address!("00000000000000000000000000000000000face0");
pub const FAKE_ACCOUNT_1: Address = address!("00000000000000000000000000000000000face1");
pub const FAKE_ACCOUNT_2: Address = address!("00000000000000000000000000000000000face2");
pub const FAKE_ACCOUNT_3: Address = address!("00000000000000000000000000000000000face3");
pub const FAKE_ACCOUNT_RICH: Address = address!("0000000000000000000000000000000000facade");

const SUICIDED: [u8; 1] = [0x01];

pub struct OverlayStateDb {
    active: Arc<OverlayLayer>,
    cache_file_path: String,
    max_key_cache: u64,
    refund_gas: u64,
    exec_guard: Option<OwnedMutexGuard<()>>,
}

impl OverlayStateDb {
    /// Build a facade over a fresh root pinned to `block_number`. The root
    /// stays protected behind one derived layer; the public surface never
    /// writes to it directly.
    pub fn new(
        rpc: Arc<dyn BatchRpc>,
        block_number: u64,
        cfg: &StateConfig,
    ) -> anyhow::Result<Self> {
        let root = OverlayLayer::new_root(rpc, block_number, cfg)?;
        Ok(Self {
            active: root.derive("protect underlying"),
            cache_file_path: cfg.key_cache_file_path.clone(),
            max_key_cache: cfg.max_key_cache,
            refund_gas: 0,
            exec_guard: None,
        })
    }

    pub(crate) fn active(&self) -> &Arc<OverlayLayer> {
        &self.active
    }

    /// Reset the facade onto the root, optionally refreshing the root
    /// scratchpad from upstream via the hot-key cache.
    pub fn init_state(&mut self, fetch_new_state: bool, clear_cache: bool) -> Result<()> {
        let root = self.active.root_layer();
        tracing::info!(
            "[OVERLAY] resetting scratchpad... BN: {}",
            root.root_state().pinned_block()
        );
        if fetch_new_state {
            key_cache::reset_scratch_pad(
                &root,
                &self.cache_file_path,
                self.max_key_cache,
                clear_cache,
            )?;
        }
        self.active = root.derive("reset and protect underlying");
        Ok(())
    }

    // Account state -------------------------------------------------------

    pub fn get_balance(&self, account: Address) -> U256 {
        keys::decode_u256(&self.active.get(account, StateQuery::Balance))
    }

    pub fn set_balance(&mut self, account: Address, balance: U256) {
        self.active
            .put(keys::account_key(Domain::Balance, account), keys::encode_u256(balance));
    }

    pub fn add_balance(&mut self, account: Address, delta: U256) {
        let post = self.get_balance(account).saturating_add(delta);
        self.active
            .put(keys::account_key(Domain::Balance, account), keys::encode_u256(post));
    }

    pub fn sub_balance(&mut self, account: Address, delta: U256) {
        let post = self.get_balance(account).saturating_sub(delta);
        self.active
            .put(keys::account_key(Domain::Balance, account), keys::encode_u256(post));
    }

    pub fn get_nonce(&self, account: Address) -> u64 {
        keys::decode_u64(&self.active.get(account, StateQuery::Nonce))
    }

    pub fn set_nonce(&mut self, account: Address, nonce: u64) {
        self.active
            .put(keys::account_key(Domain::Nonce, account), keys::encode_u64(nonce));
    }

    pub fn get_code(&self, account: Address) -> Vec<u8> {
        self.active.get(account, StateQuery::Code)
    }

    pub fn set_code(&mut self, account: Address, code: Vec<u8>) {
        self.active.put(keys::account_key(Domain::Code, account), code);
    }

    pub fn get_code_size(&self, account: Address) -> usize {
        self.active.get(account, StateQuery::Code).len()
    }

    pub fn get_code_hash(&self, account: Address) -> B256 {
        keys::decode_word(&self.active.get(account, StateQuery::CodeHash))
    }

    pub fn set_code_hash(&mut self, account: Address, code_hash: B256) {
        self.active.put(
            keys::account_key(Domain::CodeHash, account),
            code_hash.as_slice().to_vec(),
        );
    }

    pub fn get_committed_state(&self, account: Address, slot: B256) -> B256 {
        keys::decode_word(&self.active.get(account, StateQuery::Storage(slot)))
    }

    pub fn get_state(&self, account: Address, slot: B256) -> B256 {
        self.get_committed_state(account, slot)
    }

    pub fn set_state(&mut self, account: Address, slot: B256, value: B256) {
        self.active
            .put(keys::state_key(account, slot), value.as_slice().to_vec());
    }

    pub fn suicide(&mut self, account: Address) -> bool {
        self.active
            .put(keys::account_key(Domain::Suicide, account), SUICIDED.to_vec());
        true
    }

    /// Scoped to the current layer only; ancestors are not consulted.
    /// Callers needing inheritance must merge first.
    pub fn has_suicided(&self, account: Address) -> bool {
        self.active
            .local_get(&keys::account_key(Domain::Suicide, account))
            .is_some_and(|val| val == SUICIDED)
    }

    pub fn exist(&self, account: Address) -> bool {
        !self.empty(account)
    }

    pub fn empty(&self, account: Address) -> bool {
        self.get_code_size(account) == 0
            && self.get_nonce(account) == 0
            && self.get_balance(account).is_zero()
    }

    /// Seed the well-known sandbox accounts with spendable balances.
    pub fn init_fake_accounts(&mut self) {
        let ether = U256::from(10u64).pow(U256::from(18u64));
        for account in [
            FAKE_ACCOUNT_0,
            FAKE_ACCOUNT_1,
            FAKE_ACCOUNT_2,
            FAKE_ACCOUNT_3,
        ] {
            self.add_balance(account, ether.saturating_mul(U256::from(1_000u64)));
        }
        self.add_balance(
            FAKE_ACCOUNT_RICH,
            ether.saturating_mul(U256::from(1_000_000_000u64)),
        );
    }

    // Refund counter ------------------------------------------------------

    pub fn add_refund(&mut self, delta: u64) {
        self.refund_gas = self.refund_gas.saturating_add(delta);
    }

    pub fn sub_refund(&mut self, delta: u64) {
        self.refund_gas = self.refund_gas.saturating_sub(delta);
    }

    pub fn get_refund(&self) -> u64 {
        self.refund_gas
    }

    // Overlay stack -------------------------------------------------------

    /// Push a child layer and make it active; the returned revision id
    /// feeds `revert_to_snapshot` / `merge_to`.
    pub fn snapshot(&mut self) -> u64 {
        let child = self.active.derive("snapshot");
        let revision_id = child.derive_cnt();
        self.active = child;
        revision_id
    }

    /// Discard every layer above the snapshot point; their writes vanish.
    pub fn revert_to_snapshot(&mut self, revision_id: u64) {
        if revision_id <= 1 {
            panic!("revert would expose the protected root layer");
        }
        let mut layer = self.active.pop();
        tracing::debug!(
            "[OVERLAY] rolling back... revision: {revision_id}, current: {}",
            layer.derive_cnt()
        );
        loop {
            if layer.derive_cnt() + 1 == revision_id {
                self.active = layer;
                return;
            }
            layer = layer.pop();
        }
    }

    /// Fold each layer's writes into its parent until the layer with
    /// `derive_cnt == revision_id` becomes active.
    pub fn merge_to(&mut self, revision_id: u64) {
        let mut layer = self.active.clone();
        tracing::info!(
            "[OVERLAY] merging... target revision: {revision_id}, current: {}",
            layer.derive_cnt()
        );
        while layer.derive_cnt() != revision_id {
            let parent = match layer.parent() {
                Some(parent) => parent,
                None => panic!("cannot merge past the root overlay layer"),
            };
            layer.fold_into(&parent);
            layer = parent;
        }
        self.active = layer;
    }

    /// Independent facade over a fresh child of the root; shares the root
    /// scratchpad and coalescer, sees none of this facade's writes.
    pub fn clone_from_root(&self) -> Self {
        Self {
            active: self.active.root_layer().derive("from root"),
            cache_file_path: self.cache_file_path.clone(),
            max_key_cache: self.max_key_cache,
            refund_gas: 0,
            exec_guard: None,
        }
    }

    // Logs & receipts -----------------------------------------------------

    pub fn start_log_collection(&mut self, tx_hash: B256, block_hash: B256) {
        self.active.set_log_target(tx_hash, block_hash);
    }

    pub fn add_log(&mut self, log: TxLog) {
        self.active.add_log(log);
    }

    pub fn get_logs(&self, tx_hash: B256) -> Vec<TxLog> {
        self.active.collect_logs(tx_hash)
    }

    pub fn add_receipt(&mut self, tx_hash: B256, receipt: TxReceipt) {
        self.active.add_receipt(tx_hash, receipt);
    }

    pub fn get_receipt(&self, tx_hash: B256) -> Option<TxReceipt> {
        let mut receipt = self.active.find_receipt(tx_hash)?;
        receipt.logs = self.get_logs(tx_hash);
        Some(receipt)
    }

    // Introspection -------------------------------------------------------

    pub fn state_block_number(&self) -> u64 {
        self.active.root_layer().root_state().pinned_block()
    }

    pub fn cache_size(&self) -> usize {
        self.active.root_layer().cache_size()
    }

    pub fn rpc_request_count(&self) -> u64 {
        self.active.root_layer().root_state().fetcher().rpc_call_count()
    }

    pub fn get_overlay_depth(&self) -> u64 {
        self.active.derive_cnt()
    }

    pub fn set_batch_size(&self, batch_size: usize) {
        self.active
            .root_layer()
            .root_state()
            .fetcher()
            .set_batch_size(batch_size);
    }

    // Advisory execution lock ---------------------------------------------

    /// Serialize transaction execution against concurrent call clones.
    /// Held until `state_unlock`; facades sharing a root share the lock.
    pub fn state_lock(&mut self) {
        let root = self.active.root_layer();
        let lock = root.root_state().exec_lock();
        let guard = root
            .root_state()
            .bridge()
            .block_on(async move { lock.lock_owned().await });
        self.exec_guard = Some(guard);
    }

    pub fn state_unlock(&mut self) {
        self.exec_guard = None;
    }

    // EVM interface stubs -------------------------------------------------
    //
    // Access lists, preimages, and storage iteration are deliberately
    // permissive no-ops in a forked sandbox.

    pub fn create_account(&mut self, _account: Address) {}

    pub fn prepare_access_list(
        &mut self,
        _sender: Address,
        _dest: Option<Address>,
        _precompiles: &[Address],
    ) {
    }

    pub fn address_in_access_list(&self, _account: Address) -> bool {
        true
    }

    pub fn slot_in_access_list(&self, _account: Address, _slot: B256) -> (bool, bool) {
        (true, true)
    }

    pub fn add_address_to_access_list(&mut self, _account: Address) {}

    pub fn add_slot_to_access_list(&mut self, _account: Address, _slot: B256) {}

    pub fn add_preimage(&mut self, _hash: B256, _preimage: &[u8]) {}

    pub fn for_each_storage(
        &self,
        _account: Address,
        _callback: impl FnMut(B256, B256) -> bool,
    ) {
    }
}

impl Clone for OverlayStateDb {
    /// An independent facade over a fresh child of the current layer. The
    /// clone sees everything written so far but its own writes stay
    /// isolated until merged.
    fn clone(&self) -> Self {
        Self {
            active: self.active.derive("clone"),
            cache_file_path: self.cache_file_path.clone(),
            max_key_cache: self.max_key_cache,
            refund_gas: 0,
            exec_guard: None,
        }
    }
}
