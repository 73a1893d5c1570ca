//! Dirty-set export as a JSON-RPC `StateOverride`.

use crate::state::keys::{self, Domain};
use crate::state::overlay::ScratchPad;
use crate::state::statedb::OverlayStateDb;
use alloy::primitives::{Address, Bytes, B256, U256, U64};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-account override entry in the canonical Ethereum state-override
/// shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverrideAccount {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<U64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<HashMap<B256, B256>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_diff: Option<HashMap<B256, B256>>,
}

/// The collection of overridden accounts for pass-through `eth_call`.
pub type StateOverride = HashMap<Address, OverrideAccount>;

/// Flatten the chain above the root into one map with child-wins
/// semantics: a key already present came from a deeper layer and stays.
fn merged_scratchpad(db: &OverlayStateDb) -> ScratchPad {
    let mut merged = ScratchPad::new();
    let mut layer = db.active().clone();
    while !layer.is_root() {
        for (k, v) in layer.snapshot_scratchpad() {
            merged.entry(k).or_insert(v);
        }
        layer = match layer.parent() {
            Some(parent) => parent,
            None => break,
        };
    }
    merged
}

impl OverlayStateDb {
    /// Export the cumulative dirty set as a `StateOverride`. Reads go
    /// through a root clone with the merged writes installed, so committed
    /// values resolve without extra upstream traffic for dirty keys.
    pub fn get_state_diff(&self) -> StateOverride {
        let merged = merged_scratchpad(self);
        let view = self.clone_from_root();
        view.active().install_scratchpad(merged.clone());

        let mut accounts = StateOverride::new();
        for key in merged.keys() {
            let Some((tag, address, slot)) = keys::split_key(key) else {
                continue;
            };
            let entry = accounts.entry(address).or_default();
            if tag == Domain::Balance.tag() {
                entry.balance = Some(view.get_balance(address));
            } else if tag == Domain::Nonce.tag() {
                entry.nonce = Some(U64::from(view.get_nonce(address)));
            } else if tag == Domain::Code.tag() {
                entry.code = Some(Bytes::from(view.get_code(address)));
            } else if tag == Domain::State.tag() {
                let Some(slot) = slot else { continue };
                let value = view.get_state(address, slot);
                entry
                    .state_diff
                    .get_or_insert_with(HashMap::new)
                    .insert(slot, value);
            }
        }
        accounts
    }
}
