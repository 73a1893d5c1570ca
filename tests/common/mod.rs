#![allow(dead_code)]

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use mfer_node::{BatchEntry, BatchReply, BatchRpc, StateConfig};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct MockAccount {
    pub nonce: u64,
    pub balance: U256,
    pub code: Vec<u8>,
}

/// Canned upstream: serves accounts and storage from in-memory maps the
/// way a JSON-RPC node would, counting transport batches and elements.
/// Unknown accounts and slots resolve to zero, matching a live endpoint.
#[derive(Default)]
pub struct MockRpc {
    accounts: Mutex<HashMap<Address, MockAccount>>,
    storage: Mutex<HashMap<(Address, B256), B256>>,
    batch_calls: AtomicU64,
    element_calls: AtomicU64,
    fail_transport: AtomicU64,
}

impl MockRpc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_account(&self, address: Address, nonce: u64, balance: U256, code: Vec<u8>) {
        self.accounts.lock().unwrap().insert(
            address,
            MockAccount {
                nonce,
                balance,
                code,
            },
        );
    }

    pub fn put_slot(&self, address: Address, slot: B256, value: B256) {
        self.storage.lock().unwrap().insert((address, slot), value);
    }

    /// Fail the next `n` transport batches with a connection error.
    pub fn fail_next_transport(&self, n: u64) {
        self.fail_transport.store(n, Ordering::SeqCst);
    }

    pub fn batch_calls(&self) -> u64 {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn element_calls(&self) -> u64 {
        self.element_calls.load(Ordering::SeqCst)
    }

    fn account(&self, address: Address) -> MockAccount {
        self.accounts
            .lock()
            .unwrap()
            .get(&address)
            .cloned()
            .unwrap_or_default()
    }

    fn param_address(params: &[Value], idx: usize) -> Address {
        params
            .get(idx)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    fn param_word(params: &[Value], idx: usize) -> B256 {
        params
            .get(idx)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    fn ok(value: Value) -> BatchReply {
        BatchReply {
            result: Some(value),
            error: None,
        }
    }
}

#[async_trait]
impl BatchRpc for MockRpc {
    async fn batch_call(&self, entries: &[BatchEntry]) -> anyhow::Result<Vec<BatchReply>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.fail_transport.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_transport.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("connection reset by peer");
        }

        self.element_calls
            .fetch_add(entries.len() as u64, Ordering::SeqCst);

        let mut replies = Vec::with_capacity(entries.len());
        for entry in entries {
            let params = entry.params.as_array().cloned().unwrap_or_default();
            let address = Self::param_address(&params, 0);
            let reply = match entry.method {
                "eth_getTransactionCount" => {
                    Self::ok(Value::String(format!("0x{:x}", self.account(address).nonce)))
                }
                "eth_getBalance" => {
                    Self::ok(Value::String(format!("0x{:x}", self.account(address).balance)))
                }
                "eth_getCode" => Self::ok(Value::String(format!(
                    "0x{}",
                    hex::encode(self.account(address).code)
                ))),
                "eth_getStorageAt" => {
                    let slot = Self::param_word(&params, 1);
                    let value = self
                        .storage
                        .lock()
                        .unwrap()
                        .get(&(address, slot))
                        .copied()
                        .unwrap_or_default();
                    Self::ok(Value::String(format!("0x{}", hex::encode(value))))
                }
                "eth_getProof" => {
                    let account = self.account(address);
                    Self::ok(serde_json::json!({
                        "address": address,
                        "accountProof": ["0xf90211a0"],
                        "balance": format!("0x{:x}", account.balance),
                        "codeHash": B256::ZERO,
                        "nonce": format!("0x{:x}", account.nonce),
                        "storageHash": B256::ZERO,
                        "storageProof": [],
                    }))
                }
                other => BatchReply {
                    result: None,
                    error: Some(format!("json-rpc error code -32601: method {other} not found")),
                },
            };
            replies.push(reply);
        }
        Ok(replies)
    }
}

/// Engine config tuned for tests: same semantics, faster clocks.
pub fn fast_config() -> StateConfig {
    StateConfig {
        slot_tick: Duration::from_millis(2),
        account_tick: Duration::from_millis(2),
        retry_backoff: Duration::from_millis(5),
        coalescer_retry_backoff: Duration::from_millis(10),
        ..StateConfig::default()
    }
}
