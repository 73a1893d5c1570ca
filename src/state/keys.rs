//! Canonical scratchpad keys and per-domain value codecs.
//!
//! Every datum the engine tracks lives in a flat byte-keyed map. Keys are
//! `tag ∥ addr` for account-level domains and `tag ∥ addr ∥ slot` for
//! storage, where each tag is a fixed 32-byte constant. The tag prefix
//! keeps account-level and storage-level entries disjoint.

use alloy::primitives::{keccak256, Address, B256, U256};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Balance,
    Nonce,
    Code,
    CodeHash,
    State,
    Suicide,
}

const DOMAIN_COUNT: usize = 6;

fn tags() -> &'static [B256; DOMAIN_COUNT] {
    static TAGS: OnceLock<[B256; DOMAIN_COUNT]> = OnceLock::new();
    TAGS.get_or_init(|| {
        [
            keccak256("mfer-scratchpad-balance"),
            keccak256("mfer-scratchpad-nonce"),
            keccak256("mfer-scratchpad-code"),
            keccak256("mfer-scratchpad-codehash"),
            keccak256("mfer-scratchpad-state"),
            keccak256("mfer-scratchpad-suicide"),
        ]
    })
}

impl Domain {
    pub fn tag(self) -> B256 {
        tags()[self as usize]
    }
}

pub const ACCOUNT_KEY_LEN: usize = 32 + 20;
pub const STATE_KEY_LEN: usize = 32 + 20 + 32;

/// `tag ∥ addr` — 52 bytes.
pub fn account_key(domain: Domain, account: Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(ACCOUNT_KEY_LEN);
    key.extend_from_slice(domain.tag().as_slice());
    key.extend_from_slice(account.as_slice());
    key
}

/// `tag(STATE) ∥ addr ∥ slot` — 84 bytes.
pub fn state_key(account: Address, slot: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(STATE_KEY_LEN);
    key.extend_from_slice(Domain::State.tag().as_slice());
    key.extend_from_slice(account.as_slice());
    key.extend_from_slice(slot.as_slice());
    key
}

/// Split a canonical key back into `(tag, address, slot)`. The slot is
/// `Some` only for 84-byte storage keys; foreign shapes return `None`.
pub fn split_key(key: &[u8]) -> Option<(B256, Address, Option<B256>)> {
    match key.len() {
        ACCOUNT_KEY_LEN => {
            let tag = B256::from_slice(&key[..32]);
            let address = Address::from_slice(&key[32..52]);
            Some((tag, address, None))
        }
        STATE_KEY_LEN => {
            let tag = B256::from_slice(&key[..32]);
            let address = Address::from_slice(&key[32..52]);
            let slot = B256::from_slice(&key[52..84]);
            Some((tag, address, Some(slot)))
        }
        _ => None,
    }
}

/// Trimmed big-endian integer encoding; zero encodes as an empty slice.
pub fn encode_u256(value: U256) -> Vec<u8> {
    value.to_be_bytes_trimmed_vec()
}

pub fn decode_u256(bytes: &[u8]) -> U256 {
    U256::try_from_be_slice(bytes).unwrap_or_default()
}

pub fn encode_u64(value: u64) -> Vec<u8> {
    encode_u256(U256::from(value))
}

pub fn decode_u64(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, b| acc.saturating_mul(256).saturating_add(u64::from(*b)))
}

/// Left-padded 32-byte word decoding; oversized input keeps the low bytes.
pub fn decode_word(bytes: &[u8]) -> B256 {
    let mut word = [0u8; 32];
    let n = bytes.len().min(32);
    word[32 - n..].copy_from_slice(&bytes[bytes.len() - n..]);
    B256::from(word)
}
