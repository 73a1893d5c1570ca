//! Hot-key cache file round trips and root warm-up.

mod common;

use alloy::primitives::{Address, B256, U256};
use common::{fast_config, MockRpc};
use mfer_node::{OverlayStateDb, StateConfig};
use std::sync::atomic::{AtomicU64, Ordering};

fn temp_cache_path() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let n = SEQ.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir()
        .join(format!("mfer-keycache-{}-{n}.txt", std::process::id()))
        .to_string_lossy()
        .into_owned()
}

fn cache_line(address: Address, slot: B256) -> String {
    let mut tail = Vec::with_capacity(52);
    tail.extend_from_slice(address.as_slice());
    tail.extend_from_slice(slot.as_slice());
    hex::encode(tail)
}

fn warm_config(path: &str) -> StateConfig {
    StateConfig {
        key_cache_file_path: path.to_string(),
        ..fast_config()
    }
}

#[test]
fn test_warm_up_prefetches_cached_slots_and_accounts() {
    let mock = MockRpc::new();
    let account = Address::repeat_byte(0xaa);
    let slot = B256::repeat_byte(0x01);
    let value = B256::repeat_byte(0x99);
    mock.put_slot(account, slot, value);
    mock.put_account(account, 5, U256::from(500u64), vec![0x60, 0x01]);

    let path = temp_cache_path();
    std::fs::write(&path, format!("{}\n", cache_line(account, slot))).expect("seed cache file");

    let mut db = OverlayStateDb::new(mock, 42, &warm_config(&path)).expect("engine");
    db.init_state(true, false).expect("warm-up");

    // One slot batch plus one account batch.
    let after_warmup = db.rpc_request_count();
    assert_eq!(after_warmup, 2);

    // Everything the warm-up touched now resolves from the root cache.
    assert_eq!(db.get_state(account, slot), value);
    assert_eq!(db.get_balance(account), U256::from(500u64));
    assert_eq!(db.get_nonce(account), 5);
    assert_eq!(db.get_code(account), vec![0x60, 0x01]);
    assert_eq!(db.rpc_request_count(), after_warmup);

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_warm_up_rewrites_file_with_live_key_set() {
    let mock = MockRpc::new();
    let account = Address::repeat_byte(0xbb);
    let slot = B256::repeat_byte(0x07);
    mock.put_slot(account, slot, B256::repeat_byte(0x11));

    let path = temp_cache_path();
    let mut db = OverlayStateDb::new(mock, 42, &warm_config(&path)).expect("engine");

    // A normal read lands the slot key in the root cache...
    assert_eq!(db.get_state(account, slot), B256::repeat_byte(0x11));

    // ...and the next warm-up persists it.
    db.init_state(true, false).expect("warm-up");
    let contents = std::fs::read_to_string(&path).expect("cache file");
    assert!(contents.contains(&cache_line(account, slot)));

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_malformed_and_excess_lines_are_skipped() {
    let mock = MockRpc::new();
    let account = Address::repeat_byte(0xcc);
    let keep = B256::repeat_byte(0x01);
    let dropped = B256::repeat_byte(0x02);
    mock.put_slot(account, keep, B256::repeat_byte(0xaa));
    mock.put_slot(account, dropped, B256::repeat_byte(0xbb));

    let path = temp_cache_path();
    let contents = format!(
        "{}\nnot hex at all\ndeadbeef\n{}\n",
        cache_line(account, keep),
        cache_line(account, dropped)
    );
    std::fs::write(&path, contents).expect("seed cache file");

    // max_key_cache 1: only the first well-formed line is consumed.
    let cfg = StateConfig {
        max_key_cache: 1,
        ..warm_config(&path)
    };
    let mut db = OverlayStateDb::new(mock, 42, &cfg).expect("engine");
    db.init_state(true, false).expect("warm-up");

    let rewritten = std::fs::read_to_string(&path).expect("cache file");
    assert!(rewritten.contains(&cache_line(account, keep)));
    assert!(!rewritten.contains(&cache_line(account, dropped)));
    assert!(!rewritten.contains("deadbeef"));

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_clear_cache_wipes_scratchpad_and_truncates_file() {
    let mock = MockRpc::new();
    let account = Address::repeat_byte(0xdd);
    let slot = B256::repeat_byte(0x03);
    mock.put_slot(account, slot, B256::repeat_byte(0x77));

    let path = temp_cache_path();
    std::fs::write(&path, format!("{}\n", cache_line(account, slot))).expect("seed cache file");

    let mut db = OverlayStateDb::new(mock, 42, &warm_config(&path)).expect("engine");
    db.init_state(true, false).expect("warm-up");
    assert!(db.cache_size() > 0);

    db.init_state(true, true).expect("clear");
    assert_eq!(db.cache_size(), 0);
    let contents = std::fs::read_to_string(&path).expect("cache file");
    assert!(contents.is_empty());

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_empty_path_disables_warm_up() {
    let mock = MockRpc::new();
    let account = Address::repeat_byte(0xee);
    mock.put_account(account, 1, U256::from(9u64), Vec::new());

    let mut db = OverlayStateDb::new(mock.clone(), 42, &fast_config()).expect("engine");
    assert_eq!(db.get_balance(account), U256::from(9u64));
    let cached = db.cache_size();

    db.init_state(true, false).expect("no-op warm-up");
    assert_eq!(db.cache_size(), cached);
    assert_eq!(mock.batch_calls(), 1);
}
