//! `StateOverride` export: dirty fields only, child-wins flattening, and
//! the canonical wire shape.

mod common;

use alloy::primitives::{Address, B256, U256, U64};
use common::{fast_config, MockRpc};
use mfer_node::OverlayStateDb;

#[test]
fn test_diff_exports_dirty_fields_only() {
    let mock = MockRpc::new();
    let account = Address::repeat_byte(0xaa);
    let slot = B256::repeat_byte(0x01);
    let value = B256::repeat_byte(0x02);

    let mut db = OverlayStateDb::new(mock, 42, &fast_config()).expect("engine");
    db.set_balance(account, U256::from(7u64));
    db.set_state(account, slot, value);

    let diff = db.get_state_diff();
    assert_eq!(diff.len(), 1);

    let entry = diff.get(&account).expect("dirty account");
    assert_eq!(entry.balance, Some(U256::from(7u64)));
    assert_eq!(entry.nonce, None);
    assert_eq!(entry.code, None);
    assert_eq!(entry.state, None);
    let state_diff = entry.state_diff.as_ref().expect("state diff");
    assert_eq!(state_diff.len(), 1);
    assert_eq!(state_diff.get(&slot), Some(&value));

    // Every dirty key resolves from the merged view; the export itself
    // must not touch upstream.
    assert_eq!(db.rpc_request_count(), 0);
}

#[test]
fn test_diff_flattens_child_wins_across_layers() {
    let mock = MockRpc::new();
    let account = Address::repeat_byte(0xbb);

    let mut db = OverlayStateDb::new(mock, 42, &fast_config()).expect("engine");
    db.set_balance(account, U256::from(50u64));
    db.snapshot();
    db.set_balance(account, U256::from(70u64));
    db.set_nonce(account, 9);
    db.snapshot();
    db.set_code(account, vec![0x60, 0x0a]);

    let diff = db.get_state_diff();
    let entry = diff.get(&account).expect("dirty account");
    assert_eq!(entry.balance, Some(U256::from(70u64)));
    assert_eq!(entry.nonce, Some(U64::from(9u64)));
    assert_eq!(entry.code.as_deref(), Some(&[0x60u8, 0x0a][..]));
}

#[test]
fn test_diff_ignores_reverted_writes() {
    let mock = MockRpc::new();
    let account = Address::repeat_byte(0xcc);

    let mut db = OverlayStateDb::new(mock, 42, &fast_config()).expect("engine");
    db.set_nonce(account, 4);
    let id = db.snapshot();
    db.set_nonce(account, 11);
    db.set_balance(account, U256::from(123u64));
    db.revert_to_snapshot(id);

    let diff = db.get_state_diff();
    let entry = diff.get(&account).expect("dirty account");
    assert_eq!(entry.nonce, Some(U64::from(4u64)));
    assert_eq!(entry.balance, None);
}

#[test]
fn test_diff_matches_chain_answers_per_dirty_field() {
    let mock = MockRpc::new();
    let a = Address::repeat_byte(0x01);
    let b = Address::repeat_byte(0x02);
    let slot = B256::repeat_byte(0x0e);

    let mut db = OverlayStateDb::new(mock, 42, &fast_config()).expect("engine");
    db.set_balance(a, U256::from(1_234u64));
    db.set_state(a, slot, B256::repeat_byte(0x5a));
    db.snapshot();
    db.set_nonce(b, 77);
    db.set_state(a, slot, B256::repeat_byte(0x5b));

    let diff = db.get_state_diff();
    let entry_a = diff.get(&a).expect("account a");
    let entry_b = diff.get(&b).expect("account b");

    assert_eq!(entry_a.balance, Some(db.get_balance(a)));
    assert_eq!(
        entry_a.state_diff.as_ref().and_then(|m| m.get(&slot)),
        Some(&db.get_state(a, slot))
    );
    assert_eq!(entry_b.nonce, Some(U64::from(db.get_nonce(b))));
}

#[test]
fn test_diff_serializes_to_state_override_wire_shape() {
    let mock = MockRpc::new();
    let account = Address::repeat_byte(0xdd);
    let slot = B256::repeat_byte(0x03);

    let mut db = OverlayStateDb::new(mock, 42, &fast_config()).expect("engine");
    db.set_balance(account, U256::from(0x46u64));
    db.set_state(account, slot, B256::repeat_byte(0x04));

    let json = serde_json::to_value(db.get_state_diff()).expect("serialize");
    let obj = json.as_object().expect("object keyed by address");
    assert_eq!(obj.len(), 1);
    let (addr_key, entry) = obj.iter().next().expect("one account");
    assert!(addr_key.starts_with("0x"));
    assert_eq!(entry["balance"], "0x46");
    assert!(entry["stateDiff"].is_object());
    assert!(entry.get("nonce").is_none());
    assert!(entry.get("code").is_none());
}
