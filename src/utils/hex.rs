use alloy::primitives::B256;

/// Clean a hex string by removing the "0x" prefix and whitespace.
pub fn clean_hex(s: &str) -> &str {
    let s = s.trim();
    if let Some(stripped) = s.strip_prefix("0x") {
        stripped
    } else {
        s
    }
}

/// Parse a JSON-RPC hex quantity (`0x1a2b`) into a `u64`.
pub fn quantity_to_u64(s: &str) -> Option<u64> {
    u64::from_str_radix(clean_hex(s), 16).ok()
}

/// Parse a JSON-RPC hex quantity into a `U256`.
pub fn quantity_to_u256(s: &str) -> Option<alloy::primitives::U256> {
    alloy::primitives::U256::from_str_radix(clean_hex(s), 16).ok()
}

/// Decode a hex byte string (`eth_getCode` style payloads) into raw bytes.
pub fn hex_to_bytes(s: &str) -> Option<Vec<u8>> {
    hex::decode(clean_hex(s)).ok()
}

/// Decode a hex byte string into a left-padded 32-byte word
/// (`eth_getStorageAt` payloads).
pub fn hex_to_word(s: &str) -> Option<B256> {
    let bytes = hex::decode(clean_hex(s)).ok()?;
    if bytes.len() > 32 {
        return None;
    }
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(&bytes);
    Some(B256::from(word))
}
