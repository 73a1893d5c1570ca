//! Hot-key cache file and root warm-up.
//!
//! The file is a plaintext list, one hex-encoded 52-byte `addr ∥ slot`
//! tail per line. Warm-up seeds the root scratchpad with placeholders for
//! every cached tail, refetches all of them in one windowed batch, rewrites
//! the file from the live key set, then prefetches every accessed account.
//! The whole routine holds the root write-lock; readers block for its
//! duration.

use crate::error::{KeyCacheError, Result};
use crate::state::fetcher::SlotReq;
use crate::state::keys::{self, Domain};
use crate::state::overlay::OverlayLayer;
use alloy::primitives::Address;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::sync::Arc;

fn io_err(path: &str, source: std::io::Error) -> KeyCacheError {
    KeyCacheError::Io {
        path: path.to_string(),
        source,
    }
}

pub(crate) fn reset_scratch_pad(
    root: &Arc<OverlayLayer>,
    path: &str,
    max_key_cache: u64,
    clear_cache: bool,
) -> Result<()> {
    let state = root.root_state();
    let fetcher = state.fetcher();
    let mut pad = root.pad_write();
    tracing::debug!("[WARMUP] scratchpad locked");

    // An empty path disables warm-up entirely.
    if path.is_empty() {
        if clear_cache {
            pad.clear();
            fetcher.clear_accessed();
        }
        return Ok(());
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .map_err(|source| io_err(path, source))?;

    if clear_cache {
        pad.clear();
        fetcher.clear_accessed();
        file.set_len(0).map_err(|source| io_err(path, source))?;
        return Ok(());
    }

    // Seed placeholders for every cached slot tail.
    tracing::debug!("[WARMUP] loading cached scratchpad keys");
    let mut seeded = 0u64;
    for line in BufReader::new(&file).lines() {
        if seeded >= max_key_cache {
            break;
        }
        let line = line.map_err(|source| io_err(path, source))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some(tail) = crate::utils::hex::hex_to_bytes(trimmed) else {
            tracing::warn!("[WARMUP] skipping malformed cache line");
            continue;
        };
        if tail.len() != keys::STATE_KEY_LEN - 32 {
            tracing::warn!("[WARMUP] skipping cache line of length {}", tail.len());
            continue;
        }
        let mut key = Vec::with_capacity(keys::STATE_KEY_LEN);
        key.extend_from_slice(Domain::State.tag().as_slice());
        key.extend_from_slice(&tail);
        pad.insert(key, Vec::new());
        seeded += 1;
    }

    // Collect every storage entry (cached and freshly seeded), mark its
    // account, and remember the tail for the file rewrite.
    let mut reqs = Vec::new();
    let mut tails = String::new();
    for key in pad.keys() {
        let Some((tag, address, Some(slot))) = keys::split_key(key) else {
            continue;
        };
        if tag != Domain::State.tag() {
            continue;
        }
        fetcher.mark_accessed(address);
        tails.push_str(&hex::encode(&key[32..]));
        tails.push('\n');
        reqs.push(SlotReq::new(address, slot));
    }

    let slot_count = reqs.len();
    let fetcher_arc = state.fetcher_arc();
    let fetched = state.bridge().block_on(async move {
        let mut reqs = reqs;
        fetcher_arc.fetch_slots(&mut reqs).await.map(|()| reqs)
    })?;

    file.set_len(0).map_err(|source| io_err(path, source))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|source| io_err(path, source))?;
    file.write_all(tails.as_bytes())
        .map_err(|source| io_err(path, source))?;
    tracing::info!("[WARMUP] cache saved @ {path}");

    for req in &fetched {
        pad.insert(
            keys::state_key(req.address, req.slot),
            req.value.as_slice().to_vec(),
        );
    }
    tracing::info!("[WARMUP] state prefetch done, slot num: {slot_count}");

    let accounts: Vec<Address> = fetcher.accessed_snapshot();
    tracing::info!("[WARMUP] prefetching {} accounts", accounts.len());
    let fetcher_arc = state.fetcher_arc();
    let to_fetch = accounts.clone();
    let triples = state
        .bridge()
        .block_on(async move { fetcher_arc.fetch_accounts(&to_fetch).await });
    let triples = match triples {
        Ok(triples) => triples,
        Err(err) => {
            tracing::error!("[WARMUP] account prefetch failed: {err}");
            return Ok(());
        }
    };
    for triple in triples {
        pad.insert(
            keys::account_key(Domain::Balance, triple.account),
            keys::encode_u256(triple.balance),
        );
        pad.insert(
            keys::account_key(Domain::Nonce, triple.account),
            keys::encode_u64(triple.nonce),
        );
        pad.insert(
            keys::account_key(Domain::CodeHash, triple.account),
            triple.code_hash.as_slice().to_vec(),
        );
        pad.insert(keys::account_key(Domain::Code, triple.account), triple.code);
    }
    tracing::info!("[WARMUP] account prefetch done");
    Ok(())
}
