//! Root-resident request coalescer.
//!
//! Concurrent executors park storage and account reads on two bounded
//! queues; a single long-lived task drains whatever is pending at each
//! tick and dispatches one windowed upstream fetch per drain. The storage
//! ticker runs hotter than the account ticker because slot reads dominate.
//! A failed dispatch is retried until upstream recovers; callers stay
//! blocked on their reply channels, which is the contract the EVM step
//! needs (it cannot proceed without an answer).

use crate::state::fetcher::{AccountTriple, SlotReq, UpstreamFetcher};
use alloy::primitives::{Address, B256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

pub(crate) const SLOT_QUEUE_BOUND: usize = 500;
pub(crate) const ACCOUNT_QUEUE_BOUND: usize = 200;

pub(crate) struct SlotRequest {
    pub address: Address,
    pub slot: B256,
    pub reply: oneshot::Sender<B256>,
}

pub(crate) struct AccountRequest {
    pub account: Address,
    pub reply: oneshot::Sender<AccountTriple>,
}

/// Sending half handed to the root layer. Senders block when a queue is
/// full, which bounds the burst a single window can absorb.
#[derive(Clone)]
pub(crate) struct CoalescerHandle {
    pub slot_tx: mpsc::Sender<SlotRequest>,
    pub account_tx: mpsc::Sender<AccountRequest>,
}

pub(crate) fn spawn(
    handle: &tokio::runtime::Handle,
    fetcher: Arc<UpstreamFetcher>,
    slot_tick: Duration,
    account_tick: Duration,
    failure_backoff: Duration,
) -> (CoalescerHandle, tokio::task::JoinHandle<()>) {
    let (slot_tx, slot_rx) = mpsc::channel(SLOT_QUEUE_BOUND);
    let (account_tx, account_rx) = mpsc::channel(ACCOUNT_QUEUE_BOUND);
    let task = handle.spawn(run(
        fetcher,
        slot_rx,
        account_rx,
        slot_tick,
        account_tick,
        failure_backoff,
    ));
    (
        CoalescerHandle {
            slot_tx,
            account_tx,
        },
        task,
    )
}

async fn run(
    fetcher: Arc<UpstreamFetcher>,
    mut slot_rx: mpsc::Receiver<SlotRequest>,
    mut account_rx: mpsc::Receiver<AccountRequest>,
    slot_tick: Duration,
    account_tick: Duration,
    failure_backoff: Duration,
) {
    let mut slot_ticker = tokio::time::interval(slot_tick);
    let mut account_ticker = tokio::time::interval(account_tick);
    slot_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    account_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = slot_ticker.tick() => drain_slots(&fetcher, &mut slot_rx, failure_backoff).await,
            _ = account_ticker.tick() => drain_accounts(&fetcher, &mut account_rx, failure_backoff).await,
        }
    }
}

async fn drain_slots(
    fetcher: &UpstreamFetcher,
    rx: &mut mpsc::Receiver<SlotRequest>,
    failure_backoff: Duration,
) {
    let mut pending = Vec::new();
    while let Ok(request) = rx.try_recv() {
        pending.push(request);
    }
    if pending.is_empty() {
        return;
    }

    let mut reqs: Vec<SlotReq> = pending
        .iter()
        .map(|request| SlotReq::new(request.address, request.slot))
        .collect();
    loop {
        match fetcher.fetch_slots(&mut reqs).await {
            Ok(()) => break,
            Err(err) => {
                tracing::error!("[COALESCER] loadState batch failed: {err}");
                tokio::time::sleep(failure_backoff).await;
            }
        }
    }

    for (request, req) in pending.into_iter().zip(reqs) {
        // A dropped receiver means the caller went away; nothing to do.
        let _ = request.reply.send(req.value);
    }
}

async fn drain_accounts(
    fetcher: &UpstreamFetcher,
    rx: &mut mpsc::Receiver<AccountRequest>,
    failure_backoff: Duration,
) {
    let mut pending = Vec::new();
    while let Ok(request) = rx.try_recv() {
        pending.push(request);
    }
    if pending.is_empty() {
        return;
    }

    let accounts: Vec<Address> = pending.iter().map(|request| request.account).collect();
    let triples = loop {
        match fetcher.fetch_accounts(&accounts).await {
            Ok(triples) => break triples,
            Err(err) => {
                tracing::error!("[COALESCER] loadAccount batch failed: {err}");
                tokio::time::sleep(failure_backoff).await;
            }
        }
    };

    for (request, triple) in pending.into_iter().zip(triples) {
        let _ = request.reply.send(triple);
    }
}
