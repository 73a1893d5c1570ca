//! Sync-to-async bridge for the facade surface.
//!
//! The state-DB contract is synchronous, but misses at the root resolve
//! through the coalescer, which lives on a tokio runtime. Three call-site
//! shapes have to work: plain threads with no ambient runtime, callers
//! already inside a multi-thread runtime, and callers inside a
//! current-thread runtime (which cannot re-enter `block_on` on its own
//! thread and must hop through a worker).

use std::future::Future;
use std::sync::{mpsc, Arc, OnceLock};
use tokio::runtime::RuntimeFlavor;

const BRIDGE_WORKER_QUEUE_CAPACITY: usize = 256;

type BridgeJob = Box<dyn FnOnce() + Send + 'static>;

fn bridge_worker_sender() -> &'static mpsc::SyncSender<BridgeJob> {
    static TX: OnceLock<mpsc::SyncSender<BridgeJob>> = OnceLock::new();
    TX.get_or_init(|| {
        let (tx, rx) = mpsc::sync_channel::<BridgeJob>(BRIDGE_WORKER_QUEUE_CAPACITY);
        let _ = std::thread::Builder::new()
            .name("mfer-state-bridge".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
            });
        tx
    })
}

/// Runtime attachment for the root layer: reuse an ambient multi-thread
/// runtime when there is one, otherwise boot a private one. A private
/// runtime is also used under an ambient current-thread runtime, whose
/// single thread would starve the coalescer while a getter blocks.
pub(crate) struct RuntimeBridge {
    handle: tokio::runtime::Handle,
    runtime_guard: Option<Arc<tokio::runtime::Runtime>>,
}

impl RuntimeBridge {
    pub fn attach() -> anyhow::Result<Self> {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            if handle.runtime_flavor() == RuntimeFlavor::MultiThread {
                return Ok(Self {
                    handle,
                    runtime_guard: None,
                });
            }
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| {
                anyhow::anyhow!("failed to bootstrap tokio runtime for the state engine: {err}")
            })?;
        let runtime = Arc::new(runtime);
        let handle = runtime.handle().clone();
        Ok(Self {
            handle,
            runtime_guard: Some(runtime),
        })
    }

    pub fn handle(&self) -> &tokio::runtime::Handle {
        &self.handle
    }

    /// Run `fut` to completion from a synchronous call site.
    pub fn block_on<T, Fut>(&self, fut: Fut) -> T
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::runtime::Handle::try_current() {
            // Plain thread: blocking directly on our handle is legal.
            Err(_) => self.handle.block_on(fut),
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
                let handle = self.handle.clone();
                tokio::task::block_in_place(move || handle.block_on(fut))
            }
            // Current-thread runtime: hop to the worker so this thread is
            // never asked to block on itself. No timeout here — callers of
            // the get pipeline are expected to wait out upstream retries.
            Ok(_) => {
                let (tx, rx) = mpsc::sync_channel(1);
                let handle = self.handle.clone();
                let job: BridgeJob = Box::new(move || {
                    let _ = tx.send(handle.block_on(fut));
                });
                match bridge_worker_sender().try_send(job) {
                    Ok(()) => {}
                    Err(mpsc::TrySendError::Full(_)) => {
                        panic!("state bridge queue full; too many concurrent sync getters")
                    }
                    Err(mpsc::TrySendError::Disconnected(_)) => {
                        panic!("state bridge worker terminated")
                    }
                }
                match rx.recv() {
                    Ok(value) => value,
                    Err(_) => panic!("state bridge worker dropped a pending job"),
                }
            }
        }
    }
}
