//! Serialized async access to a [`LedgerStore`].
//!
//! The store is synchronous and single-owner. [`TransactionQueue`] moves it
//! onto one dedicated worker thread and feeds it transactions over an MPSC
//! channel, so any number of async callers share it without interleaving.

use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::command::{CommandResponse, Transaction};
use crate::errors::{Result, StoreError};
use crate::store::LedgerStore;

const QUEUE_DEPTH: usize = 64;

/// A transaction waiting for the worker.
struct Job {
    transaction: Transaction,
    reply: oneshot::Sender<CommandResponse>,
}

/// Cloneable handle to the store's worker thread.
///
/// The worker exits, dropping the store, once every handle is dropped.
#[derive(Clone, Debug)]
pub struct TransactionQueue {
    tx: mpsc::Sender<Job>,
}

impl TransactionQueue {
    /// Move `store` onto a new worker thread.
    pub fn spawn(store: LedgerStore) -> Result<Self> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let _handle = thread::Builder::new()
            .name("rewards-store".into())
            .spawn(move || worker(rx, store))?;
        Ok(Self { tx })
    }

    /// Run `transaction` on the worker and wait for its response.
    pub async fn run(&self, transaction: Transaction) -> Result<CommandResponse> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Job {
                transaction,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StoreError::Queue("worker exited".into()))?;

        reply_rx
            .await
            .map_err(|_| StoreError::Queue("reply dropped".into()))
    }

    /// Whether the worker has stopped accepting transactions.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn worker(mut rx: mpsc::Receiver<Job>, mut store: LedgerStore) {
    debug!("store worker started");
    while let Some(job) = rx.blocking_recv() {
        let response = store.run_transaction(&job.transaction);
        // The caller may have stopped waiting; the transaction still ran.
        let _ = job.reply.send(response);
    }
    store.close();
    info!("store worker stopped");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
