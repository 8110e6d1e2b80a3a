// Sink Publisher (spec §4.7).
//
// Accepts finalized transactions, hands them to the opaque storage writer,
// and emits a UI event. Runs as a bounded worker pool consuming from a
// capacity-1024 ring buffer; on overflow the oldest unpublished transaction
// is dropped and a counter incremented — the pipeline is never blocked on
// storage. `tokio::sync::mpsc` has no drop-oldest semantics, so the queue is
// a small `Mutex<VecDeque>` + `Notify` instead (teacher idiom: short
// critical sections, see `engine/state.rs`'s lock discipline).

use crate::atoms::constants::{SINK_CHANNEL_CAPACITY, SINK_WORKER_COUNT};
use crate::atoms::types::Transaction;
use crate::engine::storage::StorageSink;
use log::{error, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tauri::{AppHandle, Emitter};
use tokio::sync::Notify;

struct Queue {
    items: Mutex<VecDeque<Transaction>>,
    notify: Notify,
    dropped: AtomicU64,
}

pub struct SinkPublisher {
    queue: Arc<Queue>,
}

impl SinkPublisher {
    /// Spawn the worker pool and return a handle for `publish`.
    pub fn spawn(storage: Arc<StorageSink>, app: AppHandle, cancel: Arc<AtomicBool>) -> Self {
        let queue = Arc::new(Queue {
            items: Mutex::new(VecDeque::with_capacity(SINK_CHANNEL_CAPACITY)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        });

        for worker_id in 0..SINK_WORKER_COUNT {
            let queue = queue.clone();
            let storage = storage.clone();
            let app = app.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let next = queue.items.lock().pop_front();
                    match next {
                        Some(tx) => publish_one(&storage, &app, tx),
                        None => {
                            if cancel.load(Ordering::Relaxed) {
                                break;
                            }
                            queue.notify.notified().await;
                        }
                    }
                }
                log::debug!("[sink] worker {worker_id} exiting");
            });
        }

        SinkPublisher { queue }
    }

    /// Fire-and-forget enqueue. Never blocks; drops the oldest queued
    /// transaction if the queue is already at capacity.
    pub fn publish(&self, tx: Transaction) {
        let mut items = self.queue.items.lock();
        if items.len() >= SINK_CHANNEL_CAPACITY {
            items.pop_front();
            let total = self.queue.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if total.is_power_of_two() {
                warn!("[sink] queue saturated, dropped {total} transactions so far");
            }
        }
        items.push_back(tx);
        drop(items);
        self.queue.notify.notify_one();
    }

    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

fn publish_one(storage: &StorageSink, app: &AppHandle, tx: Transaction) {
    let id = tx.id;
    match storage.record_transaction(&tx) {
        Ok(_) => {
            if let Err(e) = app.emit("backend:transaction", &tx) {
                error!("[sink] emit failed for {id}: {e}");
            }
        }
        // Storage errors are never surfaced to the client; rate-limit via a
        // coarse sampling so a failing disk doesn't flood the log.
        Err(e) => {
            static LOGGED: AtomicU64 = AtomicU64::new(0);
            let n = LOGGED.fetch_add(1, Ordering::Relaxed);
            if n % 50 == 0 {
                error!("[sink] storage write failed for {id}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_count_increments_on_overflow() {
        let queue = Queue {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        };
        let publisher = SinkPublisher { queue: Arc::new(queue) };
        for i in 0..(SINK_CHANNEL_CAPACITY + 5) {
            publisher.publish(Transaction::new("GET", format!("http://t/{i}"), "HTTP/1.1"));
        }
        assert_eq!(publisher.dropped_count(), 5);
        assert_eq!(publisher.queue.items.lock().len(), SINK_CHANNEL_CAPACITY);
    }
}
