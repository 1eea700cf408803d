//! Bounded worker pool that processes update batches off the polling task.
//!
//! The poller hands each batch to a queue of fixed capacity and goes straight
//! back to fetching; it only waits when every queue slot is taken. A fixed
//! number of workers drain the queue, so the number of batches being
//! processed at once never exceeds the worker count.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::telegram::Update;

/// Something that consumes updates one at a time.
#[async_trait]
pub trait UpdateHandler: Send + Sync + 'static {
    async fn handle_update(&self, update: Update);
}

pub struct Dispatcher {
    tx: mpsc::Sender<Vec<Update>>,
    in_flight: Arc<AtomicUsize>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Start `workers` tasks pulling batches from a queue of `queue_capacity`.
    pub fn spawn<H: UpdateHandler>(handler: Arc<H>, workers: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Vec<Update>>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let workers = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let handler = Arc::clone(&handler);
                let in_flight = Arc::clone(&in_flight);
                tokio::spawn(async move {
                    loop {
                        // Only the receive is done under the lock; processing is not.
                        let batch = rx.lock().await.recv().await;
                        let Some(batch) = batch else {
                            break;
                        };

                        in_flight.fetch_add(1, Ordering::SeqCst);
                        debug!("Dispatch worker {}: {} update(s)", worker, batch.len());
                        for update in batch {
                            handler.handle_update(update).await;
                        }
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    }
                    debug!("Dispatch worker {} stopped", worker);
                })
            })
            .collect();

        Self {
            tx,
            in_flight,
            workers,
        }
    }

    /// Queue a batch. Waits only while the queue is full; returns false if
    /// the workers are gone.
    pub async fn submit(&self, batch: Vec<Update>) -> bool {
        self.tx.send(batch).await.is_ok()
    }

    /// Batches currently being processed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Batches waiting for a worker.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Close the queue and wait for the workers to finish what was queued.
    pub async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!("Dispatch worker failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct SlowHandler {
        seen: std::sync::Mutex<Vec<i64>>,
        running: AtomicUsize,
        peak: AtomicUsize,
        /// When set, each update waits for a permit before finishing.
        gate: Option<Semaphore>,
    }

    #[async_trait]
    impl UpdateHandler for SlowHandler {
        async fn handle_update(&self, update: Update) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            } else {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.seen.lock().unwrap().push(update.update_id);
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn batch(ids: &[i64]) -> Vec<Update> {
        ids.iter()
            .map(|id| serde_json::from_value(serde_json::json!({"update_id": id})).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_all_batches_processed_before_shutdown_returns() {
        let handler = Arc::new(SlowHandler::default());
        let dispatcher = Dispatcher::spawn(Arc::clone(&handler), 2, 8);

        assert!(dispatcher.submit(batch(&[1, 2])).await);
        assert!(dispatcher.submit(batch(&[3])).await);
        assert!(dispatcher.submit(batch(&[4, 5, 6])).await);
        dispatcher.shutdown().await;

        let mut seen = handler.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_workers() {
        let handler = Arc::new(SlowHandler::default());
        let dispatcher = Dispatcher::spawn(Arc::clone(&handler), 2, 16);

        for id in 0..10 {
            assert!(dispatcher.submit(batch(&[id])).await);
        }
        dispatcher.shutdown().await;

        assert!(handler.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(handler.seen.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_in_flight_and_queued_are_observable() {
        let handler = Arc::new(SlowHandler {
            gate: Some(Semaphore::new(0)),
            ..SlowHandler::default()
        });
        let dispatcher = Dispatcher::spawn(Arc::clone(&handler), 1, 4);

        assert!(dispatcher.submit(batch(&[1])).await);
        assert!(dispatcher.submit(batch(&[2])).await);
        assert!(dispatcher.submit(batch(&[3])).await);

        // Wait until the single worker has picked up the first batch.
        while handler.running.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(dispatcher.in_flight(), 1);
        assert_eq!(dispatcher.queued(), 2);

        handler.gate.as_ref().unwrap().add_permits(3);
        dispatcher.shutdown().await;
        assert_eq!(handler.seen.lock().unwrap().len(), 3);
    }
}
