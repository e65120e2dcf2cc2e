use super::ingest::{IngestionPipeline, Materialized, PipelineError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Bounded pool of tasks running deferred materialization.
///
/// Submitting only waits for queue space. Failures are logged by the worker
/// and never reported back to the submitter; there are no retries.
pub struct MaterializeQueue {
    sender: mpsc::Sender<String>,
    workers: Vec<JoinHandle<()>>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl MaterializeQueue {
    /// Spawn `workers` tasks sharing a queue of `queue_size` batch ids
    pub fn spawn(pipeline: Arc<IngestionPipeline>, workers: usize, queue_size: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<String>(queue_size.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let pending = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());

        let workers = (0..workers.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    receiver.clone(),
                    pipeline.clone(),
                    pending.clone(),
                    idle.clone(),
                ))
            })
            .collect();

        Self {
            sender,
            workers,
            pending,
            idle,
        }
    }

    /// Queue a batch for materialization
    pub async fn submit(&self, batch_id: String) -> Result<(), PipelineError> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(batch_id).await.is_err() {
            self.finish_one();
            return Err(PipelineError::QueueClosed);
        }
        Ok(())
    }

    /// Jobs submitted but not yet finished
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Resolve once every submitted job has finished
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Close the queue, let the workers drain it, and join them
    pub async fn shutdown(self) {
        drop(self.sender);
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Materialize worker join error");
            }
        }
        info!("Materialize queue shut down");
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<String>>>,
    pipeline: Arc<IngestionPipeline>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
) {
    debug!(worker_id, "Materialize worker started");

    loop {
        let next = receiver.lock().await.recv().await;
        let Some(batch_id) = next else {
            break;
        };

        match pipeline.materialize(&batch_id).await {
            Ok(Materialized::Stored { .. }) => {}
            Ok(outcome) => {
                warn!(worker_id, batch_id = %batch_id, outcome = ?outcome, "Batch not materialized");
            }
            Err(e) => {
                error!(worker_id, batch_id = %batch_id, error = %e, "Materialize failed, batch left staged");
            }
        }

        if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            idle.notify_waiters();
        }
    }

    debug!(worker_id, "Materialize worker stopped");
}
