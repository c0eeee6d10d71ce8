//! Worker pool consuming the job queue.
//!
//! Each worker loops: dequeue, take the evaluation's lease, process, ack.
//! The lease keeps a redelivered message from being processed by a second
//! worker while the first is still on it; the loser waits briefly and
//! hands the message back.

use std::collections::HashSet;
use std::sync::Arc;

use attest_core::EvaluationId;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::orchestrator::{EvaluationOrchestrator, ProcessOutcome};
use crate::queue::Delivery;

/// Evaluations currently held by a worker in this process.
#[derive(Debug, Default)]
pub struct LeaseTable {
    held: Mutex<HashSet<EvaluationId>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while another worker holds the evaluation.
    pub fn try_acquire(self: &Arc<Self>, id: EvaluationId) -> Option<Lease> {
        if !self.held.lock().insert(id) {
            return None;
        }
        Some(Lease {
            table: Arc::clone(self),
            id,
        })
    }

    pub fn is_held(&self, id: EvaluationId) -> bool {
        self.held.lock().contains(&id)
    }
}

/// Released on drop.
#[derive(Debug)]
pub struct Lease {
    table: Arc<LeaseTable>,
    id: EvaluationId,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.table.held.lock().remove(&self.id);
    }
}

/// Handle one delivery. Returns `None` when the evaluation was leased
/// elsewhere and the message went back to the queue.
///
/// Every processed message is acked, whatever the outcome: the outcome is
/// already recorded on the evaluation and redelivering would not change it.
pub async fn handle_delivery(
    orchestrator: &EvaluationOrchestrator,
    leases: &Arc<LeaseTable>,
    delivery: Delivery,
) -> Option<ProcessOutcome> {
    let evaluation_id = delivery.message.evaluation_id;
    let queue = orchestrator.queue();

    let Some(_lease) = leases.try_acquire(evaluation_id) else {
        tracing::debug!(
            evaluation_id = %evaluation_id,
            attempt = delivery.attempt,
            "Evaluation leased by another worker, requeueing"
        );
        tokio::time::sleep(orchestrator.runtime_config().lease_retry_delay).await;
        if let Err(err) = queue.nack(delivery.id, true).await {
            tracing::warn!(evaluation_id = %evaluation_id, error = %err, "Failed to requeue delivery");
        }
        return None;
    };

    let outcome = orchestrator.process(&delivery.message).await;
    if let Err(err) = queue.ack(delivery.id).await {
        tracing::warn!(evaluation_id = %evaluation_id, error = %err, "Failed to ack delivery");
    }
    Some(outcome)
}

/// N tokio tasks consuming the orchestrator's queue.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    leases: Arc<LeaseTable>,
}

impl WorkerPool {
    pub fn spawn(orchestrator: Arc<EvaluationOrchestrator>, workers: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        let leases = Arc::new(LeaseTable::new());

        let handles = (0..workers.max(1))
            .map(|worker| {
                let orchestrator = Arc::clone(&orchestrator);
                let leases = Arc::clone(&leases);
                let shutdown = shutdown.subscribe();
                tokio::spawn(run_worker(worker, orchestrator, leases, shutdown))
            })
            .collect();

        tracing::info!(workers = workers.max(1), "Worker pool started");
        Self {
            shutdown,
            handles,
            leases,
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn leases(&self) -> &Arc<LeaseTable> {
        &self.leases
    }

    /// Stop taking new jobs and wait for in-flight ones to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Worker task panicked");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

async fn run_worker(
    worker: usize,
    orchestrator: Arc<EvaluationOrchestrator>,
    leases: Arc<LeaseTable>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let delivery = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            delivery = orchestrator.queue().dequeue() => match delivery {
                Some(delivery) => delivery,
                None => break,
            },
        };

        let evaluation_id = delivery.message.evaluation_id;
        if let Some(outcome) = handle_delivery(&orchestrator, &leases, delivery).await {
            tracing::debug!(worker, evaluation_id = %evaluation_id, outcome = ?outcome, "Job handled");
        }

        if *shutdown.borrow() {
            break;
        }
    }
    tracing::debug!(worker, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_is_exclusive_and_released_on_drop() {
        let leases = Arc::new(LeaseTable::new());
        let id = EvaluationId::new();

        let lease = leases.try_acquire(id).unwrap();
        assert!(leases.try_acquire(id).is_none());
        assert!(leases.try_acquire(EvaluationId::new()).is_some());
        assert!(leases.is_held(id));

        drop(lease);
        assert!(!leases.is_held(id));
        assert!(leases.try_acquire(id).is_some());
    }
}
