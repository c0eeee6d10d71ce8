//! Job queue boundary.
//!
//! The production queue is external and delivers at least once. A delivery
//! stays in flight until it is acked or nacked; anything still in flight
//! when a consumer dies comes back with a higher attempt number.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use attest_core::{CriteriaSetRef, DocumentId, EvaluationId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue is full (capacity {0})")]
    Full(usize),

    #[error("Queue is closed")]
    Closed,

    #[error("Unknown delivery: {0}")]
    UnknownDelivery(Uuid),
}

/// Message asking a worker to process one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    pub evaluation_id: EvaluationId,
    pub document_ids: Vec<DocumentId>,
    pub criteria_set: CriteriaSetRef,
}

/// One delivery of a message. `attempt` starts at 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: Uuid,
    pub attempt: u32,
    pub message: JobMessage,
}

/// At-least-once work queue with a single consumer group.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, message: JobMessage) -> Result<(), QueueError>;

    /// Wait for the next delivery. `None` once the queue is closed and
    /// drained.
    async fn dequeue(&self) -> Option<Delivery>;

    /// Settle a delivery for good.
    async fn ack(&self, delivery_id: Uuid) -> Result<(), QueueError>;

    /// Give a delivery back; with `requeue` it is redelivered, otherwise
    /// dropped.
    async fn nack(&self, delivery_id: Uuid, requeue: bool) -> Result<(), QueueError>;

    /// Stop accepting messages and wake every waiting consumer.
    fn close(&self);
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<(JobMessage, u32)>,
    in_flight: HashMap<Uuid, (JobMessage, u32)>,
}

/// In-process [`JobQueue`].
#[derive(Debug)]
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    available: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl InMemoryJobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    /// Return every in-flight delivery to the ready queue, as the broker
    /// does when a consumer's connection drops.
    pub fn redeliver_in_flight(&self) -> usize {
        let count = {
            let mut state = self.state.lock();
            let in_flight: Vec<(JobMessage, u32)> = state.in_flight.drain().map(|(_, entry)| entry).collect();
            let count = in_flight.len();
            state.ready.extend(in_flight);
            count
        };
        if count > 0 {
            self.available.notify_waiters();
        }
        count
    }

    pub fn ready_len(&self) -> usize {
        self.state.lock().ready.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    fn try_take(&self) -> Option<Delivery> {
        let mut state = self.state.lock();
        let (message, attempt) = state.ready.pop_front()?;
        let id = Uuid::new_v4();
        state.in_flight.insert(id, (message.clone(), attempt + 1));
        Some(Delivery {
            id,
            attempt: attempt + 1,
            message,
        })
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, message: JobMessage) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        {
            let mut state = self.state.lock();
            if state.ready.len() >= self.capacity {
                return Err(QueueError::Full(self.capacity));
            }
            state.ready.push_back((message, 0));
        }
        self.available.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> Option<Delivery> {
        loop {
            // Register interest before checking, so a notify between the
            // check and the await is not lost.
            let notified = self.available.notified();
            if let Some(delivery) = self.try_take() {
                return Some(delivery);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    async fn ack(&self, delivery_id: Uuid) -> Result<(), QueueError> {
        self.state
            .lock()
            .in_flight
            .remove(&delivery_id)
            .map(|_| ())
            .ok_or(QueueError::UnknownDelivery(delivery_id))
    }

    async fn nack(&self, delivery_id: Uuid, requeue: bool) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock();
            let entry = state
                .in_flight
                .remove(&delivery_id)
                .ok_or(QueueError::UnknownDelivery(delivery_id))?;
            if !requeue {
                return Ok(());
            }
            state.ready.push_back(entry);
        }
        self.available.notify_one();
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.available.notify_waiters();
    }
}
