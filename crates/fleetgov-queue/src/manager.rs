//! Named FIFO queues with arrival tracking

use fleetgov_core::{FleetError, FleetResult, SharedClock};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A queued payload and its arrival instant
#[derive(Debug, Clone)]
pub struct QueueItem<T> {
    /// Caller-supplied work
    pub payload: T,
    /// Instant the item entered the queue
    pub enqueued_at: Instant,
}

/// Point-in-time metrics for one queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Queue name
    pub name: String,
    /// Items waiting
    pub depth: usize,
    /// Items enqueued since construction or the last clear
    pub total_enqueued: u64,
    /// Items dequeued since construction or the last clear
    pub total_dequeued: u64,
    /// Wait time of the head item, `None` when empty
    pub oldest_age: Option<Duration>,
}

struct QueueState<T> {
    items: VecDeque<QueueItem<T>>,
    total_enqueued: u64,
    total_dequeued: u64,
}

impl<T> QueueState<T> {
    fn new() -> Self {
        Self {
            items: VecDeque::new(),
            total_enqueued: 0,
            total_dequeued: 0,
        }
    }
}

/// Fixed set of named FIFO queues
///
/// Queue names are declared once; referencing any other name is a lookup
/// error. Ordering is FIFO within a queue only. Each queue has its own lock.
pub struct QueueManager<T> {
    queues: Vec<(String, Mutex<QueueState<T>>)>,
    index: HashMap<String, usize>,
    clock: SharedClock,
}

impl<T> QueueManager<T> {
    /// Declare the queue set; duplicates are collapsed in declaration order
    pub fn new<I, S>(names: I, clock: SharedClock) -> FleetResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut queues = Vec::new();
        let mut index = HashMap::new();
        for name in names {
            let name = name.into();
            if name.is_empty() {
                return Err(FleetError::Validation(
                    "Queue name cannot be empty".to_string(),
                ));
            }
            if index.contains_key(&name) {
                continue;
            }
            index.insert(name.clone(), queues.len());
            queues.push((name, Mutex::new(QueueState::new())));
        }
        if queues.is_empty() {
            return Err(FleetError::Validation(
                "At least one queue must be declared".to_string(),
            ));
        }

        info!(
            queues = ?queues.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
            "Queue manager initialized"
        );

        Ok(Self {
            queues,
            index,
            clock,
        })
    }

    /// Declared queue names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.queues.iter().map(|(name, _)| name.as_str())
    }

    /// Append a payload stamped with the clock's current instant
    pub fn enqueue(&self, queue: &str, payload: T) -> FleetResult<()> {
        self.enqueue_at(queue, payload, self.clock.now())
    }

    /// Append a payload stamped with an explicit arrival instant
    pub fn enqueue_at(&self, queue: &str, payload: T, now: Instant) -> FleetResult<()> {
        let mut state = self.queue(queue)?.lock();
        state.items.push_back(QueueItem {
            payload,
            enqueued_at: now,
        });
        state.total_enqueued += 1;
        debug!(queue, depth = state.items.len(), "Enqueued");
        Ok(())
    }

    /// Pop the head payload, `None` when the queue is empty
    pub fn dequeue(&self, queue: &str) -> FleetResult<Option<T>> {
        let mut state = self.queue(queue)?.lock();
        let item = state.items.pop_front();
        if item.is_some() {
            state.total_dequeued += 1;
        }
        Ok(item.map(|i| i.payload))
    }

    /// Pop up to `max` payloads from the head under one lock
    pub fn dequeue_batch(&self, queue: &str, max: usize) -> FleetResult<Vec<T>> {
        let mut state = self.queue(queue)?.lock();
        let take = max.min(state.items.len());
        let batch: Vec<T> = state.items.drain(..take).map(|i| i.payload).collect();
        state.total_dequeued += batch.len() as u64;
        Ok(batch)
    }

    /// Current length of a queue
    pub fn depth(&self, queue: &str) -> FleetResult<usize> {
        Ok(self.queue(queue)?.lock().items.len())
    }

    /// Items waiting across all queues
    pub fn total_depth(&self) -> usize {
        self.queues
            .iter()
            .map(|(_, state)| state.lock().items.len())
            .sum()
    }

    /// One snapshot per queue, ages measured at the clock's current instant
    pub fn stats(&self) -> Vec<QueueSnapshot> {
        self.stats_at(self.clock.now())
    }

    /// One snapshot per queue, ages measured at `now`
    pub fn stats_at(&self, now: Instant) -> Vec<QueueSnapshot> {
        self.queues
            .iter()
            .map(|(name, state)| {
                let state = state.lock();
                QueueSnapshot {
                    name: name.clone(),
                    depth: state.items.len(),
                    total_enqueued: state.total_enqueued,
                    total_dequeued: state.total_dequeued,
                    oldest_age: state
                        .items
                        .front()
                        .map(|head| now.saturating_duration_since(head.enqueued_at)),
                }
            })
            .collect()
    }

    /// Drop every item and reset counters
    pub fn clear(&self) {
        for (_, state) in &self.queues {
            *state.lock() = QueueState::new();
        }
        debug!("Queues cleared");
    }

    fn queue(&self, name: &str) -> FleetResult<&Mutex<QueueState<T>>> {
        self.index
            .get(name)
            .map(|&i| &self.queues[i].1)
            .ok_or_else(|| FleetError::UnknownQueueName(name.to_string()))
    }
}
