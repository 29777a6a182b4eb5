//! Dispatch Queue
//!
//! Bounded FIFO of requests awaiting a free slot. A key set keeps
//! admission idempotent: a signal that is queued or in flight is never
//! added again until it resolves. Capacity overruns block the admission
//! tick, providing backpressure against a slow transport.

use crate::request::{SharedRequest, SignalKey};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::Notify;
use tracing::trace;
use uds_protocol::{CapacityMap, ServerCapacity};

/// A set of same-server requests multiplexed into one wire request
#[derive(Debug)]
pub struct Batch {
    pub server_id: u16,
    pub tester_id: u16,
    pub requests: Vec<SharedRequest>,
}

impl Batch {
    /// DIDs in request order
    pub fn dids(&self) -> Vec<u16> {
        self.requests
            .iter()
            .map(|r| r.lock().expect("request lock poisoned").id.did)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

struct QueueInner {
    queue: VecDeque<SharedRequest>,
    /// Keys of requests queued or in flight
    pending: HashSet<SignalKey>,
}

/// Bounded dispatch queue shared by the admission tick and the slot pool
pub struct DispatchQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    space: Notify,
    arrival: Notify,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                queue: VecDeque::new(),
                pending: HashSet::new(),
            }),
            capacity: capacity.max(1),
            space: Notify::new(),
            arrival: Notify::new(),
        }
    }

    /// Queued (not yet popped) request count
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a signal is currently queued or in flight
    pub fn is_pending(&self, key: &SignalKey) -> bool {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .pending
            .contains(key)
    }

    /// Admit a request; returns false if its key is already pending
    pub fn admit(&self, request: SharedRequest) -> bool {
        let key = request.lock().expect("request lock poisoned").id.key();
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if !inner.pending.insert(key) {
            return false;
        }
        inner.queue.push_back(request);
        drop(inner);
        self.arrival.notify_one();
        true
    }

    /// Re-queue requests whose batch failed; their keys stay pending
    pub fn requeue(&self, requests: Vec<SharedRequest>) {
        if requests.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        for request in requests {
            inner.queue.push_back(request);
        }
        drop(inner);
        self.arrival.notify_one();
    }

    /// Release a resolved signal so it can be admitted again
    pub fn release(&self, key: &SignalKey) {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .pending
            .remove(key);
    }

    /// Block while the queue is over capacity (admission backpressure)
    pub async fn wait_for_space(&self) {
        loop {
            let notified = self.space.notified();
            if self.len() <= self.capacity {
                return;
            }
            notified.await;
        }
    }

    /// Pop the head request and greedily pull queued requests for the
    /// same server up to the server's capacity profile
    pub fn try_pop_batch(&self, capacity_map: &CapacityMap) -> Option<Batch> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let head = inner.queue.pop_front()?;
        let (server_id, tester_id, mut payload_budget) = {
            let request = head.lock().expect("request lock poisoned");
            (
                request.id.server_id,
                request.id.tester_id,
                request.id.payload_length,
            )
        };
        let ServerCapacity {
            max_dids_per_batch,
            max_payload_bytes,
        } = capacity_map.for_server(server_id);

        let mut requests = vec![head];
        let mut index = 0;
        while index < inner.queue.len() && requests.len() < max_dids_per_batch {
            let matches = {
                let candidate = inner.queue[index].lock().expect("request lock poisoned");
                if candidate.id.server_id != server_id {
                    None
                } else {
                    Some(candidate.id.payload_length)
                }
            };
            match matches {
                Some(payload_length) => {
                    if payload_budget + payload_length > max_payload_bytes {
                        break;
                    }
                    payload_budget += payload_length;
                    let request = inner.queue.remove(index).expect("index checked");
                    requests.push(request);
                }
                None => index += 1,
            }
        }
        drop(inner);
        self.space.notify_one();

        trace!(server_id, batch_len = requests.len(), "Formed batch");
        Some(Batch {
            server_id,
            tester_id,
            requests,
        })
    }

    /// Wait until at least one request is queued
    pub async fn wait_for_arrival(&self) {
        loop {
            let notified = self.arrival.notified();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}
