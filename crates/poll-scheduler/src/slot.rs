//! Worker Slots
//!
//! One slot per concurrent requester/evaluator pair. A slot holds at
//! most one in-flight batch; the `sent` flag transitions strictly
//! false → true → false, and clearing on every exit path is what frees
//! the slot for new work.

use std::collections::HashSet;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uds_protocol::ResponseCode;

/// Inbox capacity per slot; a batch rarely spans more than a few frames
const INBOX_CAPACITY: usize = 8;

/// What the distributor hands to an evaluator
#[derive(Debug)]
pub enum Delivery {
    /// Positive response data: identifier/payload pairs
    Payload(Vec<u8>),
    /// Negative response signaling the batch shape was wrong
    Fault(ResponseCode),
}

#[derive(Debug, Default)]
struct SlotState {
    occupied: bool,
    sent: bool,
    server_id: u16,
    /// DIDs still awaiting a matched sample
    expected: HashSet<u16>,
}

struct Slot {
    state: Mutex<SlotState>,
    inbox_tx: mpsc::Sender<Delivery>,
}

/// All slots of the worker pool, shared with the distributor
pub struct SlotTable {
    slots: Vec<Slot>,
}

impl SlotTable {
    /// Build the table, returning each slot's inbox receiver in order
    pub fn new(pool_size: usize) -> (Self, Vec<mpsc::Receiver<Delivery>>) {
        let mut slots = Vec::with_capacity(pool_size);
        let mut inboxes = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
            slots.push(Slot {
                state: Mutex::new(SlotState::default()),
                inbox_tx: tx,
            });
            inboxes.push(rx);
        }
        (Self { slots }, inboxes)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Record a batch in a slot; the slot must be idle
    pub fn assign(&self, index: usize, server_id: u16, dids: &[u16]) {
        let mut state = self.lock(index);
        debug_assert!(!state.occupied, "slot {index} reassigned while occupied");
        state.occupied = true;
        state.sent = false;
        state.server_id = server_id;
        state.expected = dids.iter().copied().collect();
    }

    /// Flip the sent flag; returns false if the transition was invalid
    pub fn mark_sent(&self, index: usize) -> bool {
        let mut state = self.lock(index);
        if !state.occupied || state.sent {
            warn!(slot = index, "invalid sent transition");
            return false;
        }
        state.sent = true;
        true
    }

    pub fn is_sent(&self, index: usize) -> bool {
        self.lock(index).sent
    }

    /// Drop a matched DID from the slot's expected set
    pub fn remove_expected(&self, index: usize, did: u16) {
        self.lock(index).expected.remove(&did);
    }

    /// Reset a slot to idle; mandatory on every evaluator exit path
    pub fn clear(&self, index: usize) {
        let mut state = self.lock(index);
        *state = SlotState::default();
    }

    /// Route a positive payload to the slot expecting this identifier
    ///
    /// Returns false when no live slot matches (stale or alien frame).
    pub fn deliver(&self, server_id: u16, did: u16, payload: Vec<u8>) -> bool {
        for (index, slot) in self.slots.iter().enumerate() {
            let matches = {
                let state = slot.state.lock().expect("slot lock poisoned");
                state.sent && state.server_id == server_id && state.expected.contains(&did)
            };
            if matches {
                if slot.inbox_tx.try_send(Delivery::Payload(payload)).is_err() {
                    warn!(slot = index, "slot inbox full, dropping frame");
                }
                return true;
            }
        }
        debug!(server_id, did, "frame matched no live slot");
        false
    }

    /// Route a structural-mismatch fault to the slot sent to this server
    pub fn fault(&self, server_id: u16, code: ResponseCode) -> bool {
        for (index, slot) in self.slots.iter().enumerate() {
            let matches = {
                let state = slot.state.lock().expect("slot lock poisoned");
                state.sent && state.server_id == server_id
            };
            if matches {
                if slot.inbox_tx.try_send(Delivery::Fault(code)).is_err() {
                    warn!(slot = index, "slot inbox full, dropping fault");
                }
                return true;
            }
        }
        false
    }

    fn lock(&self, index: usize) -> std::sync::MutexGuard<'_, SlotState> {
        self.slots[index].state.lock().expect("slot lock poisoned")
    }
}
