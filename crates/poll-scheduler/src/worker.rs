//! Requester / Evaluator Worker Pairs
//!
//! Each pool index runs one requester and one evaluator against the
//! same slot. The requester pulls a batch from the dispatch queue,
//! sends it, and hands it to its evaluator; the evaluator matches the
//! asynchronous responses, clears the slot, and resumes the requester.
//! A slot therefore carries at most one in-flight batch at a time.

use crate::dispatch::{Batch, DispatchQueue};
use crate::request::{unix_ms, SharedRequest};
use crate::slot::{Delivery, SlotTable};
use crate::stats::SessionStats;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storage::{ResultRecord, ResultSink};
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, warn};
use uds_protocol::{did_from_bytes, read_data_by_identifier, CapacityMap, UdsTransport};

/// Pause after a failed send before pulling new work
const SEND_FAILURE_BACKOFF: Duration = Duration::from_millis(100);

pub(crate) type SharedSink = Arc<Mutex<Box<dyn ResultSink>>>;

pub(crate) struct WorkerContext {
    pub slot_index: usize,
    pub slots: Arc<SlotTable>,
    pub queue: Arc<DispatchQueue>,
    pub capacity: Arc<CapacityMap>,
    pub stats: Arc<SessionStats>,
}

/// Send half of one slot pair
///
/// Pulls batches while the queue has work; blocks on its evaluator's
/// resume signal between batches so the slot is never reassigned while
/// a batch is in flight.
pub(crate) async fn requester_loop(
    ctx: WorkerContext,
    transport: Arc<UdsTransport>,
    eval_tx: mpsc::Sender<Batch>,
    mut resume_rx: mpsc::Receiver<()>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            break;
        }
        tokio::select! {
            _ = ctx.queue.wait_for_arrival() => {}
            _ = stop.changed() => continue,
        }
        // another slot may have raced us to the queue head
        let Some(batch) = ctx.queue.try_pop_batch(&ctx.capacity) else {
            continue;
        };

        let dids = batch.dids();
        ctx.slots.assign(ctx.slot_index, batch.server_id, &dids);

        // the slot must already be sent when the response races back,
        // so the flag flips before the wire write
        ctx.slots.mark_sent(ctx.slot_index);
        let request_bytes = read_data_by_identifier(&dids);
        match transport
            .send_no_response(batch.tester_id, batch.server_id, &request_bytes)
            .await
        {
            Ok(()) => {
                ctx.stats.record_sent(batch.len());
                if eval_tx.send(batch).await.is_err() {
                    break;
                }
                // in-flight: wait for the evaluator to clear the slot
                if resume_rx.recv().await.is_none() {
                    break;
                }
            }
            Err(e) => {
                warn!(
                    slot = ctx.slot_index,
                    server = batch.server_id,
                    error = %e,
                    "send failed, returning batch to queue"
                );
                ctx.slots.clear(ctx.slot_index);
                ctx.stats.record_requeued(batch.len());
                ctx.queue.requeue(batch.requests);
                tokio::time::sleep(SEND_FAILURE_BACKOFF).await;
            }
        }
    }
    debug!(slot = ctx.slot_index, "requester stopped");
}

/// Match half of one slot pair
///
/// Clearing the slot and resuming the requester happens on every exit
/// path; a slot that stays occupied would starve the pool.
pub(crate) async fn evaluator_loop(
    ctx: WorkerContext,
    sink: SharedSink,
    slot_timeout: Duration,
    mut eval_rx: mpsc::Receiver<Batch>,
    mut inbox_rx: mpsc::Receiver<Delivery>,
    resume_tx: mpsc::Sender<()>,
) {
    while let Some(batch) = eval_rx.recv().await {
        evaluate_batch(&ctx, &sink, slot_timeout, batch, &mut inbox_rx).await;

        // stale deliveries must not leak into the next batch
        while inbox_rx.try_recv().is_ok() {}
        ctx.slots.clear(ctx.slot_index);
        if resume_tx.send(()).await.is_err() {
            break;
        }
    }
    debug!(slot = ctx.slot_index, "evaluator stopped");
}

async fn evaluate_batch(
    ctx: &WorkerContext,
    sink: &SharedSink,
    slot_timeout: Duration,
    batch: Batch,
    inbox_rx: &mut mpsc::Receiver<Delivery>,
) {
    let mut pending = batch.requests;
    let deadline = Instant::now() + slot_timeout;

    while !pending.is_empty() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, inbox_rx.recv()).await {
            Err(_) | Ok(None) => break,
            Ok(Some(Delivery::Fault(code))) => {
                warn!(
                    slot = ctx.slot_index,
                    server = batch.server_id,
                    ?code,
                    "structural mismatch, requeueing batch for a smaller retry"
                );
                ctx.stats.record_requeued(pending.len());
                ctx.queue.requeue(std::mem::take(&mut pending));
                return;
            }
            Ok(Some(Delivery::Payload(data))) => {
                if !consume_payload(ctx, sink, &mut pending, &data) {
                    // an identifier with no pending match poisons the
                    // whole batch: fail fast instead of misaligning
                    break;
                }
            }
        }
    }

    mark_timed_out(ctx, sink, pending);
}

/// Walk identifier/payload pairs, matching each to a pending request
///
/// Returns false when an identifier has no pending match.
fn consume_payload(
    ctx: &WorkerContext,
    sink: &SharedSink,
    pending: &mut Vec<SharedRequest>,
    data: &[u8],
) -> bool {
    let mut cursor = data;
    while !cursor.is_empty() && !pending.is_empty() {
        let Some(did) = did_from_bytes(cursor) else {
            return false;
        };
        cursor = &cursor[2..];

        let position = pending
            .iter()
            .position(|shared| shared.lock().expect("request lock poisoned").id.did == did);
        let Some(index) = position else {
            warn!(slot = ctx.slot_index, did, "identifier not in pending batch");
            return false;
        };

        let shared = pending.remove(index);
        let (key, unique_id, payload_length) = {
            let request = shared.lock().expect("request lock poisoned");
            (
                request.id.key(),
                request.id.unique_id(),
                request.id.payload_length,
            )
        };

        let take = payload_length.min(cursor.len());
        let sample = cursor[..take].to_vec();
        cursor = &cursor[take..];

        let timestamp_ms = unix_ms();
        shared
            .lock()
            .expect("request lock poisoned")
            .record_sample(sample.clone(), timestamp_ms);
        ctx.queue.release(&key);
        ctx.slots.remove_expected(ctx.slot_index, did);
        ctx.stats.record_resolved();

        append_row(
            sink,
            ResultRecord {
                timestamp_ms,
                unique_id,
                payload: sample,
                timed_out: false,
                slot: ctx.slot_index,
            },
        );
    }
    true
}

fn mark_timed_out(ctx: &WorkerContext, sink: &SharedSink, pending: Vec<SharedRequest>) {
    if pending.is_empty() {
        return;
    }
    ctx.stats.record_timed_out(pending.len());
    let timestamp_ms = unix_ms();
    for shared in pending {
        let (key, unique_id) = {
            let request = shared.lock().expect("request lock poisoned");
            (request.id.key(), request.id.unique_id())
        };
        shared
            .lock()
            .expect("request lock poisoned")
            .record_timeout();
        ctx.queue.release(&key);
        debug!(slot = ctx.slot_index, %unique_id, "request timed out");

        append_row(
            sink,
            ResultRecord {
                timestamp_ms,
                unique_id,
                payload: Vec::new(),
                timed_out: true,
                slot: ctx.slot_index,
            },
        );
    }
}

fn append_row(sink: &SharedSink, record: ResultRecord) {
    if let Err(e) = sink.lock().expect("sink lock poisoned").append(&record) {
        error!(error = %e, "failed to append result row");
    }
}
