//! Polling Session Orchestration
//!
//! Owns the transport, registry, and worker pool for one scheduling
//! session: an optional calibration pass, partitioning, then per-subset
//! concurrent dispatch until the configured duration elapses or the
//! session is stopped.

use crate::capture::{capture_loop, distribute_loop};
use crate::config::{DispatchMode, SchedulerConfig};
use crate::dispatch::{Batch, DispatchQueue};
use crate::error::SchedulerError;
use crate::partition::{needs_split, partition};
use crate::registry::Registry;
use crate::request::{unix_ms, SharedRequest, SignalId};
use crate::slot::SlotTable;
use crate::stats::SessionStats;
use crate::worker::{evaluator_loop, requester_loop, SharedSink, WorkerContext};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storage::ResultSink;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uds_protocol::{
    decode_response, did_from_bytes, read_data_by_identifier, service, CapacityMap, ResponseCode,
    UdsResponse, UdsTransport,
};

/// Captured-frame channel depth between reader and router
const FRAME_CHANNEL_CAPACITY: usize = 64;
/// Progress report cadence
const PROGRESS_PERIOD: Duration = Duration::from_secs(1);

/// Cloneable handle to stop a running session cooperatively
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Request a cooperative stop; in-flight slots drain first
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

/// One scheduling session over a registry of pollable signals
pub struct PollSession {
    transport: Arc<UdsTransport>,
    registry: Registry,
    config: SchedulerConfig,
    capacity: Arc<CapacityMap>,
    sink: SharedSink,
    stats: Arc<SessionStats>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl PollSession {
    pub fn new(
        transport: UdsTransport,
        registry: Registry,
        config: SchedulerConfig,
        capacity: CapacityMap,
        sink: Box<dyn ResultSink>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        if registry.is_empty() {
            return Err(SchedulerError::EmptyRegistry);
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        Ok(Self {
            transport: Arc::new(transport),
            registry,
            config,
            capacity: Arc::new(capacity),
            sink: Arc::new(Mutex::new(sink)),
            stats: Arc::new(SessionStats::new()),
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        })
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        self.stats.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Persist the registry; failures abort the caller's flow
    pub fn persist(&self, path: &Path) -> Result<(), SchedulerError> {
        storage::store_request_list(path, &self.registry.to_stored())?;
        Ok(())
    }

    /// Serial calibration pass
    ///
    /// Polls every request once per iteration, measuring per-request
    /// execution durations, then derives the theoretical loop time and
    /// initial intervals from the gathered history.
    pub async fn calibrate(&mut self) -> Result<(), SchedulerError> {
        let iterations = self.config.calibration_iterations;
        info!(
            iterations,
            requests = self.registry.len(),
            "Starting calibration"
        );

        for iteration in 0..iterations {
            if *self.stop_rx.borrow() {
                break;
            }
            for shared in self.registry.requests() {
                if *self.stop_rx.borrow() {
                    break;
                }
                let (id, blacklisted) = {
                    let request = shared.lock().expect("request lock poisoned");
                    (request.id, request.blacklisted)
                };
                if blacklisted && !self.config.include_blacklisted {
                    continue;
                }

                let started = Instant::now();
                let outcome = self.poll_single(id).await;
                let elapsed = started.elapsed();

                let mut request = shared.lock().expect("request lock poisoned");
                request.execution_duration = elapsed;
                match outcome {
                    Some(bytes) => {
                        request.blacklisted = false;
                        request.enter_sample(bytes, unix_ms());
                    }
                    None => {
                        request.blacklisted = true;
                        request.record_timeout();
                    }
                }
            }
            debug!(iteration = iteration + 1, "Calibration iteration finished");
        }

        self.registry.compute_theoretical_loop_time();
        self.registry.initialize_intervals();
        self.registry.log_feature_summary();
        Ok(())
    }

    /// One blocking single-DID poll, used only during calibration
    async fn poll_single(&self, id: SignalId) -> Option<Vec<u8>> {
        let request_bytes = read_data_by_identifier(&[id.did]);
        if let Err(e) = self
            .transport
            .send_no_response(id.tester_id, id.server_id, &request_bytes)
            .await
        {
            warn!(server = id.server_id, did = id.did, error = %e, "calibration send failed");
            return None;
        }

        let deadline = Instant::now() + self.config.read_timeout();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let frame = match self.transport.receive_frame(remaining).await {
                Ok(Some(frame)) if frame.source == id.server_id => frame,
                Ok(Some(_)) | Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "calibration read failed");
                    return None;
                }
            };
            match decode_response(&frame.payload) {
                Ok(UdsResponse::Positive { service: sid, data })
                    if sid == service::READ_DATA_BY_IDENTIFIER
                        && did_from_bytes(&data) == Some(id.did) =>
                {
                    return Some(data[2..].to_vec());
                }
                Ok(UdsResponse::Negative { code, .. }) => {
                    if code == ResponseCode::ResponsePending {
                        continue;
                    }
                    return None;
                }
                _ => continue,
            }
        }
    }

    /// Run the session: partition if needed, then schedule each subset
    /// for the configured duration
    pub async fn run(&mut self) -> Result<(), SchedulerError> {
        let subsets: Vec<Vec<SharedRequest>> = match self.config.dispatch_mode {
            DispatchMode::Parallel => vec![self.registry.requests().to_vec()],
            DispatchMode::Serial => {
                if needs_split(&self.registry) {
                    partition(&self.registry)
                } else {
                    vec![self.registry.requests().to_vec()]
                }
            }
        };

        let total = subsets.len();
        for (index, subset) in subsets.into_iter().enumerate() {
            if *self.stop_rx.borrow() {
                break;
            }
            info!(
                subset = index + 1,
                total,
                requests = subset.len(),
                "Scheduling subset"
            );
            self.run_subset(subset).await;
        }

        self.sink.lock().expect("sink lock poisoned").flush()?;
        let snapshot = self.stats.snapshot();
        info!(
            sent = snapshot.sent,
            resolved = snapshot.resolved,
            timed_out = snapshot.timed_out,
            requeued = snapshot.requeued,
            "Session finished"
        );
        Ok(())
    }

    async fn run_subset(&self, subset: Vec<SharedRequest>) {
        let pool_size = self.config.pool_size;
        let queue = Arc::new(DispatchQueue::new(self.config.queue_capacity));
        let (slots, inboxes) = SlotTable::new(pool_size);
        let slots = Arc::new(slots);

        // requesters stop first; the capture pipeline outlives them so
        // in-flight batches can still resolve during the drain
        let (intake_stop_tx, intake_stop_rx) = watch::channel(false);
        let (pipeline_stop_tx, pipeline_stop_rx) = watch::channel(false);
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

        let capture_handle = tokio::spawn(capture_loop(
            self.transport.clone(),
            frame_tx,
            self.config.read_timeout(),
            pipeline_stop_rx.clone(),
        ));
        let distribute_handle = tokio::spawn(distribute_loop(
            frame_rx,
            slots.clone(),
            self.stats.clone(),
            pipeline_stop_rx,
        ));

        let mut worker_handles = Vec::with_capacity(pool_size * 2);
        for (slot_index, inbox_rx) in inboxes.into_iter().enumerate() {
            let (eval_tx, eval_rx) = mpsc::channel::<Batch>(1);
            let (resume_tx, resume_rx) = mpsc::channel::<()>(1);

            worker_handles.push(tokio::spawn(requester_loop(
                self.worker_context(slot_index, &slots, &queue),
                self.transport.clone(),
                eval_tx,
                resume_rx,
                intake_stop_rx.clone(),
            )));
            worker_handles.push(tokio::spawn(evaluator_loop(
                self.worker_context(slot_index, &slots, &queue),
                self.sink.clone(),
                self.config.slot_timeout(),
                eval_rx,
                inbox_rx,
                resume_tx,
            )));
        }

        let mut session_stop = self.stop_rx.clone();
        let deadline = Instant::now() + self.config.session_duration();
        let mut last_progress = Instant::now();

        while Instant::now() < deadline && !*session_stop.borrow() {
            // admission tick
            let now = std::time::Instant::now();
            for shared in &subset {
                let admit = {
                    let request = shared.lock().expect("request lock poisoned");
                    request.is_due(now)
                        && (!request.blacklisted || self.config.include_blacklisted)
                };
                if admit {
                    queue.admit(shared.clone());
                }
            }

            // backpressure: the tick blocks while the queue is over
            // capacity, bounded by the subset deadline
            tokio::select! {
                _ = queue.wait_for_space() => {}
                _ = session_stop.changed() => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }

            if last_progress.elapsed() >= PROGRESS_PERIOD {
                let snapshot = self.stats.snapshot();
                info!(
                    sent = snapshot.sent,
                    resolved = snapshot.resolved,
                    timed_out = snapshot.timed_out,
                    queue_depth = queue.len(),
                    "Progress"
                );
                last_progress = Instant::now();
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.tick()) => {}
                _ = session_stop.changed() => {}
            }
        }

        // drain: no new sends, in-flight slots resolve, then the
        // capture pipeline shuts down
        let _ = intake_stop_tx.send(true);
        for handle in worker_handles {
            let _ = handle.await;
        }
        let _ = pipeline_stop_tx.send(true);
        let _ = capture_handle.await;
        let _ = distribute_handle.await;
        debug!("Subset drained");
    }

    fn worker_context(
        &self,
        slot_index: usize,
        slots: &Arc<SlotTable>,
        queue: &Arc<DispatchQueue>,
    ) -> WorkerContext {
        WorkerContext {
            slot_index,
            slots: slots.clone(),
            queue: queue.clone(),
            capacity: self.capacity.clone(),
            stats: self.stats.clone(),
        }
    }
}
