//! Pollable Signal Requests

use crate::interval::Interval;
use feature_engine::SignalFeatures;
use payload_ring::{PayloadSample, SampleRing};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use storage::StoredRequest;

/// History length required before the feature law drives the interval
pub const MIN_SAMPLES_FOR_FEATURES: usize = 4;
/// Payload width required before the feature law drives the interval
pub const MIN_PAYLOAD_BYTES: usize = 4;

/// Fallback execution duration before calibration has measured one
const DEFAULT_EXECUTION_DURATION: Duration = Duration::from_millis(30);

/// Immutable identity of one pollable signal on one server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalId {
    pub server_id: u16,
    pub tester_id: u16,
    pub did: u16,
    /// Expected response payload width in bytes
    pub payload_length: usize,
}

/// Dedup key: one signal may be queued or in flight at most once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalKey {
    pub server_id: u16,
    pub did: u16,
}

impl SignalId {
    pub fn key(&self) -> SignalKey {
        SignalKey {
            server_id: self.server_id,
            did: self.did,
        }
    }

    /// Identity string used in result rows
    pub fn unique_id(&self) -> String {
        format!("{:x}_{:x}", self.server_id, self.did)
    }
}

/// A request shared between the dispatcher and the worker pool
pub type SharedRequest = Arc<Mutex<PolledRequest>>;

/// One pollable signal with its history and scheduling state
#[derive(Debug)]
pub struct PolledRequest {
    pub id: SignalId,
    pub history: SampleRing,
    pub features: SignalFeatures,
    pub interval: Interval,
    pub blacklisted: bool,
    /// When this request was last resolved (matched or timed out)
    pub last_exec: Option<Instant>,
    /// Measured duration of one serial poll, from calibration
    pub execution_duration: Duration,
}

impl PolledRequest {
    pub fn new(id: SignalId, interval_min: f64, interval_max: f64) -> Self {
        Self {
            id,
            history: SampleRing::with_default_capacity(),
            features: SignalFeatures::default(),
            interval: Interval::new(interval_min, interval_max),
            blacklisted: false,
            last_exec: None,
            execution_duration: DEFAULT_EXECUTION_DURATION,
        }
    }

    /// Rebuild a request from its persisted form
    pub fn from_stored(stored: &StoredRequest, interval_min: f64, interval_max: f64) -> Self {
        let mut history = SampleRing::with_default_capacity();
        for sample in &stored.history {
            history.push(sample.clone());
        }
        let interval = match stored.interval_current {
            Some(current) => Interval::with_current(interval_min, interval_max, current),
            None => Interval::new(interval_min, interval_max),
        };
        let mut request = Self {
            id: SignalId {
                server_id: stored.server_id,
                tester_id: stored.tester_id,
                did: stored.did,
                payload_length: stored.payload_length,
            },
            history,
            features: SignalFeatures::default(),
            interval,
            blacklisted: stored.blacklisted,
            last_exec: None,
            execution_duration: DEFAULT_EXECUTION_DURATION,
        };
        request.rescore();
        request
    }

    /// Flatten into the persisted form
    pub fn to_stored(&self) -> StoredRequest {
        StoredRequest {
            server_id: self.id.server_id,
            tester_id: self.id.tester_id,
            did: self.id.did,
            payload_length: self.id.payload_length,
            blacklisted: self.blacklisted,
            interval_current: Some(self.interval.current()),
            history: self.history.iter().cloned().collect(),
        }
    }

    /// Whether the request is due for another poll
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_exec {
            None => true,
            Some(last) => now.duration_since(last).as_secs_f64() >= self.interval.current(),
        }
    }

    /// Append a sample without touching the interval (calibration path)
    pub fn enter_sample(&mut self, bytes: Vec<u8>, timestamp_ms: u64) {
        self.history.push(PayloadSample::new(bytes, timestamp_ms));
        self.last_exec = Some(Instant::now());
    }

    /// Append a matched sample and update features and interval
    pub fn record_sample(&mut self, bytes: Vec<u8>, timestamp_ms: u64) {
        self.history.push(PayloadSample::new(bytes, timestamp_ms));
        self.last_exec = Some(Instant::now());
        self.rescore();
        self.update_interval();
    }

    /// Mark a failed poll: immediate backoff to the slowest interval
    pub fn record_timeout(&mut self) {
        self.last_exec = Some(Instant::now());
        self.interval.force_maximum();
    }

    /// Recompute volatility features from the current window
    pub fn rescore(&mut self) {
        let payloads = self.history.payloads();
        self.features = feature_engine::estimate(&payloads);
    }

    /// Apply the interval law for the current history
    ///
    /// Histories too short or too narrow for meaningful scoring pin the
    /// interval to its maximum.
    pub fn update_interval(&mut self) {
        let wide_enough = self
            .history
            .oldest()
            .map_or(false, |sample| sample.bytes.len() >= MIN_PAYLOAD_BYTES);
        if self.history.len() >= MIN_SAMPLES_FOR_FEATURES && wide_enough && !self.blacklisted {
            self.interval.apply_feature_sum(self.features.feature_sum());
        } else {
            self.interval.force_maximum();
        }
    }
}

/// Current Unix time in milliseconds
pub(crate) fn unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
