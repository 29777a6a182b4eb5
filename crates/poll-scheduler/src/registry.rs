//! Request Registry
//!
//! Owns the ordered collection of pollable requests for one session and
//! the capacity math derived from calibration.

use crate::request::{PolledRequest, SharedRequest};
use std::sync::{Arc, Mutex};
use storage::StoredRequest;
use tracing::info;

/// Feature-sum histogram bin width used in the summary log
const HISTOGRAM_BIN: f64 = 0.1;
const HISTOGRAM_BINS: usize = 20;

/// The full, ordered collection of requests for a session
pub struct Registry {
    requests: Vec<SharedRequest>,
    /// Sum of measured execution durations over all non-blacklisted
    /// requests, ceiling-rounded (seconds)
    theoretical_loop_time: f64,
}

impl Registry {
    pub fn new(requests: Vec<PolledRequest>) -> Self {
        Self {
            requests: requests
                .into_iter()
                .map(|r| Arc::new(Mutex::new(r)))
                .collect(),
            theoretical_loop_time: 0.0,
        }
    }

    /// Build a registry from persisted requests
    pub fn from_stored(stored: &[StoredRequest], interval_min: f64, interval_max: f64) -> Self {
        Self::new(
            stored
                .iter()
                .map(|s| PolledRequest::from_stored(s, interval_min, interval_max))
                .collect(),
        )
    }

    /// Flatten every request into its persisted form
    pub fn to_stored(&self) -> Vec<StoredRequest> {
        self.requests
            .iter()
            .map(|r| r.lock().expect("request lock poisoned").to_stored())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn requests(&self) -> &[SharedRequest] {
        &self.requests
    }

    /// Count requests still eligible for scheduling
    pub fn non_blacklisted_count(&self) -> usize {
        self.requests
            .iter()
            .filter(|r| !r.lock().expect("request lock poisoned").blacklisted)
            .count()
    }

    pub fn theoretical_loop_time(&self) -> f64 {
        self.theoretical_loop_time
    }

    /// Recompute the theoretical loop time from measured durations
    pub fn compute_theoretical_loop_time(&mut self) -> f64 {
        let total: f64 = self
            .requests
            .iter()
            .filter_map(|r| {
                let request = r.lock().expect("request lock poisoned");
                (!request.blacklisted).then(|| request.execution_duration.as_secs_f64())
            })
            .sum();
        self.theoretical_loop_time = total.ceil();
        let count = self.non_blacklisted_count().max(1);
        info!(
            theoretical_loop_time = self.theoretical_loop_time,
            average_request_time = self.theoretical_loop_time / count as f64,
            "Calibration summary"
        );
        self.theoretical_loop_time
    }

    /// Number of sends that would occur over one theoretical loop
    pub fn calculate_send_count(&self) -> u64 {
        let total: f64 = self
            .requests
            .iter()
            .filter_map(|r| {
                let request = r.lock().expect("request lock poisoned");
                (!request.blacklisted)
                    .then(|| self.theoretical_loop_time / request.interval.current())
            })
            .sum();
        total.ceil() as u64
    }

    /// Reset every interval to its maximum, then apply the feature law
    /// where the history already supports it (post-calibration step)
    pub fn initialize_intervals(&self) {
        for shared in &self.requests {
            let mut request = shared.lock().expect("request lock poisoned");
            request.interval.force_maximum();
            request.rescore();
            request.update_interval();
        }
    }

    /// Blacklist every request scoring below the given feature sum
    ///
    /// Returns how many requests were newly blacklisted.
    pub fn blacklist_below(&self, min_feature_sum: f64) -> usize {
        let mut count = 0;
        for shared in &self.requests {
            let mut request = shared.lock().expect("request lock poisoned");
            if !request.blacklisted && request.features.feature_sum() < min_feature_sum {
                request.blacklisted = true;
                count += 1;
            }
        }
        info!(
            threshold = min_feature_sum,
            blacklisted = count,
            "Blacklisted low-scoring requests"
        );
        count
    }

    /// Log a histogram of feature sums across the registry
    pub fn log_feature_summary(&self) {
        let mut bins = [0usize; HISTOGRAM_BINS];
        let mut zero_sum = 0usize;
        for shared in &self.requests {
            let request = shared.lock().expect("request lock poisoned");
            let sum = request.features.feature_sum();
            if sum == 0.0 {
                zero_sum += 1;
            } else {
                let bin = ((sum / HISTOGRAM_BIN) as usize).min(HISTOGRAM_BINS - 1);
                bins[bin] += 1;
            }
        }
        info!(total = self.len(), zero_sum, "Feature sum distribution");
        for (i, count) in bins.iter().enumerate() {
            if *count > 0 {
                info!(
                    range = %format!(
                        "{:.1}-{:.1}",
                        i as f64 * HISTOGRAM_BIN,
                        (i + 1) as f64 * HISTOGRAM_BIN
                    ),
                    count, "Feature sum bin"
                );
            }
        }
    }
}
