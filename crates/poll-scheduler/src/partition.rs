//! Capacity-Aware Workload Partitioning
//!
//! When the registry would demand more sends per theoretical loop than
//! it can absorb, it is split into subsets scheduled independently.
//! Requests are sorted by current interval and dealt round-robin so
//! volatile and stable signals mix evenly across subsets.

use crate::registry::Registry;
use crate::request::SharedRequest;
use tracing::info;

/// Tolerated overload before a split is required
pub const SPLIT_MARGIN: f64 = 0.05;

/// Whether the registry's workload exceeds one subset's capacity
pub fn needs_split(registry: &Registry) -> bool {
    let max_requests = registry.non_blacklisted_count();
    if max_requests == 0 {
        return false;
    }
    let send_count = registry.calculate_send_count();
    send_count as f64 / max_requests as f64 > 1.0 + SPLIT_MARGIN
}

/// Partition the registry into interval-interleaved subsets
///
/// Every request (blacklisted included) lands in exactly one subset;
/// subset count is `floor(send_count / non_blacklisted)`, at least 1.
pub fn partition(registry: &Registry) -> Vec<Vec<SharedRequest>> {
    let max_requests = registry.non_blacklisted_count().max(1);
    let send_count = registry.calculate_send_count();
    let number_subsets = ((send_count as usize) / max_requests).max(1);

    let mut sorted: Vec<SharedRequest> = registry.requests().to_vec();
    sorted.sort_by(|a, b| {
        let a_interval = a.lock().expect("request lock poisoned").interval.current();
        let b_interval = b.lock().expect("request lock poisoned").interval.current();
        a_interval
            .partial_cmp(&b_interval)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut subsets: Vec<Vec<SharedRequest>> = vec![Vec::new(); number_subsets];
    for (i, request) in sorted.into_iter().enumerate() {
        subsets[i % number_subsets].push(request);
    }

    info!(
        send_count,
        max_requests,
        subsets = number_subsets,
        "Partitioned registry"
    );
    subsets
}
