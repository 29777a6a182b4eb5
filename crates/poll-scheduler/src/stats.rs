//! Session Progress Counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters reported continuously during a session
#[derive(Debug, Default)]
pub struct SessionStats {
    sent: AtomicU64,
    resolved: AtomicU64,
    timed_out: AtomicU64,
    requeued: AtomicU64,
    unmatched_frames: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub resolved: u64,
    pub timed_out: u64,
    pub requeued: u64,
    pub unmatched_frames: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, count: usize) {
        self.sent.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_resolved(&self) {
        self.resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timed_out(&self, count: usize) {
        self.timed_out.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_requeued(&self, count: usize) {
        self.requeued.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_unmatched_frame(&self) {
        self.unmatched_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            unmatched_frames: self.unmatched_frames.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = SessionStats::new();
        stats.record_sent(3);
        stats.record_resolved();
        stats.record_resolved();
        stats.record_timed_out(1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sent, 3);
        assert_eq!(snapshot.resolved, 2);
        assert_eq!(snapshot.timed_out, 1);
        assert_eq!(snapshot.requeued, 0);
    }
}
