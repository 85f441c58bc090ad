//! Dispatcher counters. Process lifetime only; nothing is persisted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Counters owned by the dispatcher.
#[derive(Debug)]
pub struct DispatcherStats {
    /// Non-self messages seen.
    pub processed_messages: AtomicU64,
    /// Conversions that produced a sticker or image.
    pub conversions: AtomicU64,
    /// Tasks that ended with an error reply.
    pub failed_tasks: AtomicU64,
    /// Tasks that hit the per-task deadline.
    pub timed_out_tasks: AtomicU64,
    started_at: Instant,
}

/// Point-in-time copy of [`DispatcherStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub processed_messages: u64,
    pub conversions: u64,
    pub failed_tasks: u64,
    pub timed_out_tasks: u64,
    pub uptime_secs: u64,
}

impl DispatcherStats {
    pub fn new() -> Self {
        Self {
            processed_messages: AtomicU64::new(0),
            conversions: AtomicU64::new(0),
            failed_tasks: AtomicU64::new(0),
            timed_out_tasks: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn record_processed(&self) {
        self.processed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conversion(&self) {
        self.conversions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timed_out_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed_messages: self.processed_messages.load(Ordering::Relaxed),
            conversions: self.conversions.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            timed_out_tasks: self.timed_out_tasks.load(Ordering::Relaxed),
            uptime_secs: self.uptime().as_secs(),
        }
    }
}

impl Default for DispatcherStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSnapshot {
    /// Chat reply for `/stats`.
    pub fn render(&self) -> String {
        let secs = self.uptime_secs;
        format!(
            "Messages processed: {}\n\
             Stickers and images sent: {}\n\
             Failed: {} (timed out: {})\n\
             Uptime: {}h {}m {}s",
            self.processed_messages,
            self.conversions,
            self.failed_tasks,
            self.timed_out_tasks,
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let snapshot = DispatcherStats::new().snapshot();
        assert_eq!(snapshot.processed_messages, 0);
        assert_eq!(snapshot.failed_tasks, 0);
        assert_eq!(snapshot.timed_out_tasks, 0);
    }

    #[test]
    fn test_record_and_snapshot() {
        let stats = DispatcherStats::new();
        stats.record_processed();
        stats.record_processed();
        stats.record_conversion();
        stats.record_failure();
        stats.record_timeout();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.processed_messages, 2);
        assert_eq!(snapshot.conversions, 1);
        assert_eq!(snapshot.failed_tasks, 1);
        assert_eq!(snapshot.timed_out_tasks, 1);
    }

    #[test]
    fn test_render_uptime() {
        let snapshot = StatsSnapshot {
            processed_messages: 7,
            conversions: 3,
            failed_tasks: 1,
            timed_out_tasks: 0,
            uptime_secs: 3725,
        };
        let text = snapshot.render();
        assert!(text.contains("Messages processed: 7"));
        assert!(text.contains("1h 2m 5s"));
    }
}
