//! Metrics and timing for composition and delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Pipeline metrics collector.
#[derive(Debug, Default)]
pub struct CommsMetrics {
    /// Bodies composed successfully.
    pub messages_composed: AtomicU64,
    /// Messages accepted by the transport.
    pub messages_sent: AtomicU64,
    /// Sends that failed at any stage after the input checks.
    pub messages_failed: AtomicU64,
    /// Compositions aborted by an include, image or encoding error.
    pub composition_failures: AtomicU64,
    /// Include directives expanded.
    pub includes_expanded: AtomicU64,
    /// Inline images embedded.
    pub images_embedded: AtomicU64,
    /// READ_AUTO files deleted after a send.
    pub files_auto_deleted: AtomicU64,
}

impl CommsMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a composed body.
    pub fn record_composed(&self, includes: usize, images: usize) {
        self.messages_composed.fetch_add(1, Ordering::Relaxed);
        self.includes_expanded.fetch_add(includes as u64, Ordering::Relaxed);
        self.images_embedded.fetch_add(images as u64, Ordering::Relaxed);
    }

    /// Records a failed composition. Also counts as a failed send.
    pub fn record_composition_failure(&self) {
        self.composition_failures.fetch_add(1, Ordering::Relaxed);
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful send.
    pub fn record_send_success(&self, deleted_files: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.files_auto_deleted.fetch_add(deleted_files as u64, Ordering::Relaxed);
    }

    /// Records a failed send.
    pub fn record_send_failure(&self) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_composed: self.messages_composed.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            composition_failures: self.composition_failures.load(Ordering::Relaxed),
            includes_expanded: self.includes_expanded.load(Ordering::Relaxed),
            images_embedded: self.images_embedded.load(Ordering::Relaxed),
            files_auto_deleted: self.files_auto_deleted.load(Ordering::Relaxed),
        }
    }

    /// Resets all metrics.
    pub fn reset(&self) {
        self.messages_composed.store(0, Ordering::Relaxed);
        self.messages_sent.store(0, Ordering::Relaxed);
        self.messages_failed.store(0, Ordering::Relaxed);
        self.composition_failures.store(0, Ordering::Relaxed);
        self.includes_expanded.store(0, Ordering::Relaxed);
        self.images_embedded.store(0, Ordering::Relaxed);
        self.files_auto_deleted.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Bodies composed successfully.
    pub messages_composed: u64,
    /// Messages accepted by the transport.
    pub messages_sent: u64,
    /// Failed sends.
    pub messages_failed: u64,
    /// Aborted compositions.
    pub composition_failures: u64,
    /// Include directives expanded.
    pub includes_expanded: u64,
    /// Inline images embedded.
    pub images_embedded: u64,
    /// READ_AUTO files deleted.
    pub files_auto_deleted: u64,
}

impl MetricsSnapshot {
    /// Returns the send success rate.
    pub fn success_rate(&self) -> f64 {
        let total = self.messages_sent + self.messages_failed;
        if total == 0 {
            1.0
        } else {
            self.messages_sent as f64 / total as f64
        }
    }
}

/// Timer for measuring operation duration.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    name: &'static str,
}

impl Timer {
    /// Creates and starts a new timer.
    pub fn start(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Returns the elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stops the timer and returns the duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();

        #[cfg(feature = "tracing")]
        tracing::debug!(timer = self.name, duration_ms = elapsed.as_millis() as u64, "Timer stopped");

        elapsed
    }
}
