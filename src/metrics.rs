// Operation metrics module
//
// Lightweight process-wide counters for generation, export and snapshot activity

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Process-wide operation counters.
///
/// Uses atomic operations so every unit handle can record without locking.
/// [`log_summary`](Self::log_summary) is called once on shutdown.
#[derive(Debug)]
pub struct Metrics {
    /// Successful startup generations
    pub generations_succeeded: AtomicU64,

    /// Generations aborted by a diagnostic
    pub generations_failed: AtomicU64,

    pub exports: AtomicU64,

    pub snapshots: AtomicU64,

    /// Source files copied in that were not present before
    pub files_added: AtomicU64,

    /// Source files that replaced an existing file
    pub files_overwritten: AtomicU64,

    /// State file writes
    pub state_updates: AtomicU64,

    /// Time spent generating, in milliseconds
    pub total_generation_time_ms: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            generations_succeeded: AtomicU64::new(0),
            generations_failed: AtomicU64::new(0),
            exports: AtomicU64::new(0),
            snapshots: AtomicU64::new(0),
            files_added: AtomicU64::new(0),
            files_overwritten: AtomicU64::new(0),
            state_updates: AtomicU64::new(0),
            total_generation_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_generation(&self, succeeded: bool, duration: Duration) {
        if succeeded {
            self.generations_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.generations_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_generation_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_export(&self) {
        self.exports.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot(&self) {
        self.snapshots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_added(&self) {
        self.files_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_overwritten(&self) {
        self.files_overwritten.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_state_update(&self) {
        self.state_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average generation time in milliseconds across all attempts
    pub fn avg_generation_time_ms(&self) -> f64 {
        let total = self.total_generation_time_ms.load(Ordering::Relaxed);
        let count = self.generations_succeeded.load(Ordering::Relaxed)
            + self.generations_failed.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== Operation Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Generations: {} succeeded, {} failed (avg: {:.2}ms)",
            self.generations_succeeded.load(Ordering::Relaxed),
            self.generations_failed.load(Ordering::Relaxed),
            self.avg_generation_time_ms()
        );
        tracing::info!(
            "Exports: {}, snapshots: {}",
            self.exports.load(Ordering::Relaxed),
            self.snapshots.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Source files: {} added, {} overwritten; state updates: {}",
            self.files_added.load(Ordering::Relaxed),
            self.files_overwritten.load(Ordering::Relaxed),
            self.state_updates.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide metrics instance.
pub fn metrics() -> &'static Metrics {
    static METRICS: OnceLock<Metrics> = OnceLock::new();
    METRICS.get_or_init(Metrics::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.generations_succeeded.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.exports.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_generations() {
        let metrics = Metrics::new();

        metrics.record_generation(true, Duration::from_millis(100));
        metrics.record_generation(false, Duration::from_millis(200));

        assert_eq!(metrics.generations_succeeded.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.generations_failed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.avg_generation_time_ms(), 150.0);
    }

    #[test]
    fn test_avg_generation_time_none() {
        assert_eq!(Metrics::new().avg_generation_time_ms(), 0.0);
    }

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();

        metrics.record_export();
        metrics.record_snapshot();
        metrics.record_file_added();
        metrics.record_file_added();
        metrics.record_file_overwritten();
        metrics.record_state_update();

        assert_eq!(metrics.exports.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.snapshots.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.files_added.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.files_overwritten.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.state_updates.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_uptime() {
        let metrics = Metrics::new();
        thread::sleep(Duration::from_millis(10));
        assert!(metrics.uptime().as_millis() >= 10);
    }

    #[test]
    fn test_global_instance_is_shared() {
        assert!(std::ptr::eq(metrics(), metrics()));
    }
}
