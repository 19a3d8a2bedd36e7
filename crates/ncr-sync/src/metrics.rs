//! Process-wide atomic counters for pipeline runs.
//!
//! Counters are incremented silently by the driver. Call [`Metrics::flush`]
//! to emit the current values as one `tracing::info!` event; the driver does
//! so when a run finishes.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    records_seen: AtomicU64,
    records_indexed: AtomicU64,
    records_synced: AtomicU64,
    version_conflicts: AtomicU64,
    chunks_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            records_seen: AtomicU64::new(0),
            records_indexed: AtomicU64::new(0),
            records_synced: AtomicU64::new(0),
            version_conflicts: AtomicU64::new(0),
            chunks_failed: AtomicU64::new(0),
        }
    }

    pub fn inc_seen(&self) {
        self.records_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_indexed(&self, count: u64) {
        self.records_indexed.fetch_add(count, Ordering::Relaxed);
        tracing::trace!(metric = "records_indexed", count, "counter incremented");
    }

    pub fn inc_synced(&self) {
        self.records_synced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_conflicts(&self) {
        self.version_conflicts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "version_conflicts", "counter incremented");
    }

    pub fn add_failed_chunks(&self, count: u64) {
        self.chunks_failed.fetch_add(count, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            records_seen = self.records_seen(),
            records_indexed = self.records_indexed(),
            records_synced = self.records_synced(),
            version_conflicts = self.version_conflicts(),
            chunks_failed = self.chunks_failed(),
        );
    }

    pub fn records_seen(&self) -> u64 {
        self.records_seen.load(Ordering::Relaxed)
    }

    pub fn records_indexed(&self) -> u64 {
        self.records_indexed.load(Ordering::Relaxed)
    }

    pub fn records_synced(&self) -> u64 {
        self.records_synced.load(Ordering::Relaxed)
    }

    pub fn version_conflicts(&self) -> u64 {
        self.version_conflicts.load(Ordering::Relaxed)
    }

    pub fn chunks_failed(&self) -> u64 {
        self.chunks_failed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.records_seen.store(0, Ordering::Relaxed);
        self.records_indexed.store(0, Ordering::Relaxed);
        self.records_synced.store(0, Ordering::Relaxed);
        self.version_conflicts.store(0, Ordering::Relaxed);
        self.chunks_failed.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_seen();
        m.inc_seen();
        assert_eq!(m.records_seen(), 2);

        m.add_indexed(90);
        m.add_failed_chunks(1);
        assert_eq!(m.records_indexed(), 90);
        assert_eq!(m.chunks_failed(), 1);

        m.inc_synced();
        m.inc_conflicts();
        assert_eq!(m.records_synced(), 1);
        assert_eq!(m.version_conflicts(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_seen();
        m.add_indexed(3);
        m.inc_conflicts();
        m.reset();
        assert_eq!(m.records_seen(), 0);
        assert_eq!(m.records_indexed(), 0);
        assert_eq!(m.version_conflicts(), 0);
    }
}
