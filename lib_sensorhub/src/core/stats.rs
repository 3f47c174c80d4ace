//! # Loop Statistics
//!
//! Lock-free counters updated by the acquisition loop and read by anyone
//! holding the driver. Every counter is an `AtomicU64` with relaxed ordering:
//! the values are independent and only ever read as a snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::errors::DriverError;

#[derive(Debug, Default)]
pub struct LoopStats {
    cycles: AtomicU64,
    published: AtomicU64,
    degraded: AtomicU64,
    fetch_failures: AtomicU64,
    protocol_errors: AtomicU64,
    record_errors: AtomicU64,
    idle: AtomicU64,
}

/// Point-in-time copy of `LoopStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub cycles: u64,
    pub published: u64,
    pub degraded: u64,
    pub fetch_failures: u64,
    pub protocol_errors: u64,
    pub record_errors: u64,
    pub idle: u64,
}

impl LoopStats {
    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded(&self) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idle(&self) {
        self.idle.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a contained per-cycle error under its category.
    pub fn record_error(&self, err: &DriverError) {
        let counter = match err {
            DriverError::Protocol(_) => &self.protocol_errors,
            DriverError::Record(_) => &self.record_errors,
            _ => &self.fetch_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            record_errors: self.record_errors.load(Ordering::Relaxed),
            idle: self.idle.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ProtocolError, TransientFetchError};

    #[test]
    fn errors_are_counted_by_category() {
        let stats = LoopStats::default();
        stats.record_error(&TransientFetchError::Closed.into());
        stats.record_error(&ProtocolError::Malformed("x".into()).into());
        stats.record_error(&ProtocolError::Malformed("y".into()).into());
        stats.record_cycle();

        let s = stats.snapshot();
        assert_eq!(s.fetch_failures, 1);
        assert_eq!(s.protocol_errors, 2);
        assert_eq!(s.record_errors, 0);
        assert_eq!(s.cycles, 1);
    }
}
