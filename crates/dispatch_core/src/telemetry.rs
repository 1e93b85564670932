//! Dispatch telemetry: counters for claims, transitions and delivery
//! failures. Read-only snapshots feed dashboards; nothing here affects
//! dispatch decisions.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters, safe to bump from any request thread.
#[derive(Debug, Default)]
pub struct DispatchTelemetry {
    pub claims_won: AtomicU64,
    pub claims_rejected: AtomicU64,
    pub rides_completed: AtomicU64,
    pub rides_cancelled: AtomicU64,
    pub scheduled_promotions: AtomicU64,
    pub notifications_failed: AtomicU64,
    pub route_recomputes: AtomicU64,
    pub stale_route_results_discarded: AtomicU64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub claims_won: u64,
    pub claims_rejected: u64,
    pub rides_completed: u64,
    pub rides_cancelled: u64,
    pub scheduled_promotions: u64,
    pub notifications_failed: u64,
    pub route_recomputes: u64,
    pub stale_route_results_discarded: u64,
}

impl DispatchTelemetry {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            claims_won: self.claims_won.load(Ordering::Relaxed),
            claims_rejected: self.claims_rejected.load(Ordering::Relaxed),
            rides_completed: self.rides_completed.load(Ordering::Relaxed),
            rides_cancelled: self.rides_cancelled.load(Ordering::Relaxed),
            scheduled_promotions: self.scheduled_promotions.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            route_recomputes: self.route_recomputes.load(Ordering::Relaxed),
            stale_route_results_discarded: self
                .stale_route_results_discarded
                .load(Ordering::Relaxed),
        }
    }
}
