use std::sync::atomic::{AtomicU64, Ordering};

/// Observer of id authority outcomes.
///
/// Implementations must be cheap; every hook is called on the allocation path.
pub trait IdAuthorityMetrics: Send + Sync {
    /// A claim was verified and the block handed out.
    fn claim_won(&self);

    /// Another claimant's claim came first.
    fn claim_lost(&self);

    /// A store call failed with a temporary error.
    fn temporary_failure(&self);

    /// A tag (or the whole namespace) ran out of ids.
    fn exhausted(&self);

    /// A call ran out of time.
    fn timed_out(&self);

    /// Tentative claims swept after expiring.
    fn stale_claims_removed(&self, count: u64);
}

/// Discards every observation.
#[derive(Default)]
pub struct NoopMetrics;

impl IdAuthorityMetrics for NoopMetrics {
    fn claim_won(&self) {}
    fn claim_lost(&self) {}
    fn temporary_failure(&self) {}
    fn exhausted(&self) {}
    fn timed_out(&self) {}
    fn stale_claims_removed(&self, _count: u64) {}
}

/// Thread-safe counters for every hook.
#[derive(Default)]
pub struct CounterMetrics {
    /// Blocks handed out.
    pub claims_won: AtomicU64,
    /// Claims lost to another claimant.
    pub claims_lost: AtomicU64,
    /// Temporary store failures observed.
    pub temporary_failures: AtomicU64,
    /// Exhaustion events.
    pub exhaustions: AtomicU64,
    /// Calls that ran out of time.
    pub timeouts: AtomicU64,
    /// Expired tentative claims removed.
    pub stale_claims: AtomicU64,
}

impl CounterMetrics {
    /// Copies the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            claims_won: self.claims_won.load(Ordering::Relaxed),
            claims_lost: self.claims_lost.load(Ordering::Relaxed),
            temporary_failures: self.temporary_failures.load(Ordering::Relaxed),
            exhaustions: self.exhaustions.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            stale_claims: self.stale_claims.load(Ordering::Relaxed),
        }
    }
}

impl IdAuthorityMetrics for CounterMetrics {
    fn claim_won(&self) {
        self.claims_won.fetch_add(1, Ordering::Relaxed);
    }

    fn claim_lost(&self) {
        self.claims_lost.fetch_add(1, Ordering::Relaxed);
    }

    fn temporary_failure(&self) {
        self.temporary_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn exhausted(&self) {
        self.exhaustions.fetch_add(1, Ordering::Relaxed);
    }

    fn timed_out(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn stale_claims_removed(&self, count: u64) {
        self.stale_claims.fetch_add(count, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`CounterMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Blocks handed out.
    pub claims_won: u64,
    /// Claims lost to another claimant.
    pub claims_lost: u64,
    /// Temporary store failures observed.
    pub temporary_failures: u64,
    /// Exhaustion events.
    pub exhaustions: u64,
    /// Calls that ran out of time.
    pub timeouts: u64,
    /// Expired tentative claims removed.
    pub stale_claims: u64,
}
