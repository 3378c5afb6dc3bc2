//! Retry executor for single store operations.
//!
//! Temporary failures are retried with a doubling wait that starts at 50 ms,
//! perturbed by +/-50%, for as long as the next wait still fits in the budget.
//! Any other failure surfaces immediately.

use std::time::Duration;

use rand::{thread_rng, Rng};
use tracing::{trace, warn};

use super::store::{StoreManager, StoreTransaction, TxConfig};
use crate::primitives::time::{Clock, Shutdown};
use crate::types::{Result, SombraError};

/// First wait after a temporary failure.
pub const BASE_REATTEMPT_WAIT: Duration = Duration::from_millis(50);

/// Scales `wait` by a uniform factor in `[0.5, 1.5]`.
pub fn perturb(wait: Duration) -> Duration {
    let millis = wait.as_millis() as u64;
    if millis < 2 {
        return wait;
    }
    let half = millis / 2;
    Duration::from_millis(thread_rng().gen_range(millis - half..=millis + half))
}

/// Runs `op` until it succeeds, fails permanently, or `budget` runs out.
pub fn execute<T, F>(clock: &dyn Clock, shutdown: &Shutdown, budget: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let started = clock.elapsed();
    let mut wait = BASE_REATTEMPT_WAIT;
    let mut attempts = 0u32;
    loop {
        if shutdown.is_fired() {
            return Err(SombraError::Closed);
        }
        attempts += 1;
        let err = match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_temporary() => err,
            Err(err) => return Err(err),
        };
        let spent = clock.elapsed().saturating_sub(started);
        let pause = perturb(wait);
        if spent + pause > budget {
            warn!(attempts, ?spent, error = %err, "backend_op.budget_exhausted");
            return Err(SombraError::TemporaryStorage(format!(
                "gave up after {attempts} attempts in {spent:?}: {err}"
            )));
        }
        trace!(attempts, ?pause, error = %err, "backend_op.retry");
        if !clock.sleep(pause, shutdown) {
            return Err(SombraError::Closed);
        }
        wait = wait.saturating_mul(2);
    }
}

/// Like [`execute`], running each attempt in a fresh transaction.
///
/// The transaction commits when the attempt succeeds and rolls back otherwise.
pub fn execute_in_tx<T, F>(
    manager: &dyn StoreManager,
    config: &TxConfig,
    clock: &dyn Clock,
    shutdown: &Shutdown,
    budget: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut(&dyn StoreTransaction) -> Result<T>,
{
    execute(clock, shutdown, budget, || {
        let tx = manager.begin_transaction(config.clone())?;
        match op(tx.as_ref()) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback() {
                    warn!(error = %rollback, "backend_op.rollback_failed");
                }
                Err(err)
            }
        }
    })
}
