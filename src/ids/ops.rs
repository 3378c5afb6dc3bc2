use std::sync::Arc;
use std::time::Duration;

use crate::primitives::bytes::StaticBuffer;
use crate::primitives::time::{Clock, Shutdown};
use crate::storage::{
    backend_op, Entry, EntryList, KeyColumnValueStore, KeySliceQuery, StoreManager, TxConfig,
};
use crate::types::Result;

/// Store calls wrapped in the temporary-failure retry executor.
#[derive(Clone)]
pub(crate) struct StoreOps {
    pub(crate) manager: Arc<dyn StoreManager>,
    pub(crate) tx_config: TxConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) shutdown: Shutdown,
    pub(crate) budget: Duration,
}

impl StoreOps {
    /// Retry budget capped at `remaining`, floored at one millisecond.
    fn budget_within(&self, remaining: Option<Duration>) -> Duration {
        match remaining {
            Some(r) => self.budget.min(r).max(Duration::from_millis(1)),
            None => self.budget,
        }
    }

    pub(crate) fn get_slice(
        &self,
        store: &dyn KeyColumnValueStore,
        query: &KeySliceQuery,
        remaining: Option<Duration>,
    ) -> Result<EntryList> {
        backend_op::execute_in_tx(
            self.manager.as_ref(),
            &self.tx_config,
            self.clock.as_ref(),
            &self.shutdown,
            self.budget_within(remaining),
            |tx| store.get_slice(query, tx),
        )
    }

    pub(crate) fn mutate(
        &self,
        store: &dyn KeyColumnValueStore,
        key: &StaticBuffer,
        additions: &[Entry],
        deletions: &[StaticBuffer],
        remaining: Option<Duration>,
    ) -> Result<()> {
        backend_op::execute_in_tx(
            self.manager.as_ref(),
            &self.tx_config,
            self.clock.as_ref(),
            &self.shutdown,
            self.budget_within(remaining),
            |tx| store.mutate(key, additions, deletions, tx),
        )
    }

    /// Sleeps on the injected clock; false when interrupted by shutdown.
    pub(crate) fn sleep(&self, duration: Duration) -> bool {
        self.clock.sleep(duration, &self.shutdown)
    }
}
