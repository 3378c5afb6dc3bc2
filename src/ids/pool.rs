//! Single-id dispenser on top of an [`IdAuthority`].
//!
//! The pool hands out ids from its current block and fetches the next block on
//! a background thread once the remaining ids drop below the renewal buffer,
//! so callers rarely wait on the claim protocol.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::authority::IdAuthority;
use super::block::IdBlock;
use crate::types::{NamespaceId, PartitionId, Result, SombraError};

const MIN_RENEW_BUFFER: u64 = 100;

/// Renewal policy of an [`IdPool`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IdPoolOptions {
    /// Longest a caller waits for the next block, and the timeout of each renewal.
    pub renew_timeout: Duration,
    /// Fraction of a block left when renewal starts, in `(0, 1]`.
    pub renew_buffer_percentage: f64,
}

impl Default for IdPoolOptions {
    fn default() -> Self {
        Self {
            renew_timeout: Duration::from_secs(120),
            renew_buffer_percentage: 0.3,
        }
    }
}

impl IdPoolOptions {
    /// Sets the renewal timeout.
    pub fn renew_timeout(mut self, timeout: Duration) -> Self {
        self.renew_timeout = timeout;
        self
    }

    /// Sets the renewal buffer fraction.
    pub fn renew_buffer_percentage(mut self, pct: f64) -> Self {
        self.renew_buffer_percentage = pct;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.renew_timeout.is_zero() {
            return Err(SombraError::invalid("renew_timeout must be positive"));
        }
        if !(self.renew_buffer_percentage > 0.0 && self.renew_buffer_percentage <= 1.0) {
            return Err(SombraError::invalid(format!(
                "renew_buffer_percentage {} outside (0, 1]",
                self.renew_buffer_percentage
            )));
        }
        Ok(())
    }
}

struct PoolState {
    current: Option<IdBlock>,
    index: u64,
    renew_index: u64,
    pending: Option<Receiver<Result<IdBlock>>>,
    exhausted: Option<String>,
    closed: bool,
}

/// Ids of one `(partition, namespace)` handed out one at a time.
pub struct IdPool {
    authority: Arc<dyn IdAuthority>,
    partition: PartitionId,
    namespace: NamespaceId,
    options: IdPoolOptions,
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for IdPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdPool")
            .field("partition", &self.partition)
            .field("namespace", &self.namespace)
            .field("options", &self.options)
            .finish()
    }
}

impl IdPool {
    /// Creates a pool. No block is fetched until the first [`IdPool::next_id`].
    pub fn new(
        authority: Arc<dyn IdAuthority>,
        partition: PartitionId,
        namespace: NamespaceId,
        options: IdPoolOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            authority,
            partition,
            namespace,
            options,
            state: Mutex::new(PoolState {
                current: None,
                index: 0,
                renew_index: 0,
                pending: None,
                exhausted: None,
                closed: false,
            }),
        })
    }

    /// Index inside a block of `num_ids` at which renewal starts.
    fn renew_index(&self, num_ids: u64) -> u64 {
        let buffer = (num_ids as f64 * self.options.renew_buffer_percentage).round() as u64;
        num_ids.saturating_sub(buffer.max(MIN_RENEW_BUFFER))
    }

    fn start_renewal(&self, state: &mut PoolState) {
        if state.pending.is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel();
        let authority = Arc::clone(&self.authority);
        let (partition, namespace, timeout) =
            (self.partition, self.namespace, self.options.renew_timeout);
        let spawned = thread::Builder::new()
            .name(format!("sombra-idpool-{partition}-{namespace}"))
            .spawn(move || {
                let started = Instant::now();
                let block = authority.get_id_block(partition, namespace, timeout);
                debug!(
                    %partition, %namespace, elapsed = ?started.elapsed(), ok = block.is_ok(),
                    "id_pool.renewed"
                );
                let _ = tx.send(block);
            });
        match spawned {
            Ok(_) => state.pending = Some(rx),
            Err(err) => warn!(%partition, %namespace, error = %err, "id_pool.spawn_failed"),
        }
    }

    fn exhausted_error(&self, detail: String) -> SombraError {
        SombraError::PoolExhausted {
            partition: self.partition,
            namespace: self.namespace,
            detail,
        }
    }

    fn await_next_block(&self, state: &mut PoolState) -> Result<()> {
        self.start_renewal(state);
        let Some(rx) = state.pending.as_ref() else {
            return Err(SombraError::PermanentStorage(
                "could not start id block renewal".into(),
            ));
        };
        let started = Instant::now();
        match rx.recv_timeout(self.options.renew_timeout) {
            Ok(Ok(block)) => {
                state.pending = None;
                state.renew_index = self.renew_index(block.num_ids());
                state.index = 0;
                debug!(block = %block, renew_at = state.renew_index, "id_pool.next_block");
                state.current = Some(block);
                Ok(())
            }
            Ok(Err(SombraError::PoolExhausted { detail, .. })) => {
                state.pending = None;
                state.exhausted = Some(detail.clone());
                Err(self.exhausted_error(detail))
            }
            Ok(Err(err)) => {
                state.pending = None;
                Err(err)
            }
            Err(RecvTimeoutError::Timeout) => Err(SombraError::Timeout {
                partition: self.partition,
                namespace: self.namespace,
                elapsed: started.elapsed(),
                timeout: self.options.renew_timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => {
                state.pending = None;
                Err(SombraError::PermanentStorage(
                    "id block renewal thread exited without a result".into(),
                ))
            }
        }
    }

    /// Next id of the pool.
    ///
    /// Fails with [`SombraError::PoolExhausted`] once the authority has no more
    /// blocks, and keeps failing that way afterwards.
    pub fn next_id(&self) -> Result<u64> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SombraError::Closed);
        }
        if let Some(detail) = &state.exhausted {
            return Err(self.exhausted_error(detail.clone()));
        }
        let has_ids = state
            .current
            .as_ref()
            .is_some_and(|b| state.index < b.num_ids());
        if !has_ids {
            self.await_next_block(&mut state)?;
        }
        let Some(block) = state.current else {
            return Err(SombraError::PermanentStorage("no current id block".into()));
        };
        let id = block.get_id(state.index)?;
        state.index += 1;
        if state.index >= state.renew_index {
            self.start_renewal(&mut state);
        }
        trace!(id, partition = %self.partition, namespace = %self.namespace, "id_pool.next_id");
        Ok(id)
    }

    /// Stops handing out ids, waiting up to the renewal timeout for a renewal in flight.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        if let Some(rx) = state.pending.take() {
            if let Ok(Ok(block)) = rx.recv_timeout(self.options.renew_timeout) {
                debug!(block = %block, "id_pool.discarded_block");
            }
        }
    }
}

impl Drop for IdPool {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.closed = true;
        state.pending = None;
    }
}
