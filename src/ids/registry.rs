//! Store-side registry of live authority instance ids.
//!
//! Every authority writes its instance id as a column of one well-known row in
//! the registry table. Finding the column already present at startup means
//! another live (or crashed, unclean) authority claims the same id.

use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tracing::{debug, info, warn};

use super::ops::StoreOps;
use crate::primitives::bytes::{StaticBuffer, WriteBuffer, LONG_LEN};
use crate::storage::{Entry, KeyColumnValueStore, KeySliceQuery};
use crate::types::{Result, SombraError};

const REGISTRY_ROW: &[u8] = b"sombra.ids.instances";

/// A registered instance as stored in the registry row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    /// Instance id.
    pub instance_id: String,
    /// Registration time in microseconds since the Unix epoch.
    pub registered_at_micros: u64,
    /// Random value distinguishing two registrations of one id.
    pub nonce: u64,
}

pub(crate) struct InstanceRegistry {
    store: Arc<dyn KeyColumnValueStore>,
    column: StaticBuffer,
    value: StaticBuffer,
}

fn row_key() -> StaticBuffer {
    StaticBuffer::from_static(REGISTRY_ROW)
}

fn exact_column(column: &StaticBuffer) -> (StaticBuffer, StaticBuffer) {
    let mut end = column.to_vec();
    end.push(0);
    (column.clone(), StaticBuffer::new(end))
}

impl InstanceRegistry {
    /// Registers `instance_id`, failing on a live duplicate unless `replace` is set.
    pub(crate) fn register(
        ops: &StoreOps,
        store: Arc<dyn KeyColumnValueStore>,
        instance_id: &str,
        replace: bool,
        settle: Option<Duration>,
    ) -> Result<Self> {
        let column = StaticBuffer::copy_from_slice(instance_id.as_bytes());
        let (start, end) = exact_column(&column);
        let query = KeySliceQuery::new(row_key(), start, end).with_limit(1);

        let existing = ops.get_slice(store.as_ref(), &query, None)?;
        if !existing.is_empty() {
            if !replace {
                return Err(SombraError::UniquenessViolation(format!(
                    "instance id '{instance_id}' is already registered; another authority is live or did not shut down cleanly"
                )));
            }
            info!(instance = instance_id, "registry.replace_existing");
        }

        let mut value = WriteBuffer::with_capacity(2 * LONG_LEN);
        value
            .put_u64(ops.clock.timestamp_micros())
            .put_u64(rand::thread_rng().next_u64());
        let value = value.into_static();
        let entry = Entry::of(column.as_slice(), value.as_slice())?;
        ops.mutate(store.as_ref(), &row_key(), &[entry], &[], None)?;

        if let Some(settle) = settle {
            if !ops.sleep(settle) {
                return Err(SombraError::Closed);
            }
            let seen = ops.get_slice(store.as_ref(), &query, None)?;
            let ours = seen
                .first()
                .is_some_and(|e| e.value_slice() == value.as_slice());
            if !ours {
                return Err(SombraError::UniquenessViolation(format!(
                    "instance id '{instance_id}' was registered concurrently by another authority"
                )));
            }
        }
        debug!(instance = instance_id, "registry.registered");
        Ok(Self {
            store,
            column,
            value,
        })
    }

    /// Removes our registration if it is still ours.
    pub(crate) fn deregister(&self, ops: &StoreOps) -> Result<()> {
        let (start, end) = exact_column(&self.column);
        let query = KeySliceQuery::new(row_key(), start, end).with_limit(1);
        let seen = ops.get_slice(self.store.as_ref(), &query, None)?;
        match seen.first() {
            Some(e) if e.value_slice() == self.value.as_slice() => {
                ops.mutate(self.store.as_ref(), &row_key(), &[], &[self.column.clone()], None)?;
                debug!(instance = %String::from_utf8_lossy(self.column.as_slice()), "registry.deregistered");
            }
            Some(_) => warn!(
                instance = %String::from_utf8_lossy(self.column.as_slice()),
                "registry.replaced_by_other"
            ),
            None => {}
        }
        Ok(())
    }
}

/// Lists every registration in the registry table.
pub(crate) fn list(ops: &StoreOps, store: &dyn KeyColumnValueStore) -> Result<Vec<Registration>> {
    let query = KeySliceQuery::new(row_key(), StaticBuffer::zeros(1), StaticBuffer::ones(256));
    let rows = ops.get_slice(store, &query, None)?;
    rows.iter()
        .map(|e| {
            let value = e.value();
            Ok(Registration {
                instance_id: String::from_utf8_lossy(e.column_slice()).into_owned(),
                registered_at_micros: value.get_u64(0)?,
                nonce: value.get_u64(LONG_LEN)?,
            })
        })
        .collect()
}
