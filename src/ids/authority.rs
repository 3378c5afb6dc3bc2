//! Claim-and-verify id block allocation over a key-consistent store.
//!
//! Claims for one `(partition, namespace, tag)` live in a single row of the id
//! table. Each claim is one column:
//!
//! ```text
//! +----------------------+-------------------------+-----------------+
//! | !end (u64, BE)       | timestamp micros (u64)  | instance id     |
//! +----------------------+-------------------------+-----------------+
//! value: [state u8][start u64]
//! ```
//!
//! Complementing the end counter makes the row sort by descending end, so the
//! high-water-mark is among the first columns. A claimant writes its claim,
//! waits `wait + wait / 10`, then reads every claim whose end lies above its
//! start. It owns the block only if its claim is the
//! earliest among the claims overlapping its range. A claim written within
//! `wait` is visible to any claimant that verifies after sleeping, so of two
//! overlapping claims the later one always sees the earlier and backs off.
//! This holds only while the clocks of all claimants agree to within the
//! grace period.
//!
//! Every store call made for a `get_id_block` call, cleanup included, runs
//! inside that call's timeout. A claim left behind when the budget runs out
//! or the authority closes is tentative and gets swept once it expires.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, trace, warn};

use super::block::IdBlock;
use super::metrics::{IdAuthorityMetrics, NoopMetrics};
use super::ops::StoreOps;
use super::options::{ConflictAvoidanceMode, IdAuthorityOptions};
use super::registry::{self, InstanceRegistry, Registration};
use super::sizer::IdBlockSizer;
use crate::primitives::bytes::{ord, ReadBuffer, StaticBuffer, WriteBuffer, LONG_LEN};
use crate::primitives::time::{Clock, Shutdown, SystemClock};
use crate::storage::{
    Entry, KeyColumnValueStore, KeyRange, KeySliceQuery, StoreManager, TxConfig,
};
use crate::types::{NamespaceId, PartitionId, Result, SombraError};

const HWM_READ_LIMIT: usize = 5;
const CLAIM_PREFIX_LEN: usize = 2 * LONG_LEN;
const ROLLBACK_ATTEMPTS: u32 = 5;
const ROLLBACK_WAIT: Duration = Duration::from_millis(200);
const SWEEP_LIMIT: usize = 32;
const MAX_BACKOFF_FACTOR: u32 = 32;

const STATE_TENTATIVE: u8 = 0;
const STATE_COMMITTED: u8 = 1;

/// Allocator of disjoint id blocks.
pub trait IdAuthority: Send + Sync {
    /// Returns a block disjoint from every block ever returned for the same
    /// partition and namespace, or fails within `timeout`.
    fn get_id_block(
        &self,
        partition: PartitionId,
        namespace: NamespaceId,
        timeout: Duration,
    ) -> Result<IdBlock>;

    /// Installs the block size policy for calls made from now on.
    ///
    /// Calls already in flight finish with the policy they started with.
    fn set_id_block_sizer(&self, sizer: Arc<dyn IdBlockSizer>);

    /// Identity of this authority.
    fn unique_id(&self) -> &str;

    /// Key ranges of the id table local to this process (best effort).
    fn local_id_partition(&self) -> Result<Vec<KeyRange>>;

    /// Returns true when an in-flight allocation can be cut short by [`IdAuthority::close`].
    fn supports_interruption(&self) -> bool;

    /// Cancels in-flight allocations and deregisters the instance.
    ///
    /// Blocks handed out earlier stay valid.
    fn close(&self) -> Result<()>;
}

/// One step of the per-call retry state machine.
#[derive(Debug)]
enum Step {
    Attempt,
    Backoff(Duration),
    Won(IdBlock),
    Exhausted(SombraError),
    TimedOut,
}

/// Result of a single claim attempt.
#[derive(Debug)]
enum Attempt {
    Won(IdBlock),
    Lost,
    TagExhausted { tag: u32, current: u64 },
}

/// Time budget of one `get_id_block` call.
#[derive(Clone, Copy, Debug)]
struct Deadline {
    partition: PartitionId,
    namespace: NamespaceId,
    started: Duration,
    timeout: Duration,
}

impl Deadline {
    fn remaining(&self, clock: &dyn Clock) -> Option<Duration> {
        let spent = clock.elapsed().saturating_sub(self.started);
        self.timeout.checked_sub(spent).filter(|r| !r.is_zero())
    }

    /// Remaining budget, or the timeout error once it is spent.
    fn left(&self, clock: &dyn Clock) -> Result<Duration> {
        self.remaining(clock).ok_or_else(|| self.expired(clock))
    }

    fn expired(&self, clock: &dyn Clock) -> SombraError {
        SombraError::Timeout {
            partition: self.partition,
            namespace: self.namespace,
            elapsed: clock.elapsed().saturating_sub(self.started),
            timeout: self.timeout,
        }
    }
}

/// Doubling wait starting at `wait`, capped at 32 times `wait`.
#[derive(Debug)]
struct Backoff {
    next: Duration,
    cap: Duration,
    jitter: bool,
}

impl Backoff {
    fn new(wait: Duration, jitter: bool) -> Self {
        Self {
            next: wait,
            cap: wait.saturating_mul(MAX_BACKOFF_FACTOR),
            jitter,
        }
    }

    fn next_wait(&mut self) -> Duration {
        let wait = self.next;
        self.next = self.next.saturating_mul(2).min(self.cap);
        if self.jitter {
            crate::storage::backend_op::perturb(wait)
        } else {
            wait
        }
    }
}

/// A decoded claim column.
#[derive(Debug, Clone)]
struct Claim {
    column: StaticBuffer,
    end: u64,
    start: u64,
    timestamp: u64,
    uid: StaticBuffer,
    committed: bool,
}

impl Claim {
    fn decode(entry: &Entry) -> Result<Self> {
        let column = entry.column();
        let mut rb: ReadBuffer = column.as_read_buffer();
        rb.invert();
        let end = rb.get_u64()?;
        rb.invert();
        let timestamp = rb.get_u64()?;
        let uid = rb.as_relative()?;
        let value = entry.value();
        let committed = value.get_u8(0)? == STATE_COMMITTED;
        let start = value.get_u64(1)?;
        Ok(Self {
            column,
            end,
            start,
            timestamp,
            uid,
            committed,
        })
    }

    fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start < end && start < self.end
    }

    fn precedes(&self, other: &Claim) -> bool {
        (self.timestamp, self.uid.as_slice()) < (other.timestamp, other.uid.as_slice())
    }
}

fn claim_column(end: u64, timestamp: u64, uid: &[u8]) -> StaticBuffer {
    let mut wb = WriteBuffer::with_capacity(CLAIM_PREFIX_LEN + uid.len());
    wb.put_bytes(&ord::u64_desc(end)).put_u64(timestamp).put_bytes(uid);
    wb.into_static()
}

fn claim_value(state: u8, start: u64) -> StaticBuffer {
    let mut wb = WriteBuffer::with_capacity(1 + LONG_LEN);
    wb.put_u8(state).put_u64(start);
    wb.into_static()
}

fn claim_entry(column: &StaticBuffer, state: u8, start: u64) -> Result<Entry> {
    Entry::of(column.as_slice(), claim_value(state, start).as_slice())
}

/// [`IdAuthority`] for stores that are consistent on single-row operations.
pub struct ConsistentKeyIdAuthority {
    options: IdAuthorityOptions,
    uid: StaticBuffer,
    store: Arc<dyn KeyColumnValueStore>,
    registry_store: Arc<dyn KeyColumnValueStore>,
    ops: StoreOps,
    distributed: bool,
    partition_bits: u32,
    sizer: RwLock<Option<Arc<dyn IdBlockSizer>>>,
    key_locks: Mutex<FxHashMap<(PartitionId, NamespaceId), Arc<Mutex<()>>>>,
    rng: Mutex<ChaCha8Rng>,
    metrics: Arc<dyn IdAuthorityMetrics>,
    registration: Mutex<Option<InstanceRegistry>>,
    closed: AtomicBool,
}

impl fmt::Debug for ConsistentKeyIdAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsistentKeyIdAuthority")
            .field("unique_id", &self.options.unique_instance_id)
            .field("mode", &self.options.conflict_avoidance)
            .field("distributed", &self.distributed)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl ConsistentKeyIdAuthority {
    /// Opens an authority on `manager` using the system clock.
    pub fn open(manager: Arc<dyn StoreManager>, options: IdAuthorityOptions) -> Result<Self> {
        Self::open_with_clock(manager, options, Arc::new(SystemClock::new()))
    }

    /// Opens an authority sleeping on `clock`.
    pub fn open_with_clock(
        manager: Arc<dyn StoreManager>,
        options: IdAuthorityOptions,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::open_with(manager, options, clock, Arc::new(NoopMetrics))
    }

    /// Opens an authority with every collaborator supplied.
    ///
    /// Fails with [`SombraError::UniquenessViolation`] when another live
    /// authority registered the same instance id.
    pub fn open_with(
        manager: Arc<dyn StoreManager>,
        options: IdAuthorityOptions,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn IdAuthorityMetrics>,
    ) -> Result<Self> {
        options.validate()?;
        let features = manager.features();
        if !features.key_consistent {
            return Err(SombraError::Unsupported(
                "id authority requires a key-consistent store",
            ));
        }
        let tx_config = TxConfig::with_consistency(options.conflict_avoidance.consistency())
            .group(format!("ids.{}", options.unique_instance_id));
        let ops = StoreOps {
            manager: Arc::clone(&manager),
            tx_config,
            clock,
            shutdown: Shutdown::new(),
            budget: options.storage_op_budget,
        };
        let store = manager.open_database(&options.id_store_name)?;
        let registry_store = manager.open_database(&options.registry_store_name)?;
        let settle = features
            .distributed
            .then(|| options.wait + options.grace_period());
        let registration = InstanceRegistry::register(
            &ops,
            Arc::clone(&registry_store),
            &options.unique_instance_id,
            options.replace_instance_if_exists,
            settle,
        )?;
        let rng = match options.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        info!(
            instance = %options.unique_instance_id,
            mode = %options.conflict_avoidance,
            distributed = features.distributed,
            store = manager.name(),
            "id_authority.opened"
        );
        Ok(Self {
            uid: StaticBuffer::copy_from_slice(options.unique_instance_id.as_bytes()),
            partition_bits: options.partition_bits(),
            distributed: features.distributed,
            options,
            store,
            registry_store,
            ops,
            sizer: RwLock::new(None),
            key_locks: Mutex::new(FxHashMap::default()),
            rng: Mutex::new(rng),
            metrics,
            registration: Mutex::new(Some(registration)),
            closed: AtomicBool::new(false),
        })
    }

    /// Options the authority was opened with.
    pub fn options(&self) -> &IdAuthorityOptions {
        &self.options
    }

    /// Partitions whose row keys fall inside the store's local key ranges.
    ///
    /// Only a placement hint; any partition may be allocated from anywhere.
    pub fn local_partitions(&self) -> Result<Vec<PartitionId>> {
        let ranges = self.local_id_partition()?;
        let count = self.options.max_partitions;
        Ok((0..count)
            .map(PartitionId)
            .filter(|p| {
                let key = self.partition_key(*p, NamespaceId(0), 0);
                ranges.iter().any(|r| r.contains(&key))
            })
            .collect())
    }

    /// Every instance currently registered in the registry table.
    pub fn registered_instances(&self) -> Result<Vec<Registration>> {
        registry::list(&self.ops, self.registry_store.as_ref())
    }

    fn partition_prefix(&self, partition: PartitionId) -> u32 {
        if self.partition_bits == 0 {
            0
        } else {
            partition.0 << (u32::BITS - self.partition_bits)
        }
    }

    fn partition_key(&self, partition: PartitionId, namespace: NamespaceId, tag: u32) -> StaticBuffer {
        StaticBuffer::from_u32s(&[self.partition_prefix(partition) + tag, namespace.0])
    }

    fn key_lock(&self, partition: PartitionId, namespace: NamespaceId) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock();
        Arc::clone(locks.entry((partition, namespace)).or_default())
    }

    fn pick_tag(&self, exhausted: &FxHashSet<u32>) -> u32 {
        if self.options.conflict_avoidance != ConflictAvoidanceMode::GlobalAuto {
            return self.options.fixed_tag();
        }
        let count = self.options.tag_count();
        let mut rng = self.rng.lock();
        loop {
            let tag = rng.gen_range(0..count);
            if !exhausted.contains(&tag) {
                return tag;
            }
        }
    }

    fn current_high_water_mark(&self, key: &StaticBuffer, remaining: Duration) -> Result<u64> {
        let query = KeySliceQuery::new(key.clone(), StaticBuffer::zeros(1), StaticBuffer::ones(17))
            .with_limit(HWM_READ_LIMIT);
        let claims = self.ops.get_slice(self.store.as_ref(), &query, Some(remaining))?;
        let mut latest = 0u64;
        for entry in claims.iter() {
            let end = !entry.column().get_u64(0)?;
            latest = latest.max(end);
        }
        Ok(latest)
    }

    fn attempt(
        &self,
        tag: u32,
        block_size: u64,
        counter_bound: u64,
        deadline: &Deadline,
    ) -> Result<Attempt> {
        let clock = self.ops.clock.as_ref();
        let (partition, namespace) = (deadline.partition, deadline.namespace);
        let key = self.partition_key(partition, namespace, tag);

        let start = self.current_high_water_mark(&key, deadline.left(clock)?)?;
        if start.saturating_add(block_size) > counter_bound {
            info!(
                %partition, %namespace, tag, current = start, block_size, counter_bound,
                tag_bits = self.options.cav_bits,
                "id_authority.overflow"
            );
            return Ok(Attempt::TagExhausted {
                tag,
                current: start,
            });
        }
        let end = start + block_size;

        // A claim that cannot be verified before the deadline is never written.
        let settle = self.settle_time();
        let left = deadline.left(clock)?;
        if left <= settle {
            return Err(deadline.expired(clock));
        }

        let write_started = clock.elapsed();
        let timestamp = clock.timestamp_micros();
        let column = claim_column(end, timestamp, self.uid.as_slice());
        let written = self
            .ops
            .mutate(
                self.store.as_ref(),
                &key,
                &[claim_entry(&column, STATE_TENTATIVE, start)?],
                &[],
                Some(left - settle),
            )
            .and_then(|()| {
                let write_elapsed = clock.elapsed().saturating_sub(write_started);
                if write_elapsed > self.options.wait {
                    return Err(SombraError::TemporaryStorage(format!(
                        "wrote claim for id block [{start}, {end}) in {write_elapsed:?} => too slow, threshold is {:?}",
                        self.options.wait
                    )));
                }
                Ok(())
            });

        let outcome =
            written.and_then(|()| self.verify(&key, &column, start, end, tag, deadline));

        if !matches!(outcome, Ok(Attempt::Won(_))) {
            self.rollback(&key, &column, deadline);
        }
        outcome
    }

    fn settle_time(&self) -> Duration {
        self.options.wait + self.options.grace_period()
    }

    fn verify(
        &self,
        key: &StaticBuffer,
        column: &StaticBuffer,
        start: u64,
        end: u64,
        tag: u32,
        deadline: &Deadline,
    ) -> Result<Attempt> {
        let clock = self.ops.clock.as_ref();
        let (partition, namespace) = (deadline.partition, deadline.namespace);
        if !self.ops.sleep(self.settle_time()) {
            return Err(SombraError::Closed);
        }
        let query = KeySliceQuery::new(
            key.clone(),
            StaticBuffer::zeros(1),
            StaticBuffer::copy_from_slice(&ord::u64_desc(start)),
        );
        let seen = self
            .ops
            .get_slice(self.store.as_ref(), &query, Some(deadline.left(clock)?))?;
        let claims = seen
            .iter()
            .map(|e| Claim::decode(&e))
            .collect::<Result<Vec<_>>>()?;

        let Some(ours) = claims.iter().find(|c| c.column == *column) else {
            let claimed_at = column.get_u64(LONG_LEN)?;
            let age = clock.timestamp_micros().saturating_sub(claimed_at);
            if age >= self.options.claim_expiry.as_micros() as u64 {
                return Err(SombraError::TemporaryStorage(format!(
                    "claim for id block [{start}, {end}) expired before it was verified"
                )));
            }
            return Err(SombraError::UniquenessViolation(format!(
                "claim for id block [{start}, {end}) on partition({partition})-namespace({namespace}) vanished; \
                 ensure every authority sharing this store has a unique instance id"
            )));
        };
        if let Some(dup) = claims
            .iter()
            .find(|c| c.uid == self.uid && c.column != *column && c.overlaps(start, end))
        {
            return Err(SombraError::UniquenessViolation(format!(
                "instance id '{}' holds a second claim ending at {} that this authority did not write",
                self.options.unique_instance_id, dup.end
            )));
        }

        let earliest = claims
            .iter()
            .filter(|c| c.overlaps(start, end))
            .fold(ours, |best, c| if c.precedes(best) { c } else { best });
        if earliest.column != *column {
            debug!(
                %partition, %namespace, start, end,
                winner = %String::from_utf8_lossy(earliest.uid.as_slice()),
                winner_committed = earliest.committed,
                "id_authority.claim_lost"
            );
            return Ok(Attempt::Lost);
        }

        // Won; past the deadline the commit mark gets one store call and no retries.
        let block = IdBlock::new(start, end - start, self.options.cav_bits, tag);
        let commit_budget = deadline.remaining(clock).unwrap_or_default();
        let commit = claim_entry(column, STATE_COMMITTED, start).and_then(|entry| {
            self.ops
                .mutate(self.store.as_ref(), key, &[entry], &[], Some(commit_budget))
        });
        if let Err(err) = commit {
            warn!(block = %block, error = %err, "id_authority.commit_mark_failed");
        }
        self.sweep(key, start, deadline);
        debug!(
            block = %block, %partition, %namespace,
            instance = %self.options.unique_instance_id,
            "id_authority.acquired"
        );
        Ok(Attempt::Won(block))
    }

    /// Deletes expired tentative claims that end at or below `start`.
    fn sweep(&self, key: &StaticBuffer, start: u64, deadline: &Deadline) {
        let clock = self.ops.clock.as_ref();
        let Some(left) = deadline.remaining(clock) else {
            return;
        };
        let query = KeySliceQuery::new(
            key.clone(),
            StaticBuffer::copy_from_slice(&ord::u64_desc(start)),
            StaticBuffer::ones(17),
        )
        .with_limit(SWEEP_LIMIT);
        let expiry_micros = self.options.claim_expiry.as_micros() as u64;
        let now = clock.timestamp_micros();
        let stale: Vec<StaticBuffer> =
            match self.ops.get_slice(self.store.as_ref(), &query, Some(left)) {
                Ok(list) => list
                    .iter()
                    .filter_map(|e| Claim::decode(&e).ok())
                    .filter(|c| !c.committed && c.timestamp.saturating_add(expiry_micros) < now)
                    .map(|c| c.column)
                    .collect(),
                Err(err) => {
                    warn!(error = %err, "id_authority.sweep_read_failed");
                    return;
                }
            };
        if stale.is_empty() {
            return;
        }
        let Some(left) = deadline.remaining(clock) else {
            return;
        };
        match self
            .ops
            .mutate(self.store.as_ref(), key, &[], &stale, Some(left))
        {
            Ok(()) => {
                trace!(count = stale.len(), "id_authority.swept");
                self.metrics.stale_claims_removed(stale.len() as u64);
            }
            Err(err) => warn!(error = %err, "id_authority.sweep_delete_failed"),
        }
    }

    /// Removes a claim that did not win so it does not pollute the id space.
    ///
    /// Stops at the deadline or on close; an abandoned claim expires and is swept.
    fn rollback(&self, key: &StaticBuffer, column: &StaticBuffer, deadline: &Deadline) {
        let clock = self.ops.clock.as_ref();
        for attempt in 1..=ROLLBACK_ATTEMPTS {
            let budget = deadline.remaining(clock).unwrap_or_default();
            let err = match self
                .ops
                .mutate(self.store.as_ref(), key, &[], &[column.clone()], Some(budget))
            {
                Ok(()) => return,
                Err(SombraError::Closed) => {
                    debug!(attempt, "id_authority.rollback_interrupted");
                    return;
                }
                Err(err) => err,
            };
            let retry = attempt < ROLLBACK_ATTEMPTS
                && deadline
                    .remaining(clock)
                    .is_some_and(|left| left > ROLLBACK_WAIT);
            if !retry {
                warn!(attempt, error = %err, "id_authority.rollback_abandoned");
                return;
            }
            warn!(
                attempt, error = %err, retry_in = ?ROLLBACK_WAIT,
                "id_authority.rollback_failed"
            );
            if !self.ops.sleep(ROLLBACK_WAIT) {
                return;
            }
        }
    }

    fn exhausted(
        &self,
        partition: PartitionId,
        namespace: NamespaceId,
        detail: String,
    ) -> SombraError {
        self.metrics.exhausted();
        SombraError::PoolExhausted {
            partition,
            namespace,
            detail,
        }
    }

    fn close_inner(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.ops.shutdown.fire();
        let cleanup = StoreOps {
            shutdown: Shutdown::new(),
            ..self.ops.clone()
        };
        let registration = self.registration.lock().take();
        let deregistered = match registration {
            Some(reg) => reg.deregister(&cleanup),
            None => Ok(()),
        };
        let store_closed = self.store.close();
        info!(instance = %self.options.unique_instance_id, "id_authority.closed");
        deregistered.and(store_closed)
    }
}

impl IdAuthority for ConsistentKeyIdAuthority {
    fn get_id_block(
        &self,
        partition: PartitionId,
        namespace: NamespaceId,
        timeout: Duration,
    ) -> Result<IdBlock> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SombraError::Closed);
        }
        if partition.0 >= self.options.max_partitions {
            return Err(SombraError::invalid(format!(
                "partition {partition} outside 0..{}",
                self.options.max_partitions
            )));
        }
        let sizer = self
            .sizer
            .read()
            .clone()
            .ok_or_else(|| SombraError::invalid("no id block sizer configured"))?;
        let block_size = sizer.block_size(namespace);
        let upper_bound = sizer.id_upper_bound(namespace);
        let counter_bound = upper_bound >> self.options.cav_bits;
        if block_size == 0 || block_size > counter_bound {
            return Err(SombraError::invalid(format!(
                "block size {block_size} does not fit id bound {upper_bound} with {} tag bits",
                self.options.cav_bits
            )));
        }

        let clock = self.ops.clock.as_ref();
        let deadline = Deadline {
            partition,
            namespace,
            started: clock.elapsed(),
            timeout,
        };
        let timed_out = |this: &Self| {
            this.metrics.timed_out();
            deadline.expired(this.ops.clock.as_ref())
        };

        let key_lock = self.key_lock(partition, namespace);
        let Some(_serial) = deadline
            .remaining(clock)
            .and_then(|r| key_lock.try_lock_arc_for(r))
        else {
            return Err(timed_out(self));
        };

        let mut backoff = Backoff::new(self.options.wait, self.options.jitter);
        let mut exhausted_tags: FxHashSet<u32> = FxHashSet::default();
        let mut step = Step::Attempt;
        loop {
            step = match step {
                Step::Won(block) => {
                    self.metrics.claim_won();
                    return Ok(block);
                }
                Step::Exhausted(err) => return Err(err),
                Step::TimedOut => return Err(timed_out(self)),
                Step::Backoff(wait) => match deadline.remaining(clock) {
                    None => Step::TimedOut,
                    Some(left) => {
                        if !self.ops.sleep(wait.min(left)) {
                            return Err(SombraError::Closed);
                        }
                        Step::Attempt
                    }
                },
                Step::Attempt => {
                    if self.closed.load(Ordering::Acquire) {
                        return Err(SombraError::Closed);
                    }
                    if deadline.remaining(clock).is_none() {
                        Step::TimedOut
                    } else {
                        let tag = self.pick_tag(&exhausted_tags);
                        match self.attempt(tag, block_size, counter_bound, &deadline) {
                            Ok(Attempt::Won(block)) => Step::Won(block),
                            Ok(Attempt::Lost) => {
                                self.metrics.claim_lost();
                                Step::Backoff(backoff.next_wait())
                            }
                            Ok(Attempt::TagExhausted { tag, current }) => {
                                if self.options.conflict_avoidance == ConflictAvoidanceMode::GlobalAuto {
                                    exhausted_tags.insert(tag);
                                    let limit = self.options.cav_retries.min(self.options.tag_count());
                                    if exhausted_tags.len() as u32 >= limit {
                                        let mut tags: Vec<u32> = exhausted_tags.iter().copied().collect();
                                        tags.sort_unstable();
                                        Step::Exhausted(self.exhausted(
                                            partition,
                                            namespace,
                                            format!("exhausted {} tag(s): {tags:?}", tags.len()),
                                        ))
                                    } else {
                                        warn!(
                                            %partition, %namespace, tag,
                                            attempt = exhausted_tags.len(), limit,
                                            "id_authority.tag_exhausted"
                                        );
                                        Step::Attempt
                                    }
                                } else {
                                    Step::Exhausted(self.exhausted(
                                        partition,
                                        namespace,
                                        format!(
                                            "counter {current} + block size {block_size} exceeds bound {counter_bound} (id bound {upper_bound}, tag {tag})"
                                        ),
                                    ))
                                }
                            }
                            Err(SombraError::Timeout { .. }) => Step::TimedOut,
                            Err(err) if err.is_temporary() => {
                                self.metrics.temporary_failure();
                                let wait = backoff.next_wait();
                                warn!(
                                    %partition, %namespace, retry_in = ?wait, error = %err,
                                    "id_authority.temporary_failure"
                                );
                                Step::Backoff(wait)
                            }
                            Err(err) => return Err(err),
                        }
                    }
                }
            };
        }
    }

    fn set_id_block_sizer(&self, sizer: Arc<dyn IdBlockSizer>) {
        *self.sizer.write() = Some(sizer);
    }

    fn unique_id(&self) -> &str {
        &self.options.unique_instance_id
    }

    fn local_id_partition(&self) -> Result<Vec<KeyRange>> {
        self.ops.manager.local_key_partition()
    }

    fn supports_interruption(&self) -> bool {
        true
    }

    fn close(&self) -> Result<()> {
        self.close_inner()
    }
}

impl Drop for ConsistentKeyIdAuthority {
    fn drop(&mut self) {
        if let Err(err) = self.close_inner() {
            warn!(error = %err, "id_authority.close_on_drop_failed");
        }
    }
}
