#![allow(missing_docs)]

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{assert_disjoint, distributed_manager, init_tracing, FlakyStoreManager};
use sombra_idblocks::ids::{
    ConflictAvoidanceMode, ConsistentKeyIdAuthority, CounterMetrics, FixedBlockSizer, IdAuthority,
    IdAuthorityOptions, IdBlock, NamespaceBlockSizer,
};
use sombra_idblocks::primitives::bytes::{ord, StaticBuffer, WriteBuffer};
use sombra_idblocks::primitives::time::{Clock, ManualClock};
use sombra_idblocks::storage::{
    Entry, KeyColumnValueStore, KeyRange, MemoryStoreManager, StoreFeatures, StoreManager,
    TxConfig,
};
use sombra_idblocks::{NamespaceId, PartitionId, Result, SombraError};

const TIMEOUT: Duration = Duration::from_secs(30);
const P0: PartitionId = PartitionId(0);
const N0: NamespaceId = NamespaceId(0);

fn options(uid: &str) -> IdAuthorityOptions {
    IdAuthorityOptions::new(uid)
        .wait(Duration::from_millis(20))
        .cav_bits(0)
        .jitter(false)
}

fn open(
    manager: &MemoryStoreManager,
    options: IdAuthorityOptions,
    block_size: u64,
    upper_bound: u64,
) -> Result<ConsistentKeyIdAuthority> {
    let authority = ConsistentKeyIdAuthority::open_with_clock(
        Arc::new(manager.clone()),
        options,
        Arc::new(ManualClock::default()),
    )?;
    authority.set_id_block_sizer(Arc::new(FixedBlockSizer::new(block_size, upper_bound)?));
    Ok(authority)
}

#[test]
fn sequential_blocks_are_adjacent_and_disjoint() -> Result<()> {
    init_tracing();
    let manager = MemoryStoreManager::new();
    let authority = open(&manager, options("seq"), 100, 1 << 20)?;
    let blocks: Vec<IdBlock> = (0..10)
        .map(|_| authority.get_id_block(P0, N0, TIMEOUT))
        .collect::<Result<_>>()?;
    assert_disjoint(&blocks);
    for (i, block) in blocks.iter().enumerate() {
        assert_eq!(block.start_count(), i as u64 * 100);
        assert_eq!(block.num_ids(), 100);
    }
    assert_eq!(blocks[3].get_id(7)?, 307);
    Ok(())
}

#[test]
fn exhaustion_after_floor_of_bound_over_block_size() -> Result<()> {
    init_tracing();
    let manager = MemoryStoreManager::new();
    let metrics = Arc::new(CounterMetrics::default());
    let authority = ConsistentKeyIdAuthority::open_with(
        Arc::new(manager.clone()),
        options("exhaust"),
        Arc::new(ManualClock::default()),
        metrics.clone(),
    )?;
    authority.set_id_block_sizer(Arc::new(FixedBlockSizer::new(30, 100)?));
    for _ in 0..3 {
        authority.get_id_block(P0, N0, TIMEOUT)?;
    }
    let err = authority.get_id_block(P0, N0, TIMEOUT).unwrap_err();
    assert!(matches!(err, SombraError::PoolExhausted { .. }), "{err}");
    assert!(matches!(
        authority.get_id_block(P0, N0, TIMEOUT),
        Err(SombraError::PoolExhausted { .. })
    ));
    assert_eq!(metrics.snapshot().claims_won, 3);
    assert_eq!(metrics.snapshot().exhaustions, 2);
    Ok(())
}

#[test]
fn exhaustion_is_per_namespace() -> Result<()> {
    init_tracing();
    let manager = MemoryStoreManager::new();
    let authority = open(&manager, options("ns"), 10, 100)?;
    authority.set_id_block_sizer(Arc::new(
        NamespaceBlockSizer::new(FixedBlockSizer::new(10, 100)?)
            .with_namespace(NamespaceId(1), FixedBlockSizer::new(50, 100)?),
    ));
    authority.get_id_block(P0, NamespaceId(1), TIMEOUT)?;
    authority.get_id_block(P0, NamespaceId(1), TIMEOUT)?;
    assert!(matches!(
        authority.get_id_block(P0, NamespaceId(1), TIMEOUT),
        Err(SombraError::PoolExhausted { .. })
    ));
    let block = authority.get_id_block(P0, N0, TIMEOUT)?;
    assert_eq!(block.num_ids(), 10);
    Ok(())
}

#[test]
fn get_id_past_the_end_is_out_of_bounds() -> Result<()> {
    let manager = MemoryStoreManager::new();
    let authority = open(&manager, options("bounds"), 16, 1 << 20)?;
    for _ in 0..5 {
        let block = authority.get_id_block(P0, N0, TIMEOUT)?;
        assert!(block.get_id(block.num_ids() - 1).is_ok());
        assert!(matches!(
            block.get_id(block.num_ids()),
            Err(SombraError::OutOfBounds { .. })
        ));
    }
    Ok(())
}

#[test]
fn duplicate_instance_id_is_rejected() -> Result<()> {
    init_tracing();
    let manager = distributed_manager();
    let first = open(&manager, options("twin"), 10, 1000)?;
    let second = open(&manager, options("twin"), 10, 1000);
    assert!(matches!(second, Err(SombraError::UniquenessViolation(_))));

    let replaced = open(&manager, options("twin").replace_instance_if_exists(true), 10, 1000)?;
    replaced.close()?;
    first.close()?;

    let after_close = open(&manager, options("twin"), 10, 1000)?;
    assert_eq!(after_close.unique_id(), "twin");
    Ok(())
}

#[test]
fn registered_instances_are_listed() -> Result<()> {
    let manager = MemoryStoreManager::new();
    let a = open(&manager, options("alpha"), 10, 1000)?;
    let b = open(&manager, options("beta"), 10, 1000)?;
    let mut ids: Vec<String> = a
        .registered_instances()?
        .into_iter()
        .map(|r| r.instance_id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["alpha".to_owned(), "beta".to_owned()]);
    b.close()?;
    assert_eq!(a.registered_instances()?.len(), 1);
    Ok(())
}

#[test]
fn transient_failures_are_absorbed() -> Result<()> {
    init_tracing();
    let flaky = FlakyStoreManager::new(MemoryStoreManager::new());
    let authority = ConsistentKeyIdAuthority::open_with_clock(
        Arc::new(flaky.clone()),
        options("flaky"),
        Arc::new(ManualClock::default()),
    )?;
    authority.set_id_block_sizer(Arc::new(FixedBlockSizer::new(10, 1000)?));

    flaky.fail_next(3);
    let block = authority.get_id_block(P0, N0, TIMEOUT)?;
    assert_eq!(flaky.injected(), 3);
    assert_eq!(block.start_count(), 0);
    let next = authority.get_id_block(P0, N0, TIMEOUT)?;
    assert_disjoint(&[block, next]);
    Ok(())
}

#[test]
fn failures_beyond_the_store_budget_back_off_and_recover() -> Result<()> {
    init_tracing();
    let flaky = FlakyStoreManager::new(MemoryStoreManager::new());
    let metrics = Arc::new(CounterMetrics::default());
    let authority = ConsistentKeyIdAuthority::open_with(
        Arc::new(flaky.clone()),
        options("budget").storage_op_budget(Duration::from_millis(100)),
        Arc::new(ManualClock::default()),
        metrics.clone(),
    )?;
    authority.set_id_block_sizer(Arc::new(FixedBlockSizer::new(10, 1000)?));

    flaky.fail_next(12);
    let block = authority.get_id_block(P0, N0, Duration::from_secs(600))?;
    assert_eq!(flaky.injected(), 12);
    assert!(metrics.snapshot().temporary_failures >= 1);
    let next = authority.get_id_block(P0, N0, TIMEOUT)?;
    assert_disjoint(&[block, next]);
    Ok(())
}

#[test]
fn persistent_failures_time_out() -> Result<()> {
    init_tracing();
    let flaky = FlakyStoreManager::new(MemoryStoreManager::new());
    let metrics = Arc::new(CounterMetrics::default());
    let authority = ConsistentKeyIdAuthority::open_with(
        Arc::new(flaky.clone()),
        options("stuck"),
        Arc::new(ManualClock::default()),
        metrics.clone(),
    )?;
    authority.set_id_block_sizer(Arc::new(FixedBlockSizer::new(10, 1000)?));

    flaky.fail_next(u32::MAX);
    let err = authority
        .get_id_block(P0, N0, Duration::from_secs(5))
        .unwrap_err();
    assert!(matches!(err, SombraError::Timeout { .. }), "{err}");
    assert_eq!(metrics.snapshot().timeouts, 1);

    flaky.fail_next(0);
    authority.get_id_block(P0, N0, TIMEOUT)?;
    Ok(())
}

#[test]
fn rejected_claim_writes_stay_within_the_timeout() -> Result<()> {
    init_tracing();
    let flaky = FlakyStoreManager::new(MemoryStoreManager::new());
    let clock = ManualClock::default();
    let metrics = Arc::new(CounterMetrics::default());
    let opts = options("readonly");
    let wait = opts.wait;
    let authority = ConsistentKeyIdAuthority::open_with(
        Arc::new(flaky.clone()),
        opts,
        Arc::new(clock.clone()),
        metrics.clone(),
    )?;
    authority.set_id_block_sizer(Arc::new(FixedBlockSizer::new(10, 1000)?));

    flaky.reject_mutations(true);
    let timeout = Duration::from_secs(1);
    let before = clock.elapsed();
    let err = authority.get_id_block(P0, N0, timeout).unwrap_err();
    let spent = clock.elapsed() - before;
    assert!(matches!(err, SombraError::Timeout { .. }), "{err}");
    assert!(spent <= timeout + wait, "spent {spent:?} of a {timeout:?} budget");
    assert!(flaky.injected() > 0);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.timeouts, 1);
    assert!(snapshot.temporary_failures >= 1);

    flaky.reject_mutations(false);
    let block = authority.get_id_block(P0, N0, TIMEOUT)?;
    assert_eq!(block.start_count(), 0);
    Ok(())
}

#[test]
fn missing_sizer_is_rejected() -> Result<()> {
    let manager = MemoryStoreManager::new();
    let authority = ConsistentKeyIdAuthority::open(Arc::new(manager), options("nosizer"))?;
    assert!(matches!(
        authority.get_id_block(P0, N0, TIMEOUT),
        Err(SombraError::Invalid(_))
    ));
    Ok(())
}

#[test]
fn oversized_block_is_rejected() -> Result<()> {
    let manager = MemoryStoreManager::new();
    let authority = open(&manager, options("big").cav_bits(4), 10, 100)?;
    assert!(matches!(
        authority.get_id_block(P0, N0, TIMEOUT),
        Err(SombraError::Invalid(_))
    ));
    Ok(())
}

#[test]
fn partition_out_of_range_is_rejected() -> Result<()> {
    let manager = MemoryStoreManager::new();
    let authority = open(&manager, options("range").max_partitions(4), 10, 100)?;
    assert!(authority.get_id_block(PartitionId(3), N0, TIMEOUT).is_ok());
    assert!(matches!(
        authority.get_id_block(PartitionId(4), N0, TIMEOUT),
        Err(SombraError::Invalid(_))
    ));
    Ok(())
}

#[test]
fn inconsistent_store_is_unsupported() {
    let manager = MemoryStoreManager::with_features(StoreFeatures::local().key_consistent(false));
    let opened = ConsistentKeyIdAuthority::open(Arc::new(manager), options("weak"));
    assert!(matches!(opened, Err(SombraError::Unsupported(_))));
}

#[test]
fn closed_authority_refuses_allocation() -> Result<()> {
    let manager = MemoryStoreManager::new();
    let authority = open(&manager, options("closing"), 10, 100)?;
    let block = authority.get_id_block(P0, N0, TIMEOUT)?;
    authority.close()?;
    authority.close()?;
    assert!(matches!(
        authority.get_id_block(P0, N0, TIMEOUT),
        Err(SombraError::Closed)
    ));
    assert_eq!(block.get_id(0)?, 0);
    assert!(authority.supports_interruption());
    Ok(())
}

#[test]
fn close_interrupts_an_allocation_in_flight() -> Result<()> {
    init_tracing();
    let manager = MemoryStoreManager::new();
    let authority = Arc::new(ConsistentKeyIdAuthority::open(
        Arc::new(manager),
        options("interrupted").wait(Duration::from_secs(5)),
    )?);
    authority.set_id_block_sizer(Arc::new(FixedBlockSizer::new(10, 1000)?));

    let worker = {
        let authority = Arc::clone(&authority);
        thread::spawn(move || authority.get_id_block(P0, N0, Duration::from_secs(60)))
    };
    thread::sleep(Duration::from_millis(200));
    let closing = Instant::now();
    authority.close()?;
    let outcome = worker.join().expect("worker panicked");
    let took = closing.elapsed();
    assert!(took < Duration::from_secs(2), "close left the worker running for {took:?}");
    assert!(matches!(outcome, Err(SombraError::Closed)), "{outcome:?}");
    Ok(())
}

#[test]
fn default_tag_width_shrinks_the_counter_space() -> Result<()> {
    let manager = MemoryStoreManager::new();
    let opts = IdAuthorityOptions::new("wide")
        .wait(Duration::from_millis(20))
        .jitter(false);
    assert_eq!(opts.cav_bits, 4);
    let authority = open(&manager, opts, 10, 1600)?;
    let blocks: Vec<IdBlock> = (0..10)
        .map(|_| authority.get_id_block(P0, N0, TIMEOUT))
        .collect::<Result<_>>()?;
    assert!(matches!(
        authority.get_id_block(P0, N0, TIMEOUT),
        Err(SombraError::PoolExhausted { .. })
    ));
    assert_eq!(blocks[9].get_id(9)?, 99 << 4);
    assert!(blocks.iter().flat_map(|b| b.ids()).all(|id| id < 1600));
    Ok(())
}

#[test]
fn manual_tag_is_encoded_in_low_bits() -> Result<()> {
    let manager = MemoryStoreManager::new();
    let opts = options("tagged")
        .cav_bits(4)
        .conflict_avoidance(ConflictAvoidanceMode::GlobalManual)
        .cav_tag(5);
    let authority = open(&manager, opts, 10, 1 << 20)?;
    let block = authority.get_id_block(P0, N0, TIMEOUT)?;
    assert_eq!(block.tag(), 5);
    assert_eq!(block.tag_bits(), 4);
    for id in block.ids() {
        assert_eq!(id & 0xF, 5);
    }
    assert_eq!(block.get_id(1)?, (1 << 4) | 5);
    Ok(())
}

#[test]
fn distinct_manual_tags_do_not_contend() -> Result<()> {
    let manager = MemoryStoreManager::new();
    let a = open(
        &manager,
        options("dc-a")
            .cav_bits(1)
            .conflict_avoidance(ConflictAvoidanceMode::LocalManual)
            .cav_tag(0),
        10,
        1000,
    )?;
    let b = open(
        &manager,
        options("dc-b")
            .cav_bits(1)
            .conflict_avoidance(ConflictAvoidanceMode::LocalManual)
            .cav_tag(1),
        10,
        1000,
    )?;
    let block_a = a.get_id_block(P0, N0, TIMEOUT)?;
    let block_b = b.get_id_block(P0, N0, TIMEOUT)?;
    assert_eq!(block_a.start_count(), 0);
    assert_eq!(block_b.start_count(), 0);
    assert_ne!(block_a.get_id(0)?, block_b.get_id(0)?);
    Ok(())
}

#[test]
fn global_auto_exhausts_after_running_out_of_tags() -> Result<()> {
    init_tracing();
    let manager = MemoryStoreManager::new();
    let opts = options("auto")
        .cav_bits(2)
        .conflict_avoidance(ConflictAvoidanceMode::GlobalAuto)
        .cav_retries(3)
        .rng_seed(7);
    let authority = open(&manager, opts, 10, 40)?;

    let mut blocks = Vec::new();
    let err = loop {
        match authority.get_id_block(P0, N0, TIMEOUT) {
            Ok(block) => blocks.push(block),
            Err(err) => break err,
        }
        assert!(blocks.len() <= 4, "more blocks than tags");
    };
    assert!(matches!(err, SombraError::PoolExhausted { .. }), "{err}");
    assert!(blocks.len() >= 3);
    let mut tags: Vec<u32> = blocks.iter().map(IdBlock::tag).collect();
    tags.sort_unstable();
    tags.dedup();
    assert_eq!(tags.len(), blocks.len());
    assert_disjoint(&blocks);
    Ok(())
}

#[test]
fn local_partitions_follow_store_key_ranges() -> Result<()> {
    let range = KeyRange::new(
        StaticBuffer::from_u32s(&[1 << 27]),
        StaticBuffer::from_u32s(&[2 << 27]),
    );
    let manager = MemoryStoreManager::with_config(StoreFeatures::local(), vec![range.clone()]);
    let authority = open(&manager, options("local"), 10, 1000)?;
    assert_eq!(authority.local_id_partition()?, vec![range]);
    assert_eq!(authority.local_partitions()?, vec![PartitionId(1)]);

    let remote = MemoryStoreManager::new();
    let authority = open(&remote, options("remote"), 10, 1000)?;
    assert!(matches!(
        authority.local_id_partition(),
        Err(SombraError::Unsupported(_))
    ));
    Ok(())
}

#[test]
fn expired_tentative_claims_are_swept() -> Result<()> {
    init_tracing();
    let manager = MemoryStoreManager::new();
    let metrics = Arc::new(CounterMetrics::default());
    let authority = ConsistentKeyIdAuthority::open_with(
        Arc::new(manager.clone()),
        options("sweeper"),
        Arc::new(ManualClock::default()),
        metrics.clone(),
    )?;
    authority.set_id_block_sizer(Arc::new(FixedBlockSizer::new(10, 1000)?));

    let key = StaticBuffer::from_u32s(&[0, 0]);
    let mut column = WriteBuffer::new();
    column.put_bytes(&ord::u64_desc(10)).put_u64(1).put_bytes(b"ghost");
    let mut value = WriteBuffer::new();
    value.put_u8(0).put_u64(0);
    let column = column.into_static();
    let value = value.into_static();
    let store = manager.open_memory_store("ids")?;
    let tx = manager.begin_transaction(TxConfig::default())?;
    store.mutate(&key, &[Entry::of(column.as_slice(), value.as_slice())?], &[], tx.as_ref())?;

    let block = authority.get_id_block(P0, N0, TIMEOUT)?;
    assert_eq!(block.start_count(), 10);
    assert_eq!(metrics.snapshot().stale_claims, 1);
    assert_eq!(store.column_count(&key), 1);
    Ok(())
}
