#![allow(missing_docs)]

//! Several authorities sharing one simulated cluster.
//!
//! Every authority runs on the same distributed in-memory backend and the same
//! virtual clock, so claims race exactly as they would across processes while
//! the waits cost no wall time.

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use common::{assert_disjoint, distributed_manager, init_tracing};
use sombra_idblocks::ids::{
    ConflictAvoidanceMode, ConsistentKeyIdAuthority, CounterMetrics, FixedBlockSizer, IdAuthority,
    IdAuthorityOptions, IdBlock,
};
use sombra_idblocks::primitives::time::ManualClock;
use sombra_idblocks::storage::MemoryStoreManager;
use sombra_idblocks::{NamespaceId, PartitionId, Result};

const VIRTUAL_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

fn spawn_cluster(
    instances: usize,
    blocks_per_instance: usize,
    block_size: u64,
    upper_bound: u64,
    configure: impl Fn(IdAuthorityOptions, usize) -> IdAuthorityOptions,
) -> Result<(Vec<IdBlock>, Arc<CounterMetrics>)> {
    init_tracing();
    let manager = distributed_manager();
    let clock = ManualClock::default();
    let metrics = Arc::new(CounterMetrics::default());
    let mut authorities = Vec::with_capacity(instances);
    for i in 0..instances {
        let options = configure(
            IdAuthorityOptions::new(format!("node-{i}"))
                .wait(Duration::from_millis(10))
                .claim_expiry(Duration::from_secs(3600)),
            i,
        );
        let authority = ConsistentKeyIdAuthority::open_with(
            Arc::new(manager.clone()),
            options,
            Arc::new(clock.clone()),
            metrics.clone(),
        )?;
        authority.set_id_block_sizer(Arc::new(FixedBlockSizer::new(block_size, upper_bound)?));
        authorities.push(Arc::new(authority));
    }

    let barrier = Arc::new(Barrier::new(instances));
    let handles: Vec<_> = authorities
        .iter()
        .map(|authority| {
            let authority = Arc::clone(authority);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<Vec<IdBlock>> {
                barrier.wait();
                (0..blocks_per_instance)
                    .map(|_| authority.get_id_block(PartitionId(0), NamespaceId(0), VIRTUAL_TIMEOUT))
                    .collect()
            })
        })
        .collect();

    let mut blocks = Vec::new();
    for handle in handles {
        blocks.extend(handle.join().expect("worker panicked")?);
    }
    for authority in &authorities {
        authority.close()?;
    }
    Ok((blocks, metrics))
}

#[test]
fn eight_instances_allocate_disjoint_blocks() -> Result<()> {
    let upper_bound = 1u64 << 30;
    let (blocks, metrics) = spawn_cluster(8, 100, 400, upper_bound, |o, _| o.cav_bits(0))?;

    assert_eq!(blocks.len(), 800);
    assert!(blocks.iter().all(|b| b.num_ids() == 400));
    assert_disjoint(&blocks);

    let total: u64 = blocks.iter().map(IdBlock::num_ids).sum();
    assert!(total <= upper_bound);

    let mut ids = HashSet::with_capacity(total as usize);
    for block in &blocks {
        for id in block.ids() {
            assert!(ids.insert(id), "duplicate id {id}");
        }
    }
    assert_eq!(metrics.snapshot().claims_won, 800);
    Ok(())
}

#[test]
fn authorities_sharing_a_local_store_stay_disjoint() -> Result<()> {
    init_tracing();
    let manager = MemoryStoreManager::new();
    let authorities = (0..4)
        .map(|i| -> Result<Arc<ConsistentKeyIdAuthority>> {
            let authority = ConsistentKeyIdAuthority::open(
                Arc::new(manager.clone()),
                IdAuthorityOptions::new(format!("local-{i}"))
                    .wait(Duration::from_millis(2))
                    .cav_bits(0),
            )?;
            authority.set_id_block_sizer(Arc::new(FixedBlockSizer::new(10, 1 << 30)?));
            Ok(Arc::new(authority))
        })
        .collect::<Result<Vec<_>>>()?;

    let barrier = Arc::new(Barrier::new(authorities.len()));
    let handles: Vec<_> = authorities
        .iter()
        .map(|authority| {
            let authority = Arc::clone(authority);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<Vec<IdBlock>> {
                barrier.wait();
                (0..100)
                    .map(|_| {
                        authority.get_id_block(PartitionId(0), NamespaceId(0), Duration::from_secs(60))
                    })
                    .collect()
            })
        })
        .collect();

    let mut blocks = Vec::new();
    for handle in handles {
        blocks.extend(handle.join().expect("worker panicked")?);
    }
    assert_eq!(blocks.len(), 400);
    assert_disjoint(&blocks);
    Ok(())
}

#[test]
fn random_tags_keep_blocks_disjoint() -> Result<()> {
    let (blocks, _) = spawn_cluster(4, 40, 100, 1 << 24, |o, i| {
        o.cav_bits(3)
            .cav_retries(4)
            .conflict_avoidance(ConflictAvoidanceMode::GlobalAuto)
            .rng_seed(i as u64)
    })?;
    assert_eq!(blocks.len(), 160);
    assert_disjoint(&blocks);
    let ids: HashSet<u64> = blocks.iter().flat_map(|b| b.ids().collect::<Vec<_>>()).collect();
    assert_eq!(ids.len(), 160 * 100);
    Ok(())
}

#[test]
fn threads_sharing_one_authority_never_overlap() -> Result<()> {
    init_tracing();
    let manager = distributed_manager();
    let authority = Arc::new(ConsistentKeyIdAuthority::open_with_clock(
        Arc::new(manager),
        IdAuthorityOptions::new("shared")
            .wait(Duration::from_millis(10))
            .cav_bits(0),
        Arc::new(ManualClock::default()),
    )?);
    authority.set_id_block_sizer(Arc::new(FixedBlockSizer::new(50, 1 << 20)?));

    let handles: Vec<_> = (0..6)
        .map(|t| {
            let authority = Arc::clone(&authority);
            thread::spawn(move || -> Result<Vec<IdBlock>> {
                let namespace = NamespaceId(t % 2);
                (0..25)
                    .map(|_| authority.get_id_block(PartitionId(1), namespace, VIRTUAL_TIMEOUT))
                    .collect()
            })
        })
        .collect();

    let mut per_namespace: [Vec<IdBlock>; 2] = [Vec::new(), Vec::new()];
    for (t, handle) in handles.into_iter().enumerate() {
        per_namespace[t % 2].extend(handle.join().expect("worker panicked")?);
    }
    for blocks in &per_namespace {
        assert_eq!(blocks.len(), 75);
        assert_disjoint(blocks);
    }
    authority.close()
}

#[test]
fn sizer_swap_applies_to_later_allocations() -> Result<()> {
    init_tracing();
    let manager = distributed_manager();
    let authority = Arc::new(ConsistentKeyIdAuthority::open_with_clock(
        Arc::new(manager),
        IdAuthorityOptions::new("swapper")
            .wait(Duration::from_millis(10))
            .cav_bits(0),
        Arc::new(ManualClock::default()),
    )?);
    authority.set_id_block_sizer(Arc::new(FixedBlockSizer::new(10, 1 << 20)?));

    let worker = {
        let authority = Arc::clone(&authority);
        thread::spawn(move || -> Result<Vec<IdBlock>> {
            (0..50)
                .map(|_| authority.get_id_block(PartitionId(0), NamespaceId(0), VIRTUAL_TIMEOUT))
                .collect()
        })
    };
    for size in [20, 30, 40] {
        authority.set_id_block_sizer(Arc::new(FixedBlockSizer::new(size, 1 << 20)?));
    }
    let mut blocks = worker.join().expect("worker panicked")?;
    blocks.push(authority.get_id_block(PartitionId(0), NamespaceId(0), VIRTUAL_TIMEOUT)?);
    assert_disjoint(&blocks);
    assert_eq!(blocks.last().map(IdBlock::num_ids), Some(40));
    Ok(())
}

#[test]
fn sizer_swap_does_not_wait_for_a_slow_allocation() -> Result<()> {
    init_tracing();
    let wait = Duration::from_secs(2);
    let authority = Arc::new(ConsistentKeyIdAuthority::open(
        Arc::new(MemoryStoreManager::new()),
        IdAuthorityOptions::new("slow").wait(wait).cav_bits(0),
    )?);
    authority.set_id_block_sizer(Arc::new(FixedBlockSizer::new(10, 1 << 20)?));

    let worker = {
        let authority = Arc::clone(&authority);
        thread::spawn(move || {
            authority.get_id_block(PartitionId(0), NamespaceId(0), Duration::from_secs(60))
        })
    };
    thread::sleep(Duration::from_millis(100));
    let swapping = Instant::now();
    authority.set_id_block_sizer(Arc::new(FixedBlockSizer::new(25, 1 << 20)?));
    let took = swapping.elapsed();
    assert!(took < wait, "sizer swap blocked for {took:?}");

    let first = worker.join().expect("worker panicked")?;
    assert_eq!(first.num_ids(), 10);
    let second = authority.get_id_block(PartitionId(0), NamespaceId(0), Duration::from_secs(60))?;
    assert_eq!(second.num_ids(), 25);
    assert_eq!(second.start_count(), first.end_count());
    authority.close()
}
