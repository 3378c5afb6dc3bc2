#![allow(missing_docs)]

use proptest::prelude::*;
use sombra_idblocks::primitives::bytes::{ArrayFactory, BytesFactory, StaticBuffer};
use sombra_idblocks::storage::{
    Entry, EntryList, KeyColumnValueStore, KeySliceQuery, MemoryStoreManager, StoreManager,
    TxConfig,
};
use sombra_idblocks::Result;

fn arb_pairs() -> impl Strategy<Value = Vec<(Vec<u8>, Vec<u8>)>> {
    prop::collection::vec(
        (
            prop::collection::vec(any::<u8>(), 1..24),
            prop::collection::vec(any::<u8>(), 0..48),
        ),
        0..120,
    )
}

proptest! {
    #[test]
    fn prop_sized_and_unbounded_builds_agree(pairs in arb_pairs()) {
        let sized = EntryList::from_slice(&pairs).unwrap();
        let unbounded = EntryList::from_iter_unbounded(pairs.iter()).unwrap();
        prop_assert_eq!(sized.len(), pairs.len());
        prop_assert_eq!(unbounded.len(), pairs.len());
        prop_assert_eq!(sized.byte_size(), unbounded.byte_size());
        for (i, (column, value)) in pairs.iter().enumerate() {
            let a = sized.get(i).unwrap();
            let b = unbounded.get(i).unwrap();
            prop_assert!(a.encoded_eq(&b));
            prop_assert_eq!(a.column_slice(), column.as_slice());
            prop_assert_eq!(b.value_slice(), value.as_slice());
        }
    }

    #[test]
    fn prop_sliding_matches_owned_entries(pairs in arb_pairs()) {
        let list = EntryList::from_iter_unbounded(pairs.iter()).unwrap();
        let owned: Vec<Entry> = list.iter().collect();
        let mut cursor = list.sliding();
        let mut seen = 0;
        while let Some(view) = cursor.advance() {
            prop_assert!(*view == owned[seen]);
            prop_assert_eq!(view.column_slice(), owned[seen].column_slice());
            prop_assert_eq!(view.value_slice(), owned[seen].value_slice());
            seen += 1;
        }
        prop_assert_eq!(seen, pairs.len());
    }

    #[test]
    fn prop_buffer_round_trips(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let buffer = StaticBuffer::copy_from_slice(&bytes);
        prop_assert_eq!(buffer.as_with(&ArrayFactory), bytes.clone());
        let as_bytes = buffer.as_with(&BytesFactory);
        prop_assert_eq!(as_bytes.as_ref(), bytes.as_slice());
        prop_assert_eq!(buffer.inverted().inverted(), buffer);
    }

    #[test]
    fn prop_buffer_order_is_unsigned_lexicographic(
        a in prop::collection::vec(any::<u8>(), 0..16),
        b in prop::collection::vec(any::<u8>(), 0..16),
    ) {
        let (x, y) = (StaticBuffer::copy_from_slice(&a), StaticBuffer::copy_from_slice(&b));
        prop_assert_eq!(x.cmp(&y), a.cmp(&b));
    }
}

#[test]
fn metadata_survives_both_builders() -> Result<()> {
    let entries: Vec<Entry> = (1u8..=30)
        .map(|i| Ok(Entry::of(&[i], &[i, i])?.with_ttl(u32::from(i)).with_timestamp(u64::from(i) * 1000)))
        .collect::<Result<_>>()?;
    let sized = EntryList::from_slice(&entries)?;
    let unbounded = EntryList::from_iter_unbounded(entries.iter())?;
    assert_eq!(sized, unbounded);
    for (i, entry) in unbounded.iter().enumerate() {
        assert_eq!(entry.ttl(), Some(i as u32 + 1));
        assert_eq!(entry.meta().timestamp, Some((i as u64 + 1) * 1000));
        assert_eq!(entry.value_slice(), &[i as u8 + 1, i as u8 + 1]);
    }
    Ok(())
}

#[test]
fn store_slices_are_ordered_and_limited() -> Result<()> {
    let manager = MemoryStoreManager::new();
    let store = manager.open_database("edges")?;
    let tx = manager.begin_transaction(TxConfig::default())?;
    let key = StaticBuffer::from_u32s(&[7]);
    let additions: Vec<Entry> = [5u8, 1, 9, 3, 7]
        .iter()
        .map(|c| Entry::of(&[*c], &[c.wrapping_mul(2)]))
        .collect::<Result<_>>()?;
    store.mutate(&key, &additions, &[], tx.as_ref())?;
    store.mutate(&key, &[], &[StaticBuffer::copy_from_slice(&[9])], tx.as_ref())?;

    let all = KeySliceQuery::new(key.clone(), StaticBuffer::zeros(1), StaticBuffer::ones(1));
    let columns: Vec<u8> = store
        .get_slice(&all, tx.as_ref())?
        .iter()
        .map(|e| e.column_slice()[0])
        .collect();
    assert_eq!(columns, vec![1, 3, 5, 7]);

    let window = KeySliceQuery::new(
        key,
        StaticBuffer::copy_from_slice(&[3]),
        StaticBuffer::copy_from_slice(&[8]),
    )
    .with_limit(2);
    let slice = store.get_slice(&window, tx.as_ref())?;
    assert_eq!(slice.len(), 2);
    assert_eq!(slice.last().map(|e| e.value_slice().to_vec()), Some(vec![10]));
    Ok(())
}
