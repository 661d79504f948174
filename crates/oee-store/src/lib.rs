use std::sync::{Mutex, MutexGuard, PoisonError};

use oee_core::{ProductionRecord, ProductionRun, RecordId, TimeRange};

#[derive(Debug)]
struct StoreState {
    // Kept in insertion order, which is also ascending id order.
    records: Vec<ProductionRecord>,
    next_id: u64,
}

/// Append-only, process-lifetime collection of production records.
///
/// Identifier assignment and the append happen under one lock, so concurrent
/// inserts never share an id and readers never observe a half-written record.
#[derive(Debug)]
pub struct RecordStore {
    state: Mutex<StoreState>,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self { state: Mutex::new(StoreState { records: Vec::new(), next_id: 1 }) }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // Records are pushed fully built, so a poisoned guard still holds a consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assign the next identifier and store the run.
    pub fn insert(&self, run: ProductionRun) -> ProductionRecord {
        let mut state = self.lock();
        let record = append(&mut state, run);
        tracing::debug!(id = %record.id, "stored production record");
        record
    }

    /// Insert runs one after another in the given order while holding the lock
    /// once, so the batch receives contiguous identifiers in source order.
    pub fn insert_batch(&self, runs: Vec<ProductionRun>) -> Vec<ProductionRecord> {
        let mut state = self.lock();
        let mut stored = Vec::with_capacity(runs.len());
        for run in runs {
            stored.push(append(&mut state, run));
        }
        tracing::debug!(count = stored.len(), "stored production record batch");
        stored
    }

    /// Records whose `startOfOrder` lies in `[start, end]`, ascending by
    /// `startOfOrder`, ties broken by id.
    #[must_use]
    pub fn query_by_range(&self, range: &TimeRange) -> Vec<ProductionRecord> {
        let state = self.lock();
        let mut selected = state
            .records
            .iter()
            .filter(|record| range.contains(record.start_of_order()))
            .cloned()
            .collect::<Vec<_>>();
        drop(state);
        // Stable sort keeps id order among equal timestamps.
        selected.sort_by_key(ProductionRecord::start_of_order);
        selected
    }

    /// Record with the greatest `startOfOrder`; the earliest inserted wins a tie.
    #[must_use]
    pub fn latest(&self) -> Option<ProductionRecord> {
        let state = self.lock();
        state
            .records
            .iter()
            .fold(None::<&ProductionRecord>, |latest, current| match latest {
                Some(latest) if current.start_of_order() <= latest.start_of_order() => {
                    Some(latest)
                }
                _ => Some(current),
            })
            .cloned()
    }

    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<ProductionRecord> {
        let state = self.lock();
        state.records.iter().find(|record| record.id == id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }
}

fn append(state: &mut StoreState, run: ProductionRun) -> ProductionRecord {
    let id = RecordId(state.next_id);
    state.next_id += 1;
    let record = ProductionRecord { id, run };
    state.records.push(record.clone());
    record
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::thread;

    use oee_core::Frequency;
    use time::macros::datetime;
    use time::OffsetDateTime;

    use super::*;

    fn mk_run(at: OffsetDateTime) -> ProductionRun {
        ProductionRun {
            start_of_order: at,
            planned_production_time: 480,
            actual_production_time: 420,
            ideal_cycle_time: 0.5,
            total_pieces: 800,
            good_pieces: 750,
        }
    }

    fn range(start: OffsetDateTime, end: OffsetDateTime) -> TimeRange {
        match TimeRange::new(start, end, Frequency::Day) {
            Ok(range) => range,
            Err(err) => panic!("fixture range should be valid: {err}"),
        }
    }

    #[test]
    fn identifiers_start_at_one_and_increase() {
        let store = RecordStore::new();
        let first = store.insert(mk_run(datetime!(2024-02-11 10:00 UTC)));
        let second = store.insert(mk_run(datetime!(2024-02-10 10:00 UTC)));
        assert_eq!(first.id, RecordId(1));
        assert_eq!(second.id, RecordId(2));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(RecordId(2)), Some(second));
    }

    #[test]
    fn range_query_returns_inserted_record_exactly_once() {
        let store = RecordStore::new();
        let stored = store.insert(mk_run(datetime!(2024-02-11 10:00 UTC)));

        let hits = store
            .query_by_range(&range(datetime!(2024-02-11 00:00 UTC), datetime!(2024-02-12 00:00 UTC)));
        assert_eq!(hits, vec![stored]);

        let misses = store
            .query_by_range(&range(datetime!(2024-02-12 00:00 UTC), datetime!(2024-02-13 00:00 UTC)));
        assert!(misses.is_empty());
    }

    #[test]
    fn range_query_orders_by_start_of_order_regardless_of_insertion() {
        let store = RecordStore::new();
        for at in [
            datetime!(2024-02-13 10:00 UTC),
            datetime!(2024-02-11 10:00 UTC),
            datetime!(2024-02-12 10:00 UTC),
            datetime!(2024-02-11 10:00 UTC),
        ] {
            let _ = store.insert(mk_run(at));
        }

        let records = store
            .query_by_range(&range(datetime!(2024-02-01 00:00 UTC), datetime!(2024-03-01 00:00 UTC)));
        let ids = records.iter().map(|record| record.id.0).collect::<Vec<_>>();
        assert_eq!(ids, vec![2, 4, 3, 1]);
    }

    #[test]
    fn inverted_range_yields_empty_sequence() {
        let store = RecordStore::new();
        let _ = store.insert(mk_run(datetime!(2024-02-11 10:00 UTC)));
        let inverted = TimeRange {
            start: datetime!(2024-02-12 00:00 UTC),
            end: datetime!(2024-02-10 00:00 UTC),
            frequency: Frequency::Hour,
        };
        assert!(store.query_by_range(&inverted).is_empty());
    }

    #[test]
    fn latest_tracks_greatest_start_of_order() {
        let store = RecordStore::new();
        assert!(store.latest().is_none());

        let first = store.insert(mk_run(datetime!(2024-02-11 10:00 UTC)));
        assert_eq!(store.latest(), Some(first.clone()));

        let _earlier = store.insert(mk_run(datetime!(2024-02-01 10:00 UTC)));
        assert_eq!(store.latest(), Some(first));

        let later = store.insert(mk_run(datetime!(2024-02-12 10:00 UTC)));
        assert_eq!(store.latest(), Some(later));
    }

    #[test]
    fn latest_prefers_earliest_inserted_on_tie() {
        let store = RecordStore::new();
        let first = store.insert(mk_run(datetime!(2024-02-11 10:00 UTC)));
        let _twin = store.insert(mk_run(datetime!(2024-02-11 10:00 UTC)));
        assert_eq!(store.latest().map(|record| record.id), Some(first.id));
    }

    #[test]
    fn batch_insert_assigns_contiguous_ids_in_source_order() {
        let store = RecordStore::new();
        let _ = store.insert(mk_run(datetime!(2024-02-01 10:00 UTC)));
        let batch = store.insert_batch(vec![
            mk_run(datetime!(2024-02-13 10:00 UTC)),
            mk_run(datetime!(2024-02-11 10:00 UTC)),
        ]);
        let ids = batch.iter().map(|record| record.id.0).collect::<Vec<_>>();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(batch[0].start_of_order(), datetime!(2024-02-13 10:00 UTC));
    }

    #[test]
    fn concurrent_inserts_receive_distinct_identifiers() {
        let store = Arc::new(RecordStore::new());
        let writer_threads = 8;
        let writes_per_thread = 50;

        let handles = (0..writer_threads)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    (0..writes_per_thread)
                        .map(|_| store.insert(mk_run(OffsetDateTime::now_utc())).id)
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();

        let mut ids = BTreeSet::new();
        for handle in handles {
            let Ok(thread_ids) = handle.join() else {
                panic!("writer thread panicked");
            };
            for window in thread_ids.windows(2) {
                assert!(window[0] < window[1], "ids within one writer must increase");
            }
            ids.extend(thread_ids);
        }

        assert_eq!(ids.len(), writer_threads * writes_per_thread);
        assert_eq!(ids.first(), Some(&RecordId(1)));
        assert_eq!(ids.last(), Some(&RecordId(400)));
        assert_eq!(store.len(), 400);
    }
}
