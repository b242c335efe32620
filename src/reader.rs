//! Range reads across the partitions of one entity.

use crate::catalog::SeriesCatalog;
use crate::error::StoreError;
use crate::partition::key_resolver::PartitionId;
use crate::partition::store::PartitionStore;
use crate::types::entity_key::EntityKey;
use crate::types::record::Record;
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

#[derive(Debug, Clone)]
pub struct RangeReader {
    store: PartitionStore,
    catalog: SeriesCatalog,
}

// Head of one sorted run during the k-way merge
struct RunHead {
    millis: i64,
    run: usize,
    record: Record,
}
// Ordered by time, then by run so earlier partitions win ties
impl PartialEq for RunHead {
    fn eq(&self, other: &Self) -> bool {
        self.millis == other.millis && self.run == other.run
    }
}
impl Eq for RunHead {}
impl PartialOrd for RunHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for RunHead {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.millis, self.run).cmp(&(other.millis, other.run))
    }
}

impl RangeReader {
    pub fn new(store: PartitionStore) -> Self {
        let catalog = SeriesCatalog::new(store.clone());
        Self { store, catalog }
    }

    /// Rows of `entity` with `start <= time <= end`, ascending by time.
    ///
    /// * Open bounds are unbounded on that side.
    /// * `fields` restricts the returned values; the time is always returned.
    ///   Requested fields that no partition carries are ignored.
    /// * Every returned record carries the same field set, with `None` where a
    ///   row has no value.
    ///
    /// Returns `Ok(None)` when nothing was ever stored for `entity`, and
    /// `Ok(Some(vec![]))` when data exists but none falls in the window.
    pub fn read(
        &self,
        entity: &EntityKey,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        fields: Option<&[String]>,
    ) -> Result<Option<Vec<Record>>, StoreError> {
        let on_disk = self.catalog.partitions_for(entity)?;
        if on_disk.is_empty() {
            return Ok(None);
        }

        // Pruned against what is on disk, so the cost does not grow with the window
        let covering: Vec<PartitionId> = on_disk
            .into_iter()
            .filter(|id| id.may_overlap(start, end))
            .collect();
        debug!("Reading {} from {} partitions", entity, covering.len());

        let mut available = BTreeSet::new();
        let mut runs = Vec::with_capacity(covering.len());
        for id in &covering {
            let Some(partition) = self.store.load(id)? else {
                continue;
            };
            available.extend(partition.fields);
            let rows: Vec<Record> = partition
                .records
                .into_iter()
                .filter(|r| {
                    start.map_or(true, |s| r.time >= s) && end.map_or(true, |e| r.time <= e)
                })
                .collect();
            runs.push(rows);
        }

        let output_fields: Vec<String> = match fields {
            Some(requested) => {
                let (kept, ignored): (Vec<&String>, Vec<&String>) =
                    requested.iter().partition(|f| available.contains(*f));
                if !ignored.is_empty() {
                    warn!("Ignoring unknown fields {:?} for {}", ignored, entity);
                }
                kept.into_iter().cloned().collect()
            }
            None => available.into_iter().collect(),
        };

        let rows = merge_sorted_runs(runs)
            .into_iter()
            .map(|record| project(record, &output_fields))
            .collect();
        Ok(Some(rows))
    }

    /// The newest stored row of `entity`.
    pub fn latest(&self, entity: &EntityKey) -> Result<Option<Record>, StoreError> {
        let mut newest: Option<(DateTime<Utc>, PartitionId)> = None;
        for id in self.catalog.partitions_for(entity)? {
            let Some(last) = self.store.peek(&id)?.and_then(|info| info.last) else {
                continue;
            };
            if newest.as_ref().map_or(true, |(time, _)| last > *time) {
                newest = Some((last, id));
            }
        }
        let Some((_, id)) = newest else {
            return Ok(None);
        };
        Ok(self
            .store
            .load(&id)?
            .and_then(|partition| partition.records.into_iter().last()))
    }

    /// Rows from the last `window` before now, newest first, at most `limit`.
    ///
    /// A window reaching past the earliest representable instant covers the
    /// whole history.
    pub fn recent(
        &self,
        entity: &EntityKey,
        window: Duration,
        limit: usize,
    ) -> Result<Option<Vec<Record>>, StoreError> {
        self.recent_at(entity, Utc::now(), window, limit)
    }

    pub(crate) fn recent_at(
        &self,
        entity: &EntityKey,
        now: DateTime<Utc>,
        window: Duration,
        limit: usize,
    ) -> Result<Option<Vec<Record>>, StoreError> {
        let start = now.checked_sub_signed(window);
        let rows = self.read(entity, start, Some(now), None)?;
        Ok(rows.map(|rows| rows.into_iter().rev().take(limit).collect()))
    }
}

/// Merges runs that are each sorted by time into one sorted sequence. A time
/// present in several runs is kept once, from the earliest run.
fn merge_sorted_runs(runs: Vec<Vec<Record>>) -> Vec<Record> {
    let total = runs.iter().map(Vec::len).sum();
    let mut iters: Vec<std::vec::IntoIter<Record>> =
        runs.into_iter().map(Vec::into_iter).collect();
    let mut heap = BinaryHeap::with_capacity(iters.len());
    for (run, iter) in iters.iter_mut().enumerate() {
        if let Some(record) = iter.next() {
            heap.push(Reverse(RunHead {
                millis: record.time.timestamp_millis(),
                run,
                record,
            }));
        }
    }

    let mut merged: Vec<Record> = Vec::with_capacity(total);
    let mut last_millis = None;
    while let Some(Reverse(head)) = heap.pop() {
        if let Some(record) = iters[head.run].next() {
            heap.push(Reverse(RunHead {
                millis: record.time.timestamp_millis(),
                run: head.run,
                record,
            }));
        }
        if last_millis == Some(head.millis) {
            continue;
        }
        last_millis = Some(head.millis);
        merged.push(head.record);
    }
    merged
}

fn project(record: Record, fields: &[String]) -> Record {
    let values: BTreeMap<String, Option<f64>> = fields
        .iter()
        .map(|f| (f.clone(), record.get(f)))
        .collect();
    Record {
        time: record.time,
        values,
    }
}
