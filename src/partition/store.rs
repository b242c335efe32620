//! Ownership of individual partition files: load, merge-on-write, peek, delete.

use crate::error::StoreError;
use crate::partition::frame::{
    frame_to_records, read_parquet, records_to_frame, scan_time_column, write_parquet_atomic,
};
use crate::partition::key_resolver::PartitionId;
use crate::types::record::{MergeResult, PartitionInfo, Record};
use crate::types::schema::Schema;
use crate::utils::StorageRoot;
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::PathBuf;

/// A fully loaded partition. Rows are sorted by time with unique timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub id: PartitionId,
    /// Column names besides the time column, in file order.
    pub fields: Vec<String>,
    pub records: Vec<Record>,
}

impl Partition {
    pub fn first(&self) -> Option<DateTime<Utc>> {
        self.records.first().map(|r| r.time)
    }

    pub fn last(&self) -> Option<DateTime<Utc>> {
        self.records.last().map(|r| r.time)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Reads and writes single partitions under a storage root.
///
/// Holds no locks: at most one writer per partition at a time is assumed.
#[derive(Debug, Clone)]
pub struct PartitionStore {
    root: StorageRoot,
    schema: Schema,
}

impl PartitionStore {
    pub fn new(root: StorageRoot, schema: Schema) -> Self {
        Self { root, schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn root(&self) -> &StorageRoot {
        &self.root
    }

    pub fn path_for(&self, id: &PartitionId) -> PathBuf {
        self.root.join(id.relative_path())
    }

    /// Loads a whole partition. `Ok(None)` means it has never been written.
    ///
    /// # Errors
    ///
    /// [`StoreError::CorruptPartition`] or [`StoreError::MalformedPartition`] if
    /// the file exists but cannot be decoded. The file is left untouched.
    pub fn load(&self, id: &PartitionId) -> Result<Option<Partition>, StoreError> {
        let path = self.path_for(id);
        if !path.is_file() {
            return Ok(None);
        }
        let df = read_parquet(&path)?;
        let (fields, records) = frame_to_records(&path, self.schema.time_field(), &df)?;
        debug!("Loaded {} rows from partition {}", records.len(), id);
        Ok(Some(Partition {
            id: id.clone(),
            fields,
            records,
        }))
    }

    /// Merges `incoming` into the partition and atomically replaces the file.
    ///
    /// * Within `incoming`, the last record for a timestamp wins.
    /// * Against the stored rows, an incoming row replaces the stored row for
    ///   the same timestamp as a whole; fields it lacks become missing.
    /// * The result is sorted ascending and written via temp file and rename.
    ///
    /// An empty `incoming` writes nothing.
    pub fn merge_write(
        &self,
        id: &PartitionId,
        incoming: Vec<Record>,
    ) -> Result<MergeResult, StoreError> {
        let existing = self.load(id)?;

        let (mut fields, mut rows): (Vec<String>, BTreeMap<i64, Record>) = match existing {
            Some(partition) => (
                partition.fields,
                partition
                    .records
                    .into_iter()
                    .map(|r| (r.time.timestamp_millis(), r))
                    .collect(),
            ),
            None => (Vec::new(), BTreeMap::new()),
        };

        if incoming.is_empty() {
            return Ok(MergeResult {
                total_rows: rows.len(),
                new_rows: 0,
            });
        }

        // Last write in the batch wins
        let mut batch: BTreeMap<i64, Record> = BTreeMap::new();
        for mut record in incoming {
            let ms = record.time.timestamp_millis();
            record.time = DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(record.time);
            batch.insert(ms, record);
        }

        let known: BTreeSet<&str> = fields.iter().map(String::as_str).collect();
        let mut added_fields: Vec<String> = batch
            .values()
            .flat_map(|r| r.values.keys())
            .filter(|name| !known.contains(name.as_str()))
            .filter(|name| name.as_str() != self.schema.time_field())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !added_fields.is_empty() {
            debug!("Partition {} gains fields {:?}", id, added_fields);
            added_fields.sort_by_key(|name| self.schema.column_order(name));
            fields.extend(added_fields);
        }

        let mut new_rows = 0;
        for (ms, record) in batch {
            if rows.insert(ms, record).is_none() {
                new_rows += 1;
            }
        }

        let records: Vec<Record> = rows.into_values().collect();
        let total_rows = records.len();
        let path = self.path_for(id);
        let mut df = records_to_frame(&self.schema, &id.to_string(), &fields, &records)?;
        write_parquet_atomic(&path, &mut df)?;

        info!("Saved {}: {} rows total, {} new", id, total_rows, new_rows);
        Ok(MergeResult {
            total_rows,
            new_rows,
        })
    }

    /// Describes a partition from its schema and time column only.
    pub fn peek(&self, id: &PartitionId) -> Result<Option<PartitionInfo>, StoreError> {
        let path = self.path_for(id);
        if !path.is_file() {
            return Ok(None);
        }
        let (fields, times) = scan_time_column(&path, self.schema.time_field())?;
        Ok(Some(PartitionInfo {
            partition: id.to_string(),
            month: id.month(),
            rows: times.len(),
            first: times.first().copied(),
            last: times.last().copied(),
            fields,
        }))
    }

    /// Removes a partition file. Returns whether there was one.
    pub fn delete(&self, id: &PartitionId) -> Result<bool, StoreError> {
        let path = self.path_for(id);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted partition {}", id);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::PartitionDelete(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::entity_key::EntityKey;
    use crate::types::schema::SeriesFamily;
    use crate::types::traits::types::Month;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, d, 0, 0, 0).unwrap()
    }

    fn store(dir: &tempfile::TempDir) -> PartitionStore {
        PartitionStore::new(
            StorageRoot::new(dir.path()),
            SeriesFamily::DailyClimate.schema(),
        )
    }

    fn location() -> PartitionId {
        PartitionId::unbounded(EntityKey::new("35.68_139.77").unwrap())
    }

    #[test]
    fn test_load_missing_is_none() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        assert!(store(&dir).load(&location())?.is_none());
        assert!(store(&dir).peek(&location())?.is_none());
        Ok(())
    }

    #[test]
    fn test_merge_write_creates_and_counts() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = store(&dir);
        let result = store.merge_write(
            &location(),
            vec![
                Record::new(day(2)).with("temp_max", Some(29.1)),
                Record::new(day(1)).with("temp_max", Some(28.5)),
            ],
        )?;
        assert_eq!(
            result,
            MergeResult {
                total_rows: 2,
                new_rows: 2
            }
        );

        let partition = store.load(&location())?.expect("partition written");
        assert_eq!(partition.first(), Some(day(1)));
        assert_eq!(partition.last(), Some(day(2)));
        assert_eq!(partition.fields, vec!["temp_max"]);
        Ok(())
    }

    #[test]
    fn test_merge_write_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = store(&dir);
        let batch = vec![
            Record::new(day(1)).with("temp_max", Some(28.5)),
            Record::new(day(2)).with("temp_max", Some(29.1)),
        ];
        store.merge_write(&location(), batch.clone())?;
        let first = store.load(&location())?;
        let again = store.merge_write(&location(), batch)?;
        assert_eq!(again.new_rows, 0);
        assert_eq!(again.total_rows, 2);
        assert_eq!(store.load(&location())?, first);
        Ok(())
    }

    #[test]
    fn test_overwrite_replaces_whole_row() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = store(&dir);
        store.merge_write(
            &location(),
            vec![Record::new(day(1))
                .with("temp_mean", Some(10.0))
                .with("humidity_mean", Some(80.0))],
        )?;
        let result =
            store.merge_write(&location(), vec![Record::new(day(1)).with("temp_mean", Some(12.0))])?;
        assert_eq!(result.new_rows, 0);

        let partition = store.load(&location())?.expect("partition written");
        assert_eq!(partition.records.len(), 1);
        let row = &partition.records[0];
        assert_eq!(row.get("temp_mean"), Some(12.0));
        assert_eq!(row.get("humidity_mean"), None);
        // The column itself survives
        assert!(partition.fields.contains(&"humidity_mean".to_string()));
        Ok(())
    }

    #[test]
    fn test_last_record_in_batch_wins() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = store(&dir);
        let result = store.merge_write(
            &location(),
            vec![
                Record::new(day(1)).with("temp_max", Some(1.0)),
                Record::new(day(1)).with("temp_max", Some(2.0)),
            ],
        )?;
        assert_eq!(result.total_rows, 1);
        let partition = store.load(&location())?.expect("partition written");
        assert_eq!(partition.records[0].get("temp_max"), Some(2.0));
        Ok(())
    }

    #[test]
    fn test_new_columns_are_backfilled() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = store(&dir);
        store.merge_write(&location(), vec![Record::new(day(1)).with("temp_max", Some(1.0))])?;
        store.merge_write(&location(), vec![Record::new(day(2)).with("custom_index", Some(0.4))])?;

        let partition = store.load(&location())?.expect("partition written");
        assert_eq!(partition.fields, vec!["temp_max", "custom_index"]);
        assert_eq!(partition.records[0].get("custom_index"), None);
        assert_eq!(partition.records[1].get("temp_max"), None);
        assert_eq!(partition.records[1].get("custom_index"), Some(0.4));
        Ok(())
    }

    #[test]
    fn test_empty_batch_writes_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = store(&dir);
        let result = store.merge_write(&location(), Vec::new())?;
        assert_eq!(result, MergeResult::default());
        assert!(!store.path_for(&location()).exists());
        Ok(())
    }

    #[test]
    fn test_corrupt_partition_is_surfaced_and_kept() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = store(&dir);
        let path = store.path_for(&location());
        std::fs::write(&path, b"definitely not parquet")?;

        assert!(matches!(
            store.load(&location()),
            Err(StoreError::CorruptPartition(..))
        ));
        let merge = store.merge_write(&location(), vec![Record::new(day(1))]);
        assert!(matches!(merge, Err(StoreError::CorruptPartition(..))));
        // Never repaired or deleted
        assert_eq!(std::fs::read(&path)?, b"definitely not parquet");
        Ok(())
    }

    fn leftover_temp_files(dir: &std::path::Path) -> Result<Vec<String>, std::io::Error> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.ends_with(".tmp") {
                names.push(name);
            }
        }
        Ok(names)
    }

    #[test]
    fn test_failed_rename_leaves_target_and_no_temp() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = store(&dir);
        // A non-empty directory where the partition file should go
        let target = store.path_for(&location());
        std::fs::create_dir(&target)?;
        std::fs::write(target.join("keep.txt"), b"untouched")?;

        let result = store.merge_write(&location(), vec![Record::new(day(1))]);
        assert!(matches!(result, Err(StoreError::PartitionPersist(..))));
        assert!(target.is_dir());
        assert_eq!(std::fs::read(target.join("keep.txt"))?, b"untouched");
        assert!(leftover_temp_files(dir.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_failed_write_keeps_previous_partitions() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = PartitionStore::new(
            StorageRoot::new(dir.path()),
            SeriesFamily::SensorTelemetry.schema(),
        );
        let existing = PartitionId::unbounded(EntityKey::new("ecowitt")?);
        store.merge_write(&existing, vec![Record::new(day(1)).with("temp", Some(20.0))])?;
        let before = std::fs::read(store.path_for(&existing))?;

        // The month directory cannot be created because a file holds its name
        let blocked = EntityKey::new("switchbot")?;
        std::fs::write(dir.path().join("switchbot"), b"not a dir")?;
        let result = store.merge_write(
            &PartitionId::monthly(blocked, Month(2023, 6)),
            vec![Record::new(day(1)).with("temp", Some(21.0))],
        );

        assert!(matches!(result, Err(StoreError::PartitionWriteIo(..))));
        assert_eq!(std::fs::read(store.path_for(&existing))?, before);
        assert!(leftover_temp_files(dir.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_text_column_blocks_merge() -> Result<(), Box<dyn std::error::Error>> {
        use polars::prelude::{Column, DataFrame, DataType, TimeUnit};

        let dir = tempfile::tempdir()?;
        let store = store(&dir);
        let path = store.path_for(&location());
        let time = Column::new("date".into(), vec![day(1).timestamp_millis()])
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;
        let temp = Column::new("temp_max".into(), vec![Some(28.5)]);
        let source = Column::new("source".into(), vec!["open-meteo"]);
        let mut df = DataFrame::new(vec![time, temp, source])?;
        write_parquet_atomic(&path, &mut df)?;
        let before = std::fs::read(&path)?;

        assert!(matches!(
            store.load(&location()),
            Err(StoreError::MalformedPartition { .. })
        ));
        let merge = store.merge_write(&location(), vec![Record::new(day(2))]);
        assert!(matches!(merge, Err(StoreError::MalformedPartition { .. })));
        assert_eq!(std::fs::read(&path)?, before);
        Ok(())
    }

    #[test]
    fn test_peek_and_delete_monthly() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = PartitionStore::new(
            StorageRoot::new(dir.path()),
            SeriesFamily::SensorTelemetry.schema(),
        );
        let id = PartitionId::monthly(EntityKey::new("ecowitt")?, Month(2023, 6));
        store.merge_write(
            &id,
            vec![
                Record::new(day(3)).with("temp_outdoor_c", Some(21.0)),
                Record::new(day(1)).with("humidity_outdoor", None),
            ],
        )?;

        let info = store.peek(&id)?.expect("partition written");
        assert_eq!(info.rows, 2);
        assert_eq!(info.first, Some(day(1)));
        assert_eq!(info.last, Some(day(3)));
        assert_eq!(info.month, Some(Month(2023, 6)));
        assert_eq!(info.fields, vec!["temp_outdoor_c", "humidity_outdoor"]);

        assert!(store.delete(&id)?);
        assert!(!store.delete(&id)?);
        assert!(store.load(&id)?.is_none());
        Ok(())
    }
}
