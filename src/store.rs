//! The async entry point for storing and querying climate series.
//!
//! All disk work happens in the synchronous components ([`PartitionStore`],
//! [`AppendWriter`], [`RangeReader`], [`SeriesCatalog`]); `ClimateStore` moves
//! each call onto tokio's blocking pool.

use crate::catalog::SeriesCatalog;
use crate::error::StoreError;
use crate::partition::key_resolver::PartitionId;
use crate::partition::store::PartitionStore;
use crate::reader::RangeReader;
use crate::types::entity_key::EntityKey;
use crate::types::granularity::Granularity;
use crate::types::record::{AppendResult, RawRecord, Record, SeriesSummary};
use crate::types::schema::{Schema, SeriesFamily};
use crate::types::traits::any::any_datetime::AnyDateTime;
use crate::utils::{ensure_storage_root_exists, StorageRoot};
use crate::writer::AppendWriter;
use bon::bon;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use std::io;

/// A store for one series family under one storage root.
///
/// # Examples
///
/// ```rust,no_run
/// # use climate_store::{ClimateStore, EntityKey, RawRecord, SeriesFamily};
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let store = ClimateStore::new(SeriesFamily::DailyClimate).await?;
/// let key = EntityKey::new("35.68_139.77")?;
///
/// let record = RawRecord::new().set("date", "2023-06-01").set("temp_max", 28.5);
/// store.append().entity(&key).records(vec![record]).call().await?;
///
/// let june = store.read_range(&key, "2023-06-01", "2023-06-30").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ClimateStore {
    family: SeriesFamily,
    store: PartitionStore,
    catalog: SeriesCatalog,
    reader: RangeReader,
    writer: AppendWriter,
}

#[bon]
impl ClimateStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// [`StoreError::StorageRootCreation`] if the directory cannot be created,
    /// [`StoreError::StorageRootNotADirectory`] if the path is a file.
    pub async fn with_storage_root(
        root: StorageRoot,
        family: SeriesFamily,
    ) -> Result<Self, StoreError> {
        ensure_storage_root_exists(&root).await?;
        let store = PartitionStore::new(root, family.schema());
        Ok(Self {
            family,
            catalog: SeriesCatalog::new(store.clone()),
            reader: RangeReader::new(store.clone()),
            writer: AppendWriter::new(store.clone()),
            store,
        })
    }

    /// Opens a store at `CLIMATE_DATA_DIR`, or the platform data directory
    /// when that is not set.
    pub async fn new(family: SeriesFamily) -> Result<Self, StoreError> {
        let root = StorageRoot::from_env()?;
        Self::with_storage_root(root, family).await
    }

    pub fn family(&self) -> SeriesFamily {
        self.family
    }

    pub fn schema(&self) -> &Schema {
        self.store.schema()
    }

    pub fn root(&self) -> &StorageRoot {
        self.store.root()
    }

    /// Stores `records` for `entity`, merging them into its partitions.
    ///
    /// Rows are keyed by timestamp. A record for a timestamp that is already
    /// stored replaces the stored row as a whole.
    ///
    /// # Arguments
    ///
    /// * `entity` - The series to write to.
    /// * `records` - Raw records as handed over by a fetcher. The timestamp is
    ///   taken from the family's time field, or from `recorded_at`,
    ///   `observed_at`, `time` or `date`.
    /// * `granularity` - Optional. Defaults to the family's usual layout: daily
    ///   climate series in one file, sensor telemetry split by month.
    ///
    /// # Returns
    ///
    /// An [`AppendResult`] with the new and total row counts over every
    /// partition written. Records without a usable timestamp are listed in
    /// [`AppendResult::rejected`] and do not fail the call.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptPartition`] or [`StoreError::MalformedPartition`]
    /// if an existing partition cannot be decoded, and the write-path variants
    /// ([`StoreError::PartitionWriteIo`], [`StoreError::PartitionEncode`],
    /// [`StoreError::PartitionPersist`]) if a file cannot be written. The
    /// partition being written is left as it was.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use climate_store::{ClimateStore, EntityKey, Granularity, RawRecord, SeriesFamily};
    /// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
    /// let store = ClimateStore::new(SeriesFamily::SensorTelemetry).await?;
    /// let station = EntityKey::new("44132")?;
    /// let record = RawRecord::new()
    ///     .set("observed_at", "2023-06-01T09:00:00+09:00")
    ///     .set("temp", 21.4);
    ///
    /// let result = store
    ///     .append()
    ///     .entity(&station)
    ///     .records(vec![record])
    ///     .granularity(Granularity::Monthly)
    ///     .call()
    ///     .await?;
    /// assert!(result.rejected.is_empty());
    /// # Ok(())
    /// # }
    /// ```
    #[builder]
    pub async fn append(
        &self,
        entity: &EntityKey,
        records: Vec<RawRecord>,
        granularity: Option<Granularity>,
    ) -> Result<AppendResult, StoreError> {
        let granularity = granularity.unwrap_or_else(|| Granularity::default_for(self.family));
        let writer = self.writer.clone();
        let entity = entity.clone();
        tokio::task::spawn_blocking(move || writer.append(&entity, granularity, records)).await?
    }

    /// Reads rows of `entity` between two optional UTC instants, inclusive,
    /// in ascending time order.
    ///
    /// # Arguments
    ///
    /// * `entity` - The series to read.
    /// * `start` - Optional. Earliest timestamp to return; open when omitted.
    /// * `end` - Optional. Latest timestamp to return; open when omitted.
    /// * `fields` - Optional. Restricts the returned values to these fields.
    ///   Fields no partition carries are ignored.
    ///
    /// # Returns
    ///
    /// `Ok(None)` if nothing was ever stored for `entity`, and `Ok(Some(vec![]))`
    /// if data exists but none falls in the window. Every returned record
    /// carries the same field set, with `None` for missing values.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptPartition`] or [`StoreError::MalformedPartition`]
    /// if a partition in the window cannot be decoded.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use climate_store::{ClimateStore, EntityKey, SeriesFamily};
    /// # use chrono::{TimeZone, Utc};
    /// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
    /// let store = ClimateStore::new(SeriesFamily::SensorTelemetry).await?;
    /// let station = EntityKey::new("44132")?;
    ///
    /// let rows = store
    ///     .read()
    ///     .entity(&station)
    ///     .start(Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap())
    ///     .fields(vec!["temp".to_string()])
    ///     .call()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    #[builder]
    pub async fn read(
        &self,
        entity: &EntityKey,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        fields: Option<Vec<String>>,
    ) -> Result<Option<Vec<Record>>, StoreError> {
        let reader = self.reader.clone();
        let entity = entity.clone();
        tokio::task::spawn_blocking(move || reader.read(&entity, start, end, fields.as_deref()))
            .await?
    }

    /// Reads every row from the start of `start` to the end of `end`.
    ///
    /// A date covers the whole day and a [`Month`](crate::Month) or
    /// [`Year`](crate::Year) its full span, so `read_range(&key, Year(2023),
    /// Year(2023))` returns the whole year.
    ///
    /// # Errors
    ///
    /// [`StoreError::DateParsing`] if either bound cannot be resolved.
    pub async fn read_range(
        &self,
        entity: &EntityKey,
        start: impl AnyDateTime,
        end: impl AnyDateTime,
    ) -> Result<Option<Vec<Record>>, StoreError> {
        let start = start
            .get_datetime_range()
            .ok_or(StoreError::DateParsing)?
            .start;
        let end = end.get_datetime_range().ok_or(StoreError::DateParsing)?.end;
        self.read()
            .entity(entity)
            .start(start)
            .end(end)
            .call()
            .await
    }

    /// The newest stored row of `entity`, or `None` if it has no rows.
    ///
    /// Only the partition holding the newest timestamp is loaded; the others
    /// are inspected through their time column.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use climate_store::{ClimateStore, EntityKey, SeriesFamily};
    /// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
    /// let store = ClimateStore::new(SeriesFamily::SensorTelemetry).await?;
    /// if let Some(row) = store.latest(&EntityKey::new("44132")?).await? {
    ///     println!("{}: {:?}", row.time, row.get("temp"));
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn latest(&self, entity: &EntityKey) -> Result<Option<Record>, StoreError> {
        let reader = self.reader.clone();
        let entity = entity.clone();
        tokio::task::spawn_blocking(move || reader.latest(&entity)).await?
    }

    /// Rows from the last `window`, newest first, at most `limit` of them.
    ///
    /// A window longer than the representable history, such as
    /// [`Duration::MAX`], covers every stored row.
    pub async fn recent(
        &self,
        entity: &EntityKey,
        window: Duration,
        limit: usize,
    ) -> Result<Option<Vec<Record>>, StoreError> {
        let reader = self.reader.clone();
        let entity = entity.clone();
        tokio::task::spawn_blocking(move || reader.recent(&entity, window, limit)).await?
    }

    /// Date span, row count and field set of `entity`.
    ///
    /// Computed from each partition's schema and time column without loading
    /// the rows. For location keys the summary also carries the coordinates.
    ///
    /// # Returns
    ///
    /// `Ok(None)` if nothing was ever stored for `entity`.
    pub async fn summary(&self, entity: &EntityKey) -> Result<Option<SeriesSummary>, StoreError> {
        let catalog = self.catalog.clone();
        let entity = entity.clone();
        tokio::task::spawn_blocking(move || catalog.summary(&entity)).await?
    }

    /// Every entity with at least one partition under the storage root,
    /// sorted. Files that do not follow the partition naming are ignored.
    pub async fn list_entities(&self) -> Result<Vec<EntityKey>, StoreError> {
        let catalog = self.catalog.clone();
        tokio::task::spawn_blocking(move || catalog.list_entities()).await?
    }

    /// The partitions of `entity` on disk: the whole-history file first, if
    /// there is one, then months in ascending order.
    pub async fn partitions_for(&self, entity: &EntityKey) -> Result<Vec<PartitionId>, StoreError> {
        let catalog = self.catalog.clone();
        let entity = entity.clone();
        tokio::task::spawn_blocking(move || catalog.partitions_for(&entity)).await?
    }

    /// Removes every partition of `entity`. Returns how many were deleted.
    pub async fn delete(&self, entity: &EntityKey) -> Result<usize, StoreError> {
        let store = self.store.clone();
        let catalog = self.catalog.clone();
        let entity = entity.clone();
        tokio::task::spawn_blocking(move || delete_entity(&store, &catalog, &entity)).await?
    }
}

fn delete_entity(
    store: &PartitionStore,
    catalog: &SeriesCatalog,
    entity: &EntityKey,
) -> Result<usize, StoreError> {
    let mut deleted = 0;
    for id in catalog.partitions_for(entity)? {
        if store.delete(&id)? {
            deleted += 1;
        }
    }

    // The month directory goes too, unless something else lives in it
    let stream_dir = store.root().join(entity.as_str());
    match std::fs::remove_dir(&stream_dir) {
        Ok(()) => debug!("Removed {}", stream_dir.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!("Kept {}: {}", stream_dir.display(), e),
    }

    info!("Deleted {} partitions of {}", deleted, entity);
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::traits::types::{Month, Year};
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawRecord {
        RawRecord::try_from(value).expect("object")
    }

    async fn open(
        dir: &tempfile::TempDir,
        family: SeriesFamily,
    ) -> Result<ClimateStore, StoreError> {
        ClimateStore::with_storage_root(StorageRoot::new(dir.path().join("data")), family).await
    }

    #[tokio::test]
    async fn test_with_storage_root_creates_dir() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = open(&dir, SeriesFamily::DailyClimate).await?;
        assert!(dir.path().join("data").is_dir());
        assert_eq!(store.family(), SeriesFamily::DailyClimate);
        assert!(store.list_entities().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_with_storage_root_rejects_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("data");
        std::fs::write(&file, b"not a dir")?;
        let result =
            ClimateStore::with_storage_root(StorageRoot::new(file), SeriesFamily::DailyClimate)
                .await;
        assert!(matches!(
            result,
            Err(StoreError::StorageRootNotADirectory(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_append_and_read_daily() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = open(&dir, SeriesFamily::DailyClimate).await?;
        let key = EntityKey::new("35.68_139.77")?;

        let result = store
            .append()
            .entity(&key)
            .records(vec![
                raw(json!({"date": "2023-06-01", "temp_max": 28.5})),
                raw(json!({"date": "2023-06-02", "temp_max": 29.1})),
            ])
            .call()
            .await?;
        assert_eq!(result.new_rows(), 2);
        assert_eq!(result.total_rows(), 2);
        // Daily climate defaults to a single file per entity
        assert!(dir.path().join("data").join("35.68_139.77.parquet").is_file());

        let day = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        let rows = store.read_range(&key, day, day).await?.expect("entity exists");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("temp_max"), Some(28.5));

        let all = store
            .read()
            .entity(&key)
            .fields(vec!["temp_max".to_string()])
            .call()
            .await?
            .expect("entity exists");
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].values.len(), 1);

        let summary = store.summary(&key).await?.expect("entity exists");
        assert_eq!(summary.total_rows, 2);
        assert_eq!(summary.location.map(|l| l.0), Some(35.68));
        Ok(())
    }

    #[tokio::test]
    async fn test_read_unknown_entity_is_none() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = open(&dir, SeriesFamily::SensorTelemetry).await?;
        let key = EntityKey::new("nothing-here")?;
        assert!(store.read().entity(&key).call().await?.is_none());
        assert!(store.latest(&key).await?.is_none());
        assert!(store.summary(&key).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_read_range_accepts_months_and_years() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = open(&dir, SeriesFamily::SensorTelemetry).await?;
        let key = EntityKey::new("ecowitt")?;
        store
            .append()
            .entity(&key)
            .records(vec![
                raw(json!({"observed_at": "2023-01-31T23:00:00Z", "temp": 1.0})),
                raw(json!({"observed_at": "2023-02-01T01:00:00Z", "temp": 2.0})),
                raw(json!({"observed_at": "2024-01-01T00:00:00Z", "temp": 3.0})),
            ])
            .call()
            .await?;

        let feb = store
            .read_range(&key, Month(2023, 2), Month(2023, 2))
            .await?
            .expect("entity exists");
        assert_eq!(feb.len(), 1);
        assert_eq!(feb[0].get("temp"), Some(2.0));

        let year = store
            .read_range(&key, Year(2023), Year(2023))
            .await?
            .expect("entity exists");
        assert_eq!(year.len(), 2);

        assert!(matches!(
            store.read_range(&key, "garbage", Year(2023)).await,
            Err(StoreError::DateParsing)
        ));

        let latest = store.latest(&key).await?.expect("entity exists");
        assert_eq!(latest.time, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_removes_all_partitions() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = open(&dir, SeriesFamily::SensorTelemetry).await?;
        let key = EntityKey::new("44132")?;
        let other = EntityKey::new("44133")?;
        for entity in [&key, &other] {
            store
                .append()
                .entity(entity)
                .records(vec![
                    raw(json!({"observed_at": "2023-01-31T23:00:00Z", "temp": 1.0})),
                    raw(json!({"observed_at": "2023-02-01T01:00:00Z", "temp": 2.0})),
                ])
                .call()
                .await?;
        }
        assert_eq!(store.partitions_for(&key).await?.len(), 2);

        assert_eq!(store.delete(&key).await?, 2);
        assert!(!dir.path().join("data").join("44132").exists());
        assert!(store.read().entity(&key).call().await?.is_none());
        assert_eq!(store.list_entities().await?, vec![other]);
        assert_eq!(store.delete(&key).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_recent_window() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = open(&dir, SeriesFamily::SensorTelemetry).await?;
        let key = EntityKey::new("switchbot")?;
        let now = Utc::now();
        let records = [10, 20, 60 * 24 * 3]
            .into_iter()
            .map(|minutes| {
                let ts = now - Duration::minutes(minutes);
                raw(json!({"observed_at": ts.to_rfc3339(), "temp": minutes as f64}))
            })
            .collect();
        store.append().entity(&key).records(records).call().await?;

        let rows = store
            .recent(&key, Duration::hours(1), 10)
            .await?
            .expect("entity exists");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("temp"), Some(10.0));

        let everything = store
            .recent(&key, Duration::MAX, 10)
            .await?
            .expect("entity exists");
        assert_eq!(everything.len(), 3);
        Ok(())
    }
}
