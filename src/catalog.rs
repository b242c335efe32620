//! Discovers what is stored by listing the storage directory. There is no index
//! file; file names are the catalog.

use crate::error::StoreError;
use crate::partition::key_resolver::{PartitionId, PARTITION_EXTENSION};
use crate::partition::store::PartitionStore;
use crate::types::entity_key::EntityKey;
use crate::types::record::SeriesSummary;
use crate::types::traits::types::Month;
use log::debug;
use std::collections::BTreeSet;
use std::io;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct SeriesCatalog {
    store: PartitionStore,
}

impl SeriesCatalog {
    pub fn new(store: PartitionStore) -> Self {
        Self { store }
    }

    /// Every entity with at least one partition on disk, sorted and deduplicated.
    ///
    /// Files and directories that do not follow the partition naming scheme
    /// are ignored.
    pub fn list_entities(&self) -> Result<Vec<EntityKey>, StoreError> {
        let root = self.store.root().path();
        let Some(entries) = read_dir_if_exists(root)? else {
            return Ok(Vec::new());
        };

        let mut entities = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::CatalogScan(root.to_path_buf(), e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| StoreError::CatalogScan(entry.path(), e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };

            if file_type.is_file() {
                if let Some(key) = unbounded_entity(name) {
                    entities.insert(key);
                }
            } else if file_type.is_dir() {
                let Ok(key) = EntityKey::new(name) else {
                    continue;
                };
                if !monthly_partitions(&entry.path())?.is_empty() {
                    entities.insert(key);
                }
            }
        }
        Ok(entities.into_iter().collect())
    }

    /// All partitions of `entity` on disk: the unbounded one first (if any),
    /// then months in ascending order.
    pub fn partitions_for(&self, entity: &EntityKey) -> Result<Vec<PartitionId>, StoreError> {
        let mut partitions = Vec::new();

        let unbounded = PartitionId::unbounded(entity.clone());
        if self.store.path_for(&unbounded).is_file() {
            partitions.push(unbounded);
        }

        let stream_dir = self.store.root().join(entity.as_str());
        partitions.extend(
            monthly_partitions(&stream_dir)?
                .into_iter()
                .map(|month| PartitionId::monthly(entity.clone(), month)),
        );
        debug!("Found {} partitions for {}", partitions.len(), entity);
        Ok(partitions)
    }

    /// Date span, row count and field set for `entity`, computed from each
    /// partition's schema and time column without loading full rows.
    ///
    /// `Ok(None)` if nothing was ever stored for the entity.
    pub fn summary(&self, entity: &EntityKey) -> Result<Option<SeriesSummary>, StoreError> {
        let partitions = self.partitions_for(entity)?;
        if partitions.is_empty() {
            return Ok(None);
        }

        let mut summary = SeriesSummary {
            entity: entity.clone(),
            location: entity.location(),
            start: None,
            end: None,
            total_rows: 0,
            partitions: partitions.len(),
            fields: Vec::new(),
        };
        let mut fields = BTreeSet::new();
        for id in &partitions {
            let Some(info) = self.store.peek(id)? else {
                continue;
            };
            summary.total_rows += info.rows;
            summary.start = match (summary.start, info.first) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            summary.end = match (summary.end, info.last) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            fields.extend(info.fields);
        }
        summary.fields = fields.into_iter().collect();
        Ok(Some(summary))
    }
}

fn read_dir_if_exists(dir: &Path) -> Result<Option<std::fs::ReadDir>, StoreError> {
    match std::fs::read_dir(dir) {
        Ok(entries) => Ok(Some(entries)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::CatalogScan(dir.to_path_buf(), e)),
    }
}

/// `<key>.parquet` -> key
fn unbounded_entity(file_name: &str) -> Option<EntityKey> {
    let stem = file_name.strip_suffix(PARTITION_EXTENSION)?.strip_suffix('.')?;
    EntityKey::new(stem).ok()
}

/// Months with a `YYYY-MM.parquet` file in `dir`, ascending. Missing dir is empty.
fn monthly_partitions(dir: &Path) -> Result<Vec<Month>, StoreError> {
    let Some(entries) = read_dir_if_exists(dir)? else {
        return Ok(Vec::new());
    };
    let mut months = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::CatalogScan(dir.to_path_buf(), e))?;
        let name = entry.file_name();
        let Some(stem) = name
            .to_str()
            .and_then(|n| n.strip_suffix(PARTITION_EXTENSION))
            .and_then(|n| n.strip_suffix('.'))
        else {
            continue;
        };
        if let Ok(month) = stem.parse::<Month>() {
            if entry.path().is_file() {
                months.insert(month);
            }
        }
    }
    Ok(months.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::key_resolver::resolve;
    use crate::types::granularity::Granularity;
    use crate::types::record::Record;
    use crate::types::schema::SeriesFamily;
    use crate::utils::StorageRoot;
    use chrono::{TimeZone, Utc};

    fn setup(dir: &tempfile::TempDir) -> (PartitionStore, SeriesCatalog) {
        let store = PartitionStore::new(
            StorageRoot::new(dir.path()),
            SeriesFamily::SensorTelemetry.schema(),
        );
        (store.clone(), SeriesCatalog::new(store))
    }

    #[test]
    fn test_missing_root_lists_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = PartitionStore::new(
            StorageRoot::new(dir.path().join("never_created")),
            SeriesFamily::DailyClimate.schema(),
        );
        assert!(SeriesCatalog::new(store).list_entities()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_list_entities_dedupes_and_filters() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (store, catalog) = setup(&dir);
        let station = EntityKey::new("44132")?;
        for (month, day) in [(1, 31), (2, 1), (3, 15)] {
            let ts = Utc.with_ymd_and_hms(2023, month, day, 0, 0, 0).unwrap();
            let id = resolve(&station, Granularity::Monthly, ts);
            store.merge_write(&id, vec![Record::new(ts).with("temp", Some(1.0))])?;
        }
        let location = EntityKey::new("35.68_139.77")?;
        let ts = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        store.merge_write(
            &resolve(&location, Granularity::Unbounded, ts),
            vec![Record::new(ts)],
        )?;

        // Noise that must be ignored
        std::fs::write(dir.path().join("README.txt"), b"hello")?;
        std::fs::write(dir.path().join(".hidden.parquet"), b"x")?;
        std::fs::create_dir(dir.path().join("empty_dir"))?;
        std::fs::write(dir.path().join("44132").join("notes.parquet"), b"x")?;

        let entities = catalog.list_entities()?;
        assert_eq!(entities, vec![location, station.clone()]);

        let partitions = catalog.partitions_for(&station)?;
        let names: Vec<String> = partitions.iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["44132-2023-01", "44132-2023-02", "44132-2023-03"]);
        Ok(())
    }

    #[test]
    fn test_summary_spans_partitions() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (store, catalog) = setup(&dir);
        let station = EntityKey::new("ecowitt")?;
        let jan = Utc.with_ymd_and_hms(2023, 1, 31, 23, 0, 0).unwrap();
        let feb = Utc.with_ymd_and_hms(2023, 2, 1, 1, 0, 0).unwrap();
        store.merge_write(
            &resolve(&station, Granularity::Monthly, jan),
            vec![Record::new(jan).with("temp_outdoor_c", Some(2.0))],
        )?;
        store.merge_write(
            &resolve(&station, Granularity::Monthly, feb),
            vec![
                Record::new(feb).with("uv_index", Some(0.0)),
                Record::new(feb + chrono::Duration::hours(1)).with("uv_index", None),
            ],
        )?;

        let summary = catalog.summary(&station)?.expect("entity exists");
        assert_eq!(summary.partitions, 2);
        assert_eq!(summary.total_rows, 3);
        assert_eq!(summary.start, Some(jan));
        assert_eq!(summary.end, Some(feb + chrono::Duration::hours(1)));
        assert_eq!(summary.fields, vec!["temp_outdoor_c", "uv_index"]);
        assert_eq!(summary.location, None);

        assert!(catalog.summary(&EntityKey::new("unknown")?)?.is_none());
        Ok(())
    }
}
