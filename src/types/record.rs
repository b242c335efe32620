use crate::error::InvalidRecord;
use crate::types::entity_key::{EntityKey, LatLon};
use crate::types::traits::types::Month;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One observation: a UTC timestamp plus named, optionally missing values.
///
/// Missing values are `None`, never zero. A field absent from `values` and a
/// field present with `None` both mean "missing".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub time: DateTime<Utc>,
    pub values: BTreeMap<String, Option<f64>>,
}

impl Record {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time,
            values: BTreeMap::new(),
        }
    }

    /// Builder-style setter, mostly useful for producers and tests.
    pub fn with(mut self, field: impl Into<String>, value: Option<f64>) -> Self {
        self.values.insert(field.into(), value);
        self
    }

    /// The value of `field`, flattening "absent" and "missing" into `None`.
    pub fn get(&self, field: &str) -> Option<f64> {
        self.values.get(field).copied().flatten()
    }
}

/// A record as handed over by a fetcher, before normalization.
///
/// This is simply a JSON object; the timestamp lives under one of its keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(pub Map<String, Value>);

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, replacing any previous entry.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

impl TryFrom<Value> for RawRecord {
    type Error = Value;

    /// Only JSON objects are records; anything else is handed back.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

/// Outcome of merging one batch into one partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    /// Rows in the partition after the merge.
    pub total_rows: usize,
    /// Incoming timestamps that were not in the partition before.
    pub new_rows: usize,
}

impl std::ops::AddAssign for MergeResult {
    fn add_assign(&mut self, rhs: Self) {
        self.total_rows += rhs.total_rows;
        self.new_rows += rhs.new_rows;
    }
}

/// Outcome of an append, summed over every partition it touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendResult {
    pub merge: MergeResult,
    /// Number of partitions written.
    pub partitions: usize,
    /// Records skipped because their timestamp was unusable.
    pub rejected: Vec<InvalidRecord>,
}

impl AppendResult {
    pub fn total_rows(&self) -> usize {
        self.merge.total_rows
    }

    pub fn new_rows(&self) -> usize {
        self.merge.new_rows
    }
}

/// Lightweight description of a partition, obtained without loading its body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub partition: String,
    /// The month this partition covers, if it is a monthly one.
    pub month: Option<Month>,
    pub rows: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub fields: Vec<String>,
}

/// Overview of everything stored for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSummary {
    pub entity: EntityKey,
    /// Decoded from the key when it is a location key.
    pub location: Option<LatLon>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub total_rows: usize,
    pub partitions: usize,
    /// Union of every partition's fields, sorted by name.
    pub fields: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_get_flattens_missing() {
        let ts = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        let record = Record::new(ts).with("temp", Some(12.0)).with("humidity", None);
        assert_eq!(record.get("temp"), Some(12.0));
        assert_eq!(record.get("humidity"), None);
        assert_eq!(record.get("pressure"), None);
    }

    #[test]
    fn test_raw_record_from_json() {
        let raw = RawRecord::try_from(json!({"observed_at": "2023-01-01T00:00:00Z", "temp": 3.2}))
            .unwrap();
        assert_eq!(raw.get("temp"), Some(&json!(3.2)));
        assert!(RawRecord::try_from(json!([1, 2])).is_err());
    }

    #[test]
    fn test_merge_result_sums() {
        let mut total = MergeResult::default();
        total += MergeResult {
            total_rows: 10,
            new_rows: 2,
        };
        total += MergeResult {
            total_rows: 5,
            new_rows: 5,
        };
        assert_eq!(
            total,
            MergeResult {
                total_rows: 15,
                new_rows: 7
            }
        );
    }
}
