//! The write path: normalize raw fetcher output, route it to partitions, merge.

use crate::error::{InvalidRecord, StoreError};
use crate::partition::key_resolver::{resolve, PartitionId};
use crate::partition::store::PartitionStore;
use crate::types::entity_key::EntityKey;
use crate::types::granularity::Granularity;
use crate::types::record::{AppendResult, RawRecord, Record};
use crate::types::schema::{FieldType, Schema, TIME_FIELD_CANDIDATES};
use crate::types::traits::any::any_datetime::parse_instant;
use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub struct AppendWriter {
    store: PartitionStore,
}

impl AppendWriter {
    pub fn new(store: PartitionStore) -> Self {
        Self { store }
    }

    /// Normalizes `raw_records`, groups them by partition and merges each group.
    ///
    /// Records without a usable timestamp are skipped and reported in
    /// [`AppendResult::rejected`]; the rest of the batch is still stored. A
    /// record whose values are all missing is stored as such.
    ///
    /// Groups are merged one at a time in partition order. If a merge fails the
    /// error is returned and groups merged before it stay merged; retrying the
    /// same append converges to the same state.
    pub fn append<I>(
        &self,
        entity: &EntityKey,
        granularity: Granularity,
        raw_records: I,
    ) -> Result<AppendResult, StoreError>
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let mut normalizer = Normalizer::new(self.store.schema());
        let mut result = AppendResult::default();
        let mut groups: BTreeMap<PartitionId, Vec<Record>> = BTreeMap::new();

        for (index, raw) in raw_records.into_iter().enumerate() {
            match normalizer.normalize(index, raw) {
                Ok(record) => groups
                    .entry(resolve(entity, granularity, record.time))
                    .or_default()
                    .push(record),
                Err(rejected) => result.rejected.push(rejected),
            }
        }

        if !normalizer.dropped.is_empty() {
            warn!(
                "Dropped non-numeric fields {:?} while appending to {}",
                normalizer.dropped, entity
            );
        }
        if !result.rejected.is_empty() {
            warn!(
                "Skipped {} records without a usable timestamp for {}",
                result.rejected.len(),
                entity
            );
        }

        for (id, records) in groups {
            result.merge += self.store.merge_write(&id, records)?;
            result.partitions += 1;
        }

        info!(
            "Appended to {} ({}): {} new rows across {} partitions",
            entity, granularity, result.merge.new_rows, result.partitions
        );
        Ok(result)
    }
}

struct Normalizer<'a> {
    schema: &'a Schema,
    /// Unknown fields whose values could not be stored as numbers.
    dropped: BTreeSet<String>,
}

impl<'a> Normalizer<'a> {
    fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            dropped: BTreeSet::new(),
        }
    }

    fn normalize(&mut self, index: usize, raw: RawRecord) -> Result<Record, InvalidRecord> {
        let RawRecord(mut map) = raw;

        let time_key = std::iter::once(self.schema.time_field())
            .chain(TIME_FIELD_CANDIDATES.iter().copied())
            .find(|key| map.get(*key).is_some_and(|value| !is_blank(value)))
            .ok_or_else(|| InvalidRecord {
                index,
                reason: "no timestamp field".to_string(),
            })?;
        let time_value = map.remove(time_key).unwrap_or(Value::Null);
        let time = parse_timestamp(&time_value).ok_or_else(|| InvalidRecord {
            index,
            reason: format!("unparsable timestamp {} in '{}'", time_value, time_key),
        })?;

        let mut record = Record::new(time);
        for (name, value) in map {
            // Leftover blank timestamp keys are not values
            if is_blank(&value) && self.is_time_key(&name) {
                continue;
            }
            match self.schema.field(&name) {
                Some(spec) => {
                    let coerced = coerce_number(&value).map(|v| match spec.field_type {
                        FieldType::Float => v,
                        FieldType::Integer => v.round(),
                    });
                    record.values.insert(name, coerced);
                }
                None => match value {
                    Value::Null => {
                        record.values.insert(name, None);
                    }
                    Value::String(ref s) if s.trim().is_empty() => {
                        record.values.insert(name, None);
                    }
                    other => match coerce_number(&other) {
                        Some(v) => {
                            record.values.insert(name, Some(v));
                        }
                        None => {
                            self.dropped.insert(name);
                        }
                    },
                },
            }
        }
        Ok(record)
    }

    fn is_time_key(&self, name: &str) -> bool {
        name == self.schema.time_field() || TIME_FIELD_CANDIDATES.contains(&name)
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Numbers and numeric strings become finite `f64`s; everything else is missing.
fn coerce_number(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

/// Accepts RFC 3339, naive date-times (read as UTC), plain dates (midnight
/// UTC) and Unix seconds. The result is truncated to milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let time = match value {
        Value::String(s) => parse_instant(s).or_else(|| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .ok()?
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
        })?,
        Value::Number(n) => match n.as_i64() {
            Some(secs) => DateTime::<Utc>::from_timestamp(secs, 0)?,
            None => {
                let secs = n.as_f64().filter(|s| s.is_finite())?;
                DateTime::<Utc>::from_timestamp_millis((secs * 1000.0).round() as i64)?
            }
        },
        _ => return None,
    };
    DateTime::<Utc>::from_timestamp_millis(time.timestamp_millis())
}
