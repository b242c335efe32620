//! Maps timestamps to partition identifiers. Pure; no I/O.

use crate::types::entity_key::EntityKey;
use crate::types::granularity::Granularity;
use crate::types::traits::types::Month;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;

pub(crate) const PARTITION_EXTENSION: &str = "parquet";

/// Identifies one partition: an entity's whole history, or one of its months.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId {
    entity: EntityKey,
    month: Option<Month>,
}

impl PartitionId {
    pub fn unbounded(entity: EntityKey) -> Self {
        Self {
            entity,
            month: None,
        }
    }

    pub fn monthly(entity: EntityKey, month: Month) -> Self {
        Self {
            entity,
            month: Some(month),
        }
    }

    pub fn entity(&self) -> &EntityKey {
        &self.entity
    }

    pub fn month(&self) -> Option<Month> {
        self.month
    }

    pub fn granularity(&self) -> Granularity {
        match self.month {
            Some(_) => Granularity::Monthly,
            None => Granularity::Unbounded,
        }
    }

    /// Location of the partition file relative to the storage root:
    /// `<entity>.parquet` or `<entity>/<YYYY-MM>.parquet`.
    pub fn relative_path(&self) -> PathBuf {
        match self.month {
            None => PathBuf::from(format!("{}.{}", self.entity, PARTITION_EXTENSION)),
            Some(month) => PathBuf::from(self.entity.as_str())
                .join(format!("{}.{}", month, PARTITION_EXTENSION)),
        }
    }

    /// Whether this partition can hold rows inside `[start, end]`. Open bounds
    /// match everything on that side.
    pub(crate) fn may_overlap(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> bool {
        let Some(month) = self.month else {
            return true;
        };
        start.map_or(true, |s| month >= Month::of(&s))
            && end.map_or(true, |e| month <= Month::of(&e))
    }
}

/// `<entity>` or `<entity>-<YYYY-MM>`.
impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.month {
            None => write!(f, "{}", self.entity),
            Some(month) => write!(f, "{}-{}", self.entity, month),
        }
    }
}

/// The partition a record with timestamp `ts` belongs to.
pub fn resolve(entity: &EntityKey, granularity: Granularity, ts: DateTime<Utc>) -> PartitionId {
    match granularity {
        Granularity::Unbounded => PartitionId::unbounded(entity.clone()),
        Granularity::Monthly => PartitionId::monthly(entity.clone(), Month::of(&ts)),
    }
}

/// Every partition that `[start, end]` touches, in chronological order. Both
/// ends are inclusive; an inverted range yields nothing.
///
/// The returned iterator is finite and `Clone`, so it can be restarted.
pub fn enumerate(
    entity: &EntityKey,
    granularity: Granularity,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> PartitionIds {
    let months = if start > end {
        None
    } else {
        Some((Month::of(&start), Month::of(&end)))
    };
    PartitionIds {
        entity: entity.clone(),
        granularity,
        next: months.map(|(first, _)| first),
        last: months.map(|(_, last)| last),
    }
}

#[derive(Debug, Clone)]
pub struct PartitionIds {
    entity: EntityKey,
    granularity: Granularity,
    next: Option<Month>,
    last: Option<Month>,
}

impl Iterator for PartitionIds {
    type Item = PartitionId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        let last = self.last?;
        match self.granularity {
            Granularity::Unbounded => {
                self.next = None;
                Some(PartitionId::unbounded(self.entity.clone()))
            }
            Granularity::Monthly => {
                self.next = if current < last {
                    Some(current.next())
                } else {
                    None
                };
                Some(PartitionId::monthly(self.entity.clone(), current))
            }
        }
    }
}
