use crate::types::schema::SeriesFamily;
use std::fmt;

/// How a series is split into partitions over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    /// One partition holds the entity's entire history.
    Unbounded,
    /// One partition per UTC calendar month.
    Monthly,
}

impl Granularity {
    /// The layout each family is collected with unless the caller overrides it.
    pub fn default_for(family: SeriesFamily) -> Self {
        match family {
            SeriesFamily::DailyClimate => Granularity::Unbounded,
            SeriesFamily::SensorTelemetry => Granularity::Monthly,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Unbounded => write!(f, "unbounded"),
            Granularity::Monthly => write!(f, "monthly"),
        }
    }
}
