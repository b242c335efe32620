//! Field declarations for the two series families the store knows about.
//!
//! A [`Schema`] is advisory: it tells the writer how to coerce known fields and
//! which column type to use on disk, but unknown numeric fields are still kept.

use std::fmt;

/// Declared numeric type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Stored as a nullable `Float64` column.
    Float,
    /// Stored as a nullable `Int64` column. Incoming values are rounded.
    Integer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
}

const fn float(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        field_type: FieldType::Float,
    }
}

const fn integer(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        field_type: FieldType::Integer,
    }
}

/// Daily reanalysis variables (Open-Meteo, ERA5, AgERA5).
const DAILY_CLIMATE_FIELDS: &[FieldSpec] = &[
    float("temp_mean"),
    float("temp_min"),
    float("temp_max"),
    float("precipitation"),
    float("rain"),
    float("snowfall"),
    float("wind_speed_max"),
    float("wind_gusts_max"),
    float("wind_speed_mean"),
    float("shortwave_radiation"),
    float("et0"),
    float("sunshine_hours"),
    float("humidity_mean"),
    float("pressure_mean"),
    float("vapour_pressure"),
    float("cloud_cover"),
    float("humidity_06h"),
    float("humidity_09h"),
    float("humidity_12h"),
    float("humidity_15h"),
    float("humidity_18h"),
    float("snow_depth"),
    float("soil_temp_0_7cm"),
    float("soil_temp_7_28cm"),
    float("soil_temp_28_100cm"),
    float("soil_temp_100_255cm"),
    float("soil_moisture_0_7cm"),
    float("soil_moisture_7_28cm"),
    float("soil_moisture_28_100cm"),
    float("soil_moisture_100_255cm"),
];

/// Station and home sensor observations (AMeDAS, SwitchBot, Ecowitt).
const SENSOR_TELEMETRY_FIELDS: &[FieldSpec] = &[
    // AMeDAS
    float("temp"),
    float("humidity"),
    float("pressure"),
    float("normal_pressure"),
    float("wind_speed"),
    integer("wind_direction"),
    float("precipitation_10m"),
    float("precipitation_1h"),
    float("precipitation_3h"),
    float("precipitation_24h"),
    float("sun_10m"),
    float("sun_1h"),
    float("snow"),
    float("snow_1h"),
    float("snow_6h"),
    float("snow_12h"),
    float("snow_24h"),
    float("visibility"),
    // Home stations
    float("temp_indoor_c"),
    float("humidity_indoor"),
    float("temp_outdoor_c"),
    float("humidity_outdoor"),
    float("pressure_rel_hpa"),
    float("pressure_abs_hpa"),
    float("wind_dir"),
    float("wind_speed_ms"),
    float("wind_gust_ms"),
    float("wind_gust_max_daily_ms"),
    float("solar_radiation"),
    float("uv_index"),
    float("rain_rate_mm"),
    float("rain_event_mm"),
    float("rain_hourly_mm"),
    float("rain_daily_mm"),
    float("rain_weekly_mm"),
    float("rain_monthly_mm"),
    float("rain_yearly_mm"),
];

/// Keys a raw record's timestamp may be found under when the schema's own
/// time field is absent, in lookup order.
pub(crate) const TIME_FIELD_CANDIDATES: &[&str] = &["recorded_at", "observed_at", "time", "date"];

/// The family a series belongs to. Determines its [`Schema`] and its default
/// [`crate::Granularity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesFamily {
    /// Daily climate variables, one row per day, one partition per location.
    DailyClimate,
    /// Irregular-interval sensor observations, partitioned by month.
    SensorTelemetry,
}

impl SeriesFamily {
    pub fn schema(self) -> Schema {
        match self {
            SeriesFamily::DailyClimate => Schema {
                family: self,
                time_field: "date",
                fields: DAILY_CLIMATE_FIELDS,
            },
            SeriesFamily::SensorTelemetry => Schema {
                family: self,
                time_field: "observed_at",
                fields: SENSOR_TELEMETRY_FIELDS,
            },
        }
    }
}

impl fmt::Display for SeriesFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesFamily::DailyClimate => write!(f, "daily_climate"),
            SeriesFamily::SensorTelemetry => write!(f, "sensor_telemetry"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    family: SeriesFamily,
    time_field: &'static str,
    fields: &'static [FieldSpec],
}

impl Schema {
    pub fn family(&self) -> SeriesFamily {
        self.family
    }

    /// Name of the time column in every partition of this family.
    pub fn time_field(&self) -> &'static str {
        self.time_field
    }

    pub fn fields(&self) -> &'static [FieldSpec] {
        self.fields
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Declared type of `name`; unknown fields are treated as floats.
    pub fn field_type(&self, name: &str) -> FieldType {
        self.field(name)
            .map(|f| f.field_type)
            .unwrap_or(FieldType::Float)
    }

    /// Sort key giving declared fields their schema order, followed by
    /// unknown fields alphabetically.
    pub(crate) fn column_order(&self, name: &str) -> (usize, String) {
        let pos = self
            .fields
            .iter()
            .position(|f| f.name == name)
            .unwrap_or(self.fields.len());
        (pos, name.to_string())
    }
}
