//! Conversion between [`Record`]s and polars `DataFrame`s, and the Parquet
//! file I/O underneath every partition.

use crate::error::StoreError;
use crate::types::record::Record;
use crate::types::schema::{FieldType, Schema};
use chrono::{DateTime, Utc};
use log::debug;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

/// Time column type on disk. Values are UTC instants.
fn time_dtype() -> DataType {
    DataType::Datetime(TimeUnit::Milliseconds, None)
}

/// Builds the on-disk frame for a partition. `fields` gives the columns after
/// the time column, in order; records lacking a field get a null there.
pub(crate) fn records_to_frame(
    schema: &Schema,
    partition: &str,
    fields: &[String],
    records: &[Record],
) -> Result<DataFrame, StoreError> {
    let frame_error = |source| StoreError::FrameBuild {
        partition: partition.to_string(),
        source,
    };

    let millis: Vec<i64> = records.iter().map(|r| r.time.timestamp_millis()).collect();
    let time = Column::new(schema.time_field().into(), millis)
        .cast(&time_dtype())
        .map_err(frame_error)?;

    let mut columns = Vec::with_capacity(fields.len() + 1);
    columns.push(time);
    for field in fields {
        let column = match schema.field_type(field) {
            FieldType::Float => {
                let values: Vec<Option<f64>> = records.iter().map(|r| r.get(field)).collect();
                Column::new(field.as_str().into(), values)
            }
            FieldType::Integer => {
                let values: Vec<Option<i64>> = records
                    .iter()
                    .map(|r| r.get(field).map(|v| v.round() as i64))
                    .collect();
                Column::new(field.as_str().into(), values)
            }
        };
        columns.push(column);
    }

    DataFrame::new(columns).map_err(frame_error)
}

/// Decodes a partition frame. Returns the field names (file column order,
/// time column excluded) and the rows.
///
/// Every column of the frame appears in every record's `values`, with `None`
/// for nulls, so a decoded record always carries the partition's full field set.
pub(crate) fn frame_to_records(
    path: &Path,
    time_field: &str,
    df: &DataFrame,
) -> Result<(Vec<String>, Vec<Record>), StoreError> {
    let time_column = df.column(time_field).map_err(|_| StoreError::MalformedPartition {
        path: path.to_path_buf(),
        reason: format!("missing time column '{}'", time_field),
    })?;
    let times = time_millis(path, time_column)?;

    let mut fields = Vec::with_capacity(df.width().saturating_sub(1));
    let mut values = Vec::with_capacity(fields.capacity());
    for column in df.get_columns() {
        let name = column.name().as_str();
        if name == time_field {
            continue;
        }
        if !is_numeric(column.dtype()) {
            return Err(StoreError::MalformedPartition {
                path: path.to_path_buf(),
                reason: format!("column '{}' has non-numeric type {}", name, column.dtype()),
            });
        }
        let as_float = column
            .cast(&DataType::Float64)
            .map_err(|e| StoreError::CorruptPartition(path.to_path_buf(), e))?;
        let column_values: Vec<Option<f64>> = as_float
            .f64()
            .map_err(|e| StoreError::CorruptPartition(path.to_path_buf(), e))?
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect();
        fields.push(name.to_string());
        values.push(column_values);
    }

    let mut records = Vec::with_capacity(times.len());
    for (row, ms) in times.into_iter().enumerate() {
        let mut record = Record::new(millis_to_utc(path, ms)?);
        for (field, column_values) in fields.iter().zip(&values) {
            record.values.insert(field.clone(), column_values[row]);
        }
        records.push(record);
    }
    Ok((fields, records))
}

// An all-null column written by another tool decodes as `Null`
fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Float32
            | DataType::Float64
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Null
    )
}

/// Extracts epoch milliseconds from the time column and checks the partition
/// invariant: no nulls, strictly ascending.
fn time_millis(path: &Path, column: &Column) -> Result<Vec<i64>, StoreError> {
    let millis = match column.dtype() {
        DataType::Datetime(TimeUnit::Milliseconds, _) => column.cast(&DataType::Int64),
        DataType::Datetime(_, tz) => column
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, tz.clone()))
            .and_then(|c| c.cast(&DataType::Int64)),
        other => {
            return Err(StoreError::MalformedPartition {
                path: path.to_path_buf(),
                reason: format!("time column has type {}, expected a datetime", other),
            })
        }
    }
    .map_err(|e| StoreError::CorruptPartition(path.to_path_buf(), e))?;

    let ca = millis
        .i64()
        .map_err(|e| StoreError::CorruptPartition(path.to_path_buf(), e))?;
    let mut out: Vec<i64> = Vec::with_capacity(ca.len());
    for (row, value) in ca.into_iter().enumerate() {
        let Some(ms) = value else {
            return Err(StoreError::MalformedPartition {
                path: path.to_path_buf(),
                reason: format!("row {} has no timestamp", row),
            });
        };
        if out.last().is_some_and(|&prev| ms <= prev) {
            return Err(StoreError::MalformedPartition {
                path: path.to_path_buf(),
                reason: format!("timestamps are not strictly ascending at row {}", row),
            });
        }
        out.push(ms);
    }
    Ok(out)
}

fn millis_to_utc(path: &Path, ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| StoreError::MalformedPartition {
        path: path.to_path_buf(),
        reason: format!("timestamp {} ms is out of range", ms),
    })
}

/// Reads a whole partition file. The caller has already checked it exists.
pub(crate) fn read_parquet(path: &Path) -> Result<DataFrame, StoreError> {
    let file = File::open(path).map_err(|e| StoreError::PartitionRead(path.to_path_buf(), e))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| StoreError::CorruptPartition(path.to_path_buf(), e))
}

/// Reads only the schema and the time column of a partition file.
///
/// Returns the field names (time column excluded) and the row timestamps.
pub(crate) fn scan_time_column(
    path: &Path,
    time_field: &str,
) -> Result<(Vec<String>, Vec<DateTime<Utc>>), StoreError> {
    let corrupt = |e| StoreError::CorruptPartition(path.to_path_buf(), e);

    let mut lazy = LazyFrame::scan_parquet(path, ScanArgsParquet::default()).map_err(corrupt)?;
    let file_schema = lazy.collect_schema().map_err(corrupt)?;
    if file_schema.get(time_field).is_none() {
        return Err(StoreError::MalformedPartition {
            path: path.to_path_buf(),
            reason: format!("missing time column '{}'", time_field),
        });
    }
    let fields: Vec<String> = file_schema
        .iter_names()
        .map(|name| name.to_string())
        .filter(|name| name != time_field)
        .collect();

    let df = lazy.select([col(time_field)]).collect().map_err(corrupt)?;
    let time_column = df.column(time_field).map_err(corrupt)?;
    let times = time_millis(path, time_column)?
        .into_iter()
        .map(|ms| millis_to_utc(path, ms))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((fields, times))
}

/// Writes `df` to `path` atomically: the frame goes to a temporary file in the
/// same directory, is flushed to disk, and is then renamed over `path`.
///
/// On any error the temporary file is removed and `path` is left as it was.
pub(crate) fn write_parquet_atomic(path: &Path, df: &mut DataFrame) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| {
        StoreError::PartitionWriteIo(path.to_path_buf(), std::io::ErrorKind::InvalidInput.into())
    })?;
    std::fs::create_dir_all(parent)
        .map_err(|e| StoreError::PartitionWriteIo(path.to_path_buf(), e))?;

    let mut temp_file = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| StoreError::PartitionWriteIo(path.to_path_buf(), e))?;
    debug!("Writing {} rows to {:?}", df.height(), temp_file.path());

    ParquetWriter::new(temp_file.as_file_mut())
        .with_compression(ParquetCompression::Snappy)
        .finish(df)
        .map_err(|e| StoreError::PartitionEncode(path.to_path_buf(), e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| StoreError::PartitionWriteIo(path.to_path_buf(), e))?;

    temp_file
        .persist(path)
        .map_err(|e| StoreError::PartitionPersist(path.to_path_buf(), e.error))?;
    Ok(())
}
