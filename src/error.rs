use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to determine the default storage directory")]
    StorageRootResolution,

    #[error("Failed to create storage directory '{0}'")]
    StorageRootCreation(PathBuf, #[source] std::io::Error),

    #[error("Storage path '{0}' exists but is not a directory")]
    StorageRootNotADirectory(PathBuf),

    #[error("Failed to scan storage directory '{0}'")]
    CatalogScan(PathBuf, #[source] std::io::Error),

    // The partition file exists but its bytes cannot be decoded.
    #[error("Partition file '{0}' is corrupt and could not be decoded")]
    CorruptPartition(PathBuf, #[source] PolarsError),

    // The partition decoded fine but breaks the time column contract.
    #[error("Partition file '{path}' is malformed: {reason}")]
    MalformedPartition { path: PathBuf, reason: String },

    #[error("Failed to open partition file '{0}'")]
    PartitionRead(PathBuf, #[source] std::io::Error),

    // Errors on the write path. None of these touch the canonical file.
    #[error("I/O error writing partition file '{0}'")]
    PartitionWriteIo(PathBuf, #[source] std::io::Error),
    #[error("Encoding error writing partition file '{0}'")]
    PartitionEncode(PathBuf, #[source] PolarsError),
    #[error("Failed to move finished partition into place at '{0}'")]
    PartitionPersist(PathBuf, #[source] std::io::Error),

    #[error("Failed to delete partition file '{0}'")]
    PartitionDelete(PathBuf, #[source] std::io::Error),

    #[error("Invalid entity key '{key}': {reason}")]
    InvalidEntityKey { key: String, reason: &'static str },

    #[error("Could not resolve the requested date or time")]
    DateParsing,

    #[error("Failed building frame for partition '{partition}': {source}")]
    FrameBuild {
        partition: String,
        #[source]
        source: PolarsError,
    },

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// A single raw record that could not be stored because its timestamp is
/// missing or unparsable. Collected per batch, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Record #{index} rejected: {reason}")]
pub struct InvalidRecord {
    /// Position of the record in the batch handed to the writer.
    pub index: usize,
    pub reason: String,
}
