mod catalog;
mod error;
mod partition;
mod reader;
mod store;
mod types;
mod utils;
mod writer;

pub use error::{InvalidRecord, StoreError};
pub use store::ClimateStore;
pub use utils::{StorageRoot, DATA_DIR_ENV};

pub use catalog::SeriesCatalog;
pub use partition::key_resolver::{enumerate, resolve, PartitionId, PartitionIds};
pub use partition::store::{Partition, PartitionStore};
pub use reader::RangeReader;
pub use writer::AppendWriter;

pub use types::entity_key::{EntityKey, LatLon};
pub use types::granularity::Granularity;
pub use types::record::*;
pub use types::schema::{FieldSpec, FieldType, Schema, SeriesFamily};

pub use types::traits::any::any_datetime::AnyDateTime;
pub use types::traits::types::Month;
pub use types::traits::types::StartEndDateTime;
pub use types::traits::types::Year;
