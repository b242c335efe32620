pub mod entity_key;
pub mod granularity;
pub mod record;
pub mod schema;
pub mod traits;
