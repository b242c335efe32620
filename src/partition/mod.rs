pub(crate) mod frame;
pub mod key_resolver;
pub mod store;
