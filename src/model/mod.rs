//! Domain types shared by ingestion, storage, ranking and the gateway.

pub mod types;

pub use types::{Location, Record, SearchQuery};
