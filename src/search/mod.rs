//! Ranking layer.
//!
//! - **[`decay`]**: haversine distance and the gaussian distance decay.
//! - **[`query`]**: the ranking engine that combines text relevance with decay.

pub mod decay;
pub mod query;

pub use decay::{GeoDecay, haversine_distance};
pub use query::{MAX_RESULTS, QueryError, RankedResult, RankingEngine, SearchHit};
