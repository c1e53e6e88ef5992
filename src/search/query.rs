use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::model::{Record, SearchQuery};
use crate::search::decay::GeoDecay;
use crate::storage::{BackendError, DocumentStore, ScoredSearch};

/// Upper bound on records returned per query.
pub const MAX_RESULTS: usize = 20;
/// Text fields the search term is matched against.
pub const SEARCH_FIELDS: [&str; 3] = ["name", "url", "imageRefs"];
pub const GEO_FIELD: &str = "location";

#[derive(Debug, Error)]
#[error("search on {catalog} failed: {source}")]
pub struct QueryError {
    pub catalog: String,
    #[source]
    pub source: BackendError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub score: f64,
    pub record: Record,
}

/// Ranked hits, best first, at most [`MAX_RESULTS`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedResult {
    pub hits: Vec<SearchHit>,
}

impl RankedResult {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.hits.iter().map(|hit| &hit.record)
    }

    pub fn into_records(self) -> Vec<Record> {
        self.hits.into_iter().map(|hit| hit.record).collect()
    }
}

/// Text relevance multiplied by distance decay around the query origin.
#[derive(Clone)]
pub struct RankingEngine {
    store: Arc<dyn DocumentStore>,
    decay: GeoDecay,
}

impl RankingEngine {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_decay(store, GeoDecay::default())
    }

    pub fn with_decay(store: Arc<dyn DocumentStore>, decay: GeoDecay) -> Self {
        Self { store, decay }
    }

    pub fn search(&self, catalog: &str, query: &SearchQuery) -> Result<RankedResult, QueryError> {
        debug!(
            catalog,
            term = %query.search_term,
            lat = query.origin.lat,
            lon = query.origin.lon,
            "search_start"
        );
        let request = ScoredSearch {
            text: &query.search_term,
            fields: &SEARCH_FIELDS,
            geo_field: GEO_FIELD,
            origin: query.origin,
            decay: self.decay,
            size: MAX_RESULTS,
        };
        let hits = self
            .store
            .search(catalog, &request)
            .map_err(|source| QueryError {
                catalog: catalog.to_string(),
                source,
            })?;

        let result = rank(
            hits.into_iter()
                .map(|hit| SearchHit {
                    score: hit.score,
                    record: hit.record,
                })
                .collect(),
        );
        info!(
            catalog,
            backend = self.store.backend_name(),
            hits = result.len(),
            "search_complete"
        );
        Ok(result)
    }
}

/// Order by descending score and cap at [`MAX_RESULTS`]. A far-away match may
/// carry a decayed score of zero; it stays in the result.
/// Stable, so hits whose scores underflowed to the same value keep the
/// backend's order.
fn rank(mut hits: Vec<SearchHit>) -> RankedResult {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(MAX_RESULTS);
    RankedResult { hits }
}
