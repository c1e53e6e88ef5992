//! Document store layer.
//!
//! The catalog and the ranking engine talk to a search backend through the
//! [`DocumentStore`] trait, a narrow slice of what a document search server
//! offers: index existence, create/delete with acknowledgement, bulk upsert
//! by caller-supplied id, an explicit refresh, and one scored query shape.
//!
//! - **[`tantivy`]**: embedded backend (on-disk or in-memory Tantivy indexes).
//! - **[`elastic`]**: Elasticsearch REST backend.

pub mod elastic;
pub mod tantivy;

use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::model::{Location, Record};
use crate::search::decay::GeoDecay;

pub use self::elastic::{ElasticConfig, ElasticStore};
pub use self::tantivy::TantivyStore;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("index {0} not found")]
    IndexNotFound(String),
    #[error("index {0} already exists")]
    IndexAlreadyExists(String),
    #[error("invalid index name {0:?}")]
    InvalidIndexName(String),
    #[error("invalid query {query:?}: {reason}")]
    InvalidQuery { query: String, reason: String },
    #[error("index error: {0}")]
    Tantivy(#[from] ::tantivy::TantivyError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{method} {path} returned {status}: {body}")]
    Status {
        method: String,
        path: String,
        status: u16,
        body: String,
    },
    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store unavailable after {attempts} attempts: {last}")]
    Unavailable {
        attempts: u32,
        last: Box<BackendError>,
    },
}

/// How a text field is analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Analyzer {
    /// Lowercased, stemmed English.
    English,
    /// Lowercased words, no stemming.
    Standard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text(Analyzer),
    GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Field mapping declared when an index is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMapping {
    pub fields: Vec<FieldMapping>,
}

impl IndexMapping {
    pub fn text_fields(&self) -> impl Iterator<Item = (&'static str, Analyzer)> + '_ {
        self.fields.iter().filter_map(|f| match f.kind {
            FieldKind::Text(analyzer) => Some((f.name, analyzer)),
            FieldKind::GeoPoint => None,
        })
    }

    pub fn geo_field(&self) -> Option<&'static str> {
        self.fields
            .iter()
            .find(|f| f.kind == FieldKind::GeoPoint)
            .map(|f| f.name)
    }
}

/// One document in a bulk request.
#[derive(Debug, Clone, Copy)]
pub struct BulkDoc<'a> {
    pub id: &'a str,
    pub record: &'a Record,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkFailure {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkResponse {
    pub total: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkResponse {
    pub fn has_errors(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// A text query re-ranked by gaussian decay around `origin`.
#[derive(Debug, Clone, Copy)]
pub struct ScoredSearch<'a> {
    pub text: &'a str,
    pub fields: &'a [&'a str],
    pub geo_field: &'a str,
    pub origin: Location,
    pub decay: GeoDecay,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredHit {
    pub id: String,
    pub score: f64,
    pub record: Record,
}

/// Backend operations the catalog and ranking layers rely on.
///
/// Writes are not visible to [`DocumentStore::search`] until
/// [`DocumentStore::refresh`] returns.
pub trait DocumentStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Cheap liveness probe used while connecting.
    fn ping(&self) -> Result<(), BackendError>;

    fn index_exists(&self, index: &str) -> Result<bool, BackendError>;

    /// Returns whether the store acknowledged the deletion.
    fn delete_index(&self, index: &str) -> Result<bool, BackendError>;

    /// Returns whether the store acknowledged the creation.
    fn create_index(&self, index: &str, mapping: &IndexMapping) -> Result<bool, BackendError>;

    /// Index or overwrite each document under its id. Per-document rejections
    /// are reported in the response, not as `Err`.
    fn bulk_upsert(&self, index: &str, docs: &[BulkDoc<'_>]) -> Result<BulkResponse, BackendError>;

    fn refresh(&self, index: &str) -> Result<(), BackendError>;

    /// Matching documents by descending composite score, at most `request.size`.
    fn search(&self, index: &str, request: &ScoredSearch<'_>)
    -> Result<Vec<ScoredHit>, BackendError>;
}

/// Bounded, fixed-delay retry for the startup handshake.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(1),
        }
    }
}

/// Build a store and wait until it answers a ping.
///
/// `connect` is invoked again for every attempt, so a constructor that fails
/// (bad TLS setup, DNS not ready yet) is retried the same way as a failed ping.
pub fn connect_with_retry<S, F>(policy: RetryPolicy, mut connect: F) -> Result<S, BackendError>
where
    S: DocumentStore,
    F: FnMut() -> Result<S, BackendError>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match connect().and_then(|store| store.ping().map(|()| store)) {
            Ok(store) => {
                info!(backend = store.backend_name(), attempt, "document store ready");
                return Ok(store);
            }
            Err(e) if attempt < attempts => {
                warn!(
                    attempt,
                    attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %e,
                    "document store not ready, retrying"
                );
                thread::sleep(policy.delay);
                attempt += 1;
            }
            Err(e) => {
                return Err(BackendError::Unavailable {
                    attempts,
                    last: Box::new(e),
                });
            }
        }
    }
}
