//! Catalog store: the fixed item mapping and the replace protocol.
//!
//! A catalog is one named index. It is never patched in place; [`CatalogStore::replace`]
//! drops whatever is there, recreates the index with [`catalog_schema`], loads the
//! new record set and refreshes so the next query sees all of it.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::Record;
use crate::storage::{
    Analyzer, BackendError, BulkDoc, DocumentStore, FieldKind, FieldMapping, IndexMapping,
};

pub const DEFAULT_CATALOG: &str = "item";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("deletion of catalog {catalog} was not acknowledged")]
    DeleteNotAcknowledged { catalog: String },
    #[error("creation of catalog {catalog} was not acknowledged")]
    CreateNotAcknowledged { catalog: String },
    #[error("bulk insert into {catalog} rejected {failed} of {total} records: {reason}")]
    BulkInsert {
        catalog: String,
        failed: usize,
        total: usize,
        reason: String,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Outcome of a successful replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceAck {
    pub catalog: String,
    pub documents: usize,
}

/// Field mapping shared by every catalog.
pub fn catalog_schema() -> IndexMapping {
    IndexMapping {
        fields: vec![
            FieldMapping {
                name: "name",
                kind: FieldKind::Text(Analyzer::English),
            },
            FieldMapping {
                name: "location",
                kind: FieldKind::GeoPoint,
            },
            FieldMapping {
                name: "url",
                kind: FieldKind::Text(Analyzer::English),
            },
            FieldMapping {
                name: "imageRefs",
                kind: FieldKind::Text(Analyzer::Standard),
            },
        ],
    }
}

#[derive(Clone)]
pub struct CatalogStore {
    store: Arc<dyn DocumentStore>,
}

impl CatalogStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Swap the contents of `catalog` for `records`.
    ///
    /// Not safe to run concurrently against the same catalog. On error the
    /// catalog is left in whatever state the failing step produced.
    pub fn replace(&self, catalog: &str, records: &[Record]) -> Result<ReplaceAck, StoreError> {
        if self.store.index_exists(catalog)? {
            debug!(catalog, "dropping existing catalog");
            if !self.store.delete_index(catalog)? {
                return Err(StoreError::DeleteNotAcknowledged {
                    catalog: catalog.to_string(),
                });
            }
        }

        if !self.store.create_index(catalog, &catalog_schema())? {
            return Err(StoreError::CreateNotAcknowledged {
                catalog: catalog.to_string(),
            });
        }

        // Ids are positional and only meaningful within this pass.
        let ids: Vec<String> = (0..records.len()).map(|i| i.to_string()).collect();
        let docs: Vec<BulkDoc<'_>> = ids
            .iter()
            .zip(records)
            .map(|(id, record)| BulkDoc { id, record })
            .collect();

        let response = self.store.bulk_upsert(catalog, &docs)?;
        if let Some(first) = response.failures.first() {
            return Err(StoreError::BulkInsert {
                catalog: catalog.to_string(),
                failed: response.failures.len(),
                total: response.total,
                reason: format!("document {}: {}", first.id, first.reason),
            });
        }

        self.store.refresh(catalog)?;
        info!(
            catalog,
            documents = records.len(),
            backend = self.store.backend_name(),
            "catalog replaced"
        );
        Ok(ReplaceAck {
            catalog: catalog.to_string(),
            documents: records.len(),
        })
    }

    /// Best-effort teardown. Failures are logged, never returned.
    pub fn delete_catalog(&self, catalog: &str) {
        match self.store.delete_index(catalog) {
            Ok(true) => info!(catalog, "catalog deleted"),
            Ok(false) => warn!(catalog, "catalog deletion not acknowledged"),
            Err(e) => warn!(catalog, error = %e, "failed to delete catalog"),
        }
    }
}
