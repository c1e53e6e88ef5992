use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{
    FAST, Field, IndexRecordOption, STORED, STRING, Schema, TextFieldIndexing, TextOptions, Type,
    Value,
};
use tantivy::{DocId, Index, IndexReader, IndexWriter, ReloadPolicy, Score, SegmentReader, Term};
use tantivy::{TantivyDocument, doc};
use tracing::{debug, info};

use super::{
    Analyzer, BackendError, BulkDoc, BulkFailure, BulkResponse, DocumentStore, FieldKind,
    IndexMapping, ScoredHit, ScoredSearch,
};
use crate::model::{Location, Record};

const ID_FIELD: &str = "_id";
const SOURCE_FIELD: &str = "_source";
const LAT_SUFFIX: &str = "_lat";
const LON_SUFFIX: &str = "_lon";
const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Clone)]
pub struct Fields {
    pub id: Field,
    pub source: Field,
    /// Name of the geo point field when the mapping declared one.
    pub geo: Option<String>,
    pub lat: Option<Field>,
    pub lon: Option<Field>,
    pub text: Vec<(String, Field)>,
}

/// One opened catalog index with its single writer and a manually reloaded reader.
struct CatalogIndex {
    index: Index,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
    fields: Fields,
}

impl CatalogIndex {
    fn from_index(index: Index) -> Result<Self, BackendError> {
        let fields = fields_from_schema(&index.schema())?;
        let writer = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            index,
            writer: Mutex::new(writer),
            reader,
            fields,
        })
    }
}

/// Embedded document store backed by Tantivy.
///
/// With a root directory every index lives in `<root>/<index>/` and survives
/// restarts, so a process started with `--no-replace-index` serves whatever
/// the last rebuild left behind. Without one, indexes live in RAM and vanish
/// with the store.
pub struct TantivyStore {
    root: Option<PathBuf>,
    indexes: RwLock<HashMap<String, Arc<CatalogIndex>>>,
}

impl std::fmt::Debug for TantivyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut open: Vec<String> = self.indexes.read().keys().cloned().collect();
        open.sort_unstable();
        f.debug_struct("TantivyStore")
            .field("root", &self.root)
            .field("open_indexes", &open)
            .finish()
    }
}

impl TantivyStore {
    pub fn in_memory() -> Self {
        Self {
            root: None,
            indexes: RwLock::new(HashMap::new()),
        }
    }

    pub fn open(root: &Path) -> Result<Self, BackendError> {
        fs::create_dir_all(root)?;
        info!(root = %root.display(), "opened embedded document store");
        Ok(Self {
            root: Some(root.to_path_buf()),
            indexes: RwLock::new(HashMap::new()),
        })
    }

    fn index_dir(&self, index: &str) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(index))
    }

    fn on_disk(&self, index: &str) -> bool {
        self.index_dir(index)
            .is_some_and(|dir| dir.join("meta.json").exists())
    }

    fn get(&self, index: &str) -> Result<Arc<CatalogIndex>, BackendError> {
        validate_index_name(index)?;
        if let Some(found) = self.indexes.read().get(index) {
            return Ok(found.clone());
        }
        let mut indexes = self.indexes.write();
        if let Some(found) = indexes.get(index) {
            return Ok(found.clone());
        }
        let dir = match self.index_dir(index) {
            Some(dir) if dir.join("meta.json").exists() => dir,
            _ => return Err(BackendError::IndexNotFound(index.to_string())),
        };
        let opened = Arc::new(CatalogIndex::from_index(Index::open_in_dir(&dir)?)?);
        debug!(index, dir = %dir.display(), "opened existing index");
        indexes.insert(index.to_string(), opened.clone());
        Ok(opened)
    }
}

impl DocumentStore for TantivyStore {
    fn backend_name(&self) -> &'static str {
        "tantivy"
    }

    fn ping(&self) -> Result<(), BackendError> {
        match &self.root {
            Some(root) if !root.is_dir() => Err(BackendError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("store root {} is missing", root.display()),
            ))),
            _ => Ok(()),
        }
    }

    fn index_exists(&self, index: &str) -> Result<bool, BackendError> {
        validate_index_name(index)?;
        Ok(self.indexes.read().contains_key(index) || self.on_disk(index))
    }

    fn delete_index(&self, index: &str) -> Result<bool, BackendError> {
        validate_index_name(index)?;
        let cached = self.indexes.write().remove(index);
        let on_disk = self.on_disk(index);
        if cached.is_none() && !on_disk {
            return Err(BackendError::IndexNotFound(index.to_string()));
        }
        // Release the writer lock before the files go away.
        drop(cached);
        if let Some(dir) = self.index_dir(index)
            && dir.exists()
        {
            fs::remove_dir_all(&dir)?;
        }
        debug!(index, "deleted index");
        Ok(true)
    }

    fn create_index(&self, index: &str, mapping: &IndexMapping) -> Result<bool, BackendError> {
        validate_index_name(index)?;
        let mut indexes = self.indexes.write();
        if indexes.contains_key(index) || self.on_disk(index) {
            return Err(BackendError::IndexAlreadyExists(index.to_string()));
        }
        let schema = build_schema(mapping);
        let created = match self.index_dir(index) {
            Some(dir) => {
                if dir.exists() {
                    fs::remove_dir_all(&dir)?;
                }
                fs::create_dir_all(&dir)?;
                Index::create_in_dir(&dir, schema)?
            }
            None => Index::create_in_ram(schema),
        };
        indexes.insert(
            index.to_string(),
            Arc::new(CatalogIndex::from_index(created)?),
        );
        debug!(index, "created index");
        Ok(true)
    }

    fn bulk_upsert(&self, index: &str, docs: &[BulkDoc<'_>]) -> Result<BulkResponse, BackendError> {
        let catalog = self.get(index)?;
        let fields = &catalog.fields;
        let writer = catalog.writer.lock();
        let mut response = BulkResponse {
            total: docs.len(),
            failures: Vec::new(),
        };

        for bulk_doc in docs {
            match to_document(fields, bulk_doc) {
                Ok(document) => {
                    writer.delete_term(Term::from_field_text(fields.id, bulk_doc.id));
                    if let Err(e) = writer.add_document(document) {
                        response.failures.push(BulkFailure {
                            id: bulk_doc.id.to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
                Err(reason) => response.failures.push(BulkFailure {
                    id: bulk_doc.id.to_string(),
                    reason,
                }),
            }
        }
        Ok(response)
    }

    fn refresh(&self, index: &str) -> Result<(), BackendError> {
        let catalog = self.get(index)?;
        catalog.writer.lock().commit()?;
        catalog.reader.reload()?;
        Ok(())
    }

    fn search(
        &self,
        index: &str,
        request: &ScoredSearch<'_>,
    ) -> Result<Vec<ScoredHit>, BackendError> {
        let catalog = self.get(index)?;
        let fields = &catalog.fields;
        let searcher = catalog.reader.searcher();

        let default_fields = request
            .fields
            .iter()
            .map(|name| {
                fields
                    .text
                    .iter()
                    .find(|(field_name, _)| field_name == name)
                    .map(|(_, field)| *field)
                    .ok_or_else(|| BackendError::InvalidQuery {
                        query: request.text.to_string(),
                        reason: format!("unknown text field {name}"),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let parser = QueryParser::for_index(&catalog.index, default_fields);
        // Free text from the gateway: unbalanced syntax degrades, never fails.
        let (query, parse_errors) = parser.parse_query_lenient(request.text);
        if !parse_errors.is_empty() {
            debug!(
                index,
                text = request.text,
                errors = parse_errors.len(),
                "search text parsed leniently"
            );
        }

        let lat_column = format!("{}{LAT_SUFFIX}", request.geo_field);
        let lon_column = format!("{}{LON_SUFFIX}", request.geo_field);
        let origin = request.origin;
        let decay = request.decay;
        let collector = TopDocs::with_limit(request.size.max(1)).tweak_score(
            move |segment_reader: &SegmentReader| {
                let fast = segment_reader.fast_fields();
                let lat = fast.f64(&lat_column).ok();
                let lon = fast.f64(&lon_column).ok();
                move |doc: DocId, score: Score| {
                    let point = match (&lat, &lon) {
                        (Some(lat), Some(lon)) => lat.first(doc).zip(lon.first(doc)),
                        _ => None,
                    };
                    // Documents without a location keep their text score.
                    let log_weight = point.map_or(0.0, |(lat, lon)| {
                        decay.log_weight_between(origin, Location::new(lat, lon))
                    });
                    // Rank on ln(text * weight) so far matches keep their text
                    // order after the weight itself underflows.
                    f64::from(score.max(f32::MIN_POSITIVE)).ln() + log_weight
                }
            },
        );

        let top_docs = searcher.search(&*query, &collector)?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (log_score, addr) in top_docs {
            let score = log_score.exp();
            let doc: TantivyDocument = searcher.doc(addr)?;
            let id = doc
                .get_first(fields.id)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let source = doc
                .get_first(fields.source)
                .and_then(|v| v.as_str())
                .unwrap_or("{}");
            let record: Record = serde_json::from_str(source)?;
            hits.push(ScoredHit { id, score, record });
        }
        if request.size == 0 {
            hits.clear();
        }
        Ok(hits)
    }
}

/// Tantivy schema for a mapping: every text field gets its analyzer, a geo
/// point becomes two fast `f64` columns, and the original document is kept in
/// a stored `_source` field.
pub fn build_schema(mapping: &IndexMapping) -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_text_field(ID_FIELD, STRING | STORED);
    schema_builder.add_text_field(SOURCE_FIELD, STORED);
    for field in &mapping.fields {
        match field.kind {
            FieldKind::Text(analyzer) => {
                let tokenizer = match analyzer {
                    Analyzer::English => "en_stem",
                    Analyzer::Standard => "default",
                };
                let indexing = TextFieldIndexing::default()
                    .set_tokenizer(tokenizer)
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions);
                schema_builder.add_text_field(
                    field.name,
                    TextOptions::default().set_indexing_options(indexing),
                );
            }
            FieldKind::GeoPoint => {
                schema_builder.add_f64_field(&format!("{}{LAT_SUFFIX}", field.name), FAST);
                schema_builder.add_f64_field(&format!("{}{LON_SUFFIX}", field.name), FAST);
            }
        }
    }
    schema_builder.build()
}

pub fn fields_from_schema(schema: &Schema) -> Result<Fields, BackendError> {
    let id = schema.get_field(ID_FIELD)?;
    let source = schema.get_field(SOURCE_FIELD)?;

    let mut text = Vec::new();
    let mut geo = None;
    for (field, entry) in schema.fields() {
        let name = entry.name();
        if name == ID_FIELD || name == SOURCE_FIELD {
            continue;
        }
        if entry.field_type().is_indexed() && entry.field_type().value_type() == Type::Str {
            text.push((name.to_string(), field));
        } else if let Some(prefix) = name.strip_suffix(LAT_SUFFIX) {
            geo = Some(prefix.to_string());
        }
    }

    let (lat, lon) = match &geo {
        Some(prefix) => (
            Some(schema.get_field(&format!("{prefix}{LAT_SUFFIX}"))?),
            Some(schema.get_field(&format!("{prefix}{LON_SUFFIX}"))?),
        ),
        None => (None, None),
    };

    Ok(Fields {
        id,
        source,
        geo,
        lat,
        lon,
        text,
    })
}

/// Index names become directory names, so keep them to one plain path segment.
fn validate_index_name(index: &str) -> Result<(), BackendError> {
    let valid = !index.is_empty()
        && !index.starts_with('.')
        && index
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(BackendError::InvalidIndexName(index.to_string()))
    }
}

/// Convert a record into a Tantivy document, or explain why it is rejected.
fn to_document(fields: &Fields, bulk_doc: &BulkDoc<'_>) -> Result<TantivyDocument, String> {
    let source = serde_json::to_value(bulk_doc.record).map_err(|e| e.to_string())?;
    let mut document = doc!(
        fields.id => bulk_doc.id,
        fields.source => source.to_string(),
    );

    for (name, field) in &fields.text {
        match source.get(name) {
            Some(JsonValue::String(text)) => document.add_text(*field, text),
            Some(JsonValue::Array(items)) => {
                for text in items.iter().filter_map(JsonValue::as_str) {
                    document.add_text(*field, text);
                }
            }
            _ => {}
        }
    }

    if let (Some(geo), Some(lat_field), Some(lon_field)) = (&fields.geo, fields.lat, fields.lon) {
        let location = bulk_doc.record.location;
        if !location.is_valid() {
            return Err(format!(
                "failed to parse field [{geo}] of type [geo_point]: \
                 illegal latitude/longitude {}, {}",
                location.lat, location.lon
            ));
        }
        document.add_f64(lat_field, location.lat);
        document.add_f64(lon_field, location.lon);
    }

    Ok(document)
}
