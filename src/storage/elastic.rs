//! Elasticsearch REST backend.
//!
//! Uses the blocking `reqwest` client; every call maps onto one REST request:
//!
//! | operation      | request                      |
//! |----------------|------------------------------|
//! | `ping`         | `GET /`                      |
//! | `index_exists` | `HEAD /{index}`              |
//! | `delete_index` | `DELETE /{index}`            |
//! | `create_index` | `PUT /{index}` with mappings |
//! | `bulk_upsert`  | `POST /_bulk` (NDJSON)       |
//! | `refresh`      | `POST /{index}/_refresh`     |
//! | `search`       | `POST /{index}/_search`      |

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Method;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{
    Analyzer, BackendError, BulkDoc, BulkFailure, BulkResponse, DocumentStore, FieldKind,
    IndexMapping, ScoredHit, ScoredSearch,
};
use crate::model::Record;

const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone)]
pub struct ElasticConfig {
    /// Base URL of the cluster, e.g. `http://elasticsearch:9200`.
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub request_timeout: Duration,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            url: "http://elasticsearch:9200".to_string(),
            user: Some("elastic".to_string()),
            password: Some("changeme".to_string()),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ElasticStore {
    client: Client,
    config: ElasticConfig,
}

impl ElasticStore {
    pub fn new(config: ElasticConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("geo-item-search/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.url.trim_end_matches('/'), path);
        let builder = self.client.request(method, url);
        match &self.config.user {
            Some(user) => builder.basic_auth(user, self.config.password.as_deref()),
            None => builder,
        }
    }

    fn send(
        &self,
        method: Method,
        path: &str,
        builder: RequestBuilder,
    ) -> Result<Response, BackendError> {
        let response = builder.send()?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body: String = response
            .text()
            .unwrap_or_default()
            .chars()
            .take(ERROR_BODY_LIMIT)
            .collect();
        Err(BackendError::Status {
            method: method.to_string(),
            path: path.to_string(),
            status,
            body,
        })
    }

    fn acknowledged(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<bool, BackendError> {
        let mut builder = self.request(method.clone(), path);
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let ack: Acknowledged = self.send(method, path, builder)?.json()?;
        Ok(ack.acknowledged)
    }
}

#[derive(Debug, Deserialize)]
struct Acknowledged {
    #[serde(default)]
    acknowledged: bool,
}

#[derive(Debug, Deserialize)]
struct BulkApiResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkApiItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkApiItem {
    #[serde(rename = "_id", default)]
    id: String,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SearchApiResponse {
    hits: SearchApiHits,
}

#[derive(Debug, Deserialize)]
struct SearchApiHits {
    hits: Vec<SearchApiHit>,
}

#[derive(Debug, Deserialize)]
struct SearchApiHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: Option<f64>,
    #[serde(rename = "_source")]
    source: Record,
}

impl DocumentStore for ElasticStore {
    fn backend_name(&self) -> &'static str {
        "elasticsearch"
    }

    fn ping(&self) -> Result<(), BackendError> {
        self.send(Method::GET, "/", self.request(Method::GET, "/"))?;
        Ok(())
    }

    fn index_exists(&self, index: &str) -> Result<bool, BackendError> {
        let path = format!("/{index}");
        let response = self.request(Method::HEAD, &path).send()?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(BackendError::Status {
                method: "HEAD".to_string(),
                path,
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }

    fn delete_index(&self, index: &str) -> Result<bool, BackendError> {
        let path = format!("/{index}");
        match self.acknowledged(Method::DELETE, &path, None) {
            Err(BackendError::Status { status: 404, .. }) => {
                Err(BackendError::IndexNotFound(index.to_string()))
            }
            other => other,
        }
    }

    fn create_index(&self, index: &str, mapping: &IndexMapping) -> Result<bool, BackendError> {
        let path = format!("/{index}");
        self.acknowledged(Method::PUT, &path, Some(mapping_body(mapping)))
    }

    fn bulk_upsert(&self, index: &str, docs: &[BulkDoc<'_>]) -> Result<BulkResponse, BackendError> {
        if docs.is_empty() {
            return Ok(BulkResponse::default());
        }
        let body = bulk_body(index, docs)?;
        let builder = self
            .request(Method::POST, "/_bulk")
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        let parsed: BulkApiResponse = self.send(Method::POST, "/_bulk", builder)?.json()?;
        let response = bulk_response(docs.len(), parsed);
        debug!(index, total = response.total, failed = response.failures.len(), "bulk upsert");
        Ok(response)
    }

    fn refresh(&self, index: &str) -> Result<(), BackendError> {
        let path = format!("/{index}/_refresh");
        self.send(Method::POST, &path, self.request(Method::POST, &path))?;
        Ok(())
    }

    fn search(
        &self,
        index: &str,
        request: &ScoredSearch<'_>,
    ) -> Result<Vec<ScoredHit>, BackendError> {
        let path = format!("/{index}/_search");
        let builder = self.request(Method::POST, &path).json(&search_body(request));
        let parsed: SearchApiResponse = match self.send(Method::POST, &path, builder) {
            Ok(response) => response.json()?,
            Err(BackendError::Status { status: 404, .. }) => {
                return Err(BackendError::IndexNotFound(index.to_string()));
            }
            Err(e) => return Err(e),
        };
        Ok(parsed
            .hits
            .hits
            .into_iter()
            .map(|hit| ScoredHit {
                id: hit.id,
                score: hit.score.unwrap_or(0.0),
                record: hit.source,
            })
            .collect())
    }
}

/// `PUT /{index}` body for a mapping.
pub fn mapping_body(mapping: &IndexMapping) -> Value {
    let properties: serde_json::Map<String, Value> = mapping
        .fields
        .iter()
        .map(|field| {
            let property = match field.kind {
                FieldKind::Text(Analyzer::English) => {
                    json!({"type": "text", "analyzer": "english"})
                }
                FieldKind::Text(Analyzer::Standard) => json!({"type": "text"}),
                FieldKind::GeoPoint => json!({"type": "geo_point"}),
            };
            (field.name.to_string(), property)
        })
        .collect();
    json!({ "mappings": { "properties": properties } })
}

/// NDJSON body for `POST /_bulk`: an `index` action line followed by the source line.
pub fn bulk_body(index: &str, docs: &[BulkDoc<'_>]) -> Result<String, serde_json::Error> {
    let mut body = String::new();
    for doc in docs {
        let action = json!({ "index": { "_index": index, "_id": doc.id } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(doc.record)?);
        body.push('\n');
    }
    Ok(body)
}

/// `function_score` query multiplying the text score by a gauss decay on the geo field.
pub fn search_body(request: &ScoredSearch<'_>) -> Value {
    let mut gauss = serde_json::Map::new();
    gauss.insert(
        request.geo_field.to_string(),
        json!({
            "origin": { "lat": request.origin.lat, "lon": request.origin.lon },
            "offset": format!("{}m", request.decay.offset_m),
            "scale": format!("{}m", request.decay.scale_m),
            "decay": request.decay.decay,
        }),
    );
    json!({
        "from": 0,
        "size": request.size,
        "query": {
            "function_score": {
                "query": {
                    "query_string": {
                        "query": request.text,
                        "fields": request.fields,
                    }
                },
                "functions": [ { "gauss": gauss } ],
                "score_mode": "multiply",
                "boost_mode": "multiply",
            }
        }
    })
}

fn bulk_response(total: usize, parsed: BulkApiResponse) -> BulkResponse {
    let mut failures: Vec<BulkFailure> = parsed
        .items
        .into_iter()
        .flat_map(|item| item.into_values())
        .filter_map(|item| {
            item.error.map(|error| BulkFailure {
                id: item.id,
                reason: error
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            })
        })
        .collect();
    if parsed.errors && failures.is_empty() {
        failures.push(BulkFailure {
            id: String::new(),
            reason: "bulk request reported errors".to_string(),
        });
    }
    BulkResponse { total, failures }
}
