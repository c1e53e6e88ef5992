//! HTTP query gateway.
//!
//! A single endpoint:
//!
//! ```text
//! GET /search?searchTerm=<text>&lat=<float>&lng=<float>
//! ```
//!
//! Every request, whatever its method or path, goes through [`validate`], so a
//! `POST /elsewhere` is a 405 rather than a 404. Error responses carry no body.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::model::{Location, SearchQuery};
use crate::search::RankingEngine;

pub const SEARCH_PATH: &str = "/search";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ValidationError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        self.status().into_response()
    }
}

/// Turn a raw request into a [`SearchQuery`].
///
/// Checks run in order: method, path, `searchTerm`, `lat`, `lng`.
pub fn validate(
    method: &Method,
    path: &str,
    params: &HashMap<String, String>,
) -> Result<SearchQuery, ValidationError> {
    if method != Method::GET {
        return Err(ValidationError::MethodNotAllowed);
    }
    if path != SEARCH_PATH {
        return Err(ValidationError::NotFound);
    }

    let term = params
        .get("searchTerm")
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ValidationError::BadRequest("searchTerm is required".to_string()))?;
    let lat = coordinate(params, "lat")?;
    let lng = coordinate(params, "lng")?;

    let origin = Location::new(lat, lng);
    if !origin.is_valid() {
        return Err(ValidationError::BadRequest(format!(
            "coordinates out of range: {lat},{lng}"
        )));
    }
    Ok(SearchQuery::new(term, origin))
}

fn coordinate(params: &HashMap<String, String>, name: &str) -> Result<f64, ValidationError> {
    let raw = params
        .get(name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ValidationError::BadRequest(format!("{name} is required")))?;
    raw.parse::<f64>()
        .map_err(|_| ValidationError::BadRequest(format!("{name} is not a number: {raw:?}")))
}

/// Shared by every request.
pub struct AppState {
    pub engine: RankingEngine,
    pub catalog: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_request(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    params: Result<Query<HashMap<String, String>>, QueryRejection>,
) -> Response {
    // Undecodable query strings are judged like missing parameters.
    let params = params.map(|Query(p)| p).unwrap_or_default();
    let query = match validate(&method, uri.path(), &params) {
        Ok(query) => query,
        Err(e) => {
            debug!(%method, path = uri.path(), error = %e, "rejected request");
            return e.into_response();
        }
    };

    let task_state = state.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        task_state.engine.search(&task_state.catalog, &query)
    })
    .await;

    match outcome {
        Ok(Ok(result)) => Json(result.into_records()).into_response(),
        Ok(Err(e)) => {
            error!(catalog = %state.catalog, error = %e, "search failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            error!(error = %e, "search task aborted");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, catalog = %state.catalog, "listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn good() -> HashMap<String, String> {
        params(&[("searchTerm", "camera"), ("lat", "51.5"), ("lng", "-0.12")])
    }

    #[test]
    fn accepts_well_formed_search() {
        let query = validate(&Method::GET, "/search", &good()).unwrap();
        assert_eq!(query.search_term, "camera");
        assert_eq!(query.origin, Location::new(51.5, -0.12));
    }

    #[test]
    fn method_is_checked_before_path() {
        assert_eq!(
            validate(&Method::POST, "/elsewhere", &good()),
            Err(ValidationError::MethodNotAllowed)
        );
        assert_eq!(
            validate(&Method::GET, "/elsewhere", &good()),
            Err(ValidationError::NotFound)
        );
        assert_eq!(
            validate(&Method::GET, "/search/", &good()),
            Err(ValidationError::NotFound)
        );
    }

    #[test]
    fn search_term_must_be_non_blank() {
        for term in ["", "   "] {
            let mut p = good();
            p.insert("searchTerm".into(), term.into());
            let err = validate(&Method::GET, "/search", &p).unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        }
        let mut p = good();
        p.remove("searchTerm");
        assert!(validate(&Method::GET, "/search", &p).is_err());
    }

    #[test]
    fn coordinates_must_be_present_numeric_and_in_range() {
        let cases = [
            ("lat", ""),
            ("lat", "north"),
            ("lng", ""),
            ("lng", "1,5"),
            ("lat", "NaN"),
            ("lng", "inf"),
            ("lat", "90.5"),
            ("lng", "-180.01"),
        ];
        for (key, value) in cases {
            let mut p = good();
            p.insert(key.into(), value.into());
            let err = validate(&Method::GET, "/search", &p).unwrap_err();
            assert!(
                matches!(err, ValidationError::BadRequest(_)),
                "{key}={value}: {err:?}"
            );
        }
    }

    #[test]
    fn boundary_coordinates_are_accepted() {
        let p = params(&[("searchTerm", "x"), ("lat", "-90"), ("lng", "180")]);
        assert!(validate(&Method::GET, "/search", &p).is_ok());
    }

    #[test]
    fn statuses_map_to_http_codes() {
        assert_eq!(ValidationError::MethodNotAllowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(ValidationError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ValidationError::BadRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
