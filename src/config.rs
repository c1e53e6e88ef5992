//! Runtime configuration.
//!
//! Flags on the command line win; the knobs that have no flag are read from the
//! environment (a `.env` file is loaded first by the binary).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

use crate::catalog::DEFAULT_CATALOG;
use crate::search::decay::GeoDecay;
use crate::storage::{ElasticConfig, RetryPolicy};

/// Which document store backs the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Tantivy indexes under the data directory.
    Embedded,
    /// A remote Elasticsearch cluster.
    Elasticsearch,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: BackendKind,
    /// Root for embedded indexes.
    pub data_dir: PathBuf,
    pub elastic: ElasticConfig,
    pub catalog: String,
    pub retry: RetryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Embedded,
            data_dir: crate::default_data_dir(),
            elastic: ElasticConfig::default(),
            catalog: DEFAULT_CATALOG.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Defaults plus the environment-only knobs.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(val) = dotenvy::var("GEO_SEARCH_ES_TIMEOUT_SECS")
            && let Ok(secs) = val.parse()
        {
            cfg.elastic.request_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = dotenvy::var("GEO_SEARCH_CONNECT_ATTEMPTS")
            && let Ok(n) = val.parse()
        {
            cfg.retry.attempts = n;
        }

        if let Ok(val) = dotenvy::var("GEO_SEARCH_CONNECT_DELAY_MS")
            && let Ok(ms) = val.parse()
        {
            cfg.retry.delay = Duration::from_millis(ms);
        }

        cfg
    }
}

#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub listen: SocketAddr,
    pub dump: PathBuf,
    /// Rebuild the catalog from `dump` before accepting requests.
    pub replace_on_start: bool,
    pub decay: GeoDecay,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            dump: PathBuf::from("dump.csv"),
            replace_on_start: true,
            decay: GeoDecay::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let store = StoreConfig::default();
        assert_eq!(store.backend, BackendKind::Embedded);
        assert_eq!(store.catalog, "item");
        assert_eq!(store.elastic.url, "http://elasticsearch:9200");
        assert_eq!(store.elastic.request_timeout, Duration::from_secs(30));
        assert_eq!(store.retry.attempts, 10);

        let serve = ServeConfig::default();
        assert_eq!(serve.listen.port(), 8080);
        assert_eq!(serve.dump, PathBuf::from("dump.csv"));
        assert!(serve.replace_on_start);
        assert_eq!(serve.decay, GeoDecay::from_km(5.0, 10.0));
    }
}
