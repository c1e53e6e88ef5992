pub mod catalog;
pub mod config;
pub mod gateway;
pub mod ingest;
pub mod model;
pub mod search;
pub mod storage;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::info;

use catalog::CatalogStore;
use config::{BackendKind, ServeConfig, StoreConfig};
use gateway::AppState;
use model::{Location, SearchQuery};
use search::{GeoDecay, RankingEngine};
use storage::{DocumentStore, ElasticStore, TantivyStore, connect_with_retry};

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "geo-item-search",
    version,
    about = "Geo-aware full-text search over an item catalog"
)]
pub struct Cli {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Document store holding the catalog
    #[arg(long, global = true, value_enum, env = "GEO_SEARCH_BACKEND", default_value = "embedded")]
    pub backend: BackendKind,

    /// Directory for embedded indexes (defaults to platform data dir)
    #[arg(long, global = true, env = "GEO_SEARCH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Elasticsearch base URL
    #[arg(
        long,
        global = true,
        env = "GEO_SEARCH_ES_URL",
        default_value = "http://elasticsearch:9200"
    )]
    pub es_url: String,

    /// Elasticsearch user (empty disables basic auth)
    #[arg(long, global = true, env = "GEO_SEARCH_ES_USER", default_value = "elastic")]
    pub es_user: String,

    #[arg(
        long,
        global = true,
        env = "GEO_SEARCH_ES_PASSWORD",
        default_value = "changeme",
        hide_env_values = true
    )]
    pub es_password: String,

    /// Catalog (index) name
    #[arg(
        long,
        global = true,
        env = "GEO_SEARCH_CATALOG",
        default_value = catalog::DEFAULT_CATALOG
    )]
    pub catalog: String,
}

impl StoreArgs {
    pub fn to_config(&self) -> StoreConfig {
        let mut cfg = StoreConfig::from_env();
        cfg.backend = self.backend;
        if let Some(dir) = &self.data_dir {
            cfg.data_dir = dir.clone();
        }
        cfg.elastic.url = self.es_url.clone();
        if self.es_user.is_empty() {
            cfg.elastic.user = None;
            cfg.elastic.password = None;
        } else {
            cfg.elastic.user = Some(self.es_user.clone());
            cfg.elastic.password = Some(self.es_password.clone());
        }
        cfg.catalog = self.catalog.clone();
        cfg
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rebuild the catalog from the dump, then serve HTTP search
    Serve {
        /// Address to listen on
        #[arg(long, env = "GEO_SEARCH_LISTEN", default_value = "0.0.0.0:8080")]
        listen: SocketAddr,

        /// Catalog dump to load on startup
        #[arg(long, env = "GEO_SEARCH_DUMP", default_value = "dump.csv")]
        dump: PathBuf,

        /// Serve the catalog as it is instead of rebuilding it
        #[arg(long)]
        no_replace_index: bool,

        #[command(flatten)]
        decay: DecayArgs,
    },
    /// Replace the catalog with the contents of a dump
    Replace {
        #[arg(long, env = "GEO_SEARCH_DUMP", default_value = "dump.csv")]
        dump: PathBuf,
    },
    /// Run one ranked query and print the matching records as JSON
    Search {
        /// Free-text search term
        term: String,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        #[command(flatten)]
        decay: DecayArgs,
    },
    /// Delete the catalog (best effort)
    Drop,
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct DecayArgs {
    /// Distance (km) within which results are not penalized
    #[arg(long, default_value_t = 5.0)]
    pub decay_offset_km: f64,

    /// Distance (km) past the offset at which the score is halved
    #[arg(long, default_value_t = 10.0)]
    pub decay_scale_km: f64,
}

impl DecayArgs {
    pub fn to_decay(self) -> Result<GeoDecay> {
        if !(self.decay_offset_km >= 0.0 && self.decay_scale_km > 0.0) {
            bail!(
                "decay offset must be >= 0 and scale > 0 (got {} km / {} km)",
                self.decay_offset_km,
                self.decay_scale_km
            );
        }
        Ok(GeoDecay::from_km(self.decay_offset_km, self.decay_scale_km))
    }
}

pub fn run() -> Result<()> {
    run_with(Cli::parse())
}

pub fn run_with(cli: Cli) -> Result<()> {
    let store_cfg = cli.store.to_config();

    match cli.command {
        Commands::Serve {
            listen,
            dump,
            no_replace_index,
            decay,
        } => {
            let serve_cfg = ServeConfig {
                listen,
                dump,
                replace_on_start: !no_replace_index,
                decay: decay.to_decay()?,
            };
            run_serve(&store_cfg, serve_cfg)
        }
        Commands::Replace { dump } => {
            let store = open_store(&store_cfg)?;
            replace_from_dump(&CatalogStore::new(store), &store_cfg.catalog, &dump)?;
            Ok(())
        }
        Commands::Search {
            term,
            lat,
            lng,
            decay,
        } => {
            let origin = Location::new(lat, lng);
            if !origin.is_valid() {
                bail!("coordinates out of range: {lat},{lng}");
            }
            let store = open_store(&store_cfg)?;
            let engine = RankingEngine::with_decay(store, decay.to_decay()?);
            let result = engine.search(&store_cfg.catalog, &SearchQuery::new(term, origin))?;
            println!("{}", serde_json::to_string_pretty(&result.into_records())?);
            Ok(())
        }
        Commands::Drop => {
            let store = open_store(&store_cfg)?;
            CatalogStore::new(store).delete_catalog(&store_cfg.catalog);
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "geo-item-search", &mut std::io::stdout());
            Ok(())
        }
        Commands::Man => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            Ok(())
        }
    }
}

fn run_serve(store_cfg: &StoreConfig, serve_cfg: ServeConfig) -> Result<()> {
    let store = open_store(store_cfg)?;
    prepare_catalog(&CatalogStore::new(store.clone()), store_cfg, &serve_cfg)?;

    let state = Arc::new(AppState {
        engine: RankingEngine::with_decay(store.clone(), serve_cfg.decay),
        catalog: store_cfg.catalog.clone(),
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building async runtime")?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(serve_cfg.listen)
            .await
            .with_context(|| format!("binding {}", serve_cfg.listen))?;
        gateway::serve(listener, state, gateway::shutdown_signal())
            .await
            .context("http server failed")
    })?;
    drop(runtime);

    // The last store handle goes away outside the runtime.
    drop(store);
    Ok(())
}

/// Rebuild the served catalog from the dump, or leave it untouched when
/// `replace_on_start` is off.
pub fn prepare_catalog(
    catalog: &CatalogStore,
    store_cfg: &StoreConfig,
    serve_cfg: &ServeConfig,
) -> Result<()> {
    if serve_cfg.replace_on_start {
        replace_from_dump(catalog, &store_cfg.catalog, &serve_cfg.dump)
    } else {
        info!(catalog = %store_cfg.catalog, "serving existing catalog");
        Ok(())
    }
}

fn replace_from_dump(catalog: &CatalogStore, name: &str, dump: &std::path::Path) -> Result<()> {
    let records = ingest::read_dump_file(dump)
        .with_context(|| format!("loading catalog dump {}", dump.display()))?;
    let ack = catalog
        .replace(name, &records)
        .with_context(|| format!("replacing catalog {name}"))?;
    info!(catalog = %ack.catalog, documents = ack.documents, "catalog ready");
    Ok(())
}

/// Connect to the configured backend, retrying while it comes up.
pub fn open_store(cfg: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    let store: Arc<dyn DocumentStore> = match cfg.backend {
        BackendKind::Embedded => {
            let root = cfg.data_dir.join("indexes");
            Arc::new(
                connect_with_retry(cfg.retry, || TantivyStore::open(&root))
                    .with_context(|| format!("opening embedded store at {}", root.display()))?,
            )
        }
        BackendKind::Elasticsearch => Arc::new(
            connect_with_retry(cfg.retry, || ElasticStore::new(cfg.elastic.clone()))
                .with_context(|| format!("connecting to {}", cfg.elastic.url))?,
        ),
    };
    Ok(store)
}

pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "geo-item-search", "geo-item-search")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".geo-item-search"))
}
