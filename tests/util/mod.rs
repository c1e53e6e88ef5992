use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use geo_item_search::catalog::CatalogStore;
use geo_item_search::gateway::{self, AppState};
use geo_item_search::ingest::parse_dump;
use geo_item_search::model::Record;
use geo_item_search::search::RankingEngine;
use geo_item_search::storage::{DocumentStore, TantivyStore};
use tempfile::TempDir;
use tokio::sync::oneshot;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

#[allow(dead_code)]
struct TestWriter(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[allow(dead_code)]
pub struct TempFixtureDir {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl TempFixtureDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Write `contents` to `name` inside the fixture dir and return its path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("write fixture");
        path
    }
}

/// Fresh catalog name, so parallel tests never share an index.
#[allow(dead_code)]
pub fn random_catalog() -> String {
    format!("test_items_{:06x}", rand::random::<u32>() & 0x00ff_ffff)
}

/// Parse an inline dump, panicking on bad fixtures.
#[allow(dead_code)]
pub fn records(dump: &str) -> Vec<Record> {
    parse_dump(dump.as_bytes()).expect("fixture dump parses")
}

/// A catalog server on an ephemeral port, stopped on drop.
#[allow(dead_code)]
pub struct TestServer {
    pub addr: SocketAddr,
    pub catalog: String,
    pub store: Arc<dyn DocumentStore>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<std::io::Result<()>>>,
}

#[allow(dead_code)]
impl TestServer {
    /// Load `dump` into a fresh in-memory catalog and start serving it.
    pub async fn with_dump(dump: &str) -> Self {
        let store: Arc<dyn DocumentStore> = Arc::new(TantivyStore::in_memory());
        let catalog = random_catalog();
        CatalogStore::new(store.clone())
            .replace(&catalog, &records(dump))
            .expect("replace catalog");
        Self::start(store, catalog).await
    }

    /// Serve `catalog` from `store` as it is.
    pub async fn start(store: Arc<dyn DocumentStore>, catalog: String) -> Self {
        let state = Arc::new(AppState {
            engine: RankingEngine::new(store.clone()),
            catalog: catalog.clone(),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(gateway::serve(listener, state, async move {
            let _ = rx.await;
        }));
        Self {
            addr,
            catalog,
            store,
            shutdown: Some(tx),
            handle: Some(handle),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await.expect("server task").expect("server io");
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
