//! Catalog replace against the on-disk embedded store.

mod util;

use std::sync::Arc;

use geo_item_search::catalog::{CatalogStore, StoreError};
use geo_item_search::ingest::read_dump_file;
use geo_item_search::model::{Location, SearchQuery};
use geo_item_search::search::RankingEngine;
use geo_item_search::storage::{DocumentStore, TantivyStore};
use util::{TempFixtureDir, TestTracing, random_catalog, records};

const DUMP: &str = "\
\"Canon EOS camera\",51.5074,-0.1278,https://shop.example/canon,\"[\"\"canon-1.jpg\"\"]\"
\"Nikon D750\",51.9000,-0.1410,https://shop.example/nikon-camera,[]
\"Tripod\",51.5074,-0.1278,https://shop.example/tripod,[]
";

fn names(engine: &RankingEngine, catalog: &str, term: &str) -> Vec<String> {
    engine
        .search(catalog, &SearchQuery::new(term, Location::new(51.5074, -0.1278)))
        .expect("search")
        .into_records()
        .into_iter()
        .map(|r| r.name)
        .collect()
}

#[test]
fn replace_survives_reopen() {
    let fixture = TempFixtureDir::new();
    let dump = fixture.write("dump.csv", DUMP);
    let root = fixture.path().join("indexes");
    let catalog = random_catalog();

    {
        let store: Arc<dyn DocumentStore> = Arc::new(TantivyStore::open(&root).unwrap());
        let ack = CatalogStore::new(store.clone())
            .replace(&catalog, &read_dump_file(&dump).unwrap())
            .unwrap();
        assert_eq!(ack.documents, 3);
    }

    let store: Arc<dyn DocumentStore> = Arc::new(TantivyStore::open(&root).unwrap());
    assert!(store.index_exists(&catalog).unwrap());
    let engine = RankingEngine::new(store);
    let found = names(&engine, &catalog, "cameras");
    assert_eq!(found.len(), 2, "{found:?}");
    assert_eq!(found[0], "Canon EOS camera");
    assert_eq!(names(&engine, &catalog, "jpg"), vec!["Canon EOS camera"]);
}

#[test]
fn replace_on_disk_discards_previous_generation() {
    let fixture = TempFixtureDir::new();
    let store: Arc<dyn DocumentStore> =
        Arc::new(TantivyStore::open(&fixture.path().join("indexes")).unwrap());
    let catalog_store = CatalogStore::new(store.clone());
    let catalog = random_catalog();

    catalog_store.replace(&catalog, &records(DUMP)).unwrap();
    catalog_store
        .replace(&catalog, &records("\"Lens cap\",51.5,-0.12,shop/lens-cap,[]\n"))
        .unwrap();

    let engine = RankingEngine::new(store);
    assert!(names(&engine, &catalog, "camera").is_empty());
    assert_eq!(names(&engine, &catalog, "lens"), vec!["Lens cap"]);
}

#[test]
fn rejected_point_aborts_replace() {
    let store: Arc<dyn DocumentStore> = Arc::new(TantivyStore::in_memory());
    let err = CatalogStore::new(store)
        .replace(&random_catalog(), &records("\"nowhere\",95,200,shop/x,[]\n"))
        .unwrap_err();
    assert!(matches!(err, StoreError::BulkInsert { failed: 1, total: 1, .. }), "{err}");
}

#[test]
fn replace_and_teardown_are_logged() {
    let tracing = TestTracing::new();
    let _guard = tracing.install();

    let catalog_store = CatalogStore::new(Arc::new(TantivyStore::in_memory()));
    let catalog = random_catalog();
    catalog_store.replace(&catalog, &records(DUMP)).unwrap();
    catalog_store.delete_catalog(&catalog);
    catalog_store.delete_catalog(&catalog);

    tracing.assert_contains("catalog replaced");
    tracing.assert_contains("documents=3");
    tracing.assert_contains("catalog deleted");
    tracing.assert_contains("failed to delete catalog");
}
