//! Integration tests for the deduplication pass over harvested entities.

use std::collections::HashMap;

use crate::integration::common::{
    MockResource, MockSourceClient, MockSourceClientFactory, RecordingSink, TEST_CATALOG,
    test_job, test_registry,
};
use geoharvest_core::dedup::merged_id;
use geoharvest_core::harvest::HarvestService;
use geoharvest_core::{
    Catalog, Deduplicator, IndexBackend, IndexOperation, MappedEntity, MemoryIndex, build_buckets,
};
use pretty_assertions::assert_eq;

const SEED_CATALOG: &str = "seed-catalog";

/// Harvests the same three records once as a `catalog` source and once as a
/// `seed` source, and returns every submitted entity.
async fn harvest_duplicates() -> Vec<MappedEntity> {
    let client = MockSourceClient::new(vec![MockResource::new("roads", 3)]);
    let sink = RecordingSink::new();
    let registry = test_registry().with_catalog(Catalog {
        id: SEED_CATALOG.to_string(),
        title: "Seed import".to_string(),
        publisher: None,
    });
    let service = HarvestService::new(MockSourceClientFactory::new(client), sink.clone(), registry);

    let catalog_job = test_job(10).with_source_kind("catalog");
    let seed_job = test_job(10)
        .with_catalog(SEED_CATALOG)
        .with_source_kind("seed");

    assert_eq!(service.run(&catalog_job).await.count, 3);
    assert_eq!(service.run(&seed_job).await.count, 3);
    sink.take()
}

async fn index_as_harvested(index: &MemoryIndex, entities: &[MappedEntity]) {
    let operations = entities
        .iter()
        .map(|e| IndexOperation::Index {
            id: e.document.id.clone(),
            document: e.document.clone(),
        })
        .collect();
    index.apply(operations).await.unwrap();
}

/// Two copies of one record move to the merged id: both old ids are deleted
/// before the merged document is indexed.
#[tokio::test]
async fn test_reconcile_migrates_ids() {
    let entities = harvest_duplicates().await;
    let index = MemoryIndex::new();
    index_as_harvested(&index, &entities).await;
    assert_eq!(index.len(), 6);

    let buckets = build_buckets(entities, &HashMap::new());
    assert_eq!(buckets.len(), 3);

    let operations = Deduplicator::default().reconcile(&buckets[0]);
    let rendered: Vec<String> = operations.iter().map(|op| op.to_string()).collect();
    assert_eq!(
        rendered,
        vec![
            format!("delete {TEST_CATALOG}:roads-0"),
            format!("delete {SEED_CATALOG}:roads-0"),
            format!("index {}", merged_id("roads-0")),
        ]
    );
}

#[tokio::test]
async fn test_reconcile_all_leaves_one_document_per_bucket() {
    let entities = harvest_duplicates().await;
    let index = MemoryIndex::new();
    index_as_harvested(&index, &entities).await;

    let buckets = build_buckets(entities, &HashMap::new());
    let operations = Deduplicator::default().reconcile_all(&buckets);
    index.apply(operations).await.unwrap();

    assert_eq!(index.len(), 3);
    let merged = index.get(&merged_id("roads-1")).unwrap();
    assert_eq!(merged.metadata.source_kind, "catalog");
    assert_eq!(merged.metadata.catalog_id, TEST_CATALOG);
    assert_eq!(
        merged.metadata.provenance,
        vec![format!("{SEED_CATALOG}:roads-1")]
    );
    assert!(merged.internal.is_empty());
}

/// Running the pass again over the same state changes nothing.
#[tokio::test]
async fn test_reconcile_is_stable() {
    let entities = harvest_duplicates().await;
    let index = MemoryIndex::new();
    index_as_harvested(&index, &entities).await;

    let dedup = Deduplicator::default();
    let buckets = build_buckets(entities.clone(), &HashMap::new());
    index.apply(dedup.reconcile_all(&buckets)).await.unwrap();
    let first = index.ids();

    let indexed: HashMap<String, String> = buckets
        .iter()
        .map(|b| (b.key.clone(), b.target_id()))
        .collect();
    let buckets = build_buckets(entities, &indexed);
    index.apply(dedup.reconcile_all(&buckets)).await.unwrap();

    assert_eq!(index.ids(), first);
}

/// When every copy is deleted at its source, only the indexed id is deleted.
#[tokio::test]
async fn test_all_deleted_bucket_emits_single_delete() {
    let mut entities = harvest_duplicates().await;
    for entity in &mut entities {
        entity.document.deleted = true;
    }
    let indexed = HashMap::from([("roads-2".to_string(), merged_id("roads-2"))]);

    let buckets = build_buckets(entities, &indexed);
    let bucket = buckets.iter().find(|b| b.key == "roads-2").unwrap();
    let operations = Deduplicator::default().reconcile(bucket);

    assert_eq!(
        operations,
        vec![IndexOperation::Delete {
            id: merged_id("roads-2")
        }]
    );
}
