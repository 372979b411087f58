//! Integration tests for HarvestService.
//!
//! These tests drive the coordinator with mock sources and check the crawl,
//! the summary ledger and what reaches the index.

use crate::integration::common::{
    MockResource, MockSourceClient, MockSourceClientFactory, RecordingReporter, RecordingSink,
    TEST_CATALOG, test_job, test_registry,
};
use geoharvest_core::config::{SourceEntry, ProtocolType};
use geoharvest_core::harvest::HarvestService;
use geoharvest_core::{
    BufferedSink, IdentifierRules, JobState, MemoryIndex, WarningCategory,
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

fn service_with(
    client: &MockSourceClient,
    index: &MemoryIndex,
) -> HarvestService<MockSourceClientFactory, BufferedSink<MemoryIndex>, geoharvest_core::StaticCatalogRegistry>
{
    HarvestService::new(
        MockSourceClientFactory::new(client.clone()),
        BufferedSink::new(index.clone()),
        test_registry(),
    )
}

/// 250 matched records with page size 100 are fetched from start positions
/// 0, 100 and 200, and nothing else.
#[tokio::test]
async fn test_pagination_terminates_after_last_page() {
    // Arrange
    let client = MockSourceClient::new(vec![MockResource::new("roads", 250)]);
    let index = MemoryIndex::new();
    let service = service_with(&client, &index);

    // Act
    let result = service.run(&test_job(100)).await;

    // Assert
    assert_eq!(result.state, JobState::Done);
    assert_eq!(
        client.requests(),
        vec![
            ("roads".to_string(), 0),
            ("roads".to_string(), 100),
            ("roads".to_string(), 200),
        ]
    );
    assert_eq!(result.count, 250);
    assert_eq!(index.len(), 250);
    assert!(!result.requires_rollback());
}

/// A source that never reports a match count gets exactly one page.
#[tokio::test]
async fn test_missing_match_count_fetches_single_page() {
    let mut resource = MockResource::new("roads", 250);
    resource.report_count = false;
    let client = MockSourceClient::new(vec![resource]);
    let index = MemoryIndex::new();

    let result = service_with(&client, &index).run(&test_job(100)).await;

    assert_eq!(client.requests().len(), 1);
    assert_eq!(result.count, 100);
}

/// One failing resource yields exactly one warning; the others complete.
#[tokio::test]
async fn test_resource_failure_is_isolated() {
    let client = MockSourceClient::new(vec![
        MockResource::new("roads", 30),
        MockResource::new("rivers", 30).failing_at(0),
        MockResource::new("parcels", 30),
    ]);
    let index = MemoryIndex::new();
    let reporter = RecordingReporter::default();

    let result = service_with(&client, &index)
        .run_with_progress(&test_job(10), &reporter)
        .await;

    assert_eq!(result.state, JobState::Done);
    assert_eq!(result.summary.warnings.len(), 1);
    assert_eq!(result.summary.warnings[0].category, WarningCategory::Resource);
    assert!(result.summary.warnings[0].message.contains("rivers"));
    assert!(!result.summary.has_app_errors());
    assert_eq!(result.count, 60);
    assert_eq!(index.len(), 60);
    assert_eq!(*reporter.failed_resources.lock().unwrap(), vec!["rivers"]);
}

/// A failure on a later page aborts only the rest of that resource.
#[tokio::test]
async fn test_page_failure_keeps_earlier_pages() {
    let client = MockSourceClient::new(vec![MockResource::new("roads", 50).failing_at(20)]);
    let index = MemoryIndex::new();

    let result = service_with(&client, &index).run(&test_job(10)).await;

    assert_eq!(result.count, 20);
    assert_eq!(client.requests().len(), 3);
    // Only resource failed, so the job must be rolled back.
    assert!(result.summary.has_app_errors());
    assert!(result.requires_rollback());
}

#[tokio::test]
async fn test_all_resources_failing_records_app_error() {
    let client = MockSourceClient::new(vec![
        MockResource::new("a", 5).failing_at(0),
        MockResource::new("b", 5).failing_at(0),
    ]);
    let index = MemoryIndex::new();

    let result = service_with(&client, &index).run(&test_job(10)).await;

    assert_eq!(result.state, JobState::Done);
    assert_eq!(result.summary.app_errors.len(), 1);
    assert_eq!(result.summary.warnings.len(), 2);
    assert!(result.requires_rollback());
}

/// Denied identifiers are skipped and the mapper is never built for them.
#[tokio::test]
async fn test_denied_identifiers_never_mapped() {
    let client = MockSourceClient::new(vec![MockResource::new("roads", 20)]);
    let index = MemoryIndex::new();
    let job = test_job(100).with_rules(IdentifierRules {
        allow: vec![],
        deny: vec!["roads-1?".to_string()],
    });

    let result = service_with(&client, &index).run(&job).await;

    assert_eq!(client.mappers_built(), 10);
    assert_eq!(result.count, 10);
    assert_eq!(result.summary.skipped(), 10);
    assert!(result.summary.skipped_docs.contains(&"roads-15".to_string()));
    assert!(index.get(&format!("{TEST_CATALOG}:roads-15")).is_none());
    assert!(index.get(&format!("{TEST_CATALOG}:roads-5")).is_some());
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let client = MockSourceClient::new(vec![MockResource::new("roads", 15)]);
    let index = MemoryIndex::new();

    let result = service_with(&client, &index)
        .run(&test_job(10).with_dry_run(true))
        .await;

    assert_eq!(result.state, JobState::Done);
    assert_eq!(result.count, 15);
    assert!(index.is_empty());
}

#[tokio::test]
async fn test_discover_failure_fails_job() {
    let client = MockSourceClient::new(vec![MockResource::new("roads", 5)]).with_discover_error();
    let index = MemoryIndex::new();
    let reporter = RecordingReporter::default();

    let result = service_with(&client, &index)
        .run_with_progress(&test_job(10), &reporter)
        .await;

    assert_eq!(result.state, JobState::Failed);
    assert!(result.error.unwrap().contains("ExceptionReport"));
    assert!(result.summary.has_app_errors());
    assert!(client.requests().is_empty());
    assert_eq!(
        *reporter.states.lock().unwrap(),
        vec![JobState::Init, JobState::Discover, JobState::Failed]
    );
}

#[tokio::test]
async fn test_unknown_catalog_fails_in_init() {
    let client = MockSourceClient::new(vec![MockResource::new("roads", 5)]);
    let index = MemoryIndex::new();

    let result = service_with(&client, &index)
        .run(&test_job(10).with_catalog("nowhere"))
        .await;

    assert_eq!(result.state, JobState::Failed);
    assert!(result.error.unwrap().contains("nowhere"));
}

/// Running the same job twice leaves the same documents in the index,
/// apart from the harvest timestamp.
#[tokio::test]
async fn test_harvest_is_idempotent() {
    let client = MockSourceClient::new(vec![
        MockResource::new("roads", 25),
        MockResource::new("rivers", 7),
    ]);
    let index = MemoryIndex::new();
    let service = service_with(&client, &index);
    let job = test_job(10);

    service.run(&job).await;
    let first: Vec<_> = index
        .ids()
        .into_iter()
        .map(|id| {
            let mut doc = index.get(&id).unwrap();
            doc.metadata.harvested_at = Default::default();
            doc
        })
        .collect();

    let result = service.run(&job).await;
    let second: Vec<_> = index
        .ids()
        .into_iter()
        .map(|id| {
            let mut doc = index.get(&id).unwrap();
            doc.metadata.harvested_at = Default::default();
            doc
        })
        .collect();

    assert_eq!(result.count, 32);
    assert_eq!(first, second);
}

/// Cancellation stops new requests but still flushes what was mapped.
#[tokio::test]
async fn test_cancellation_flushes_partial_results() {
    let token = CancellationToken::new();
    let client = MockSourceClient::new(vec![MockResource::new("roads", 100)])
        .cancel_after_pages(2, token.clone());
    let index = MemoryIndex::new();

    let result = service_with(&client, &index)
        .run_cancellable(&test_job(10), &RecordingReporter::default(), token)
        .await;

    assert_eq!(result.state, JobState::Done);
    assert!(result.cancelled);
    assert_eq!(client.requests().len(), 2);
    assert_eq!(result.count, 20);
    assert_eq!(index.len(), 20);
}

/// Progress pairs advance one record at a time and `total` never shrinks
/// or falls below `done`.
#[tokio::test]
async fn test_progress_is_monotonic() {
    let client = MockSourceClient::new(vec![
        MockResource::new("a", 35),
        MockResource::new("b", 12),
    ]);
    let index = MemoryIndex::new();
    let reporter = RecordingReporter::default();

    service_with(&client, &index)
        .run_with_progress(&test_job(10), &reporter)
        .await;

    let progress = reporter.progress.lock().unwrap().clone();
    assert_eq!(progress.len(), 47);
    for (i, (done, total)) in progress.iter().enumerate() {
        assert_eq!(*done, i + 1);
        assert!(total >= done);
    }
    assert!(progress.windows(2).all(|w| w[0].1 <= w[1].1));
}

#[tokio::test]
async fn test_states_in_order() {
    let client = MockSourceClient::new(vec![MockResource::new("a", 1)]);
    let index = MemoryIndex::new();
    let reporter = RecordingReporter::default();

    service_with(&client, &index)
        .run_with_progress(&test_job(10), &reporter)
        .await;

    assert_eq!(
        *reporter.states.lock().unwrap(),
        vec![
            JobState::Init,
            JobState::Discover,
            JobState::Crawl,
            JobState::Flush,
            JobState::Done
        ]
    );
}

#[tokio::test]
async fn test_batch_harvest_isolates_failing_source() {
    let client = MockSourceClient::new(vec![MockResource::new("roads", 5)]);
    let sink = RecordingSink::new();
    let service = HarvestService::new(
        MockSourceClientFactory::new(client),
        sink.clone(),
        test_registry(),
    );

    let good = SourceEntry {
        name: "good".to_string(),
        url: "https://geo.example.org/csw".to_string(),
        protocol: ProtocolType::Csw,
        catalog_id: Some(TEST_CATALOG.to_string()),
        ..Default::default()
    };
    let bad = SourceEntry {
        name: "bad".to_string(),
        url: "ftp://nowhere".to_string(),
        protocol: ProtocolType::Csw,
        catalog_id: Some(TEST_CATALOG.to_string()),
        ..Default::default()
    };

    let summary = service.batch_harvest(&[&bad, &good]).await;

    assert_eq!(summary.total_sources(), 2);
    assert_eq!(summary.failed_count(), 1);
    assert_eq!(summary.successful_count(), 1);
    assert_eq!(summary.total_documents(), 5);
    assert!(summary.results[0].error.as_deref().unwrap().contains("ftp://nowhere"));
    assert_eq!(sink.len(), 5);
}
