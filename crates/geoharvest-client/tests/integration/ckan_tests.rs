//! CKAN harvests against a mock server.

use geoharvest_core::{IdentifierRules, JobState, MemoryIndex, ProtocolType};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::integration::common::{CATALOG, job, service};

async fn mount_status(server: &MockServer, success: bool) {
    Mock::given(method("GET"))
        .and(path("/api/3/action/status_show"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": success,
            "result": {"ckan_version": "2.10.4"}
        })))
        .mount(server)
        .await;
}

async fn mount_search(server: &MockServer, start: &str, count: usize, results: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/api/3/action/package_search"))
        .and(query_param("start", start))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "result": {"count": count, "results": results}
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_ckan_harvest_maps_datasets() {
    let server = MockServer::start().await;
    mount_status(&server, true).await;
    mount_search(
        &server,
        "0",
        3,
        json!([
            {
                "id": "a1",
                "name": "air-quality",
                "title": {"en": "Air quality", "it": "Qualità dell'aria"},
                "license_id": "cc-by-4.0",
                "tags": [{"name": "air"}],
                "resources": [{"url": "https://example.org/air.csv", "format": "CSV"}]
            },
            {"id": "b2", "name": "buses", "title": "Bus stops", "state": "deleted"}
        ]),
    )
    .await;
    mount_search(
        &server,
        "2",
        3,
        json!([{
            "id": "c3",
            "name": "coast",
            "title": "Coastline",
            "extras": [{"key": "spatial", "value": "{\"type\":\"Point\",\"coordinates\":[9.2,44.4]}"}]
        }]),
    )
    .await;

    let index = MemoryIndex::new();
    let mut ckan_job = job(ProtocolType::Ckan, server.uri(), 2);
    ckan_job.language = "it".to_string();
    let result = service(&index).run(&ckan_job).await;

    assert_eq!(result.state, JobState::Done);
    assert_eq!(result.count, 3);
    assert!(result.summary.warnings.is_empty());

    let air = index.get(&format!("{CATALOG}:a1")).unwrap();
    assert_eq!(air.title, "Qualità dell'aria");
    assert_eq!(air.keywords, vec!["air"]);
    assert_eq!(air.distributions.len(), 1);
    assert_eq!(air.metadata.catalog_id, CATALOG);

    assert!(index.get(&format!("{CATALOG}:b2")).unwrap().deleted);

    let coast = index.get(&format!("{CATALOG}:c3")).unwrap();
    let spatial = coast.spatial.unwrap();
    assert_eq!(spatial.centroid.x, 9.2);
    assert_eq!(spatial.centroid.y, 44.4);
}

#[tokio::test]
async fn test_ckan_filter_and_denied_identifiers() {
    let server = MockServer::start().await;
    mount_status(&server, true).await;
    Mock::given(method("GET"))
        .and(path("/api/3/action/package_search"))
        .and(query_param("fq", "organization:region"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "result": {"count": 2, "results": [
                {"id": "keep-1", "title": "Kept"},
                {"id": "internal-1", "title": "Internal"}
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let index = MemoryIndex::new();
    let mut ckan_job = job(ProtocolType::Ckan, server.uri(), 10).with_rules(IdentifierRules {
        allow: vec![],
        deny: vec!["internal-*".to_string()],
    });
    ckan_job.filter = Some("organization:region".to_string());
    let result = service(&index).run(&ckan_job).await;

    assert_eq!(result.count, 1);
    assert_eq!(index.ids(), vec![format!("{CATALOG}:keep-1")]);
    assert_eq!(result.summary.skipped_docs, vec!["internal-1"]);
}

#[tokio::test]
async fn test_ckan_status_failure_fails_job() {
    let server = MockServer::start().await;
    mount_status(&server, false).await;

    let index = MemoryIndex::new();
    let result = service(&index)
        .run(&job(ProtocolType::Ckan, server.uri(), 10))
        .await;

    assert_eq!(result.state, JobState::Failed);
    assert!(result.error.unwrap().contains("status_show"));
}
