//! CSW harvests against a mock server.

use geoharvest_core::{JobState, MemoryIndex, ProtocolType, WarningCategory};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::integration::common::{CATALOG, job, service};

const CAPABILITIES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<csw:Capabilities version="2.0.2"
    xmlns:csw="http://www.opengis.net/cat/csw/2.0.2"
    xmlns:ows="http://www.opengis.net/ows">
  <ows:OperationsMetadata>
    <ows:Operation name="GetCapabilities"/>
    <ows:Operation name="GetRecords"/>
  </ows:OperationsMetadata>
</csw:Capabilities>"#;

fn record(id: &str, title: &str) -> String {
    format!(
        r#"<csw:Record>
             <dc:identifier>{id}</dc:identifier>
             <dc:title>{title}</dc:title>
             <dc:subject>geology</dc:subject>
             <ows:WGS84BoundingBox>
               <ows:LowerCorner>6.0 46.0</ows:LowerCorner>
               <ows:UpperCorner>8.0 48.0</ows:UpperCorner>
             </ows:WGS84BoundingBox>
           </csw:Record>"#
    )
}

fn response(records: &[String], matched: usize) -> String {
    format!(
        r#"<csw:GetRecordsResponse xmlns:csw="http://www.opengis.net/cat/csw/2.0.2"
               xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:ows="http://www.opengis.net/ows">
             <csw:SearchStatus timestamp="2024-01-01T00:00:00Z"/>
             <csw:SearchResults numberOfRecordsMatched="{matched}" numberOfRecordsReturned="{}">{}</csw:SearchResults>
           </csw:GetRecordsResponse>"#,
        records.len(),
        records.concat()
    )
}

async fn mount_capabilities(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(query_param("request", "GetCapabilities"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Pages are requested with 1-based start positions; a record without a
/// title is skipped with a mapping warning.
#[tokio::test]
async fn test_csw_harvest_maps_records() {
    let server = MockServer::start().await;
    mount_capabilities(&server, CAPABILITIES).await;
    Mock::given(method("GET"))
        .and(query_param("request", "GetRecords"))
        .and(query_param("startPosition", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(response(
            &[record("rec-1", "Bedrock"), record("rec-2", "Faults")],
            3,
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("request", "GetRecords"))
        .and(query_param("startPosition", "3"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(response(&[record("rec-3", " ")], 3)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let index = MemoryIndex::new();
    let result = service(&index)
        .run(&job(ProtocolType::Csw, format!("{}/csw", server.uri()), 2))
        .await;

    assert_eq!(result.state, JobState::Done);
    assert_eq!(result.count, 2);
    assert_eq!(result.summary.warnings.len(), 1);
    assert_eq!(result.summary.warnings[0].category, WarningCategory::Mapping);
    assert!(result.summary.skipped_docs.contains(&"rec-3".to_string()));

    let doc = index.get(&format!("{CATALOG}:rec-1")).unwrap();
    assert_eq!(doc.title, "Bedrock");
    assert_eq!(doc.keywords, vec!["geology"]);
    assert_eq!(doc.publisher.as_deref(), Some("Survey Agency"));
    assert_eq!(doc.spatial.unwrap().centroid.x, 7.0);
}

#[tokio::test]
async fn test_csw_unexpected_capabilities_root_fails_job() {
    let server = MockServer::start().await;
    mount_capabilities(&server, "<html><body>Login</body></html>").await;

    let index = MemoryIndex::new();
    let result = service(&index)
        .run(&job(ProtocolType::Csw, format!("{}/csw", server.uri()), 10))
        .await;

    assert_eq!(result.state, JobState::Failed);
    assert!(result.requires_rollback());
}

#[tokio::test]
async fn test_csw_unreachable_capabilities_fail_job() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let index = MemoryIndex::new();
    let result = service(&index)
        .run(&job(ProtocolType::Csw, format!("{}/csw", server.uri()), 10))
        .await;

    assert_eq!(result.state, JobState::Failed);
    assert!(result.error.unwrap().contains("404"));
}
