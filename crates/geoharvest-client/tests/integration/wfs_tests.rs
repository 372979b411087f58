//! WFS harvests against a mock server.

use geoharvest_core::{JobState, MemoryIndex, ProtocolType, WarningCategory};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::integration::common::{CATALOG, job, service};

const CAPABILITIES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<wfs:WFS_Capabilities version="2.0.0"
    xmlns:wfs="http://www.opengis.net/wfs/2.0"
    xmlns:ows="http://www.opengis.net/ows/1.1">
  <ows:OperationsMetadata>
    <ows:Constraint name="ImplementsResultPaging">
      <ows:NoValues/>
      <ows:DefaultValue>TRUE</ows:DefaultValue>
    </ows:Constraint>
  </ows:OperationsMetadata>
  <wfs:FeatureTypeList>
    <wfs:FeatureType>
      <wfs:Name>app:roads</wfs:Name>
      <wfs:DefaultCRS>urn:ogc:def:crs:EPSG::4326</wfs:DefaultCRS>
    </wfs:FeatureType>
    <wfs:FeatureType>
      <wfs:Name>app:rivers</wfs:Name>
    </wfs:FeatureType>
  </wfs:FeatureTypeList>
</wfs:WFS_Capabilities>"#;

fn road(id: u32, lat: f64) -> String {
    format!(
        r#"<wfs:member>
             <app:roads gml:id="roads.{id}">
               <app:name>Road {id}</app:name>
               <app:geom><gml:LineString><gml:posList>{lat} 10.0 {lat} 11.0</gml:posList></gml:LineString></app:geom>
             </app:roads>
           </wfs:member>"#
    )
}

fn collection(members: &[String], matched: &str) -> String {
    format!(
        r#"<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs/2.0"
               xmlns:gml="http://www.opengis.net/gml/3.2" xmlns:app="http://example.org/app"
               numberMatched="{matched}" numberReturned="{}">{}</wfs:FeatureCollection>"#,
        members.len(),
        members.concat()
    )
}

async fn mount_capabilities(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/wfs"))
        .and(query_param("request", "GetCapabilities"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_page(server: &MockServer, type_name: &str, start: &str, body: String) {
    Mock::given(method("GET"))
        .and(path("/wfs"))
        .and(query_param("request", "GetFeature"))
        .and(query_param("typeNames", type_name))
        .and(query_param("startIndex", start))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(server)
        .await;
}

/// Three roads over two pages; the rivers type answers with an exception and
/// is reported as one failed resource.
#[tokio::test]
async fn test_wfs_harvest_pages_and_isolates_failing_type() {
    let server = MockServer::start().await;
    mount_capabilities(&server, CAPABILITIES).await;
    mount_page(&server, "app:roads", "0", collection(&[road(1, 45.0), road(2, 46.0)], "3")).await;
    mount_page(&server, "app:roads", "2", collection(&[road(3, 47.0)], "3")).await;
    mount_page(
        &server,
        "app:rivers",
        "0",
        r#"<ows:ExceptionReport><ows:Exception><ows:ExceptionText>type locked</ows:ExceptionText></ows:Exception></ows:ExceptionReport>"#.to_string(),
    )
    .await;

    let index = MemoryIndex::new();
    let result = service(&index)
        .run(&job(ProtocolType::Wfs, format!("{}/wfs", server.uri()), 2))
        .await;

    assert_eq!(result.state, JobState::Done);
    assert_eq!(result.count, 3);
    assert_eq!(result.summary.warnings.len(), 1);
    assert_eq!(result.summary.warnings[0].category, WarningCategory::Resource);
    assert!(result.summary.warnings[0].message.contains("type locked"));

    let doc = index.get(&format!("{CATALOG}:roads.2")).unwrap();
    assert_eq!(doc.title, "Road 2");
    assert_eq!(doc.identifier, "roads.2");
    // URN CRS: latitude first in the document, longitude first in the index.
    let spatial = doc.spatial.unwrap();
    assert!((spatial.centroid.x - 10.5).abs() < 1e-9);
    assert!((spatial.centroid.y - 46.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_wfs_exception_capabilities_fail_job() {
    let server = MockServer::start().await;
    mount_capabilities(
        &server,
        r#"<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows/1.1"><ows:Exception><ows:ExceptionText>maintenance</ows:ExceptionText></ows:Exception></ows:ExceptionReport>"#,
    )
    .await;

    let index = MemoryIndex::new();
    let result = service(&index)
        .run(&job(ProtocolType::Wfs, format!("{}/wfs", server.uri()), 10))
        .await;

    assert_eq!(result.state, JobState::Failed);
    assert!(result.error.unwrap().contains("maintenance"));
    assert!(index.is_empty());
}

/// Without the paging constraint the type is requested once, without
/// `startIndex`, whatever the reported match count.
#[tokio::test]
async fn test_wfs_without_paging_requests_once() {
    let server = MockServer::start().await;
    mount_capabilities(
        &server,
        r#"<WFS_Capabilities><FeatureTypeList>
             <FeatureType><Name>app:roads</Name></FeatureType>
           </FeatureTypeList></WFS_Capabilities>"#,
    )
    .await;
    Mock::given(method("GET"))
        .and(query_param("request", "GetFeature"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(collection(&[road(1, 45.0), road(2, 46.0)], "10")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let index = MemoryIndex::new();
    let result = service(&index)
        .run(&job(ProtocolType::Wfs, format!("{}/wfs", server.uri()), 2))
        .await;

    assert_eq!(result.state, JobState::Done);
    assert_eq!(result.count, 2);
    assert!(
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .all(|r| !r.url.as_str().contains("startIndex"))
    );
}
