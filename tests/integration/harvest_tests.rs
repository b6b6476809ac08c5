//! Integration tests for the harvester
//!
//! These tests use wiremock to serve a small paginated catalog and run the
//! full harvest cycle end-to-end over HTTP sessions.

use catalog_harvest::config::{parse_config, Config};
use catalog_harvest::harvest::run_harvest;
use catalog_harvest::storage::{RecordStore, SqliteStore};
use catalog_harvest::HarvestError;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration for a catalog served by `base_url`
fn create_test_config(
    base_url: &str,
    output_dir: &Path,
    extra_harvest: &str,
    output: &str,
) -> Config {
    parse_config(&format!(
        r##"
[harvest]
catalog-url = "{base_url}/phones"
concurrency = 2
navigation-retry = 2
scraping-retry = 1
{extra_harvest}

[session]
user-agent = "catalog-harvest-tests/1.0"
navigation-timeout-secs = 5

[extractor]
pager-last-link = "#phones .s_pager .s_last a"
listing-links = "#phones .s_listing h3 > a"
detail-root = "#content"
detail-title = "#phone h1 > span"

[extractor.detail-fields]
price = "#phone .price"

[output]
directory = '{}'
{output}
"##,
        output_dir.display()
    ))
    .expect("valid test configuration")
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(format!("<html><body>{}</body></html>", body))
        .insert_header("content-type", "text/html")
}

fn detail_page(page: u32, n: u32) -> String {
    format!(
        r#"<div id="content"><div id="phone">
            <h1><span>Phone {page}.{n}</span></h1>
            <img src="/img/phone-{page}-{n}.jpg">
            <p class="price">${page}{n}9</p>
        </div></div>"#
    )
}

/// Mounts a catalog of 3 listing pages with 2 items each
async fn mount_catalog(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/phones"))
        .respond_with(html(
            r#"<div id="phones"><ul class="s_pager">
                <li><a href="/phones/page/2">2</a></li>
                <li class="s_last"><a href="/phones/page/3">Last</a></li>
            </ul></div>"#,
        ))
        .mount(server)
        .await;

    for page in 1..=3 {
        let links: String = (1..=2)
            .map(|n| {
                format!(
                    r#"<div class="s_block_4"><h3><a href="/phones/item-{page}-{n}">Phone {page}.{n}</a></h3></div>"#
                )
            })
            .collect();
        Mock::given(method("GET"))
            .and(path(format!("/phones/page/{}", page)))
            .respond_with(html(&format!(
                r#"<div id="phones"><div class="s_listing">{links}</div></div>"#
            )))
            .mount(server)
            .await;

        for n in 1..=2 {
            Mock::given(method("GET"))
                .and(path(format!("/phones/item-{}-{}", page, n)))
                .respond_with(html(&detail_page(page, n)))
                .mount(server)
                .await;
        }
    }
}

async fn requests_to(server: &MockServer, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == request_path)
        .count()
}

fn json_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".json"))
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_full_harvest_stores_every_item_once() {
    let mock_server = MockServer::start().await;
    mount_catalog(&mock_server).await;

    let output = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), output.path(), "", "");

    let report = run_harvest(&config).await.expect("harvest should succeed");

    assert_eq!(report.listing_pages, 3);
    assert_eq!(report.details_found, 6);
    assert_eq!(report.stored, 6);
    assert!(!report.had_failures);
    assert!(report.peak_live_sessions <= 2);

    assert_eq!(
        json_files(output.path()),
        vec![
            "item-1-1.json",
            "item-1-2.json",
            "item-2-1.json",
            "item-2-2.json",
            "item-3-1.json",
            "item-3-2.json",
        ]
    );

    for page in 1..=3 {
        for n in 1..=2 {
            let item_path = format!("/phones/item-{}-{}", page, n);
            assert_eq!(requests_to(&mock_server, &item_path).await, 1, "{}", item_path);
        }
    }

    // Blocked sub-resources are never requested
    assert_eq!(requests_to(&mock_server, "/img/phone-1-1.jpg").await, 0);

    let record: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(output.path().join("item-2-1.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(record["name"], "Phone 2.1");
    assert_eq!(record["price"], "$219");
    assert_eq!(
        record["address"],
        format!("{}/phones/item-2-1", mock_server.uri())
    );
    assert!(record["scrapDate"].is_string());
    assert!(record["scrapper"]
        .as_str()
        .unwrap()
        .starts_with("catalog-harvest v"));
}

#[tokio::test]
async fn test_navigation_recovers_after_server_errors() {
    let mock_server = MockServer::start().await;

    // Fails twice, then falls through to the catalog mock
    Mock::given(method("GET"))
        .and(path("/phones/item-2-2"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&mock_server)
        .await;
    mount_catalog(&mock_server).await;

    let output = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), output.path(), "", "");

    let report = run_harvest(&config).await.unwrap();

    assert!(!report.had_failures);
    assert_eq!(report.stored, 6);
    assert_eq!(requests_to(&mock_server, "/phones/item-2-2").await, 3);
    assert!(output.path().join("item-2-2.json").exists());
}

#[tokio::test]
async fn test_extraction_failure_is_isolated() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/phones/item-1-2"))
        .respond_with(html(r#"<div id="content"><p>Temporarily unavailable</p></div>"#))
        .with_priority(1)
        .mount(&mock_server)
        .await;
    mount_catalog(&mock_server).await;

    let output = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), output.path(), "", "");

    let report = run_harvest(&config).await.unwrap();

    assert!(report.had_failures);
    assert_eq!(report.failed, 1);
    assert_eq!(report.stored, 5);
    assert!(!output.path().join("item-1-2.json").exists());
    // First attempt plus one scraping retry
    assert_eq!(requests_to(&mock_server, "/phones/item-1-2").await, 2);
}

#[tokio::test]
async fn test_fail_fast_returns_first_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/phones/item-1-1"))
        .respond_with(ResponseTemplate::new(404))
        .with_priority(1)
        .mount(&mock_server)
        .await;
    mount_catalog(&mock_server).await;

    let output = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), output.path(), "fail-fast = true", "");

    let result = run_harvest(&config).await;

    assert!(matches!(result, Err(HarvestError::Navigation { .. })));
    assert!(!output.path().join("item-1-1.json").exists());
}

#[tokio::test]
async fn test_missing_pager_is_fatal() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/phones"))
        .respond_with(html("<p>Down for maintenance</p>"))
        .mount(&mock_server)
        .await;

    let output = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), output.path(), "", "");

    let result = run_harvest(&config).await;

    assert!(matches!(result, Err(HarvestError::Discovery(_))));
    assert!(json_files(output.path()).is_empty());
}

#[tokio::test]
async fn test_existing_records_are_not_updated() {
    let mock_server = MockServer::start().await;
    mount_catalog(&mock_server).await;

    let output = TempDir::new().unwrap();
    std::fs::write(
        output.path().join("item-3-2.json"),
        r#"{"name": "Phone 3.2", "scrapDate": "2024-01-01T00:00:00.000Z"}"#,
    )
    .unwrap();
    let config = create_test_config(&mock_server.uri(), output.path(), "", r#"update = "never""#);

    let report = run_harvest(&config).await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.stored, 5);
    assert_eq!(requests_to(&mock_server, "/phones/item-3-2").await, 0);
}

#[tokio::test]
async fn test_stale_records_are_updated() {
    let mock_server = MockServer::start().await;
    mount_catalog(&mock_server).await;

    let output = TempDir::new().unwrap();
    std::fs::write(
        output.path().join("item-3-2.json"),
        r#"{"name": "Phone 3.2", "scrapDate": "2020-01-01T00:00:00.000Z"}"#,
    )
    .unwrap();
    let config = create_test_config(
        &mock_server.uri(),
        output.path(),
        "",
        r#"update = "2021-06-01""#,
    );

    let report = run_harvest(&config).await.unwrap();

    assert_eq!(report.skipped, 0);
    assert_eq!(report.stored, 6);
    assert_eq!(requests_to(&mock_server, "/phones/item-3-2").await, 1);
}

#[tokio::test]
async fn test_sqlite_backend() {
    let mock_server = MockServer::start().await;
    mount_catalog(&mock_server).await;

    let output = TempDir::new().unwrap();
    let db_path = output.path().join("records.db");
    let config = create_test_config(
        &mock_server.uri(),
        output.path(),
        "",
        &format!("backend = \"sqlite\"\ndatabase-path = '{}'", db_path.display()),
    );

    let report = run_harvest(&config).await.unwrap();
    assert_eq!(report.stored, 6);

    let store = SqliteStore::new(&db_path).unwrap();
    assert_eq!(store.count().unwrap(), 6);
    assert!(store.existing("item-1-1").unwrap().unwrap().scraped_at.is_some());
}

#[tokio::test]
async fn test_discovery_only_stores_nothing() {
    let mock_server = MockServer::start().await;
    mount_catalog(&mock_server).await;

    let output = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), output.path(), "discovery-only = true", "");

    let report = run_harvest(&config).await.unwrap();

    assert_eq!(report.details_found, 6);
    assert_eq!(report.stored, 0);
    assert_eq!(requests_to(&mock_server, "/phones/item-1-1").await, 0);
}
