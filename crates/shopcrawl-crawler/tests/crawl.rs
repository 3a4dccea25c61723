//! End-to-end crawls through `CrawlOrchestrator` against `wiremock`.
//!
//! Each test stands up a storefront with a sitemap index, leaf urlsets and
//! product JSON endpoints, then checks the brand results and, where a
//! checkpoint log is involved, what a second run does with it.

use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use shopcrawl_core::{BrandJob, CrawlConfig};
use shopcrawl_crawler::{
    BrandState, CheckpointEntry, CheckpointStage, CrawlOrchestrator, ErrorKind, ProductRecord,
    ProgressStore, ShutdownHandle, Stage,
};

fn test_config() -> CrawlConfig {
    CrawlConfig {
        request_delay: Duration::ZERO,
        request_timeout: Duration::from_secs(5),
        max_retries: 2,
        backoff_base: Duration::from_millis(5),
        backoff_cap: Duration::from_millis(10),
        user_agent: "shopcrawl-test/0.1".to_owned(),
        ..CrawlConfig::default()
    }
}

fn sitemap_index(children: &[String]) -> String {
    let entries: String = children
        .iter()
        .map(|loc| format!("<sitemap><loc>{loc}</loc></sitemap>"))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{entries}</sitemapindex>"#
    )
}

fn urlset(locations: &[String]) -> String {
    let entries: String = locations
        .iter()
        .map(|loc| format!("<url><loc>{loc}</loc><changefreq>daily</changefreq></url>"))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{entries}</urlset>"#
    )
}

async fn mount_xml(server: &MockServer, at: &str, body: String, times: u64) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/xml")
                .set_body_string(body),
        )
        .expect(times)
        .mount(server)
        .await;
}

async fn mount_product(server: &MockServer, handle: &str, id: i64, times: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/products/{handle}.json")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"product": {"id": id, "title": format!("Product {handle}")}})),
        )
        .expect(times)
        .mount(server)
        .await;
}

fn job(name: &str, server: &MockServer, seed: &str) -> BrandJob {
    BrandJob::new(
        name,
        &server.uri(),
        vec![format!("{}{seed}", server.uri())],
    )
}

#[tokio::test]
async fn crawls_index_into_products_and_records_failures() {
    let server = MockServer::start().await;
    let uri = server.uri();

    mount_xml(
        &server,
        "/sitemap.xml",
        sitemap_index(&[format!("{uri}/sitemap_products_1.xml")]),
        1,
    )
    .await;
    mount_xml(
        &server,
        "/sitemap_products_1.xml",
        urlset(&[
            format!("{uri}/products/a"),
            format!("{uri}/products/b"),
            format!("{uri}/pages/about"),
        ]),
        1,
    )
    .await;
    mount_product(&server, "a", 1, 1).await;
    Mock::given(method("GET"))
        .and(path("/products/b.json"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = CrawlOrchestrator::new(test_config()).unwrap();
    let results = orchestrator
        .run(&[job("Cann", &server, "/sitemap.xml")])
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    let cann = &results[0];
    assert_eq!(cann.state, BrandState::Done);
    assert_eq!(cann.sitemap_urls.len(), 2);
    assert_eq!(
        cann.product_urls.as_slice(),
        [format!("{uri}/products/a"), format!("{uri}/products/b")]
    );

    assert_eq!(cann.products.len(), 1);
    assert_eq!(cann.products[0].source_url, format!("{uri}/products/a"));
    assert_eq!(
        cann.products[0].json_endpoint_url,
        format!("{uri}/products/a.json")
    );

    assert_eq!(cann.errors.len(), 1);
    let error = &cann.errors[0];
    assert_eq!(error.url, format!("{uri}/products/b"));
    assert_eq!(error.stage, Stage::Product);
    assert_eq!(error.error_kind, ErrorKind::FetchHttpError);
    assert_eq!(error.attempt_count, 1);
}

#[tokio::test]
async fn product_listed_in_two_sitemaps_is_fetched_once() {
    let server = MockServer::start().await;
    let uri = server.uri();

    mount_xml(
        &server,
        "/sitemap.xml",
        sitemap_index(&[format!("{uri}/leaf_1.xml"), format!("{uri}/leaf_2.xml")]),
        1,
    )
    .await;
    mount_xml(
        &server,
        "/leaf_1.xml",
        urlset(&[format!("{uri}/products/a")]),
        1,
    )
    .await;
    mount_xml(
        &server,
        "/leaf_2.xml",
        urlset(&[
            format!("{uri}/products/a/?variant=7"),
            format!("{uri}/products/b"),
        ]),
        1,
    )
    .await;
    mount_product(&server, "a", 1, 1).await;
    mount_product(&server, "b", 2, 1).await;

    let orchestrator = CrawlOrchestrator::new(test_config()).unwrap();
    let results = orchestrator
        .run(&[job("High Rise", &server, "/sitemap.xml")])
        .await
        .unwrap();

    let brand = &results[0];
    assert_eq!(brand.state, BrandState::Done);
    assert_eq!(brand.product_urls.len(), 2);
    assert_eq!(brand.products.len(), 2);
    assert!(brand.errors.is_empty());
}

#[tokio::test]
async fn sitemap_cycles_terminate_with_each_node_fetched_once() {
    let server = MockServer::start().await;
    let uri = server.uri();

    mount_xml(
        &server,
        "/sitemap.xml",
        sitemap_index(&[format!("{uri}/sitemap.xml"), format!("{uri}/child.xml")]),
        1,
    )
    .await;
    mount_xml(
        &server,
        "/child.xml",
        sitemap_index(&[format!("{uri}/sitemap.xml"), format!("{uri}/leaf.xml")]),
        1,
    )
    .await;
    mount_xml(
        &server,
        "/leaf.xml",
        urlset(&[format!("{uri}/products/a")]),
        1,
    )
    .await;
    mount_product(&server, "a", 1, 1).await;

    let orchestrator = CrawlOrchestrator::new(test_config()).unwrap();
    let results = orchestrator
        .run(&[job("BREZ", &server, "/sitemap.xml")])
        .await
        .unwrap();

    let brand = &results[0];
    assert_eq!(brand.state, BrandState::Done);
    assert_eq!(brand.sitemap_urls.len(), 3);
    assert_eq!(brand.products.len(), 1);
}

#[tokio::test]
async fn broken_child_sitemap_does_not_stop_siblings() {
    let server = MockServer::start().await;
    let uri = server.uri();

    mount_xml(
        &server,
        "/sitemap.xml",
        sitemap_index(&[
            format!("{uri}/missing.xml"),
            format!("{uri}/garbage.xml"),
            format!("{uri}/leaf.xml"),
        ]),
        1,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/missing.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    mount_xml(
        &server,
        "/garbage.xml",
        "<html><body>maintenance</body></html>".to_owned(),
        1,
    )
    .await;
    mount_xml(
        &server,
        "/leaf.xml",
        urlset(&[format!("{uri}/products/a")]),
        1,
    )
    .await;
    mount_product(&server, "a", 1, 1).await;

    let orchestrator = CrawlOrchestrator::new(test_config()).unwrap();
    let results = orchestrator
        .run(&[job("Cann", &server, "/sitemap.xml")])
        .await
        .unwrap();

    let brand = &results[0];
    assert_eq!(brand.state, BrandState::Done);
    assert_eq!(brand.products.len(), 1);
    let kinds: Vec<(Stage, ErrorKind)> = brand
        .errors
        .iter()
        .map(|e| (e.stage, e.error_kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (Stage::Sitemap, ErrorKind::FetchHttpError),
            (Stage::Sitemap, ErrorKind::SitemapParseError),
        ]
    );
}

#[tokio::test]
async fn node_limit_marks_brand_failed_partial() {
    let server = MockServer::start().await;
    let uri = server.uri();

    mount_xml(
        &server,
        "/sitemap.xml",
        sitemap_index(&[
            format!("{uri}/leaf_1.xml"),
            format!("{uri}/leaf_2.xml"),
            format!("{uri}/leaf_3.xml"),
        ]),
        1,
    )
    .await;
    mount_xml(
        &server,
        "/leaf_1.xml",
        urlset(&[format!("{uri}/products/a")]),
        1,
    )
    .await;
    mount_product(&server, "a", 1, 0).await;

    let config = CrawlConfig {
        max_sitemap_nodes: 2,
        ..test_config()
    };
    let orchestrator = CrawlOrchestrator::new(config).unwrap();
    let results = orchestrator
        .run(&[job("Cann", &server, "/sitemap.xml")])
        .await
        .unwrap();

    let brand = &results[0];
    assert_eq!(brand.state, BrandState::FailedPartial);
    assert_eq!(brand.sitemap_urls.len(), 2);
    assert_eq!(brand.product_urls.len(), 1);
    assert!(brand.products.is_empty());
    let last = brand.errors.last().unwrap();
    assert_eq!(last.error_kind, ErrorKind::SitemapNodeLimitExceeded);
    assert_eq!(last.url, format!("{uri}/leaf_2.xml"));
}

#[tokio::test]
async fn brand_without_seeds_fails_partial_without_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let orchestrator = CrawlOrchestrator::new(test_config()).unwrap();
    let seedless = BrandJob::new("Seedless", &server.uri(), Vec::<String>::new());
    let results = orchestrator.run(&[seedless]).await.unwrap();

    assert_eq!(results[0].state, BrandState::FailedPartial);
    assert_eq!(results[0].errors[0].error_kind, ErrorKind::NoSeedSitemaps);
    assert_eq!(orchestrator.fetcher().requests_sent(), 0);
}

#[tokio::test]
async fn fetch_budget_exhaustion_fails_partial() {
    let server = MockServer::start().await;
    let uri = server.uri();

    mount_xml(
        &server,
        "/sitemap.xml",
        sitemap_index(&[format!("{uri}/leaf.xml")]),
        1,
    )
    .await;
    mount_xml(
        &server,
        "/leaf.xml",
        urlset(&[format!("{uri}/products/a")]),
        1,
    )
    .await;
    mount_product(&server, "a", 1, 0).await;

    let config = CrawlConfig {
        max_fetches_per_brand: Some(2),
        ..test_config()
    };
    let orchestrator = CrawlOrchestrator::new(config).unwrap();
    let results = orchestrator
        .run(&[job("Cann", &server, "/sitemap.xml")])
        .await
        .unwrap();

    let brand = &results[0];
    assert_eq!(brand.state, BrandState::FailedPartial);
    let error = brand.errors.last().unwrap();
    assert_eq!(error.error_kind, ErrorKind::FetchBudgetExhausted);
    assert_eq!(error.stage, Stage::Product);
}

#[tokio::test]
async fn max_products_per_brand_stops_resolution_early() {
    let server = MockServer::start().await;
    let uri = server.uri();

    mount_xml(
        &server,
        "/sitemap.xml",
        urlset(&[format!("{uri}/products/a"), format!("{uri}/products/b")]),
        1,
    )
    .await;
    mount_product(&server, "a", 1, 1).await;
    mount_product(&server, "b", 2, 0).await;

    let config = CrawlConfig {
        max_products_per_brand: Some(1),
        ..test_config()
    };
    let orchestrator = CrawlOrchestrator::new(config).unwrap();
    let results = orchestrator
        .run(&[job("Cann", &server, "/sitemap.xml")])
        .await
        .unwrap();

    assert_eq!(results[0].state, BrandState::Done);
    assert_eq!(results[0].products.len(), 1);
    assert_eq!(results[0].product_urls.len(), 2);
}

#[tokio::test]
async fn invalid_product_payloads_are_classified() {
    let server = MockServer::start().await;
    let uri = server.uri();

    mount_xml(
        &server,
        "/sitemap.xml",
        urlset(&[format!("{uri}/products/html"), format!("{uri}/products/blank")]),
        1,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/products/html.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<!DOCTYPE html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/products/blank.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"product": {"id": 3}})))
        .mount(&server)
        .await;

    let orchestrator = CrawlOrchestrator::new(test_config()).unwrap();
    let results = orchestrator
        .run(&[job("Cann", &server, "/sitemap.xml")])
        .await
        .unwrap();

    let kinds: Vec<ErrorKind> = results[0].errors.iter().map(|e| e.error_kind).collect();
    assert_eq!(
        kinds,
        vec![ErrorKind::ProductJsonInvalid, ErrorKind::ProductFieldsMissing]
    );
    assert_eq!(results[0].state, BrandState::Done);
}

#[tokio::test]
async fn concurrent_brands_come_back_in_input_order() {
    let server = MockServer::start().await;
    let uri = server.uri();

    mount_xml(
        &server,
        "/one.xml",
        urlset(&[format!("{uri}/products/one")]),
        1,
    )
    .await;
    mount_xml(
        &server,
        "/two.xml",
        urlset(&[format!("{uri}/products/two")]),
        1,
    )
    .await;
    mount_product(&server, "one", 1, 1).await;
    mount_product(&server, "two", 2, 1).await;

    let config = CrawlConfig {
        max_concurrent_brands: 2,
        ..test_config()
    };
    let orchestrator = CrawlOrchestrator::new(config).unwrap();
    let results = orchestrator
        .run(&[job("One", &server, "/one.xml"), job("Two", &server, "/two.xml")])
        .await
        .unwrap();

    let names: Vec<&str> = results.iter().map(|r| r.brand_name.as_str()).collect();
    assert_eq!(names, vec!["One", "Two"]);
    assert!(results.iter().all(|r| r.state == BrandState::Done));
}

#[tokio::test]
async fn shutdown_before_run_leaves_brands_pending() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let orchestrator = CrawlOrchestrator::new(test_config()).unwrap();
    orchestrator.shutdown_handle().request();
    let results = orchestrator
        .run(&[job("Cann", &server, "/sitemap.xml")])
        .await
        .unwrap();

    assert_eq!(results[0].state, BrandState::Pending);
    assert!(results[0].products.is_empty());
}

/// Serves a valid product and asks the crawl to stop while doing so.
struct StopAfterServing {
    shutdown: ShutdownHandle,
    id: i64,
}

impl Respond for StopAfterServing {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.shutdown.request();
        ResponseTemplate::new(200)
            .set_body_json(json!({"product": {"id": self.id, "title": "Stops the crawl"}}))
    }
}

#[tokio::test]
async fn shutdown_mid_brand_resumes_remaining_products() {
    let server = MockServer::start().await;
    let uri = server.uri();
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("crawl.jsonl");

    let handles = ["a", "b", "c", "d"];
    mount_xml(
        &server,
        "/sitemap.xml",
        urlset(&handles.map(|h| format!("{uri}/products/{h}"))),
        1,
    )
    .await;
    mount_product(&server, "a", 1, 1).await;
    mount_product(&server, "b", 2, 1).await;
    mount_product(&server, "d", 4, 1).await;

    let config = CrawlConfig {
        checkpoint_path: Some(log.clone()),
        checkpoint_batch_size: 10,
        ..test_config()
    };
    let jobs = [job("Cann", &server, "/sitemap.xml")];

    let first = CrawlOrchestrator::from_config(config.clone()).await.unwrap();
    Mock::given(method("GET"))
        .and(path("/products/c.json"))
        .respond_with(StopAfterServing {
            shutdown: first.shutdown_handle(),
            id: 3,
        })
        .expect(1)
        .mount(&server)
        .await;

    let interrupted = first.run(&jobs).await.unwrap();
    assert_eq!(interrupted[0].state, BrandState::ResolvingProducts);
    assert_eq!(interrupted[0].products.len(), 3);
    assert_eq!(first.fetcher().requests_sent(), 4);

    let entries = ProgressStore::read_entries(&log).await.unwrap();
    let last = entries.last().unwrap();
    assert_eq!(last.stage, CheckpointStage::ProductBatch);
    assert_eq!(last.processed_urls.len(), 3);

    let second = CrawlOrchestrator::from_config(config).await.unwrap();
    let resumed = second.run(&jobs).await.unwrap();
    assert_eq!(resumed[0].state, BrandState::Done);
    let sources: Vec<String> = resumed[0]
        .products
        .iter()
        .map(|p| p.source_url.clone())
        .collect();
    assert_eq!(sources, handles.map(|h| format!("{uri}/products/{h}")));
    assert_eq!(second.fetcher().requests_sent(), 1);
}

#[tokio::test]
async fn concurrent_brands_share_one_checkpoint_log() {
    let server = MockServer::start().await;
    let uri = server.uri();
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("crawl.jsonl");

    let brands = ["one", "two", "three"];
    for (b, brand) in brands.iter().enumerate() {
        let handles: Vec<String> = (0..3).map(|i| format!("{brand}-{i}")).collect();
        mount_xml(
            &server,
            &format!("/{brand}.xml"),
            urlset(
                &handles
                    .iter()
                    .map(|h| format!("{uri}/products/{h}"))
                    .collect::<Vec<_>>(),
            ),
            1,
        )
        .await;
        for (i, handle) in handles.iter().enumerate() {
            let id = i64::try_from(b * 10 + i).unwrap();
            mount_product(&server, handle, id, 1).await;
        }
    }

    let config = CrawlConfig {
        checkpoint_path: Some(log.clone()),
        checkpoint_batch_size: 1,
        max_concurrent_brands: 3,
        ..test_config()
    };
    let jobs: Vec<BrandJob> = brands
        .iter()
        .map(|brand| job(brand, &server, &format!("/{brand}.xml")))
        .collect();
    let orchestrator = CrawlOrchestrator::from_config(config).await.unwrap();
    let results = orchestrator.run(&jobs).await.unwrap();
    assert!(results.iter().all(|r| r.state == BrandState::Done));

    let raw = std::fs::read_to_string(&log).unwrap();
    let mut per_brand = std::collections::HashMap::<String, usize>::new();
    for line in raw.lines() {
        let entry: CheckpointEntry = serde_json::from_str(line)
            .unwrap_or_else(|e| panic!("checkpoint line does not decode ({e}): {line}"));
        *per_brand.entry(entry.brand_name).or_default() += 1;
    }
    // expanded + one batch per product + resolved
    for brand in brands {
        assert_eq!(per_brand.get(brand), Some(&5), "entries for {brand}");
    }
}

#[tokio::test]
async fn resume_skips_finished_work() {
    let server = MockServer::start().await;
    let uri = server.uri();
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("crawl.jsonl");

    // Brand A finished in an earlier run; brand B got through one of two products.
    {
        let (store, _) = ProgressStore::open(&log).await.unwrap();
        let record = |handle: &str| ProductRecord {
            source_url: format!("{uri}/products/{handle}"),
            json_endpoint_url: format!("{uri}/products/{handle}.json"),
            payload: Some(json!({"product": {"id": 1, "title": handle}})),
            fetched_at: chrono::Utc::now(),
        };

        let mut a_expanded = CheckpointEntry::new("A", CheckpointStage::SitemapsExpanded);
        a_expanded.processed_urls = vec![format!("{uri}/a.xml")];
        a_expanded.product_urls = vec![format!("{uri}/products/alpha")];
        store.append(&a_expanded).await.unwrap();

        let mut a_done = CheckpointEntry::new("A", CheckpointStage::ProductsResolved);
        a_done.processed_urls = vec![format!("{uri}/products/alpha")];
        a_done.products = vec![record("alpha")];
        store.append(&a_done).await.unwrap();

        let mut b_expanded = CheckpointEntry::new("B", CheckpointStage::SitemapsExpanded);
        b_expanded.processed_urls = vec![format!("{uri}/b.xml")];
        b_expanded.product_urls = vec![
            format!("{uri}/products/beta-1"),
            format!("{uri}/products/beta-2"),
        ];
        store.append(&b_expanded).await.unwrap();

        let mut b_batch = CheckpointEntry::new("B", CheckpointStage::ProductBatch);
        b_batch.processed_urls = vec![format!("{uri}/products/beta-1")];
        b_batch.products = vec![record("beta-1")];
        store.append(&b_batch).await.unwrap();
    }

    mount_xml(&server, "/a.xml", urlset(&[]), 0).await;
    mount_xml(&server, "/b.xml", urlset(&[]), 0).await;
    mount_product(&server, "alpha", 1, 0).await;
    mount_product(&server, "beta-1", 2, 0).await;
    mount_product(&server, "beta-2", 3, 1).await;

    let config = CrawlConfig {
        checkpoint_path: Some(log.clone()),
        ..test_config()
    };
    let jobs = [job("A", &server, "/a.xml"), job("B", &server, "/b.xml")];
    let orchestrator = CrawlOrchestrator::from_config(config).await.unwrap();
    let results = orchestrator.run(&jobs).await.unwrap();

    assert_eq!(results[0].state, BrandState::Done);
    assert_eq!(results[0].products.len(), 1);
    assert_eq!(results[1].state, BrandState::Done);
    let b_products: Vec<&str> = results[1]
        .products
        .iter()
        .map(|p| p.source_url.as_str())
        .collect();
    assert_eq!(
        b_products,
        vec![
            format!("{uri}/products/beta-1"),
            format!("{uri}/products/beta-2")
        ]
    );
    assert_eq!(orchestrator.fetcher().requests_sent(), 1);
}

#[tokio::test]
async fn second_run_over_complete_log_issues_no_requests() {
    let server = MockServer::start().await;
    let uri = server.uri();
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("crawl.jsonl");

    mount_xml(
        &server,
        "/sitemap.xml",
        urlset(&[format!("{uri}/products/a"), format!("{uri}/products/b")]),
        1,
    )
    .await;
    mount_product(&server, "a", 1, 1).await;
    mount_product(&server, "b", 2, 1).await;

    let config = CrawlConfig {
        checkpoint_path: Some(log.clone()),
        checkpoint_batch_size: 1,
        ..test_config()
    };
    let jobs = [job("Cann", &server, "/sitemap.xml")];

    let first = CrawlOrchestrator::from_config(config.clone())
        .await
        .unwrap()
        .run(&jobs)
        .await
        .unwrap();

    let second_orchestrator = CrawlOrchestrator::from_config(config).await.unwrap();
    let second = second_orchestrator.run(&jobs).await.unwrap();

    assert_eq!(second_orchestrator.fetcher().requests_sent(), 0);
    assert_eq!(first[0].state, second[0].state);
    assert_eq!(first[0].product_urls, second[0].product_urls);
    assert_eq!(first[0].products, second[0].products);
    assert_eq!(first[0].sitemap_urls, second[0].sitemap_urls);
}
