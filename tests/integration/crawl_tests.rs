//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full crawl cycle end-to-end against a SQLite file.

use parsonic::config::{parse_config, Config};
use parsonic::crawler::{Coordinator, HttpFetcher, RunSummary, StartMode};
use parsonic::state::{FrontierItem, FrontierStatus};
use parsonic::storage::{RunStatus, SqliteStorage, Storage};
use parsonic::SelectorStore;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration seeded at `{base_url}/list`
fn create_test_config(base_url: &str, db_path: &Path) -> Config {
    let content = format!(
        r#"
seeds = ["{base}/list"]

[crawler]
max-depth = 2
concurrency = 3
max-attempts = 3
base-retry-delay-ms = 10
max-retry-delay-ms = 50
checkpoint-interval = 1

[rate-limit]
requests-per-second = 1000.0
burst = 100
adaptive = false

[thermal]
enabled = false

[output]
database-path = "{db}"

[[page-types]]
name = "listing"
links = [{{ css = "a.biz", kind = "detail" }}, {{ css = "a.next", kind = "pagination" }}]

[[page-types]]
name = "detail"
fields.company_name = ["h1.name"]
fields.phone = [".phone"]
fields.email = [{{ css = "a.mail", attribute = "href" }}]
"#,
        base = base_url,
        db = db_path.display()
    );
    parse_config(&content).expect("Failed to parse test config")
}

async fn run_crawl(config: &Config, mode: StartMode) -> RunSummary {
    let storage = SqliteStorage::new(Path::new(&config.output.database_path))
        .expect("Failed to open database");
    let fetcher = HttpFetcher::from_config(&config.fetcher, false).expect("Failed to build fetcher");
    let selectors = Arc::new(SelectorStore::new(config.selector_set()));

    Coordinator::new(config, storage, Arc::new(fetcher), selectors)
        .with_config_hash("test-hash")
        .run(mode)
        .await
        .expect("Crawl failed")
}

fn open(config: &Config) -> SqliteStorage {
    SqliteStorage::new(Path::new(&config.output.database_path)).expect("Failed to reopen database")
}

async fn mount_html(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body.to_string())
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_crawl_listing_to_details() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), &temp_dir.path().join("crawl.db"));

    mount_html(
        &mock_server,
        "/list",
        r#"<html><body>
            <a class="biz" href="/biz/acme">Acme</a>
            <a class="biz" href="/biz/bolt">Bolt</a>
            <a class="next" href="/list2">Next</a>
        </body></html>"#,
    )
    .await;
    mount_html(
        &mock_server,
        "/list2",
        r#"<html><body><a class="biz" href="/biz/cog">Cog</a></body></html>"#,
    )
    .await;
    mount_html(
        &mock_server,
        "/biz/acme",
        r#"<html><body><h1 class="name">Acme Plumbing</h1>
            <p class="phone">(555) 010-0100</p>
            <a class="mail" href="mailto:info@acme.test">Email</a></body></html>"#,
    )
    .await;
    mount_html(
        &mock_server,
        "/biz/bolt",
        r#"<html><body><h1 class="name">Bolt Electric</h1><p class="phone">555-0200</p></body></html>"#,
    )
    .await;
    mount_html(
        &mock_server,
        "/biz/cog",
        r#"<html><body><h1 class="name">Cog Repair</h1></body></html>"#,
    )
    .await;

    let summary = run_crawl(&config, StartMode::Fresh).await;

    assert_eq!(summary.succeeded, 5, "2 listings + 3 details");
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.inserted, 3);
    assert!(!summary.cancelled);

    let storage = open(&config);
    assert_eq!(storage.count_records().unwrap(), 3);

    let records: Vec<_> = storage
        .query(Default::default())
        .collect::<Result<_, _>>()
        .unwrap();
    let acme = records
        .iter()
        .find(|r| r.record.get("company_name") == "Acme Plumbing")
        .expect("Acme should be stored");
    assert_eq!(acme.record.get("phone"), "(555) 010-0100");
    assert_eq!(acme.record.get("email"), "info@acme.test");
    assert_eq!(acme.record.page_type, "detail");

    let run = storage.get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.config_hash, "test-hash");
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), &temp_dir.path().join("crawl.db"));

    mount_html(
        &mock_server,
        "/list",
        r#"<a class="biz" href="/biz/down">Down</a><a class="biz" href="/biz/gone">Gone</a>"#,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/biz/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/biz/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let summary = run_crawl(&config, StartMode::Fresh).await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.retried, 2);

    let counts = open(&config).count_frontier_by_status().unwrap();
    assert_eq!(counts.get(&FrontierStatus::FailedPermanent), Some(&2));
    assert_eq!(counts.get(&FrontierStatus::Succeeded), Some(&1));
}

#[tokio::test]
async fn test_duplicate_links_and_records_are_merged() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), &temp_dir.path().join("crawl.db"));

    mount_html(
        &mock_server,
        "/list",
        r#"<a class="biz" href="/biz/acme">A</a>
           <a class="biz" href="/biz/acme#reviews">A again</a>
           <a class="biz" href="/biz/acme-mirror">Mirror</a>"#,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/biz/acme"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<h1 class="name">Acme Plumbing</h1><p class="phone">555-0100</p>"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_html(
        &mock_server,
        "/biz/acme-mirror",
        r#"<h1 class="name">ACME plumbing</h1><p class="phone">555 0100</p>
           <a class="mail" href="mailto:hi@acme.test">mail</a>"#,
    )
    .await;

    let summary = run_crawl(&config, StartMode::Fresh).await;

    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.updated, 1);

    let storage = open(&config);
    assert_eq!(storage.count_records().unwrap(), 1);
    let record = storage
        .query(Default::default())
        .next()
        .unwrap()
        .unwrap();
    assert_eq!(record.version, 2);
    assert_eq!(record.record.get("email"), "hi@acme.test");
}

#[tokio::test]
async fn test_resume_continues_checkpointed_frontier() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&base_url, &temp_dir.path().join("crawl.db"));

    // An interrupted run: the listing is done and one detail was in flight
    let run_id = {
        let mut storage = open(&config);
        let run_id = storage.create_run("test-hash").unwrap();
        let domain = "127.0.0.1".to_string();

        let mut listing = FrontierItem::new(
            format!("{}/list", base_url),
            0,
            domain.clone(),
            "listing".to_string(),
        );
        listing.status = FrontierStatus::Succeeded;

        let mut detail = FrontierItem::new(
            format!("{}/biz/acme", base_url),
            1,
            domain,
            "detail".to_string(),
        );
        detail.status = FrontierStatus::InFlight;
        detail.attempt_count = 1;
        detail.discovered_from = Some(listing.url.clone());

        storage.save_checkpoint(&[listing, detail]).unwrap();
        storage
            .update_run_status(run_id, RunStatus::Interrupted)
            .unwrap();
        run_id
    };

    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;
    mount_html(
        &mock_server,
        "/biz/acme",
        r#"<h1 class="name">Acme Plumbing</h1><p class="phone">555-0100</p>"#,
    )
    .await;

    let summary = run_crawl(&config, StartMode::Resume).await;

    assert_eq!(summary.run_id, run_id);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.inserted, 1);

    let storage = open(&config);
    assert_eq!(
        storage.get_run(run_id).unwrap().status,
        RunStatus::Completed
    );
    let counts = storage.count_frontier_by_status().unwrap();
    assert_eq!(counts.get(&FrontierStatus::Succeeded), Some(&2));
}

#[tokio::test]
async fn test_fresh_start_ignores_checkpoint() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), &temp_dir.path().join("crawl.db"));

    mount_html(&mock_server, "/list", "<p>empty listing</p>").await;

    let first = run_crawl(&config, StartMode::Fresh).await;
    let second = run_crawl(&config, StartMode::Fresh).await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(second.succeeded, 1);
    assert_eq!(open(&config).load_checkpoint().unwrap().len(), 1);
}

#[tokio::test]
async fn test_robots_disallow_is_respected() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), &temp_dir.path().join("crawl.db"));

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /biz/private\n"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_html(
        &mock_server,
        "/list",
        r#"<a class="biz" href="/biz/open">Open</a><a class="biz" href="/biz/private">Private</a>"#,
    )
    .await;
    mount_html(
        &mock_server,
        "/biz/open",
        r#"<h1 class="name">Open Door Co</h1><p class="phone">555-0300</p>"#,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/biz/private"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let summary = run_crawl(&config, StartMode::Fresh).await;

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.retried, 0);
    assert_eq!(open(&config).count_records().unwrap(), 1);
}

#[tokio::test]
async fn test_seed_with_trailing_slash_is_fetched_as_given() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config(&mock_server.uri(), &temp_dir.path().join("crawl.db"));
    config.seeds = vec![format!("{}/dir/", mock_server.uri())];

    Mock::given(method("GET"))
        .and(path("/dir/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"<a class="biz" href="acme">Acme</a>"#),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_html(
        &mock_server,
        "/dir/acme",
        r#"<h1 class="name">Acme Plumbing</h1><p class="phone">555-0100</p>"#,
    )
    .await;

    let summary = run_crawl(&config, StartMode::Fresh).await;

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.inserted, 1);
}
