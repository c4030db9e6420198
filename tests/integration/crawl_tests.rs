//! Integration tests for the crawler
//!
//! These tests use wiremock to serve a small classified-ad site and drive the
//! full run cycle end-to-end: registry, selector module, HTTP browser, SQLite.

use adcrawl::browser::HttpLauncher;
use adcrawl::config::{parse_config, validate, Config};
use adcrawl::errors::{ErrorClassifier, LogNotifier};
use adcrawl::modules::{builtin_factories, ModuleRegistry};
use adcrawl::runner::{CrawlRunner, RunControl, RunPhase, RunSettings};
use adcrawl::storage::{RunStatus, SqliteStorage, Storage};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration for one site served by `server_uri`
fn create_test_config(server_uri: &str, dir: &Path) -> Config {
    let toml = format!(
        r#"
[runner]
inter-module-delay-ms = 50
request-delay-ms = 10

[browser]
navigation-timeout-secs = 5

[errors]
log-path = "{log}"

[storage]
database-path = "{db}"

[[site]]
name = "autosite"
base-url = "{uri}/cars"
listing-selector = "a.ad"
max-empty-pages = 2
max-pages = 20
retries = 0

[site.fields]
title = "h1"
price = ".price"
"#,
        uri = server_uri,
        log = dir.join("errors.jsonl").display(),
        db = dir.join("listings.db").display(),
    );
    let config = parse_config(&toml).expect("test config should parse");
    validate(&config).expect("test config should validate");
    config
}

async fn mount_html(server: &MockServer, route: &str, html: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(html.to_string())
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

fn build_runner(config: &Config) -> (CrawlRunner, Arc<ErrorClassifier>) {
    let errors = Arc::new(ErrorClassifier::from_config(
        &config.errors,
        Arc::new(LogNotifier),
    ));
    let registry = ModuleRegistry::discover(builtin_factories(config, Arc::clone(&errors)));
    let runner = CrawlRunner::new(
        registry,
        Arc::new(HttpLauncher::new(config.browser.clone())),
        Arc::clone(&errors),
        RunSettings::from_config(config, "integration"),
    );
    (runner, errors)
}

async fn stop_when(control: &RunControl, module: &str, processed: u64) {
    loop {
        let done = control
            .stats()
            .get(module)
            .is_some_and(|stats| stats.total_processed >= processed && stats.run_count >= 1);
        if done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    control.stop();
}

#[tokio::test]
async fn test_full_crawl_single_site() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    // The index ignores the page parameter, so page 2 repeats page 1
    mount_html(
        &server,
        "/cars",
        r#"<html><body>
            <a class="ad" href="/ad/1">Volvo</a>
            <a class="ad" href="/ad/2">Saab</a>
            <a class="ad" href="/ad/3">Gone</a>
            <a href="/about">About</a>
        </body></html>"#,
    )
    .await;
    mount_html(
        &server,
        "/ad/1",
        r#"<html><body><h1>Volvo  240</h1><p class="price">2 500 €</p></body></html>"#,
    )
    .await;
    mount_html(
        &server,
        "/ad/2",
        r#"<html><body><h1>Saab 900</h1><p class="price">4 000 €</p></body></html>"#,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/ad/3"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path());
    let (mut runner, errors) = build_runner(&config);
    assert_eq!(runner.registry().list(), vec!["autosite"]);
    let control = runner.control();

    let (result, _) = tokio::time::timeout(Duration::from_secs(30), async {
        tokio::join!(runner.start(&[]), stop_when(&control, "autosite", 2))
    })
    .await
    .expect("crawl should stop within the timeout");

    assert!(result.is_ok());
    assert_eq!(control.phase(), RunPhase::Idle);

    let stats = control.stats();
    assert_eq!(stats.get("autosite").unwrap().total_processed, 2);

    let storage = SqliteStorage::new(&dir.path().join("listings.db")).unwrap();
    assert_eq!(storage.count_listings().unwrap(), 2);

    let volvo = storage
        .get_listing(&format!("{}/ad/1", server.uri()))
        .unwrap()
        .expect("listing should be stored");
    assert_eq!(volvo.module, "autosite");
    assert_eq!(volvo.fields.get("title").map(String::as_str), Some("Volvo 240"));
    assert_eq!(volvo.fields.get("price").map(String::as_str), Some("2 500 €"));

    let run = storage.get_latest_run().unwrap().unwrap();
    assert_eq!(run.config_hash, "integration");
    assert!(matches!(
        run.status,
        RunStatus::Completed | RunStatus::Interrupted
    ));
    let module_runs = storage.get_module_runs(run.id).unwrap();
    assert_eq!(module_runs[0].module, "autosite");
    assert_eq!(module_runs[0].processed, 2);

    assert!(errors.stats().critical_keys.is_empty());
}

#[tokio::test]
async fn test_second_run_skips_stored_listings() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_html(
        &server,
        "/cars",
        r#"<html><body><a class="ad" href="/ad/1">Volvo</a></body></html>"#,
    )
    .await;
    mount_html(&server, "/ad/1", "<html><body><h1>Volvo 240</h1></body></html>").await;

    let config = create_test_config(&server.uri(), dir.path());

    let (mut runner, _) = build_runner(&config);
    let control = runner.control();
    let (first, _) = tokio::time::timeout(Duration::from_secs(30), async {
        tokio::join!(runner.start(&[]), stop_when(&control, "autosite", 1))
    })
    .await
    .expect("first run should stop");
    assert!(first.is_ok());

    let (mut runner, _) = build_runner(&config);
    let control = runner.control();
    let (second, _) = tokio::time::timeout(Duration::from_secs(30), async {
        tokio::join!(runner.start(&[]), stop_when(&control, "autosite", 0))
    })
    .await
    .expect("second run should stop");
    assert!(second.is_ok());

    assert_eq!(control.stats().get("autosite").unwrap().total_processed, 0);

    let detail_requests = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.url.path() == "/ad/1")
        .count();
    assert_eq!(detail_requests, 1);

    let storage = SqliteStorage::new(&dir.path().join("listings.db")).unwrap();
    assert_eq!(storage.count_listings().unwrap(), 1);
}

#[tokio::test]
async fn test_unknown_module_is_rejected() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path());

    let (mut runner, errors) = build_runner(&config);
    let result = runner.start(&["boats".to_string()]).await;

    assert!(matches!(result, Err(adcrawl::CrawlError::NoModules)));
    assert_eq!(runner.phase(), RunPhase::Idle);
    // The unknown name and the empty queue share one key; the second is
    // inside the cooldown
    let stats = errors.stats();
    assert_eq!(stats.hourly_counts.get("system"), Some(&1));
    assert_eq!(stats.suppressed, 1);
}
