use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use waterline::cache::ContentCache;
use waterline::config::{FetchConfig, PipelineConfig, RefetchPolicy};
use waterline::db;
use waterline::fetch::{FetchError, Fetcher};
use waterline::dedup::KeyIndex;
use waterline::migrate;
use waterline::models::{RawContent, WorkItem, WorkMode};
use waterline::persist::Store;
use waterline::pipeline::Pipeline;
use waterline::source::{ContentSource, FetchingSource};

fn waterline_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("waterline");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("cache")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/waterline.sqlite"

[cache]
dir = "{root}/cache"

[pipeline]
concurrency = 3

[data]
dir = "{root}/data"
"#,
        root = root.display()
    );

    let config_path = root.join("waterline.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_waterline(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = waterline_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run waterline binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn listing_page(zpid: u64, price: Option<u64>, description: &str) -> String {
    let price_field = match price {
        Some(p) => format!(r#""price":{p},"#),
        None => String::new(),
    };
    format!(
        r#"<html><head>
        <script id="__NEXT_DATA__" type="application/json">
        {{"props":{{"home":{{"zpid":{zpid},{price_field}"homeStatus":"FOR_SALE",
          "bedrooms":3,"bathrooms":2,"city":"Stuart","state":"FL",
          "description":"{description}"}}}}}}
        </script></head><body></body></html>"#
    )
}

fn seed_cache(config_path: &Path, key: &str, body: &str) {
    let cache_dir = config_path.parent().unwrap().join("cache");
    let envelope = serde_json::json!({
        "key": key,
        "source_url": format!("https://example.com/homedetails/{key}_zpid/"),
        "body": body,
        "fetched_at": Utc::now().to_rfc3339(),
    });
    fs::write(
        cache_dir.join(format!("{key}.json")),
        envelope.to_string(),
    )
    .unwrap();
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_waterline(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_waterline(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_waterline(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_reprocess_cache_runs_offline() {
    let (_tmp, config_path) = setup_test_env();
    seed_cache(
        &config_path,
        "1001",
        &listing_page(1001, Some(985000), "Deep water canal home with 80' dock."),
    );
    seed_cache(
        &config_path,
        "1002",
        &listing_page(1002, Some(450000), "Quiet cul-de-sac, no water in sight."),
    );

    run_waterline(&config_path, &["init"]);
    let (stdout, stderr, success) = run_waterline(&config_path, &["reprocess-cache"]);
    assert!(success, "reprocess failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("inserted:          2"), "stdout: {stdout}");
    assert!(stdout.contains("failed:            0"), "stdout: {stdout}");

    let (stats, _, _) = run_waterline(&config_path, &["stats"]);
    assert!(stats.contains("Properties:    2"), "stats: {stats}");
    // Only the canal home carries a waterfront signal
    assert!(stats.contains("Waterfront:    1"), "stats: {stats}");
}

#[test]
fn test_reprocess_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    seed_cache(
        &config_path,
        "2001",
        &listing_page(2001, Some(700000), "Intracoastal views."),
    );

    run_waterline(&config_path, &["init"]);
    run_waterline(&config_path, &["reprocess-cache"]);
    let (stdout, _, success) = run_waterline(&config_path, &["reprocess-cache"]);
    assert!(success);
    assert!(stdout.contains("inserted:          0"), "stdout: {stdout}");
    assert!(stdout.contains("updated:           1"), "stdout: {stdout}");

    let (stats, _, _) = run_waterline(&config_path, &["stats"]);
    assert!(stats.contains("Properties:    1"), "stats: {stats}");
}

#[test]
fn test_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();
    seed_cache(
        &config_path,
        "3001",
        &listing_page(3001, Some(500000), "Bay front lot."),
    );

    run_waterline(&config_path, &["init"]);
    let (stdout, _, success) = run_waterline(&config_path, &["reprocess-cache", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("extracted:         1"), "stdout: {stdout}");

    let (stats, _, _) = run_waterline(&config_path, &["stats"]);
    assert!(stats.contains("Properties:    0"), "stats: {stats}");
}

#[test]
fn test_sparse_refetch_never_nulls_stored_fields() {
    let (_tmp, config_path) = setup_test_env();
    seed_cache(
        &config_path,
        "4001",
        &listing_page(4001, Some(850000), "Seawall and dock."),
    );
    run_waterline(&config_path, &["init"]);
    run_waterline(&config_path, &["reprocess-cache"]);

    // A later fetch of the same listing comes back without a price.
    seed_cache(
        &config_path,
        "4001",
        &listing_page(4001, None, "Seawall and dock."),
    );
    let (_, _, success) = run_waterline(&config_path, &["reprocess-cache"]);
    assert!(success);

    let db_path = config_path.parent().unwrap().join("waterline.sqlite");
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let price: Option<i64> = runtime.block_on(async {
        let pool = db::connect_path(&db_path).await.unwrap();
        sqlx::query_scalar("SELECT price FROM properties WHERE external_id = '4001'")
            .fetch_one(&pool)
            .await
            .unwrap()
    });
    assert_eq!(price, Some(850000));
}

// ---- pipeline-level tests against an instrumented source ----

struct StubSource {
    body: String,
    hits: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubSource {
    fn new(body: String) -> Self {
        Self {
            body,
            hits: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContentSource for StubSource {
    async fn content_for(&self, item: &WorkItem) -> Result<RawContent> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(RawContent {
            key: "stub".to_string(),
            source_url: Some(item.source_url.clone()),
            body: self.body.clone(),
            fetched_at: Utc::now(),
        })
    }
}

struct FailingSource;

#[async_trait]
impl ContentSource for FailingSource {
    async fn content_for(&self, _item: &WorkItem) -> Result<RawContent> {
        anyhow::bail!("connection reset")
    }
}

#[tokio::test]
async fn concurrent_duplicates_yield_one_insert() {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("test.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let source = Arc::new(StubSource::new(listing_page(
        5001,
        Some(600000),
        "Canal front with 60 ft dock.",
    )));
    let store = Arc::new(Store::new(pool.clone()));
    let index = Arc::new(KeyIndex::load(&pool).await.unwrap());
    let config = PipelineConfig {
        concurrency: 4,
        ..Default::default()
    };

    let items: Vec<WorkItem> = (0..8)
        .map(|_| WorkItem {
            source_url: "https://example.com/homedetails/5001_zpid/".to_string(),
            mode: WorkMode::Fetch,
        })
        .collect();

    let pipeline = Arc::new(Pipeline::new(source.clone(), store, index, config));
    let outcome = pipeline.run(items).await.unwrap();

    assert_eq!(outcome.summary.inserted, 1);
    assert_eq!(outcome.summary.updated, 7);
    assert!(!outcome.aborted);

    let row_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM properties")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row_count, 1);

    // The semaphore must have kept the fan-out at or under the ceiling.
    assert!(source.max_in_flight.load(Ordering::SeqCst) <= 4);
}

#[tokio::test]
async fn per_item_failures_are_recorded_not_fatal() {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("test.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let store = Arc::new(Store::new(pool.clone()));
    let index = Arc::new(KeyIndex::load(&pool).await.unwrap());
    let config = PipelineConfig {
        failure_threshold: 10,
        ..Default::default()
    };

    let items: Vec<WorkItem> = (0..3)
        .map(|i| WorkItem {
            source_url: format!("https://example.com/homedetails/{i}_zpid/"),
            mode: WorkMode::Fetch,
        })
        .collect();

    let pipeline = Arc::new(Pipeline::new(Arc::new(FailingSource), store, index, config));
    let outcome = pipeline.run(items).await.unwrap();

    assert_eq!(outcome.summary.failed, 3);
    assert_eq!(outcome.summary.failures.len(), 3);
    assert!(outcome.summary.failures[0].reason.contains("connection reset"));
    assert!(!outcome.aborted);
}

#[tokio::test]
async fn known_ids_skip_fetch_when_not_updating() {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("test.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let source = Arc::new(StubSource::new(listing_page(
        9001,
        Some(400000),
        "Lake cottage.",
    )));
    let store = Arc::new(Store::new(pool.clone()));
    let index = Arc::new(KeyIndex::empty());
    index.add("9001").await;
    let config = PipelineConfig {
        update_existing: false,
        ..Default::default()
    };

    let items = vec![WorkItem {
        source_url: "https://example.com/homedetails/9001_zpid/".to_string(),
        mode: WorkMode::Fetch,
    }];

    let pipeline = Arc::new(Pipeline::new(source.clone(), store, index, config));
    let outcome = pipeline.run(items).await.unwrap();

    assert_eq!(outcome.summary.skipped_duplicate, 1);
    // Skipping an already-stored id must not cost a fetch.
    assert_eq!(source.hits.load(Ordering::SeqCst), 0);
}

// Minimal HTTP responder that answers every request with 503 and counts
// the connections it receives.
async fn spawn_unavailable_server() -> (String, Arc<AtomicUsize>) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
            });
        }
    });
    (format!("http://{addr}"), hits)
}

#[tokio::test]
async fn fetch_retries_transient_errors_up_to_the_cap() {
    let (base, hits) = spawn_unavailable_server().await;

    let config = FetchConfig {
        timeout_secs: 5,
        max_retries: 2,
        ..Default::default()
    };
    let fetcher = Fetcher::new(config).unwrap();
    let err = fetcher
        .fetch(&format!("{base}/homedetails/1_zpid/"), "1")
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Status(503)));
    // Initial attempt plus max_retries.
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn transient_failures_produce_one_failed_entry() {
    let (base, hits) = spawn_unavailable_server().await;

    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("test.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let fetch_config = FetchConfig {
        timeout_secs: 5,
        max_retries: 2,
        ..Default::default()
    };
    let cache = ContentCache::new(&tmp.path().join("cache")).unwrap();
    let fetcher = Fetcher::new(fetch_config).unwrap();
    let source: Arc<dyn ContentSource> =
        Arc::new(FetchingSource::new(fetcher, cache, RefetchPolicy::Overwrite));

    let store = Arc::new(Store::new(pool.clone()));
    let index = Arc::new(KeyIndex::load(&pool).await.unwrap());
    let url = format!("{base}/homedetails/1_zpid/");
    let items = vec![WorkItem {
        source_url: url.clone(),
        mode: WorkMode::Fetch,
    }];

    let pipeline = Arc::new(Pipeline::new(source, store, index, PipelineConfig::default()));
    let outcome = pipeline.run(items).await.unwrap();

    // Retries are spent inside the fetcher; the pipeline sees one failure.
    assert_eq!(outcome.summary.failed, 1);
    assert_eq!(outcome.summary.failures.len(), 1);
    assert_eq!(outcome.summary.failures[0].source_url, url);
    assert!(outcome.summary.failures[0].reason.contains("503"));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert!(!outcome.aborted);
}

#[tokio::test]
async fn failure_streak_aborts_run() {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("test.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let store = Arc::new(Store::new(pool.clone()));
    let index = Arc::new(KeyIndex::load(&pool).await.unwrap());
    let config = PipelineConfig {
        concurrency: 1,
        failure_threshold: 3,
        ..Default::default()
    };

    let items: Vec<WorkItem> = (0..20)
        .map(|i| WorkItem {
            source_url: format!("https://example.com/homedetails/{i}_zpid/"),
            mode: WorkMode::Fetch,
        })
        .collect();

    let pipeline = Arc::new(Pipeline::new(Arc::new(FailingSource), store, index, config));
    let outcome = pipeline.run(items).await.unwrap();

    assert!(outcome.aborted);
    assert!(outcome.summary.attempted < 20);
}
