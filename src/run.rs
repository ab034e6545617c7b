//! Run orchestration for the CLI commands.
//!
//! Wires the fetcher, cache, index, and pipeline together per mode,
//! prints the end-of-run summary block, and persists it next to the URL
//! lists so interrupted runs leave a usable record behind.

use anyhow::Result;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;

use crate::cache::ContentCache;
use crate::config::Config;
use crate::db;
use crate::dedup::KeyIndex;
use crate::discover::{self, Discoverer};
use crate::fetch::Fetcher;
use crate::migrate;
use crate::models::{RunSummary, WorkItem, WorkMode};
use crate::persist::Store;
use crate::pipeline::Pipeline;
use crate::source::{CacheOnlySource, ContentSource, FetchingSource};

pub async fn init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("Database initialized at {}", config.db.path.display());
    Ok(())
}

pub async fn discover(
    config: &Config,
    search_url: &str,
    max_pages: Option<u32>,
    out: Option<&Path>,
) -> Result<()> {
    let fetcher = Fetcher::new(config.fetch.clone())?;
    let discoverer = Discoverer::new(fetcher, config.discover.clone());

    let urls = discoverer.discover(search_url, max_pages).await?;
    if urls.is_empty() {
        println!("No listing URLs found");
        return Ok(());
    }

    let path = match out {
        Some(path) => {
            discover::write_url_list(path, search_url, &urls)?;
            path.to_path_buf()
        }
        None => discover::save_url_list(&config.data.dir, search_url, &urls)?,
    };
    println!("Saved {} URLs to {}", urls.len(), path.display());
    Ok(())
}

pub async fn process(
    config: &Config,
    url_file: &Path,
    dry_run: bool,
    limit: Option<usize>,
) -> Result<()> {
    let urls = discover::load_url_list(url_file)?;
    let items: Vec<WorkItem> = urls
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|source_url| WorkItem {
            source_url,
            mode: WorkMode::Fetch,
        })
        .collect();
    if items.is_empty() {
        println!("URL list is empty, nothing to do");
        return Ok(());
    }

    let cache = ContentCache::new(&config.cache.dir)?;
    let fetcher = Fetcher::new(config.fetch.clone())?;
    let source: Arc<dyn ContentSource> =
        Arc::new(FetchingSource::new(fetcher, cache, config.cache.refetch));

    run_pipeline(config, source, items, dry_run).await
}

pub async fn reprocess_cache(config: &Config, dry_run: bool, limit: Option<usize>) -> Result<()> {
    let cache = ContentCache::new(&config.cache.dir)?;
    let keys = cache.keys().await?;
    let items: Vec<WorkItem> = keys
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|key| WorkItem {
            source_url: key,
            mode: WorkMode::CacheOnly,
        })
        .collect();
    if items.is_empty() {
        println!("Cache is empty, nothing to do");
        return Ok(());
    }
    println!("Reprocessing {} cached pages", items.len());

    let source: Arc<dyn ContentSource> = Arc::new(CacheOnlySource::new(cache));
    run_pipeline(config, source, items, dry_run).await
}

async fn run_pipeline(
    config: &Config,
    source: Arc<dyn ContentSource>,
    items: Vec<WorkItem>,
    dry_run: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    let index = Arc::new(KeyIndex::load(&pool).await?);
    println!(
        "Processing {} items ({} ids already stored, concurrency {})",
        items.len(),
        index.len().await,
        config.pipeline.concurrency
    );

    let mut pipeline_config = config.pipeline.clone();
    if dry_run {
        pipeline_config.persist = false;
        println!("Dry run: nothing will be written");
    }

    let store = Arc::new(Store::new(pool));
    let pipeline = Arc::new(Pipeline::new(source, store, index, pipeline_config));
    let outcome = pipeline.run(items).await?;

    print_summary(&outcome.summary);
    if let Err(e) = write_summary_file(&config.data.dir, &outcome.summary) {
        println!("Warning: could not write run summary file: {e:#}");
    }

    if outcome.aborted {
        anyhow::bail!("run aborted after repeated consecutive failures");
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Run summary");
    println!("  attempted:         {}", summary.attempted);
    println!("  extracted:         {}", summary.extracted);
    println!("  inserted:          {}", summary.inserted);
    println!("  updated:           {}", summary.updated);
    println!("  skipped duplicate: {}", summary.skipped_duplicate);
    println!("  failed:            {}", summary.failed);
    println!("  empty extractions: {}", summary.empty_extractions);
    for failure in &summary.failures {
        println!("  failed item: {} ({})", failure.source_url, failure.reason);
    }
}

fn write_summary_file(dir: &Path, summary: &RunSummary) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "run_summary_{}.txt",
        Utc::now().format("%Y%m%d_%H%M%S")
    ));
    let mut out = String::new();
    out.push_str(&format!("attempted: {}\n", summary.attempted));
    out.push_str(&format!("extracted: {}\n", summary.extracted));
    out.push_str(&format!("inserted: {}\n", summary.inserted));
    out.push_str(&format!("updated: {}\n", summary.updated));
    out.push_str(&format!("skipped_duplicate: {}\n", summary.skipped_duplicate));
    out.push_str(&format!("failed: {}\n", summary.failed));
    out.push_str(&format!("empty_extractions: {}\n", summary.empty_extractions));
    if !summary.failures.is_empty() {
        out.push_str("\nfailed items:\n");
        for failure in &summary.failures {
            out.push_str(&format!("{}\t{}\n", failure.source_url, failure.reason));
        }
    }
    std::fs::write(&path, out)?;
    println!("Summary written to {}", path.display());
    Ok(())
}
