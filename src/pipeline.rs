//! Semaphore-bounded fan-out over work items.
//!
//! Each item travels content → extract → analyze → upsert inside its own
//! task; a semaphore caps how many run at once. Per-item failures are
//! recorded and never fatal, but a streak of consecutive persistence
//! failures aborts the run, and Ctrl-C stops dispatching new items while
//! letting in-flight ones finish.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::config::PipelineConfig;
use crate::dedup::KeyIndex;
use crate::extract::Extractor;
use crate::models::{ItemOutcome, RunSummary, WorkItem, WorkMode};
use crate::persist::Store;
use crate::source::ContentSource;
use crate::waterfront::WaterfrontAnalyzer;

pub struct PipelineOutcome {
    pub summary: RunSummary,
    pub aborted: bool,
}

pub struct Pipeline {
    source: Arc<dyn ContentSource>,
    extractor: Extractor,
    analyzer: WaterfrontAnalyzer,
    store: Arc<Store>,
    index: Arc<KeyIndex>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn ContentSource>,
        store: Arc<Store>,
        index: Arc<KeyIndex>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            extractor: Extractor::new(),
            analyzer: WaterfrontAnalyzer::new(),
            store,
            index,
            config,
        }
    }

    pub async fn run(self: Arc<Self>, items: Vec<WorkItem>) -> Result<PipelineOutcome> {
        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let summary = Arc::new(Mutex::new(RunSummary::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let aborted_flag = Arc::new(AtomicBool::new(false));
        let failure_streak = Arc::new(AtomicU32::new(0));

        {
            let stop = stop.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    println!("\nInterrupt received, finishing in-flight items...");
                    stop.store(true, Ordering::SeqCst);
                }
            });
        }

        let mut tasks = JoinSet::new();
        for (position, item) in items.into_iter().enumerate() {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            let permit = semaphore.clone().acquire_owned().await?;
            let pipeline = self.clone();
            let summary = summary.clone();
            let stop = stop.clone();
            let aborted_flag = aborted_flag.clone();
            let failure_streak = failure_streak.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = pipeline.process_item(&item, &summary).await;
                match &outcome {
                    ItemOutcome::Failed { reason } => {
                        println!("[{}/{}] {} failed: {}", position + 1, total, item.source_url, reason);
                        let streak = failure_streak.fetch_add(1, Ordering::SeqCst) + 1;
                        if streak >= pipeline.config.failure_threshold {
                            println!("{streak} consecutive failures, aborting run");
                            aborted_flag.store(true, Ordering::SeqCst);
                            stop.store(true, Ordering::SeqCst);
                        }
                    }
                    other => {
                        failure_streak.store(0, Ordering::SeqCst);
                        println!(
                            "[{}/{}] {} {}",
                            position + 1,
                            total,
                            item.source_url,
                            describe(other)
                        );
                    }
                }
                summary.lock().await.record(&item, &outcome);
            });
        }

        while tasks.join_next().await.is_some() {}

        let summary = Arc::try_unwrap(summary)
            .map_err(|_| anyhow::anyhow!("summary still shared after join"))?
            .into_inner();
        let aborted = aborted_flag.load(Ordering::SeqCst);
        Ok(PipelineOutcome { summary, aborted })
    }

    async fn process_item(&self, item: &WorkItem, summary: &Mutex<RunSummary>) -> ItemOutcome {
        // When the id is already visible in the URL or cache key, decide
        // the skip before spending a fetch on it.
        if !self.config.update_existing {
            if let Some(id) = item_external_id(item) {
                if self.index.contains(&id).await {
                    return ItemOutcome::SkippedDuplicate;
                }
            }
        }

        let content = match self.source.content_for(item).await {
            Ok(content) => content,
            Err(e) => {
                return ItemOutcome::Failed {
                    reason: format!("{e:#}"),
                }
            }
        };

        let record = self.extractor.extract(&content);

        // A fetched page that matched nothing is worth flagging even
        // though it is not an error. The URL alone accounts for the id
        // and source fields.
        if record.populated_fields() <= 2 {
            summary.lock().await.empty_extractions += 1;
        }

        let external_id = match &record.external_id {
            Some(id) => id.clone(),
            None => {
                return ItemOutcome::Failed {
                    reason: "no external id in page or URL".to_string(),
                }
            }
        };

        if !self.config.update_existing && self.index.contains(&external_id).await {
            return ItemOutcome::SkippedDuplicate;
        }

        let features = self.analyzer.analyze(&record);

        if !self.config.persist {
            return ItemOutcome::Extracted;
        }

        match self.store.upsert(&record, features.as_ref(), &self.index).await {
            Ok(crate::models::UpsertOutcome::Inserted) => ItemOutcome::Inserted,
            Ok(crate::models::UpsertOutcome::Updated) => ItemOutcome::Updated,
            Err(e) => ItemOutcome::Failed {
                reason: format!("{e:#}"),
            },
        }
    }
}

/// External id knowable before any I/O: parsed from a detail-page URL,
/// or the cache key itself in reprocess mode (numeric keys are ids).
fn item_external_id(item: &WorkItem) -> Option<String> {
    match item.mode {
        WorkMode::Fetch => crate::extract::external_id_from_url(&item.source_url),
        WorkMode::CacheOnly => {
            let key = &item.source_url;
            (!key.is_empty() && key.chars().all(|c| c.is_ascii_digit())).then(|| key.clone())
        }
    }
}

fn describe(outcome: &ItemOutcome) -> &'static str {
    match outcome {
        ItemOutcome::Inserted => "inserted",
        ItemOutcome::Updated => "updated",
        ItemOutcome::SkippedDuplicate => "skipped (already stored)",
        ItemOutcome::Extracted => "extracted (not persisted)",
        ItemOutcome::Failed { .. } => "failed",
    }
}
