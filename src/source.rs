//! Where pipeline items get their page content from.
//!
//! The pipeline is written against this seam so the same processing path
//! serves live fetching (with write-through caching) and offline
//! reprocessing of already-cached pages.

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::cache::ContentCache;
use crate::config::RefetchPolicy;
use crate::fetch::Fetcher;
use crate::models::{RawContent, WorkItem, WorkMode};

#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn content_for(&self, item: &WorkItem) -> Result<RawContent>;
}

/// Fetcher-backed source with write-through caching. Honors the refetch
/// policy for URLs that already have a cache entry.
pub struct FetchingSource {
    fetcher: Fetcher,
    cache: ContentCache,
    refetch: RefetchPolicy,
}

impl FetchingSource {
    pub fn new(fetcher: Fetcher, cache: ContentCache, refetch: RefetchPolicy) -> Self {
        Self {
            fetcher,
            cache,
            refetch,
        }
    }
}

#[async_trait]
impl ContentSource for FetchingSource {
    async fn content_for(&self, item: &WorkItem) -> Result<RawContent> {
        let key = ContentCache::key_for_url(&item.source_url);

        if item.mode == WorkMode::CacheOnly || self.refetch == RefetchPolicy::Skip {
            if let Some(cached) = self.cache.get(&key).await? {
                return Ok(cached);
            }
            if item.mode == WorkMode::CacheOnly {
                anyhow::bail!("no cached content for key {key}");
            }
        }

        let content = self
            .fetcher
            .fetch(&item.source_url, &key)
            .await
            .with_context(|| format!("Failed to fetch {}", item.source_url))?;
        self.cache.put(&content).await?;
        Ok(content)
    }
}

/// Cache-only source for the reprocess mode. Never touches the network.
pub struct CacheOnlySource {
    cache: ContentCache,
}

impl CacheOnlySource {
    pub fn new(cache: ContentCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ContentSource for CacheOnlySource {
    async fn content_for(&self, item: &WorkItem) -> Result<RawContent> {
        // In reprocess mode the "url" is the cache key itself.
        let key = if item.mode == WorkMode::CacheOnly {
            item.source_url.clone()
        } else {
            ContentCache::key_for_url(&item.source_url)
        };
        self.cache
            .get(&key)
            .await?
            .with_context(|| format!("no cached content for key {key}"))
    }
}
