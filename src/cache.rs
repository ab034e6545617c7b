//! Durable file-per-key store of raw fetched pages.
//!
//! Each entry is a JSON envelope carrying the key, source URL, body, and
//! fetch timestamp. Concurrent writes to distinct keys touch distinct
//! files, so no coordination is needed.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::models::RawContent;

pub struct ContentCache {
    dir: PathBuf,
}

impl ContentCache {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Cache key for a work item: the external id when it is known,
    /// otherwise a hex digest of the URL.
    pub fn key_for_url(url: &str) -> String {
        match crate::extract::external_id_from_url(url) {
            Some(id) => id,
            None => {
                let digest = Sha256::digest(url.as_bytes());
                format!("{digest:x}")
            }
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub async fn get(&self, key: &str) -> Result<Option<RawContent>> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read cache entry: {}", path.display()))
            }
        };
        let content: RawContent = serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt cache entry: {}", path.display()))?;
        Ok(Some(content))
    }

    /// Write through a sibling temp file and rename, so a crash mid-write
    /// can never leave a truncated entry behind.
    pub async fn put(&self, content: &RawContent) -> Result<()> {
        let path = self.path_for(&content.key);
        let tmp = self.dir.join(format!("{}.json.tmp", content.key));
        let raw = serde_json::to_string(content)?;
        tokio::fs::write(&tmp, raw)
            .await
            .with_context(|| format!("Failed to write cache entry: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to finalize cache entry: {}", path.display()))?;
        Ok(())
    }

    pub async fn contains(&self, key: &str) -> bool {
        tokio::fs::try_exists(self.path_for(key)).await.unwrap_or(false)
    }

    /// All stored keys, for the reprocess mode.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list cache directory: {}", self.dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(key: &str) -> RawContent {
        RawContent {
            key: key.to_string(),
            source_url: Some("https://example.com/homedetails/1001_zpid/".to_string()),
            body: "<html></html>".to_string(),
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path()).unwrap();
        cache.put(&sample("1001")).await.unwrap();
        let got = cache.get("1001").await.unwrap().unwrap();
        assert_eq!(got.key, "1001");
        assert_eq!(got.body, "<html></html>");
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path()).unwrap();
        assert!(cache.get("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keys_lists_stored_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path()).unwrap();
        cache.put(&sample("b")).await.unwrap();
        cache.put(&sample("a")).await.unwrap();
        assert_eq!(cache.keys().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn put_replaces_entry_without_leftover_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::new(dir.path()).unwrap();
        cache.put(&sample("1001")).await.unwrap();
        let mut newer = sample("1001");
        newer.body = "<html>v2</html>".to_string();
        cache.put(&newer).await.unwrap();

        let got = cache.get("1001").await.unwrap().unwrap();
        assert_eq!(got.body, "<html>v2</html>");
        // The rename must leave exactly the final entry, no temp files.
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["1001.json"]);
    }

    #[test]
    fn url_key_uses_external_id_when_present() {
        let key = ContentCache::key_for_url("https://example.com/homedetails/123-Main-St/4567_zpid/");
        assert_eq!(key, "4567");
    }

    #[test]
    fn url_key_falls_back_to_digest() {
        let key = ContentCache::key_for_url("https://example.com/listing/no-id-here");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
