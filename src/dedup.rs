//! In-memory index of external ids already persisted.
//!
//! Loaded once at run start with a single key-column scan, then consulted
//! before each item is processed and extended immediately after each
//! insert. `add` returning true means this process claimed the id first,
//! which is what decides the Inserted-vs-Updated outcome under
//! concurrent duplicates.

use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tokio::sync::Mutex;

pub struct KeyIndex {
    keys: Mutex<HashSet<String>>,
}

impl KeyIndex {
    pub fn empty() -> Self {
        Self {
            keys: Mutex::new(HashSet::new()),
        }
    }

    /// Snapshot the persisted ids.
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT external_id FROM properties")
            .fetch_all(pool)
            .await?;
        Ok(Self {
            keys: Mutex::new(rows.into_iter().map(|(id,)| id).collect()),
        })
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.keys.lock().await.contains(id)
    }

    /// Returns true if the id was not present (first add wins).
    pub async fn add(&self, id: &str) -> bool {
        self.keys.lock().await.insert(id.to_string())
    }

    pub async fn len(&self) -> usize {
        self.keys.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_add_wins() {
        let index = KeyIndex::empty();
        assert!(!index.contains("42").await);
        assert!(index.add("42").await);
        assert!(!index.add("42").await);
        assert!(index.contains("42").await);
        assert_eq!(index.len().await, 1);
    }
}
