//! In-memory store
//!
//! Used when no database is configured and throughout the tests.
//! Enforces the same uniqueness rules as the Postgres schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{EventStore, NewsStore};
use crate::error::{NewsroomError, Result};
use crate::schemas::{CalendarEvent, NewsRecord};

#[derive(Default)]
pub struct MemoryStore {
    news: RwLock<Vec<NewsRecord>>,
    events: RwLock<BTreeMap<String, CalendarEvent>>,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store
    pub fn with_records(records: Vec<NewsRecord>) -> Self {
        let store = Self::new();
        *store.news.write() = records;
        store
    }

    pub fn records(&self) -> Vec<NewsRecord> {
        self.news.read().clone()
    }

    pub fn events(&self) -> Vec<CalendarEvent> {
        self.events.read().values().cloned().collect()
    }

    /// Number of `create` calls, including failed ones
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::Relaxed)
    }

    /// Number of `update` calls, including failed ones
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl NewsStore for MemoryStore {
    async fn find_all_by_hashes(&self, hashes: &[String]) -> Result<Vec<NewsRecord>> {
        let wanted: HashSet<&str> = hashes.iter().map(String::as_str).collect();
        Ok(self
            .news
            .read()
            .iter()
            .filter(|r| wanted.contains(r.hash.as_str()))
            .cloned()
            .collect())
    }

    async fn find_all_by_urls(&self, urls: &[String]) -> Result<Vec<NewsRecord>> {
        let wanted: HashSet<&str> = urls.iter().map(String::as_str).collect();
        Ok(self
            .news
            .read()
            .iter()
            .filter(|r| wanted.contains(r.url.as_str()))
            .cloned()
            .collect())
    }

    async fn create(&self, records: &[NewsRecord]) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::Relaxed);
        let mut news = self.news.write();

        let mut hashes: HashSet<String> = news.iter().map(|r| r.hash.clone()).collect();
        let mut urls: HashSet<String> = news.iter().map(|r| r.url.clone()).collect();
        for record in records {
            if !hashes.insert(record.hash.clone()) {
                return Err(NewsroomError::StorageError(format!("duplicate hash {}", record.hash)));
            }
            if !urls.insert(record.url.clone()) {
                return Err(NewsroomError::StorageError(format!("duplicate url {}", record.url)));
            }
        }

        news.extend(records.iter().cloned());
        Ok(())
    }

    async fn update(&self, record: &NewsRecord) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::Relaxed);
        let mut news = self.news.write();

        match news.iter_mut().find(|r| r.hash == record.hash) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(NewsroomError::StorageError(format!("no record with hash {}", record.hash))),
        }
    }

    async fn find_all_until_date(&self, cutoff: DateTime<Utc>) -> Result<Vec<NewsRecord>> {
        let mut found: Vec<NewsRecord> = self
            .news
            .read()
            .iter()
            .filter(|r| r.published_at.is_some_and(|at| at >= cutoff))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.published_at);
        Ok(found)
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn find_events(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<CalendarEvent>> {
        let mut found: Vec<CalendarEvent> = self
            .events
            .read()
            .values()
            .filter(|e| e.date_time >= from && e.date_time < to)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.date_time.cmp(&b.date_time).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn upsert_events(&self, events: &[CalendarEvent]) -> Result<()> {
        let mut stored = self.events.write();
        for event in events {
            stored.insert(event.id.clone(), event.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::News;

    fn record(title: &str, link: &str) -> NewsRecord {
        NewsRecord::from_news(&News::with_date(title, "", link, Utc::now(), "feed"))
    }

    #[tokio::test]
    async fn test_create_is_all_or_nothing() {
        let store = MemoryStore::with_records(vec![record("a", "https://x.io/a")]);

        let batch = vec![record("b", "https://x.io/b"), record("a2", "https://x.io/a")];
        assert!(store.create(&batch).await.is_err());
        assert_eq!(store.records().len(), 1);

        store.create(&batch[..1]).await.unwrap();
        assert_eq!(store.records().len(), 2);
    }

    #[tokio::test]
    async fn test_lookups_by_hash_and_url() {
        let a = record("a", "https://x.io/a");
        let store = MemoryStore::with_records(vec![a.clone()]);

        assert_eq!(store.find_all_by_hashes(&[a.hash.clone()]).await.unwrap().len(), 1);
        assert_eq!(store.find_all_by_urls(&[a.url.clone()]).await.unwrap().len(), 1);
        assert!(store.find_all_by_urls(&["https://x.io/z".to_string()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_all_until_date_only_published() {
        let mut published = record("p", "https://x.io/p");
        published.mark_published("1".to_string(), Utc::now());
        let drafted = record("d", "https://x.io/d");
        let store = MemoryStore::with_records(vec![published, drafted]);

        let since = Utc::now() - chrono::Duration::hours(1);
        let found = store.find_all_until_date(since).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "p");
    }

    #[tokio::test]
    async fn test_update_unknown_hash_fails() {
        let store = MemoryStore::new();
        assert!(store.update(&record("x", "https://x.io/x")).await.is_err());
        assert_eq!(store.update_calls(), 1);
    }
}
