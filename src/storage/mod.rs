//! Storage layer for news records and calendar events
//!
//! `hash` and `url` are unique across news records. Records are never
//! deleted: they back both dedupe lookups and summary jobs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::schemas::{CalendarEvent, NewsRecord};

#[async_trait]
pub trait NewsStore: Send + Sync {
    async fn find_all_by_hashes(&self, hashes: &[String]) -> Result<Vec<NewsRecord>>;

    async fn find_all_by_urls(&self, urls: &[String]) -> Result<Vec<NewsRecord>>;

    /// Inserts a batch. No partial success: on error nothing is assumed stored.
    async fn create(&self, records: &[NewsRecord]) -> Result<()>;

    /// Updates one record, matched by hash
    async fn update(&self, record: &NewsRecord) -> Result<()>;

    /// Records published at or after `cutoff`, oldest first
    async fn find_all_until_date(&self, cutoff: DateTime<Utc>) -> Result<Vec<NewsRecord>>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Events scheduled in `[from, to)`, chronological
    async fn find_events(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<CalendarEvent>>;

    /// Inserts or replaces events by id
    async fn upsert_events(&self, events: &[CalendarEvent]) -> Result<()>;
}

/// Both stores behind one handle, as wired by the binary
pub trait Store: NewsStore + EventStore {}

impl<T: NewsStore + EventStore> Store for T {}

pub use memory::MemoryStore;
pub use postgres::PgStore;
