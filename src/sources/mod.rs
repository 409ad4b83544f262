//! News sources
//!
//! Each source implements the `Source` trait so the journalist can fan out
//! over any mix of feeds.

pub mod rss;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::schemas::NewsList;

/// Trait for all news providers
#[async_trait]
pub trait Source: Send + Sync {
    /// Provider name, embedded in errors and metrics
    fn name(&self) -> &str;

    /// Fetches items published at or after `until`.
    ///
    /// Failures are reported as `ProviderError` carrying [`Source::name`].
    async fn fetch(&self, until: DateTime<Utc>) -> Result<NewsList>;
}

pub use rss::RssSource;
