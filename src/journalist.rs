//! Journalist: concurrent multi-provider fetch
//!
//! Runs every configured [`Source`] at once, each under its own timeout,
//! and waits for all of them before merging. One failing or slow provider
//! never hides the results of the others: failures are folded into a single
//! `PartialFetch` error returned next to whatever was fetched.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::NewsroomError;
use crate::metrics;
use crate::schemas::NewsList;
use crate::sources::Source;

/// Merged result of one fan-out fetch
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Items from every provider that succeeded, in completion order
    pub news: NewsList,
    /// Joined provider errors; `None` when every provider succeeded
    pub error: Option<NewsroomError>,
}

impl FetchOutcome {
    pub fn failed_providers(&self) -> usize {
        match &self.error {
            Some(NewsroomError::PartialFetch(errors)) => errors.len(),
            Some(_) => 1,
            None => 0,
        }
    }
}

/// Fans a fetch out over a set of providers
#[derive(Clone)]
pub struct Journalist {
    sources: Vec<Arc<dyn Source>>,
    provider_timeout: Duration,
    /// Case-sensitive scope applied to the merged list (empty = no scoping)
    filter_keywords: Vec<String>,
    /// Case-insensitive keywords that mark items suspicious
    suspicious_keywords: Vec<String>,
}

impl Journalist {
    pub fn new(sources: Vec<Arc<dyn Source>>, provider_timeout: Duration) -> Self {
        Self {
            sources,
            provider_timeout,
            filter_keywords: Vec::new(),
            suspicious_keywords: Vec::new(),
        }
    }

    pub fn with_filter_keywords(mut self, keywords: Vec<String>) -> Self {
        self.filter_keywords = keywords;
        self
    }

    pub fn with_suspicious_keywords(mut self, keywords: Vec<String>) -> Self {
        self.suspicious_keywords = keywords;
        self
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Fetches from all providers concurrently.
    ///
    /// Each provider future is wrapped in `tokio::time::timeout`; when it
    /// elapses the future is dropped, so nothing keeps running past the join.
    pub async fn get_latest_news(&self, until: DateTime<Utc>) -> FetchOutcome {
        let timeout = self.provider_timeout;

        let tasks = self.sources.iter().map(|source| {
            let source = Arc::clone(source);
            async move {
                let name = source.name().to_string();
                let result = tokio::time::timeout(timeout, source.fetch(until)).await;
                (name, result)
            }
        });

        let mut merged = NewsList::new();
        let mut errors = Vec::new();

        for (name, result) in join_all(tasks).await {
            match result {
                Ok(Ok(news)) => {
                    debug!(provider = %name, count = news.len(), "Provider fetched");
                    metrics::record_provider_success(&name, news.len() as u64);
                    merged.extend(news);
                }
                Ok(Err(e)) => {
                    warn!(provider = %name, error = %e, "Provider failed");
                    metrics::record_provider_failure(&name);
                    errors.push(match e {
                        NewsroomError::ProviderError { .. } => e,
                        other => NewsroomError::provider(&name, other),
                    });
                }
                Err(_) => {
                    warn!(provider = %name, timeout = ?timeout, "Provider timed out");
                    metrics::record_provider_timeout(&name);
                    errors.push(NewsroomError::provider(
                        &name,
                        format!("timed out after {}", humantime::format_duration(timeout)),
                    ));
                }
            }
        }

        let mut news = merged.filter_by_keywords(&self.filter_keywords);
        let flagged = news.flag_by_keywords(&self.suspicious_keywords);

        info!(
            providers = self.sources.len(),
            failed = errors.len(),
            fetched = news.len(),
            flagged,
            "Fetch completed"
        );

        FetchOutcome {
            news,
            error: (!errors.is_empty()).then_some(NewsroomError::PartialFetch(errors)),
        }
    }
}
