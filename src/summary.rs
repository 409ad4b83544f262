//! Summary job
//!
//! Aggregates news published (and calendar events scheduled) since a
//! cutoff, asks the composer for a short synopsis per headline and posts
//! one bulleted digest. The publish step retries with a fixed delay.

use async_trait::async_trait;
use chrono::Utc;
use html_escape::encode_text;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Instrument};

use crate::composer::{Composer, Headline, SummarisedHeadline};
use crate::error::Result;
use crate::metrics::{self, StageTimer, STAGE_COMPOSE, STAGE_FETCH, STAGE_PUBLISH};
use crate::pipeline::{Job, RunReport, StageOutcome};
use crate::publisher::{Publisher, RetryingPublisher};
use crate::schemas::{CalendarEvent, NewsRecord};
use crate::storage::{EventStore, NewsStore};

pub const DEFAULT_MIN_ITEMS: usize = 3;
pub const DEFAULT_LIMIT: usize = 10;
pub const DEFAULT_MAX_TOKENS: u32 = 60;
pub const DEFAULT_PUBLISH_ATTEMPTS: u32 = 3;
pub const DEFAULT_PUBLISH_DELAY: Duration = Duration::from_secs(30);

pub struct SummaryJob {
    name: String,
    store: Arc<dyn NewsStore>,
    events: Arc<dyn EventStore>,
    composer: Arc<dyn Composer>,
    publisher: RetryingPublisher<Arc<dyn Publisher>>,
    window: Duration,
    min_items: usize,
    limit: usize,
    max_tokens: u32,
    heading: String,
}

impl SummaryJob {
    pub fn new(
        store: Arc<dyn NewsStore>,
        events: Arc<dyn EventStore>,
        composer: Arc<dyn Composer>,
        publisher: Arc<dyn Publisher>,
        window: Duration,
    ) -> Self {
        Self {
            name: "summary".to_string(),
            store,
            events,
            composer,
            publisher: RetryingPublisher::new(publisher, DEFAULT_PUBLISH_ATTEMPTS, DEFAULT_PUBLISH_DELAY),
            window,
            min_items: DEFAULT_MIN_ITEMS,
            limit: DEFAULT_LIMIT,
            max_tokens: DEFAULT_MAX_TOKENS,
            heading: "Market summary".to_string(),
        }
    }

    pub fn with_min_items(mut self, min_items: usize) -> Self {
        self.min_items = min_items;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_heading(mut self, heading: impl Into<String>) -> Self {
        self.heading = heading.into();
        self
    }

    /// Replaces the retry policy of the publish step
    pub fn with_publish_retry(self, publisher: Arc<dyn Publisher>, attempts: u32, delay: Duration) -> Self {
        Self {
            publisher: RetryingPublisher::new(publisher, attempts, delay),
            ..self
        }
    }

    async fn run_stages(&self, report: &mut RunReport) -> Result<()> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::zero());

        let loaded = {
            let _timer = StageTimer::new(STAGE_FETCH);
            match self.store.find_all_until_date(cutoff).await {
                Ok(news) => self.events.find_events(cutoff, now).await.map(|events| (news, events)),
                Err(e) => Err(e),
            }
        };
        let (news, events) = loaded.map_err(|e| report.fail(STAGE_FETCH, e))?;

        let total = news.len() + events.len();
        if total < self.min_items {
            info!(total, min_items = self.min_items, "Too little to summarise");
            report.record(STAGE_FETCH, StageOutcome::Empty);
            return Ok(());
        }
        report.record(STAGE_FETCH, StageOutcome::Passed(total));

        let headlines = headlines(&news, &events);
        let summarised = {
            let _timer = StageTimer::new(STAGE_COMPOSE);
            self.composer.summarise(&headlines, self.limit, self.max_tokens).await
        };
        let summarised = summarised.map_err(|e| report.fail(STAGE_COMPOSE, e))?;
        if summarised.iter().all(|s| s.summary.trim().is_empty()) {
            report.record(STAGE_COMPOSE, StageOutcome::Empty);
            return Ok(());
        }
        report.record(STAGE_COMPOSE, StageOutcome::Passed(summarised.len()));

        let text = render_summary(&self.heading, &summarised);
        let published = {
            let _timer = StageTimer::new(STAGE_PUBLISH);
            self.publisher.publish(&text).await
        };
        let publication_id = published.map_err(|e| report.fail(STAGE_PUBLISH, e))?;
        info!(publication_id = %publication_id, "Summary published");
        report.published = 1;
        report.record(STAGE_PUBLISH, StageOutcome::Passed(1));
        Ok(())
    }
}

/// One headline per record (composed text, else title) and per event
/// whose actual value is out, newest first within each kind. The composer
/// keeps only the first `limit` headlines.
pub fn headlines(news: &[NewsRecord], events: &[CalendarEvent]) -> Vec<Headline> {
    let mut news: Vec<&NewsRecord> = news.iter().collect();
    news.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    let mut events: Vec<&CalendarEvent> = events.iter().collect();
    events.sort_by(|a, b| b.date_time.cmp(&a.date_time));

    let from_news = news.into_iter().map(|r| Headline {
        id: r.hash.clone(),
        text: r
            .composed_text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&r.title)
            .to_string(),
    });
    let from_events = events.into_iter().filter_map(|e| {
        e.actual.as_ref().map(|actual| Headline {
            id: e.id.clone(),
            text: format!("{} {}: {}", e.currency, e.title, actual),
        })
    });
    from_news.chain(from_events).collect()
}

/// Bulleted digest, one line per non-blank synopsis
pub fn render_summary(heading: &str, items: &[SummarisedHeadline]) -> String {
    let mut out = format!("<b>{}</b>\n", encode_text(heading));
    for item in items.iter().filter(|i| !i.summary.trim().is_empty()) {
        out.push_str(&format!("\n• {}", encode_text(item.summary.trim())));
    }
    out
}

#[async_trait]
impl Job for SummaryJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<RunReport> {
        let mut report = RunReport::new(&self.name);
        let span = tracing::info_span!("job_run", job = %self.name, run_id = %report.run_id);

        match self.run_stages(&mut report).instrument(span).await {
            Ok(()) => {
                metrics::record_run(&self.name, "success");
                Ok(report)
            }
            Err(e) => {
                metrics::record_run(&self.name, "failure");
                Err(e)
            }
        }
    }
}
