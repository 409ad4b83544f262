//! Calendar jobs
//!
//! - `CalendarJob`: publishes a grouped-by-day digest of the coming days once
//! - `CalendarUpdatesJob`: publishes newly released actual values per currency

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn, Instrument};

use super::digest::{format_digest, format_update};
use super::CalendarSource;
use crate::error::Result;
use crate::metrics::{self, StageTimer, STAGE_FETCH, STAGE_PERSIST, STAGE_PUBLISH};
use crate::pipeline::{Job, RunReport, StageOutcome};
use crate::publisher::Publisher;
use crate::schemas::CalendarEvent;
use crate::storage::EventStore;

/// Midnight UTC of the day containing `now`
pub fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now)
}

async fn finish(job: &str, report: RunReport, result: Result<()>) -> Result<RunReport> {
    match result {
        Ok(()) => {
            metrics::record_run(job, "success");
            info!(job, run_id = %report.run_id, published = report.published, "Run finished");
            Ok(report)
        }
        Err(e) => {
            metrics::record_run(job, "failure");
            Err(e)
        }
    }
}

// ============================================
// WEEKLY DIGEST
// ============================================

pub struct CalendarJob {
    name: String,
    source: Arc<dyn CalendarSource>,
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn EventStore>,
    days: u32,
    heading: String,
}

impl CalendarJob {
    pub fn new(
        source: Arc<dyn CalendarSource>,
        publisher: Arc<dyn Publisher>,
        store: Arc<dyn EventStore>,
        days: u32,
    ) -> Self {
        Self {
            name: "calendar".to_string(),
            source,
            publisher,
            store,
            days: days.max(1),
            heading: "Economic calendar".to_string(),
        }
    }

    pub fn with_heading(mut self, heading: impl Into<String>) -> Self {
        self.heading = heading.into();
        self
    }

    async fn run_stages(&self, report: &mut RunReport) -> Result<()> {
        let from = day_start(Utc::now());
        let to = from + Duration::days(i64::from(self.days));

        let events = {
            let _timer = StageTimer::new(STAGE_FETCH);
            self.source.fetch_events(from, to).await
        };
        let events = events.map_err(|e| report.fail(STAGE_FETCH, e))?;
        if events.is_empty() {
            report.record(STAGE_FETCH, StageOutcome::Empty);
            return Ok(());
        }
        report.record(STAGE_FETCH, StageOutcome::Passed(events.len()));

        let text = format_digest(&self.heading, &events);
        let published = {
            let _timer = StageTimer::new(STAGE_PUBLISH);
            self.publisher.publish(&text).await
        };
        let publication_id = published.map_err(|e| report.fail(STAGE_PUBLISH, e))?;
        info!(publication_id = %publication_id, events = events.len(), "Calendar digest published");
        report.published = 1;
        report.record(STAGE_PUBLISH, StageOutcome::Passed(1));

        self.store
            .upsert_events(&events)
            .await
            .map_err(|e| report.fail(STAGE_PERSIST, e))?;
        report.record(STAGE_PERSIST, StageOutcome::Passed(events.len()));
        Ok(())
    }
}

#[async_trait]
impl Job for CalendarJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<RunReport> {
        let mut report = RunReport::new(&self.name);
        let span = tracing::info_span!("job_run", job = %self.name, run_id = %report.run_id);
        let result = self.run_stages(&mut report).instrument(span).await;
        finish(&self.name, report, result).await
    }
}

// ============================================
// ACTUAL VALUE UPDATES
// ============================================

pub struct CalendarUpdatesJob {
    name: String,
    source: Arc<dyn CalendarSource>,
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn EventStore>,
}

/// Events whose actual value is present now but was absent or different in `stored`
pub fn new_actuals<'a>(fetched: &'a [CalendarEvent], stored: &[CalendarEvent]) -> Vec<&'a CalendarEvent> {
    let known: HashMap<&str, &CalendarEvent> = stored.iter().map(|e| (e.id.as_str(), e)).collect();

    fetched
        .iter()
        .filter(|e| e.has_actual())
        .filter(|e| match known.get(e.id.as_str()) {
            Some(previous) => previous.actual != e.actual,
            None => true,
        })
        .collect()
}

impl CalendarUpdatesJob {
    pub fn new(
        source: Arc<dyn CalendarSource>,
        publisher: Arc<dyn Publisher>,
        store: Arc<dyn EventStore>,
    ) -> Self {
        Self {
            name: "calendar-updates".to_string(),
            source,
            publisher,
            store,
        }
    }

    async fn run_stages(&self, report: &mut RunReport) -> Result<()> {
        let from = day_start(Utc::now());
        let to = from + Duration::days(1);

        let fetched = {
            let _timer = StageTimer::new(STAGE_FETCH);
            self.source.fetch_events(from, to).await
        };
        let fetched = fetched.map_err(|e| report.fail(STAGE_FETCH, e))?;
        let stored = self
            .store
            .find_events(from, to)
            .await
            .map_err(|e| report.fail(STAGE_FETCH, e))?;

        let fresh = new_actuals(&fetched, &stored);
        if fresh.is_empty() {
            report.record(STAGE_FETCH, StageOutcome::Empty);
            if !fetched.is_empty() {
                self.store
                    .upsert_events(&fetched)
                    .await
                    .map_err(|e| report.fail(STAGE_PERSIST, e))?;
            }
            return Ok(());
        }
        report.record(STAGE_FETCH, StageOutcome::Passed(fresh.len()));

        let mut by_currency: BTreeMap<&str, Vec<CalendarEvent>> = BTreeMap::new();
        for event in &fresh {
            by_currency
                .entry(event.currency.as_str())
                .or_default()
                .push((*event).clone());
        }

        let fresh_ids: HashSet<&str> = fresh.iter().map(|e| e.id.as_str()).collect();
        let mut published_ids: HashSet<String> = HashSet::new();
        let mut publish_error = None;
        {
            let _timer = StageTimer::new(STAGE_PUBLISH);
            for (currency, events) in &by_currency {
                match self.publisher.publish(&format_update(currency, events)).await {
                    Ok(publication_id) => {
                        info!(currency, publication_id = %publication_id, "Calendar update published");
                        report.published += 1;
                        published_ids.extend(events.iter().map(|e| e.id.clone()));
                    }
                    Err(e) => {
                        warn!(currency, error = %e, "Calendar update failed");
                        publish_error = Some(e);
                        break;
                    }
                }
            }
        }

        // Unpublished actuals are kept out of the store so the next run retries them
        let to_store: Vec<CalendarEvent> = fetched
            .iter()
            .filter(|e| !fresh_ids.contains(e.id.as_str()) || published_ids.contains(&e.id))
            .cloned()
            .collect();
        let persisted = self.store.upsert_events(&to_store).await;

        if let Some(err) = publish_error {
            if let Err(persist_err) = persisted {
                warn!(error = %persist_err, "Failed to store calendar events");
            }
            return Err(report.fail(STAGE_PUBLISH, err));
        }
        report.record(STAGE_PUBLISH, StageOutcome::Passed(report.published));

        persisted.map_err(|e| report.fail(STAGE_PERSIST, e))?;
        report.record(STAGE_PERSIST, StageOutcome::Passed(to_store.len()));
        Ok(())
    }
}

#[async_trait]
impl Job for CalendarUpdatesJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<RunReport> {
        let mut report = RunReport::new(&self.name);
        let span = tracing::info_span!("job_run", job = %self.name, run_id = %report.run_id);
        let result = self.run_stages(&mut report).instrument(span).await;
        finish(&self.name, report, result).await
    }
}
