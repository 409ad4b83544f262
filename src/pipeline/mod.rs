//! News Job Pipeline
//!
//! Implements: fetch → dedupe → ai filter → compose → persist →
//! pre-publish filter → publish → update
//!
//! Features:
//! - Immutable options, built once with a fluent builder
//! - Per-stage enable flags and omission predicates
//! - Empty output ends a run successfully; errors end it with a failure
//! - Every stage outcome is logged and counted in Prometheus

pub mod render;
pub mod stages;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

use crate::composer::Composer;
use crate::error::{NewsroomError, Result};
use crate::journalist::Journalist;
use crate::metrics::{
    self, StageTimer, STAGE_AI_FILTER, STAGE_COMPOSE, STAGE_DEDUPE, STAGE_FETCH, STAGE_PERSIST,
    STAGE_PREPUBLISH, STAGE_PUBLISH, STAGE_UPDATE,
};
use crate::publisher::Publisher;
use crate::schemas::MetaKey;
use crate::storage::NewsStore;

// ============================================
// JOB OPTIONS
// ============================================

/// Oldest publication date a run will fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchCutoff {
    /// Fixed point in time
    Absolute(DateTime<Utc>),
    /// Window ending at the start of each run
    Relative(Duration),
}

impl FetchCutoff {
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            FetchCutoff::Absolute(at) => *at,
            FetchCutoff::Relative(window) => {
                now - chrono::Duration::from_std(*window).unwrap_or(chrono::Duration::zero())
            }
        }
    }
}

/// Read-only configuration of a news job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    pub fetch_cutoff: FetchCutoff,
    pub omit_suspicious: bool,
    pub omit_empty_meta_keys: BTreeSet<MetaKey>,
    pub omit_if_all_keys_empty: bool,
    pub omit_unlisted_stocks: bool,
    pub compose_text: bool,
    pub save_to_db: bool,
    pub remove_clones: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            fetch_cutoff: FetchCutoff::Relative(Duration::from_secs(3600)),
            omit_suspicious: false,
            omit_empty_meta_keys: BTreeSet::new(),
            omit_if_all_keys_empty: false,
            omit_unlisted_stocks: false,
            compose_text: false,
            save_to_db: false,
            remove_clones: false,
        }
    }
}

impl JobOptions {
    pub fn builder() -> JobOptionsBuilder {
        JobOptionsBuilder::default()
    }

    /// Clone removal only makes sense against a persisted history
    pub fn dedupe_enabled(&self) -> bool {
        self.remove_clones && self.save_to_db
    }
}

/// Fluent builder for [`JobOptions`]
#[derive(Debug, Default)]
pub struct JobOptionsBuilder {
    options: JobOptions,
}

impl JobOptionsBuilder {
    pub fn fetch_until(mut self, at: DateTime<Utc>) -> Self {
        self.options.fetch_cutoff = FetchCutoff::Absolute(at);
        self
    }

    pub fn fetch_window(mut self, window: Duration) -> Self {
        self.options.fetch_cutoff = FetchCutoff::Relative(window);
        self
    }

    pub fn omit_suspicious(mut self) -> Self {
        self.options.omit_suspicious = true;
        self
    }

    pub fn omit_empty_meta_key(mut self, key: MetaKey) -> Self {
        self.options.omit_empty_meta_keys.insert(key);
        self
    }

    pub fn omit_if_all_keys_empty(mut self) -> Self {
        self.options.omit_if_all_keys_empty = true;
        self
    }

    pub fn omit_unlisted_stocks(mut self) -> Self {
        self.options.omit_unlisted_stocks = true;
        self
    }

    pub fn compose_text(mut self) -> Self {
        self.options.compose_text = true;
        self
    }

    pub fn save_to_db(mut self) -> Self {
        self.options.save_to_db = true;
        self
    }

    pub fn remove_clones(mut self) -> Self {
        self.options.remove_clones = true;
        self
    }

    pub fn build(self) -> JobOptions {
        self.options
    }
}

// ============================================
// RUN REPORTING
// ============================================

/// What a stage did during one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StageOutcome {
    /// Produced this many items for the next stage
    Passed(usize),
    /// Disabled by options
    Skipped,
    /// Produced nothing; the run stops here without error
    Empty,
    /// Errored; the run stops here
    Failed(String),
}

impl StageOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Passed(_) => "passed",
            StageOutcome::Skipped => "skipped",
            StageOutcome::Empty => "empty",
            StageOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: &'static str,
    #[serde(flatten)]
    pub outcome: StageOutcome,
}

/// Summary of one job run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub job: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
    pub published: usize,
    pub update_failures: usize,
    pub partial_errors: Vec<String>,
}

impl RunReport {
    pub fn new(job: &str) -> Self {
        Self {
            job: job.to_string(),
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            stages: Vec::new(),
            published: 0,
            update_failures: 0,
            partial_errors: Vec::new(),
        }
    }

    /// Logs, counts and stores the outcome of a stage
    pub fn record(&mut self, stage: &'static str, outcome: StageOutcome) {
        metrics::record_stage_outcome(&self.job, stage, outcome.label());
        match &outcome {
            StageOutcome::Passed(count) => {
                metrics::record_stage_items(&self.job, stage, *count as u64);
                info!(job = %self.job, stage, count, "Stage completed");
            }
            StageOutcome::Skipped => debug!(job = %self.job, stage, "Stage skipped"),
            StageOutcome::Empty => info!(job = %self.job, stage, "Nothing to do, ending run"),
            StageOutcome::Failed(reason) => error!(job = %self.job, stage, error = %reason, "Stage failed"),
        }
        self.stages.push(StageReport { stage, outcome });
    }

    /// Records a failed stage and hands the error back for propagation
    pub fn fail(&mut self, stage: &'static str, err: NewsroomError) -> NewsroomError {
        self.record(stage, StageOutcome::Failed(err.to_string()));
        err
    }

    pub fn outcome_of(&self, stage: &str) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage).map(|s| &s.outcome)
    }

    /// True when the run stopped early because a stage had nothing to pass on
    pub fn ended_empty(&self) -> bool {
        matches!(self.stages.last(), Some(StageReport { outcome: StageOutcome::Empty, .. }))
    }

    pub fn ran(&self, stage: &str) -> bool {
        matches!(
            self.outcome_of(stage),
            Some(StageOutcome::Passed(_) | StageOutcome::Empty | StageOutcome::Failed(_))
        )
    }
}

// ============================================
// JOB
// ============================================

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    /// Executes one run. `Err` means a stage failed; empty runs are `Ok`.
    async fn run(&self) -> Result<RunReport>;
}

/// The fetch → publish news pipeline
pub struct NewsJob {
    name: String,
    journalist: Journalist,
    composer: Option<Arc<dyn Composer>>,
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn NewsStore>,
    stock_universe: Option<HashSet<String>>,
    options: JobOptions,
}

impl NewsJob {
    /// Creates a job. Composing text requires a composer.
    pub fn new(
        name: impl Into<String>,
        journalist: Journalist,
        composer: Option<Arc<dyn Composer>>,
        publisher: Arc<dyn Publisher>,
        store: Arc<dyn NewsStore>,
        options: JobOptions,
    ) -> Result<Self> {
        if options.compose_text && composer.is_none() {
            return Err(NewsroomError::ValidationError(
                "compose_text is enabled but no composer is configured".to_string(),
            ));
        }

        Ok(Self {
            name: name.into(),
            journalist,
            composer,
            publisher,
            store,
            stock_universe: None,
            options,
        })
    }

    /// Restricts publication to these tickers when `omit_unlisted_stocks` is set
    pub fn with_stock_universe<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stock_universe = Some(symbols.into_iter().map(Into::into).collect());
        self
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    async fn run_stages(&self, report: &mut RunReport) -> Result<()> {
        let options = &self.options;

        // 1. Fetch
        let until = options.fetch_cutoff.resolve(Utc::now());
        let fetched = {
            let _timer = StageTimer::new(STAGE_FETCH);
            self.journalist.get_latest_news(until).await
        };
        let news = fetched.news.dedup_by_identity();
        if let Some(err) = fetched.error {
            if news.is_empty() {
                return Err(report.fail(STAGE_FETCH, err));
            }
            warn!(job = %self.name, error = %err, "Some providers failed, continuing");
            report.partial_errors.push(err.to_string());
        }
        if news.is_empty() {
            report.record(STAGE_FETCH, StageOutcome::Empty);
            return Ok(());
        }
        report.record(STAGE_FETCH, StageOutcome::Passed(news.len()));

        // 2. Remove duplicates
        let news = if options.dedupe_enabled() {
            let before = news.len();
            let kept = {
                let _timer = StageTimer::new(STAGE_DEDUPE);
                stages::remove_duplicates(self.store.as_ref(), news).await
            };
            let kept = kept.map_err(|e| report.fail(STAGE_DEDUPE, e))?;
            metrics::record_dedup_hits(&self.name, (before - kept.len()) as u64);
            if kept.is_empty() {
                report.record(STAGE_DEDUPE, StageOutcome::Empty);
                return Ok(());
            }
            report.record(STAGE_DEDUPE, StageOutcome::Passed(kept.len()));
            kept
        } else {
            report.record(STAGE_DEDUPE, StageOutcome::Skipped);
            news
        };

        // 3. AI relevance filter
        let news = match &self.composer {
            Some(composer) => {
                let filtered = {
                    let _timer = StageTimer::new(STAGE_AI_FILTER);
                    stages::ai_filter(composer.as_ref(), news).await
                };
                let filtered = filtered.map_err(|e| report.fail(STAGE_AI_FILTER, e))?;
                let relevant = filtered.iter().filter(|n| !n.is_filtered).count();
                if relevant == 0 {
                    report.record(STAGE_AI_FILTER, StageOutcome::Empty);
                    return Ok(());
                }
                report.record(STAGE_AI_FILTER, StageOutcome::Passed(relevant));
                filtered
            }
            None => {
                report.record(STAGE_AI_FILTER, StageOutcome::Skipped);
                news
            }
        };

        // 4. Compose
        let composed = match (&self.composer, options.compose_text) {
            (Some(composer), true) => {
                let composed = {
                    let _timer = StageTimer::new(STAGE_COMPOSE);
                    stages::compose(composer.as_ref(), &news).await
                };
                let composed = composed.map_err(|e| report.fail(STAGE_COMPOSE, e))?;
                if composed.is_empty() {
                    report.record(STAGE_COMPOSE, StageOutcome::Empty);
                    return Ok(());
                }
                report.record(STAGE_COMPOSE, StageOutcome::Passed(composed.len()));
                composed
            }
            _ => {
                report.record(STAGE_COMPOSE, StageOutcome::Skipped);
                Vec::new()
            }
        };

        // 5. Persist
        let records = stages::build_records(&news, &composed).map_err(|e| report.fail(STAGE_PERSIST, e))?;
        if options.save_to_db {
            let saved = {
                let _timer = StageTimer::new(STAGE_PERSIST);
                self.store.create(&records).await
            };
            saved.map_err(|e| report.fail(STAGE_PERSIST, e))?;
            report.record(STAGE_PERSIST, StageOutcome::Passed(records.len()));
        } else {
            report.record(STAGE_PERSIST, StageOutcome::Skipped);
        }

        // 6. Pre-publish filter
        let universe = if options.omit_unlisted_stocks {
            self.stock_universe.as_ref()
        } else {
            None
        };
        let publishable = stages::prepublish_filter(records, options, universe)
            .map_err(|e| report.fail(STAGE_PREPUBLISH, e))?;
        if publishable.is_empty() {
            report.record(STAGE_PREPUBLISH, StageOutcome::Empty);
            return Ok(());
        }
        report.record(STAGE_PREPUBLISH, StageOutcome::Passed(publishable.len()));

        // 7. Publish
        let (published, publish_error) = {
            let _timer = StageTimer::new(STAGE_PUBLISH);
            stages::publish(self.publisher.as_ref(), publishable).await
        };
        report.published = published.len();

        // 8. Update runs even after a partial publish so live messages are recorded
        if options.save_to_db && !published.is_empty() {
            let failures = {
                let _timer = StageTimer::new(STAGE_UPDATE);
                stages::update(self.store.as_ref(), &published).await
            };
            report.update_failures = failures;
        }

        match publish_error {
            Some(err) => {
                report.record(STAGE_PUBLISH, StageOutcome::Failed(err.to_string()));
                self.record_update(report, published.len());
                Err(err)
            }
            None => {
                report.record(STAGE_PUBLISH, StageOutcome::Passed(published.len()));
                self.record_update(report, published.len());
                Ok(())
            }
        }
    }

    fn record_update(&self, report: &mut RunReport, published: usize) {
        let outcome = update_outcome(self.options.save_to_db, published, report.update_failures);
        report.record(STAGE_UPDATE, outcome);
    }
}

/// Records written back after publishing, never below zero
fn update_outcome(save_to_db: bool, published: usize, failures: usize) -> StageOutcome {
    if !save_to_db || published == 0 {
        StageOutcome::Skipped
    } else {
        StageOutcome::Passed(published.saturating_sub(failures))
    }
}

#[async_trait]
impl Job for NewsJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<RunReport> {
        let mut report = RunReport::new(&self.name);
        let span = tracing::info_span!("job_run", job = %self.name, run_id = %report.run_id);

        let result = self.run_stages(&mut report).instrument(span).await;
        match result {
            Ok(()) => {
                metrics::record_run(&self.name, "success");
                info!(
                    job = %self.name,
                    run_id = %report.run_id,
                    published = report.published,
                    "Run finished"
                );
                Ok(report)
            }
            Err(e) => {
                metrics::record_run(&self.name, "failure");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_builder_sets_flags() {
        let options = JobOptions::builder()
            .fetch_window(Duration::from_secs(600))
            .omit_suspicious()
            .omit_empty_meta_key(MetaKey::Tickers)
            .omit_empty_meta_key(MetaKey::Tickers)
            .omit_if_all_keys_empty()
            .compose_text()
            .save_to_db()
            .build();

        assert!(options.omit_suspicious);
        assert_eq!(options.omit_empty_meta_keys.len(), 1);
        assert!(options.compose_text);
        assert!(!options.remove_clones);
        assert!(!options.dedupe_enabled());
    }

    #[test]
    fn test_dedupe_requires_both_flags() {
        let only_clones = JobOptions::builder().remove_clones().build();
        let both = JobOptions::builder().remove_clones().save_to_db().build();

        assert!(!only_clones.dedupe_enabled());
        assert!(both.dedupe_enabled());
    }

    #[test]
    fn test_fetch_cutoff_resolution() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let fixed = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();

        assert_eq!(FetchCutoff::Absolute(fixed).resolve(now), fixed);
        assert_eq!(
            FetchCutoff::Relative(Duration::from_secs(7200)).resolve(now),
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_report_tracks_outcomes() {
        let mut report = RunReport::new("test");
        report.record(STAGE_FETCH, StageOutcome::Passed(2));
        report.record(STAGE_DEDUPE, StageOutcome::Skipped);
        report.record(STAGE_AI_FILTER, StageOutcome::Empty);

        assert!(report.ran(STAGE_FETCH));
        assert!(!report.ran(STAGE_DEDUPE));
        assert!(!report.ran(STAGE_COMPOSE));
        assert!(report.ended_empty());
    }

    #[test]
    fn test_update_outcome_counts_written_records() {
        assert_eq!(update_outcome(false, 3, 0), StageOutcome::Skipped);
        assert_eq!(update_outcome(true, 0, 0), StageOutcome::Skipped);
        assert_eq!(update_outcome(true, 3, 1), StageOutcome::Passed(2));
        assert_eq!(update_outcome(true, 2, 5), StageOutcome::Passed(0));
    }

    #[test]
    fn test_report_serializes_outcomes() {
        let mut report = RunReport::new("test");
        report.record(STAGE_FETCH, StageOutcome::Passed(2));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["stages"][0]["stage"], "fetch");
        assert_eq!(json["stages"][0]["outcome"], "passed");
        assert_eq!(json["stages"][0]["detail"], 2);
    }
}
