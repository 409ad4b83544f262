//! Prometheus Metrics for Job Stages
//!
//! Metrics include:
//! - stage outcomes per job (passed / skipped / empty / failed)
//! - latency per stage (histogram)
//! - per-provider fetch results
//! - publish and dedupe counters
//! - run totals per job

use once_cell::sync::Lazy;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::{error, info};

// ============================================
// METRIC DEFINITIONS
// ============================================

/// Stages of a news job run
pub const STAGE_FETCH: &str = "fetch";
pub const STAGE_DEDUPE: &str = "dedupe";
pub const STAGE_AI_FILTER: &str = "ai_filter";
pub const STAGE_COMPOSE: &str = "compose";
pub const STAGE_PERSIST: &str = "persist";
pub const STAGE_PREPUBLISH: &str = "prepublish_filter";
pub const STAGE_PUBLISH: &str = "publish";
pub const STAGE_UPDATE: &str = "update";

/// In execution order
pub const ALL_STAGES: &[&str] = &[
    STAGE_FETCH,
    STAGE_DEDUPE,
    STAGE_AI_FILTER,
    STAGE_COMPOSE,
    STAGE_PERSIST,
    STAGE_PREPUBLISH,
    STAGE_PUBLISH,
    STAGE_UPDATE,
];

const LATENCY_BUCKETS: &[f64] = &[0.005, 0.025, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0, 30.0, 60.0, 120.0];

/// Every newsroom metric, registered on a dedicated registry
struct Metrics {
    registry: Registry,
    stage_outcomes: IntCounterVec,
    stage_items: IntCounterVec,
    stage_latency: HistogramVec,
    provider_fetch: IntCounterVec,
    provider_items: IntCounterVec,
    publish: IntCounterVec,
    dedup_hits: IntCounterVec,
    runs: IntCounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new_custom(Some("newsroom".to_string()), None)
            .expect("Failed to create metrics registry");

        #[cfg(target_os = "linux")]
        registry
            .register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))
            .expect("Failed to register process collector");

        let counter = |name: &str, help: &str, labels: &[&str]| {
            let vec = IntCounterVec::new(Opts::new(name, help), labels)
                .expect("Failed to create counter");
            registry
                .register(Box::new(vec.clone()))
                .expect("Failed to register counter");
            vec
        };

        let stage_outcomes = counter("stage_outcomes_total", "Stage outcomes by job, stage and outcome", &["job", "stage", "outcome"]);
        let stage_items = counter("stage_items_total", "Items leaving each stage", &["job", "stage"]);
        let provider_fetch = counter("provider_fetch_total", "Provider fetches by outcome", &["provider", "status"]);
        let provider_items = counter("provider_items_total", "Items returned per provider", &["provider"]);
        let publish = counter("publish_total", "Publish calls by outcome", &["status"]);
        let dedup_hits = counter("dedup_hits_total", "Fetched items already stored", &["job"]);
        let runs = counter("run_total", "Job runs by final status", &["job", "status"]);

        let stage_latency = HistogramVec::new(
            HistogramOpts::new("stage_latency_seconds", "Latency of each job stage in seconds")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["stage"],
        )
        .expect("Failed to create stage latency histogram");
        registry
            .register(Box::new(stage_latency.clone()))
            .expect("Failed to register stage latency histogram");

        Self {
            registry,
            stage_outcomes,
            stage_items,
            stage_latency,
            provider_fetch,
            provider_items,
            publish,
            dedup_hits,
            runs,
        }
    }
}

static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

// ============================================
// METRICS API
// ============================================

/// Records the outcome label of a finished stage
pub fn record_stage_outcome(job: &str, stage: &str, outcome: &str) {
    METRICS.stage_outcomes.with_label_values(&[job, stage, outcome]).inc();
}

/// Records items produced by a stage
pub fn record_stage_items(job: &str, stage: &str, count: u64) {
    METRICS.stage_items.with_label_values(&[job, stage]).inc_by(count);
}

/// Records stage latency
pub fn record_stage_latency(stage: &str, latency_secs: f64) {
    METRICS.stage_latency.with_label_values(&[stage]).observe(latency_secs);
}

pub fn record_provider_success(provider: &str, items: u64) {
    METRICS.provider_fetch.with_label_values(&[provider, "success"]).inc();
    METRICS.provider_items.with_label_values(&[provider]).inc_by(items);
}

pub fn record_provider_failure(provider: &str) {
    METRICS.provider_fetch.with_label_values(&[provider, "failure"]).inc();
}

pub fn record_provider_timeout(provider: &str) {
    METRICS.provider_fetch.with_label_values(&[provider, "timeout"]).inc();
}

pub fn record_publish_success() {
    METRICS.publish.with_label_values(&["success"]).inc();
}

pub fn record_publish_failure() {
    METRICS.publish.with_label_values(&["failure"]).inc();
}

pub fn record_dedup_hits(job: &str, count: u64) {
    METRICS.dedup_hits.with_label_values(&[job]).inc_by(count);
}

/// Records a finished job run (`success`, `failure` or `timeout`)
pub fn record_run(job: &str, status: &str) {
    METRICS.runs.with_label_values(&[job, status]).inc();
}

// ============================================
// METRICS COLLECTION
// ============================================

/// Prometheus text exposition of the newsroom registry
pub fn gather_metrics() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&METRICS.registry.gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}

/// Observes the latency of a stage when dropped
pub struct StageTimer {
    stage: &'static str,
    started: std::time::Instant,
}

impl StageTimer {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            started: std::time::Instant::now(),
        }
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        record_stage_latency(self.stage, self.started.elapsed().as_secs_f64());
    }
}

// ============================================
// METRICS SERVER
// ============================================

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{body::Incoming, server::conn::http1, service::service_fn, Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;

async fn handle_metrics(_req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let mut response = Response::new(Full::new(Bytes::from(gather_metrics())));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    Ok(response)
}

/// Serves the registry over HTTP/1 on every path until the listener fails
pub async fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, "Metrics server listening");

    loop {
        let (stream, peer) = listener.accept().await?;

        tokio::spawn(async move {
            let served = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service_fn(handle_metrics))
                .await;
            if let Err(e) = served {
                error!(peer = %peer, error = %e, "Metrics connection failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_metrics() {
        record_stage_outcome("news", STAGE_FETCH, "passed");
        record_stage_items("news", STAGE_FETCH, 3);
        record_stage_latency(STAGE_FETCH, 0.05);
        record_provider_failure("reuters");
        record_publish_success();
        record_dedup_hits("news", 2);
        record_run("news", "success");

        let metrics = gather_metrics();
        assert!(metrics.contains("newsroom_stage_outcomes_total"));
        assert!(metrics.contains("newsroom_stage_latency_seconds"));
        assert!(metrics.contains("newsroom_provider_fetch_total"));
        assert!(metrics.contains("newsroom_publish_total"));
        assert!(metrics.contains("newsroom_dedup_hits_total"));
        assert!(metrics.contains("newsroom_run_total"));
    }

    #[test]
    fn test_stage_timer_observes_on_drop() {
        let before = METRICS.stage_latency.with_label_values(&[STAGE_UPDATE]).get_sample_count();
        drop(StageTimer::new(STAGE_UPDATE));
        let after = METRICS.stage_latency.with_label_values(&[STAGE_UPDATE]).get_sample_count();

        assert_eq!(after, before + 1);
    }

    #[test]
    fn test_stage_list_is_ordered() {
        assert_eq!(ALL_STAGES.first(), Some(&STAGE_FETCH));
        assert_eq!(ALL_STAGES.last(), Some(&STAGE_UPDATE));
    }
}
