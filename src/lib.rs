//! Newsroom
//! Aggregates market news from RSS feeds, rewrites it with a generative
//! composer and publishes it to a Telegram channel.
//!
//! Features:
//! - Concurrent multi-feed fetch with per-provider timeouts
//! - Content fingerprint and URL based deduplication
//! - Composer relevance filter, rewrite and ticker/market/hashtag tagging
//! - Pre-publish gating (suspicious items, empty metadata, stock universe)
//! - Economic calendar digest and actual-value updates
//! - Periodic summaries with publish retry
//! - Interval scheduler with at-most-one run in flight per job
//! - Prometheus metrics per stage

pub mod calendar;
pub mod composer;
pub mod config;
pub mod dedup;
pub mod error;
pub mod http_client;
pub mod journalist;
pub mod metrics;
pub mod pipeline;
pub mod publisher;
pub mod scheduler;
pub mod schemas;
pub mod sources;
pub mod storage;
pub mod summary;

pub use error::{NewsroomError, Result};
pub use journalist::{FetchOutcome, Journalist};
pub use pipeline::{Job, JobOptions, NewsJob, RunReport, StageOutcome};
pub use schemas::{News, NewsList, NewsMeta, NewsRecord};
