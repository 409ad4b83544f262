//! Configuration for the newsroom service

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// One configured RSS feed
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq, Eq)]
pub struct FeedSource {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(url)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Telegram
    pub telegram_channel_id: Option<String>,
    pub telegram_bot_token: Option<String>,
    #[serde(default = "default_telegram_api")]
    pub telegram_api_url: String,
    #[serde(default = "default_publish_rate_limit")]
    pub publish_rate_limit_rpm: u32,

    // Composer
    pub openai_api_key: Option<String>,
    #[serde(default = "default_openai_api")]
    pub openai_api_url: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    // Database
    pub database_url: Option<String>,

    // Error reporting
    pub sentry_dsn: Option<String>,

    // Universe and feeds
    #[serde(default)]
    pub stock_symbols: String,
    #[serde(default = "default_feeds")]
    pub market_feeds: String,
    #[serde(default = "default_feeds")]
    pub broad_feeds: String,
    #[serde(default)]
    pub broad_keywords: String,
    #[serde(default = "default_suspicious_keywords")]
    pub suspicious_keywords: String,

    // Calendar
    pub calendar_url: Option<String>,
    #[serde(default = "default_calendar_days")]
    pub calendar_days: u32,

    // Job cadence (humantime strings, e.g. "90s", "5m", "24h")
    #[serde(default = "default_news_interval")]
    pub news_interval: String,
    #[serde(default = "default_calendar_interval")]
    pub calendar_interval: String,
    #[serde(default = "default_calendar_updates_interval")]
    pub calendar_updates_interval: String,
    #[serde(default = "default_summary_interval")]
    pub summary_interval: String,
    #[serde(default = "default_fetch_window")]
    pub fetch_window: String,

    // Timeouts
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout: String,
    #[serde(default = "default_run_timeout")]
    pub run_timeout: String,

    // Summary
    #[serde(default = "default_summary_min_items")]
    pub summary_min_items: usize,
    #[serde(default = "default_summary_limit")]
    pub summary_limit: usize,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,

    // Concurrency
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    // Metrics server
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

fn default_publish_rate_limit() -> u32 {
    20 // Telegram allows ~20 messages per minute per channel
}

fn default_openai_api() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_feeds() -> String {
    "[]".to_string()
}

fn default_suspicious_keywords() -> String {
    "sponsored,advertorial,press release,giveaway,promo code".to_string()
}

fn default_calendar_days() -> u32 {
    7
}

fn default_news_interval() -> String {
    "1m".to_string()
}

fn default_calendar_interval() -> String {
    "24h".to_string()
}

fn default_calendar_updates_interval() -> String {
    "5m".to_string()
}

fn default_summary_interval() -> String {
    "24h".to_string()
}

fn default_fetch_window() -> String {
    "1h".to_string()
}

fn default_provider_timeout() -> String {
    "20s".to_string()
}

fn default_run_timeout() -> String {
    "2m".to_string()
}

fn default_summary_min_items() -> usize {
    3
}

fn default_summary_limit() -> usize {
    10
}

fn default_summary_max_tokens() -> u32 {
    60
}

fn default_max_concurrent_requests() -> usize {
    10
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_enabled() -> bool {
    true
}

/// Splits a comma separated list, trimming entries and dropping blanks
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses and validates a JSON array of `{name, url}` feed entries
pub fn parse_feeds(raw: &str) -> Result<Vec<FeedSource>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let feeds: Vec<FeedSource> =
        serde_json::from_str(trimmed).context("feed list is not a JSON array of {name, url}")?;
    for feed in &feeds {
        feed.validate()
            .with_context(|| format!("invalid feed entry {:?}", feed.name))?;
    }
    Ok(feeds)
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw.trim())
        .with_context(|| format!("{field} is not a valid duration: {raw:?}"))
}

impl Config {
    pub fn load() -> Result<Self> {
        // .env is optional
        dotenvy::dotenv().ok();

        // Process environment wins over .env
        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Cross-field checks that serde cannot express
    pub fn validate(&self) -> Result<()> {
        self.market_feeds()?;
        self.broad_feeds()?;

        for (field, raw) in [
            ("NEWS_INTERVAL", &self.news_interval),
            ("CALENDAR_INTERVAL", &self.calendar_interval),
            ("CALENDAR_UPDATES_INTERVAL", &self.calendar_updates_interval),
            ("SUMMARY_INTERVAL", &self.summary_interval),
            ("FETCH_WINDOW", &self.fetch_window),
        ] {
            parse_duration(field, raw)?;
        }

        if self.provider_timeout()? >= self.run_timeout()? {
            bail!(
                "PROVIDER_TIMEOUT ({}) must be shorter than RUN_TIMEOUT ({})",
                self.provider_timeout,
                self.run_timeout
            );
        }

        if let Some(url) = &self.calendar_url {
            url::Url::parse(url).with_context(|| format!("CALENDAR_URL is not a URL: {url}"))?;
        }

        Ok(())
    }

    pub fn market_feeds(&self) -> Result<Vec<FeedSource>> {
        parse_feeds(&self.market_feeds).context("MARKET_FEEDS")
    }

    pub fn broad_feeds(&self) -> Result<Vec<FeedSource>> {
        parse_feeds(&self.broad_feeds).context("BROAD_FEEDS")
    }

    pub fn stock_universe(&self) -> Vec<String> {
        split_list(&self.stock_symbols)
            .into_iter()
            .map(|s| s.to_uppercase())
            .collect()
    }

    pub fn broad_keywords(&self) -> Vec<String> {
        split_list(&self.broad_keywords)
    }

    pub fn suspicious_keywords(&self) -> Vec<String> {
        split_list(&self.suspicious_keywords)
    }

    pub fn news_interval(&self) -> Result<Duration> {
        parse_duration("NEWS_INTERVAL", &self.news_interval)
    }

    pub fn calendar_interval(&self) -> Result<Duration> {
        parse_duration("CALENDAR_INTERVAL", &self.calendar_interval)
    }

    pub fn calendar_updates_interval(&self) -> Result<Duration> {
        parse_duration("CALENDAR_UPDATES_INTERVAL", &self.calendar_updates_interval)
    }

    pub fn summary_interval(&self) -> Result<Duration> {
        parse_duration("SUMMARY_INTERVAL", &self.summary_interval)
    }

    pub fn fetch_window(&self) -> Result<Duration> {
        parse_duration("FETCH_WINDOW", &self.fetch_window)
    }

    pub fn provider_timeout(&self) -> Result<Duration> {
        parse_duration("PROVIDER_TIMEOUT", &self.provider_timeout)
    }

    pub fn run_timeout(&self) -> Result<Duration> {
        parse_duration("RUN_TIMEOUT", &self.run_timeout)
    }

    /// Bot token and channel both present
    pub fn has_publisher(&self) -> bool {
        self.telegram_bot_token.is_some() && self.telegram_channel_id.is_some()
    }

    /// An API key is set
    pub fn has_composer(&self) -> bool {
        self.openai_api_key.is_some()
    }

    /// `DATABASE_URL` is set
    pub fn has_database(&self) -> bool {
        self.database_url.is_some()
    }
}
