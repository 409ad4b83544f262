//! Economic calendar
//!
//! A source of scheduled events, the digest formatting, and the two
//! calendar jobs (weekly digest, actual-value updates).

pub mod digest;
pub mod jobs;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::{NewsroomError, Result};
use crate::http_client::ResilientHttpClient;
use crate::schemas::{CalendarEvent, Impact};

#[async_trait]
pub trait CalendarSource: Send + Sync {
    /// Events scheduled in `[from, to)`
    async fn fetch_events(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<CalendarEvent>>;
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    title: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    currency: String,
    date_time: DateTime<Utc>,
    #[serde(default)]
    impact: String,
    actual: Option<String>,
    forecast: Option<String>,
    previous: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl From<RawEvent> for CalendarEvent {
    fn from(raw: RawEvent) -> Self {
        CalendarEvent {
            id: raw.id,
            title: raw.title,
            country: raw.country,
            currency: raw.currency.to_uppercase(),
            date_time: raw.date_time,
            impact: Impact::parse(&raw.impact),
            actual: non_blank(raw.actual),
            forecast: non_blank(raw.forecast),
            previous: non_blank(raw.previous),
        }
    }
}

/// Calendar served as a JSON array from `{url}?from=YYYY-MM-DD&to=YYYY-MM-DD`
pub struct JsonCalendarSource {
    http: ResilientHttpClient,
    url: String,
}

impl JsonCalendarSource {
    pub fn new(http: ResilientHttpClient, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl CalendarSource for JsonCalendarSource {
    async fn fetch_events(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<CalendarEvent>> {
        let query = [
            ("from", from.format("%Y-%m-%d").to_string()),
            ("to", to.format("%Y-%m-%d").to_string()),
        ];
        let response = self
            .http
            .execute(|client| client.get(&self.url).query(&query))
            .await
            .map_err(|e| NewsroomError::provider("calendar", e))?;
        let raw: Vec<RawEvent> = response
            .json()
            .await
            .map_err(|e| NewsroomError::provider("calendar", e))?;

        let mut events: Vec<CalendarEvent> = raw
            .into_iter()
            .map(CalendarEvent::from)
            .filter(|e| e.date_time >= from && e.date_time < to)
            .collect();
        events.sort_by(|a, b| a.date_time.cmp(&b.date_time).then_with(|| a.id.cmp(&b.id)));

        debug!(count = events.len(), "Calendar events fetched");
        Ok(events)
    }
}
