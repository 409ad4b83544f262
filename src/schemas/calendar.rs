//! Economic calendar schema

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Expected market impact of a scheduled event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    #[default]
    Low,
    Medium,
    High,
    /// Market holiday; has no meaningful time of day
    Holiday,
}

impl Impact {
    pub fn as_str(&self) -> &'static str {
        match self {
            Impact::Low => "low",
            Impact::Medium => "medium",
            Impact::High => "high",
            Impact::Holiday => "holiday",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Impact::High,
            "medium" | "moderate" => Impact::Medium,
            "holiday" | "non-economic" => Impact::Holiday,
            _ => Impact::Low,
        }
    }
}

/// One scheduled economic event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub currency: String,
    pub date_time: DateTime<Utc>,
    #[serde(default)]
    pub impact: Impact,
    #[serde(default)]
    pub actual: Option<String>,
    #[serde(default)]
    pub forecast: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
}

impl CalendarEvent {
    pub fn day(&self) -> NaiveDate {
        self.date_time.date_naive()
    }

    pub fn has_actual(&self) -> bool {
        self.actual.as_deref().is_some_and(|a| !a.trim().is_empty())
    }
}
