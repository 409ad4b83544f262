//! Persisted news record
//!
//! A record is "drafted" until a publish call succeeds, after which
//! `publication_id` and `published_at` are set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::news::News;
use crate::error::{NewsroomError, Result};

/// Metadata extracted by the composer
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewsMeta {
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default)]
    pub markets: Vec<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

/// Metadata keys that can gate publication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaKey {
    Tickers,
    Markets,
    Hashtags,
}

impl MetaKey {
    pub const ALL: [MetaKey; 3] = [MetaKey::Tickers, MetaKey::Markets, MetaKey::Hashtags];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetaKey::Tickers => "tickers",
            MetaKey::Markets => "markets",
            MetaKey::Hashtags => "hashtags",
        }
    }
}

impl std::str::FromStr for MetaKey {
    type Err = NewsroomError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tickers" => Ok(MetaKey::Tickers),
            "markets" => Ok(MetaKey::Markets),
            "hashtags" => Ok(MetaKey::Hashtags),
            other => Err(NewsroomError::ValidationError(format!("unknown meta key: {other}"))),
        }
    }
}

impl NewsMeta {
    pub fn values(&self, key: MetaKey) -> &[String] {
        match key {
            MetaKey::Tickers => &self.tickers,
            MetaKey::Markets => &self.markets,
            MetaKey::Hashtags => &self.hashtags,
        }
    }

    pub fn is_empty(&self) -> bool {
        MetaKey::ALL.iter().all(|key| self.values(*key).is_empty())
    }
}

/// Stored news row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct NewsRecord {
    /// Fingerprint of the originating [`News`]
    pub hash: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub composed_text: Option<String>,
    /// JSON-encoded [`NewsMeta`]
    pub meta: Option<String>,
    pub is_suspicious: bool,
    pub is_filtered: bool,
    pub provider: String,
    pub original_date: DateTime<Utc>,
    pub publication_id: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NewsRecord {
    /// Drafted record for a fetched item, without composition.
    pub fn from_news(news: &News) -> Self {
        Self {
            hash: news.id.clone(),
            url: news.link.clone(),
            title: news.title.clone(),
            description: news.description.clone(),
            composed_text: None,
            meta: None,
            is_suspicious: news.is_suspicious,
            is_filtered: news.is_filtered,
            provider: news.provider_name.clone(),
            original_date: news.date,
            publication_id: None,
            published_at: None,
            created_at: Utc::now(),
        }
    }

    /// Decodes the metadata blob. A missing blob decodes as empty metadata;
    /// a blob that is present but not valid JSON is an error.
    pub fn parse_meta(&self) -> Result<NewsMeta> {
        match self.meta.as_deref() {
            None => Ok(NewsMeta::default()),
            Some(raw) if raw.trim().is_empty() => Ok(NewsMeta::default()),
            Some(raw) => serde_json::from_str(raw).map_err(|e| NewsroomError::MalformedMetadata {
                hash: self.hash.clone(),
                detail: e.to_string(),
            }),
        }
    }

    pub fn set_meta(&mut self, meta: &NewsMeta) -> Result<()> {
        self.meta = Some(serde_json::to_string(meta)?);
        Ok(())
    }

    pub fn is_published(&self) -> bool {
        self.publication_id.is_some()
    }

    pub fn mark_published(&mut self, publication_id: String, at: DateTime<Utc>) {
        self.publication_id = Some(publication_id);
        self.published_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> NewsRecord {
        let news = News::new("Title", "Body", "https://x.io/1", "1714557600", "feed").unwrap();
        NewsRecord::from_news(&news)
    }

    #[test]
    fn test_meta_key_parsing() {
        assert_eq!("Tickers".parse::<MetaKey>().unwrap(), MetaKey::Tickers);
        assert_eq!(" hashtags ".parse::<MetaKey>().unwrap(), MetaKey::Hashtags);
        assert!("sectors".parse::<MetaKey>().is_err());
    }

    #[test]
    fn test_parse_meta_missing_is_empty() {
        let rec = record();
        assert!(rec.parse_meta().unwrap().is_empty());
    }

    #[test]
    fn test_parse_meta_malformed_is_error() {
        let mut rec = record();
        rec.meta = Some("{not json".to_string());

        let err = rec.parse_meta().unwrap_err();
        assert!(matches!(err, NewsroomError::MalformedMetadata { .. }));
    }

    #[test]
    fn test_meta_roundtrip_and_values() {
        let mut rec = record();
        let meta = NewsMeta {
            tickers: vec!["AAPL".into()],
            ..Default::default()
        };
        rec.set_meta(&meta).unwrap();

        let parsed = rec.parse_meta().unwrap();
        assert_eq!(parsed.values(MetaKey::Tickers), ["AAPL".to_string()]);
        assert!(parsed.values(MetaKey::Markets).is_empty());
        assert!(!parsed.is_empty());
    }

    #[test]
    fn test_mark_published() {
        let mut rec = record();
        assert!(!rec.is_published());

        rec.mark_published("42".to_string(), Utc::now());
        assert!(rec.is_published());
        assert!(rec.published_at.is_some());
    }
}
