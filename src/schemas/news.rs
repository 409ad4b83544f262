//! News Schema
//!
//! In-flight representation of one fetched article, before persistence.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};

use crate::dedup::{canonical_link, fingerprint, sanitize_text};
use crate::error::{NewsroomError, Result};

/// Epoch values at or above this are treated as milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// One fetched news item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct News {
    /// Content fingerprint
    pub id: String,
    pub title: String,
    pub description: String,
    /// Canonical source URL
    pub link: String,
    pub date: DateTime<Utc>,
    pub provider_name: String,
    #[serde(default)]
    pub is_suspicious: bool,
    #[serde(default)]
    pub is_filtered: bool,
}

impl News {
    /// Builds a news item from raw feed fields.
    ///
    /// Title and description are sanitised before fingerprinting, so two
    /// markup variants of the same text produce the same `id`. Fails with
    /// `DateParseError` when `date` matches none of the known layouts.
    pub fn new(
        title: &str,
        description: &str,
        link: &str,
        date: &str,
        provider_name: &str,
    ) -> Result<Self> {
        let date = parse_date(date)?;
        Ok(Self::with_date(title, description, link, date, provider_name))
    }

    /// Same as [`News::new`] with an already parsed timestamp.
    pub fn with_date(
        title: &str,
        description: &str,
        link: &str,
        date: DateTime<Utc>,
        provider_name: &str,
    ) -> Self {
        let title = sanitize_text(title);
        let description = sanitize_text(description);
        let link = canonical_link(link);
        let id = fingerprint(&link, &title, &description);

        Self {
            id,
            title,
            description,
            link,
            date,
            provider_name: provider_name.to_string(),
            is_suspicious: false,
            is_filtered: false,
        }
    }

    fn haystack(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// Parses a feed timestamp into UTC. The first layout that parses wins:
/// RFC 1123 / RFC 1123Z, RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC), then Unix
/// epoch seconds or milliseconds.
pub fn parse_date(input: &str) -> Result<DateTime<Utc>> {
    let trimmed = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(epoch) = trimmed.parse::<i64>() {
        let parsed = if epoch.abs() >= EPOCH_MILLIS_THRESHOLD {
            Utc.timestamp_millis_opt(epoch).single()
        } else {
            Utc.timestamp_opt(epoch, 0).single()
        };
        if let Some(dt) = parsed {
            return Ok(dt);
        }
    }

    Err(NewsroomError::DateParseError {
        input: input.to_string(),
    })
}

/// Ordered batch of news items
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct NewsList(Vec<News>);

impl NewsList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Keeps items whose title or description contains any keyword.
    /// Matching is case-sensitive; an empty keyword list keeps everything.
    pub fn filter_by_keywords(&self, keywords: &[String]) -> NewsList {
        if keywords.is_empty() {
            return self.clone();
        }

        self.0
            .iter()
            .filter(|news| {
                let haystack = news.haystack();
                keywords.iter().any(|k| !k.is_empty() && haystack.contains(k.as_str()))
            })
            .cloned()
            .collect()
    }

    /// Marks items mentioning any keyword (case-insensitive) as suspicious.
    /// Nothing is removed. Returns how many items were flagged.
    pub fn flag_by_keywords(&mut self, keywords: &[String]) -> usize {
        let lowered: Vec<String> = keywords
            .iter()
            .filter(|k| !k.is_empty())
            .map(|k| k.to_lowercase())
            .collect();
        if lowered.is_empty() {
            return 0;
        }

        let mut flagged = 0;
        for news in self.0.iter_mut() {
            let haystack = news.haystack().to_lowercase();
            if lowered.iter().any(|k| haystack.contains(k.as_str())) {
                news.is_suspicious = true;
                flagged += 1;
            }
        }
        flagged
    }

    /// Index of items by fingerprint. Later duplicates do not replace earlier ones.
    pub fn map_ids(&self) -> HashMap<&str, &News> {
        let mut map = HashMap::with_capacity(self.0.len());
        for news in &self.0 {
            map.entry(news.id.as_str()).or_insert(news);
        }
        map
    }

    /// Collapses the list to one item per fingerprint and per canonical
    /// link, keeping the first occurrence and the original order. Two
    /// feeds can carry the same URL with drifted text; only one of them
    /// may reach the store.
    pub fn dedup_by_identity(self) -> NewsList {
        let mut ids = HashSet::with_capacity(self.0.len());
        let mut links = HashSet::with_capacity(self.0.len());
        self.0
            .into_iter()
            .filter(|news| {
                let fresh = !ids.contains(&news.id) && !links.contains(&news.link);
                if fresh {
                    ids.insert(news.id.clone());
                    links.insert(news.link.clone());
                }
                fresh
            })
            .collect()
    }

    pub fn find_by_id(&self, id: &str) -> Option<&News> {
        self.0.iter().find(|news| news.id == id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.0.iter().map(|n| n.id.clone()).collect()
    }

    pub fn links(&self) -> Vec<String> {
        self.0.iter().map(|n| n.link.clone()).collect()
    }

    pub fn into_inner(self) -> Vec<News> {
        self.0
    }
}

impl Deref for NewsList {
    type Target = Vec<News>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for NewsList {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<News>> for NewsList {
    fn from(items: Vec<News>) -> Self {
        Self(items)
    }
}

impl FromIterator<News> for NewsList {
    fn from_iter<I: IntoIterator<Item = News>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for NewsList {
    type Item = News;
    type IntoIter = std::vec::IntoIter<News>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Extend<News> for NewsList {
    fn extend<I: IntoIterator<Item = News>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn news(title: &str, description: &str, link: &str) -> News {
        News::new(title, description, link, "2024-05-01T10:00:00Z", "test").unwrap()
    }

    #[test]
    fn test_parse_date_layouts() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        assert_eq!(parse_date("Wed, 01 May 2024 10:00:00 GMT").unwrap(), expected);
        assert_eq!(parse_date("Wed, 01 May 2024 12:00:00 +0200").unwrap(), expected);
        assert_eq!(parse_date("2024-05-01T06:00:00-04:00").unwrap(), expected);
        assert_eq!(parse_date("2024-05-01 10:00:00").unwrap(), expected);
        assert_eq!(parse_date("1714557600").unwrap(), expected);
        assert_eq!(parse_date("1714557600000").unwrap(), expected);
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        let err = parse_date("yesterday-ish").unwrap_err();
        assert!(matches!(err, NewsroomError::DateParseError { .. }));
    }

    #[test]
    fn test_new_news_fails_on_bad_date() {
        let result = News::new("t", "d", "https://example.com", "not a date", "p");
        assert!(matches!(result, Err(NewsroomError::DateParseError { .. })));
    }

    #[test]
    fn test_fingerprint_is_stable_across_markup() {
        let plain = news("Fed holds rates", "Markets steady", "https://example.com/a");
        let marked = news(
            "<b>Fed</b> holds rates",
            "<p>Markets&nbsp;steady</p>",
            "https://example.com/a?utm_source=rss",
        );

        assert_eq!(plain.id, marked.id);
        assert_eq!(marked.title, "Fed holds rates");
    }

    #[test]
    fn test_fingerprint_ignores_date_and_provider() {
        let a = News::new("T", "D", "https://x.io/1", "1714557600", "one").unwrap();
        let b = News::new("T", "D", "https://x.io/1", "1714560000", "two").unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_filter_by_keywords_is_case_sensitive() {
        let list: NewsList = vec![
            news("US jobs report", "", "https://x.io/1"),
            news("us jobs report", "", "https://x.io/2"),
            news("Japan exports", "", "https://x.io/3"),
        ]
        .into();

        let scoped = list.filter_by_keywords(&["US".to_string()]);
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].link, "https://x.io/1");

        assert_eq!(list.filter_by_keywords(&[]).len(), 3);
    }

    #[test]
    fn test_flag_by_keywords_is_case_insensitive() {
        let mut list: NewsList = vec![
            news("Shares SOAR on rumor", "", "https://x.io/1"),
            news("Quarterly results", "in line", "https://x.io/2"),
        ]
        .into();

        let flagged = list.flag_by_keywords(&["soar".to_string()]);

        assert_eq!(flagged, 1);
        assert_eq!(list.len(), 2);
        assert!(list[0].is_suspicious);
        assert!(!list[1].is_suspicious);
    }

    #[test]
    fn test_dedup_by_identity_keeps_first() {
        let mut second = news("Same", "Body", "https://x.io/1");
        second.provider_name = "other".to_string();
        let list: NewsList = vec![
            news("Same", "Body", "https://x.io/1"),
            news("Different", "Body", "https://x.io/2"),
            second,
        ]
        .into();

        let unique = list.dedup_by_identity();
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].provider_name, "test");
        assert_eq!(unique[1].title, "Different");
    }

    #[test]
    fn test_dedup_collapses_same_link_with_drifted_text() {
        let list: NewsList = vec![
            news("Fed holds", "v1", "https://x.io/same"),
            news("Fed holds rates", "v2", "https://x.io/same?utm_source=rss"),
            news("Oil up", "", "https://x.io/oil"),
        ]
        .into();

        let unique = list.dedup_by_identity();
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].title, "Fed holds");
        assert_eq!(unique[1].title, "Oil up");
    }

    #[test]
    fn test_find_by_id_and_map_ids() {
        let list: NewsList = vec![news("A", "", "https://x.io/a"), news("B", "", "https://x.io/b")].into();
        let id = list[1].id.clone();

        assert_eq!(list.find_by_id(&id).map(|n| n.title.as_str()), Some("B"));
        assert!(list.find_by_id("missing").is_none());
        assert_eq!(list.map_ids().len(), 2);
    }
}
