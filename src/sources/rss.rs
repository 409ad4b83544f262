//! RSS 2.0 Data Source
//!
//! Fetches a feed over HTTP and turns `<item>` entries into [`News`].
//!
//! Feeds are assumed to list items newest first: parsing stops at the first
//! item older than the cutoff. A feed that is not ordered may therefore
//! return fewer items than it holds inside the window.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use tracing::{debug, warn};

use super::Source;
use crate::config::FeedSource;
use crate::error::{NewsroomError, Result};
use crate::http_client::ResilientHttpClient;
use crate::schemas::{News, NewsList};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

/// Parses an RSS document into news, stopping at the first item older than `until`.
pub fn parse_feed(provider: &str, xml: &str, until: DateTime<Utc>) -> Result<NewsList> {
    let rss: Rss = from_str(xml).map_err(|e| NewsroomError::XmlError(e.to_string()))?;
    let mut out = NewsList::new();

    for item in rss.channel.items {
        let Some(link) = item.link.as_deref().map(str::trim).filter(|l| !l.is_empty()) else {
            debug!(provider, "Skipping item without link");
            continue;
        };

        let news = match News::new(
            item.title.as_deref().unwrap_or_default(),
            item.description.as_deref().unwrap_or_default(),
            link,
            item.pub_date.as_deref().unwrap_or_default(),
            provider,
        ) {
            Ok(news) => news,
            Err(e) => {
                warn!(provider, link, error = %e, "Skipping item with unparsable date");
                continue;
            }
        };

        if news.date < until {
            break;
        }
        if news.title.is_empty() && news.description.is_empty() {
            continue;
        }
        out.push(news);
    }

    Ok(out)
}

/// One RSS endpoint
pub struct RssSource {
    name: String,
    url: String,
    http: ResilientHttpClient,
}

impl RssSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, http: ResilientHttpClient) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            http,
        }
    }

    pub fn from_feed(feed: &FeedSource, http: ResilientHttpClient) -> Self {
        Self::new(feed.name.clone(), feed.url.clone(), http)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Source for RssSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, until: DateTime<Utc>) -> Result<NewsList> {
        let body = self
            .http
            .get_text(&self.url)
            .await
            .map_err(|e| NewsroomError::provider(&self.name, e))?;

        let news = parse_feed(&self.name, &body, until)
            .map_err(|e| NewsroomError::provider(&self.name, e))?;

        debug!(provider = %self.name, count = news.len(), "Feed parsed");
        Ok(news)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Markets</title>
    <item>
      <title>Apple beats estimates</title>
      <link>https://example.com/apple?utm_source=rss</link>
      <description><![CDATA[<p>Revenue <b>up</b> 8%</p>]]></description>
      <pubDate>Wed, 01 May 2024 12:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Broken date</title>
      <link>https://example.com/broken</link>
      <pubDate>sometime</pubDate>
    </item>
    <item>
      <title>Oil slips</title>
      <link>https://example.com/oil</link>
      <description>Brent lower</description>
      <pubDate>Wed, 01 May 2024 09:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Old news</title>
      <link>https://example.com/old</link>
      <pubDate>Tue, 30 Apr 2024 09:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Out of order but fresh</title>
      <link>https://example.com/late</link>
      <pubDate>Wed, 01 May 2024 13:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed_stops_at_first_old_item() {
        let until = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let news = parse_feed("markets", FEED, until).unwrap();

        let titles: Vec<&str> = news.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["Apple beats estimates", "Oil slips"]);
        assert_eq!(news[0].description, "Revenue up 8%");
        assert_eq!(news[0].link, "https://example.com/apple");
        assert_eq!(news[0].provider_name, "markets");
    }

    #[test]
    fn test_parse_feed_rejects_non_rss() {
        let until = Utc::now();
        let err = parse_feed("bad", "<html><body>nope</body></html>", until).unwrap_err();
        assert!(matches!(err, NewsroomError::XmlError(_)));
    }

    #[test]
    fn test_parse_empty_channel() {
        let xml = r#"<rss version="2.0"><channel><title>Empty</title></channel></rss>"#;
        let news = parse_feed("empty", xml, Utc::now()).unwrap();
        assert!(news.is_empty());
    }
}
