//! Message text for the publish stage (Telegram HTML)

use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::schemas::NewsRecord;

const QUOTE_BASE_URL: &str = "https://finance.yahoo.com/quote/";

/// Final text for a record: composed text with ticker links when the
/// metadata parses, composed text alone when it does not, and the raw
/// title and description when nothing was composed.
pub fn publish_text(record: &NewsRecord) -> String {
    match &record.composed_text {
        Some(text) => match record.parse_meta() {
            Ok(meta) => link_tickers(text, &meta.tickers),
            Err(_) => encode_text(text).into_owned(),
        },
        None => raw_text(&record.title, &record.description),
    }
}

/// `<b>title</b>` followed by the description, both escaped
pub fn raw_text(title: &str, description: &str) -> String {
    let title = encode_text(title);
    if description.is_empty() {
        format!("<b>{title}</b>")
    } else {
        format!("<b>{title}</b>\n\n{}", encode_text(description))
    }
}

enum Segment {
    Text(String),
    Link(String),
}

/// Escapes `text` and turns the first standalone occurrence of each ticker
/// into a quote link. Later occurrences stay plain, and text already inside
/// a link is never matched again.
pub fn link_tickers(text: &str, tickers: &[String]) -> String {
    let mut segments = vec![Segment::Text(encode_text(text).into_owned())];

    for ticker in tickers {
        let ticker = ticker.trim();
        if ticker.is_empty() {
            continue;
        }
        let needle = encode_text(ticker).into_owned();

        let hit = segments.iter().enumerate().find_map(|(i, segment)| match segment {
            Segment::Text(s) => find_standalone(s, &needle).map(|pos| (i, pos)),
            Segment::Link(_) => None,
        });

        if let Some((index, pos)) = hit {
            let Segment::Text(s) = segments.remove(index) else {
                continue;
            };
            let before = s[..pos].to_string();
            let after = s[pos + needle.len()..].to_string();
            let link = format!(
                "<a href=\"{}{}\">{}</a>",
                QUOTE_BASE_URL,
                encode_double_quoted_attribute(ticker),
                needle
            );
            segments.splice(
                index..index,
                [Segment::Text(before), Segment::Link(link), Segment::Text(after)],
            );
        }
    }

    segments
        .into_iter()
        .map(|segment| match segment {
            Segment::Text(s) | Segment::Link(s) => s,
        })
        .collect()
}

/// Byte offset of the first occurrence not embedded in a longer word
fn find_standalone(haystack: &str, needle: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(offset) = haystack[from..].find(needle) {
        let start = from + offset;
        let end = start + needle.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..].chars().next().map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return Some(start);
        }
        from = start + haystack[start..].chars().next().map_or(1, char::len_utf8);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{News, NewsMeta};
    use chrono::Utc;

    fn link(t: &str) -> String {
        format!("<a href=\"https://finance.yahoo.com/quote/{t}\">{t}</a>")
    }

    #[test]
    fn test_links_each_ticker_once() {
        let tickers = vec!["AAPL".to_string(), "MSFT".to_string()];
        let out = link_tickers("Some AAPL news about with MSFT stock.", &tickers);

        assert_eq!(
            out,
            format!("Some {} news about with {} stock.", link("AAPL"), link("MSFT"))
        );
    }

    #[test]
    fn test_repeated_ticker_linked_only_first_time() {
        let out = link_tickers("AAPL up, AAPL again", &["AAPL".to_string()]);
        assert_eq!(out, format!("{} up, AAPL again", link("AAPL")));
        assert_eq!(out.matches("<a ").count(), 1);
    }

    #[test]
    fn test_skips_embedded_matches() {
        let out = link_tickers("SNAPPY beats; SNAP rises", &["SNAP".to_string()]);
        assert_eq!(out, format!("SNAPPY beats; {} rises", link("SNAP")));
    }

    #[test]
    fn test_ticker_inside_previous_link_not_rematched() {
        // "A" would otherwise match inside the href of the first link
        let out = link_tickers("Buy AA and A", &["AA".to_string(), "A".to_string()]);
        assert_eq!(out, format!("Buy {} and {}", link("AA"), link("A")));
    }

    #[test]
    fn test_text_is_escaped() {
        let out = link_tickers("S&P <up>", &[]);
        assert_eq!(out, "S&amp;P &lt;up&gt;");
    }

    #[test]
    fn test_publish_text_fallbacks() {
        let news = News::with_date("Fed & rates", "Holds steady", "https://x.io/1", Utc::now(), "feed");
        let mut record = NewsRecord::from_news(&news);
        assert_eq!(publish_text(&record), "<b>Fed &amp; rates</b>\n\nHolds steady");

        record.composed_text = Some("Rates flat, SPY calm".to_string());
        record.set_meta(&NewsMeta { tickers: vec!["SPY".into()], ..Default::default() }).unwrap();
        assert_eq!(publish_text(&record), format!("Rates flat, {} calm", link("SPY")));

        record.meta = Some("{broken".to_string());
        assert_eq!(publish_text(&record), "Rates flat, SPY calm");
    }
}
