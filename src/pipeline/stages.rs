//! News Job Stage Implementations
//!
//! Each stage is a plain function of (input batch, options, collaborator)
//! so it can be exercised on its own. Sequencing, reporting and the
//! empty/failed short-circuit live in [`super::NewsJob`].

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use super::render::publish_text;
use super::JobOptions;
use crate::composer::{ComposedNews, Composer};
use crate::error::{NewsroomError, Result};
use crate::publisher::Publisher;
use crate::schemas::{MetaKey, NewsList, NewsRecord};
use crate::storage::NewsStore;

// ============================================
// DEDUPE
// ============================================

/// Drops items already stored, matching on fingerprint OR on URL.
/// Surviving items keep their original order.
pub async fn remove_duplicates(store: &dyn NewsStore, news: NewsList) -> Result<NewsList> {
    let by_hash = store.find_all_by_hashes(&news.ids()).await?;
    let by_url = store.find_all_by_urls(&news.links()).await?;

    let known_hashes: HashSet<String> = by_hash.into_iter().map(|r| r.hash).collect();
    let known_urls: HashSet<String> = by_url.into_iter().map(|r| r.url).collect();

    let kept: NewsList = news
        .into_iter()
        .filter(|n| !known_hashes.contains(&n.id) && !known_urls.contains(&n.link))
        .collect();

    debug!(
        hash_matches = known_hashes.len(),
        url_matches = known_urls.len(),
        kept = kept.len(),
        "Duplicates removed"
    );
    Ok(kept)
}

// ============================================
// AI FILTER / COMPOSE
// ============================================

/// Delegates relevance screening to the composer
pub async fn ai_filter(composer: &dyn Composer, news: NewsList) -> Result<NewsList> {
    composer.filter(news).await
}

/// Composes the items that survived the relevance filter
pub async fn compose(composer: &dyn Composer, news: &NewsList) -> Result<Vec<ComposedNews>> {
    let relevant: NewsList = news.iter().filter(|n| !n.is_filtered).cloned().collect();
    if relevant.is_empty() {
        return Ok(Vec::new());
    }
    composer.compose(&relevant).await
}

// ============================================
// PERSIST
// ============================================

/// Maps every fetched item to a record, attaching composed text and
/// metadata where the fingerprint matches.
///
/// More composed items than fetched items, a repeated id or an id that
/// matches no fetched item is a composer contract violation and fails
/// before anything is written.
pub fn build_records(news: &NewsList, composed: &[ComposedNews]) -> Result<Vec<NewsRecord>> {
    if composed.len() > news.len() {
        return Err(NewsroomError::ContractViolation(format!(
            "composer returned {} items for {} fetched",
            composed.len(),
            news.len()
        )));
    }

    let mut by_id: HashMap<&str, &ComposedNews> = HashMap::with_capacity(composed.len());
    for item in composed {
        if by_id.insert(item.id.as_str(), item).is_some() {
            return Err(NewsroomError::ContractViolation(format!(
                "composer returned id {} more than once",
                item.id
            )));
        }
        if news.find_by_id(&item.id).is_none() {
            return Err(NewsroomError::ContractViolation(format!(
                "composer returned unknown id {}",
                item.id
            )));
        }
    }

    news.iter()
        .map(|n| {
            let mut record = NewsRecord::from_news(n);
            if let Some(item) = by_id.get(n.id.as_str()) {
                record.composed_text = Some(item.text.clone());
                record.set_meta(&item.meta())?;
            }
            Ok(record)
        })
        .collect()
}

// ============================================
// PRE-PUBLISH FILTER
// ============================================

/// Why a record was held back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Omission {
    Suspicious,
    Filtered,
    EmptyKey(MetaKey),
    UnlistedTicker,
    AllKeysEmpty,
}

/// Applies the publication predicates to one record, in order.
/// Returns the first reason to omit it, or `None` to publish.
pub fn omission_reason(
    record: &NewsRecord,
    options: &JobOptions,
    universe: Option<&HashSet<String>>,
) -> Result<Option<Omission>> {
    if options.omit_suspicious && record.is_suspicious {
        return Ok(Some(Omission::Suspicious));
    }
    if record.is_filtered {
        return Ok(Some(Omission::Filtered));
    }

    let meta = record.parse_meta()?;

    for key in &options.omit_empty_meta_keys {
        if meta.values(*key).is_empty() {
            return Ok(Some(Omission::EmptyKey(*key)));
        }
    }

    if let Some(universe) = universe {
        if meta.tickers.iter().any(|t| !universe.contains(t)) {
            return Ok(Some(Omission::UnlistedTicker));
        }
    }

    if options.omit_if_all_keys_empty && meta.is_empty() {
        return Ok(Some(Omission::AllKeysEmpty));
    }

    Ok(None)
}

/// Keeps the records that pass every configured predicate.
/// Malformed metadata fails the whole stage.
pub fn prepublish_filter(
    records: Vec<NewsRecord>,
    options: &JobOptions,
    universe: Option<&HashSet<String>>,
) -> Result<Vec<NewsRecord>> {
    let mut kept = Vec::with_capacity(records.len());
    for record in records {
        match omission_reason(&record, options, universe)? {
            None => kept.push(record),
            Some(reason) => debug!(hash = %record.hash, ?reason, "Record omitted"),
        }
    }
    Ok(kept)
}

// ============================================
// PUBLISH / UPDATE
// ============================================

/// Publishes records in order, stopping at the first failure.
///
/// Returns the records that went out (with publication id and time set)
/// together with the error that stopped the batch, if any.
pub async fn publish(
    publisher: &dyn Publisher,
    records: Vec<NewsRecord>,
) -> (Vec<NewsRecord>, Option<NewsroomError>) {
    let total = records.len();
    let mut published = Vec::with_capacity(total);

    for mut record in records {
        let text = publish_text(&record);
        match publisher.publish(&text).await {
            Ok(publication_id) => {
                debug!(hash = %record.hash, publication_id = %publication_id, "Published");
                record.mark_published(publication_id, Utc::now());
                published.push(record);
            }
            Err(e) => {
                warn!(
                    hash = %record.hash,
                    published = published.len(),
                    remaining = total - published.len(),
                    error = %e,
                    "Publish failed, abandoning rest of batch"
                );
                return (published, Some(e));
            }
        }
    }

    (published, None)
}

/// Writes publication results back. Failures are logged and counted,
/// never propagated: the messages are already live.
pub async fn update(store: &dyn NewsStore, published: &[NewsRecord]) -> usize {
    let mut failures = 0;
    for record in published {
        if let Err(e) = store.update(record).await {
            failures += 1;
            warn!(hash = %record.hash, error = %e, "Failed to record publication");
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{News, NewsMeta};

    fn news(title: &str, link: &str) -> News {
        News::with_date(title, "body", link, Utc::now(), "feed")
    }

    fn record_with_meta(meta: Option<NewsMeta>) -> NewsRecord {
        let mut record = NewsRecord::from_news(&news("t", "https://x.io/t"));
        if let Some(meta) = meta {
            record.set_meta(&meta).unwrap();
        }
        record
    }

    fn tickers(symbols: &[&str]) -> NewsMeta {
        NewsMeta {
            tickers: symbols.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_records_attaches_composition() {
        let list: NewsList = vec![news("a", "https://x.io/a"), news("b", "https://x.io/b")].into();
        let composed = vec![ComposedNews {
            id: list[1].id.clone(),
            text: "B rewritten".to_string(),
            tickers: vec!["MSFT".to_string()],
            ..Default::default()
        }];

        let records = build_records(&list, &composed).unwrap();

        assert_eq!(records.len(), 2);
        assert!(records[0].composed_text.is_none());
        assert!(records[0].meta.is_none());
        assert_eq!(records[1].composed_text.as_deref(), Some("B rewritten"));
        assert_eq!(records[1].parse_meta().unwrap().tickers, vec!["MSFT"]);
    }

    #[test]
    fn test_build_records_rejects_excess_composition() {
        let list: NewsList = vec![news("a", "https://x.io/a")].into();
        let composed = vec![
            ComposedNews { id: list[0].id.clone(), text: "1".into(), ..Default::default() },
            ComposedNews { id: "ghost".into(), text: "2".into(), ..Default::default() },
        ];

        let err = build_records(&list, &composed).unwrap_err();
        assert!(matches!(err, NewsroomError::ContractViolation(_)));
    }

    #[test]
    fn test_build_records_rejects_duplicate_ids() {
        let list: NewsList = vec![news("a", "https://x.io/a"), news("b", "https://x.io/b")].into();
        let id = list[0].id.clone();
        let composed = vec![
            ComposedNews { id: id.clone(), text: "1".into(), ..Default::default() },
            ComposedNews { id, text: "2".into(), ..Default::default() },
        ];

        assert!(matches!(
            build_records(&list, &composed),
            Err(NewsroomError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_omission_order_and_reasons() {
        let options = JobOptions::builder()
            .omit_suspicious()
            .omit_empty_meta_key(MetaKey::Markets)
            .build();

        let mut suspicious = record_with_meta(None);
        suspicious.is_suspicious = true;
        suspicious.is_filtered = true;
        assert_eq!(
            omission_reason(&suspicious, &options, None).unwrap(),
            Some(Omission::Suspicious)
        );

        let mut filtered = record_with_meta(None);
        filtered.is_filtered = true;
        assert_eq!(omission_reason(&filtered, &options, None).unwrap(), Some(Omission::Filtered));

        let no_markets = record_with_meta(Some(tickers(&["AAPL"])));
        assert_eq!(
            omission_reason(&no_markets, &options, None).unwrap(),
            Some(Omission::EmptyKey(MetaKey::Markets))
        );
    }

    #[test]
    fn test_unlisted_requires_all_tickers_known() {
        let options = JobOptions::builder().omit_unlisted_stocks().build();
        let universe: HashSet<String> = ["AAPL".to_string(), "MSFT".to_string()].into();

        let listed = record_with_meta(Some(tickers(&["AAPL", "MSFT"])));
        let mixed = record_with_meta(Some(tickers(&["AAPL", "PLTR"])));

        assert_eq!(omission_reason(&listed, &options, Some(&universe)).unwrap(), None);
        assert_eq!(
            omission_reason(&mixed, &options, Some(&universe)).unwrap(),
            Some(Omission::UnlistedTicker)
        );
    }

    #[test]
    fn test_malformed_meta_fails_stage() {
        let mut broken = record_with_meta(None);
        broken.meta = Some("[oops".to_string());

        let result = prepublish_filter(vec![broken], &JobOptions::default(), None);
        assert!(matches!(result, Err(NewsroomError::MalformedMetadata { .. })));
    }
}
