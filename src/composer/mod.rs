//! Generative composer boundary
//!
//! The composer rewrites news into channel-ready text, tags it with
//! tickers, markets and hashtags, and scores relevance before publishing.

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schemas::{NewsList, NewsMeta};

/// Rewritten text plus extracted metadata for one news item, keyed by fingerprint
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComposedNews {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default)]
    pub markets: Vec<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

impl ComposedNews {
    pub fn meta(&self) -> NewsMeta {
        NewsMeta {
            tickers: self.tickers.clone(),
            markets: self.markets.clone(),
            hashtags: self.hashtags.clone(),
        }
    }
}

/// Input line for a summary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Headline {
    pub id: String,
    pub text: String,
}

/// Condensed headline returned by [`Composer::summarise`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummarisedHeadline {
    pub id: String,
    pub summary: String,
}

#[async_trait]
pub trait Composer: Send + Sync {
    /// Relevance pass. Implementations may drop items or mark them
    /// `is_filtered`; the pre-publish filter enforces removal either way.
    async fn filter(&self, news: NewsList) -> Result<NewsList>;

    /// Rewrites and tags a batch. Items may be omitted from the output.
    async fn compose(&self, news: &NewsList) -> Result<Vec<ComposedNews>>;

    /// Condenses up to `limit` headlines into short synopses.
    async fn summarise(
        &self,
        headlines: &[Headline],
        limit: usize,
        max_tokens: u32,
    ) -> Result<Vec<SummarisedHeadline>>;
}

pub use openai::OpenAiComposer;
