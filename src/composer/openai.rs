//! OpenAI chat-completions composer
//!
//! Every call sends one JSON document as the user message and asks for a
//! JSON object back (`response_format = json_object`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use tracing::{debug, warn};

use super::{ComposedNews, Composer, Headline, SummarisedHeadline};
use crate::error::{NewsroomError, Result};
use crate::http_client::ResilientHttpClient;
use crate::schemas::NewsList;

const FILTER_PROMPT: &str = "You screen financial news for a markets channel. \
Reply with {\"ids\": [...]} listing the ids worth publishing. Drop blank, clickbait, \
promotional and off-topic items.";

const COMPOSE_PROMPT: &str = "Rewrite each financial news item as one or two concise \
sentences for a markets channel. Reply with {\"items\": [{\"id\", \"text\", \"tickers\", \
\"markets\", \"hashtags\"}]}. Tickers are exchange symbols mentioned verbatim in the text.";

const SUMMARY_PROMPT: &str = "Condense each headline into a short synopsis. \
Reply with {\"items\": [{\"id\", \"summary\"}]}.";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FilterReply {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ComposeReply {
    #[serde(default)]
    items: Vec<ComposedNews>,
}

#[derive(Debug, Deserialize)]
struct SummaryReply {
    #[serde(default)]
    items: Vec<SummarisedHeadline>,
}

#[derive(Debug, Serialize)]
struct PromptItem<'a> {
    id: &'a str,
    title: &'a str,
    description: &'a str,
}

/// Composer backed by an OpenAI-compatible chat-completions endpoint
pub struct OpenAiComposer {
    http: ResilientHttpClient,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiComposer {
    pub fn new(
        http: ResilientHttpClient,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    async fn complete<T: serde::de::DeserializeOwned>(
        &self,
        system: &str,
        user: String,
        max_tokens: Option<u32>,
    ) -> Result<T> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut body = json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });
        if let Some(max_tokens) = max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let response = self
            .http
            .execute(|client| client.post(&url).bearer_auth(&self.api_key).json(&body))
            .await?;
        let chat: ChatResponse = response.json().await?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| NewsroomError::ComposerError("empty completion".to_string()))?;

        serde_json::from_str(&content)
            .map_err(|e| NewsroomError::ComposerError(format!("unexpected reply shape: {e}")))
    }

    fn prompt_items(news: &NewsList) -> Result<String> {
        let items: Vec<PromptItem<'_>> = news
            .iter()
            .map(|n| PromptItem {
                id: &n.id,
                title: &n.title,
                description: &n.description,
            })
            .collect();
        Ok(serde_json::to_string(&json!({ "items": items }))?)
    }
}

#[async_trait]
impl Composer for OpenAiComposer {
    async fn filter(&self, mut news: NewsList) -> Result<NewsList> {
        if news.is_empty() {
            return Ok(news);
        }

        let reply: FilterReply = self
            .complete(FILTER_PROMPT, Self::prompt_items(&news)?, None)
            .await?;
        let keep: HashSet<String> = reply.ids.into_iter().collect();

        for item in news.iter_mut() {
            if !keep.contains(&item.id) {
                item.is_filtered = true;
            }
        }

        debug!(
            total = news.len(),
            kept = news.iter().filter(|n| !n.is_filtered).count(),
            "Relevance filter applied"
        );
        Ok(news)
    }

    async fn compose(&self, news: &NewsList) -> Result<Vec<ComposedNews>> {
        if news.is_empty() {
            return Ok(Vec::new());
        }

        let reply: ComposeReply = self
            .complete(COMPOSE_PROMPT, Self::prompt_items(news)?, None)
            .await?;

        let composed: Vec<ComposedNews> = reply
            .items
            .into_iter()
            .filter(|item| {
                let blank = item.text.trim().is_empty();
                if blank {
                    warn!(id = %item.id, "Composer returned blank text");
                }
                !blank
            })
            .collect();
        Ok(composed)
    }

    async fn summarise(
        &self,
        headlines: &[Headline],
        limit: usize,
        max_tokens: u32,
    ) -> Result<Vec<SummarisedHeadline>> {
        let selected = &headlines[..headlines.len().min(limit)];
        if selected.is_empty() {
            return Ok(Vec::new());
        }

        let user = serde_json::to_string(&json!({ "items": selected }))?;
        let budget = max_tokens.saturating_mul(selected.len() as u32);
        let reply: SummaryReply = self.complete(SUMMARY_PROMPT, user, Some(budget)).await?;

        let mut items = reply.items;
        items.truncate(limit);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::News;
    use chrono::Utc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion(content: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": content.to_string() } }]
        }))
    }

    fn composer(server: &MockServer) -> OpenAiComposer {
        OpenAiComposer::new(
            ResilientHttpClient::with_defaults().unwrap(),
            server.uri(),
            "sk-test",
            "gpt-test",
        )
    }

    fn batch() -> NewsList {
        vec![
            News::with_date("Apple beats", "Revenue up", "https://x.io/a", Utc::now(), "feed"),
            News::with_date("Win a prize", "Click here", "https://x.io/b", Utc::now(), "feed"),
        ]
        .into()
    }

    #[tokio::test]
    async fn test_filter_soft_flags_rejected_items() {
        let server = MockServer::start().await;
        let news = batch();
        let keep_id = news[0].id.clone();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(completion(json!({ "ids": [keep_id] })))
            .mount(&server)
            .await;

        let filtered = composer(&server).filter(news).await.unwrap();

        assert_eq!(filtered.len(), 2);
        assert!(!filtered[0].is_filtered);
        assert!(filtered[1].is_filtered);
    }

    #[tokio::test]
    async fn test_compose_parses_items_and_drops_blank_text() {
        let server = MockServer::start().await;
        let news = batch();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(completion(json!({ "items": [
                { "id": news[0].id, "text": "AAPL beat estimates.", "tickers": ["AAPL"] },
                { "id": news[1].id, "text": "  " }
            ]})))
            .mount(&server)
            .await;

        let composed = composer(&server).compose(&news).await.unwrap();

        assert_eq!(composed.len(), 1);
        assert_eq!(composed[0].tickers, vec!["AAPL"]);
        assert!(composed[0].markets.is_empty());
    }

    #[tokio::test]
    async fn test_unexpected_reply_is_composer_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(completion(json!("not an object")))
            .mount(&server)
            .await;

        let err = composer(&server).compose(&batch()).await.unwrap_err();
        assert!(matches!(err, NewsroomError::ComposerError(_)));
    }

    #[tokio::test]
    async fn test_summarise_respects_limit() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(completion(json!({ "items": [
                { "id": "1", "summary": "one" },
                { "id": "2", "summary": "two" },
                { "id": "3", "summary": "three" }
            ]})))
            .mount(&server)
            .await;

        let headlines: Vec<Headline> = (1..=3)
            .map(|i| Headline {
                id: i.to_string(),
                text: format!("headline {i}"),
            })
            .collect();

        let out = composer(&server).summarise(&headlines, 2, 40).await.unwrap();
        assert_eq!(out.len(), 2);
    }
}
