//! Telegram Bot API publisher
//!
//! Sends HTML-formatted messages to a channel via `sendMessage`.
//! Sends are rate limited per channel with a direct `governor` limiter.
//! A send is attempted once: a gateway error or timeout may still have
//! delivered the message, so replaying the POST could post it twice.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use serde_json::json;
use std::num::NonZeroU32;
use tracing::debug;

use super::Publisher;
use crate::error::{NewsroomError, Result};
use crate::http_client::{ResilientHttpClient, RetryPolicy};
use crate::metrics;

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    result: Option<SentMessage>,
    error_code: Option<i64>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

pub struct TelegramPublisher {
    http: ResilientHttpClient,
    endpoint: String,
    channel_id: String,
    limiter: DefaultDirectRateLimiter,
}

impl TelegramPublisher {
    pub fn new(
        http: ResilientHttpClient,
        api_url: &str,
        bot_token: &str,
        channel_id: impl Into<String>,
        messages_per_minute: u32,
    ) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(messages_per_minute).unwrap_or(NonZeroU32::MIN));

        Self {
            http: http.with_retry(RetryPolicy::none()),
            endpoint: format!("{}/bot{}/sendMessage", api_url.trim_end_matches('/'), bot_token),
            channel_id: channel_id.into(),
            limiter: RateLimiter::direct(quota),
        }
    }
}

#[async_trait]
impl Publisher for TelegramPublisher {
    async fn publish(&self, text: &str) -> Result<String> {
        self.limiter.until_ready().await;

        let body = json!({
            "chat_id": self.channel_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let result = async {
            let response = self
                .http
                .execute(|client| client.post(&self.endpoint).json(&body))
                .await?;
            let reply: TelegramResponse = response.json().await?;

            match (reply.ok, reply.result) {
                (true, Some(message)) => Ok(message.message_id.to_string()),
                _ => Err(NewsroomError::ApiError {
                    code: reply.error_code.map(|c| c.to_string()).unwrap_or_default(),
                    message: reply.description.unwrap_or_else(|| "sendMessage failed".to_string()),
                }),
            }
        }
        .await;

        match &result {
            Ok(id) => {
                metrics::record_publish_success();
                debug!(publication_id = %id, "Message sent");
            }
            Err(_) => metrics::record_publish_failure(),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::HttpClientConfig;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn publisher(server: &MockServer) -> TelegramPublisher {
        TelegramPublisher::new(
            ResilientHttpClient::with_defaults().unwrap(),
            &server.uri(),
            "123:abc",
            "@markets",
            600,
        )
    }

    #[tokio::test]
    async fn test_publish_returns_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_partial_json(json!({ "chat_id": "@markets", "parse_mode": "HTML" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": { "message_id": 4021, "chat": { "id": -100 } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let id = publisher(&server).publish("<b>hello</b>").await.unwrap();
        assert_eq!(id, "4021");
    }

    #[tokio::test]
    async fn test_gateway_error_is_not_replayed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .respond_with(ResponseTemplate::new(504))
            .expect(1)
            .mount(&server)
            .await;

        let http = ResilientHttpClient::new(HttpClientConfig {
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..Default::default()
        })
        .unwrap();
        let publisher = TelegramPublisher::new(http, &server.uri(), "123:abc", "@markets", 600);

        let err = publisher.publish("hello").await.unwrap_err();

        assert!(matches!(err, NewsroomError::ApiError { ref code, .. } if code.starts_with("504")));
        let posts = server.received_requests().await.unwrap_or_default().len();
        assert_eq!(posts, 1);
    }

    #[tokio::test]
    async fn test_publish_not_ok_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": false,
                "error_code": 403,
                "description": "Forbidden: bot is not a member of the channel chat"
            })))
            .mount(&server)
            .await;

        let err = publisher(&server).publish("hi").await.unwrap_err();
        match err {
            NewsroomError::ApiError { code, message } => {
                assert_eq!(code, "403");
                assert!(message.contains("Forbidden"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
