//! Outbound publishing boundary

pub mod telegram;

use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{NewsroomError, Result};
use crate::metrics;

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Sends one message and returns its publication id
    async fn publish(&self, text: &str) -> Result<String>;
}

/// Retries a publisher a fixed number of times with a fixed delay.
///
/// Meant for transports that sometimes report an error for a send that
/// later succeeds on retry. After the last attempt the error is final.
pub struct RetryingPublisher<P> {
    inner: P,
    attempts: u32,
    delay: Duration,
}

impl<P: Publisher> RetryingPublisher<P> {
    pub fn new(inner: P, attempts: u32, delay: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            delay,
        }
    }
}

#[async_trait]
impl<P: Publisher> Publisher for RetryingPublisher<P> {
    async fn publish(&self, text: &str) -> Result<String> {
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            match self.inner.publish(text).await {
                Ok(id) => {
                    if attempt > 1 {
                        info!(attempt, publication_id = %id, "Publish succeeded after retry");
                    }
                    return Ok(id);
                }
                Err(e) => {
                    warn!(attempt, max_attempts = self.attempts, error = %e, "Publish attempt failed");
                    last_error = Some(e);
                    if attempt < self.attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }

        metrics::record_publish_failure();
        Err(NewsroomError::PublishError(format!(
            "gave up after {} attempts: {}",
            self.attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for std::sync::Arc<P> {
    async fn publish(&self, text: &str) -> Result<String> {
        (**self).publish(text).await
    }
}

pub use telegram::TelegramPublisher;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyPublisher {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Publisher for FlakyPublisher {
        async fn publish(&self, _text: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(NewsroomError::PublishError("flaky".to_string()));
            }
            Ok("7".to_string())
        }
    }

    fn flaky(failures: u32) -> FlakyPublisher {
        FlakyPublisher {
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let publisher = RetryingPublisher::new(flaky(2), 3, Duration::from_millis(1));

        assert_eq!(publisher.publish("hi").await.unwrap(), "7");
        assert_eq!(publisher.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let publisher = RetryingPublisher::new(flaky(5), 3, Duration::from_millis(1));

        let err = publisher.publish("hi").await.unwrap_err();
        assert!(err.to_string().contains("gave up after 3 attempts"));
        assert_eq!(publisher.inner.calls.load(Ordering::SeqCst), 3);
    }
}
