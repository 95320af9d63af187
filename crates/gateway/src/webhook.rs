//! Outbound webhook delivery.

use std::time::{Duration, Instant};

use {
    reqwest::{Client, StatusCode},
    serde::Serialize,
    serde_json::Value,
    tracing::{debug, warn},
};

use {wabridge_config::WebhookConfig, wabridge_messaging::EventKind};

#[cfg(feature = "metrics")]
use wabridge_metrics::{counter, histogram, labels, webhook as webhook_metrics};

/// Body POSTed to a tenant's webhook for one classified event.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload<'a> {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub event: &'a Value,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook answered {status}")]
    Status { status: StatusCode },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// No webhook configured.
    Skipped,
}

pub struct WebhookDispatcher {
    client: Client,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl WebhookDispatcher {
    pub fn new(config: &WebhookConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            max_attempts: config.max_attempts.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    /// POST one event to `url`.
    ///
    /// An empty `url` is a no-op. With the default single attempt a failure
    /// drops the event; otherwise attempts repeat with linear backoff.
    pub async fn deliver(
        &self,
        url: &str,
        kind: EventKind,
        event: &Value,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        if url.is_empty() {
            debug!(%kind, "no webhook configured, skipping delivery");
            return Ok(DeliveryOutcome::Skipped);
        }

        let payload = WebhookPayload { kind, event };
        let start = Instant::now();
        let mut attempt = 1;
        let result = loop {
            match self.post(url, &payload).await {
                Ok(()) => break Ok(DeliveryOutcome::Delivered),
                Err(e) if attempt < self.max_attempts => {
                    warn!(%url, %kind, attempt, error = %e, "webhook delivery failed, retrying");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                    attempt += 1;
                },
                Err(e) => break Err(e),
            }
        };

        #[cfg(feature = "metrics")]
        {
            histogram!(webhook_metrics::DELIVERY_DURATION_SECONDS)
                .record(start.elapsed().as_secs_f64());
            match &result {
                Ok(_) => counter!(webhook_metrics::DELIVERIES_TOTAL, labels::KIND => kind.as_str())
                    .increment(1),
                Err(_) => counter!(webhook_metrics::FAILURES_TOTAL, labels::KIND => kind.as_str())
                    .increment(1),
            }
        }
        debug!(
            %url,
            %kind,
            attempts = attempt,
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "webhook delivery finished"
        );

        result
    }

    async fn post(&self, url: &str, payload: &WebhookPayload<'_>) -> Result<(), DeliveryError> {
        let response = self.client.post(url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status { status });
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn dispatcher(max_attempts: u32) -> WebhookDispatcher {
        WebhookDispatcher::new(&WebhookConfig {
            timeout_secs: 2,
            max_attempts,
            retry_backoff_ms: 1,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn posts_type_and_event() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Json(json!({
                "type": "Message",
                "event": {"body": "hi"},
            })))
            .with_status(200)
            .create_async()
            .await;

        let outcome = dispatcher(1)
            .deliver(
                &format!("{}/hook", server.url()),
                EventKind::Message,
                &json!({"body": "hi"}),
            )
            .await
            .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Delivered);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn empty_url_is_skipped() {
        let outcome = dispatcher(1)
            .deliver("", EventKind::Presence, &json!({}))
            .await
            .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Skipped);
    }

    #[tokio::test]
    async fn non_2xx_is_a_single_failed_attempt() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let err = dispatcher(1)
            .deliver(
                &format!("{}/hook", server.url()),
                EventKind::Message,
                &json!({}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Status { status } if status.as_u16() == 500));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn retries_up_to_max_attempts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let result = dispatcher(3)
            .deliver(
                &format!("{}/hook", server.url()),
                EventKind::ReadReceipt,
                &json!({}),
            )
            .await;
        assert!(result.is_err());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_host_is_request_error() {
        let err = dispatcher(1)
            .deliver("http://127.0.0.1:1/hook", EventKind::Message, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Request(_)));
    }
}
