use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{info, instrument};

use super::{NotificationChannel, NotificationMessage, NotifyError, required_url};

/// Posts a JSON document to an arbitrary URL.
///
/// Channel data: `{ "url": "...", "headers": { "name": "value" } }`.
pub struct WebhookChannel {
    client: Client,
}

impl Default for WebhookChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookChannel {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn payload(message: &NotificationMessage) -> Value {
        json!({
            "message": message.summary,
            "event": message.event,
            "meta": message.meta,
            "timestamp": message.meta.timestamp.to_rfc3339(),
        })
    }

    fn headers(data: &Value) -> Result<Vec<(String, String)>, NotifyError> {
        let Some(headers) = data.get("headers") else {
            return Ok(Vec::new());
        };

        let headers = headers
            .as_object()
            .ok_or_else(|| NotifyError::InvalidConfig("'headers' must be an object".to_string()))?;

        headers
            .iter()
            .map(|(name, value)| {
                value
                    .as_str()
                    .map(|value| (name.clone(), value.to_string()))
                    .ok_or_else(|| {
                        NotifyError::InvalidConfig(format!("header '{name}' must be a string"))
                    })
            })
            .collect()
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn channel_type(&self) -> &str {
        "webhook"
    }

    fn validate(&self, data: &Value) -> Result<(), NotifyError> {
        required_url(data)?;
        Self::headers(data)?;
        Ok(())
    }

    #[instrument(skip_all, fields(event = message.event.name()))]
    async fn send(&self, data: &Value, message: &NotificationMessage) -> Result<(), NotifyError> {
        let url = required_url(data)?;

        let mut request = self.client.post(&url).json(&Self::payload(message));
        for (name, value) in Self::headers(data)? {
            request = request.header(name, value);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api {
                service: "webhook",
                status,
                body,
            });
        }

        info!("Successfully sent webhook notification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationEvent;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_with_headers() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-token", "abc"))
            .and(body_partial_json(json!({
                "message": "Monitoring started with 4 probe(s)",
                "event": { "type": "start", "probe_count": 4 }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let data = json!({ "url": mock_server.uri(), "headers": { "x-token": "abc" } });
        let message = NotificationMessage::lifecycle(NotificationEvent::Start { probe_count: 4 });

        WebhookChannel::new().send(&data, &message).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&mock_server)
            .await;

        let data = json!({ "url": mock_server.uri() });
        let message = NotificationMessage::lifecycle(NotificationEvent::Termination { probe_count: 1 });

        let err = WebhookChannel::new().send(&data, &message).await.unwrap_err();
        assert!(matches!(err, NotifyError::Api { service: "webhook", status: 502, .. }));
    }

    #[test]
    fn test_validate_rejects_non_string_headers() {
        let channel = WebhookChannel::new();

        assert!(channel.validate(&json!({ "url": "https://example.com" })).is_ok());
        assert!(
            channel
                .validate(&json!({ "url": "https://example.com", "headers": { "x": 1 } }))
                .is_err()
        );
    }
}
