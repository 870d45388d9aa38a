//! Provider gateway adapters
//!
//! The push and email providers are external collaborators behind small
//! trait seams. Each is resolved once at startup from configuration: a
//! provider is either configured and present, or absent by design, never
//! detected per-call.

use crate::config::{EmailRelayConfig, PushGatewayConfig};
use crate::error::{AppError, AppResult};
use crate::models::DeviceToken;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Payload handed to the push provider
#[derive(Debug, Clone, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Outcome of one provider send
///
/// Permanent failures revoke the token; transient failures leave it
/// active for the next dispatch cycle. Neither is retried in-process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Sent { provider_message_id: String },
    PermanentFailure(String),
    TransientFailure(String),
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send_push(&self, token: &DeviceToken, payload: &PushPayload) -> PushOutcome;
}

#[async_trait]
pub trait EmailRelay: Send + Sync {
    /// Hand one email to the relay; Err carries the transient reason
    async fn send_email(&self, recipient: Uuid, subject: &str, body: &str)
        -> Result<(), String>;
}

/// Classify a provider error string as a dead-token error.
///
/// Providers disagree on error vocabulary; this matches the common
/// "this token will never work again" shapes.
pub fn is_permanent_token_error(error: &str) -> bool {
    let lower = error.to_lowercase();

    lower.contains("invalid") && (lower.contains("token") || lower.contains("registration"))
        || lower.contains("unregistered")
        || lower.contains("notregistered")
        || lower.contains("expired")
        || lower.contains("baddevicetoken")
        || lower.contains("400")
        || lower.contains("404")
        || lower.contains("410")
}

#[derive(Debug, Deserialize)]
struct ProviderSendResponse {
    message_id: Option<String>,
    error: Option<String>,
}

/// HTTP push gateway client
///
/// Posts device sends to the configured provider endpoint and maps the
/// response onto `PushOutcome`: 4xx-class rejections are permanent, 5xx
/// and transport errors are transient.
pub struct HttpPushGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpPushGateway {
    pub fn new(config: &PushGatewayConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("push gateway client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn send_push(&self, token: &DeviceToken, payload: &PushPayload) -> PushOutcome {
        let request_body = serde_json::json!({
            "token": token.token,
            "platform": token.platform.as_str(),
            "title": payload.title,
            "body": payload.body,
            "data": payload.data,
        });

        let response = match self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("Push gateway request failed: {}", e);
                return PushOutcome::TransientFailure(e.to_string());
            }
        };

        let status = response.status();
        if status.is_success() {
            match response.json::<ProviderSendResponse>().await {
                Ok(parsed) => {
                    // Some providers report dead tokens inside a 200 body
                    if let Some(err) = parsed.error {
                        if is_permanent_token_error(&err) {
                            return PushOutcome::PermanentFailure(err);
                        }
                        return PushOutcome::TransientFailure(err);
                    }
                    let message_id = parsed
                        .message_id
                        .unwrap_or_else(|| Uuid::new_v4().to_string());
                    debug!("Push accepted by provider: {}", message_id);
                    PushOutcome::Sent {
                        provider_message_id: message_id,
                    }
                }
                Err(e) => PushOutcome::TransientFailure(format!("bad provider response: {}", e)),
            }
        } else if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            PushOutcome::PermanentFailure(format!("{}: {}", status, detail))
        } else {
            let detail = response.text().await.unwrap_or_default();
            PushOutcome::TransientFailure(format!("{}: {}", status, detail))
        }
    }
}

/// HTTP email relay client
///
/// The relay resolves recipient identities to addresses on its side; this
/// core only hands over identity, subject and body.
pub struct HttpEmailRelay {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    sender: String,
}

impl HttpEmailRelay {
    pub fn new(config: &EmailRelayConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Config(format!("email relay client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            sender: config.sender.clone(),
        })
    }
}

#[async_trait]
impl EmailRelay for HttpEmailRelay {
    async fn send_email(
        &self,
        recipient: Uuid,
        subject: &str,
        body: &str,
    ) -> Result<(), String> {
        let request_body = serde_json::json!({
            "recipient_id": recipient,
            "from": self.sender,
            "subject": subject,
            "body": body,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("relay returned {}", response.status()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_token_errors() {
        assert!(is_permanent_token_error("Invalid token provided"));
        assert!(is_permanent_token_error("Token expired"));
        assert!(is_permanent_token_error("NotRegistered"));
        assert!(is_permanent_token_error("BadDeviceToken"));
        assert!(is_permanent_token_error("HTTP 400 Bad Request"));
        assert!(is_permanent_token_error("HTTP 404 Not Found"));
        assert!(is_permanent_token_error("410 Gone"));
    }

    #[test]
    fn test_transient_errors_are_not_permanent() {
        assert!(!is_permanent_token_error("Network timeout"));
        assert!(!is_permanent_token_error("HTTP 500 Internal Server Error"));
        assert!(!is_permanent_token_error("Connection refused"));
        assert!(!is_permanent_token_error("rate limited"));
    }

    #[test]
    fn test_push_payload_serialization_skips_empty_data() {
        let payload = PushPayload {
            title: "Hi".to_string(),
            body: "There".to_string(),
            data: None,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(!json.contains("data"));
    }
}
