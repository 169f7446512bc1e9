//! AI assistant contract + HTTP-backed assistant implementation.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use dealgate_core::Opportunity;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "dealgate-adapters";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistRequest {
    pub opportunity: Opportunity,
    pub current_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("assistant returned http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("assistant request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("assistant response could not be decoded: {0}")]
    Decode(String),
}

/// Something that can look at an opportunity and hand back a revised copy.
#[async_trait]
pub trait AssistantAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn assist(&self, request: AssistRequest) -> Result<Opportunity, AdapterError>;
}

#[derive(Debug, Clone)]
pub struct HttpAssistantConfig {
    pub endpoint: String,
    pub token: Option<String>,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl HttpAssistantConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            timeout: Duration::from_secs(20),
            user_agent: Some(format!("dealgate/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

/// Posts the request as JSON and reads back the revised record. No retries.
#[derive(Debug, Clone)]
pub struct HttpAssistant {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpAssistant {
    pub fn new(config: HttpAssistantConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint,
            token: config.token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Accepts the bare record or one wrapped as `{"opportunity": {...}}`.
pub fn decode_assistant_payload(payload: JsonValue) -> Result<Opportunity, AdapterError> {
    let record = match payload {
        JsonValue::Object(mut map) if map.get("opportunity").is_some_and(JsonValue::is_object) => {
            map.remove("opportunity").unwrap_or(JsonValue::Null)
        }
        other => other,
    };
    serde_json::from_value(record).map_err(|err| AdapterError::Decode(err.to_string()))
}

#[async_trait]
impl AssistantAdapter for HttpAssistant {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn assist(&self, request: AssistRequest) -> Result<Opportunity, AdapterError> {
        let span = info_span!("assistant_request", opportunity_id = %request.opportunity.id, endpoint = %self.endpoint);
        async {
            let mut call = self.client.post(&self.endpoint).json(&request);
            if let Some(token) = &self.token {
                call = call.bearer_auth(token);
            }

            let resp = call.send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(AdapterError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let payload: JsonValue = resp
                .json()
                .await
                .map_err(|err| AdapterError::Decode(err.to_string()))?;
            let revised = decode_assistant_payload(payload)?;
            debug!(stage = revised.stage, "assistant returned revised opportunity");
            Ok(revised)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> JsonValue {
        json!({
            "id": "6f1c5a38-5d43-4ad6-9a4c-0d8c2a7f1a11",
            "name": "Deal A",
            "client": "Acme",
            "created_at": "2026-01-10T09:00:00Z",
            "last_update": "2026-02-01",
            "scales": {"dor": 6}
        })
    }

    #[test]
    fn bare_and_wrapped_payloads_decode_the_same() {
        let bare = decode_assistant_payload(record()).expect("bare");
        let wrapped = decode_assistant_payload(json!({"opportunity": record()})).expect("wrapped");
        assert_eq!(bare, wrapped);
        assert_eq!(bare.scales.map(|s| s.pain.score), Some(6));
    }

    #[test]
    fn payload_without_identity_is_a_decode_error() {
        let err = decode_assistant_payload(json!({"answer": "move it to negotiation"})).unwrap_err();
        assert!(matches!(err, AdapterError::Decode(_)));
    }

    #[test]
    fn blank_token_is_dropped() {
        let mut config = HttpAssistantConfig::new("http://localhost:9/assist");
        config.token = Some("  ".into());
        let assistant = HttpAssistant::new(config).expect("client");
        assert!(assistant.token.is_none());
        assert_eq!(assistant.endpoint(), "http://localhost:9/assist");
    }
}
