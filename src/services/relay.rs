use core::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use http::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{Instrument, instrument};

use crate::util::env::{EnvErr, Var};
use crate::var;

pub const FALLBACK_REPLY: &str = "I appreciate your argument. Let me consider your points carefully and respond thoughtfully. Could you elaborate further on your main reasoning?";
pub const FALLBACK_CONFIDENCE: f64 = 75.0;
pub const FALLBACK_MODEL: &str = "fallback-response";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry `retry` (0-based): `base_delay * 2^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }

    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Receives reply text for speech synthesis. Called on a detached task.
#[async_trait]
pub trait SpeechSink: Send + Sync + fmt::Debug {
    async fn speak(&self, text: &str);
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TurnRequest<'a> {
    speech_text: &'a str,
    context: TurnContext<'a>,
}

#[derive(Debug, Serialize)]
struct TurnContext<'a> {
    topic: &'a str,
    context: &'a Value,
    timestamp: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyFields {
    reply: Option<String>,
    confidence: Option<f64>,
    relevance: Option<f64>,
    model: Option<String>,
    timestamp: Option<Value>,
    processing_time: Option<f64>,
}

/// Fields may sit at the top level or under `data`; top level wins per field.
#[derive(Debug, Deserialize)]
struct WebhookBody {
    #[serde(flatten)]
    top: ReplyFields,
    #[serde(default)]
    data: Option<ReplyFields>,
}

impl WebhookBody {
    fn merged(self) -> ReplyFields {
        let top = self.top;
        let data = self.data.unwrap_or_default();

        ReplyFields {
            reply: top.reply.or(data.reply),
            confidence: top.confidence.or(data.confidence),
            relevance: top.relevance.or(data.relevance),
            model: top.model.or(data.model),
            timestamp: top.timestamp.or(data.timestamp),
            processing_time: top.processing_time.or(data.processing_time),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnReply {
    pub reply: String,
    pub confidence: Option<f64>,
    pub relevance: Option<f64>,
    pub model: Option<String>,
    pub timestamp: String,
    pub processing_time: Option<f64>,
    pub attempts: u32,
    /// Accumulated attempt failures when the reply is the fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TurnReply {
    fn from_fields(fields: ReplyFields, reply: String, attempts: u32) -> Self {
        let timestamp = match fields.timestamp {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => Utc::now().to_rfc3339(),
        };

        Self {
            reply,
            confidence: fields.confidence,
            relevance: fields.relevance,
            model: fields.model,
            timestamp,
            processing_time: fields.processing_time,
            attempts,
            error: None,
        }
    }

    fn fallback(attempts: u32, error: String) -> Self {
        Self {
            reply: FALLBACK_REPLY.to_string(),
            confidence: Some(FALLBACK_CONFIDENCE),
            relevance: None,
            model: Some(FALLBACK_MODEL.to_string()),
            timestamp: Utc::now().to_rfc3339(),
            processing_time: None,
            attempts,
            error: Some(error),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }
}

/// Relays one debate utterance to the AI webhook, retrying with exponential backoff and
/// degrading to a fixed reply once every attempt has failed.
#[derive(Debug, Clone)]
pub struct TurnRelay {
    client: reqwest::Client,
    webhook_url: String,
    policy: RetryPolicy,
    speech_enabled: bool,
    speech: Option<Arc<dyn SpeechSink>>,
}

impl TurnRelay {
    pub fn new(webhook_url: &str, policy: RetryPolicy) -> RelayResult<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            webhook_url: webhook_url.to_string(),
            policy,
            speech_enabled: false,
            speech: None,
        })
    }

    #[instrument]
    pub async fn from_env() -> RelayResult<Self> {
        let mut relay = Self::new(var!(Var::AiWebhookUrl).await?, RetryPolicy::default())?;
        relay.speech_enabled = matches!(
            var!(Var::SpeechEnabled).await?.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        );

        Ok(relay)
    }

    pub fn with_speech(mut self, sink: Arc<dyn SpeechSink>) -> Self {
        self.speech_enabled = true;
        self.speech = Some(sink);
        self
    }

    /// Always resolves; transport failures only show up in `TurnReply::error`.
    #[instrument(skip(self, message, context), fields(len = message.len()))]
    pub async fn send_turn(&self, message: &str, topic: &str, context: &Value) -> TurnReply {
        let request = TurnRequest {
            speech_text: message,
            context: TurnContext {
                topic,
                context,
                timestamp: Utc::now().to_rfc3339(),
            },
        };

        let mut failures = Vec::new();
        let attempts = self.policy.attempts();

        for attempt in 0..attempts {
            match self.attempt(&request).await {
                Ok((fields, reply)) => {
                    tracing::debug!(attempt = attempt + 1, "ai webhook replied");
                    let reply = TurnReply::from_fields(fields, reply, attempt + 1);
                    self.speak(&reply.reply);
                    return reply;
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "ai webhook attempt failed");
                    failures.push(format!("attempt {}: {}", attempt + 1, e));
                }
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(self.policy.delay_for(attempt)).await;
            }
        }

        let error = failures.join("; ");
        tracing::error!(attempts, error = %error, "ai webhook exhausted, using fallback reply");

        let reply = TurnReply::fallback(attempts, error);
        self.speak(&reply.reply);
        reply
    }

    async fn attempt(&self, request: &TurnRequest<'_>) -> RelayResult<(ReplyFields, String)> {
        let res = self
            .client
            .post(&self.webhook_url)
            .json(request)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(RelayErr::Status(status.as_u16()));
        }

        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains("application/json") {
            return Err(RelayErr::ContentType(content_type));
        }

        let text = res.text().await?;
        if text.trim().is_empty() {
            return Err(RelayErr::EmptyBody);
        }

        let mut fields = serde_json::from_str::<WebhookBody>(&text)?.merged();
        match fields.reply.take() {
            Some(reply) if !reply.trim().is_empty() => Ok((fields, reply)),
            _ => Err(RelayErr::EmptyReply),
        }
    }

    fn speak(&self, text: &str) {
        let Some(sink) = self.speech.as_ref().filter(|_| self.speech_enabled) else {
            return;
        };

        let sink = Arc::clone(sink);
        let text = text.to_string();
        tokio::spawn(
            async move { sink.speak(&text).await }.instrument(tracing::debug_span!("speech")),
        );
    }
}

pub type RelayResult<T> = core::result::Result<T, RelayErr>;

#[derive(Debug, Error)]
pub enum RelayErr {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("while parsing environment vars: {0}")]
    EnvError(#[from] EnvErr),

    #[error("webhook responded with status {0}")]
    Status(u16),

    #[error("unexpected content type '{0}'")]
    ContentType(String),

    #[error("empty response body")]
    EmptyBody,

    #[error("malformed response body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("response carried no reply text")]
    EmptyReply,
}
