//! Client for the remote completion provider.
//!
//! Speaks the OpenAI-compatible chat-completions API.  Responses are streamed
//! as server-sent events whose `data:` payloads carry incremental deltas of
//! the form `{"choices":[{"delta":{"content":"…"}}]}`, terminated by the
//! `[DONE]` sentinel.  The raw payloads are handed to the consumer unchanged
//! so the same framing can be relayed downstream; [`delta_from_payload`]
//! extracts the textual delta for accumulation.

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Fixed persona turn prepended to every request.  Never persisted and never
/// echoed back to the caller.
const SYSTEM_PROMPT: &str =
    "You are a friendly and polite AI assistant. Keep your replies short.";

/// Buffer size of the channel between the provider task and its consumer.
const CHANNEL_CAPACITY: usize = 64;

/// One turn of conversation as sent to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    /// `"system"`, `"user"` or `"assistant"`.
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: role.into(), content: content.into() }
    }
}

/// One event on the stream between the provider task and its consumer.
///
/// A channel that closes without [`StreamEvent::Done`] means the provider
/// ended the stream prematurely; whatever arrived before the closure is still
/// valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Raw `data:` payload of one SSE event (JSON text).
    Data(String),
    /// The provider signalled completion with `[DONE]`.
    Done,
}

/// Errors raised before a stream has begun.  Once streaming, provider-side
/// faults surface as premature channel closure instead.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("completion provider returned status {status}: {message}")]
    Api { status: u16, message: String },
}

/// Connection settings for the completion provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL of the OpenAI-compatible API, without a trailing slash.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<ChatTurn>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Extract the textual delta from one chunk payload.
///
/// Parsed defensively: unknown or missing fields are `Ok(None)` ("no delta");
/// only invalid JSON is an error, and the caller decides whether to skip it.
pub fn delta_from_payload(payload: &str) -> Result<Option<String>, serde_json::Error> {
    let parsed: ChunkPayload = serde_json::from_str(payload)?;
    Ok(parsed.choices.into_iter().next().and_then(|c| c.delta.content))
}

/// Thin client for the completion provider.
///
/// Constructed once at startup and shared read-only; holds its own
/// [`reqwest::Client`] connection pool.
pub struct CompletionClient {
    client: Client,
    config: ProviderConfig,
}

impl CompletionClient {
    pub fn new(config: ProviderConfig) -> Self {
        Self { client: Client::new(), config }
    }

    /// Begin a streaming completion for `history`.
    ///
    /// The fixed system turn is prepended ahead of the supplied history on
    /// every call.  Initiation failures (transport error, non-2xx status)
    /// return an error before any chunk is produced.  On success the returned
    /// channel yields [`StreamEvent::Data`] payloads in arrival order,
    /// followed by [`StreamEvent::Done`].
    pub async fn stream_chat(
        &self,
        history: Vec<ChatTurn>,
    ) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatTurn::new("system", SYSTEM_PROMPT));
        messages.extend(history);

        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ProviderError::Api { status: status.as_u16(), message });
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(pump_stream(response, tx));
        Ok(rx)
    }
}

/// Read the SSE byte stream and emit one event per `data:` line.
///
/// Lines can be split across network chunks, so bytes are buffered until a
/// newline arrives.  Transport faults mid-stream are logged and close the
/// channel without a `Done` marker.
async fn pump_stream(response: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "completion stream interrupted");
                return;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&bytes));

        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim_end_matches('\r').to_string();
            buffer.drain(..=newline);

            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim_start();

            if payload == "[DONE]" {
                let _ = tx.send(StreamEvent::Done).await;
                return;
            }
            if tx.send(StreamEvent::Data(payload.to_string())).await.is_err() {
                debug!("chunk consumer dropped; abandoning stream");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> ProviderConfig {
        ProviderConfig {
            base_url: base_url.to_string(),
            api_key: "test-key".into(),
            model: "test-model".into(),
            max_tokens: 256,
            temperature: 0.7,
        }
    }

    fn chunk(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": text}}]})
        )
    }

    async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn delta_is_extracted_from_valid_payload() {
        let payload = r#"{"choices":[{"delta":{"content":"Hi"}}]}"#;
        assert_eq!(delta_from_payload(payload).unwrap(), Some("Hi".to_string()));
    }

    #[test]
    fn missing_fields_are_no_delta_not_errors() {
        for payload in [
            "{}",
            r#"{"choices":[]}"#,
            r#"{"choices":[{"delta":{}}]}"#,
            r#"{"choices":[{"delta":{"content":null}}]}"#,
            r#"{"choices":[{"finish_reason":"stop"}]}"#,
            r#"{"id":"cmpl-1","object":"chat.completion.chunk","choices":[{"delta":{"role":"assistant"}}]}"#,
        ] {
            assert_eq!(delta_from_payload(payload).unwrap(), None, "payload: {payload}");
        }
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(delta_from_payload("not json").is_err());
        assert!(delta_from_payload("data: nested prefix").is_err());
    }

    #[tokio::test]
    async fn streams_chunks_in_order_then_done() {
        let server = MockServer::start().await;
        let body = format!("{}{}{}data: [DONE]\n\n", chunk("Hi"), chunk(" there"), chunk("!"));
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = CompletionClient::new(test_config(&server.uri()));
        let rx = client
            .stream_chat(vec![ChatTurn::new("user", "Hello")])
            .await
            .unwrap();
        let events = collect(rx).await;

        assert_eq!(events.len(), 4);
        for (event, expected) in events.iter().zip(["Hi", " there", "!"]) {
            let StreamEvent::Data(payload) = event else {
                panic!("expected data event, got {event:?}");
            };
            assert_eq!(delta_from_payload(payload).unwrap().as_deref(), Some(expected));
        }
        assert_eq!(events[3], StreamEvent::Done);
    }

    #[tokio::test]
    async fn system_turn_is_prepended() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("You are a friendly and polite AI assistant"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("data: [DONE]\n\n", "text/event-stream"),
            )
            .mount(&server)
            .await;

        let client = CompletionClient::new(test_config(&server.uri()));
        // The mock only matches when the system turn is present in the body.
        let rx = client
            .stream_chat(vec![ChatTurn::new("user", "Hello")])
            .await
            .unwrap();
        assert_eq!(collect(rx).await, vec![StreamEvent::Done]);
    }

    #[tokio::test]
    async fn initiation_failure_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let client = CompletionClient::new(test_config(&server.uri()));
        let err = client
            .stream_chat(vec![ChatTurn::new("user", "Hello")])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 429, .. }));
    }

    #[tokio::test]
    async fn truncated_stream_closes_without_done() {
        let server = MockServer::start().await;
        // No [DONE] marker: the provider dies mid-stream.
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(chunk("Hi"), "text/event-stream"))
            .mount(&server)
            .await;

        let client = CompletionClient::new(test_config(&server.uri()));
        let rx = client
            .stream_chat(vec![ChatTurn::new("user", "Hello")])
            .await
            .unwrap();
        let events = collect(rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Data(_)));
    }
}
