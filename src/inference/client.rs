//! Chat-completion client.
//!
//! One HTTPS POST per call, bearer-token auth, first choice's text back.
//! At most one request is in flight per client; [`ChatCompletion::abort`]
//! cancels it and the late response, if any, is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use tokio_util::sync::CancellationToken;

use super::config::CompletionConfig;
use super::errors::InferenceError;
use super::types::{ApiErrorBody, ChatCompletionRequest, ChatCompletionResponse, ChatMessage};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Anything that can turn a conversation into the assistant's next reply.
///
/// The action loop depends on this seam rather than on HTTP so it can be
/// driven by a scripted backend in tests.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Request one completion for `messages`.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, InferenceError>;

    /// Abort the in-flight request, if any.
    fn abort(&self);
}

// ─── CompletionClient ────────────────────────────────────────────────────────

/// HTTP client for an OpenAI-style chat-completions endpoint.
pub struct CompletionClient {
    http: HttpClient,
    config: CompletionConfig,
    /// Generation and cancellation handle of the request in flight.
    in_flight: Mutex<Option<(u64, CancellationToken)>>,
    next_generation: AtomicU64,
}

impl CompletionClient {
    /// Build a client. Does NOT check connectivity or the API key; both
    /// are reported on the first request.
    pub fn new(config: CompletionConfig) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.endpoint.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            config,
            in_flight: Mutex::new(None),
            next_generation: AtomicU64::new(1),
        })
    }

    /// The configured model name.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Install a fresh cancellation token for a new request. A token left
    /// from a previous request is replaced, not cancelled.
    fn arm(&self) -> (u64, CancellationToken) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        if let Ok(mut slot) = self.in_flight.lock() {
            *slot = Some((generation, token.clone()));
        }
        (generation, token)
    }

    /// Clear the slot if it still belongs to `generation`.
    fn disarm(&self, generation: u64) {
        if let Ok(mut slot) = self.in_flight.lock() {
            if matches!(*slot, Some((g, _)) if g == generation) {
                *slot = None;
            }
        }
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        token: &CancellationToken,
    ) -> Result<String, InferenceError> {
        let api_key = self.config.api_key.trim();
        if api_key.is_empty() {
            return Err(InferenceError::MissingApiKey);
        }

        let url = &self.config.endpoint;
        let body = ChatCompletionRequest::new(&self.config, messages);

        // Metadata only; bodies can be huge
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            max_tokens = body.max_tokens,
            "=== COMPLETION REQUEST ==="
        );

        let request = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .header("Accept", "application/json")
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = token.cancelled() => return Err(InferenceError::Cancelled),
            r = request => r.map_err(|e| self.map_transport_error(e))?,
        };

        let status = response.status();
        let text = tokio::select! {
            _ = token.cancelled() => return Err(InferenceError::Cancelled),
            t = response.text() => t.map_err(|e| self.map_transport_error(e))?,
        };

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "completion endpoint returned an error");
            return Err(classify_http_error(status.as_u16(), &text));
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&text).map_err(|_| InferenceError::MalformedResponse)?;
        let content = parsed
            .first_content()
            .ok_or(InferenceError::MalformedResponse)?;

        tracing::info!(chars = content.len(), "=== COMPLETION RESPONSE ===");
        Ok(content)
    }

    fn map_transport_error(&self, e: reqwest::Error) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout {
                duration_secs: self.config.request_timeout_secs,
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: self.config.endpoint.clone(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ChatCompletion for CompletionClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, InferenceError> {
        let (generation, token) = self.arm();
        let result = self.send(messages, &token).await;
        self.disarm(generation);

        // A response that raced the abort is still discarded
        if token.is_cancelled() {
            return Err(InferenceError::Cancelled);
        }
        result
    }

    fn abort(&self) {
        if let Ok(mut slot) = self.in_flight.lock() {
            if let Some((_, token)) = slot.take() {
                tracing::info!("aborting in-flight completion request");
                token.cancel();
            }
        }
    }
}

/// Map a non-2xx status and body to the matching error variant.
///
/// A body carrying `error.message` takes precedence over the status code.
pub fn classify_http_error(status: u16, body: &str) -> InferenceError {
    let api_message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .filter(|m| !m.is_empty());

    if let Some(message) = api_message {
        return InferenceError::Api { status, message };
    }

    match status {
        401 => InferenceError::Unauthorized,
        429 => InferenceError::RateLimited,
        s if s >= 500 => InferenceError::ServerError { status: s },
        s => InferenceError::HttpError {
            status: s,
            body: body.to_string(),
        },
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::Role;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> CompletionClient {
        let config = CompletionConfig {
            endpoint: format!("{}/v1/chat/completions", server.uri()),
            api_key: "test-key".into(),
            request_timeout_secs: 10,
            ..CompletionConfig::default()
        };
        CompletionClient::new(config).unwrap()
    }

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage::new(Role::User, "hello")]
    }

    #[test]
    fn test_classify_http_error() {
        assert!(matches!(classify_http_error(401, ""), InferenceError::Unauthorized));
        assert!(matches!(classify_http_error(429, "{}"), InferenceError::RateLimited));
        assert!(matches!(
            classify_http_error(503, "oops"),
            InferenceError::ServerError { status: 503 }
        ));
        assert!(matches!(
            classify_http_error(400, "bad"),
            InferenceError::HttpError { status: 400, .. }
        ));
        match classify_http_error(401, r#"{"error":{"message":"key revoked"}}"#) {
            InferenceError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "key revoked");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "accounts/fireworks/models/deepseek-v3-0324",
                "top_k": 40,
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "hi there"}}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let reply = client.complete(&messages()).await.unwrap();
        assert_eq!(reply, "hi there");
    }

    #[tokio::test]
    async fn test_status_codes_map_to_distinct_errors() {
        let cases: [(u16, fn(&InferenceError) -> bool); 3] = [
            (401, |e| matches!(e, InferenceError::Unauthorized)),
            (429, |e| matches!(e, InferenceError::RateLimited)),
            (500, |e| matches!(e, InferenceError::ServerError { status: 500 })),
        ];

        for (status, check) in cases {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let err = client_for(&server).complete(&messages()).await.unwrap_err();
            assert!(check(&err), "status {status} mapped to {err:?}");
        }
    }

    #[tokio::test]
    async fn test_malformed_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let err = client_for(&server).complete(&messages()).await.unwrap_err();
        assert!(matches!(err, InferenceError::MalformedResponse));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let server = MockServer::start().await;
        let config = CompletionConfig {
            endpoint: server.uri(),
            api_key: "  ".into(),
            ..CompletionConfig::default()
        };
        let client = CompletionClient::new(config).unwrap();
        let err = client.complete(&messages()).await.unwrap_err();
        assert!(matches!(err, InferenceError::MissingApiKey));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let config = CompletionConfig {
            endpoint: "http://127.0.0.1:9/v1/chat/completions".into(),
            api_key: "k".into(),
            request_timeout_secs: 5,
            ..CompletionConfig::default()
        };
        let client = CompletionClient::new(config).unwrap();
        let err = client.complete(&messages()).await.unwrap_err();
        assert!(matches!(
            err,
            InferenceError::ConnectionFailed { .. } | InferenceError::Timeout { .. }
        ));
    }

    #[tokio::test]
    async fn test_abort_cancels_in_flight_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(5))
                    .set_body_json(serde_json::json!({
                        "choices": [{"message": {"content": "too late"}}]
                    })),
            )
            .mount(&server)
            .await;

        let client = Arc::new(client_for(&server));
        let task = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.complete(&messages()).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        client.abort();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(InferenceError::Cancelled)));
    }

    #[test]
    fn test_abort_without_request_is_noop() {
        let client = CompletionClient::new(CompletionConfig::default()).unwrap();
        client.abort();
    }
}
