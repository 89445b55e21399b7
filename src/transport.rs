//! Provider seam and the HTTPS chat-completions implementation.

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::TransportError;
use crate::request::Request;

/// One attempt against the model provider.
///
/// Implementations perform exactly one network exchange per call; retries and
/// timeouts are applied by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn complete(&self, request: &Request) -> Result<String, TransportError>;
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

impl<'a> ChatCompletionRequest<'a> {
    pub(crate) fn from_request(request: &'a Request) -> Self {
        let params = request.model_params();
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system_instructions() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.prompt(),
        });

        Self {
            model: &params.model_name,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Extract `choices[0].message.content` from a chat-completions body.
pub(crate) fn extract_content(body: &[u8]) -> Result<String, TransportError> {
    let parsed: ChatCompletionResponse = serde_json::from_slice(body)
        .map_err(|e| TransportError::Malformed(format!("invalid response body: {e}")))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| TransportError::Malformed("response has no message content".into()))
}

/// HTTPS client for OpenAI-compatible `/chat/completions` endpoints.
pub struct HttpTransport {
    client: Client<
        hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
        Full<Bytes>,
    >,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &ProviderConfig) -> Self {
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        }
    }

    /// Assemble the POST. A failure here is local to the request (bad URI,
    /// invalid header value), so it is reported as non-retryable.
    fn build_request(&self, body: Bytes) -> Result<hyper::Request<Full<Bytes>>, TransportError> {
        let mut req = hyper::Request::builder()
            .method("POST")
            .uri(&self.endpoint)
            .header("content-type", "application/json")
            .header("accept", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("authorization", format!("Bearer {key}"));
        }

        req.body(Full::new(body))
            .map_err(|e| TransportError::Rejected {
                status: 0,
                message: format!("invalid request: {e}"),
            })
    }

    async fn post(&self, body: Bytes) -> Result<Bytes, TransportError> {
        let req = self.build_request(body)?;

        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?
            .to_bytes();

        if !(200..300).contains(&status) {
            let message = String::from_utf8_lossy(&body).to_string();
            return Err(map_http_error(status, &message, retry_after));
        }

        Ok(body)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn complete(&self, request: &Request) -> Result<String, TransportError> {
        let body = serde_json::to_vec(&ChatCompletionRequest::from_request(request))
            .map_err(|e| TransportError::Malformed(e.to_string()))?;

        debug!(
            endpoint = %self.endpoint,
            model = %request.model_params().model_name,
            bytes = body.len(),
            "Sending chat completion"
        );

        let bytes = self.post(Bytes::from(body)).await?;
        extract_content(&bytes)
    }
}

/// Seconds form of the `Retry-After` header; HTTP dates are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn map_http_error(status: u16, message: &str, retry_after: Option<Duration>) -> TransportError {
    let message = truncate(message, 500);
    match status {
        401 | 403 => TransportError::Auth { status, message },
        429 => TransportError::RateLimited { retry_after },
        408 => TransportError::ServerError { status, message },
        500..=599 => TransportError::ServerError { status, message },
        _ => TransportError::Rejected { status, message },
    }
}

fn truncate(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &message[..idx]),
        None => message.to_string(),
    }
}
