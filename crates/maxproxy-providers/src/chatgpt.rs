//! ChatGPT (Codex Responses backend) driver.
//!
//! The backend always streams and always runs stateless; when the inbound
//! client asked for a non-streaming answer the driver switches to collect
//! mode and assembles the stream into one object.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::convert::responses::{
    build_codex_chat_payload, build_codex_responses_payload, chat_messages_to_responses_input,
    translate_response_event, ResponseCollector,
};
use crate::error::ProviderError;
use crate::session::SessionCache;
use crate::sse::SseParser;
use crate::trace::StreamTracer;
use crate::types::{ChatCompletionRequest, ResponsesRequest};
use crate::Timeouts;

const CHATGPT_API_ENDPOINT: &str = "https://chatgpt.com/backend-api/codex/responses";
const DONE_CHUNK: &str = "data: [DONE]\n\n";

pub struct ChatGptDriver {
    stream_client: reqwest::Client,
    endpoint: String,
    sessions: SessionCache,
    timeouts: Timeouts,
}

impl ChatGptDriver {
    pub fn new(timeouts: Timeouts) -> Result<Self, ProviderError> {
        Ok(Self {
            stream_client: timeouts.stream_client()?,
            endpoint: CHATGPT_API_ENDPOINT.to_string(),
            sessions: SessionCache::new(),
            timeouts,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn open_stream(
        &self,
        request_id: &str,
        payload: &Value,
        access_token: &str,
        account_id: &str,
        session_id: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        debug!(request_id, model = ?payload.get("model"), "opening Codex stream");

        let response = self
            .stream_client
            .post(&self.endpoint)
            .bearer_auth(access_token)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .header("chatgpt-account-id", account_id)
            .header("OpenAI-Beta", "responses=experimental")
            .header("originator", "codex_cli_rs")
            .header("session_id", session_id)
            .json(payload)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            error!(request_id, status, body = %body, "Codex API error");
            return Err(ProviderError::Api {
                status,
                message: body,
            });
        }
        Ok(response)
    }

    fn chat_session_id(&self, request: &ChatCompletionRequest) -> String {
        let instructions = request.messages.iter().find_map(|m| {
            if m.get("role").and_then(Value::as_str) == Some("system") {
                m.get("content").and_then(Value::as_str).map(str::to_string)
            } else {
                None
            }
        });
        let input_items = chat_messages_to_responses_input(&request.messages);
        self.sessions
            .session_id(instructions.as_deref(), &input_items, None)
    }

    /// Stream a chat-completions request: Codex events are translated into
    /// OpenAI chat chunks, terminated by exactly one `[DONE]`.
    pub async fn stream_chat(
        &self,
        request_id: &str,
        request: &ChatCompletionRequest,
        backend_id: &str,
        effort: Option<&str>,
        access_token: &str,
        account_id: &str,
        tracer: Option<Arc<StreamTracer>>,
        tx: mpsc::Sender<String>,
    ) {
        let session_id = self.chat_session_id(request);
        let payload = build_codex_chat_payload(request, backend_id, effort, &session_id);

        let response = match self
            .open_stream(request_id, &payload, access_token, account_id, &session_id)
            .await
        {
            Ok(response) => response,
            Err(ProviderError::Api { status, .. }) => {
                let chunk = json!({ "error": {
                    "message": format!("ChatGPT API error: {status}"),
                }});
                let _ = tx.send(format!("data: {chunk}\n\n")).await;
                let _ = tx.send(DONE_CHUNK.to_string()).await;
                return;
            }
            Err(e) => {
                let chunk = json!({ "error": { "message": e.to_string() } });
                let _ = tx.send(format!("data: {chunk}\n\n")).await;
                let _ = tx.send(DONE_CHUNK.to_string()).await;
                return;
            }
        };

        let created = chrono::Utc::now().timestamp();
        let response_id = format!("chatcmpl-{request_id}");
        let model = backend_id.to_string();

        let mut parser = SseParser::new();
        let mut byte_stream = response.bytes_stream();
        let mut done_sent = false;

        'receive: while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    let message = if e.is_timeout() {
                        format!("Stream timeout after {}s", self.timeouts.stream as u64)
                    } else {
                        format!("Connection closed: {e}")
                    };
                    error!(request_id, error = %e, "Codex stream failed");
                    let payload = json!({ "error": { "message": message } });
                    let _ = tx.send(format!("data: {payload}\n\n")).await;
                    break;
                }
            };
            let text = match std::str::from_utf8(&chunk) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if let Some(tracer) = &tracer {
                tracer.log_source_chunk(text);
            }

            for event in parser.feed(text) {
                let data = event.data.trim();
                if data.is_empty() {
                    continue;
                }
                if data == "[DONE]" {
                    if let Some(tracer) = &tracer {
                        tracer.log_converted_chunk(DONE_CHUNK);
                    }
                    let _ = tx.send(DONE_CHUNK.to_string()).await;
                    done_sent = true;
                    break 'receive;
                }
                let Ok(parsed) = serde_json::from_str::<Value>(data) else {
                    warn!(request_id, "failed to parse Codex SSE data");
                    continue;
                };
                if let Some(translated) =
                    translate_response_event(&parsed, &response_id, created, &model)
                {
                    let out = format!("data: {translated}\n\n");
                    if let Some(tracer) = &tracer {
                        tracer.log_converted_chunk(&out);
                    }
                    if tx.send(out).await.is_err() {
                        return;
                    }
                }
            }
        }

        if !done_sent {
            let _ = tx.send(DONE_CHUNK.to_string()).await;
        }
    }

    /// Collect mode for non-streaming chat clients.
    pub async fn collect_chat(
        &self,
        request_id: &str,
        request: &ChatCompletionRequest,
        backend_id: &str,
        effort: Option<&str>,
        access_token: &str,
        account_id: &str,
    ) -> Result<Value, ProviderError> {
        let session_id = self.chat_session_id(request);
        let payload = build_codex_chat_payload(request, backend_id, effort, &session_id);
        let response = self
            .open_stream(request_id, &payload, access_token, account_id, &session_id)
            .await?;

        let collector = self.collect(request_id, response).await?;
        Ok(collector.into_chat_completion(request_id, backend_id))
    }

    /// Open the upstream stream for a `/v1/responses` request. Failing here
    /// (non-200, transport) surfaces as an HTTP error — no bytes have been
    /// sent to the client yet.
    pub async fn open_responses(
        &self,
        request_id: &str,
        request: &ResponsesRequest,
        backend_id: &str,
        effort: Option<&str>,
        access_token: &str,
        account_id: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        let payload = build_codex_responses_payload(request, backend_id, effort);
        let session_id = uuid::Uuid::new_v4().to_string();
        self.open_stream(request_id, &payload, access_token, account_id, &session_id)
            .await
    }

    /// Passthrough pump for an opened `/v1/responses` stream.
    pub async fn pump_responses(
        &self,
        request_id: &str,
        response: reqwest::Response,
        tx: mpsc::Sender<String>,
    ) {
        let mut parser = SseParser::new();
        let mut byte_stream = response.bytes_stream();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    let _ = tx
                        .send(crate::anthropic::transport_error_frame(&e, &self.timeouts))
                        .await;
                    return;
                }
            };
            let text = match std::str::from_utf8(&chunk) {
                Ok(t) => t,
                Err(_) => continue,
            };

            for event in parser.feed(text) {
                let data = event.data.trim();
                if data.is_empty() {
                    continue;
                }
                if data == "[DONE]" {
                    let _ = tx.send(DONE_CHUNK.to_string()).await;
                    return;
                }
                // Parse-and-reemit keeps frames whole across chunk splits.
                match serde_json::from_str::<Value>(data) {
                    Ok(parsed) => {
                        if tx.send(format!("data: {parsed}\n\n")).await.is_err() {
                            return;
                        }
                    }
                    Err(_) => {
                        warn!(request_id, "failed to parse Codex SSE data");
                    }
                }
            }
        }
    }

    /// Collect mode for an opened non-streaming `/v1/responses` stream.
    pub async fn collect_responses(
        &self,
        request_id: &str,
        response: reqwest::Response,
        backend_id: &str,
    ) -> Result<Value, ProviderError> {
        let collector = self.collect(request_id, response).await?;
        Ok(collector.into_response(request_id, backend_id))
    }

    async fn collect(
        &self,
        request_id: &str,
        response: reqwest::Response,
    ) -> Result<ResponseCollector, ProviderError> {
        let mut parser = SseParser::new();
        let mut collector = ResponseCollector::new();
        let mut byte_stream = response.bytes_stream();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(ProviderError::Http)?;
            let text = match std::str::from_utf8(&chunk) {
                Ok(t) => t,
                Err(_) => continue,
            };
            for event in parser.feed(text) {
                let data = event.data.trim();
                if data.is_empty() || data == "[DONE]" {
                    continue;
                }
                match serde_json::from_str::<Value>(data) {
                    Ok(parsed) => collector.feed(&parsed),
                    Err(_) => warn!(request_id, "failed to parse Codex SSE chunk"),
                }
            }
        }

        if let Some(message) = collector.error() {
            return Err(ProviderError::Api {
                status: 502,
                message: message.to_string(),
            });
        }
        Ok(collector)
    }
}
