//! Anthropic Messages driver (subscription Bearer auth).

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::ProviderError;
use crate::headers::{ANTHROPIC_VERSION, STAINLESS_HEADERS, USER_AGENT, X_APP};
use crate::shape::{self, USE_1M_CONTEXT_KEY};
use crate::trace::StreamTracer;
use crate::Timeouts;

const API_BASE: &str = "https://api.anthropic.com";

pub struct AnthropicDriver {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
    timeouts: Timeouts,
}

impl AnthropicDriver {
    pub fn new(timeouts: Timeouts) -> Result<Self, ProviderError> {
        Ok(Self {
            client: timeouts.request_client()?,
            stream_client: timeouts.stream_client()?,
            base_url: API_BASE.to_string(),
            timeouts,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn common_headers(
        &self,
        builder: reqwest::RequestBuilder,
        access_token: &str,
        beta_header: &str,
    ) -> reqwest::RequestBuilder {
        let mut builder = builder
            .header("authorization", format!("Bearer {access_token}"))
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", beta_header)
            .header("x-app", X_APP)
            .header("User-Agent", USER_AGENT)
            .header("content-type", "application/json")
            .header("accept-language", "*")
            .header("sec-fetch-mode", "cors");
        for (name, value) in STAINLESS_HEADERS {
            builder = builder.header(*name, *value);
        }
        builder
    }

    /// Non-streaming request. The response is returned as-is so callers can
    /// pass upstream status codes through.
    pub async fn invoke(
        &self,
        mut request: Value,
        access_token: &str,
        client_betas: Option<&str>,
    ) -> Result<reqwest::Response, ProviderError> {
        if request.get("system").is_none() {
            shape::inject_spoof_system(&mut request);
        }
        let beta_header = shape::build_beta_headers(&request, client_betas, false);
        strip_marker(&mut request);

        debug!(model = ?request.get("model"), "sending request to Anthropic");
        let builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .json(&request);
        let response = self
            .common_headers(builder, access_token, &beta_header)
            .send()
            .await?;
        Ok(response)
    }

    /// Streaming request. Raw SSE text chunks are forwarded through `tx`;
    /// upstream failures become in-band `event: error` frames — the stream
    /// boundary never raises.
    pub async fn stream(
        &self,
        request_id: &str,
        mut request: Value,
        access_token: &str,
        client_betas: Option<&str>,
        tracer: Option<Arc<StreamTracer>>,
        tx: mpsc::Sender<String>,
    ) {
        if request.get("system").is_none() {
            shape::inject_spoof_system(&mut request);
        }
        request["stream"] = json!(true);
        let beta_header = shape::build_beta_headers(&request, client_betas, true);
        strip_marker(&mut request);

        debug!(
            request_id,
            model = ?request.get("model"),
            beta = %beta_header,
            "sending streaming request to Anthropic"
        );
        if let Some(tracer) = &tracer {
            tracer.log_note(&format!("anthropic beta header={beta_header}"));
        }

        let builder = self
            .stream_client
            .post(format!("{}/v1/messages", self.base_url))
            .header("anthropic-dangerous-direct-browser-access", "true")
            .json(&request);

        let response = match self
            .common_headers(builder, access_token, &beta_header)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(request_id, error = %e, "Anthropic connection failed");
                let _ = tx.send(transport_error_frame(&e, &self.timeouts)).await;
                return;
            }
        };

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            error!(request_id, status, body = %body, "Anthropic streaming API error");
            if let Some(tracer) = &tracer {
                tracer.log_error(&format!("anthropic error status={status} body={body}"));
            }
            let _ = tx.send(format!("event: error\ndata: {body}\n\n")).await;
            return;
        }

        pump_byte_stream(response, request_id, &self.timeouts, tracer, tx).await;
    }
}

fn strip_marker(request: &mut Value) {
    if let Some(obj) = request.as_object_mut() {
        obj.remove(USE_1M_CONTEXT_KEY);
    }
}

/// Forward upstream body chunks, converting transport failures into a final
/// synthetic error frame.
pub(crate) async fn pump_byte_stream(
    response: reqwest::Response,
    request_id: &str,
    timeouts: &Timeouts,
    tracer: Option<Arc<StreamTracer>>,
    tx: mpsc::Sender<String>,
) {
    let mut byte_stream = response.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                error!(request_id, error = %e, "upstream stream failed");
                if let Some(tracer) = &tracer {
                    tracer.log_error(&format!("stream transport error: {e}"));
                }
                let _ = tx.send(transport_error_frame(&e, timeouts)).await;
                return;
            }
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };
        if let Some(tracer) = &tracer {
            tracer.log_source_chunk(text);
        }
        if tx.send(text.to_string()).await.is_err() {
            // receiver dropped: inbound client disconnected
            return;
        }
    }
}

pub(crate) fn transport_error_frame(error: &reqwest::Error, timeouts: &Timeouts) -> String {
    let payload = if error.is_timeout() {
        json!({ "error": format!("Stream timeout after {}s", timeouts.stream as u64) })
    } else {
        json!({ "error": format!("Connection closed: {error}") })
    };
    format!("event: error\ndata: {payload}\n\n")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_never_reaches_the_wire() {
        let mut request = json!({
            "model": "claude-sonnet-4-5-20250929",
            USE_1M_CONTEXT_KEY: true,
        });
        strip_marker(&mut request);
        assert!(request.get(USE_1M_CONTEXT_KEY).is_none());
    }

    #[tokio::test]
    async fn stream_emits_error_frame_on_unreachable_upstream() {
        let driver = AnthropicDriver::new(Timeouts {
            connect: 0.2,
            read: 0.2,
            request: 0.5,
            stream: 0.5,
        })
        .unwrap()
        .with_base_url("http://127.0.0.1:9");

        let (tx, mut rx) = mpsc::channel(8);
        driver
            .stream("req", json!({ "model": "m", "messages": [] }), "tok", None, None, tx)
            .await;

        let frame = rx.recv().await.unwrap();
        assert!(frame.starts_with("event: error\ndata: "));
        assert!(frame.contains("error"));
    }
}
