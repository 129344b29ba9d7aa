//! OpenAI-compatible driver for user-configured custom providers.
//!
//! Requests pass through in the OpenAI dialect unmodified; only transport
//! concerns (endpoint join, auth header, timeouts, error frames) live here.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::anthropic::pump_byte_stream;
use crate::error::ProviderError;
use crate::trace::StreamTracer;
use crate::Timeouts;

pub struct OpenAiCompatDriver {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    timeouts: Timeouts,
}

impl OpenAiCompatDriver {
    pub fn new(timeouts: Timeouts) -> Result<Self, ProviderError> {
        Ok(Self {
            client: timeouts.request_client()?,
            stream_client: timeouts.stream_client()?,
            timeouts,
        })
    }

    /// `<base>/chat/completions`, tolerating trailing slashes and bases that
    /// already include the path.
    fn endpoint(base_url: &str) -> String {
        if base_url.ends_with("/chat/completions") {
            base_url.to_string()
        } else {
            format!("{}/chat/completions", base_url.trim_end_matches('/'))
        }
    }

    pub async fn invoke(
        &self,
        request_id: &str,
        request: &Value,
        base_url: &str,
        api_key: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        let endpoint = Self::endpoint(base_url);
        debug!(request_id, endpoint = %endpoint, "custom provider request");

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(api_key)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await?;
        Ok(response)
    }

    pub async fn stream(
        &self,
        request_id: &str,
        request: &Value,
        base_url: &str,
        api_key: &str,
        tracer: Option<Arc<StreamTracer>>,
        tx: mpsc::Sender<String>,
    ) {
        let endpoint = Self::endpoint(base_url);
        debug!(request_id, endpoint = %endpoint, "custom provider streaming request");

        let response = match self
            .stream_client
            .post(&endpoint)
            .bearer_auth(api_key)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(request_id, error = %e, "custom provider connection failed");
                let _ = tx
                    .send(crate::anthropic::transport_error_frame(&e, &self.timeouts))
                    .await;
                return;
            }
        };

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            error!(request_id, status, body = %body, "custom provider error");
            if let Some(tracer) = &tracer {
                tracer.log_error(&format!("custom provider error status={status} body={body}"));
            }
            let _ = tx.send(format!("event: error\ndata: {body}\n\n")).await;
            return;
        }

        pump_byte_stream(response, request_id, &self.timeouts, tracer, tx).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_join_handles_all_base_shapes() {
        assert_eq!(
            OpenAiCompatDriver::endpoint("https://api.example.com/v1"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            OpenAiCompatDriver::endpoint("https://api.example.com/v1/"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            OpenAiCompatDriver::endpoint("https://api.example.com/v1/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }
}
