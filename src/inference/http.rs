use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header;
use serde_json::Value;

use super::{InferenceError, InferenceInput, InferenceResponse, InferenceService};
use crate::common::InferenceConfig;

/// REST client for a Workers-AI style `ai/run/<model>` endpoint
pub struct HttpInference {
    client: reqwest::Client,
    base_url: String,
    account_id: String,
    api_token: String,
}

impl HttpInference {
    pub fn new(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            account_id: config.account_id.clone(),
            api_token: config.api_token.clone(),
        })
    }

    fn run_url(&self, model: &str) -> String {
        format!(
            "{}/accounts/{}/ai/run/{}",
            self.base_url,
            self.account_id,
            model.trim_start_matches('/')
        )
    }
}

/// Strip the `{success, errors, result}` envelope if present
fn unwrap_envelope(value: Value) -> Result<Value, InferenceError> {
    let Value::Object(mut map) = value else {
        return Ok(value);
    };

    if map.get("success") == Some(&Value::Bool(false)) {
        let messages: Vec<String> = map
            .get("errors")
            .and_then(Value::as_array)
            .map(|errors| {
                errors
                    .iter()
                    .map(|e| {
                        e.get("message")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| e.to_string())
                    })
                    .collect()
            })
            .unwrap_or_default();
        let message = if messages.is_empty() {
            "inference reported failure".to_string()
        } else {
            messages.join("; ")
        };
        return Err(InferenceError::Service(message));
    }

    match map.remove("result") {
        Some(result) if map.contains_key("success") => Ok(result),
        Some(result) => {
            map.insert("result".to_string(), result);
            Ok(Value::Object(map))
        }
        None => Ok(Value::Object(map)),
    }
}

#[async_trait]
impl InferenceService for HttpInference {
    async fn run(
        &self,
        model: &str,
        input: InferenceInput,
    ) -> Result<InferenceResponse, InferenceError> {
        let started = std::time::Instant::now();
        let response = self
            .client
            .post(self.run_url(model))
            .bearer_auth(&self.api_token)
            .json(&input)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(model, status = status.as_u16(), error = %e, "failed to read inference error body");
                    String::new()
                }
            };
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let is_json = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);

        tracing::debug!(
            model,
            status = status.as_u16(),
            json = is_json,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "inference_response"
        );

        if is_json {
            let value: Value = response.json().await?;
            return Ok(InferenceResponse::Structured(unwrap_envelope(value)?));
        }

        // Binary images arrive as a stream; the normalizer drains it
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| InferenceError::Stream(e.to_string())));
        Ok(InferenceResponse::Stream(stream.boxed()))
    }
}
