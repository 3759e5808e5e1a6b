//! Converts any inference response shape into one canonical byte form.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde_json::Value;
use thiserror::Error;

use crate::inference::{InferenceError, InferenceResponse};

pub const IMAGE_PNG: &str = "image/png";
pub const IMAGE_JPEG: &str = "image/jpeg";

/// Field carrying the base64 image in structured responses
const IMAGE_FIELD: &str = "image";

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("unrecognized response shape: {0}")]
    UnrecognizedShape(String),

    #[error("invalid base64 image: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("response stream failed: {0}")]
    Stream(#[from] InferenceError),
}

/// `(bytes, content type)` every response is reduced to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalImage {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Normalize a raw inference response.
///
/// Structured values must carry a base64 string under `image` (always
/// JPEG). Streams are drained in arrival order and default to PNG unless
/// `stream_content_type` overrides it. Buffers pass through as PNG.
pub async fn normalize(
    response: InferenceResponse,
    model: &str,
    stream_content_type: Option<&str>,
) -> Result<CanonicalImage, NormalizeError> {
    let image = match response {
        InferenceResponse::Structured(value) => match value.get(IMAGE_FIELD) {
            Some(Value::String(encoded)) => CanonicalImage {
                bytes: Bytes::from(STANDARD.decode(encoded.as_bytes())?),
                content_type: IMAGE_JPEG.to_string(),
            },
            _ => return Err(NormalizeError::UnrecognizedShape(describe(&value))),
        },
        InferenceResponse::Stream(mut stream) => {
            let mut buffer = BytesMut::new();
            let mut chunks = 0usize;
            while let Some(chunk) = stream.next().await {
                buffer.extend_from_slice(&chunk?);
                chunks += 1;
            }
            tracing::debug!(model, chunks, bytes = buffer.len(), "stream drained");
            CanonicalImage {
                bytes: buffer.freeze(),
                content_type: stream_content_type.unwrap_or(IMAGE_PNG).to_string(),
            }
        }
        InferenceResponse::Buffer(bytes) => CanonicalImage {
            bytes,
            content_type: IMAGE_PNG.to_string(),
        },
    };

    Ok(image)
}

/// Short shape descriptor for diagnostics, never the payload itself
pub fn describe(value: &Value) -> String {
    match value {
        Value::Null => "json null".to_string(),
        Value::Bool(_) => "json bool".to_string(),
        Value::Number(_) => "json number".to_string(),
        Value::String(s) => format!("json string ({} chars)", s.len()),
        Value::Array(items) => format!("json array ({} items)", items.len()),
        Value::Object(map) => {
            let fields: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", k, kind(v)))
                .collect();
            format!("json object {{{}}}", fields.join(", "))
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
