//! Boundary to the external image-inference service.

mod http;
pub mod models;

pub use http::HttpInference;
pub use models::{Conditioning, ModelSpec, SamplingDefaults};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    /// Service answered but reported a failure
    #[error("{0}")]
    Service(String),

    #[error("inference returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("inference transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("inference stream failed: {0}")]
    Stream(String),
}

/// The three encodings an inference call may answer with
pub enum InferenceResponse {
    /// Structured value, base64 image under `image` when well-formed
    Structured(serde_json::Value),
    /// Body delivered incrementally, read exactly once
    Stream(BoxStream<'static, Result<Bytes, InferenceError>>),
    /// Whole body already in memory
    Buffer(Bytes),
}

impl std::fmt::Debug for InferenceResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structured(value) => f.debug_tuple("Structured").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Buffer(bytes) => write!(f, "Buffer({} bytes)", bytes.len()),
        }
    }
}

/// Request payload forwarded to the model.
/// Image and mask serialize as JSON byte arrays.
#[derive(Clone, Debug, Serialize)]
pub struct InferenceInput {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<Bytes>,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
}

/// An inference backend. Called once per generation, never retried here.
#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn run(
        &self,
        model: &str,
        input: InferenceInput,
    ) -> Result<InferenceResponse, InferenceError>;
}
