#![allow(dead_code)]

use artdrop::common::SessionConfig;
use artdrop::index::SessionIndex;
use artdrop::inference::{InferenceError, InferenceInput, InferenceResponse, InferenceService};
use artdrop::session::{SessionController, SessionKey};
use artdrop::store::{MemoryBlobStore, ResultStore, StagingStore};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const IMG: &[u8] = b"\x89PNG\r\n\x1a\nuploaded-image";
pub const MASK: &[u8] = b"\x89PNG\r\n\x1a\nmask";
pub const OUTPUT: &[u8] = b"\x89PNG\r\n\x1a\ngenerated-output";
pub const EXPIRY_SECS: u64 = 60;

/// One canned inference outcome
pub enum Scripted {
    Buffer(&'static [u8]),
    Base64(&'static [u8]),
    Stream(Vec<&'static [u8]>),
    Json(Value),
    Fail(&'static str),
}

#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub model: String,
    pub input: InferenceInput,
}

/// Holds the first inference call open until released
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[derive(Default)]
pub struct ScriptedInference {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
    gate: Mutex<Option<Gate>>,
}

impl ScriptedInference {
    pub fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        })
    }

    /// Returns (entered, release) notifiers for the first call
    pub fn gated(script: Vec<Scripted>) -> (Arc<Self>, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let inference = Arc::new(Self {
            script: Mutex::new(script.into()),
            gate: Mutex::new(Some(Gate {
                entered: entered.clone(),
                release: release.clone(),
            })),
            ..Default::default()
        });
        (inference, entered, release)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceService for ScriptedInference {
    async fn run(
        &self,
        model: &str,
        input: InferenceInput,
    ) -> Result<InferenceResponse, InferenceError> {
        self.calls.lock().unwrap().push(RecordedCall {
            model: model.to_string(),
            input,
        });

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("inference called more often than scripted");

        match next {
            Scripted::Buffer(bytes) => Ok(InferenceResponse::Buffer(Bytes::from_static(bytes))),
            Scripted::Base64(bytes) => Ok(InferenceResponse::Structured(
                serde_json::json!({ "image": STANDARD.encode(bytes) }),
            )),
            Scripted::Stream(parts) => {
                let items: Vec<Result<Bytes, InferenceError>> =
                    parts.into_iter().map(|p| Ok(Bytes::from_static(p))).collect();
                Ok(InferenceResponse::Stream(futures::stream::iter(items).boxed()))
            }
            Scripted::Json(value) => Ok(InferenceResponse::Structured(value)),
            Scripted::Fail(message) => Err(InferenceError::Service(message.to_string())),
        }
    }
}

/// Controller wired to in-memory stores the test can inspect
pub struct Harness {
    pub controller: Arc<SessionController>,
    pub staging: Arc<MemoryBlobStore>,
    pub results: Arc<MemoryBlobStore>,
    pub inference: Arc<ScriptedInference>,
}

pub fn harness(inference: Arc<ScriptedInference>) -> Harness {
    let staging = Arc::new(MemoryBlobStore::new());
    let results = Arc::new(MemoryBlobStore::new());
    let controller = SessionController::new(
        StagingStore::new(staging.clone()),
        ResultStore::new(results.clone()),
        SessionIndex::new(),
        inference.clone(),
        SessionConfig {
            expiry_secs: EXPIRY_SECS,
            sweep_interval_secs: 5,
        },
    );

    Harness {
        controller: Arc::new(controller),
        staging,
        results,
        inference,
    }
}

pub fn session(key: &str) -> SessionKey {
    SessionKey::new(key).expect("valid session key")
}
