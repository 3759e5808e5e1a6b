//! Session lifecycle controller.
//!
//! Sessions live in an arena keyed by [`SessionKey`]. Each entry is guarded
//! by its own async mutex, so work on one session never blocks another. The
//! lock is held for bookkeeping and storage writes, never across the
//! inference call: the processing flag covers that window instead.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use super::state::{Session, SessionSnapshot, SessionState};
use super::SessionKey;
use crate::common::{AppError, SessionConfig};
use crate::index::{IndexEntry, SessionIndex};
use crate::inference::{InferenceInput, InferenceService, ModelSpec};
use crate::normalize::{self, CanonicalImage};
use crate::store::{ResultStore, StagingStore, StoredBlob, GENERATED_PREFIX, STAGED_PREFIX};

type SessionHandle = Arc<Mutex<Session>>;

/// Inputs for an upload
#[derive(Debug, Default)]
pub struct StageRequest {
    pub image: Bytes,
    pub mask: Option<Bytes>,
    /// Model the caller intends to use, checked up front when given
    pub model: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedKeys {
    pub base_image_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_image_key: Option<String>,
}

/// Generate payload. Fields are optional so a missing one is a 400, not a parse error.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub prompt: Option<String>,
    pub model: Option<String>,
    pub image_key: Option<String>,
    pub mask_key: Option<String>,
    pub steps: Option<u32>,
    pub guidance: Option<f32>,
}

/// Canonical output of one generation
#[derive(Clone, Debug)]
pub struct GeneratedResult {
    pub key: String,
    pub bytes: Bytes,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

impl From<StoredBlob> for GeneratedResult {
    fn from(blob: StoredBlob) -> Self {
        Self {
            key: blob.key,
            bytes: blob.bytes,
            content_type: blob
                .content_type
                .unwrap_or_else(|| normalize::IMAGE_PNG.to_string()),
            created_at: blob.created_at,
        }
    }
}

/// Everything one generation needs once the processing flag is held
struct GenerationPlan {
    model: ModelSpec,
    prompt: String,
    image_key: Option<String>,
    mask_key: Option<String>,
    steps: Option<u32>,
    guidance: Option<f32>,
}

impl GenerationPlan {
    fn staged_keys(&self) -> Vec<String> {
        self.image_key
            .iter()
            .chain(self.mask_key.iter())
            .cloned()
            .collect()
    }
}

pub struct SessionController {
    sessions: DashMap<SessionKey, SessionHandle>,
    staging: StagingStore,
    results: ResultStore,
    index: SessionIndex,
    inference: Arc<dyn InferenceService>,
    config: SessionConfig,
}

fn required(field: Option<String>, name: &str) -> Result<String, AppError> {
    field
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("Missing '{}' in request body", name)))
}

/// Pick the staged inputs a generation will consume.
/// Supplied keys must name one of this session's own staged inputs.
fn resolve_inputs(
    session: &Session,
    model: &ModelSpec,
    image_key: Option<String>,
    mask_key: Option<String>,
) -> Result<(Option<String>, Option<String>), AppError> {
    if !model.requires_image() {
        return Ok((None, None));
    }

    let image_key = image_key
        .or_else(|| session.staged_image_key().map(str::to_string))
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "Missing 'imageKey' in request body for model '{}'",
                model.id
            ))
        })?;
    let mask_key = if model.accepts_mask() {
        mask_key.or_else(|| session.staged_mask_key().map(str::to_string))
    } else {
        None
    };

    for staged in std::iter::once(&image_key).chain(mask_key.iter()) {
        if !staged.starts_with(STAGED_PREFIX) {
            return Err(AppError::BadRequest(format!(
                "'{}' is not a staged input key",
                staged
            )));
        }
        let owned = session.staged_image_key() == Some(staged.as_str())
            || session.staged_mask_key() == Some(staged.as_str());
        if !owned {
            return Err(AppError::NotFound(format!(
                "Staged input {} not found",
                staged
            )));
        }
    }

    Ok((Some(image_key), mask_key))
}

impl SessionController {
    pub fn new(
        staging: StagingStore,
        results: ResultStore,
        index: SessionIndex,
        inference: Arc<dyn InferenceService>,
        config: SessionConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            staging,
            results,
            index,
            inference,
            config,
        }
    }

    pub fn staging(&self) -> &StagingStore {
        &self.staging
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    pub fn index(&self) -> &SessionIndex {
        &self.index
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    //----------------
    // ARENA
    //----------------

    fn existing(&self, key: &SessionKey) -> Option<SessionHandle> {
        self.sessions.get(key).map(|entry| entry.value().clone())
    }

    /// Lock the live session for `key`, creating it on first use.
    /// A handle that went terminal while we waited is retired, so retry.
    async fn lock_live(&self, key: &SessionKey) -> (SessionHandle, OwnedMutexGuard<Session>) {
        loop {
            let handle = self
                .sessions
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Session::new(key.clone()))))
                .value()
                .clone();
            let guard = handle.clone().lock_owned().await;
            if !guard.is_terminal() {
                return (handle, guard);
            }
        }
    }

    fn retire(&self, key: &SessionKey, handle: &SessionHandle) {
        self.sessions
            .remove_if(key, |_, current| Arc::ptr_eq(current, handle));
    }

    /// Drop a session that a rejected request created but never used
    fn abandon_if_empty(&self, key: &SessionKey, handle: &SessionHandle, session: &mut Session) {
        if session.state() == SessionState::Empty {
            session.terminate(SessionState::Deleted);
            self.retire(key, handle);
        }
    }

    fn next_deadline(&self) -> Instant {
        Instant::now() + self.config.expiry()
    }

    //----------------
    // UPLOAD
    //----------------

    /// Stage an image (and optional mask) for the next generation
    pub async fn upload(
        &self,
        key: &SessionKey,
        request: StageRequest,
    ) -> Result<StagedKeys, AppError> {
        if request.image.is_empty() {
            return Err(AppError::BadRequest("No image data provided".to_string()));
        }
        let mask = request.mask.filter(|m| !m.is_empty());
        if let Some(model) = request.model.as_deref() {
            let spec = ModelSpec::resolve(model);
            if mask.is_some() && !spec.accepts_mask() {
                return Err(AppError::BadRequest(format!(
                    "Model '{}' does not take a mask",
                    spec.id
                )));
            }
        }

        self.expire_if_due(key).await;
        let (handle, mut session) = self.lock_live(key).await;
        if session.is_processing() {
            return Err(AppError::Conflict(
                "Image generation already in progress".to_string(),
            ));
        }

        let image_bytes = request.image.len();
        let image_key = match self.staging.put(request.image).await {
            Ok(k) => k,
            Err(e) => {
                self.abandon_if_empty(key, &handle, &mut session);
                return Err(e.into());
            }
        };
        let mask_key = match mask {
            Some(mask) => match self.staging.put(mask).await {
                Ok(k) => Some(k),
                Err(e) => {
                    self.discard_staged(&[image_key]).await;
                    self.abandon_if_empty(key, &handle, &mut session);
                    return Err(e.into());
                }
            },
            None => None,
        };

        let replaced = session.stage(image_key.clone(), mask_key.clone(), self.next_deadline())?;
        self.discard_staged(&replaced).await;

        tracing::info!(
            session = %key,
            bytes = image_bytes,
            image_key = %image_key,
            has_mask = mask_key.is_some(),
            "input staged"
        );

        Ok(StagedKeys {
            base_image_key: image_key,
            mask_image_key: mask_key,
        })
    }

    //----------------
    // GENERATE
    //----------------

    /// Run one generation for the session.
    ///
    /// Rejects with `Conflict` while another generation is outstanding.
    /// Every staged input the generation referenced is deleted before this
    /// returns, whatever the outcome.
    pub async fn generate(
        &self,
        key: &SessionKey,
        request: GenerateRequest,
    ) -> Result<GeneratedResult, AppError> {
        let prompt = required(request.prompt, "prompt")?;
        let model = ModelSpec::resolve(&required(request.model, "model")?);

        self.expire_if_due(key).await;
        let (handle, plan) = {
            let (handle, mut session) = self.lock_live(key).await;
            if session.is_processing() {
                return Err(AppError::Conflict(
                    "Image generation already in progress".to_string(),
                ));
            }

            let (image_key, mask_key) =
                match resolve_inputs(&session, &model, request.image_key, request.mask_key) {
                    Ok(keys) => keys,
                    Err(e) => {
                        self.abandon_if_empty(key, &handle, &mut session);
                        return Err(e);
                    }
                };

            session.begin_generation()?;
            drop(session);

            let plan = GenerationPlan {
                model,
                prompt,
                image_key,
                mask_key,
                steps: request.steps,
                guidance: request.guidance,
            };
            (handle, plan)
        };

        tracing::info!(session = %key, model = %plan.model.id, "generation started");
        let started = std::time::Instant::now();

        let outcome = self.run_generation(&plan).await;

        // Unconditional: staged inputs are single use
        let consumed = plan.staged_keys();
        self.discard_staged(&consumed).await;

        let mut session = handle.lock().await;
        session.forget_staged(&consumed);

        if session.is_terminal() {
            // deleted while inference was running; the output has no owner
            session.finish_failure(self.next_deadline());
            tracing::info!(session = %key, "session ended during generation, result dropped");
            return Err(AppError::NotFound(
                "Session was deleted during generation".to_string(),
            ));
        }

        let image = match outcome {
            Ok(image) => image,
            Err(e) => {
                session.finish_failure(self.next_deadline());
                tracing::warn!(session = %key, model = %plan.model.id, error = %e, "generation failed");
                return Err(e);
            }
        };

        let stored = match self
            .results
            .put(key, image.bytes, &image.content_type)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                session.finish_failure(self.next_deadline());
                return Err(e.into());
            }
        };

        self.index.append(
            key,
            IndexEntry {
                key: stored.key.clone(),
                created_at: stored.created_at,
            },
        );
        // superseded result stays listed in the index and is purged with the session
        let _ = session.finish_success(stored.key.clone(), self.next_deadline());

        tracing::info!(
            session = %key,
            model = %plan.model.id,
            result_key = %stored.key,
            bytes = stored.bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generation complete"
        );

        Ok(stored.into())
    }

    /// Read staged inputs, call inference once, normalize the answer
    async fn run_generation(&self, plan: &GenerationPlan) -> Result<CanonicalImage, AppError> {
        let image = match &plan.image_key {
            Some(k) => Some(self.read_staged(k).await?),
            None => None,
        };
        let mask = match &plan.mask_key {
            Some(k) => Some(self.read_staged(k).await?),
            None => None,
        };

        let defaults = plan.model.defaults();
        let input = InferenceInput {
            prompt: plan.prompt.clone(),
            image,
            mask,
            num_inference_steps: plan.steps.unwrap_or(defaults.steps),
            guidance_scale: plan.guidance.unwrap_or(defaults.guidance),
        };

        let response = self.inference.run(&plan.model.id, input).await?;
        tracing::debug!(model = %plan.model.id, shape = ?response, "inference returned");

        Ok(normalize::normalize(response, &plan.model.id, None).await?)
    }

    async fn read_staged(&self, key: &str) -> Result<Bytes, AppError> {
        self.staging.get(key).await.map_err(|e| match AppError::from(e) {
            AppError::NotFound(k) => AppError::NotFound(format!("Staged input {} not found", k)),
            other => other,
        })
    }

    /// Best-effort staged cleanup; failures are logged, never returned
    async fn discard_staged(&self, keys: &[String]) {
        for k in keys {
            if let Err(e) = self.staging.delete(k).await {
                tracing::warn!(key = %k, error = %e, "failed to delete staged input");
            }
        }
    }

    //----------------
    // QUERIES
    //----------------

    /// Most recently staged image bytes
    pub async fn get_original(&self, key: &SessionKey) -> Result<Bytes, AppError> {
        self.expire_if_due(key).await;
        let not_found = || AppError::NotFound("Original image not found".to_string());

        let handle = self.existing(key).ok_or_else(not_found)?;
        let session = handle.lock().await;
        let staged = session.staged_image_key().ok_or_else(not_found)?;
        self.staging.get(staged).await.map_err(|_| not_found())
    }

    /// Current result for the session, 404 once expired
    pub async fn get_generated(&self, key: &SessionKey) -> Result<GeneratedResult, AppError> {
        self.expire_if_due(key).await;
        let not_found = || AppError::NotFound("Generated image not available yet".to_string());

        let handle = self.existing(key).ok_or_else(not_found)?;
        let session = handle.lock().await;
        let result_key = session.result_key().ok_or_else(not_found)?;
        let blob = self.results.get(result_key).await.map_err(|e| match e {
            crate::store::StorageError::NotFound(_) => not_found(),
            other => other.into(),
        })?;
        Ok(blob.into())
    }

    /// Read any result by key, honoring its session's expiry
    pub async fn get_result(&self, result_key: &str) -> Result<GeneratedResult, AppError> {
        let owner = result_key
            .strip_prefix(GENERATED_PREFIX)
            .and_then(|rest| rest.split('/').next())
            .and_then(|session| SessionKey::new(session).ok())
            .ok_or_else(|| AppError::NotFound(format!("Result {} not found", result_key)))?;
        self.expire_if_due(&owner).await;

        Ok(self.results.get(result_key).await?.into())
    }

    pub async fn list_images(&self, key: &SessionKey) -> Vec<IndexEntry> {
        self.expire_if_due(key).await;
        self.index.list(key)
    }

    pub async fn status(&self, key: &SessionKey) -> Option<SessionSnapshot> {
        self.expire_if_due(key).await;
        let handle = self.existing(key)?;
        let session = handle.lock().await;
        (!session.is_terminal()).then(|| session.snapshot(Instant::now()))
    }

    //----------------
    // TEARDOWN
    //----------------

    /// Explicit delete. Always succeeds; sub-deletes that find nothing are fine.
    pub async fn delete(&self, key: &SessionKey) {
        match self.existing(key) {
            Some(handle) => {
                let mut session = handle.lock().await;
                if !session.is_terminal() {
                    self.purge(&mut session, SessionState::Deleted).await;
                }
                self.retire(key, &handle);
            }
            // no live state, but drop any orphaned log
            None => self.purge_results(key, Vec::new()).await,
        }
        tracing::info!(session = %key, "session deleted");
    }

    /// Lazy expiry check on access
    async fn expire_if_due(&self, key: &SessionKey) {
        let Some(handle) = self.existing(key) else {
            return;
        };
        let mut session = handle.lock().await;
        if session.is_due(Instant::now()) {
            self.purge(&mut session, SessionState::Expired).await;
            self.retire(key, &handle);
            tracing::info!(session = %key, "session expired");
        }
    }

    /// Sweep every session whose deadline passed. Sessions busy in another
    /// transition are skipped and picked up on a later pass.
    pub async fn expire_due(&self) -> usize {
        let candidates: Vec<(SessionKey, SessionHandle)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let now = Instant::now();
        let mut expired = 0;
        for (key, handle) in candidates {
            let Ok(mut session) = handle.try_lock() else {
                continue;
            };
            if session.is_due(now) {
                self.purge(&mut session, SessionState::Expired).await;
                self.retire(&key, &handle);
                expired += 1;
                tracing::info!(session = %key, "session expired");
            }
        }
        expired
    }

    /// Remove staged inputs, every indexed result and the index itself
    async fn purge(&self, session: &mut Session, end: SessionState) {
        let key = session.key().clone();
        let (staged, results): (Vec<String>, Vec<String>) = session
            .terminate(end)
            .into_iter()
            .partition(|k| k.starts_with(STAGED_PREFIX));
        self.discard_staged(&staged).await;
        self.purge_results(&key, results).await;
    }

    async fn purge_results(&self, key: &SessionKey, mut results: Vec<String>) {
        for entry in self.index.purge(key) {
            if !results.contains(&entry.key) {
                results.push(entry.key);
            }
        }
        for k in results {
            if let Err(e) = self.results.delete(&k).await {
                tracing::warn!(session = %key, key = %k, error = %e, "failed to delete result");
            }
        }
    }
}
