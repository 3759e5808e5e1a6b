use serde::Serialize;
use tokio::time::Instant;

use super::SessionKey;
use crate::common::AppError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Empty,
    Staged,
    Generating,
    Generated,
    Expired,
    Deleted,
}

/// Mutable state of one session.
/// Only the controller touches it, always under the session's own lock.
#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    state: SessionState,
    processing: bool,
    staged_image_key: Option<String>,
    staged_mask_key: Option<String>,
    result_key: Option<String>,
    expires_at: Option<Instant>,
}

/// Read-only view for status queries
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session: SessionKey,
    pub state: SessionState,
    pub processing: bool,
    pub staged_image_key: Option<String>,
    pub staged_mask_key: Option<String>,
    pub result_key: Option<String>,
    pub expires_in_secs: Option<u64>,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            state: SessionState::Empty,
            processing: false,
            staged_image_key: None,
            staged_mask_key: None,
            result_key: None,
            expires_at: None,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SessionState::Expired | SessionState::Deleted)
    }

    pub fn staged_image_key(&self) -> Option<&str> {
        self.staged_image_key.as_deref()
    }

    pub fn staged_mask_key(&self) -> Option<&str> {
        self.staged_mask_key.as_deref()
    }

    pub fn result_key(&self) -> Option<&str> {
        self.result_key.as_deref()
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    fn ensure_idle(&self) -> Result<(), AppError> {
        if self.processing {
            return Err(AppError::Conflict(
                "Image generation already in progress".to_string(),
            ));
        }
        Ok(())
    }

    /// Record freshly staged inputs.
    /// Returns the keys they replace so the caller can drop them.
    /// Until a result is published, each upload moves the deadline to `idle_deadline`.
    pub fn stage(
        &mut self,
        image_key: String,
        mask_key: Option<String>,
        idle_deadline: Instant,
    ) -> Result<Vec<String>, AppError> {
        self.ensure_idle()?;
        if self.result_key.is_none() {
            self.expires_at = Some(idle_deadline);
        }
        let replaced = self
            .staged_image_key
            .replace(image_key)
            .into_iter()
            .chain(std::mem::replace(&mut self.staged_mask_key, mask_key))
            .collect();
        self.state = SessionState::Staged;
        Ok(replaced)
    }

    /// Claim the processing flag. A second claim is rejected, never queued.
    pub fn begin_generation(&mut self) -> Result<(), AppError> {
        self.ensure_idle()?;
        self.processing = true;
        self.state = SessionState::Generating;
        Ok(())
    }

    /// Drop references to staged keys a generation consumed
    pub fn forget_staged(&mut self, consumed: &[String]) {
        for slot in [&mut self.staged_image_key, &mut self.staged_mask_key] {
            if slot.as_ref().is_some_and(|k| consumed.contains(k)) {
                *slot = None;
            }
        }
    }

    /// Publish a new result and re-arm expiry, replacing any pending deadline.
    /// Returns the superseded result key.
    pub fn finish_success(&mut self, result_key: String, deadline: Instant) -> Option<String> {
        self.processing = false;
        self.state = SessionState::Generated;
        self.expires_at = Some(deadline);
        self.result_key.replace(result_key)
    }

    /// Back to Staged; a previously published result stays readable.
    /// A session with no pending deadline gets `idle_deadline`.
    pub fn finish_failure(&mut self, idle_deadline: Instant) {
        self.processing = false;
        if !self.is_terminal() {
            self.state = SessionState::Staged;
            self.expires_at.get_or_insert(idle_deadline);
        }
    }

    /// Expiry fires only between transitions, never during a generation
    pub fn is_due(&self, now: Instant) -> bool {
        !self.processing
            && !self.is_terminal()
            && self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    /// Clear everything and enter a terminal state.
    /// Returns the staged and result keys that were still referenced.
    pub fn terminate(&mut self, end: SessionState) -> Vec<String> {
        debug_assert!(matches!(end, SessionState::Expired | SessionState::Deleted));
        self.state = end;
        self.processing = false;
        self.expires_at = None;
        [
            self.staged_image_key.take(),
            self.staged_mask_key.take(),
            self.result_key.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        SessionSnapshot {
            session: self.key.clone(),
            state: self.state,
            processing: self.processing,
            staged_image_key: self.staged_image_key.clone(),
            staged_mask_key: self.staged_mask_key.clone(),
            result_key: self.result_key.clone(),
            expires_in_secs: self
                .expires_at
                .map(|deadline| deadline.saturating_duration_since(now).as_secs()),
        }
    }
}
