use std::sync::Arc;

use crate::session::SessionController;

/// Application state shared by all handlers via Axum State extractor
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<SessionController>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(controller: Arc<SessionController>, max_upload_bytes: usize) -> Self {
        Self {
            controller,
            max_upload_bytes,
        }
    }
}
