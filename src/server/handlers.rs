//! HTTP handlers for the session lifecycle endpoints.

use anyhow::Context;
use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, Response},
    Json,
};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::common::AppError;
use crate::session::{GenerateRequest, GeneratedResult, SessionKey, SessionSnapshot, StageRequest, StagedKeys};
use crate::utils::security::validate_blob_key;

#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    pub model: Option<String>,
}

/// Browser form upload: `image` plus optional `mask`
#[derive(TryFromMultipart)]
pub struct UploadForm {
    pub image: Option<FieldData<Bytes>>,
    pub mask: Option<FieldData<Bytes>>,
}

fn session_key(raw: String) -> Result<SessionKey, AppError> {
    Ok(SessionKey::new(raw)?)
}

fn image_response(result: GeneratedResult) -> Result<Response<Body>, AppError> {
    Ok(Response::builder()
        .header(header::CONTENT_TYPE, result.content_type)
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from(result.bytes))
        .context("build response")?)
}

fn wants_image(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.split(',').any(|part| part.trim().starts_with("image/")))
        .unwrap_or(false)
}

/// Raw body upload, image only
pub async fn upload_raw(
    Path(session): Path<String>,
    Query(params): Query<UploadParams>,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<StagedKeys>, AppError> {
    let key = session_key(session)?;
    let staged = state
        .controller
        .upload(
            &key,
            StageRequest {
                image: body,
                mask: None,
                model: params.model,
            },
        )
        .await?;
    Ok(Json(staged))
}

/// Multipart upload with optional mask
pub async fn upload_form(
    Path(session): Path<String>,
    Query(params): Query<UploadParams>,
    State(state): State<AppState>,
    TypedMultipart(form): TypedMultipart<UploadForm>,
) -> Result<Json<StagedKeys>, AppError> {
    let key = session_key(session)?;
    let image = form
        .image
        .map(|field| field.contents)
        .ok_or_else(|| AppError::BadRequest("No image file provided".to_string()))?;

    let staged = state
        .controller
        .upload(
            &key,
            StageRequest {
                image,
                mask: form.mask.map(|field| field.contents),
                model: params.model,
            },
        )
        .await?;
    Ok(Json(staged))
}

/// Trigger one generation.
/// JSON `{resultKey, contentType}` unless the client asks for `image/*`.
pub async fn generate(
    Path(session): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Response<Body>, AppError> {
    let key = session_key(session)?;
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    // Run to completion in its own task so a dropped connection
    // cannot strand the session in Generating
    let controller = state.controller.clone();
    let result = tokio::spawn(async move { controller.generate(&key, request).await })
        .await
        .context("generation task failed")??;

    if wants_image(&headers) {
        return image_response(result);
    }

    Ok(Response::builder()
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "resultKey": result.key,
                "contentType": result.content_type,
            })
            .to_string(),
        ))
        .context("build response")?)
}

pub async fn get_original(
    Path(session): Path<String>,
    State(state): State<AppState>,
) -> Result<Response<Body>, AppError> {
    let key = session_key(session)?;
    let bytes = state.controller.get_original(&key).await?;

    Ok(Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from(bytes))
        .context("build response")?)
}

pub async fn get_generated(
    Path(session): Path<String>,
    State(state): State<AppState>,
) -> Result<Response<Body>, AppError> {
    let key = session_key(session)?;
    image_response(state.controller.get_generated(&key).await?)
}

/// Idempotent, always 200
pub async fn delete_session(
    Path(session): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let key = session_key(session)?;
    state.controller.delete(&key).await;

    Ok(Json(json!({
        "success": true,
        "message": "Session and associated data deleted"
    })))
}

pub async fn list_images(
    Path(session): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let key = session_key(session)?;
    let entries = state.controller.list_images(&key).await;
    let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();

    Ok(Json(json!({ "keys": keys, "images": entries })))
}

pub async fn session_status(
    Path(session): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let key = session_key(session)?;
    state
        .controller
        .status(&key)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Session {} not found", key)))
}

/// Result Store read by key
pub async fn get_result(
    Path(result_key): Path<String>,
    State(state): State<AppState>,
) -> Result<Response<Body>, AppError> {
    validate_blob_key(&result_key)?;
    image_response(state.controller.get_result(&result_key).await?)
}
