mod common;

use artdrop::server::{routes, AppState};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use common::{harness, Harness, Scripted, ScriptedInference, IMG, MASK, OUTPUT};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    routes::create_router(&AppState::new(h.controller.clone(), 1024 * 1024))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn generate_request(session: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(format!("/sessions/{}/generate", session))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_raw_upload_then_generate_returns_key() {
    let h = harness(ScriptedInference::new(vec![Scripted::Buffer(OUTPUT)]));
    let app = app(&h);

    let (status, staged) = send_json(
        &app,
        Request::builder()
            .method(Method::PUT)
            .uri("/sessions/web-1/upload")
            .body(Body::from(IMG))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let k1 = staged["baseImageKey"].as_str().unwrap().to_string();
    assert!(staged.get("maskImageKey").is_none());

    let (status, body) = send_json(
        &app,
        generate_request(
            "web-1",
            json!({ "prompt": "cat", "model": "img2img", "imageKey": k1 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let k2 = body["resultKey"].as_str().unwrap().to_string();
    assert_eq!(body["contentType"], "image/png");

    let (status, images) = send_json(&app, get("/sessions/web-1/images")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(images["keys"], json!([k2.clone()]));

    let (status, bytes) = send(&app, get("/sessions/web-1/generated")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, OUTPUT);

    let (status, bytes) = send(&app, get(&format!("/results/{}", k2))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, OUTPUT);

    // staged input was consumed
    let (status, _) = send(&app, get("/sessions/web-1/original")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_generate_returns_raw_bytes_for_image_accept() {
    let h = harness(ScriptedInference::new(vec![Scripted::Base64(OUTPUT)]));
    let app = app(&h);

    let mut request = generate_request("raw", json!({ "prompt": "cat", "model": "flux" }));
    request
        .headers_mut()
        .insert(header::ACCEPT, "image/*".parse().unwrap());

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], OUTPUT);
}

#[tokio::test]
async fn test_multipart_upload_with_mask() {
    let h = harness(ScriptedInference::new(vec![]));
    let app = app(&h);

    let boundary = "artdrop-test-boundary";
    let mut body = Vec::new();
    for (name, bytes) in [("image", IMG), ("mask", MASK)] {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{name}.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    let (status, staged) = send_json(
        &app,
        Request::builder()
            .method(Method::POST)
            .uri("/sessions/form-1/upload?model=inpainting")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(staged["baseImageKey"].as_str().unwrap().starts_with("staged/"));
    assert!(staged["maskImageKey"].as_str().unwrap().starts_with("staged/"));

    let (status, bytes) = send(&app, get("/sessions/form-1/original")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, IMG);
}

#[tokio::test]
async fn test_validation_errors_are_400() {
    let h = harness(ScriptedInference::new(vec![]));
    let app = app(&h);

    let (status, body) = send_json(&app, generate_request("v", json!({ "model": "flux" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "bad_request");

    let (status, _) = send_json(
        &app,
        generate_request("v", json!({ "prompt": "cat", "model": "img2img" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Request::builder()
            .method(Method::POST)
            .uri("/sessions/v/generate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Request::builder()
            .method(Method::PUT)
            .uri("/sessions/v/upload")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/sessions/bad.key/images")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(h.staging.is_empty());
    assert!(h.results.is_empty());
}

#[tokio::test]
async fn test_missing_stage_is_404() {
    let h = harness(ScriptedInference::new(vec![]));
    let app = app(&h);

    let (status, body) = send_json(
        &app,
        generate_request(
            "m",
            json!({ "prompt": "cat", "model": "img2img", "imageKey": "staged/missing" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "not_found");
}

#[tokio::test]
async fn test_inference_failure_is_500_with_message() {
    let h = harness(ScriptedInference::new(vec![Scripted::Fail("capacity exceeded")]));
    let app = app(&h);

    let (status, body) =
        send_json(&app, generate_request("f", json!({ "prompt": "cat", "model": "flux" }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["type"], "inference_error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("capacity exceeded"));
}

#[tokio::test]
async fn test_generate_conflict_is_409() {
    let (inference, entered, release) = ScriptedInference::gated(vec![Scripted::Buffer(OUTPUT)]);
    let h = harness(inference);
    let app = app(&h);

    let first_app = app.clone();
    let first = tokio::spawn(async move {
        send(
            &first_app,
            generate_request("c", json!({ "prompt": "cat", "model": "flux" })),
        )
        .await
    });
    entered.notified().await;

    let (status, body) =
        send_json(&app, generate_request("c", json!({ "prompt": "dog", "model": "flux" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "conflict");

    let (status, snapshot) = send_json(&app, get("/sessions/c")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["state"], "generating");
    assert_eq!(snapshot["processing"], true);

    release.notify_one();
    let (status, _) = first.await.unwrap();
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_delete_twice_is_200() {
    let h = harness(ScriptedInference::new(vec![Scripted::Buffer(OUTPUT)]));
    let app = app(&h);

    let (status, _) =
        send(&app, generate_request("d", json!({ "prompt": "cat", "model": "flux" }))).await;
    assert_eq!(status, StatusCode::OK);

    let delete = || {
        Request::builder()
            .method(Method::DELETE)
            .uri("/sessions/d")
            .body(Body::empty())
            .unwrap()
    };
    let (first, body) = send_json(&app, delete()).await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (second, _) = send(
        &app,
        Request::builder()
            .method(Method::POST)
            .uri("/sessions/d/delete")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(second, StatusCode::OK);

    assert!(h.results.is_empty());
    let (status, _) = send(&app, get("/sessions/d/generated")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, get("/sessions/d")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, images) = send_json(&app, get("/sessions/d/images")).await;
    assert_eq!(images["keys"], json!([]));
}

#[tokio::test]
async fn test_health() {
    let h = harness(ScriptedInference::new(vec![]));
    let (status, body) = send(&app(&h), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}
