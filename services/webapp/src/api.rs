//! HTTP routes for the demo backend.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::files::SAMPLE_FILES;
use crate::state::{AppState, PodInfo};

/// Uploads larger than this are rejected with 413.
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(hello))
        .route("/login/{name}", put(login))
        .route("/files", get(list_files))
        .route("/download/{name}", get(download))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct Greeting<'a> {
    message: String,
    pod_info: &'a PodInfo,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_body(message: impl Into<String>) -> Json<ErrorBody> {
    Json(ErrorBody {
        error: message.into(),
    })
}

/// Extract the session id from the Cookie header, if any.
fn session_id(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        (key == "session_id").then(|| value.to_string())
    })
}

/// File names must be plain names, no separators or parent references.
fn sanitize_name(name: &str) -> Option<&str> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return None;
    }
    Some(name)
}

async fn hello(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let user = session_id(&headers).and_then(|id| state.session_user(&id));
    let message = match user {
        Some(user) => format!("Hello {user}"),
        None => "Hello stranger".to_string(),
    };
    Json(Greeting {
        message,
        pod_info: state.pod_info(),
    })
    .into_response()
}

async fn login(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let existing = session_id(&headers);
    let session_id = state.login(&name, existing.as_deref());
    info!(user = %name, "Session established");

    let cookie = format!("session_id={session_id}; HttpOnly; SameSite=Strict");
    (
        StatusCode::ACCEPTED,
        [(header::SET_COOKIE, cookie)],
        Json(Greeting {
            message: format!("Welcome {name}"),
            pod_info: state.pod_info(),
        }),
    )
        .into_response()
}

#[derive(Serialize)]
struct FileEntry {
    name: String,
    size: u64,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct FileListing {
    files: Vec<FileEntry>,
}

async fn list_files(State(state): State<AppState>) -> Response {
    let mut files = Vec::new();

    for (name, _) in SAMPLE_FILES {
        let path = state.download_dir().join(name);
        if let Ok(meta) = tokio::fs::metadata(&path).await {
            files.push(FileEntry {
                name: name.to_string(),
                size: meta.len(),
                kind: "sample",
            });
        }
    }

    if let Ok(mut entries) = tokio::fs::read_dir(state.upload_dir()).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            files.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.len(),
                kind: "upload",
            });
        }
    }

    Json(FileListing { files }).into_response()
}

async fn download(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let Some(name) = sanitize_name(&name) else {
        return (StatusCode::BAD_REQUEST, error_body("invalid file name")).into_response();
    };

    // Samples first, then uploads.
    for dir in [state.download_dir(), state.upload_dir()] {
        let path = dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(data) => {
                return (
                    [
                        (
                            header::CONTENT_TYPE,
                            "application/octet-stream".to_string(),
                        ),
                        (
                            header::CONTENT_DISPOSITION,
                            format!("attachment; filename=\"{name}\""),
                        ),
                    ],
                    data,
                )
                    .into_response();
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => {
                warn!(file = %name, error = %err, "Failed to read file");
                return (StatusCode::INTERNAL_SERVER_ERROR, error_body("read failed"))
                    .into_response();
            }
        }
    }

    (StatusCode::NOT_FOUND, error_body("no such file")).into_response()
}

#[derive(Deserialize)]
struct UploadParams {
    name: String,
}

async fn upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let user = session_id(&headers).and_then(|id| state.session_user(&id));
    let Some(user) = user else {
        return (StatusCode::UNAUTHORIZED, error_body("login required")).into_response();
    };

    let Some(name) = sanitize_name(&params.name) else {
        return (StatusCode::BAD_REQUEST, error_body("invalid file name")).into_response();
    };

    if let Err(err) = tokio::fs::create_dir_all(state.upload_dir()).await {
        warn!(error = %err, "Failed to create upload dir");
        return (StatusCode::INTERNAL_SERVER_ERROR, error_body("upload failed")).into_response();
    }

    let path = state.upload_dir().join(name);
    if let Err(err) = tokio::fs::write(&path, &body).await {
        warn!(file = %name, error = %err, "Failed to store upload");
        return (StatusCode::INTERNAL_SERVER_ERROR, error_body("upload failed")).into_response();
    }

    info!(user = %user, file = %name, bytes = body.len(), "File uploaded");
    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "name": name, "size": body.len() })),
    )
        .into_response()
}

async fn health() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;

    fn temp_dirs() -> (PathBuf, PathBuf) {
        let base = std::env::temp_dir().join(format!("mtd-webapp-{}", Uuid::new_v4().simple()));
        let uploads = base.join("uploads");
        let downloads = base.join("downloads");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::create_dir_all(&downloads).unwrap();
        (uploads, downloads)
    }

    fn app() -> (Router, PathBuf, PathBuf) {
        let (uploads, downloads) = temp_dirs();
        let state = AppState::new(uploads.clone(), downloads.clone(), Duration::from_secs(60));
        (router(state), uploads, downloads)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn extract_cookie(response: &axum::response::Response) -> String {
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        cookie.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn hello_greets_strangers() {
        let (app, _, _) = app();

        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Hello stranger");
    }

    #[tokio::test]
    async fn login_sets_session_and_personalizes_greeting() {
        let (app, _, _) = app();

        let response = app
            .clone()
            .oneshot(Request::put("/login/alice").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let cookie = extract_cookie(&response);
        assert!(cookie.starts_with("session_id="));

        let response = app
            .oneshot(
                Request::get("/")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["message"], "Hello alice");
    }

    #[tokio::test]
    async fn upload_requires_session() {
        let (app, _, _) = app();

        let response = app
            .oneshot(
                Request::post("/upload?name=notes.txt")
                    .body(Body::from("hi"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn upload_then_download_round_trips() {
        let (app, _, _) = app();

        let login = app
            .clone()
            .oneshot(Request::put("/login/bob").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let cookie = extract_cookie(&login);

        let response = app
            .clone()
            .oneshot(
                Request::post("/upload?name=notes.txt")
                    .header(header::COOKIE, cookie)
                    .body(Body::from("rotation survives"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(
                Request::get("/download/notes.txt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"rotation survives");
    }

    #[tokio::test]
    async fn download_rejects_path_traversal() {
        let (app, _, _) = app();

        let response = app
            .oneshot(
                Request::get("/download/..%2Fsecrets")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn download_unknown_file_is_404() {
        let (app, _, _) = app();

        let response = app
            .oneshot(
                Request::get("/download/missing.txt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn files_lists_uploads() {
        let (app, uploads, _) = app();
        std::fs::write(uploads.join("report.txt"), b"data").unwrap();

        let response = app
            .oneshot(Request::get("/files").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let files = body["files"].as_array().unwrap();
        let report = files
            .iter()
            .find(|f| f["name"] == "report.txt")
            .expect("uploaded file listed");
        assert_eq!(report["size"], 4);
        assert_eq!(report["type"], "upload");
    }
}
