//! Routing layer: forwards each inbound request to a randomly selected
//! active instance.
//!
//! Pure I/O plumbing around [`RotationController::select_instance`];
//! the proxy holds no pool state of its own. `NoAvailableInstance` maps
//! to 503, an unreachable upstream to 502.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::Router;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::controller::{RotationController, SelectError};
use crate::orchestrator::Orchestrator;

/// Cap on buffered request bodies (the demo webapp caps uploads lower).
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Shared proxy state.
pub struct ProxyState<O: Orchestrator> {
    controller: Arc<RotationController<O>>,
    client: reqwest::Client,
}

impl<O: Orchestrator> Clone for ProxyState<O> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            client: self.client.clone(),
        }
    }
}

/// Build the proxy router.
pub fn router<O: Orchestrator + 'static>(controller: Arc<RotationController<O>>) -> Router {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .expect("Failed to build HTTP client");

    Router::new()
        .fallback(forward::<O>)
        .with_state(ProxyState { controller, client })
}

/// Forward one request to a selected instance and relay the response.
async fn forward<O: Orchestrator + 'static>(
    State(state): State<ProxyState<O>>,
    request: Request,
) -> Response {
    let instance = match state.controller.select_instance().await {
        Ok(instance) => instance,
        Err(SelectError::NoAvailableInstance) => {
            warn!("No available instance, returning 503");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "no available instance" })),
            )
                .into_response();
        }
    };

    let (parts, body) = request.into_parts();
    let path_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("http://{}{}", instance.address, path_query);
    debug!(instance = %instance.id, url = %url, "Routing request");

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to read request body");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let mut upstream = state.client.request(parts.method, url);
    for (name, value) in &parts.headers {
        // The upstream sees its own Host; everything else is relayed.
        if name != header::HOST {
            upstream = upstream.header(name, value);
        }
    }

    match upstream.body(body).send().await {
        Ok(response) => {
            let status = response.status();
            let headers = response.headers().clone();
            let bytes = response.bytes().await.unwrap_or_default();

            let mut builder = Response::builder().status(status);
            for (name, value) in &headers {
                if name == header::TRANSFER_ENCODING || name == header::CONNECTION {
                    continue;
                }
                builder = builder.header(name, value);
            }
            builder
                .body(Body::from(bytes))
                .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
        }
        Err(e) => {
            error!(instance = %instance.id, error = %e, "Upstream request failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": "upstream request failed" })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::orchestrator::MockOrchestrator;
    use axum::routing::get;
    use mtd_pool::{GenerationLabel, Instance};
    use tower::ServiceExt;

    fn test_config() -> Config {
        Config {
            replicas: 1,
            rotation_interval: Duration::from_secs(3000),
            grace_period: Duration::ZERO,
            namespace: "default".to_string(),
            label_selector: "app=webapp".to_string(),
            template_deployment: "webapp".to_string(),
            service_name: "webapp-service".to_string(),
            graceful_rotation: true,
            provision_timeout: Duration::ZERO,
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            app_port: 8080,
            decoys: 0,
            dns: None,
            kube_api_url: "http://127.0.0.1:6443".to_string(),
            kube_token: None,
            log_level: "debug".to_string(),
        }
    }

    async fn spawn_backend() -> std::net::SocketAddr {
        let app = Router::new().route("/ping", get(|| async { "pong from backend" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_forwards_to_selected_instance() {
        let backend = spawn_backend().await;

        let mock = Arc::new(MockOrchestrator::new());
        let label = GenerationLabel::from_observed("g1");
        mock.seed_instances(
            &label,
            vec![Instance::new("pod-0", backend, label.clone())],
        );

        let controller = Arc::new(RotationController::new(Arc::clone(&mock), &test_config()));
        let app = router(controller);

        let response = app
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"pong from backend");
    }

    #[tokio::test]
    async fn test_no_instances_maps_to_503() {
        let mock = Arc::new(MockOrchestrator::new());
        let controller = Arc::new(RotationController::new(mock, &test_config()));
        let app = router(controller);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_maps_to_502() {
        let mock = Arc::new(MockOrchestrator::new());
        let label = GenerationLabel::from_observed("g1");
        // A port nothing listens on.
        mock.seed_instances(
            &label,
            vec![Instance::new(
                "pod-0",
                "127.0.0.1:1".parse().unwrap(),
                label.clone(),
            )],
        );

        let controller = Arc::new(RotationController::new(mock, &test_config()));
        let app = router(controller);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
