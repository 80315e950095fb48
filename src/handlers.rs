use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

use crate::metrics::{ErrorLabels, InjectorMetrics, OutcomeLabels};
use crate::webhook::{Outcome, Webhook};

pub struct AppState {
    pub webhook: Webhook,
    pub metrics: InjectorMetrics,
}

pub type SharedState = Arc<AppState>;

pub async fn handle_mutate(State(state): State<SharedState>, body: Bytes) -> Response {
    let start = Instant::now();
    debug!(body = %String::from_utf8_lossy(&body), "admission request body");

    let mutation = state.webhook.mutate(&body).await;
    record_metrics(&state, mutation.outcome, start);

    match serde_json::to_vec(&mutation.review) {
        Ok(json) => ([(header::CONTENT_TYPE, "application/json")], json).into_response(),
        Err(e) => {
            error!(code = 500, "failed to encode admission review: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to encode admission review: {e}"),
            )
                .into_response()
        }
    }
}

fn record_metrics(state: &AppState, outcome: Outcome, start: Instant) {
    state
        .metrics
        .admission_requests_total
        .get_or_create(&OutcomeLabels {
            outcome: outcome.as_str(),
        })
        .inc();

    if let Outcome::Rejected(kind) = outcome {
        state
            .metrics
            .admission_errors_total
            .get_or_create(&ErrorLabels {
                kind: kind.as_str(),
            })
            .inc();
    }

    state
        .metrics
        .admission_request_duration_seconds
        .observe(start.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::post;
    use prometheus_client::registry::Registry;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::config::SidecarConfig;
    use crate::sidecar::testing::StaticConfigLookup;

    const REQUEST: &str = include_str!("../testdata/admission-review-request.json");

    fn router(lookup: StaticConfigLookup) -> (SharedState, Router) {
        let mut registry = Registry::default();
        let state = Arc::new(AppState {
            webhook: Webhook::new(Arc::new(lookup), &SidecarConfig::default()),
            metrics: InjectorMetrics::new(&mut registry),
        });
        let router = Router::new()
            .route("/mutate", post(handle_mutate))
            .with_state(state.clone());
        (state, router)
    }

    async fn post_mutate(router: Router, body: impl Into<Body>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/mutate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_handle_mutate_injects() {
        let (state, router) = router(StaticConfigLookup::with_sidecar());

        let (status, review) = post_mutate(router, REQUEST).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(review["response"]["allowed"], true);
        assert_eq!(review["response"]["patchType"], "JSONPatch");
        let bytes: Vec<u8> = serde_json::from_value(review["response"]["patch"].clone()).unwrap();
        let patch: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            patch,
            json!([
                {
                    "op": "add",
                    "path": "/spec/containers/-",
                    "value": {"name": "envoy", "image": "envoy:v1"}
                },
                {
                    "op": "add",
                    "path": "/metadata/annotations",
                    "value": {"sidecar.example.org/inject": "false"}
                }
            ])
        );
        assert_eq!(
            state
                .metrics
                .admission_requests_total
                .get_or_create(&OutcomeLabels { outcome: "injected" })
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_handle_mutate_reports_lookup_failure_in_body() {
        let (state, router) = router(StaticConfigLookup::default());

        let (status, review) = post_mutate(router, REQUEST).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(review["response"]["allowed"], false);
        assert_eq!(review["response"]["uid"], "0df28fbd-5f5f-11e8-bc74-36e6bb280816");
        assert!(!review["response"]["status"]["message"].as_str().unwrap().is_empty());
        assert_eq!(
            state
                .metrics
                .admission_errors_total
                .get_or_create(&ErrorLabels { kind: "sidecar_lookup" })
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_handle_mutate_malformed_body_is_ok() {
        let (_, router) = router(StaticConfigLookup::with_sidecar());

        let (status, review) = post_mutate(router, "{\"request\":").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(review["response"]["allowed"], false);
    }
}
