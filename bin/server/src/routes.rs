//! HTTP routes.

use crate::dispatch::DispatchRequest;
use crate::error::DispatchError;
use crate::server::SingleAppServer;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use keyhost_core::RequestId;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Builds the router for a server.
pub fn router(server: Arc<SingleAppServer>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/operations", get(list_operations))
        .route("/v1/operations/{name}", post(invoke_operation))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

async fn health(State(server): State<Arc<SingleAppServer>>) -> Json<JsonValue> {
    let application = server.application().map(|app| app.name().to_string());
    Json(json!({
        "status": "ok",
        "application": application,
    }))
}

async fn list_operations(State(server): State<Arc<SingleAppServer>>) -> Response {
    let Some(app) = server.application() else {
        return DispatchError::NoApplication.into_response();
    };

    let operations: Vec<_> = app.operations().collect();
    Json(json!({
        "application": app.name(),
        "service": app.integration().service_name(),
        "operations": operations,
    }))
    .into_response()
}

async fn invoke_operation(
    State(server): State<Arc<SingleAppServer>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let request_id = RequestId::new();

    let arguments = if body.iter().all(u8::is_ascii_whitespace) {
        json!({})
    } else {
        match serde_json::from_slice::<JsonValue>(&body) {
            Ok(arguments) => arguments,
            Err(e) => {
                let body = json!({
                    "error": "invalid_json",
                    "message": format!("request body is not valid JSON: {e}"),
                    "request_id": request_id.to_string(),
                });
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
        }
    };

    let request = DispatchRequest {
        request_id,
        operation: name,
        arguments,
    };

    // Dropping this future (client went away) cancels the dispatch if the
    // handler has not started yet.
    match server
        .dispatch_request(request, std::future::pending())
        .await
    {
        Ok(result) => Json(json!({
            "request_id": request_id.to_string(),
            "result": result,
        }))
        .into_response(),
        Err(e) => {
            let body = json!({
                "error": e.code(),
                "message": e.public_message(),
                "request_id": request_id.to_string(),
            });
            (e.status_code(), Json(body)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::{fixture, jira_secret};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use keyhost_integration::MemoryCredentialStore;
    use std::net::SocketAddr;
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, JsonValue) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_application() {
        let f = fixture(jira_secret());
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let (status, body) = send(router(f.server), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["application"], "jira");
    }

    #[tokio::test]
    async fn lists_operations_in_declaration_order() {
        let f = fixture(jira_secret());
        let request = Request::builder()
            .uri("/v1/operations")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(router(f.server), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "jira");
        let names: Vec<_> = body["operations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|op| op["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["createIssue", "ping", "revoked"]);
        assert_eq!(body["operations"][1]["requires_credential"], false);
    }

    #[tokio::test]
    async fn list_without_application_is_unavailable() {
        let server = Arc::new(SingleAppServer::new(SocketAddr::from(([127, 0, 0, 1], 0))));
        let request = Request::builder()
            .uri("/v1/operations")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(router(server), request).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "no_application");
    }

    #[tokio::test]
    async fn invokes_operation() {
        let f = fixture(jira_secret());

        let (status, body) = send(
            router(f.server),
            post_json("/v1/operations/createIssue", r#"{"summary":"Disk full"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["key"], "OPS-1");
        assert!(body["request_id"].as_str().unwrap().starts_with("req_"));
    }

    #[tokio::test]
    async fn missing_credential_is_unauthorized() {
        let f = fixture(MemoryCredentialStore::new());

        let (status, body) = send(
            router(f.server),
            post_json("/v1/operations/createIssue", r#"{"summary":"Disk full"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "authentication_required");
        assert_eq!(f.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_body_means_no_arguments() {
        let f = fixture(MemoryCredentialStore::new());

        let (status, body) = send(router(f.server), post_json("/v1/operations/ping", "")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "pong");
        assert_eq!(f.store.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let f = fixture(jira_secret());

        let (status, body) = send(
            router(f.server),
            post_json("/v1/operations/createIssue", "{not json"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_json");
        assert_eq!(f.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_operation_is_not_found() {
        let f = fixture(jira_secret());

        let (status, body) = send(
            router(f.server),
            post_json("/v1/operations/deleteEverything", "{}"),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "unknown_operation");
    }
}
