//! `POST /graph`: JSON `{ query, variables?, operationName? }` in,
//! `{ data, errors? }` out.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::{assumed_version, AppState};
use crate::adapter::ProtocolAdapter;
use crate::graph::response::GRAPH_PARSE_FAILED;
use crate::graph::{GraphError, GraphRequest, GraphResponse};

/// Envelope errors that never reach the adapter keep the extractor's
/// status (400, or 413 for an oversized body); anything the
/// adapter answered is a 200, with failures in `errors`.
pub async fn graph_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<GraphRequest>, JsonRejection>,
) -> Response {
    let mut request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return envelope_error(rejection.status(), rejection.body_text()),
    };
    match assumed_version(&headers) {
        Ok(version) => request.schema_version = version,
        Err(message) => return envelope_error(StatusCode::BAD_REQUEST, message),
    }

    Json(state.graph.handle(request).await).into_response()
}

fn envelope_error(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(GraphResponse::failed(GraphError::new(GRAPH_PARSE_FAILED, message))),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::header::CONTENT_TYPE;
    use axum::http::Request;
    use axum::routing::post;
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::network::handlers::testing::app_state;

    async fn post_graph(body: &str) -> (StatusCode, Value) {
        let router = Router::new()
            .route("/graph", post(graph_handler))
            .with_state(app_state().await);
        let response = router
            .oneshot(
                Request::post("/graph")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn query_round_trip() {
        let (status, body) = post_graph(r#"{"query": "{ schema { builtAgainst } }"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"data": {"schema": {"builtAgainst": 2}}}));
    }

    #[tokio::test]
    async fn not_found_is_a_field_error() {
        let (status, body) = post_graph(r#"{"query": "{ user(id: 9) { name } }"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], Value::Null);
        assert_eq!(body["errors"][0]["extensions"]["code"], "NOT_FOUND");
        assert_eq!(body["errors"][0]["path"], json!(["user"]));
    }

    #[tokio::test]
    async fn malformed_envelope_is_bad_request() {
        let (status, body) = post_graph(r#"{"variables": {}}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["extensions"]["code"], GRAPH_PARSE_FAILED);
    }
}
