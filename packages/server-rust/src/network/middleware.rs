//! HTTP middleware for the Twinport server.
//!
//! Layers are listed outer to inner: the first layer sees the request
//! first and the response last.

use axum::extract::{Request, State};
use axum::http::header::HeaderName;
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use super::config::NetworkConfig;
use super::handlers::AppState;

type HttpLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        TimeoutLayer,
        tower::layer::util::Stack<
            CorsLayer,
            tower::layer::util::Stack<
                CompressionLayer,
                tower::layer::util::Stack<
                    TraceLayer<
                        tower_http::classify::SharedClassifier<
                            tower_http::classify::ServerErrorsAsFailures,
                        >,
                    >,
                    tower::layer::util::Stack<
                        SetRequestIdLayer<MakeRequestUuid>,
                        tower::layer::util::Identity,
                    >,
                >,
            >,
        >,
    >,
>;

/// Transport-level stack applied to every route.
///
/// 1. `SetRequestId`: UUID `x-request-id` on every request
/// 2. `Trace`: request/response spans
/// 3. `Compression`: gzip responses
/// 4. `CORS` from the configured origins
/// 5. `Timeout`: 408 once `request_timeout` passes
/// 6. `PropagateRequestId`: echo `x-request-id` on the response
///
/// The body limit is enforced by the extractors (`DefaultBodyLimit` on the
/// router), so every layer here sees the router's own body type.
///
/// Operation-level concerns (load shedding, operation timeout, metrics)
/// live in the service pipeline, not here.
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    let x_request_id = HeaderName::from_static("x-request-id");

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(build_cors_layer(&config.cors_origins))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

/// `"*"` allows any origin; otherwise only the parseable listed origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Admits API requests while the server is serving and holds an in-flight
/// guard until the response is produced. Once draining, new requests get
/// 503 so the drain can finish.
pub async fn admission(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(_guard) = state.shutdown.try_admit() else {
        debug!(path = %request.uri().path(), "refusing request while draining");
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    };
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    use super::*;
    use crate::network::handlers::testing::app_state;

    #[test]
    fn layers_build_from_defaults() {
        let _layers = build_http_layers(&NetworkConfig::default());
    }

    #[test]
    fn layers_build_with_custom_settings() {
        let config = NetworkConfig {
            request_timeout: Duration::from_secs(5),
            max_body_bytes: 512,
            cors_origins: vec!["http://localhost:3000".to_string(), "not a url\n".to_string()],
            ..NetworkConfig::default()
        };
        let _layers = build_http_layers(&config);
    }

    fn guarded(state: AppState) -> Router {
        Router::new()
            .route(
                "/guarded",
                get(|State(s): State<AppState>| async move { s.shutdown.in_flight_count().to_string() }),
            )
            .route_layer(axum::middleware::from_fn_with_state(state.clone(), admission))
            .with_state(state)
    }

    #[tokio::test]
    async fn admitted_requests_are_counted() {
        let state = app_state().await;
        state.shutdown.set_ready();
        let response = guarded(state.clone())
            .oneshot(axum::http::Request::get("/guarded").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], b"1");
        assert_eq!(state.shutdown.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn draining_server_refuses_requests() {
        let state = app_state().await;
        state.shutdown.set_ready();
        state.shutdown.trigger_shutdown();
        let response = guarded(state)
            .oneshot(axum::http::Request::get("/guarded").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
