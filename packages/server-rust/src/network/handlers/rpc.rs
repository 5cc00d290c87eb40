//! `POST /rpc/{method}`: `MsgPack` in, `MsgPack` out.
//!
//! The HTTP status is always 200 once the request reached the adapter; the
//! call's outcome travels in the `rpc-status` (numeric) and `rpc-message`
//! headers, the way gRPC carries status in trailers.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::debug;

use super::{assumed_version, AppState};
use crate::adapter::ProtocolAdapter;
use crate::rpc::{RpcCall, RpcResponse, RpcStatus};

pub const RPC_STATUS_HEADER: &str = "rpc-status";
pub const RPC_MESSAGE_HEADER: &str = "rpc-message";

const MSGPACK: &str = "application/msgpack";

pub async fn rpc_handler(
    State(state): State<AppState>,
    Path(method): Path<String>,
    headers: HeaderMap,
    payload: Bytes,
) -> Response {
    let schema_version = match assumed_version(&headers) {
        Ok(v) => v,
        Err(message) => {
            debug!(%method, "rejected rpc call: {message}");
            return render(&RpcResponse {
                status: RpcStatus::InvalidArgument,
                message,
                body: Bytes::new(),
            });
        }
    };

    let reply = state
        .rpc
        .handle(RpcCall {
            method,
            schema_version,
            payload,
        })
        .await;
    render(&reply)
}

fn render(reply: &RpcResponse) -> Response {
    let mut response = (StatusCode::OK, Body::from(reply.body.clone())).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(MSGPACK));
    headers.insert(RPC_STATUS_HEADER, HeaderValue::from(u16::from(reply.status.code())));
    if !reply.message.is_empty() {
        // Messages are ours or validation text; drop anything a header
        // cannot carry rather than fail the response.
        if let Ok(value) = HeaderValue::from_str(&sanitize(&reply.message)) {
            headers.insert(RPC_MESSAGE_HEADER, value);
        }
    }
    response
}

fn sanitize(message: &str) -> String {
    message
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect()
}
