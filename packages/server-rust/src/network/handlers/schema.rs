//! `GET /schema`: the schema-version contract as JSON.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use twinport_core::BUILT_AGAINST;

use super::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaInfo {
    /// Version this build's adapters were written against.
    pub built_against: u32,
    /// Latest version in the cached ledger view; `null` before the first
    /// successful load.
    pub active: Option<u32>,
}

pub async fn schema_handler(State(state): State<AppState>) -> Json<SchemaInfo> {
    Json(SchemaInfo {
        built_against: BUILT_AGAINST.0,
        active: state.schema().active_version().map(|v| v.0),
    })
}
