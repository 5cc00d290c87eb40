//! Graph query surface.
//!
//! A text document is parsed and validated against the type model before
//! anything touches the store; the chosen operation then runs as a single
//! unit of work, so every field it resolves shares one scope. Query roots
//! fail independently; a failing mutation root fails the request.

pub mod document;
pub mod executor;
pub mod parser;
pub mod plan;
pub mod response;
pub mod types;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value as Json};
use tracing::{debug, error};
use twinport_core::{ProtocolOrigin, SchemaVersion};

pub use self::executor::{GraphOutcome, GraphWork};
pub use self::response::{GraphError, GraphResponse, PathSegment};
use self::response::GRAPH_PARSE_FAILED;
use crate::adapter::{ProtocolAdapter, Translation};
use crate::service::{OperationError, OperationPipeline};

/// The JSON body of `POST /graph`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Option<Map<String, Json>>,
    #[serde(default)]
    pub operation_name: Option<String>,
    /// Taken from the `schema-version` header, not the body.
    #[serde(skip)]
    pub schema_version: Option<SchemaVersion>,
}

/// The graph protocol adapter.
pub struct GraphAdapter {
    pipeline: OperationPipeline,
}

impl GraphAdapter {
    #[must_use]
    pub fn new(pipeline: OperationPipeline) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl ProtocolAdapter for GraphAdapter {
    type Request = GraphRequest;
    type Work = GraphWork;
    type Response = GraphResponse;

    fn origin(&self) -> ProtocolOrigin {
        ProtocolOrigin::Graph
    }

    fn pipeline(&self) -> &OperationPipeline {
        &self.pipeline
    }

    fn translate_request(&self, request: GraphRequest) -> Translation<GraphWork, GraphResponse> {
        let document = match parser::parse(&request.query) {
            Ok(doc) => doc,
            Err(e) => {
                debug!(error = %e, "graph document rejected");
                return Translation::Respond(GraphResponse::failed(
                    GraphError::new(GRAPH_PARSE_FAILED, e.message).at(e.pos),
                ));
            }
        };

        let variables = request.variables.unwrap_or_default();
        match plan::plan(&document, request.operation_name.as_deref(), &variables) {
            Ok(plan) => Translation::Dispatch {
                assumed_version: request.schema_version,
                work: GraphWork::new(plan),
            },
            Err(e) => {
                debug!(error = %e, "graph document failed validation");
                Translation::Respond(GraphResponse::failed(e.into()))
            }
        }
    }

    fn translate_result(&self, outcome: GraphOutcome) -> GraphResponse {
        GraphResponse {
            data: outcome.data.map_or(Json::Null, Json::Object),
            errors: outcome.errors,
        }
    }

    fn translate_error(&self, e: &OperationError) -> GraphResponse {
        let error = match e {
            OperationError::Domain(domain) => GraphError::from_domain(domain),
            OperationError::Internal(inner) => {
                error!(error = %inner, "graph operation failed");
                GraphError::new("INTERNAL", "internal error")
            }
            other => GraphError::new(other.outcome(), other.to_string()),
        };
        GraphResponse::failed(error)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use twinport_core::SystemClock;

    use super::*;
    use crate::schema::SchemaRegistry;
    use crate::service::{DomainRouter, Dispatcher, ServerConfig, TransactionCoordinator};
    use crate::storage::datastores::{MemoryLedger, NullDataStore};
    use crate::storage::{IsolationLevel, Store};

    async fn adapter() -> GraphAdapter {
        let schema = Arc::new(SchemaRegistry::new(Arc::new(MemoryLedger::baseline())));
        schema.refresh().await.unwrap();
        let coordinator = Arc::new(TransactionCoordinator::new(
            Arc::new(Store::new(Arc::new(NullDataStore))),
            IsolationLevel::Snapshot,
        ));
        let dispatcher = Dispatcher::new(
            schema,
            coordinator,
            Arc::new(DomainRouter::with_default_services()),
            Arc::new(SystemClock),
        );
        GraphAdapter::new(OperationPipeline::new(
            dispatcher,
            Arc::new(ServerConfig::default()),
        ))
    }

    async fn query(graph: &GraphAdapter, query: &str, variables: Json) -> GraphResponse {
        graph
            .handle(GraphRequest {
                query: query.into(),
                variables: variables.as_object().cloned(),
                ..GraphRequest::default()
            })
            .await
    }

    fn counts(graph: &GraphAdapter) -> (u64, u64) {
        let stats = graph.pipeline().dispatcher().coordinator().stats();
        (stats.commits(), stats.rollbacks())
    }

    #[tokio::test]
    async fn mutation_then_query() {
        let graph = adapter().await;
        let created = query(
            &graph,
            "mutation ($name: String!, $email: String!) {
               u: createUser(name: $name, email: $email) { id name }
               a: openAccount(userId: 1, name: \"main\") { id balance owner { email } }
             }",
            json!({"name": "Ada", "email": "ada@bank.io"}),
        )
        .await;
        assert!(created.errors.is_empty(), "{:?}", created.errors);
        assert_eq!(
            created.data,
            json!({
                "u": {"id": 1, "name": "Ada"},
                "a": {"id": 1, "balance": "0.00", "owner": {"email": "ada@bank.io"}}
            })
        );

        let read = query(&graph, "{ user(id: 1) { email accounts { name } } }", Json::Null).await;
        assert_eq!(
            read.data,
            json!({"user": {"email": "ada@bank.io", "accounts": [{"name": "main"}]}})
        );
        assert_eq!(counts(&graph), (2, 0));
    }

    #[tokio::test]
    async fn failing_mutation_root_rolls_back_everything() {
        let graph = adapter().await;
        let resp = query(
            &graph,
            "mutation {
               createUser(name: \"Ada\", email: \"ada@bank.io\") { id }
               openAccount(userId: 42, name: \"main\") { id }
             }",
            Json::Null,
        )
        .await;
        assert_eq!(resp.data, Json::Null);
        assert_eq!(resp.errors.len(), 1);
        assert_eq!(resp.errors[0].code(), "NOT_FOUND");
        assert_eq!(counts(&graph), (0, 1));

        let users = query(&graph, "{ users { id } }", Json::Null).await;
        assert_eq!(users.data, json!({"users": []}));
    }

    #[tokio::test]
    async fn validation_failure_is_field_scoped_and_commits() {
        let graph = adapter().await;
        query(
            &graph,
            "mutation { createUser(name: \"Ada\", email: \"ada@bank.io\") { id } }",
            Json::Null,
        )
        .await;

        let resp = query(
            &graph,
            "{ ok: userByEmail(email: \"ada@bank.io\") { name } bad: userByEmail(email: \"nope\") { name } }",
            Json::Null,
        )
        .await;
        assert_eq!(resp.data, json!({"ok": {"name": "Ada"}, "bad": null}));
        assert_eq!(resp.errors.len(), 1);
        assert_eq!(resp.errors[0].code(), "VALIDATION_FAILED");
        assert_eq!(resp.errors[0].path, vec![PathSegment::Key("bad".into())]);
        assert_eq!(counts(&graph), (2, 0));
    }

    #[tokio::test]
    async fn invalid_documents_open_no_scope() {
        let graph = adapter().await;
        let parse = query(&graph, "{ user(id: 1) {", Json::Null).await;
        assert_eq!(parse.errors[0].code(), GRAPH_PARSE_FAILED);

        let invalid = query(&graph, "{ user(id: 1) { password } }", Json::Null).await;
        assert_eq!(invalid.errors[0].code(), "GRAPH_VALIDATION_FAILED");
        assert_eq!(invalid.data, Json::Null);

        assert_eq!(counts(&graph), (0, 0));
    }

    #[tokio::test]
    async fn bad_amount_fails_the_mutation() {
        let graph = adapter().await;
        let resp = query(
            &graph,
            "mutation { transfer(fromAccountId: 1, toAccountId: 2, amount: \"ten\") { id } }",
            Json::Null,
        )
        .await;
        assert_eq!(resp.errors[0].code(), "VALIDATION_FAILED");
        assert_eq!(counts(&graph), (0, 1));
    }

    #[tokio::test]
    async fn schema_root() {
        let graph = adapter().await;
        let resp = query(&graph, "{ schema { builtAgainst active __typename } }", Json::Null).await;
        assert_eq!(
            resp.data,
            json!({"schema": {"builtAgainst": 2, "active": 2, "__typename": "SchemaInfo"}})
        );
    }
}
