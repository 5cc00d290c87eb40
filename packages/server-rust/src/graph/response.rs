//! Graph response envelope: `{ data, errors }`.

use serde::{Deserialize, Serialize};
use tracing::error;
use twinport_core::DomainError;

use super::document::Pos;

pub const GRAPH_PARSE_FAILED: &str = "GRAPH_PARSE_FAILED";
pub const GRAPH_VALIDATION_FAILED: &str = "GRAPH_VALIDATION_FAILED";

/// One step of a response path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl From<Pos> for Location {
    fn from(pos: Pos) -> Self {
        Self {
            line: pos.line,
            column: pos.column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorExtensions {
    pub code: String,
}

/// A request-level or field-level error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<PathSegment>,
    pub extensions: ErrorExtensions,
}

impl GraphError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: Vec::new(),
            extensions: ErrorExtensions {
                code: code.to_string(),
            },
        }
    }

    #[must_use]
    pub fn at(mut self, pos: Pos) -> Self {
        self.locations.push(pos.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = path;
        self
    }

    /// Renders a domain failure. `Internal` detail is logged, never
    /// returned.
    #[must_use]
    pub fn from_domain(e: &DomainError) -> Self {
        if let DomainError::Internal(detail) = e {
            error!(detail = %detail, "graph field failed internally");
        }
        Self::new(e.kind().as_str(), e.public_message())
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.extensions.code
    }
}

/// The JSON body returned by `POST /graph`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphResponse {
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphError>,
}

impl GraphResponse {
    /// A response with no data and a single error.
    #[must_use]
    pub fn failed(error: GraphError) -> Self {
        Self {
            data: serde_json::Value::Null,
            errors: vec![error],
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use twinport_core::{EntityId, EntityKind};

    use super::*;

    #[test]
    fn field_error_shape() {
        let err = GraphError::from_domain(&DomainError::not_found(EntityKind::Users, EntityId(9)))
            .at(Pos { line: 1, column: 3 })
            .with_path(vec!["b".into(), 0.into(), "owner".into()]);
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({
                "message": "users 9 not found",
                "locations": [{"line": 1, "column": 3}],
                "path": ["b", 0, "owner"],
                "extensions": {"code": "NOT_FOUND"}
            })
        );
    }

    #[test]
    fn internal_detail_is_hidden() {
        let err = GraphError::from_domain(&DomainError::internal("redb table missing"));
        assert_eq!(err.code(), "INTERNAL");
        assert!(!err.message.contains("redb"));
    }

    #[test]
    fn empty_errors_are_omitted() {
        let ok = GraphResponse {
            data: json!({"a": 1}),
            errors: Vec::new(),
        };
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"data": {"a": 1}}));
    }
}
