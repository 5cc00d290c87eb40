//! Stored domain entities.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::schema::{EntitySchema, SchemaVersion};
use crate::types::{EntityId, EntityKind, Value};

/// A persisted record.
///
/// `revision` starts at 1 on insert and increments on every committed
/// update; the store compares it at commit to detect write-write conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub id: EntityId,
    pub schema_version: SchemaVersion,
    pub revision: u64,
    pub fields: BTreeMap<String, Value>,
}

impl Entity {
    #[must_use]
    pub fn get(&self, field: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.fields.get(field).unwrap_or(&NULL)
    }

    /// Text field, or `Internal` if the stored row lacks it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Internal` when the field is missing or not text.
    pub fn text(&self, field: &str) -> Result<&str, DomainError> {
        self.get(field)
            .as_text()
            .ok_or_else(|| self.corrupt(field, "text"))
    }

    /// Int or timestamp field.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Internal` when the field is missing or not
    /// numeric.
    pub fn int(&self, field: &str) -> Result<i64, DomainError> {
        self.get(field)
            .as_int()
            .ok_or_else(|| self.corrupt(field, "int"))
    }

    /// Reference field.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Internal` when the field is missing or not a
    /// reference.
    pub fn reference(&self, field: &str) -> Result<EntityId, DomainError> {
        self.get(field)
            .as_ref_id()
            .ok_or_else(|| self.corrupt(field, "ref"))
    }

    /// Nullable timestamp field.
    #[must_use]
    pub fn opt_timestamp(&self, field: &str) -> Option<i64> {
        self.get(field).as_int()
    }

    /// Returns this entity as seen through `schema`.
    #[must_use]
    pub fn projected(mut self, schema: &EntitySchema) -> Self {
        self.fields = schema.project(&self.fields);
        self
    }

    fn corrupt(&self, field: &str, expected: &str) -> DomainError {
        DomainError::internal(format!(
            "{} {} field {field} is not {expected}",
            self.kind, self.id
        ))
    }
}
