use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a stored entity. Assigned once, never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The entity kinds stored by the service. Each kind maps to one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Users,
    Accounts,
    Transfers,
}

impl EntityKind {
    /// All kinds, in table creation order.
    pub const ALL: [EntityKind; 3] = [Self::Users, Self::Accounts, Self::Transfers];

    /// Table name of this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Accounts => "accounts",
            Self::Transfers => "transfers",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    Bool,
    Int,
    Text,
    /// Milliseconds since the Unix epoch.
    Timestamp,
    /// Reference to another entity by id.
    Ref(EntityKind),
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::Text => f.write_str("text"),
            Self::Timestamp => f.write_str("timestamp"),
            Self::Ref(kind) => write!(f, "ref({kind})"),
        }
    }
}

/// Runtime value of a single entity field.
///
/// Serializes to `MsgPack` via `rmp-serde` for persistence and renders to
/// JSON for the graph surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Timestamp(i64),
    Ref(EntityId),
}

impl Value {
    /// Whether this value may be stored in a field of type `ty`.
    ///
    /// `Null` conforms to every type; required-ness is checked separately.
    #[must_use]
    pub fn conforms_to(&self, ty: FieldType) -> bool {
        matches!(
            (self, ty),
            (Self::Null, _)
                | (Self::Bool(_), FieldType::Bool)
                | (Self::Int(_), FieldType::Int)
                | (Self::Text(_), FieldType::Text)
                | (Self::Timestamp(_), FieldType::Timestamp)
                | (Self::Ref(_), FieldType::Ref(_))
        )
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) | Self::Timestamp(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_ref_id(&self) -> Option<EntityId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Plain JSON rendering: refs become their numeric id, timestamps stay
    /// as epoch milliseconds.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(n) | Self::Timestamp(n) => serde_json::Value::from(*n),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Ref(id) => serde_json::Value::from(id.0),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<EntityId> for Value {
    fn from(id: EntityId) -> Self {
        Self::Ref(id)
    }
}
