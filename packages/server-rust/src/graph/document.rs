//! Parsed graph query documents.

use std::fmt;

/// `query` or `mutation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
        }
    }
}

/// Line and column (both 1-based) of a token in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub operations: Vec<OperationDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationDef {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variables: Vec<VariableDef>,
    pub selection: Vec<Field>,
    pub pos: Pos,
}

/// `$name: Type = default`
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDef {
    pub name: String,
    pub ty: TypeRef,
    pub default: Option<InputValue>,
    pub pos: Pos,
}

/// A declared variable type such as `Int!` or `[Int!]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    #[must_use]
    pub fn is_non_null(&self) -> bool {
        matches!(self, Self::NonNull(_))
    }

    /// The type with any outer `!` removed.
    #[must_use]
    pub fn nullable(&self) -> &TypeRef {
        match self {
            Self::NonNull(inner) => inner,
            other => other,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::List(inner) => write!(f, "[{inner}]"),
            Self::NonNull(inner) => write!(f, "{inner}!"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<(String, InputValue)>,
    pub selection: Vec<Field>,
    pub pos: Pos,
}

impl Field {
    /// Key under which the field appears in the response.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// An argument value as written in the document.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Null,
    Int(i64),
    String(String),
    Bool(bool),
    List(Vec<InputValue>),
    Variable(String),
}
