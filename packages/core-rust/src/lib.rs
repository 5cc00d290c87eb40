//! Twinport core: entity values, schema history, domain requests and errors.

pub mod clock;
pub mod entity;
pub mod error;
pub mod money;
pub mod request;
pub mod schema;
pub mod types;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, ErrorKind};
pub use request::{
    Access, AccountStateChange, DomainRequest, OperationResult, ProtocolOrigin, UserFilter,
};
pub use schema::{
    baseline_migrations, EntitySchema, FieldDef, FieldRef, Migration, SchemaChange, SchemaError,
    SchemaHistory, SchemaSnapshot, SchemaVersion, BUILT_AGAINST,
};
pub use types::{EntityId, EntityKind, FieldType, Value};
