//! Versioned entity schemas derived from the migration ledger.
//!
//! A [`SchemaHistory`] folds an ordered list of [`Migration`]s into one
//! [`SchemaSnapshot`] per version. The latest snapshot is the active shape;
//! older snapshots describe what a caller built against that version
//! expects, which is what write-path compatibility checks compare against.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::types::{EntityKind, FieldType, Value};

/// Comparable schema version tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaVersion(pub u32);

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Schema version both protocol surfaces are generated against.
pub const BUILT_AGAINST: SchemaVersion = SchemaVersion(2);

/// Definition of one field within an entity schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub ty: FieldType,
    /// Whether a non-null value must be present after defaults are applied.
    pub required: bool,
    /// Value used for rows written before the field existed, and for writes
    /// that omit it.
    pub default: Option<Value>,
}

impl FieldDef {
    #[must_use]
    pub fn required(ty: FieldType) -> Self {
        Self {
            ty,
            required: true,
            default: None,
        }
    }

    #[must_use]
    pub fn optional(ty: FieldType) -> Self {
        Self {
            ty,
            required: false,
            default: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// A field addressed by entity kind and name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub kind: EntityKind,
    pub field: &'static str,
}

impl FieldRef {
    #[must_use]
    pub const fn new(kind: EntityKind, field: &'static str) -> Self {
        Self { kind, field }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.field)
    }
}

/// Shape of one entity kind at one schema version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    pub kind: EntityKind,
    pub fields: BTreeMap<String, FieldDef>,
}

impl EntitySchema {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    /// Projects a stored row onto this shape: fields the schema no longer
    /// has are dropped, fields added since the row was written take their
    /// default (or null).
    #[must_use]
    pub fn project(&self, stored: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        self.fields
            .iter()
            .map(|(name, def)| {
                let value = stored
                    .get(name)
                    .cloned()
                    .or_else(|| def.default.clone())
                    .unwrap_or(Value::Null);
                (name.clone(), value)
            })
            .collect()
    }

    /// Normalizes a field set for a write at this version.
    ///
    /// # Errors
    ///
    /// - `SchemaMismatch` if the write carries a field this version lacks
    /// - `ValidationFailed` if a required field is null or a value has the
    ///   wrong type
    pub fn conform(
        &self,
        fields: BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>, DomainError> {
        if let Some(unknown) = fields.keys().find(|name| !self.fields.contains_key(*name)) {
            return Err(DomainError::SchemaMismatch(format!(
                "{}.{unknown} is not part of the active schema",
                self.kind
            )));
        }

        let mut out = BTreeMap::new();
        for (name, def) in &self.fields {
            let value = match fields.get(name) {
                Some(v) if !v.is_null() => v.clone(),
                _ => def.default.clone().unwrap_or(Value::Null),
            };
            if !value.conforms_to(def.ty) {
                return Err(DomainError::invalid(format!(
                    "{}.{name} expects {}",
                    self.kind, def.ty
                )));
            }
            if def.required && value.is_null() {
                return Err(DomainError::invalid(format!(
                    "{}.{name} is required",
                    self.kind
                )));
            }
            out.insert(name.clone(), value);
        }
        Ok(out)
    }
}

/// The complete entity shape at one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSnapshot {
    pub version: SchemaVersion,
    pub entities: BTreeMap<EntityKind, EntitySchema>,
}

impl SchemaSnapshot {
    #[must_use]
    pub fn entity(&self, kind: EntityKind) -> Option<&EntitySchema> {
        self.entities.get(&kind)
    }

    #[must_use]
    pub fn field(&self, field: FieldRef) -> Option<&FieldDef> {
        self.entity(field.kind).and_then(|e| e.field(field.field))
    }
}

/// A single shape change recorded by a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "change")]
pub enum SchemaChange {
    CreateEntity {
        kind: EntityKind,
        fields: Vec<(String, FieldDef)>,
    },
    AddField {
        kind: EntityKind,
        name: String,
        def: FieldDef,
    },
    RemoveField {
        kind: EntityKind,
        name: String,
    },
    RetypeField {
        kind: EntityKind,
        name: String,
        ty: FieldType,
    },
}

/// One applied migration, as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub version: SchemaVersion,
    pub description: String,
    pub changes: Vec<SchemaChange>,
}

/// Errors from folding a migration ledger into a history.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("migration ledger is empty")]
    Empty,
    #[error("migration {next} does not follow {prev}")]
    NonIncreasing {
        prev: SchemaVersion,
        next: SchemaVersion,
    },
    #[error("{version}: entity {kind} already exists")]
    DuplicateEntity {
        version: SchemaVersion,
        kind: EntityKind,
    },
    #[error("{version}: entity {kind} does not exist")]
    UnknownEntity {
        version: SchemaVersion,
        kind: EntityKind,
    },
    #[error("{version}: field {kind}.{name} already exists")]
    DuplicateField {
        version: SchemaVersion,
        kind: EntityKind,
        name: String,
    },
    #[error("{version}: field {kind}.{name} does not exist")]
    UnknownField {
        version: SchemaVersion,
        kind: EntityKind,
        name: String,
    },
    #[error("{version}: required field {kind}.{name} added without a default")]
    RequiredWithoutDefault {
        version: SchemaVersion,
        kind: EntityKind,
        name: String,
    },
}

/// All schema versions known from the ledger, oldest first.
#[derive(Debug, Clone)]
pub struct SchemaHistory {
    snapshots: BTreeMap<SchemaVersion, Arc<SchemaSnapshot>>,
    latest: Arc<SchemaSnapshot>,
}

impl SchemaHistory {
    /// Folds the ledger into one snapshot per version.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the ledger is empty, out of order, or
    /// describes an impossible change.
    pub fn from_migrations(migrations: &[Migration]) -> Result<Self, SchemaError> {
        let mut snapshots = BTreeMap::new();
        let mut entities: BTreeMap<EntityKind, EntitySchema> = BTreeMap::new();
        let mut prev: Option<SchemaVersion> = None;

        for migration in migrations {
            let version = migration.version;
            if let Some(prev) = prev {
                if version <= prev {
                    return Err(SchemaError::NonIncreasing { prev, next: version });
                }
            }
            for change in &migration.changes {
                apply_change(&mut entities, version, change)?;
            }
            snapshots.insert(
                version,
                Arc::new(SchemaSnapshot {
                    version,
                    entities: entities.clone(),
                }),
            );
            prev = Some(version);
        }

        let latest = snapshots
            .values()
            .next_back()
            .cloned()
            .ok_or(SchemaError::Empty)?;
        Ok(Self { snapshots, latest })
    }

    /// The active (highest) version.
    #[must_use]
    pub fn latest(&self) -> &Arc<SchemaSnapshot> {
        &self.latest
    }

    #[must_use]
    pub fn at(&self, version: SchemaVersion) -> Option<&Arc<SchemaSnapshot>> {
        self.snapshots.get(&version)
    }

    /// Checks that a write built against `assumed` can target the active
    /// version: every referenced field must still exist, with the type the
    /// caller assumed.
    ///
    /// An `assumed` version the ledger does not know (a client newer than
    /// this server) only requires the fields to exist.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SchemaMismatch` naming the first incompatible
    /// field.
    pub fn check_write(
        &self,
        assumed: SchemaVersion,
        fields: &[FieldRef],
    ) -> Result<(), DomainError> {
        let active = self.latest();
        let assumed_snapshot = self.at(assumed);

        for &field in fields {
            let Some(now) = active.field(field) else {
                return Err(DomainError::SchemaMismatch(format!(
                    "{field} (assumed {assumed}) does not exist in active schema {}",
                    active.version
                )));
            };
            if let Some(then) = assumed_snapshot.and_then(|s| s.field(field)) {
                if then.ty != now.ty {
                    return Err(DomainError::SchemaMismatch(format!(
                        "{field} changed from {} at {assumed} to {} at {}",
                        then.ty, now.ty, active.version
                    )));
                }
            }
        }
        Ok(())
    }
}

fn apply_change(
    entities: &mut BTreeMap<EntityKind, EntitySchema>,
    version: SchemaVersion,
    change: &SchemaChange,
) -> Result<(), SchemaError> {
    match change {
        SchemaChange::CreateEntity { kind, fields } => {
            if entities.contains_key(kind) {
                return Err(SchemaError::DuplicateEntity { version, kind: *kind });
            }
            entities.insert(
                *kind,
                EntitySchema {
                    kind: *kind,
                    fields: fields.iter().cloned().collect(),
                },
            );
        }
        SchemaChange::AddField { kind, name, def } => {
            let entity = entity_mut(entities, version, *kind)?;
            if entity.fields.contains_key(name) {
                return Err(SchemaError::DuplicateField {
                    version,
                    kind: *kind,
                    name: name.clone(),
                });
            }
            if def.required && def.default.is_none() {
                return Err(SchemaError::RequiredWithoutDefault {
                    version,
                    kind: *kind,
                    name: name.clone(),
                });
            }
            entity.fields.insert(name.clone(), def.clone());
        }
        SchemaChange::RemoveField { kind, name } => {
            let entity = entity_mut(entities, version, *kind)?;
            if entity.fields.remove(name).is_none() {
                return Err(SchemaError::UnknownField {
                    version,
                    kind: *kind,
                    name: name.clone(),
                });
            }
        }
        SchemaChange::RetypeField { kind, name, ty } => {
            let entity = entity_mut(entities, version, *kind)?;
            let Some(def) = entity.fields.get_mut(name) else {
                return Err(SchemaError::UnknownField {
                    version,
                    kind: *kind,
                    name: name.clone(),
                });
            };
            def.ty = *ty;
        }
    }
    Ok(())
}

fn entity_mut(
    entities: &mut BTreeMap<EntityKind, EntitySchema>,
    version: SchemaVersion,
    kind: EntityKind,
) -> Result<&mut EntitySchema, SchemaError> {
    entities
        .get_mut(&kind)
        .ok_or(SchemaError::UnknownEntity { version, kind })
}

/// Migrations every deployment starts from: the payments tables (v1) and
/// the account lifecycle columns (v2).
#[must_use]
pub fn baseline_migrations() -> Vec<Migration> {
    use FieldType::{Int, Ref, Text, Timestamp};

    let f = |name: &str, def: FieldDef| (name.to_string(), def);

    vec![
        Migration {
            version: SchemaVersion(1),
            description: "create users, accounts and transfers".to_string(),
            changes: vec![
                SchemaChange::CreateEntity {
                    kind: EntityKind::Users,
                    fields: vec![
                        f("name", FieldDef::required(Text)),
                        f("email", FieldDef::required(Text)),
                        f("created_at", FieldDef::required(Timestamp)),
                    ],
                },
                SchemaChange::CreateEntity {
                    kind: EntityKind::Accounts,
                    fields: vec![
                        f("user_id", FieldDef::required(Ref(EntityKind::Users))),
                        f("name", FieldDef::required(Text)),
                        f("balance", FieldDef::required(Int).with_default(Value::Int(0))),
                        f("created_at", FieldDef::required(Timestamp)),
                    ],
                },
                SchemaChange::CreateEntity {
                    kind: EntityKind::Transfers,
                    fields: vec![
                        f("from_account_id", FieldDef::required(Ref(EntityKind::Accounts))),
                        f("to_account_id", FieldDef::required(Ref(EntityKind::Accounts))),
                        f("amount", FieldDef::required(Int)),
                        f("created_at", FieldDef::required(Timestamp)),
                    ],
                },
            ],
        },
        Migration {
            version: SchemaVersion(2),
            description: "account lifecycle timestamps".to_string(),
            changes: vec![
                SchemaChange::AddField {
                    kind: EntityKind::Accounts,
                    name: "blocked_at".to_string(),
                    def: FieldDef::optional(Timestamp),
                },
                SchemaChange::AddField {
                    kind: EntityKind::Accounts,
                    name: "closed_at".to_string(),
                    def: FieldDef::optional(Timestamp),
                },
            ],
        },
    ]
}
