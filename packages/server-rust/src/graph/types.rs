//! The graph type model: object types, their fields and how each field
//! resolves.

use std::fmt;

use twinport_core::EntityKind;

/// Argument input types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    Int,
    String,
    Boolean,
    /// `[Int!]`
    IntList,
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Int => "Int",
            Self::String => "String",
            Self::Boolean => "Boolean",
            Self::IntList => "[Int!]",
        })
    }
}

#[derive(Debug)]
pub struct ArgDef {
    pub name: &'static str,
    pub ty: InputType,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Query,
    Mutation,
    User,
    Account,
    Transfer,
    SchemaInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    Int,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    Scalar(Scalar),
    Object(ObjectType),
    List(ObjectType),
}

impl OutputType {
    /// Object type whose fields a selection on this output picks from.
    #[must_use]
    pub fn object(self) -> Option<ObjectType> {
        match self {
            Self::Scalar(_) => None,
            Self::Object(o) | Self::List(o) => Some(o),
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(Scalar::Int) => f.write_str("Int"),
            Self::Scalar(Scalar::String) => f.write_str("String"),
            Self::Object(o) => f.write_str(o.name()),
            Self::List(o) => write!(f, "[{}]", o.name()),
        }
    }
}

/// Root operations, one per query or mutation root field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootField {
    User,
    UserByName,
    UserByEmail,
    Users,
    Account,
    Accounts,
    Transfer,
    Transfers,
    Schema,
    CreateUser,
    UpdateUser,
    DeleteUser,
    OpenAccount,
    RenameAccount,
    BlockAccount,
    UnblockAccount,
    CloseAccount,
    SendTransfer,
}

/// How a field's value is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolver {
    Root(RootField),
    Id,
    /// Schema version tag stored on the entity.
    SchemaVersion,
    Column(&'static str),
    /// Minor-unit column rendered as a two-decimal string.
    Money(&'static str),
    /// Reference column `via` pointing at an entity of `kind`.
    ToOne {
        kind: EntityKind,
        via: &'static str,
    },
    /// Entities of `kind` whose reference columns `via` point back at the
    /// parent.
    ToMany {
        kind: EntityKind,
        via: &'static [&'static str],
    },
    BuiltAgainst,
    Active,
    TypeName,
}

#[derive(Debug)]
pub struct FieldDef {
    pub name: &'static str,
    pub args: &'static [ArgDef],
    pub ty: OutputType,
    pub resolver: Resolver,
}

impl FieldDef {
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<&'static ArgDef> {
        self.args.iter().find(|a| a.name == name)
    }
}

/// `__typename`, selectable on every object type.
pub static TYPENAME: FieldDef = field("__typename", STRING, Resolver::TypeName);

const INT: OutputType = OutputType::Scalar(Scalar::Int);
const STRING: OutputType = OutputType::Scalar(Scalar::String);

const fn field(name: &'static str, ty: OutputType, resolver: Resolver) -> FieldDef {
    FieldDef {
        name,
        args: &[],
        ty,
        resolver,
    }
}

const fn root(
    name: &'static str,
    args: &'static [ArgDef],
    ty: OutputType,
    root: RootField,
) -> FieldDef {
    FieldDef {
        name,
        args,
        ty,
        resolver: Resolver::Root(root),
    }
}

const fn required(name: &'static str, ty: InputType) -> ArgDef {
    ArgDef {
        name,
        ty,
        required: true,
    }
}

const fn optional(name: &'static str, ty: InputType) -> ArgDef {
    ArgDef {
        name,
        ty,
        required: false,
    }
}

const ID: &[ArgDef] = &[required("id", InputType::Int)];
const NAME: &[ArgDef] = &[required("name", InputType::String)];
const EMAIL: &[ArgDef] = &[required("email", InputType::String)];
const NAME_CONTAINS: &[ArgDef] = &[optional("nameContains", InputType::String)];
const IDS: &[ArgDef] = &[required("ids", InputType::IntList)];
const ACCOUNT_ID: &[ArgDef] = &[required("accountId", InputType::Int)];
const CREATE_USER: &[ArgDef] = &[
    required("name", InputType::String),
    required("email", InputType::String),
];
const UPDATE_USER: &[ArgDef] = &[
    required("id", InputType::Int),
    optional("name", InputType::String),
    optional("email", InputType::String),
];
const OPEN_ACCOUNT: &[ArgDef] = &[
    required("userId", InputType::Int),
    required("name", InputType::String),
];
const RENAME_ACCOUNT: &[ArgDef] = &[
    required("userId", InputType::Int),
    required("accountId", InputType::Int),
    required("name", InputType::String),
];
const SEND_TRANSFER: &[ArgDef] = &[
    required("fromAccountId", InputType::Int),
    required("toAccountId", InputType::Int),
    required("amount", InputType::String),
];

const QUERY: &[FieldDef] = &[
    root("user", ID, OutputType::Object(ObjectType::User), RootField::User),
    root("userByName", NAME, OutputType::Object(ObjectType::User), RootField::UserByName),
    root("userByEmail", EMAIL, OutputType::Object(ObjectType::User), RootField::UserByEmail),
    root("users", NAME_CONTAINS, OutputType::List(ObjectType::User), RootField::Users),
    root("account", ID, OutputType::Object(ObjectType::Account), RootField::Account),
    root("accounts", IDS, OutputType::List(ObjectType::Account), RootField::Accounts),
    root("transfer", ID, OutputType::Object(ObjectType::Transfer), RootField::Transfer),
    root("transfers", ACCOUNT_ID, OutputType::List(ObjectType::Transfer), RootField::Transfers),
    root("schema", &[], OutputType::Object(ObjectType::SchemaInfo), RootField::Schema),
];

const MUTATION: &[FieldDef] = &[
    root("createUser", CREATE_USER, OutputType::Object(ObjectType::User), RootField::CreateUser),
    root("updateUser", UPDATE_USER, OutputType::Object(ObjectType::User), RootField::UpdateUser),
    root("deleteUser", ID, INT, RootField::DeleteUser),
    root("openAccount", OPEN_ACCOUNT, OutputType::Object(ObjectType::Account), RootField::OpenAccount),
    root("renameAccount", RENAME_ACCOUNT, OutputType::Object(ObjectType::Account), RootField::RenameAccount),
    root("blockAccount", ID, OutputType::Object(ObjectType::Account), RootField::BlockAccount),
    root("unblockAccount", ID, OutputType::Object(ObjectType::Account), RootField::UnblockAccount),
    root("closeAccount", ID, OutputType::Object(ObjectType::Account), RootField::CloseAccount),
    root("transfer", SEND_TRANSFER, OutputType::Object(ObjectType::Transfer), RootField::SendTransfer),
];

const USER: &[FieldDef] = &[
    field("id", INT, Resolver::Id),
    field("name", STRING, Resolver::Column("name")),
    field("email", STRING, Resolver::Column("email")),
    field("createdAt", INT, Resolver::Column("created_at")),
    field("schemaVersion", INT, Resolver::SchemaVersion),
    field(
        "accounts",
        OutputType::List(ObjectType::Account),
        Resolver::ToMany {
            kind: EntityKind::Accounts,
            via: &["user_id"],
        },
    ),
];

const ACCOUNT: &[FieldDef] = &[
    field("id", INT, Resolver::Id),
    field("name", STRING, Resolver::Column("name")),
    field("balance", STRING, Resolver::Money("balance")),
    field("balanceMinor", INT, Resolver::Column("balance")),
    field("createdAt", INT, Resolver::Column("created_at")),
    field("blockedAt", INT, Resolver::Column("blocked_at")),
    field("closedAt", INT, Resolver::Column("closed_at")),
    field("schemaVersion", INT, Resolver::SchemaVersion),
    field(
        "owner",
        OutputType::Object(ObjectType::User),
        Resolver::ToOne {
            kind: EntityKind::Users,
            via: "user_id",
        },
    ),
    field(
        "transfers",
        OutputType::List(ObjectType::Transfer),
        Resolver::ToMany {
            kind: EntityKind::Transfers,
            via: &["from_account_id", "to_account_id"],
        },
    ),
];

const TRANSFER: &[FieldDef] = &[
    field("id", INT, Resolver::Id),
    field("amount", STRING, Resolver::Money("amount")),
    field("amountMinor", INT, Resolver::Column("amount")),
    field("createdAt", INT, Resolver::Column("created_at")),
    field("schemaVersion", INT, Resolver::SchemaVersion),
    field(
        "from",
        OutputType::Object(ObjectType::Account),
        Resolver::ToOne {
            kind: EntityKind::Accounts,
            via: "from_account_id",
        },
    ),
    field(
        "to",
        OutputType::Object(ObjectType::Account),
        Resolver::ToOne {
            kind: EntityKind::Accounts,
            via: "to_account_id",
        },
    ),
];

const SCHEMA_INFO: &[FieldDef] = &[
    field("builtAgainst", INT, Resolver::BuiltAgainst),
    field("active", INT, Resolver::Active),
];

impl ObjectType {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Query => "Query",
            Self::Mutation => "Mutation",
            Self::User => "User",
            Self::Account => "Account",
            Self::Transfer => "Transfer",
            Self::SchemaInfo => "SchemaInfo",
        }
    }

    #[must_use]
    pub fn fields(self) -> &'static [FieldDef] {
        match self {
            Self::Query => QUERY,
            Self::Mutation => MUTATION,
            Self::User => USER,
            Self::Account => ACCOUNT,
            Self::Transfer => TRANSFER,
            Self::SchemaInfo => SCHEMA_INFO,
        }
    }

    /// Looks up a selectable field, including `__typename`.
    #[must_use]
    pub fn field(self, name: &str) -> Option<&'static FieldDef> {
        if name == TYPENAME.name {
            return Some(&TYPENAME);
        }
        self.fields().iter().find(|f| f.name == name)
    }

    /// Object type backed by rows of `kind`.
    #[must_use]
    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Users => Self::User,
            EntityKind::Accounts => Self::Account,
            EntityKind::Transfers => Self::Transfer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_relation_targets_its_row_type() {
        for object in [ObjectType::User, ObjectType::Account, ObjectType::Transfer] {
            for f in object.fields() {
                match f.resolver {
                    Resolver::ToOne { kind, .. } => {
                        assert_eq!(f.ty, OutputType::Object(ObjectType::for_kind(kind)));
                    }
                    Resolver::ToMany { kind, .. } => {
                        assert_eq!(f.ty, OutputType::List(ObjectType::for_kind(kind)));
                    }
                    _ => assert!(f.args.is_empty()),
                }
            }
        }
    }

    #[test]
    fn roots_are_only_on_operation_types() {
        for object in [ObjectType::Query, ObjectType::Mutation] {
            assert!(object
                .fields()
                .iter()
                .all(|f| matches!(f.resolver, Resolver::Root(_))));
        }
        assert_eq!(
            ObjectType::Mutation.field("transfer").map(|f| f.resolver),
            Some(Resolver::Root(RootField::SendTransfer))
        );
        assert_eq!(
            ObjectType::Query.field("transfer").map(|f| f.resolver),
            Some(Resolver::Root(RootField::Transfer))
        );
    }

    #[test]
    fn typename_is_everywhere() {
        assert!(ObjectType::SchemaInfo.field("__typename").is_some());
        assert!(ObjectType::User.field("password").is_none());
        assert_eq!(OutputType::List(ObjectType::Account).to_string(), "[Account]");
    }
}
