//! Protocol-neutral operation requests and results.
//!
//! Adapters build a [`DomainRequest`] from whatever arrived on the wire;
//! dispatch and the domain services are the only consumers.

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::DomainError;
use crate::schema::FieldRef;
use crate::types::{EntityId, EntityKind};

/// Which protocol surface a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolOrigin {
    Rpc,
    Graph,
}

impl ProtocolOrigin {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rpc => "rpc",
            Self::Graph => "graph",
        }
    }
}

/// Whether a unit of work mutates the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFilter {
    /// Case-insensitive substring match on the user name.
    pub name_contains: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStateChange {
    Block,
    Unblock,
    Close,
}

/// One domain operation with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainRequest {
    // users
    CreateUser {
        name: String,
        email: String,
    },
    GetUser {
        id: EntityId,
    },
    GetUsers {
        ids: Vec<EntityId>,
    },
    FindUserByName {
        name: String,
    },
    FindUserByEmail {
        email: String,
    },
    ListUsers {
        filter: UserFilter,
    },
    UpdateUser {
        id: EntityId,
        name: Option<String>,
        email: Option<String>,
    },
    DeleteUser {
        id: EntityId,
    },

    // accounts
    OpenAccount {
        user_id: EntityId,
        name: String,
    },
    GetAccount {
        id: EntityId,
    },
    GetAccounts {
        ids: Vec<EntityId>,
    },
    ListAccounts {
        user_ids: Vec<EntityId>,
    },
    RenameAccount {
        user_id: EntityId,
        account_id: EntityId,
        name: String,
    },
    ChangeAccountState {
        account_id: EntityId,
        change: AccountStateChange,
    },

    // transfers
    Transfer {
        from: EntityId,
        to: EntityId,
        amount_minor: i64,
    },
    GetTransfer {
        id: EntityId,
    },
    ListTransfers {
        account_ids: Vec<EntityId>,
    },
}

const USERS: EntityKind = EntityKind::Users;
const ACCOUNTS: EntityKind = EntityKind::Accounts;
const TRANSFERS: EntityKind = EntityKind::Transfers;

impl DomainRequest {
    /// Domain service that handles this request.
    #[must_use]
    pub fn service_name(&self) -> &'static str {
        match self {
            Self::CreateUser { .. }
            | Self::GetUser { .. }
            | Self::GetUsers { .. }
            | Self::FindUserByName { .. }
            | Self::FindUserByEmail { .. }
            | Self::ListUsers { .. }
            | Self::UpdateUser { .. }
            | Self::DeleteUser { .. } => "users",
            Self::OpenAccount { .. }
            | Self::GetAccount { .. }
            | Self::GetAccounts { .. }
            | Self::ListAccounts { .. }
            | Self::RenameAccount { .. }
            | Self::ChangeAccountState { .. } => "accounts",
            Self::Transfer { .. } | Self::GetTransfer { .. } | Self::ListTransfers { .. } => {
                "transfers"
            }
        }
    }

    /// Short operation name used in spans and metrics.
    #[must_use]
    pub fn operation_name(&self) -> &'static str {
        match self {
            Self::CreateUser { .. } => "create_user",
            Self::GetUser { .. } => "get_user",
            Self::GetUsers { .. } => "get_users",
            Self::FindUserByName { .. } => "find_user_by_name",
            Self::FindUserByEmail { .. } => "find_user_by_email",
            Self::ListUsers { .. } => "list_users",
            Self::UpdateUser { .. } => "update_user",
            Self::DeleteUser { .. } => "delete_user",
            Self::OpenAccount { .. } => "open_account",
            Self::GetAccount { .. } => "get_account",
            Self::GetAccounts { .. } => "get_accounts",
            Self::ListAccounts { .. } => "list_accounts",
            Self::RenameAccount { .. } => "rename_account",
            Self::ChangeAccountState { .. } => "change_account_state",
            Self::Transfer { .. } => "transfer",
            Self::GetTransfer { .. } => "get_transfer",
            Self::ListTransfers { .. } => "list_transfers",
        }
    }

    #[must_use]
    pub fn access(&self) -> Access {
        match self {
            Self::CreateUser { .. }
            | Self::UpdateUser { .. }
            | Self::DeleteUser { .. }
            | Self::OpenAccount { .. }
            | Self::RenameAccount { .. }
            | Self::ChangeAccountState { .. }
            | Self::Transfer { .. } => Access::Write,
            _ => Access::Read,
        }
    }

    /// Fields this request writes, checked against the caller's assumed
    /// schema version before any domain call runs.
    #[must_use]
    pub fn written_fields(&self) -> Vec<FieldRef> {
        let f = FieldRef::new;
        match self {
            Self::CreateUser { .. } => vec![
                f(USERS, "name"),
                f(USERS, "email"),
                f(USERS, "created_at"),
            ],
            Self::UpdateUser { name, email, .. } => {
                let mut fields = Vec::new();
                if name.is_some() {
                    fields.push(f(USERS, "name"));
                }
                if email.is_some() {
                    fields.push(f(USERS, "email"));
                }
                fields
            }
            Self::OpenAccount { .. } => vec![
                f(ACCOUNTS, "user_id"),
                f(ACCOUNTS, "name"),
                f(ACCOUNTS, "balance"),
                f(ACCOUNTS, "created_at"),
            ],
            Self::RenameAccount { .. } => vec![f(ACCOUNTS, "name")],
            Self::ChangeAccountState { change, .. } => match change {
                AccountStateChange::Block | AccountStateChange::Unblock => {
                    vec![f(ACCOUNTS, "blocked_at")]
                }
                AccountStateChange::Close => vec![f(ACCOUNTS, "closed_at")],
            },
            Self::Transfer { .. } => vec![
                f(ACCOUNTS, "balance"),
                f(TRANSFERS, "from_account_id"),
                f(TRANSFERS, "to_account_id"),
                f(TRANSFERS, "amount"),
                f(TRANSFERS, "created_at"),
            ],
            _ => Vec::new(),
        }
    }
}

/// Successful outcome of a domain request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    Entity(Entity),
    Entities(Vec<Entity>),
    Removed { kind: EntityKind, id: EntityId },
}

impl OperationResult {
    /// # Errors
    ///
    /// Returns `Internal` if the result is not a single entity.
    pub fn into_entity(self) -> Result<Entity, DomainError> {
        match self {
            Self::Entity(e) => Ok(e),
            other => Err(unexpected("entity", &other)),
        }
    }

    /// # Errors
    ///
    /// Returns `Internal` if the result is not a collection.
    pub fn into_entities(self) -> Result<Vec<Entity>, DomainError> {
        match self {
            Self::Entities(v) => Ok(v),
            other => Err(unexpected("entity list", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &OperationResult) -> DomainError {
    let got = match got {
        OperationResult::Entity(_) => "entity",
        OperationResult::Entities(_) => "entity list",
        OperationResult::Removed { .. } => "removal",
    };
    DomainError::internal(format!("expected {wanted} result, got {got}"))
}
