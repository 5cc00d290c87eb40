//! RPC request and response messages.
//!
//! Encoded as `MsgPack` maps (`rmp_serde::to_vec_named()`) with camelCase
//! keys, so a reader built against an older schema skips fields it does not
//! know and a missing optional field decodes as `None`.

use serde::{Deserialize, Serialize};
use twinport_core::money::format_minor;
use twinport_core::{AccountStateChange, DomainError, Entity};

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUserRequest {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindUserByNameRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindUserByEmailRequest {
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersRequest {
    #[serde(default)]
    pub name_contains: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteUserRequest {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    pub id: u64,
    pub name: String,
    pub email: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub schema_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserList {
    pub users: Vec<UserMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteUserResponse {
    pub id: u64,
    pub deleted: bool,
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAccountRequest {
    pub user_id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAccountRequest {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAccountsRequest {
    pub user_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBalanceRequest {
    pub account_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameAccountRequest {
    pub user_id: u64,
    pub account_id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAccountStateRequest {
    pub account_id: u64,
    pub change: AccountStateChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMessage {
    pub id: u64,
    pub user_id: u64,
    pub name: String,
    /// Decimal string with two fractional digits.
    pub balance: String,
    pub balance_minor: i64,
    pub created_at: i64,
    #[serde(default)]
    pub blocked_at: Option<i64>,
    #[serde(default)]
    pub closed_at: Option<i64>,
    pub schema_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountList {
    pub accounts: Vec<AccountMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub account_id: u64,
    pub balance: String,
    pub balance_minor: i64,
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub from_account_id: u64,
    pub to_account_id: u64,
    /// Decimal string, at most two fractional digits (`"12.50"`).
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPaymentRequest {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPaymentsRequest {
    pub account_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub id: u64,
    pub from_account_id: u64,
    pub to_account_id: u64,
    pub amount: String,
    pub amount_minor: i64,
    pub status: PaymentStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentList {
    pub payments: Vec<PaymentResponse>,
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDescriptor {
    pub name: String,
    pub request: String,
    pub response: String,
    /// Failure statuses the method may return besides the pipeline ones.
    pub errors: Vec<String>,
    pub mutates: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectResponse {
    pub built_against: u32,
    pub methods: Vec<MethodDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfoResponse {
    pub name: String,
    pub version: String,
    pub built_against: u32,
    pub active: u32,
}

// ---------------------------------------------------------------------------
// Entity conversions
// ---------------------------------------------------------------------------

impl TryFrom<&Entity> for UserMessage {
    type Error = DomainError;

    fn try_from(e: &Entity) -> Result<Self, DomainError> {
        Ok(Self {
            id: e.id.0,
            name: e.text("name")?.to_string(),
            email: e.text("email")?.to_string(),
            created_at: e.int("created_at")?,
            schema_version: e.schema_version.0,
        })
    }
}

impl TryFrom<&Entity> for AccountMessage {
    type Error = DomainError;

    fn try_from(e: &Entity) -> Result<Self, DomainError> {
        let balance = e.int("balance")?;
        Ok(Self {
            id: e.id.0,
            user_id: e.reference("user_id")?.0,
            name: e.text("name")?.to_string(),
            balance: format_minor(balance),
            balance_minor: balance,
            created_at: e.int("created_at")?,
            blocked_at: e.opt_timestamp("blocked_at"),
            closed_at: e.opt_timestamp("closed_at"),
            schema_version: e.schema_version.0,
        })
    }
}

impl TryFrom<&Entity> for BalanceResponse {
    type Error = DomainError;

    fn try_from(e: &Entity) -> Result<Self, DomainError> {
        let balance = e.int("balance")?;
        Ok(Self {
            account_id: e.id.0,
            balance: format_minor(balance),
            balance_minor: balance,
        })
    }
}

impl TryFrom<&Entity> for PaymentResponse {
    type Error = DomainError;

    fn try_from(e: &Entity) -> Result<Self, DomainError> {
        let amount = e.int("amount")?;
        Ok(Self {
            id: e.id.0,
            from_account_id: e.reference("from_account_id")?.0,
            to_account_id: e.reference("to_account_id")?.0,
            amount: format_minor(amount),
            amount_minor: amount,
            status: PaymentStatus::Completed,
            created_at: e.int("created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use twinport_core::{EntityId, EntityKind, SchemaVersion, Value};

    use super::*;

    #[test]
    fn older_reader_ignores_added_fields() {
        // A reader built before `blockedAt`/`closedAt` existed.
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct AccountV1 {
            id: u64,
            balance: String,
        }

        let msg = AccountMessage {
            id: 3,
            user_id: 1,
            name: "main".into(),
            balance: "1.50".into(),
            balance_minor: 150,
            created_at: 0,
            blocked_at: Some(9),
            closed_at: None,
            schema_version: 2,
        };
        let bytes = rmp_serde::to_vec_named(&msg).unwrap();
        let old: AccountV1 = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(old.id, 3);
        assert_eq!(old.balance, "1.50");
    }

    #[test]
    fn optional_fields_may_be_absent() {
        #[derive(Serialize)]
        struct Bare {
            id: u64,
        }
        let bytes = rmp_serde::to_vec_named(&Bare { id: 4 }).unwrap();
        let req: UpdateUserRequest = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(req.id, 4);
        assert!(req.name.is_none() && req.email.is_none());
    }

    #[test]
    fn payment_from_transfer_row() {
        let mut fields = BTreeMap::new();
        fields.insert("from_account_id".to_string(), Value::Ref(EntityId(1)));
        fields.insert("to_account_id".to_string(), Value::Ref(EntityId(2)));
        fields.insert("amount".to_string(), Value::Int(1_005));
        fields.insert("created_at".to_string(), Value::Timestamp(77));
        let row = Entity {
            kind: EntityKind::Transfers,
            id: EntityId(10),
            schema_version: SchemaVersion(2),
            revision: 1,
            fields,
        };
        let payment = PaymentResponse::try_from(&row).unwrap();
        assert_eq!(payment.amount, "10.05");
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.to_account_id, 2);
    }
}
