use std::collections::BTreeSet;

use async_trait::async_trait;
use twinport_core::{
    AccountStateChange, DomainError, DomainRequest, Entity, EntityId, EntityKind,
    OperationResult, Value,
};

use super::{require_text, unexpected, DomainContext, DomainHandler};

const ACCOUNTS: EntityKind = EntityKind::Accounts;

/// Account lifecycle: open, rename, block, unblock, close.
///
/// Account names are unique per owner. A closed account is final.
pub struct AccountsService;

#[async_trait]
impl DomainHandler for AccountsService {
    fn name(&self) -> &'static str {
        "accounts"
    }

    async fn handle(
        &self,
        ctx: &mut DomainContext<'_>,
        request: DomainRequest,
    ) -> Result<OperationResult, DomainError> {
        match request {
            DomainRequest::OpenAccount { user_id, name } => {
                open(ctx, user_id, &name).map(OperationResult::Entity)
            }
            DomainRequest::GetAccount { id } => ctx.get(ACCOUNTS, id).map(OperationResult::Entity),
            DomainRequest::GetAccounts { ids } => {
                ctx.get_many(ACCOUNTS, &ids).map(OperationResult::Entities)
            }
            DomainRequest::ListAccounts { user_ids } => {
                list(ctx, &user_ids).map(OperationResult::Entities)
            }
            DomainRequest::RenameAccount {
                user_id,
                account_id,
                name,
            } => rename(ctx, user_id, account_id, &name).map(OperationResult::Entity),
            DomainRequest::ChangeAccountState { account_id, change } => {
                change_state(ctx, account_id, change).map(OperationResult::Entity)
            }
            other => Err(unexpected(self.name(), &other)),
        }
    }
}

fn open(ctx: &mut DomainContext<'_>, user_id: EntityId, name: &str) -> Result<Entity, DomainError> {
    let name = require_text("name", name)?;
    ctx.get(EntityKind::Users, user_id)?;
    ensure_name_free(ctx, user_id, &name, None)?;

    let now = ctx.now();
    ctx.insert(
        ACCOUNTS,
        vec![
            ("user_id", Value::Ref(user_id)),
            ("name", Value::from(name)),
            ("balance", Value::Int(0)),
            ("created_at", Value::Timestamp(now)),
        ],
    )
}

/// Accounts owned by any of `user_ids`, in id order.
fn list(ctx: &mut DomainContext<'_>, user_ids: &[EntityId]) -> Result<Vec<Entity>, DomainError> {
    let owners: BTreeSet<_> = user_ids.iter().copied().collect();
    let mut out = Vec::new();
    for account in ctx.scan(ACCOUNTS)? {
        if owners.contains(&account.reference("user_id")?) {
            out.push(account);
        }
    }
    Ok(out)
}

fn rename(
    ctx: &mut DomainContext<'_>,
    user_id: EntityId,
    account_id: EntityId,
    name: &str,
) -> Result<Entity, DomainError> {
    let name = require_text("name", name)?;
    let account = ctx.get(ACCOUNTS, account_id)?;
    if account.reference("user_id")? != user_id {
        return Err(DomainError::invalid(format!(
            "account {account_id} is not owned by user {user_id}"
        )));
    }
    if account.opt_timestamp("closed_at").is_some() {
        return Err(DomainError::invalid(format!("account {account_id} is closed")));
    }
    ensure_name_free(ctx, user_id, &name, Some(account_id))?;
    ctx.update(account, vec![("name", Value::from(name))])
}

fn change_state(
    ctx: &mut DomainContext<'_>,
    account_id: EntityId,
    change: AccountStateChange,
) -> Result<Entity, DomainError> {
    let account = ctx.get(ACCOUNTS, account_id)?;
    if account.opt_timestamp("closed_at").is_some() {
        return Err(DomainError::invalid(format!("account {account_id} is closed")));
    }
    let blocked = account.opt_timestamp("blocked_at").is_some();
    let now = ctx.now();

    let changes = match change {
        AccountStateChange::Block if blocked => {
            return Err(DomainError::invalid(format!(
                "account {account_id} is already blocked"
            )));
        }
        AccountStateChange::Block => vec![("blocked_at", Value::Timestamp(now))],
        AccountStateChange::Unblock if !blocked => {
            return Err(DomainError::invalid(format!(
                "account {account_id} is not blocked"
            )));
        }
        AccountStateChange::Unblock => vec![("blocked_at", Value::Null)],
        AccountStateChange::Close => {
            if account.int("balance")? != 0 {
                return Err(DomainError::invalid(format!(
                    "account {account_id} has a non-zero balance"
                )));
            }
            vec![("closed_at", Value::Timestamp(now))]
        }
    };
    ctx.update(account, changes)
}

fn ensure_name_free(
    ctx: &mut DomainContext<'_>,
    user_id: EntityId,
    name: &str,
    except: Option<EntityId>,
) -> Result<(), DomainError> {
    for account in ctx.scan(ACCOUNTS)? {
        if Some(account.id) != except
            && account.reference("user_id")? == user_id
            && account.text("name")? == name
        {
            return Err(DomainError::invalid(format!(
                "user {user_id} already has an account named {name:?}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use twinport_core::ErrorKind;

    use super::super::testing::Fixture;
    use super::super::UsersService;
    use super::*;

    async fn user(fx: &Fixture, email: &str) -> EntityId {
        fx.run(
            &UsersService,
            DomainRequest::CreateUser {
                name: "Owner".into(),
                email: email.into(),
            },
        )
        .await
        .unwrap()
        .into_entity()
        .unwrap()
        .id
    }

    async fn open_account(fx: &Fixture, user_id: EntityId, name: &str) -> Result<Entity, DomainError> {
        fx.run(
            &AccountsService,
            DomainRequest::OpenAccount {
                user_id,
                name: name.into(),
            },
        )
        .await
        .and_then(OperationResult::into_entity)
    }

    async fn change(fx: &Fixture, account_id: EntityId, change: AccountStateChange) -> Result<Entity, DomainError> {
        fx.run(
            &AccountsService,
            DomainRequest::ChangeAccountState { account_id, change },
        )
        .await
        .and_then(OperationResult::into_entity)
    }

    #[tokio::test]
    async fn open_starts_at_zero() {
        let fx = Fixture::new();
        let owner = user(&fx, "a@b.io").await;
        let account = open_account(&fx, owner, "main").await.unwrap();
        assert_eq!(account.int("balance").unwrap(), 0);
        assert_eq!(account.reference("user_id").unwrap(), owner);
        assert!(account.get("blocked_at").is_null());
    }

    #[tokio::test]
    async fn open_for_unknown_user_is_not_found() {
        let fx = Fixture::new();
        let err = open_account(&fx, EntityId(42), "main").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn names_are_unique_per_owner() {
        let fx = Fixture::new();
        let a = user(&fx, "a@b.io").await;
        let b = user(&fx, "b@b.io").await;
        open_account(&fx, a, "main").await.unwrap();
        // Another owner may reuse the name.
        open_account(&fx, b, "main").await.unwrap();
        let err = open_account(&fx, a, "main").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn rename_requires_ownership() {
        let fx = Fixture::new();
        let a = user(&fx, "a@b.io").await;
        let b = user(&fx, "b@b.io").await;
        let account = open_account(&fx, a, "main").await.unwrap();

        let err = fx
            .run(
                &AccountsService,
                DomainRequest::RenameAccount {
                    user_id: b,
                    account_id: account.id,
                    name: "stolen".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);

        let renamed = fx
            .run(
                &AccountsService,
                DomainRequest::RenameAccount {
                    user_id: a,
                    account_id: account.id,
                    name: "savings".into(),
                },
            )
            .await
            .unwrap()
            .into_entity()
            .unwrap();
        assert_eq!(renamed.text("name").unwrap(), "savings");
    }

    #[tokio::test]
    async fn block_unblock_close() {
        let fx = Fixture::new();
        let owner = user(&fx, "a@b.io").await;
        let id = open_account(&fx, owner, "main").await.unwrap().id;

        let blocked = change(&fx, id, AccountStateChange::Block).await.unwrap();
        assert!(blocked.opt_timestamp("blocked_at").is_some());
        assert!(change(&fx, id, AccountStateChange::Block).await.is_err());

        let unblocked = change(&fx, id, AccountStateChange::Unblock).await.unwrap();
        assert!(unblocked.get("blocked_at").is_null());

        let closed = change(&fx, id, AccountStateChange::Close).await.unwrap();
        assert!(closed.opt_timestamp("closed_at").is_some());
        let err = change(&fx, id, AccountStateChange::Block).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn owner_with_accounts_cannot_be_deleted() {
        let fx = Fixture::new();
        let owner = user(&fx, "a@b.io").await;
        open_account(&fx, owner, "main").await.unwrap();
        let err = fx
            .run(&UsersService, DomainRequest::DeleteUser { id: owner })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn list_filters_by_owner() {
        let fx = Fixture::new();
        let a = user(&fx, "a@b.io").await;
        let b = user(&fx, "b@b.io").await;
        open_account(&fx, a, "one").await.unwrap();
        open_account(&fx, a, "two").await.unwrap();
        open_account(&fx, b, "three").await.unwrap();

        let listed = fx
            .run(&AccountsService, DomainRequest::ListAccounts { user_ids: vec![a] })
            .await
            .unwrap()
            .into_entities()
            .unwrap();
        let names: Vec<_> = listed.iter().map(|e| e.text("name").unwrap().to_string()).collect();
        assert_eq!(names, vec!["one", "two"]);
    }
}
