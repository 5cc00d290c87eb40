use async_trait::async_trait;
use twinport_core::{
    DomainError, DomainRequest, Entity, EntityId, EntityKind, OperationResult, UserFilter, Value,
};

use super::{require_email, require_text, unexpected, DomainContext, DomainHandler};

const USERS: EntityKind = EntityKind::Users;

/// User registration, lookup and maintenance.
///
/// Emails are unique ignoring ASCII case. A user that still owns accounts
/// cannot be deleted.
pub struct UsersService;

#[async_trait]
impl DomainHandler for UsersService {
    fn name(&self) -> &'static str {
        "users"
    }

    async fn handle(
        &self,
        ctx: &mut DomainContext<'_>,
        request: DomainRequest,
    ) -> Result<OperationResult, DomainError> {
        match request {
            DomainRequest::CreateUser { name, email } => {
                create(ctx, &name, &email).map(OperationResult::Entity)
            }
            DomainRequest::GetUser { id } => ctx.get(USERS, id).map(OperationResult::Entity),
            DomainRequest::GetUsers { ids } => {
                ctx.get_many(USERS, &ids).map(OperationResult::Entities)
            }
            DomainRequest::FindUserByName { name } => {
                let name = require_text("name", &name)?;
                find_one(ctx, &name, |u| Ok(u.text("name")? == name)).map(OperationResult::Entity)
            }
            DomainRequest::FindUserByEmail { email } => {
                let email = require_email(&email)?;
                find_one(ctx, &email, |u| Ok(u.text("email")?.eq_ignore_ascii_case(&email)))
                    .map(OperationResult::Entity)
            }
            DomainRequest::ListUsers { filter } => list(ctx, &filter).map(OperationResult::Entities),
            DomainRequest::UpdateUser { id, name, email } => {
                update(ctx, id, name.as_deref(), email.as_deref()).map(OperationResult::Entity)
            }
            DomainRequest::DeleteUser { id } => {
                delete(ctx, id)?;
                Ok(OperationResult::Removed { kind: USERS, id })
            }
            other => Err(unexpected(self.name(), &other)),
        }
    }
}

fn create(ctx: &mut DomainContext<'_>, name: &str, email: &str) -> Result<Entity, DomainError> {
    let name = require_text("name", name)?;
    let email = require_email(email)?;
    ensure_email_free(ctx, &email, None)?;

    let now = ctx.now();
    ctx.insert(
        USERS,
        vec![
            ("name", Value::from(name)),
            ("email", Value::from(email)),
            ("created_at", Value::Timestamp(now)),
        ],
    )
}

fn find_one(
    ctx: &mut DomainContext<'_>,
    key: &str,
    matches: impl Fn(&Entity) -> Result<bool, DomainError>,
) -> Result<Entity, DomainError> {
    for user in ctx.scan(USERS)? {
        if matches(&user)? {
            return Ok(user);
        }
    }
    Err(DomainError::not_found_by(USERS, key))
}

fn list(ctx: &mut DomainContext<'_>, filter: &UserFilter) -> Result<Vec<Entity>, DomainError> {
    let users = ctx.scan(USERS)?;
    let Some(needle) = filter.name_contains.as_deref().map(str::to_lowercase) else {
        return Ok(users);
    };
    let mut out = Vec::new();
    for user in users {
        if user.text("name")?.to_lowercase().contains(&needle) {
            out.push(user);
        }
    }
    Ok(out)
}

fn update(
    ctx: &mut DomainContext<'_>,
    id: EntityId,
    name: Option<&str>,
    email: Option<&str>,
) -> Result<Entity, DomainError> {
    if name.is_none() && email.is_none() {
        return Err(DomainError::invalid("nothing to update"));
    }
    let user = ctx.get(USERS, id)?;

    let mut changes = Vec::new();
    if let Some(name) = name {
        changes.push(("name", Value::from(require_text("name", name)?)));
    }
    if let Some(email) = email {
        let email = require_email(email)?;
        ensure_email_free(ctx, &email, Some(id))?;
        changes.push(("email", Value::from(email)));
    }
    ctx.update(user, changes)
}

fn delete(ctx: &mut DomainContext<'_>, id: EntityId) -> Result<(), DomainError> {
    let user = ctx.get(USERS, id)?;
    for account in ctx.scan(EntityKind::Accounts)? {
        if account.reference("user_id")? == id {
            return Err(DomainError::invalid(format!(
                "user {id} still owns accounts"
            )));
        }
    }
    ctx.delete(&user);
    Ok(())
}

fn ensure_email_free(
    ctx: &mut DomainContext<'_>,
    email: &str,
    except: Option<EntityId>,
) -> Result<(), DomainError> {
    for user in ctx.scan(USERS)? {
        if Some(user.id) != except && user.text("email")?.eq_ignore_ascii_case(email) {
            return Err(DomainError::invalid(format!("email {email} is already registered")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use twinport_core::ErrorKind;

    use super::super::testing::Fixture;
    use super::*;

    async fn create_user(fx: &Fixture, name: &str, email: &str) -> Entity {
        fx.run(
            &UsersService,
            DomainRequest::CreateUser {
                name: name.into(),
                email: email.into(),
            },
        )
        .await
        .unwrap()
        .into_entity()
        .unwrap()
    }

    #[tokio::test]
    async fn create_and_find() {
        let fx = Fixture::new();
        let ada = create_user(&fx, " Ada ", "ada@bank.io").await;
        assert_eq!(ada.text("name").unwrap(), "Ada");
        assert_eq!(ada.int("created_at").unwrap(), 1_700_000_000_000);

        let by_email = fx
            .run(
                &UsersService,
                DomainRequest::FindUserByEmail {
                    email: "ADA@bank.io".into(),
                },
            )
            .await
            .unwrap()
            .into_entity()
            .unwrap();
        assert_eq!(by_email.id, ada.id);

        let err = fx
            .run(
                &UsersService,
                DomainRequest::FindUserByName {
                    name: "Grace".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = fx
            .run(
                &UsersService,
                DomainRequest::FindUserByEmail {
                    email: "not-an-email".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_case_insensitively() {
        let fx = Fixture::new();
        create_user(&fx, "Ada", "ada@bank.io").await;
        let err = fx
            .run(
                &UsersService,
                DomainRequest::CreateUser {
                    name: "Other".into(),
                    email: "Ada@Bank.io".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let fx = Fixture::new();
        for (name, email) in [("", "a@b.io"), ("Ada", "not-an-email")] {
            let err = fx
                .run(
                    &UsersService,
                    DomainRequest::CreateUser {
                        name: name.into(),
                        email: email.into(),
                    },
                )
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        }
    }

    #[tokio::test]
    async fn list_filters_by_name_substring() {
        let fx = Fixture::new();
        create_user(&fx, "Ada Lovelace", "ada@bank.io").await;
        create_user(&fx, "Grace Hopper", "grace@bank.io").await;

        let all = fx
            .run(&UsersService, DomainRequest::ListUsers { filter: UserFilter::default() })
            .await
            .unwrap()
            .into_entities()
            .unwrap();
        assert_eq!(all.len(), 2);

        let some = fx
            .run(
                &UsersService,
                DomainRequest::ListUsers {
                    filter: UserFilter {
                        name_contains: Some("hop".into()),
                    },
                },
            )
            .await
            .unwrap()
            .into_entities()
            .unwrap();
        assert_eq!(some.len(), 1);
        assert_eq!(some[0].text("name").unwrap(), "Grace Hopper");
    }

    #[tokio::test]
    async fn update_keeps_own_email_and_rejects_taken_one() {
        let fx = Fixture::new();
        let ada = create_user(&fx, "Ada", "ada@bank.io").await;
        create_user(&fx, "Grace", "grace@bank.io").await;

        let renamed = fx
            .run(
                &UsersService,
                DomainRequest::UpdateUser {
                    id: ada.id,
                    name: Some("Countess".into()),
                    email: Some("ADA@bank.io".into()),
                },
            )
            .await
            .unwrap()
            .into_entity()
            .unwrap();
        assert_eq!(renamed.text("name").unwrap(), "Countess");

        let err = fx
            .run(
                &UsersService,
                DomainRequest::UpdateUser {
                    id: ada.id,
                    name: None,
                    email: Some("grace@bank.io".into()),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn batch_get_skips_missing_ids() {
        let fx = Fixture::new();
        let ada = create_user(&fx, "Ada", "ada@bank.io").await;
        let found = fx
            .run(
                &UsersService,
                DomainRequest::GetUsers {
                    ids: vec![ada.id, EntityId(99), ada.id],
                },
            )
            .await
            .unwrap()
            .into_entities()
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_user() {
        let fx = Fixture::new();
        let ada = create_user(&fx, "Ada", "ada@bank.io").await;
        fx.run(&UsersService, DomainRequest::DeleteUser { id: ada.id })
            .await
            .unwrap();
        let err = fx
            .run(&UsersService, DomainRequest::GetUser { id: ada.id })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
