use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::debug;
use twinport_core::{
    DomainError, DomainRequest, Entity, EntityId, EntityKind, OperationResult, Value,
};

use super::{unexpected, DomainContext, DomainHandler};

const ACCOUNTS: EntityKind = EntityKind::Accounts;
const TRANSFERS: EntityKind = EntityKind::Transfers;

/// Money movement between accounts.
///
/// A transfer debits the source, credits the destination and records the
/// movement, all in the caller's scope. Amounts are minor units.
pub struct TransfersService;

#[async_trait]
impl DomainHandler for TransfersService {
    fn name(&self) -> &'static str {
        "transfers"
    }

    async fn handle(
        &self,
        ctx: &mut DomainContext<'_>,
        request: DomainRequest,
    ) -> Result<OperationResult, DomainError> {
        match request {
            DomainRequest::Transfer {
                from,
                to,
                amount_minor,
            } => transfer(ctx, from, to, amount_minor).map(OperationResult::Entity),
            DomainRequest::GetTransfer { id } => {
                ctx.get(TRANSFERS, id).map(OperationResult::Entity)
            }
            DomainRequest::ListTransfers { account_ids } => {
                list(ctx, &account_ids).map(OperationResult::Entities)
            }
            other => Err(unexpected(self.name(), &other)),
        }
    }
}

fn transfer(
    ctx: &mut DomainContext<'_>,
    from: EntityId,
    to: EntityId,
    amount: i64,
) -> Result<Entity, DomainError> {
    if amount <= 0 {
        return Err(DomainError::invalid("amount must be positive"));
    }
    if from == to {
        return Err(DomainError::invalid("cannot transfer to the same account"));
    }

    let source = ctx.get(ACCOUNTS, from)?;
    let target = ctx.get(ACCOUNTS, to)?;

    if source.opt_timestamp("closed_at").is_some() {
        return Err(DomainError::invalid(format!("account {from} is closed")));
    }
    if source.opt_timestamp("blocked_at").is_some() {
        return Err(DomainError::invalid(format!("account {from} is blocked")));
    }
    if target.opt_timestamp("closed_at").is_some() {
        return Err(DomainError::invalid(format!("account {to} is closed")));
    }

    let source_balance = source.int("balance")?;
    if source_balance < amount {
        return Err(DomainError::invalid(format!(
            "insufficient funds in account {from}"
        )));
    }
    let target_balance = target
        .int("balance")?
        .checked_add(amount)
        .ok_or_else(|| DomainError::invalid(format!("balance of account {to} would overflow")))?;

    ctx.update(source, vec![("balance", Value::Int(source_balance - amount))])?;
    ctx.update(target, vec![("balance", Value::Int(target_balance))])?;

    let now = ctx.now();
    let record = ctx.insert(
        TRANSFERS,
        vec![
            ("from_account_id", Value::Ref(from)),
            ("to_account_id", Value::Ref(to)),
            ("amount", Value::Int(amount)),
            ("created_at", Value::Timestamp(now)),
        ],
    )?;
    debug!(transfer = %record.id, %from, %to, amount, "transfer staged");
    Ok(record)
}

/// Transfers touching any of `account_ids` on either side, in id order.
fn list(ctx: &mut DomainContext<'_>, account_ids: &[EntityId]) -> Result<Vec<Entity>, DomainError> {
    let wanted: BTreeSet<_> = account_ids.iter().copied().collect();
    let mut out = Vec::new();
    for t in ctx.scan(TRANSFERS)? {
        if wanted.contains(&t.reference("from_account_id")?)
            || wanted.contains(&t.reference("to_account_id")?)
        {
            out.push(t);
        }
    }
    Ok(out)
}
