//! Validates a parsed document against the type model and turns the chosen
//! operation into an execution plan.
//!
//! Everything that can be rejected without reading the store is rejected
//! here: unknown operations, fields and arguments, missing or mistyped
//! arguments and variables, and selections that do not fit their field's
//! type. A plan that comes out of [`plan`] only fails at execution time for
//! domain reasons.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value as Json};
use twinport_core::money::parse_amount;
use twinport_core::{
    Access, AccountStateChange, DomainError, DomainRequest, EntityId, FieldRef, UserFilter,
};

use super::document::{Document, Field, InputValue, OperationDef, OperationKind, Pos, TypeRef};
use super::response::{GraphError, GRAPH_VALIDATION_FAILED};
use super::types::{ArgDef, FieldDef, InputType, ObjectType, OutputType, Resolver, RootField};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PlanError {
    pub message: String,
    pub pos: Option<Pos>,
}

impl PlanError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            pos: None,
        }
    }

    fn at(message: impl Into<String>, pos: Pos) -> Self {
        Self {
            message: message.into(),
            pos: Some(pos),
        }
    }
}

impl From<PlanError> for GraphError {
    fn from(e: PlanError) -> Self {
        let err = GraphError::new(GRAPH_VALIDATION_FAILED, e.message);
        match e.pos {
            Some(pos) => err.at(pos),
            None => err,
        }
    }
}

/// A validated operation ready to execute.
#[derive(Debug)]
pub struct Plan {
    pub kind: OperationKind,
    pub roots: Vec<PlannedRoot>,
}

impl Plan {
    #[must_use]
    pub fn access(&self) -> Access {
        match self.kind {
            OperationKind::Query => Access::Read,
            OperationKind::Mutation => Access::Write,
        }
    }

    /// Union of the fields every mutation root writes.
    #[must_use]
    pub fn written_fields(&self) -> Vec<FieldRef> {
        let mut fields = Vec::new();
        for root in &self.roots {
            if let RootAction::Domain(request) = &root.action {
                for f in request.written_fields() {
                    if !fields.contains(&f) {
                        fields.push(f);
                    }
                }
            }
        }
        fields
    }
}

#[derive(Debug)]
pub struct PlannedRoot {
    pub key: String,
    pub pos: Pos,
    pub ty: OutputType,
    pub action: RootAction,
    pub selection: Vec<PlannedField>,
}

/// What a root field does when executed.
#[derive(Debug)]
pub enum RootAction {
    Domain(DomainRequest),
    SchemaInfo,
    TypeName(&'static str),
    /// Arguments were well-typed but semantically invalid; the root fails
    /// with this error when it runs.
    Reject(DomainError),
}

#[derive(Debug)]
pub struct PlannedField {
    pub key: String,
    pub def: &'static FieldDef,
    pub pos: Pos,
    pub selection: Vec<PlannedField>,
}

/// Validates `document` and plans the operation named `operation_name`
/// (or the only operation if no name is given).
///
/// # Errors
///
/// Returns the first validation failure found.
pub fn plan(
    document: &Document,
    operation_name: Option<&str>,
    variables: &Map<String, Json>,
) -> Result<Plan, PlanError> {
    let op = select_operation(document, operation_name)?;
    let vars = coerce_variables(op, variables)?;

    let object = match op.kind {
        OperationKind::Query => ObjectType::Query,
        OperationKind::Mutation => ObjectType::Mutation,
    };
    let mut keys = HashSet::new();
    let mut roots = Vec::with_capacity(op.selection.len());
    for field in &op.selection {
        if !keys.insert(field.response_key()) {
            return Err(duplicate_key(field));
        }
        let def = lookup(object, field)?;
        let action = match def.resolver {
            Resolver::Root(root) => Args::resolve(def, field, &vars)?.action(root)?,
            Resolver::TypeName if field.arguments.is_empty() => RootAction::TypeName(object.name()),
            _ => {
                return Err(PlanError::at(
                    format!("{} cannot be selected at the root", field.name),
                    field.pos,
                ));
            }
        };
        roots.push(PlannedRoot {
            key: field.response_key().to_string(),
            pos: field.pos,
            ty: def.ty,
            action,
            selection: plan_selection(def, field)?,
        });
    }

    Ok(Plan {
        kind: op.kind,
        roots,
    })
}

fn select_operation<'d>(
    document: &'d Document,
    name: Option<&str>,
) -> Result<&'d OperationDef, PlanError> {
    let mut names = HashSet::new();
    for op in &document.operations {
        if let Some(n) = &op.name {
            if !names.insert(n.as_str()) {
                return Err(PlanError::at(format!("duplicate operation name {n}"), op.pos));
            }
        }
    }

    match name {
        Some(name) => document
            .operations
            .iter()
            .find(|op| op.name.as_deref() == Some(name))
            .ok_or_else(|| PlanError::new(format!("unknown operation {name}"))),
        None => match document.operations.as_slice() {
            [op] => Ok(op),
            _ => Err(PlanError::new(
                "operationName is required when a document has several operations",
            )),
        },
    }
}

fn lookup(object: ObjectType, field: &Field) -> Result<&'static FieldDef, PlanError> {
    object.field(&field.name).ok_or_else(|| {
        PlanError::at(
            format!("unknown field {} on type {}", field.name, object.name()),
            field.pos,
        )
    })
}

fn duplicate_key(field: &Field) -> PlanError {
    PlanError::at(
        format!("duplicate response key {}", field.response_key()),
        field.pos,
    )
}

/// Validates the sub-selection of `field`, whose definition is `def`.
fn plan_selection(def: &FieldDef, field: &Field) -> Result<Vec<PlannedField>, PlanError> {
    let Some(object) = def.ty.object() else {
        if !field.selection.is_empty() {
            return Err(PlanError::at(
                format!("{} is a scalar and cannot have a selection", field.name),
                field.pos,
            ));
        }
        return Ok(Vec::new());
    };
    if field.selection.is_empty() {
        return Err(PlanError::at(
            format!("{} of type {} needs a selection", field.name, def.ty),
            field.pos,
        ));
    }

    let mut keys = HashSet::new();
    let mut planned = Vec::with_capacity(field.selection.len());
    for child in &field.selection {
        if !keys.insert(child.response_key()) {
            return Err(duplicate_key(child));
        }
        let child_def = lookup(object, child)?;
        if let Some((arg, _)) = child.arguments.first() {
            return Err(PlanError::at(
                format!("unknown argument {arg} on field {}", child.name),
                child.pos,
            ));
        }
        planned.push(PlannedField {
            key: child.response_key().to_string(),
            def: child_def,
            pos: child.pos,
            selection: plan_selection(child_def, child)?,
        });
    }
    Ok(planned)
}

// ---------------------------------------------------------------------------
// Variables and arguments
// ---------------------------------------------------------------------------

/// A variable or argument value after substitution and coercion.
#[derive(Debug, Clone, PartialEq)]
enum ArgValue {
    Null,
    Int(i64),
    Str(String),
    Bool(bool),
    List(Vec<ArgValue>),
}

fn coerce_variables(
    op: &OperationDef,
    provided: &Map<String, Json>,
) -> Result<HashMap<String, ArgValue>, PlanError> {
    let mut vars = HashMap::new();
    for def in &op.variables {
        check_declared_type(&def.ty).map_err(|m| PlanError::at(m, def.pos))?;
        let fail = |m: String| PlanError::at(format!("variable ${}: {m}", def.name), def.pos);

        let value = match (provided.get(&def.name), &def.default) {
            (Some(json), _) => coerce_json(json, &def.ty).map_err(fail)?,
            (None, Some(default)) => coerce_json(&literal_json(default), &def.ty).map_err(fail)?,
            (None, None) if def.ty.is_non_null() => {
                return Err(fail(format!("required value of type {} was not provided", def.ty)));
            }
            (None, None) => ArgValue::Null,
        };
        if vars.insert(def.name.clone(), value).is_some() {
            return Err(PlanError::at(
                format!("variable ${} is declared twice", def.name),
                def.pos,
            ));
        }
    }
    Ok(vars)
}

fn check_declared_type(ty: &TypeRef) -> Result<(), String> {
    match ty {
        TypeRef::Named(name) => match name.as_str() {
            "Int" | "String" | "Boolean" => Ok(()),
            other => Err(format!("unknown input type {other}")),
        },
        TypeRef::List(inner) | TypeRef::NonNull(inner) => check_declared_type(inner),
    }
}

fn coerce_json(json: &Json, ty: &TypeRef) -> Result<ArgValue, String> {
    match ty {
        TypeRef::NonNull(inner) => {
            if json.is_null() {
                Err(format!("expected {ty}, found null"))
            } else {
                coerce_json(json, inner)
            }
        }
        _ if json.is_null() => Ok(ArgValue::Null),
        TypeRef::List(inner) => match json {
            Json::Array(items) => items
                .iter()
                .map(|item| coerce_json(item, inner))
                .collect::<Result<_, _>>()
                .map(ArgValue::List),
            single => Ok(ArgValue::List(vec![coerce_json(single, inner)?])),
        },
        TypeRef::Named(name) => match (name.as_str(), json) {
            ("Int", Json::Number(n)) => n
                .as_i64()
                .map(ArgValue::Int)
                .ok_or_else(|| format!("{n} is not a 64-bit integer")),
            ("String", Json::String(s)) => Ok(ArgValue::Str(s.clone())),
            ("Boolean", Json::Bool(b)) => Ok(ArgValue::Bool(*b)),
            (expected, found) => Err(format!("expected {expected}, found {found}")),
        },
    }
}

/// Default values cannot reference variables, so this is total.
fn literal_json(value: &InputValue) -> Json {
    match value {
        InputValue::Null | InputValue::Variable(_) => Json::Null,
        InputValue::Int(n) => Json::from(*n),
        InputValue::String(s) => Json::String(s.clone()),
        InputValue::Bool(b) => Json::Bool(*b),
        InputValue::List(items) => Json::Array(items.iter().map(literal_json).collect()),
    }
}

fn substitute(
    value: &InputValue,
    vars: &HashMap<String, ArgValue>,
    pos: Pos,
) -> Result<ArgValue, PlanError> {
    Ok(match value {
        InputValue::Null => ArgValue::Null,
        InputValue::Int(n) => ArgValue::Int(*n),
        InputValue::String(s) => ArgValue::Str(s.clone()),
        InputValue::Bool(b) => ArgValue::Bool(*b),
        InputValue::List(items) => ArgValue::List(
            items
                .iter()
                .map(|item| substitute(item, vars, pos))
                .collect::<Result<_, _>>()?,
        ),
        InputValue::Variable(name) => vars
            .get(name)
            .cloned()
            .ok_or_else(|| PlanError::at(format!("variable ${name} is not defined"), pos))?,
    })
}

fn check_arg(def: &ArgDef, value: ArgValue) -> Result<ArgValue, String> {
    match (def.ty, value) {
        (_, ArgValue::Null) => Ok(ArgValue::Null),
        (InputType::Int, v @ ArgValue::Int(_))
        | (InputType::String, v @ ArgValue::Str(_))
        | (InputType::Boolean, v @ ArgValue::Bool(_)) => Ok(v),
        (InputType::IntList, ArgValue::List(items)) => {
            if items.iter().all(|i| matches!(i, ArgValue::Int(_))) {
                Ok(ArgValue::List(items))
            } else {
                Err(format!("expected {}", def.ty))
            }
        }
        (InputType::IntList, v @ ArgValue::Int(_)) => Ok(ArgValue::List(vec![v])),
        (ty, _) => Err(format!("expected {ty}")),
    }
}

/// Coerced, non-null arguments of one root field.
struct Args {
    field: &'static str,
    values: HashMap<&'static str, ArgValue>,
}

impl Args {
    fn resolve(
        def: &'static FieldDef,
        field: &Field,
        vars: &HashMap<String, ArgValue>,
    ) -> Result<Self, PlanError> {
        let mut values = HashMap::new();
        let mut seen = HashSet::new();
        for (name, raw) in &field.arguments {
            let fail = |m: String| {
                PlanError::at(format!("argument {name} on {}: {m}", def.name), field.pos)
            };
            if !seen.insert(name.as_str()) {
                return Err(fail("given twice".to_string()));
            }
            let arg = def
                .arg(name)
                .ok_or_else(|| fail("unknown argument".to_string()))?;
            let value = check_arg(arg, substitute(raw, vars, field.pos)?).map_err(fail)?;
            if value != ArgValue::Null {
                values.insert(arg.name, value);
            }
        }
        for arg in def.args {
            if arg.required && !values.contains_key(arg.name) {
                return Err(PlanError::at(
                    format!("missing required argument {} on {}", arg.name, def.name),
                    field.pos,
                ));
            }
        }
        Ok(Self {
            field: def.name,
            values,
        })
    }

    fn id(&self, name: &str) -> Result<EntityId, PlanError> {
        match self.values.get(name) {
            Some(ArgValue::Int(n)) => self.to_id(*n, name),
            _ => Err(self.missing(name)),
        }
    }

    fn ids(&self, name: &str) -> Result<Vec<EntityId>, PlanError> {
        match self.values.get(name) {
            Some(ArgValue::List(items)) => items
                .iter()
                .map(|item| match item {
                    ArgValue::Int(n) => self.to_id(*n, name),
                    _ => Err(self.missing(name)),
                })
                .collect(),
            _ => Err(self.missing(name)),
        }
    }

    fn text(&self, name: &str) -> Result<String, PlanError> {
        self.opt_text(name).ok_or_else(|| self.missing(name))
    }

    fn opt_text(&self, name: &str) -> Option<String> {
        match self.values.get(name) {
            Some(ArgValue::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    fn to_id(&self, n: i64, name: &str) -> Result<EntityId, PlanError> {
        u64::try_from(n).map(EntityId).map_err(|_| {
            PlanError::new(format!(
                "argument {name} on {}: {n} is not a valid id",
                self.field
            ))
        })
    }

    fn missing(&self, name: &str) -> PlanError {
        PlanError::new(format!("missing required argument {name} on {}", self.field))
    }

    fn action(&self, root: RootField) -> Result<RootAction, PlanError> {
        let domain = |request| Ok(RootAction::Domain(request));
        let state = |change| -> Result<RootAction, PlanError> {
            domain(DomainRequest::ChangeAccountState {
                account_id: self.id("id")?,
                change,
            })
        };
        match root {
            RootField::User => domain(DomainRequest::GetUser { id: self.id("id")? }),
            RootField::UserByName => domain(DomainRequest::FindUserByName {
                name: self.text("name")?,
            }),
            RootField::UserByEmail => domain(DomainRequest::FindUserByEmail {
                email: self.text("email")?,
            }),
            RootField::Users => domain(DomainRequest::ListUsers {
                filter: UserFilter {
                    name_contains: self.opt_text("nameContains"),
                },
            }),
            RootField::Account => domain(DomainRequest::GetAccount { id: self.id("id")? }),
            RootField::Accounts => domain(DomainRequest::GetAccounts {
                ids: self.ids("ids")?,
            }),
            RootField::Transfer => domain(DomainRequest::GetTransfer { id: self.id("id")? }),
            RootField::Transfers => domain(DomainRequest::ListTransfers {
                account_ids: vec![self.id("accountId")?],
            }),
            RootField::Schema => Ok(RootAction::SchemaInfo),
            RootField::CreateUser => domain(DomainRequest::CreateUser {
                name: self.text("name")?,
                email: self.text("email")?,
            }),
            RootField::UpdateUser => domain(DomainRequest::UpdateUser {
                id: self.id("id")?,
                name: self.opt_text("name"),
                email: self.opt_text("email"),
            }),
            RootField::DeleteUser => domain(DomainRequest::DeleteUser { id: self.id("id")? }),
            RootField::OpenAccount => domain(DomainRequest::OpenAccount {
                user_id: self.id("userId")?,
                name: self.text("name")?,
            }),
            RootField::RenameAccount => domain(DomainRequest::RenameAccount {
                user_id: self.id("userId")?,
                account_id: self.id("accountId")?,
                name: self.text("name")?,
            }),
            RootField::BlockAccount => state(AccountStateChange::Block),
            RootField::UnblockAccount => state(AccountStateChange::Unblock),
            RootField::CloseAccount => state(AccountStateChange::Close),
            RootField::SendTransfer => {
                let from = self.id("fromAccountId")?;
                let to = self.id("toAccountId")?;
                Ok(match parse_amount(&self.text("amount")?) {
                    Ok(amount_minor) => RootAction::Domain(DomainRequest::Transfer {
                        from,
                        to,
                        amount_minor,
                    }),
                    Err(e) => RootAction::Reject(e),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::graph::parser::parse;

    fn plan_of(query: &str, vars: Json) -> Result<Plan, PlanError> {
        let doc = parse(query).unwrap();
        let vars = vars.as_object().cloned().unwrap_or_default();
        plan(&doc, None, &vars)
    }

    fn request(plan: &Plan, i: usize) -> &DomainRequest {
        match &plan.roots[i].action {
            RootAction::Domain(r) => r,
            other => panic!("expected domain action, got {other:?}"),
        }
    }

    #[test]
    fn roots_become_domain_requests() {
        let plan = plan_of(
            "{ a: user(id: 1) { name } b: accounts(ids: [2, 3]) { id owner { email } } schema { active } }",
            Json::Null,
        )
        .unwrap();
        assert_eq!(plan.access(), Access::Read);
        assert_eq!(request(&plan, 0), &DomainRequest::GetUser { id: EntityId(1) });
        assert_eq!(
            request(&plan, 1),
            &DomainRequest::GetAccounts {
                ids: vec![EntityId(2), EntityId(3)]
            }
        );
        assert!(matches!(plan.roots[2].action, RootAction::SchemaInfo));
        let owner = &plan.roots[1].selection[1];
        assert_eq!(owner.key, "owner");
        assert_eq!(owner.selection[0].key, "email");

        let typename = plan_of("{ __typename }", Json::Null).unwrap();
        assert_eq!(typename.roots.len(), 1);
        assert!(matches!(typename.roots[0].action, RootAction::TypeName("Query")));
    }

    #[test]
    fn variables_and_defaults() {
        let plan = plan_of(
            "mutation ($from: Int!, $to: Int!, $amount: String = \"2.50\") {
               transfer(fromAccountId: $from, toAccountId: $to, amount: $amount) { id }
             }",
            json!({"from": 1, "to": 2}),
        )
        .unwrap();
        assert_eq!(plan.access(), Access::Write);
        assert_eq!(
            request(&plan, 0),
            &DomainRequest::Transfer {
                from: EntityId(1),
                to: EntityId(2),
                amount_minor: 250
            }
        );
        assert!(plan
            .written_fields()
            .contains(&FieldRef::new(twinport_core::EntityKind::Accounts, "balance")));
    }

    #[test]
    fn single_value_coerces_to_list() {
        let plan = plan_of(
            "query ($ids: [Int!]!) { accounts(ids: $ids) { id } }",
            json!({"ids": 7}),
        )
        .unwrap();
        assert_eq!(
            request(&plan, 0),
            &DomainRequest::GetAccounts {
                ids: vec![EntityId(7)]
            }
        );
    }

    #[test]
    fn bad_amount_is_rejected_at_run_time() {
        let plan = plan_of(
            "mutation { transfer(fromAccountId: 1, toAccountId: 2, amount: \"1.234\") { id } }",
            Json::Null,
        )
        .unwrap();
        assert!(matches!(
            plan.roots[0].action,
            RootAction::Reject(DomainError::ValidationFailed(_))
        ));
    }

    #[test]
    fn validation_failures() {
        let cases = [
            ("{ user(id: 1) { password } }", "unknown field password"),
            ("{ user { id } }", "missing required argument id"),
            ("{ user(id: \"1\") { id } }", "expected Int"),
            ("{ user(id: 1, id: 2) { id } }", "given twice"),
            ("{ user(id: 1) }", "needs a selection"),
            ("{ user(id: 1) { name { x } } }", "is a scalar"),
            ("{ user(id: 1) { id id } }", "duplicate response key id"),
            ("{ user(id: 1) { accounts(first: 2) { id } } }", "unknown argument first"),
            ("{ user(id: $nope) { id } }", "$nope is not defined"),
            ("{ user(id: -1) { id } }", "not a valid id"),
            ("{ createUser(name: \"a\", email: \"b\") { id } }", "unknown field createUser"),
            ("query ($x: Float) { schema { active } }", "unknown input type Float"),
            ("query ($x: Int!) { user(id: $x) { id } }", "was not provided"),
        ];
        for (query, expected) in cases {
            let err = plan_of(query, Json::Null).unwrap_err();
            assert!(
                err.message.contains(expected),
                "{query}: {:?} does not mention {expected:?}",
                err.message
            );
        }
    }

    #[test]
    fn mistyped_variable() {
        let err = plan_of("query ($x: Int) { user(id: $x) { id } }", json!({"x": "one"}))
            .unwrap_err();
        assert!(err.message.contains("variable $x"));
    }

    #[test]
    fn operation_selection() {
        let doc = parse("query A { schema { active } } query B { users { id } }").unwrap();
        let empty = Map::new();
        assert!(plan(&doc, None, &empty).is_err());
        assert!(plan(&doc, Some("C"), &empty).is_err());
        let b = plan(&doc, Some("B"), &empty).unwrap();
        assert_eq!(b.roots[0].key, "users");
    }

    #[test]
    fn plan_errors_render_as_validation_failures() {
        let err = plan_of("{ nope }", Json::Null).unwrap_err();
        let graph: GraphError = err.into();
        assert_eq!(graph.code(), GRAPH_VALIDATION_FAILED);
        assert_eq!(graph.locations.len(), 1);
    }
}
