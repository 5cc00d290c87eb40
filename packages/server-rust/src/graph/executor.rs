//! Plan execution inside one dispatch scope.
//!
//! Root fields run in document order. Below each root the tree is resolved
//! level by level: scalar fields are filled in directly, and every relation
//! at a level is collected first so that all to-one lookups of one kind go
//! out as a single batched call, as does each to-many relation.

use async_trait::async_trait;
use serde_json::{Map, Value as Json};
use tracing::debug;
use twinport_core::money::format_minor;
use twinport_core::{
    Access, DomainError, DomainRequest, Entity, EntityId, EntityKind, FieldRef, OperationResult,
    SchemaVersion, BUILT_AGAINST,
};

use super::document::{OperationKind, Pos};
use super::plan::{Plan, PlannedField, PlannedRoot, RootAction};
use super::response::{GraphError, PathSegment};
use super::types::{FieldDef, ObjectType, Resolver};
use crate::service::{DomainSession, Work};

/// A whole graph operation, run as one unit of work.
#[derive(Debug)]
pub struct GraphWork {
    plan: Plan,
}

impl GraphWork {
    #[must_use]
    pub fn new(plan: Plan) -> Self {
        Self { plan }
    }
}

/// Resolved data plus field errors.
///
/// `data` is `None` when every root field of a query failed.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphOutcome {
    pub data: Option<Map<String, Json>>,
    pub errors: Vec<GraphError>,
}

#[async_trait]
impl Work for GraphWork {
    type Output = GraphOutcome;

    fn name(&self) -> &'static str {
        match self.plan.kind {
            OperationKind::Query => "graph_query",
            OperationKind::Mutation => "graph_mutation",
        }
    }

    fn access(&self) -> Access {
        self.plan.access()
    }

    fn written_fields(&self) -> Vec<FieldRef> {
        self.plan.written_fields()
    }

    async fn run(self, session: &mut DomainSession<'_>) -> Result<GraphOutcome, DomainError> {
        execute(&self.plan, session).await
    }
}

/// Executes `plan`.
///
/// Query root failures become field errors. A mutation root failure is
/// returned as the error of the whole operation so dispatch rolls back.
///
/// # Errors
///
/// Returns the first failing mutation root's error.
pub async fn execute(
    plan: &Plan,
    session: &mut DomainSession<'_>,
) -> Result<GraphOutcome, DomainError> {
    let mut out = Output {
        data: Json::Object(Map::new()),
        errors: Vec::new(),
        active: session.schema().version,
    };

    let mut failed = 0;
    for root in &plan.roots {
        let path = vec![PathSegment::Key(root.key.clone())];
        out.put(&path, Json::Null);
        if let Err(e) = out.resolve_root(session, root, &path).await {
            if plan.kind == OperationKind::Mutation {
                return Err(e);
            }
            failed += 1;
            out.field_error(&e, path, root.pos);
        }
    }

    let data = match out.data {
        Json::Object(map) if failed < plan.roots.len() => Some(map),
        _ => None,
    };
    Ok(GraphOutcome {
        data,
        errors: out.errors,
    })
}

/// Where an object's field values come from.
enum Source {
    Entity(Entity),
    Schema,
}

/// An object placed in the response whose selection is not resolved yet.
struct Pending<'p> {
    path: Vec<PathSegment>,
    object: ObjectType,
    source: Source,
    selection: &'p [PlannedField],
}

struct ToOneLink<'p> {
    path: Vec<PathSegment>,
    id: EntityId,
    field: &'p PlannedField,
}

struct ToManyLink<'p> {
    path: Vec<PathSegment>,
    parent: EntityId,
    field: &'p PlannedField,
}

/// Every to-many link at one level that shares a relation.
struct ToManyGroup<'p> {
    kind: EntityKind,
    via: &'static [&'static str],
    links: Vec<ToManyLink<'p>>,
}

struct Output {
    data: Json,
    errors: Vec<GraphError>,
    active: SchemaVersion,
}

impl Output {
    async fn resolve_root<'p>(
        &mut self,
        session: &mut DomainSession<'_>,
        root: &'p PlannedRoot,
        path: &[PathSegment],
    ) -> Result<(), DomainError> {
        let request = match &root.action {
            RootAction::Reject(e) => return Err(e.clone()),
            RootAction::TypeName(name) => {
                self.put(path, Json::from(*name));
                return Ok(());
            }
            RootAction::SchemaInfo => {
                self.put(path, Json::Object(Map::new()));
                let pending = Pending {
                    path: path.to_vec(),
                    object: ObjectType::SchemaInfo,
                    source: Source::Schema,
                    selection: &root.selection,
                };
                self.resolve_levels(session, vec![pending]).await;
                return Ok(());
            }
            RootAction::Domain(request) => request.clone(),
        };

        let result = session.call(request).await?;
        let Some(object) = root.ty.object() else {
            // Scalar roots: only `deleteUser`, which yields the removed id.
            return match result {
                OperationResult::Removed { id, .. } => {
                    self.put(path, Json::from(id.0));
                    Ok(())
                }
                other => Err(DomainError::internal(format!(
                    "scalar root {} got {other:?}",
                    root.key
                ))),
            };
        };

        let pending = match result {
            OperationResult::Entity(entity) => {
                self.put(path, Json::Object(Map::new()));
                vec![Pending {
                    path: path.to_vec(),
                    object,
                    source: Source::Entity(entity),
                    selection: &root.selection,
                }]
            }
            OperationResult::Entities(rows) => {
                self.put(path, placeholders(rows.len()));
                rows.into_iter()
                    .enumerate()
                    .map(|(i, entity)| Pending {
                        path: child(path, i),
                        object,
                        source: Source::Entity(entity),
                        selection: &root.selection,
                    })
                    .collect()
            }
            OperationResult::Removed { kind, id } => {
                return Err(DomainError::internal(format!(
                    "object root {} got removal of {kind} {id}",
                    root.key
                )));
            }
        };
        self.resolve_levels(session, pending).await;
        Ok(())
    }

    async fn resolve_levels<'p>(
        &mut self,
        session: &mut DomainSession<'_>,
        mut level: Vec<Pending<'p>>,
    ) {
        while !level.is_empty() {
            let mut to_one: Vec<(EntityKind, Vec<ToOneLink<'p>>)> = Vec::new();
            let mut to_many: Vec<ToManyGroup<'p>> = Vec::new();

            for item in &level {
                for field in item.selection {
                    let path = child(&item.path, field.key.as_str());
                    match (field.def.resolver, &item.source) {
                        (Resolver::ToOne { kind, via }, Source::Entity(entity)) => {
                            self.put(&path, Json::Null);
                            match entity.reference(via) {
                                Ok(id) => push_to_one(&mut to_one, kind, ToOneLink { path, id, field }),
                                Err(e) => self.field_error(&e, path, field.pos),
                            }
                        }
                        (Resolver::ToMany { kind, via }, Source::Entity(entity)) => {
                            self.put(&path, Json::Null);
                            let link = ToManyLink {
                                path,
                                parent: entity.id,
                                field,
                            };
                            match to_many.iter_mut().find(|g| g.kind == kind && g.via == via) {
                                Some(group) => group.links.push(link),
                                None => to_many.push(ToManyGroup {
                                    kind,
                                    via,
                                    links: vec![link],
                                }),
                            }
                        }
                        _ => match self.scalar(item, field.def) {
                            Ok(value) => self.put(&path, value),
                            Err(e) => {
                                self.put(&path, Json::Null);
                                self.field_error(&e, path, field.pos);
                            }
                        },
                    }
                }
            }

            let mut next = Vec::new();
            for (kind, links) in to_one {
                self.load_to_one(session, kind, links, &mut next).await;
            }
            for group in to_many {
                self.load_to_many(session, group, &mut next).await;
            }
            level = next;
        }
    }

    async fn load_to_one<'p>(
        &mut self,
        session: &mut DomainSession<'_>,
        kind: EntityKind,
        links: Vec<ToOneLink<'p>>,
        next: &mut Vec<Pending<'p>>,
    ) {
        let mut ids: Vec<EntityId> = Vec::with_capacity(links.len());
        for link in &links {
            if !ids.contains(&link.id) {
                ids.push(link.id);
            }
        }
        debug!(kind = %kind, ids = ids.len(), "graph to-one batch");

        let rows = match batch_get(kind, ids) {
            Ok(request) => session.call(request).await.and_then(OperationResult::into_entities),
            Err(e) => Err(e),
        };
        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                for link in links {
                    self.field_error(&e, link.path, link.field.pos);
                }
                return;
            }
        };

        for link in links {
            match rows.iter().find(|row| row.id == link.id) {
                Some(row) => {
                    self.put(&link.path, Json::Object(Map::new()));
                    next.push(Pending {
                        path: link.path,
                        object: ObjectType::for_kind(kind),
                        source: Source::Entity(row.clone()),
                        selection: &link.field.selection,
                    });
                }
                None => {
                    let e = DomainError::not_found(kind, link.id);
                    self.field_error(&e, link.path, link.field.pos);
                }
            }
        }
    }

    async fn load_to_many<'p>(
        &mut self,
        session: &mut DomainSession<'_>,
        group: ToManyGroup<'p>,
        next: &mut Vec<Pending<'p>>,
    ) {
        let mut parents: Vec<EntityId> = Vec::with_capacity(group.links.len());
        for link in &group.links {
            if !parents.contains(&link.parent) {
                parents.push(link.parent);
            }
        }
        debug!(kind = %group.kind, parents = parents.len(), "graph to-many batch");

        let rows = match batch_list(group.kind, parents) {
            Ok(request) => session.call(request).await.and_then(OperationResult::into_entities),
            Err(e) => Err(e),
        };
        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                for link in group.links {
                    self.field_error(&e, link.path, link.field.pos);
                }
                return;
            }
        };

        for link in group.links {
            let children: Vec<&Entity> = rows
                .iter()
                .filter(|row| {
                    group
                        .via
                        .iter()
                        .any(|col| row.get(col).as_ref_id() == Some(link.parent))
                })
                .collect();
            self.put(&link.path, placeholders(children.len()));
            for (i, row) in children.into_iter().enumerate() {
                next.push(Pending {
                    path: child(&link.path, i),
                    object: ObjectType::for_kind(group.kind),
                    source: Source::Entity(row.clone()),
                    selection: &link.field.selection,
                });
            }
        }
    }

    fn scalar(&self, item: &Pending<'_>, def: &FieldDef) -> Result<Json, DomainError> {
        match (def.resolver, &item.source) {
            (Resolver::TypeName, _) => Ok(Json::from(item.object.name())),
            (Resolver::Id, Source::Entity(e)) => Ok(Json::from(e.id.0)),
            (Resolver::SchemaVersion, Source::Entity(e)) => Ok(Json::from(e.schema_version.0)),
            (Resolver::Column(col), Source::Entity(e)) => Ok(e.get(col).to_json()),
            (Resolver::Money(col), Source::Entity(e)) => Ok(Json::String(format_minor(e.int(col)?))),
            (Resolver::BuiltAgainst, Source::Schema) => Ok(Json::from(BUILT_AGAINST.0)),
            (Resolver::Active, Source::Schema) => Ok(Json::from(self.active.0)),
            (resolver, _) => Err(DomainError::internal(format!(
                "{resolver:?} cannot resolve on {}",
                item.object.name()
            ))),
        }
    }

    /// Writes `value` at `path`, which must address an existing slot or a
    /// key of an existing object.
    fn put(&mut self, path: &[PathSegment], value: Json) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };
        let mut slot = Some(&mut self.data);
        for segment in parents {
            slot = slot.and_then(|v| match segment {
                PathSegment::Key(k) => v.get_mut(k.as_str()),
                PathSegment::Index(i) => v.get_mut(*i),
            });
        }
        match (slot, last) {
            (Some(Json::Object(map)), PathSegment::Key(k)) => {
                map.insert(k.clone(), value);
            }
            (Some(Json::Array(items)), PathSegment::Index(i)) if *i < items.len() => {
                items[*i] = value;
            }
            _ => debug!(?path, "response slot missing"),
        }
    }

    fn field_error(&mut self, e: &DomainError, path: Vec<PathSegment>, pos: Pos) {
        self.errors
            .push(GraphError::from_domain(e).at(pos).with_path(path));
    }
}

fn push_to_one<'p>(
    groups: &mut Vec<(EntityKind, Vec<ToOneLink<'p>>)>,
    kind: EntityKind,
    link: ToOneLink<'p>,
) {
    match groups.iter_mut().find(|(k, _)| *k == kind) {
        Some((_, links)) => links.push(link),
        None => groups.push((kind, vec![link])),
    }
}

fn batch_get(kind: EntityKind, ids: Vec<EntityId>) -> Result<DomainRequest, DomainError> {
    match kind {
        EntityKind::Users => Ok(DomainRequest::GetUsers { ids }),
        EntityKind::Accounts => Ok(DomainRequest::GetAccounts { ids }),
        EntityKind::Transfers => Err(DomainError::internal("no batched lookup for transfers")),
    }
}

fn batch_list(kind: EntityKind, parents: Vec<EntityId>) -> Result<DomainRequest, DomainError> {
    match kind {
        EntityKind::Accounts => Ok(DomainRequest::ListAccounts { user_ids: parents }),
        EntityKind::Transfers => Ok(DomainRequest::ListTransfers {
            account_ids: parents,
        }),
        EntityKind::Users => Err(DomainError::internal("no batched listing for users")),
    }
}

fn child(path: &[PathSegment], segment: impl Into<PathSegment>) -> Vec<PathSegment> {
    let mut path = path.to_vec();
    path.push(segment.into());
    path
}

fn placeholders(n: usize) -> Json {
    Json::Array((0..n).map(|_| Json::Object(Map::new())).collect())
}
