// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Relationship graph: every edge of every record, keyed by `(Identifier, field)`.
//!
//! The graph applies operations as either *remote* (server-confirmed,
//! canonical) or *local* (client edits). Every mutation of a non-implicit edge
//! is mirrored on its inverse, so the graph stays bidirectional on both layers.
//!
//! Remote operations are usually [`Graph::push`]ed: they are buffered per kind
//! and applied in one transaction by [`Graph::flush_remote_queue`] in the
//! order deletions, `hasMany` updates, `belongsTo` updates. Remote `hasMany`
//! changes only touch canonical state; the local-sync pass
//! ([`Graph::flush_local_sync`]) then replays the client's own edits on top.
//!
//! # Invariants
//! - Edges are created lazily and cleared (not dropped) on unload; they are
//!   dropped only by [`Graph::remove`] or a remote `deleteRecord`.
//! - Notifications are never emitted for the record being removed.
//! - Notifications for edges touched inside a transaction are emitted once
//!   each, after the transaction finalizes.
//! - A failing operation never discards the rest of its pass; the pass
//!   returns the first error once every buffered operation was tried.
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

use crate::definition::{DefinitionCache, EdgeDefinition, EdgeKind, SchemaError};
use crate::document::Linkage;
use crate::edge::{BelongsToEdge, Edge, HasManyEdge, RelationshipData};
use crate::ident::{Identifier, IdentifierCache, IdentifierError};
use crate::operation::Operation;
use crate::scheduler::{Phase, Scheduler};
use crate::schema::SchemaService;
use crate::wrapper::{ChangeKind, RecordRef, StoreWrapper};

mod inverse;
mod operations;

type EdgeMap = BTreeMap<Identifier, BTreeMap<String, Edge>>;

/// Errors raised by graph operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Schema resolution failed.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// Identifier lookup or assignment failed.
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
    /// The operation does not fit the relationship kind.
    #[error("{op} on '{ty}.{field}' expects {expected:?}, found {actual:?}")]
    KindMismatch {
        /// Model name.
        ty: String,
        /// Field name.
        field: String,
        /// Operation name.
        op: &'static str,
        /// Kind the operation needs.
        expected: EdgeKind,
        /// Kind of the relationship.
        actual: EdgeKind,
    },
    /// Implicit edges are bookkeeping only.
    #[error("implicit relationship '{0}' cannot be read or updated directly")]
    ImplicitAccess(String),
    /// The operation may only describe server state.
    #[error("{0} is a remote-only operation")]
    RemoteOnly(&'static str),
    /// The operation may only describe client edits.
    #[error("{0} is a local-only operation")]
    LocalOnly(&'static str),
    /// Linkage shape does not match the relationship cardinality.
    #[error("linkage for '{ty}.{field}' does not match its cardinality")]
    InvalidLinkage {
        /// Model name.
        ty: String,
        /// Field name.
        field: String,
    },
    /// `remove` was entered for a second record while one is being removed.
    #[error("cannot remove {requested} while still removing {current}")]
    ReentrantRemoval {
        /// Record being removed.
        current: Identifier,
        /// Record whose removal was requested.
        requested: Identifier,
    },
    /// The remote queue was flushed from inside an open transaction.
    #[error("remote queue flushed while a transaction is open")]
    ReentrantFlush,
}

#[derive(Debug, Default)]
struct PushedUpdates {
    deletions: Vec<Operation>,
    has_many: Vec<Operation>,
    belongs_to: Vec<Operation>,
}

impl PushedUpdates {
    fn len(&self) -> usize {
        self.deletions.len() + self.has_many.len() + self.belongs_to.len()
    }
}

enum Bucket {
    Deletions,
    HasMany,
    BelongsTo,
}

fn bucket_for(kind: EdgeKind, field: &str) -> Result<Bucket, GraphError> {
    match kind {
        EdgeKind::BelongsTo => Ok(Bucket::BelongsTo),
        EdgeKind::HasMany => Ok(Bucket::HasMany),
        EdgeKind::Implicit => Err(GraphError::ImplicitAccess(field.to_owned())),
    }
}

/// Store-scoped relationship graph.
pub struct Graph {
    identifiers: IdentifierCache,
    definitions: DefinitionCache,
    edges: EdgeMap,
    schema: Rc<dyn SchemaService>,
    wrapper: Rc<dyn StoreWrapper>,
    scheduler: Scheduler,
    pushed: PushedUpdates,
    will_sync_remote: bool,
    transaction: Option<Vec<(Identifier, String)>>,
    deferred: BTreeSet<(Identifier, String)>,
    sync_queue: Vec<(Identifier, String)>,
    new_records: BTreeSet<Identifier>,
    removing: Option<Identifier>,
}

impl core::fmt::Debug for Graph {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Graph")
            .field("identifiers", &self.identifiers.len())
            .field("records", &self.edges.len())
            .field("pending_remote", &self.pushed.len())
            .field("pending_sync", &self.sync_queue.len())
            .finish_non_exhaustive()
    }
}

fn edge_in<'a>(edges: &'a mut EdgeMap, identifier: Identifier, key: &str) -> Option<&'a mut Edge> {
    edges.get_mut(&identifier).and_then(|fields| fields.get_mut(key))
}

impl Graph {
    /// Creates an empty graph.
    pub fn new(
        schema: Rc<dyn SchemaService>,
        wrapper: Rc<dyn StoreWrapper>,
        scheduler: Scheduler,
    ) -> Self {
        Self::with_identifiers(IdentifierCache::new(), schema, wrapper, scheduler)
    }

    /// Creates an empty graph over an existing identifier cache.
    pub fn with_identifiers(
        identifiers: IdentifierCache,
        schema: Rc<dyn SchemaService>,
        wrapper: Rc<dyn StoreWrapper>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            identifiers,
            definitions: DefinitionCache::new(),
            edges: BTreeMap::new(),
            schema,
            wrapper,
            scheduler,
            pushed: PushedUpdates::default(),
            will_sync_remote: false,
            transaction: None,
            deferred: BTreeSet::new(),
            sync_queue: Vec::new(),
            new_records: BTreeSet::new(),
            removing: None,
        }
    }

    /// The identifier cache.
    pub fn identifiers(&self) -> &IdentifierCache {
        &self.identifiers
    }

    /// Mutable access to the identifier cache.
    pub fn identifiers_mut(&mut self) -> &mut IdentifierCache {
        &mut self.identifiers
    }

    /// The schema this graph resolves definitions against.
    pub fn schema(&self) -> &Rc<dyn SchemaService> {
        &self.schema
    }

    /// Scheduler handle shared with the owner of the turn.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Resolves the edge definition of `identifier.field`.
    pub fn definition_for(
        &mut self,
        identifier: Identifier,
        field: &str,
    ) -> Result<Rc<EdgeDefinition>, GraphError> {
        let ty = self.identifiers.ty(identifier)?;
        Ok(self.definitions.definition_for(self.schema.as_ref(), ty, field)?)
    }

    /// Returns the edge for `identifier.field`, creating it on first access.
    pub fn get(&mut self, identifier: Identifier, field: &str) -> Result<&Edge, GraphError> {
        self.ensure(identifier, field).map(|edge| &*edge)
    }

    /// Returns the edge when it already exists.
    pub fn peek(&self, identifier: Identifier, field: &str) -> Option<&Edge> {
        self.edges.get(&identifier).and_then(|fields| fields.get(field))
    }

    /// Returns `true` when the edge exists.
    pub fn has(&self, identifier: Identifier, field: &str) -> bool {
        self.peek(identifier, field).is_some()
    }

    /// Existing edges of `identifier` in field order.
    pub fn edges_of(&self, identifier: Identifier) -> impl Iterator<Item = (&str, &Edge)> {
        self.edges
            .get(&identifier)
            .into_iter()
            .flat_map(|fields| fields.iter().map(|(k, e)| (k.as_str(), e)))
    }

    /// Read payload of `identifier.field`.
    pub fn get_data(
        &mut self,
        identifier: Identifier,
        field: &str,
    ) -> Result<RelationshipData, GraphError> {
        self.ensure(identifier, field)?
            .get_data()
            .ok_or_else(|| GraphError::ImplicitAccess(field.to_owned()))
    }

    /// Records that records of `a` may stand in for `b` and vice versa.
    pub fn register_polymorphic_type(&mut self, a: &str, b: &str) {
        self.definitions.register_polymorphic_type(a, b);
    }

    /// Marks a record as client-created (or confirmed, with `false`).
    pub fn set_new(&mut self, identifier: Identifier, is_new: bool) {
        if is_new {
            self.new_records.insert(identifier);
        } else {
            self.new_records.remove(&identifier);
        }
    }

    /// Returns `true` for client-created records not yet confirmed.
    pub fn is_new(&self, identifier: Identifier) -> bool {
        self.new_records.contains(&identifier)
    }

    /// Marks a freshly created record: it is new, and every declared
    /// relationship is known (to be empty until set).
    pub fn client_did_create(&mut self, identifier: Identifier) -> Result<(), GraphError> {
        self.set_new(identifier, true);
        let ty = self.identifiers.ty(identifier)?.to_owned();
        let fields: Vec<String> = self
            .schema
            .relationships_for(&ty)
            .iter()
            .map(|r| r.name.clone())
            .collect();
        for field in fields {
            if let Some(state) = self.ensure(identifier, &field)?.state_mut() {
                state.has_received_data = true;
            }
        }
        Ok(())
    }

    /// Buffers a remote operation for the next coalesce pass.
    ///
    /// Linkage whose shape contradicts the relationship cardinality is
    /// rejected here and never buffered.
    pub fn push(&mut self, op: Operation) -> Result<(), GraphError> {
        let bucket = match &op {
            Operation::DeleteRecord { .. } => Bucket::Deletions,
            Operation::ReplaceRelatedRecord { .. } => Bucket::BelongsTo,
            Operation::UpdateRelationship {
                record,
                field,
                value,
            } => {
                let definition = self.definition_for(*record, field)?;
                let mismatched = matches!(
                    (definition.kind(), &value.data),
                    (EdgeKind::HasMany, Some(Some(Linkage::One(_))))
                        | (EdgeKind::BelongsTo, Some(Some(Linkage::Many(_))))
                );
                if mismatched {
                    return Err(GraphError::InvalidLinkage {
                        ty: definition.lhs.model.clone(),
                        field: field.clone(),
                    });
                }
                bucket_for(definition.kind(), field)?
            }
            Operation::ReplaceRelatedRecords { record, field, .. } => {
                bucket_for(self.definition_for(*record, field)?.kind(), field)?
            }
            Operation::AddToRelatedRecords { .. } | Operation::RemoveFromRelatedRecords { .. } => {
                return Err(GraphError::LocalOnly(op.name()))
            }
        };
        trace!(op = op.name(), record = %op.record(), "buffered remote operation");
        match bucket {
            Bucket::Deletions => self.pushed.deletions.push(op),
            Bucket::HasMany => self.pushed.has_many.push(op),
            Bucket::BelongsTo => self.pushed.belongs_to.push(op),
        }
        if !self.will_sync_remote {
            self.will_sync_remote = true;
            self.scheduler.schedule(Phase::Coalesce);
        }
        Ok(())
    }

    /// Applies an operation immediately.
    ///
    /// Remote operations outside a coalesce pass run in their own transaction.
    /// Local operations schedule a local-sync pass.
    pub fn update(&mut self, op: Operation, is_remote: bool) -> Result<(), GraphError> {
        if is_remote && self.transaction.is_none() {
            self.transaction = Some(Vec::new());
            let result = self.apply(op, true);
            self.finalize();
            return result;
        }
        self.apply(op, is_remote)?;
        if !is_remote {
            self.scheduler.schedule(Phase::Sync);
        }
        Ok(())
    }

    /// Applies every buffered remote operation in one transaction:
    /// deletions, then `hasMany` updates, then `belongsTo` updates.
    #[instrument(level = "debug", skip(self))]
    pub fn flush_remote_queue(&mut self) -> Result<(), GraphError> {
        if !self.will_sync_remote {
            return Ok(());
        }
        if self.transaction.is_some() {
            return Err(GraphError::ReentrantFlush);
        }
        self.will_sync_remote = false;
        let pushed = std::mem::take(&mut self.pushed);
        debug!(
            deletions = pushed.deletions.len(),
            has_many = pushed.has_many.len(),
            belongs_to = pushed.belongs_to.len(),
            "coalescing remote operations"
        );
        self.transaction = Some(Vec::new());
        let mut result = Ok(());
        for op in pushed
            .deletions
            .into_iter()
            .chain(pushed.has_many)
            .chain(pushed.belongs_to)
        {
            let name = op.name();
            let record = op.record();
            if let Err(err) = self.apply(op, true) {
                warn!(op = name, %record, error = %err, "remote operation failed");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        self.finalize();
        result
    }

    /// Replays local edits on top of refreshed canonical `hasMany` state.
    #[instrument(level = "debug", skip(self))]
    pub fn flush_local_sync(&mut self) {
        let queue = std::mem::take(&mut self.sync_queue);
        debug!(edges = queue.len(), "syncing remote state to local");
        for (identifier, key) in queue {
            let changed = match edge_in(&mut self.edges, identifier, &key) {
                Some(Edge::HasMany(edge)) => edge.sync_remote_to_local(),
                _ => false,
            };
            if changed {
                self.notify(identifier, &key);
            }
        }
    }

    /// Runs queued coalesce and sync passes until neither is pending.
    /// Other phases stay queued for their owner.
    pub fn flush(&mut self) -> Result<(), GraphError> {
        loop {
            if self.scheduler.take(Phase::Coalesce) {
                self.flush_remote_queue()?;
            } else if self.scheduler.take(Phase::Sync) {
                self.flush_local_sync();
            } else {
                return Ok(());
            }
        }
    }

    /// Dematerializes every edge of `identifier`.
    ///
    /// Dependents are told the record went away. Edges whose inverse is sync
    /// are cleared (a client-side delete); edges with an async inverse keep
    /// their members. Implicit edges are dropped once the record is releasable.
    #[instrument(level = "trace", skip(self))]
    pub fn unload(&mut self, identifier: Identifier) {
        let keys: Vec<String> = self
            .edges
            .get(&identifier)
            .map(|fields| fields.keys().cloned().collect())
            .unwrap_or_default();
        for key in keys {
            self.destroy_relationship(identifier, &key);
        }
    }

    /// Unloads `identifier` and drops its edge table.
    pub fn remove(&mut self, identifier: Identifier) -> Result<(), GraphError> {
        if let Some(current) = self.removing {
            if current != identifier {
                return Err(GraphError::ReentrantRemoval {
                    current,
                    requested: identifier,
                });
            }
        }
        self.removing = Some(identifier);
        self.unload(identifier);
        self.detach_from_implicit_inverses(identifier);
        self.edges.remove(&identifier);
        self.new_records.remove(&identifier);
        self.removing = None;
        Ok(())
    }

    /// `false` when any edge of `identifier` has an async inverse that may
    /// still need to refetch it.
    pub fn is_releasable(&self, identifier: Identifier) -> bool {
        self.edges.get(&identifier).is_none_or(|fields| {
            fields
                .values()
                .all(|edge| !edge.definition().inverse_is_async())
        })
    }

    /// Resets the local state of every edge of `identifier` to its canonical state.
    pub fn rollback(&mut self, identifier: Identifier) -> Result<(), GraphError> {
        let ops: Vec<Operation> = self
            .edges_of(identifier)
            .filter(|(_, edge)| edge.is_dirty())
            .filter_map(|(field, edge)| match edge {
                Edge::BelongsTo(e) => Some(Operation::ReplaceRelatedRecord {
                    record: identifier,
                    field: field.to_owned(),
                    value: e.remote_state,
                }),
                Edge::HasMany(e) => Some(Operation::ReplaceRelatedRecords {
                    record: identifier,
                    field: field.to_owned(),
                    value: e.canonical_state.clone(),
                }),
                Edge::Implicit(_) => None,
            })
            .collect();
        for op in ops {
            self.update(op, false)?;
        }
        Ok(())
    }

    /// Every record reachable through one edge of `identifier`, in any state.
    pub fn related_identifiers(&self, identifier: Identifier) -> BTreeSet<Identifier> {
        let mut out = BTreeSet::new();
        for (_, edge) in self.edges_of(identifier) {
            edge.for_all_members(|m| {
                out.insert(m);
            });
        }
        out.remove(&identifier);
        out
    }

    pub(crate) fn ensure(
        &mut self,
        identifier: Identifier,
        field: &str,
    ) -> Result<&mut Edge, GraphError> {
        let definition = self.definition_for(identifier, field)?;
        Ok(self
            .edges
            .entry(identifier)
            .or_default()
            .entry(field.to_owned())
            .or_insert_with(|| Edge::new(definition, identifier)))
    }

    fn belongs_to_mut(&mut self, identifier: Identifier, key: &str) -> Option<&mut BelongsToEdge> {
        match edge_in(&mut self.edges, identifier, key) {
            Some(Edge::BelongsTo(edge)) => Some(edge),
            _ => None,
        }
    }

    fn has_many_mut(&mut self, identifier: Identifier, key: &str) -> Option<&mut HasManyEdge> {
        match edge_in(&mut self.edges, identifier, key) {
            Some(Edge::HasMany(edge)) => Some(edge),
            _ => None,
        }
    }

    fn apply(&mut self, op: Operation, is_remote: bool) -> Result<(), GraphError> {
        trace!(op = op.name(), record = %op.record(), field = ?op.field(), is_remote, "apply");
        match op {
            Operation::UpdateRelationship {
                record,
                field,
                value,
            } => {
                if !is_remote {
                    return Err(GraphError::RemoteOnly("updateRelationship"));
                }
                self.update_relationship(record, &field, value)
            }
            Operation::DeleteRecord { record } => {
                if !is_remote {
                    return Err(GraphError::RemoteOnly("deleteRecord"));
                }
                self.delete_record(record);
                Ok(())
            }
            Operation::ReplaceRelatedRecord {
                record,
                field,
                value,
            } => self.replace_related_record(record, &field, value, is_remote),
            Operation::ReplaceRelatedRecords {
                record,
                field,
                value,
            } => {
                if is_remote {
                    self.replace_related_records_remote(record, &field, value)
                } else {
                    self.replace_related_records_local(record, &field, value)
                }
            }
            Operation::AddToRelatedRecords {
                record,
                field,
                value,
                index,
            } => {
                if is_remote {
                    return Err(GraphError::LocalOnly("addToRelatedRecords"));
                }
                self.add_to_related_records(record, &field, value, index)
            }
            Operation::RemoveFromRelatedRecords {
                record,
                field,
                value,
            } => {
                if is_remote {
                    return Err(GraphError::LocalOnly("removeFromRelatedRecords"));
                }
                self.remove_from_related_records(record, &field, value)
            }
        }
    }

    fn add_to_transaction(&mut self, identifier: Identifier, key: &str) {
        let Some(touched) = self.transaction.as_mut() else {
            return;
        };
        if let Some(edge) = edge_in(&mut self.edges, identifier, key) {
            let refs = edge.transaction_ref_mut();
            *refs += 1;
            if *refs == 1 {
                touched.push((identifier, key.to_owned()));
            }
        }
    }

    fn finalize(&mut self) {
        let touched = self.transaction.take().unwrap_or_default();
        for (identifier, key) in touched {
            if let Some(edge) = edge_in(&mut self.edges, identifier, &key) {
                *edge.transaction_ref_mut() = 0;
            }
        }
        let deferred = std::mem::take(&mut self.deferred);
        for (identifier, key) in deferred {
            if let Some(edge) = self.has_many_mut(identifier, &key) {
                if let Some(pending) = edge.pending_sync.as_mut() {
                    pending.force_notify = true;
                    continue;
                }
            }
            self.notify(identifier, &key);
        }
    }

    fn begin_sync(&mut self, identifier: Identifier, key: &str) {
        if let Some(Edge::HasMany(edge)) = edge_in(&mut self.edges, identifier, key) {
            if edge.begin_sync() {
                self.sync_queue.push((identifier, key.to_owned()));
                self.scheduler.schedule(Phase::Sync);
            }
        }
    }

    fn notify(&mut self, identifier: Identifier, key: &str) {
        if self.removing == Some(identifier) {
            return;
        }
        let kind = match self.peek(identifier, key).map(Edge::kind) {
            Some(EdgeKind::BelongsTo) => ChangeKind::BelongsTo,
            Some(EdgeKind::HasMany) => ChangeKind::HasMany,
            Some(EdgeKind::Implicit) | None => return,
        };
        if self.transaction.is_some() {
            self.deferred.insert((identifier, key.to_owned()));
            return;
        }
        if let Ok(record) = self.identifiers.record(identifier) {
            self.wrapper.notify_change(
                RecordRef {
                    identifier,
                    ty: &record.ty,
                    id: record.id.as_deref(),
                    lid: &record.lid,
                },
                kind,
                Some(key),
            );
        }
    }
}
