// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Store-scoped context: identifiers, graph, record caches and the turn loop.
//!
//! A [`Store`] is the single owner of everything a client data store keeps in
//! memory. There is no global instance; hosts create as many stores as they
//! need and drive each with [`Store::flush`].
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::cache::{RecordCache, ValidationError};
use crate::config::StoreConfig;
use crate::definition::EdgeKind;
use crate::document::{Document, Linkage, RelationshipPayload, ResourceObject};
use crate::edge::{EdgeData, RelationshipData};
use crate::graph::{Graph, GraphError};
use crate::ident::{Identifier, IdentifierCache, IdentifierError, ResourceIdentifier};
use crate::operation::Operation;
use crate::scheduler::{Phase, Scheduler};
use crate::schema::SchemaService;
use crate::wrapper::{ChangeKind, RecordRef, StoreWrapper};

/// Errors raised by [`Store`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Graph operation failed.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Identifier lookup or assignment failed.
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
    /// No record cache exists for the identifier.
    #[error("no record loaded for {0}")]
    UnknownRecord(Identifier),
    /// The payload does not fit the schema.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Initial value of a relationship on a client-created record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipValue {
    /// `belongsTo` value.
    One(Option<Identifier>),
    /// `hasMany` members.
    Many(Vec<Identifier>),
}

/// Arguments to [`Store::create_record`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateOptions {
    /// Client-chosen server id.
    pub id: Option<String>,
    /// Initial attribute values.
    pub attributes: Map<String, Value>,
    /// Initial relationship values.
    pub relationships: BTreeMap<String, RelationshipValue>,
}

impl CreateOptions {
    /// Adds an attribute.
    pub fn attr(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Adds a relationship value.
    pub fn relationship(mut self, field: impl Into<String>, value: RelationshipValue) -> Self {
        self.relationships.insert(field.into(), value);
        self
    }
}

/// In-memory client store.
pub struct Store {
    graph: Graph,
    caches: BTreeMap<Identifier, RecordCache>,
    schema: Rc<dyn SchemaService>,
    wrapper: Rc<dyn StoreWrapper>,
    scheduler: Scheduler,
    config: StoreConfig,
    pending_destroy: BTreeSet<Identifier>,
}

impl core::fmt::Debug for Store {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Store")
            .field("graph", &self.graph)
            .field("records", &self.caches.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn record_ref(identifiers: &IdentifierCache, identifier: Identifier) -> Option<RecordRef<'_>> {
    let record = identifiers.record(identifier).ok()?;
    Some(RecordRef {
        identifier,
        ty: &record.ty,
        id: record.id.as_deref(),
        lid: &record.lid,
    })
}

impl Store {
    /// Creates an empty store.
    pub fn new(
        schema: Rc<dyn SchemaService>,
        wrapper: Rc<dyn StoreWrapper>,
        config: StoreConfig,
    ) -> Self {
        let scheduler = Scheduler::new();
        let identifiers = IdentifierCache::with_lid_prefix(config.lid_prefix.clone());
        let graph = Graph::with_identifiers(
            identifiers,
            schema.clone(),
            wrapper.clone(),
            scheduler.clone(),
        );
        Self {
            graph,
            caches: BTreeMap::new(),
            schema,
            wrapper,
            scheduler,
            config,
            pending_destroy: BTreeSet::new(),
        }
    }

    /// The relationship graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Mutable access to the relationship graph.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// The identifier cache.
    pub fn identifiers(&self) -> &IdentifierCache {
        self.graph.identifiers()
    }

    /// The schema.
    pub fn schema(&self) -> &Rc<dyn SchemaService> {
        &self.schema
    }

    /// Active configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Scheduler shared by the graph and the store.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Interns `resource`.
    pub fn identifier_for(
        &mut self,
        resource: &ResourceIdentifier,
    ) -> Result<Identifier, StoreError> {
        Ok(self.graph.identifiers_mut().get_or_create(resource)?)
    }

    /// The record cache of `identifier`.
    pub fn record(&self, identifier: Identifier) -> Option<&RecordCache> {
        self.caches.get(&identifier)
    }

    /// Returns `true` while a loaded record exists for `identifier`.
    pub fn is_alive(&self, identifier: Identifier) -> bool {
        self.graph.identifiers().is_live(identifier)
            && self
                .caches
                .get(&identifier)
                .is_some_and(|c| !c.is_unloaded())
    }

    /// Pushes primary data and `included` resources. Returns the primary identifiers.
    pub fn push_document(&mut self, document: &Document) -> Result<Vec<Identifier>, StoreError> {
        let mut primary = Vec::new();
        for resource in document.primary() {
            primary.push(self.push_resource(resource)?);
        }
        for resource in &document.included {
            self.push_resource(resource)?;
        }
        Ok(primary)
    }

    /// Pushes one resource and notifies every attribute whose value changed.
    pub fn push_resource(&mut self, resource: &ResourceObject) -> Result<Identifier, StoreError> {
        if !self.schema.has_model(&resource.ty) {
            return Err(StoreError::InvalidPayload(format!(
                "unknown model '{}'",
                resource.ty
            )));
        }
        if resource.id.is_none() && resource.lid.is_none() {
            return Err(StoreError::InvalidPayload(format!(
                "'{}' resource without id or lid",
                resource.ty
            )));
        }
        let identifier = self
            .graph
            .identifiers_mut()
            .get_or_create(&resource.identifier())?;
        let warn = self.config.warn_on_undeclared_relationships;
        let cache = self.caches.entry(identifier).or_insert_with(|| {
            RecordCache::new(identifier, &resource.ty).warn_on_undeclared_relationships(warn)
        });
        let changed = cache
            .push_data(&mut self.graph, resource, true)?
            .unwrap_or_default();
        self.pending_destroy.remove(&identifier);
        for key in &changed {
            self.notify(identifier, ChangeKind::Property, Some(key));
        }
        Ok(identifier)
    }

    /// Creates a client-side record.
    pub fn create_record(
        &mut self,
        ty: &str,
        options: CreateOptions,
    ) -> Result<Identifier, StoreError> {
        if !self.schema.has_model(ty) {
            return Err(StoreError::InvalidPayload(format!("unknown model '{ty}'")));
        }
        if let Some(key) = options
            .attributes
            .keys()
            .find(|key| !self.schema.has_attribute(ty, key))
        {
            return Err(StoreError::InvalidPayload(format!(
                "'{key}' is not an attribute of '{ty}'"
            )));
        }
        for (field, value) in &options.relationships {
            let Some(relationship) = self.schema.relationship(ty, field) else {
                return Err(StoreError::InvalidPayload(format!(
                    "'{field}' is not a relationship of '{ty}'"
                )));
            };
            let expected = match value {
                RelationshipValue::One(_) => EdgeKind::BelongsTo,
                RelationshipValue::Many(_) => EdgeKind::HasMany,
            };
            let actual = EdgeKind::from(relationship.kind);
            if actual != expected {
                return Err(GraphError::KindMismatch {
                    ty: ty.to_owned(),
                    field: field.clone(),
                    op: "createRecord",
                    expected,
                    actual,
                }
                .into());
            }
        }
        let identifier = self
            .graph
            .identifiers_mut()
            .create_for_new(ty, options.id.as_deref())?;
        let mut cache = RecordCache::new(identifier, ty)
            .warn_on_undeclared_relationships(self.config.warn_on_undeclared_relationships);
        cache.client_did_create(&mut self.graph, options.attributes)?;
        self.caches.insert(identifier, cache);
        for (field, value) in options.relationships {
            let op = match value {
                RelationshipValue::One(value) => Operation::ReplaceRelatedRecord {
                    record: identifier,
                    field,
                    value,
                },
                RelationshipValue::Many(value) => Operation::ReplaceRelatedRecords {
                    record: identifier,
                    field,
                    value,
                },
            };
            self.graph.update(op, false)?;
        }
        debug!(%identifier, ty, "created record");
        Ok(identifier)
    }

    /// Flags a record for deletion.
    pub fn delete_record(&mut self, identifier: Identifier) -> Result<(), StoreError> {
        let cache = self
            .caches
            .get_mut(&identifier)
            .ok_or(StoreError::UnknownRecord(identifier))?;
        cache.delete_record(&mut self.graph)?;
        self.notify(identifier, ChangeKind::State, None);
        Ok(())
    }

    /// Current value of an attribute.
    pub fn get_attr(&self, identifier: Identifier, key: &str) -> Result<Option<Value>, StoreError> {
        let cache = self
            .caches
            .get(&identifier)
            .ok_or(StoreError::UnknownRecord(identifier))?;
        Ok(cache.get_attr(key).cloned())
    }

    /// Writes a dirty attribute value.
    pub fn set_attr(
        &mut self,
        identifier: Identifier,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        self.cache_mut(identifier)?.set_dirty_attribute(key, value);
        self.notify(identifier, ChangeKind::Property, Some(key));
        Ok(())
    }

    /// Discards dirty attribute values.
    pub fn rollback_attributes(&mut self, identifier: Identifier) -> Result<(), StoreError> {
        let cache = self
            .caches
            .get_mut(&identifier)
            .ok_or(StoreError::UnknownRecord(identifier))?;
        let keys = cache.rollback_attributes(&mut self.graph)?;
        for key in &keys {
            self.notify(identifier, ChangeKind::Property, Some(key));
        }
        self.notify(identifier, ChangeKind::State, None);
        Ok(())
    }

    /// Read payload of a relationship.
    pub fn relationship(
        &mut self,
        identifier: Identifier,
        field: &str,
    ) -> Result<RelationshipData, StoreError> {
        Ok(self.graph.get_data(identifier, field)?)
    }

    /// Read payload of a relationship with members as resource identifiers.
    pub fn relationship_payload(
        &mut self,
        identifier: Identifier,
        field: &str,
    ) -> Result<RelationshipPayload, StoreError> {
        let data = self.graph.get_data(identifier, field)?;
        let identifiers = self.graph.identifiers();
        let linkage = match data.data {
            None => None,
            Some(EdgeData::One(member)) => Some(
                member
                    .map(|m| identifiers.resource(m))
                    .transpose()?
                    .map(Linkage::One),
            ),
            Some(EdgeData::Many(members)) => Some(Some(Linkage::Many(
                members
                    .into_iter()
                    .map(|m| identifiers.resource(m))
                    .collect::<Result<_, _>>()?,
            ))),
        };
        Ok(RelationshipPayload {
            data: linkage,
            links: data.links,
            meta: data.meta,
        })
    }

    /// Local value of a `belongsTo`.
    pub fn get_belongs_to(
        &mut self,
        identifier: Identifier,
        field: &str,
    ) -> Result<Option<Identifier>, StoreError> {
        self.expect_kind(identifier, field, "getBelongsTo", EdgeKind::BelongsTo)?;
        match self.graph.get_data(identifier, field)?.data {
            Some(EdgeData::One(member)) => Ok(member),
            _ => Ok(None),
        }
    }

    /// Local members of a `hasMany`.
    pub fn get_has_many(
        &mut self,
        identifier: Identifier,
        field: &str,
    ) -> Result<Vec<Identifier>, StoreError> {
        self.expect_kind(identifier, field, "getHasMany", EdgeKind::HasMany)?;
        match self.graph.get_data(identifier, field)?.data {
            Some(EdgeData::Many(members)) => Ok(members),
            _ => Ok(Vec::new()),
        }
    }

    /// Sets a `belongsTo` locally.
    pub fn set_belongs_to(
        &mut self,
        identifier: Identifier,
        field: &str,
        value: Option<Identifier>,
    ) -> Result<(), StoreError> {
        self.graph.update(
            Operation::ReplaceRelatedRecord {
                record: identifier,
                field: field.to_owned(),
                value,
            },
            false,
        )?;
        Ok(())
    }

    /// Adds members to a `hasMany` locally.
    pub fn add_to_has_many(
        &mut self,
        identifier: Identifier,
        field: &str,
        values: Vec<Identifier>,
        index: Option<usize>,
    ) -> Result<(), StoreError> {
        self.graph.update(
            Operation::AddToRelatedRecords {
                record: identifier,
                field: field.to_owned(),
                value: values,
                index,
            },
            false,
        )?;
        Ok(())
    }

    /// Removes members from a `hasMany` locally.
    pub fn remove_from_has_many(
        &mut self,
        identifier: Identifier,
        field: &str,
        values: Vec<Identifier>,
    ) -> Result<(), StoreError> {
        self.graph.update(
            Operation::RemoveFromRelatedRecords {
                record: identifier,
                field: field.to_owned(),
                value: values,
            },
            false,
        )?;
        Ok(())
    }

    /// Replaces a `hasMany` locally.
    pub fn set_has_many(
        &mut self,
        identifier: Identifier,
        field: &str,
        values: Vec<Identifier>,
    ) -> Result<(), StoreError> {
        self.graph.update(
            Operation::ReplaceRelatedRecords {
                record: identifier,
                field: field.to_owned(),
                value: values,
            },
            false,
        )?;
        Ok(())
    }

    /// Resets every relationship of `identifier` to its canonical state.
    pub fn rollback_relationships(&mut self, identifier: Identifier) -> Result<(), StoreError> {
        Ok(self.graph.rollback(identifier)?)
    }

    /// Unloads a record. The next destroy phase releases it together with
    /// its whole related closure, loaded or not, unless the wrapper reports
    /// a record of that closure as in use.
    pub fn unload_record(&mut self, identifier: Identifier) -> Result<(), StoreError> {
        let cache = self
            .caches
            .get_mut(&identifier)
            .ok_or(StoreError::UnknownRecord(identifier))?;
        if cache.unload_record(&mut self.graph) {
            self.pending_destroy.insert(identifier);
            self.scheduler.schedule(Phase::Destroy);
        }
        Ok(())
    }

    /// Runs queued phases in order until the scheduler is idle.
    #[instrument(level = "debug", skip(self))]
    pub fn flush(&mut self) -> Result<(), StoreError> {
        while let Some(phase) = self.scheduler.next_phase() {
            match phase {
                Phase::Coalesce => self.graph.flush_remote_queue()?,
                Phase::Sync => self.graph.flush_local_sync(),
                Phase::Destroy => self.release_unloaded()?,
            }
        }
        Ok(())
    }

    /// Starts a save: dirty attributes move in flight.
    pub fn will_commit(&mut self, identifier: Identifier) -> Result<(), StoreError> {
        self.cache_mut(identifier)?.will_commit();
        self.notify(identifier, ChangeKind::State, None);
        Ok(())
    }

    /// Applies a successful save. A confirmed deletion severs the record from
    /// every inverse and unloads it.
    pub fn did_save_record(
        &mut self,
        identifier: Identifier,
        resource: Option<&ResourceObject>,
    ) -> Result<(), StoreError> {
        let cache = self
            .caches
            .get_mut(&identifier)
            .ok_or(StoreError::UnknownRecord(identifier))?;
        let deleted = cache.is_deleted();
        let changed = cache.did_commit(&mut self.graph, resource)?;
        for key in &changed {
            self.notify(identifier, ChangeKind::Property, Some(key));
        }
        self.notify(identifier, ChangeKind::State, None);
        if deleted {
            self.graph
                .update(Operation::DeleteRecord { record: identifier }, true)?;
            self.unload_record(identifier)?;
        }
        Ok(())
    }

    /// Applies a failed save.
    pub fn record_was_rejected(
        &mut self,
        identifier: Identifier,
        errors: Vec<ValidationError>,
    ) -> Result<(), StoreError> {
        self.cache_mut(identifier)?.commit_was_rejected(errors);
        self.notify(identifier, ChangeKind::Errors, None);
        self.notify(identifier, ChangeKind::State, None);
        Ok(())
    }

    fn cache_mut(&mut self, identifier: Identifier) -> Result<&mut RecordCache, StoreError> {
        self.caches
            .get_mut(&identifier)
            .ok_or(StoreError::UnknownRecord(identifier))
    }

    fn expect_kind(
        &mut self,
        identifier: Identifier,
        field: &str,
        op: &'static str,
        expected: EdgeKind,
    ) -> Result<(), StoreError> {
        let actual = self.graph.definition_for(identifier, field)?.kind();
        if actual == expected {
            return Ok(());
        }
        Err(GraphError::KindMismatch {
            ty: self.graph.identifiers().ty(identifier)?.to_owned(),
            field: field.to_owned(),
            op,
            expected,
            actual,
        }
        .into())
    }

    fn notify(&self, identifier: Identifier, kind: ChangeKind, key: Option<&str>) {
        if let Some(record) = record_ref(self.graph.identifiers(), identifier) {
            self.wrapper.notify_change(record, kind, key);
        }
    }

    /// As reported by the wrapper. Loaded data alone does not pin a record.
    fn is_in_use(&self, identifier: Identifier) -> bool {
        record_ref(self.graph.identifiers(), identifier)
            .is_some_and(|record| self.wrapper.is_record_in_use(record))
    }

    fn related_closure(&self, start: Identifier) -> BTreeSet<Identifier> {
        let mut seen = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(next) = queue.pop_front() {
            for related in self.graph.related_identifiers(next) {
                if self.graph.identifiers().is_live(related) && seen.insert(related) {
                    queue.push_back(related);
                }
            }
        }
        seen
    }

    #[instrument(level = "debug", skip(self))]
    fn release_unloaded(&mut self) -> Result<(), StoreError> {
        let pending = std::mem::take(&mut self.pending_destroy);
        for identifier in pending {
            let unloaded = self
                .caches
                .get(&identifier)
                .is_some_and(RecordCache::is_unloaded);
            if !unloaded || !self.graph.identifiers().is_live(identifier) {
                continue;
            }
            let closure = self.related_closure(identifier);
            if closure.iter().any(|id| self.is_in_use(*id)) {
                debug!(%identifier, related = closure.len(), "related record still in use");
                continue;
            }
            debug!(%identifier, related = closure.len(), "releasing unloaded records");
            for member in closure {
                self.release(member)?;
            }
        }
        Ok(())
    }

    fn release(&mut self, identifier: Identifier) -> Result<(), StoreError> {
        let Some(record) = record_ref(self.graph.identifiers(), identifier) else {
            return Ok(());
        };
        self.wrapper.disconnect_record(record);
        let releasable = self.graph.is_releasable(identifier);
        self.graph.remove(identifier)?;
        self.caches.remove(&identifier);
        if releasable {
            self.graph.identifiers_mut().forget(identifier);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use serde_json::json;

    use super::*;
    use crate::schema::{ModelSchema, RelationshipSchema, SchemaRegistry};
    use crate::wrapper::NoopWrapper;

    fn store() -> Store {
        let schema = SchemaRegistry::new()
            .model(
                "post",
                ModelSchema::new()
                    .attr("title")
                    .relationship(RelationshipSchema::has_many("comments", "comment")),
            )
            .model(
                "comment",
                ModelSchema::new()
                    .attr("body")
                    .relationship(RelationshipSchema::belongs_to("post", "post")),
            );
        Store::new(Rc::new(schema), Rc::new(NoopWrapper), StoreConfig::default())
    }

    #[test]
    fn create_record_dispatches_by_kind() {
        let mut store = store();
        let post = store
            .create_record("post", CreateOptions::default().attr("title", json!("T")))
            .unwrap();
        let comment = store
            .create_record(
                "comment",
                CreateOptions::default().relationship("post", RelationshipValue::One(Some(post))),
            )
            .unwrap();
        store.flush().unwrap();
        assert_eq!(store.get_has_many(post, "comments").unwrap(), vec![comment]);
        assert_eq!(store.get_attr(post, "title").unwrap(), Some(json!("T")));

        let err = store
            .create_record(
                "comment",
                CreateOptions::default().relationship("post", RelationshipValue::Many(vec![])),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Graph(GraphError::KindMismatch { .. })
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut store = store();
        let err = store
            .create_record("post", CreateOptions::default().attr("nope", json!(1)))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPayload(_)));
        let post = store.create_record("post", CreateOptions::default()).unwrap();
        assert!(store.get_belongs_to(post, "comments").is_err());
    }

    #[test]
    fn created_relationships_are_known_empty() {
        let mut store = store();
        let post = store.create_record("post", CreateOptions::default()).unwrap();
        let data = store.relationship(post, "comments").unwrap();
        assert_eq!(data.data, Some(EdgeData::Many(vec![])));
    }
}
