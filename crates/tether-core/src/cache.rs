// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-record attribute ledger.
//!
//! Attributes live in three buckets: confirmed (`data`), locally dirty
//! (`attributes`) and in flight (`in_flight`, filled when a save starts).
//! Reads prefer dirty, then in-flight, then confirmed. Relationships are not
//! stored here; payloads are forwarded to the [`Graph`] as remote operations.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{trace, warn};

use crate::document::ResourceObject;
use crate::graph::{Graph, GraphError};
use crate::ident::Identifier;
use crate::operation::Operation;

/// A validation error attached to a record after a rejected save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Attribute the error applies to; `None` for record-level errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    /// Human-readable message.
    pub message: String,
}

impl ValidationError {
    /// Error on one attribute.
    pub fn on(attribute: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            attribute: Some(attribute.into()),
            message: message.into(),
        }
    }
}

/// Attribute changes as `key -> (confirmed value, current value)`.
pub type ChangedAttributes = BTreeMap<String, (Option<Value>, Value)>;

/// Attribute state and lifecycle flags of one record.
#[derive(Debug, Clone)]
pub struct RecordCache {
    identifier: Identifier,
    ty: String,
    data: BTreeMap<String, Value>,
    attributes: BTreeMap<String, Value>,
    in_flight: Option<BTreeMap<String, Value>>,
    errors: Vec<ValidationError>,
    has_data: bool,
    is_new: bool,
    is_deleted: bool,
    deletion_committed: bool,
    unloaded: bool,
    warn_on_undeclared: bool,
}

impl RecordCache {
    /// Empty cache for `identifier` of model `ty`.
    pub fn new(identifier: Identifier, ty: impl Into<String>) -> Self {
        Self {
            identifier,
            ty: ty.into(),
            data: BTreeMap::new(),
            attributes: BTreeMap::new(),
            in_flight: None,
            errors: Vec::new(),
            has_data: false,
            is_new: false,
            is_deleted: false,
            deletion_committed: false,
            unloaded: false,
            warn_on_undeclared: true,
        }
    }

    /// Toggles the warning for relationship payloads on undeclared fields.
    #[must_use]
    pub fn warn_on_undeclared_relationships(mut self, enabled: bool) -> Self {
        self.warn_on_undeclared = enabled;
        self
    }

    /// Handle of the record.
    pub fn identifier(&self) -> Identifier {
        self.identifier
    }

    /// Model name.
    pub fn ty(&self) -> &str {
        &self.ty
    }

    /// Merges a server payload.
    ///
    /// With `calculate_change`, returns the attribute keys whose visible value
    /// changed; keys shadowed by a dirty value are never reported. Relationship
    /// payloads are pushed to the graph for every relationship the schema
    /// declares; others are ignored.
    pub fn push_data(
        &mut self,
        graph: &mut Graph,
        resource: &ResourceObject,
        calculate_change: bool,
    ) -> Result<Option<Vec<String>>, GraphError> {
        if let Some(id) = resource.id.as_deref() {
            graph.identifiers_mut().assign_id(self.identifier, id)?;
        }
        let changed = calculate_change.then(|| self.changed_keys(Some(&resource.attributes)));
        for (key, value) in &resource.attributes {
            self.data.insert(key.clone(), value.clone());
        }
        self.update_changed_attributes();
        self.has_data = true;
        self.unloaded = false;
        if self.is_new && resource.id.is_some() {
            self.is_new = false;
            graph.set_new(self.identifier, false);
        }
        self.setup_relationships(graph, resource)?;
        trace!(record = %self.identifier, attributes = resource.attributes.len(), "pushed data");
        Ok(changed)
    }

    /// Writes a dirty value; writing the original value back clears it.
    pub fn set_dirty_attribute(&mut self, key: &str, value: Value) {
        if self.original(key) == Some(&value) {
            self.attributes.remove(key);
        } else {
            self.attributes.insert(key.to_owned(), value);
        }
    }

    /// Current value of `key`.
    pub fn get_attr(&self, key: &str) -> Option<&Value> {
        self.attributes
            .get(key)
            .or_else(|| self.in_flight.as_ref().and_then(|f| f.get(key)))
            .or_else(|| self.data.get(key))
    }

    /// Returns `true` when `key` has a value in any bucket.
    pub fn has_attr(&self, key: &str) -> bool {
        self.get_attr(key).is_some()
    }

    /// Returns `true` when `key` holds a dirty value.
    pub fn is_attr_dirty(&self, key: &str) -> bool {
        self.attributes
            .get(key)
            .is_some_and(|v| self.original(key) != Some(v))
    }

    /// Dirty and in-flight attributes against the confirmed values.
    pub fn changed_attributes(&self) -> ChangedAttributes {
        let mut current: BTreeMap<&String, &Value> = BTreeMap::new();
        if let Some(in_flight) = &self.in_flight {
            current.extend(in_flight);
        }
        current.extend(&self.attributes);
        current
            .into_iter()
            .map(|(key, value)| (key.clone(), (self.data.get(key).cloned(), value.clone())))
            .collect()
    }

    /// Returns `true` when any attribute is dirty or in flight.
    pub fn has_changed_attributes(&self) -> bool {
        !self.attributes.is_empty() || self.in_flight.as_ref().is_some_and(|f| !f.is_empty())
    }

    /// Attribute values as the record currently sees them.
    pub fn attributes(&self) -> Map<String, Value> {
        let mut out: Map<String, Value> = self.data.clone().into_iter().collect();
        if let Some(in_flight) = &self.in_flight {
            out.extend(in_flight.clone());
        }
        out.extend(self.attributes.clone());
        out
    }

    /// Marks the record as created on the client with initial attribute values.
    pub fn client_did_create(
        &mut self,
        graph: &mut Graph,
        attributes: Map<String, Value>,
    ) -> Result<(), GraphError> {
        self.is_new = true;
        graph.client_did_create(self.identifier)?;
        for (key, value) in attributes {
            self.set_dirty_attribute(&key, value);
        }
        Ok(())
    }

    /// Moves dirty attributes in flight at the start of a save.
    pub fn will_commit(&mut self) {
        let dirty = std::mem::take(&mut self.attributes);
        self.in_flight.get_or_insert_with(BTreeMap::new).extend(dirty);
    }

    /// Applies a successful save.
    ///
    /// In-flight values become confirmed, then the returned payload (which
    /// may carry a server-assigned id, altered attributes and relationships)
    /// is merged on top. Returns the keys whose visible value changed.
    pub fn did_commit(
        &mut self,
        graph: &mut Graph,
        resource: Option<&ResourceObject>,
    ) -> Result<Vec<String>, GraphError> {
        if self.is_deleted {
            self.deletion_committed = true;
        }
        self.is_new = false;
        graph.set_new(self.identifier, false);
        let attributes = resource.map(|r| &r.attributes);
        if let Some(resource) = resource {
            if let Some(id) = resource.id.as_deref() {
                graph.identifiers_mut().assign_id(self.identifier, id)?;
            }
            self.setup_relationships(graph, resource)?;
        }
        let changed = self.changed_keys(attributes);
        if let Some(in_flight) = self.in_flight.take() {
            self.data.extend(in_flight);
        }
        if let Some(attributes) = attributes {
            for (key, value) in attributes {
                self.data.insert(key.clone(), value.clone());
            }
        }
        self.has_data = true;
        self.errors.clear();
        self.update_changed_attributes();
        Ok(changed)
    }

    /// Applies a failed save: in-flight values return to the dirty bucket
    /// unless the user changed them again meanwhile.
    pub fn commit_was_rejected(&mut self, errors: Vec<ValidationError>) {
        if let Some(in_flight) = self.in_flight.take() {
            for (key, value) in in_flight {
                self.attributes.entry(key).or_insert(value);
            }
        }
        self.errors = errors;
    }

    /// Validation errors from the last rejected save.
    pub fn get_errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Discards dirty and in-flight values. Returns the discarded dirty keys.
    ///
    /// A record that never left the client leaves the graph and is marked deleted.
    pub fn rollback_attributes(&mut self, graph: &mut Graph) -> Result<Vec<String>, GraphError> {
        let dirty: Vec<String> = std::mem::take(&mut self.attributes).into_keys().collect();
        self.is_deleted = false;
        if self.is_new {
            graph.push(Operation::DeleteRecord {
                record: self.identifier,
            })?;
            self.is_deleted = true;
            self.is_new = false;
            graph.set_new(self.identifier, false);
        }
        self.in_flight = None;
        self.errors.clear();
        Ok(dirty)
    }

    /// Flags the record for deletion. Deleting a record that only exists on
    /// the client removes it from the graph right away.
    pub fn set_is_deleted(&mut self, graph: &mut Graph, is_deleted: bool) -> Result<(), GraphError> {
        self.is_deleted = is_deleted;
        if is_deleted && self.is_new {
            graph.push(Operation::DeleteRecord {
                record: self.identifier,
            })?;
        }
        Ok(())
    }

    /// Shorthand for `set_is_deleted(graph, true)`.
    pub fn delete_record(&mut self, graph: &mut Graph) -> Result<(), GraphError> {
        self.set_is_deleted(graph, true)
    }

    /// Dematerializes the record. Returns `false` when it was already unloaded.
    pub fn unload_record(&mut self, graph: &mut Graph) -> bool {
        if self.unloaded {
            return false;
        }
        graph.unload(self.identifier);
        self.data.clear();
        self.attributes.clear();
        self.in_flight = None;
        self.has_data = false;
        self.unloaded = true;
        true
    }

    /// Returns `true` when no attribute data is known.
    pub fn is_empty(&self) -> bool {
        !self.has_data && !self.is_new && self.attributes.is_empty() && self.in_flight.is_none()
    }

    /// Created on the client and not yet saved.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Flagged for deletion.
    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    /// The server confirmed the deletion.
    pub fn is_deletion_committed(&self) -> bool {
        self.deletion_committed
    }

    /// Unloaded and awaiting release.
    pub fn is_unloaded(&self) -> bool {
        self.unloaded
    }

    fn original(&self, key: &str) -> Option<&Value> {
        self.in_flight
            .as_ref()
            .and_then(|f| f.get(key))
            .or_else(|| self.data.get(key))
    }

    fn changed_keys(&self, updates: Option<&Map<String, Value>>) -> Vec<String> {
        let Some(updates) = updates else {
            return Vec::new();
        };
        updates
            .iter()
            .filter(|(key, _)| !self.attributes.contains_key(*key))
            .filter(|(key, value)| self.original(key) != Some(*value))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn update_changed_attributes(&mut self) {
        let stale: Vec<String> = self
            .attributes
            .iter()
            .filter(|(key, value)| self.original(key) == Some(*value))
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            self.attributes.remove(&key);
        }
    }

    fn setup_relationships(
        &self,
        graph: &mut Graph,
        resource: &ResourceObject,
    ) -> Result<(), GraphError> {
        let schema = graph.schema().clone();
        for relationship in schema.relationships_for(&self.ty) {
            if let Some(payload) = resource.relationships.get(&relationship.name) {
                graph.push(Operation::UpdateRelationship {
                    record: self.identifier,
                    field: relationship.name.clone(),
                    value: payload.clone(),
                })?;
            }
        }
        if self.warn_on_undeclared {
            for field in resource.relationships.keys() {
                if schema.relationship(&self.ty, field).is_none() {
                    warn!(ty = %self.ty, field = %field, "ignoring payload for undeclared relationship");
                }
            }
        }
        Ok(())
    }
}
