// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Handlers for the individual [`Operation`](crate::Operation) variants.
use std::collections::BTreeSet;
use std::rc::Rc;

use tracing::warn;

use super::{edge_in, Graph, GraphError};
use crate::definition::{EdgeDefinition, EdgeKind};
use crate::document::{Linkage, RelationshipPayload};
use crate::edge::Edge;
use crate::ident::Identifier;

fn dedup(values: Vec<Identifier>) -> Vec<Identifier> {
    let mut seen = BTreeSet::new();
    values.into_iter().filter(|v| seen.insert(*v)).collect()
}

impl Graph {
    pub(super) fn expect_kind(
        &mut self,
        record: Identifier,
        field: &str,
        op: &'static str,
        expected: EdgeKind,
    ) -> Result<Rc<EdgeDefinition>, GraphError> {
        let definition = self.definition_for(record, field)?;
        if definition.kind() != expected {
            return Err(GraphError::KindMismatch {
                ty: self.identifiers.ty(record)?.to_owned(),
                field: field.to_owned(),
                op,
                expected,
                actual: definition.kind(),
            });
        }
        Ok(definition)
    }

    /// Accepts `value` into an edge of `definition`, registering its type as
    /// compatible when it differs from the declared one.
    pub(super) fn check_type(
        &mut self,
        definition: &EdgeDefinition,
        value: Identifier,
    ) -> Result<(), GraphError> {
        let ty = self.identifiers.ty(value)?;
        if ty == definition.ty() || self.definitions.is_compatible(definition.ty(), ty) {
            return Ok(());
        }
        if !definition.is_polymorphic() {
            warn!(
                field = definition.key(),
                expected = definition.ty(),
                actual = ty,
                "record of another type assigned to a non-polymorphic relationship"
            );
        }
        let ty = ty.to_owned();
        self.definitions
            .register_polymorphic_type(definition.ty(), &ty);
        Ok(())
    }

    pub(super) fn replace_related_record(
        &mut self,
        record: Identifier,
        field: &str,
        value: Option<Identifier>,
        is_remote: bool,
    ) -> Result<(), GraphError> {
        let definition =
            self.expect_kind(record, field, "replaceRelatedRecord", EdgeKind::BelongsTo)?;
        if let Some(value) = value {
            self.check_type(&definition, value)?;
        }
        self.ensure(record, field)?;
        let inverse_key = definition.inverse_key();
        if !is_remote {
            let Some(edge) = self.belongs_to_mut(record, field) else {
                return Ok(());
            };
            edge.state.has_received_data = true;
            edge.state.is_stale = false;
            let old = edge.local_state;
            if old == value {
                return Ok(());
            }
            edge.set_local(value);
            if let Some(old) = old {
                self.remove_from_inverse(old, inverse_key, record, false);
            }
            if let Some(value) = value {
                self.add_to_inverse(value, inverse_key, record, false)?;
            }
            self.notify(record, field);
            return Ok(());
        }

        self.add_to_transaction(record, field);
        let Some(edge) = self.belongs_to_mut(record, field) else {
            return Ok(());
        };
        let old_local = edge.local_state;
        let old_remote = edge.remote_state;
        let had_data = edge.state.has_received_data;
        edge.state.has_received_data = true;
        edge.state.is_stale = false;
        if value == old_remote {
            edge.state.is_empty = edge.local_state.is_none();
            if !had_data {
                self.notify(record, field);
            }
            return Ok(());
        }
        edge.remote_state = value;
        if let Some(old) = old_remote {
            self.remove_from_inverse(old, inverse_key, record, true);
        }
        if let Some(value) = value {
            self.add_to_inverse(value, inverse_key, record, true)?;
        }
        let keep_local = value.is_none() && old_local.is_some_and(|l| self.is_new(l));
        if old_local != value && !keep_local {
            if let Some(old) = old_local.filter(|l| Some(*l) != old_remote) {
                self.remove_from_inverse(old, inverse_key, record, false);
            }
            if let Some(edge) = self.belongs_to_mut(record, field) {
                edge.set_local(value);
            }
            self.notify(record, field);
        }
        Ok(())
    }

    pub(super) fn replace_related_records_local(
        &mut self,
        record: Identifier,
        field: &str,
        values: Vec<Identifier>,
    ) -> Result<(), GraphError> {
        let definition =
            self.expect_kind(record, field, "replaceRelatedRecords", EdgeKind::HasMany)?;
        let values = dedup(values);
        for value in &values {
            self.check_type(&definition, *value)?;
        }
        self.ensure(record, field)?;
        let Some(edge) = self.has_many_mut(record, field) else {
            return Ok(());
        };
        let previous = edge.members.clone();
        let changed = edge.current_state != values;
        edge.set_local(values.clone());
        edge.state.has_received_data = true;
        edge.state.is_stale = false;

        let next: BTreeSet<Identifier> = values.iter().copied().collect();
        let inverse_key = definition.inverse_key();
        for removed in previous.difference(&next) {
            self.remove_from_inverse(*removed, inverse_key, record, false);
        }
        for added in values.iter().filter(|v| !previous.contains(v)) {
            self.add_to_inverse(*added, inverse_key, record, false)?;
        }
        if changed {
            self.notify(record, field);
        }
        Ok(())
    }

    pub(super) fn replace_related_records_remote(
        &mut self,
        record: Identifier,
        field: &str,
        values: Vec<Identifier>,
    ) -> Result<(), GraphError> {
        let definition =
            self.expect_kind(record, field, "replaceRelatedRecords", EdgeKind::HasMany)?;
        let values = dedup(values);
        for value in &values {
            self.check_type(&definition, *value)?;
        }
        self.ensure(record, field)?;
        self.add_to_transaction(record, field);
        self.begin_sync(record, field);
        let Some(edge) = self.has_many_mut(record, field) else {
            return Ok(());
        };
        let previous = edge.canonical_members.clone();
        let had_data = edge.state.has_received_data;
        edge.set_canonical(values.clone());
        edge.state.has_received_data = true;
        edge.state.is_stale = false;

        let next: BTreeSet<Identifier> = values.iter().copied().collect();
        let inverse_key = definition.inverse_key();
        for removed in previous.difference(&next) {
            self.remove_from_inverse(*removed, inverse_key, record, true);
        }
        for added in values.iter().filter(|v| !previous.contains(v)) {
            self.add_to_inverse(*added, inverse_key, record, true)?;
        }
        if !had_data {
            self.notify(record, field);
        }
        Ok(())
    }

    pub(super) fn add_to_related_records(
        &mut self,
        record: Identifier,
        field: &str,
        values: Vec<Identifier>,
        index: Option<usize>,
    ) -> Result<(), GraphError> {
        let definition =
            self.expect_kind(record, field, "addToRelatedRecords", EdgeKind::HasMany)?;
        for value in &values {
            self.check_type(&definition, *value)?;
        }
        self.ensure(record, field)?;
        let inverse_key = definition.inverse_key();
        let mut at = index;
        let mut changed = false;
        for value in values {
            let added = self
                .has_many_mut(record, field)
                .is_some_and(|edge| edge.add_local(value, at));
            if !added {
                continue;
            }
            if let Some(i) = at.as_mut() {
                *i += 1;
            }
            changed = true;
            self.add_to_inverse(value, inverse_key, record, false)?;
        }
        if let Some(edge) = self.has_many_mut(record, field) {
            edge.state.has_received_data = true;
        }
        if changed {
            self.notify(record, field);
        }
        Ok(())
    }

    pub(super) fn remove_from_related_records(
        &mut self,
        record: Identifier,
        field: &str,
        values: Vec<Identifier>,
    ) -> Result<(), GraphError> {
        let definition =
            self.expect_kind(record, field, "removeFromRelatedRecords", EdgeKind::HasMany)?;
        self.ensure(record, field)?;
        let inverse_key = definition.inverse_key();
        let mut changed = false;
        for value in values {
            let removed = self
                .has_many_mut(record, field)
                .is_some_and(|edge| edge.remove_local(value));
            if removed {
                changed = true;
                self.remove_from_inverse(value, inverse_key, record, false);
            }
        }
        if changed {
            self.notify(record, field);
        }
        Ok(())
    }

    /// Server-confirmed deletion: drop every edge of `record` and cut it out
    /// of all inverses.
    pub(super) fn delete_record(&mut self, record: Identifier) {
        let Some(fields) = self.edges.remove(&record) else {
            return;
        };
        self.new_records.remove(&record);
        for edge in fields.values() {
            self.sever_from_inverses(record, edge);
        }
    }

    pub(super) fn sever_from_inverses(&mut self, identifier: Identifier, edge: &Edge) {
        let inverse_key = edge.definition().inverse_key();
        for member in edge.all_members() {
            let changed = edge_in(&mut self.edges, member, inverse_key)
                .is_some_and(|inverse| inverse.remove_completely_from_own(identifier));
            if changed {
                self.notify(member, inverse_key);
            }
        }
    }

    pub(super) fn update_relationship(
        &mut self,
        record: Identifier,
        field: &str,
        payload: RelationshipPayload,
    ) -> Result<(), GraphError> {
        let definition = self.definition_for(record, field)?;
        if definition.kind() == EdgeKind::Implicit {
            return Err(GraphError::ImplicitAccess(field.to_owned()));
        }
        let edge = self.ensure(record, field)?;
        if let Some(meta) = payload.meta {
            edge.set_meta(meta);
        }
        let has_received_data = edge.state().is_some_and(|s| s.has_received_data);
        self.add_to_transaction(record, field);

        let invalid = || GraphError::InvalidLinkage {
            ty: definition.lhs.model.clone(),
            field: field.to_owned(),
        };
        let has_data = match payload.data {
            Some(linkage) => {
                match (definition.kind(), linkage) {
                    (EdgeKind::HasMany, None) => {
                        self.replace_related_records_remote(record, field, Vec::new())?;
                    }
                    (EdgeKind::HasMany, Some(Linkage::Many(refs))) => {
                        let values = refs
                            .iter()
                            .map(|r| self.identifiers.get_or_create(r))
                            .collect::<Result<Vec<_>, _>>()?;
                        self.replace_related_records_remote(record, field, values)?;
                    }
                    (EdgeKind::BelongsTo, None) => {
                        self.replace_related_record(record, field, None, true)?;
                    }
                    (EdgeKind::BelongsTo, Some(Linkage::One(r))) => {
                        let value = self.identifiers.get_or_create(&r)?;
                        self.replace_related_record(record, field, Some(value), true)?;
                    }
                    _ => return Err(invalid()),
                }
                true
            }
            None if !definition.is_async() && !has_received_data => {
                match definition.kind() {
                    EdgeKind::HasMany => {
                        self.replace_related_records_remote(record, field, Vec::new())?;
                    }
                    _ => self.replace_related_record(record, field, None, true)?,
                }
                true
            }
            None => false,
        };

        let mut has_updated_link = false;
        if let Some(links) = payload.links {
            let Some(edge) = edge_in(&mut self.edges, record, field) else {
                return Ok(());
            };
            let previous = edge
                .links()
                .and_then(|l| l.related.as_ref())
                .map(|l| l.href().to_owned());
            if let Some(related) = links.related.as_ref() {
                if previous.as_deref() != Some(related.href()) {
                    has_updated_link = true;
                }
            }
            edge.set_links(links);
            if has_updated_link && !definition.is_async() && !has_data {
                warn!(
                    ty = %definition.lhs.model,
                    field,
                    "link without data on a sync relationship; treating it as empty"
                );
            }
        }

        if !has_data && has_updated_link {
            if let Some(state) = edge_in(&mut self.edges, record, field).and_then(Edge::state_mut)
            {
                state.is_stale = true;
            }
            self.notify(record, field);
        }
        Ok(())
    }
}
