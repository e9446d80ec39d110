// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Inverse maintenance and record dematerialization.
use tracing::trace;

use super::{edge_in, Graph, GraphError};
use crate::edge::Edge;
use crate::ident::Identifier;

impl Graph {
    /// Mirrors "`value` now points at `identifier`" onto `identifier.key`.
    pub(super) fn add_to_inverse(
        &mut self,
        identifier: Identifier,
        key: &str,
        value: Identifier,
        is_remote: bool,
    ) -> Result<(), GraphError> {
        let definition = self.definition_for(identifier, key)?;
        self.check_type(&definition, value)?;
        self.ensure(identifier, key)?;
        if is_remote {
            self.add_to_transaction(identifier, key);
        }
        let inverse_key = definition.inverse_key();
        match edge_in(&mut self.edges, identifier, key) {
            Some(Edge::BelongsTo(edge)) => {
                edge.state.has_received_data = true;
                edge.state.is_empty = false;
                let old_local = edge.local_state;
                let old_remote = edge.remote_state;
                if is_remote {
                    edge.remote_state = Some(value);
                }
                if old_local == Some(value) {
                    if let Some(old) = old_remote.filter(|r| is_remote && *r != value) {
                        self.remove_from_inverse(old, inverse_key, identifier, true);
                    }
                    return Ok(());
                }
                edge.set_local(Some(value));
                if is_remote {
                    if let Some(old) = old_remote.filter(|r| *r != value) {
                        self.remove_from_inverse(old, inverse_key, identifier, true);
                    }
                }
                let stale_local = if is_remote {
                    old_local.filter(|l| Some(*l) != old_remote)
                } else {
                    old_local
                };
                if let Some(old) = stale_local {
                    self.remove_from_inverse(old, inverse_key, identifier, false);
                }
                self.notify(identifier, key);
            }
            Some(Edge::HasMany(_)) => {
                if is_remote {
                    self.begin_sync(identifier, key);
                    if let Some(edge) = self.has_many_mut(identifier, key) {
                        edge.add_canonical(value);
                        edge.state.has_received_data = true;
                    }
                } else {
                    let added = self
                        .has_many_mut(identifier, key)
                        .is_some_and(|edge| edge.add_local(value, None));
                    if added {
                        self.notify(identifier, key);
                    }
                }
            }
            Some(Edge::Implicit(edge)) => edge.add(value, is_remote),
            None => {}
        }
        Ok(())
    }

    /// Mirrors "`value` no longer points at `identifier`" onto `identifier.key`.
    ///
    /// Never materializes the inverse edge.
    pub(super) fn remove_from_inverse(
        &mut self,
        identifier: Identifier,
        key: &str,
        value: Identifier,
        is_remote: bool,
    ) {
        if !self.has(identifier, key) {
            return;
        }
        if is_remote {
            self.add_to_transaction(identifier, key);
        }
        match edge_in(&mut self.edges, identifier, key) {
            Some(Edge::BelongsTo(edge)) => {
                if is_remote && edge.remote_state == Some(value) {
                    edge.remote_state = None;
                }
                if edge.local_state == Some(value) {
                    edge.set_local(None);
                    self.notify(identifier, key);
                }
            }
            Some(Edge::HasMany(_)) => {
                if is_remote {
                    self.begin_sync(identifier, key);
                    if let Some(edge) = self.has_many_mut(identifier, key) {
                        edge.remove_canonical(value);
                        edge.remove_local(value);
                    }
                } else {
                    let removed = self
                        .has_many_mut(identifier, key)
                        .is_some_and(|edge| edge.remove_local(value));
                    if removed {
                        self.notify(identifier, key);
                    }
                }
            }
            Some(Edge::Implicit(edge)) => edge.remove(value, is_remote),
            None => {}
        }
    }

    pub(super) fn destroy_relationship(&mut self, identifier: Identifier, key: &str) {
        let Some(edge) = self.peek(identifier, key) else {
            return;
        };
        let definition = edge.definition().clone();
        let members = edge.all_members();
        let is_implicit = matches!(edge, Edge::Implicit(_));
        trace!(%identifier, key, members = members.len(), "destroy relationship");

        if is_implicit {
            if self.is_releasable(identifier) {
                if let Some(edge) = self
                    .edges
                    .get_mut(&identifier)
                    .and_then(|fields| fields.remove(key))
                {
                    self.sever_from_inverses(identifier, &edge);
                }
            }
            return;
        }

        if !definition.inverse_is_implicit() {
            let inverse_key = definition.inverse_key();
            for member in members {
                self.notify_inverse_of_dematerialization(member, inverse_key, identifier);
            }
        }

        if !definition.inverse_is_implicit() && !definition.inverse_is_async() {
            if let Some(edge) = edge_in(&mut self.edges, identifier, key) {
                if let Some(state) = edge.state_mut() {
                    state.is_stale = true;
                }
                edge.clear();
            }
            if !definition.is_async() {
                self.notify(identifier, key);
            }
        }
    }

    fn notify_inverse_of_dematerialization(
        &mut self,
        inverse_identifier: Identifier,
        inverse_key: &str,
        identifier: Identifier,
    ) {
        let is_new = self.is_new(identifier);
        let notify = match edge_in(&mut self.edges, inverse_identifier, inverse_key) {
            Some(Edge::BelongsTo(edge)) => {
                if edge.local_state.is_some_and(|l| l != identifier) {
                    return;
                }
                edge.inverse_did_dematerialize(identifier, is_new);
                true
            }
            Some(Edge::HasMany(edge)) => {
                edge.inverse_did_dematerialize(identifier, is_new);
                true
            }
            Some(Edge::Implicit(_)) | None => false,
        };
        if notify {
            self.notify(inverse_identifier, inverse_key);
        }
    }

    /// Drops `identifier` from the implicit edges that recorded it as a
    /// one-way referrer.
    pub(super) fn detach_from_implicit_inverses(&mut self, identifier: Identifier) {
        let targets: Vec<(Identifier, String)> = self
            .edges_of(identifier)
            .filter(|(_, edge)| edge.definition().inverse_is_implicit())
            .flat_map(|(_, edge)| {
                let key = edge.definition().inverse_key().to_owned();
                edge.all_members().into_iter().map(move |m| (m, key.clone()))
            })
            .collect();
        for (member, key) in targets {
            if let Some(edge) = edge_in(&mut self.edges, member, &key) {
                edge.remove_completely_from_own(identifier);
            }
        }
    }
}
