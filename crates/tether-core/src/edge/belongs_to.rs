// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! To-one edge.
use std::rc::Rc;

use super::{EdgeData, EdgeState, RelationshipData};
use crate::definition::EdgeDefinition;
use crate::document::{Links, Meta};
use crate::ident::Identifier;

/// `belongsTo` edge: one nullable local and one nullable remote member.
#[derive(Debug, Clone)]
pub struct BelongsToEdge {
    pub(crate) definition: Rc<EdgeDefinition>,
    pub(crate) identifier: Identifier,
    pub(crate) state: EdgeState,
    pub(crate) transaction_ref: u32,
    pub(crate) local_state: Option<Identifier>,
    pub(crate) remote_state: Option<Identifier>,
    pub(crate) meta: Option<Meta>,
    pub(crate) links: Option<Links>,
}

impl BelongsToEdge {
    pub(crate) fn new(definition: Rc<EdgeDefinition>, identifier: Identifier) -> Self {
        Self {
            definition,
            identifier,
            state: EdgeState::default(),
            transaction_ref: 0,
            local_state: None,
            remote_state: None,
            meta: None,
            links: None,
        }
    }

    /// Client-visible member.
    pub fn local_state(&self) -> Option<Identifier> {
        self.local_state
    }

    /// Server-confirmed member.
    pub fn remote_state(&self) -> Option<Identifier> {
        self.remote_state
    }

    pub(crate) fn set_local(&mut self, value: Option<Identifier>) {
        self.local_state = value;
        self.state.is_empty = value.is_none();
        if value.is_some() {
            self.state.has_dematerialized_inverse = false;
        }
    }

    pub(crate) fn for_all_members(&self, mut f: impl FnMut(Identifier)) {
        if let Some(local) = self.local_state {
            f(local);
        }
        if let Some(remote) = self.remote_state {
            if Some(remote) != self.local_state {
                f(remote);
            }
        }
    }

    pub(crate) fn remove_completely_from_own(&mut self, member: Identifier) -> bool {
        if self.remote_state == Some(member) {
            self.remote_state = None;
        }
        if self.local_state == Some(member) {
            self.local_state = None;
            self.state.is_empty = true;
            return true;
        }
        false
    }

    /// Unloading the inverse of a sync relationship (or of a record that only
    /// exists on the client) is treated as a client-side delete. Async
    /// relationships keep the member and remember that it dematerialized.
    pub(crate) fn inverse_did_dematerialize(&mut self, inverse: Identifier, inverse_is_new: bool) {
        if !self.definition.is_async() || inverse_is_new {
            if self.local_state == Some(inverse) {
                self.local_state = None;
            }
            if self.remote_state == Some(inverse) {
                self.remote_state = None;
                self.state.has_received_data = true;
            }
            self.state.is_empty = self.local_state.is_none();
        } else {
            self.state.has_dematerialized_inverse = true;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.local_state = None;
        self.remote_state = None;
        self.state.has_received_data = false;
        self.state.is_empty = true;
    }

    pub(crate) fn get_data(&self) -> RelationshipData {
        let data = if self.local_state.is_some() || self.state.has_received_data {
            Some(EdgeData::One(self.local_state))
        } else {
            None
        };
        RelationshipData {
            data,
            links: self.links.clone(),
            meta: self.meta.clone(),
        }
    }
}
