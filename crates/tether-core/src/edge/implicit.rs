// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Inverse-only edge kept for relationships declared without an inverse.
use std::collections::BTreeSet;
use std::rc::Rc;

use crate::definition::EdgeDefinition;
use crate::ident::Identifier;

/// Implicit edge: which records point at the owner through a one-way field.
#[derive(Debug, Clone)]
pub struct ImplicitEdge {
    pub(crate) definition: Rc<EdgeDefinition>,
    pub(crate) identifier: Identifier,
    pub(crate) transaction_ref: u32,
    pub(crate) members: BTreeSet<Identifier>,
    pub(crate) canonical_members: BTreeSet<Identifier>,
}

impl ImplicitEdge {
    pub(crate) fn new(definition: Rc<EdgeDefinition>, identifier: Identifier) -> Self {
        Self {
            definition,
            identifier,
            transaction_ref: 0,
            members: BTreeSet::new(),
            canonical_members: BTreeSet::new(),
        }
    }

    /// Records pointing at the owner locally.
    pub fn members(&self) -> &BTreeSet<Identifier> {
        &self.members
    }

    /// Records pointing at the owner according to the server.
    pub fn canonical_members(&self) -> &BTreeSet<Identifier> {
        &self.canonical_members
    }

    pub(crate) fn add(&mut self, member: Identifier, is_remote: bool) {
        if is_remote {
            self.canonical_members.insert(member);
        }
        self.members.insert(member);
    }

    pub(crate) fn remove(&mut self, member: Identifier, is_remote: bool) {
        if is_remote {
            self.canonical_members.remove(&member);
        }
        self.members.remove(&member);
    }

    pub(crate) fn for_all_members(&self, mut f: impl FnMut(Identifier)) {
        for member in self.members.union(&self.canonical_members) {
            f(*member);
        }
    }

    pub(crate) fn remove_completely_from_own(&mut self, member: Identifier) -> bool {
        self.canonical_members.remove(&member);
        self.members.remove(&member)
    }

    pub(crate) fn clear(&mut self) {
        self.members.clear();
        self.canonical_members.clear();
    }
}
