// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! To-many edge.
use std::collections::BTreeSet;
use std::rc::Rc;

use super::{EdgeData, EdgeState, RelationshipData};
use crate::definition::EdgeDefinition;
use crate::document::{Links, Meta};
use crate::ident::Identifier;

/// Snapshot taken when a remote change first touches an edge in a pass.
///
/// The local-sync pass diffs the live local state against `base` to recover
/// the client's own additions and removals, then replays them on top of the
/// new canonical state.
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingSync {
    pub(crate) base: Vec<Identifier>,
    pub(crate) force_notify: bool,
}

/// `hasMany` edge.
///
/// `members` mirrors `current_state` and `canonical_members` mirrors
/// `canonical_state`; the two sets overlap for every member that is both
/// confirmed and visible.
#[derive(Debug, Clone)]
pub struct HasManyEdge {
    pub(crate) definition: Rc<EdgeDefinition>,
    pub(crate) identifier: Identifier,
    pub(crate) state: EdgeState,
    pub(crate) transaction_ref: u32,
    pub(crate) current_state: Vec<Identifier>,
    pub(crate) members: BTreeSet<Identifier>,
    pub(crate) canonical_state: Vec<Identifier>,
    pub(crate) canonical_members: BTreeSet<Identifier>,
    pub(crate) meta: Option<Meta>,
    pub(crate) links: Option<Links>,
    pub(crate) pending_sync: Option<PendingSync>,
}

impl HasManyEdge {
    pub(crate) fn new(definition: Rc<EdgeDefinition>, identifier: Identifier) -> Self {
        Self {
            definition,
            identifier,
            state: EdgeState::default(),
            transaction_ref: 0,
            current_state: Vec::new(),
            members: BTreeSet::new(),
            canonical_state: Vec::new(),
            canonical_members: BTreeSet::new(),
            meta: None,
            links: None,
            pending_sync: None,
        }
    }

    /// Client-visible members in order.
    pub fn current_state(&self) -> &[Identifier] {
        &self.current_state
    }

    /// Server-confirmed members in order.
    pub fn canonical_state(&self) -> &[Identifier] {
        &self.canonical_state
    }

    /// Returns `true` when `member` is visible locally.
    pub fn has_member(&self, member: Identifier) -> bool {
        self.members.contains(&member)
    }

    /// Returns `true` when `member` is confirmed.
    pub fn has_canonical_member(&self, member: Identifier) -> bool {
        self.canonical_members.contains(&member)
    }

    /// Inserts locally at `index` (clamped), or appends. Duplicates are ignored.
    pub(crate) fn add_local(&mut self, member: Identifier, index: Option<usize>) -> bool {
        if !self.members.insert(member) {
            return false;
        }
        match index {
            Some(at) if at < self.current_state.len() => self.current_state.insert(at, member),
            _ => self.current_state.push(member),
        }
        self.state.is_empty = false;
        self.state.has_dematerialized_inverse = false;
        true
    }

    pub(crate) fn remove_local(&mut self, member: Identifier) -> bool {
        if !self.members.remove(&member) {
            return false;
        }
        self.current_state.retain(|m| *m != member);
        self.state.is_empty = self.current_state.is_empty();
        true
    }

    pub(crate) fn add_canonical(&mut self, member: Identifier) -> bool {
        if !self.canonical_members.insert(member) {
            return false;
        }
        self.canonical_state.push(member);
        true
    }

    pub(crate) fn remove_canonical(&mut self, member: Identifier) -> bool {
        if !self.canonical_members.remove(&member) {
            return false;
        }
        self.canonical_state.retain(|m| *m != member);
        true
    }

    pub(crate) fn set_canonical(&mut self, members: Vec<Identifier>) {
        self.canonical_members = members.iter().copied().collect();
        self.canonical_state = members;
    }

    pub(crate) fn set_local(&mut self, members: Vec<Identifier>) {
        self.members = members.iter().copied().collect();
        self.state.is_empty = members.is_empty();
        self.current_state = members;
    }

    /// Captures the sync base unless one is already pending. Returns `true`
    /// when this call started a new pending sync.
    pub(crate) fn begin_sync(&mut self) -> bool {
        if self.pending_sync.is_some() {
            return false;
        }
        self.pending_sync = Some(PendingSync {
            base: self.canonical_state.clone(),
            force_notify: false,
        });
        true
    }

    /// Replays local additions and removals on top of the canonical state.
    ///
    /// Returns `true` when the local state changed or a notification was
    /// deferred onto this sync.
    pub(crate) fn sync_remote_to_local(&mut self) -> bool {
        let Some(pending) = self.pending_sync.take() else {
            return false;
        };
        let base: BTreeSet<Identifier> = pending.base.iter().copied().collect();
        let removed: BTreeSet<Identifier> = pending
            .base
            .iter()
            .copied()
            .filter(|m| !self.members.contains(m))
            .collect();
        let added: Vec<Identifier> = self
            .current_state
            .iter()
            .copied()
            .filter(|m| !base.contains(m))
            .collect();
        let mut next: Vec<Identifier> = self
            .canonical_state
            .iter()
            .copied()
            .filter(|m| !removed.contains(m))
            .collect();
        for member in added {
            if !self.canonical_members.contains(&member) {
                next.push(member);
            }
        }
        let changed = next != self.current_state;
        if changed {
            self.set_local(next);
        }
        changed || pending.force_notify
    }

    pub(crate) fn for_all_members(&self, mut f: impl FnMut(Identifier)) {
        for member in &self.current_state {
            f(*member);
        }
        for member in &self.canonical_state {
            if !self.members.contains(member) {
                f(*member);
            }
        }
    }

    pub(crate) fn remove_completely_from_own(&mut self, member: Identifier) -> bool {
        self.remove_canonical(member);
        self.remove_local(member)
    }

    pub(crate) fn inverse_did_dematerialize(&mut self, inverse: Identifier, inverse_is_new: bool) {
        if !self.definition.is_async() || inverse_is_new {
            self.remove_completely_from_own(inverse);
        } else {
            self.state.has_dematerialized_inverse = true;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.current_state.clear();
        self.members.clear();
        self.canonical_state.clear();
        self.canonical_members.clear();
        self.state.is_empty = true;
    }

    pub(crate) fn get_data(&self) -> RelationshipData {
        let data = if self.state.has_received_data {
            Some(EdgeData::Many(self.current_state.clone()))
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
