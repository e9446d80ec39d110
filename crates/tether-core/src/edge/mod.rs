// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Relationship edges: canonical and local membership of one field of one record.
//!
//! Edges are plain state holders. Cross-edge effects (inverse maintenance,
//! notifications, transactions) belong to [`crate::Graph`].
use std::rc::Rc;

use crate::definition::{EdgeDefinition, EdgeKind};
use crate::document::{Links, Meta};
use crate::ident::Identifier;

mod belongs_to;
mod has_many;
mod implicit;

pub use belongs_to::BelongsToEdge;
pub use has_many::HasManyEdge;
pub use implicit::ImplicitEdge;

/// Load-state flags shared by the observable edge variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeState {
    /// Data for this edge has been received (or the owner was created locally).
    pub has_received_data: bool,
    /// The edge is known to hold no members.
    pub is_empty: bool,
    /// A newer `related` link arrived without data.
    pub is_stale: bool,
    /// An async inverse was unloaded while still referenced.
    pub has_dematerialized_inverse: bool,
}

impl Default for EdgeState {
    fn default() -> Self {
        Self {
            has_received_data: false,
            is_empty: true,
            is_stale: false,
            has_dematerialized_inverse: false,
        }
    }
}

/// Resource linkage of an edge, as handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeData {
    /// `belongsTo` linkage.
    One(Option<Identifier>),
    /// `hasMany` linkage in current order.
    Many(Vec<Identifier>),
}

/// Read payload of an edge. `data` stays `None` until data was received.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipData {
    /// Linkage.
    pub data: Option<EdgeData>,
    /// Links.
    pub links: Option<Links>,
    /// Meta.
    pub meta: Option<Meta>,
}

/// One relationship edge.
#[derive(Debug, Clone)]
pub enum Edge {
    /// To-one edge.
    BelongsTo(BelongsToEdge),
    /// To-many edge.
    HasMany(HasManyEdge),
    /// Inverse-only edge.
    Implicit(ImplicitEdge),
}

impl Edge {
    pub(crate) fn new(definition: Rc<EdgeDefinition>, identifier: Identifier) -> Self {
        match definition.kind() {
            EdgeKind::BelongsTo => Self::BelongsTo(BelongsToEdge::new(definition, identifier)),
            EdgeKind::HasMany => Self::HasMany(HasManyEdge::new(definition, identifier)),
            EdgeKind::Implicit => Self::Implicit(ImplicitEdge::new(definition, identifier)),
        }
    }

    /// Definition seen from this edge's side.
    pub fn definition(&self) -> &Rc<EdgeDefinition> {
        match self {
            Self::BelongsTo(e) => &e.definition,
            Self::HasMany(e) => &e.definition,
            Self::Implicit(e) => &e.definition,
        }
    }

    /// Owning record.
    pub fn identifier(&self) -> Identifier {
        match self {
            Self::BelongsTo(e) => e.identifier,
            Self::HasMany(e) => e.identifier,
            Self::Implicit(e) => e.identifier,
        }
    }

    /// Variant tag.
    pub fn kind(&self) -> EdgeKind {
        self.definition().kind()
    }

    /// Load-state flags; `None` for implicit edges.
    pub fn state(&self) -> Option<&EdgeState> {
        match self {
            Self::BelongsTo(e) => Some(&e.state),
            Self::HasMany(e) => Some(&e.state),
            Self::Implicit(_) => None,
        }
    }

    pub(crate) fn state_mut(&mut self) -> Option<&mut EdgeState> {
        match self {
            Self::BelongsTo(e) => Some(&mut e.state),
            Self::HasMany(e) => Some(&mut e.state),
            Self::Implicit(_) => None,
        }
    }

    /// Number of open remote operations touching this edge in the current transaction.
    pub fn transaction_ref(&self) -> u32 {
        match self {
            Self::BelongsTo(e) => e.transaction_ref,
            Self::HasMany(e) => e.transaction_ref,
            Self::Implicit(e) => e.transaction_ref,
        }
    }

    pub(crate) fn transaction_ref_mut(&mut self) -> &mut u32 {
        match self {
            Self::BelongsTo(e) => &mut e.transaction_ref,
            Self::HasMany(e) => &mut e.transaction_ref,
            Self::Implicit(e) => &mut e.transaction_ref,
        }
    }

    /// Visits every local or canonical member exactly once, local members first.
    pub fn for_all_members(&self, f: impl FnMut(Identifier)) {
        match self {
            Self::BelongsTo(e) => e.for_all_members(f),
            Self::HasMany(e) => e.for_all_members(f),
            Self::Implicit(e) => e.for_all_members(f),
        }
    }

    /// Collects [`Edge::for_all_members`] into a vector.
    pub fn all_members(&self) -> Vec<Identifier> {
        let mut out = Vec::new();
        self.for_all_members(|m| out.push(m));
        out
    }

    /// Drops `member` from both canonical and local state.
    ///
    /// Returns `true` when the observable (local) state changed.
    pub(crate) fn remove_completely_from_own(&mut self, member: Identifier) -> bool {
        match self {
            Self::BelongsTo(e) => e.remove_completely_from_own(member),
            Self::HasMany(e) => e.remove_completely_from_own(member),
            Self::Implicit(e) => e.remove_completely_from_own(member),
        }
    }

    /// Resets membership to empty.
    pub(crate) fn clear(&mut self) {
        match self {
            Self::BelongsTo(e) => e.clear(),
            Self::HasMany(e) => e.clear(),
            Self::Implicit(e) => e.clear(),
        }
    }

    /// Read payload; `None` for implicit edges, which are never exposed.
    pub fn get_data(&self) -> Option<RelationshipData> {
        match self {
            Self::BelongsTo(e) => Some(e.get_data()),
            Self::HasMany(e) => Some(e.get_data()),
            Self::Implicit(_) => None,
        }
    }

    /// Returns `true` when local state differs from canonical state.
    pub fn is_dirty(&self) -> bool {
        match self {
            Self::BelongsTo(e) => e.local_state != e.remote_state,
            Self::HasMany(e) => e.current_state != e.canonical_state,
            Self::Implicit(e) => e.members != e.canonical_members,
        }
    }

    pub(crate) fn set_links(&mut self, links: Links) {
        match self {
            Self::BelongsTo(e) => e.links = Some(links),
            Self::HasMany(e) => e.links = Some(links),
            Self::Implicit(_) => {}
        }
    }

    pub(crate) fn set_meta(&mut self, meta: Meta) {
        match self {
            Self::BelongsTo(e) => e.meta = Some(meta),
            Self::HasMany(e) => e.meta = Some(meta),
            Self::Implicit(_) => {}
        }
    }

    /// Current links.
    pub fn links(&self) -> Option<&Links> {
        match self {
            Self::BelongsTo(e) => e.links.as_ref(),
            Self::HasMany(e) => e.links.as_ref(),
            Self::Implicit(_) => None,
        }
    }
}
