// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Port to the host store: change notifications and record liveness.
use crate::ident::Identifier;

/// What changed on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeKind {
    /// An attribute value.
    Property,
    /// Lifecycle flags (new, deleted, saving).
    State,
    /// Validation errors.
    Errors,
    /// A `hasMany` relationship.
    HasMany,
    /// A `belongsTo` relationship.
    BelongsTo,
}

/// Borrowed view of an identifier handed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef<'a> {
    /// Handle.
    pub identifier: Identifier,
    /// Model name.
    pub ty: &'a str,
    /// Server id.
    pub id: Option<&'a str>,
    /// Local id.
    pub lid: &'a str,
}

/// Host callbacks consumed by the graph and the store.
pub trait StoreWrapper {
    /// A record changed. `key` names the attribute or relationship when relevant.
    fn notify_change(&self, record: RecordRef<'_>, kind: ChangeKind, key: Option<&str>);

    /// Whether a materialized record object still references `record`.
    fn is_record_in_use(&self, record: RecordRef<'_>) -> bool;

    /// The record was released; drop any materialized object for it.
    fn disconnect_record(&self, record: RecordRef<'_>);
}

/// Wrapper that ignores notifications and reports nothing in use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWrapper;

impl StoreWrapper for NoopWrapper {
    fn notify_change(&self, _record: RecordRef<'_>, _kind: ChangeKind, _key: Option<&str>) {}

    fn is_record_in_use(&self, _record: RecordRef<'_>) -> bool {
        false
    }

    fn disconnect_record(&self, _record: RecordRef<'_>) {}
}
