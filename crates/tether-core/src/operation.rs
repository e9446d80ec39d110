// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Graph operations.
use crate::document::RelationshipPayload;
use crate::ident::Identifier;

/// A mutation applied to the graph, either as local (client) or remote (server) state.
///
/// `UpdateRelationship` and `DeleteRecord` are remote-only;
/// `AddToRelatedRecords` and `RemoveFromRelatedRecords` are local-only.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Full relationship payload from the server (data, links, meta).
    UpdateRelationship {
        /// Owning record.
        record: Identifier,
        /// Field.
        field: String,
        /// Payload.
        value: RelationshipPayload,
    },
    /// The record was deleted on the server; sever it from every inverse.
    DeleteRecord {
        /// Deleted record.
        record: Identifier,
    },
    /// Set a `belongsTo`.
    ReplaceRelatedRecord {
        /// Owning record.
        record: Identifier,
        /// Field.
        field: String,
        /// New member.
        value: Option<Identifier>,
    },
    /// Replace a `hasMany` wholesale.
    ReplaceRelatedRecords {
        /// Owning record.
        record: Identifier,
        /// Field.
        field: String,
        /// New members in order.
        value: Vec<Identifier>,
    },
    /// Add members to a `hasMany`, starting at `index` when given.
    AddToRelatedRecords {
        /// Owning record.
        record: Identifier,
        /// Field.
        field: String,
        /// Members to add.
        value: Vec<Identifier>,
        /// Insertion point.
        index: Option<usize>,
    },
    /// Remove members from a `hasMany`.
    RemoveFromRelatedRecords {
        /// Owning record.
        record: Identifier,
        /// Field.
        field: String,
        /// Members to remove.
        value: Vec<Identifier>,
    },
}

impl Operation {
    /// Operation name as used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateRelationship { .. } => "updateRelationship",
            Self::DeleteRecord { .. } => "deleteRecord",
            Self::ReplaceRelatedRecord { .. } => "replaceRelatedRecord",
            Self::ReplaceRelatedRecords { .. } => "replaceRelatedRecords",
            Self::AddToRelatedRecords { .. } => "addToRelatedRecords",
            Self::RemoveFromRelatedRecords { .. } => "removeFromRelatedRecords",
        }
    }

    /// Owning record.
    pub fn record(&self) -> Identifier {
        match self {
            Self::UpdateRelationship { record, .. }
            | Self::DeleteRecord { record }
            | Self::ReplaceRelatedRecord { record, .. }
            | Self::ReplaceRelatedRecords { record, .. }
            | Self::AddToRelatedRecords { record, .. }
            | Self::RemoveFromRelatedRecords { record, .. } => *record,
        }
    }

    /// Field, when the operation targets one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::DeleteRecord { .. } => None,
            Self::UpdateRelationship { field, .. }
            | Self::ReplaceRelatedRecord { field, .. }
            | Self::ReplaceRelatedRecords { field, .. }
            | Self::AddToRelatedRecords { field, .. }
            | Self::RemoveFromRelatedRecords { field, .. } => Some(field),
        }
    }
}
