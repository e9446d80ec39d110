// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Edge definitions: resolved, symmetric metadata for a `(type, field)` pair.
//!
//! A definition is computed lazily from the [`SchemaService`] the first time a
//! field is touched and memoized for both sides. Relationships declared without
//! an inverse get an implicit inverse-only side keyed by [`implicit_key`].
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::schema::{InverseDecl, RelationshipKind, RelationshipSchema, SchemaService};

/// Prefix of generated implicit inverse keys.
pub const IMPLICIT_KEY_PREFIX: &str = "__implicit:";

/// Key of the implicit inverse of `model.field`.
pub fn implicit_key(model: &str, field: &str) -> String {
    format!("{IMPLICIT_KEY_PREFIX}{model}:{field}")
}

/// Edge variant selected by a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Single nullable reference.
    BelongsTo,
    /// Ordered collection.
    HasMany,
    /// Inverse-only bookkeeping for relationships without a declared inverse.
    Implicit,
}

impl From<RelationshipKind> for EdgeKind {
    fn from(kind: RelationshipKind) -> Self {
        match kind {
            RelationshipKind::BelongsTo => Self::BelongsTo,
            RelationshipKind::HasMany => Self::HasMany,
        }
    }
}

/// One side of an edge definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeMeta {
    /// Edge variant for this side.
    pub kind: EdgeKind,
    /// Field name (or implicit key).
    pub key: String,
    /// Model that owns the field.
    pub model: String,
    /// Model on the other end.
    pub ty: String,
    /// Whether the field is async.
    pub is_async: bool,
    /// Whether this side is implicit.
    pub is_implicit: bool,
    /// Whether this side holds many members.
    pub is_collection: bool,
    /// Whether this side accepts compatible subtypes.
    pub is_polymorphic: bool,
}

/// Resolved definition seen from one side (`lhs`) of a relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeDefinition {
    /// The side being looked up.
    pub lhs: EdgeMeta,
    /// The inverse side.
    pub rhs: EdgeMeta,
    /// Both sides live on the same model.
    pub is_self_referential: bool,
    /// The field is its own inverse.
    pub is_reflexive: bool,
}

impl EdgeDefinition {
    fn new(lhs: EdgeMeta, rhs: EdgeMeta) -> Self {
        let is_self_referential = lhs.model == rhs.model;
        let is_reflexive = is_self_referential && lhs.key == rhs.key;
        Self {
            lhs,
            rhs,
            is_self_referential,
            is_reflexive,
        }
    }

    /// The same definition seen from the inverse side.
    pub fn mirrored(&self) -> Self {
        Self {
            lhs: self.rhs.clone(),
            rhs: self.lhs.clone(),
            is_self_referential: self.is_self_referential,
            is_reflexive: self.is_reflexive,
        }
    }

    /// Edge variant of this side.
    pub fn kind(&self) -> EdgeKind {
        self.lhs.kind
    }

    /// Field name of this side.
    pub fn key(&self) -> &str {
        &self.lhs.key
    }

    /// Related model name.
    pub fn ty(&self) -> &str {
        &self.lhs.ty
    }

    /// Field name of the inverse side.
    pub fn inverse_key(&self) -> &str {
        &self.rhs.key
    }

    /// Edge variant of the inverse side.
    pub fn inverse_kind(&self) -> EdgeKind {
        self.rhs.kind
    }

    /// Whether this side is async.
    pub fn is_async(&self) -> bool {
        self.lhs.is_async
    }

    /// Whether the inverse side is async.
    pub fn inverse_is_async(&self) -> bool {
        self.rhs.is_async
    }

    /// Whether this side is implicit.
    pub fn is_implicit(&self) -> bool {
        self.lhs.is_implicit
    }

    /// Whether the inverse side is implicit.
    pub fn inverse_is_implicit(&self) -> bool {
        self.rhs.is_implicit
    }

    /// Whether this side is a collection.
    pub fn is_collection(&self) -> bool {
        self.lhs.is_collection
    }

    /// Whether this side accepts compatible subtypes.
    pub fn is_polymorphic(&self) -> bool {
        self.lhs.is_polymorphic
    }
}

/// Schema resolution failures. These are programmer errors in the schema or
/// the caller, never payload problems.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// No relationship `field` on `ty` (nor on a compatible polymorphic type).
    #[error("no relationship '{field}' on model '{ty}'")]
    UnknownRelationship {
        /// Model name.
        ty: String,
        /// Field name.
        field: String,
    },
    /// Auto-detection found several candidate inverses.
    #[error("ambiguous inverse for '{ty}.{field}': {candidates:?}")]
    AmbiguousInverse {
        /// Model name.
        ty: String,
        /// Field name.
        field: String,
        /// Candidate fields on the related model.
        candidates: Vec<String>,
    },
    /// The declared inverse field does not exist on the related model.
    #[error("inverse '{inverse}' of '{ty}.{field}' is not declared")]
    MissingInverse {
        /// Model name.
        ty: String,
        /// Field name.
        field: String,
        /// Declared inverse key.
        inverse: String,
    },
}

/// Memo of resolved definitions plus the polymorphic compatibility facts.
#[derive(Debug, Default)]
pub struct DefinitionCache {
    definitions: FxHashMap<(String, String), Rc<EdgeDefinition>>,
    polymorphic: BTreeMap<String, BTreeSet<String>>,
}

impl DefinitionCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an already-resolved definition without touching the schema.
    pub fn peek(&self, ty: &str, field: &str) -> Option<&Rc<EdgeDefinition>> {
        self.definitions.get(&(ty.to_owned(), field.to_owned()))
    }

    /// Resolves the definition of `ty.field`, memoizing both sides.
    ///
    /// Falls back to models registered as polymorphically compatible with
    /// `ty` when `ty` does not declare `field` itself.
    pub fn definition_for(
        &mut self,
        schema: &dyn SchemaService,
        ty: &str,
        field: &str,
    ) -> Result<Rc<EdgeDefinition>, SchemaError> {
        if let Some(found) = self.resolve_exact(schema, ty, field)? {
            return Ok(found);
        }
        let compatible: Vec<String> = self
            .polymorphic
            .get(ty)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for other in compatible {
            if let Some(found) = self.resolve_exact(schema, &other, field)? {
                self.definitions
                    .insert((ty.to_owned(), field.to_owned()), Rc::clone(&found));
                return Ok(found);
            }
        }
        Err(SchemaError::UnknownRelationship {
            ty: ty.to_owned(),
            field: field.to_owned(),
        })
    }

    /// Records that records of `a` may stand in for `b` and vice versa.
    pub fn register_polymorphic_type(&mut self, a: &str, b: &str) {
        if a == b {
            return;
        }
        self.polymorphic
            .entry(a.to_owned())
            .or_default()
            .insert(b.to_owned());
        self.polymorphic
            .entry(b.to_owned())
            .or_default()
            .insert(a.to_owned());
    }

    /// Returns `true` when `a` equals `b` or the pair was registered.
    pub fn is_compatible(&self, a: &str, b: &str) -> bool {
        a == b || self.polymorphic.get(a).is_some_and(|set| set.contains(b))
    }

    fn resolve_exact(
        &mut self,
        schema: &dyn SchemaService,
        ty: &str,
        field: &str,
    ) -> Result<Option<Rc<EdgeDefinition>>, SchemaError> {
        let key = (ty.to_owned(), field.to_owned());
        if let Some(found) = self.definitions.get(&key) {
            return Ok(Some(Rc::clone(found)));
        }
        if let Some(rest) = field.strip_prefix(IMPLICIT_KEY_PREFIX) {
            // implicit sides are only ever cached while resolving their owner
            if let Some((owner, owner_field)) = rest.split_once(':') {
                if schema.relationship(owner, owner_field).is_some() {
                    self.definition_for(schema, owner, owner_field)?;
                }
            }
            return Ok(self.definitions.get(&key).cloned());
        }
        match schema.relationship(ty, field) {
            Some(declared) => self.upgrade(schema, ty, declared).map(Some),
            None => Ok(None),
        }
    }

    fn upgrade(
        &mut self,
        schema: &dyn SchemaService,
        model: &str,
        declared: &RelationshipSchema,
    ) -> Result<Rc<EdgeDefinition>, SchemaError> {
        let kind = EdgeKind::from(declared.kind);
        let lhs = EdgeMeta {
            kind,
            key: declared.name.clone(),
            model: model.to_owned(),
            ty: declared.ty.clone(),
            is_async: declared.is_async,
            is_implicit: false,
            is_collection: kind == EdgeKind::HasMany,
            is_polymorphic: declared.polymorphic,
        };
        let inverse = match &declared.inverse {
            InverseDecl::None => None,
            InverseDecl::Key(inverse) => Some(
                schema
                    .relationship(&declared.ty, inverse)
                    .cloned()
                    .ok_or_else(|| SchemaError::MissingInverse {
                        ty: model.to_owned(),
                        field: declared.name.clone(),
                        inverse: inverse.clone(),
                    })?,
            ),
            InverseDecl::Auto => find_inverse(schema, model, declared)?,
        };
        let rhs = match inverse {
            Some(inverse) => {
                let inverse_kind = EdgeKind::from(inverse.kind);
                EdgeMeta {
                    kind: inverse_kind,
                    key: inverse.name,
                    model: declared.ty.clone(),
                    ty: model.to_owned(),
                    is_async: inverse.is_async,
                    is_implicit: false,
                    is_collection: inverse_kind == EdgeKind::HasMany,
                    is_polymorphic: inverse.polymorphic,
                }
            }
            None => EdgeMeta {
                kind: EdgeKind::Implicit,
                key: implicit_key(model, &declared.name),
                model: declared.ty.clone(),
                ty: model.to_owned(),
                is_async: false,
                is_implicit: true,
                is_collection: true,
                is_polymorphic: false,
            },
        };
        let definition = Rc::new(EdgeDefinition::new(lhs, rhs));
        if !definition.is_reflexive {
            let mirrored = Rc::new(definition.mirrored());
            self.definitions.insert(
                (mirrored.lhs.model.clone(), mirrored.lhs.key.clone()),
                mirrored,
            );
        }
        self.definitions.insert(
            (model.to_owned(), declared.name.clone()),
            Rc::clone(&definition),
        );
        tracing::trace!(
            model,
            field = %declared.name,
            inverse = %definition.inverse_key(),
            "resolved edge definition"
        );
        Ok(definition)
    }
}

fn find_inverse(
    schema: &dyn SchemaService,
    model: &str,
    declared: &RelationshipSchema,
) -> Result<Option<RelationshipSchema>, SchemaError> {
    let pointing_back: Vec<&RelationshipSchema> = schema
        .relationships_for(&declared.ty)
        .iter()
        .filter(|candidate| candidate.ty == model)
        .collect();
    let named: Vec<&RelationshipSchema> = pointing_back
        .iter()
        .copied()
        .filter(|c| matches!(&c.inverse, InverseDecl::Key(k) if *k == declared.name))
        .collect();
    if let [only] = named.as_slice() {
        return Ok(Some((*only).clone()));
    }
    let mut auto: Vec<&RelationshipSchema> = pointing_back
        .into_iter()
        .filter(|c| c.inverse.is_auto())
        .collect();
    if declared.ty == model && auto.len() > 1 {
        auto.retain(|c| c.name != declared.name);
    }
    match auto.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some((*only).clone())),
        many => Err(SchemaError::AmbiguousInverse {
            ty: model.to_owned(),
            field: declared.name.clone(),
            candidates: many.iter().map(|c| c.name.clone()).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::schema::{ModelSchema, RelationshipSchema, SchemaRegistry};

    fn blog() -> SchemaRegistry {
        SchemaRegistry::new()
            .model(
                "post",
                ModelSchema::new()
                    .relationship(RelationshipSchema::has_many("comments", "comment"))
                    .relationship(RelationshipSchema::belongs_to("author", "user").no_inverse()),
            )
            .model(
                "comment",
                ModelSchema::new().relationship(RelationshipSchema::belongs_to("post", "post")),
            )
            .model(
                "person",
                ModelSchema::new()
                    .relationship(
                        RelationshipSchema::has_many("friends", "person")
                            .inverse("friends")
                            .sync(),
                    )
                    .relationship(RelationshipSchema::belongs_to("boss", "person"))
                    .relationship(RelationshipSchema::has_many("reports", "person")),
            )
            .model("user", ModelSchema::new())
            .model(
                "doc",
                ModelSchema::new().relationship(RelationshipSchema::belongs_to("owner", "team")),
            )
            .model(
                "team",
                ModelSchema::new()
                    .relationship(RelationshipSchema::has_many("docs", "doc"))
                    .relationship(RelationshipSchema::has_many("archived", "doc")),
            )
    }

    #[test]
    fn auto_inverse_is_symmetric() {
        let schema = blog();
        let mut cache = DefinitionCache::new();
        let comments = cache.definition_for(&schema, "post", "comments").unwrap();
        assert_eq!(comments.kind(), EdgeKind::HasMany);
        assert_eq!(comments.inverse_key(), "post");
        assert_eq!(comments.inverse_kind(), EdgeKind::BelongsTo);
        let post = cache.peek("comment", "post").unwrap();
        assert_eq!(post.as_ref(), &comments.mirrored());
    }

    #[test]
    fn missing_inverse_gets_implicit_side() {
        let schema = blog();
        let mut cache = DefinitionCache::new();
        let author = cache.definition_for(&schema, "post", "author").unwrap();
        assert!(author.inverse_is_implicit());
        assert_eq!(author.inverse_key(), "__implicit:post:author");
        let implicit = cache
            .definition_for(&schema, "user", "__implicit:post:author")
            .unwrap();
        assert_eq!(implicit.kind(), EdgeKind::Implicit);
        assert_eq!(implicit.inverse_key(), "author");
        assert!(implicit.inverse_is_async());
    }

    #[test]
    fn implicit_side_resolves_its_owner_on_demand() {
        let schema = blog();
        let mut cache = DefinitionCache::new();
        let implicit = cache
            .definition_for(&schema, "user", "__implicit:post:author")
            .unwrap();
        assert!(implicit.is_implicit());
        assert!(cache.peek("post", "author").is_some());
    }

    #[test]
    fn reflexive_and_self_referential() {
        let schema = blog();
        let mut cache = DefinitionCache::new();
        let friends = cache.definition_for(&schema, "person", "friends").unwrap();
        assert!(friends.is_reflexive);
        let boss = cache.definition_for(&schema, "person", "boss").unwrap();
        assert!(boss.is_self_referential);
        assert!(!boss.is_reflexive);
        assert_eq!(boss.inverse_key(), "reports");
    }

    #[test]
    fn several_candidates_are_ambiguous() {
        let schema = blog();
        let mut cache = DefinitionCache::new();
        let err = cache.definition_for(&schema, "doc", "owner").unwrap_err();
        assert_eq!(
            err,
            SchemaError::AmbiguousInverse {
                ty: "doc".into(),
                field: "owner".into(),
                candidates: vec!["docs".into(), "archived".into()],
            }
        );
    }

    #[test]
    fn unknown_field_is_an_error() {
        let schema = blog();
        let mut cache = DefinitionCache::new();
        assert!(matches!(
            cache.definition_for(&schema, "post", "nope"),
            Err(SchemaError::UnknownRelationship { .. })
        ));
    }

    #[test]
    fn polymorphic_fallback_reuses_base_definition() {
        let schema = blog();
        let mut cache = DefinitionCache::new();
        cache.register_polymorphic_type("comment", "reply");
        assert!(cache.is_compatible("reply", "comment"));
        let via_subtype = cache.definition_for(&schema, "reply", "post").unwrap();
        let via_base = cache.definition_for(&schema, "comment", "post").unwrap();
        assert!(Rc::ptr_eq(&via_subtype, &via_base));
    }
}
