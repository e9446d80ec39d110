// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Model schema: declared attributes and relationships per model name.
//!
//! The graph only needs kind dispatch and inverse metadata from the schema, so
//! the port ([`SchemaService`]) is deliberately small. [`SchemaRegistry`] is the
//! in-process implementation; it can be built fluently or deserialized from JSON:
//!
//! ```json
//! {
//!   "post": {
//!     "attributes": ["title"],
//!     "relationships": [
//!       { "name": "comments", "kind": "hasMany", "type": "comment", "inverse": "post" }
//!     ]
//!   }
//! }
//! ```
use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Cardinality of a declared relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipKind {
    /// Single nullable reference.
    BelongsTo,
    /// Ordered collection of references.
    HasMany,
}

/// Inverse declaration of a relationship.
///
/// In JSON an absent `inverse` means [`InverseDecl::Auto`], `null` means
/// [`InverseDecl::None`] and a string names the inverse field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InverseDecl {
    /// Look for exactly one relationship on the related model pointing back.
    #[default]
    Auto,
    /// No inverse; the graph keeps an implicit inverse-only edge.
    None,
    /// Explicit inverse field on the related model.
    Key(String),
}

impl InverseDecl {
    /// Returns `true` for [`InverseDecl::Auto`].
    pub fn is_auto(&self) -> bool {
        matches!(self, Self::Auto)
    }
}

impl Serialize for InverseDecl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Auto | Self::None => serializer.serialize_none(),
            Self::Key(key) => serializer.serialize_str(key),
        }
    }
}

impl<'de> Deserialize<'de> for InverseDecl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<String>::deserialize(deserializer)? {
            Some(key) => Self::Key(key),
            None => Self::None,
        })
    }
}

const fn default_async() -> bool {
    true
}

/// A declared relationship field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipSchema {
    /// Field name on the owning model.
    pub name: String,
    /// Cardinality.
    pub kind: RelationshipKind,
    /// Related model name.
    #[serde(rename = "type")]
    pub ty: String,
    /// Whether reads may require a fetch. Defaults to `true`.
    #[serde(rename = "async", default = "default_async")]
    pub is_async: bool,
    /// Inverse declaration.
    #[serde(default, skip_serializing_if = "InverseDecl::is_auto")]
    pub inverse: InverseDecl,
    /// Accepts records of types registered as compatible with `ty`.
    #[serde(default)]
    pub polymorphic: bool,
}

impl RelationshipSchema {
    /// Declares an async `belongsTo` with an auto-detected inverse.
    pub fn belongs_to(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self::new(name, RelationshipKind::BelongsTo, ty)
    }

    /// Declares an async `hasMany` with an auto-detected inverse.
    pub fn has_many(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self::new(name, RelationshipKind::HasMany, ty)
    }

    fn new(name: impl Into<String>, kind: RelationshipKind, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            ty: ty.into(),
            is_async: true,
            inverse: InverseDecl::Auto,
            polymorphic: false,
        }
    }

    /// Names the inverse field explicitly.
    pub fn inverse(mut self, key: impl Into<String>) -> Self {
        self.inverse = InverseDecl::Key(key.into());
        self
    }

    /// Declares that the relationship has no inverse.
    pub fn no_inverse(mut self) -> Self {
        self.inverse = InverseDecl::None;
        self
    }

    /// Marks the relationship synchronous.
    pub fn sync(mut self) -> Self {
        self.is_async = false;
        self
    }

    /// Marks the relationship polymorphic.
    pub fn polymorphic(mut self) -> Self {
        self.polymorphic = true;
        self
    }
}

/// Attributes and relationships of one model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    /// Attribute names.
    #[serde(default)]
    pub attributes: Vec<String>,
    /// Relationship declarations in declaration order.
    #[serde(default)]
    pub relationships: Vec<RelationshipSchema>,
}

impl ModelSchema {
    /// Empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attribute.
    pub fn attr(mut self, name: impl Into<String>) -> Self {
        self.attributes.push(name.into());
        self
    }

    /// Adds a relationship.
    pub fn relationship(mut self, relationship: RelationshipSchema) -> Self {
        self.relationships.push(relationship);
        self
    }
}

/// Schema lookups consumed by the graph, record cache and store.
pub trait SchemaService {
    /// Declared relationships of `ty`, empty when the model is unknown.
    fn relationships_for(&self, ty: &str) -> &[RelationshipSchema];

    /// Declared attribute names of `ty`, empty when the model is unknown.
    fn attributes_for(&self, ty: &str) -> &[String];

    /// Returns `true` when `ty` is a known model.
    fn has_model(&self, ty: &str) -> bool;

    /// Looks up one relationship declaration.
    fn relationship(&self, ty: &str, field: &str) -> Option<&RelationshipSchema> {
        self.relationships_for(ty).iter().find(|r| r.name == field)
    }

    /// Returns `true` when `field` is a declared attribute of `ty`.
    fn has_attribute(&self, ty: &str, field: &str) -> bool {
        self.attributes_for(ty).iter().any(|a| a == field)
    }
}

/// In-memory schema keyed by model name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaRegistry {
    models: BTreeMap<String, ModelSchema>,
}

impl SchemaRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a model.
    pub fn model(mut self, ty: impl Into<String>, model: ModelSchema) -> Self {
        self.models.insert(ty.into(), model);
        self
    }

    /// Parses the JSON form.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Model names in sorted order.
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}

impl SchemaService for SchemaRegistry {
    fn relationships_for(&self, ty: &str) -> &[RelationshipSchema] {
        self.models
            .get(ty)
            .map(|m| m.relationships.as_slice())
            .unwrap_or(&[])
    }

    fn attributes_for(&self, ty: &str) -> &[String] {
        self.models
            .get(ty)
            .map(|m| m.attributes.as_slice())
            .unwrap_or(&[])
    }

    fn has_model(&self, ty: &str) -> bool {
        self.models.contains_key(ty)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn inverse_tri_state_parses() {
        let json = br#"{
            "post": {
                "attributes": ["title"],
                "relationships": [
                    { "name": "comments", "kind": "hasMany", "type": "comment" },
                    { "name": "author", "kind": "belongsTo", "type": "user", "inverse": null, "async": false },
                    { "name": "tags", "kind": "hasMany", "type": "tag", "inverse": "posts" }
                ]
            }
        }"#;
        let schema = SchemaRegistry::from_json(json).unwrap();
        let rels = schema.relationships_for("post");
        assert_eq!(rels[0].inverse, InverseDecl::Auto);
        assert!(rels[0].is_async);
        assert_eq!(rels[1].inverse, InverseDecl::None);
        assert!(!rels[1].is_async);
        assert_eq!(rels[2].inverse, InverseDecl::Key("posts".into()));
        assert!(schema.has_attribute("post", "title"));
        assert!(schema.relationships_for("missing").is_empty());
    }

    #[test]
    fn builder_matches_json_form() {
        let built = SchemaRegistry::new().model(
            "post",
            ModelSchema::new()
                .attr("title")
                .relationship(RelationshipSchema::has_many("comments", "comment").inverse("post")),
        );
        let json = serde_json::to_vec(&built).unwrap();
        assert_eq!(SchemaRegistry::from_json(&json).unwrap(), built);
    }
}
