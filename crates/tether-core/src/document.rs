// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Normalized JSON:API-shaped documents exchanged with adapters and the store.
use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::ident::ResourceIdentifier;

/// Free-form `meta` object.
pub type Meta = Map<String, Value>;

/// A link: either a bare href or `{ href, meta }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Link {
    /// Bare URL.
    Href(String),
    /// Link object.
    Object {
        /// URL.
        href: String,
        /// Link meta.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<Meta>,
    },
}

impl Link {
    /// URL of the link in either form.
    pub fn href(&self) -> &str {
        match self {
            Self::Href(href) | Self::Object { href, .. } => href,
        }
    }
}

/// Relationship links.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Links {
    /// Where the related records can be fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<Link>,
    /// The relationship itself.
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<Link>,
}

/// Resource linkage of a relationship payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Linkage {
    /// To-many linkage.
    Many(Vec<ResourceIdentifier>),
    /// To-one linkage.
    One(ResourceIdentifier),
}

/// `{ data?, links?, meta? }` for one relationship.
///
/// `data` distinguishes "absent" (`None`) from "explicitly null"
/// (`Some(None)`); only the latter empties a to-one relationship.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipPayload {
    /// Resource linkage.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Option<Linkage>>,
    /// Links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
    /// Meta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl RelationshipPayload {
    /// Payload carrying only to-one linkage.
    pub fn one(data: Option<ResourceIdentifier>) -> Self {
        Self {
            data: Some(data.map(Linkage::One)),
            ..Self::default()
        }
    }

    /// Payload carrying only to-many linkage.
    pub fn many(data: Vec<ResourceIdentifier>) -> Self {
        Self {
            data: Some(Some(Linkage::Many(data))),
            ..Self::default()
        }
    }
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A resource object: identity, attributes and relationship payloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceObject {
    /// Model name.
    #[serde(rename = "type")]
    pub ty: String,
    /// Server id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Local id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
    /// Attribute values.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    /// Relationship payloads by field.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, RelationshipPayload>,
}

impl ResourceObject {
    /// Resource with identity only.
    pub fn new(ty: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Identity part of the resource.
    pub fn identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier {
            ty: self.ty.clone(),
            id: self.id.clone(),
            lid: self.lid.clone(),
        }
    }

    /// Adds an attribute value.
    pub fn attr(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Adds a relationship payload.
    pub fn relationship(mut self, field: impl Into<String>, payload: RelationshipPayload) -> Self {
        self.relationships.insert(field.into(), payload);
        self
    }
}

/// Primary data of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData {
    /// Collection response.
    Many(Vec<ResourceObject>),
    /// Single resource response.
    One(ResourceObject),
}

/// Top-level document pushed into the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Primary data; `null` and absent are treated alike.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PrimaryData>,
    /// Side-loaded resources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<ResourceObject>,
    /// Document meta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl Document {
    /// Document with a single primary resource.
    pub fn one(resource: ResourceObject) -> Self {
        Self {
            data: Some(PrimaryData::One(resource)),
            ..Self::default()
        }
    }

    /// Document with a collection of primary resources.
    pub fn many(resources: Vec<ResourceObject>) -> Self {
        Self {
            data: Some(PrimaryData::Many(resources)),
            ..Self::default()
        }
    }

    /// Adds a side-loaded resource.
    pub fn include(mut self, resource: ResourceObject) -> Self {
        self.included.push(resource);
        self
    }

    /// Primary resources in order.
    pub fn primary(&self) -> &[ResourceObject] {
        match &self.data {
            Some(PrimaryData::One(one)) => core::slice::from_ref(one),
            Some(PrimaryData::Many(many)) => many,
            None => &[],
        }
    }

    /// Mutable access to the primary resources.
    pub fn primary_mut(&mut self) -> &mut [ResourceObject] {
        match &mut self.data {
            Some(PrimaryData::One(one)) => core::slice::from_mut(one),
            Some(PrimaryData::Many(many)) => many,
            None => &mut [],
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_and_null_data_are_distinct() {
        let absent: RelationshipPayload =
            serde_json::from_value(json!({ "links": { "related": "/posts/1/author" } })).unwrap();
        assert_eq!(absent.data, None);
        assert_eq!(
            absent.links.unwrap().related.unwrap().href(),
            "/posts/1/author"
        );

        let null: RelationshipPayload = serde_json::from_value(json!({ "data": null })).unwrap();
        assert_eq!(null.data, Some(None));

        let many: RelationshipPayload =
            serde_json::from_value(json!({ "data": [{ "type": "comment", "id": "1" }] })).unwrap();
        assert_eq!(
            many.data,
            Some(Some(Linkage::Many(vec![ResourceIdentifier::new("comment", "1")])))
        );
    }

    #[test]
    fn document_primary_handles_both_shapes() {
        let single: Document =
            serde_json::from_value(json!({ "data": { "type": "post", "id": "1" } })).unwrap();
        assert_eq!(single.primary().len(), 1);
        let many: Document = serde_json::from_value(json!({
            "data": [{ "type": "post", "id": "1" }, { "type": "post", "id": "2" }],
            "included": [{ "type": "user", "id": "9", "attributes": { "name": "x" } }]
        }))
        .unwrap();
        assert_eq!(many.primary().len(), 2);
        assert_eq!(many.included[0].attributes["name"], json!("x"));
        let empty: Document = serde_json::from_value(json!({ "data": null })).unwrap();
        assert!(empty.primary().is_empty());
    }
}
