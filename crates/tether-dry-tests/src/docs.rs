// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Terse builders for payloads.

use tether_core::{Link, Links, RelationshipPayload, ResourceIdentifier, ResourceObject};

/// `{type, id}` reference.
pub fn rid(ty: &str, id: &str) -> ResourceIdentifier {
    ResourceIdentifier::new(ty, id)
}

/// Resource with identity only.
pub fn resource(ty: &str, id: &str) -> ResourceObject {
    ResourceObject::new(ty, id)
}

/// To-many linkage over `ids` of one model.
pub fn many(ty: &str, ids: &[&str]) -> RelationshipPayload {
    RelationshipPayload::many(ids.iter().map(|id| rid(ty, id)).collect())
}

/// To-one linkage; `None` is an explicit `null`.
pub fn one(ty: &str, id: Option<&str>) -> RelationshipPayload {
    RelationshipPayload::one(id.map(|id| rid(ty, id)))
}

/// Payload with a `related` link and no data.
pub fn related_link(href: &str) -> RelationshipPayload {
    RelationshipPayload {
        links: Some(Links {
            related: Some(Link::Href(href.to_owned())),
            self_link: None,
        }),
        ..RelationshipPayload::default()
    }
}
