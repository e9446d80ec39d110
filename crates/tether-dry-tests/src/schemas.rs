// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Schema fixtures shared across the suite.

use tether_core::{ModelSchema, RelationshipSchema, SchemaRegistry};

/// `post`/`comment`/`user`, all async:
///
/// - `post.comments` ↔ `comment.post` (hasMany / belongsTo)
/// - `post.author` ↔ `user.posts` (belongsTo / hasMany)
pub fn blog() -> SchemaRegistry {
    SchemaRegistry::new()
        .model(
            "post",
            ModelSchema::new()
                .attr("title")
                .relationship(RelationshipSchema::has_many("comments", "comment"))
                .relationship(RelationshipSchema::belongs_to("author", "user").inverse("posts")),
        )
        .model(
            "comment",
            ModelSchema::new()
                .attr("body")
                .relationship(RelationshipSchema::belongs_to("post", "post")),
        )
        .model(
            "user",
            ModelSchema::new()
                .attr("name")
                .relationship(RelationshipSchema::has_many("posts", "post").inverse("author")),
        )
}

/// [`blog`] with every relationship synchronous.
pub fn sync_blog() -> SchemaRegistry {
    SchemaRegistry::new()
        .model(
            "post",
            ModelSchema::new()
                .attr("title")
                .relationship(RelationshipSchema::has_many("comments", "comment").sync())
                .relationship(
                    RelationshipSchema::belongs_to("author", "user")
                        .inverse("posts")
                        .sync(),
                ),
        )
        .model(
            "comment",
            ModelSchema::new()
                .attr("body")
                .relationship(RelationshipSchema::belongs_to("post", "post").sync()),
        )
        .model(
            "user",
            ModelSchema::new().attr("name").relationship(
                RelationshipSchema::has_many("posts", "post")
                    .inverse("author")
                    .sync(),
            ),
        )
}

/// Many-to-many `post.tags` ↔ `tag.posts`.
pub fn tags() -> SchemaRegistry {
    SchemaRegistry::new()
        .model(
            "post",
            ModelSchema::new()
                .attr("title")
                .relationship(RelationshipSchema::has_many("tags", "tag")),
        )
        .model(
            "tag",
            ModelSchema::new()
                .attr("label")
                .relationship(RelationshipSchema::has_many("posts", "post")),
        )
}

/// `note.owner` points at a `user` without an inverse; the graph keeps an
/// implicit edge on the user side.
pub fn notes() -> SchemaRegistry {
    SchemaRegistry::new()
        .model(
            "note",
            ModelSchema::new()
                .attr("text")
                .relationship(RelationshipSchema::belongs_to("owner", "user").no_inverse()),
        )
        .model("user", ModelSchema::new().attr("name"))
}

/// `owner.pets` is polymorphic over `animal`. `dog` declares no relationships
/// and borrows `animal.owner` once registered as compatible.
pub fn pets() -> SchemaRegistry {
    SchemaRegistry::new()
        .model(
            "owner",
            ModelSchema::new()
                .relationship(RelationshipSchema::has_many("pets", "animal").polymorphic()),
        )
        .model(
            "animal",
            ModelSchema::new()
                .attr("name")
                .relationship(RelationshipSchema::belongs_to("owner", "owner").inverse("pets")),
        )
        .model("dog", ModelSchema::new().attr("name"))
}

/// Async one-to-one pair `husband.wife` ↔ `wife.husband`.
pub fn couple() -> SchemaRegistry {
    SchemaRegistry::new()
        .model(
            "husband",
            ModelSchema::new()
                .attr("name")
                .relationship(RelationshipSchema::belongs_to("wife", "wife")),
        )
        .model(
            "wife",
            ModelSchema::new()
                .attr("name")
                .relationship(RelationshipSchema::belongs_to("husband", "husband")),
        )
}

/// `node.next` ↔ `node.prev`, both async, for building cycles of one model.
pub fn ring() -> SchemaRegistry {
    SchemaRegistry::new().model(
        "node",
        ModelSchema::new()
            .attr("label")
            .relationship(RelationshipSchema::belongs_to("next", "node").inverse("prev"))
            .relationship(RelationshipSchema::belongs_to("prev", "node").inverse("next")),
    )
}
