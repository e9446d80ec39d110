// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! tether-core: relationship graph, record cache and fetch coalescing for
//! client-side data stores.
//!
//! Records are addressed by interned [`Identifier`]s. Their relationships
//! live in a [`Graph`] of typed edges that keeps canonical (server) and local
//! (client) state side by side and mirrors every change onto the inverse
//! side. Attributes live in per-record [`RecordCache`]s. A [`Store`] owns both
//! and drives deferred work through the [`Scheduler`] phases
//! `Coalesce -> Sync -> Destroy`. The [`FetchManager`] turns find and save
//! requests into deduplicated, batched [`Adapter`] calls.
//!
//! Everything is single-threaded: handles are `Rc`-based and no operation
//! suspends in the middle of a graph mutation.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod cache;
/// Store configuration and its storage port.
pub mod config;
mod definition;
/// JSON:API-shaped documents.
pub mod document;
mod edge;
mod fetch;
mod graph;
mod ident;
mod operation;
mod scheduler;
mod schema;
mod store;
mod wrapper;

pub use cache::{ChangedAttributes, RecordCache, ValidationError};
pub use config::{ConfigError, ConfigService, ConfigStore, StoreConfig, STORE_CONFIG_KEY};
pub use definition::{
    implicit_key, DefinitionCache, EdgeDefinition, EdgeKind, EdgeMeta, SchemaError,
    IMPLICIT_KEY_PREFIX,
};
pub use document::{
    Document, Link, Linkage, Links, Meta, PrimaryData, RelationshipPayload, ResourceObject,
};
pub use edge::{
    BelongsToEdge, Edge, EdgeData, EdgeState, HasManyEdge, ImplicitEdge, RelationshipData,
};
pub use fetch::{Adapter, AdapterError, FetchError, FetchHandle, FetchManager, FetchOptions, Snapshot};
pub use graph::{Graph, GraphError};
pub use ident::{
    Identifier, IdentifierCache, IdentifierError, IdentifierRecord, ResourceIdentifier,
    DEFAULT_LID_PREFIX,
};
pub use operation::Operation;
pub use scheduler::{Phase, Scheduler};
pub use schema::{
    InverseDecl, ModelSchema, RelationshipKind, RelationshipSchema, SchemaRegistry, SchemaService,
};
pub use store::{CreateOptions, RelationshipValue, Store, StoreError};
pub use wrapper::{ChangeKind, NoopWrapper, RecordRef, StoreWrapper};
