// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Store construction helpers.

use std::rc::Rc;

use tether_core::{Identifier, SchemaRegistry, Store, StoreConfig, StoreWrapper};

use crate::docs::resource;
use crate::wrapper::RecordingWrapper;

/// Store over `schema` with default config and a [`RecordingWrapper`].
pub fn recording_store(schema: SchemaRegistry) -> (Store, Rc<RecordingWrapper>) {
    recording_store_with(schema, StoreConfig::default())
}

/// Store over `schema` with `config` and a [`RecordingWrapper`].
pub fn recording_store_with(
    schema: SchemaRegistry,
    config: StoreConfig,
) -> (Store, Rc<RecordingWrapper>) {
    let wrapper = Rc::new(RecordingWrapper::new());
    let store = Store::new(
        Rc::new(schema),
        wrapper.clone() as Rc<dyn StoreWrapper>,
        config,
    );
    (store, wrapper)
}

/// Interns `ty:id` without loading any data.
///
/// # Panics
/// Panics when the identifier cannot be created.
#[allow(clippy::expect_used)]
pub fn ident(store: &mut Store, ty: &str, id: &str) -> Identifier {
    store
        .identifier_for(&resource(ty, id).identifier())
        .expect("identifier")
}
