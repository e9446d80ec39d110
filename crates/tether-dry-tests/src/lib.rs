// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for tether crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`adapter`] - Scripted adapter with a call log and failure switches
//! - [`config`] - In-memory config store
//! - [`docs`] - Payload builders
//! - [`schemas`] - Schema fixtures
//! - [`store`] - Store construction helpers
//! - [`wrapper`] - Recording store wrapper

pub mod adapter;
pub mod config;
pub mod docs;
pub mod schemas;
pub mod store;
pub mod wrapper;

pub use adapter::{Call, ScriptedAdapter};
pub use config::InMemoryConfigStore;
pub use docs::{many, one, related_link, resource, rid};
pub use store::{ident, recording_store, recording_store_with};
pub use wrapper::{Notification, RecordingWrapper};
