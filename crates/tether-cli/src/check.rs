// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `tether check`: resolve every declared relationship of a schema.

use std::io::Write;

use anyhow::Result;
use tether_core::{DefinitionCache, SchemaRegistry, SchemaService};

/// Writes one line per relationship and returns how many failed to resolve.
pub(crate) fn check(schema: &SchemaRegistry, out: &mut dyn Write) -> Result<usize> {
    let mut definitions = DefinitionCache::new();
    let mut failures = 0;
    for ty in schema.model_names() {
        for relationship in schema.relationships_for(ty) {
            let field = &relationship.name;
            match definitions.definition_for(schema, ty, field) {
                Ok(def) => writeln!(
                    out,
                    "{ty}.{field} {:?}{} -> {}.{} {:?}",
                    def.kind(),
                    if def.is_async() { " async" } else { "" },
                    def.ty(),
                    def.inverse_key(),
                    def.inverse_kind(),
                )?,
                Err(err) => {
                    failures += 1;
                    writeln!(out, "{ty}.{field} error: {err}")?;
                }
            }
        }
    }
    Ok(failures)
}
