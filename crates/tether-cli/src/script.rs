// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Replay scripts: a JSON array of steps run against one store.

use std::collections::BTreeMap;
use std::io::Write;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tether_core::{
    CreateOptions, Document, Identifier, NoopWrapper, RelationshipValue, ResourceIdentifier,
    SchemaRegistry, Store, StoreConfig,
};
use tracing::debug;

/// A record reference: an alias bound by `create`, or `{type, id}` / `{type, lid}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RecordSel {
    Alias(String),
    Resource(ResourceIdentifier),
}

/// Initial relationship value of a created record.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RelationshipInput {
    Many(Vec<RecordSel>),
    One(Option<RecordSel>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub(crate) enum Step {
    Push {
        document: Document,
    },
    Create {
        #[serde(rename = "as")]
        alias: Option<String>,
        #[serde(rename = "type")]
        ty: String,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        attributes: Map<String, Value>,
        #[serde(default)]
        relationships: BTreeMap<String, RelationshipInput>,
    },
    Add {
        record: RecordSel,
        field: String,
        values: Vec<RecordSel>,
        #[serde(default)]
        index: Option<usize>,
    },
    Remove {
        record: RecordSel,
        field: String,
        values: Vec<RecordSel>,
    },
    Replace {
        record: RecordSel,
        field: String,
        values: Vec<RecordSel>,
    },
    Set {
        record: RecordSel,
        field: String,
        value: Option<RecordSel>,
    },
    Unload {
        record: RecordSel,
    },
    Rollback {
        record: RecordSel,
    },
    Flush,
    Dump {
        record: RecordSel,
    },
}

impl Step {
    const fn name(&self) -> &'static str {
        match self {
            Self::Push { .. } => "push",
            Self::Create { .. } => "create",
            Self::Add { .. } => "add",
            Self::Remove { .. } => "remove",
            Self::Replace { .. } => "replace",
            Self::Set { .. } => "set",
            Self::Unload { .. } => "unload",
            Self::Rollback { .. } => "rollback",
            Self::Flush => "flush",
            Self::Dump { .. } => "dump",
        }
    }
}

/// Parses a script.
pub(crate) fn parse(bytes: &[u8]) -> Result<Vec<Step>> {
    serde_json::from_slice(bytes).context("parsing script")
}

/// One store plus the aliases bound so far.
pub(crate) struct Replay {
    store: Store,
    aliases: BTreeMap<String, Identifier>,
}

impl Replay {
    pub(crate) fn new(schema: SchemaRegistry, config: StoreConfig) -> Self {
        Self {
            store: Store::new(Rc::new(schema), Rc::new(NoopWrapper), config),
            aliases: BTreeMap::new(),
        }
    }

    /// Runs every step, writing one JSON line per `dump`, then drains the scheduler.
    pub(crate) fn run(&mut self, steps: &[Step], out: &mut dyn Write) -> Result<()> {
        for (n, step) in steps.iter().enumerate() {
            debug!(step = n, op = step.name(), "replay");
            self.apply(step, out)
                .with_context(|| format!("step {n} ({})", step.name()))?;
        }
        self.store.flush()?;
        Ok(())
    }

    fn apply(&mut self, step: &Step, out: &mut dyn Write) -> Result<()> {
        match step {
            Step::Push { document } => {
                self.store.push_document(document)?;
            }
            Step::Create {
                alias,
                ty,
                id,
                attributes,
                relationships,
            } => {
                let mut options = CreateOptions {
                    id: id.clone(),
                    attributes: attributes.clone(),
                    ..CreateOptions::default()
                };
                for (field, input) in relationships {
                    let value = match input {
                        RelationshipInput::Many(values) => {
                            RelationshipValue::Many(self.resolve_all(values)?)
                        }
                        RelationshipInput::One(value) => {
                            RelationshipValue::One(value.as_ref().map(|v| self.resolve(v)).transpose()?)
                        }
                    };
                    options = options.relationship(field.clone(), value);
                }
                let identifier = self.store.create_record(ty, options)?;
                if let Some(alias) = alias {
                    self.aliases.insert(alias.clone(), identifier);
                }
            }
            Step::Add {
                record,
                field,
                values,
                index,
            } => {
                let record = self.resolve(record)?;
                let values = self.resolve_all(values)?;
                self.store.add_to_has_many(record, field, values, *index)?;
            }
            Step::Remove {
                record,
                field,
                values,
            } => {
                let record = self.resolve(record)?;
                let values = self.resolve_all(values)?;
                self.store.remove_from_has_many(record, field, values)?;
            }
            Step::Replace {
                record,
                field,
                values,
            } => {
                let record = self.resolve(record)?;
                let values = self.resolve_all(values)?;
                self.store.set_has_many(record, field, values)?;
            }
            Step::Set {
                record,
                field,
                value,
            } => {
                let record = self.resolve(record)?;
                let value = value.as_ref().map(|v| self.resolve(v)).transpose()?;
                self.store.set_belongs_to(record, field, value)?;
            }
            Step::Unload { record } => {
                let record = self.resolve(record)?;
                self.store.unload_record(record)?;
            }
            Step::Rollback { record } => {
                let record = self.resolve(record)?;
                self.store.rollback_relationships(record)?;
            }
            Step::Flush => self.store.flush()?,
            Step::Dump { record } => {
                let record = self.resolve(record)?;
                let dumped = self.dump(record)?;
                writeln!(out, "{}", serde_json::to_string(&dumped)?)?;
            }
        }
        Ok(())
    }

    fn resolve(&mut self, sel: &RecordSel) -> Result<Identifier> {
        match sel {
            RecordSel::Alias(alias) => self
                .aliases
                .get(alias)
                .copied()
                .ok_or_else(|| anyhow!("unknown alias '{alias}'")),
            RecordSel::Resource(resource) => Ok(self.store.identifier_for(resource)?),
        }
    }

    fn resolve_all(&mut self, sels: &[RecordSel]) -> Result<Vec<Identifier>> {
        sels.iter().map(|s| self.resolve(s)).collect()
    }

    fn dump(&mut self, identifier: Identifier) -> Result<Value> {
        let resource = self.store.identifiers().resource(identifier)?;
        let fields: Vec<String> = self
            .store
            .schema()
            .relationships_for(&resource.ty)
            .iter()
            .map(|r| r.name.clone())
            .collect();
        let mut relationships = Map::new();
        for field in fields {
            let payload = self.store.relationship_payload(identifier, &field)?;
            relationships.insert(field, serde_json::to_value(payload)?);
        }
        Ok(json!({
            "type": resource.ty,
            "id": resource.id,
            "lid": resource.lid,
            "alive": self.store.is_alive(identifier),
            "relationships": relationships,
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use tether_dry_tests::schemas;

    fn replay(script: &Value) -> Vec<Value> {
        let steps = parse(script.to_string().as_bytes()).unwrap();
        let mut out = Vec::new();
        Replay::new(schemas::blog(), StoreConfig::default())
            .run(&steps, &mut out)
            .unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn ids(dump: &Value, field: &str) -> Vec<Value> {
        dump["relationships"][field]["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].clone())
            .collect()
    }

    #[test]
    fn local_edits_apply_over_pushed_state() {
        let dumps = replay(&json!([
            { "op": "push", "document": { "data": { "type": "post", "id": "1",
                "relationships": { "comments": { "data": [
                    { "type": "comment", "id": "1" }, { "type": "comment", "id": "2" }
                ] } } } } },
            { "op": "flush" },
            { "op": "create", "as": "draft", "type": "comment",
              "relationships": { "post": { "type": "post", "id": "1" } } },
            { "op": "remove", "record": { "type": "post", "id": "1" }, "field": "comments",
              "values": [{ "type": "comment", "id": "1" }] },
            { "op": "flush" },
            { "op": "dump", "record": { "type": "post", "id": "1" } },
            { "op": "dump", "record": "draft" }
        ]));
        assert_eq!(dumps.len(), 2);
        assert_eq!(ids(&dumps[0], "comments"), vec![json!("2"), Value::Null]);
        assert_eq!(dumps[1]["relationships"]["post"]["data"]["id"], json!("1"));
        assert_eq!(dumps[1]["id"], Value::Null);
    }

    #[test]
    fn rollback_restores_canonical_members() {
        let dumps = replay(&json!([
            { "op": "push", "document": { "data": { "type": "post", "id": "1",
                "relationships": { "comments": { "data": [{ "type": "comment", "id": "1" }] } } } } },
            { "op": "flush" },
            { "op": "replace", "record": { "type": "post", "id": "1" }, "field": "comments", "values": [] },
            { "op": "rollback", "record": { "type": "post", "id": "1" } },
            { "op": "dump", "record": { "type": "post", "id": "1" } }
        ]));
        assert_eq!(ids(&dumps[0], "comments"), vec![json!("1")]);
    }

    #[test]
    fn unknown_alias_names_the_failing_step() {
        let steps = parse(br#"[{ "op": "unload", "record": "ghost" }]"#).unwrap();
        let err = Replay::new(schemas::blog(), StoreConfig::default())
            .run(&steps, &mut Vec::new())
            .unwrap_err();
        assert!(format!("{err:#}").contains("step 0 (unload)"));
    }
}
