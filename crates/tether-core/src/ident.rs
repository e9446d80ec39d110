// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Stable record identifiers and the interning cache that hands them out.
//!
//! An [`Identifier`] is a copyable handle into an [`IdentifierCache`]. The
//! cache guarantees a single handle per logical record: lookups by `lid` and by
//! `(type, id)` always resolve to the same slot. Slots are never reused, so a
//! forgotten handle stays invalid instead of aliasing a newer record.
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default prefix for generated local ids.
pub const DEFAULT_LID_PREFIX: &str = "@lid";

/// Interned record handle.
///
/// Ordering follows creation order, which keeps every `BTreeMap` keyed by
/// identifiers deterministic.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(u32);

impl Identifier {
    /// Returns the raw slot index.
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for Identifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Resolved attributes of an interned identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierRecord {
    /// Model name.
    pub ty: String,
    /// Server id; `None` until a client-created record is confirmed.
    pub id: Option<String>,
    /// Client-unique local id. Never changes once assigned.
    pub lid: String,
}

/// `{type, id?, lid?}` reference as it appears in payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    /// Model name.
    #[serde(rename = "type")]
    pub ty: String,
    /// Server id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Local id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
}

impl ResourceIdentifier {
    /// Reference by `(type, id)`.
    pub fn new(ty: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            id: Some(id.into()),
            lid: None,
        }
    }

    /// Reference by local id only.
    pub fn local(ty: impl Into<String>, lid: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            id: None,
            lid: Some(lid.into()),
        }
    }
}

/// Errors raised by the identifier cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// A reference arrived without a model name.
    #[error("resource identifier is missing a type")]
    MissingType,
    /// `(type, id)` is already bound to another identifier.
    #[error("id collision: {ty}:{id} already belongs to another record")]
    IdCollision {
        /// Model name.
        ty: String,
        /// Conflicting server id.
        id: String,
    },
    /// The identifier already carries a different server id.
    #[error("cannot change id of {ty}:{current} to {requested}")]
    IdReassignment {
        /// Model name.
        ty: String,
        /// Id already assigned.
        current: String,
        /// Id that was requested.
        requested: String,
    },
    /// The handle was forgotten or never issued by this cache.
    #[error("unknown identifier {0}")]
    UnknownIdentifier(Identifier),
}

/// Interning table for [`Identifier`]s.
#[derive(Debug)]
pub struct IdentifierCache {
    slots: Vec<Option<IdentifierRecord>>,
    by_lid: FxHashMap<String, Identifier>,
    by_type_id: FxHashMap<(String, String), Identifier>,
    lid_prefix: String,
    next_lid: u64,
}

impl Default for IdentifierCache {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentifierCache {
    /// Creates an empty cache using [`DEFAULT_LID_PREFIX`].
    pub fn new() -> Self {
        Self::with_lid_prefix(DEFAULT_LID_PREFIX)
    }

    /// Creates an empty cache that generates lids under `prefix`.
    pub fn with_lid_prefix(prefix: impl Into<String>) -> Self {
        Self {
            slots: Vec::new(),
            by_lid: FxHashMap::default(),
            by_type_id: FxHashMap::default(),
            lid_prefix: prefix.into(),
            next_lid: 0,
        }
    }

    /// Number of live identifiers.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Returns `true` when no identifier is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up an existing identifier without creating one.
    ///
    /// `lid` wins over `(type, id)` when both are present.
    pub fn peek(&self, resource: &ResourceIdentifier) -> Option<Identifier> {
        if let Some(lid) = resource.lid.as_deref() {
            if let Some(found) = self.by_lid.get(lid) {
                return Some(*found);
            }
        }
        let id = resource.id.as_deref()?;
        self.by_type_id
            .get(&(resource.ty.clone(), id.to_owned()))
            .copied()
    }

    /// Returns the identifier for `resource`, interning a new one on first sight.
    ///
    /// When the reference matches a lid-only identifier and now carries an id,
    /// the id is assigned to that identifier.
    pub fn get_or_create(
        &mut self,
        resource: &ResourceIdentifier,
    ) -> Result<Identifier, IdentifierError> {
        if resource.ty.is_empty() {
            return Err(IdentifierError::MissingType);
        }
        if let Some(found) = self.peek(resource) {
            if let Some(id) = resource.id.as_deref() {
                if self.record(found)?.id.is_none() {
                    self.assign_id(found, id)?;
                }
            }
            if let Some(lid) = resource.lid.as_deref() {
                self.by_lid.entry(lid.to_owned()).or_insert(found);
            }
            return Ok(found);
        }
        let lid = match (&resource.lid, &resource.id) {
            (Some(lid), _) => lid.clone(),
            (None, Some(id)) => format!("{}:{}:{}", self.lid_prefix, resource.ty, id),
            (None, None) => self.generate_lid(&resource.ty),
        };
        Ok(self.intern(resource.ty.clone(), resource.id.clone(), lid))
    }

    /// Interns an identifier for a client-created record.
    pub fn create_for_new(
        &mut self,
        ty: &str,
        id: Option<&str>,
    ) -> Result<Identifier, IdentifierError> {
        if ty.is_empty() {
            return Err(IdentifierError::MissingType);
        }
        if let Some(id) = id {
            if self
                .by_type_id
                .contains_key(&(ty.to_owned(), id.to_owned()))
            {
                return Err(IdentifierError::IdCollision {
                    ty: ty.to_owned(),
                    id: id.to_owned(),
                });
            }
        }
        let lid = self.generate_lid(ty);
        Ok(self.intern(ty.to_owned(), id.map(str::to_owned), lid))
    }

    /// Resolves a handle to its record.
    pub fn record(&self, identifier: Identifier) -> Result<&IdentifierRecord, IdentifierError> {
        self.slots
            .get(identifier.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(IdentifierError::UnknownIdentifier(identifier))
    }

    /// Model name of a live handle.
    pub fn ty(&self, identifier: Identifier) -> Result<&str, IdentifierError> {
        self.record(identifier).map(|r| r.ty.as_str())
    }

    /// Returns `true` while the handle has not been forgotten.
    pub fn is_live(&self, identifier: Identifier) -> bool {
        self.record(identifier).is_ok()
    }

    /// Binds a server id to an identifier (first confirmation of a client record).
    pub fn assign_id(&mut self, identifier: Identifier, id: &str) -> Result<(), IdentifierError> {
        let record = self.record(identifier)?;
        match record.id.as_deref() {
            Some(current) if current == id => return Ok(()),
            Some(current) => {
                return Err(IdentifierError::IdReassignment {
                    ty: record.ty.clone(),
                    current: current.to_owned(),
                    requested: id.to_owned(),
                })
            }
            None => {}
        }
        let key = (record.ty.clone(), id.to_owned());
        if let Some(other) = self.by_type_id.get(&key) {
            if *other != identifier {
                return Err(IdentifierError::IdCollision {
                    ty: key.0,
                    id: key.1,
                });
            }
        }
        self.by_type_id.insert(key, identifier);
        if let Some(Some(slot)) = self.slots.get_mut(identifier.0 as usize) {
            slot.id = Some(id.to_owned());
        }
        Ok(())
    }

    /// Releases a handle. Lookups by its lid or id intern a fresh identifier afterwards.
    pub fn forget(&mut self, identifier: Identifier) -> Option<IdentifierRecord> {
        let record = self.slots.get_mut(identifier.0 as usize)?.take()?;
        self.by_lid.retain(|_, v| *v != identifier);
        if let Some(id) = &record.id {
            self.by_type_id.remove(&(record.ty.clone(), id.clone()));
        }
        Some(record)
    }

    /// Builds the payload form of a handle.
    pub fn resource(&self, identifier: Identifier) -> Result<ResourceIdentifier, IdentifierError> {
        let record = self.record(identifier)?;
        Ok(ResourceIdentifier {
            ty: record.ty.clone(),
            id: record.id.clone(),
            lid: Some(record.lid.clone()),
        })
    }

    fn generate_lid(&mut self, ty: &str) -> String {
        loop {
            self.next_lid += 1;
            let lid = format!("{}:{}~{}", self.lid_prefix, ty, self.next_lid);
            if !self.by_lid.contains_key(&lid) {
                return lid;
            }
        }
    }

    fn intern(&mut self, ty: String, id: Option<String>, lid: String) -> Identifier {
        #[allow(clippy::cast_possible_truncation)]
        let identifier = Identifier(self.slots.len() as u32);
        if let Some(id) = &id {
            self.by_type_id.insert((ty.clone(), id.clone()), identifier);
        }
        self.by_lid.insert(lid.clone(), identifier);
        self.slots.push(Some(IdentifierRecord { ty, id, lid }));
        identifier
    }
}
