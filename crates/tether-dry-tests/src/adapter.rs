// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Adapter over an in-memory table of resources.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::future::{ready, Future};
use std::rc::Rc;

use tether_core::{Adapter, AdapterError, Document, ResourceObject, Snapshot, ValidationError};

/// One adapter call, as observed by the [`ScriptedAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `find_record(ty, id)`.
    FindRecord(String, String),
    /// `find_many(ty, ids)`.
    FindMany(String, Vec<String>),
    /// `create_record(ty)` for the given local id.
    CreateRecord(String, String),
    /// `update_record(ty, id)`.
    UpdateRecord(String, String),
    /// `delete_record(ty, id)`.
    DeleteRecord(String, String),
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<(String, String), ResourceObject>,
    calls: Vec<Call>,
    coalesce: bool,
    find_many: bool,
    group_size: Option<usize>,
    unreachable: BTreeSet<String>,
    rejection: Option<Vec<ValidationError>>,
    next_id: u64,
}

/// Answers requests from resources it was seeded with and logs every call.
///
/// Clones share state, so a test keeps one clone while the
/// [`FetchManager`](tether_core::FetchManager) owns another.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAdapter {
    inner: Rc<RefCell<Inner>>,
}

impl ScriptedAdapter {
    /// Adapter with no records that neither coalesces nor batches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapter that opts into coalescing and implements `find_many`.
    pub fn coalescing() -> Self {
        let adapter = Self::new();
        {
            let mut inner = adapter.inner.borrow_mut();
            inner.coalesce = true;
            inner.find_many = true;
        }
        adapter
    }

    /// Seeds a resource the server "has".
    pub fn with_record(self, resource: ResourceObject) -> Self {
        self.seed(resource);
        self
    }

    /// Seeds a resource the server "has".
    pub fn seed(&self, resource: ResourceObject) {
        if let Some(id) = resource.id.clone() {
            self.inner
                .borrow_mut()
                .records
                .insert((resource.ty.clone(), id), resource);
        }
    }

    /// Splits `find_many` groups into chunks of `size`.
    pub fn group_size(self, size: usize) -> Self {
        self.inner.borrow_mut().group_size = Some(size);
        self
    }

    /// Every request touching `id` fails with a network error.
    pub fn unreachable(&self, id: impl Into<String>) {
        self.inner.borrow_mut().unreachable.insert(id.into());
    }

    /// The next saves fail with these validation errors.
    pub fn reject_saves_with(&self, errors: Vec<ValidationError>) {
        self.inner.borrow_mut().rejection = Some(errors);
    }

    /// Saves succeed again.
    pub fn accept_saves(&self) {
        self.inner.borrow_mut().rejection = None;
    }

    /// Calls so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.inner.borrow().calls.clone()
    }

    /// Whether the server still holds `ty:id`.
    pub fn has_record(&self, ty: &str, id: &str) -> bool {
        self.inner
            .borrow()
            .records
            .contains_key(&(ty.to_owned(), id.to_owned()))
    }

    fn log(&self, call: Call) {
        self.inner.borrow_mut().calls.push(call);
    }

    fn check_reachable(&self, id: &str) -> Result<(), AdapterError> {
        if self.inner.borrow().unreachable.contains(id) {
            return Err(AdapterError::Network(format!("{id} is unreachable")));
        }
        Ok(())
    }

    fn check_accepted(&self) -> Result<(), AdapterError> {
        match &self.inner.borrow().rejection {
            Some(errors) => Err(AdapterError::Invalid(errors.clone())),
            None => Ok(()),
        }
    }

    fn lookup(&self, ty: &str, id: &str) -> Option<ResourceObject> {
        self.inner
            .borrow()
            .records
            .get(&(ty.to_owned(), id.to_owned()))
            .cloned()
    }

    fn answer_find(&self, ty: &str, id: &str) -> Result<Document, AdapterError> {
        self.check_reachable(id)?;
        self.lookup(ty, id)
            .map(Document::one)
            .ok_or_else(|| AdapterError::Network(format!("404 {ty}:{id}")))
    }

    fn answer_find_many(&self, ty: &str, ids: &[String]) -> Result<Document, AdapterError> {
        for id in ids {
            self.check_reachable(id)?;
        }
        Ok(Document::many(
            ids.iter().filter_map(|id| self.lookup(ty, id)).collect(),
        ))
    }

    fn answer_create(&self, ty: &str, snapshot: &Snapshot) -> Result<Document, AdapterError> {
        self.check_accepted()?;
        let id = match &snapshot.id {
            Some(id) => id.clone(),
            None => {
                let mut inner = self.inner.borrow_mut();
                inner.next_id += 1;
                format!("srv-{}", inner.next_id)
            }
        };
        let mut resource = ResourceObject::new(ty, id);
        resource.attributes.clone_from(&snapshot.attributes);
        self.seed(resource.clone());
        Ok(Document::one(resource))
    }

    fn answer_update(&self, ty: &str, snapshot: &Snapshot) -> Result<Document, AdapterError> {
        self.check_accepted()?;
        let id = snapshot.id.clone().unwrap_or_default();
        self.check_reachable(&id)?;
        let mut resource = ResourceObject::new(ty, id);
        resource.attributes.clone_from(&snapshot.attributes);
        self.seed(resource);
        Ok(Document::default())
    }

    fn answer_delete(&self, ty: &str, snapshot: &Snapshot) -> Result<Document, AdapterError> {
        self.check_accepted()?;
        let id = snapshot.id.clone().unwrap_or_default();
        self.check_reachable(&id)?;
        self.inner
            .borrow_mut()
            .records
            .remove(&(ty.to_owned(), id));
        Ok(Document::default())
    }
}

impl Adapter for ScriptedAdapter {
    fn find_record(
        &self,
        ty: &str,
        id: &str,
        _snapshot: &Snapshot,
    ) -> impl Future<Output = Result<Document, AdapterError>> {
        self.log(Call::FindRecord(ty.to_owned(), id.to_owned()));
        ready(self.answer_find(ty, id))
    }

    fn find_many(
        &self,
        ty: &str,
        ids: &[String],
        _snapshots: &[Snapshot],
    ) -> impl Future<Output = Result<Document, AdapterError>> {
        self.log(Call::FindMany(ty.to_owned(), ids.to_vec()));
        ready(self.answer_find_many(ty, ids))
    }

    fn create_record(
        &self,
        ty: &str,
        snapshot: &Snapshot,
    ) -> impl Future<Output = Result<Document, AdapterError>> {
        self.log(Call::CreateRecord(ty.to_owned(), snapshot.lid.clone()));
        ready(self.answer_create(ty, snapshot))
    }

    fn update_record(
        &self,
        ty: &str,
        snapshot: &Snapshot,
    ) -> impl Future<Output = Result<Document, AdapterError>> {
        self.log(Call::UpdateRecord(
            ty.to_owned(),
            snapshot.id.clone().unwrap_or_default(),
        ));
        ready(self.answer_update(ty, snapshot))
    }

    fn delete_record(
        &self,
        ty: &str,
        snapshot: &Snapshot,
    ) -> impl Future<Output = Result<Document, AdapterError>> {
        self.log(Call::DeleteRecord(
            ty.to_owned(),
            snapshot.id.clone().unwrap_or_default(),
        ));
        ready(self.answer_delete(ty, snapshot))
    }

    fn coalesce_find_requests(&self) -> bool {
        self.inner.borrow().coalesce
    }

    fn supports_find_many(&self) -> bool {
        self.inner.borrow().find_many
    }

    fn group_records_for_find_many(&self, snapshots: &[Snapshot]) -> Vec<Vec<Snapshot>> {
        match self.inner.borrow().group_size {
            Some(size) => snapshots
                .chunks(size.max(1))
                .map(<[Snapshot]>::to_vec)
                .collect(),
            None => vec![snapshots.to_vec()],
        }
    }
}
