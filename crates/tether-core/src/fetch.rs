// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fetch coalescing and the save queue.
//!
//! [`FetchManager::schedule_fetch`] registers a waiter in a pending table
//! keyed by model name; requests for the same record with equivalent options
//! share one entry and therefore one network call. [`FetchManager::flush`]
//! drains the table: per model, records are grouped and fetched with a single
//! `find_many` call where the adapter allows it, and with `find_record`
//! otherwise. Saves queue FIFO and run after fetches.
//!
//! Every waiter receives its result through its own `oneshot` channel. A
//! record that disappears from the store before its response lands is never
//! re-created by that response.
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

use crate::cache::ValidationError;
use crate::document::Document;
use crate::ident::Identifier;
use crate::store::{Store, StoreError};

/// Errors returned by an [`Adapter`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The server rejected the record.
    #[error("record is invalid ({} errors)", .0.len())]
    Invalid(Vec<ValidationError>),
    /// Transport failure.
    #[error("network error: {0}")]
    Network(String),
    /// The adapter does not implement the operation.
    #[error("adapter does not support {0}")]
    Unsupported(&'static str),
}

/// Errors delivered to fetch and save waiters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The adapter call failed.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    /// A batched response did not contain the record.
    #[error("{ty}:{id} was not found in the response")]
    NotFound {
        /// Model name.
        ty: String,
        /// Requested id.
        id: String,
    },
    /// The response could not be applied.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// The record was destroyed before the response arrived.
    #[error("record was destroyed before its response arrived")]
    RecordDestroyed,
    /// The manager was dropped before answering.
    #[error("request dropped before completion")]
    Dropped,
    /// Applying the response to the store failed.
    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for FetchError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

/// Options of one fetch or save request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    /// Relationship paths to sideload.
    pub include: Option<String>,
    /// Bypass any cached data.
    pub reload: bool,
    /// Free-form options passed through to the adapter.
    pub adapter_options: Map<String, Value>,
}

impl FetchOptions {
    /// Two requests with equivalent options share one fetch.
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.include == other.include
    }
}

/// Immutable view of a record handed to the adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Handle.
    pub identifier: Identifier,
    /// Model name.
    pub ty: String,
    /// Server id.
    pub id: Option<String>,
    /// Local id.
    pub lid: String,
    /// Request options.
    pub options: FetchOptions,
    /// Current attribute values.
    pub attributes: Map<String, Value>,
    /// Keys with dirty or in-flight values.
    pub changed_keys: Vec<String>,
}

impl Snapshot {
    fn capture(
        store: &Store,
        identifier: Identifier,
        options: FetchOptions,
    ) -> Result<Self, StoreError> {
        let record = store.identifiers().record(identifier)?;
        let cache = store.record(identifier);
        Ok(Self {
            identifier,
            ty: record.ty.clone(),
            id: record.id.clone(),
            lid: record.lid.clone(),
            options,
            attributes: cache.map(|c| c.attributes()).unwrap_or_default(),
            changed_keys: cache
                .map(|c| c.changed_attributes().into_keys().collect())
                .unwrap_or_default(),
        })
    }
}

/// Network port used by the [`FetchManager`].
///
/// Responses are already-normalized documents.
pub trait Adapter {
    /// Fetches one record.
    fn find_record(
        &self,
        ty: &str,
        id: &str,
        snapshot: &Snapshot,
    ) -> impl Future<Output = Result<Document, AdapterError>>;

    /// Fetches several records of one model in one call.
    fn find_many(
        &self,
        ty: &str,
        ids: &[String],
        snapshots: &[Snapshot],
    ) -> impl Future<Output = Result<Document, AdapterError>> {
        let _ = (ty, ids, snapshots);
        std::future::ready(Err(AdapterError::Unsupported("findMany")))
    }

    /// Persists a client-created record.
    fn create_record(
        &self,
        ty: &str,
        snapshot: &Snapshot,
    ) -> impl Future<Output = Result<Document, AdapterError>>;

    /// Persists changes to an existing record.
    fn update_record(
        &self,
        ty: &str,
        snapshot: &Snapshot,
    ) -> impl Future<Output = Result<Document, AdapterError>>;

    /// Deletes a record on the server.
    fn delete_record(
        &self,
        ty: &str,
        snapshot: &Snapshot,
    ) -> impl Future<Output = Result<Document, AdapterError>>;

    /// Whether fetches for one model may be batched.
    fn coalesce_find_requests(&self) -> bool {
        false
    }

    /// Whether [`Adapter::find_many`] is implemented.
    fn supports_find_many(&self) -> bool {
        false
    }

    /// Splits pending fetches of one model into batches. Defaults to one group.
    fn group_records_for_find_many(&self, snapshots: &[Snapshot]) -> Vec<Vec<Snapshot>> {
        vec![snapshots.to_vec()]
    }
}

type Waiter = oneshot::Sender<Result<Identifier, FetchError>>;

/// Future resolving to the identifier of the fetched or saved record.
#[derive(Debug)]
pub struct FetchHandle {
    rx: oneshot::Receiver<Result<Identifier, FetchError>>,
}

impl Future for FetchHandle {
    type Output = Result<Identifier, FetchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(FetchError::Dropped)))
    }
}

fn channel() -> (Waiter, FetchHandle) {
    let (tx, rx) = oneshot::channel();
    (tx, FetchHandle { rx })
}

#[derive(Debug)]
struct PendingFetch {
    identifier: Identifier,
    id: String,
    options: FetchOptions,
    waiters: Vec<Waiter>,
}

impl PendingFetch {
    fn resolve(self, result: &Result<Identifier, FetchError>) {
        for waiter in self.waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

#[derive(Debug)]
struct PendingSave {
    identifier: Identifier,
    options: FetchOptions,
    waiter: Waiter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveKind {
    Create,
    Update,
    Delete,
}

/// Deduplicating, coalescing request manager over an [`Adapter`].
#[derive(Debug)]
pub struct FetchManager<A> {
    adapter: A,
    pending: BTreeMap<String, Vec<PendingFetch>>,
    saves: VecDeque<PendingSave>,
}

impl<A: Adapter> FetchManager<A> {
    /// Manager with empty queues.
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            pending: BTreeMap::new(),
            saves: VecDeque::new(),
        }
    }

    /// The wrapped adapter.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Number of distinct pending fetches.
    pub fn pending_fetches(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Number of queued saves.
    pub fn pending_saves(&self) -> usize {
        self.saves.len()
    }

    /// Queues a fetch of `identifier`. A pending fetch of the same record
    /// with equivalent options is shared.
    pub fn schedule_fetch(
        &mut self,
        store: &Store,
        identifier: Identifier,
        options: FetchOptions,
    ) -> Result<FetchHandle, FetchError> {
        let record = store
            .identifiers()
            .record(identifier)
            .map_err(StoreError::from)?;
        let Some(id) = record.id.clone() else {
            return Err(FetchError::InvalidPayload(format!(
                "cannot fetch {} without an id",
                record.lid
            )));
        };
        let (tx, handle) = channel();
        let queue = self.pending.entry(record.ty.clone()).or_default();
        if let Some(existing) = queue
            .iter_mut()
            .find(|p| p.identifier == identifier && p.options.is_equivalent(&options))
        {
            existing.waiters.push(tx);
        } else {
            queue.push(PendingFetch {
                identifier,
                id,
                options,
                waiters: vec![tx],
            });
        }
        Ok(handle)
    }

    /// Queues a save. Dirty attributes move in flight immediately.
    pub fn schedule_save(
        &mut self,
        store: &mut Store,
        identifier: Identifier,
        options: FetchOptions,
    ) -> Result<FetchHandle, FetchError> {
        store.will_commit(identifier)?;
        let (waiter, handle) = channel();
        self.saves.push_back(PendingSave {
            identifier,
            options,
            waiter,
        });
        Ok(handle)
    }

    /// Runs every pending fetch, then every pending save.
    pub async fn flush(&mut self, store: &mut Store) {
        self.flush_all_pending_fetches(store).await;
        self.flush_pending_saves(store).await;
    }

    /// Runs every pending fetch, model by model.
    #[instrument(level = "debug", skip_all)]
    pub async fn flush_all_pending_fetches(&mut self, store: &mut Store) {
        let pending = std::mem::take(&mut self.pending);
        for (ty, fetches) in pending {
            debug!(ty = %ty, fetches = fetches.len(), "flushing fetches");
            self.flush_type(store, &ty, fetches).await;
        }
    }

    async fn flush_type(&self, store: &mut Store, ty: &str, fetches: Vec<PendingFetch>) {
        let coalesce = fetches.len() > 1
            && store.config().coalesce_find_requests
            && self.adapter.coalesce_find_requests()
            && self.adapter.supports_find_many();
        if !coalesce {
            for fetch in fetches {
                self.fetch_one(store, ty, fetch).await;
            }
            return;
        }

        let mut by_identifier: BTreeMap<Identifier, PendingFetch> = BTreeMap::new();
        let mut snapshots = Vec::new();
        for fetch in fetches {
            match Snapshot::capture(store, fetch.identifier, fetch.options.clone()) {
                Ok(snapshot) => {
                    snapshots.push(snapshot);
                    by_identifier.entry(fetch.identifier).or_insert(fetch);
                }
                Err(err) => fetch.resolve(&Err(err.into())),
            }
        }

        let max = store.config().max_batch_size.unwrap_or(usize::MAX).max(1);
        for group in self.adapter.group_records_for_find_many(&snapshots) {
            if group.is_empty() {
                warn!(ty, "adapter returned an empty group");
                continue;
            }
            for chunk in group.chunks(max) {
                let batch: Vec<PendingFetch> = chunk
                    .iter()
                    .filter_map(|s| by_identifier.remove(&s.identifier))
                    .collect();
                match batch.len() {
                    0 => {}
                    1 => {
                        for fetch in batch {
                            self.fetch_one(store, ty, fetch).await;
                        }
                    }
                    _ => self.fetch_many(store, ty, batch, chunk).await,
                }
            }
        }
        for (_, fetch) in by_identifier {
            self.fetch_one(store, ty, fetch).await;
        }
    }

    async fn fetch_one(&self, store: &mut Store, ty: &str, fetch: PendingFetch) {
        let snapshot = match Snapshot::capture(store, fetch.identifier, fetch.options.clone()) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                fetch.resolve(&Err(err.into()));
                return;
            }
        };
        let response = self.adapter.find_record(ty, &fetch.id, &snapshot).await;
        let result = match response {
            Ok(document) => Self::apply_single(store, ty, &fetch, document),
            Err(err) => {
                let discard = store
                    .record(fetch.identifier)
                    .is_some_and(|c| c.is_empty() || c.is_new());
                if discard {
                    if let Err(unload) = store.unload_record(fetch.identifier) {
                        debug!(error = %unload, "could not unload record after failed fetch");
                    }
                }
                Err(FetchError::Adapter(err))
            }
        };
        fetch.resolve(&result);
    }

    fn apply_single(
        store: &mut Store,
        ty: &str,
        fetch: &PendingFetch,
        mut document: Document,
    ) -> Result<Identifier, FetchError> {
        if !store.identifiers().is_live(fetch.identifier) {
            return Err(FetchError::RecordDestroyed);
        }
        let lid = store
            .identifiers()
            .record(fetch.identifier)
            .map_err(StoreError::from)?
            .lid
            .clone();
        let [primary] = document.primary_mut() else {
            return Err(FetchError::InvalidPayload(format!(
                "findRecord for {ty}:{} must return exactly one primary resource",
                fetch.id
            )));
        };
        if primary.id.as_deref() != Some(fetch.id.as_str()) {
            warn!(
                ty,
                requested = %fetch.id,
                returned = ?primary.id,
                "findRecord returned a different id; applying it to the requested record"
            );
            primary.id = Some(fetch.id.clone());
        }
        primary.lid = Some(lid);
        store.push_document(&document)?;
        Ok(fetch.identifier)
    }

    async fn fetch_many(
        &self,
        store: &mut Store,
        ty: &str,
        batch: Vec<PendingFetch>,
        snapshots: &[Snapshot],
    ) {
        let ids: Vec<String> = batch.iter().map(|f| f.id.clone()).collect();
        debug!(ty, count = ids.len(), "coalesced findMany");
        let document = match self.adapter.find_many(ty, &ids, snapshots).await {
            Ok(document) => document,
            Err(err) => {
                let err = Err(FetchError::Adapter(err));
                for fetch in batch {
                    fetch.resolve(&err);
                }
                return;
            }
        };
        let returned: BTreeSet<Identifier> = match store.push_document(&document) {
            Ok(primary) => primary.into_iter().collect(),
            Err(err) => {
                let err = Err(FetchError::from(err));
                for fetch in batch {
                    fetch.resolve(&err);
                }
                return;
            }
        };
        for fetch in batch {
            let result = if !store.identifiers().is_live(fetch.identifier) {
                Err(FetchError::RecordDestroyed)
            } else if returned.contains(&fetch.identifier) {
                Ok(fetch.identifier)
            } else {
                warn!(ty, id = %fetch.id, "record missing from findMany response");
                Err(FetchError::NotFound {
                    ty: ty.to_owned(),
                    id: fetch.id.clone(),
                })
            };
            fetch.resolve(&result);
        }
    }

    /// Runs queued saves in order. Each picks create, update or delete from
    /// the record's state at flush time.
    #[instrument(level = "debug", skip_all)]
    pub async fn flush_pending_saves(&mut self, store: &mut Store) {
        let saves = std::mem::take(&mut self.saves);
        debug!(saves = saves.len(), "flushing saves");
        for save in saves {
            let result = self.save_one(store, &save).await;
            let _ = save.waiter.send(result);
        }
    }

    async fn save_one(
        &self,
        store: &mut Store,
        save: &PendingSave,
    ) -> Result<Identifier, FetchError> {
        let identifier = save.identifier;
        let Some(cache) = store.record(identifier) else {
            return Err(FetchError::RecordDestroyed);
        };
        if cache.is_new() && cache.is_deleted() {
            store.did_save_record(identifier, None)?;
            return Ok(identifier);
        }
        let kind = if cache.is_new() {
            SaveKind::Create
        } else if cache.is_deleted() {
            SaveKind::Delete
        } else {
            SaveKind::Update
        };
        let snapshot = Snapshot::capture(store, identifier, save.options.clone())?;
        let ty = snapshot.ty.clone();
        let response = match kind {
            SaveKind::Create => self.adapter.create_record(&ty, &snapshot).await,
            SaveKind::Update => self.adapter.update_record(&ty, &snapshot).await,
            SaveKind::Delete => self.adapter.delete_record(&ty, &snapshot).await,
        };
        if store.record(identifier).is_none() || !store.identifiers().is_live(identifier) {
            return Err(FetchError::RecordDestroyed);
        }
        match response {
            Ok(mut document) => {
                let lid = snapshot.lid.clone();
                let primary = match document.primary_mut() {
                    [] => None,
                    [primary] => {
                        primary.lid = Some(lid);
                        Some(primary.clone())
                    }
                    _ => {
                        return Err(FetchError::InvalidPayload(format!(
                            "save of {ty} returned more than one primary resource"
                        )))
                    }
                };
                store.did_save_record(identifier, primary.as_ref())?;
                store.push_document(&Document {
                    data: None,
                    included: std::mem::take(&mut document.included),
                    meta: None,
                })?;
                debug!(%identifier, ?kind, "save committed");
                Ok(identifier)
            }
            Err(err) => {
                let errors = match &err {
                    AdapterError::Invalid(errors) => errors.clone(),
                    _ => Vec::new(),
                };
                store.record_was_rejected(identifier, errors)?;
                Err(FetchError::Adapter(err))
            }
        }
    }
}
