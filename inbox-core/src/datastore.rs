//! Datastore coordinator: the set of datasets for one signed-in session.
//!
//! ```text
//!  user action ──► Datastore ──► every Dataset (optimistic, synchronous)
//!                     │
//!                     ├──► InboxApi::mutate().await
//!                     │        └── Err ──► restore in every Dataset
//!                     │                    + MutationFailed event
//!  push event  ──► Datastore::apply_push ──► every Dataset
//!                     │
//!                     ▼
//!               Listeners<DatastoreEvent>   (after the state lock is released)
//! ```
//!
//! All dataset state sits behind one synchronous lock; no lock is held
//! across a network await. Network calls for the same message id are
//! serialized in call order, while their optimistic effects apply at once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::api::{FetchQuery, InboxApi, MessagePage, MutationRequest};
use crate::dataset::{Dataset, DatasetEvent, DatasetSnapshot};
use crate::error::{ApiError, DatastoreError};
use crate::filter::DatasetFilter;
use crate::listeners::{Listeners, Subscription};
use crate::message::{Message, MessageMutation};

/// Datastore configuration.
#[derive(Debug, Clone)]
pub struct DatastoreConfig {
    /// Messages requested per page
    pub page_size: usize,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self { page_size: 24 }
    }
}

impl DatastoreConfig {
    pub fn for_testing() -> Self {
        Self { page_size: 5 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Skip datasets that already hold a snapshot.
    pub use_cache: bool,
    /// Restrict the load to these datasets (`None` = all).
    pub dataset_ids: Option<Vec<String>>,
}

impl LoadOptions {
    pub fn refresh() -> Self {
        Self::default()
    }

    pub fn cached() -> Self {
        Self {
            use_cache: true,
            dataset_ids: None,
        }
    }
}

/// A server-originated change, already classified.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    NewMessage(Message),
    Mutated {
        message_id: String,
        mutation: MessageMutation,
    },
    Clicked {
        message_id: String,
    },
    ReadAll,
    ArchiveAll,
    ArchiveRead,
}

/// Result of a user-initiated mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The message was already in the requested state; nothing was sent.
    Skipped,
    Committed,
    /// The server rejected the change and the local state was reverted.
    RolledBack,
    /// The server rejected a change that cannot be reverted (open, click).
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DatastoreEvent {
    /// Feeds were (re)registered; previous datasets are gone.
    DatasetsChanged { dataset_ids: Vec<String> },
    Dataset(DatasetEvent),
    TotalUnreadCountChanged(usize),
    MutationFailed {
        action: &'static str,
        message_id: Option<String>,
        error: ApiError,
    },
}

#[derive(Default)]
struct State {
    datasets: Vec<Dataset>,
    paginating: HashSet<String>,
    total_unread: usize,
    /// Bumped whenever the dataset set is replaced; stale fetches are dropped.
    generation: u64,
}

impl State {
    fn dataset_mut(&mut self, id: &str) -> Option<&mut Dataset> {
        self.datasets.iter_mut().find(|ds| ds.id() == id)
    }

    fn find_message(&self, message_id: &str) -> Option<Message> {
        self.datasets
            .iter()
            .find_map(|ds| ds.get(message_id))
            .cloned()
    }

    fn apply_change(&mut self, before: &Message, after: &Message) {
        for ds in &mut self.datasets {
            ds.update_with_message_change(before, after);
        }
    }

    fn drain_events(&mut self) -> Vec<DatastoreEvent> {
        let mut events: Vec<DatastoreEvent> = self
            .datasets
            .iter_mut()
            .flat_map(|ds| ds.take_events())
            .map(DatastoreEvent::Dataset)
            .collect();

        let total = self.datasets.iter().map(Dataset::unread_count).sum();
        if total != self.total_unread {
            self.total_unread = total;
            events.push(DatastoreEvent::TotalUnreadCountChanged(total));
        }
        events
    }
}

struct Inner {
    api: Arc<dyn InboxApi>,
    config: DatastoreConfig,
    state: Mutex<State>,
    listeners: Listeners<DatastoreEvent>,
    message_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Cheaply cloneable handle to the session's datasets.
#[derive(Clone)]
pub struct Datastore {
    inner: Arc<Inner>,
}

impl Datastore {
    pub fn new(api: Arc<dyn InboxApi>, config: DatastoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                config,
                state: Mutex::new(State::default()),
                listeners: Listeners::new(),
                message_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &DatastoreConfig {
        &self.inner.config
    }

    /// Register a listener for every datastore event.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&DatastoreEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(listener)
    }

    /// Replace all datasets with fresh, unloaded ones.
    pub fn register_feeds<I, S>(&self, feeds: I)
    where
        I: IntoIterator<Item = (S, DatasetFilter)>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let datasets: Vec<Dataset> = feeds
            .into_iter()
            .map(|(id, filter)| Dataset::new(id, filter))
            .filter(|ds| seen.insert(ds.id().to_string()))
            .collect();
        let dataset_ids: Vec<String> = datasets.iter().map(|ds| ds.id().to_string()).collect();

        let events = {
            let mut state = self.inner.state.lock();
            state.datasets = datasets;
            state.paginating.clear();
            state.generation += 1;
            let mut events = vec![DatastoreEvent::DatasetsChanged {
                dataset_ids: dataset_ids.clone(),
            }];
            events.extend(state.drain_events());
            events
        };
        log::debug!("Registered {} datasets: {:?}", dataset_ids.len(), dataset_ids);
        self.dispatch(events);
    }

    /// Drop every dataset (sign-out).
    pub fn reset(&self) {
        self.register_feeds(std::iter::empty::<(String, DatasetFilter)>());
    }

    pub fn dataset_ids(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        state.datasets.iter().map(|ds| ds.id().to_string()).collect()
    }

    pub fn dataset(&self, id: &str) -> Option<DatasetSnapshot> {
        let state = self.inner.state.lock();
        state.datasets.iter().find(|ds| ds.id() == id).map(Dataset::snapshot)
    }

    /// Sum of every dataset's unread count.
    pub fn total_unread_count(&self) -> usize {
        let state = self.inner.state.lock();
        state.datasets.iter().map(Dataset::unread_count).sum()
    }

    /// Stored copy of a message from whichever dataset holds it.
    pub fn find_message(&self, message_id: &str) -> Option<Message> {
        self.inner.state.lock().find_message(message_id)
    }

    /// Fetch first-page snapshots, in parallel, for the selected datasets.
    ///
    /// Datasets that fetched successfully are updated even when another
    /// dataset's fetch fails; the first failure is returned.
    pub async fn load(&self, options: LoadOptions) -> Result<(), DatastoreError> {
        let (generation, targets) = {
            let state = self.inner.state.lock();
            let targets: Vec<(String, DatasetFilter)> = state
                .datasets
                .iter()
                .filter(|ds| match &options.dataset_ids {
                    Some(ids) => ids.iter().any(|id| id == ds.id()),
                    None => true,
                })
                .filter(|ds| !(options.use_cache && ds.is_loaded()))
                .map(|ds| (ds.id().to_string(), ds.filter().clone()))
                .collect();
            (state.generation, targets)
        };

        if let Some(ids) = &options.dataset_ids {
            let known = self.dataset_ids();
            if let Some(missing) = ids.iter().find(|id| !known.contains(id)) {
                return Err(DatastoreError::UnknownDataset(missing.clone()));
            }
        }
        if targets.is_empty() {
            return Ok(());
        }

        let limit = self.inner.config.page_size;
        let fetches = targets.iter().map(|(dataset_id, filter)| {
            self.inner.api.fetch_messages(FetchQuery {
                dataset_id: dataset_id.clone(),
                filter: filter.clone(),
                cursor: None,
                limit,
            })
        });
        let results: Vec<Result<MessagePage, ApiError>> = join_all(fetches).await;

        let mut first_error = None;
        let events = {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                log::debug!("Discarding snapshot load for replaced datasets");
                return Ok(());
            }
            for ((dataset_id, _), result) in targets.into_iter().zip(results) {
                match result {
                    Ok(page) => {
                        if let Some(ds) = state.dataset_mut(&dataset_id) {
                            log::debug!(
                                "Loaded {} messages into '{dataset_id}'",
                                page.messages.len()
                            );
                            ds.replace_with_page(page);
                        }
                    }
                    Err(source) => {
                        log::warn!("Snapshot fetch for '{dataset_id}' failed: {source}");
                        if first_error.is_none() {
                            first_error = Some(DatastoreError::Api { dataset_id, source });
                        }
                    }
                }
            }
            state.drain_events()
        };
        self.dispatch(events);

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Fetch the next page of `dataset_id`.
    ///
    /// Returns `Ok(None)` without a network call when the dataset cannot
    /// paginate or a page fetch for it is already in flight.
    pub async fn fetch_next_page(
        &self,
        dataset_id: &str,
    ) -> Result<Option<DatasetSnapshot>, DatastoreError> {
        let (generation, query) = {
            let mut state = self.inner.state.lock();
            let generation = state.generation;
            let ds = state
                .datasets
                .iter()
                .find(|ds| ds.id() == dataset_id)
                .ok_or_else(|| DatastoreError::UnknownDataset(dataset_id.to_string()))?;
            if !ds.can_paginate() {
                return Ok(None);
            }
            let query = FetchQuery {
                dataset_id: dataset_id.to_string(),
                filter: ds.filter().clone(),
                cursor: ds.pagination_cursor().map(str::to_string),
                limit: self.inner.config.page_size,
            };
            if !state.paginating.insert(dataset_id.to_string()) {
                log::trace!("Pagination for '{dataset_id}' already in flight");
                return Ok(None);
            }
            (generation, query)
        };
        let _guard = PaginationGuard {
            inner: &self.inner,
            dataset_id,
            generation,
        };

        let result = self.inner.api.fetch_messages(query).await;

        let (snapshot, events) = {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                return Ok(None);
            }
            let page = result.map_err(|source| DatastoreError::Api {
                dataset_id: dataset_id.to_string(),
                source,
            })?;
            let snapshot = state.dataset_mut(dataset_id).map(|ds| {
                ds.append_page(page);
                ds.snapshot()
            });
            (snapshot, state.drain_events())
        };
        self.dispatch(events);
        Ok(snapshot)
    }

    pub async fn read_message(&self, message: &Message) -> MutationOutcome {
        self.mutate_message(message, MessageMutation::Read).await
    }

    pub async fn unread_message(&self, message: &Message) -> MutationOutcome {
        self.mutate_message(message, MessageMutation::Unread).await
    }

    pub async fn open_message(&self, message: &Message) -> MutationOutcome {
        self.mutate_message(message, MessageMutation::Open).await
    }

    pub async fn archive_message(&self, message: &Message) -> MutationOutcome {
        self.mutate_message(message, MessageMutation::Archive).await
    }

    pub async fn unarchive_message(&self, message: &Message) -> MutationOutcome {
        self.mutate_message(message, MessageMutation::Unarchive).await
    }

    /// Report a click. Tracking only; no local state changes.
    pub async fn click_message(&self, message: &Message) -> MutationOutcome {
        let request = MutationRequest::Click {
            message_id: message.message_id.clone(),
            tracking_id: message.click_tracking_id().map(str::to_string),
        };
        match self.inner.api.mutate(request.clone()).await {
            Ok(()) => MutationOutcome::Committed,
            Err(error) => {
                self.report_failure(&request, error);
                MutationOutcome::Failed
            }
        }
    }

    pub async fn read_all_messages(&self) -> MutationOutcome {
        self.mutate_all(MutationRequest::ReadAll, Dataset::read_all_messages)
            .await
    }

    pub async fn archive_all_messages(&self) -> MutationOutcome {
        self.mutate_all(MutationRequest::ArchiveAll, Dataset::archive_all_messages)
            .await
    }

    pub async fn archive_read_messages(&self) -> MutationOutcome {
        self.mutate_all(MutationRequest::ArchiveRead, Dataset::archive_read_messages)
            .await
    }

    /// Replay a server push into every dataset.
    pub fn apply_push(&self, event: PushEvent) {
        let now = OffsetDateTime::now_utc();
        let events = {
            let mut state = self.inner.state.lock();
            match event {
                PushEvent::NewMessage(message) => {
                    for ds in &mut state.datasets {
                        ds.add_message(&message);
                    }
                }
                PushEvent::Mutated {
                    message_id,
                    mutation,
                } => {
                    let Some(before) = state.find_message(&message_id) else {
                        log::debug!("Ignoring {mutation} for unknown message {message_id}");
                        return;
                    };
                    if mutation.is_noop(&before) {
                        return;
                    }
                    let after = mutation.apply(&before, now);
                    state.apply_change(&before, &after);
                }
                PushEvent::Clicked { message_id } => {
                    log::trace!("Message {message_id} clicked");
                    return;
                }
                PushEvent::ReadAll => {
                    for ds in &mut state.datasets {
                        ds.read_all_messages(now);
                    }
                }
                PushEvent::ArchiveAll => {
                    for ds in &mut state.datasets {
                        ds.archive_all_messages(now);
                    }
                }
                PushEvent::ArchiveRead => {
                    for ds in &mut state.datasets {
                        ds.archive_read_messages(now);
                    }
                }
            }
            state.drain_events()
        };
        self.dispatch(events);
    }

    async fn mutate_message(&self, message: &Message, mutation: MessageMutation) -> MutationOutcome {
        let message_id = message.message_id.clone();

        let (before, events) = {
            let mut state = self.inner.state.lock();
            let before = state
                .find_message(&message_id)
                .unwrap_or_else(|| message.clone());
            if mutation.is_noop(&before) {
                return MutationOutcome::Skipped;
            }
            let after = mutation.apply(&before, OffsetDateTime::now_utc());
            state.apply_change(&before, &after);
            (before, state.drain_events())
        };
        self.dispatch(events);

        let request = MutationRequest::Message {
            message_id: message_id.clone(),
            mutation,
        };
        let lock = self.message_lock(&message_id);
        let result = {
            let _serialized = lock.lock().await;
            self.inner.api.mutate(request.clone()).await
        };
        drop(lock);
        self.release_message_lock(&message_id);

        let Err(error) = result else {
            return MutationOutcome::Committed;
        };

        let outcome = if mutation.is_reversible() {
            let events = {
                let mut state = self.inner.state.lock();
                let current = state
                    .find_message(&message_id)
                    .unwrap_or_else(|| mutation.apply(&before, OffsetDateTime::now_utc()));
                let restored = mutation.restore(&current, &before);
                state.apply_change(&current, &restored);
                state.drain_events()
            };
            self.dispatch(events);
            MutationOutcome::RolledBack
        } else {
            MutationOutcome::Failed
        };
        self.report_failure(&request, error);
        outcome
    }

    async fn mutate_all(
        &self,
        request: MutationRequest,
        apply: fn(&mut Dataset, OffsetDateTime),
    ) -> MutationOutcome {
        let now = OffsetDateTime::now_utc();
        let (generation, snapshots, events) = {
            let mut state = self.inner.state.lock();
            let snapshots: Vec<DatasetSnapshot> =
                state.datasets.iter().map(Dataset::snapshot).collect();
            for ds in &mut state.datasets {
                apply(ds, now);
            }
            (state.generation, snapshots, state.drain_events())
        };
        self.dispatch(events);

        let Err(error) = self.inner.api.mutate(request.clone()).await else {
            return MutationOutcome::Committed;
        };

        let events = {
            let mut state = self.inner.state.lock();
            if state.generation == generation {
                for snapshot in &snapshots {
                    if let Some(ds) = state.dataset_mut(&snapshot.id) {
                        ds.restore(snapshot);
                    }
                }
            }
            state.drain_events()
        };
        self.dispatch(events);
        self.report_failure(&request, error);
        MutationOutcome::RolledBack
    }

    fn report_failure(&self, request: &MutationRequest, error: ApiError) {
        log::warn!(
            "Mutation '{}' failed for {:?}: {error}",
            request.name(),
            request.message_id()
        );
        self.dispatch(vec![DatastoreEvent::MutationFailed {
            action: request.name(),
            message_id: request.message_id().map(str::to_string),
            error,
        }]);
    }

    fn message_lock(&self, message_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .message_locks
            .lock()
            .entry(message_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the per-message lock once nobody else is queued on it.
    fn release_message_lock(&self, message_id: &str) {
        let mut locks = self.inner.message_locks.lock();
        if locks
            .get(message_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(message_id);
        }
    }

    fn dispatch(&self, events: Vec<DatastoreEvent>) {
        for event in &events {
            self.inner.listeners.emit(event);
        }
    }
}

/// Clears the pagination flag even if the fetch future is dropped.
struct PaginationGuard<'a> {
    inner: &'a Inner,
    dataset_id: &'a str,
    generation: u64,
}

impl Drop for PaginationGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if state.generation == self.generation {
            state.paginating.remove(self.dataset_id);
        }
    }
}
