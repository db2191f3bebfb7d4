// SPDX-License-Identifier: Apache-2.0
//! Live queries.
//!
//! A query entry binds one document + canonical variables to a re-computed
//! result. Store writes that touch a record the entry last read trigger a
//! synchronous recomputation on the writing thread, so notification order
//! is write order. Entries are shared: watching the same document with the
//! same canonical variables joins the existing entry; the entry dies (and
//! aborts its in-flight fetch) when the last subscriber drops.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bramble_cache::{ChangeSet, NormalizedStore, StoreKey, SubscriptionId};
use bramble_graphql::{vars, Document, GraphqlError};
use serde_json::Value;
use tracing::debug;

use crate::error::NetworkError;
use crate::pipeline::RequestPipeline;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Strategy governing whether a query reads cache, network, or both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Serve from cache when the cache can satisfy the selection; otherwise
    /// fetch.
    CacheFirst,
    /// Always fetch; never deliver a cache-only result.
    NetworkOnly,
    /// Deliver the current cache view immediately (provisional), then
    /// revalidate over the network.
    #[default]
    CacheAndNetwork,
}

/// Strategy governing whether partial data is delivered alongside errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Suppress GraphQL-level errors; deliver data only.
    #[default]
    Ignore,
    /// Deliver data and errors together — never an error alone when partial
    /// data exists.
    All,
}

/// Options for one watched query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Cache/network strategy.
    pub fetch: FetchPolicy,
    /// Error delivery strategy.
    pub errors: ErrorPolicy,
}

/// Lifecycle of a query entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Created, nothing in flight.
    Idle,
    /// A network fetch is in flight.
    Fetching,
    /// The last fetch succeeded.
    Settled,
    /// The last fetch failed or returned errors.
    Errored,
}

/// One delivery to a subscriber.
#[derive(Debug, Clone)]
pub struct QueryEvent {
    /// Materialized selection result, when the cache could produce one.
    pub data: Option<Value>,
    /// GraphQL errors, populated only under [`ErrorPolicy::All`].
    pub errors: Vec<GraphqlError>,
    /// Transport failure, surfaced regardless of error policy.
    pub network_error: Option<Arc<NetworkError>>,
    /// `true` while the entry still awaits a network result; the first
    /// cache-and-network delivery is always provisional.
    pub provisional: bool,
}

type WatchCallback = Box<dyn FnMut(QueryEvent) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntryId(u64);

struct QueryEntry {
    document: Document,
    variables: Value,
    canonical_variables: String,
    options: WatchOptions,
    state: WatchState,
    /// Records whose writes invalidate the last result; always contains the
    /// query root.
    deps: BTreeSet<StoreKey>,
    last_data: Option<Value>,
    /// Errors staged by a settling fetch, delivered with the data write.
    pending_errors: Vec<GraphqlError>,
    /// Invalidates stale fetch completions after a refetch.
    fetch_epoch: u64,
    active: bool,
    subscribers: Vec<(u64, WatchCallback)>,
}

impl QueryEntry {
    /// Delivers to every subscriber. Identical consecutive data with no
    /// errors is suppressed.
    fn deliver(
        &mut self,
        data: Option<Value>,
        errors: Vec<GraphqlError>,
        network_error: Option<Arc<NetworkError>>,
    ) {
        if errors.is_empty() && network_error.is_none() && data == self.last_data {
            return;
        }
        if data.is_some() {
            self.last_data.clone_from(&data);
        }
        let event = QueryEvent {
            data,
            errors,
            network_error,
            provisional: !matches!(self.state, WatchState::Settled | WatchState::Errored),
        };
        for (_, callback) in &mut self.subscribers {
            callback(event.clone());
        }
    }
}

/// Owns every live query entry and dispatches store changes to them.
pub struct WatcherRegistry {
    store: Arc<NormalizedStore>,
    pipeline: Arc<RequestPipeline>,
    entries: Mutex<Vec<(EntryId, Arc<Mutex<QueryEntry>>)>>,
    next_entry: AtomicU64,
    next_subscriber: AtomicU64,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl WatcherRegistry {
    /// Creates a registry subscribed to `store` changes.
    #[must_use]
    pub fn new(store: Arc<NormalizedStore>, pipeline: Arc<RequestPipeline>) -> Arc<Self> {
        let registry = Arc::new(Self {
            store: Arc::clone(&store),
            pipeline,
            entries: Mutex::new(Vec::new()),
            next_entry: AtomicU64::new(1),
            next_subscriber: AtomicU64::new(1),
            subscription: Mutex::new(None),
        });
        let weak = Arc::downgrade(&registry);
        let id = store.subscribe(move |change| {
            if let Some(registry) = weak.upgrade() {
                registry.on_store_change(change);
            }
        });
        *lock(&registry.subscription) = Some(id);
        registry
    }

    /// Registers a subscriber for `document` + `variables`.
    ///
    /// Joins an existing entry when one matches by operation name and
    /// canonical variables (the first watcher's options stay in force);
    /// otherwise creates the entry and runs its fetch policy. Must be called
    /// within a tokio runtime.
    pub fn watch(
        self: &Arc<Self>,
        document: Document,
        variables: Value,
        options: WatchOptions,
        callback: impl FnMut(QueryEvent) + Send + 'static,
    ) -> WatchHandle {
        let canonical = vars::canonical(&variables);
        let subscriber = self.next_subscriber.fetch_add(1, Ordering::SeqCst);

        if let Some((id, entry_arc)) = self.find_entry(document.name, &canonical) {
            let mut entry = lock(&entry_arc);
            entry.subscribers.push((subscriber, Box::new(callback)));
            // Replay the current result so the new subscriber starts
            // consistent with everyone else.
            if let Some(last) = entry.last_data.clone() {
                let event = QueryEvent {
                    data: Some(last),
                    errors: Vec::new(),
                    network_error: None,
                    provisional: !matches!(entry.state, WatchState::Settled | WatchState::Errored),
                };
                if let Some((_, callback)) = entry.subscribers.last_mut() {
                    callback(event);
                }
            }
            drop(entry);
            return WatchHandle {
                registry: Arc::clone(self),
                entry: entry_arc,
                id,
                subscriber,
            };
        }

        let id = EntryId(self.next_entry.fetch_add(1, Ordering::SeqCst));
        let entry_arc = Arc::new(Mutex::new(QueryEntry {
            document,
            variables,
            canonical_variables: canonical,
            options,
            state: WatchState::Idle,
            deps: BTreeSet::from([StoreKey::Root]),
            last_data: None,
            pending_errors: Vec::new(),
            fetch_epoch: 0,
            active: true,
            subscribers: vec![(subscriber, Box::new(callback))],
        }));
        lock(&self.entries).push((id, Arc::clone(&entry_arc)));

        match options.fetch {
            FetchPolicy::NetworkOnly => self.start_fetch(&entry_arc),
            FetchPolicy::CacheFirst => {
                if self.deliver_from_cache(&entry_arc, WatchState::Settled) {
                    debug!(entry = id.0, "cache satisfied the query");
                } else {
                    self.start_fetch(&entry_arc);
                }
            }
            FetchPolicy::CacheAndNetwork => {
                self.deliver_from_cache(&entry_arc, WatchState::Idle);
                self.start_fetch(&entry_arc);
            }
        }

        WatchHandle {
            registry: Arc::clone(self),
            entry: entry_arc,
            id,
            subscriber,
        }
    }

    /// Refetches every active entry matching `document` + `variables`.
    /// Entries nobody watches are ignored. Returns the number of fetches
    /// started.
    pub fn refetch_matching(self: &Arc<Self>, document: &Document, variables: &Value) -> usize {
        let canonical = vars::canonical(variables);
        let snapshot: Vec<_> = lock(&self.entries).iter().map(|(_, e)| Arc::clone(e)).collect();
        let mut started = 0;
        for entry_arc in snapshot {
            let matches = {
                let entry = lock(&entry_arc);
                entry.active
                    && entry.document.name == document.name
                    && entry.canonical_variables == canonical
            };
            if matches {
                self.start_fetch(&entry_arc);
                started += 1;
            }
        }
        started
    }

    fn find_entry(&self, name: &str, canonical: &str) -> Option<(EntryId, Arc<Mutex<QueryEntry>>)> {
        lock(&self.entries)
            .iter()
            .find(|(_, entry_arc)| {
                let entry = lock(entry_arc);
                entry.active
                    && entry.document.name == name
                    && entry.canonical_variables == canonical
            })
            .map(|(id, entry_arc)| (*id, Arc::clone(entry_arc)))
    }

    /// Attempts a cache read and delivers it. On success the entry state
    /// becomes `settled_state`; a missing field leaves the entry untouched.
    fn deliver_from_cache(&self, entry_arc: &Arc<Mutex<QueryEntry>>, settled_state: WatchState) -> bool {
        let mut entry = lock(entry_arc);
        match self
            .store
            .read_traced(&entry.document.selection, &entry.variables)
        {
            Ok(out) => {
                entry.deps = out.dependencies;
                entry.deps.insert(StoreKey::Root);
                entry.state = settled_state;
                entry.deliver(Some(out.data), Vec::new(), None);
                true
            }
            Err(error) => {
                debug!(operation = entry.document.name, %error, "cache miss");
                false
            }
        }
    }

    /// Starts (or restarts) the entry's network fetch.
    fn start_fetch(self: &Arc<Self>, entry_arc: &Arc<Mutex<QueryEntry>>) {
        let (document, variables, epoch) = {
            let mut entry = lock(entry_arc);
            if !entry.active {
                return;
            }
            entry.state = WatchState::Fetching;
            entry.fetch_epoch += 1;
            (entry.document.clone(), entry.variables.clone(), entry.fetch_epoch)
        };
        let registry = Arc::clone(self);
        let entry = Arc::clone(entry_arc);
        tokio::spawn(async move {
            let outcome = registry.pipeline.execute(&document, variables.clone()).await;
            registry.settle_fetch(&entry, epoch, &variables, outcome);
        });
    }

    /// Applies a finished fetch. Stale epochs and unwatched entries are
    /// dropped before any store effect, so an aborted watcher leaves no
    /// orphaned writes.
    fn settle_fetch(
        &self,
        entry_arc: &Arc<Mutex<QueryEntry>>,
        epoch: u64,
        variables: &Value,
        outcome: Result<bramble_graphql::GraphqlResponse, NetworkError>,
    ) {
        match outcome {
            Err(error) => {
                let mut entry = lock(entry_arc);
                if !entry.active || entry.fetch_epoch != epoch {
                    return;
                }
                entry.state = WatchState::Errored;
                let last = entry.last_data.clone();
                entry.deliver(last, Vec::new(), Some(Arc::new(error)));
            }
            Ok(response) => {
                let errors = response.errors;
                let data = response.data.filter(|d| !d.is_null());
                let selection = {
                    let mut entry = lock(entry_arc);
                    if !entry.active || entry.fetch_epoch != epoch {
                        return;
                    }
                    entry.state = if errors.is_empty() {
                        WatchState::Settled
                    } else {
                        WatchState::Errored
                    };
                    if !errors.is_empty() && entry.options.errors == ErrorPolicy::All {
                        entry.pending_errors = errors;
                    }
                    entry.document.selection.clone()
                };
                if let Some(data) = data {
                    // The write renotifies this entry (and every other
                    // affected watcher) through the store's change path.
                    let patches = self.store.normalize(&selection, variables, &data);
                    self.store.apply(patches);
                }
                self.flush_pending(entry_arc);
            }
        }
    }

    /// Delivers errors that did not ride a data write (errors-only
    /// responses, or writes that left this entry's result unchanged).
    fn flush_pending(&self, entry_arc: &Arc<Mutex<QueryEntry>>) {
        let mut entry = lock(entry_arc);
        if entry.pending_errors.is_empty() {
            return;
        }
        let errors = std::mem::take(&mut entry.pending_errors);
        // Never only an error when partial data exists.
        let data = entry.last_data.clone();
        entry.deliver(data, errors, None);
    }

    /// Recomputes every entry whose dependencies intersect the change.
    fn on_store_change(self: &Arc<Self>, change: &ChangeSet) {
        let snapshot: Vec<_> = lock(&self.entries).iter().map(|(_, e)| Arc::clone(e)).collect();
        let mut needs_fetch = Vec::new();
        for entry_arc in snapshot {
            let mut entry = lock(&entry_arc);
            if !entry.active {
                continue;
            }
            if entry.deps.is_disjoint(&change.touched) {
                continue;
            }
            match self
                .store
                .read_traced(&entry.document.selection, &entry.variables)
            {
                Ok(out) => {
                    entry.deps = out.dependencies;
                    entry.deps.insert(StoreKey::Root);
                    let errors = std::mem::take(&mut entry.pending_errors);
                    entry.deliver(Some(out.data), errors, None);
                }
                Err(error) => {
                    // The cache can no longer satisfy this query (e.g. an
                    // eviction); revalidate from the network. The error
                    // itself never reaches subscribers.
                    debug!(operation = entry.document.name, %error, "recompute miss");
                    drop(entry);
                    needs_fetch.push(entry_arc);
                }
            }
        }
        for entry_arc in needs_fetch {
            self.start_fetch(&entry_arc);
        }
    }

    fn release(&self, id: EntryId, entry_arc: &Arc<Mutex<QueryEntry>>, subscriber: u64) {
        let mut entry = lock(entry_arc);
        entry.subscribers.retain(|(sub, _)| *sub != subscriber);
        if entry.subscribers.is_empty() {
            // Last subscriber gone: kill the entry and abort any in-flight
            // fetch (its completion will observe `active == false`).
            entry.active = false;
            drop(entry);
            lock(&self.entries).retain(|(entry_id, _)| *entry_id != id);
        }
    }
}

impl Drop for WatcherRegistry {
    fn drop(&mut self) {
        if let Some(id) = lock(&self.subscription).take() {
            self.store.unsubscribe(id);
        }
    }
}

impl std::fmt::Debug for WatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherRegistry")
            .field("entries", &lock(&self.entries).len())
            .finish()
    }
}

/// Live handle for one subscriber of a watched query.
///
/// Dropping the handle unregisters the subscriber; dropping the last
/// subscriber destroys the entry and aborts its in-flight fetch. Handles
/// must not be dropped from inside their own callback.
pub struct WatchHandle {
    registry: Arc<WatcherRegistry>,
    entry: Arc<Mutex<QueryEntry>>,
    id: EntryId,
    subscriber: u64,
}

impl WatchHandle {
    /// Current entry state.
    #[must_use]
    pub fn state(&self) -> WatchState {
        lock(&self.entry).state
    }

    /// Forces a revalidation fetch for this entry.
    pub fn refetch(&self) {
        self.registry.start_fetch(&self.entry);
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("entry", &self.id.0)
            .field("subscriber", &self.subscriber)
            .finish()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.registry.release(self.id, &self.entry, self.subscriber);
    }
}
