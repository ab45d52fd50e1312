//! Config router: serialized mutations, copy-on-write snapshots.
//!
//! The router owns the authoritative [`Store`] for a process. Every
//! mutation flows through one mutator task fed by a bounded queue, so the
//! store is only ever touched single-threaded. The mutator copies the
//! current snapshot, applies one or more queued operations to the copy, and
//! atomically publishes it; readers load the snapshot pointer and never
//! synchronize with writers.
//!
//! Two kinds of consumers observe mutations:
//!
//! - a [`Handler`] receives fire-and-forget notifications on the mutator
//!   task. Delivery is best effort by design; a handler that needs
//!   convergence must also be fed through push/pull.
//! - a [`DerivedState`] is a stateful object kept up to date copy-on-write.
//!   Each snapshot carries a private copy produced by
//!   [`DerivedState::copy`]; `apply_new` / `apply_dead` mutate that copy on
//!   the mutator task before the snapshot is published, so readers always
//!   see a fully consistent version through [`RouterState::derived_as`].
//!
//! Both can restrict the config types they care about via `config_types`;
//! an empty list means all types.

use arc_swap::ArcSwap;
use beacon_engine::{Config, ConfigType, Store, Tombstone};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::reporter::{LogReporter, Reporter};

/// Number of queued mutations the router buffers before producers block.
pub const DEFAULT_QUEUE_SIZE: usize = 256;

/// How many extra queued operations a single snapshot copy absorbs.
///
/// Batching amortizes the copy under bursty load without changing
/// semantics; it also bounds how long a close request can be deferred.
const BATCH_LIMIT: usize = 16;

/// Error type returned by derived-state callbacks.
pub type StateError = Box<dyn std::error::Error + Send + Sync>;

/// A consumer of config notifications.
///
/// Handlers run on the mutator task, so a slow handler applies back
/// pressure to producers; that is intentional. Notifications are best
/// effort and may be lost on the fast path.
pub trait Handler: Send + Sync {
    /// The config types to route to this handler. Empty means all types.
    fn config_types(&self) -> Vec<ConfigType> {
        Vec::new()
    }

    /// A config was accepted into the store.
    fn new_config(&self, config: &Arc<Config>);

    /// A tombstone was accepted into the store.
    fn dead_config(&self, tombstone: &Arc<Tombstone>);
}

/// A stateful consumer maintained copy-on-write through router snapshots.
pub trait DerivedState: Send + Sync {
    /// The config types to route to this state. Empty means all types.
    fn config_types(&self) -> Vec<ConfigType> {
        Vec::new()
    }

    /// Return an independent copy, safe to mutate without affecting the
    /// original. Called once per snapshot copy.
    fn copy(&self) -> Box<dyn DerivedState>;

    /// Fold a newly accepted config into this (private) copy.
    fn apply_new(&mut self, config: &Arc<Config>) -> Result<(), StateError>;

    /// Remove a replaced or killed config from this (private) copy.
    ///
    /// Receives the config that was displaced, not the tombstone, so the
    /// state can index the removal on payload fields.
    fn apply_dead(&mut self, config: &Arc<Config>) -> Result<(), StateError>;

    /// Downcast support for readers; return `self`.
    fn as_any(&self) -> &dyn std::any::Any;
}

#[derive(Default)]
struct HandlerTable {
    untyped: Vec<Arc<dyn Handler>>,
    typed: HashMap<ConfigType, Vec<Arc<dyn Handler>>>,
}

impl HandlerTable {
    fn new(handlers: &[Arc<dyn Handler>]) -> Self {
        let mut table = HandlerTable::default();
        for handler in handlers {
            let kinds = handler.config_types();
            if kinds.is_empty() {
                table.untyped.push(Arc::clone(handler));
            } else {
                for kind in kinds {
                    table.typed.entry(kind).or_default().push(Arc::clone(handler));
                }
            }
        }
        table
    }
}

/// An immutable snapshot of the router: the store, the registered derived
/// states, and the routing tables.
///
/// Snapshots are published atomically and never mutated afterwards; a
/// reader may hold one for arbitrary time without affecting writers.
pub struct RouterState {
    store: Store,
    states: HashMap<String, Box<dyn DerivedState>>,
    untyped_states: Vec<String>,
    typed_states: HashMap<ConfigType, Vec<String>>,
    // Handler routing is fixed at construction and shared across snapshots.
    handlers: Arc<HandlerTable>,
}

impl RouterState {
    fn new(store: Store, handlers: &[Arc<dyn Handler>]) -> Self {
        Self {
            store,
            states: HashMap::new(),
            untyped_states: Vec::new(),
            typed_states: HashMap::new(),
            handlers: Arc::new(HandlerTable::new(handlers)),
        }
    }

    /// The store at the time of the snapshot.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The derived state registered under `key`, if any.
    pub fn derived(&self, key: &str) -> Option<&dyn DerivedState> {
        self.states.get(key).map(Box::as_ref)
    }

    /// The derived state registered under `key`, downcast to its concrete
    /// type.
    pub fn derived_as<T: 'static>(&self, key: &str) -> Option<&T> {
        self.states.get(key)?.as_any().downcast_ref::<T>()
    }

    /// The keys of all registered derived states.
    pub fn derived_keys(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    // Copy for the next mutation: shallow store copy (records shared),
    // fresh derived-state copies, rebuilt routing tables, shared handlers.
    fn copy(&self) -> RouterState {
        let mut next = RouterState {
            store: self.store.clone(),
            states: HashMap::with_capacity(self.states.len()),
            untyped_states: Vec::new(),
            typed_states: HashMap::new(),
            handlers: Arc::clone(&self.handlers),
        };

        for (key, state) in &self.states {
            // The copy already reflects history, so no replay.
            next.register_state(key.clone(), state.copy(), false);
        }

        next
    }

    // Keys of the states routed for `kind`, untyped first.
    fn routed_states(&self, kind: &str) -> Vec<String> {
        let mut keys = self.untyped_states.clone();
        if let Some(typed) = self.typed_states.get(kind) {
            keys.extend(typed.iter().cloned());
        }
        keys
    }

    fn register_state(
        &mut self,
        key: String,
        mut state: Box<dyn DerivedState>,
        notify: bool,
    ) -> Vec<StateError> {
        if self.states.contains_key(&key) {
            panic!("state '{key}' is already registered");
        }

        let mut errors = Vec::new();
        let kinds = state.config_types();

        if kinds.is_empty() {
            if notify {
                for config in self.store.configs() {
                    if let Err(err) = state.apply_new(config) {
                        errors.push(err);
                    }
                }
            }
            self.untyped_states.push(key.clone());
        } else {
            for kind in kinds {
                if notify {
                    if let Some(typed) = self.store.typed(&kind) {
                        for config in typed.configs() {
                            if let Err(err) = state.apply_new(config) {
                                errors.push(err);
                            }
                        }
                    }
                }
                self.typed_states.entry(kind).or_default().push(key.clone());
            }
        }

        self.states.insert(key, state);
        errors
    }

    fn unregister_state(&mut self, key: &str) {
        let state = self
            .states
            .remove(key)
            .unwrap_or_else(|| panic!("state '{key}' was not registered"));

        let kinds = state.config_types();
        if kinds.is_empty() {
            self.untyped_states.retain(|k| k != key);
        } else {
            for kind in kinds {
                if let Some(list) = self.typed_states.get_mut(&kind) {
                    list.retain(|k| k != key);
                    if list.is_empty() {
                        self.typed_states.remove(&kind);
                    }
                }
            }
        }
    }

    fn apply_config(&mut self, config: &Arc<Config>) -> Vec<StateError> {
        let inserted = self.store.insert_config(Arc::clone(config));
        if !inserted.is_new {
            return Vec::new();
        }

        for handler in &self.handlers.untyped {
            handler.new_config(config);
        }
        if let Some(typed) = self.handlers.typed.get(&config.kind) {
            for handler in typed {
                handler.new_config(config);
            }
        }

        let mut errors = Vec::new();
        for key in self.routed_states(&config.kind) {
            let state = self.states.get_mut(&key).expect("routing table out of sync");
            if let Some(replaced) = &inserted.replaced {
                if let Err(err) = state.apply_dead(replaced) {
                    errors.push(err);
                }
            }
            if let Err(err) = state.apply_new(config) {
                errors.push(err);
            }
        }
        errors
    }

    fn apply_dead(&mut self, tombstone: &Arc<Tombstone>) -> Vec<StateError> {
        let inserted = self.store.insert_tombstone(Arc::clone(tombstone));
        if !inserted.is_new {
            return Vec::new();
        }

        for handler in &self.handlers.untyped {
            handler.dead_config(tombstone);
        }
        if let Some(typed) = self.handlers.typed.get(&tombstone.kind) {
            for handler in typed {
                handler.dead_config(tombstone);
            }
        }

        // If the tombstone killed nothing live the states never saw the
        // record, so there is nothing to notify.
        let Some(replaced) = inserted.replaced else {
            return Vec::new();
        };

        let mut errors = Vec::new();
        for key in self.routed_states(&tombstone.kind) {
            let state = self.states.get_mut(&key).expect("routing table out of sync");
            if let Err(err) = state.apply_dead(&replaced) {
                errors.push(err);
            }
        }
        errors
    }
}

enum Command {
    NewConfig(Arc<Config>),
    DeadConfig(Arc<Tombstone>),
    PushConfigs(Store),
    RegisterState {
        key: String,
        state: Box<dyn DerivedState>,
    },
    UnregisterState(String),
    Close(oneshot::Sender<()>),
}

/// Serialized mutator over a config store with lock-free readers.
///
/// Cheap to clone; all clones share the same snapshot and mutator task.
/// Constructed through [`Router::builder`], which spawns the mutator and
/// therefore must run inside a tokio runtime.
#[derive(Clone)]
pub struct Router {
    snapshot: Arc<ArcSwap<RouterState>>,
    tx: mpsc::Sender<Command>,
}

impl Router {
    /// Start building a router.
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Enqueue a config. Suspends only when the queue is full.
    pub async fn new_config(&self, config: Config) {
        self.send(Command::NewConfig(Arc::new(config))).await;
    }

    /// Enqueue a tombstone. Suspends only when the queue is full.
    pub async fn dead_config(&self, tombstone: Tombstone) {
        self.send(Command::DeadConfig(Arc::new(tombstone))).await;
    }

    /// Enqueue a bulk merge of `store`.
    pub async fn push_configs(&self, store: Store) {
        self.send(Command::PushConfigs(store)).await;
    }

    /// Register a derived state under a unique key.
    ///
    /// The state is replayed through the current store once, so late
    /// joiners catch up. A duplicate key is a programmer error and panics
    /// the mutator.
    pub async fn register_state(&self, key: impl Into<String>, state: Box<dyn DerivedState>) {
        let key = key.into();
        assert!(!key.is_empty(), "derived-state key must not be empty");
        self.send(Command::RegisterState { key, state }).await;
    }

    /// Remove the derived state registered under `key`.
    ///
    /// An unknown key is a programmer error and panics the mutator.
    pub async fn unregister_state(&self, key: impl Into<String>) {
        self.send(Command::UnregisterState(key.into())).await;
    }

    /// The current store. Lock-free; never suspends.
    ///
    /// The maps are cloned but the records are shared, so this is cheap
    /// regardless of payload size.
    pub fn pull_configs(&self) -> Store {
        self.snapshot.load().store.clone()
    }

    /// The current snapshot. Lock-free; never suspends.
    pub fn state(&self) -> Arc<RouterState> {
        self.snapshot.load_full()
    }

    /// Drain the queue and stop the mutator.
    ///
    /// Mutating a closed router is a programmer error and panics.
    pub async fn close(&self) {
        let (ack, done) = oneshot::channel();
        self.send(Command::Close(ack)).await;
        let _ = done.await;
    }

    async fn send(&self, command: Command) {
        if self.tx.send(command).await.is_err() {
            panic!("router is closed");
        }
    }
}

/// Builder for [`Router`].
pub struct RouterBuilder {
    store: Store,
    states: Vec<(String, Box<dyn DerivedState>)>,
    handlers: Vec<Arc<dyn Handler>>,
    queue_size: usize,
    reporter: Arc<dyn Reporter>,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterBuilder {
    /// Create a builder with an empty store and default queue size.
    pub fn new() -> Self {
        Self {
            store: Store::new(),
            states: Vec::new(),
            handlers: Vec::new(),
            queue_size: DEFAULT_QUEUE_SIZE,
            reporter: Arc::new(LogReporter),
        }
    }

    /// Seed the first snapshot with an initial store.
    ///
    /// Derived states given to the builder absorb these configs, but no
    /// handlers are invoked for them.
    pub fn store(mut self, store: Store) -> Self {
        self.store = store;
        self
    }

    /// Register a derived state in the first snapshot.
    pub fn state(mut self, key: impl Into<String>, state: Box<dyn DerivedState>) -> Self {
        self.states.push((key.into(), state));
        self
    }

    /// Attach a notification handler. Handlers are fixed for the lifetime
    /// of the router.
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Queue capacity per router; producers block when it fills up.
    pub fn queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size.max(1);
        self
    }

    /// Where derived-state errors are forwarded. Defaults to [`LogReporter`].
    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Build the first snapshot and spawn the mutator task.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(self) -> Router {
        let mut initial = RouterState::new(self.store, &self.handlers);
        for (key, state) in self.states {
            for err in initial.register_state(key, state, true) {
                self.reporter.error("router", err.as_ref(), None);
            }
        }

        let snapshot = Arc::new(ArcSwap::from_pointee(initial));
        let (tx, rx) = mpsc::channel(self.queue_size);

        tokio::spawn(run_mutator(rx, Arc::clone(&snapshot), self.reporter));

        Router { snapshot, tx }
    }
}

async fn run_mutator(
    mut rx: mpsc::Receiver<Command>,
    snapshot: Arc<ArcSwap<RouterState>>,
    reporter: Arc<dyn Reporter>,
) {
    while let Some(command) = rx.recv().await {
        if let Command::Close(ack) = command {
            let _ = ack.send(());
            return;
        }

        let mut next = snapshot.load().copy();
        apply(&mut next, command, reporter.as_ref());

        // Opportunistic batching: fold whatever is already queued into the
        // same copy, up to the fairness bound.
        let mut close_ack = None;
        for _ in 0..BATCH_LIMIT {
            match rx.try_recv() {
                Ok(Command::Close(ack)) => {
                    close_ack = Some(ack);
                    break;
                }
                Ok(command) => apply(&mut next, command, reporter.as_ref()),
                Err(_) => break,
            }
        }

        snapshot.store(Arc::new(next));

        if let Some(ack) = close_ack {
            let _ = ack.send(());
            return;
        }
    }
}

fn apply(state: &mut RouterState, command: Command, reporter: &dyn Reporter) {
    match command {
        Command::NewConfig(config) => {
            report_all(reporter, state.apply_config(&config), &*config);
        }
        Command::DeadConfig(tombstone) => {
            report_all(reporter, state.apply_dead(&tombstone), &*tombstone);
        }
        Command::PushConfigs(other) => {
            for (_, typed) in other.iter() {
                for config in typed.configs() {
                    report_all(reporter, state.apply_config(config), &**config);
                }
                for tombstone in typed.tombstones() {
                    report_all(reporter, state.apply_dead(tombstone), &**tombstone);
                }
            }
        }
        Command::RegisterState { key, state: derived } => {
            let errors = state.register_state(key, derived, true);
            for err in errors {
                reporter.error("router", err.as_ref(), None);
            }
        }
        Command::UnregisterState(key) => state.unregister_state(&key),
        Command::Close(_) => unreachable!("close is handled by the mutator loop"),
    }
}

// Derived-state errors never abort a mutation and never reach callers;
// they are forwarded to the reporter with the record that triggered them.
fn report_all<T: Serialize>(reporter: &dyn Reporter, errors: Vec<StateError>, record: &T) {
    if errors.is_empty() {
        return;
    }

    let context = serde_json::to_value(record).ok();
    for err in errors {
        reporter.error("router", err.as_ref(), context.as_ref());
    }
}
