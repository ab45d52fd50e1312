//! Store containers and the merge rules that make them converge.
//!
//! A [`TypedStore`] keeps the records of one type in two maps, live configs
//! and tombstones; a given id appears in at most one of them. A [`Store`]
//! routes by type name. Records are held behind `Arc` so copying a store
//! shares them instead of cloning payloads.

use crate::{Config, ConfigId, ConfigResult, ConfigType, Tombstone, Version};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Summary of a store: type name to id to live version.
///
/// Ordered maps keep the serialized form deterministic.
pub type ConfigList = BTreeMap<ConfigType, BTreeMap<ConfigId, Version>>;

/// Outcome of inserting a single record.
#[derive(Debug, Clone, Default)]
pub struct Inserted {
    /// The live config that the accepted record replaced, if any
    pub replaced: Option<Arc<Config>>,
    /// Whether the record was accepted under the merge rules
    pub is_new: bool,
}

/// The configs and tombstones of a single type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedStore {
    live: HashMap<ConfigId, Arc<Config>>,
    dead: HashMap<ConfigId, Arc<Tombstone>>,
}

impl TypedStore {
    /// Create an empty typed store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a record by id.
    pub fn get(&self, id: &str) -> Option<ConfigResult> {
        if let Some(config) = self.live.get(id) {
            return Some(ConfigResult {
                live: Some(Config::clone(config)),
                dead: None,
            });
        }

        self.dead.get(id).map(|tombstone| ConfigResult {
            live: None,
            dead: Some(Tombstone::clone(tombstone)),
        })
    }

    /// Number of configs and tombstones.
    pub fn len(&self) -> usize {
        self.live.len() + self.dead.len()
    }

    /// Whether the store holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty() && self.dead.is_empty()
    }

    /// Iterate over the live configs.
    pub fn configs(&self) -> impl Iterator<Item = &Arc<Config>> {
        self.live.values()
    }

    /// Iterate over the tombstones.
    pub fn tombstones(&self) -> impl Iterator<Item = &Arc<Tombstone>> {
        self.dead.values()
    }

    // A config is new if its version is strictly greater than whatever
    // entry currently holds the id.
    fn accepts_config(&self, id: &str, version: Version) -> bool {
        if let Some(config) = self.live.get(id) {
            return version > config.version;
        }
        if let Some(tombstone) = self.dead.get(id) {
            return version > tombstone.version;
        }
        true
    }

    // A tombstone is new if its version is greater than or equal to a live
    // config, or strictly greater than an existing tombstone. The equal
    // case is what lets deletion win ties.
    fn accepts_tombstone(&self, id: &str, version: Version) -> bool {
        if let Some(config) = self.live.get(id) {
            return version >= config.version;
        }
        if let Some(tombstone) = self.dead.get(id) {
            return version > tombstone.version;
        }
        true
    }

    /// Insert a config under the merge rules.
    ///
    /// On accept, any tombstone for the same id is dropped and the replaced
    /// live config (if any) is returned.
    pub fn insert_config(&mut self, config: Arc<Config>) -> Inserted {
        if !self.accepts_config(&config.id, config.version) {
            return Inserted::default();
        }

        self.dead.remove(&config.id);
        let replaced = self.live.insert(config.id.clone(), config);

        Inserted {
            replaced,
            is_new: true,
        }
    }

    /// Insert a tombstone under the merge rules.
    ///
    /// On accept, any live config for the same id is removed and returned
    /// as `replaced`.
    pub fn insert_tombstone(&mut self, tombstone: Arc<Tombstone>) -> Inserted {
        if !self.accepts_tombstone(&tombstone.id, tombstone.version) {
            return Inserted::default();
        }

        let replaced = self.live.remove(&tombstone.id);
        self.dead.insert(tombstone.id.clone(), tombstone);

        Inserted {
            replaced,
            is_new: true,
        }
    }

    /// Merge another typed store into this one.
    ///
    /// Applies [`insert_config`](Self::insert_config) to each of the
    /// other's configs and [`insert_tombstone`](Self::insert_tombstone) to
    /// each of its tombstones, and returns only the records that were newly
    /// accepted. The operation is commutative: merging A into B and B into
    /// A leave both with identical contents.
    pub fn merge(&mut self, other: &TypedStore) -> (Vec<Arc<Config>>, Vec<Arc<Tombstone>>) {
        let mut new_configs = Vec::new();
        let mut dead_configs = Vec::new();

        for config in other.live.values() {
            if self.insert_config(Arc::clone(config)).is_new {
                new_configs.push(Arc::clone(config));
            }
        }

        for tombstone in other.dead.values() {
            if self.insert_tombstone(Arc::clone(tombstone)).is_new {
                dead_configs.push(Arc::clone(tombstone));
            }
        }

        (new_configs, dead_configs)
    }

    /// Preview what [`merge`](Self::merge) would accept, without mutating.
    pub fn diff(&self, other: &TypedStore) -> (Vec<Arc<Config>>, Vec<Arc<Tombstone>>) {
        let mut new_configs = Vec::new();
        let mut dead_configs = Vec::new();

        for config in other.live.values() {
            if self.accepts_config(&config.id, config.version) {
                new_configs.push(Arc::clone(config));
            }
        }

        for tombstone in other.dead.values() {
            if self.accepts_tombstone(&tombstone.id, tombstone.version) {
                dead_configs.push(Arc::clone(tombstone));
            }
        }

        (new_configs, dead_configs)
    }
}

// The wire form replaces the id-keyed maps with arrays so ids are not
// duplicated in the serialized object: `{"live": [...], "dead": [...]}`.

#[derive(Serialize)]
struct TypedStoreWireRef<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    live: Vec<&'a Config>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    dead: Vec<&'a Tombstone>,
}

#[derive(Deserialize)]
struct TypedStoreWire {
    #[serde(default)]
    live: Vec<Config>,
    #[serde(default)]
    dead: Vec<Tombstone>,
}

impl Serialize for TypedStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TypedStoreWireRef {
            live: self.live.values().map(Arc::as_ref).collect(),
            dead: self.dead.values().map(Arc::as_ref).collect(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TypedStore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = TypedStoreWire::deserialize(deserializer)?;
        let mut store = TypedStore::default();

        for config in wire.live {
            let id = config.id.clone();
            if store.live.insert(id.clone(), Arc::new(config)).is_some() {
                return Err(D::Error::custom(format!("duplicate config id '{id}'")));
            }
        }

        for tombstone in wire.dead {
            let id = tombstone.id.clone();
            if store.live.contains_key(&id) {
                return Err(D::Error::custom(format!(
                    "config id '{id}' is both live and dead"
                )));
            }
            if store.dead.insert(id.clone(), Arc::new(tombstone)).is_some() {
                return Err(D::Error::custom(format!("duplicate tombstone id '{id}'")));
            }
        }

        Ok(store)
    }
}

/// A set of configs and tombstones indexed by type.
///
/// Serializes as a map of type name to [`TypedStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Store {
    types: HashMap<ConfigType, TypedStore>,
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn typed_mut(&mut self, kind: &str) -> &mut TypedStore {
        self.types.entry(kind.to_owned()).or_default()
    }

    /// The typed store for a type, if any records of it were observed.
    pub fn typed(&self, kind: &str) -> Option<&TypedStore> {
        self.types.get(kind)
    }

    /// Iterate over the typed stores.
    pub fn iter(&self) -> impl Iterator<Item = (&ConfigType, &TypedStore)> {
        self.types.iter()
    }

    /// Look up a record by type and id.
    pub fn get(&self, kind: &str, id: &str) -> Option<ConfigResult> {
        self.types.get(kind)?.get(id)
    }

    /// Number of configs and tombstones across all types.
    pub fn len(&self) -> usize {
        self.types.values().map(TypedStore::len).sum()
    }

    /// Whether the store holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.types.values().all(TypedStore::is_empty)
    }

    /// Iterate over all live configs.
    pub fn configs(&self) -> impl Iterator<Item = &Arc<Config>> {
        self.types.values().flat_map(TypedStore::configs)
    }

    /// Iterate over all tombstones.
    pub fn tombstones(&self) -> impl Iterator<Item = &Arc<Tombstone>> {
        self.types.values().flat_map(TypedStore::tombstones)
    }

    /// Insert a config, dispatching on its type.
    pub fn insert_config(&mut self, config: Arc<Config>) -> Inserted {
        let kind = config.kind.clone();
        self.typed_mut(&kind).insert_config(config)
    }

    /// Insert a tombstone, dispatching on its type.
    pub fn insert_tombstone(&mut self, tombstone: Arc<Tombstone>) -> Inserted {
        let kind = tombstone.kind.clone();
        self.typed_mut(&kind).insert_tombstone(tombstone)
    }

    /// Merge another store into this one, type by type.
    ///
    /// Returns only the newly accepted records. Commutative, like
    /// [`TypedStore::merge`].
    pub fn merge(&mut self, other: &Store) -> (Vec<Arc<Config>>, Vec<Arc<Tombstone>>) {
        let mut new_configs = Vec::new();
        let mut dead_configs = Vec::new();

        for (kind, typed) in &other.types {
            let (live, dead) = self.typed_mut(kind).merge(typed);
            new_configs.extend(live);
            dead_configs.extend(dead);
        }

        (new_configs, dead_configs)
    }

    /// Preview what [`merge`](Self::merge) would accept, without mutating.
    pub fn diff(&self, other: &Store) -> (Vec<Arc<Config>>, Vec<Arc<Tombstone>>) {
        let empty = TypedStore::default();
        let mut new_configs = Vec::new();
        let mut dead_configs = Vec::new();

        for (kind, typed) in &other.types {
            let current = self.types.get(kind).unwrap_or(&empty);
            let (live, dead) = current.diff(typed);
            new_configs.extend(live);
            dead_configs.extend(dead);
        }

        (new_configs, dead_configs)
    }

    /// Summarize the live configs as type name to id to version.
    pub fn list(&self) -> ConfigList {
        let mut list = ConfigList::new();

        for (kind, typed) in &self.types {
            let ids: BTreeMap<ConfigId, Version> = typed
                .configs()
                .map(|config| (config.id.clone(), config.version))
                .collect();

            if !ids.is_empty() {
                list.insert(kind.clone(), ids);
            }
        }

        list
    }
}
