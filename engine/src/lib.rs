//! # Beacon Engine
//!
//! The deterministic core of a distributed configuration fabric.
//!
//! This crate holds the data model shared by every beacon process: typed,
//! versioned configuration records, their deletion tombstones, and the
//! containers that merge them. The merge is commutative, associative and
//! idempotent, so any two peers that exchange their stores in any order and
//! any number of times converge on the same contents. That property is what
//! lets the rest of the system propagate changes lazily instead of running
//! consensus per write.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of files, network, or runtime
//! - **Deterministic**: the same merges always produce the same store
//! - **Immutable records**: configs and tombstones never change after
//!   construction and are shared by reference between stores
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Config`] is identified by `(type, id)` and carries a producer-supplied
//! monotonic version plus an opaque JSON payload. A [`Tombstone`] marks the
//! record with the same identity as deleted at a version.
//!
//! ### Merge rules
//!
//! For a given identity the store keeps exactly one entry, live or dead:
//!
//! - a config replaces a config or tombstone with a strictly greater version
//! - a tombstone replaces a config with a greater **or equal** version
//! - a tombstone replaces a tombstone with a strictly greater version
//!
//! Ties go to the tombstone, which makes "kill this exact version" idempotent
//! and keeps the merge commutative under any interleaving.
//!
//! ### Stores
//!
//! A [`TypedStore`] holds the records of one type; a [`Store`] maps type
//! names to typed stores and is the unit exchanged between peers.
//!
//! ### Payloads
//!
//! Payload bytes are opaque to the engine. A [`TypeRegistry`] maps type names
//! to deserializer closures so the transport edge can materialize and
//! validate payloads on ingest; unknown types fail with a typed error.
//!
//! ## Quick Start
//!
//! ```rust
//! use beacon_engine::{Config, Store, Tombstone};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let mut store = Store::new();
//!
//! let accepted = store.insert_config(Arc::new(Config::new(
//!     "endpoints",
//!     "billing",
//!     1,
//!     json!({"host": "10.0.0.1"}),
//! )));
//! assert!(accepted.is_new);
//!
//! // A tombstone at the same version wins the tie.
//! let killed = store.insert_tombstone(Arc::new(Tombstone::new("endpoints", "billing", 1)));
//! assert!(killed.is_new);
//! assert_eq!(store.len(), 1);
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod store;

pub use config::{Config, ConfigResult, Tombstone};
pub use error::Error;
pub use registry::{ConfigPayload, TypeRegistry};
pub use store::{ConfigList, Inserted, Store, TypedStore};

/// Type aliases for clarity
pub type ConfigType = String;
pub type ConfigId = String;
pub type Version = u64;
