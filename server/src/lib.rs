//! # Beacon Server
//!
//! The runtime half of the beacon configuration fabric.
//!
//! Built around a [`Router`] that serializes all mutations through one
//! task while readers observe immutable snapshots lock-free. Around it:
//!
//! - [`Client`]: the symmetric peer interface (`new_config` /
//!   `dead_config` / `push_configs` / `pull_configs`), implemented by the
//!   router itself, by [`HttpClient`], and by [`NullClient`]
//! - [`Poller`]: periodic push/pull anti-entropy between a local router
//!   and a remote peer, guaranteeing convergence despite fast-path loss
//! - [`ConfigDb`]: pluggable persistence, with [`AofDb`] writing an
//!   append-only file that reseeds the router at startup
//! - [`routes`]: the axum HTTP binding of the peer interface
//!
//! The binary in `main.rs` wires all of this from environment variables.

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod poller;
pub mod reporter;
pub mod router;
pub mod routes;

pub use client::{Client, ClientError, ClientRegistry, Forwarder, NullClient};
pub use config::{Config as ServerConfig, ConfigError};
pub use db::{AofDb, ConfigDb, DbError, LoadReport, MemoryDb, NullDb, AOF_MAGIC};
pub use error::AppError;
pub use http::HttpClient;
pub use poller::{Poller, PollerBuilder, DEFAULT_POLL_RATE};
pub use reporter::{LogReporter, Reporter};
pub use router::{
    DerivedState, Handler, Router, RouterBuilder, RouterState, StateError, DEFAULT_QUEUE_SIZE,
};
pub use routes::AppState;
