//! Config client abstraction.
//!
//! Any peer that can receive notifications and exchange whole stores looks
//! like a [`Client`], whether it sits behind a transport or is the local
//! [`Router`]. The symmetry lets the poller and the fast-path forwarder
//! work the same way in either direction.

use async_trait::async_trait;
use beacon_engine::{Config, ConfigType, Store, Tombstone};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::http::HttpClient;
use crate::reporter::{LogReporter, Reporter};
use crate::router::{Handler, Router};

/// Errors from config clients and the scheme registry.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("no config client registered for scheme '{0}'")]
    UnknownScheme(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("endpoint returned status {0}")]
    Status(u16),
}

/// A configuration peer.
///
/// `new_config` / `dead_config` are the best-effort fast path;
/// `push_configs` / `pull_configs` are the bulk primitives anti-entropy is
/// built on.
#[async_trait]
pub trait Client: Send + Sync {
    /// Notify the peer of a single config.
    async fn new_config(&self, config: &Config) -> Result<(), ClientError>;

    /// Notify the peer of a single tombstone.
    async fn dead_config(&self, tombstone: &Tombstone) -> Result<(), ClientError>;

    /// Merge a whole store into the peer.
    async fn push_configs(&self, store: Store) -> Result<(), ClientError>;

    /// Fetch the peer's whole store.
    async fn pull_configs(&self) -> Result<Store, ClientError>;
}

// A router is a valid local peer: notifications enqueue mutations and the
// bulk operations map onto its store.
#[async_trait]
impl Client for Router {
    async fn new_config(&self, config: &Config) -> Result<(), ClientError> {
        Router::new_config(self, config.clone()).await;
        Ok(())
    }

    async fn dead_config(&self, tombstone: &Tombstone) -> Result<(), ClientError> {
        Router::dead_config(self, tombstone.clone()).await;
        Ok(())
    }

    async fn push_configs(&self, store: Store) -> Result<(), ClientError> {
        Router::push_configs(self, store).await;
        Ok(())
    }

    async fn pull_configs(&self) -> Result<Store, ClientError> {
        Ok(Router::pull_configs(self))
    }
}

/// A no-op client, registered under the `null` scheme. Useful for tests
/// and for disabling a peer without rewiring.
#[derive(Debug, Default)]
pub struct NullClient;

#[async_trait]
impl Client for NullClient {
    async fn new_config(&self, _config: &Config) -> Result<(), ClientError> {
        Ok(())
    }

    async fn dead_config(&self, _tombstone: &Tombstone) -> Result<(), ClientError> {
        Ok(())
    }

    async fn push_configs(&self, _store: Store) -> Result<(), ClientError> {
        Ok(())
    }

    async fn pull_configs(&self) -> Result<Store, ClientError> {
        Ok(Store::new())
    }
}

type ClientFactory = Arc<dyn Fn(&Url) -> Result<Arc<dyn Client>, ClientError> + Send + Sync>;

/// Scheme-keyed factory registry for config clients.
///
/// Comes seeded with `null`, `http` and `https`.
pub struct ClientRegistry {
    factories: DashMap<String, ClientFactory>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    /// Create a registry with the built-in schemes.
    pub fn new() -> Self {
        let registry = Self {
            factories: DashMap::new(),
        };

        registry.register("null", |_| Ok(Arc::new(NullClient) as Arc<dyn Client>));
        registry.register("http", |url| {
            Ok(Arc::new(HttpClient::new(url.clone())) as Arc<dyn Client>)
        });
        registry.register("https", |url| {
            Ok(Arc::new(HttpClient::new(url.clone())) as Arc<dyn Client>)
        });

        registry
    }

    /// Register a factory for a URL scheme.
    ///
    /// # Panics
    ///
    /// Panics if the scheme was already registered.
    pub fn register<F>(&self, scheme: impl Into<String>, factory: F)
    where
        F: Fn(&Url) -> Result<Arc<dyn Client>, ClientError> + Send + Sync + 'static,
    {
        let scheme = scheme.into();
        if self.factories.contains_key(&scheme) {
            panic!("duplicate config client scheme '{scheme}'");
        }
        self.factories.insert(scheme, Arc::new(factory));
    }

    /// Create a client for the given URL, dispatching on its scheme.
    pub fn open(&self, url: &str) -> Result<Arc<dyn Client>, ClientError> {
        let url = Url::parse(url)?;
        let factory = self
            .factories
            .get(url.scheme())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ClientError::UnknownScheme(url.scheme().to_owned()))?;

        (factory.as_ref())(&url)
    }
}

/// Fast-path forwarder: a [`Handler`] that mirrors accepted mutations to a
/// remote client.
///
/// Sends are fire-and-forget on their own task, so a slow peer never backs
/// up the mutator. A lost notification is repaired by the next poller
/// cycle; failures are only reported.
pub struct Forwarder {
    client: Arc<dyn Client>,
    kinds: Vec<ConfigType>,
    reporter: Arc<dyn Reporter>,
}

impl Forwarder {
    /// Forward every accepted mutation to `client`.
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self {
            client,
            kinds: Vec::new(),
            reporter: Arc::new(LogReporter),
        }
    }

    /// Restrict forwarding to the given config types.
    pub fn with_types(mut self, kinds: Vec<ConfigType>) -> Self {
        self.kinds = kinds;
        self
    }

    /// Where transport failures are reported.
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }
}

impl Handler for Forwarder {
    fn config_types(&self) -> Vec<ConfigType> {
        self.kinds.clone()
    }

    fn new_config(&self, config: &Arc<Config>) {
        let client = Arc::clone(&self.client);
        let reporter = Arc::clone(&self.reporter);
        let config = Arc::clone(config);

        tokio::spawn(async move {
            if let Err(err) = client.new_config(&config).await {
                let context = serde_json::to_value(&*config).ok();
                reporter.error("forwarder", &err, context.as_ref());
            }
        });
    }

    fn dead_config(&self, tombstone: &Arc<Tombstone>) {
        let client = Arc::clone(&self.client);
        let reporter = Arc::clone(&self.reporter);
        let tombstone = Arc::clone(tombstone);

        tokio::spawn(async move {
            if let Err(err) = client.dead_config(&tombstone).await {
                let context = serde_json::to_value(&*tombstone).ok();
                reporter.error("forwarder", &err, context.as_ref());
            }
        });
    }
}
