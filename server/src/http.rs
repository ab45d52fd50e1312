//! HTTP config client.
//!
//! Speaks the wire protocol served by [`routes::configs`](crate::routes):
//! `POST` for a single config, `DELETE` for a single tombstone, `PUT` to
//! merge a store and `GET` to fetch one. The URL handed to the client is
//! the configs endpoint itself, e.g. `http://peer:8080/v1/configs`.

use async_trait::async_trait;
use beacon_engine::{Config, Store, Tombstone};
use url::Url;

use crate::client::{Client, ClientError};

/// Config client over HTTP, registered under the `http` and `https`
/// schemes.
#[derive(Debug, Clone)]
pub struct HttpClient {
    endpoint: Url,
    http: reqwest::Client,
}

impl HttpClient {
    /// Create a client for the configs endpoint at `endpoint`.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            http: reqwest::Client::new(),
        }
    }

    /// The endpoint this client talks to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ClientError::Status(status.as_u16()))
    }
}

#[async_trait]
impl Client for HttpClient {
    async fn new_config(&self, config: &Config) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(config)
            .send()
            .await?;
        ensure_success(response)?;
        Ok(())
    }

    async fn dead_config(&self, tombstone: &Tombstone) -> Result<(), ClientError> {
        let response = self
            .http
            .delete(self.endpoint.clone())
            .json(tombstone)
            .send()
            .await?;
        ensure_success(response)?;
        Ok(())
    }

    async fn push_configs(&self, store: Store) -> Result<(), ClientError> {
        let response = self
            .http
            .put(self.endpoint.clone())
            .json(&store)
            .send()
            .await?;
        ensure_success(response)?;
        Ok(())
    }

    async fn pull_configs(&self) -> Result<Store, ClientError> {
        let response = self.http.get(self.endpoint.clone()).send().await?;
        let store = ensure_success(response)?.json().await?;
        Ok(store)
    }
}
