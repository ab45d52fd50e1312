//! Payload type registry.
//!
//! Payloads are opaque JSON to the engine. The registry maps a type name to
//! a deserializer closure so the transport edge can materialize a payload
//! into its concrete type on ingest, and reject records whose type nobody
//! registered. The registry is built once at startup and read-only after;
//! registering the same name twice is a programmer error and panics.

use crate::{error::Result, Config, Error};
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// A materialized config payload.
///
/// Recover the concrete type with `downcast_ref`:
///
/// ```rust
/// # use beacon_engine::{Config, TypeRegistry};
/// # use serde_json::json;
/// let mut registry = TypeRegistry::new();
/// registry.register::<u64>("limits");
///
/// let config = Config::new("limits", "rps", 1, json!(1000));
/// let payload = registry.decode(&config).unwrap();
/// assert_eq!(payload.downcast_ref::<u64>(), Some(&1000));
/// ```
pub type ConfigPayload = Box<dyn Any + Send + Sync>;

type Decoder = Box<dyn Fn(&serde_json::Value) -> Result<ConfigPayload> + Send + Sync>;

/// Maps config type names to payload deserializers.
#[derive(Default)]
pub struct TypeRegistry {
    decoders: HashMap<String, Decoder>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.decoders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a payload type under the given config type name.
    ///
    /// # Panics
    ///
    /// Panics if the name was already registered.
    pub fn register<T>(&mut self, name: impl Into<String>)
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let name = name.into();
        if self.decoders.contains_key(&name) {
            panic!("duplicate registration of config type '{name}'");
        }

        let kind = name.clone();
        self.decoders.insert(
            name,
            Box::new(move |data| {
                let payload: T =
                    serde_json::from_value(data.clone()).map_err(|err| Error::InvalidPayload {
                        kind: kind.clone(),
                        reason: err.to_string(),
                    })?;
                Ok(Box::new(payload))
            }),
        );
    }

    /// Whether a type name was registered.
    pub fn contains(&self, name: &str) -> bool {
        self.decoders.contains_key(name)
    }

    /// Materialize the payload of a config.
    ///
    /// Returns [`Error::UnknownType`] if the config's type was never
    /// registered, or [`Error::InvalidPayload`] if the data does not decode.
    pub fn decode(&self, config: &Config) -> Result<ConfigPayload> {
        let decoder = self
            .decoders
            .get(&config.kind)
            .ok_or_else(|| Error::UnknownType(config.kind.clone()))?;

        decoder(&config.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Endpoint {
        host: String,
        port: u16,
    }

    #[test]
    fn decode_registered_type() {
        let mut registry = TypeRegistry::new();
        registry.register::<Endpoint>("endpoints");

        let config = Config::new(
            "endpoints",
            "billing",
            1,
            json!({"host": "10.0.0.1", "port": 80}),
        );

        let payload = registry.decode(&config).unwrap();
        let endpoint = payload.downcast_ref::<Endpoint>().unwrap();
        assert_eq!(
            endpoint,
            &Endpoint {
                host: "10.0.0.1".into(),
                port: 80
            }
        );
    }

    #[test]
    fn unknown_type_fails() {
        let registry = TypeRegistry::new();
        let config = Config::new("endpoints", "billing", 1, json!({}));

        assert!(!registry.contains("endpoints"));
        let err = registry.decode(&config).err().unwrap();
        assert_eq!(err, Error::UnknownType("endpoints".into()));
    }

    #[test]
    fn malformed_payload_fails() {
        let mut registry = TypeRegistry::new();
        registry.register::<Endpoint>("endpoints");

        let config = Config::new("endpoints", "billing", 1, json!({"host": 12}));
        assert!(matches!(
            registry.decode(&config),
            Err(Error::InvalidPayload { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "duplicate registration")]
    fn duplicate_registration_panics() {
        let mut registry = TypeRegistry::new();
        registry.register::<Endpoint>("endpoints");
        registry.register::<Endpoint>("endpoints");
    }

    #[test]
    fn raw_json_payloads() {
        // A type registered as a raw value accepts any payload shape.
        let mut registry = TypeRegistry::new();
        registry.register::<serde_json::Value>("settings");

        let config = Config::new("settings", "s1", 1, json!({"anything": [1, 2, 3]}));
        assert!(registry.decode(&config).is_ok());
    }
}
