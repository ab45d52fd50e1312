//! Config and tombstone value types.
//!
//! Both types are treated as immutable by the rest of the system: once a
//! record enters a store it is shared by reference between snapshots and
//! must never be mutated.

use crate::{error::Result, ConfigId, ConfigType, Error, Version};
use serde::{Deserialize, Serialize};

/// A configuration record.
///
/// Identified by `(type, id)`; the version is supplied by the producer of
/// the change and establishes order among updates to the same identity. The
/// payload is opaque JSON that the engine never inspects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Namespace used for serialization and routing
    #[serde(rename = "type")]
    pub kind: ConfigType,
    /// Unique identifier within the type
    pub id: ConfigId,
    /// Producer-supplied monotonic version
    #[serde(rename = "ver")]
    pub version: Version,
    /// Opaque payload; decoded through the type registry at the edge
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl Config {
    /// Create a new config record.
    pub fn new(
        kind: impl Into<ConfigType>,
        id: impl Into<ConfigId>,
        version: Version,
        data: serde_json::Value,
    ) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            version,
            data,
        }
    }

    /// Return a tombstone that kills this exact config.
    pub fn tombstone(&self) -> Tombstone {
        Tombstone {
            kind: self.kind.clone(),
            id: self.id.clone(),
            version: self.version,
        }
    }

    /// Check the identity fields, which must both be non-empty.
    ///
    /// The engine itself never rejects records; this is for the transport
    /// edge, where malformed input is dropped before it reaches a store.
    pub fn validate(&self) -> Result<()> {
        validate_identity(&self.kind, &self.id)
    }
}

/// A marker recording that the config with the same identity was killed at
/// a given version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    /// Namespace used for serialization and routing
    #[serde(rename = "type")]
    pub kind: ConfigType,
    /// Unique identifier within the type
    pub id: ConfigId,
    /// Version at which the record was killed
    #[serde(rename = "ver")]
    pub version: Version,
}

impl Tombstone {
    /// Create a new tombstone.
    pub fn new(kind: impl Into<ConfigType>, id: impl Into<ConfigId>, version: Version) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            version,
        }
    }

    /// Check the identity fields, which must both be non-empty.
    pub fn validate(&self) -> Result<()> {
        validate_identity(&self.kind, &self.id)
    }
}

fn validate_identity(kind: &str, id: &str) -> Result<()> {
    if kind.is_empty() {
        return Err(Error::EmptyType);
    }
    if id.is_empty() {
        return Err(Error::EmptyId);
    }
    Ok(())
}

/// The state of a single record identity.
///
/// At most one of `live` or `dead` is set. Both empty never occurs in a
/// store lookup result; absence is expressed by the lookup returning `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigResult {
    /// Set if the record is live
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live: Option<Config>,
    /// Set if the record was killed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead: Option<Tombstone>,
}

impl ConfigResult {
    /// Version of whichever entry is present.
    pub fn version(&self) -> Option<Version> {
        self.live
            .as_ref()
            .map(|c| c.version)
            .or_else(|| self.dead.as_ref().map(|t| t.version))
    }

    /// Whether the record is live.
    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tombstone_from_config() {
        let config = Config::new("endpoints", "billing", 3, json!({"host": "h"}));
        let tombstone = config.tombstone();

        assert_eq!(tombstone.kind, "endpoints");
        assert_eq!(tombstone.id, "billing");
        assert_eq!(tombstone.version, 3);
    }

    #[test]
    fn validate_rejects_empty_identity() {
        let config = Config::new("", "billing", 1, json!(null));
        assert_eq!(config.validate(), Err(Error::EmptyType));

        let tombstone = Tombstone::new("endpoints", "", 1);
        assert_eq!(tombstone.validate(), Err(Error::EmptyId));

        assert!(Config::new("endpoints", "billing", 1, json!(null))
            .validate()
            .is_ok());
    }

    #[test]
    fn config_wire_form() {
        let config = Config::new("endpoints", "billing", 7, json!({"host": "h"}));
        let json = serde_json::to_value(&config).unwrap();

        assert_eq!(
            json,
            json!({"type": "endpoints", "id": "billing", "ver": 7, "data": {"host": "h"}})
        );

        let parsed: Config = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn config_without_data_omits_field() {
        let config = Config::new("endpoints", "billing", 7, serde_json::Value::Null);
        let json = serde_json::to_string(&config).unwrap();

        assert!(!json.contains("data"));

        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert!(parsed.data.is_null());
    }

    #[test]
    fn tombstone_wire_form() {
        let tombstone = Tombstone::new("endpoints", "billing", 2);
        let json = serde_json::to_value(&tombstone).unwrap();

        assert_eq!(json, json!({"type": "endpoints", "id": "billing", "ver": 2}));

        let parsed: Tombstone = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, tombstone);
    }

    #[test]
    fn result_version() {
        let live = ConfigResult {
            live: Some(Config::new("t", "a", 4, json!(null))),
            dead: None,
        };
        assert_eq!(live.version(), Some(4));
        assert!(live.is_live());

        let dead = ConfigResult {
            live: None,
            dead: Some(Tombstone::new("t", "a", 9)),
        };
        assert_eq!(dead.version(), Some(9));
        assert!(!dead.is_live());
    }
}
