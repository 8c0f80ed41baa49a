//! System configuration payloads.
//!
//! A [`ConfigPayload`] is the configuration tree a system receives in its
//! Configure call. The instance wrapper keeps it so the system can be
//! reconfigured later without going back to the scene description.

use std::sync::Arc;

use engine_component::Entity;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Errors raised while reading a configuration payload.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The payload text is not valid JSON.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field exists but does not have the expected shape.
    #[error("invalid value for '{key}': {source}")]
    Field {
        /// The offending key.
        key: String,
        /// The underlying deserialisation error.
        #[source]
        source: serde_json::Error,
    },

    /// A required field is missing.
    #[error("missing required field '{0}'")]
    Missing(String),
}

/// An immutable, cheaply clonable configuration tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigPayload(Arc<Value>);

impl ConfigPayload {
    /// Wrap a JSON value.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    /// An empty object.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Value::Object(serde_json::Map::new()))
    }

    /// Parse a payload from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the text is not valid JSON.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(serde_json::from_str(text)?))
    }

    /// The raw tree.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Returns `true` if the top-level object has `key`.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Top-level field lookup.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Nested lookup by JSON pointer, e.g. `"/shader/vertex"`.
    #[must_use]
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.0.pointer(pointer)
    }

    /// Read a top-level field into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Field`] if the field exists but cannot be
    /// deserialised into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.get(key)
            .map(|value| {
                T::deserialize(value).map_err(|source| ConfigError::Field {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }

    /// Read a top-level field into `T`, falling back to `default` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Field`] if the field exists but has the wrong shape.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.get_as(key)?.unwrap_or(default))
    }

    /// Read a required top-level field into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if absent, [`ConfigError::Field`] if
    /// malformed.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        self.get_as(key)?
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    /// Deserialise the whole tree into a typed parameter struct.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the tree does not fit `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        Ok(T::deserialize(self.value())?)
    }
}

impl Default for ConfigPayload {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for ConfigPayload {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl Serialize for ConfigPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConfigPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::new)
    }
}

/// What the loader needs to construct one system: the plugin name, the
/// entity to bind it to, and the payload for its Configure call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSpec {
    /// Name the system factory is registered under.
    pub name: String,
    /// Entity the system is attached to. Defaults to [`Entity::NULL`].
    #[serde(default)]
    pub entity: Entity,
    /// Configuration payload. Defaults to an empty object.
    #[serde(default)]
    pub config: ConfigPayload,
}

impl PluginSpec {
    /// Create a spec with a null entity and an empty payload.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity: Entity::NULL,
            config: ConfigPayload::empty(),
        }
    }

    /// Bind the system to `entity`.
    #[must_use]
    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entity = entity;
        self
    }

    /// Set the configuration payload.
    #[must_use]
    pub fn with_config(mut self, config: impl Into<ConfigPayload>) -> Self {
        self.config = config.into();
        self
    }
}
