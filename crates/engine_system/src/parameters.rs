//! Runtime-tunable system parameters.
//!
//! Systems that implement [`ConfigureParameters`](crate::ConfigureParameters)
//! declare named parameters with a default value right after their Configure
//! call. Host code can then read and change them while the simulation runs;
//! the declaring system reads them back each step.
//!
//! A parameter keeps the JSON kind of its declared default: setting a string
//! over a number is rejected.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// Errors raised by the parameter registry.
#[derive(Debug, thiserror::Error)]
pub enum ParameterError {
    /// A parameter with this name has already been declared.
    #[error("parameter '{0}' is already declared")]
    AlreadyDeclared(String),

    /// No parameter with this name has been declared.
    #[error("parameter '{0}' is not declared")]
    NotDeclared(String),

    /// The new value does not have the declared kind.
    #[error("parameter '{name}' holds {expected}, got {found}")]
    KindMismatch {
        /// Parameter name.
        name: String,
        /// Kind of the declared default.
        expected: &'static str,
        /// Kind of the rejected value.
        found: &'static str,
    },

    /// The value could not be converted to or from JSON.
    #[error("invalid value for parameter '{name}': {source}")]
    Value {
        /// Parameter name.
        name: String,
        /// The underlying serialisation error.
        #[source]
        source: serde_json::Error,
    },
}

/// Named parameters shared between systems and the host.
///
/// Clones share one registry.
#[derive(Clone, Default)]
pub struct ParameterRegistry {
    params: Arc<DashMap<String, Value>>,
}

impl ParameterRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `name` with its default value.
    ///
    /// # Errors
    ///
    /// [`ParameterError::AlreadyDeclared`] if the name is taken,
    /// [`ParameterError::Value`] if `default` cannot be represented as JSON.
    pub fn declare(&self, name: &str, default: impl Serialize) -> Result<(), ParameterError> {
        let value = to_value(name, default)?;
        match self.params.entry(name.to_string()) {
            Entry::Occupied(_) => Err(ParameterError::AlreadyDeclared(name.to_string())),
            Entry::Vacant(slot) => {
                debug!(parameter = name, %value, "parameter declared");
                slot.insert(value);
                Ok(())
            }
        }
    }

    /// Replace the value of a declared parameter.
    ///
    /// # Errors
    ///
    /// [`ParameterError::NotDeclared`] for an unknown name,
    /// [`ParameterError::KindMismatch`] if the value kind differs from the
    /// declared one.
    pub fn set(&self, name: &str, value: impl Serialize) -> Result<(), ParameterError> {
        let value = to_value(name, value)?;
        let mut current = self
            .params
            .get_mut(name)
            .ok_or_else(|| ParameterError::NotDeclared(name.to_string()))?;
        let (expected, found) = (kind(&current), kind(&value));
        if expected != found {
            return Err(ParameterError::KindMismatch {
                name: name.to_string(),
                expected,
                found,
            });
        }
        debug!(parameter = name, %value, "parameter set");
        *current = value;
        Ok(())
    }

    /// Current raw value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.params.get(name).map(|value| value.clone())
    }

    /// Current value of `name`, deserialised as `T`.
    ///
    /// # Errors
    ///
    /// [`ParameterError::Value`] if the stored value does not fit `T`.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ParameterError> {
        self.get(name)
            .map(|value| {
                serde_json::from_value(value).map_err(|source| ParameterError::Value {
                    name: name.to_string(),
                    source,
                })
            })
            .transpose()
    }

    /// Returns `true` if `name` has been declared.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// Declared names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.params.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// Number of declared parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Returns `true` if nothing has been declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl std::fmt::Debug for ParameterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterRegistry")
            .field("names", &self.names())
            .finish()
    }
}

fn to_value(name: &str, value: impl Serialize) -> Result<Value, ParameterError> {
    serde_json::to_value(value).map_err(|source| ParameterError::Value {
        name: name.to_string(),
        source,
    })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
