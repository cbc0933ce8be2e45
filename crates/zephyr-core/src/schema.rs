//! The validation interface consumed by the dispatcher.
//!
//! Zephyr does not ship a schema language. Anything that can check a JSON
//! value (and optionally coerce it) implements [`Schema`]; closures do so
//! automatically, and [`TypedSchema`] validates by round-tripping through a
//! serde type.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// A validation failure reported by a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    message: String,
    path: Option<String>,
}

impl ValidationError {
    /// Creates an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
        }
    }

    /// Attaches the location of the offending value, e.g. `user.email`.
    #[must_use]
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Returns the message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the location, if known.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{path}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validates a JSON value, returning the (possibly coerced) accepted value.
pub trait Schema: Send + Sync + 'static {
    /// Checks `value`.
    fn validate(&self, value: &Value) -> Result<Value, ValidationError>;
}

/// A shareable schema handle.
pub type SharedSchema = Arc<dyn Schema>;

impl<F> Schema for F
where
    F: Fn(&Value) -> Result<Value, ValidationError> + Send + Sync + 'static,
{
    fn validate(&self, value: &Value) -> Result<Value, ValidationError> {
        self(value)
    }
}

/// A schema that accepts exactly the values `T` can be deserialized from.
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use serde_json::json;
/// use zephyr_core::{Schema, TypedSchema};
///
/// #[derive(Serialize, Deserialize)]
/// struct Search {
///     q: String,
/// }
///
/// let schema = TypedSchema::<Search>::new();
/// assert!(schema.validate(&json!({"q": "rust"})).is_ok());
/// assert!(schema.validate(&json!({})).is_err());
/// ```
pub struct TypedSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    /// Creates the schema.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Schema for TypedSchema<T>
where
    T: DeserializeOwned + Serialize + 'static,
{
    fn validate(&self, value: &Value) -> Result<Value, ValidationError> {
        let typed: T =
            serde_json::from_value(value.clone()).map_err(|e| ValidationError::new(e.to_string()))?;
        serde_json::to_value(typed).map_err(|e| ValidationError::new(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct Page {
        page: String,
        #[serde(default)]
        size: Option<String>,
    }

    #[test]
    fn test_closure_schema() {
        let schema = |value: &Value| {
            if value.get("id").is_some() {
                Ok(value.clone())
            } else {
                Err(ValidationError::new("Required").at("id"))
            }
        };

        assert!(schema.validate(&json!({"id": "1"})).is_ok());
        let err = schema.validate(&json!({})).unwrap_err();
        assert_eq!(err.to_string(), "id: Required");
    }

    #[test]
    fn test_typed_schema_fills_defaults() {
        let schema = TypedSchema::<Page>::new();
        let accepted = schema.validate(&json!({"page": "2"})).unwrap();
        assert_eq!(accepted, json!({"page": "2", "size": null}));
    }

    #[test]
    fn test_typed_schema_rejects() {
        let schema = TypedSchema::<Page>::new();
        let err = schema.validate(&json!({"size": "10"})).unwrap_err();
        assert!(err.message().contains("page"));
    }
}
