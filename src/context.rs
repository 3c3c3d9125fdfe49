use std::collections::HashMap;

use serde::Serialize;

use crate::value::Value;

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("failed to convert context: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("context root must be a mapping, got {0}")]
    NotAMapping(&'static str),
}

/// Top-level bindings for one render call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    vars: HashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Build a context from any serializable struct or map; its top-level
    /// fields become the bindings.
    pub fn from_serialize<T: Serialize + ?Sized>(input: &T) -> Result<Self, ContextError> {
        match Value::from_serialize(input)? {
            Value::Map(map) => Ok(map.into_iter().collect()),
            other => Err(ContextError::NotAMapping(other.type_name())),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
