//! Value-transform ("filter") registry.
//!
//! Filters are pure functions looked up by name when a `| name:arg` pipe is
//! evaluated. Arguments arrive already converted to strings. Only a handful
//! of basic filters ship built in; anything else is registered by the host.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error("expected {expected} argument(s), got {got}")]
    WrongArity { expected: &'static str, got: usize },
    #[error("expected {expected} input, got {got}")]
    WrongType {
        expected: &'static str,
        got: &'static str,
    },
    #[error("filter '{0}' is already registered")]
    Duplicate(String),
    #[error("{0}")]
    Failed(String),
}

pub type Filter = Arc<dyn Fn(Value, &[String]) -> Result<Value, FilterError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: HashMap<String, Filter>,
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistry").field("filters", &self.names()).finish()
    }
}

impl FilterRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut filters: HashMap<String, Filter> = HashMap::new();
        filters.insert("upper".into(), Arc::new(upper));
        filters.insert("lower".into(), Arc::new(lower));
        filters.insert("trim".into(), Arc::new(trim));
        filters.insert("length".into(), Arc::new(length));
        filters.insert("join".into(), Arc::new(join));
        filters.insert("default".into(), Arc::new(default));
        filters.insert("json".into(), Arc::new(json));
        Self { filters }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, filter: F) -> Result<(), FilterError>
    where
        F: Fn(Value, &[String]) -> Result<Value, FilterError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.filters.contains_key(&name) {
            return Err(FilterError::Duplicate(name));
        }
        self.filters.insert(name, Arc::new(filter));
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.filters.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Filter> {
        self.filters.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.filters.keys().cloned().collect();
        names.sort();
        names
    }
}

static FILTERS: LazyLock<RwLock<FilterRegistry>> =
    LazyLock::new(|| RwLock::new(FilterRegistry::with_builtins()));

pub fn register_filter<F>(name: impl Into<String>, filter: F) -> Result<(), FilterError>
where
    F: Fn(Value, &[String]) -> Result<Value, FilterError> + Send + Sync + 'static,
{
    let name = name.into();
    tracing::debug!(filter = %name, "registering filter");
    FILTERS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .register(name, filter)
}

pub fn unregister_filter(name: &str) -> bool {
    let removed = FILTERS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .unregister(name);
    if removed {
        tracing::warn!(filter = %name, "filter unregistered");
    }
    removed
}

pub fn lookup_filter(name: &str) -> Option<Filter> {
    FILTERS.read().unwrap_or_else(PoisonError::into_inner).get(name)
}

pub fn has_filter(name: &str) -> bool {
    FILTERS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .contains(name)
}

pub fn list_filters() -> Vec<String> {
    FILTERS.read().unwrap_or_else(PoisonError::into_inner).names()
}

fn arity(args: &[String], max: usize, expected: &'static str) -> Result<(), FilterError> {
    if args.len() > max {
        return Err(FilterError::WrongArity {
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn string_input(value: Value) -> Result<String, FilterError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(FilterError::WrongType {
            expected: "string",
            got: other.type_name(),
        }),
    }
}

fn upper(value: Value, args: &[String]) -> Result<Value, FilterError> {
    arity(args, 0, "0")?;
    Ok(Value::String(string_input(value)?.to_uppercase()))
}

fn lower(value: Value, args: &[String]) -> Result<Value, FilterError> {
    arity(args, 0, "0")?;
    Ok(Value::String(string_input(value)?.to_lowercase()))
}

fn trim(value: Value, args: &[String]) -> Result<Value, FilterError> {
    arity(args, 0, "0")?;
    Ok(Value::String(string_input(value)?.trim().to_string()))
}

fn length(value: Value, args: &[String]) -> Result<Value, FilterError> {
    arity(args, 0, "0")?;
    let len = match &value {
        Value::String(s) => s.chars().count(),
        Value::Seq(items) => items.len(),
        Value::Map(map) => map.len(),
        Value::Record(record) => record.len(),
        other => {
            return Err(FilterError::WrongType {
                expected: "string, sequence or mapping",
                got: other.type_name(),
            })
        }
    };
    Ok(Value::from(len))
}

fn join(value: Value, args: &[String]) -> Result<Value, FilterError> {
    arity(args, 1, "0 or 1")?;
    let items = match value {
        Value::Seq(items) => items,
        other => {
            return Err(FilterError::WrongType {
                expected: "sequence",
                got: other.type_name(),
            })
        }
    };
    let separator = args.first().map_or("", String::as_str);
    let parts: Vec<String> = items.iter().map(Value::to_string).collect();
    Ok(Value::String(parts.join(separator)))
}

/// Replace nil with the fallback argument.
fn default(value: Value, args: &[String]) -> Result<Value, FilterError> {
    let [fallback] = args else {
        return Err(FilterError::WrongArity {
            expected: "1",
            got: args.len(),
        });
    };
    if value.is_nil() {
        Ok(Value::String(fallback.clone()))
    } else {
        Ok(value)
    }
}

fn json(value: Value, args: &[String]) -> Result<Value, FilterError> {
    arity(args, 0, "0")?;
    serde_json::to_string(&value)
        .map(Value::String)
        .map_err(|e| FilterError::Failed(e.to_string()))
}
