//! Runtime values.
//!
//! Templates are dynamically typed. Every binding, literal and intermediate
//! result is a [`Value`]; composite inputs arrive either as explicit
//! sequences/mappings/records or through serde (`Value::from_serialize`).

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Record(Record),
}

/// A named value with ordered, named fields (a struct-like input).
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    name: String,
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field insertion. A repeated name replaces the earlier value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(name, value);
        self
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Failures of the value model: coercion, arithmetic and access.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("cannot {verb} types {lhs} and {rhs}")]
    Arithmetic {
        verb: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("cannot compare types {lhs} and {rhs}")]
    CannotCompare { lhs: &'static str, rhs: &'static str },
    #[error("division by zero")]
    DivisionByZero,
    #[error("modulo by zero")]
    ModuloByZero,
    #[error("integer overflow in '{op}'")]
    Overflow { op: &'static str },
    #[error("unary '{op}' is not defined for type {ty}")]
    BadUnaryOperand { op: &'static str, ty: &'static str },
    #[error("undefined property '{name}' on {ty}")]
    UndefinedProperty { name: String, ty: &'static str },
    #[error("type {ty} is not indexable")]
    NotIndexable { ty: &'static str },
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("cannot index {ty} with {key}")]
    InvalidSubscript {
        ty: &'static str,
        key: &'static str,
    },
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "mapping",
            Value::Record(_) => "record",
        }
    }

    /// Falsiness is about size for containers, never about their contents.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Seq(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Record(_) => true,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// `.name` access on a mapping key or record field.
    pub fn property(&self, name: &str) -> Result<Value, ValueError> {
        self.property_ref(name).cloned()
    }

    /// Borrowing form of [`property`](Self::property).
    pub fn property_ref(&self, name: &str) -> Result<&Value, ValueError> {
        let found = match self {
            Value::Map(map) => map.get(name),
            Value::Record(record) => record.field(name),
            _ => None,
        };
        found.ok_or_else(|| ValueError::UndefinedProperty {
            name: name.to_string(),
            ty: self.type_name(),
        })
    }

    /// Positional access: sequence element, string codepoint, or a mapping
    /// key spelled as a number (`m.0`).
    pub fn index(&self, index: i64) -> Result<Value, ValueError> {
        self.index_ref(index).map(Cow::into_owned)
    }

    /// Borrowing form of [`index`](Self::index). Only string codepoints are
    /// produced fresh.
    pub fn index_ref(&self, index: i64) -> Result<Cow<'_, Value>, ValueError> {
        match self {
            Value::Seq(items) => usize::try_from(index)
                .ok()
                .and_then(|i| items.get(i))
                .map(Cow::Borrowed)
                .ok_or(ValueError::IndexOutOfRange {
                    index,
                    len: items.len(),
                }),
            Value::String(s) => usize::try_from(index)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Cow::Owned(Value::String(c.to_string())))
                .ok_or_else(|| ValueError::IndexOutOfRange {
                    index,
                    len: s.chars().count(),
                }),
            Value::Map(_) | Value::Record(_) => self.property_ref(&index.to_string()).map(Cow::Borrowed),
            _ => Err(ValueError::NotIndexable {
                ty: self.type_name(),
            }),
        }
    }

    /// `base[key]` access, dispatched on the key's type.
    pub fn subscript(&self, key: &Value) -> Result<Value, ValueError> {
        self.subscript_ref(key).map(Cow::into_owned)
    }

    /// Borrowing form of [`subscript`](Self::subscript).
    pub fn subscript_ref(&self, key: &Value) -> Result<Cow<'_, Value>, ValueError> {
        match key {
            Value::Int(i) => self.index_ref(*i),
            Value::String(name) => match self {
                Value::Map(_) | Value::Record(_) => self.property_ref(name).map(Cow::Borrowed),
                Value::Seq(_) | Value::String(_) => Err(ValueError::InvalidSubscript {
                    ty: self.type_name(),
                    key: key.type_name(),
                }),
                _ => Err(ValueError::NotIndexable {
                    ty: self.type_name(),
                }),
            },
            _ => match self {
                Value::Seq(_) | Value::String(_) | Value::Map(_) | Value::Record(_) => {
                    Err(ValueError::InvalidSubscript {
                        ty: self.type_name(),
                        key: key.type_name(),
                    })
                }
                _ => Err(ValueError::NotIndexable {
                    ty: self.type_name(),
                }),
            },
        }
    }

    /// Convert any serde-serializable input into a value.
    pub fn from_serialize<T: Serialize + ?Sized>(input: &T) -> Result<Value, serde_json::Error> {
        serde_json::to_value(input).map(Value::from)
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s:?}"),
            other => write!(f, "{other}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => f.write_str(s),
            Value::Seq(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt_nested(f)?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: ")?;
                    value.fmt_nested(f)?;
                }
                f.write_str("}")
            }
            Value::Record(record) => {
                write!(f, "{} {{", record.name)?;
                for (i, (name, value)) in record.fields().enumerate() {
                    f.write_str(if i > 0 { ", " } else { " " })?;
                    write!(f, "{name}: ")?;
                    value.fmt_nested(f)?;
                }
                f.write_str(if record.is_empty() { "}" } else { " }" })
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Nil => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::String(s) => serializer.serialize_str(s),
            Value::Seq(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            Value::Record(record) => {
                let mut out = serializer.serialize_map(Some(record.len()))?;
                for (name, value) in record.fields() {
                    out.serialize_entry(name, value)?;
                }
                out.end()
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Seq(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        match i64::try_from(i) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Float(i as f64),
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Record(record)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Seq(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Nil, Into::into)
    }
}

impl<V: Into<Value>> From<BTreeMap<String, V>> for Value {
    fn from(map: BTreeMap<String, V>) -> Self {
        Value::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<V: Into<Value>> From<HashMap<String, V>> for Value {
    fn from(map: HashMap<String, V>) -> Self {
        Value::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_is_about_size() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(!Value::Seq(vec![]).is_truthy());
        assert!(!Value::Map(BTreeMap::new()).is_truthy());

        assert!(Value::Seq(vec![Value::Bool(false), Value::Nil]).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(Value::Record(Record::new("Empty")).is_truthy());
    }

    #[test]
    fn display_formats() {
        assert_eq!(Value::Nil.to_string(), "");
        assert_eq!(Value::Float(3.0).to_string(), "3");
        assert_eq!(Value::Float(0.5).to_string(), "0.5");
        assert_eq!(
            Value::from(vec![Value::Int(1), Value::from("a")]).to_string(),
            r#"[1, "a"]"#
        );
        let record = Record::new("User").with_field("name", "ann").with_field("age", 3);
        assert_eq!(Value::from(record).to_string(), r#"User { name: "ann", age: 3 }"#);
        assert_eq!(Value::from(Record::new("Unit")).to_string(), "Unit {}");
    }

    #[test]
    fn property_and_index_access() {
        let value = Value::from(json!({"users": [{"name": "a"}, {"name": "b"}]}));
        let users = value.property("users").unwrap();
        assert_eq!(users.index(1).unwrap().property("name").unwrap(), Value::from("b"));
        assert_eq!(
            users.index(2),
            Err(ValueError::IndexOutOfRange { index: 2, len: 2 })
        );
        assert_eq!(
            value.property("missing"),
            Err(ValueError::UndefinedProperty {
                name: "missing".into(),
                ty: "mapping"
            })
        );
        assert_eq!(Value::Int(3).index(0), Err(ValueError::NotIndexable { ty: "int" }));
    }

    #[test]
    fn ref_accessors_borrow_from_the_container() {
        let value = Value::from(json!({"rows": [[1, 2], [3]]}));
        let rows = value.property_ref("rows").unwrap();
        let Value::Seq(items) = rows else {
            panic!("expected sequence");
        };
        let first = value.property_ref("rows").unwrap().index_ref(0).unwrap();
        assert!(matches!(first, Cow::Borrowed(v) if std::ptr::eq(v, &items[0])));
        assert!(matches!(
            rows.subscript_ref(&Value::Int(1)).unwrap(),
            Cow::Borrowed(v) if std::ptr::eq(v, &items[1])
        ));
        assert!(matches!(Value::from("ab").index_ref(1).unwrap(), Cow::Owned(_)));
    }

    #[test]
    fn subscript_dispatches_on_key_type() {
        let seq = Value::from(vec!["x", "y"]);
        assert_eq!(seq.subscript(&Value::Int(0)).unwrap(), Value::from("x"));
        assert_eq!(
            seq.subscript(&Value::from("0")),
            Err(ValueError::InvalidSubscript {
                ty: "sequence",
                key: "string"
            })
        );
        let record = Value::from(Record::new("Msg").with_field("role", "user"));
        assert_eq!(record.subscript(&Value::from("role")).unwrap(), Value::from("user"));
        assert_eq!(Value::from("héllo").index(1).unwrap(), Value::from("é"));
    }

    #[test]
    fn json_numbers_map_to_int_or_float() {
        assert_eq!(Value::from(json!(7)), Value::Int(7));
        assert_eq!(Value::from(json!(7.5)), Value::Float(7.5));
        assert_eq!(Value::from(json!(u64::MAX)), Value::Float(u64::MAX as f64));
    }

    #[test]
    fn serializes_records_as_objects() {
        let record = Record::new("Msg").with_field("role", "user").with_field("n", Value::Nil);
        let json = serde_json::to_string(&Value::from(record)).unwrap();
        assert_eq!(json, r#"{"role":"user","n":null}"#);
    }
}
