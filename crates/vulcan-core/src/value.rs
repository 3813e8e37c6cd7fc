//! Configuration value types
//!
//! Config files decode into this closed tree of scalars (string, int, float,
//! bool, null), sequences and string-keyed mappings. Strings may carry
//! `${...}` expressions that are resolved later.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// A decoded config value
///
/// Mappings keep the key order of the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    /// May contain `${...}` expressions until interpolated
    String(String),
    Sequence(Vec<Value>),
    Mapping(IndexMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, Value::Sequence(_))
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, Value::Mapping(_))
    }

    /// Neither a sequence nor a mapping
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Sequence(_) | Value::Mapping(_))
    }

    pub fn as_i64(&self) -> Option<i64> {
        if let Value::Integer(i) = self {
            Some(*i)
        } else {
            None
        }
    }

    /// Integers widen to floats
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(n) => Some(n),
            Value::Integer(i) => Some(i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Value::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        if let Value::Sequence(items) = self {
            Some(items.as_slice())
        } else {
            None
        }
    }

    pub fn as_mapping(&self) -> Option<&IndexMap<String, Value>> {
        if let Value::Mapping(map) = self {
            Some(map)
        } else {
            None
        }
    }

    /// Look up a nested value by key path
    ///
    /// Paths use the same form as unknown-key reports: `nginx.ports[1]`.
    /// An empty path returns the value itself.
    pub fn get_path(&self, path: &str) -> Result<&Value> {
        let mut current = self;
        for segment in PathSegments::new(path) {
            let next = match (segment?, current) {
                (PathSegment::Key(key), Value::Mapping(map)) => map.get(key),
                (PathSegment::Index(idx), Value::Sequence(items)) => items.get(idx),
                _ => None,
            };
            current = next.ok_or_else(|| {
                Error::eval(format!("path '{}' not found", path)).with_path(path)
            })?;
        }
        Ok(current)
    }

    /// Type name as used in type error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Sequence(_) => "list",
            Value::Mapping(_) => "map",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
            Value::Sequence(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    let sep = if i == 0 { "" } else { ", " };
                    write!(f, "{sep}{item}")?;
                }
                f.write_str("]")
            }
            Value::Mapping(map) => {
                f.write_str("{")?;
                for (i, (key, item)) in map.iter().enumerate() {
                    let sep = if i == 0 { "" } else { ", " };
                    write!(f, "{sep}{key}: {item}")?;
                }
                f.write_str("}")
            }
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i64 => Integer,
    i32 => Integer,
    f64 => Float,
    String => String,
    &str => String,
    IndexMap<String, Value> => Mapping,
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Sequence(items.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PathSegment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Splits `a.b[0].c` into borrowed segments
struct PathSegments<'a> {
    rest: &'a str,
}

impl<'a> PathSegments<'a> {
    fn new(path: &'a str) -> Self {
        Self { rest: path }
    }
}

impl<'a> Iterator for PathSegments<'a> {
    type Item = Result<PathSegment<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rest = self.rest.strip_prefix('.').unwrap_or(self.rest);
        if self.rest.is_empty() {
            return None;
        }

        if let Some(after) = self.rest.strip_prefix('[') {
            let Some(end) = after.find(']') else {
                self.rest = "";
                return Some(Err(Error::parse(format!("unclosed '[' in path: [{}", after))));
            };
            let index = &after[..end];
            self.rest = &after[end + 1..];
            return Some(index.parse().map(PathSegment::Index).map_err(|_| {
                Error::parse(format!("invalid sequence index in path: [{}]", index))
            }));
        }

        let end = self.rest.find(['.', '[', ']']).unwrap_or(self.rest.len());
        if self.rest[end..].starts_with(']') {
            self.rest = "";
            return Some(Err(Error::parse("unexpected ']' in path")));
        }
        let (key, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(Ok(PathSegment::Key(key)))
    }
}
