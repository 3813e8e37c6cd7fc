//! Variable declarations and their types
//!
//! A variable may declare its type (`string`, `list` or `map`). When it
//! doesn't, the type is inferred from the default value by weak decoding,
//! trying string first, then map, then list.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::value::Value;

/// The type of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Unknown,
    String,
    List,
    Map,
}

impl VariableType {
    /// Types that can be declared, sorted
    pub const DECLARABLE: [&'static str; 3] = ["list", "map", "string"];

    /// Parse a declared type name
    pub fn from_declared(name: &str) -> Option<Self> {
        match name {
            "string" => Some(VariableType::String),
            "list" => Some(VariableType::List),
            "map" => Some(VariableType::Map),
            _ => None,
        }
    }

    /// Human-readable name
    pub fn printable(&self) -> &'static str {
        match self {
            VariableType::Unknown => "unknown",
            VariableType::String => "string",
            VariableType::List => "list",
            VariableType::Map => "map",
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.printable())
    }
}

/// A declared input variable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variable {
    pub name: String,
    /// The type as written in the declaration, if any
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub declared_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Variable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: None,
            default: None,
            description: None,
        }
    }

    pub fn with_type(mut self, declared_type: impl Into<String>) -> Self {
        self.declared_type = Some(declared_type.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The declared type, or the type inferred from the default
    ///
    /// An unrecognized declared type yields [`VariableType::Unknown`]. A
    /// variable without a default is a string.
    pub fn variable_type(&self) -> VariableType {
        if let Some(declared) = &self.declared_type {
            return VariableType::from_declared(declared).unwrap_or(VariableType::Unknown);
        }
        match &self.default {
            None => VariableType::String,
            Some(default) => infer_type(default),
        }
    }

    /// Check the declared type against the default and normalize the default
    pub fn validate_type_and_default(&mut self) -> Result<()> {
        if let Some(declared) = &self.declared_type {
            if VariableType::from_declared(declared).is_none() {
                return Err(Error::invalid_variable_type(
                    &self.name,
                    declared,
                    &VariableType::DECLARABLE,
                ));
            }
        }

        let Some(default) = &self.default else {
            return Ok(());
        };

        let inferred = infer_type(default);
        let declared = self.variable_type();
        if self.declared_type.is_some() && declared != inferred {
            return Err(Error::type_mismatch(
                &self.name,
                declared.printable(),
                inferred.printable(),
            ));
        }

        let normalized = match inferred {
            VariableType::String => decode_string(default).map(Value::String),
            VariableType::Map => decode_map(default).map(Value::Mapping),
            VariableType::List => decode_list(default).map(Value::Sequence),
            VariableType::Unknown => None,
        };
        if let Some(normalized) = normalized {
            self.default = Some(normalized);
        }
        Ok(())
    }
}

fn infer_type(value: &Value) -> VariableType {
    if decode_string(value).is_some() {
        VariableType::String
    } else if decode_map(value).is_some() {
        VariableType::Map
    } else if decode_list(value).is_some() {
        VariableType::List
    } else {
        VariableType::Unknown
    }
}

/// Weakly decode a scalar into a string
fn decode_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        _ => None,
    }
}

/// Weakly decode into a mapping, merging a list of mappings
fn decode_map(value: &Value) -> Option<IndexMap<String, Value>> {
    match value {
        Value::Mapping(map) => Some(map.clone()),
        Value::Sequence(seq) if !seq.is_empty() => {
            let mut merged = IndexMap::new();
            for item in seq {
                for (k, v) in item.as_mapping()? {
                    merged.insert(k.clone(), v.clone());
                }
            }
            Some(merged)
        }
        _ => None,
    }
}

fn decode_list(value: &Value) -> Option<Vec<Value>> {
    value.as_sequence().map(<[Value]>::to_vec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_no_default_is_string() {
        assert_eq!(Variable::new("region").variable_type(), VariableType::String);
    }

    #[test]
    fn test_inference_priority() {
        let cases = [
            ("eu-west-1", VariableType::String),
            ("42", VariableType::String),
            ("1.5", VariableType::String),
            ("true", VariableType::String),
            ("[a, b]", VariableType::List),
            ("[]", VariableType::List),
            ("{a: 1}", VariableType::Map),
            ("[{a: 1}, {b: 2}]", VariableType::Map),
            ("[{a: 1}, b]", VariableType::List),
            ("null", VariableType::Unknown),
        ];
        for (default, expected) in cases {
            let var = Variable::new("v").with_default(yaml(default));
            assert_eq!(var.variable_type(), expected, "default: {}", default);
        }
    }

    #[test]
    fn test_declared_type_wins() {
        let var = Variable::new("v").with_type("list");
        assert_eq!(var.variable_type(), VariableType::List);

        let var = Variable::new("v").with_type("number").with_default("1");
        assert_eq!(var.variable_type(), VariableType::Unknown);
    }

    #[test]
    fn test_validate_invalid_type() {
        let mut var = Variable::new("count").with_type("number");
        let err = var.validate_type_and_default().unwrap_err();

        assert_eq!(err.kind, ErrorKind::Type);
        assert!(err.to_string().contains("[list, map, string]"));
        assert!(err.to_string().contains("'number'"));
    }

    #[test]
    fn test_validate_mismatch_names_both_types() {
        let mut var = Variable::new("region")
            .with_type("string")
            .with_default(yaml("[a, b]"));
        let err = var.validate_type_and_default().unwrap_err();

        assert_eq!(err.kind, ErrorKind::Type);
        let display = err.to_string();
        assert!(display.contains("'region'"));
        assert!(display.contains("'string'"));
        assert!(display.contains("'list'"));
    }

    #[test]
    fn test_validate_normalizes_default() {
        let mut var = Variable::new("port").with_default(8080);
        var.validate_type_and_default().unwrap();
        assert_eq!(var.default, Some(Value::from("8080")));

        let mut var = Variable::new("enabled").with_default(true);
        var.validate_type_and_default().unwrap();
        assert_eq!(var.default, Some(Value::from("1")));

        let mut var = Variable::new("tags")
            .with_type("map")
            .with_default(yaml("[{a: x}, {b: y, a: z}]"));
        var.validate_type_and_default().unwrap();
        assert_eq!(var.default, Some(yaml("{a: z, b: y}")));
    }

    #[test]
    fn test_validate_is_idempotent() {
        let mut var = Variable::new("tags").with_default(yaml("[{a: x}, {b: y}]"));
        var.validate_type_and_default().unwrap();
        let once = var.clone();
        var.validate_type_and_default().unwrap();

        assert_eq!(var, once);
        assert_eq!(var.variable_type(), VariableType::Map);
    }

    #[test]
    fn test_validate_without_default() {
        let mut var = Variable::new("ami").with_type("string");
        var.validate_type_and_default().unwrap();
        assert_eq!(var.default, None);
    }
}
