//! A block body together with the expressions found in it
//!
//! [`RawConfig`] keeps the body exactly as loaded. Templates and variable
//! references are discovered once, at construction. Each interpolation pass
//! evaluates a fresh copy of the raw tree, so passes can be repeated with
//! different bindings.

use std::collections::BTreeMap;
use std::sync::Mutex;

use indexmap::IndexMap;

use crate::error::Result;
use crate::expression::Template;
use crate::function::FunctionRegistry;
use crate::reference::{detect_variables, InterpolatedVariable};
use crate::scope::{Bindings, Scope};
use crate::value::Value;
use crate::walker;

/// The outcome of one interpolation pass
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub config: Value,
    pub unknown_keys: Vec<String>,
}

/// Raw config body plus the expressions discovered in it
#[derive(Debug)]
pub struct RawConfig {
    key: String,
    raw: Value,
    interpolations: Vec<Template>,
    variables: BTreeMap<String, InterpolatedVariable>,
    state: Mutex<Option<Resolution>>,
}

impl RawConfig {
    /// Discover templates and variable references in `raw`
    ///
    /// A null body is treated as an empty mapping.
    pub fn new(key: impl Into<String>, raw: Value) -> Result<Self> {
        let key = key.into();
        let raw = match raw {
            Value::Null => Value::Mapping(IndexMap::new()),
            other => other,
        };

        let mut interpolations = Vec::new();
        let mut variables = BTreeMap::new();
        walker::discover(&raw, |_, template| {
            for expr in template.expressions() {
                for var in detect_variables(expr)? {
                    variables.entry(var.full_key()).or_insert(var);
                }
            }
            interpolations.push(template.clone());
            Ok(())
        })?;

        log::trace!(
            "{}: {} interpolations, {} variables",
            key,
            interpolations.len(),
            variables.len()
        );

        Ok(Self {
            key,
            raw,
            interpolations,
            variables,
            state: Mutex::new(None),
        })
    }

    /// Provenance id, such as `package.nginx`
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The body as loaded
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Templates found in the body, in traversal order
    pub fn interpolations(&self) -> &[Template] {
        &self.interpolations
    }

    /// Referenced variables keyed by full key
    pub fn variables(&self) -> &BTreeMap<String, InterpolatedVariable> {
        &self.variables
    }

    /// Evaluate a copy of the body against the given bindings with built-in functions
    pub fn resolve(&self, bindings: &Bindings) -> Result<Resolution> {
        self.resolve_with(bindings, FunctionRegistry::builtins())
    }

    /// Evaluate a copy of the body with a custom function registry
    pub fn resolve_with(
        &self,
        bindings: &Bindings,
        functions: &FunctionRegistry,
    ) -> Result<Resolution> {
        let scope = Scope::new(bindings, functions);
        let replaced = walker::replace(self.raw.clone(), |_, template| {
            scope.eval_template(template)
        })?;

        Ok(Resolution {
            config: replaced.value,
            unknown_keys: replaced.unknown_keys,
        })
    }

    /// Resolve and store the result
    ///
    /// Passes on the same instance are serialized. On failure the previously
    /// stored resolution is left in place.
    pub fn interpolate(&self, bindings: &Bindings) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let resolution = self.resolve(bindings)?;
        *state = Some(resolution);
        Ok(())
    }

    /// The most recent resolution, if any
    pub fn resolution(&self) -> Option<Resolution> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The resolved body, or the raw body before any pass
    pub fn config(&self) -> Value {
        self.resolution()
            .map(|r| r.config)
            .unwrap_or_else(|| self.raw.clone())
    }

    /// Paths left unknown by the most recent pass
    pub fn unknown_keys(&self) -> Vec<String> {
        self.resolution()
            .map(|r| r.unknown_keys)
            .unwrap_or_default()
    }
}

impl Clone for RawConfig {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            raw: self.raw.clone(),
            interpolations: self.interpolations.clone(),
            variables: self.variables.clone(),
            state: Mutex::new(self.resolution()),
        }
    }
}

impl PartialEq for RawConfig {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.raw == other.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::scope::UNKNOWN_VARIABLE_VALUE;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::thread;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn nginx() -> RawConfig {
        RawConfig::new(
            "package.nginx",
            yaml(
                r#"
version: '${lookup(var.versions, "nginx", "latest")}'
config: "/etc/nginx/${var.env}.conf"
ports: ["${var.ports}", 8443]
"#,
            ),
        )
        .unwrap()
    }

    fn bindings(env: &str) -> Bindings {
        let mut versions = IndexMap::new();
        versions.insert("nginx".to_string(), Value::from("1.25"));

        let mut b = Bindings::new();
        b.insert("versions", versions);
        b.insert("env", env);
        b.insert("ports", vec![80, 443]);
        b
    }

    #[test]
    fn test_discovery() {
        let raw = nginx();

        assert_eq!(raw.key(), "package.nginx");
        assert_eq!(raw.interpolations().len(), 3);
        assert_eq!(
            raw.variables().keys().cloned().collect::<Vec<_>>(),
            vec!["var.env", "var.ports", "var.versions"]
        );
    }

    #[test]
    fn test_null_body_is_empty_map() {
        let raw = RawConfig::new("file.empty", Value::Null).unwrap();
        assert_eq!(raw.raw(), &Value::Mapping(IndexMap::new()));
        assert!(raw.interpolations().is_empty());
    }

    #[test]
    fn test_dot_index_rejected_at_construction() {
        let err = RawConfig::new("package.x", yaml("v: \"${var.foo.bar}\"")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Reference);
        assert_eq!(err.path.as_deref(), Some("v"));
        assert!(err.to_string().contains("var.foo[\"key\"]"));
    }

    #[test]
    fn test_config_before_interpolation_is_raw() {
        let raw = nginx();
        assert_eq!(raw.config(), raw.raw().clone());
        assert!(raw.unknown_keys().is_empty());
        assert!(raw.resolution().is_none());
    }

    #[test]
    fn test_interpolate() {
        let raw = nginx();
        raw.interpolate(&bindings("prod")).unwrap();

        assert_eq!(
            raw.config(),
            yaml(
                r#"
version: "1.25"
config: /etc/nginx/prod.conf
ports: [80, 443, 8443]
"#
            )
        );
    }

    #[test]
    fn test_interpolate_is_idempotent_and_leaves_raw_alone() {
        let raw = nginx();
        let original = raw.raw().clone();

        raw.interpolate(&bindings("prod")).unwrap();
        let first = raw.resolution();
        raw.interpolate(&bindings("prod")).unwrap();

        assert_eq!(raw.resolution(), first);
        assert_eq!(raw.raw(), &original);
    }

    #[test]
    fn test_interpolate_again_with_new_bindings() {
        let raw = nginx();
        raw.interpolate(&bindings("prod")).unwrap();
        raw.interpolate(&bindings("dev")).unwrap();

        assert_eq!(
            raw.config().get_path("config").unwrap(),
            &Value::from("/etc/nginx/dev.conf")
        );
    }

    #[test]
    fn test_failed_pass_keeps_previous_resolution() {
        let raw = nginx();
        raw.interpolate(&bindings("prod")).unwrap();
        let before = raw.resolution();

        let err = raw.interpolate(&Bindings::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Reference);
        assert_eq!(raw.resolution(), before);

        // retry succeeds
        raw.interpolate(&bindings("dev")).unwrap();
    }

    #[test]
    fn test_unknown_keys() {
        let raw = nginx();
        let mut b = bindings("prod");
        b.insert_unknown("env");
        raw.interpolate(&b).unwrap();

        assert_eq!(raw.unknown_keys(), vec!["config"]);
        assert_eq!(
            raw.config().get_path("config").unwrap(),
            &Value::from(UNKNOWN_VARIABLE_VALUE)
        );
    }

    #[test]
    fn test_resolve_is_pure() {
        let raw = nginx();
        let resolution = raw.resolve(&bindings("prod")).unwrap();

        assert!(resolution.unknown_keys.is_empty());
        assert!(raw.resolution().is_none());
    }

    #[test]
    fn test_concurrent_interpolation() {
        let raw = Arc::new(nginx());
        let handles: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|env| {
                let raw = Arc::clone(&raw);
                thread::spawn(move || raw.interpolate(&bindings(env)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let config = raw.config();
        let path = config.get_path("config").unwrap().as_str().unwrap();
        assert!(["a", "b", "c", "d"]
            .iter()
            .any(|env| path == format!("/etc/nginx/{}.conf", env)));
    }

    #[test]
    fn test_clone_keeps_resolution() {
        let raw = nginx();
        raw.interpolate(&bindings("prod")).unwrap();
        let copy = raw.clone();

        assert_eq!(copy.resolution(), raw.resolution());
        assert_eq!(copy, raw);
    }
}
