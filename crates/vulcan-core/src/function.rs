//! Functions callable from expressions
//!
//! Every function carries a [`Signature`]. Argument count and types are
//! checked by the registry before the function body runs, so built-ins can
//! destructure their arguments without re-validating them.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::value::Value;

/// The built-in registry, shared read-only by every scope that doesn't bring its own
static BUILTINS: OnceLock<FunctionRegistry> = OnceLock::new();

/// Parameter and return types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Int,
    Float,
    Bool,
    List,
    Map,
    Any,
}

impl ArgType {
    /// Whether a value can be passed for this type (ints widen to floats)
    fn accepts(self, value: &Value) -> bool {
        match self {
            ArgType::String => value.is_string(),
            ArgType::Int => matches!(value, Value::Integer(_)),
            ArgType::Float => matches!(value, Value::Float(_) | Value::Integer(_)),
            ArgType::Bool => matches!(value, Value::Bool(_)),
            ArgType::List => value.is_sequence(),
            ArgType::Map => value.is_mapping(),
            ArgType::Any => true,
        }
    }

    fn coerce(self, value: &Value) -> Value {
        match (self, value) {
            (ArgType::Float, Value::Integer(i)) => Value::Float(*i as f64),
            _ => value.clone(),
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArgType::String => "string",
            ArgType::Int => "int",
            ArgType::Float => "float",
            ArgType::Bool => "bool",
            ArgType::List => "list",
            ArgType::Map => "map",
            ArgType::Any => "any",
        };
        f.write_str(name)
    }
}

/// Declared parameters and return type of a function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<ArgType>,
    /// Type of any arguments past `params`; `None` means no extra arguments
    pub variadic: Option<ArgType>,
    pub returns: ArgType,
}

impl Signature {
    pub fn new(params: Vec<ArgType>, returns: ArgType) -> Self {
        Self {
            params,
            variadic: None,
            returns,
        }
    }

    /// Accept any number of trailing arguments of the given type
    pub fn with_variadic(mut self, arg: ArgType) -> Self {
        self.variadic = Some(arg);
        self
    }

    /// Check arguments against this signature, widening ints where a float is expected
    fn check(&self, func: &str, args: &[Value]) -> Result<Vec<Value>> {
        let arity_ok = match self.variadic {
            Some(_) => args.len() >= self.params.len(),
            None => args.len() == self.params.len(),
        };
        if !arity_ok {
            let expected = match self.variadic {
                Some(_) => format!("at least {}", self.params.len()),
                None => self.params.len().to_string(),
            };
            return Err(Error::type_error(format!(
                "{}: expected {} arguments, got {}",
                func,
                expected,
                args.len()
            )));
        }

        args.iter()
            .enumerate()
            .map(|(i, arg)| {
                let expected = self
                    .params
                    .get(i)
                    .copied()
                    .or(self.variadic)
                    .unwrap_or(ArgType::Any);
                if !expected.accepts(arg) {
                    return Err(Error::type_error(format!(
                        "{}: argument {} should be type {}, got type {}",
                        func,
                        i + 1,
                        expected,
                        arg.type_name()
                    )));
                }
                Ok(expected.coerce(arg))
            })
            .collect()
    }
}

/// Trait for function implementations
pub trait Function: Send + Sync {
    /// Name used to call the function
    fn name(&self) -> &str;

    /// Parameter and return types
    fn signature(&self) -> &Signature;

    /// Run the function on already type-checked arguments
    fn call(&self, args: &[Value]) -> Result<Value>;
}

/// A simple closure-backed function
pub struct FnFunction<F>
where
    F: Fn(&[Value]) -> Result<Value> + Send + Sync,
{
    name: String,
    signature: Signature,
    func: F,
}

impl<F> FnFunction<F>
where
    F: Fn(&[Value]) -> Result<Value> + Send + Sync,
{
    pub fn new(name: impl Into<String>, signature: Signature, func: F) -> Self {
        Self {
            name: name.into(),
            signature,
            func,
        }
    }
}

impl<F> Function for FnFunction<F>
where
    F: Fn(&[Value]) -> Result<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn call(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args)
    }
}

/// Registry of callable functions
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn Function>>,
}

impl FunctionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in functions (abs, lookup, keys, values)
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_fn(
            "abs",
            Signature::new(vec![ArgType::Float], ArgType::Float),
            abs_function,
        );
        registry.register_fn(
            "lookup",
            Signature::new(vec![ArgType::Map, ArgType::String], ArgType::String)
                .with_variadic(ArgType::String),
            lookup_function,
        );
        registry.register_fn(
            "keys",
            Signature::new(vec![ArgType::Map], ArgType::List),
            keys_function,
        );
        registry.register_fn(
            "values",
            Signature::new(vec![ArgType::Map], ArgType::List),
            values_function,
        );
        registry
    }

    /// The process-wide built-in registry
    pub fn builtins() -> &'static FunctionRegistry {
        BUILTINS.get_or_init(Self::with_builtins)
    }

    /// Register a function, replacing any function with the same name
    pub fn register(&mut self, function: Arc<dyn Function>) {
        self.functions
            .insert(function.name().to_string(), function);
    }

    /// Register a closure as a function
    pub fn register_fn<F>(&mut self, name: impl Into<String>, signature: Signature, func: F)
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnFunction::new(name, signature, func)));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Function>> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered function names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Check arguments against the function's signature, then call it
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| Error::eval(format!("unknown function called: {}", name)))?;

        let signature = function.signature();
        let args = signature.check(name, args)?;
        let result = function.call(&args)?;
        if !signature.returns.accepts(&result) {
            return Err(Error::internal(format!(
                "{}: returned type {}, declared {}",
                name,
                result.type_name(),
                signature.returns
            )));
        }
        Ok(result)
    }
}

fn map_arg<'a>(args: &'a [Value], func: &str) -> Result<&'a IndexMap<String, Value>> {
    args.first()
        .and_then(Value::as_mapping)
        .ok_or_else(|| Error::internal(format!("{}: map argument missing after check", func)))
}

/// `abs(float)`
fn abs_function(args: &[Value]) -> Result<Value> {
    match args.first() {
        Some(Value::Float(f)) => Ok(Value::Float(f.abs())),
        _ => Err(Error::internal("abs: float argument missing after check")),
    }
}

/// `lookup(map, key[, default])`
fn lookup_function(args: &[Value]) -> Result<Value> {
    if args.len() > 3 {
        return Err(Error::type_error(
            "lookup() takes no more than three arguments",
        ));
    }

    let map = map_arg(args, "lookup")?;
    let key = args.get(1).and_then(Value::as_str).unwrap_or_default();

    match map.get(key) {
        Some(Value::String(s)) => Ok(Value::String(s.clone())),
        Some(other) => Err(Error::type_error(format!(
            "lookup() may only be used with flat maps, this map contains elements of type {}",
            other.type_name()
        ))),
        None => match args.get(2) {
            Some(default) => Ok(default.clone()),
            None => Err(Error::eval(format!("lookup failed to find '{}'", key))),
        },
    }
}

fn sorted_entries(map: &IndexMap<String, Value>) -> Vec<(&String, &Value)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

/// `keys(map)`: keys in ascending order
fn keys_function(args: &[Value]) -> Result<Value> {
    let map = map_arg(args, "keys")?;
    Ok(Value::Sequence(
        sorted_entries(map)
            .into_iter()
            .map(|(k, _)| Value::String(k.clone()))
            .collect(),
    ))
}

/// `values(map)`: values ordered by their keys
fn values_function(args: &[Value]) -> Result<Value> {
    let map = map_arg(args, "values")?;
    sorted_entries(map)
        .into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => Ok(Value::String(s.clone())),
            other => Err(Error::type_error(format!(
                "values(): '{}' has element with bad type {}",
                k,
                other.type_name()
            ))),
        })
        .collect::<Result<Vec<_>>>()
        .map(Value::Sequence)
}
