//! Variable bindings and expression evaluation
//!
//! A [`Scope`] pairs the bound variable values with a function registry and
//! evaluates parsed templates against them. Variables bound to
//! [`UNKNOWN_VARIABLE_VALUE`] evaluate to [`Evaluated::Unknown`], which
//! propagates through every operation that touches it.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::expression::{ArithmeticOp, Expr, Literal, Template, TemplatePart};
use crate::function::FunctionRegistry;
use crate::reference::InterpolatedVariable;
use crate::value::Value;

/// Sentinel stored in place of a value that isn't known yet
pub const UNKNOWN_VARIABLE_VALUE: &str = "74D93920-ED26-11E3-AC10-0800200C9A66";

/// Result of evaluating an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluated {
    Known(Value),
    Unknown,
}

impl Evaluated {
    fn from_value(value: Value) -> Self {
        if is_unknown_sentinel(&value) {
            Evaluated::Unknown
        } else {
            Evaluated::Known(value)
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Evaluated::Unknown)
    }

    /// The value, with unknowns replaced by the sentinel string
    pub fn into_value(self) -> Value {
        match self {
            Evaluated::Known(value) => value,
            Evaluated::Unknown => Value::String(UNKNOWN_VARIABLE_VALUE.to_string()),
        }
    }
}

fn is_unknown_sentinel(value: &Value) -> bool {
    value.as_str() == Some(UNKNOWN_VARIABLE_VALUE)
}

/// Check whether a value is, or contains, the unknown sentinel
pub fn contains_unknown(value: &Value) -> bool {
    match value {
        Value::String(s) => s == UNKNOWN_VARIABLE_VALUE,
        Value::Sequence(seq) => seq.iter().any(contains_unknown),
        Value::Mapping(map) => map.values().any(contains_unknown),
        _ => false,
    }
}

/// Values bound to variable names
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    values: IndexMap<String, Value>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value, replacing any previous binding
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Bind a variable whose value isn't known yet
    pub fn insert_unknown(&mut self, name: impl Into<String>) {
        self.insert(name, UNKNOWN_VARIABLE_VALUE);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn is_unknown(&self, name: &str) -> bool {
        self.values.get(name).is_some_and(is_unknown_sentinel)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut bindings = Bindings::new();
        for (name, value) in iter {
            bindings.insert(name, value);
        }
        bindings
    }
}

impl<K: Into<String>, V: Into<Value>> Extend<(K, V)> for Bindings {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}

/// Evaluation environment: variables as `var.<name>` plus callable functions
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    bindings: &'a Bindings,
    functions: &'a FunctionRegistry,
}

impl<'a> Scope<'a> {
    pub fn new(bindings: &'a Bindings, functions: &'a FunctionRegistry) -> Self {
        Self {
            bindings,
            functions,
        }
    }

    /// Scope over the built-in functions
    pub fn with_builtins(bindings: &'a Bindings) -> Self {
        Self::new(bindings, FunctionRegistry::builtins())
    }

    /// Look up a variable by its full key (`var.<name>`)
    pub fn lookup(&self, key: &str) -> Result<&'a Value> {
        let InterpolatedVariable::User(var) = InterpolatedVariable::new(key)?;
        self.bindings
            .get(&var.name)
            .ok_or_else(|| Error::unknown_variable(key))
    }

    /// Evaluate a whole template
    ///
    /// A template that is exactly one interpolation keeps the type of its
    /// value; anything else renders to a string.
    pub fn eval_template(&self, template: &Template) -> Result<Evaluated> {
        if let Some(expr) = template.single_expression() {
            return self.eval(expr);
        }

        let mut out = String::new();
        let mut unknown = false;
        for part in template.parts() {
            match part {
                TemplatePart::Literal(text) => out.push_str(text),
                TemplatePart::Interpolation(expr) => match self.eval(expr)? {
                    Evaluated::Unknown => unknown = true,
                    Evaluated::Known(value) => out.push_str(&render(&value, expr)?),
                },
            }
        }

        if unknown {
            return Ok(Evaluated::Unknown);
        }
        Ok(Evaluated::Known(Value::String(out)))
    }

    /// Evaluate a single expression
    pub fn eval(&self, expr: &Expr) -> Result<Evaluated> {
        match expr {
            Expr::Literal(literal) => Ok(Evaluated::Known(match literal {
                Literal::String(s) => Value::String(s.clone()),
                Literal::Integer(i) => Value::Integer(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Bool(b) => Value::Bool(*b),
            })),
            Expr::VariableAccess { name } => {
                let value = self.lookup(name)?;
                Ok(Evaluated::from_value(value.clone()))
            }
            Expr::Index { target, key } => {
                let (Evaluated::Known(target_value), Evaluated::Known(key_value)) =
                    (self.eval(target)?, self.eval(key)?)
                else {
                    return Ok(Evaluated::Unknown);
                };
                index(&target_value, &key_value, target).map(Evaluated::from_value)
            }
            Expr::Call { func, args } => {
                let mut values = Vec::with_capacity(args.len());
                let mut unknown = false;
                for arg in args {
                    match self.eval(arg)? {
                        Evaluated::Known(value) => values.push(value),
                        Evaluated::Unknown => unknown = true,
                    }
                }
                if unknown {
                    return Ok(Evaluated::Unknown);
                }
                self.functions
                    .call(func, &values)
                    .map(Evaluated::from_value)
            }
            Expr::Arithmetic { op, left, right } => {
                let (Evaluated::Known(l), Evaluated::Known(r)) =
                    (self.eval(left)?, self.eval(right)?)
                else {
                    return Ok(Evaluated::Unknown);
                };
                arithmetic(*op, &l, &r).map(Evaluated::Known)
            }
            Expr::Negate(inner) => match self.eval(inner)? {
                Evaluated::Unknown => Ok(Evaluated::Unknown),
                Evaluated::Known(Value::Integer(i)) => i
                    .checked_neg()
                    .map(|n| Evaluated::Known(Value::Integer(n)))
                    .ok_or_else(|| Error::eval("integer overflow")),
                Evaluated::Known(Value::Float(f)) => Ok(Evaluated::Known(Value::Float(-f))),
                Evaluated::Known(other) => Err(Error::type_error(format!(
                    "cannot negate a value of type {}",
                    other.type_name()
                ))),
            },
        }
    }
}

/// Render a value for string concatenation
fn render(value: &Value, expr: &Expr) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Integer(_) | Value::Float(_) | Value::Bool(_) => Ok(value.to_string()),
        other => Err(Error::type_error(format!(
            "'{}' is a {} and cannot be embedded in a string",
            expr,
            other.type_name()
        ))),
    }
}

fn index(target: &Value, key: &Value, target_expr: &Expr) -> Result<Value> {
    match (target, key) {
        (Value::Sequence(seq), Value::Integer(i)) => usize::try_from(*i)
            .ok()
            .and_then(|i| seq.get(i))
            .cloned()
            .ok_or_else(|| {
                Error::eval(format!(
                    "index {} out of range for list {} (length {})",
                    i,
                    target_expr,
                    seq.len()
                ))
            }),
        (Value::Sequence(_), other) => Err(Error::type_error(format!(
            "list {} must be indexed by an int, got {}",
            target_expr,
            other.type_name()
        ))),
        (Value::Mapping(map), Value::String(k)) => map.get(k).cloned().ok_or_else(|| {
            Error::eval(format!(
                "key \"{}\" does not exist in map {}",
                k, target_expr
            ))
        }),
        (Value::Mapping(_), other) => Err(Error::type_error(format!(
            "map {} must be indexed by a string, got {}",
            target_expr,
            other.type_name()
        ))),
        (other, _) => Err(Error::type_error(format!(
            "{} is a {} and cannot be indexed",
            target_expr,
            other.type_name()
        ))),
    }
}

fn arithmetic(op: ArithmeticOp, left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Integer(l), Value::Integer(r)) => {
            let (l, r) = (*l, *r);
            if matches!(op, ArithmeticOp::Div | ArithmeticOp::Mod) && r == 0 {
                return Err(Error::eval("divide by zero"));
            }
            let result = match op {
                ArithmeticOp::Add => l.checked_add(r),
                ArithmeticOp::Sub => l.checked_sub(r),
                ArithmeticOp::Mul => l.checked_mul(r),
                ArithmeticOp::Div => l.checked_div(r),
                ArithmeticOp::Mod => l.checked_rem(r),
            };
            result
                .map(Value::Integer)
                .ok_or_else(|| Error::eval("integer overflow"))
        }
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            let (l, r) = (left.as_f64().unwrap_or_default(), right.as_f64().unwrap_or_default());
            match op {
                ArithmeticOp::Add => Ok(Value::Float(l + r)),
                ArithmeticOp::Sub => Ok(Value::Float(l - r)),
                ArithmeticOp::Mul => Ok(Value::Float(l * r)),
                ArithmeticOp::Div if r == 0.0 => Err(Error::eval("divide by zero")),
                ArithmeticOp::Div => Ok(Value::Float(l / r)),
                ArithmeticOp::Mod => Err(Error::type_error("modulo requires int operands")),
            }
        }
        _ => Err(Error::type_error(format!(
            "arithmetic requires numeric operands, got {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn bindings() -> Bindings {
        let mut versions = IndexMap::new();
        versions.insert("nginx".to_string(), Value::from("1.25"));
        versions.insert("redis".to_string(), Value::from("7.2"));

        let mut b = Bindings::new();
        b.insert("region", "eu-west-1");
        b.insert("ports", vec![80, 443]);
        b.insert("versions", versions);
        b.insert("count", 3);
        b.insert_unknown("ami");
        b
    }

    fn eval(input: &str) -> Result<Evaluated> {
        let b = bindings();
        let template = Template::parse(input).unwrap();
        Scope::with_builtins(&b).eval_template(&template)
    }

    fn known(input: &str) -> Value {
        match eval(input).unwrap() {
            Evaluated::Known(value) => value,
            Evaluated::Unknown => panic!("{} evaluated to unknown", input),
        }
    }

    #[test]
    fn test_variable_access_keeps_type() {
        assert_eq!(known("${var.region}"), Value::from("eu-west-1"));
        assert_eq!(known("${var.ports}"), Value::from(vec![80, 443]));
        assert!(known("${var.versions}").is_mapping());
    }

    #[test]
    fn test_concatenation_renders_scalars() {
        assert_eq!(
            known("${var.region}-${var.count}:${var.ports[1]}/${true}"),
            Value::from("eu-west-1-3:443/true")
        );
    }

    #[test]
    fn test_concatenation_rejects_list() {
        let err = eval("ports: ${var.ports}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
        assert!(err.to_string().contains("var.ports"));
    }

    #[test]
    fn test_unbound_variable() {
        let err = eval("${var.missing}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Reference);
        assert!(err.to_string().contains("unknown variable accessed: var.missing"));
    }

    #[test]
    fn test_unknown_propagates() {
        assert_eq!(eval("${var.ami}").unwrap(), Evaluated::Unknown);
        assert_eq!(eval("ami-${var.ami}").unwrap(), Evaluated::Unknown);
        assert_eq!(eval("${var.ami[0]}").unwrap(), Evaluated::Unknown);
        assert_eq!(eval("${var.count + var.ami}").unwrap(), Evaluated::Unknown);
        assert_eq!(
            eval(r#"${lookup(var.versions, var.ami)}"#).unwrap(),
            Evaluated::Unknown
        );
    }

    #[test]
    fn test_unknown_argument_skips_call() {
        // would fail the type check if the function ran
        assert_eq!(eval("${abs(var.ami)}").unwrap(), Evaluated::Unknown);
    }

    #[test]
    fn test_index() {
        assert_eq!(known("${var.ports[0]}"), Value::Integer(80));
        assert_eq!(known(r#"${var.versions["redis"]}"#), Value::from("7.2"));
        assert_eq!(known(r#"${keys(var.versions)[1]}"#), Value::from("redis"));
    }

    #[test]
    fn test_index_errors() {
        let err = eval("${var.ports[2]}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Eval);
        assert!(err.to_string().contains("out of range"));

        assert_eq!(eval("${var.ports[-1]}").unwrap_err().kind, ErrorKind::Eval);
        assert_eq!(
            eval(r#"${var.versions["mysql"]}"#).unwrap_err().kind,
            ErrorKind::Eval
        );
        assert_eq!(eval(r#"${var.ports["a"]}"#).unwrap_err().kind, ErrorKind::Type);
        assert_eq!(eval("${var.versions[0]}").unwrap_err().kind, ErrorKind::Type);
        assert_eq!(eval("${var.region[0]}").unwrap_err().kind, ErrorKind::Type);
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(known("${var.count * 2 + 1}"), Value::Integer(7));
        assert_eq!(known("${7 / 2}"), Value::Integer(3));
        assert_eq!(known("${7 % 4}"), Value::Integer(3));
        assert_eq!(known("${1 + 0.5}"), Value::Float(1.5));
        assert_eq!(known("${-var.count}"), Value::Integer(-3));
        assert_eq!(known("${abs(1 - var.count)}"), Value::Float(2.0));
    }

    #[test]
    fn test_arithmetic_errors() {
        assert_eq!(eval("${1 / 0}").unwrap_err().kind, ErrorKind::Eval);
        assert_eq!(eval("${1 % 0}").unwrap_err().kind, ErrorKind::Eval);
        assert_eq!(eval("${1.5 % 1}").unwrap_err().kind, ErrorKind::Type);
        assert_eq!(eval("${var.region + 1}").unwrap_err().kind, ErrorKind::Type);
        assert_eq!(eval("${-var.region}").unwrap_err().kind, ErrorKind::Type);
    }

    #[test]
    fn test_custom_registry() {
        let mut registry = FunctionRegistry::new();
        registry.register_fn(
            "double",
            crate::function::Signature::new(
                vec![crate::function::ArgType::Int],
                crate::function::ArgType::Int,
            ),
            |args| Ok(Value::Integer(args[0].as_i64().unwrap_or_default() * 2)),
        );
        let b = bindings();
        let scope = Scope::new(&b, &registry);
        let template = Template::parse("${double(var.count)}").unwrap();

        assert_eq!(
            scope.eval_template(&template).unwrap(),
            Evaluated::Known(Value::Integer(6))
        );
        // builtins aren't part of a fresh registry
        let template = Template::parse("${abs(1)}").unwrap();
        assert!(scope.eval_template(&template).is_err());
    }

    #[test]
    fn test_bindings() {
        let b: Bindings = vec![("a", "1"), ("b", "2")].into_iter().collect();
        assert_eq!(b.len(), 2);
        assert!(b.contains("a"));
        assert!(!b.is_unknown("a"));

        let b = bindings();
        assert!(b.is_unknown("ami"));
        assert_eq!(
            Evaluated::Unknown.into_value(),
            Value::from(UNKNOWN_VARIABLE_VALUE)
        );
    }

    #[test]
    fn test_contains_unknown() {
        assert!(contains_unknown(&Value::from(vec![
            Value::from("a"),
            Value::from(UNKNOWN_VARIABLE_VALUE),
        ])));
        assert!(!contains_unknown(&Value::from(vec!["a"])));
    }
}
