//! Variable references found in expressions
//!
//! Only user variables (`var.<name>`) can be referenced. Values nested inside
//! a map or list variable are reached with bracket indexing, never with a
//! further dot: `var.tags["env"]`, not `var.tags.env`.

use std::fmt;

use crate::error::{Error, Result};
use crate::expression::Expr;

const USER_PREFIX: &str = "var.";

/// A variable referenced from an interpolation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpolatedVariable {
    /// A user variable (`var.<name>`)
    User(UserVariable),
}

/// Reference to a user-declared variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserVariable {
    /// The variable name without the `var.` prefix
    pub name: String,
    /// Reserved; always empty
    pub elem: String,
    /// The reference as written
    pub key: String,
}

impl InterpolatedVariable {
    /// Classify a dotted reference by its prefix
    pub fn new(key: &str) -> Result<Self> {
        if key.starts_with(USER_PREFIX) {
            return UserVariable::new(key).map(InterpolatedVariable::User);
        }
        Err(Error::unsupported_reference(key))
    }

    /// Canonical identity used for deduplication and scope lookup
    pub fn full_key(&self) -> String {
        match self {
            InterpolatedVariable::User(v) => v.full_key(),
        }
    }
}

impl fmt::Display for InterpolatedVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_key())
    }
}

impl UserVariable {
    /// Parse a `var.<name>` reference
    pub fn new(key: &str) -> Result<Self> {
        let rest = key
            .strip_prefix(USER_PREFIX)
            .ok_or_else(|| Error::unsupported_reference(key))?;

        let (name, elem) = match rest.split_once('.') {
            Some((name, elem)) => (name, Some(elem)),
            None => (rest, None),
        };

        if name.is_empty() {
            return Err(Error::unsupported_reference(key));
        }
        if let Some(elem) = elem {
            return Err(Error::dot_index(name, elem));
        }

        Ok(Self {
            name: name.to_string(),
            elem: String::new(),
            key: key.to_string(),
        })
    }

    pub fn full_key(&self) -> String {
        format!("{}{}", USER_PREFIX, self.name)
    }
}

/// Collect the variable references made by an expression
///
/// Both a bare access and an index whose target is an access report the
/// variable, so the same reference may appear more than once.
pub fn detect_variables(expr: &Expr) -> Result<Vec<InterpolatedVariable>> {
    let mut found = Vec::new();
    let mut error = None;

    expr.accept(&mut |node| {
        if error.is_some() {
            return;
        }
        let key = match node {
            Expr::VariableAccess { name } => name,
            Expr::Index { target, .. } => match target.as_ref() {
                Expr::VariableAccess { name } => name,
                _ => return,
            },
            _ => return,
        };
        match InterpolatedVariable::new(key) {
            Ok(var) => found.push(var),
            Err(e) => error = Some(e),
        }
    });

    match error {
        Some(e) => Err(e),
        None => Ok(found),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::expression::parse;

    fn detect(input: &str) -> Result<Vec<String>> {
        let template = parse(input).unwrap();
        let mut keys = Vec::new();
        for expr in template.expressions() {
            for var in detect_variables(expr)? {
                keys.push(var.full_key());
            }
        }
        Ok(keys)
    }

    #[test]
    fn test_user_variable_new() {
        let var = UserVariable::new("var.region").unwrap();
        assert_eq!(var.name, "region");
        assert_eq!(var.elem, "");
        assert_eq!(var.key, "var.region");
        assert_eq!(var.full_key(), "var.region");
    }

    #[test]
    fn test_detect_bare_access() {
        assert_eq!(detect("${var.region}").unwrap(), vec!["var.region"]);
    }

    #[test]
    fn test_detect_index_reports_twice() {
        assert_eq!(
            detect(r#"${var.tags["env"]}"#).unwrap(),
            vec!["var.tags", "var.tags"]
        );
    }

    #[test]
    fn test_detect_inside_calls() {
        assert_eq!(
            detect(r#"${lookup(var.versions, var.name)} on ${var.host}"#).unwrap(),
            vec!["var.versions", "var.name", "var.host"]
        );
    }

    #[test]
    fn test_detect_none() {
        assert!(detect(r#"${abs(-1)}"#).unwrap().is_empty());
    }

    #[test]
    fn test_dot_index_is_rejected() {
        let err = detect("${var.foo.bar}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Reference);
        let display = err.to_string();
        assert!(display.contains("var.foo.bar"));
        assert!(display.contains("var.foo[\"key\"]"));
        assert!(display.contains("var.foo[1]"));
    }

    #[test]
    fn test_unsupported_prefix() {
        let err = detect("${self.path}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Reference);
        assert!(err.to_string().contains("unsupported variable reference: 'self.path'"));

        assert!(InterpolatedVariable::new("var.").is_err());
        assert!(InterpolatedVariable::new("region").is_err());
    }
}
