//! Error types for vulcan
//!
//! Errors are structured: a kind, the config path where the problem was found,
//! an optional source location, an underlying cause and an actionable hint.

use std::fmt;

use thiserror::Error as ThisError;

/// Result type alias for vulcan operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for vulcan operations
#[derive(Debug, Clone)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Path in the config where the error occurred (e.g., "package.nginx.version")
    pub path: Option<String>,
    /// Source location (file, line) if available
    pub source_location: Option<SourceLocation>,
    /// Actionable help message
    pub help: Option<String>,
    /// Underlying cause (as string for Clone compatibility)
    pub cause: Option<String>,
}

/// Location in a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl SourceLocation {
    /// Location naming only a file
    pub fn file(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
            column: None,
        }
    }
}

/// Categories of errors that can occur
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ErrorKind {
    /// Malformed config file or expression syntax
    #[error("Parse error")]
    Parse,
    /// A declared name does not match the name grammar, or is declared twice
    #[error("Invalid name")]
    Name,
    /// Unknown or forbidden keys, or a block with the wrong shape
    #[error("Schema error")]
    Schema,
    /// Declared vs. inferred type mismatch, or a function called with bad arguments
    #[error("Type error")]
    Type,
    /// Unsupported or malformed variable reference
    #[error("Reference error")]
    Reference,
    /// Expression evaluation failed at runtime
    #[error("Evaluation error")]
    Eval,
    /// No config files in the loaded directory
    #[error("No config files found in: {dir}")]
    NoConfigsFound { dir: String },
    /// I/O error (file not found, etc.)
    #[error("I/O error")]
    Io,
    /// Internal error (bug in vulcan)
    #[error("Internal error")]
    Internal,
}

impl Error {
    fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            path: None,
            source_location: None,
            help: None,
            cause: None,
        }
    }

    /// Create a new parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Parse)
        }
    }

    /// Create an error for a name that fails the name grammar
    pub fn invalid_name(block: &str, name: &str, pattern: &str) -> Self {
        Self {
            cause: Some(format!("'{}' name '{}' is not valid", block, name)),
            help: Some(format!("Names must match the regular expression: {}", pattern)),
            ..Self::new(ErrorKind::Name)
        }
    }

    /// Create an error for a name declared more than once within its kind
    pub fn duplicate_name(block: &str, name: &str) -> Self {
        Self {
            cause: Some(format!("{} '{}' is declared more than once", block, name)),
            help: Some("Names must be unique within each kind".into()),
            ..Self::new(ErrorKind::Name)
        }
    }

    /// Create a schema error for a block that is not a mapping
    pub fn not_a_block(block: &str, got: &str) -> Self {
        Self {
            cause: Some(format!("'{}' must be a configuration block, got {}", block, got)),
            ..Self::new(ErrorKind::Schema)
        }
    }

    /// Create a schema error listing every invalid key found in one block
    pub fn invalid_keys(block: &str, keys: &[String], valid: &[&str]) -> Self {
        let cause = keys
            .iter()
            .map(|k| format!("{}: invalid key: {}", block, k))
            .collect::<Vec<_>>()
            .join("\n  ");
        Self {
            cause: Some(cause),
            help: Some(format!("Valid keys are: {}", valid.join(", "))),
            ..Self::new(ErrorKind::Schema)
        }
    }

    /// Create a schema error for a key with a value of the wrong shape
    pub fn invalid_value(block: &str, key: &str, expected: &str) -> Self {
        Self {
            cause: Some(format!("{}: '{}' must be {}", block, key, expected)),
            ..Self::new(ErrorKind::Schema)
        }
    }

    /// Create an error for a variable declared with an unrecognized type
    pub fn invalid_variable_type(name: &str, declared: &str, valid: &[&str]) -> Self {
        Self {
            cause: Some(format!(
                "Variable '{}' type must be one of [{}] - '{}' is not a valid type",
                name,
                valid.join(", "),
                declared
            )),
            ..Self::new(ErrorKind::Type)
        }
    }

    /// Create an error for a default value that does not match the declared type
    pub fn type_mismatch(name: &str, declared: &str, inferred: &str) -> Self {
        Self {
            cause: Some(format!(
                "'{}' has a default value which is not of type '{}' (got '{}')",
                name, declared, inferred
            )),
            help: Some(format!(
                "Change the default to a {} or remove the declared type",
                declared
            )),
            ..Self::new(ErrorKind::Type)
        }
    }

    /// Create a type error for a bad function call or operand
    pub fn type_error(message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Type)
        }
    }

    /// Create an error for a reference prefix that is not supported
    pub fn unsupported_reference(key: &str) -> Self {
        Self {
            cause: Some(format!("unsupported variable reference: '{}'", key)),
            help: Some("Only user variables ('var.<name>') can be referenced".into()),
            ..Self::new(ErrorKind::Reference)
        }
    }

    /// Create an error for a `var.name.elem` reference
    pub fn dot_index(name: &str, elem: &str) -> Self {
        Self {
            cause: Some(format!("invalid dot index found: 'var.{}.{}'", name, elem)),
            help: Some(format!(
                "Values in maps and lists can be referenced using square bracket indexing, like: 'var.{}[\"key\"]' or 'var.{}[1]'",
                name, name
            )),
            ..Self::new(ErrorKind::Reference)
        }
    }

    /// Create an error for a variable that has no binding
    pub fn unknown_variable(key: &str) -> Self {
        Self {
            cause: Some(format!("unknown variable accessed: {}", key)),
            help: Some("Declare the variable or supply a value for it".into()),
            ..Self::new(ErrorKind::Reference)
        }
    }

    /// Create a runtime evaluation error
    pub fn eval(message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Eval)
        }
    }

    /// Create an error for a directory without config files
    pub fn no_configs_found(dir: impl Into<String>) -> Self {
        Self {
            help: Some("Add at least one .yaml, .yml or .json config file".into()),
            ..Self::new(ErrorKind::NoConfigsFound { dir: dir.into() })
        }
    }

    /// Create an I/O error
    pub fn io(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            source_location: Some(SourceLocation::file(path)),
            ..Self::new(ErrorKind::Io)
        }
    }

    /// Create an internal error (bug in vulcan)
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            help: Some("This is likely a bug in vulcan. Please report it.".into()),
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Internal)
        }
    }

    /// Add path context to the error
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Prefix the path with the block the error was found in
    pub fn within(mut self, block: &str) -> Self {
        self.path = Some(match self.path.take() {
            Some(path) => format!("{}.{}", block, path),
            None => block.to_string(),
        });
        self
    }

    /// Add source location to the error
    pub fn with_source_location(mut self, loc: SourceLocation) -> Self {
        self.source_location = Some(loc);
        self
    }

    /// Add the file name as source location, keeping any line info already present
    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        match &mut self.source_location {
            Some(loc) => loc.file = file.into(),
            None => self.source_location = Some(SourceLocation::file(file)),
        }
        self
    }

    /// Add help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if let Some(path) = &self.path {
            write!(f, "\n  Path: {}", path)?;
        }

        if let Some(loc) = &self.source_location {
            write!(f, "\n  File: {}", loc.file)?;
            if let Some(line) = loc.line {
                write!(f, ":{}", line)?;
                if let Some(column) = loc.column {
                    write!(f, ":{}", column)?;
                }
            }
        }

        if let Some(cause) = &self.cause {
            write!(f, "\n  {}", cause)?;
        }

        if let Some(help) = &self.help {
            write!(f, "\n  Help: {}", help)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_configs_found_display() {
        let err = Error::no_configs_found("/etc/vulcan");
        let display = format!("{}", err);

        assert!(display.contains("No config files found in: /etc/vulcan"));
        assert!(display.contains("Help:"));
        assert_eq!(
            err.kind,
            ErrorKind::NoConfigsFound {
                dir: "/etc/vulcan".into()
            }
        );
    }

    #[test]
    fn test_type_mismatch_names_both_types() {
        let err = Error::type_mismatch("region", "string", "list");
        let display = format!("{}", err);

        assert_eq!(err.kind, ErrorKind::Type);
        assert!(display.contains("not of type 'string' (got 'list')"));
    }

    #[test]
    fn test_dot_index_suggests_brackets() {
        let err = Error::dot_index("foo", "bar");
        let display = format!("{}", err);

        assert_eq!(err.kind, ErrorKind::Reference);
        assert!(display.contains("'var.foo.bar'"));
        assert!(display.contains("var.foo[\"key\"]"));
    }

    #[test]
    fn test_invalid_keys_aggregates_all_keys() {
        let err = Error::invalid_keys(
            "variable[region]",
            &["typo".into(), "extra".into()],
            &["type", "default", "description"],
        );
        let display = format!("{}", err);

        assert_eq!(err.kind, ErrorKind::Schema);
        assert!(display.contains("variable[region]: invalid key: typo"));
        assert!(display.contains("variable[region]: invalid key: extra"));
        assert!(display.contains("Valid keys are: type, default, description"));
    }

    #[test]
    fn test_with_source_location() {
        let err = Error::parse("syntax error").with_source_location(SourceLocation {
            file: "main.yaml".into(),
            line: Some(42),
            column: Some(7),
        });
        let display = format!("{}", err);

        assert!(display.contains("main.yaml:42:7"));
    }

    #[test]
    fn test_in_file_keeps_line() {
        let err = Error::parse("bad")
            .with_source_location(SourceLocation {
                file: String::new(),
                line: Some(3),
                column: None,
            })
            .in_file("base.yaml");

        let loc = err.source_location.unwrap();
        assert_eq!(loc.file, "base.yaml");
        assert_eq!(loc.line, Some(3));
    }

    #[test]
    fn test_within_prefixes_path() {
        let err = Error::eval("boom").with_path("ports[0]").within("package.nginx");
        assert_eq!(err.path.as_deref(), Some("package.nginx.ports[0]"));

        let err = Error::eval("boom").within("file.motd");
        assert_eq!(err.path.as_deref(), Some("file.motd"));
    }

    #[test]
    fn test_with_path_and_help() {
        let err = Error::eval("boom")
            .with_path("package.nginx.version")
            .with_help("Try again");
        let display = format!("{}", err);

        assert!(display.contains("Evaluation error"));
        assert!(display.contains("Path: package.nginx.version"));
        assert!(display.contains("Help: Try again"));
    }
}
