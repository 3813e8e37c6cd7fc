//! vulcan-core: declarative config loading with variable interpolation
//!
//! This crate loads a directory of YAML/JSON config files describing
//! variables, file blocks and resources, merges them into one [`Config`],
//! and resolves the `${...}` expressions embedded in block bodies.
//!
//! # Example
//!
//! ```rust
//! use vulcan_core::loader::{parse_str, Format};
//! use vulcan_core::Value;
//!
//! let yaml = r#"
//! variable:
//!   region:
//!     default: eu-west-1
//! package:
//!   nginx:
//!     mirror: "https://${var.region}.mirror.example.com"
//! "#;
//!
//! let config = parse_str(yaml, Format::Yaml, "main.yaml").unwrap();
//! config.interpolate(&config.default_bindings()).unwrap();
//!
//! let nginx = config.resource("package", "nginx").unwrap();
//! assert_eq!(
//!     nginx.config().get_path("mirror").unwrap(),
//!     &Value::from("https://eu-west-1.mirror.example.com")
//! );
//! ```

pub mod error;
pub mod expression;
pub mod function;
pub mod loader;
pub mod reference;
pub mod scope;
pub mod value;
pub mod variable;
pub mod walker;

mod config;
mod raw_config;

pub use config::{Config, File, NameGrammar, Resource, DEFAULT_NAME_PATTERN};
pub use error::{Error, ErrorKind, Result};
pub use function::FunctionRegistry;
pub use loader::{load_dir, load_file, LoaderOptions};
pub use raw_config::{RawConfig, Resolution};
pub use scope::{Bindings, Evaluated, UNKNOWN_VARIABLE_VALUE};
pub use value::Value;
pub use variable::{Variable, VariableType};
