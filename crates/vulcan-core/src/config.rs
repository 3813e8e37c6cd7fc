//! The merged configuration
//!
//! A [`Config`] holds everything declared across the loaded files: input
//! variables, file blocks and resources grouped by kind. Each file block and
//! resource owns a [`RawConfig`] over its body, so the whole config can be
//! interpolated once variable values are known.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::error::{Error, Result};
use crate::raw_config::RawConfig;
use crate::scope::Bindings;
use crate::value::Value;
use crate::variable::Variable;

/// Default pattern every declared name must match
pub const DEFAULT_NAME_PATTERN: &str = r"(?i)^[A-Z0-9_][A-Z0-9\-_]*$";

static DEFAULT_NAME_REGEX: OnceLock<Regex> = OnceLock::new();

/// Pattern that declared names (variables, files, resources) must match
#[derive(Debug, Clone)]
pub struct NameGrammar {
    regex: Regex,
}

impl NameGrammar {
    /// Compile a custom name pattern
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::parse(format!("invalid name pattern '{}': {}", pattern, e)))?;
        Ok(Self { regex })
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Fail with a name error if `name` doesn't match
    pub fn check(&self, block: &str, name: &str) -> Result<()> {
        if self.is_match(name) {
            Ok(())
        } else {
            Err(Error::invalid_name(block, name, self.as_str()))
        }
    }
}

impl Default for NameGrammar {
    fn default() -> Self {
        let regex = DEFAULT_NAME_REGEX
            .get_or_init(|| Regex::new(DEFAULT_NAME_PATTERN).expect("default name pattern compiles"))
            .clone();
        Self { regex }
    }
}

/// A named resource of some kind, such as `package.nginx`
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub kind: String,
    pub name: String,
    /// The body as declared, without `depends_on`
    pub keys: Value,
    pub raw_config: RawConfig,
    /// Names this resource explicitly depends on
    pub depends_on: Vec<String>,
    /// File the resource was declared in
    pub source: String,
}

impl Resource {
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        keys: Value,
        depends_on: Vec<String>,
        source: impl Into<String>,
    ) -> Result<Self> {
        let kind = kind.into();
        let name = name.into();
        let id = format!("{}.{}", kind, name);
        let raw_config = RawConfig::new(id.clone(), keys).map_err(|e| e.within(&id))?;

        Ok(Self {
            kind,
            name,
            keys: raw_config.raw().clone(),
            raw_config,
            depends_on,
            source: source.into(),
        })
    }

    /// `<kind>.<name>`
    pub fn id(&self) -> String {
        format!("{}.{}", self.kind, self.name)
    }

    /// The resolved body, or the declared body before interpolation
    pub fn config(&self) -> Value {
        self.raw_config.config()
    }
}

/// A file to be written to the host
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    pub name: String,
    pub destination: String,
    pub content: Option<String>,
    pub user: Option<String>,
    pub group: Option<String>,
    pub mode: Option<String>,
    pub raw_config: RawConfig,
    pub source: String,
}

impl File {
    /// Keys allowed in a file block
    pub const VALID_KEYS: [&'static str; 5] = ["destination", "content", "user", "group", "mode"];

    /// Build a file block from its body
    ///
    /// `destination` is required; the other fields are optional scalars.
    pub fn from_body(name: impl Into<String>, body: Value, source: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let id = format!("file.{}", name);
        let block = format!("file[{}]", name);

        let map = body
            .as_mapping()
            .ok_or_else(|| Error::not_a_block(&block, body.type_name()).with_path(&id))?;
        let field = |key: &str| -> Result<Option<String>> {
            match map.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(v @ (Value::Integer(_) | Value::Float(_) | Value::Bool(_))) => {
                    Ok(Some(v.to_string()))
                }
                Some(_) => Err(Error::invalid_value(&block, key, "a string")
                    .with_path(format!("{}.{}", id, key))),
            }
        };

        let destination = field("destination")?.ok_or_else(|| {
            Error::invalid_value(&block, "destination", "set").with_path(&id)
        })?;
        let content = field("content")?;
        let user = field("user")?;
        let group = field("group")?;
        let mode = field("mode")?;

        let raw_config = RawConfig::new(id.clone(), body).map_err(|e| e.within(&id))?;

        Ok(Self {
            name,
            destination,
            content,
            user,
            group,
            mode,
            raw_config,
            source: source.into(),
        })
    }

    /// `file.<name>`
    pub fn id(&self) -> String {
        format!("file.{}", self.name)
    }

    pub fn config(&self) -> Value {
        self.raw_config.config()
    }
}

/// Everything declared across a set of config files
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// Absolute directory the config was loaded from
    pub dir: Option<PathBuf>,
    /// Loaded files, in load order
    pub sources: Vec<PathBuf>,
    pub files: Vec<File>,
    pub variables: Vec<Variable>,
    /// Resources grouped by kind, kinds in first-seen order
    pub resources: IndexMap<String, Vec<Resource>>,
    /// Top-level keys that weren't understood
    pub unknown_keys: Vec<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold another config into this one
    ///
    /// Resources and file blocks accumulate; declaring the same one twice is
    /// an error. A variable declared again replaces the earlier declaration.
    pub fn merge(mut self, other: Config) -> Result<Config> {
        for var in other.variables {
            match self.variables.iter_mut().find(|v| v.name == var.name) {
                Some(existing) => {
                    log::warn!("variable '{}' is declared again; the later declaration wins", var.name);
                    *existing = var;
                }
                None => self.variables.push(var),
            }
        }

        for file in other.files {
            if self.file(&file.name).is_some() {
                return Err(Error::duplicate_name("file", &file.name)
                    .with_path(file.id())
                    .in_file(&file.source));
            }
            self.files.push(file);
        }

        for (kind, resources) in other.resources {
            for resource in resources {
                if self.resource(&kind, &resource.name).is_some() {
                    return Err(Error::duplicate_name(&kind, &resource.name)
                        .with_path(resource.id())
                        .in_file(&resource.source));
                }
                self.resources.entry(kind.clone()).or_default().push(resource);
            }
        }

        self.unknown_keys.extend(other.unknown_keys);
        self.sources.extend(other.sources);
        if other.dir.is_some() {
            self.dir = other.dir;
        }
        Ok(self)
    }

    /// Check names and variable types across the whole config
    pub fn validate(&mut self) -> Result<()> {
        self.validate_with(&NameGrammar::default())
    }

    /// Check names against a custom grammar, then variable types
    pub fn validate_with(&mut self, grammar: &NameGrammar) -> Result<()> {
        let mut seen = HashSet::new();
        for var in &self.variables {
            grammar.check("variable", &var.name)?;
            if !seen.insert(var.name.as_str()) {
                return Err(Error::duplicate_name("variable", &var.name));
            }
        }

        let mut seen = HashSet::new();
        for file in &self.files {
            grammar
                .check("file", &file.name)
                .map_err(|e| e.in_file(&file.source))?;
            if !seen.insert(file.name.as_str()) {
                return Err(Error::duplicate_name("file", &file.name).in_file(&file.source));
            }
        }

        for (kind, resources) in &self.resources {
            let mut seen = HashSet::new();
            for resource in resources {
                grammar
                    .check(kind, &resource.name)
                    .map_err(|e| e.in_file(&resource.source))?;
                if !seen.insert(resource.name.as_str()) {
                    return Err(Error::duplicate_name(kind, &resource.name)
                        .in_file(&resource.source));
                }
            }
        }

        for var in &mut self.variables {
            var.validate_type_and_default()
                .map_err(|e| e.within(&format!("variable.{}", var.name)))?;
        }
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn file(&self, name: &str) -> Option<&File> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Resources of one kind, in load order
    pub fn resources_of(&self, kind: &str) -> &[Resource] {
        self.resources.get(kind).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn resource(&self, kind: &str, name: &str) -> Option<&Resource> {
        self.resources_of(kind).iter().find(|r| r.name == name)
    }

    /// Bindings from variable defaults
    ///
    /// A variable without a default is bound as unknown.
    pub fn default_bindings(&self) -> Bindings {
        let mut bindings = Bindings::new();
        for var in &self.variables {
            match &var.default {
                Some(default) => bindings.insert(var.name.clone(), default.clone()),
                None => bindings.insert_unknown(var.name.clone()),
            }
        }
        bindings
    }

    /// Interpolate every file block and resource
    pub fn interpolate(&self, bindings: &Bindings) -> Result<()> {
        log::trace!("interpolating with {} bindings", bindings.len());
        for file in &self.files {
            file.raw_config
                .interpolate(bindings)
                .map_err(|e| e.within(&file.id()).in_file(&file.source))?;
        }
        for resource in self.resources.values().flatten() {
            resource
                .raw_config
                .interpolate(bindings)
                .map_err(|e| e.within(&resource.id()).in_file(&resource.source))?;
        }
        Ok(())
    }

    /// Paths left unknown by the last interpolation, as `<block>: <path>`
    pub fn unresolved_keys(&self) -> Vec<String> {
        let files = self.files.iter().map(|f| (f.id(), &f.raw_config));
        let resources = self
            .resources
            .values()
            .flatten()
            .map(|r| (r.id(), &r.raw_config));

        files
            .chain(resources)
            .flat_map(|(id, raw)| {
                raw.unknown_keys()
                    .into_iter()
                    .map(move |path| format!("{}: {}", id, path))
            })
            .collect()
    }

    /// Export the config as a value tree using each block's current body
    pub fn to_value(&self) -> Value {
        let mut root = IndexMap::new();

        if !self.variables.is_empty() {
            let variables = self
                .variables
                .iter()
                .map(|v| (v.name.clone(), variable_value(v)))
                .collect();
            root.insert("variable".to_string(), Value::Mapping(variables));
        }

        if !self.files.is_empty() {
            let files = self
                .files
                .iter()
                .map(|f| (f.name.clone(), f.config()))
                .collect();
            root.insert("file".to_string(), Value::Mapping(files));
        }

        for (kind, resources) in &self.resources {
            let bodies = resources
                .iter()
                .map(|r| {
                    let mut body = match r.config() {
                        Value::Mapping(map) => map,
                        _ => IndexMap::new(),
                    };
                    if !r.depends_on.is_empty() {
                        body.insert("depends_on".to_string(), Value::from(r.depends_on.clone()));
                    }
                    (r.name.clone(), Value::Mapping(body))
                })
                .collect();
            root.insert(kind.clone(), Value::Mapping(bodies));
        }

        Value::Mapping(root)
    }
}

fn variable_value(var: &Variable) -> Value {
    let mut map = IndexMap::new();
    if let Some(declared) = &var.declared_type {
        map.insert("type".to_string(), Value::from(declared.as_str()));
    }
    if let Some(default) = &var.default {
        map.insert("default".to_string(), default.clone());
    }
    if let Some(description) = &var.description {
        map.insert("description".to_string(), Value::from(description.as_str()));
    }
    Value::Mapping(map)
}
