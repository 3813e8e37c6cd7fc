//! Loading config files from disk
//!
//! Every top-level key of a config file names a block type and maps block
//! names to bodies:
//!
//! ```yaml
//! variable:
//!   region:
//!     default: eu-west-1
//! file:
//!   motd:
//!     destination: /etc/motd
//!     content: "Welcome to ${var.region}"
//! package:
//!   nginx:
//!     version: "1.25"
//!     depends_on: [base]
//! ```
//!
//! `variable` and `file` are reserved; any other key is a resource kind.
//! A directory is loaded by reading each matching file in sorted order and
//! merging the results.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::Read;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::de::{self, Deserialize, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};

use crate::config::{Config, File, NameGrammar, Resource};
use crate::error::{Error, Result, SourceLocation};
use crate::value::Value;
use crate::variable::Variable;

/// Default upper bound for a single config file
pub const DEFAULT_MAX_FILE_SIZE: u64 = 8 * 1024 * 1024;

const VARIABLE_KEYS: [&str; 3] = ["type", "default", "description"];

/// Options controlling how config files are found and read
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// File extensions (without the dot) that are loaded from a directory
    pub extensions: Vec<String>,
    /// Files larger than this many bytes are rejected
    pub max_file_size: u64,
    /// Pattern that every declared name must match
    pub name_grammar: NameGrammar,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            extensions: vec!["yaml".into(), "yml".into(), "json".into()],
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            name_grammar: NameGrammar::default(),
        }
    }
}

/// Syntax of a config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

impl Format {
    /// `.json` files are JSON, everything else is YAML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

/// Load and merge every config file in a directory
pub fn load_dir(dir: impl AsRef<Path>) -> Result<Config> {
    load_dir_with_options(dir, &LoaderOptions::default())
}

/// Load and merge every config file in a directory with custom options
pub fn load_dir_with_options(dir: impl AsRef<Path>, options: &LoaderOptions) -> Result<Config> {
    let dir = dir.as_ref();
    let files = list_files(dir, options)?;
    if files.is_empty() {
        return Err(Error::no_configs_found(dir.display().to_string()));
    }

    let mut merged: Option<Config> = None;
    for file in &files {
        let config = load_file_with_options(file, options)?;
        merged = Some(match merged {
            Some(acc) => acc.merge(config)?,
            None => config,
        });
    }

    let mut config = merged.unwrap_or_default();
    config.dir = Some(
        std::path::absolute(dir)
            .map_err(|e| Error::io(dir.display().to_string(), e.to_string()))?,
    );
    Ok(config)
}

/// Load a single config file
pub fn load_file(path: impl AsRef<Path>) -> Result<Config> {
    load_file_with_options(path, &LoaderOptions::default())
}

/// Load a single config file with custom options
pub fn load_file_with_options(path: impl AsRef<Path>, options: &LoaderOptions) -> Result<Config> {
    let path = path.as_ref();
    let content = read_bounded(path, options.max_file_size)?;
    let mut config =
        parse_str_with_options(&content, Format::from_path(path), &path.display().to_string(), options)?;
    config.sources.push(path.to_path_buf());
    Ok(config)
}

/// Parse config text; `label` names the source in errors
pub fn parse_str(content: &str, format: Format, label: &str) -> Result<Config> {
    parse_str_with_options(content, format, label, &LoaderOptions::default())
}

/// Parse config text with custom options
pub fn parse_str_with_options(
    content: &str,
    format: Format,
    label: &str,
    options: &LoaderOptions,
) -> Result<Config> {
    let root = decode(content, format).map_err(|e| e.in_file(label))?;
    let root = match root {
        Value::Null => return Ok(Config::new()),
        Value::Mapping(map) => map,
        other => {
            return Err(Error::parse(format!(
                "file doesn't contain a root object, got {}",
                other.type_name()
            ))
            .in_file(label))
        }
    };

    check_unique_names(content, format).map_err(|e| e.in_file(label))?;

    let parser = FileParser { label, options };
    let mut config = Config::new();

    if let Some(block) = root.get("variable") {
        config.variables = parser.variables(block)?;
    }
    if let Some(block) = root.get("file") {
        config.files = parser.files(block)?;
    }

    for (kind, block) in &root {
        if kind == "variable" || kind == "file" {
            continue;
        }
        if !block.is_mapping() {
            log::warn!("{}: ignoring top-level key '{}': not a block", label, kind);
            config.unknown_keys.push(kind.clone());
            continue;
        }
        let resources = parser.resources(kind, block)?;
        config
            .resources
            .entry(kind.clone())
            .or_default()
            .extend(resources);
    }

    Ok(config)
}

fn decode(content: &str, format: Format) -> Result<Value> {
    match format {
        Format::Yaml => serde_yaml::from_str(content).map_err(|e| {
            let err = Error::parse(e.to_string());
            match e.location() {
                Some(loc) => err.with_source_location(SourceLocation {
                    file: String::new(),
                    line: Some(loc.line()),
                    column: Some(loc.column()),
                }),
                None => err,
            }
        }),
        Format::Json => serde_json::from_str(content).map_err(|e| {
            Error::parse(e.to_string()).with_source_location(SourceLocation {
                file: String::new(),
                line: Some(e.line()),
                column: Some(e.column()),
            })
        }),
    }
}

/// Mapping entries in document order with repeated keys kept.
/// A value that isn't a mapping has no entries.
struct Entries<V>(Vec<(String, V)>);

impl<'de, V: Deserialize<'de>> Deserialize<'de> for Entries<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(EntriesVisitor(PhantomData))
    }
}

struct EntriesVisitor<V>(PhantomData<V>);

impl<V> EntriesVisitor<V> {
    fn empty<E>(self) -> std::result::Result<Entries<V>, E> {
        Ok(Entries(Vec::new()))
    }
}

impl<'de, V: Deserialize<'de>> Visitor<'de> for EntriesVisitor<V> {
    type Value = Entries<V>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a config value")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
        let mut entries = Vec::new();
        while let Some(entry) = map.next_entry::<String, V>()? {
            entries.push(entry);
        }
        Ok(Entries(entries))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        self.empty()
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Self::Value, D::Error> {
        d.deserialize_any(self)
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> std::result::Result<Self::Value, E> {
        self.empty()
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> std::result::Result<Self::Value, E> {
        self.empty()
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> std::result::Result<Self::Value, E> {
        self.empty()
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> std::result::Result<Self::Value, E> {
        self.empty()
    }

    fn visit_str<E: de::Error>(self, _: &str) -> std::result::Result<Self::Value, E> {
        self.empty()
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
        self.empty()
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
        self.empty()
    }
}

/// Reject a block type or block name declared twice in one document
///
/// The decoded `Value` keeps only the last of repeated mapping keys, so this
/// reads the document's top two levels again with every entry kept.
fn check_unique_names(content: &str, format: Format) -> Result<()> {
    let sections: Entries<Entries<IgnoredAny>> = match format {
        Format::Yaml => serde_yaml::from_str(content).map_err(|e| Error::parse(e.to_string()))?,
        Format::Json => serde_json::from_str(content).map_err(|e| Error::parse(e.to_string()))?,
    };

    let mut kinds = HashSet::new();
    for (kind, blocks) in &sections.0 {
        if !kinds.insert(kind.as_str()) {
            return Err(Error::parse(format!("top-level key '{}' appears more than once", kind))
                .with_path(kind.as_str()));
        }
        let mut names = HashSet::new();
        for (name, _) in &blocks.0 {
            if !names.insert(name.as_str()) {
                return Err(Error::duplicate_name(kind, name).with_path(format!("{}.{}", kind, name)));
            }
        }
    }
    Ok(())
}

/// List config files directly inside `dir`, sorted
fn list_files(dir: &Path, options: &LoaderOptions) -> Result<Vec<PathBuf>> {
    let display = dir.display().to_string();
    let metadata = fs::metadata(dir).map_err(|e| Error::io(&display, e.to_string()))?;
    if !metadata.is_dir() {
        return Err(Error::io(&display, "configuration path must be a directory"));
    }

    let base = glob::Pattern::escape(&dir.to_string_lossy());
    let mut files = Vec::new();
    for ext in &options.extensions {
        let pattern = format!("{}/*.{}", base, ext);
        let entries = glob::glob(&pattern)
            .map_err(|e| Error::internal(format!("bad file pattern '{}': {}", pattern, e)))?;
        for entry in entries {
            let path = entry.map_err(|e| {
                Error::io(e.path().display().to_string(), e.error().to_string())
            })?;
            if path.is_file() {
                log::debug!("Found: {}", path.display());
                files.push(path);
            } else {
                log::debug!("Skipping: {}", path.display());
            }
        }
    }

    files.sort();
    files.dedup();
    log::debug!("Found {} config files in {}", files.len(), display);
    Ok(files)
}

fn read_bounded(path: &Path, max: u64) -> Result<String> {
    let display = path.display().to_string();
    let file = fs::File::open(path).map_err(|e| Error::io(&display, e.to_string()))?;

    let mut content = String::new();
    file.take(max.saturating_add(1))
        .read_to_string(&mut content)
        .map_err(|e| Error::io(&display, e.to_string()))?;

    if content.len() as u64 > max {
        return Err(Error::io(
            &display,
            format!("file is larger than the maximum of {} bytes", max),
        ));
    }
    Ok(content)
}

/// Per-file block extraction
struct FileParser<'a> {
    label: &'a str,
    options: &'a LoaderOptions,
}

impl FileParser<'_> {
    fn variables(&self, block: &Value) -> Result<Vec<Variable>> {
        let mut variables = Vec::new();
        for (name, body) in self.blocks("variable", block)? {
            let path = format!("variable.{}", name);
            let block_name = format!("variable[{}]", name);
            self.check_name("variable", name, &path)?;
            let body = self.body(&block_name, body, &path)?;
            self.check_keys(&block_name, &body, &VARIABLE_KEYS, &path)?;

            let mut var = Variable::new(name.as_str());
            var.declared_type = self.optional_string(&block_name, &body, "type", &path)?;
            var.description = self.optional_string(&block_name, &body, "description", &path)?;
            var.default = body.get("default").filter(|v| !v.is_null()).cloned();

            var.validate_type_and_default()
                .map_err(|e| e.with_path(&path).in_file(self.label))?;
            log::debug!("Found variable: {}", name);
            variables.push(var);
        }
        Ok(variables)
    }

    fn files(&self, block: &Value) -> Result<Vec<File>> {
        let mut files = Vec::new();
        for (name, body) in self.blocks("file", block)? {
            let path = format!("file.{}", name);
            let block_name = format!("file[{}]", name);
            self.check_name("file", name, &path)?;
            let body = self.body(&block_name, body, &path)?;
            self.check_keys(&block_name, &body, &File::VALID_KEYS, &path)?;

            let file = File::from_body(name.as_str(), Value::Mapping(body), self.label)
                .map_err(|e| e.in_file(self.label))?;
            log::debug!("Found file: {}", name);
            files.push(file);
        }
        Ok(files)
    }

    fn resources(&self, kind: &str, block: &Value) -> Result<Vec<Resource>> {
        let mut resources = Vec::new();
        for (name, body) in self.blocks(kind, block)? {
            let path = format!("{}.{}", kind, name);
            let block_name = format!("{}[{}]", kind, name);
            self.check_name(kind, name, &path)?;
            let mut body = self.body(&block_name, body, &path)?;

            let depends_on = match body.shift_remove("depends_on") {
                None | Some(Value::Null) => Vec::new(),
                Some(value) => string_list(&value).ok_or_else(|| {
                    Error::invalid_value(&block_name, "depends_on", "a list of strings")
                        .with_path(format!("{}.depends_on", path))
                        .in_file(self.label)
                })?,
            };

            let resource = Resource::new(kind, name.as_str(), Value::Mapping(body), depends_on, self.label)
                .map_err(|e| e.in_file(self.label))?;
            log::debug!("Found resource: {}[{}]", kind, name);
            resources.push(resource);
        }
        Ok(resources)
    }

    /// The `name -> body` entries of a block type
    fn blocks<'v>(&self, block_type: &str, block: &'v Value) -> Result<Vec<(&'v String, &'v Value)>> {
        match block {
            Value::Null => Ok(Vec::new()),
            Value::Mapping(map) => Ok(map.iter().collect()),
            other => Err(Error::not_a_block(block_type, other.type_name())
                .with_path(block_type)
                .in_file(self.label)),
        }
    }

    /// A block body as a mapping; an empty body is an empty mapping
    fn body(&self, block_name: &str, body: &Value, path: &str) -> Result<IndexMap<String, Value>> {
        match body {
            Value::Null => Ok(IndexMap::new()),
            Value::Mapping(map) => Ok(map.clone()),
            other => Err(Error::not_a_block(block_name, other.type_name())
                .with_path(path)
                .in_file(self.label)),
        }
    }

    fn check_name(&self, block_type: &str, name: &str, path: &str) -> Result<()> {
        self.options
            .name_grammar
            .check(block_type, name)
            .map_err(|e| e.with_path(path).in_file(self.label))
    }

    /// Report every key outside `valid` in one error
    fn check_keys(
        &self,
        block_name: &str,
        body: &IndexMap<String, Value>,
        valid: &[&str],
        path: &str,
    ) -> Result<()> {
        let invalid: Vec<String> = body
            .keys()
            .filter(|k| !valid.contains(&k.as_str()))
            .cloned()
            .collect();
        if invalid.is_empty() {
            return Ok(());
        }
        Err(Error::invalid_keys(block_name, &invalid, valid)
            .with_path(path)
            .in_file(self.label))
    }

    fn optional_string(
        &self,
        block_name: &str,
        body: &IndexMap<String, Value>,
        key: &str,
        path: &str,
    ) -> Result<Option<String>> {
        match body.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(Error::invalid_value(block_name, key, "a string")
                .with_path(format!("{}.{}", path, key))
                .in_file(self.label)),
        }
    }
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_sequence()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}
