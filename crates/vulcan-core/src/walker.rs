//! Structural traversal of config values
//!
//! Two passes share one traversal order: [`discover`] borrows a tree and
//! reports every template in it, [`replace`] consumes a copy and substitutes
//! evaluated results. Mapping entries are visited in key order, sequence
//! elements by position, so both passes are deterministic.
//!
//! Mapping keys are never treated as templates.

use crate::error::{Error, Result};
use crate::expression::{needs_processing, Template};
use crate::scope::{contains_unknown, Evaluated};
use crate::value::Value;

/// Output of a replace pass
#[derive(Debug, Clone, PartialEq)]
pub struct Replaced {
    pub value: Value,
    /// Paths whose value could not be computed yet
    pub unknown_keys: Vec<String>,
}

/// Visit every template in a value tree
///
/// The callback receives the key path (`a.b[0].c`) and the parsed template.
/// The first error, whether a parse failure or one returned by the
/// callback, stops the walk.
pub fn discover<F>(value: &Value, mut visit: F) -> Result<()>
where
    F: FnMut(&str, &Template) -> Result<()>,
{
    discover_at(value, "", &mut visit)
}

fn discover_at<F>(value: &Value, path: &str, visit: &mut F) -> Result<()>
where
    F: FnMut(&str, &Template) -> Result<()>,
{
    match value {
        Value::String(s) if needs_processing(s) => {
            let template = parse_at(s, path)?;
            visit(path, &template).map_err(|e| at_path(e, path))
        }
        Value::Sequence(seq) => {
            for (i, item) in seq.iter().enumerate() {
                discover_at(item, &index_path(path, i), visit)?;
            }
            Ok(())
        }
        Value::Mapping(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                discover_at(&map[key], &key_path(path, key), visit)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Evaluate every template in a value tree and substitute the results
///
/// A list produced by a template that sits directly in a list is spliced
/// into that list. Unknown results leave the sentinel in place and record
/// the path in [`Replaced::unknown_keys`].
pub fn replace<F>(value: Value, eval: F) -> Result<Replaced>
where
    F: FnMut(&str, &Template) -> Result<Evaluated>,
{
    let mut replacer = Replacer {
        eval,
        unknown_keys: Vec::new(),
    };
    let value = replacer.replace_at(value, "")?;
    Ok(Replaced {
        value,
        unknown_keys: replacer.unknown_keys,
    })
}

struct Replacer<F> {
    eval: F,
    unknown_keys: Vec<String>,
}

impl<F> Replacer<F>
where
    F: FnMut(&str, &Template) -> Result<Evaluated>,
{
    fn replace_at(&mut self, value: Value, path: &str) -> Result<Value> {
        match value {
            Value::String(s) if needs_processing(&s) => {
                let template = parse_at(&s, path)?;
                let evaluated = (self.eval)(path, &template).map_err(|e| at_path(e, path))?;
                if evaluated.is_unknown() {
                    self.unknown_keys.push(path.to_string());
                    return Ok(evaluated.into_value());
                }
                let value = evaluated.into_value();
                if contains_unknown(&value) {
                    self.unknown_keys.push(path.to_string());
                }
                Ok(value)
            }
            Value::Sequence(seq) => {
                let mut out = Vec::with_capacity(seq.len());
                for (i, item) in seq.into_iter().enumerate() {
                    let is_template = matches!(&item, Value::String(s) if needs_processing(s));
                    match self.replace_at(item, &index_path(path, i))? {
                        Value::Sequence(items) if is_template => out.extend(items),
                        other => out.push(other),
                    }
                }
                Ok(Value::Sequence(out))
            }
            Value::Mapping(map) => {
                let mut slots: Vec<Option<(String, Value)>> = map.into_iter().map(Some).collect();
                let mut order: Vec<usize> = (0..slots.len()).collect();
                order.sort_by(|&a, &b| slot_key(&slots[a]).cmp(slot_key(&slots[b])));

                let mut results: Vec<Option<(String, Value)>> = vec![None; slots.len()];
                for i in order {
                    if let Some((key, item)) = slots[i].take() {
                        let item = self.replace_at(item, &key_path(path, &key))?;
                        results[i] = Some((key, item));
                    }
                }
                Ok(Value::Mapping(results.into_iter().flatten().collect()))
            }
            other => Ok(other),
        }
    }
}

fn slot_key(slot: &Option<(String, Value)>) -> &str {
    slot.as_ref().map(|(k, _)| k.as_str()).unwrap_or_default()
}

fn parse_at(source: &str, path: &str) -> Result<Template> {
    Template::parse(source).map_err(|e| at_path(e, path))
}

fn at_path(err: Error, path: &str) -> Error {
    if err.path.is_some() || path.is_empty() {
        return err;
    }
    err.with_path(path)
}

fn key_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

fn index_path(parent: &str, index: usize) -> String {
    format!("{}[{}]", parent, index)
}
