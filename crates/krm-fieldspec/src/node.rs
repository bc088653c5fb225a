//! Small helpers over [`serde_yaml::Value`] trees.
use serde_yaml::Value;

use crate::path::Step;

/// Returns the textual form of a scalar node, or [`None`] for containers.
///
/// `null` is rendered as an empty string, which is how an unset leaf reads
/// when a regex is applied to it.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Tagged(tagged) => scalar_text(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

pub fn is_scalar(value: &Value) -> bool {
    scalar_text(value).is_some()
}

/// Parses `text` the way an untagged plain scalar would be read, so `4`
/// becomes a number and `true` a boolean. Anything which would not parse
/// into a scalar is kept as a string.
pub fn infer_scalar(text: &str) -> Value {
    if text.is_empty() {
        return Value::String(String::new());
    }

    match serde_yaml::from_str::<Value>(text) {
        Ok(value @ (Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_))) => value,
        _ => Value::String(text.to_owned()),
    }
}

pub fn child<'a>(value: &'a Value, step: &Step) -> Option<&'a Value> {
    match (value, step) {
        (Value::Mapping(mapping), Step::Key(key)) => mapping.get(key.as_str()),
        (Value::Sequence(sequence), Step::Index(index)) => sequence.get(*index),
        (Value::Tagged(tagged), _) => child(&tagged.value, step),
        _ => None,
    }
}

pub fn child_mut<'a>(value: &'a mut Value, step: &Step) -> Option<&'a mut Value> {
    match (value, step) {
        (Value::Mapping(mapping), Step::Key(key)) => mapping.get_mut(key.as_str()),
        (Value::Sequence(sequence), Step::Index(index)) => sequence.get_mut(*index),
        (Value::Tagged(tagged), step) => child_mut(&mut tagged.value, step),
        _ => None,
    }
}

/// Returns the string value stored under `key` if `value` is a mapping.
pub fn string_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.as_mapping()?.get(key)?.as_str()
}
