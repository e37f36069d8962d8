//! Path operations over `serde_json::Value` trees.
//!
//! Paths are lists of segments. Objects are addressed by key, arrays by a
//! decimal index segment. Writers create intermediate objects as needed and
//! replace scalars that sit in the way.

use serde_json::{Map, Value};

/// Split a dotted path (`a.b.0`) into segments. The empty string is the root.
pub fn parse_dot_path(path: &str) -> Vec<String> {
    if path.is_empty() {
        return Vec::new();
    }
    path.split('.').map(str::to_string).collect()
}

/// Look up a path. Missing keys, out-of-range indexes and lookups through
/// scalars all yield `None`.
pub fn get_path<'a, S: AsRef<str>>(root: &'a Value, path: &[S]) -> Option<&'a Value> {
    path.iter().try_fold(root, |current, segment| {
        let segment = segment.as_ref();
        match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    })
}

/// Write `value` at `path`, last write wins.
pub fn set_path<S: AsRef<str>>(root: &mut Value, path: &[S], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        *root = value;
        return;
    };

    let mut current = root;
    for segment in parents {
        current = object_mut(current)
            .entry(segment.as_ref().to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    object_mut(current).insert(last.as_ref().to_string(), value);
}

/// Remove the value at `path`, returning it if it existed.
pub fn remove_path<S: AsRef<str>>(root: &mut Value, path: &[S]) -> Option<Value> {
    let (last, parents) = path.split_last()?;
    let mut current = root;
    for segment in parents {
        current = current.as_object_mut()?.get_mut(segment.as_ref())?;
    }
    current.as_object_mut()?.remove(last.as_ref())
}

fn object_mut(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}
