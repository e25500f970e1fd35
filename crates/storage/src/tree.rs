use serde_json::{Map, Value};

use crate::{DocumentMap, StoreError, StoreResult};

pub fn split_path(path: &str) -> StoreResult<Vec<&str>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.iter().any(|s| s.is_empty() || s.contains(['.', '#', '$', '[', ']'])) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

/// True when a change at one path is visible from the other.
pub fn paths_overlap(a: &[&str], b: &[&str]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

pub fn get_at<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.as_object()?.get(*segment))
}

/// Sets `value` at `segments`, creating intermediate objects. `Null` removes the key and
/// prunes parents left empty.
pub fn set_at(root: &mut Value, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    if value.is_null() {
        remove_at(root, parents, last);
        return;
    }

    let mut node = root;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(obj) => obj
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => unreachable!("node was just made an object"),
        };
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(obj) = node {
        obj.insert((*last).to_string(), value);
    }
}

fn remove_at(node: &mut Value, parents: &[&str], last: &str) {
    let Value::Object(obj) = node else {
        return;
    };
    match parents.split_first() {
        None => {
            obj.remove(last);
        }
        Some((head, rest)) => {
            let Some(child) = obj.get_mut(*head) else {
                return;
            };
            remove_at(child, rest, last);
            if child.as_object().is_some_and(Map::is_empty) {
                obj.remove(*head);
            }
        }
    }
}

/// Children of an object node; anything else reads as an empty collection.
pub fn to_document_map(node: Option<&Value>) -> DocumentMap {
    match node {
        Some(Value::Object(obj)) => obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => DocumentMap::new(),
    }
}
