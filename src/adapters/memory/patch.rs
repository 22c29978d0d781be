//! Patch application for the in-memory store.
//!
//! Merge patches follow RFC 7386. Strategic merge patches behave like merge
//! patches except that lists of named objects (containers, env, ports) are
//! merged element by element on `name`. JSON patches support the `add`,
//! `replace`, `remove` and `test` operations.

use serde_json::{Map, Value};

use crate::domain::models::PatchType;

/// Apply a rendered patch document to a JSON body.
pub fn apply_patch(target: &mut Value, patch_type: PatchType, data: &str) -> Result<(), String> {
    let patch: Value = serde_json::from_str(data).map_err(|e| format!("invalid patch body: {e}"))?;
    match patch_type {
        PatchType::Merge => {
            merge(target, &patch, false);
            Ok(())
        }
        PatchType::Strategic => {
            if !patch.is_object() {
                return Err("strategic merge patch must be an object".to_string());
            }
            merge(target, &patch, true);
            Ok(())
        }
        PatchType::Json => json_patch(target, &patch),
    }
}

fn merge(target: &mut Value, patch: &Value, strategic: bool) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(target_map) = target else {
        return;
    };

    for (key, value) in patch_map {
        if value.is_null() {
            target_map.remove(key);
            continue;
        }
        match (target_map.get_mut(key), value) {
            (Some(Value::Array(existing)), Value::Array(items))
                if strategic && is_named_list(items) =>
            {
                merge_named_list(existing, items);
            }
            (Some(existing), Value::Object(_)) => merge(existing, value, strategic),
            _ => {
                let mut fresh = Value::Null;
                merge(&mut fresh, value, strategic);
                target_map.insert(key.clone(), fresh);
            }
        }
    }
}

fn is_named_list(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(|i| i.get("name").is_some_and(Value::is_string))
}

fn merge_named_list(existing: &mut Vec<Value>, items: &[Value]) {
    for item in items {
        let name = item.get("name");
        match existing.iter_mut().find(|e| e.get("name") == name) {
            Some(current) => merge(current, item, true),
            None => existing.push(item.clone()),
        }
    }
}

fn json_patch(target: &mut Value, patch: &Value) -> Result<(), String> {
    let Value::Array(operations) = patch else {
        return Err("json patch must be an array of operations".to_string());
    };

    for operation in operations {
        let op = operation
            .get("op")
            .and_then(Value::as_str)
            .ok_or("json patch operation is missing 'op'")?;
        let path = operation
            .get("path")
            .and_then(Value::as_str)
            .ok_or("json patch operation is missing 'path'")?;

        match op {
            "add" | "replace" => {
                let value = operation
                    .get("value")
                    .cloned()
                    .ok_or_else(|| format!("'{op}' operation requires a value"))?;
                if op == "replace" && target.pointer(path).is_none() {
                    return Err(format!("path not found: {path}"));
                }
                set_pointer(target, path, value)?;
            }
            "remove" => {
                remove_pointer(target, path)?;
            }
            "test" => {
                let expected = operation.get("value").unwrap_or(&Value::Null);
                if target.pointer(path) != Some(expected) {
                    return Err(format!("test failed at {path}"));
                }
            }
            other => return Err(format!("unsupported json patch operation: {other}")),
        }
    }
    Ok(())
}

fn split_pointer(path: &str) -> Result<(&str, String), String> {
    let idx = path
        .rfind('/')
        .ok_or_else(|| format!("invalid json pointer: {path}"))?;
    let last = path[idx + 1..].replace("~1", "/").replace("~0", "~");
    Ok((&path[..idx], last))
}

fn set_pointer(target: &mut Value, path: &str, value: Value) -> Result<(), String> {
    if path.is_empty() {
        *target = value;
        return Ok(());
    }
    let (parent, key) = split_pointer(path)?;
    match target.pointer_mut(parent) {
        Some(Value::Object(map)) => {
            map.insert(key, value);
            Ok(())
        }
        Some(Value::Array(items)) => {
            if key == "-" {
                items.push(value);
                return Ok(());
            }
            let idx: usize = key.parse().map_err(|_| format!("invalid array index: {key}"))?;
            if idx > items.len() {
                return Err(format!("array index out of bounds: {path}"));
            }
            items.insert(idx, value);
            Ok(())
        }
        _ => Err(format!("path not found: {parent}")),
    }
}

fn remove_pointer(target: &mut Value, path: &str) -> Result<(), String> {
    let (parent, key) = split_pointer(path)?;
    let removed = match target.pointer_mut(parent) {
        Some(Value::Object(map)) => map.remove(&key).is_some(),
        Some(Value::Array(items)) => match key.parse::<usize>() {
            Ok(idx) if idx < items.len() => {
                items.remove(idx);
                true
            }
            _ => false,
        },
        _ => false,
    };
    if removed {
        Ok(())
    } else {
        Err(format!("path not found: {path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_patch() {
        let mut doc = json!({"spec": {"replicas": 1, "paused": true}});
        apply_patch(&mut doc, PatchType::Merge, r#"{"spec":{"replicas":3,"paused":null}}"#).unwrap();
        assert_eq!(doc, json!({"spec": {"replicas": 3}}));
    }

    #[test]
    fn test_strategic_merges_named_lists() {
        let mut doc = json!({
            "spec": {"containers": [
                {"name": "app", "image": "app:1", "resources": {"limits": {"cpu": "1"}}},
                {"name": "sidecar", "image": "proxy:1"}
            ]}
        });
        let patch = r#"{"spec":{"containers":[{"name":"app","resources":{"limits":{"cpu":"500m"}}}]}}"#;
        apply_patch(&mut doc, PatchType::Strategic, patch).unwrap();

        assert_eq!(doc["spec"]["containers"][0]["image"], "app:1");
        assert_eq!(doc["spec"]["containers"][0]["resources"]["limits"]["cpu"], "500m");
        assert_eq!(doc["spec"]["containers"][1]["name"], "sidecar");
    }

    #[test]
    fn test_merge_replaces_lists() {
        let mut doc = json!({"args": ["a", "b"]});
        apply_patch(&mut doc, PatchType::Merge, r#"{"args":["c"]}"#).unwrap();
        assert_eq!(doc, json!({"args": ["c"]}));
    }

    #[test]
    fn test_json_patch_operations() {
        let mut doc = json!({"spec": {"replicas": 1, "args": ["a"]}});
        let patch = r#"[
            {"op": "test", "path": "/spec/replicas", "value": 1},
            {"op": "replace", "path": "/spec/replicas", "value": 2},
            {"op": "add", "path": "/spec/args/-", "value": "b"},
            {"op": "remove", "path": "/spec/args/0"}
        ]"#;
        apply_patch(&mut doc, PatchType::Json, patch).unwrap();
        assert_eq!(doc, json!({"spec": {"replicas": 2, "args": ["b"]}}));
    }

    #[test]
    fn test_json_patch_errors() {
        let mut doc = json!({"spec": {}});
        assert!(apply_patch(&mut doc, PatchType::Json, r#"[{"op":"replace","path":"/spec/x","value":1}]"#).is_err());
        assert!(apply_patch(&mut doc, PatchType::Json, r#"[{"op":"move","path":"/spec"}]"#).is_err());
        assert!(apply_patch(&mut doc, PatchType::Json, r#"{"op":"add"}"#).is_err());
        assert!(apply_patch(&mut doc, PatchType::Strategic, "[]").is_err());
        assert!(apply_patch(&mut doc, PatchType::Merge, "not json").is_err());
    }
}
