//! Deep merge for layered JSON configuration.
//!
//! Adapted from `csa-config::config_merge::merge_toml_values`: arrays fully
//! replace, objects merge recursively, and explicit `null` in the overlay
//! does not override the base (spec.md §4.A: "null/absent values do not
//! override").

use serde_json::Value;

/// Merge `overlay` onto `base`, with `overlay` taking priority.
///
/// - Object + object: recurse key-by-key.
/// - Array + anything: `overlay`'s array replaces `base` wholesale.
/// - `Value::Null` in overlay: does not override; `base`'s existing value
///   (or absence) is kept.
/// - Anything else: `overlay` replaces `base`.
pub fn merge_json(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                if overlay_val.is_null() {
                    continue;
                }
                let merged_val = match base_map.remove(&key) {
                    Some(base_val) => merge_json(base_val, overlay_val),
                    None => overlay_val,
                };
                base_map.insert(key, merged_val);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn objects_merge_recursively() {
        let base = json!({"a": {"x": 1, "y": 2}, "b": 1});
        let overlay = json!({"a": {"y": 3, "z": 4}});
        let merged = merge_json(base, overlay);
        assert_eq!(merged, json!({"a": {"x": 1, "y": 3, "z": 4}, "b": 1}));
    }

    #[test]
    fn arrays_fully_replace() {
        let base = json!({"hooks": [1, 2, 3]});
        let overlay = json!({"hooks": [9]});
        let merged = merge_json(base, overlay);
        assert_eq!(merged, json!({"hooks": [9]}));
    }

    #[test]
    fn explicit_null_does_not_override() {
        let base = json!({"model": "gpt-4o"});
        let overlay = json!({"model": null});
        let merged = merge_json(base, overlay);
        assert_eq!(merged, json!({"model": "gpt-4o"}));
    }

    #[test]
    fn absent_keys_do_not_override() {
        let base = json!({"enabled": true, "model": "x"});
        let overlay = json!({"enabled": false});
        let merged = merge_json(base, overlay);
        assert_eq!(merged, json!({"enabled": false, "model": "x"}));
    }

    #[test]
    fn primitive_overlay_replaces_base() {
        let base = json!({"enabled": true});
        let overlay = json!({"enabled": false});
        assert_eq!(merge_json(base, overlay), json!({"enabled": false}));
    }

    #[test]
    fn overlay_object_replaces_base_scalar() {
        let base = json!({"x": 1});
        let overlay = json!({"x": {"y": 2}});
        assert_eq!(merge_json(base, overlay), json!({"x": {"y": 2}}));
    }
}
