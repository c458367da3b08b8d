//! Legacy-key promotion, run on each raw JSON layer before merge.
//!
//! Scaled down from `csa-config::migrate`'s versioned migration registry:
//! prove_it has exactly one legacy shape to promote (spec.md §4.A), so this
//! is a single idempotent function rather than an ordered chain of
//! `Migration`s.

use serde_json::{Map, Value};

/// Promote `suiteGate.command` (legacy) to `commands.test.full` (current
/// schema) in place. Idempotent: a layer without `suiteGate` is untouched.
pub fn migrate_legacy_keys(raw: &mut Value) {
    let Value::Object(root) = raw else { return };

    if !matches!(root.get("suiteGate"), Some(Value::Object(_))) {
        return;
    }
    let Some(Value::Object(suite_gate)) = root.remove("suiteGate") else {
        unreachable!("checked above")
    };
    let Some(command) = suite_gate.get("command").cloned() else {
        root.insert("suiteGate".to_string(), Value::Object(suite_gate));
        return;
    };

    let commands = root
        .entry("commands".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(commands) = commands else {
        root.insert("suiteGate".to_string(), Value::Object(suite_gate));
        return;
    };
    let test = commands
        .entry("test".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(test) = test else {
        root.insert("suiteGate".to_string(), Value::Object(suite_gate));
        return;
    };
    test.insert("full".to_string(), command);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn promotes_suite_gate_command() {
        let mut raw = json!({"suiteGate": {"command": "npm test"}, "enabled": true});
        migrate_legacy_keys(&mut raw);
        assert_eq!(
            raw,
            json!({"enabled": true, "commands": {"test": {"full": "npm test"}}})
        );
    }

    #[test]
    fn leaves_config_without_legacy_key_untouched() {
        let mut raw = json!({"enabled": true});
        migrate_legacy_keys(&mut raw);
        assert_eq!(raw, json!({"enabled": true}));
    }

    #[test]
    fn merges_into_existing_commands_block() {
        let mut raw = json!({
            "suiteGate": {"command": "npm test"},
            "commands": {"lint": {"full": "eslint ."}},
        });
        migrate_legacy_keys(&mut raw);
        assert_eq!(
            raw,
            json!({
                "commands": {
                    "lint": {"full": "eslint ."},
                    "test": {"full": "npm test"},
                },
            })
        );
    }

    #[test]
    fn ignores_malformed_suite_gate() {
        let mut raw = json!({"suiteGate": "not-an-object"});
        migrate_legacy_keys(&mut raw);
        assert_eq!(raw, json!({"suiteGate": "not-an-object"}));
    }
}
