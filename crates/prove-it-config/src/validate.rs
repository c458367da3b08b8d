//! Non-fatal configuration validation (§4.A "Validation").
//!
//! Two passes:
//! - [`sanitize_hooks`] runs on the raw merged JSON *before* typed
//!   deserialization, dropping hook entries/tasks that don't parse so one
//!   malformed entry can't take down the whole config (§7: "invalid entries
//!   are skipped; dispatcher continues with the remaining config").
//! - [`validate_config`] runs on the successfully-typed [`Config`] and warns
//!   about semantically-odd-but-parseable entries (a `matcher` on a non-tool
//!   event, an unrecognized event name).

use crate::model::{Config, HookEntry, Task};
use serde_json::Value;

const KNOWN_CLAUDE_EVENTS: &[&str] = &[
    "SessionStart",
    "PreToolUse",
    "PostToolUse",
    "Stop",
    "SubagentStop",
    "Notification",
    "PreCompact",
    "UserPromptSubmit",
];

const KNOWN_GIT_EVENTS: &[&str] = &[
    "pre-commit",
    "commit-msg",
    "pre-push",
    "post-commit",
    "pre-rebase",
    "post-checkout",
    "post-merge",
    "prepare-commit-msg",
];

/// Drop any hook entry (or task within an otherwise-valid entry) that fails
/// to deserialize, recording a warning for each drop. Mutates `value["hooks"]`
/// in place.
pub fn sanitize_hooks(value: &mut Value, warnings: &mut Vec<String>) {
    let Some(hooks) = value.get_mut("hooks") else {
        return;
    };
    let Value::Array(entries) = hooks else {
        *hooks = Value::Array(Vec::new());
        warnings.push("'hooks' is not an array; ignoring".to_string());
        return;
    };

    let mut kept = Vec::with_capacity(entries.len());
    for mut entry in std::mem::take(entries) {
        if sanitize_one_entry(&mut entry, warnings) {
            kept.push(entry);
        }
    }
    *entries = kept;
}

/// Returns `true` if `entry` is structurally valid enough to keep (after
/// stripping any invalid tasks from its `tasks` array).
fn sanitize_one_entry(entry: &mut Value, warnings: &mut Vec<String>) -> bool {
    if let Value::Object(map) = entry {
        if let Some(Value::Array(tasks)) = map.get_mut("tasks") {
            let mut kept = Vec::with_capacity(tasks.len());
            for task_val in std::mem::take(tasks) {
                match serde_json::from_value::<Task>(task_val.clone()) {
                    Ok(_) => kept.push(task_val),
                    Err(e) => {
                        let name = task_val
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or("<unnamed>");
                        warnings.push(format!("dropping task '{name}': {e}"));
                    }
                }
            }
            *tasks = kept;
        }
    }

    match serde_json::from_value::<HookEntry>(entry.clone()) {
        Ok(_) => true,
        Err(e) => {
            warnings.push(format!("dropping hook entry: {e}"));
            false
        }
    }
}

/// Post-parse semantic checks. Never fails; only appends human-readable
/// warnings.
pub fn validate_config(config: &Config, warnings: &mut Vec<String>) {
    for entry in &config.hooks {
        if entry.matcher.is_some() && entry.event != "PreToolUse" {
            warnings.push(format!(
                "hook entry for event '{}' sets 'matcher', which only applies to PreToolUse",
                entry.event
            ));
        }

        let known = match entry.entry_type {
            crate::model::HookEntryType::Claude => KNOWN_CLAUDE_EVENTS.contains(&entry.event.as_str()),
            crate::model::HookEntryType::Git => KNOWN_GIT_EVENTS.contains(&entry.event.as_str()),
        };
        if !known {
            warnings.push(format!("unrecognized event name '{}'", entry.event));
        }

        let mut seen = std::collections::HashSet::new();
        for task in &entry.tasks {
            if !seen.insert(task.name.as_str()) {
                warnings.push(format!(
                    "duplicate task name '{}' within hook entry for '{}'",
                    task.name, entry.event
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_drops_entry_with_bad_type() {
        let mut value = json!({
            "hooks": [
                {"type": "bogus", "event": "Stop", "tasks": []},
                {"type": "claude", "event": "Stop", "tasks": []},
            ]
        });
        let mut warnings = Vec::new();
        sanitize_hooks(&mut value, &mut warnings);
        assert_eq!(value["hooks"].as_array().unwrap().len(), 1);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn sanitize_drops_task_missing_required_field() {
        let mut value = json!({
            "hooks": [
                {"type": "claude", "event": "Stop", "tasks": [
                    {"name": "good", "type": "script", "command": "true"},
                    {"name": "bad", "type": "agent"},
                ]},
            ]
        });
        let mut warnings = Vec::new();
        sanitize_hooks(&mut value, &mut warnings);
        let tasks = value["hooks"][0]["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["name"], "good");
        assert!(warnings.iter().any(|w| w.contains("bad")));
    }

    #[test]
    fn sanitize_noop_on_missing_hooks_key() {
        let mut value = json!({"enabled": true});
        let mut warnings = Vec::new();
        sanitize_hooks(&mut value, &mut warnings);
        assert!(warnings.is_empty());
    }

    #[test]
    fn validate_warns_on_matcher_outside_pre_tool_use() {
        let mut config = Config::default();
        config.hooks.push(HookEntry {
            entry_type: crate::model::HookEntryType::Claude,
            event: "Stop".to_string(),
            matcher: Some("Bash".to_string()),
            triggers: None,
            tasks: Vec::new(),
        });
        let mut warnings = Vec::new();
        validate_config(&config, &mut warnings);
        assert!(warnings.iter().any(|w| w.contains("matcher")));
    }

    #[test]
    fn validate_warns_on_unknown_event() {
        let mut config = Config::default();
        config.hooks.push(HookEntry {
            entry_type: crate::model::HookEntryType::Claude,
            event: "TotallyMadeUp".to_string(),
            matcher: None,
            triggers: None,
            tasks: Vec::new(),
        });
        let mut warnings = Vec::new();
        validate_config(&config, &mut warnings);
        assert!(warnings.iter().any(|w| w.contains("unrecognized event")));
    }

    #[test]
    fn validate_warns_on_duplicate_task_names() {
        use crate::model::{ScriptTask, Task, TaskKind};
        let mut config = Config::default();
        let task = |name: &str| Task {
            name: name.to_string(),
            kind: TaskKind::Script(ScriptTask {
                command: "true".to_string(),
                mtime: false,
            }),
            enabled: true,
            when: None,
            is_async: false,
            quiet: false,
            deny_on_fail: false,
        };
        config.hooks.push(HookEntry {
            entry_type: crate::model::HookEntryType::Claude,
            event: "Stop".to_string(),
            matcher: None,
            triggers: None,
            tasks: vec![task("dup"), task("dup")],
        });
        let mut warnings = Vec::new();
        validate_config(&config, &mut warnings);
        assert!(warnings.iter().any(|w| w.contains("duplicate task name")));
    }
}
