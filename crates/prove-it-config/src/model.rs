//! The configuration data model: `Config`, hook entries, and tasks.
//!
//! Mirrors the shape of `csa-hooks::config::{HookConfig, HooksConfig}` but
//! generalized from "one command per event" to spec.md's "ordered hook
//! entries, each with an ordered task list".

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_agent_command() -> String {
    "claude -p {prompt}".to_string()
}

/// Top-level merged configuration (§3 Data Model, §4.A).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Master switch. `false` means the dispatcher exits silently (§4.H step 2).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Glob patterns designating "source files" (§4.I).
    #[serde(default)]
    pub sources: Vec<String>,

    /// Environment variables exported to every spawned task.
    #[serde(default)]
    pub task_env: HashMap<String, String>,

    /// Default reviewer model for agent tasks without their own `model`.
    #[serde(default)]
    pub model: Option<String>,

    /// Host tool names considered "edit-like".
    #[serde(default = "default_file_editing_tools")]
    pub file_editing_tools: Vec<String>,

    /// Ordered list of hook entries.
    #[serde(default)]
    pub hooks: Vec<HookEntry>,

    /// Project dirs where dispatch exits silently. `~/` expands to home.
    #[serde(default)]
    pub ignored_paths: Vec<String>,
}

fn default_file_editing_tools() -> Vec<String> {
    vec![
        "Edit".to_string(),
        "Write".to_string(),
        "NotebookEdit".to_string(),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            sources: Vec::new(),
            task_env: HashMap::new(),
            model: None,
            file_editing_tools: default_file_editing_tools(),
            hooks: Vec::new(),
            ignored_paths: Vec::new(),
        }
    }
}

impl Config {
    /// A heuristic for bash "write-like" commands: redirection, in-place
    /// editors, and common file-mutating utilities. Used to classify a Bash
    /// tool invocation as "edit-like" when the tool name itself isn't in
    /// `fileEditingTools` (spec.md §3: "any name matching bash-write
    /// heuristics when the tool is a shell tool").
    pub fn is_bash_write_heuristic(command: &str) -> bool {
        const MARKERS: &[&str] = &[
            ">", ">>", "sed -i", "tee ", "mv ", "rm ", "cp ", "mkdir ", "touch ", "git apply",
            "patch ",
        ];
        MARKERS.iter().any(|m| command.contains(m))
    }

    /// Whether `tool_name` (optionally with its bash `command`) counts as
    /// "edit-like" per the configured `fileEditingTools` list plus the bash
    /// heuristic.
    pub fn is_edit_like_tool(&self, tool_name: &str, bash_command: Option<&str>) -> bool {
        if self.file_editing_tools.iter().any(|t| t == tool_name) {
            return true;
        }
        if tool_name == "Bash" {
            if let Some(cmd) = bash_command {
                return Self::is_bash_write_heuristic(cmd);
            }
        }
        false
    }
}

/// Which subsystem fires a hook entry's event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookEntryType {
    Claude,
    Git,
}

/// A single hook entry: binds an event to an ordered list of tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEntry {
    #[serde(rename = "type")]
    pub entry_type: HookEntryType,
    pub event: String,
    #[serde(default)]
    pub matcher: Option<String>,
    #[serde(default)]
    pub triggers: Option<Vec<String>>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// A single verification task (script or agent), plus shared scheduling fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique-within-entry name; used as cache and log key.
    pub name: String,

    #[serde(flatten)]
    pub kind: TaskKind,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub when: Option<WhenPredicate>,

    #[serde(default, rename = "async")]
    pub is_async: bool,

    #[serde(default)]
    pub quiet: bool,

    /// Redesign addition (see DESIGN.md open question #1): when set, a FAIL
    /// for this task routes straight to `permissionDecision: "deny"` instead
    /// of the default allow+rewrite stub, for tasks that are pure policy
    /// checks rather than commit-boundary verification gates.
    #[serde(default)]
    pub deny_on_fail: bool,
}

/// The two task variants (§3: `type` ∈ {script, agent}).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskKind {
    Script(ScriptTask),
    Agent(AgentTask),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptTask {
    pub command: String,
    /// When true, the skip cache is consulted by mtime before running (§4.G step 3).
    #[serde(default)]
    pub mtime: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTask {
    pub prompt: String,
    #[serde(default = "default_agent_command")]
    pub command: String,
    #[serde(default)]
    pub output_mode: OutputMode,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
    #[serde(default)]
    pub rule_file: Option<String>,
    #[serde(default)]
    pub prompt_type: Option<PromptType>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Text,
    Jsonl,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptType {
    Inline,
    Skill,
    Reference,
}

/// A `when` clause set — all present clauses must hold for the task to run.
/// Field order in this struct is also evaluation order (§4.G step 2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhenPredicate {
    #[serde(default)]
    pub file_exists: Option<String>,
    #[serde(default)]
    pub env_set: Option<String>,
    #[serde(default)]
    pub env_not_set: Option<String>,
    #[serde(default)]
    pub variables_present: Option<Vec<String>>,
    #[serde(default)]
    pub sources_modified_since_last_run: Option<bool>,
    #[serde(default)]
    pub source_files_edited: Option<bool>,
    #[serde(default)]
    pub tools_used: Option<Vec<String>>,
    #[serde(default)]
    pub signal: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_script_task() {
        let json = serde_json::json!({
            "name": "fast-tests",
            "type": "script",
            "command": "cargo test",
        });
        let task: Task = serde_json::from_value(json).unwrap();
        assert_eq!(task.name, "fast-tests");
        assert!(task.enabled);
        match task.kind {
            TaskKind::Script(s) => assert_eq!(s.command, "cargo test"),
            TaskKind::Agent(_) => panic!("expected script"),
        }
    }

    #[test]
    fn deserializes_agent_task_with_defaults() {
        let json = serde_json::json!({
            "name": "reviewer",
            "type": "agent",
            "prompt": "review {{session_diff}}",
        });
        let task: Task = serde_json::from_value(json).unwrap();
        match task.kind {
            TaskKind::Agent(a) => {
                assert_eq!(a.command, "claude -p {prompt}");
                assert_eq!(a.output_mode, OutputMode::Text);
                assert_eq!(a.timeout, 120_000);
            }
            TaskKind::Script(_) => panic!("expected agent"),
        }
    }

    #[test]
    fn is_edit_like_tool_matches_configured_name() {
        let cfg = Config::default();
        assert!(cfg.is_edit_like_tool("Edit", None));
        assert!(!cfg.is_edit_like_tool("Grep", None));
    }

    #[test]
    fn is_edit_like_tool_matches_bash_write_heuristic() {
        let cfg = Config::default();
        assert!(cfg.is_edit_like_tool("Bash", Some("echo hi > out.txt")));
        assert!(!cfg.is_edit_like_tool("Bash", Some("ls -la")));
    }

    #[test]
    fn hook_entry_type_serde() {
        let json = serde_json::json!({
            "type": "claude",
            "event": "PreToolUse",
            "tasks": [],
        });
        let entry: HookEntry = serde_json::from_value(json).unwrap();
        assert_eq!(entry.entry_type, HookEntryType::Claude);
    }

    #[test]
    fn config_default_enabled_true() {
        let cfg = Config::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.file_editing_tools, default_file_editing_tools());
    }
}
