//! The skip cache: `runs.<task name>` (§4.D).
//!
//! Read-modify-write over a single JSON file, the same shape as
//! `csa-session::state`'s keyed-state file but scoped to one concern (task
//! run results) instead of arbitrary session state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkipEntry {
    /// Unix seconds of the last run.
    pub at: i64,
    /// Repo HEAD sha at the time of the run, if known.
    #[serde(default)]
    pub head: Option<String>,
    /// Whether the last run passed.
    pub pass: bool,
}

/// `runs.<taskName>` lives inside the same file as the per-developer local
/// config override (spec.md §3/§4.D), so writing a run result must not
/// clobber any sibling config keys a developer has set in that file. We
/// keep the whole document as a raw `Value` and only ever touch the `runs`
/// object within it.
pub struct SkipCache {
    path: PathBuf,
    document: Value,
    runs: HashMap<String, SkipEntry>,
}

impl SkipCache {
    /// Load the cache at `path`, or start empty if the file doesn't exist or
    /// doesn't parse (a corrupt cache is never fatal; spec.md §4.D treats a
    /// missing entry the same as a fresh one).
    pub fn load(path: &Path) -> Self {
        let document = std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str::<Value>(&text).ok())
            .unwrap_or_else(|| Value::Object(Map::new()));

        let runs = document
            .get("runs")
            .and_then(|v| serde_json::from_value::<HashMap<String, SkipEntry>>(v.clone()).ok())
            .unwrap_or_default();

        Self {
            path: path.to_path_buf(),
            document,
            runs,
        }
    }

    pub fn get(&self, task_name: &str) -> Option<&SkipEntry> {
        self.runs.get(task_name)
    }

    /// Record a run's outcome and persist immediately.
    pub fn record(&mut self, task_name: &str, entry: SkipEntry) -> std::io::Result<()> {
        self.runs.insert(task_name.to_string(), entry);
        self.flush()
    }

    /// Read-modify-write: only the `runs` key in `document` is replaced;
    /// every other top-level key (e.g. a developer's local config
    /// overrides living in the same file) passes through untouched.
    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !self.document.is_object() {
            self.document = Value::Object(Map::new());
        }
        let runs_value = serde_json::to_value(&self.runs)?;
        self.document
            .as_object_mut()
            .expect("just ensured document is an object")
            .insert("runs".to_string(), runs_value);
        let text = serde_json::to_string_pretty(&self.document)?;
        std::fs::write(&self.path, text)
    }

    /// Whether `entry` licenses skipping the task: the task previously
    /// passed and, when `require_same_head` is set, `current_head` matches
    /// the recorded head (spec.md §4.D: a skip is only valid while the repo
    /// hasn't moved past the last successful run).
    pub fn should_skip(
        entry: &SkipEntry,
        require_same_head: bool,
        current_head: Option<&str>,
    ) -> bool {
        if !entry.pass {
            return false;
        }
        if require_same_head {
            return entry.head.as_deref() == current_head;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_cache_file_starts_empty() {
        let dir = tempdir().unwrap();
        let cache = SkipCache::load(&dir.path().join("runs.json"));
        assert!(cache.get("lint").is_none());
    }

    #[test]
    fn record_then_reload_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runs.json");
        let mut cache = SkipCache::load(&path);
        cache
            .record(
                "lint",
                SkipEntry {
                    at: 1_700_000_000,
                    head: Some("abc123".to_string()),
                    pass: true,
                },
            )
            .unwrap();

        let reloaded = SkipCache::load(&path);
        assert_eq!(
            reloaded.get("lint"),
            Some(&SkipEntry {
                at: 1_700_000_000,
                head: Some("abc123".to_string()),
                pass: true,
            })
        );
    }

    #[test]
    fn corrupt_cache_file_is_treated_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runs.json");
        std::fs::write(&path, "{not json").unwrap();
        let cache = SkipCache::load(&path);
        assert!(cache.get("lint").is_none());
    }

    #[test]
    fn should_skip_requires_pass() {
        let failed = SkipEntry {
            at: 1,
            head: Some("x".to_string()),
            pass: false,
        };
        assert!(!SkipCache::should_skip(&failed, false, None));
    }

    #[test]
    fn recording_a_run_preserves_sibling_config_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prove_it.local.json");
        std::fs::write(&path, r#"{"model": "claude-3", "enabled": true}"#).unwrap();

        let mut cache = SkipCache::load(&path);
        cache
            .record(
                "lint",
                SkipEntry {
                    at: 1,
                    head: None,
                    pass: true,
                },
            )
            .unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["model"], "claude-3");
        assert_eq!(raw["enabled"], true);
        assert!(raw["runs"]["lint"]["pass"].as_bool().unwrap());
    }

    #[test]
    fn should_skip_honors_head_match_when_required() {
        let entry = SkipEntry {
            at: 1,
            head: Some("abc".to_string()),
            pass: true,
        };
        assert!(SkipCache::should_skip(&entry, true, Some("abc")));
        assert!(!SkipCache::should_skip(&entry, true, Some("def")));
        assert!(SkipCache::should_skip(&entry, false, Some("def")));
    }
}
