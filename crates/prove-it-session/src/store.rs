//! The session store: per-session baseline/state JSON plus an append-only
//! JSONL run log (§4.C).
//!
//! Grounded on `csa-session::manager`'s `load_session`/`save_session`
//! read-modify-write pair, simplified from prove_it's keyed-state shape.
//! Every operation is a silent no-op when no session id is available
//! (spec.md §4.C: "an absent session id means there is nothing to key
//! state by; the dispatcher proceeds without persistence").

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionBaseline {
    pub head: Option<String>,
    pub status_hash: String,
    pub root_dir: String,
    pub started_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub baseline: Option<SessionBaseline>,
    #[serde(default)]
    pub data: HashMap<String, Value>,
}

/// Keys under `SessionState::data` for the turn-scoped bookkeeping that
/// `sourceFilesEdited`, `toolsUsed`, and `signal` `when` clauses read (§3:
/// "named state values (e.g. `last_review_snapshot`, `edited_sources`,
/// `tools_used`, `signals`)"). `signals` is the out-of-band channel an agent
/// writes to via `prove_it signal` (§4.J) — distinct from the two turn-scoped
/// lists, it is never cleared by [`SessionStore::reset_turn_state`].
pub const EDITED_SOURCES_KEY: &str = "edited_sources";
pub const TOOLS_USED_KEY: &str = "tools_used";
pub const SIGNALS_KEY: &str = "signals";

pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn state_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    fn log_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.jsonl"))
    }

    /// Load a session's state. Returns `Ok(None)` when `session_id` is
    /// `None`, or when the file doesn't exist yet.
    pub fn load(&self, session_id: Option<&str>) -> std::io::Result<Option<SessionState>> {
        let Some(session_id) = session_id else {
            return Ok(None);
        };
        match std::fs::read_to_string(self.state_path(session_id)) {
            Ok(text) => Ok(serde_json::from_str(&text).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Overwrite a session's state. No-op when `session_id` is `None`.
    pub fn save(&self, session_id: Option<&str>, state: &SessionState) -> std::io::Result<()> {
        let Some(session_id) = session_id else {
            return Ok(());
        };
        std::fs::create_dir_all(&self.dir)?;
        let text = serde_json::to_string_pretty(state)?;
        std::fs::write(self.state_path(session_id), text)
    }

    /// Record the session's starting git baseline, unless one is already
    /// stored (the baseline is set once per session, at `SessionStart`).
    pub fn ensure_baseline(
        &self,
        session_id: Option<&str>,
        baseline: SessionBaseline,
    ) -> std::io::Result<()> {
        let Some(session_id) = session_id else {
            return Ok(());
        };
        let mut state = self.load(Some(session_id))?.unwrap_or_default();
        if state.baseline.is_none() {
            state.baseline = Some(baseline);
            self.save(Some(session_id), &state)?;
        }
        Ok(())
    }

    /// Append one JSON value as a line to the session's run log. No-op when
    /// `session_id` is `None`.
    pub fn append_log(&self, session_id: Option<&str>, entry: &Value) -> std::io::Result<()> {
        let Some(session_id) = session_id else {
            return Ok(());
        };
        std::fs::create_dir_all(&self.dir)?;
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(session_id))?;
        writeln!(file, "{}", serde_json::to_string(entry)?)
    }

    /// Read a string-list key out of a session's `data` map (e.g.
    /// `edited_sources`, `tools_used`, `signals`). Empty when the session or
    /// key doesn't exist yet.
    pub fn load_string_list(&self, session_id: Option<&str>, key: &str) -> Vec<String> {
        self.load(session_id)
            .ok()
            .flatten()
            .and_then(|s| s.data.get(key).cloned())
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Append `value` to a string-list key under `data`, deduplicating. No-op
    /// when `session_id` is `None`.
    pub fn append_string_list(
        &self,
        session_id: Option<&str>,
        key: &str,
        value: &str,
    ) -> std::io::Result<()> {
        let Some(session_id) = session_id else {
            return Ok(());
        };
        let mut state = self.load(Some(session_id))?.unwrap_or_default();
        let mut list: Vec<String> = state
            .data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        if !list.iter().any(|x| x == value) {
            list.push(value.to_string());
        }
        state.data.insert(key.to_string(), serde_json::to_value(list)?);
        self.save(Some(session_id), &state)
    }

    /// Clear the turn-scoped `edited_sources`/`tools_used` lists, for a
    /// turn-boundary reset (spec.md §3: `sourceFilesEdited`/`toolsUsed`
    /// clauses count edits/tool-uses "since last turn-boundary reset"). Never
    /// touches `signals`, which is a standing out-of-band channel rather than
    /// per-turn bookkeeping.
    pub fn reset_turn_state(&self, session_id: Option<&str>) -> std::io::Result<()> {
        let Some(session_id) = session_id else {
            return Ok(());
        };
        let mut state = self.load(Some(session_id))?.unwrap_or_default();
        state.data.remove(EDITED_SOURCES_KEY);
        state.data.remove(TOOLS_USED_KEY);
        self.save(Some(session_id), &state)
    }

    /// Read every parseable line of the session's run log, in order. A
    /// malformed or partial trailing line (e.g. from a crash mid-write) is
    /// skipped rather than failing the whole read.
    pub fn read_log(&self, session_id: Option<&str>) -> std::io::Result<Vec<Value>> {
        let Some(session_id) = session_id else {
            return Ok(Vec::new());
        };
        let text = match std::fs::read_to_string(self.log_path(session_id)) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(text
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn absent_session_id_is_a_silent_no_op() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        assert_eq!(store.load(None).unwrap(), None);
        store.save(None, &SessionState::default()).unwrap();
        store.append_log(None, &json!({"x": 1})).unwrap();
        assert!(store.read_log(None).unwrap().is_empty());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        let mut state = SessionState::default();
        state.data.insert("foo".to_string(), json!("bar"));
        store.save(Some("sess1"), &state).unwrap();

        let loaded = store.load(Some("sess1")).unwrap().unwrap();
        assert_eq!(loaded.data.get("foo"), Some(&json!("bar")));
    }

    #[test]
    fn baseline_is_set_once() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        let first = SessionBaseline {
            head: Some("abc".to_string()),
            status_hash: "h1".to_string(),
            root_dir: "/repo".to_string(),
            started_at: 100,
        };
        store.ensure_baseline(Some("sess1"), first.clone()).unwrap();

        let second = SessionBaseline {
            head: Some("def".to_string()),
            status_hash: "h2".to_string(),
            root_dir: "/repo".to_string(),
            started_at: 200,
        };
        store.ensure_baseline(Some("sess1"), second).unwrap();

        let loaded = store.load(Some("sess1")).unwrap().unwrap();
        assert_eq!(loaded.baseline, Some(first));
    }

    #[test]
    fn log_appends_and_skips_partial_trailing_line() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        store.append_log(Some("sess1"), &json!({"seq": 1})).unwrap();
        store.append_log(Some("sess1"), &json!({"seq": 2})).unwrap();

        let path = dir.path().join("sess1.jsonl");
        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str("{\"seq\": 3, \"trunc");
        std::fs::write(&path, contents).unwrap();

        let entries = store.read_log(Some("sess1")).unwrap();
        assert_eq!(entries, vec![json!({"seq": 1}), json!({"seq": 2})]);
    }

    #[test]
    fn append_string_list_dedups_and_accumulates() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        store
            .append_string_list(Some("sess1"), TOOLS_USED_KEY, "Edit")
            .unwrap();
        store
            .append_string_list(Some("sess1"), TOOLS_USED_KEY, "Bash")
            .unwrap();
        store
            .append_string_list(Some("sess1"), TOOLS_USED_KEY, "Edit")
            .unwrap();

        let tools = store.load_string_list(Some("sess1"), TOOLS_USED_KEY);
        assert_eq!(tools, vec!["Edit".to_string(), "Bash".to_string()]);
    }

    #[test]
    fn reset_turn_state_clears_edits_and_tools_but_not_signals() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        store
            .append_string_list(Some("sess1"), EDITED_SOURCES_KEY, "src/a.rs")
            .unwrap();
        store
            .append_string_list(Some("sess1"), TOOLS_USED_KEY, "Edit")
            .unwrap();
        store
            .append_string_list(Some("sess1"), SIGNALS_KEY, "ready-for-review")
            .unwrap();

        store.reset_turn_state(Some("sess1")).unwrap();

        assert!(store.load_string_list(Some("sess1"), EDITED_SOURCES_KEY).is_empty());
        assert!(store.load_string_list(Some("sess1"), TOOLS_USED_KEY).is_empty());
        assert_eq!(
            store.load_string_list(Some("sess1"), SIGNALS_KEY),
            vec!["ready-for-review".to_string()]
        );
    }

    #[test]
    fn load_string_list_absent_session_is_empty() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        assert!(store.load_string_list(None, TOOLS_USED_KEY).is_empty());
        assert!(store.load_string_list(Some("nope"), TOOLS_USED_KEY).is_empty());
    }
}
