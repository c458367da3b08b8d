//! Layered configuration discovery and loading (§4.A).
//!
//! Mirrors `csa-config::global::load`'s "walk layers, merge, then parse"
//! shape, generalized from a fixed two-layer (global + project) scheme to
//! prove_it's four layers:
//!
//! 1. built-in defaults (`Config::default()`, expressed as an empty overlay)
//! 2. the global config, `$PROVE_IT_DIR/config.json` (`PROVE_IT_DIR` defaults
//!    to `$HOME/.claude/prove_it`)
//! 3. project configs, `.claude/prove_it.json` in every directory from the
//!    git root down to the starting directory, applied root-first so a
//!    deeper directory overrides an ancestor
//! 4. the per-developer local override, `.claude/prove_it.local.json` in the
//!    starting directory

use crate::merge::merge_json;
use crate::migrate::migrate_legacy_keys;
use crate::model::Config;
use crate::validate::{sanitize_hooks, validate_config};
use serde_json::Value;
use std::path::{Path, PathBuf};

const PROJECT_CONFIG_FILE: &str = ".claude/prove_it.json";
const LOCAL_CONFIG_FILE: &str = ".claude/prove_it.local.json";
const GLOBAL_CONFIG_FILE: &str = "config.json";

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub local_config_path: Option<PathBuf>,
    pub warnings: Vec<String>,
}

/// The per-developer local override / skip-cache file for `dir` (spec.md
/// §3/§4.D: "Per-project: `<repo>/.claude/prove_it.local.json`"). Exposed so
/// every writer of the skip cache (the dispatcher, `record`, `signal`-style
/// standalone subcommands) resolves the exact same path `load` already used
/// as its local layer — a second, independently-computed path here would let
/// a normal dispatch and an async task's self-reported result land in two
/// different files and never see each other.
pub fn local_config_path(dir: &Path) -> PathBuf {
    dir.join(LOCAL_CONFIG_FILE)
}

/// Resolve `$PROVE_IT_DIR`, defaulting to `$HOME/.claude/prove_it`.
pub fn prove_it_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("PROVE_IT_DIR") {
        if !dir.is_empty() {
            return Some(PathBuf::from(dir));
        }
    }
    std::env::var("HOME")
        .ok()
        .map(|home| Path::new(&home).join(".claude").join("prove_it"))
}

/// Load and merge every config layer visible from `start_dir`, returning the
/// typed effective config plus the local override path (if any existed) so
/// the dispatcher can attribute warnings back to it.
pub fn load(start_dir: &Path) -> LoadResult {
    let mut warnings = Vec::new();
    let mut raw = Value::Object(serde_json::Map::new());

    if let Some(dir) = prove_it_dir() {
        apply_layer(&mut raw, &dir.join(GLOBAL_CONFIG_FILE), &mut warnings);
    }

    for dir in ancestors_root_first(start_dir) {
        apply_layer(&mut raw, &dir.join(PROJECT_CONFIG_FILE), &mut warnings);
    }

    let local_path = local_config_path(start_dir);
    let local_config_path = if local_path.is_file() {
        apply_layer(&mut raw, &local_path, &mut warnings);
        Some(local_path)
    } else {
        None
    };

    sanitize_hooks(&mut raw, &mut warnings);

    let config: Config = serde_json::from_value(raw).unwrap_or_else(|e| {
        warnings.push(format!(
            "effective config failed to parse after sanitization ({e}); falling back to defaults"
        ));
        Config::default()
    });

    validate_config(&config, &mut warnings);

    LoadResult {
        config,
        local_config_path,
        warnings,
    }
}

fn apply_layer(raw: &mut Value, path: &Path, warnings: &mut Vec<String>) {
    let Ok(text) = std::fs::read_to_string(path) else {
        return;
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(mut layer) => {
            migrate_legacy_keys(&mut layer);
            let base = std::mem::replace(raw, Value::Null);
            *raw = merge_json(base, layer);
        }
        Err(e) => {
            warnings.push(format!("skipping unparseable config {}: {e}", path.display()));
        }
    }
}

/// Directories from the repository root down to `start_dir`, inclusive,
/// root-first. Falls back to `[start_dir]` when no `.git` ancestor exists.
fn ancestors_root_first(start_dir: &Path) -> Vec<PathBuf> {
    let mut chain = vec![start_dir.to_path_buf()];
    let mut cursor = start_dir;
    let mut found_root = false;
    while let Some(parent) = cursor.parent() {
        if cursor.join(".git").exists() {
            found_root = true;
            break;
        }
        chain.push(parent.to_path_buf());
        cursor = parent;
    }
    if !found_root && !start_dir.join(".git").exists() {
        // No repo boundary found; only the starting directory is in scope.
        return vec![start_dir.to_path_buf()];
    }
    chain.reverse();
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_config(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn loads_defaults_when_nothing_present() {
        let dir = tempdir().unwrap();
        std::env::remove_var("PROVE_IT_DIR");
        let result = load(dir.path());
        assert!(result.config.enabled);
        assert!(result.local_config_path.is_none());
    }

    #[test]
    fn project_layer_overrides_defaults() {
        let dir = tempdir().unwrap();
        write_config(
            dir.path(),
            PROJECT_CONFIG_FILE,
            r#"{"enabled": false, "sources": ["src/**/*.rs"]}"#,
        );
        let result = load(dir.path());
        assert!(!result.config.enabled);
        assert_eq!(result.config.sources, vec!["src/**/*.rs".to_string()]);
    }

    #[test]
    fn ancestor_project_configs_merge_root_first() {
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join(".git")).unwrap();
        write_config(
            root.path(),
            PROJECT_CONFIG_FILE,
            r#"{"model": "claude-3", "sources": ["a"]}"#,
        );
        let sub = root.path().join("crates/inner");
        fs::create_dir_all(&sub).unwrap();
        write_config(&sub, PROJECT_CONFIG_FILE, r#"{"sources": ["b"]}"#);

        let result = load(&sub);
        assert_eq!(result.config.model.as_deref(), Some("claude-3"));
        assert_eq!(result.config.sources, vec!["b".to_string()]);
    }

    #[test]
    fn local_override_applies_last_and_is_reported() {
        let dir = tempdir().unwrap();
        write_config(dir.path(), PROJECT_CONFIG_FILE, r#"{"model": "a"}"#);
        write_config(
            dir.path(),
            LOCAL_CONFIG_FILE,
            r#"{"model": "local-override"}"#,
        );

        let result = load(dir.path());
        assert_eq!(result.config.model.as_deref(), Some("local-override"));
        assert_eq!(
            result.local_config_path,
            Some(dir.path().join(LOCAL_CONFIG_FILE))
        );
    }

    #[test]
    fn unparseable_layer_is_skipped_with_warning() {
        let dir = tempdir().unwrap();
        write_config(dir.path(), PROJECT_CONFIG_FILE, "not json");
        let result = load(dir.path());
        assert!(result.config.enabled);
        assert!(result.warnings.iter().any(|w| w.contains("unparseable")));
    }
}
