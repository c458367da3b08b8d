//! The dispatcher (§4.H): the single entry point every hook invocation goes
//! through. Reads the event off stdin, resolves config, runs the matching
//! tasks in order, and emits a decision.
//!
//! Overall shape follows `cli-sub-agent::main`'s "parse input, resolve
//! config, dispatch to a handler, print a result" pipeline; hook-entry
//! selection generalizes `csa-hooks::config::HooksConfig::get_for_event`
//! from a single command-per-event lookup to event + matcher + triggers.

use prove_it_config::{Config, HookEntry, HookEntryType, SkipCache, Task};
use prove_it_hooks::reviewer::shell_escape;
use prove_it_hooks::task::{run_task, Outcome, TaskContext};
use prove_it_session::git;
use prove_it_session::store::{SessionBaseline, SessionStore};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Events the host family treats with the Stop "approve"/"block" decision
/// shape (§4.H step 7), as opposed to PreToolUse's permission-decision shape.
const STOP_LIKE_EVENTS: &[&str] = &["Stop", "SubagentStop"];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HookInput {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    tool_input: Option<Value>,
}

/// The aggregated result of running a hook entry's tasks: the first
/// non-async failure, if any, plus whatever the task itself said.
struct FirstFail {
    task_name: String,
    reason: Option<String>,
    deny_on_fail: bool,
}

/// Dispatch a key of the form `claude:<event>` or `git:<event>` (§4.H,
/// §6's "Git hook protocol: invoked as `prove_it hook git:<event>`"). A key
/// with no `type:` prefix is treated as a bare Claude event name, for
/// callers that already know they only register Claude hooks. Returns the
/// process exit code.
pub fn run(key: &str) -> i32 {
    if std::env::var("PROVE_IT_DISABLED").is_ok() {
        return 0;
    }

    let (wanted_type, event) = match key.split_once(':') {
        Some(("claude", event)) => (Some(HookEntryType::Claude), event),
        Some(("git", event)) => (Some(HookEntryType::Git), event),
        Some((_, event)) => (None, event),
        None => (None, key),
    };

    let mut raw_stdin = String::new();
    let _ = std::io::stdin().read_to_string(&mut raw_stdin);

    // Parsed before config/root resolution so `CLAUDE_PROJECT_DIR` and the
    // event's own `cwd` field (§6) can both feed into which directory we
    // resolve config and the repo root from.
    let input: HookInput = if raw_stdin.trim().is_empty() {
        HookInput::default()
    } else {
        match serde_json::from_str(&raw_stdin) {
            Ok(input) => input,
            Err(e) => {
                print_claude_decision(event, false, &format!("failed to parse hook input: {e}"), None);
                return 0;
            }
        }
    };

    // §6: `CLAUDE_PROJECT_DIR` overrides project-root detection; absent
    // that, fall back to the event's own `cwd` field, then the process's
    // actual working directory.
    let cwd = std::env::var("CLAUDE_PROJECT_DIR")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .or_else(|| input.cwd.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let load_result = prove_it_config::load(&cwd);
    for warning in &load_result.warnings {
        tracing::warn!("{warning}");
    }
    let config = load_result.config;

    if !config.enabled {
        return 0;
    }

    let repo_root = git::repo_root(&cwd).ok().flatten().unwrap_or_else(|| cwd.clone());

    if is_ignored_path(&config, &repo_root) {
        return 0;
    }

    let matching: Vec<&HookEntry> = config
        .hooks
        .iter()
        .filter(|e| e.event == event && wanted_type.is_none_or(|t| t == e.entry_type))
        .collect();

    // §6: `CLAUDE_SESSION_ID` is the alternate session id source when the
    // event payload doesn't carry one.
    let session_id = input
        .session_id
        .clone()
        .or_else(|| std::env::var("CLAUDE_SESSION_ID").ok().filter(|s| !s.is_empty()));
    let store = SessionStore::new(prove_it_config::prove_it_dir().unwrap_or_else(|| repo_root.clone()).join("sessions"));
    let head = git::head_sha(&repo_root).ok().flatten();

    if event == "SessionStart" {
        let status_hash = git::status_hash(&repo_root).unwrap_or_default();
        let _ = store.ensure_baseline(
            session_id.as_deref(),
            SessionBaseline {
                head: head.clone(),
                status_hash,
                root_dir: repo_root.display().to_string(),
                started_at: chrono::Utc::now().timestamp(),
            },
        );
        // SessionStart's output is merged straight into assistant context by
        // the host (§4.H step 4), so it is plain text, never JSON (§6).
        println!(
            "prove_it: verification is active for this project ({} configured hook(s)).",
            config.hooks.len()
        );
        return 0;
    }

    // A new user turn resets the turn-scoped edit/tool-use bookkeeping
    // (§3: `sourceFilesEdited`/`toolsUsed` count "since last turn-boundary
    // reset"), independent of whether any hook entry is actually configured
    // for this event.
    if event == "UserPromptSubmit" {
        let _ = store.reset_turn_state(session_id.as_deref());
    }

    if matching.is_empty() {
        return 0;
    }
    let entry_type = matching[0].entry_type;

    let tool_name = input.tool_name.clone();
    let bash_command = tool_name
        .as_deref()
        .filter(|t| *t == "Bash")
        .and_then(|_| input.tool_input.as_ref())
        .and_then(|v| v.get("command"))
        .and_then(|v| v.as_str());

    let current_edited_file = tool_name
        .as_deref()
        .filter(|t| config.is_edit_like_tool(t, bash_command))
        .and_then(|_| {
            input
                .tool_input
                .as_ref()
                .and_then(|v| v.get("file_path").or_else(|| v.get("path")))
                .and_then(|v| v.as_str())
        })
        .map(|s| s.to_string());

    // Fold this event's contribution into the session's turn-scoped state
    // before reading it back, so `sourceFilesEdited`/`toolsUsed` see every
    // edit/tool-use accumulated since the last reset, not just this one
    // (§3: "current session recorded ... since last turn-boundary reset").
    if let Some(t) = &tool_name {
        let _ = store.append_string_list(session_id.as_deref(), prove_it_session::TOOLS_USED_KEY, t);
    }
    if let Some(f) = &current_edited_file {
        let _ = store.append_string_list(session_id.as_deref(), prove_it_session::EDITED_SOURCES_KEY, f);
    }
    let edited_files = store.load_string_list(session_id.as_deref(), prove_it_session::EDITED_SOURCES_KEY);
    let tools_used = store.load_string_list(session_id.as_deref(), prove_it_session::TOOLS_USED_KEY);
    let signals = store.load_string_list(session_id.as_deref(), prove_it_session::SIGNALS_KEY);

    let mut template_vars = HashMap::new();
    template_vars.insert("project_dir".to_string(), repo_root.display().to_string());
    if let Some(sid) = &session_id {
        template_vars.insert("session_id".to_string(), sid.clone());
    }
    if let Some(t) = &tool_name {
        template_vars.insert("tool_name".to_string(), t.clone());
    }
    if let Some(f) = &current_edited_file {
        template_vars.insert("file_path".to_string(), f.clone());
    }
    if let Some(baseline) = store.load(session_id.as_deref()).ok().flatten().and_then(|s| s.baseline) {
        if let Some(base_head) = &baseline.head {
            template_vars.insert(
                "session_diff".to_string(),
                session_diff(&repo_root, base_head),
            );
        }
    }
    template_vars.insert(
        "staged_diff".to_string(),
        git::staged_diff(&repo_root).unwrap_or_default(),
    );

    // Same file `record` (§4.J) and `load` (§4.A) resolve (§4.D): a
    // separately-computed path here would let an async task's self-reported
    // result land somewhere the next dispatch never looks.
    let cache_path = load_result
        .local_config_path
        .clone()
        .unwrap_or_else(|| prove_it_config::local_config_path(&repo_root));
    let mut skip_cache = SkipCache::load(&cache_path);

    let mut first_fail: Option<FirstFail> = None;

    'entries: for entry in &matching {
        if let Some(matcher) = &entry.matcher {
            if !tool_name_matches(matcher, tool_name.as_deref()) {
                continue;
            }
        }
        if let Some(triggers) = &entry.triggers {
            match bash_command {
                Some(command) if triggers_all_match(triggers, command) => {}
                _ => continue,
            }
        }

        for task in &entry.tasks {
            let ctx = TaskContext {
                repo_root: Some(repo_root.as_path()),
                head: head.clone(),
                edited_files: &edited_files,
                tools_used: &tools_used,
                signals: &signals,
                template_vars: &template_vars,
                task_env: &config.task_env,
                sources: &config.sources,
                default_model: config.model.as_deref(),
            };
            let (outcome, output) = run_task(task, &ctx, &mut skip_cache);
            if let Some(output) = output {
                template_vars.insert("test_output".to_string(), output);
            }
            log_outcome(&store, session_id.as_deref(), event, task, &outcome);

            match outcome {
                Outcome::Pass | Outcome::Skip { .. } => {}
                Outcome::Fail { reason } => {
                    first_fail = Some(FirstFail {
                        task_name: task.name.clone(),
                        reason,
                        deny_on_fail: task.deny_on_fail,
                    });
                    break 'entries;
                }
                Outcome::Crash { reason } => {
                    first_fail = Some(FirstFail {
                        task_name: task.name.clone(),
                        reason: Some(reason),
                        deny_on_fail: task.deny_on_fail,
                    });
                    break 'entries;
                }
            }
        }
    }

    match entry_type {
        HookEntryType::Claude if STOP_LIKE_EVENTS.contains(&event) => {
            emit_stop_result(first_fail)
        }
        HookEntryType::Claude => emit_claude_result(event, first_fail, input.tool_input.as_ref()),
        HookEntryType::Git => emit_git_result(first_fail),
    }
}

/// `prove_it run_builtin <name>`: a handful of checks implemented directly
/// on §4.G primitives for use from a task's `command` string (§4.J), rather
/// than shelling out to something external. Exit code follows the same
/// PASS=0/FAIL=1 convention as any other script task.
pub fn run_builtin(name: &str) -> i32 {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let repo_root = git::repo_root(&cwd).ok().flatten().unwrap_or(cwd);

    match name {
        "clean-worktree" => {
            if !git::is_repo(&repo_root) {
                eprintln!("prove_it: run_builtin clean-worktree: not a git repository");
                return 1;
            }
            match std::process::Command::new("git")
                .args(["status", "--porcelain=v1"])
                .current_dir(&repo_root)
                .output()
            {
                Ok(output) if output.status.success() && output.stdout.is_empty() => 0,
                Ok(output) if output.status.success() => {
                    eprintln!("prove_it: working tree has uncommitted changes");
                    1
                }
                _ => {
                    eprintln!("prove_it: run_builtin clean-worktree: git status failed");
                    1
                }
            }
        }
        other => {
            eprintln!("prove_it: unknown builtin '{other}'");
            1
        }
    }
}

/// `prove_it record --name <n> --result <code>` (§4.J): lets a script
/// record its own outcome in the project's skip cache from outside a normal
/// dispatch — used by async tasks reporting their completion (§4.G) and by
/// test scripts run standalone in CI.
pub fn record(name: &str, result: i32) -> i32 {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let repo_root = git::repo_root(&cwd).ok().flatten().unwrap_or(cwd);
    let head = git::head_sha(&repo_root).ok().flatten();

    let local_path = prove_it_config::local_config_path(&repo_root);
    let mut cache = SkipCache::load(&local_path);
    let outcome = cache.record(
        name,
        prove_it_config::SkipEntry {
            at: chrono::Utc::now().timestamp(),
            head,
            pass: result == 0,
        },
    );
    match outcome {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("prove_it: failed to record '{name}': {e}");
            1
        }
    }
}

/// `prove_it signal --name <s>` (§3/§4.J): the out-of-band channel a running
/// agent writes to so a later task's `when.signal` clause can see it — the
/// flag lives in session state (the `signals` key), not on any single
/// event's stdin, so it is visible to every hook invocation for the rest of
/// the session once set. The session is resolved from `CLAUDE_SESSION_ID`
/// since this subcommand is invoked standalone, outside any hook dispatch
/// that would otherwise supply a `session_id` on stdin.
pub fn signal(name: &str) -> i32 {
    let Ok(session_id) = std::env::var("CLAUDE_SESSION_ID") else {
        eprintln!("prove_it: signal: CLAUDE_SESSION_ID is not set");
        return 1;
    };
    if session_id.is_empty() {
        eprintln!("prove_it: signal: CLAUDE_SESSION_ID is empty");
        return 1;
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let repo_root = git::repo_root(&cwd).ok().flatten().unwrap_or(cwd);
    let store = SessionStore::new(
        prove_it_config::prove_it_dir()
            .unwrap_or_else(|| repo_root.clone())
            .join("sessions"),
    );
    match store.append_string_list(Some(&session_id), prove_it_session::SIGNALS_KEY, name) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("prove_it: failed to record signal '{name}': {e}");
            1
        }
    }
}

fn is_ignored_path(config: &Config, repo_root: &Path) -> bool {
    let home = std::env::var("HOME").unwrap_or_default();
    config.ignored_paths.iter().any(|p| {
        let expanded = if let Some(rest) = p.strip_prefix("~/") {
            format!("{home}/{rest}")
        } else {
            p.clone()
        };
        repo_root.starts_with(&expanded)
    })
}

fn tool_name_matches(matcher: &str, tool_name: Option<&str>) -> bool {
    let Some(tool_name) = tool_name else {
        return false;
    };
    regex::Regex::new(&format!("^(?:{matcher})$"))
        .map(|re| re.is_match(tool_name))
        .unwrap_or(false)
}

/// Every configured trigger regex must match the intercepted bash command
/// (§3: "`triggers` ([regex]) matched against the intercepted shell
/// command"; §4.H step 5: "every triggers regex matches ... tool_input.command
/// (bash-only; non-bash tools with triggers are excluded)").
fn triggers_all_match(triggers: &[String], command: &str) -> bool {
    triggers.iter().all(|pattern| {
        regex::Regex::new(pattern)
            .map(|re| re.is_match(command))
            .unwrap_or(false)
    })
}

/// Concatenated unified diffs of every file changed since `base`, for the
/// `{{session_diff}}` template variable (§4.E), truncated once across the
/// whole accumulation rather than per file.
fn session_diff(repo_root: &Path, base: &str) -> String {
    let Ok(changed) = git::diff_files(repo_root, base, &[]) else {
        return String::new();
    };
    let accumulated = changed
        .iter()
        .filter_map(|path| {
            prove_it_session::diff::diff_against_baseline(repo_root, base, path)
                .ok()
                .flatten()
        })
        .collect::<Vec<_>>()
        .join("\n");
    prove_it_session::diff::truncate_diff_output(
        &accumulated,
        prove_it_session::diff::DEFAULT_DIFF_CHAR_BUDGET,
    )
}

fn log_outcome(
    store: &SessionStore,
    session_id: Option<&str>,
    event: &str,
    task: &Task,
    outcome: &Outcome,
) {
    if task.quiet {
        return;
    }
    let (verdict, reason): (&str, Option<String>) = match outcome {
        Outcome::Pass => ("pass", None),
        Outcome::Skip { reason } => ("skip", Some(reason.clone())),
        Outcome::Fail { reason } => ("fail", reason.clone()),
        Outcome::Crash { reason } => ("crash", Some(reason.clone())),
    };
    let _ = store.append_log(
        session_id,
        &json!({
            "at": chrono::Utc::now().timestamp_millis(),
            "sessionId": session_id,
            "event": event,
            "reviewer": task.name,
            "status": verdict.to_ascii_uppercase(),
            "reason": reason,
        }),
    );
}

fn print_claude_decision(event: &str, allow: bool, reason: &str, updated_input: Option<&Value>) {
    let decision = if allow { "allow" } else { "deny" };
    let mut hook_specific = json!({
        "hookEventName": event,
        "permissionDecision": decision,
        "permissionDecisionReason": reason,
    });
    if let (Some(updated), true) = (updated_input, allow) {
        hook_specific["updatedInput"] = updated.clone();
    }
    println!(
        "{}",
        json!({ "hookSpecificOutput": hook_specific })
    );
}

/// PreToolUse-family decision (§4.H step 7, §6): all-PASS allows the action
/// through; a FAIL either denies outright (`deny_on_fail` tasks — pure
/// policy checks) or, the canonical path for commit-boundary verification
/// (DESIGN.md open question #1), allows the action through with its
/// `tool_input.command` rewritten to a stub that fails loudly instead of
/// running the original command.
fn emit_claude_result(event: &str, first_fail: Option<FirstFail>, tool_input: Option<&Value>) -> i32 {
    match first_fail {
        None => {
            print_claude_decision(event, true, "all verification tasks passed", None);
            0
        }
        Some(FirstFail {
            task_name,
            reason,
            deny_on_fail,
        }) => {
            let reason = reason.unwrap_or_else(|| "verification failed".to_string());
            let message = format!("prove_it: task '{task_name}' failed: {reason}");

            if deny_on_fail {
                print_claude_decision(event, false, &message, None);
                return 0;
            }

            match rewritten_input(tool_input, &message) {
                Some(updated) => print_claude_decision(event, true, &message, Some(&updated)),
                None => print_claude_decision(event, false, &message, None),
            }
            0
        }
    }
}

/// Build the rewritten `tool_input` for the allow+rewrite stub (§4.H step 7,
/// S2): the original `command` field is replaced with one that fails loudly
/// and prints `message` on stderr; every other field of `tool_input` is
/// left untouched. `None` when the original input wasn't a bash command
/// (nothing sensible to rewrite), in which case the caller falls back to a
/// straight deny.
fn rewritten_input(tool_input: Option<&Value>, message: &str) -> Option<Value> {
    let original = tool_input?;
    if !original.get("command")?.is_string() {
        return None;
    }
    let mut updated = original.clone();
    let stub = format!("echo {} 1>&2; exit 1", shell_escape(message));
    updated["command"] = json!(stub);
    Some(updated)
}

/// Stop-family decision (§4.H step 7, §6): `{"decision": "approve"|"block",
/// "reason": ...}`.
fn emit_stop_result(first_fail: Option<FirstFail>) -> i32 {
    match first_fail {
        None => {
            println!(
                "{}",
                json!({ "decision": "approve", "reason": "all verification tasks passed" })
            );
        }
        Some(FirstFail { task_name, reason, .. }) => {
            let reason = reason.unwrap_or_else(|| "verification failed".to_string());
            println!(
                "{}",
                json!({
                    "decision": "block",
                    "reason": format!("task '{task_name}' failed: {reason}"),
                })
            );
        }
    }
    0
}

fn emit_git_result(first_fail: Option<FirstFail>) -> i32 {
    match first_fail {
        None => 0,
        Some(FirstFail { task_name, reason, .. }) => {
            let reason = reason.unwrap_or_else(|| "verification failed".to_string());
            eprintln!("prove_it: task '{task_name}' failed: {reason}");
            1
        }
    }
}
