//! The task runner (§4.G): evaluates a task's `when` clause, runs it
//! (script or agent), and folds the result into a skip-cache update.
//!
//! Spawn/timeout/kill mechanics for script tasks reuse the same
//! `csa-hooks::runner` pattern as [`crate::reviewer`]; the `when`
//! short-circuit chain is bespoke to prove_it's evaluation order.

use crate::reviewer::{self, Verdict};
use prove_it_config::{AgentTask, ScriptTask, SkipCache, SkipEntry, Task, TaskKind, WhenPredicate};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

const SKIPPED_DIR_NAMES: &[&str] = &["node_modules", ".git", "target", "dist", "build"];
const DEFAULT_SCRIPT_TIMEOUT_MS: u64 = 300_000;

/// The result of running (or declining to run) one task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Pass,
    Fail { reason: Option<String> },
    Skip { reason: String },
    Crash { reason: String },
}

/// Everything a task needs from its surrounding dispatch to evaluate its
/// `when` clause and fill in template variables.
pub struct TaskContext<'a> {
    pub repo_root: Option<&'a Path>,
    pub head: Option<String>,
    pub edited_files: &'a [String],
    pub tools_used: &'a [String],
    /// Signals written by the agent via `prove_it signal` (§4.J), persisted
    /// in session state under the `signals` key rather than carried on the
    /// current event's stdin — an agent can set one at any point in the
    /// session and it stays visible to every later hook invocation.
    pub signals: &'a [String],
    pub template_vars: &'a HashMap<String, String>,
    pub task_env: &'a HashMap<String, String>,
    pub sources: &'a [String],
    /// The config's top-level `model`, used by an agent task that sets no
    /// `model` of its own (§3: "default reviewer model for agent tasks
    /// without their own `model`").
    pub default_model: Option<&'a str>,
}

/// Run `task` to completion, consulting and updating `skip_cache`.
///
/// Returns the outcome plus, for script tasks that actually ran, their
/// combined stdout+stderr — the source of the `{{test_output}}` template
/// variable for subsequent tasks in the same dispatch (§4.G step 4).
pub fn run_task(
    task: &Task,
    ctx: &TaskContext,
    skip_cache: &mut SkipCache,
) -> (Outcome, Option<String>) {
    if !task.enabled {
        return (
            Outcome::Skip {
                reason: "task disabled".to_string(),
            },
            None,
        );
    }

    if let Some(when) = &task.when {
        if let Some(skip) = evaluate_when(when, ctx, skip_cache, &task.name) {
            return (skip, None);
        }
    }

    if task.is_async {
        spawn_detached(task, ctx);
        return (Outcome::Pass, None);
    }

    let (outcome, output) = match &task.kind {
        TaskKind::Script(script) => {
            if script.mtime {
                if let Some(skip) = mtime_skip(ctx, skip_cache, &task.name) {
                    return (skip, None);
                }
            }
            let (outcome, output) = run_script_task(script, ctx);
            (outcome, Some(output))
        }
        TaskKind::Agent(agent) => (run_agent_task(agent, ctx), None),
    };

    record_outcome(skip_cache, &task.name, ctx.head.clone(), &outcome);
    (outcome, output)
}

/// Evaluate a task's `when` clause in spec order, short-circuiting as soon
/// as a clause isn't satisfied. Returns `Some(Skip)` to skip the task, or
/// `None` to proceed with running it.
///
/// `sourcesModifiedSinceLastRun` carries a sticky-failure override: if the
/// task's last recorded run failed, this clause is treated as satisfied
/// regardless of whether sources actually changed, so a failing task keeps
/// being retried rather than going stale behind an unrelated skip.
fn evaluate_when(
    when: &WhenPredicate,
    ctx: &TaskContext,
    skip_cache: &SkipCache,
    task_name: &str,
) -> Option<Outcome> {
    if let Some(path) = &when.file_exists {
        let exists = ctx
            .repo_root
            .map(|root| root.join(path).exists())
            .unwrap_or_else(|| Path::new(path).exists());
        if !exists {
            return Some(Outcome::Skip {
                reason: format!("fileExists: '{path}' does not exist"),
            });
        }
    }

    if let Some(key) = &when.env_set {
        if std::env::var(key).is_err() {
            return Some(Outcome::Skip {
                reason: format!("envSet: '{key}' is not set"),
            });
        }
    }

    if let Some(key) = &when.env_not_set {
        if std::env::var(key).is_ok() {
            return Some(Outcome::Skip {
                reason: format!("envNotSet: '{key}' is set"),
            });
        }
    }

    if let Some(required) = &when.variables_present {
        let missing: Vec<&String> = required
            .iter()
            .filter(|k| !ctx.template_vars.contains_key(k.as_str()))
            .collect();
        if !missing.is_empty() {
            return Some(Outcome::Skip {
                reason: format!(
                    "variablesPresent: missing {}",
                    missing
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            });
        }
    }

    if when.sources_modified_since_last_run == Some(true) {
        let modified = ctx
            .edited_files
            .iter()
            .any(|f| prove_it_config::glob::is_source_file(ctx.sources, f));
        if !modified {
            let last_failed = skip_cache.get(task_name).is_some_and(|e| !e.pass);
            if last_failed {
                // Sticky failure (spec.md §4.G step 2): a prior FAIL is
                // reported again directly, without re-running the task,
                // rather than silently skipping it because nothing changed.
                return Some(Outcome::Fail {
                    reason: Some(
                        "sourcesModifiedSinceLastRun: no source changes since the last (failing) run"
                            .to_string(),
                    ),
                });
            }
            return Some(Outcome::Skip {
                reason: "sourcesModifiedSinceLastRun: no source changes since last run"
                    .to_string(),
            });
        }
    }

    if when.source_files_edited == Some(true) {
        let any_source_edited = ctx
            .edited_files
            .iter()
            .any(|f| prove_it_config::glob::is_source_file(ctx.sources, f));
        if !any_source_edited {
            return Some(Outcome::Skip {
                reason: "sourceFilesEdited: no source files were edited".to_string(),
            });
        }
    }

    if let Some(required_tools) = &when.tools_used {
        let used = required_tools.iter().any(|t| ctx.tools_used.contains(t));
        if !used {
            return Some(Outcome::Skip {
                reason: "toolsUsed: none of the configured tools were used".to_string(),
            });
        }
    }

    if let Some(expected) = &when.signal {
        if !ctx.signals.iter().any(|s| s == expected) {
            return Some(Outcome::Skip {
                reason: format!("signal {expected} absent"),
            });
        }
    }

    None
}

/// `mtime: true` (§4.G step 3): if the cached run's timestamp is newer than
/// every source file's mtime, replay that cached outcome without running
/// the script again.
fn mtime_skip(ctx: &TaskContext, skip_cache: &SkipCache, task_name: &str) -> Option<Outcome> {
    let entry = skip_cache.get(task_name)?;
    let root = ctx.repo_root?;
    if any_source_newer_than(root, ctx.sources, entry.at) {
        return None;
    }
    Some(if SkipCache::should_skip(entry, false, None) {
        Outcome::Pass
    } else {
        Outcome::Fail {
            reason: Some("mtime: replaying cached failing run; no source changed".to_string()),
        }
    })
}

/// Run a script task to completion. Returns its outcome plus the combined
/// stdout+stderr actually captured (empty string if the process never
/// produced output, e.g. a spawn failure).
fn run_script_task(script: &ScriptTask, ctx: &TaskContext) -> (Outcome, String) {
    let missing = reviewer::unresolved_template_vars(&script.command, ctx.template_vars);
    if !missing.is_empty() {
        return (
            Outcome::Crash {
                reason: format!("unknown template variable(s): {}", missing.join(", ")),
            },
            String::new(),
        );
    }
    let expanded = reviewer::substitute_template_vars(&script.command, ctx.template_vars, true);

    let mut cmd = std::process::Command::new("sh");
    cmd.arg("-c")
        .arg(&expanded)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null());
    if let Some(root) = ctx.repo_root {
        cmd.current_dir(root);
    }
    for (key, value) in ctx.task_env {
        cmd.env(key, value);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return (
                Outcome::Crash {
                    reason: format!("failed to spawn script: {e}"),
                },
                String::new(),
            )
        }
    };

    let timeout = Duration::from_millis(DEFAULT_SCRIPT_TIMEOUT_MS);
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let mut stdout = String::new();
                if let Some(mut out) = child.stdout.take() {
                    use std::io::Read;
                    let _ = out.read_to_string(&mut stdout);
                }
                let mut stderr = String::new();
                if let Some(mut err) = child.stderr.take() {
                    use std::io::Read;
                    let _ = err.read_to_string(&mut stderr);
                }
                let combined = if stderr.is_empty() {
                    stdout.clone()
                } else if stdout.is_empty() {
                    stderr.clone()
                } else {
                    format!("{stdout}\n{stderr}")
                };
                let outcome = if status.success() {
                    Outcome::Pass
                } else {
                    Outcome::Fail {
                        reason: Some(if stderr.trim().is_empty() {
                            format!("exited with code {}", status.code().unwrap_or(-1))
                        } else {
                            stderr.trim().to_string()
                        }),
                    }
                };
                return (outcome, combined);
            }
            Ok(None) => {
                if start.elapsed() >= timeout {
                    #[cfg(unix)]
                    {
                        unsafe {
                            libc::kill(-(child.id() as i32), libc::SIGKILL);
                        }
                    }
                    #[cfg(not(unix))]
                    {
                        let _ = child.kill();
                    }
                    let _ = child.wait();
                    return (
                        Outcome::Fail {
                            reason: Some(format!("timed out after {DEFAULT_SCRIPT_TIMEOUT_MS}ms")),
                        },
                        String::new(),
                    );
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                return (
                    Outcome::Crash {
                        reason: format!("wait() failed: {e}"),
                    },
                    String::new(),
                )
            }
        }
    }
}

fn run_agent_task(agent: &AgentTask, ctx: &TaskContext) -> Outcome {
    let default_command = "claude -p {prompt}";

    // `{{rule_file_contents}}` is per-task (it depends on the task's own
    // `ruleFile`), so it's layered onto the shared template vars here
    // rather than computed once in the dispatcher (§4.G step 4).
    let mut vars = ctx.template_vars.clone();
    let rule_file_contents = agent
        .rule_file
        .as_ref()
        .and_then(|path| {
            let resolved = ctx
                .repo_root
                .map(|root| root.join(path))
                .unwrap_or_else(|| Path::new(path).to_path_buf());
            std::fs::read_to_string(resolved).ok()
        })
        .unwrap_or_default();
    vars.insert("rule_file_contents".to_string(), rule_file_contents);

    let missing = reviewer::unresolved_template_vars(&agent.prompt, &vars);
    if !missing.is_empty() {
        return Outcome::Crash {
            reason: format!("unknown template variable(s): {}", missing.join(", ")),
        };
    }
    let expanded_prompt = reviewer::substitute_template_vars(&agent.prompt, &vars, false);
    let command = reviewer::effective_command(agent, default_command);
    let model = agent.model.as_deref().or(ctx.default_model);
    let command =
        reviewer::with_model_and_tools_flags(&command, model, agent.allowed_tools.as_deref());

    if !reviewer::binary_available(&command) {
        return Outcome::Fail {
            reason: Some(format!(
                "reviewer binary not found on PATH for command '{command}'"
            )),
        };
    }

    match reviewer::run_agent_command(&command, &expanded_prompt, agent.timeout, ctx.task_env) {
        Ok((stdout, stderr, exit_code)) => {
            let text = reviewer::extract_output(agent.output_mode, &stdout, &stderr);
            match reviewer::parse_verdict(&text, exit_code) {
                Verdict::Pass => Outcome::Pass,
                Verdict::Fail(reason) => Outcome::Fail { reason },
                Verdict::Skip(reason) => Outcome::Skip {
                    reason: reason.unwrap_or_else(|| "agent returned SKIP".to_string()),
                },
            }
        }
        Err(e) => Outcome::Crash {
            reason: e.to_string(),
        },
    }
}

/// Fire a task's command without waiting for it, for `async: true` tasks:
/// the dispatcher's permission decision never blocks on these, so neither
/// timeout enforcement nor a skip-cache update applies here (§9: "the
/// orchestrator does not reap children and does not fold their outcomes
/// into its decision").
///
/// Script tasks still owe the skip cache a completion record (§4.G step 6
/// applies "if script"). Since the dispatcher process is gone by the time
/// the child finishes, the child reports its own result back through the
/// `record` subcommand (§4.J) rather than the parent writing it directly.
fn spawn_detached(task: &Task, ctx: &TaskContext) {
    let command = match &task.kind {
        TaskKind::Script(s) => s.command.clone(),
        TaskKind::Agent(a) => {
            let default_command = "claude -p {prompt}";
            let command = reviewer::effective_command(a, default_command);
            let model = a.model.as_deref().or(ctx.default_model);
            reviewer::with_model_and_tools_flags(&command, model, a.allowed_tools.as_deref())
        }
    };
    let is_script = matches!(task.kind, TaskKind::Script(_));
    let expanded = if is_script {
        reviewer::substitute_template_vars(&command, ctx.template_vars, true)
    } else {
        let prompt_template = match &task.kind {
            TaskKind::Agent(a) => a.prompt.as_str(),
            TaskKind::Script(_) => unreachable!("is_script branch handles Script above"),
        };
        let expanded_prompt =
            reviewer::substitute_template_vars(prompt_template, ctx.template_vars, false);
        let mut prompt_vars = HashMap::new();
        prompt_vars.insert("prompt".to_string(), expanded_prompt);
        reviewer::substitute_variables(&command, &prompt_vars)
    };

    let expanded = if is_script {
        if let Ok(exe) = std::env::current_exe() {
            format!(
                "({expanded}); {} record --name {} --result $?",
                exe.display(),
                reviewer::shell_escape(&task.name)
            )
        } else {
            expanded
        }
    } else {
        expanded
    };

    let mut cmd = std::process::Command::new("sh");
    cmd.arg("-c")
        .arg(&expanded)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .stdin(Stdio::null());
    if let Some(root) = ctx.repo_root {
        cmd.current_dir(root);
    }
    for (key, value) in ctx.task_env {
        cmd.env(key, value);
    }
    let _ = cmd.spawn();
}

fn record_outcome(
    skip_cache: &mut SkipCache,
    task_name: &str,
    head: Option<String>,
    outcome: &Outcome,
) {
    let pass = matches!(outcome, Outcome::Pass);
    let _ = skip_cache.record(
        task_name,
        SkipEntry {
            at: chrono::Utc::now().timestamp(),
            head,
            pass,
        },
    );
}

/// Whether any entry under `sources` within `repo_root` has been modified
/// more recently than `since_unix`, skipping well-known build/vendor
/// directories. Used by script tasks with `mtime: true` to avoid rerunning
/// unchanged work (§4.G step 3).
pub fn any_source_newer_than(repo_root: &Path, sources: &[String], since_unix: i64) -> bool {
    walk(repo_root, repo_root, sources, since_unix)
}

fn walk(root: &Path, dir: &Path, sources: &[String], since_unix: i64) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || SKIPPED_DIR_NAMES.contains(&name.as_ref()) {
            continue;
        }
        if path.is_dir() {
            if walk(root, &path, sources, since_unix) {
                return true;
            }
            continue;
        }
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        if !prove_it_config::glob::is_source_file(sources, &rel) {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            if let Ok(modified) = meta.modified() {
                if let Ok(duration) = modified.duration_since(std::time::UNIX_EPOCH) {
                    if duration.as_secs() as i64 > since_unix {
                        return true;
                    }
                }
            }
        }
    }
    false
}
