//! The reviewer runner: spawns an agent task's CLI and parses its verdict
//! (§4.F).
//!
//! Process spawning (shell-escaping, template substitution, poll-loop
//! timeout, process-group `SIGKILL`) is lifted straight from
//! `csa-hooks::runner::run_hook`. Verdict parsing generalizes
//! `cli-sub-agent::review_consensus::parse_review_verdict`'s
//! tokenize-and-scan approach from a 2-way CLEAN/HAS_ISSUES grammar to
//! prove_it's 3-way PASS/FAIL/SKIP grammar, with reasons and a non-zero-exit
//! classifier fallback.

use anyhow::{bail, Result};
use prove_it_config::{AgentTask, OutputMode};
use std::collections::HashMap;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// A task's verdict, as parsed from its output.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Pass,
    Fail(Option<String>),
    Skip(Option<String>),
}

/// Escape a string for safe shell usage by wrapping in single quotes.
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Substitute `{key}` placeholders with shell-escaped values in a single
/// pass; already-substituted content is never re-scanned. Unknown keys are
/// left untouched by default — callers that need to hard-error on an
/// unknown variable should check the returned set of unresolved keys first.
pub fn substitute_variables(template: &str, variables: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '{' {
            let mut key = String::new();
            let mut found_close = false;
            for inner_ch in chars.by_ref() {
                if inner_ch == '}' {
                    found_close = true;
                    break;
                }
                key.push(inner_ch);
            }
            if found_close {
                if let Some(value) = variables.get(&key) {
                    result.push_str(&shell_escape(value));
                } else {
                    result.push('{');
                    result.push_str(&key);
                    result.push('}');
                }
            } else {
                result.push('{');
                result.push_str(&key);
            }
        } else {
            result.push(ch);
        }
    }
    result
}

/// Substitute `{{key}}` placeholders (the task-level template-variable
/// syntax used in `command`/`prompt` fields, §4.G step 4). Distinct from
/// [`substitute_variables`], which handles the reviewer command template's
/// single-brace `{prompt}` placeholder — the two namespaces never overlap
/// in a single string.
///
/// `shell_escape_values` controls whether each substituted value is wrapped
/// in single quotes: `true` for script `command` strings, which are handed
/// straight to `sh -c` and need injection-safe splicing; `false` for agent
/// `prompt` text, which is plain content that only gets shell-escaped once,
/// as a whole, when it later fills the reviewer command template's
/// `{prompt}` slot.
pub fn substitute_template_vars(
    template: &str,
    variables: &HashMap<String, String>,
    shell_escape_values: bool,
) -> String {
    let mut result = String::with_capacity(template.len());
    let mut pos = 0;
    while pos < template.len() {
        match template[pos..].find("{{") {
            Some(rel_start) => {
                let open = pos + rel_start;
                result.push_str(&template[pos..open]);
                let key_start = open + 2;
                match template[key_start..].find("}}") {
                    Some(rel_end) => {
                        let key = &template[key_start..key_start + rel_end];
                        if let Some(value) = variables.get(key) {
                            if shell_escape_values {
                                result.push_str(&shell_escape(value));
                            } else {
                                result.push_str(value);
                            }
                        }
                        pos = key_start + rel_end + 2;
                    }
                    None => {
                        result.push_str(&template[open..]);
                        pos = template.len();
                    }
                }
            }
            None => {
                result.push_str(&template[pos..]);
                pos = template.len();
            }
        }
    }
    result
}

/// Every `{{key}}` referenced in `template` that has no entry in
/// `variables`. Spec.md §9: implementations MUST refuse unknown template
/// variable names rather than silently expanding to empty.
pub fn unresolved_template_vars(template: &str, variables: &HashMap<String, String>) -> Vec<String> {
    let mut missing = Vec::new();
    let mut pos = 0;
    while let Some(start) = template[pos..].find("{{") {
        let start = pos + start + 2;
        let Some(end) = template[start..].find("}}") else {
            break;
        };
        let key = &template[start..start + end];
        if !variables.contains_key(key) && !missing.contains(&key.to_string()) {
            missing.push(key.to_string());
        }
        pos = start + end + 2;
    }
    missing
}

/// Every `{key}` referenced in `template` that has no entry in `variables`.
pub fn unresolved_variables(template: &str, variables: &HashMap<String, String>) -> Vec<String> {
    let mut missing = Vec::new();
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '{' {
            let mut key = String::new();
            let mut found_close = false;
            for inner_ch in chars.by_ref() {
                if inner_ch == '}' {
                    found_close = true;
                    break;
                }
                key.push(inner_ch);
            }
            if found_close && !variables.contains_key(&key) {
                missing.push(key);
            }
        }
    }
    missing
}

/// The actual command line to run for an agent task. A `model` starting
/// with `gpt-` auto-switches the default `claude` invocation to `codex exec`
/// unless the task set an explicit `command` (§4.F: "a gpt- model with the
/// default command routes to the Codex CLI instead of Claude Code").
pub fn effective_command(task: &AgentTask, default_command: &str) -> String {
    if task.command != default_command {
        return task.command.clone();
    }
    if task.model.as_deref().is_some_and(|m| m.starts_with("gpt-")) {
        return "codex exec -".to_string();
    }
    task.command.clone()
}

/// Whether the binary named by the first word of `command` is on `PATH`.
pub fn binary_available(command: &str) -> bool {
    let bin = command.split_whitespace().next().unwrap_or("");
    !bin.is_empty() && which::which(bin).is_ok()
}

/// Append `--model <model>` and `--allowedTools <list>` to `command` when its
/// binary is `claude` or `codex` and the task configured the corresponding
/// option (§4.F step 3). Left untouched for any other reviewer binary, since
/// those flags aren't part of a custom CLI's contract.
pub fn with_model_and_tools_flags(
    command: &str,
    model: Option<&str>,
    allowed_tools: Option<&[String]>,
) -> String {
    let bin = command.split_whitespace().next().unwrap_or("");
    let bin_name = Path::new(bin).file_name().and_then(|n| n.to_str()).unwrap_or(bin);
    if bin_name != "claude" && bin_name != "codex" {
        return command.to_string();
    }

    let mut out = command.to_string();
    if let Some(model) = model {
        out.push_str(" --model ");
        out.push_str(&shell_escape(model));
    }
    if let Some(tools) = allowed_tools {
        if !tools.is_empty() {
            out.push_str(" --allowedTools ");
            out.push_str(&shell_escape(&tools.join(",")));
        }
    }
    out
}

/// Environment variables every reviewer subprocess gets, non-negotiably:
/// deterministic locale, no nested-agent confusion, and `prove_it` disabled
/// inside the spawned agent so it can't recursively trigger itself.
pub fn non_negotiable_env() -> Vec<(&'static str, Option<&'static str>)> {
    vec![
        ("LC_ALL", Some("C")),
        ("CLAUDECODE", None),
        ("PROVE_IT_DISABLED", Some("1")),
    ]
}

/// Run an agent task's command through `sh -c`, with template substitution,
/// a process-group timeout, and the non-negotiable environment overrides.
/// Returns the captured stdout and exit code.
pub fn run_agent_command(
    command: &str,
    prompt: &str,
    timeout_ms: u64,
    extra_env: &HashMap<String, String>,
) -> Result<(String, String, i32)> {
    let mut vars = HashMap::new();
    vars.insert("prompt".to_string(), prompt.to_string());
    let expanded = substitute_variables(command, &vars);

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&expanded)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null());

    for (key, value) in extra_env {
        cmd.env(key, value);
    }
    for (key, value) in non_negotiable_env() {
        match value {
            Some(v) => {
                cmd.env(key, v);
            }
            None => {
                cmd.env_remove(key);
            }
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn()?;
    let timeout = Duration::from_millis(timeout_ms);
    let start = Instant::now();

    loop {
        match child.try_wait()? {
            Some(status) => {
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
                return Ok((stdout, stderr, status.code().unwrap_or(-1)));
            }
            None => {
                if start.elapsed() >= timeout {
                    #[cfg(unix)]
                    {
                        // SAFETY: kill() is async-signal-safe; negative pid
                        // targets the process group created above.
                        unsafe {
                            libc::kill(-(child.id() as i32), libc::SIGKILL);
                        }
                    }
                    #[cfg(not(unix))]
                    {
                        let _ = child.kill();
                    }
                    let _ = child.wait();
                    bail!("agent command timed out after {timeout_ms}ms");
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

/// Reduce raw process output to the text the verdict parser should scan,
/// according to the task's `outputMode` (§4.F step 6). `text` falls back to
/// `stderr` when `stdout` is empty; `jsonl`/`json` always parse `stdout` (an
/// agent's diagnostic chatter belongs on stderr, not in its structured
/// response), falling back to the raw text only when that structure isn't
/// there to parse.
pub fn extract_output(output_mode: OutputMode, stdout: &str, stderr: &str) -> String {
    match output_mode {
        OutputMode::Text => {
            if stdout.trim().is_empty() {
                stderr.trim().to_string()
            } else {
                stdout.trim().to_string()
            }
        }
        OutputMode::Jsonl => stdout
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .find(|v| {
                v.get("type").and_then(|t| t.as_str()) == Some("agent_message")
                    && v.get("completed").and_then(|c| c.as_bool()) == Some(true)
            })
            .and_then(|v| v.get("text").and_then(|t| t.as_str()).map(|s| s.to_string()))
            .unwrap_or_else(|| stdout.to_string()),
        OutputMode::Json => serde_json::from_str::<serde_json::Value>(stdout)
            .ok()
            .map(|v| {
                if v.get("subtype").and_then(|s| s.as_str()) == Some("error_max_turns") {
                    return "SKIP: agent hit its max-turns limit".to_string();
                }
                v.get("result")
                    .and_then(|t| t.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| stdout.to_string())
            })
            .unwrap_or_else(|| stdout.to_string()),
    }
}

const TOKENS: &[(&str, fn(Option<String>) -> Verdict)] = &[
    ("PASS", |_| Verdict::Pass),
    ("FAIL", Verdict::Fail),
    ("SKIP", Verdict::Skip),
];

/// Parse a PASS/FAIL[: reason]/SKIP[: reason] verdict out of reviewer
/// output, tolerant of markdown emphasis (`**PASS**`) and surrounding
/// narration. Falls back to the process exit code when no token is found.
pub fn parse_verdict(output: &str, exit_code: i32) -> Verdict {
    for line in output.lines().rev() {
        let stripped = strip_markdown_emphasis(line.trim());
        if let Some(verdict) = scan_line_for_token(&stripped) {
            return verdict;
        }
    }
    // No explicit token anywhere; fall back to the whole text once more in
    // case the verdict is embedded mid-paragraph rather than on its own line.
    let folded = strip_markdown_emphasis(output);
    if let Some(verdict) = scan_line_for_token(&folded) {
        return verdict;
    }

    if exit_code == 0 {
        Verdict::Pass
    } else {
        Verdict::Fail(None)
    }
}

fn strip_markdown_emphasis(s: &str) -> String {
    s.replace("**", "").replace('*', "").replace('_', "")
}

fn scan_line_for_token(line: &str) -> Option<Verdict> {
    for (token, build) in TOKENS {
        if let Some(pos) = find_word(line, token) {
            let rest = line[pos + token.len()..].trim_start();
            let reason = rest
                .strip_prefix(':')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty());
            return Some(build(reason));
        }
    }
    None
}

/// Find `token` as a whole word (case-insensitive) in `line`, returning its
/// byte offset.
fn find_word(line: &str, token: &str) -> Option<usize> {
    let upper = line.to_ascii_uppercase();
    let mut search_from = 0;
    while let Some(rel) = upper[search_from..].find(token) {
        let pos = search_from + rel;
        let before_ok = pos == 0
            || !upper.as_bytes()[pos - 1].is_ascii_alphanumeric();
        let after = pos + token.len();
        let after_ok = after >= upper.len() || !upper.as_bytes()[after].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return Some(pos);
        }
        search_from = pos + token.len();
    }
    None
}
