//! The CLI surface (§4.J): a thin `clap` shell around [`crate::dispatch`].

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "prove-it", version)]
#[command(about = "Verification orchestrator for AI coding assistant lifecycle events")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Dispatch one lifecycle or git hook event named `key`. Reads the
    /// event payload from stdin; the decision is written to stdout.
    Hook {
        /// `claude:<event>` or `git:<event>`, e.g. `claude:PreToolUse`,
        /// `claude:Stop`, `git:pre-commit`.
        key: String,
    },

    /// Run one of prove_it's own hardcoded checks directly (currently only
    /// `clean-worktree`, which fails if `git status --porcelain` reports any
    /// changes), bypassing event matching entirely. For git hook shims that
    /// just want a guard, not a configured `hooks` entry.
    RunBuiltin {
        /// The builtin's name, e.g. `clean-worktree`.
        name: String,
    },

    /// Manually record a task's outcome in the skip cache, without running
    /// it. Lets external CI report a result prove_it should treat as
    /// already-verified.
    Record {
        #[arg(long)]
        name: String,
        #[arg(long)]
        result: i32,
    },

    /// Set an out-of-band signal visible to later `when.signal` task
    /// clauses for the rest of the current session (resolved from
    /// `CLAUDE_SESSION_ID`).
    Signal {
        #[arg(long)]
        name: String,
    },

    /// Print the resolved `PROVE_IT_DIR`, for shell integration scripts.
    Prefix,
}
