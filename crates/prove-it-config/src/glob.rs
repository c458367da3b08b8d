//! Glob matching and source-file classification (§4.I).
//!
//! prove_it's globs are a small fixed grammar (`**`, `*`, `?`, literals), not
//! a filesystem-walking library, so this converts patterns straight to
//! `regex` rather than pulling in `glob`/`ignore` the way the teacher does
//! for its on-disk search features. Naming follows the small-pure-function
//! style of `csa-hooks::runner`.

use regex::Regex;

const SKIPPED_DIR_NAMES: &[&str] = &["node_modules", ".git", "target", "dist", "build"];

/// Compile a prove_it glob pattern into an anchored regex.
///
/// Grammar: `**` matches any sequence including `/`; `*` matches any
/// sequence excluding `/`; `?` matches exactly one non-`/` character;
/// everything else is a literal. The whole pattern is anchored at both
/// ends, matched against a `/`-separated relative path.
pub fn glob_to_regex(pattern: &str) -> Regex {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            _ => {
                if is_regex_meta(c) {
                    out.push('\\');
                }
                out.push(c);
            }
        }
    }
    out.push('$');
    Regex::new(&out).expect("glob_to_regex always produces a valid pattern")
}

fn is_regex_meta(c: char) -> bool {
    matches!(
        c,
        '.' | '+' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' | '\\'
    )
}

/// Whether `path` (relative, `/`-separated) matches any of `patterns`.
pub fn matches_any(patterns: &[String], path: &str) -> bool {
    patterns
        .iter()
        .any(|p| glob_to_regex(p).is_match(path))
}

/// Whether `path` should be treated as a "source file" (counts toward
/// `sourcesModifiedSinceLastRun` and `sourceFilesEdited`) given the
/// project's configured `sources` globs. Dotfiles and well-known
/// build/vendor directories are always excluded, even if a glob would
/// otherwise match them.
pub fn is_source_file(sources: &[String], path: &str) -> bool {
    if is_in_skipped_dir(path) || is_dotfile(path) {
        return false;
    }
    if sources.is_empty() {
        return true;
    }
    matches_any(sources, path)
}

fn is_in_skipped_dir(path: &str) -> bool {
    path.split('/')
        .any(|segment| SKIPPED_DIR_NAMES.contains(&segment))
}

fn is_dotfile(path: &str) -> bool {
    path.split('/')
        .last()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_star_crosses_directories() {
        let re = glob_to_regex("src/**/*.rs");
        assert!(re.is_match("src/a/b/c.rs"));
        assert!(re.is_match("src/c.rs"));
        assert!(!re.is_match("test/c.rs"));
    }

    #[test]
    fn single_star_stops_at_slash() {
        let re = glob_to_regex("src/*.rs");
        assert!(re.is_match("src/lib.rs"));
        assert!(!re.is_match("src/sub/lib.rs"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        let re = glob_to_regex("file?.txt");
        assert!(re.is_match("file1.txt"));
        assert!(!re.is_match("file12.txt"));
    }

    #[test]
    fn literal_dots_are_escaped() {
        let re = glob_to_regex("a.b");
        assert!(re.is_match("a.b"));
        assert!(!re.is_match("aXb"));
    }

    #[test]
    fn empty_sources_means_everything_counts() {
        assert!(is_source_file(&[], "anything.rs"));
    }

    #[test]
    fn skipped_dirs_and_dotfiles_never_count() {
        let sources = vec!["**/*".to_string()];
        assert!(!is_source_file(&sources, "node_modules/pkg/index.js"));
        assert!(!is_source_file(&sources, "src/.env"));
        assert!(is_source_file(&sources, "src/main.rs"));
    }
}
