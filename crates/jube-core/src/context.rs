//! Process-scoped configuration, passed explicitly.
//!
//! Spec Section 9 ("Global state") calls for `JUBE_GROUP_NAME`,
//! `JUBE_EXEC_SHELL`, and `JUBE_INCLUDE_PATH` to be carried through an
//! explicit context struct rather than read ad hoc from the
//! environment deep in the call graph. `EngineContext` is built once
//! (by `jube-cli`) and threaded through every engine entry point.

use std::path::PathBuf;

/// Shared, process-scoped engine configuration.
#[derive(Debug, Clone)]
pub struct EngineContext {
    /// Colon-separated search path for `<include>` resolution.
    /// Precedence (highest first): `--include-path`, config
    /// `<include-path>`, `JUBE_INCLUDE_PATH`, current directory.
    pub include_path: Vec<PathBuf>,
    /// Shell used to run `<do>` commands and shell-mode parameters.
    /// Overridable per-invocation via `SHELL_OVERRIDE`.
    pub exec_shell: PathBuf,
    /// Group ownership applied to new benchmark directories so a
    /// benchmark directory tree can be shared across users.
    pub group_name: Option<String>,
    /// Escalates the first workpackage `Error` into scheduler
    /// termination (`-e`/`--exit`).
    pub exit_on_error: bool,
    /// Escalates `VersionMismatch` from a warning to a hard error.
    pub strict: bool,
    /// Boolean tag expression gating `tag="..."` nodes (`--tag`).
    pub tag_expr: Option<String>,
}

impl EngineContext {
    /// Build a context from the process environment, applying the
    /// documented precedence for `include_path` against an optional
    /// CLI override and an optional config-file value.
    pub fn from_env(cli_include_path: Option<&str>, config_include_path: Option<&str>) -> Self {
        let mut include_path = Vec::new();
        if let Some(p) = cli_include_path {
            include_path.extend(split_path_list(p));
        } else if let Some(p) = config_include_path {
            include_path.extend(split_path_list(p));
        } else if let Ok(p) = std::env::var("JUBE_INCLUDE_PATH") {
            include_path.extend(split_path_list(&p));
        }
        include_path.push(PathBuf::from("."));

        let exec_shell = std::env::var("JUBE_EXEC_SHELL")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/bin/sh"));

        let group_name = std::env::var("JUBE_GROUP_NAME").ok();

        Self {
            include_path,
            exec_shell,
            group_name,
            exit_on_error: false,
            strict: false,
            tag_expr: None,
        }
    }

    /// The shell used for a single `<do>` invocation: the `SHELL_OVERRIDE`
    /// environment variable, if set, otherwise `self.exec_shell`.
    pub fn effective_shell(&self) -> PathBuf {
        std::env::var("SHELL_OVERRIDE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| self.exec_shell.clone())
    }

    /// Resolve a relative `<include from="...">` path against the
    /// configured include-path, in precedence order.
    pub fn resolve_include(&self, from: &str) -> Option<PathBuf> {
        let relative = PathBuf::from(from);
        if relative.is_absolute() && relative.exists() {
            return Some(relative);
        }
        for base in &self.include_path {
            let candidate = base.join(&relative);
            if candidate.exists() {
                return Some(candidate);
            }
        }
        None
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::from_env(None, None)
    }
}

fn split_path_list(value: &str) -> Vec<PathBuf> {
    value
        .split(':')
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_include_path_wins_over_env() {
        std::env::set_var("JUBE_INCLUDE_PATH", "/from/env");
        let ctx = EngineContext::from_env(Some("/from/cli"), None);
        assert_eq!(ctx.include_path[0], PathBuf::from("/from/cli"));
        std::env::remove_var("JUBE_INCLUDE_PATH");
    }

    #[test]
    fn current_dir_is_always_appended() {
        let ctx = EngineContext::from_env(None, None);
        assert_eq!(ctx.include_path.last(), Some(&PathBuf::from(".")));
    }
}
