//! Out-of-process evaluation of `mode="script:<name>"` parameters and
//! patterns (spec Section 3, "Parameter mode").

use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use std::collections::HashMap;
use std::process::Command;

/// Evaluates a raw expression string under a named interpreter and
/// returns its trimmed stdout. Implementations are registered by mode
/// name in a `ScriptRegistry`.
pub trait ScriptEvaluator: Send + Sync {
    /// The mode name this evaluator answers to, e.g. `"shell"`.
    fn mode(&self) -> &str;

    /// Evaluate `expr` with `env` available to the child process, in
    /// addition to the parent's own environment.
    fn evaluate(
        &self,
        ctx: &EngineContext,
        expr: &str,
        env: &HashMap<String, String>,
    ) -> Result<String>;
}

/// The built-in `shell` evaluator: runs `expr` as a command line under
/// `ctx.effective_shell()` and captures stdout.
pub struct ShellEvaluator;

impl ScriptEvaluator for ShellEvaluator {
    fn mode(&self) -> &str {
        "shell"
    }

    fn evaluate(
        &self,
        ctx: &EngineContext,
        expr: &str,
        env: &HashMap<String, String>,
    ) -> Result<String> {
        let output = Command::new(ctx.effective_shell())
            .arg("-c")
            .arg(expr)
            .envs(env)
            .output()
            .map_err(|source| EngineError::Filesystem {
                path: ctx.effective_shell().display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr_tail = tail(&String::from_utf8_lossy(&output.stderr), 4_096);
            return Err(EngineError::Execution {
                code: output.status.code().unwrap_or(-1),
                stderr_tail,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn tail(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let start = s.len() - max_bytes;
    let boundary = (start..s.len()).find(|&i| s.is_char_boundary(i)).unwrap_or(start);
    s[boundary..].to_string()
}

/// A registry of `ScriptEvaluator`s keyed by mode name. `jube-cli`
/// registers `ShellEvaluator` by default; `python`/`perl` evaluators
/// follow the same trait and can be layered in without touching the
/// expansion engine.
#[derive(Default)]
pub struct ScriptRegistry {
    evaluators: HashMap<String, Box<dyn ScriptEvaluator>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, evaluator: Box<dyn ScriptEvaluator>) {
        self.evaluators.insert(evaluator.mode().to_string(), evaluator);
    }

    pub fn with_shell() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(ShellEvaluator));
        reg
    }

    pub fn evaluate(
        &self,
        mode: &str,
        ctx: &EngineContext,
        expr: &str,
        env: &HashMap<String, String>,
    ) -> Result<String> {
        let evaluator = self
            .evaluators
            .get(mode)
            .ok_or_else(|| EngineError::Config(format!("no script evaluator registered for mode {mode}")))?;
        evaluator.evaluate(ctx, expr, env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_evaluator_captures_stdout() {
        let ctx = EngineContext::default();
        let out = ShellEvaluator.evaluate(&ctx, "echo -n hello", &HashMap::new()).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn shell_evaluator_reports_nonzero_exit() {
        let ctx = EngineContext::default();
        let err = ShellEvaluator.evaluate(&ctx, "exit 3", &HashMap::new()).unwrap_err();
        match err {
            EngineError::Execution { code, .. } => assert_eq!(code, 3),
            other => panic!("expected Execution error, got {other:?}"),
        }
    }

    #[test]
    fn registry_evaluates_registered_mode() {
        let reg = ScriptRegistry::with_shell();
        let ctx = EngineContext::default();
        let out = reg.evaluate("shell", &ctx, "echo -n 42", &HashMap::new()).unwrap();
        assert_eq!(out, "42");
    }

    #[test]
    fn registry_errors_on_unknown_mode() {
        let reg = ScriptRegistry::with_shell();
        let ctx = EngineContext::default();
        assert!(reg.evaluate("python", &ctx, "1+1", &HashMap::new()).is_err());
    }
}
