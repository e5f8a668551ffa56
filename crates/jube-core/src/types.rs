//! Core data model (spec Section 3).

use crate::ids::Id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The three value types a parameter or pattern may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Int,
    Float,
}

impl Default for ValueType {
    fn default() -> Self {
        Self::String
    }
}

/// Evaluation mode for a parameter or pattern value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterMode {
    /// Literal text, substituted but never executed.
    Text,
    /// Evaluated through a named out-of-process interpreter
    /// (`shell`, `python`, `perl`, ...). The mode name doubles as the
    /// `ScriptEvaluator` registry key (see `script.rs`).
    Script(String),
    /// Looked up from the process environment.
    Env,
    /// Expanded from a tag name (true if the tag is active under the
    /// current `--tag` expression, false otherwise).
    Tag,
}

impl Default for ParameterMode {
    fn default() -> Self {
        Self::Text
    }
}

/// Re-evaluation cadence for a parameter (spec Section 3, "Parameter").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Freeze at first resolution in this benchmark.
    #[default]
    Never,
    /// Re-evaluate each time a set containing the parameter is referenced.
    Use,
    /// Re-evaluate at each new step transition.
    Step,
    /// Re-evaluate at each cycle iteration.
    Cycle,
    /// Re-evaluate at every step and cycle.
    Always,
}

/// Merge behavior when two definitions share a parameter/pattern/file
/// identity key (spec Section 3, "Parameterset, Patternset, ...").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateMode {
    /// No directive: compatibility rule applies (identical raw
    /// definitions required).
    #[default]
    None,
    /// The later definition wins outright.
    Replace,
    /// Later template values are appended to the earlier's with the
    /// configured separator.
    Concat,
    /// Abort with a Config error.
    Error,
}

/// A named, typed parameter definition (spec Section 3, "Parameter").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub mode: ParameterMode,
    /// Raw text. For a template parameter this contains `separator`-delimited
    /// alternatives; for a fixed parameter, a single value.
    pub raw_value: String,
    /// Separator used to split `raw_value` into template alternatives.
    /// A parameter is a template iff `raw_value` contains this separator.
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Inject into the child process environment of `<do>` commands.
    #[serde(default)]
    pub export: bool,
    #[serde(default)]
    pub update_mode: UpdateMode,
    #[serde(default)]
    pub duplicate: DuplicateMode,
    /// Tag expression gating this parameter's presence in the
    /// canonical tree (spec Section 6, "tag gating").
    #[serde(default)]
    pub tag: Option<String>,
}

fn default_separator() -> String {
    ",".to_string()
}

impl Parameter {
    /// Whether this parameter's raw value expands to more than one
    /// alternative (spec Section 3, "Template parameter").
    pub fn is_template(&self) -> bool {
        !self.separator.is_empty() && self.raw_value.contains(self.separator.as_str())
    }

    /// Split the raw value into its template alternatives, or a single
    /// alternative for a fixed parameter.
    pub fn alternatives(&self) -> Vec<String> {
        if self.separator.is_empty() {
            return vec![self.raw_value.clone()];
        }
        self.raw_value
            .split(self.separator.as_str())
            .map(str::to_string)
            .collect()
    }
}

/// A named container of parameters (spec Section 3, "Parameterset").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Parameterset {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    /// `init_with="file[:external_name]"`.
    #[serde(default)]
    pub init_with: Option<String>,
    /// Tag names this parameterset belongs to (spec Section 6, "tag gating").
    #[serde(default)]
    pub tag: Option<String>,
}

/// A fully-resolved parameter-space point: one value per parameter
/// name (spec Section 3, invariant: "each parameter name maps to
/// exactly one evaluated value").
pub type ParameterPoint = BTreeMap<String, String>;

/// Scheduler state for a single workpackage (spec Section 3, "Workpackage").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkpackageState {
    Created,
    Ready,
    Running,
    AwaitingSentinel,
    Done,
    Error,
}

impl WorkpackageState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// A single `<do>` shell operation within a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoOp {
    pub command: String,
    #[serde(default)]
    pub active: Option<String>,
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub done_file: Option<String>,
    #[serde(default)]
    pub error_file: Option<String>,
    #[serde(default)]
    pub break_file: Option<String>,
}

/// A step definition (spec Section 3, "Step").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub depend: Vec<String>,
    #[serde(default)]
    pub parametersets: Vec<String>,
    /// Name of the `Fileset` materialized into this step's work
    /// directory before its `<do>` operations run.
    #[serde(default)]
    pub fileset: Option<String>,
    #[serde(default)]
    pub do_ops: Vec<DoOp>,
    #[serde(default)]
    pub work_dir: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub active: Option<String>,
    #[serde(default)]
    pub export: bool,
    #[serde(default)]
    pub max_async: Option<usize>,
    #[serde(default = "one")]
    pub iterations: u32,
    #[serde(default = "one")]
    pub cycles: u32,
    #[serde(default = "one_usize")]
    pub procs: usize,
    /// Tag expression gating this step's presence in the canonical
    /// tree (spec Section 6, "tag gating").
    #[serde(default)]
    pub tag: Option<String>,
}

fn one() -> u32 {
    1
}

fn one_usize() -> usize {
    1
}

/// The scheduler's unit of work (spec Section 3, "Workpackage").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workpackage {
    pub id: Id,
    pub step_name: String,
    pub iteration: u32,
    pub point: ParameterPoint,
    /// Parent workpackage ids, one per `depend` edge.
    #[serde(default)]
    pub parents: Vec<Id>,
    pub cycle: u32,
    pub do_index: usize,
    pub state: WorkpackageState,
    /// Directory name, e.g. `000007_compile`.
    pub dir_name: String,
}

/// A benchmark: a container of steps and their materialized
/// workpackages (spec Section 3, "Benchmark").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Benchmark {
    pub id: Id,
    pub name: String,
    pub engine_version: String,
    /// Path to the configuration file this benchmark was run from, so
    /// `continue`/`analyse`/`update` can reload its steps/analysers.
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub workpackages: Vec<Workpackage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(raw: &str, sep: &str) -> Parameter {
        Parameter {
            name: "n".into(),
            value_type: ValueType::String,
            mode: ParameterMode::Text,
            raw_value: raw.into(),
            separator: sep.into(),
            export: false,
            update_mode: UpdateMode::Never,
            duplicate: DuplicateMode::None,
            tag: None,
        }
    }

    #[test]
    fn parameter_is_template_when_separator_present() {
        let p = param("1,2,4", ",");
        assert!(p.is_template());
        assert_eq!(p.alternatives(), vec!["1", "2", "4"]);
    }

    #[test]
    fn parameter_fixed_has_single_alternative() {
        let p = param("solo", ",");
        assert!(!p.is_template());
        assert_eq!(p.alternatives(), vec!["solo"]);
    }

    #[test]
    fn workpackage_state_terminal() {
        assert!(WorkpackageState::Done.is_terminal());
        assert!(WorkpackageState::Error.is_terminal());
        assert!(!WorkpackageState::Ready.is_terminal());
    }
}
