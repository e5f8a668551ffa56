//! Canonical configuration tree and its YAML front-end (spec Section 3
//! data model, loaded per Section 6 CLI surface).
//!
//! Both front-ends named in spec.md produce the same tree; only the
//! YAML front-end is implemented (see `DESIGN.md` for the dropped XML
//! front-end). `<include>` is inlined recursively with cycle
//! detection, and `tag="..."` gating is applied against the active
//! `--tag` expression before the tree is handed to the expander.

use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::exprbool::BoolExpr;
use crate::fileset::Fileset;
use crate::pattern::Pattern;
use crate::types::{Parameterset, Step};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A `<include from="file" [path="subtree"]>` directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncludeDirective {
    pub from: String,
    #[serde(default)]
    pub path: Option<String>,
}

/// A named group of patterns, analogous to `Parameterset` (spec
/// Section 3, "Patternset").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Patternset {
    pub name: String,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    /// Tag names this patternset belongs to (spec Section 6, "tag gating").
    #[serde(default)]
    pub tag: Option<String>,
}

/// A named fileset (spec Section 3, "Fileset").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamedFileset {
    pub name: String,
    #[serde(flatten)]
    pub fileset: Fileset,
    /// Tag names this fileset belongs to (spec Section 6, "tag gating").
    #[serde(default)]
    pub tag: Option<String>,
}

/// One `<file>` entry within an `<analyse>` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyseFile {
    #[serde(rename = "use")]
    pub patternset: Option<String>,
    pub glob: String,
}

/// A named analyzer binding patternsets to a step's output files
/// (spec Section 4.5, "Input").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analyser {
    pub name: String,
    pub step: String,
    #[serde(default)]
    pub patternsets: Vec<String>,
    #[serde(default)]
    pub files: Vec<AnalyseFile>,
    #[serde(default = "default_true")]
    pub reduce: bool,
    /// Tag names this analyser belongs to (spec Section 6, "tag gating").
    #[serde(default)]
    pub tag: Option<String>,
}

fn default_true() -> bool {
    true
}

/// One result-rendering sink (spec Section 4.6, "Result Composer").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResultSink {
    Table {
        name: String,
        #[serde(default)]
        style: TableStyle,
        #[serde(default)]
        sort: Vec<String>,
        #[serde(default)]
        transpose: bool,
        #[serde(default)]
        filter: Option<String>,
        #[serde(default)]
        columns: Vec<ColumnSpec>,
    },
    Syslog {
        name: String,
        host: String,
        #[serde(default = "default_syslog_port")]
        port: u16,
        #[serde(default)]
        filter: Option<String>,
    },
    Database {
        name: String,
        path: PathBuf,
        #[serde(default)]
        primekeys: Vec<String>,
        #[serde(default)]
        filter: Option<String>,
    },
}

fn default_syslog_port() -> u16 {
    514
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStyle {
    #[default]
    Pretty,
    Csv,
    Aligned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub field: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

/// The top-level, uninlined document as parsed directly from one YAML
/// file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDocument {
    #[serde(default)]
    pub benchmark: Option<String>,
    #[serde(default)]
    pub include: Vec<IncludeDirective>,
    #[serde(default)]
    pub include_path: Option<String>,
    #[serde(default)]
    pub parametersets: Vec<Parameterset>,
    #[serde(default)]
    pub patternsets: Vec<Patternset>,
    #[serde(default)]
    pub filesets: Vec<NamedFileset>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub analysers: Vec<Analyser>,
    #[serde(default)]
    pub results: Vec<ResultSink>,
}

/// The fully-inlined, tag-gated canonical tree handed to the expander
/// and scheduler.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub benchmark_name: String,
    pub parametersets: Vec<Parameterset>,
    pub patternsets: Vec<Patternset>,
    pub filesets: Vec<NamedFileset>,
    pub steps: Vec<Step>,
    pub analysers: Vec<Analyser>,
    pub results: Vec<ResultSink>,
}

/// Load a YAML configuration file, inlining `<include>` directives
/// recursively (cycle detected via the canonicalized path stack) and
/// gating every top-level-tagged element against `tag_expr`.
pub fn load(path: &Path, ctx: &EngineContext, tag_expr: Option<&str>) -> Result<Document> {
    let mut visiting = HashSet::new();
    let raw = load_inlined(path, ctx, &mut visiting)?;
    gate(raw, tag_expr)
}

fn load_inlined(path: &Path, ctx: &EngineContext, visiting: &mut HashSet<PathBuf>) -> Result<RawDocument> {
    let canonical = path.canonicalize().map_err(|source| EngineError::Filesystem {
        path: path.display().to_string(),
        source,
    })?;
    if !visiting.insert(canonical.clone()) {
        return Err(EngineError::Config(format!(
            "include cycle detected at {}",
            canonical.display()
        )));
    }

    let text = std::fs::read_to_string(path).map_err(|source| EngineError::Filesystem {
        path: path.display().to_string(),
        source,
    })?;
    let mut doc: RawDocument = serde_yaml::from_str(&text)?;

    let mut local_ctx = ctx.clone();
    if let Some(extra) = &doc.include_path {
        local_ctx = EngineContext::from_env(None, Some(extra));
    }

    for include in std::mem::take(&mut doc.include) {
        let resolved = local_ctx
            .resolve_include(&include.from)
            .ok_or_else(|| EngineError::Config(format!("cannot resolve <include from=\"{}\">", include.from)))?;
        let included = load_inlined(&resolved, &local_ctx, visiting)?;
        merge(&mut doc, included);
    }

    visiting.remove(&canonical);
    Ok(doc)
}

fn merge(into: &mut RawDocument, from: RawDocument) {
    if into.benchmark.is_none() {
        into.benchmark = from.benchmark;
    }
    into.parametersets.extend(from.parametersets);
    into.patternsets.extend(from.patternsets);
    into.filesets.extend(from.filesets);
    into.steps.extend(from.steps);
    into.analysers.extend(from.analysers);
    into.results.extend(from.results);
}

/// A node with no `tag` attribute is always kept; one that declares
/// tag names is kept iff `expr` (the CLI `--tag` expression) evaluates
/// true against its own comma-separated tag set (spec Section 6, "tag
/// gating"). Gating is per-node: a `--tag` expression narrows which
/// parameters/steps/patternsets/filesets/analysers are present, it does
/// not reject the whole document.
fn node_tag_allowed(tag: &Option<String>, expr: &BoolExpr) -> bool {
    match tag {
        None => true,
        Some(tags) => {
            let names: HashSet<String> = tags.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            expr.eval(&names)
        }
    }
}

fn gate(raw: RawDocument, tag_expr: Option<&str>) -> Result<Document> {
    let expr = BoolExpr::parse(tag_expr.unwrap_or("")).map_err(EngineError::Resolution)?;

    let mut parametersets = raw.parametersets;
    for pset in &mut parametersets {
        pset.parameters.retain(|p| node_tag_allowed(&p.tag, &expr));
    }
    parametersets.retain(|p| node_tag_allowed(&p.tag, &expr));

    let mut patternsets = raw.patternsets;
    patternsets.retain(|p| node_tag_allowed(&p.tag, &expr));

    let mut filesets = raw.filesets;
    filesets.retain(|f| node_tag_allowed(&f.tag, &expr));

    let mut steps = raw.steps;
    steps.retain(|s| node_tag_allowed(&s.tag, &expr));

    let mut analysers = raw.analysers;
    analysers.retain(|a| node_tag_allowed(&a.tag, &expr));

    Ok(Document {
        benchmark_name: raw.benchmark.unwrap_or_else(|| "benchmark".to_string()),
        parametersets,
        patternsets,
        filesets,
        steps,
        analysers,
        results: raw.results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn loads_minimal_document() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "bench.yaml",
            "benchmark: demo\nparametersets:\n  - name: p\n    parameters:\n      - name: n\n        raw_value: \"1,2\"\n",
        );
        let ctx = EngineContext::default();
        let doc = load(&path, &ctx, None).unwrap();
        assert_eq!(doc.benchmark_name, "demo");
        assert_eq!(doc.parametersets.len(), 1);
    }

    #[test]
    fn inlines_single_level_include() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "included.yaml",
            "parametersets:\n  - name: extra\n    parameters: []\n",
        );
        let path = write(
            dir.path(),
            "main.yaml",
            "benchmark: demo\ninclude:\n  - from: included.yaml\n",
        );
        let ctx = EngineContext::from_env(Some(dir.path().to_str().unwrap()), None);
        let doc = load(&path, &ctx, None).unwrap();
        assert_eq!(doc.parametersets.len(), 1);
        assert_eq!(doc.parametersets[0].name, "extra");
    }

    #[test]
    fn detects_include_cycle() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.yaml", "include:\n  - from: b.yaml\n");
        let b = write(dir.path(), "b.yaml", "include:\n  - from: a.yaml\n");
        let ctx = EngineContext::from_env(Some(dir.path().to_str().unwrap()), None);
        assert!(load(&b, &ctx, None).is_err());
    }
}
