//! Fileset / Substitution Engine (spec Section 4.2).
//!
//! Copies and links files into a workpackage's sandbox, runs an
//! optional prepare command, then rewrites files via literal
//! string substitution.

use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::exprbool::BoolExpr;
use crate::types::ParameterPoint;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Where a `Link`/`Copy` source list is rooted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRoot {
    /// Relative to the configuration file's directory.
    External,
    /// Relative to the workpackage work directory.
    Internal,
}

/// One `<link>` or `<copy>` entry.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LinkOrCopy {
    pub root: FileRoot,
    /// Source entries; each may contain a shell glob.
    pub sources: Vec<String>,
    /// Renames a single target; illegal when `sources` contains a glob
    /// or more than one entry.
    pub name: Option<String>,
    #[serde(default)]
    pub active: Option<String>,
}

impl LinkOrCopy {
    fn is_glob(source: &str) -> bool {
        source.contains(['*', '?', '[', ']'])
    }

    /// Validate the `name` + glob exclusivity invariant up front so
    /// callers fail before touching the filesystem.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_some() && (self.sources.len() > 1 || self.sources.iter().any(|s| Self::is_glob(s))) {
            return Err(EngineError::Config(
                "a <link>/<copy> 'name' override is illegal combined with a glob or multiple sources".to_string(),
            ));
        }
        Ok(())
    }
}

/// One `<sub>` literal replacement.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Substitution {
    pub source: String,
    pub dest: String,
}

/// One `<iofile>` rewrite pass.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IoFile {
    pub input: String,
    pub output: String,
    pub append: bool,
    pub substitutions: Vec<Substitution>,
}

/// A fully-configured fileset step: links/copies, an optional prepare
/// command, and a list of substitution passes.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Fileset {
    #[serde(default)]
    pub links: Vec<LinkOrCopy>,
    #[serde(default)]
    pub copies: Vec<LinkOrCopy>,
    #[serde(default)]
    pub prepare: Option<String>,
    #[serde(default)]
    pub iofiles: Vec<IoFile>,
}

/// Materialize a fileset into `work_dir`: links, copies, prepare, then
/// substitution. `external_root` is the configuration file's directory
/// ("external" root); `work_dir` doubles as the "internal" root.
pub fn prepare(
    fileset: &Fileset,
    external_root: &Path,
    work_dir: &Path,
    point: &ParameterPoint,
    ctx: &EngineContext,
) -> Result<()> {
    fs::create_dir_all(work_dir).map_err(|source| EngineError::Filesystem {
        path: work_dir.display().to_string(),
        source,
    })?;

    for entry in &fileset.links {
        if is_active(entry.active.as_deref(), point)? {
            materialize(entry, external_root, work_dir, Materialize::Link)?;
        }
    }
    for entry in &fileset.copies {
        if is_active(entry.active.as_deref(), point)? {
            materialize(entry, external_root, work_dir, Materialize::Copy)?;
        }
    }

    if let Some(command) = &fileset.prepare {
        run_prepare(command, work_dir, ctx)?;
    }

    for iofile in &fileset.iofiles {
        apply_iofile(iofile, work_dir, point)?;
    }

    Ok(())
}

fn is_active(expr: Option<&str>, point: &ParameterPoint) -> Result<bool> {
    match expr {
        None => Ok(true),
        Some(expr) => Ok(BoolExpr::parse(expr).map_err(EngineError::Resolution)?.eval(point)),
    }
}

enum Materialize {
    Link,
    Copy,
}

fn materialize(entry: &LinkOrCopy, external_root: &Path, work_dir: &Path, how: Materialize) -> Result<()> {
    entry.validate()?;
    let root = match entry.root {
        FileRoot::External => external_root,
        FileRoot::Internal => work_dir,
    };

    let mut matches: Vec<PathBuf> = Vec::new();
    for source in &entry.sources {
        if LinkOrCopy::is_glob(source) {
            let pattern = root.join(source);
            let pattern_str = pattern.to_string_lossy().to_string();
            for entry in glob::glob(&pattern_str)
                .map_err(|e| EngineError::Config(format!("invalid glob '{source}': {e}")))?
            {
                let path = entry.map_err(|e| EngineError::Config(format!("glob error for '{source}': {e}")))?;
                matches.push(path);
            }
        } else {
            matches.push(root.join(source));
        }
    }

    for path in matches {
        let file_name = match &entry.name {
            Some(name) => name.clone(),
            None => path
                .file_name()
                .ok_or_else(|| EngineError::Config(format!("source '{}' has no file name", path.display())))?
                .to_string_lossy()
                .to_string(),
        };
        let target = work_dir.join(&file_name);
        match how {
            Materialize::Link => link_file(&path, &target)?,
            Materialize::Copy => {
                fs::copy(&path, &target).map_err(|source| EngineError::Filesystem {
                    path: target.display().to_string(),
                    source,
                })?;
            }
        }
    }

    Ok(())
}

#[cfg(unix)]
fn link_file(source: &Path, target: &Path) -> Result<()> {
    std::os::unix::fs::symlink(source, target).map_err(|source_err| EngineError::Filesystem {
        path: target.display().to_string(),
        source: source_err,
    })
}

#[cfg(not(unix))]
fn link_file(source: &Path, target: &Path) -> Result<()> {
    fs::copy(source, target)
        .map(|_| ())
        .map_err(|source_err| EngineError::Filesystem {
            path: target.display().to_string(),
            source: source_err,
        })
}

fn run_prepare(command: &str, work_dir: &Path, ctx: &EngineContext) -> Result<()> {
    let status = Command::new(ctx.effective_shell())
        .arg("-c")
        .arg(command)
        .current_dir(work_dir)
        .status()
        .map_err(|source| EngineError::Filesystem {
            path: work_dir.display().to_string(),
            source,
        })?;
    if !status.success() {
        return Err(EngineError::Execution {
            code: status.code().unwrap_or(-1),
            stderr_tail: format!("prepare command failed: {command}"),
        });
    }
    Ok(())
}

fn apply_iofile(iofile: &IoFile, work_dir: &Path, point: &ParameterPoint) -> Result<()> {
    let input_path = work_dir.join(resolve_refs(&iofile.input, point));
    let output_path = work_dir.join(resolve_refs(&iofile.output, point));

    let mut content = fs::read_to_string(&input_path).map_err(|source| EngineError::Filesystem {
        path: input_path.display().to_string(),
        source,
    })?;

    for sub in &iofile.substitutions {
        let source = resolve_refs(&sub.source, point);
        let dest = resolve_refs(&sub.dest, point);
        content = content.replace(source.as_str(), dest.as_str());
    }

    if iofile.append && input_path == output_path {
        use std::io::Write;
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&output_path)
            .map_err(|source| EngineError::Filesystem {
                path: output_path.display().to_string(),
                source,
            })?;
        file.write_all(content.as_bytes()).map_err(|source| EngineError::Filesystem {
            path: output_path.display().to_string(),
            source,
        })?;
    } else {
        fs::write(&output_path, content).map_err(|source| EngineError::Filesystem {
            path: output_path.display().to_string(),
            source,
        })?;
    }

    Ok(())
}

fn resolve_refs(text: &str, point: &ParameterPoint) -> String {
    let mut out = text.to_string();
    for (name, value) in point {
        out = out.replace(&format!("${name}"), value);
        out = out.replace(&format!("${{{name}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn link_or_copy_rejects_name_with_glob() {
        let entry = LinkOrCopy {
            root: FileRoot::External,
            sources: vec!["*.txt".into()],
            name: Some("renamed".into()),
            active: None,
        };
        assert!(entry.validate().is_err());
    }

    #[test]
    fn copy_materializes_single_file() {
        let external = tempdir().unwrap();
        let work = tempdir().unwrap();
        fs::write(external.path().join("input.txt"), "hello").unwrap();

        let entry = LinkOrCopy {
            root: FileRoot::External,
            sources: vec!["input.txt".into()],
            name: None,
            active: None,
        };
        materialize(&entry, external.path(), work.path(), Materialize::Copy).unwrap();
        assert_eq!(fs::read_to_string(work.path().join("input.txt")).unwrap(), "hello");
    }

    #[test]
    fn iofile_applies_substitutions_in_order() {
        let work = tempdir().unwrap();
        fs::write(work.path().join("in.txt"), "X=PLACEHOLDER").unwrap();

        let iofile = IoFile {
            input: "in.txt".into(),
            output: "out.txt".into(),
            append: false,
            substitutions: vec![Substitution {
                source: "PLACEHOLDER".into(),
                dest: "$value".into(),
            }],
        };
        let mut point = ParameterPoint::new();
        point.insert("value".into(), "42".into());

        apply_iofile(&iofile, work.path(), &point).unwrap();
        assert_eq!(fs::read_to_string(work.path().join("out.txt")).unwrap(), "X=42");
    }
}
