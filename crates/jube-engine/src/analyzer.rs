//! Analyzer: binds patternsets to a step's workpackage output files
//! and reduces matches into per-workpackage result rows (spec Section
//! 4.5, "Analyzer").

use crate::error::{Result, SchedulerError};
use crate::store::BenchmarkStore;
use jube_core::doc::{Analyser, Document};
use jube_core::pattern::{self, Pattern, Stats};
use jube_core::types::{ValueType, Workpackage, WorkpackageState};
use jube_core::{Id, ParameterPoint};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const SUFFIXES: &[&str] = &["first", "last", "min", "max", "avg", "std", "sum", "cnt"];

/// One workpackage's analyzed values: its parameter point plus every
/// pattern's statistical suffixes (`name_avg`, `name_max`, ...) and
/// every derived pattern's scalar value, ready for the Result Composer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AnalysisRow {
    pub workpackage: Id,
    pub step: String,
    pub point: ParameterPoint,
    pub values: HashMap<String, String>,
}

/// Run every declared analyzer against its step's Done workpackages.
///
/// With `analyser.reduce` set (the default), matches are pooled across
/// every workpackage sharing the same `(step, point)` — the distinct
/// `iteration`s of one parameter point — and reduced once per group
/// (spec Section 4.5, "reduce across iterations"). With `reduce`
/// disabled, each workpackage is analyzed and emitted on its own.
pub fn analyse(document: &Document, store: &BenchmarkStore, workpackages: &[Workpackage]) -> Result<Vec<AnalysisRow>> {
    let mut rows = Vec::new();
    for analyser in &document.analysers {
        let done: Vec<&Workpackage> = workpackages
            .iter()
            .filter(|w| w.step_name == analyser.step && w.state == WorkpackageState::Done)
            .collect();

        if !analyser.reduce {
            for wp in done {
                let row = analyse_group(document, analyser, store, std::slice::from_ref(&wp))?;
                store.write_analysis(wp, &row)?;
                rows.push(row);
            }
            continue;
        }

        let mut order: Vec<ParameterPoint> = Vec::new();
        let mut groups: HashMap<ParameterPoint, Vec<&Workpackage>> = HashMap::new();
        for wp in done {
            groups.entry(wp.point.clone()).or_insert_with(Vec::new).push(wp);
            if !order.contains(&wp.point) {
                order.push(wp.point.clone());
            }
        }

        for point in order {
            let mut members = groups.remove(&point).unwrap_or_default();
            members.sort_by_key(|w| w.iteration);
            let row = analyse_group(document, analyser, store, &members)?;
            store.write_analysis(members[0], &row)?;
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Scan every member's output files for one analyser, pool their
/// matches per pattern, and reduce once. A single-element `members`
/// reproduces the old per-workpackage behavior exactly; `reduce=false`
/// callers pass a single member and force a raw (unreduced) string
/// pass regardless of the pattern's own `value_type`.
fn analyse_group(document: &Document, analyser: &Analyser, store: &BenchmarkStore, members: &[&Workpackage]) -> Result<AnalysisRow> {
    let mut matches_by_pattern: HashMap<String, Vec<String>> = HashMap::new();
    let mut primaries: HashMap<String, Pattern> = HashMap::new();
    let mut derived: HashMap<String, Pattern> = HashMap::new();

    for wp in members {
        let work_dir = store.wp_work_dir(wp);
        for file in &analyser.files {
            let names: Vec<&str> = match &file.patternset {
                Some(name) => vec![name.as_str()],
                None => analyser.patternsets.iter().map(String::as_str).collect(),
            };
            let patterns: Vec<&Pattern> = document
                .patternsets
                .iter()
                .filter(|ps| names.contains(&ps.name.as_str()))
                .flat_map(|ps| ps.patterns.iter())
                .collect();

            for path in expand_glob(&work_dir, &file.glob)? {
                let text = std::fs::read_to_string(&path).map_err(|source| {
                    SchedulerError::from(jube_core::EngineError::Filesystem {
                        path: path.display().to_string(),
                        source,
                    })
                })?;
                for pattern in &patterns {
                    if pattern.is_derived() {
                        derived.entry(pattern.name.clone()).or_insert_with(|| (*pattern).clone());
                        continue;
                    }
                    primaries.entry(pattern.name.clone()).or_insert_with(|| (*pattern).clone());
                    let found = pattern::scan(pattern, &text).map_err(SchedulerError::from)?;
                    matches_by_pattern.entry(pattern.name.clone()).or_default().extend(found);
                }
            }
        }
    }

    let mut primary_stats: HashMap<String, Stats> = HashMap::new();
    for (name, pattern) in &primaries {
        let matches = matches_by_pattern.get(name).cloned().unwrap_or_default();
        let reduced = if analyser.reduce {
            pattern::reduce(&matches, pattern.value_type, pattern.default.as_deref())
        } else {
            // With reduction disabled, expose every raw match via `_first`/`_last` only.
            pattern::reduce(&matches, ValueType::String, pattern.default.as_deref())
        };
        primary_stats.insert(name.clone(), reduced);
    }

    let derived_patterns: Vec<Pattern> = derived.into_values().collect();
    let derived_values = pattern::evaluate_derived(&derived_patterns, &primary_stats).map_err(SchedulerError::from)?;

    let mut values = HashMap::new();
    for (name, stats) in &primary_stats {
        for suffix in SUFFIXES {
            if let Some(v) = stats.suffix(suffix) {
                values.insert(format!("{name}_{suffix}"), v);
            }
        }
    }
    values.extend(derived_values);

    let primary = members[0];
    Ok(AnalysisRow {
        workpackage: primary.id,
        step: primary.step_name.clone(),
        point: primary.point.clone(),
        values,
    })
}

fn expand_glob(work_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = work_dir.join(pattern);
    let pattern_str = full.to_string_lossy().to_string();
    let mut out = Vec::new();
    for entry in glob::glob(&pattern_str)
        .map_err(|e| SchedulerError::Engine(jube_core::EngineError::Config(format!("invalid analyse glob '{pattern}': {e}"))))?
    {
        let path = entry
            .map_err(|e| SchedulerError::Engine(jube_core::EngineError::Config(format!("glob error for '{pattern}': {e}"))))?;
        out.push(path);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jube_core::doc::{AnalyseFile, Patternset};
    use jube_core::pattern::Pattern;
    use jube_core::EngineContext;
    use tempfile::tempdir;

    fn wp_iter(id: u64, step: &str, dir_name: &str, iteration: u32) -> Workpackage {
        let mut w = wp(id, step, dir_name);
        w.iteration = iteration;
        w
    }

    fn wp(id: u64, step: &str, dir_name: &str) -> Workpackage {
        Workpackage {
            id: Id::new(id),
            step_name: step.into(),
            iteration: 0,
            point: ParameterPoint::new(),
            parents: Vec::new(),
            cycle: 0,
            do_index: 0,
            state: WorkpackageState::Done,
            dir_name: dir_name.into(),
        }
    }

    #[test]
    fn analyse_reduces_matches_and_resolves_derived() {
        let dir = tempdir().unwrap();
        let store = BenchmarkStore::create(dir.path(), Id::new(1), "demo", false).unwrap();
        let _ctx = EngineContext::default();

        let workpackage = wp(1, "run", "000001_run");
        store.init_workpackage_dir(&workpackage).unwrap();
        std::fs::write(
            store.wp_work_dir(&workpackage).join("out.log"),
            "time=1.0\ntime=3.0\n",
        )
        .unwrap();

        let patternset = Patternset {
            name: "times".into(),
            patterns: vec![
                Pattern {
                    name: "time".into(),
                    expression: r"time=(\d+\.\d+)".into(),
                    value_type: ValueType::Float,
                    dotall: false,
                    default: None,
                },
                Pattern {
                    name: "peak".into(),
                    expression: "$time_max".into(),
                    value_type: ValueType::Float,
                    dotall: false,
                    default: None,
                },
            ],
            tag: None,
        };

        let analyser = Analyser {
            name: "a1".into(),
            step: "run".into(),
            patternsets: vec!["times".into()],
            files: vec![AnalyseFile {
                patternset: None,
                glob: "*.log".into(),
            }],
            reduce: true,
            tag: None,
        };

        let document = Document {
            benchmark_name: "demo".into(),
            parametersets: Vec::new(),
            patternsets: vec![patternset],
            filesets: Vec::new(),
            steps: Vec::new(),
            analysers: vec![analyser],
            results: Vec::new(),
        };

        let rows = analyse(&document, &store, std::slice::from_ref(&workpackage)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values["time_max"], "3");
        assert_eq!(rows[0].values["peak"], "3");
    }

    #[test]
    fn reduce_pools_matches_across_iterations_of_the_same_point() {
        let dir = tempdir().unwrap();
        let store = BenchmarkStore::create(dir.path(), Id::new(1), "demo", false).unwrap();

        let a = wp_iter(1, "run", "000001_run", 0);
        let b = wp_iter(2, "run", "000002_run", 1);
        for w in [&a, &b] {
            store.init_workpackage_dir(w).unwrap();
        }
        std::fs::write(store.wp_work_dir(&a).join("out.log"), "time=1.0\n").unwrap();
        std::fs::write(store.wp_work_dir(&b).join("out.log"), "time=5.0\n").unwrap();

        let patternset = Patternset {
            name: "times".into(),
            patterns: vec![Pattern {
                name: "time".into(),
                expression: r"time=(\d+\.\d+)".into(),
                value_type: ValueType::Float,
                dotall: false,
                default: None,
            }],
            tag: None,
        };
        let analyser = Analyser {
            name: "a1".into(),
            step: "run".into(),
            patternsets: vec!["times".into()],
            files: vec![AnalyseFile {
                patternset: None,
                glob: "*.log".into(),
            }],
            reduce: true,
            tag: None,
        };
        let document = Document {
            benchmark_name: "demo".into(),
            parametersets: Vec::new(),
            patternsets: vec![patternset],
            filesets: Vec::new(),
            steps: Vec::new(),
            analysers: vec![analyser],
            results: Vec::new(),
        };

        let rows = analyse(&document, &store, &[a, b]).unwrap();
        // One row per (step, point) group, not one per workpackage, and
        // the reduction pools matches from every iteration.
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values["time_max"], "5");
        assert_eq!(rows[0].values["time_min"], "1");
    }
}
