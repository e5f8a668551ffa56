//! Workpackage Store: on-disk layout and persistence (spec Section 4.3).
//!
//! Rooted at `<outpath>/<bench_padid>/`: `bench.xml` (canonical
//! configuration snapshot + engine version), `graph.xml` (the
//! workpackage DAG), `times.json` (explicit start/modification
//! timestamps), and one `<wp_padid>_<step>[<suffix>]/` directory per
//! workpackage holding `work/`, sentinel files, `parameter.xml`, and
//! `environment.json`.

use crate::error::{Result, SchedulerError};
use chrono::{DateTime, Utc};
use jube_core::{Benchmark, Id, Workpackage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
const ID_WIDTH: usize = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Times {
    pub started_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// Handle to one benchmark's on-disk directory tree.
#[derive(Debug, Clone)]
pub struct BenchmarkStore {
    pub bench_dir: PathBuf,
}

impl BenchmarkStore {
    /// Create a fresh benchmark directory under `outpath` and persist
    /// the initial `bench.xml`/`times.json`.
    pub fn create(outpath: &Path, id: Id, name: &str, strict: bool) -> Result<Self> {
        Self::create_with_source(outpath, id, name, None, strict)
    }

    /// As `create`, additionally recording the configuration file path
    /// this benchmark was run from (spec Section 4.3, consumed by
    /// `continue`/`analyse`/`update`).
    pub fn create_with_source(outpath: &Path, id: Id, name: &str, source_path: Option<&Path>, strict: bool) -> Result<Self> {
        let bench_dir = outpath.join(id.padded(ID_WIDTH));
        fs::create_dir_all(&bench_dir)?;

        let benchmark = Benchmark {
            id,
            name: name.to_string(),
            engine_version: ENGINE_VERSION.to_string(),
            source_path: source_path.map(|p| p.display().to_string()),
            workpackages: Vec::new(),
        };
        let store = Self { bench_dir };
        store.write_bench_xml(&benchmark)?;
        store.write_graph(&[])?;

        let now = Utc::now();
        store.write_times(&Times {
            started_at: now,
            last_modified: now,
        })?;

        let _ = strict;
        Ok(store)
    }

    /// Open a previously created benchmark directory, checking the
    /// persisted engine version (spec Section 4.3, "version identifier").
    pub fn open(outpath: &Path, id: Id, strict: bool) -> Result<Self> {
        let bench_dir = outpath.join(id.padded(ID_WIDTH));
        let store = Self { bench_dir };
        let benchmark = store.read_bench_xml()?;

        if benchmark.engine_version != ENGINE_VERSION {
            let err = jube_core::EngineError::VersionMismatch {
                found: benchmark.engine_version,
                expected: ENGINE_VERSION.to_string(),
            };
            if strict {
                return Err(err.into());
            }
            tracing::warn!("{err}");
        }

        Ok(store)
    }

    fn bench_xml_path(&self) -> PathBuf {
        self.bench_dir.join("bench.xml")
    }

    fn graph_xml_path(&self) -> PathBuf {
        self.bench_dir.join("graph.xml")
    }

    fn times_path(&self) -> PathBuf {
        self.bench_dir.join("times.json")
    }

    pub fn write_bench_xml(&self, benchmark: &Benchmark) -> Result<()> {
        let xml = quick_xml::se::to_string(benchmark)?;
        fs::write(self.bench_xml_path(), xml)?;
        Ok(())
    }

    pub fn read_bench_xml(&self) -> Result<Benchmark> {
        let text = fs::read_to_string(self.bench_xml_path())?;
        Ok(quick_xml::de::from_str(&text)?)
    }

    pub fn write_graph(&self, workpackages: &[Workpackage]) -> Result<()> {
        #[derive(Serialize)]
        struct Graph<'a> {
            workpackage: &'a [Workpackage],
        }
        let xml = quick_xml::se::to_string(&Graph { workpackage: workpackages })?;
        fs::write(self.graph_xml_path(), xml)?;
        self.touch()?;
        Ok(())
    }

    pub fn read_graph(&self) -> Result<Vec<Workpackage>> {
        if !self.graph_xml_path().exists() {
            return Ok(Vec::new());
        }
        #[derive(Deserialize)]
        struct Graph {
            #[serde(default, rename = "workpackage")]
            workpackage: Vec<Workpackage>,
        }
        let text = fs::read_to_string(self.graph_xml_path())?;
        let graph: Graph = quick_xml::de::from_str(&text)?;
        Ok(graph.workpackage)
    }

    fn touch(&self) -> Result<()> {
        let mut times = self.read_times().unwrap_or(Times {
            started_at: Utc::now(),
            last_modified: Utc::now(),
        });
        times.last_modified = Utc::now();
        self.write_times(&times)
    }

    fn write_times(&self, times: &Times) -> Result<()> {
        fs::write(self.times_path(), serde_json::to_vec_pretty(times)?)?;
        Ok(())
    }

    pub fn read_times(&self) -> Result<Times> {
        let text = fs::read_to_string(self.times_path())?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Directory name for a workpackage: `<wp_padid>_<step>[<suffix>]`.
    pub fn wp_dir_name(wp: &Workpackage, suffix: Option<&str>) -> String {
        match suffix {
            Some(suffix) if !suffix.is_empty() => {
                format!("{}_{}{}", wp.id.padded(ID_WIDTH), wp.step_name, suffix)
            }
            _ => format!("{}_{}", wp.id.padded(ID_WIDTH), wp.step_name),
        }
    }

    pub fn wp_dir(&self, wp: &Workpackage) -> PathBuf {
        self.bench_dir.join(&wp.dir_name)
    }

    pub fn wp_work_dir(&self, wp: &Workpackage) -> PathBuf {
        self.wp_dir(wp).join("work")
    }

    pub fn wp_done_marker(&self, wp: &Workpackage) -> PathBuf {
        self.wp_dir(wp).join("done")
    }

    pub fn wp_cycle_marker(wp_dir: &Path, cycle: u32, do_index: usize, ops_per_cycle: usize) -> PathBuf {
        let nn = cycle as usize * ops_per_cycle + do_index;
        wp_dir.join(format!("wp_done_{nn:02}"))
    }

    pub fn write_parameter_snapshot(&self, wp: &Workpackage) -> Result<()> {
        let xml = quick_xml::se::to_string(&wp.point)?;
        fs::write(self.wp_dir(wp).join("parameter.xml"), xml)?;
        Ok(())
    }

    pub fn write_environment_snapshot(&self, wp: &Workpackage, env: &HashMap<String, String>) -> Result<()> {
        fs::write(
            self.wp_dir(wp).join("environment.json"),
            serde_json::to_vec_pretty(env)?,
        )?;
        Ok(())
    }

    pub fn read_environment_snapshot(&self, wp: &Workpackage) -> Result<HashMap<String, String>> {
        let path = self.wp_dir(wp).join("environment.json");
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn init_workpackage_dir(&self, wp: &Workpackage) -> Result<()> {
        fs::create_dir_all(self.wp_work_dir(wp))?;
        self.write_parameter_snapshot(wp)?;
        Ok(())
    }

    /// Persist one workpackage's analyzer output to `analysis.json`
    /// (spec Section 4.5, consumed later by the Result Composer).
    pub fn write_analysis(&self, wp: &Workpackage, row: &crate::analyzer::AnalysisRow) -> Result<()> {
        fs::write(self.wp_dir(wp).join("analysis.json"), serde_json::to_vec_pretty(row)?)?;
        Ok(())
    }

    /// Read back every workpackage's persisted analysis, in `graph.xml`
    /// order, skipping workpackages that were never analyzed.
    pub fn read_all_analyses(&self, workpackages: &[Workpackage]) -> Result<Vec<crate::analyzer::AnalysisRow>> {
        let mut rows = Vec::new();
        for wp in workpackages {
            let path = self.wp_dir(wp).join("analysis.json");
            if !path.exists() {
                continue;
            }
            let text = fs::read_to_string(path)?;
            rows.push(serde_json::from_str(&text)?);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jube_core::WorkpackageState;
    use tempfile::tempdir;

    fn sample_wp(id: u64) -> Workpackage {
        Workpackage {
            id: Id::new(id),
            step_name: "compile".into(),
            iteration: 0,
            point: Default::default(),
            parents: Vec::new(),
            cycle: 0,
            do_index: 0,
            state: WorkpackageState::Created,
            dir_name: format!("{}_compile", Id::new(id).padded(ID_WIDTH)),
        }
    }

    #[test]
    fn create_then_open_round_trips_engine_version() {
        let dir = tempdir().unwrap();
        let store = BenchmarkStore::create(dir.path(), Id::new(1), "demo", false).unwrap();
        assert!(store.bench_xml_path().exists());

        let reopened = BenchmarkStore::open(dir.path(), Id::new(1), false).unwrap();
        let benchmark = reopened.read_bench_xml().unwrap();
        assert_eq!(benchmark.name, "demo");
    }

    #[test]
    fn graph_round_trips_workpackages() {
        let dir = tempdir().unwrap();
        let store = BenchmarkStore::create(dir.path(), Id::new(1), "demo", false).unwrap();
        let wp = sample_wp(1);
        store.write_graph(std::slice::from_ref(&wp)).unwrap();

        let loaded = store.read_graph().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].step_name, "compile");
    }

    #[test]
    fn version_mismatch_errors_under_strict() {
        let dir = tempdir().unwrap();
        let store = BenchmarkStore::create(dir.path(), Id::new(1), "demo", false).unwrap();
        let mut benchmark = store.read_bench_xml().unwrap();
        benchmark.engine_version = "0.0.0-old".to_string();
        store.write_bench_xml(&benchmark).unwrap();

        assert!(BenchmarkStore::open(dir.path(), Id::new(1), true).is_err());
        assert!(BenchmarkStore::open(dir.path(), Id::new(1), false).is_ok());
    }
}
