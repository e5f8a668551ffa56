//! Scheduler: graph construction, the Ready set, and execution (spec
//! Section 4.4–4.5).

use crate::error::{Result, SchedulerError};
use crate::store::BenchmarkStore;
use jube_core::doc::Document;
use jube_core::exprbool::BoolExpr;
use jube_core::expand::{cartesian_points, merge_parametersets, resolve_point};
use jube_core::fileset;
use jube_core::script::ScriptRegistry;
use jube_core::types::{DoOp, Parameter, Parameterset, Step, UpdateMode, Workpackage, WorkpackageState};
use jube_core::{EngineContext, Id, ParameterPoint};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::process::Command;
use std::sync::Mutex;

/// Orchestrates one benchmark run: graph construction followed by
/// repeated Ready-set execution passes.
pub struct Scheduler<'a> {
    pub ctx: &'a EngineContext,
    pub store: &'a BenchmarkStore,
    pub document: &'a Document,
    pub external_root: std::path::PathBuf,
    registry: ScriptRegistry,
    shared_locks: HashMap<String, Mutex<()>>,
    next_id: u64,
}

impl<'a> Scheduler<'a> {
    pub fn new(ctx: &'a EngineContext, store: &'a BenchmarkStore, document: &'a Document, external_root: std::path::PathBuf) -> Self {
        let shared_locks = document
            .steps
            .iter()
            .map(|s| (s.name.clone(), Mutex::new(())))
            .collect();
        Self {
            ctx,
            store,
            document,
            external_root,
            registry: ScriptRegistry::with_shell(),
            shared_locks,
            next_id: 1,
        }
    }

    fn step_by_name(&self, name: &str) -> Result<&Step> {
        self.document
            .steps
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| SchedulerError::StepNotFound(name.to_string()))
    }

    fn parametersets_for(&self, step: &Step) -> Vec<&Parameterset> {
        step.parametersets
            .iter()
            .filter_map(|name| self.document.parametersets.iter().find(|p| &p.name == name))
            .collect()
    }

    fn alloc_id(&mut self) -> Id {
        let id = Id::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Topologically order steps by `depend` edges; a cycle is a
    /// `DependencyCycle` error.
    fn topo_order(&self) -> Result<Vec<String>> {
        let mut order = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut visiting: HashSet<String> = HashSet::new();

        fn visit(
            name: &str,
            steps: &[Step],
            visited: &mut HashSet<String>,
            visiting: &mut HashSet<String>,
            order: &mut Vec<String>,
        ) -> Result<()> {
            if visited.contains(name) {
                return Ok(());
            }
            if !visiting.insert(name.to_string()) {
                return Err(SchedulerError::DependencyCycle(vec![name.to_string()]));
            }
            let step = steps
                .iter()
                .find(|s| s.name == name)
                .ok_or_else(|| SchedulerError::StepNotFound(name.to_string()))?;
            for parent in &step.depend {
                visit(parent, steps, visited, visiting, order)?;
            }
            visiting.remove(name);
            visited.insert(name.to_string());
            order.push(name.to_string());
            Ok(())
        }

        for step in &self.document.steps {
            visit(&step.name, &self.document.steps, &mut visited, &mut visiting, &mut order)?;
        }
        Ok(order)
    }

    /// Build the workpackage graph (spec Section 4.4, "Graph construction").
    pub fn build_graph(&mut self) -> Result<Vec<Workpackage>> {
        let order = self.topo_order()?;
        let mut all: Vec<Workpackage> = Vec::new();
        let mut by_step: HashMap<String, Vec<usize>> = HashMap::new();

        for name in order {
            let step = self.step_by_name(&name)?.clone();
            let sets = self.parametersets_for(&step);
            let params = merge_parametersets(&sets)?;
            let own_points = cartesian_points(&params);

            let combined_points: Vec<(ParameterPoint, Vec<Id>)> = if step.depend.is_empty() {
                own_points.into_iter().map(|p| (p, Vec::new())).collect()
            } else {
                let mut combined = Vec::new();
                for point in &own_points {
                    let mut candidate_parent_sets: Vec<Vec<(Id, ParameterPoint)>> = Vec::new();
                    for parent_name in &step.depend {
                        let indices = by_step.get(parent_name).cloned().unwrap_or_default();
                        let parents: Vec<(Id, ParameterPoint)> = indices
                            .iter()
                            .filter_map(|&i| all.get(i))
                            .filter(|wp| agrees(point, &wp.point))
                            .map(|wp| (wp.id, wp.point.clone()))
                            .collect();
                        candidate_parent_sets.push(parents);
                    }
                    for combo in cross(&candidate_parent_sets) {
                        if combo.len() != step.depend.len() {
                            continue;
                        }
                        let mut merged_point = point.clone();
                        let mut parent_ids = Vec::new();
                        for (id, parent_point) in combo {
                            parent_ids.push(id);
                            for (k, v) in parent_point {
                                merged_point.entry(k).or_insert(v);
                            }
                        }
                        combined.push((merged_point, parent_ids));
                    }
                }
                combined
            };

            let mut step_indices = Vec::new();
            for (point, parents) in combined_points {
                for iteration in 0..step.iterations {
                    let id = self.alloc_id();
                    let dir_name = BenchmarkStore::wp_dir_name(
                        &Workpackage {
                            id,
                            step_name: step.name.clone(),
                            iteration,
                            point: point.clone(),
                            parents: parents.clone(),
                            cycle: 0,
                            do_index: 0,
                            state: WorkpackageState::Created,
                            dir_name: String::new(),
                        },
                        step.suffix.as_deref(),
                    );
                    let wp = Workpackage {
                        id,
                        step_name: step.name.clone(),
                        iteration,
                        point: point.clone(),
                        parents: parents.clone(),
                        cycle: 0,
                        do_index: 0,
                        state: WorkpackageState::Created,
                        dir_name,
                    };
                    self.store.init_workpackage_dir(&wp)?;
                    step_indices.push(all.len());
                    all.push(wp);
                }
            }
            by_step.insert(step.name.clone(), step_indices);
        }

        self.store.write_graph(&all)?;
        Ok(all)
    }

    /// Which workpackages are Ready: all parents Done, step's `active`
    /// evaluates true against the workpackage's own resolved point, the
    /// step's `max_async` quota has headroom, and the workpackage isn't
    /// already terminal (spec Section 4.4, "Ready set").
    pub fn ready_indices(&self, workpackages: &[Workpackage]) -> Result<Vec<usize>> {
        let by_id: HashMap<Id, &Workpackage> = workpackages.iter().map(|w| (w.id, w)).collect();
        let mut awaiting_by_step: HashMap<&str, usize> = HashMap::new();
        for wp in workpackages {
            if wp.state == WorkpackageState::AwaitingSentinel {
                *awaiting_by_step.entry(wp.step_name.as_str()).or_insert(0) += 1;
            }
        }

        let mut ready = Vec::new();
        for (i, wp) in workpackages.iter().enumerate() {
            if wp.state.is_terminal() || wp.state == WorkpackageState::AwaitingSentinel {
                continue;
            }
            let parents_done = wp
                .parents
                .iter()
                .all(|p| by_id.get(p).map(|w| w.state == WorkpackageState::Done).unwrap_or(false));
            if !parents_done {
                continue;
            }
            let step = self.step_by_name(&wp.step_name)?;
            if let Some(max_async) = step.max_async {
                if awaiting_by_step.get(wp.step_name.as_str()).copied().unwrap_or(0) >= max_async {
                    continue;
                }
            }
            let expr = BoolExpr::parse(step.active.as_deref().unwrap_or("")).map_err(jube_core::EngineError::Resolution)?;
            if expr.eval(&wp.point) {
                ready.push(i);
            }
        }
        Ok(ready)
    }

    /// Resolve the parameter point for every workpackage in `ready`,
    /// spreading the work for each step across `step.procs` worker
    /// threads (spec Section 4.4, "Parallelism": "a global worker count
    /// for parameter expansion driven by `procs`"). Steps with
    /// `procs <= 1`, or fewer ready workpackages than worker threads,
    /// resolve inline on the calling thread.
    fn resolve_ready_points(&self, workpackages: &[Workpackage], ready: &[usize]) -> Result<HashMap<usize, ParameterPoint>> {
        let mut by_step: HashMap<&str, Vec<usize>> = HashMap::new();
        for &i in ready {
            by_step.entry(workpackages[i].step_name.as_str()).or_default().push(i);
        }

        let mut resolved: HashMap<usize, Result<ParameterPoint>> = HashMap::new();
        for (step_name, indices) in by_step {
            let step = self.step_by_name(step_name)?.clone();
            let params = merge_parametersets(&self.parametersets_for(&step))?;
            let procs = step.procs.max(1);

            if procs <= 1 || indices.len() <= 1 {
                for i in indices {
                    let point = resolve_point(&workpackages[i].point, &params, self.ctx, &self.registry, &HashSet::new());
                    resolved.insert(i, point);
                }
                continue;
            }

            let chunk_size = indices.len().div_ceil(procs).max(1);
            std::thread::scope(|scope| {
                let mut handles = Vec::new();
                for chunk in indices.chunks(chunk_size) {
                    let params = &params;
                    let ctx = self.ctx;
                    let registry = &self.registry;
                    let work: Vec<(usize, &ParameterPoint)> = chunk.iter().map(|&i| (i, &workpackages[i].point)).collect();
                    handles.push(scope.spawn(move || {
                        work.into_iter()
                            .map(|(i, point)| (i, resolve_point(point, params, ctx, registry, &HashSet::new())))
                            .collect::<Vec<_>>()
                    }));
                }
                for handle in handles {
                    for (i, point) in handle.join().expect("parameter expansion worker thread panicked") {
                        resolved.insert(i, point);
                    }
                }
            });
        }

        resolved.into_iter().map(|(i, r)| r.map(|p| (i, p)).map_err(SchedulerError::from)).collect()
    }

    /// Run a Ready workpackage to completion, suspension, or failure
    /// (spec Section 4.4, "Execution"). `precomputed` is an already
    /// resolved point for this workpackage, gathered up front (see
    /// `resolve_ready_points`); pass `None` to resolve inline.
    pub fn execute(&mut self, workpackages: &mut [Workpackage], index: usize, precomputed: Option<ParameterPoint>) -> Result<()> {
        let wp_snapshot = workpackages[index].clone();
        let step = self.step_by_name(&wp_snapshot.step_name)?.clone();

        let params = merge_parametersets(&self.parametersets_for(&step))?;
        let mut resolved = match precomputed {
            Some(point) => point,
            None => resolve_point(&wp_snapshot.point, &params, self.ctx, &self.registry, &HashSet::new())
                .map_err(SchedulerError::from)?,
        };

        // Parameters with update_mode="cycle"/"always" re-resolve at
        // every cycle iteration (spec Section 3, "Parameter", update_mode).
        let cycle_sensitive: Vec<Parameter> = params
            .iter()
            .filter(|p| matches!(p.update_mode, UpdateMode::Cycle | UpdateMode::Always))
            .cloned()
            .collect();

        let work_dir = step
            .work_dir
            .as_ref()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| self.store.wp_work_dir(&wp_snapshot));

        let mut env = build_env(&params, &resolved);
        self.store.write_environment_snapshot(&wp_snapshot, &env)?;

        if let Some(fs_name) = &step.fileset {
            let named = self
                .document
                .filesets
                .iter()
                .find(|f| &f.name == fs_name)
                .ok_or_else(|| SchedulerError::Engine(jube_core::EngineError::Config(format!("step '{}' references unknown fileset '{fs_name}'", step.name))))?;
            fileset::prepare(&named.fileset, &self.external_root, &work_dir, &resolved, self.ctx)
                .map_err(SchedulerError::from)?;
        }

        let wp_dir = self.store.wp_dir(&wp_snapshot);
        let ops_per_cycle = step.do_ops.len().max(1);

        'cycles: for cycle in wp_snapshot.cycle..step.cycles {
            if !cycle_sensitive.is_empty() && cycle > wp_snapshot.cycle {
                let mut cycle_point = wp_snapshot.point.clone();
                cycle_point.insert("jube_wp_cycle".to_string(), cycle.to_string());
                let recycled = resolve_point(&cycle_point, &cycle_sensitive, self.ctx, &self.registry, &HashSet::new())
                    .map_err(SchedulerError::from)?;
                for param in &cycle_sensitive {
                    if let Some(value) = recycled.get(&param.name) {
                        resolved.insert(param.name.clone(), value.clone());
                    }
                }
                env = build_env(&params, &resolved);
            }

            for (do_index, op) in step.do_ops.iter().enumerate().skip(if cycle == wp_snapshot.cycle { wp_snapshot.do_index } else { 0 }) {
                let active_expr = BoolExpr::parse(op.active.as_deref().unwrap_or("")).map_err(jube_core::EngineError::Resolution)?;
                if !active_expr.eval(&resolved) {
                    continue;
                }

                let exec_dir = work_dir.clone();

                let mut command_env = env.clone();
                command_env.insert("jube_wp_cycle".to_string(), cycle.to_string());

                let status = if op.shared {
                    let lock = self.shared_locks.entry(step.name.clone()).or_insert_with(|| Mutex::new(()));
                    let _guard = lock.lock().unwrap();
                    run_do(self.ctx, op, &exec_dir, &command_env)?
                } else {
                    run_do(self.ctx, op, &exec_dir, &command_env)?
                };

                if let Some(break_file) = &op.break_file {
                    if exec_dir.join(break_file).exists() {
                        workpackages[index].state = WorkpackageState::Done;
                        break 'cycles;
                    }
                }

                match status {
                    DoOutcome::Exited(code) if code != 0 => {
                        workpackages[index].state = WorkpackageState::Error;
                        return Ok(());
                    }
                    DoOutcome::Exited(_) => {}
                    DoOutcome::Async => {
                        let marker = BenchmarkStore::wp_cycle_marker(&wp_dir, cycle, do_index, ops_per_cycle);
                        std::fs::write(&marker, b"")?;
                        workpackages[index].state = WorkpackageState::AwaitingSentinel;
                        workpackages[index].cycle = cycle;
                        workpackages[index].do_index = do_index;
                        return Ok(());
                    }
                }
            }
        }

        workpackages[index].state = WorkpackageState::Done;
        std::fs::write(self.store.wp_done_marker(&wp_snapshot), b"")?;
        Ok(())
    }

    /// Re-probe sentinel files for every `AwaitingSentinel` workpackage
    /// (spec Section 4.4.3.e and "Restart").
    pub fn poll_async(&mut self, workpackages: &mut [Workpackage]) -> Result<()> {
        for wp in workpackages.iter_mut() {
            if wp.state != WorkpackageState::AwaitingSentinel {
                continue;
            }
            let step = self
                .document
                .steps
                .iter()
                .find(|s| s.name == wp.step_name)
                .ok_or_else(|| SchedulerError::StepNotFound(wp.step_name.clone()))?;
            let Some(op) = step.do_ops.get(wp.do_index) else {
                continue;
            };
            let wp_dir = self.store.bench_dir.join(&wp.dir_name);
            if let Some(done_file) = &op.done_file {
                if wp_dir.join(done_file).exists() {
                    wp.do_index += 1;
                    wp.state = WorkpackageState::Ready;
                    continue;
                }
            }
            if let Some(error_file) = &op.error_file {
                if wp_dir.join(error_file).exists() {
                    wp.state = WorkpackageState::Error;
                }
            }
        }
        Ok(())
    }

    /// Run every pass until nothing is Ready or AwaitingSentinel,
    /// honoring `exit_on_error` (spec Section 4.4, "Execution" 4.d).
    pub fn run_to_completion(&mut self, workpackages: &mut Vec<Workpackage>) -> Result<()> {
        loop {
            self.poll_async(workpackages)?;
            let ready = self.ready_indices(workpackages)?;
            if ready.is_empty() {
                let awaiting = workpackages.iter().any(|w| w.state == WorkpackageState::AwaitingSentinel);
                if !awaiting {
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(50));
                continue;
            }
            let mut resolved_points = self.resolve_ready_points(workpackages, &ready)?;
            for index in ready {
                let precomputed = resolved_points.remove(&index);
                self.execute(workpackages, index, precomputed)?;
                if self.ctx.exit_on_error && workpackages[index].state == WorkpackageState::Error {
                    self.store.write_graph(workpackages)?;
                    return Ok(());
                }
            }
            self.store.write_graph(workpackages)?;
        }
        self.store.write_graph(workpackages)?;
        Ok(())
    }
}

fn build_env(params: &[Parameter], resolved: &ParameterPoint) -> HashMap<String, String> {
    params
        .iter()
        .filter(|p| p.export)
        .filter_map(|p| resolved.get(&p.name).map(|v| (p.name.clone(), v.clone())))
        .collect()
}

enum DoOutcome {
    Exited(i32),
    Async,
}

fn run_do(ctx: &EngineContext, op: &DoOp, dir: &std::path::Path, env: &HashMap<String, String>) -> Result<DoOutcome> {
    std::fs::create_dir_all(dir)?;
    let output = Command::new(ctx.effective_shell())
        .arg("-c")
        .arg(&op.command)
        .current_dir(dir)
        .envs(env)
        .output()?;

    if op.done_file.is_some() {
        return Ok(DoOutcome::Async);
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        let mut tail_text = tail.into_iter().rev().collect::<Vec<_>>().join("\n");
        if tail_text.is_empty() {
            tail_text = "(no stderr captured)".to_string();
        }
        let mut stderr_log = std::fs::OpenOptions::new().create(true).append(true).open(dir.join("stderr.log"))?;
        writeln!(stderr_log, "{tail_text}")?;
    }

    Ok(DoOutcome::Exited(output.status.code().unwrap_or(-1)))
}

fn agrees(a: &ParameterPoint, b: &ParameterPoint) -> bool {
    a.iter().all(|(k, v)| b.get(k).map(|bv| bv == v).unwrap_or(true))
}

fn cross(sets: &[Vec<(Id, ParameterPoint)>]) -> Vec<Vec<(Id, ParameterPoint)>> {
    let mut result: Vec<Vec<(Id, ParameterPoint)>> = vec![Vec::new()];
    for set in sets {
        let mut next = Vec::new();
        for partial in &result {
            for item in set {
                let mut extended = partial.clone();
                extended.push(item.clone());
                next.push(extended);
            }
        }
        result = next;
    }
    if sets.is_empty() {
        Vec::new()
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jube_core::types::Parameter;
    use tempfile::tempdir;

    fn text_param(name: &str, raw: &str) -> Parameter {
        Parameter {
            name: name.into(),
            value_type: Default::default(),
            mode: Default::default(),
            raw_value: raw.into(),
            separator: ",".into(),
            export: false,
            update_mode: Default::default(),
            duplicate: Default::default(),
            tag: None,
        }
    }

    fn simple_document() -> Document {
        let mut pset = Parameterset::default();
        pset.name = "nums".into();
        pset.parameters.push(text_param("n", "1,2"));

        let step = Step {
            name: "compile".into(),
            parametersets: vec!["nums".into()],
            iterations: 1,
            cycles: 1,
            procs: 1,
            do_ops: vec![DoOp {
                command: "true".into(),
                active: None,
                shared: false,
                done_file: None,
                error_file: None,
                break_file: None,
            }],
            ..Default::default()
        };

        Document {
            benchmark_name: "demo".into(),
            parametersets: vec![pset],
            patternsets: Vec::new(),
            filesets: Vec::new(),
            steps: vec![step],
            analysers: Vec::new(),
            results: Vec::new(),
        }
    }

    #[test]
    fn build_graph_creates_one_workpackage_per_point() {
        let dir = tempdir().unwrap();
        let store = BenchmarkStore::create(dir.path(), Id::new(1), "demo", false).unwrap();
        let document = simple_document();
        let ctx = EngineContext::default();
        let mut scheduler = Scheduler::new(&ctx, &store, &document, dir.path().to_path_buf());

        let graph = scheduler.build_graph().unwrap();
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn run_to_completion_marks_all_done() {
        let dir = tempdir().unwrap();
        let store = BenchmarkStore::create(dir.path(), Id::new(1), "demo", false).unwrap();
        let document = simple_document();
        let ctx = EngineContext::default();
        let mut scheduler = Scheduler::new(&ctx, &store, &document, dir.path().to_path_buf());

        let mut graph = scheduler.build_graph().unwrap();
        scheduler.run_to_completion(&mut graph).unwrap();
        assert!(graph.iter().all(|wp| wp.state == WorkpackageState::Done));
    }
}
