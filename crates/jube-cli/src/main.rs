//! jube - benchmarking workflow engine CLI.
//!
//! In-process front-end over `jube-engine`: expands parameters, builds
//! and runs a workpackage graph, analyzes output, and composes results
//! (spec Section 6 / SPEC_FULL.md Section 3).

use clap::{Parser, Subcommand};
use eyre::{eyre, Context, Result};
use jube_core::doc::{self, Document};
use jube_core::EngineContext;
use jube_core::Id;
use jube_engine::store::BenchmarkStore;
use jube_engine::{analyzer, result, Scheduler};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "jube")]
#[command(about = "Benchmarking workflow engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a configuration file, expand its parameter space, and run
    /// the resulting workpackage graph to completion.
    Run {
        file: PathBuf,
        #[arg(long)]
        id: Option<String>,
        #[arg(long, default_value = ".")]
        outpath: PathBuf,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        include_path: Option<String>,
        #[arg(short = 'e', long = "exit")]
        exit_on_error: bool,
        #[arg(long)]
        strict: bool,
    },
    /// Resume a suspended or partially-run benchmark.
    Continue {
        #[arg(default_value = ".")]
        dir: PathBuf,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        strict: bool,
    },
    /// Re-run the analyzer against an already-executed benchmark.
    Analyse {
        #[arg(default_value = ".")]
        dir: PathBuf,
        #[arg(long)]
        id: Option<String>,
    },
    /// Compose and print results for one or more benchmarks.
    Result {
        #[arg(default_value = ".")]
        dir: PathBuf,
        #[arg(long, default_value = "last")]
        id: String,
        #[arg(short = 's', long, default_value = "pretty")]
        style: String,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(short = 'r', long)]
        reverse: bool,
        #[arg(long)]
        tag: Option<String>,
    },
    /// Print a benchmark's workpackage graph.
    Info {
        #[arg(default_value = ".")]
        dir: PathBuf,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        step: Option<String>,
        #[arg(short = 'p', long)]
        parametersets: bool,
        #[arg(short = 'c', long)]
        csv: bool,
        #[arg(long, default_value = ",")]
        csv_sep: String,
    },
    /// Summarize every benchmark under `outpath`.
    Status {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
    /// Print the tail of each workpackage's captured stderr.
    Log {
        #[arg(default_value = ".")]
        dir: PathBuf,
        #[arg(long)]
        id: Option<String>,
    },
    /// Append a freeform note to a benchmark directory.
    Comment {
        #[arg(default_value = ".")]
        dir: PathBuf,
        #[arg(long)]
        id: Option<String>,
        text: String,
    },
    /// Remove a benchmark, or a single workpackage within one.
    Remove {
        #[arg(default_value = ".")]
        dir: PathBuf,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        workpackage: Option<u64>,
    },
    /// Re-resolve `update_mode` parameters for a benchmark in place.
    Update {
        #[arg(default_value = ".")]
        dir: PathBuf,
        #[arg(long)]
        id: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            file,
            id,
            outpath,
            tag,
            include_path,
            exit_on_error,
            strict,
        } => cmd_run(&file, id.as_deref(), &outpath, tag.as_deref(), include_path.as_deref(), exit_on_error, strict),
        Command::Continue { dir, id, strict } => cmd_continue(&dir, id.as_deref(), strict),
        Command::Analyse { dir, id } => cmd_analyse(&dir, id.as_deref()),
        Command::Result {
            dir,
            id,
            style,
            limit,
            reverse,
            tag,
        } => cmd_result(&dir, &id, &style, limit, reverse, tag.as_deref()),
        Command::Info { dir, id, step, parametersets, csv, csv_sep } => cmd_info(&dir, id.as_deref(), step.as_deref(), parametersets, csv, &csv_sep),
        Command::Status { dir } => cmd_status(&dir),
        Command::Log { dir, id } => cmd_log(&dir, id.as_deref()),
        Command::Comment { dir, id, text } => cmd_comment(&dir, id.as_deref(), &text),
        Command::Remove { dir, id, workpackage } => cmd_remove(&dir, id.as_deref(), workpackage),
        Command::Update { dir, id } => cmd_update(&dir, id.as_deref()),
    }
}

/// Every benchmark id currently materialized under `outpath`, sorted
/// ascending.
fn list_ids(outpath: &Path) -> Vec<u64> {
    let Ok(entries) = std::fs::read_dir(outpath) else {
        return Vec::new();
    };
    let mut ids: Vec<u64> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse::<u64>().ok()))
        .collect();
    ids.sort_unstable();
    ids
}

/// Resolve a single `--id` selector: absent or `"last"` means the most
/// recent benchmark; a negative number counts back from the end;
/// otherwise the literal id is looked up.
fn resolve_single_id(outpath: &Path, raw: Option<&str>) -> Result<Id> {
    let ids = list_ids(outpath);
    match raw {
        None | Some("last") => ids.last().copied().map(Id::new).ok_or_else(|| eyre!("no benchmarks found under {}", outpath.display())),
        Some(value) => {
            let n: i64 = value.parse().with_context(|| format!("invalid --id '{value}'"))?;
            if n < 0 {
                let index = ids.len() as i64 + n;
                usize::try_from(index)
                    .ok()
                    .and_then(|i| ids.get(i))
                    .copied()
                    .map(Id::new)
                    .ok_or_else(|| eyre!("--id {n} is out of range"))
            } else {
                ids.iter()
                    .find(|&&id| id == n as u64)
                    .copied()
                    .map(Id::new)
                    .ok_or_else(|| eyre!("no benchmark with id {n}"))
            }
        }
    }
}

/// Resolve a `--id N|all|last` selector for the `result` subcommand.
fn resolve_ids(outpath: &Path, raw: &str) -> Result<Vec<Id>> {
    if raw == "all" {
        return Ok(list_ids(outpath).into_iter().map(Id::new).collect());
    }
    Ok(vec![resolve_single_id(outpath, Some(raw))?])
}

fn load_document_for(store: &BenchmarkStore, ctx: &EngineContext, tag_expr: Option<&str>) -> Result<Document> {
    let benchmark = store.read_bench_xml()?;
    let source = benchmark
        .source_path
        .ok_or_else(|| eyre!("benchmark {} has no recorded source configuration file", benchmark.id))?;
    Ok(doc::load(Path::new(&source), ctx, tag_expr)?)
}

fn cmd_run(file: &Path, id: Option<&str>, outpath: &Path, tag: Option<&str>, include_path: Option<&str>, exit_on_error: bool, strict: bool) -> Result<()> {
    let mut ctx = EngineContext::from_env(include_path, None);
    ctx.exit_on_error = exit_on_error;
    ctx.strict = strict;
    ctx.tag_expr = tag.map(str::to_string);

    let document = doc::load(file, &ctx, tag)?;
    let next_id = id
        .map(|raw| raw.parse::<u64>().map(Id::new).map_err(|_| eyre!("invalid --id '{raw}'")))
        .transpose()?
        .unwrap_or_else(|| Id::new(list_ids(outpath).last().map_or(1, |last| last + 1)));

    std::fs::create_dir_all(outpath)?;
    let external_root = file.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let store = BenchmarkStore::create_with_source(outpath, next_id, &document.benchmark_name, Some(file), strict)?;

    let mut scheduler = Scheduler::new(&ctx, &store, &document, external_root);
    let mut graph = scheduler.build_graph()?;
    scheduler.run_to_completion(&mut graph)?;

    println!("benchmark {} ({} workpackages)", next_id, graph.len());
    Ok(())
}

fn cmd_continue(dir: &Path, id: Option<&str>, strict: bool) -> Result<()> {
    let ctx = EngineContext::default();
    let bench_id = resolve_single_id(dir, id)?;
    let store = BenchmarkStore::open(dir, bench_id, strict)?;
    let document = load_document_for(&store, &ctx, None)?;

    let benchmark = store.read_bench_xml()?;
    let external_root = benchmark
        .source_path
        .as_ref()
        .and_then(|p| Path::new(p).parent())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    let mut graph = store.read_graph()?;
    let mut scheduler = Scheduler::new(&ctx, &store, &document, external_root);
    scheduler.run_to_completion(&mut graph)?;

    println!("benchmark {bench_id} continued ({} workpackages)", graph.len());
    Ok(())
}

fn cmd_analyse(dir: &Path, id: Option<&str>) -> Result<()> {
    let ctx = EngineContext::default();
    let bench_id = resolve_single_id(dir, id)?;
    let store = BenchmarkStore::open(dir, bench_id, false)?;
    let document = load_document_for(&store, &ctx, None)?;
    let graph = store.read_graph()?;

    let rows = analyzer::analyse(&document, &store, &graph)?;
    println!("analyzed {} workpackages", rows.len());
    Ok(())
}

fn cmd_result(dir: &Path, id: &str, style: &str, limit: Option<usize>, reverse: bool, tag: Option<&str>) -> Result<()> {
    let ctx = EngineContext::default();
    let table_style = match style {
        "csv" => jube_core::doc::TableStyle::Csv,
        "aligned" => jube_core::doc::TableStyle::Aligned,
        _ => jube_core::doc::TableStyle::Pretty,
    };

    let mut all_rows = Vec::new();
    let mut last_document: Option<Document> = None;
    for bench_id in resolve_ids(dir, id)? {
        let store = BenchmarkStore::open(dir, bench_id, false)?;
        let document = load_document_for(&store, &ctx, tag)?;
        let graph = store.read_graph()?;
        let mut rows = store.read_all_analyses(&graph)?;
        if rows.is_empty() {
            rows = analyzer::analyse(&document, &store, &graph)?;
        }
        all_rows.extend(rows);
        last_document = Some(document);
    }

    if reverse {
        all_rows.reverse();
    }
    if let Some(limit) = limit {
        all_rows.truncate(limit);
    }

    // A benchmark's own `<result>` sinks win; fall back to an ad hoc
    // table (in the `--style` requested on the command line) only when
    // the configuration declared none (spec Section 4.6, "Result Composer").
    let declared_sinks = last_document.as_ref().map(|d| d.results.clone()).unwrap_or_default();
    let fallback_sink = jube_core::doc::ResultSink::Table {
        name: "cli".to_string(),
        style: table_style,
        sort: Vec::new(),
        transpose: false,
        filter: None,
        columns: Vec::new(),
    };
    let sinks: Vec<jube_core::doc::ResultSink> = if declared_sinks.is_empty() { vec![fallback_sink] } else { declared_sinks };
    let types = last_document.as_ref().map(result::value_types).unwrap_or_default();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(result::compose(&sinks, &all_rows, &types))?;
    Ok(())
}

fn cmd_info(dir: &Path, id: Option<&str>, step: Option<&str>, parametersets: bool, csv: bool, csv_sep: &str) -> Result<()> {
    let bench_id = resolve_single_id(dir, id)?;
    let store = BenchmarkStore::open(dir, bench_id, false)?;
    let graph = store.read_graph()?;

    let filtered: Vec<_> = graph.iter().filter(|wp| step.map(|s| wp.step_name == s).unwrap_or(true)).collect();

    if csv {
        for wp in &filtered {
            let values: Vec<String> = wp.point.values().cloned().collect();
            println!("{}{}{}", wp.id, csv_sep, values.join(csv_sep));
        }
        return Ok(());
    }

    for wp in &filtered {
        print!("{} {} [{:?}]", wp.id, wp.step_name, wp.state);
        if parametersets {
            print!(" {:?}", wp.point);
        }
        println!();
    }
    Ok(())
}

fn cmd_status(dir: &Path) -> Result<()> {
    for id in list_ids(dir) {
        let store = BenchmarkStore::open(dir, Id::new(id), false)?;
        let benchmark = store.read_bench_xml()?;
        let graph = store.read_graph()?;
        let done = graph.iter().filter(|wp| wp.state == jube_core::WorkpackageState::Done).count();
        let errored = graph.iter().filter(|wp| wp.state == jube_core::WorkpackageState::Error).count();
        println!("{} {} {}/{} done, {} errored", benchmark.id, benchmark.name, done, graph.len(), errored);
    }
    Ok(())
}

fn cmd_log(dir: &Path, id: Option<&str>) -> Result<()> {
    let bench_id = resolve_single_id(dir, id)?;
    let store = BenchmarkStore::open(dir, bench_id, false)?;
    for wp in store.read_graph()? {
        let log_path = store.wp_work_dir(&wp).join("stderr.log");
        if let Ok(text) = std::fs::read_to_string(&log_path) {
            println!("== {} {} ==\n{}", wp.id, wp.step_name, text);
        }
    }
    Ok(())
}

fn cmd_comment(dir: &Path, id: Option<&str>, text: &str) -> Result<()> {
    let bench_id = resolve_single_id(dir, id)?;
    let store = BenchmarkStore::open(dir, bench_id, false)?;
    let path = store.bench_dir.join("comments.log");
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    use std::io::Write;
    writeln!(file, "{}", text)?;
    Ok(())
}

fn cmd_remove(dir: &Path, id: Option<&str>, workpackage: Option<u64>) -> Result<()> {
    let bench_id = resolve_single_id(dir, id)?;
    let store = BenchmarkStore::open(dir, bench_id, false)?;

    match workpackage {
        Some(wp_id) => {
            let mut graph = store.read_graph()?;
            let Some(pos) = graph.iter().position(|wp| wp.id.value() == wp_id) else {
                return Err(eyre!("no workpackage {wp_id} in benchmark {bench_id}"));
            };
            let wp = graph.remove(pos);
            let _ = std::fs::remove_dir_all(store.wp_dir(&wp));
            store.write_graph(&graph)?;
        }
        None => {
            std::fs::remove_dir_all(&store.bench_dir)?;
        }
    }
    Ok(())
}

fn cmd_update(dir: &Path, id: Option<&str>) -> Result<()> {
    let ctx = EngineContext::default();
    let bench_id = resolve_single_id(dir, id)?;
    let store = BenchmarkStore::open(dir, bench_id, false)?;
    let document = load_document_for(&store, &ctx, None)?;
    let mut graph = store.read_graph()?;

    for wp in &mut graph {
        let Some(step) = document.steps.iter().find(|s| s.name == wp.step_name) else {
            continue;
        };
        if wp.state.is_terminal() {
            continue;
        }
        let sets: Vec<&jube_core::Parameterset> = step
            .parametersets
            .iter()
            .filter_map(|name| document.parametersets.iter().find(|p| &p.name == name))
            .collect();
        let params = jube_core::expand::merge_parametersets(&sets)?;
        let registry = jube_core::script::ScriptRegistry::with_shell();
        wp.point = jube_core::expand::resolve_point(&wp.point, &params, &ctx, &registry, &Default::default())?;
    }

    store.write_graph(&graph)?;
    println!("updated {} workpackages", graph.len());
    Ok(())
}
