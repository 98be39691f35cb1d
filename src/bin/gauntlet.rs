use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};

use gauntlet::analysis::run_analysis;
use gauntlet::config::EngineConfig;
use gauntlet::exec::CommandTestExecutor;
use gauntlet::history::JsonFileHistory;
use gauntlet::mutant::{MutantDescriptor, MutantResult};
use gauntlet::process::{ProcessWorkerFactory, WorkerCommand};
use gauntlet::registry::{ComponentRegistry, ResultListener};
use gauntlet::stats::MutationStatistics;

#[derive(Debug, Parser)]
#[command(name = "gauntlet")]
#[command(about = "Mutation testing coordinator with process-isolated workers")]
struct Cli {
    #[command(subcommand)]
    command: TopCommand,
}

#[derive(Debug, Subcommand)]
enum TopCommand {
    /// Analyse a mutant manifest against its covering tests.
    Run {
        /// JSON manifest: an array of mutant descriptors.
        manifest: PathBuf,
        /// Command executed once per covering test; the test id is
        /// appended as the final argument.
        #[arg(long)]
        test_cmd: String,
        /// Working directory for test commands.
        #[arg(long)]
        work_dir: Option<PathBuf>,
        /// Worker pool capacity.
        #[arg(long)]
        workers: Option<usize>,
        /// Maximum mutants per execution unit.
        #[arg(long)]
        unit_size: Option<usize>,
        /// Grouping strategy name.
        #[arg(long)]
        grouper: Option<String>,
        /// Flat per-unit deadline component in milliseconds.
        #[arg(long)]
        base_timeout_ms: Option<u64>,
        /// Deadline multiplier over observed coverage runtime.
        #[arg(long)]
        timeout_factor: Option<f64>,
        /// Local per-test timeout inside workers, in milliseconds.
        #[arg(long, default_value_t = 30_000)]
        per_test_timeout_ms: u64,
        /// Path to the incremental history log.
        #[arg(long)]
        history: Option<PathBuf>,
        /// Give up on crashed units instead of retrying them once.
        #[arg(long)]
        no_retry: bool,
        /// Emit the summary as JSON instead of text.
        #[arg(long)]
        json: bool,
        /// Output format for per-mutant progress.
        #[arg(long, value_enum, default_value = "survivors")]
        show: ProgressDetail,
    },
    /// Worker-process entry point, spawned by the coordinator.
    #[command(hide = true)]
    Worker {
        /// Command executed once per covering test.
        #[arg(long)]
        test_cmd: String,
        /// Working directory for test commands.
        #[arg(long)]
        work_dir: Option<PathBuf>,
        /// Local per-test timeout in milliseconds.
        #[arg(long, default_value_t = 30_000)]
        per_test_timeout_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProgressDetail {
    /// Print only surviving mutants.
    Survivors,
    /// Print every resolved mutant.
    All,
    /// Print nothing per mutant.
    None,
}

/// Streams resolved mutants to stdout as the run progresses.
struct ProgressPrinter {
    detail: ProgressDetail,
}

impl ResultListener for ProgressPrinter {
    fn run_started(&mut self, total_mutants: usize) {
        println!("gauntlet: analysing {total_mutants} mutant(s)");
    }

    fn mutant_resolved(&mut self, result: &MutantResult) {
        let print = match self.detail {
            ProgressDetail::All => true,
            ProgressDetail::Survivors => {
                result.status == gauntlet::mutant::DetectionStatus::Survived
            }
            ProgressDetail::None => false,
        };
        if print {
            println!(
                "gauntlet: {} {}:{} {} -> {}",
                result.mutant.id,
                result.mutant.class_id,
                result.mutant.line,
                result.mutant.mutator,
                result.status
            );
        }
    }

    fn run_finished(&mut self, statistics: &MutationStatistics) {
        println!(
            "gauntlet: {} of {} testable mutants detected ({}%)",
            statistics.total_detected,
            statistics.testable(),
            statistics.percentage_detected()
        );
    }
}

fn parse_command(test_cmd: &str) -> Result<(String, Vec<String>)> {
    let mut parts = test_cmd.split_whitespace().map(str::to_string);
    let program = parts.next().context("test command must not be empty")?;
    Ok((program, parts.collect()))
}

fn load_manifest(path: &PathBuf) -> Result<Vec<MutantDescriptor>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    let descriptors: Vec<MutantDescriptor> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse manifest {}", path.display()))?;
    Ok(descriptors)
}

fn worker_factory(
    test_cmd: &str,
    work_dir: &Option<PathBuf>,
    per_test_timeout_ms: u64,
) -> Result<ProcessWorkerFactory> {
    let current_exe = std::env::current_exe().context("failed to locate own executable")?;
    let mut args = vec![
        "worker".to_string(),
        "--test-cmd".to_string(),
        test_cmd.to_string(),
        "--per-test-timeout-ms".to_string(),
        per_test_timeout_ms.to_string(),
    ];
    if let Some(dir) = work_dir {
        args.push("--work-dir".to_string());
        args.push(dir.display().to_string());
    }
    Ok(ProcessWorkerFactory::new(WorkerCommand::new(
        current_exe.display().to_string(),
        args,
    )))
}

#[allow(clippy::too_many_arguments)]
fn run(
    manifest: PathBuf,
    test_cmd: String,
    work_dir: Option<PathBuf>,
    workers: Option<usize>,
    unit_size: Option<usize>,
    grouper: Option<String>,
    base_timeout_ms: Option<u64>,
    timeout_factor: Option<f64>,
    per_test_timeout_ms: u64,
    history: Option<PathBuf>,
    no_retry: bool,
    json: bool,
    show: ProgressDetail,
) -> Result<()> {
    let mut config = EngineConfig::default().with_retry_on_crash(!no_retry);
    if let Some(workers) = workers {
        config = config.with_workers(workers);
    }
    if let Some(unit_size) = unit_size {
        config = config.with_max_unit_size(unit_size);
    }
    if let Some(grouper) = grouper {
        config = config.with_grouper(grouper);
    }
    if let Some(base_timeout_ms) = base_timeout_ms {
        config = config.with_base_timeout_ms(base_timeout_ms);
    }
    if let Some(timeout_factor) = timeout_factor {
        config = config.with_timeout_factor(timeout_factor);
    }
    if let Some(history_path) = &history {
        config = config.with_history_path(history_path.clone());
    }

    let mut registry = ComponentRegistry::new();
    if !json {
        registry.register_listener(Box::new(ProgressPrinter { detail: show }));
    }
    if let Some(path) = &config.history_path {
        let store = JsonFileHistory::open(path)
            .with_context(|| format!("failed to open history {}", path.display()))?;
        registry.set_history(Box::new(store));
    }

    let descriptors = load_manifest(&manifest)?;
    let factory = worker_factory(&test_cmd, &work_dir, per_test_timeout_ms)?;

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || {
            cancel.store(true, Ordering::SeqCst);
        })
        .context("failed to install interrupt handler")?;
    }

    let outcome = run_analysis(&config, &mut registry, &factory, descriptors, Some(&cancel))?;

    if json {
        let payload = serde_json::json!({
            "statistics": outcome.statistics,
            "percentage_detected": outcome.statistics.percentage_detected(),
            "scores": outcome.scores,
            "skipped_by_history": outcome.skipped_by_history,
            "elapsed_ms": outcome.elapsed.as_millis() as u64,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!(
            "gauntlet: done in {:.1}s ({} reused from history)",
            outcome.elapsed.as_secs_f64(),
            outcome.skipped_by_history
        );
    }

    if cancel.load(Ordering::SeqCst) {
        bail!("run interrupted");
    }
    Ok(())
}

fn serve_worker(
    test_cmd: String,
    work_dir: Option<PathBuf>,
    per_test_timeout_ms: u64,
) -> Result<()> {
    let (program, args) = parse_command(&test_cmd)?;
    let mut executor = CommandTestExecutor::new(program, args)
        .with_per_test_timeout(Duration::from_millis(per_test_timeout_ms));
    if let Some(dir) = work_dir {
        executor = executor.with_work_dir(dir);
    }

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut reader = stdin.lock();
    let mut writer = stdout.lock();
    gauntlet::worker::serve(&mut reader, &mut writer, &mut executor)?;
    Ok(())
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    match cli.command {
        TopCommand::Run {
            manifest,
            test_cmd,
            work_dir,
            workers,
            unit_size,
            grouper,
            base_timeout_ms,
            timeout_factor,
            per_test_timeout_ms,
            history,
            no_retry,
            json,
            show,
        } => run(
            manifest,
            test_cmd,
            work_dir,
            workers,
            unit_size,
            grouper,
            base_timeout_ms,
            timeout_factor,
            per_test_timeout_ms,
            history,
            no_retry,
            json,
            show,
        ),
        TopCommand::Worker {
            test_cmd,
            work_dir,
            per_test_timeout_ms,
        } => serve_worker(test_cmd, work_dir, per_test_timeout_ms),
    }
}
