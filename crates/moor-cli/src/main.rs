use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use moor_core::{BatchResult, OperationKind, OperationRequest, RequestFlags, TargetScope};
use moor_engine::{CancelToken, Config, LifecycleOrchestrator, StatusView, SystemClock};
use moor_runtime_docker::DockerCli;
use moor_spec::{load_workloads, YamlSpecLoader};
use moor_state::StateStore;

#[derive(Parser)]
#[command(name = "moor", version, about = "Lifecycle manager for container workloads")]
struct Cli {
    /// Config file (default ~/.moor/moor.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State document, overriding the configured path
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Args, Clone, Copy, Debug)]
struct RunFlags {
    /// Replace an existing container of the same name
    #[arg(long)]
    force: bool,

    /// Create without starting
    #[arg(long)]
    no_start: bool,

    /// Readiness timeout in seconds for this call
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Create containers from a workload file
    Generate {
        file: PathBuf,
        /// Only these workloads from the file
        #[arg(long = "name")]
        names: Vec<String>,
        #[command(flatten)]
        flags: RunFlags,
    },

    /// Recreate tracked containers from the files they were generated from
    Install {
        names: Vec<String>,
        #[command(flatten)]
        flags: RunFlags,
    },

    /// Replace tracked containers with the current definition in a workload file
    Update {
        file: PathBuf,
        #[arg(long = "name")]
        names: Vec<String>,
        #[arg(long)]
        no_start: bool,
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Start tracked containers and wait for readiness
    Start {
        names: Vec<String>,
        /// Every tracked container
        #[arg(long)]
        all: bool,
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Stop tracked containers
    Stop {
        names: Vec<String>,
        #[arg(long)]
        all: bool,
    },

    /// Stop then start, re-evaluating readiness
    Restart {
        names: Vec<String>,
        #[arg(long)]
        all: bool,
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Remove containers and forget their records
    Cleanup {
        names: Vec<String>,
        /// Every tracked container
        #[arg(long, conflicts_with = "all_runtime")]
        all_state: bool,
        /// Every container the runtime knows, tracked or not
        #[arg(long)]
        all_runtime: bool,
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
        #[arg(long)]
        force: bool,
    },

    /// Show tracked containers, or one container against the runtime
    Status { name: Option<String> },

    /// Drop records of containers the runtime no longer has
    Sweep,

    /// Inspect or reset the state document
    State {
        #[command(subcommand)]
        cmd: StateCommand,
    },
}

#[derive(Subcommand)]
enum StateCommand {
    /// Print the state document path and record count
    Show,
    /// Replace the state document with an empty one
    Reset {
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_config_path);
    let config = Config::load_or_default(&config_path)?;
    let state_path = cli.state.clone().unwrap_or_else(|| config.state_path());
    debug!(config = %config_path.display(), state = %state_path.display(), "resolved paths");

    if let Command::State { cmd } = &cli.cmd {
        return state_command(cmd, &state_path);
    }

    let orch = open_orchestrator(&config, &state_path)?.with_cancel(interrupt_token());
    let result = run(&orch, cli.cmd);

    // records must not outlive their containers, whatever happened above
    match orch.sweep() {
        Ok(report) if !report.is_noop() => println!("pruned stale records: {}", report.pruned.join(", ")),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "exit sweep failed"),
    }
    result
}

fn open_orchestrator(config: &Config, state_path: &Path) -> anyhow::Result<LifecycleOrchestrator> {
    let mut store = StateStore::open(state_path, config.limits())?;
    store.set_config_snapshot(config.snapshot());
    Ok(LifecycleOrchestrator::new(
        Arc::new(DockerCli::new(config.runtime.binary.clone())),
        Arc::new(YamlSpecLoader),
        store,
        Arc::new(SystemClock::new()),
        config.engine_settings(),
    ))
}

/// First Ctrl-C cuts readiness waits short, leaving records as already
/// written; a second one exits at once.
fn interrupt_token() -> CancelToken {
    let token = CancelToken::new();
    let on_interrupt = token.clone();
    let installed = ctrlc::set_handler(move || {
        if on_interrupt.is_cancelled() {
            std::process::exit(130);
        }
        eprintln!("interrupted; finishing the current step (Ctrl-C again to exit now)");
        on_interrupt.cancel();
    });
    if let Err(e) = installed {
        warn!(error = %e, "no Ctrl-C handler; readiness waits run to their timeout");
    }
    token
}

fn secs(s: Option<u64>) -> Option<Duration> {
    s.map(Duration::from_secs)
}

fn scope(all: bool) -> TargetScope {
    if all {
        TargetScope::StateManaged
    } else {
        TargetScope::Named
    }
}

fn run(orch: &LifecycleOrchestrator, cmd: Command) -> anyhow::Result<()> {
    let req = match cmd {
        Command::Generate { file, names, flags } => {
            let loaded = load_workloads(&file)?;
            OperationRequest::new(OperationKind::Generate).with_loaded(loaded).with_targets(names).with_flags(
                RequestFlags { force: flags.force, no_start: flags.no_start, timeout_override: secs(flags.timeout), confirmed: false },
            )
        }
        Command::Install { names, flags } => OperationRequest::new(OperationKind::Install).with_targets(names).with_flags(
            RequestFlags { force: flags.force, no_start: flags.no_start, timeout_override: secs(flags.timeout), confirmed: false },
        ),
        Command::Update { file, names, no_start, timeout } => {
            let loaded = load_workloads(&file)?;
            OperationRequest::new(OperationKind::Update)
                .with_loaded(loaded)
                .with_targets(names)
                .with_flags(RequestFlags { no_start, timeout_override: secs(timeout), ..RequestFlags::default() })
        }
        Command::Start { names, all, timeout } => OperationRequest::new(OperationKind::Start)
            .with_targets(names)
            .with_scope(scope(all))
            .with_flags(RequestFlags { timeout_override: secs(timeout), ..RequestFlags::default() }),
        Command::Stop { names, all } => OperationRequest::new(OperationKind::Stop).with_targets(names).with_scope(scope(all)),
        Command::Restart { names, all, timeout } => OperationRequest::new(OperationKind::Restart)
            .with_targets(names)
            .with_scope(scope(all))
            .with_flags(RequestFlags { timeout_override: secs(timeout), ..RequestFlags::default() }),
        Command::Cleanup { names, all_state, all_runtime, yes, force } => {
            let target_scope = if all_runtime {
                TargetScope::FullRuntime
            } else if all_state {
                TargetScope::StateManaged
            } else {
                TargetScope::Named
            };
            let confirmed = yes
                || force
                || target_scope != TargetScope::FullRuntime
                || confirm("Remove EVERY container the runtime knows about, including ones moor did not create?")?;
            if !confirmed {
                bail!("cleanup aborted");
            }
            OperationRequest::new(OperationKind::Cleanup)
                .with_targets(names)
                .with_scope(target_scope)
                .with_flags(RequestFlags { force, confirmed, ..RequestFlags::default() })
        }
        Command::Status { name } => {
            match name {
                Some(n) => print_view(&orch.inspect(&n)),
                None => print_records(orch),
            }
            return Ok(());
        }
        Command::Sweep => {
            let report = orch.sweep()?;
            println!("checked {} record(s), pruned {}, skipped {}", report.checked, report.pruned.len(), report.skipped.len());
            for (name, reason) in &report.skipped {
                println!("  {name}: existence unknown ({reason})");
            }
            return Ok(());
        }
        Command::State { .. } => bail!("state commands do not run against the orchestrator"),
    };

    let batch = orch.execute(&req)?;
    print_batch(&batch);
    batch.into_result()?;
    Ok(())
}

fn print_batch(batch: &BatchResult) {
    for o in &batch.outcomes {
        match &o.result {
            Ok(summary) => println!("{}: {}", o.name, summary),
            Err(reason) => eprintln!("{}: failed: {}", o.name, reason),
        }
    }
    if batch.outcomes.len() > 1 {
        println!("{}", batch.summary());
    }
}

fn print_records(orch: &LifecycleOrchestrator) {
    let records = orch.records();
    if records.is_empty() {
        println!("no tracked containers");
        return;
    }
    for r in records {
        println!("{:<24} {:<28} {:<10} {}", r.name, r.describe(), r.last_operation.as_str(), r.source);
    }
}

fn print_view(view: &StatusView) {
    let yes_no = |v: Option<bool>| match v {
        Some(true) => "yes",
        Some(false) => "no",
        None => "unknown",
    };
    println!("name:     {}", view.name);
    match &view.record {
        Some(r) => {
            println!("recorded: {}", r.describe());
            println!("source:   {}", r.source);
            println!("last op:  {} at {}", r.last_operation, r.last_operation_time);
        }
        None => println!("recorded: not tracked"),
    }
    println!("present:  {}", yes_no(view.present));
    println!("running:  {}", yes_no(view.running));
    if let Some(h) = view.health {
        println!("health:   {h:?}");
    }
    if view.is_drifted() {
        println!("drift:    record claims a container the runtime does not have (run `moor sweep`)");
    }
}

fn state_command(cmd: &StateCommand, state_path: &Path) -> anyhow::Result<()> {
    match cmd {
        StateCommand::Show => {
            let state = StateStore::load(state_path)?;
            println!("{}: {} record(s), last container {}", state_path.display(), state.operations.len(), state.last_container.as_deref().unwrap_or("-"));
        }
        StateCommand::Reset { yes } => {
            if !*yes && !confirm(&format!("Discard every record in {}?", state_path.display()))? {
                bail!("reset aborted");
            }
            StateStore::reset(state_path)?;
            println!("reset {}", state_path.display());
        }
    }
    Ok(())
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush().context("flush stdout")?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer).context("read confirmation")?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
