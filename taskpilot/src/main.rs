//! File-backed task lifecycle CLI.
//!
//! Manages task collections under `.taskpilot/`, imports change proposals
//! into the backlog, and drives the autopilot loop that claims and executes
//! backlog tasks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use taskpilot::autopilot::{AutopilotOptions, AutopilotStop, run_autopilot};
use taskpilot::change::ChangeLifecycle;
use taskpilot::core::checkpoint_policy::progress;
use taskpilot::core::readiness::evaluate_readiness;
use taskpilot::error::{FlowError, classify};
use taskpilot::exit_codes;
use taskpilot::io::checkpoint_store::CheckpointStore;
use taskpilot::io::config::{ProjectConfig, load_config};
use taskpilot::io::context::MarkdownContextGenerator;
use taskpilot::io::executor::{AgentExecutor, build_executor};
use taskpilot::io::init::{InitOptions, ProjectPaths, init_project};
use taskpilot::io::probe::FsProbe;
use taskpilot::io::spec_resolver::FsSpecResolver;
use taskpilot::io::task_store::TaskStore;
use taskpilot::io::templates::Templates;
use taskpilot::io::verify::CommandVerifier;
use taskpilot::logging;
use taskpilot::session::{Session, SessionConfig, SessionStop};
use taskpilot::task::{Collection, Task, TaskStatus};

#[derive(Parser)]
#[command(
    name = "taskpilot",
    version,
    about = "File-backed task lifecycle for agent-driven development"
)]
struct Cli {
    /// Project root containing `.taskpilot/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.taskpilot/` with empty collections and a default config.
    Init {
        /// Rewrite config and ignore files when `.taskpilot/` already exists.
        #[arg(short, long)]
        force: bool,
    },
    /// Create, move and inspect tasks.
    #[command(subcommand)]
    Task(TaskCommand),
    /// Evaluate a task's readiness checks.
    Ready {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Manage change proposals and their tasks.
    #[command(subcommand)]
    Change(ChangeCommand),
    /// Inspect and prune execution checkpoints.
    #[command(subcommand)]
    Checkpoint(CheckpointCommand),
    /// Claim backlog tasks until the backlog is empty or the budget runs out.
    Autopilot {
        /// Report the next candidate without claiming it.
        #[arg(long)]
        dry_run: bool,
        /// Iteration budget; overrides `autopilot.max_iterations`.
        #[arg(long)]
        max_iterations: Option<i64>,
        /// Run an agent session for every claimed task.
        #[arg(long)]
        execute: bool,
        /// Owner recorded on claimed tasks; overrides `autopilot.owner`.
        #[arg(long)]
        owner: Option<String>,
    },
    /// Replay an interrupted move and report invariant violations.
    Recover,
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Append a pending task to the backlog.
    Create {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long = "scope")]
        scope: Vec<String>,
        #[arg(long = "spec")]
        specs: Vec<String>,
        #[arg(long = "input")]
        inputs: Vec<String>,
        #[arg(long = "output")]
        outputs: Vec<String>,
        #[arg(long = "acceptance")]
        acceptance: Vec<String>,
    },
    /// Move a backlog task to in-progress.
    Claim {
        id: String,
        /// Defaults to `autopilot.owner`.
        #[arg(long)]
        owner: Option<String>,
    },
    /// Move an in-progress task to done.
    Complete { id: String },
    /// Move a task between collections.
    Move {
        id: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        /// Defaults to the status matching `--to`.
        #[arg(long)]
        status: Option<String>,
    },
    /// List tasks, optionally from one collection.
    List {
        collection: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Print one task with the collection holding it.
    Show { id: String },
    /// Print task counts per collection.
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ChangeCommand {
    /// Create a draft change with proposal and task list templates.
    Init {
        name: String,
        /// Seed the proposal from an existing document.
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// Import a draft change's task list into the backlog.
    Import { id: String },
    /// Import every draft change that has task entries.
    Sync,
    /// Print linked task counts for a change.
    Progress { id: String },
    /// Mark a change implemented once all its tasks are done.
    Complete { id: String },
    /// Move an implemented change into the archive.
    Archive { id: String },
    /// Create task detail files for a change.
    Scaffold { id: String, titles: Vec<String> },
    /// List registered changes.
    List,
}

#[derive(Subcommand)]
enum CheckpointCommand {
    /// List checkpoints for a task, oldest first.
    List { task_id: String },
    /// Print a checkpoint; defaults to the latest.
    Show {
        task_id: String,
        #[arg(long)]
        iteration: Option<u32>,
    },
    /// Delete one checkpoint, or all of a task's checkpoints.
    Delete {
        task_id: String,
        #[arg(long)]
        iteration: Option<u32>,
    },
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match classify(err) {
        Some(FlowError::Cancelled) => exit_codes::CANCELLED,
        _ => exit_codes::INVALID,
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    logging::init();
    let root = cli.root;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Recover => cmd_recover(&root),
        Command::Task(command) => cmd_task(&open_project(&root)?, command),
        Command::Ready { id, json } => cmd_ready(&open_project(&root)?, &id, json),
        Command::Change(command) => cmd_change(&open_project(&root)?, command),
        Command::Checkpoint(command) => cmd_checkpoint(&open_project(&root)?, command),
        Command::Autopilot {
            dry_run,
            max_iterations,
            execute,
            owner,
        } => {
            let paths = open_project(&root)?;
            let cfg = load_config(&paths.config_path)?;
            let mut options = AutopilotOptions::from_settings(&cfg.autopilot);
            options.dry_run |= dry_run;
            if let Some(max_iterations) = max_iterations {
                options.max_iterations = max_iterations;
            }
            if let Some(owner) = owner {
                options.owner = owner;
            }
            cmd_autopilot(&paths, &cfg, &options, execute)
        }
    }
}

/// Resolve project paths and finish any interrupted move.
fn open_project(root: &Path) -> Result<ProjectPaths> {
    let paths = locate_project(root)?;
    let report = TaskStore::new(&paths).recover()?;
    if let Some(task_id) = &report.replayed {
        info!(%task_id, "recovered interrupted move");
    }
    for violation in &report.violations {
        warn!(%violation, "task store invariant violated");
    }
    Ok(paths)
}

fn locate_project(root: &Path) -> Result<ProjectPaths> {
    let paths = ProjectPaths::new(root);
    if !paths.base_dir().is_dir() {
        return Err(anyhow!(
            "no .taskpilot directory in {} (run `taskpilot init`)",
            root.display()
        ));
    }
    Ok(paths)
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_project(root, &InitOptions { force })?;
    println!("initialized {}", paths.base_dir().display());
    Ok(exit_codes::OK)
}

fn cmd_recover(root: &Path) -> Result<i32> {
    let paths = locate_project(root)?;
    let report = TaskStore::new(&paths).recover()?;
    match &report.replayed {
        Some(task_id) => println!("replayed interrupted move of {task_id}"),
        None => println!("no interrupted move"),
    }
    if report.violations.is_empty() {
        return Ok(exit_codes::OK);
    }
    for violation in &report.violations {
        println!("violation: {violation}");
    }
    Ok(exit_codes::INVALID)
}

fn cmd_task(paths: &ProjectPaths, command: TaskCommand) -> Result<i32> {
    let store = TaskStore::new(paths);
    match command {
        TaskCommand::Create {
            title,
            description,
            scope,
            specs,
            inputs,
            outputs,
            acceptance,
        } => {
            if title.trim().is_empty() {
                return Err(FlowError::Validation("task title must not be empty".into()).into());
            }
            let created = store.create_task(&title)?;
            let task = Task {
                description,
                scope,
                specs,
                inputs,
                outputs,
                acceptance,
                ..created
            };
            store.update(Collection::Backlog, &task)?;
            println!("{}", task.id);
        }
        TaskCommand::Claim { id, owner } => {
            let owner = match owner {
                Some(owner) => owner,
                None => load_config(&paths.config_path)?.autopilot.owner,
            };
            let task = store.claim(&id, &owner)?;
            println!("claimed {} by {}", task.id, task.owner);
        }
        TaskCommand::Complete { id } => {
            let task = store.complete(&id)?;
            println!("completed {}", task.id);
        }
        TaskCommand::Move {
            id,
            from,
            to,
            status,
        } => {
            let from: Collection = from.parse()?;
            let to: Collection = to.parse()?;
            let status: TaskStatus = match status {
                Some(status) => status.parse()?,
                None => to.status(),
            };
            let task = store.move_task(&id, from, to, status)?;
            println!("moved {} from {from} to {to} ({})", task.id, task.status);
        }
        TaskCommand::List { collection, json } => {
            let collections = match collection {
                Some(name) => vec![name.parse::<Collection>()?],
                None => Collection::ALL.to_vec(),
            };
            let mut listed = Vec::new();
            for collection in collections {
                for task in store.load(collection)? {
                    listed.push(ListedTask { collection, task });
                }
            }
            if json {
                print_json(&listed)?;
            } else {
                for entry in &listed {
                    println!(
                        "{}\t{}\t{}\t{}",
                        entry.collection, entry.task.id, entry.task.status, entry.task.title
                    );
                }
            }
        }
        TaskCommand::Show { id } => {
            let (task, collection) = store
                .find(&id)?
                .ok_or_else(|| FlowError::not_found(format!("task {id}"), "any collection"))?;
            print_json(&ListedTask { collection, task })?;
        }
        TaskCommand::Status { json } => {
            let summary = store.summary()?;
            if json {
                print_json(&summary)?;
            } else {
                println!("backlog:     {}", summary.backlog);
                println!("in-progress: {}", summary.in_progress);
                println!("done:        {}", summary.done);
            }
        }
    }
    Ok(exit_codes::OK)
}

#[derive(Serialize)]
struct ListedTask {
    collection: Collection,
    #[serde(flatten)]
    task: Task,
}

fn cmd_ready(paths: &ProjectPaths, id: &str, json: bool) -> Result<i32> {
    let cfg = load_config(&paths.config_path)?;
    let (task, _) = TaskStore::new(paths)
        .find(id)?
        .ok_or_else(|| FlowError::not_found(format!("task {id}"), "any collection"))?;
    let resolver = FsSpecResolver::new(&paths.root, &cfg.specs.search_paths);
    let probe = FsProbe::new(&paths.root, &resolver);
    let result = evaluate_readiness(&task, &probe);

    if json {
        print_json(&result)?;
    } else {
        for check in &result.checks {
            let mark = if check.passed { "ok" } else { "fail" };
            println!("[{mark}] {:?} {}: {}", check.kind, check.name, check.message);
        }
        println!("{}: {}", task.id, if result.ready { "ready" } else { "not ready" });
    }
    Ok(if result.ready {
        exit_codes::OK
    } else {
        exit_codes::INVALID
    })
}

fn cmd_change(paths: &ProjectPaths, command: ChangeCommand) -> Result<i32> {
    let lifecycle = ChangeLifecycle::new(paths)?;
    match command {
        ChangeCommand::Init { name, source } => {
            let change = lifecycle.init(&name, source.as_deref())?;
            println!("{}", change.id);
            println!("{}", lifecycle.dir_of(&change).display());
        }
        ChangeCommand::Import { id } => {
            let report = lifecycle.import(&id)?;
            for warning in &report.warnings {
                eprintln!("warning: {warning}");
            }
            println!("imported {} task(s) from {}", report.task_ids.len(), report.change_id);
            for task_id in &report.task_ids {
                println!("  {task_id}");
            }
        }
        ChangeCommand::Sync => {
            let report = lifecycle.sync()?;
            for imported in &report.imported {
                println!(
                    "imported {} task(s) from {}",
                    imported.task_ids.len(),
                    imported.change_id
                );
            }
            for failure in &report.failures {
                eprintln!("failed: {failure}");
            }
            println!(
                "{} change(s), {} task(s) created, {} skipped",
                report.imported.len(),
                report.tasks_created(),
                report.skipped.len()
            );
            if !report.failures.is_empty() {
                return Ok(exit_codes::INVALID);
            }
        }
        ChangeCommand::Progress { id } => {
            let progress = lifecycle.progress(&id)?;
            println!(
                "{} [{}] {}/{} done ({:.0}%), {} in progress, {} pending",
                progress.change_id,
                progress.phase(),
                progress.done,
                progress.linked,
                progress.percent_done(),
                progress.in_progress,
                progress.pending
            );
        }
        ChangeCommand::Complete { id } => {
            let change = lifecycle.complete(&id)?;
            println!("{} is {}", change.id, change.status);
        }
        ChangeCommand::Archive { id } => {
            let change = lifecycle.archive(&id)?;
            println!("archived {} to {}", change.id, lifecycle.dir_of(&change).display());
        }
        ChangeCommand::Scaffold { id, titles } => {
            for path in lifecycle.scaffold_task_files(&id, &titles)? {
                println!("{}", path.display());
            }
        }
        ChangeCommand::List => {
            for change in lifecycle.list()? {
                println!("{}\t{}\t{}", change.id, change.status, change.name);
            }
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_checkpoint(paths: &ProjectPaths, command: CheckpointCommand) -> Result<i32> {
    let store = CheckpointStore::new(&paths.checkpoints_dir);
    match command {
        CheckpointCommand::List { task_id } => {
            for checkpoint in store.list(&task_id)? {
                let criteria = checkpoint.criteria_met.len() + checkpoint.criteria_remaining.len();
                println!(
                    "{}\t{}\t{} tokens\t{:.0}%\t{}",
                    checkpoint.iteration,
                    checkpoint.created_at.to_rfc3339(),
                    checkpoint.tokens_used,
                    progress(&checkpoint, criteria),
                    checkpoint.agent
                );
            }
        }
        CheckpointCommand::Show { task_id, iteration } => {
            let checkpoint = match iteration {
                Some(iteration) => store.load_iteration(&task_id, iteration)?,
                None => store.load(&task_id)?,
            }
            .ok_or_else(|| {
                FlowError::not_found(
                    format!("checkpoint for {task_id}"),
                    paths.relative(&paths.checkpoints_dir),
                )
            })?;
            print_json(&checkpoint)?;
        }
        CheckpointCommand::Delete { task_id, iteration } => match iteration {
            Some(iteration) => {
                if !store.delete(&task_id, iteration)? {
                    return Err(FlowError::not_found(
                        format!("checkpoint {task_id}@{iteration}"),
                        paths.relative(&paths.checkpoints_dir),
                    )
                    .into());
                }
                println!("deleted {task_id}@{iteration}");
            }
            None => {
                let removed = store.delete_all(&task_id)?;
                println!("deleted {removed} checkpoint(s) for {task_id}");
            }
        },
    }
    Ok(exit_codes::OK)
}

fn cmd_autopilot(
    paths: &ProjectPaths,
    cfg: &ProjectConfig,
    options: &AutopilotOptions,
    execute: bool,
) -> Result<i32> {
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&cancel);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
        .context("install Ctrl-C handler")?;
    }

    let store = TaskStore::new(paths);
    let resolver = FsSpecResolver::new(&paths.root, &cfg.specs.search_paths);
    let probe = FsProbe::new(&paths.root, &resolver);
    let contexts = MarkdownContextGenerator::new(&paths.root, &paths.context_dir)?;

    let executor: Option<Box<dyn AgentExecutor>> = if execute && !options.dry_run {
        Some(build_executor(&cfg.agent, &paths.root, &paths.sessions_dir)?)
    } else {
        None
    };
    let checkpoints = CheckpointStore::new(&paths.checkpoints_dir);
    let verifier = CommandVerifier::new(&cfg.verify, &paths.root, &paths.sessions_dir);
    let templates = Templates::new()?;
    let session = executor.as_deref().map(|executor| Session {
        store: &store,
        checkpoints: &checkpoints,
        executor,
        verifier: &verifier,
        templates: &templates,
        sessions_dir: paths.sessions_dir.clone(),
        config: SessionConfig::from_config(cfg),
    });

    let outcome = run_autopilot(&store, &probe, &contexts, options, &cancel, |ready| {
        println!("claimed {} {}", ready.task.id, ready.task.title);
        if let Some(session) = &session {
            let result = session.run(&ready.task, &cancel)?;
            match result.stop {
                SessionStop::Completed => println!(
                    "  done after {} iteration(s), {} tokens",
                    result.iterations, result.tokens_used
                ),
                SessionStop::Exhausted => println!(
                    "  still in progress after {} iteration(s), {} tokens",
                    result.iterations, result.tokens_used
                ),
            }
        }
        Ok(())
    })?;

    match outcome.stop {
        AutopilotStop::Complete => {
            println!(
                "backlog complete: {} task(s) claimed in {} iteration(s)",
                outcome.claimed.len(),
                outcome.iterations
            );
            Ok(exit_codes::OK)
        }
        AutopilotStop::DryRun { task_id, ready } => {
            let state = if ready { "ready" } else { "not ready" };
            println!("next: {task_id} ({state})");
            Ok(exit_codes::OK)
        }
        AutopilotStop::MaxIterations { max_iterations } => {
            println!(
                "stopped after {max_iterations} iteration(s); {} task(s) claimed, backlog not empty",
                outcome.claimed.len()
            );
            Ok(exit_codes::MAX_ITERATIONS)
        }
    }
}

/// Print `value` as pretty JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
