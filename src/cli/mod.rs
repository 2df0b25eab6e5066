#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{ArgAction, CommandFactory as _, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::config::{self, Config, Settings};
use crate::core::fs::write_atomic;
use crate::core::git::is_git_repo;
use crate::core::worktree::clean_worktrees;
use crate::error::NightshiftError;
use crate::output::table::Table;
use crate::task::ensure_dirs;
use crate::task::history::read_history;
use crate::task::model::{DEFAULT_BASE, Engine, Task};
use crate::task::parser::parse_tasks;
use crate::task::runner::{self, RunOptions};
use crate::task::state::{clear_tasks, read_state, remove_tasks};
use crate::task::template::{QuickTask, TASKS_FILE_HEADER, TASKS_TEMPLATE, render_quick_task};

const LOG_ENV: &str = "NIGHTSHIFT_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "nightshift",
    version,
    about = "Overnight batch runner for coding-agent tasks in git worktrees"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub cmd: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the state directory and a task file template
    Init(InitArgs),
    /// List tasks from the task file with their recorded status
    List(ListArgs),
    /// Run pending tasks
    Run(RunArgs),
    /// Show the state store
    Status(StatusArgs),
    /// Remove stale worktree registrations from task repositories
    Clean,
    /// Append a task to the task file
    Quick(QuickArgs),
    /// Show recent task attempts
    History(HistoryArgs),
    /// Forget recorded state so tasks run again
    Reset(ResetArgs),
    /// Print resolved paths and settings
    Config,
    Completion(CompletionArgs),
    Version,
}

#[derive(Debug, Parser)]
pub struct InitArgs {
    /// Overwrite an existing task file
    #[arg(short = 'f', long = "force")]
    pub force: bool,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Output in JSON format
    #[arg(long = "json")]
    pub json: bool,
}

#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Mark tasks todo and report what would run, without touching repos
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,
    /// Skip the engine and commit/push; only run verify commands
    #[arg(long = "verify-only")]
    pub verify_only: bool,
    /// Fail tasks that declare no verify commands
    #[arg(long = "require-verify")]
    pub require_verify: bool,
    /// Comma-separated task ids to run
    #[arg(long = "only", value_delimiter = ',')]
    pub only: Vec<String>,
    /// Attempt at most N tasks (0 = no limit)
    #[arg(long = "limit", default_value_t = 0)]
    pub limit: usize,
    /// Remove a leftover run lock before starting
    #[arg(long = "force-unlock")]
    pub force_unlock: bool,
}

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output in JSON format
    #[arg(long = "json", conflicts_with = "csv")]
    pub json: bool,
    /// Output in CSV format
    #[arg(long = "csv")]
    pub csv: bool,
}

#[derive(Debug, Parser)]
pub struct QuickArgs {
    /// Repository name under the project root
    #[arg(long = "repo")]
    pub repo: String,
    /// Task prompt; the task id is derived from its first words
    #[arg(long = "prompt")]
    pub prompt: String,
    /// Verify command
    #[arg(long = "verify")]
    pub verify: Option<String>,
    /// Engine (codex or none)
    #[arg(long = "engine", default_value = "codex")]
    pub engine: Engine,
    /// Base branch
    #[arg(long = "base", default_value = DEFAULT_BASE)]
    pub base: String,
}

#[derive(Debug, Parser)]
pub struct HistoryArgs {
    /// Number of entries to show (0 = all)
    #[arg(short = 'n', long = "limit", default_value_t = 20)]
    pub limit: usize,
    /// Output in JSON format
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct ResetArgs {
    /// Task ids to reset
    pub ids: Vec<String>,
    /// Reset every task
    #[arg(long = "all", conflicts_with = "ids")]
    pub all: bool,
}

#[derive(Debug, Parser)]
pub struct CompletionArgs {
    pub shell: clap_complete::Shell,
}

pub async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            if let Some(NightshiftError::NoTasks(_)) = err.downcast_ref::<NightshiftError>() {
                println!("{err}");
                return ExitCode::SUCCESS;
            }
            eprintln!("{err:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let Some(cmd) = cli.cmd else {
        Cli::command().print_help()?;
        println!();
        return Ok(ExitCode::SUCCESS);
    };

    let cfg = Config::from_env();
    match cmd {
        Commands::Init(args) => cmd_init(&cfg, &args),
        Commands::List(args) => cmd_list(&cfg, &args),
        Commands::Run(args) => cmd_run(&cfg, args).await,
        Commands::Status(args) => cmd_status(&cfg, &args),
        Commands::Clean => cmd_clean(&cfg),
        Commands::Quick(args) => cmd_quick(&cfg, &args),
        Commands::History(args) => cmd_history(&cfg, &args),
        Commands::Reset(args) => cmd_reset(&cfg, &args),
        Commands::Config => {
            let settings = Settings::load(&cfg.settings_file())?;
            print!("{}", config::render_resolved(&cfg, &settings)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completion(args) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "nightshift", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Version => Ok(cmd_version()),
    }
}

fn load_tasks(cfg: &Config) -> anyhow::Result<Vec<Task>> {
    if !cfg.tasks_file.exists() {
        return Err(NightshiftError::TasksFileNotFound(cfg.tasks_file.clone()).into());
    }
    let content = std::fs::read_to_string(&cfg.tasks_file)
        .with_context(|| format!("failed to read {}", cfg.tasks_file.display()))?;
    Ok(parse_tasks(&content))
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let mut s = serde_json::to_string_pretty(value)?;
    s.push('\n');
    print!("{s}");
    Ok(())
}

fn cmd_init(cfg: &Config, args: &InitArgs) -> anyhow::Result<ExitCode> {
    ensure_dirs(cfg)?;
    if cfg.tasks_file.exists() && !args.force {
        anyhow::bail!(
            "tasks file already exists: {} (use --force to overwrite)",
            cfg.tasks_file.display()
        );
    }
    write_atomic(&cfg.tasks_file, TASKS_TEMPLATE.as_bytes())?;
    println!("Created {}", cfg.tasks_file.display());
    println!("State dir: {}", cfg.state_dir.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_list(cfg: &Config, args: &ListArgs) -> anyhow::Result<ExitCode> {
    #[derive(Serialize)]
    struct Item<'a> {
        id: &'a str,
        status: &'a str,
        engine: &'a str,
        repo: &'a str,
        base: &'a str,
        branch: &'a str,
        verify: &'a [String],
    }

    let tasks = load_tasks(cfg)?;
    if tasks.is_empty() {
        return Err(NightshiftError::NoTasks(cfg.tasks_file.clone()).into());
    }
    let state = read_state(&cfg.state_file)?;
    let items: Vec<Item<'_>> = tasks
        .iter()
        .map(|t| Item {
            id: &t.id,
            status: state
                .tasks
                .get(&t.id)
                .and_then(|s| s.status.as_deref())
                .unwrap_or("pending"),
            engine: &t.engine,
            repo: t.location(),
            base: &t.base,
            branch: &t.branch,
            verify: &t.verify,
        })
        .collect();

    if args.json {
        print_json(&items)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut t = Table::new(["ID", "STATUS", "ENGINE", "REPO", "BRANCH"]);
    for item in &items {
        t.row([item.id, item.status, item.engine, or_dash(item.repo), item.branch]);
    }
    t.print()?;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_run(cfg: &Config, args: RunArgs) -> anyhow::Result<ExitCode> {
    let settings = Settings::load(&cfg.settings_file())?;
    let opts = RunOptions {
        dry_run: args.dry_run,
        verify_only: args.verify_only,
        require_verify: args.require_verify,
        only: args.only,
        limit: args.limit,
        force_unlock: args.force_unlock,
    };
    let report = runner::run(cfg, &settings, &opts).await?;
    println!("{}", runner::summary_text(cfg, &report));
    Ok(ExitCode::SUCCESS)
}

fn cmd_status(cfg: &Config, args: &StatusArgs) -> anyhow::Result<ExitCode> {
    ensure_dirs(cfg)?;
    let state = read_state(&cfg.state_file)?;

    if args.json {
        print_json(&state)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut t = Table::new(["ID", "STATUS", "BRANCH", "WORKTREE", "LAST RUN", "ERROR"]);
    for (id, st) in &state.tasks {
        t.row([
            id.as_str(),
            st.status.as_deref().unwrap_or("-"),
            st.branch.as_deref().unwrap_or("-"),
            st.worktree.as_deref().unwrap_or("-"),
            st.last_run_at.as_deref().unwrap_or("-"),
            st.last_error.as_deref().map_or("-", or_dash),
        ]);
    }

    if args.csv {
        t.print_csv()?;
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(lock) = runner::read_run_lock(cfg) {
        println!("Run in progress (pid {}, started {})", lock.pid, lock.started_at);
    }
    if t.is_empty() {
        println!("No task state recorded yet.");
    } else {
        t.print()?;
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_clean(cfg: &Config) -> anyhow::Result<ExitCode> {
    let tasks = load_tasks(cfg)?;
    let repos: BTreeSet<PathBuf> = tasks
        .iter()
        .map(|t| runner::resolve_repo(cfg, t).0)
        .filter(|dir| is_git_repo(dir))
        .collect();

    let cleaned: usize = repos.iter().map(|dir| clean_worktrees(dir)).sum();
    println!("Cleaned {cleaned} stale worktree(s).");
    Ok(ExitCode::SUCCESS)
}

fn cmd_quick(cfg: &Config, args: &QuickArgs) -> anyhow::Result<ExitCode> {
    ensure_dirs(cfg)?;
    let quick = render_quick_task(&QuickTask {
        repo: &args.repo,
        prompt: &args.prompt,
        verify: args.verify.as_deref(),
        engine: args.engine,
        base: &args.base,
    })?;

    let mut content = if cfg.tasks_file.exists() {
        std::fs::read_to_string(&cfg.tasks_file)
            .with_context(|| format!("failed to read {}", cfg.tasks_file.display()))?
    } else {
        TASKS_FILE_HEADER.to_owned()
    };
    if parse_tasks(&content).iter().any(|t| t.id == quick.task_id) {
        anyhow::bail!(
            "task already exists: {} (in {})",
            quick.task_id,
            cfg.tasks_file.display()
        );
    }

    if !content.is_empty() && !content.ends_with("\n\n") {
        content.push_str(if content.ends_with('\n') { "\n" } else { "\n\n" });
    }
    content.push_str(&quick.block);
    write_atomic(&cfg.tasks_file, content.as_bytes())?;

    println!("Added task {} (branch {})", quick.task_id, quick.branch);
    println!("Tasks file: {}", cfg.tasks_file.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_history(cfg: &Config, args: &HistoryArgs) -> anyhow::Result<ExitCode> {
    let entries = read_history(&cfg.history_file)?;
    let skip = match args.limit {
        0 => 0,
        n => entries.len().saturating_sub(n),
    };
    let recent = &entries[skip..];

    if args.json {
        print_json(&recent)?;
        return Ok(ExitCode::SUCCESS);
    }
    if recent.is_empty() {
        println!("No history recorded yet.");
        return Ok(ExitCode::SUCCESS);
    }

    let mut t = Table::new(["ENDED", "TASK", "STATUS", "VERIFY", "BRANCH", "ERROR"]);
    for e in recent {
        t.row([
            or_dash(&e.ended_at),
            e.task_id.as_str(),
            e.status.as_str(),
            or_dash(&e.verify),
            or_dash(&e.branch),
            or_dash(&e.error),
        ]);
    }
    t.print()?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_reset(cfg: &Config, args: &ResetArgs) -> anyhow::Result<ExitCode> {
    let removed = if args.all {
        clear_tasks(&cfg.state_file)?
    } else if args.ids.is_empty() {
        anyhow::bail!("specify task ids to reset, or --all");
    } else {
        remove_tasks(&cfg.state_file, &args.ids)?
    };
    println!("Reset {removed} task(s).");
    Ok(ExitCode::SUCCESS)
}

fn cmd_version() -> ExitCode {
    println!("nightshift version {}", env!("CARGO_PKG_VERSION"));
    println!("  rust: {}", rustc_version_runtime::version());
    println!(
        "  os/arch: {}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    ExitCode::SUCCESS
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() { "-" } else { s }
}
