//! aish: shell commands moderated by a layered safety pipeline

mod classifier;
mod compliance;
mod config;
mod denylist;
mod executor;
mod generator;
mod monitor;
mod pipeline;
mod predictive;
mod process_group;
mod risk;
mod rollback;
mod safety;
mod shell;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use classifier::is_read_only_command;
use config::{Config, SafetyOverrides};
use denylist::{DenylistStore, validate_document};
use executor::{CommandExecutor, ExecutionStatus};
use generator::{GenerationMode, StaticGenerator};
use pipeline::{CommandRun, ModeratedRunner, RunOutcome};
use risk::{RiskLevel, SafetyVerdict};
use rollback::RollbackManager;
use safety::SafetyEvaluator;

#[derive(Parser)]
#[command(name = "aish", version, about = "Run shell commands through a layered safety pipeline")]
struct Cli {
    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Path to an alternative config.toml
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a command without running it
    Check {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },

    /// Evaluate, back up, execute and roll back on failure
    Run {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        /// Validate only, do not execute
        #[arg(long)]
        dry_run: bool,

        /// Evaluate and run each `&&` / `;` / `|` fragment separately
        #[arg(long, short = 's')]
        split_multi: bool,

        /// Enable SOX / HIPAA compliance checks
        #[arg(long)]
        compliance_mode: bool,

        #[arg(long)]
        allow_sudo: bool,

        #[arg(long)]
        allow_destructive: bool,

        /// Block network commands
        #[arg(long)]
        no_network: bool,

        /// Timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Run without asking for confirmation
        #[arg(long, short = 'y')]
        no_confirm: bool,

        /// Stream output to the terminal instead of capturing it
        #[arg(long)]
        no_capture: bool,

        /// Working directory for the command
        #[arg(long, short = 'C', value_name = "DIR")]
        cwd: Option<PathBuf>,

        /// Extra environment variable, repeatable
        #[arg(long = "env", short = 'e', value_name = "KEY=VALUE", value_parser = parse_env)]
        env: Vec<(String, String)>,

        /// Text piped into the command's stdin
        #[arg(long, value_name = "TEXT")]
        input: Option<String>,
    },

    /// Show how a compound command is split
    Split {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Print a compliance report as JSON
    Compliance {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        #[arg(long, default_value = "unknown_user")]
        user: String,
    },

    /// Manage the denylist
    #[command(subcommand)]
    Denylist(DenylistCommand),

    /// Show disk and memory status
    Resources,
}

#[derive(Subcommand)]
enum DenylistCommand {
    /// Add a pattern to a tier (`re:` prefix for a regex)
    Add { level: RiskLevel, pattern: String },
    /// Print the active table
    View,
    /// Check the denylist document structure
    Validate,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load_with_path(Some(path)),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    match cli.command {
        Commands::Check { command, json } => check(&config, &command.join(" "), json),
        Commands::Run {
            command,
            dry_run,
            split_multi,
            compliance_mode,
            allow_sudo,
            allow_destructive,
            no_network,
            timeout,
            no_confirm,
            no_capture,
            cwd,
            env,
            input,
        } => {
            let overrides = SafetyOverrides {
                allow_sudo: allow_sudo.then_some(true),
                allow_destructive: allow_destructive.then_some(true),
                allow_network: no_network.then_some(false),
                compliance_mode: compliance_mode.then_some(true),
                ..SafetyOverrides::default()
            };
            let mut config = config;
            config.safety = config.safety.with_overrides(&overrides);
            if let Some(secs) = timeout {
                config.execution.timeout_secs = secs;
            }
            let options = RunOptions {
                dry_run,
                split_multi,
                confirm: !no_confirm,
                capture: !no_capture,
                cwd,
                env,
                input,
            };
            run(config, command.join(" "), options).await
        }
        Commands::Split { command } => split(&config, &command.join(" ")),
        Commands::Compliance { command, user } => compliance(&config, &command.join(" "), &user),
        Commands::Denylist(cmd) => denylist(&config, cmd),
        Commands::Resources => Ok(resources()),
    }
}

fn evaluator(config: &Config) -> Result<SafetyEvaluator> {
    let path = config.denylist_path();
    let store = DenylistStore::open(&path)
        .with_context(|| format!("Failed to load denylist from {}", path.display()))?;
    Ok(SafetyEvaluator::new(config.safety.clone(), Arc::new(store)))
}

fn print_verdict(verdict: &SafetyVerdict) {
    let status = if verdict.is_safe { "SAFE" } else { "UNSAFE" };
    println!("{status} [{}] {}", verdict.risk_level, verdict.reason);
    if !verdict.is_safe {
        println!("  {}", verdict.risk_level.explanation());
    }
    if !verdict.blocked_patterns.is_empty() {
        println!("  Blocked patterns: {}", verdict.blocked_patterns.join(", "));
    }
    for suggestion in &verdict.suggestions {
        println!("  Suggestion: {suggestion}");
    }
}

fn check(config: &Config, command: &str, json: bool) -> Result<ExitCode> {
    let evaluator = evaluator(config)?;
    let snapshot = monitor::snapshot();
    let verdict = evaluator.evaluate_with_context(command, Some(&snapshot));

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        print_verdict(&verdict);
        if is_read_only_command(command) {
            println!("  Read-only command");
        }
        if !evaluator.compliance().is_compliant(command) {
            println!("  Violates compliance rules, see `aish compliance`");
        }
        let executor = CommandExecutor::new(&config.execution);
        if let Some(info) = executor.command_info(command) {
            match info.path {
                Some(path) => println!("  Program: {}", path.display()),
                None => println!("  Program '{}' not found on PATH", info.program),
            }
        }
    }

    Ok(if verdict.is_safe {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

struct RunOptions {
    dry_run: bool,
    split_multi: bool,
    confirm: bool,
    capture: bool,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    input: Option<String>,
}

fn parse_env(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

/// Prompt on the terminal; anything but `y` / `yes` declines
fn confirm(command: &str, verdict: &SafetyVerdict) -> bool {
    println!("{command}");
    print_verdict(verdict);
    if !verdict.is_safe {
        println!("Warning: proceed with caution.");
    }
    print!("Proceed? [y/N] ");
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match std::io::stdin().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

async fn run(config: Config, command: String, options: RunOptions) -> Result<ExitCode> {
    let evaluator = evaluator(&config)?;
    let executor = CommandExecutor::new(&config.execution);
    let backup_dir = config.backup_dir();
    let rollback = RollbackManager::new(&backup_dir)
        .with_context(|| format!("Failed to prepare backup directory {}", backup_dir.display()))?;

    let snapshot = monitor::snapshot();
    for warning in snapshot.warnings() {
        tracing::warn!("{warning}");
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mut runner = ModeratedRunner::new(evaluator, executor, rollback)
        .dry_run(options.dry_run)
        .capture_output(options.capture)
        .with_input(options.input)
        .with_context(Some(snapshot))
        .with_cancellation(cancel.clone());
    if let Some(cwd) = options.cwd {
        runner = runner.with_cwd(cwd);
    }
    for (key, value) in options.env {
        runner = runner.with_env(key, value);
    }
    if options.confirm {
        runner = runner.with_confirmation(confirm);
    }

    // Commands typed on the CLI stand in for generator output
    let generator = StaticGenerator::new([command.clone()]);
    let runs = runner
        .run_query(&generator, &command, GenerationMode::Default, options.split_multi)
        .await?;
    let total = runs.len();
    for (idx, run) in runs.iter().enumerate() {
        report(idx + 1, total, run);
    }

    if cancel.is_cancelled() {
        return Ok(ExitCode::from(130));
    }
    Ok(if runs.iter().all(CommandRun::succeeded) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn report(idx: usize, total: usize, run: &CommandRun) {
    println!("[{idx}/{total}] {}", run.command);
    print_verdict(&run.verdict);

    match &run.outcome {
        RunOutcome::Blocked => {
            println!("Command blocked due to {} risk.", run.verdict.risk_level);
        }
        RunOutcome::Skipped => println!("Command skipped by user."),
        RunOutcome::DryRun(result) => match &result.error_message {
            Some(message) => println!("Dry run failed: {message}"),
            None => println!("Dry run - command not executed."),
        },
        RunOutcome::Executed { result, restored } => {
            if !result.stdout.is_empty() {
                print!("{}", result.stdout);
                if !result.stdout.ends_with('\n') {
                    println!();
                }
            }
            if !result.stderr.is_empty() {
                eprint!("{}", result.stderr);
                if !result.stderr.ends_with('\n') {
                    eprintln!();
                }
            }
            let label = match result.status {
                ExecutionStatus::Success => "succeeded",
                ExecutionStatus::Failed => "failed",
                ExecutionStatus::Timeout => "timed out",
                ExecutionStatus::Interrupted => "was interrupted",
                ExecutionStatus::Error => "could not run",
            };
            println!(
                "Command {label} (exit code {}, {:.2}s)",
                result.exit_code,
                result.execution_time.as_secs_f64()
            );
            if let Some(usage) = result.resource_usage {
                println!(
                    "Peak memory {:.1} MB, peak CPU {:.1}%",
                    usage.peak_memory_mb, usage.peak_cpu_percent
                );
            }
            if result.truncated {
                println!("Output was truncated.");
            }
            for path in restored {
                println!("Restored {}", path.display());
            }
        }
    }
}

fn split(config: &Config, command: &str) -> Result<ExitCode> {
    let evaluator = evaluator(config)?;
    if let Err(e) = evaluator.validate_command_syntax(command) {
        println!("{e}");
        return Ok(ExitCode::FAILURE);
    }
    for (idx, fragment) in evaluator.split(command).iter().enumerate() {
        let verdict = evaluator.evaluate(fragment);
        let status = if verdict.is_safe { "safe" } else { "unsafe" };
        println!("{}. {fragment}  [{status}, {}]", idx + 1, verdict.risk_level);
    }
    Ok(ExitCode::SUCCESS)
}

fn compliance(config: &Config, command: &str, user: &str) -> Result<ExitCode> {
    let evaluator = evaluator(config)?;
    let report = evaluator.compliance().generate_compliance_report(command, user);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if report.compliant {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn denylist(config: &Config, cmd: DenylistCommand) -> Result<ExitCode> {
    let path = config.denylist_path();

    match cmd {
        DenylistCommand::Add { level, pattern } => {
            let store = DenylistStore::open(&path)
                .with_context(|| format!("Failed to load denylist from {}", path.display()))?;
            if store.add_pattern(level, &pattern).context("Failed to add pattern")? {
                println!("Added '{pattern}' to {level} in {}", path.display());
            } else {
                println!("'{pattern}' is already in {level}");
            }
        }
        DenylistCommand::View => {
            let store = DenylistStore::open(&path)
                .with_context(|| format!("Failed to load denylist from {}", path.display()))?;
            let denylist = store.snapshot();
            match store.path() {
                Some(source) if source.exists() => println!("# {}", source.display()),
                _ => println!("# built-in table"),
            }
            for level in RiskLevel::DESCENDING {
                println!("{level}:");
                for pattern in denylist.table().patterns(level) {
                    println!("  {pattern}");
                }
            }
        }
        DenylistCommand::Validate => {
            if !path.exists() {
                println!("No denylist at {}; the built-in table is used", path.display());
                return Ok(ExitCode::SUCCESS);
            }
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let errors = validate_document(&content).context("Denylist is not valid JSON")?;
            if errors.is_empty() {
                println!("Denylist is valid");
            } else {
                for error in &errors {
                    println!("{error}");
                }
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn resources() -> ExitCode {
    let snapshot = monitor::snapshot();
    for status in [&snapshot.disk_status, &snapshot.memory_status].into_iter().flatten() {
        let marker = if status.ok { "ok" } else { "WARN" };
        println!("[{marker}] {}", status.message);
        if let Some(warning) = &status.warning {
            println!("       {warning}");
        }
    }
    if snapshot.disk_pressure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
