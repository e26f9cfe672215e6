//! Moderated execution loop
//!
//! classify → block, confirm or proceed → back up touched files → execute →
//! roll back on failure, clear backups on success.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::executor::{CommandExecutor, ExecutionResult};
use crate::generator::{CommandGenerator, GenerationMode, GeneratorError};
use crate::monitor::EnvironmentSnapshot;
use crate::risk::{RiskLevel, SafetyVerdict};
use crate::rollback::{RollbackManager, backup_candidates};
use crate::safety::SafetyEvaluator;

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Refused by the blocking policy, nothing ran
    Blocked,
    /// Declined at the confirmation prompt, nothing ran
    Skipped,
    /// Syntax-checked only
    DryRun(ExecutionResult),
    Executed {
        result: ExecutionResult,
        /// Files put back after a failed run
        restored: Vec<PathBuf>,
    },
}

/// One command taken through the loop
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRun {
    pub command: String,
    pub verdict: SafetyVerdict,
    pub outcome: RunOutcome,
}

impl CommandRun {
    pub fn succeeded(&self) -> bool {
        match &self.outcome {
            RunOutcome::Blocked | RunOutcome::Skipped => false,
            RunOutcome::DryRun(result) | RunOutcome::Executed { result, .. } => result.success,
        }
    }
}

/// Asked before a command that passed the blocking policy is executed
pub type ConfirmFn = Box<dyn Fn(&str, &SafetyVerdict) -> bool + Send + Sync>;

pub struct ModeratedRunner {
    evaluator: SafetyEvaluator,
    executor: CommandExecutor,
    rollback: RollbackManager,
    cwd: PathBuf,
    dry_run: bool,
    capture_output: bool,
    env: BTreeMap<String, String>,
    input: Option<String>,
    confirm: Option<ConfirmFn>,
    context: Option<EnvironmentSnapshot>,
    cancel: CancellationToken,
}

impl ModeratedRunner {
    pub fn new(
        evaluator: SafetyEvaluator,
        executor: CommandExecutor,
        rollback: RollbackManager,
    ) -> Self {
        Self {
            evaluator,
            executor,
            rollback,
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            dry_run: false,
            capture_output: true,
            env: BTreeMap::new(),
            input: None,
            confirm: None,
            context: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Let the command write straight to the terminal instead of capturing
    pub fn capture_output(mut self, capture_output: bool) -> Self {
        self.capture_output = capture_output;
        self
    }

    /// Extra environment for every executed command
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Text piped into each executed command's stdin
    pub fn with_input(mut self, input: Option<String>) -> Self {
        self.input = input;
        self
    }

    /// Without a callback every permitted command runs unprompted
    pub fn with_confirmation<F>(mut self, confirm: F) -> Self
    where
        F: Fn(&str, &SafetyVerdict) -> bool + Send + Sync + 'static,
    {
        self.confirm = Some(Box::new(confirm));
        self
    }

    /// Host snapshot handed to the predictive stage
    pub fn with_context(mut self, context: Option<EnvironmentSnapshot>) -> Self {
        self.context = context;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Whether the configured policy refuses to run this verdict
    pub fn is_blocked(&self, verdict: &SafetyVerdict) -> bool {
        let config = self.evaluator.config();
        !verdict.is_safe
            && match verdict.risk_level {
                RiskLevel::Critical => config.block_critical,
                RiskLevel::High => config.block_high_risk,
                RiskLevel::Medium | RiskLevel::Low => false,
            }
    }

    pub async fn run(&mut self, command: &str) -> CommandRun {
        let verdict = self.evaluator.evaluate_with_context(command, self.context.as_ref());

        if self.is_blocked(&verdict) {
            tracing::warn!(command, level = %verdict.risk_level, reason = %verdict.reason, "command blocked");
            return CommandRun {
                command: command.to_string(),
                verdict,
                outcome: RunOutcome::Blocked,
            };
        }
        if !verdict.is_safe {
            tracing::warn!(command, level = %verdict.risk_level, reason = %verdict.reason, "proceeding with unsafe command");
        }

        if self.dry_run {
            let result = self.executor.execute_dry_run(command);
            return CommandRun {
                command: command.to_string(),
                verdict,
                outcome: RunOutcome::DryRun(result),
            };
        }

        if let Some(confirm) = &self.confirm {
            if !confirm(command, &verdict) {
                tracing::info!(command, "command skipped at confirmation");
                return CommandRun {
                    command: command.to_string(),
                    verdict,
                    outcome: RunOutcome::Skipped,
                };
            }
        }

        let backed_up = self.rollback.backup_files(backup_candidates(command, &self.cwd));
        if !backed_up.is_empty() {
            tracing::info!(count = backed_up.len(), "created backups before execution");
        }

        let mut request = self
            .executor
            .request(command)
            .in_dir(&self.cwd)
            .capture(self.capture_output);
        for (key, value) in &self.env {
            request = request.with_env(key.as_str(), value.as_str());
        }
        let result = match &self.input {
            Some(input) => self.executor.execute_with_input(&request, input, &self.cancel).await,
            None => self.executor.execute(&request, &self.cancel).await,
        };

        let restored = if result.success {
            self.rollback.clear_backups();
            Vec::new()
        } else {
            let restored = self.rollback.restore_all();
            if restored.len() == self.rollback.backups().len() {
                self.rollback.clear_backups();
            } else {
                tracing::warn!(
                    backup_dir = %self.rollback.backup_dir().display(),
                    "some files could not be restored, keeping backups"
                );
            }
            restored
        };

        CommandRun {
            command: command.to_string(),
            verdict,
            outcome: RunOutcome::Executed { result, restored },
        }
    }

    /// Run commands in order, optionally splitting each into fragments first
    ///
    /// Stops before the next command once cancellation is requested.
    pub async fn run_all(&mut self, commands: &[String], split: bool) -> Vec<CommandRun> {
        let commands: Vec<String> = if split {
            commands
                .iter()
                .flat_map(|c| self.evaluator.split(c))
                .collect()
        } else {
            commands.to_vec()
        };

        let mut runs = Vec::with_capacity(commands.len());
        for command in &commands {
            if self.cancel.is_cancelled() {
                tracing::warn!(remaining = commands.len() - runs.len(), "cancelled, skipping remaining commands");
                break;
            }
            runs.push(self.run(command).await);
        }
        runs
    }

    /// Generate commands for `query` and run them
    pub async fn run_query(
        &mut self,
        generator: &dyn CommandGenerator,
        query: &str,
        mode: GenerationMode,
        split: bool,
    ) -> Result<Vec<CommandRun>, GeneratorError> {
        let commands = generator.generate(query, mode, self.context.as_ref()).await?;
        tracing::info!(query, %mode, count = commands.len(), "generated commands");
        Ok(self.run_all(&commands, split).await)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::config::SafetyConfig;
    use crate::denylist::{DenylistStore, DenylistTable};
    use crate::generator::StaticGenerator;

    fn runner(dir: &TempDir, config: SafetyConfig) -> ModeratedRunner {
        runner_with_denylist(dir, config, DenylistStore::default())
    }

    fn runner_with_denylist(dir: &TempDir, config: SafetyConfig, denylist: DenylistStore) -> ModeratedRunner {
        let evaluator = SafetyEvaluator::new(config, Arc::new(denylist));
        let executor = CommandExecutor::with_limits(1024 * 1024, Duration::from_secs(10));
        let rollback = RollbackManager::new(dir.path().join("backups")).unwrap();
        ModeratedRunner::new(evaluator, executor, rollback).with_cwd(dir.path())
    }

    fn destructive() -> SafetyConfig {
        SafetyConfig {
            allow_destructive: true,
            ..SafetyConfig::default()
        }
    }

    #[tokio::test]
    async fn test_blocked_command_never_runs() {
        let dir = TempDir::new().unwrap();
        let mut runner = runner(&dir, SafetyConfig::default());

        let run = runner.run("sudo rm -rf /tmp").await;

        assert_eq!(run.outcome, RunOutcome::Blocked);
        assert_eq!(run.verdict.risk_level, RiskLevel::High);
        assert!(!run.succeeded());
    }

    #[tokio::test]
    async fn test_safe_command_executes() {
        let dir = TempDir::new().unwrap();
        let mut runner = runner(&dir, SafetyConfig::default());

        let run = runner.run("echo hello").await;

        match run.outcome {
            RunOutcome::Executed { result, restored } => {
                assert!(result.success);
                assert_eq!(result.stdout, "hello\n");
                assert!(restored.is_empty());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dry_run_has_no_side_effects() {
        let dir = TempDir::new().unwrap();
        let mut runner = runner(&dir, SafetyConfig::default()).dry_run(true);

        let run = runner.run("touch created.txt").await;

        assert!(matches!(run.outcome, RunOutcome::DryRun(_)));
        assert!(run.succeeded());
        assert!(!dir.path().join("created.txt").exists());
    }

    #[tokio::test]
    async fn test_failed_execution_rolls_back() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data.txt");
        fs::write(&file, "precious").unwrap();
        let mut runner = runner(&dir, destructive());

        let run = runner.run("rm data.txt && false").await;

        match &run.outcome {
            RunOutcome::Executed { result, restored } => {
                assert!(!result.success);
                assert_eq!(restored, &vec![file.canonicalize().unwrap()]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(fs::read_to_string(&file).unwrap(), "precious");
        assert!(runner.rollback.backups().is_empty());
    }

    #[tokio::test]
    async fn test_successful_execution_clears_backups() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("scratch.txt");
        fs::write(&file, "temporary").unwrap();
        let mut runner = runner(&dir, destructive());

        let run = runner.run("rm scratch.txt").await;

        assert!(run.succeeded());
        assert!(!file.exists());
        assert!(runner.rollback.backups().is_empty());
        let leftover = fs::read_dir(runner.rollback.backup_dir()).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_policy_lets_lower_tiers_through() {
        let dir = TempDir::new().unwrap();
        let table = DenylistTable {
            critical: vec![],
            high: vec![],
            medium: vec!["risky-marker".to_string()],
            low: vec![],
        };
        let mut cautious = runner_with_denylist(&dir, SafetyConfig::default(), DenylistStore::new(table));

        let run = cautious.run("echo risky-marker").await;
        assert!(!run.verdict.is_safe);
        assert_eq!(run.verdict.risk_level, RiskLevel::Medium);
        assert!(run.succeeded());

        let mut lenient = runner(
            &dir,
            SafetyConfig {
                block_high_risk: false,
                ..SafetyConfig::default()
            },
        );
        let run = lenient.run("test -d /etc").await;
        assert_eq!(run.verdict.risk_level, RiskLevel::High);
        assert!(run.succeeded());
    }

    #[tokio::test]
    async fn test_declined_confirmation_skips_execution() {
        let dir = TempDir::new().unwrap();
        let offline = SafetyConfig {
            allow_network: false,
            ..SafetyConfig::default()
        };
        let asked = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = Arc::clone(&asked);
        let mut runner = runner(&dir, offline).with_confirmation(move |command, verdict| {
            seen.lock().unwrap().push((command.to_string(), verdict.risk_level));
            command.starts_with("touch")
        });

        let run = runner.run("wget http://example.com/file").await;
        assert_eq!(run.outcome, RunOutcome::Skipped);
        assert!(!run.succeeded());

        let run = runner.run("touch confirmed.txt").await;
        assert!(run.succeeded());
        assert!(dir.path().join("confirmed.txt").exists());

        // Blocked commands never reach the prompt
        assert_eq!(runner.run("sudo reboot").await.outcome, RunOutcome::Blocked);
        assert_eq!(
            *asked.lock().unwrap(),
            vec![
                ("wget http://example.com/file".to_string(), RiskLevel::Medium),
                ("touch confirmed.txt".to_string(), RiskLevel::Low),
            ]
        );
    }

    #[tokio::test]
    async fn test_uncaptured_run_leaves_result_output_empty() {
        let dir = TempDir::new().unwrap();
        let mut runner = runner(&dir, SafetyConfig::default()).capture_output(false);

        let run = runner.run("echo streamed").await;

        match run.outcome {
            RunOutcome::Executed { result, .. } => {
                assert!(result.success);
                assert!(result.stdout.is_empty());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_env_and_input_reach_the_command() {
        let dir = TempDir::new().unwrap();
        let mut runner = runner(&dir, SafetyConfig::default())
            .with_env("AISH_GREETING", "hello")
            .with_input(Some("piped text\n".to_string()));

        let run = runner.run("echo \"$AISH_GREETING\"; cat").await;

        match run.outcome {
            RunOutcome::Executed { result, .. } => {
                assert!(result.success);
                assert_eq!(result.stdout, "hello\npiped text\n");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_all_splits_fragments() {
        let dir = TempDir::new().unwrap();
        let mut runner = runner(&dir, SafetyConfig::default());

        let runs = runner
            .run_all(&["echo one && sudo reboot ; echo two".to_string()], true)
            .await;

        let commands: Vec<&str> = runs.iter().map(|r| r.command.as_str()).collect();
        assert_eq!(commands, vec!["echo one", "sudo reboot", "echo two"]);
        assert!(runs[0].succeeded());
        assert_eq!(runs[1].outcome, RunOutcome::Blocked);
        assert!(runs[2].succeeded());
    }

    #[tokio::test]
    async fn test_run_all_stops_when_cancelled() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let mut runner = runner(&dir, SafetyConfig::default()).with_cancellation(cancel.clone());
        cancel.cancel();

        let runs = runner.run_all(&["echo a".to_string(), "echo b".to_string()], false).await;

        assert!(runs.is_empty());
    }

    #[tokio::test]
    async fn test_run_query() {
        let dir = TempDir::new().unwrap();
        let mut runner = runner(&dir, SafetyConfig::default());
        let generator = StaticGenerator::new(["pwd"]);

        let runs = runner
            .run_query(&generator, "where am I", GenerationMode::Default, false)
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].succeeded());

        let err = runner
            .run_query(&StaticGenerator::default(), "nothing", GenerationMode::Default, false)
            .await;
        assert!(err.is_err());
    }
}
