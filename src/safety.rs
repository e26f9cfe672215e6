//! Safety evaluator
//!
//! Runs a command through the ordered stage pipeline and returns the first
//! failing verdict. Passing stages above LOW are advisory: the strongest one
//! is remembered and returned when nothing fails.

use std::sync::Arc;

use crate::classifier::{CommandClassifier, CommandView};
use crate::compliance::ComplianceChecker;
use crate::config::SafetyConfig;
use crate::denylist::DenylistStore;
use crate::monitor::EnvironmentSnapshot;
use crate::predictive;
use crate::risk::{RiskLevel, SafetyVerdict};
use crate::shell::{self, SyntaxError};

type Stage = fn(&CommandClassifier, &CommandView, &SafetyConfig) -> SafetyVerdict;

/// Category stages, in evaluation order
const STAGES: &[(&str, Stage)] = &[
    ("dangerous_constructs", CommandClassifier::check_dangerous_constructs),
    ("privilege", CommandClassifier::check_privilege),
    ("destructive", CommandClassifier::check_destructive),
    ("network", CommandClassifier::check_network),
    ("critical_paths", CommandClassifier::check_critical_paths),
    ("wildcards", CommandClassifier::check_wildcards),
];

fn keep_strongest(advisory: &mut Option<SafetyVerdict>, verdict: SafetyVerdict) {
    if verdict.is_advisory()
        && advisory
            .as_ref()
            .is_none_or(|a| verdict.risk_level > a.risk_level)
    {
        *advisory = Some(verdict);
    }
}

pub struct SafetyEvaluator {
    config: SafetyConfig,
    denylist: Arc<DenylistStore>,
    classifier: CommandClassifier,
    compliance: ComplianceChecker,
}

impl SafetyEvaluator {
    pub fn new(config: SafetyConfig, denylist: Arc<DenylistStore>) -> Self {
        Self {
            config,
            denylist,
            classifier: CommandClassifier::new(),
            compliance: ComplianceChecker::new(),
        }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn denylist(&self) -> &Arc<DenylistStore> {
        &self.denylist
    }

    pub fn compliance(&self) -> &ComplianceChecker {
        &self.compliance
    }

    pub fn evaluate(&self, command: &str) -> SafetyVerdict {
        self.evaluate_with_context(command, None)
    }

    /// Evaluate with optional host context for the predictive stage
    pub fn evaluate_with_context(
        &self,
        command: &str,
        context: Option<&EnvironmentSnapshot>,
    ) -> SafetyVerdict {
        let verdict = self.run_stages(command, context);
        if verdict.is_safe {
            return verdict;
        }
        self.with_alternative(verdict, command)
    }

    fn run_stages(&self, command: &str, context: Option<&EnvironmentSnapshot>) -> SafetyVerdict {
        let command = command.trim();
        if command.is_empty() {
            return SafetyVerdict::fail(RiskLevel::Medium, "Empty command");
        }
        if let Err(e) = shell::validate_syntax(command) {
            return SafetyVerdict::fail(RiskLevel::Medium, e.to_string())
                .with_suggestion("Check that every quote is closed");
        }
        let length = command.chars().count();
        if length > self.config.max_command_length {
            return SafetyVerdict::fail(
                RiskLevel::Medium,
                format!(
                    "Command too long ({length} chars, max {})",
                    self.config.max_command_length
                ),
            );
        }

        if let Some(hit) = self.denylist.snapshot().find_match(command) {
            tracing::debug!(level = %hit.level, patterns = ?hit.patterns, "denylist match");
            return SafetyVerdict::fail(
                hit.level,
                format!(
                    "Command matches {} denylist pattern: {}",
                    hit.level,
                    hit.patterns.join(", ")
                ),
            )
            .with_blocked_patterns(hit.patterns)
            .with_suggestion("This command is explicitly blocked by the denylist");
        }

        let view = CommandView::new(command);
        let mut advisory: Option<SafetyVerdict> = None;

        for (name, stage) in STAGES {
            let verdict = stage(&self.classifier, &view, &self.config);
            if !verdict.is_safe {
                tracing::debug!(stage = name, level = %verdict.risk_level, "stage rejected command");
                return verdict;
            }
            keep_strongest(&mut advisory, verdict);
        }

        let verdict = predictive::assess(command, context);
        if !verdict.is_safe {
            return verdict;
        }
        keep_strongest(&mut advisory, verdict);

        if self.config.compliance_mode {
            let violations = self.compliance.check_compliance(command);
            if !violations.is_empty() {
                let descriptions: Vec<&str> =
                    violations.iter().map(|v| v.description.as_str()).collect();
                return SafetyVerdict::fail(
                    RiskLevel::High,
                    format!("Compliance check failed: {}", descriptions.join("; ")),
                )
                .with_blocked_patterns(violations.iter().map(|v| v.pattern.clone()))
                .with_suggestion("Review the command against your compliance policy");
            }
        }

        advisory.unwrap_or_else(|| {
            SafetyVerdict::pass(RiskLevel::Low, "Command passed all safety checks")
        })
    }

    fn with_alternative(&self, mut verdict: SafetyVerdict, command: &str) -> SafetyVerdict {
        if let Some(hint) = self.classifier.suggest_safer_alternative(command) {
            if !verdict.suggestions.iter().any(|s| s == hint) {
                verdict.suggestions.insert(0, hint.to_string());
            }
        }
        verdict
    }

    /// Split a compound command into independently evaluable fragments
    pub fn split(&self, command: &str) -> Vec<String> {
        shell::split_commands(command)
    }

    pub fn validate_command_syntax(&self, command: &str) -> Result<(), SyntaxError> {
        shell::validate_syntax(command)
    }
}
