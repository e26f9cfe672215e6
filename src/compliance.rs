//! Compliance overlay
//!
//! Regulatory pattern rules checked against the raw command text. Unlike the
//! safety stages every matching rule is collected.

use std::fmt;

use chrono::Utc;
use regex::{Regex, RegexBuilder};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceCategory {
    GeneralSecurity,
    Sox,
    Hipaa,
}

impl fmt::Display for ComplianceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GeneralSecurity => "general security",
            Self::Sox => "SOX",
            Self::Hipaa => "HIPAA",
        })
    }
}

struct Rule {
    name: &'static str,
    category: ComplianceCategory,
    pattern: &'static str,
    description: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        name: "No PII Exposure",
        category: ComplianceCategory::GeneralSecurity,
        pattern: r"(cat|less|more)\s+.*(passwd|shadow|creditcard|ssn|patient)",
        description: "Command may expose sensitive PII/PHI data.",
    },
    Rule {
        name: "No Unencrypted Data Transfer",
        category: ComplianceCategory::GeneralSecurity,
        pattern: r"\bftp\b|\btelnet\b",
        description: "Insecure protocols used for data transfer (unencrypted).",
    },
    Rule {
        name: "No Passwords in Commands",
        category: ComplianceCategory::GeneralSecurity,
        pattern: r"(--password|--pass|--pwd)\s+\S+",
        description: "Password detected directly in command arguments.",
    },
    Rule {
        name: "No Mass Deletion",
        category: ComplianceCategory::GeneralSecurity,
        pattern: r"rm\s+-rf\s+/",
        description: "Potential system-wide deletion detected.",
    },
    Rule {
        name: "SOX: Logging Required",
        category: ComplianceCategory::Sox,
        pattern: r"(useradd|userdel|usermod|groupadd|groupdel|passwd)\b",
        description: "User and group management must be logged under SOX compliance.",
    },
    Rule {
        name: "SOX: File Permission Change",
        category: ComplianceCategory::Sox,
        pattern: r"chmod\s+[0-7]{3}\s+",
        description: "File permission changes must be logged and reviewed under SOX.",
    },
    Rule {
        name: "HIPAA: No PHI Exposure",
        category: ComplianceCategory::Hipaa,
        pattern: r"(cat|less|more)\s+.*(patient|medical|health|record)",
        description: "Potential PHI exposure without proper audit logging.",
    },
    Rule {
        name: "HIPAA: Encrypted Transfers",
        category: ComplianceCategory::Hipaa,
        pattern: r"\bftp\b|\btelnet\b",
        description: "HIPAA requires secure, encrypted transfers for ePHI.",
    },
];

/// A matched compliance rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub rule_name: String,
    pub description: String,
    pub pattern: String,
    pub category: ComplianceCategory,
}

/// Result of a full compliance check, suitable for audit output
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    /// RFC 3339, UTC
    pub timestamp: String,
    pub user: String,
    pub command: String,
    pub compliant: bool,
    pub failures: Vec<Violation>,
}

struct CompiledRule {
    rule: &'static Rule,
    regex: Regex,
}

pub struct ComplianceChecker {
    rules: Vec<CompiledRule>,
}

impl Default for ComplianceChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl ComplianceChecker {
    pub fn new() -> Self {
        let rules = RULES
            .iter()
            .filter_map(|rule| {
                RegexBuilder::new(rule.pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|regex| CompiledRule { rule, regex })
                    .map_err(|e| tracing::warn!(rule = rule.name, "skipping compliance rule: {e}"))
                    .ok()
            })
            .collect();
        Self { rules }
    }

    /// Every rule the command violates, in rule order
    pub fn check_compliance(&self, command: &str) -> Vec<Violation> {
        self.rules
            .iter()
            .filter(|rule| rule.regex.is_match(command))
            .map(|rule| Violation {
                rule_name: rule.rule.name.to_string(),
                description: rule.rule.description.to_string(),
                pattern: rule.rule.pattern.to_string(),
                category: rule.rule.category,
            })
            .collect()
    }

    pub fn is_compliant(&self, command: &str) -> bool {
        !self.rules.iter().any(|rule| rule.regex.is_match(command))
    }

    pub fn generate_compliance_report(&self, command: &str, user: &str) -> ComplianceReport {
        let failures = self.check_compliance(command);
        ComplianceReport {
            timestamp: Utc::now().to_rfc3339(),
            user: user.to_string(),
            command: command.to_string(),
            compliant: failures.is_empty(),
            failures,
        }
    }
}
