//! Risk tiers and safety verdicts
//!
//! Every classification stage produces a `SafetyVerdict`; the evaluator keeps
//! the first failing one (or the strongest advisory when nothing fails).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ordered risk tier. `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// All tiers from most to least severe (denylist evaluation order)
    pub const DESCENDING: [RiskLevel; 4] = [
        RiskLevel::Critical,
        RiskLevel::High,
        RiskLevel::Medium,
        RiskLevel::Low,
    ];

    /// Lowercase name used in the denylist document and on the CLI
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// Human-readable explanation of the tier
    pub fn explanation(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low risk - command appears safe",
            RiskLevel::Medium => "Medium risk - command may modify files or system state",
            RiskLevel::High => "High risk - potentially destructive or dangerous command",
            RiskLevel::Critical => "Critical risk - command could cause system damage",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level: {other}")),
        }
    }
}

/// Result of one safety evaluation
///
/// A failing verdict always carries a non-empty `reason`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyVerdict {
    pub is_safe: bool,
    pub risk_level: RiskLevel,
    pub reason: String,
    /// Remediation hints, most specific first
    pub suggestions: Vec<String>,
    /// Denylist / rule patterns that caused the verdict
    pub blocked_patterns: Vec<String>,
}

impl SafetyVerdict {
    /// A passing verdict at the given tier
    pub fn pass(risk_level: RiskLevel, reason: impl Into<String>) -> Self {
        Self {
            is_safe: true,
            risk_level,
            reason: reason.into(),
            suggestions: Vec::new(),
            blocked_patterns: Vec::new(),
        }
    }

    /// A failing verdict. An empty reason is replaced with the tier explanation.
    pub fn fail(risk_level: RiskLevel, reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        if reason.trim().is_empty() {
            reason = risk_level.explanation().to_string();
        }
        Self {
            is_safe: false,
            risk_level,
            reason,
            suggestions: Vec::new(),
            blocked_patterns: Vec::new(),
        }
    }

    /// The neutral verdict returned by a stage that found nothing
    pub fn clear() -> Self {
        Self::pass(RiskLevel::Low, "")
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_blocked_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Whether this verdict is a passing verdict above the LOW tier
    pub fn is_advisory(&self) -> bool {
        self.is_safe && self.risk_level > RiskLevel::Low
    }
}
