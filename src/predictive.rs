//! Predictive risk scoring
//!
//! An additive heuristic over command features and environment context.

use crate::monitor::EnvironmentSnapshot;
use crate::risk::{RiskLevel, SafetyVerdict};

const CRITICAL_THRESHOLD: u32 = 8;
const HIGH_THRESHOLD: u32 = 5;
const MEDIUM_THRESHOLD: u32 = 3;

/// Additive score for a command; every applicable feature contributes
pub fn risk_score(command: &str, context: Option<&EnvironmentSnapshot>) -> u32 {
    let mut score = 0;
    if command.contains("rm ") || command.contains("dd ") {
        score += 3;
    }
    if command.contains("sudo") {
        score += 2;
    }
    if command.contains('|') && command.contains("sh") {
        score += 4;
    }
    if ["mkfs", "fdisk", "shutdown"].iter().any(|k| command.contains(k)) {
        score += 5;
    }
    if context.is_some_and(EnvironmentSnapshot::disk_pressure) {
        score += 2;
    }
    score
}

/// Map a score to a tier; HIGH and above is unsafe
pub fn assess(command: &str, context: Option<&EnvironmentSnapshot>) -> SafetyVerdict {
    let score = risk_score(command, context);
    tracing::debug!(score, "predictive risk score");

    if score >= CRITICAL_THRESHOLD {
        SafetyVerdict::fail(
            RiskLevel::Critical,
            format!("Predictive risk assessment: critical (score {score})"),
        )
    } else if score >= HIGH_THRESHOLD {
        SafetyVerdict::fail(
            RiskLevel::High,
            format!("Predictive risk assessment: high (score {score})"),
        )
    } else if score >= MEDIUM_THRESHOLD {
        SafetyVerdict::pass(
            RiskLevel::Medium,
            format!("Predictive risk assessment: medium (score {score})"),
        )
        .with_suggestion("Review the command before running it")
    } else {
        SafetyVerdict::pass(RiskLevel::Low, format!("Predictive risk assessment: low (score {score})"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::disk_status;
    use proptest::prelude::*;

    #[test]
    fn test_low_risk() {
        for command in ["echo hello", "ls -la", "cat file.txt"] {
            let verdict = assess(command, None);
            assert!(verdict.is_safe);
            assert_eq!(verdict.risk_level, RiskLevel::Low);
        }
    }

    #[test]
    fn test_medium_is_advisory() {
        for command in ["rm file.txt", "dd if=a of=b", "echo 'test' | sh"] {
            let verdict = assess(command, None);
            assert!(verdict.is_safe, "{command}");
            assert_eq!(verdict.risk_level, RiskLevel::Medium, "{command}");
        }
    }

    #[test]
    fn test_high_and_critical() {
        assert_eq!(risk_score("sudo rm file.txt", None), 5);
        for command in ["sudo rm file.txt", "mkfs /dev/sda1", "fdisk /dev/sda", "sudo mkfs /dev/sda1"] {
            let verdict = assess(command, None);
            assert!(!verdict.is_safe, "{command}");
            assert_eq!(verdict.risk_level, RiskLevel::High, "{command}");
        }

        // rm (3) + pipe to sh (4) + shutdown (5)
        let verdict = assess("rm x | sh -c shutdown", None);
        assert!(!verdict.is_safe);
        assert_eq!(verdict.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_disk_pressure_adds_weight() {
        let context = EnvironmentSnapshot {
            disk_status: Some(disk_status(1, 100)),
            memory_status: None,
        };
        assert_eq!(risk_score("rm file.txt", Some(&context)), 5);
        assert_eq!(assess("rm file.txt", Some(&context)).risk_level, RiskLevel::High);

        let healthy = EnvironmentSnapshot {
            disk_status: Some(disk_status(90, 100)),
            memory_status: None,
        };
        assert_eq!(risk_score("rm file.txt", Some(&healthy)), 3);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_tier_matches_thresholds(command in "[a-z |]{0,40}") {
            let score = risk_score(&command, None);
            let verdict = assess(&command, None);
            let expected = match score {
                s if s >= 8 => RiskLevel::Critical,
                s if s >= 5 => RiskLevel::High,
                s if s >= 3 => RiskLevel::Medium,
                _ => RiskLevel::Low,
            };
            prop_assert_eq!(verdict.risk_level, expected);
            prop_assert_eq!(verdict.is_safe, score < 5);
        }
    }
}
