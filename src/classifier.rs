//! Heuristic command classifiers
//!
//! A fixed battery of independent checks. Each takes a parsed view of the
//! command plus the safety config and returns a `SafetyVerdict`; the
//! evaluator decides the order.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::config::SafetyConfig;
use crate::risk::{RiskLevel, SafetyVerdict};
use crate::shell;

/// Commands that need elevated privileges
pub const PRIVILEGE_COMMANDS: &[&str] = &[
    "su", "mount", "umount", "fdisk", "parted", "mkfs", "fsck", "iptables", "systemctl",
    "service", "chkconfig", "useradd", "userdel", "usermod", "groupadd", "groupdel", "passwd",
    "chpasswd", "visudo", "crontab", "at", "batch",
];

/// Commands that destroy or rewrite data
pub const DESTRUCTIVE_COMMANDS: &[&str] = &[
    "rm", "rmdir", "mv", "dd", "shred", "truncate", "wipe", "chmod", "chown", "chgrp", "unlink",
    "mkfs", "format", "fdisk", "parted", "gparted", "wipefs",
];

/// Commands that talk to the network
pub const NETWORK_COMMANDS: &[&str] = &[
    "curl", "wget", "nc", "netcat", "socat", "ssh", "scp", "rsync", "ftp", "sftp", "telnet",
    "nmap", "masscan", "tcpdump", "wireshark",
];

/// Commands that only read state
pub const READ_ONLY_COMMANDS: &[&str] = &[
    "ls", "cat", "less", "more", "head", "tail", "grep", "find", "ps", "top", "df", "du", "free",
    "uptime", "whoami", "id", "pwd", "echo", "date", "cal", "history", "which", "whereis", "file",
    "stat", "wc", "diff", "sort", "uniq", "cut",
];

static PIPE_TO_SHELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\|\s*(sudo\s+)?(/usr)?(/bin/)?(ba|z|da|k)?sh\b").expect("Invalid pipe-to-shell regex")
});

static CRITICAL_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:^|[\s='"<>:;|&(])(/(?:etc|boot|usr|bin|sbin|lib(?:32|64|x32|exec)?))(?:/|$|[\s'";|&)])"#,
    )
    .expect("Invalid critical path regex")
});

/// Programs whose glob arguments trigger a wildcard advisory
const WILDCARD_SENSITIVE: &[&str] = &["rm", "chmod", "chown"];

fn in_set(set: &[&str], program: &str) -> bool {
    // mkfs.ext4, mkfs.xfs, ... share the mkfs entry
    let family = program.split_once('.').map_or(program, |(head, _)| head);
    set.contains(&program) || (family == "mkfs" && set.contains(&"mkfs"))
}

/// Whether `program` is in the destructive set
pub fn is_destructive_program(program: &str) -> bool {
    in_set(DESTRUCTIVE_COMMANDS, program)
}

/// A command prepared once for all stages
#[derive(Debug, Clone)]
pub struct CommandView {
    /// Trimmed original text
    pub raw: String,
    /// Unquoted words, leading `VAR=value` assignments removed
    pub words: Vec<String>,
}

impl CommandView {
    pub fn new(command: &str) -> Self {
        let raw = command.trim().to_string();
        let words = shell::program_words(&raw);
        Self { raw, words }
    }

    /// Lowercased program left after transparent wrappers (`nice`, `env`,
    /// `xargs`, ...) and, with `peel_sudo`, a leading `sudo` are peeled off
    pub fn unwrapped_program(&self, peel_sudo: bool) -> Option<String> {
        shell::effective_program_index(&self.words, peel_sudo).map(|i| shell::program_name(&self.words[i]))
    }

    /// The program that actually runs, peeling `sudo` only when it is permitted
    pub fn effective_program(&self, config: &SafetyConfig) -> Option<String> {
        self.unwrapped_program(config.allow_sudo)
    }
}

/// Detects known dangerous shell constructs using regex patterns
pub struct DangerousPatternDetector {
    /// Compiled patterns with a short label
    patterns: Vec<(Regex, &'static str)>,
}

impl DangerousPatternDetector {
    /// Create a detector from `(pattern, label)` pairs; invalid patterns are dropped
    pub fn new(patterns: &[(&str, &'static str)]) -> Self {
        Self {
            patterns: patterns
                .iter()
                .filter_map(|(p, label)| {
                    RegexBuilder::new(p)
                        .case_insensitive(true)
                        .build()
                        .ok()
                        .map(|re| (re, *label))
                })
                .collect(),
        }
    }

    /// Constructs that are never acceptable, whatever the config says
    pub fn with_defaults() -> Self {
        Self::new(&[
            // Resource exhaustion
            (r":\s*\(\s*\)\s*\{.*\}", "fork bomb"),
            (r"\b\w+\s*\(\s*\)\s*\{[^}]*\|[^}]*&\s*\}", "fork bomb"),
            (r"\bwhile\s+(true|:|/bin/true)(\s|;|$)", "unbounded while loop"),
            (r"\buntil\s+(false|/bin/false)(\s|;|$)", "unbounded until loop"),
            (r"(^|[;&|(]\s*)yes\b[^|;&]*\|", "runaway yes pipeline"),
            // File system destruction
            (
                r#"\brm\s+(-\S+\s+)*-[a-z]*(rf|fr)[a-z]*\s+["']?(~|\$home|\$\{home\}|\.\.?)/?["']?(\s|$|[;&|)])"#,
                "recursive delete of home or working directory",
            ),
            (
                r"\brm\s.*(/etc/(passwd|shadow|group)\b|/boot/|/usr/|/var/|/lib(64)?/)",
                "delete of system files",
            ),
            (r"\b(format|fdisk|parted)\s+/dev/", "disk partitioning"),
            // Remote code execution
            (r"\b((ba|z|k|da)?sh|source)\s+<\s*\(", "shell fed by process substitution"),
            (r"\b(nc|netcat|ncat)(\s.*)?\s-\w*l.*\s-\w*e\b", "reverse shell listener"),
            (r"\bsocat\s.*\b(exec|system):", "reverse shell listener"),
            // Shutdown
            (r"(^|[;&|(]\s*)(sudo\s+)?(halt|poweroff)(\s+-\S+)*\s*($|[;&|)])", "system shutdown"),
            // Process manipulation
            (r"\bkill\s+-(9|kill|sigkill)\s+1\s*($|[;&|)])", "kill of init"),
            (r"\b(killall|pkill)\s+-9\s+(init|systemd)\b", "kill of init"),
            // Privilege escalation
            (r"\bchmod\s+(-\S+\s+)*0?777\s+/", "world-writable system path"),
            (r"\bchmod\s+(-\S+\s+)*0?[46]755\b", "setuid or setgid bit"),
            (r"\bchown\s+(-\S+\s+)*root:root\s+/", "root ownership of system path"),
            // Overwriting important files
            (r">\s*/etc/(passwd|shadow|group)\b", "system file overwrite"),
            (r">\s*/boot/", "system file overwrite"),
        ])
    }

    /// Labels of all matching patterns, deduplicated
    pub fn matching_labels(&self, command: &str) -> Vec<&'static str> {
        let mut labels: Vec<&'static str> = Vec::new();
        for (pattern, label) in &self.patterns {
            if pattern.is_match(command) && !labels.contains(label) {
                labels.push(label);
            }
        }
        labels
    }

    /// Source text of all matching patterns
    pub fn matching_patterns(&self, command: &str) -> Vec<String> {
        self.patterns
            .iter()
            .filter(|(p, _)| p.is_match(command))
            .map(|(p, _)| p.as_str().to_string())
            .collect()
    }
}

/// The category stages of the evaluator
pub struct CommandClassifier {
    dangerous: DangerousPatternDetector,
    alternatives: Vec<(Regex, &'static str)>,
}

impl Default for CommandClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandClassifier {
    pub fn new() -> Self {
        let alternatives = [
            (r"rm\s+-rf\s+\*", "Use 'find . -name \"pattern\" -delete' for specific files"),
            (r"rm\s+-rf\s+/(\s|$)", "NEVER delete root directory!"),
            (
                r"(curl|wget)\s+.*\|\s*(ba|z)?sh",
                "Download first: curl URL > file.sh, inspect it, then run it",
            ),
            (r"chmod\s+(-\w+\s+)*777", "Use more restrictive permissions like 755 or 644"),
            (r"sudo\s+rm", "Be very careful with sudo rm - consider using trash instead"),
        ]
        .iter()
        .filter_map(|(p, hint)| Regex::new(p).ok().map(|re| (re, *hint)))
        .collect();

        Self {
            dangerous: DangerousPatternDetector::with_defaults(),
            alternatives,
        }
    }

    /// Fork bombs, shutdowns, reverse shells and similar constructs, always CRITICAL
    pub fn check_dangerous_constructs(
        &self,
        view: &CommandView,
        _config: &SafetyConfig,
    ) -> SafetyVerdict {
        let labels = self.dangerous.matching_labels(&view.raw);
        if labels.is_empty() {
            return SafetyVerdict::clear();
        }
        SafetyVerdict::fail(
            RiskLevel::Critical,
            format!("Command matches dangerous shell pattern: {}", labels.join(", ")),
        )
        .with_blocked_patterns(self.dangerous.matching_patterns(&view.raw))
        .with_suggestion("This command can damage the system or exhaust its resources")
    }

    /// `sudo` and commands that need root
    pub fn check_privilege(&self, view: &CommandView, config: &SafetyConfig) -> SafetyVerdict {
        let Some(program) = view.unwrapped_program(false) else {
            return SafetyVerdict::clear();
        };

        if program == "sudo" {
            if config.allow_sudo {
                return SafetyVerdict::pass(RiskLevel::Medium, "sudo command allowed by configuration");
            }
            return SafetyVerdict::fail(RiskLevel::High, "sudo commands are blocked")
                .with_suggestion("Remove sudo and run command as regular user");
        }

        if in_set(PRIVILEGE_COMMANDS, &program) {
            return SafetyVerdict::fail(
                RiskLevel::High,
                format!("Privileged command '{program}' is blocked"),
            )
            .with_suggestion("Consider running without special privileges");
        }

        SafetyVerdict::clear()
    }

    /// Commands that destroy or rewrite data, unless `allow_destructive`
    pub fn check_destructive(&self, view: &CommandView, config: &SafetyConfig) -> SafetyVerdict {
        if config.allow_destructive {
            return SafetyVerdict::clear();
        }
        match view.effective_program(config) {
            Some(program) if in_set(DESTRUCTIVE_COMMANDS, &program) => {
                let verdict = SafetyVerdict::fail(
                    RiskLevel::High,
                    format!("Destructive command '{program}' is blocked"),
                );
                match self.suggest_safer_alternative(&view.raw) {
                    Some(hint) => verdict.with_suggestion(hint),
                    None => verdict.with_suggestion("Consider using safer alternatives"),
                }
            }
            _ => SafetyVerdict::clear(),
        }
    }

    /// Network programs; piping any of them into a shell is always CRITICAL
    pub fn check_network(&self, view: &CommandView, config: &SafetyConfig) -> SafetyVerdict {
        let fragment_programs: Vec<String> = shell::split_commands(&view.raw)
            .iter()
            .filter_map(|fragment| CommandView::new(fragment).effective_program(config))
            .collect();
        let uses_network = fragment_programs
            .iter()
            .any(|p| in_set(NETWORK_COMMANDS, p));

        if uses_network && PIPE_TO_SHELL.is_match(&view.raw) {
            return SafetyVerdict::fail(
                RiskLevel::Critical,
                "Network command piped to shell - potential remote code execution",
            )
            .with_suggestion("Download to file first, then inspect before executing");
        }

        match view.effective_program(config) {
            Some(program) if in_set(NETWORK_COMMANDS, &program) && !config.allow_network => {
                SafetyVerdict::fail(
                    RiskLevel::Medium,
                    format!("Network command blocked: '{program}'"),
                )
                .with_suggestion("Network operations are disabled")
            }
            _ => SafetyVerdict::clear(),
        }
    }

    /// References to system-critical directories
    pub fn check_critical_paths(&self, view: &CommandView, config: &SafetyConfig) -> SafetyVerdict {
        if !config.check_file_paths {
            return SafetyVerdict::clear();
        }
        match CRITICAL_PATH.captures(&view.raw).and_then(|c| c.get(1)) {
            Some(m) => SafetyVerdict::fail(
                RiskLevel::High,
                format!("Operation on critical path: {}/", m.as_str()),
            )
            .with_suggestion("Avoid modifying system directories"),
            None => SafetyVerdict::clear(),
        }
    }

    /// Glob arguments to `rm`/`chmod`/`chown`; advisory only
    pub fn check_wildcards(&self, view: &CommandView, config: &SafetyConfig) -> SafetyVerdict {
        if !config.warn_on_wildcards {
            return SafetyVerdict::clear();
        }
        let Some(program) = view.effective_program(config) else {
            return SafetyVerdict::clear();
        };
        let has_glob = view
            .raw
            .split_whitespace()
            .skip(1)
            .any(|arg| arg.contains(['*', '?', '[']));

        if WILDCARD_SENSITIVE.contains(&program.as_str()) && has_glob {
            return SafetyVerdict::pass(
                RiskLevel::Medium,
                format!("Wildcard usage with '{program}' - be careful"),
            )
            .with_suggestion("Double-check which files will be affected");
        }
        SafetyVerdict::clear()
    }

    /// A fixed hint for well-known risky idioms
    pub fn suggest_safer_alternative(&self, command: &str) -> Option<&'static str> {
        self.alternatives
            .iter()
            .find(|(re, _)| re.is_match(command))
            .map(|(_, hint)| *hint)
    }
}

/// Whether the program only reads state
pub fn is_read_only_command(command: &str) -> bool {
    CommandView::new(command)
        .unwrapped_program(false)
        .is_some_and(|p| READ_ONLY_COMMANDS.contains(&p.as_str()))
}
