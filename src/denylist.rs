//! Tiered denylist
//!
//! The denylist is a JSON document mapping each risk tier to a list of
//! patterns. A pattern prefixed with `re:` is a case-insensitive regex,
//! anything else is a case-insensitive substring.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::risk::RiskLevel;

/// Prefix marking a pattern as a regular expression
pub const REGEX_PREFIX: &str = "re:";

/// Denylist errors
#[derive(Debug, Error)]
pub enum DenylistError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid denylist document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Raw tiered pattern lists, as persisted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenylistTable {
    #[serde(default)]
    pub critical: Vec<String>,
    #[serde(default)]
    pub high: Vec<String>,
    #[serde(default)]
    pub medium: Vec<String>,
    #[serde(default)]
    pub low: Vec<String>,
}

impl DenylistTable {
    /// Small table used when no document exists
    pub fn builtin() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            critical: list(&[
                r"re:(^|[;&|(]\s*)((\w+=\S*|nice|time|command|env|nohup|exec|builtin|xargs)(\s+-\S+(\s+\d+)?)*\s+)*rm\s+-[a-z]*(rf|fr)[a-z]*\s+/",
                ":(){:|:&};:",
                r"re:\bdd\s+.*of=/dev/(sd|hd|nvme|xvd)",
                r"re:>\s*/dev/sd[a-z]",
                r"re:\b(killall|pkill)\s+-9\s+(init|systemd)\b",
            ]),
            high: list(&[
                "mkfs",
                r"re:\bshutdown\b",
                r"re:\breboot\b",
                r"re:\binit\s+[06]\b",
            ]),
            medium: list(&[r"re:\bkillall\b", r"re:\bpkill\b"]),
            low: list(&[r"re:\bhistory\s+-c\b"]),
        }
    }

    pub fn patterns(&self, level: RiskLevel) -> &[String] {
        match level {
            RiskLevel::Critical => &self.critical,
            RiskLevel::High => &self.high,
            RiskLevel::Medium => &self.medium,
            RiskLevel::Low => &self.low,
        }
    }

    fn patterns_mut(&mut self, level: RiskLevel) -> &mut Vec<String> {
        match level {
            RiskLevel::Critical => &mut self.critical,
            RiskLevel::High => &mut self.high,
            RiskLevel::Medium => &mut self.medium,
            RiskLevel::Low => &mut self.low,
        }
    }

    /// Add a pattern; returns false when it is already present in that tier
    pub fn add(&mut self, level: RiskLevel, pattern: impl Into<String>) -> bool {
        let pattern = pattern.into();
        let list = self.patterns_mut(level);
        if list.contains(&pattern) {
            return false;
        }
        list.push(pattern);
        true
    }

    /// Read a table from disk, `None` when the file does not exist
    pub fn load(path: &Path) -> Result<Option<Self>, DenylistError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|source| DenylistError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Read a table from disk, falling back to the built-in table
    pub fn load_or_builtin(path: &Path) -> Result<Self, DenylistError> {
        Ok(Self::load(path)?.unwrap_or_else(Self::builtin))
    }

    pub fn save(&self, path: &Path) -> Result<(), DenylistError> {
        let io_err = |source| DenylistError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        // Write-then-rename so a concurrent reader never sees a partial document
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }
}

/// Check the structure of a raw denylist document
///
/// All four tiers must be present and each must be a list of strings.
pub fn validate_document(content: &str) -> Result<Vec<String>, DenylistError> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let mut errors = Vec::new();

    let Some(object) = value.as_object() else {
        errors.push("Document is not an object".to_string());
        return Ok(errors);
    };

    for level in RiskLevel::DESCENDING {
        match object.get(level.as_str()) {
            None => errors.push(format!("Missing level: {level}")),
            Some(serde_json::Value::Array(items)) => {
                for item in items {
                    match item.as_str() {
                        Some(pattern) => {
                            if let Err(e) = compile_pattern(pattern) {
                                errors.push(e.to_string());
                            }
                        }
                        None => errors.push(format!("Level {level} has a non-string entry")),
                    }
                }
            }
            Some(_) => errors.push(format!("Level {level} is not a list")),
        }
    }

    Ok(errors)
}

#[derive(Debug)]
enum Matcher {
    Substring(String),
    Regex(Regex),
}

#[derive(Debug)]
struct CompiledPattern {
    source: String,
    matcher: Matcher,
}

impl CompiledPattern {
    fn is_match(&self, lowered: &str) -> bool {
        match &self.matcher {
            Matcher::Substring(needle) => lowered.contains(needle.as_str()),
            Matcher::Regex(re) => re.is_match(lowered),
        }
    }
}

fn compile_pattern(pattern: &str) -> Result<CompiledPattern, DenylistError> {
    let matcher = match pattern.strip_prefix(REGEX_PREFIX) {
        Some(expr) => Matcher::Regex(
            RegexBuilder::new(expr)
                .case_insensitive(true)
                .build()
                .map_err(|source| DenylistError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })?,
        ),
        None => Matcher::Substring(pattern.to_lowercase()),
    };
    Ok(CompiledPattern {
        source: pattern.to_string(),
        matcher,
    })
}

/// A denylist hit: the winning tier and the patterns of that tier that matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenylistMatch {
    pub level: RiskLevel,
    pub patterns: Vec<String>,
}

/// Compiled, immutable view of a `DenylistTable`
#[derive(Debug)]
pub struct Denylist {
    table: DenylistTable,
    tiers: BTreeMap<RiskLevel, Vec<CompiledPattern>>,
}

impl Denylist {
    /// Compile every pattern; invalid regexes are skipped with a warning
    pub fn compile(table: DenylistTable) -> Self {
        let mut tiers = BTreeMap::new();
        for level in RiskLevel::DESCENDING {
            let compiled = table
                .patterns(level)
                .iter()
                .filter_map(|p| match compile_pattern(p) {
                    Ok(c) => Some(c),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping denylist pattern");
                        None
                    }
                })
                .collect();
            tiers.insert(level, compiled);
        }
        Self { table, tiers }
    }

    pub fn table(&self) -> &DenylistTable {
        &self.table
    }

    /// Match a command, most severe tier first
    pub fn find_match(&self, command: &str) -> Option<DenylistMatch> {
        let lowered = command.to_lowercase();
        for level in RiskLevel::DESCENDING {
            let patterns: Vec<String> = self
                .tiers
                .get(&level)
                .into_iter()
                .flatten()
                .filter(|p| p.is_match(&lowered))
                .map(|p| p.source.clone())
                .collect();
            if !patterns.is_empty() {
                return Some(DenylistMatch { level, patterns });
            }
        }
        None
    }
}

/// Shared denylist handle
///
/// Readers take an `Arc` snapshot; `add_pattern` builds a new compiled list
/// and swaps it in, so a reader sees either the old or the new table.
#[derive(Debug)]
pub struct DenylistStore {
    path: Option<PathBuf>,
    current: RwLock<Arc<Denylist>>,
}

impl DenylistStore {
    /// In-memory store, never persisted
    pub fn new(table: DenylistTable) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(Denylist::compile(table))),
        }
    }

    /// Load from `path`, falling back to the built-in table when absent
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DenylistError> {
        let path = path.into();
        let table = DenylistTable::load_or_builtin(&path)?;
        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(Denylist::compile(table))),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> Arc<Denylist> {
        Arc::clone(&self.current.read())
    }

    /// Add a pattern and persist it; returns false when it already existed
    pub fn add_pattern(&self, level: RiskLevel, pattern: &str) -> Result<bool, DenylistError> {
        compile_pattern(pattern)?;

        let mut guard = self.current.write();
        let mut table = guard.table().clone();
        if !table.add(level, pattern) {
            return Ok(false);
        }
        if let Some(path) = &self.path {
            table.save(path)?;
        }
        *guard = Arc::new(Denylist::compile(table));
        tracing::info!(%level, pattern, "added denylist pattern");
        Ok(true)
    }
}

impl Default for DenylistStore {
    fn default() -> Self {
        Self::new(DenylistTable::builtin())
    }
}
