//! Backup and rollback of files touched by destructive commands
//!
//! Files are copied into a backup directory before the command runs. A
//! failed execution restores every recorded file; a successful one clears
//! the backups. Restore and clear never fail loudly: errors are logged and
//! reported as `false` or skipped entries.

use std::collections::HashMap;
use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use thiserror::Error;

use crate::classifier::is_destructive_program;
use crate::shell;

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("Cannot create backup directory {path}: {source}")]
    BackupDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Records original → backup paths for one execution flow
///
/// Not synchronised; callers sharing a manager must serialise access.
#[derive(Debug)]
pub struct RollbackManager {
    backup_dir: PathBuf,
    backups: HashMap<PathBuf, PathBuf>,
    /// Disambiguates backups taken within the same second
    seq: u64,
}

impl RollbackManager {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Result<Self, RollbackError> {
        let dir = backup_dir.into();
        let backup_dir = fs::create_dir_all(&dir)
            .and_then(|_| dir.canonicalize())
            .map_err(|source| RollbackError::BackupDir {
                path: dir.clone(),
                source,
            })?;
        Ok(Self {
            backup_dir,
            backups: HashMap::new(),
            seq: 0,
        })
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Current original → backup mapping
    pub fn backups(&self) -> &HashMap<PathBuf, PathBuf> {
        &self.backups
    }

    /// Snapshot a regular file; `None` when it does not exist, is not a file,
    /// or the copy fails
    pub fn backup_file(&mut self, path: impl AsRef<Path>) -> Option<PathBuf> {
        let path = path.as_ref();
        if !fs::metadata(path).is_ok_and(|m| m.is_file()) {
            return None;
        }
        let original = resolve(path);
        let name = original.file_name()?.to_string_lossy().into_owned();
        let timestamp = Local::now().format("%Y%m%d%H%M%S");

        let backup = loop {
            self.seq += 1;
            let candidate = self.backup_dir.join(format!("{name}.bak.{timestamp}.{}", self.seq));
            if !candidate.exists() {
                break candidate;
            }
        };

        if let Err(e) = copy_with_metadata(&original, &backup) {
            tracing::warn!(path = %original.display(), error = %e, "backup failed");
            return None;
        }
        tracing::debug!(original = %original.display(), backup = %backup.display(), "backed up file");
        self.backups.insert(original, backup.clone());
        Some(backup)
    }

    /// Back up each path, keyed by the path as given; skipped paths are absent
    pub fn backup_files<I, P>(&mut self, paths: I) -> HashMap<PathBuf, PathBuf>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        paths
            .into_iter()
            .filter_map(|p| {
                let p = p.as_ref();
                self.backup_file(p).map(|backup| (p.to_path_buf(), backup))
            })
            .collect()
    }

    /// Copy the backup back over `path`, recreating it if it was deleted
    pub fn restore_file(&self, path: impl AsRef<Path>) -> bool {
        let original = resolve(path.as_ref());
        match self.backups.get(&original) {
            Some(backup) => restore(backup, &original),
            None => false,
        }
    }

    /// Restore every recorded file; entries whose backup is gone are skipped
    pub fn restore_all(&self) -> Vec<PathBuf> {
        let restored: Vec<PathBuf> = self
            .backups
            .keys()
            .filter(|original| self.restore_file(original))
            .cloned()
            .collect();
        if !restored.is_empty() {
            tracing::warn!(count = restored.len(), "rolled back files");
        }
        restored
    }

    /// Delete every backup file and forget the mapping
    pub fn clear_backups(&mut self) {
        for backup in self.backups.values() {
            if let Err(e) = fs::remove_file(backup) {
                tracing::debug!(backup = %backup.display(), error = %e, "could not delete backup");
            }
        }
        self.backups.clear();
    }
}

fn restore(backup: &Path, original: &Path) -> bool {
    if !backup.is_file() {
        return false;
    }
    if let Some(parent) = original.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            tracing::warn!(path = %original.display(), error = %e, "restore failed");
            return false;
        }
    }
    match copy_with_metadata(backup, original) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(path = %original.display(), error = %e, "restore failed");
            false
        }
    }
}

/// Copy contents and permission bits, then the modification and access times
fn copy_with_metadata(from: &Path, to: &Path) -> io::Result<()> {
    let metadata = fs::metadata(from)?;
    fs::copy(from, to)?;
    let mut times = FileTimes::new();
    if let Ok(modified) = metadata.modified() {
        times = times.set_modified(modified);
    }
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }
    File::open(to)?.set_times(times)
}

/// Absolute, symlink-free form of `path`, also for files that no longer exist
fn resolve(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let Some(name) = absolute.file_name().map(|n| n.to_os_string()) else {
        return absolute;
    };
    match absolute.parent().and_then(|p| p.canonicalize().ok()) {
        Some(parent) => parent.join(name),
        None => absolute,
    }
}

/// Existing regular files a destructive command would touch
///
/// Looks at every fragment whose program (after `sudo` and transparent
/// wrappers such as `nice` or `xargs`) is destructive and collects its
/// non-flag arguments, including the value side of `key=value` forms such as
/// `dd of=disk.img`. Relative paths resolve against `cwd`.
pub fn backup_candidates(command: &str, cwd: &Path) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    for fragment in shell::split_commands(command) {
        let words = shell::program_words(&fragment);
        let Some(idx) = shell::effective_program_index(&words, true) else {
            continue;
        };
        if !is_destructive_program(&shell::program_name(&words[idx])) {
            continue;
        }

        for arg in &words[idx + 1..] {
            if arg.starts_with('-') {
                continue;
            }
            let value = arg.split_once('=').map_or(arg.as_str(), |(_, v)| v);
            if value.is_empty() {
                continue;
            }
            let path = cwd.join(value);
            if path.is_file() && !candidates.contains(&path) {
                candidates.push(path);
            }
        }
    }
    candidates
}
