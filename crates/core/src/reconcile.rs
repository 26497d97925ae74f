//! Staleness detection and the compile-or-reset policy shared by both
//! watchers.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::{Engine, EngineError};
use crate::model::{RegistrySnapshot, SourceFile};

/// What a cycle decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Nothing stale.
    Clean,
    /// Recompile each stale file.
    Compile,
    /// Invalidate the whole cache.
    Reset,
}

/// Stale scripts found in one cycle and the strategy chosen for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Scripts whose cached copy is older than the source.
    pub stale: Vec<PathBuf>,
    /// Cached scripts that could no longer be resolved on disk.
    pub unresolved: Vec<PathBuf>,
    /// How the stale set will be handled.
    pub strategy: Strategy,
}

impl ReconcilePlan {
    /// Reset when anything is unresolved or more than `reset_threshold`
    /// files are stale; otherwise compile each stale file.
    pub fn new(stale: Vec<PathBuf>, unresolved: Vec<PathBuf>, reset_threshold: usize) -> Self {
        let strategy = if !unresolved.is_empty() || stale.len() > reset_threshold {
            Strategy::Reset
        } else if stale.is_empty() {
            Strategy::Clean
        } else {
            Strategy::Compile
        };
        Self {
            stale,
            unresolved,
            strategy,
        }
    }
}

/// What applying a plan did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Strategy that was applied.
    pub strategy: Strategy,
    /// Number of stale scripts found.
    pub stale: usize,
    /// Scripts recompiled.
    pub compiled: usize,
    /// Compile failures; these stay stale.
    pub failed: Vec<(PathBuf, String)>,
}

/// On-disk view of one enumerated path.
#[derive(Debug, Clone)]
pub enum DiskEntry {
    /// The file exists with this mtime.
    Present(SourceFile),
    /// Enumerated but could not be stat'ed any more.
    Missing(PathBuf),
}

impl DiskEntry {
    /// Stats `path`. A missing file keeps the canonical form of its parent
    /// directory so it still matches the engine's canonical keys.
    pub fn probe(path: &Path) -> Self {
        match SourceFile::stat(path) {
            Ok(file) => Self::Present(file),
            Err(_) => Self::Missing(canonical_missing(path)),
        }
    }
}

fn canonical_missing(path: &Path) -> PathBuf {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return path.to_path_buf();
    };
    match std::fs::canonicalize(parent) {
        Ok(dir) => dir.join(name),
        Err(_) => path.to_path_buf(),
    }
}

/// Compares on-disk mtimes with the engine's recorded ones.
///
/// A file is stale when its on-disk mtime is strictly newer than the
/// recorded one. Files the engine never cached are ignored. A missing
/// file the engine still holds is reported as unresolved.
pub fn stale_against_disk(
    entries: &[DiskEntry],
    scripts: &RegistrySnapshot,
) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut stale = Vec::new();
    let mut unresolved = Vec::new();
    for entry in entries {
        match entry {
            DiskEntry::Present(file) => {
                if let Some(recorded) = scripts.get(&file.key()) {
                    if file.mtime > *recorded {
                        stale.push(file.path.clone());
                    }
                }
            }
            DiskEntry::Missing(path) => {
                if scripts.contains_key(&*path.to_string_lossy()) {
                    unresolved.push(path.clone());
                }
            }
        }
    }
    (stale, unresolved)
}

/// Scripts cached on both sides whose remote mtime is strictly newer.
///
/// Scripts known to only one side are ignored.
pub fn stale_against_registry(remote: &RegistrySnapshot, local: &RegistrySnapshot) -> Vec<PathBuf> {
    remote
        .iter()
        .filter(|(path, remote_mtime)| {
            local
                .get(path.as_str())
                .is_some_and(|local_mtime| *remote_mtime > local_mtime)
        })
        .map(|(path, _)| PathBuf::from(path))
        .collect()
}

/// Executes a plan against the engine.
///
/// Per-file compile failures are logged and reported; those files stay
/// stale until the next cycle. Only an unusable engine is an error.
pub fn apply(engine: &Engine, plan: &ReconcilePlan) -> Result<CycleReport, EngineError> {
    let mut report = CycleReport {
        strategy: plan.strategy,
        stale: plan.stale.len(),
        compiled: 0,
        failed: Vec::new(),
    };
    match plan.strategy {
        Strategy::Clean => {}
        Strategy::Reset => {
            info!(
                stale = plan.stale.len(),
                unresolved = plan.unresolved.len(),
                "resetting opcode cache"
            );
            engine.reset()?;
        }
        Strategy::Compile => {
            let outcome = engine.compile_many(plan.stale.iter().map(PathBuf::as_path))?;
            for (path, reason) in &outcome.failed {
                warn!(path = %path.display(), %reason, "compile failed; file stays stale");
            }
            report.compiled = outcome.compiled.len();
            report.failed = outcome.failed;
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, mtime: i64) -> DiskEntry {
        DiskEntry::Present(SourceFile {
            path: PathBuf::from(path),
            mtime,
        })
    }

    #[test]
    fn strictly_newer_files_are_stale() {
        let scripts: RegistrySnapshot = [
            ("/app/a.php".to_string(), 100),
            ("/app/b.php".to_string(), 100),
        ]
        .into();
        let entries = vec![
            file("/app/a.php", 101),
            file("/app/b.php", 100),
            file("/app/uncached.php", 500),
        ];
        let (stale, unresolved) = stale_against_disk(&entries, &scripts);
        assert_eq!(stale, vec![PathBuf::from("/app/a.php")]);
        assert!(unresolved.is_empty());
    }

    #[test]
    fn missing_cached_file_is_unresolved() {
        let scripts: RegistrySnapshot = [("/app/gone.php".to_string(), 1)].into();
        let entries = vec![
            DiskEntry::Missing(PathBuf::from("/app/gone.php")),
            DiskEntry::Missing(PathBuf::from("/app/never-cached.php")),
        ];
        let (stale, unresolved) = stale_against_disk(&entries, &scripts);
        assert!(stale.is_empty());
        assert_eq!(unresolved, vec![PathBuf::from("/app/gone.php")]);
        let plan = ReconcilePlan::new(stale, unresolved, 100);
        assert_eq!(plan.strategy, Strategy::Reset);
    }

    #[cfg(unix)]
    #[test]
    fn missing_file_under_symlinked_root_is_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("releases/1");
        std::fs::create_dir_all(&real).unwrap();
        std::os::unix::fs::symlink(&real, dir.path().join("current")).unwrap();
        let walked = dir.path().join("current/a.php");
        std::fs::write(&walked, "<?php").unwrap();

        let cached = SourceFile::stat(&walked).unwrap();
        let scripts: RegistrySnapshot = [(cached.key(), cached.mtime)].into();
        std::fs::remove_file(&walked).unwrap();

        let (stale, unresolved) = stale_against_disk(&[DiskEntry::probe(&walked)], &scripts);
        assert!(stale.is_empty());
        assert_eq!(unresolved, vec![cached.path]);
    }

    #[test]
    fn registry_diff_ignores_one_sided_scripts() {
        let remote: RegistrySnapshot = [
            ("/a.php".to_string(), 10),
            ("/b.php".to_string(), 5),
            ("/remote-only.php".to_string(), 99),
        ]
        .into();
        let local: RegistrySnapshot = [
            ("/a.php".to_string(), 9),
            ("/b.php".to_string(), 5),
            ("/local-only.php".to_string(), 1),
        ]
        .into();
        assert_eq!(stale_against_registry(&remote, &local), vec![PathBuf::from("/a.php")]);
    }

    #[test]
    fn threshold_picks_strategy() {
        let two = vec![PathBuf::from("/a"), PathBuf::from("/b")];
        assert_eq!(ReconcilePlan::new(vec![], vec![], 0).strategy, Strategy::Clean);
        assert_eq!(ReconcilePlan::new(two.clone(), vec![], 2).strategy, Strategy::Compile);
        assert_eq!(ReconcilePlan::new(two.clone(), vec![], 1).strategy, Strategy::Reset);
        assert_eq!(ReconcilePlan::new(two, vec![], 0).strategy, Strategy::Reset);
    }
}
