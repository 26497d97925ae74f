//! Local staleness watcher: on-disk mtimes vs. the engine's recorded ones.

use std::path::PathBuf;

use opsync_core::config::Config;
use opsync_core::files::FileFilter;
use opsync_core::reconcile::{self, CycleReport, DiskEntry, ReconcilePlan, Strategy};
use opsync_core::{CompileOutcome, Engine, EngineError};
use tracing::{debug, info, warn};

pub struct LocalWatcher {
    engine: Engine,
    filter: FileFilter,
    roots: Vec<PathBuf>,
    reset_threshold: usize,
}

impl LocalWatcher {
    /// Roots are canonicalized once so walked paths line up with the
    /// engine's canonical keys; a root that does not exist yet is kept as is.
    pub fn new(engine: Engine, filter: FileFilter, roots: Vec<PathBuf>, reset_threshold: usize) -> Self {
        let roots = roots
            .into_iter()
            .map(|root| std::fs::canonicalize(&root).unwrap_or(root))
            .collect();
        Self {
            engine,
            filter,
            roots,
            reset_threshold,
        }
    }

    pub fn from_config(engine: Engine, config: &Config) -> Self {
        Self::new(
            engine,
            config.scan.filter(),
            config.watch_roots().to_vec(),
            config.watch.reset_threshold,
        )
    }

    /// Current on-disk state of the watched file set.
    fn enumerate(&self) -> Vec<DiskEntry> {
        self.filter
            .walk_all(&self.roots)
            .filter_map(|entry| match entry {
                Ok(path) => Some(DiskEntry::probe(&path)),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable watch entry");
                    None
                }
            })
            .collect()
    }

    /// One watcher cycle: scan, then either nothing, per-file compiles, or
    /// a reset. Blocking; run it off the async executor.
    pub fn run_cycle(&self) -> Result<CycleReport, EngineError> {
        debug!(roots = self.roots.len(), "scanning watched files");
        let entries = self.enumerate();
        let snapshot = self.engine.status()?;
        let (stale, unresolved) = reconcile::stale_against_disk(&entries, &snapshot.scripts);
        let plan = ReconcilePlan::new(stale, unresolved, self.reset_threshold);

        let report = reconcile::apply(&self.engine, &plan)?;
        match report.strategy {
            Strategy::Clean => debug!(files = entries.len(), "cache is fresh"),
            _ => info!(
                strategy = ?report.strategy,
                stale = report.stale,
                compiled = report.compiled,
                failed = report.failed.len(),
                "local reconcile done"
            ),
        }
        Ok(report)
    }

    /// Compiles the watched file set: every file when `force`, otherwise
    /// only files that are uncached or stale.
    pub fn compile_all(&self, force: bool) -> Result<CompileOutcome, EngineError> {
        let snapshot = self.engine.status()?;
        let targets: Vec<PathBuf> = self
            .enumerate()
            .into_iter()
            .filter_map(|entry| match entry {
                DiskEntry::Present(file) => {
                    let fresh = snapshot
                        .recorded(&file.key())
                        .is_some_and(|recorded| recorded >= file.mtime);
                    (force || !fresh).then_some(file.path)
                }
                DiskEntry::Missing(_) => None,
            })
            .collect();
        let outcome = self.engine.compile_many(targets.iter().map(PathBuf::as_path))?;
        for (path, reason) in &outcome.failed {
            warn!(path = %path.display(), %reason, "compile failed");
        }
        info!(
            compiled = outcome.compiled.len(),
            failed = outcome.failed.len(),
            force,
            "compiled watched files"
        );
        Ok(outcome)
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}
