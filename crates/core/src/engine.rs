//! Opcode-cache engine facade.
//!
//! The runtime cache is an injected capability ([`OpcacheRuntime`]); every
//! read or mutation of cache state goes through [`Engine`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;

use crate::model::{EngineSnapshot, RegistrySnapshot, SourceFile};
use crate::scan;

/// Failures surfaced by [`Engine`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The runtime has no opcode cache.
    #[error("opcode cache extension is not loaded")]
    ExtensionNotLoaded,
    /// The extension is loaded but caching is switched off.
    #[error("opcode cache is disabled")]
    EngineDisabled,
    /// The runtime rejected one file.
    #[error("compile {path}: {reason}")]
    CompileFailure { path: PathBuf, reason: String },
    /// The runtime declined to drop its cache.
    #[error("opcode cache refused to reset")]
    ResetRefused,
}

/// Raw access to a process's opcode cache.
///
/// Implementations wrap whatever the host runtime exposes. They are not
/// expected to check availability themselves; [`Engine`] does that.
pub trait OpcacheRuntime: Send + Sync {
    /// Whether the cache extension is present at all.
    fn extension_loaded(&self) -> bool;
    /// Whether caching is switched on.
    fn caching_enabled(&self) -> bool;
    /// Cached script path -> source mtime recorded at compile time.
    fn scripts(&self) -> RegistrySnapshot;
    /// Compiles one file into the cache. `Err` carries the reason.
    fn compile_file(&self, path: &Path) -> Result<(), String>;
    /// Drops every cached script. Returns false if the runtime refused.
    fn reset(&self) -> bool;
}

/// Result of compiling several files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutcome {
    /// Files now cached.
    pub compiled: Vec<PathBuf>,
    /// Files the runtime rejected, with its reason.
    pub failed: Vec<(PathBuf, String)>,
}

/// Facade over an [`OpcacheRuntime`].
#[derive(Clone)]
pub struct Engine {
    runtime: Arc<dyn OpcacheRuntime>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("available", &self.is_available())
            .finish()
    }
}

impl Engine {
    /// Wraps a runtime, failing immediately if its extension is missing.
    pub fn new(runtime: Arc<dyn OpcacheRuntime>) -> Result<Self, EngineError> {
        if !runtime.extension_loaded() {
            return Err(EngineError::ExtensionNotLoaded);
        }
        Ok(Self { runtime })
    }

    /// True while the extension is loaded, enabled or not.
    pub fn is_available(&self) -> bool {
        self.runtime.extension_loaded()
    }

    fn require_active(&self) -> Result<(), EngineError> {
        if !self.runtime.extension_loaded() {
            return Err(EngineError::ExtensionNotLoaded);
        }
        if !self.runtime.caching_enabled() {
            return Err(EngineError::EngineDisabled);
        }
        Ok(())
    }

    /// Current cache contents. Fails unless the cache is loaded and enabled.
    pub fn status(&self) -> Result<EngineSnapshot, EngineError> {
        self.require_active()?;
        Ok(EngineSnapshot {
            available: true,
            enabled: true,
            scripts: self.runtime.scripts(),
        })
    }

    /// Forces (re)compilation of exactly one file.
    pub fn compile(&self, path: &Path) -> Result<(), EngineError> {
        self.require_active()?;
        self.runtime
            .compile_file(path)
            .map_err(|reason| EngineError::CompileFailure {
                path: path.to_path_buf(),
                reason,
            })?;
        debug!(path = %path.display(), "compiled");
        Ok(())
    }

    /// Compiles each file in turn; per-file failures are collected, not
    /// returned. Only an inactive engine aborts the batch.
    pub fn compile_many<'p, I>(&self, paths: I) -> Result<CompileOutcome, EngineError>
    where
        I: IntoIterator<Item = &'p Path>,
    {
        let mut outcome = CompileOutcome::default();
        for path in paths {
            match self.compile(path) {
                Ok(()) => outcome.compiled.push(path.to_path_buf()),
                Err(EngineError::CompileFailure { path, reason }) => {
                    outcome.failed.push((path, reason))
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    /// Invalidates the whole cache.
    pub fn reset(&self) -> Result<(), EngineError> {
        self.require_active()?;
        if !self.runtime.reset() {
            return Err(EngineError::ResetRefused);
        }
        debug!("cache reset");
        Ok(())
    }
}

/// In-process opcode cache.
///
/// Compiling a file checks that it parses and records its current on-disk
/// mtime under its canonical path. This is the cache the daemon serves.
#[derive(Debug)]
pub struct MemoryRuntime {
    loaded: bool,
    enabled: Mutex<bool>,
    scripts: Mutex<BTreeMap<String, i64>>,
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRuntime {
    /// An available, enabled, empty cache.
    pub fn new() -> Self {
        Self::with_state(true, true)
    }

    /// An empty cache with the given availability.
    pub fn with_state(loaded: bool, enabled: bool) -> Self {
        Self {
            loaded,
            enabled: Mutex::new(enabled),
            scripts: Mutex::new(BTreeMap::new()),
        }
    }

    /// Switches caching on or off.
    pub fn set_enabled(&self, enabled: bool) {
        *self.enabled.lock().unwrap_or_else(|e| e.into_inner()) = enabled;
    }

    /// Records a script as cached with the given mtime, without touching
    /// the filesystem.
    pub fn record(&self, path: impl Into<String>, mtime: i64) {
        self.lock_scripts().insert(path.into(), mtime);
    }

    fn lock_scripts(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, i64>> {
        self.scripts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl OpcacheRuntime for MemoryRuntime {
    fn extension_loaded(&self) -> bool {
        self.loaded
    }

    fn caching_enabled(&self) -> bool {
        *self.enabled.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn scripts(&self) -> RegistrySnapshot {
        self.lock_scripts().clone()
    }

    fn compile_file(&self, path: &Path) -> Result<(), String> {
        let file = SourceFile::stat(path).map_err(|e| e.to_string())?;
        let bytes = std::fs::read(&file.path).map_err(|e| e.to_string())?;
        scan::parse_source(&bytes).map_err(|e| format!("syntax error, {e}"))?;
        self.lock_scripts().insert(file.key(), file.mtime);
        Ok(())
    }

    fn reset(&self) -> bool {
        self.lock_scripts().clear();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn construction_requires_extension() {
        let runtime = Arc::new(MemoryRuntime::with_state(false, true));
        assert_eq!(Engine::new(runtime).unwrap_err(), EngineError::ExtensionNotLoaded);
    }

    #[test]
    fn disabled_cache_rejects_operations() {
        let runtime = Arc::new(MemoryRuntime::new());
        let engine = Engine::new(runtime.clone()).unwrap();
        runtime.set_enabled(false);
        assert!(engine.is_available());
        assert_eq!(engine.status().unwrap_err(), EngineError::EngineDisabled);
        assert_eq!(engine.reset().unwrap_err(), EngineError::EngineDisabled);
        assert_eq!(
            engine.compile(Path::new("/nope.php")).unwrap_err(),
            EngineError::EngineDisabled
        );
    }

    #[test]
    fn compile_records_mtime_and_rejects_syntax_errors() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.php");
        let bad = dir.path().join("bad.php");
        std::fs::write(&good, "<?php class Good {}").unwrap();
        std::fs::write(&bad, "<?php class Bad {").unwrap();

        let engine = Engine::new(Arc::new(MemoryRuntime::new())).unwrap();
        let outcome = engine
            .compile_many([good.as_path(), bad.as_path()])
            .unwrap();
        assert_eq!(outcome.compiled.len(), 1);
        assert_eq!(outcome.failed.len(), 1);

        let snapshot = engine.status().unwrap();
        let key = SourceFile::stat(&good).unwrap().key();
        assert!(snapshot.recorded(&key).is_some());
        assert_eq!(snapshot.scripts.len(), 1);
    }

    #[test]
    fn reset_twice_equals_once() {
        let runtime = Arc::new(MemoryRuntime::new());
        runtime.record("/a.php", 1);
        runtime.record("/b.php", 2);
        let engine = Engine::new(runtime).unwrap();

        engine.reset().unwrap();
        let once = engine.status().unwrap();
        engine.reset().unwrap();
        let twice = engine.status().unwrap();
        assert!(once.scripts.is_empty());
        assert_eq!(once, twice);
    }
}
