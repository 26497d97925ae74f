//! Core data types: source files, declared types and cache snapshots.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::util::mtime_secs;

/// A source file as seen at scan time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Canonical absolute path.
    pub path: PathBuf,
    /// Last modification time, unix seconds.
    pub mtime: i64,
}

impl SourceFile {
    /// Canonicalizes `path` and reads its modification time.
    pub fn stat(path: &Path) -> io::Result<Self> {
        let path = std::fs::canonicalize(path)?;
        let modified = std::fs::metadata(&path)?.modified()?;
        Ok(Self {
            path,
            mtime: mtime_secs(modified),
        })
    }

    /// Engine registry key for this file.
    pub fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Kind of a declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    /// `class`
    Class,
    /// `interface`
    Interface,
    /// `trait`
    Trait,
    /// `enum`
    Enum,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TypeKind::Class => "class",
            TypeKind::Interface => "interface",
            TypeKind::Trait => "trait",
            TypeKind::Enum => "enum",
        })
    }
}

/// A named type declaration found by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredType {
    /// Fully-qualified name, namespace separated by `\`, no leading `\`.
    pub name: String,
    /// Declaration keyword.
    pub kind: TypeKind,
    /// File the declaration came from.
    pub source: Arc<SourceFile>,
}

/// Script path -> source mtime the engine believes is current.
///
/// This is also the wire body of the registry endpoint.
pub type RegistrySnapshot = BTreeMap<String, i64>;

/// Live state of the opcode cache at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// The cache extension is loaded.
    pub available: bool,
    /// Caching is switched on.
    pub enabled: bool,
    /// Cached scripts and their recorded mtimes.
    pub scripts: RegistrySnapshot,
}

impl EngineSnapshot {
    /// Recorded mtime for a script, if cached.
    pub fn recorded(&self, path: &str) -> Option<i64> {
        self.scripts.get(path).copied()
    }

    /// Reduces the snapshot to its wire form.
    pub fn into_registry(self) -> RegistrySnapshot {
        self.scripts
    }
}
