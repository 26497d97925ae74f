//! Type scanner: finds every named class, interface, trait and enum
//! declared at file or namespace level in a source tree.

mod lexer;
mod syntax;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::files::FileFilter;
use crate::model::{DeclaredType, SourceFile};

pub use syntax::Stmt;

/// Syntax error in a single file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-based line of the offending token.
    pub line: u32,
    /// What was expected.
    pub message: String,
}

/// Per-file scan failure. None of these abort a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    /// A directory could not be walked.
    #[error("walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    /// A file could not be read.
    #[error("read {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A file is not valid source.
    #[error("parse {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Where parsing stopped.
        #[source]
        source: ParseError,
    },
}

/// Declarations found in one file, in document order.
#[derive(Debug, Clone)]
pub struct FileTypes {
    /// The scanned file.
    pub file: Arc<SourceFile>,
    /// Its declarations.
    pub types: Vec<DeclaredType>,
}

/// Lexes and parses a file's contents into top-level statements.
pub fn parse_source(source: &[u8]) -> Result<Vec<Stmt>, ParseError> {
    syntax::parse(&lexer::lex(source)?)
}

/// Extracts declared types from already parsed statements.
pub fn declared_types(stmts: &[Stmt], file: &Arc<SourceFile>) -> Vec<DeclaredType> {
    let mut out = Vec::new();
    visit(stmts, "", file, &mut out);
    out
}

/// Walks statements with the namespace prefix accumulated so far.
fn visit(stmts: &[Stmt], prefix: &str, file: &Arc<SourceFile>, out: &mut Vec<DeclaredType>) {
    for stmt in stmts {
        match stmt {
            Stmt::Namespace { name, body, .. } => match name {
                Some(name) => visit(body, &format!("{prefix}{name}\\"), file, out),
                None => visit(body, prefix, file, out),
            },
            Stmt::Type { kind, name, .. } => out.push(DeclaredType {
                name: format!("{prefix}{name}"),
                kind: *kind,
                source: Arc::clone(file),
            }),
            Stmt::Other => {}
        }
    }
}

/// Scans a single file.
pub fn scan_file(path: &Path) -> Result<FileTypes, ScanError> {
    let io_err = |source| ScanError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = Arc::new(SourceFile::stat(path).map_err(io_err)?);
    let bytes = std::fs::read(&file.path).map_err(io_err)?;
    let stmts = parse_source(&bytes).map_err(|source| ScanError::Parse {
        path: file.path.clone(),
        source,
    })?;
    let types = declared_types(&stmts, &file);
    Ok(FileTypes { file, types })
}

/// Enumerates source files and scans them lazily.
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    filter: FileFilter,
}

impl Scanner {
    /// Scans files accepted by `filter`.
    pub fn new(filter: FileFilter) -> Self {
        Self { filter }
    }

    /// Scans every matching file under `roots`, one result per file.
    ///
    /// The sequence is lazy and deterministic: re-running it over an
    /// unchanged tree yields the same results in the same order.
    pub fn scan<'a>(
        &'a self,
        roots: &'a [PathBuf],
    ) -> impl Iterator<Item = Result<FileTypes, ScanError>> + 'a {
        self.filter
            .walk_all(roots)
            .map(|entry| scan_file(&entry?))
    }

    /// Scans an explicit list of files, without extension filtering.
    pub fn scan_files<'a>(
        &'a self,
        files: &'a [PathBuf],
    ) -> impl Iterator<Item = Result<FileTypes, ScanError>> + 'a {
        files.iter().map(|path| scan_file(path))
    }
}

/// Flattens per-file results into declared types, logging failures.
///
/// `on_error` sees every skipped file; pass `|_| {}` when the warn log is
/// enough.
pub fn collect_types<I, F>(results: I, mut on_error: F) -> Vec<DeclaredType>
where
    I: IntoIterator<Item = Result<FileTypes, ScanError>>,
    F: FnMut(&ScanError),
{
    let mut out = Vec::new();
    for result in results {
        match result {
            Ok(file) => out.extend(file.types),
            Err(e) => {
                warn!(error = %e, "skipping file");
                on_error(&e);
            }
        }
    }
    out
}
