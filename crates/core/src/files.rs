//! Source file enumeration shared by the scanner and the staleness watcher.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

/// Which files under a root count as sources.
#[derive(Debug, Clone)]
pub struct FileFilter {
    extensions: Vec<String>,
    exclude_dirs: Vec<String>,
}

impl Default for FileFilter {
    fn default() -> Self {
        Self::new(vec!["php".to_string()], vec![])
    }
}

impl FileFilter {
    /// Extensions are matched without the leading dot.
    pub fn new(extensions: Vec<String>, exclude_dirs: Vec<String>) -> Self {
        let extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Self {
            extensions,
            exclude_dirs,
        }
    }

    /// True if `path` has one of the configured extensions.
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(OsStr::to_str)
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            })
            .unwrap_or(false)
    }

    fn is_excluded_dir(&self, entry: &DirEntry) -> bool {
        // The root itself is never excluded, even if its name matches.
        entry.depth() > 0
            && entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .map(|name| self.exclude_dirs.iter().any(|d| d == name))
                .unwrap_or(false)
    }

    /// Walks `root` and yields matching files in a stable order.
    ///
    /// Entries are sorted by file name at every level and symlinks are not
    /// followed, so two walks of an unchanged tree yield the same sequence.
    pub fn walk<'a>(
        &'a self,
        root: &Path,
    ) -> impl Iterator<Item = Result<PathBuf, walkdir::Error>> + 'a {
        WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| !self.is_excluded_dir(e))
            .filter_map(move |entry| match entry {
                Ok(e) if e.file_type().is_file() && self.matches(e.path()) => {
                    Some(Ok(e.into_path()))
                }
                Ok(_) => None,
                Err(err) => Some(Err(err)),
            })
    }

    /// Walks every root in order.
    pub fn walk_all<'a>(
        &'a self,
        roots: &'a [PathBuf],
    ) -> impl Iterator<Item = Result<PathBuf, walkdir::Error>> + 'a {
        roots.iter().flat_map(move |root| self.walk(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn walks_sorted_and_skips_excluded_dirs() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("b")).unwrap();
        std::fs::create_dir_all(root.join("vendor")).unwrap();
        std::fs::write(root.join("b/z.php"), "<?php").unwrap();
        std::fs::write(root.join("a.php"), "<?php").unwrap();
        std::fs::write(root.join("notes.txt"), "x").unwrap();
        std::fs::write(root.join("vendor/lib.php"), "<?php").unwrap();

        let filter = FileFilter::new(vec!["php".into()], vec!["vendor".into()]);
        let files: Vec<PathBuf> = filter.walk(root).map(|r| r.unwrap()).collect();
        assert_eq!(files, vec![root.join("a.php"), root.join("b/z.php")]);
    }

    #[test]
    fn extension_match_ignores_case_and_dot() {
        let filter = FileFilter::new(vec![".PHP".into(), "inc".into()], vec![]);
        assert!(filter.matches(Path::new("/x/A.php")));
        assert!(filter.matches(Path::new("/x/b.inc")));
        assert!(!filter.matches(Path::new("/x/c.phpt")));
        assert!(!filter.matches(Path::new("/x/Makefile")));
    }
}
