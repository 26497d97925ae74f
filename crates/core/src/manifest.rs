//! Preload manifest compilation and the bootstrap artifact it is written to.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::DeclaredType;

/// Preload manifest I/O failures.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The exclusion list could not be read.
    #[error("read exclusion list {path}: {source}")]
    ReadExclusions {
        /// Exclusion list path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The artifact could not be written.
    #[error("write preload artifact {path}: {source}")]
    Write {
        /// Artifact path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Normalizes a fully-qualified name: surrounding blanks and a leading `\`
/// are not significant.
fn normalize(name: &str) -> &str {
    name.trim().trim_start_matches('\\')
}

/// Fully-qualified type names that must never be preloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    names: HashSet<String>,
}

impl ExclusionSet {
    /// Builds a set from names, normalizing each.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|n| normalize(n.as_ref()).to_string())
            .filter(|n| !n.is_empty())
            .collect();
        Self { names }
    }

    /// Loads one name per line; blank lines and `#` comments are ignored.
    pub fn load_file(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| {
            ManifestError::ReadExclusions {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(Self::new(
            text.lines().filter(|l| !l.trim_start().starts_with('#')),
        ))
    }

    /// Adds every name of `other`.
    pub fn extend(&mut self, other: ExclusionSet) {
        self.names.extend(other.names);
    }

    /// Whether `name` is excluded, after normalization.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(normalize(name))
    }

    /// Number of excluded names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when nothing is excluded.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Ordered, duplicate-free list of names to force-load at boot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadManifest {
    names: Vec<String>,
}

impl PreloadManifest {
    /// Names in emission order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when there is nothing to preload.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Counters reported alongside a compiled manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManifestStats {
    /// Names written to the manifest.
    pub emitted: usize,
    /// Names dropped by the exclusion set.
    pub excluded: usize,
    /// Repeated names dropped after their first occurrence.
    pub duplicates: usize,
}

/// Builds the manifest from scanner output.
///
/// Excluded names are dropped, repeated names keep their first position.
/// Output order is exactly first-seen scan order.
pub fn compile_manifest<I>(types: I, exclusions: &ExclusionSet) -> (PreloadManifest, ManifestStats)
where
    I: IntoIterator<Item = DeclaredType>,
{
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    let mut stats = ManifestStats::default();

    for ty in types {
        let name = normalize(&ty.name);
        if exclusions.contains(name) {
            stats.excluded += 1;
            continue;
        }
        if !seen.insert(name.to_string()) {
            stats.duplicates += 1;
            continue;
        }
        names.push(name.to_string());
    }
    stats.emitted = names.len();
    (PreloadManifest { names }, stats)
}

/// Escapes a value for a single-quoted PHP string.
fn php_single_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\\' || c == '\'' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Renders the bootstrap script: autoloader prologue, then one
/// `class_exists` call per manifest entry, which triggers autoloading for
/// classes, interfaces, traits and enums alike.
pub fn render_preload_script(manifest: &PreloadManifest, autoload: &Path) -> String {
    let mut out = String::new();
    out.push_str("<?php\n\n");
    out.push_str("// Generated by opsyncctl preload. Do not edit.\n\n");
    let _ = writeln!(
        out,
        "require_once {};\n",
        php_single_quoted(&autoload.to_string_lossy())
    );
    for name in manifest.names() {
        let _ = writeln!(out, "\\class_exists({});", php_single_quoted(name));
    }
    out
}

/// Writes the artifact wholesale: a temp file next to `target` is renamed
/// over it, so readers never observe a partial script.
pub fn write_artifact(target: &Path, contents: &str) -> Result<(), ManifestError> {
    let write_err = |source| ManifestError::Write {
        path: target.to_path_buf(),
        source,
    };
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(write_err)?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "preload.php".to_string());
    let tmp = dir.join(format!(".{file_name}.tmp"));
    let mut f = std::fs::File::create(&tmp).map_err(write_err)?;
    f.write_all(contents.as_bytes()).map_err(write_err)?;
    f.sync_all().map_err(write_err)?;
    drop(f);
    std::fs::rename(&tmp, target).map_err(|source| {
        let _ = std::fs::remove_file(&tmp);
        write_err(source)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SourceFile, TypeKind};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn decl(name: &str, file: &str) -> DeclaredType {
        DeclaredType {
            name: name.to_string(),
            kind: TypeKind::Class,
            source: Arc::new(SourceFile {
                path: PathBuf::from(file),
                mtime: 0,
            }),
        }
    }

    #[test]
    fn excludes_and_dedupes_in_first_seen_order() {
        let types = vec![
            decl("App\\B", "/1.php"),
            decl("App\\A", "/1.php"),
            decl("App\\Skip", "/2.php"),
            decl("App\\B", "/3.php"),
            decl("Global", "/3.php"),
        ];
        let exclusions = ExclusionSet::new(["\\App\\Skip"]);
        let (manifest, stats) = compile_manifest(types, &exclusions);
        assert_eq!(manifest.names(), ["App\\B", "App\\A", "Global"]);
        assert_eq!(
            stats,
            ManifestStats {
                emitted: 3,
                excluded: 1,
                duplicates: 1
            }
        );
    }

    #[test]
    fn excluded_duplicates_never_appear() {
        let types = vec![decl("X", "/a.php"), decl("X", "/b.php"), decl("Y", "/c.php")];
        let (manifest, stats) = compile_manifest(types, &ExclusionSet::new(["X"]));
        assert_eq!(manifest.names(), ["Y"]);
        assert_eq!(stats.excluded, 2);
        assert_eq!(stats.duplicates, 0);
    }

    #[test]
    fn exclusion_file_skips_comments() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exclude.txt");
        std::fs::write(&path, "# legacy\nApp\\Old\n\n  \\App\\Older  \n").unwrap();
        let set = ExclusionSet::load_file(&path).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains("App\\Old"));
        assert!(set.contains("App\\Older"));
    }

    #[test]
    fn script_escapes_names_and_is_stable() {
        let types = vec![decl("App\\Http\\Kernel", "/k.php"), decl("Root", "/r.php")];
        let (manifest, _) = compile_manifest(types, &ExclusionSet::default());
        let script = render_preload_script(&manifest, Path::new("/srv/app/vendor/autoload.php"));
        assert!(script.starts_with("<?php\n"));
        assert!(script.contains("require_once '/srv/app/vendor/autoload.php';"));
        assert!(script.contains("\\class_exists('App\\\\Http\\\\Kernel');"));
        assert!(script.contains("\\class_exists('Root');"));
        assert_eq!(
            script,
            render_preload_script(&manifest, Path::new("/srv/app/vendor/autoload.php"))
        );
    }

    #[test]
    fn artifact_is_replaced_wholesale() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out/preload.php");
        write_artifact(&target, "first version, longer").unwrap();
        write_artifact(&target, "second").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "second");
        assert!(!dir.path().join("out/.preload.php.tmp").exists());
    }

    #[test]
    fn unwritable_target_is_an_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let err = write_artifact(&blocker.join("preload.php"), "x").unwrap_err();
        assert!(matches!(err, ManifestError::Write { .. }));
    }
}
