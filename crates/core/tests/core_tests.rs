//! Integration tests for the core crate.

use std::path::{Path, PathBuf};

use opsync_core::files::FileFilter;
use opsync_core::manifest::{compile_manifest, render_preload_script, write_artifact, ExclusionSet};
use opsync_core::scan::{collect_types, Scanner};
use opsync_core::TypeKind;
use tempfile::tempdir;

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

fn fixture_tree(root: &Path) {
    write(
        root,
        "app/Models/User.php",
        "<?php\nnamespace App\\Models;\n\nuse App\\Contracts\\HasName;\n\nfinal class User implements HasName {\n    public function name(): string { return 'x'; }\n}\n",
    );
    write(
        root,
        "app/Contracts/HasName.php",
        "<?php\nnamespace App\\Contracts;\n\ninterface HasName { public function name(): string; }\n",
    );
    write(
        root,
        "app/Support/helpers.php",
        "<?php\nif (!function_exists('tap')) { function tap($v) { return $v; } }\n",
    );
    write(root, "app/Legacy/Old.php", "<?php\nclass LegacyOld {}\ntrait Loggable {}\n");
    write(root, "app/Broken.php", "<?php\nclass Broken {\n");
    write(root, "app/Duplicate.php", "<?php\ntrait Loggable {}\n");
    write(root, "app/view.blade.txt", "<?php class NotScanned {}");
}

#[test]
fn scan_is_deterministic() {
    let dir = tempdir().unwrap();
    fixture_tree(dir.path());
    let scanner = Scanner::default();
    let roots = vec![dir.path().join("app")];

    let first: Vec<(String, TypeKind)> = collect_types(scanner.scan(&roots), |_| {})
        .into_iter()
        .map(|t| (t.name, t.kind))
        .collect();
    let second: Vec<(String, TypeKind)> = collect_types(scanner.scan(&roots), |_| {})
        .into_iter()
        .map(|t| (t.name, t.kind))
        .collect();

    assert_eq!(first, second);
    assert_eq!(
        first,
        vec![
            ("App\\Contracts\\HasName".to_string(), TypeKind::Interface),
            ("Loggable".to_string(), TypeKind::Trait),
            ("LegacyOld".to_string(), TypeKind::Class),
            ("Loggable".to_string(), TypeKind::Trait),
            ("App\\Models\\User".to_string(), TypeKind::Class),
        ]
    );
}

#[test]
fn scan_reports_parse_failures_per_file() {
    let dir = tempdir().unwrap();
    fixture_tree(dir.path());
    let scanner = Scanner::default();
    let roots = vec![dir.path().join("app")];

    let failures: Vec<String> = scanner
        .scan(&roots)
        .filter_map(Result::err)
        .map(|e| e.to_string())
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("Broken.php"));
}

#[test]
fn preload_pipeline_produces_identical_artifacts() {
    let dir = tempdir().unwrap();
    fixture_tree(dir.path());
    let scanner = Scanner::new(FileFilter::default());
    let roots = vec![dir.path().join("app")];
    let exclusions = ExclusionSet::new(["LegacyOld"]);
    let autoload = PathBuf::from("/srv/app/vendor/autoload.php");

    let render = || {
        let types = collect_types(scanner.scan(&roots), |_| {});
        let (manifest, stats) = compile_manifest(types, &exclusions);
        assert_eq!(stats.excluded, 1);
        assert_eq!(stats.duplicates, 1);
        assert!(!manifest.names().iter().any(|n| n == "LegacyOld"));
        render_preload_script(&manifest, &autoload)
    };

    let target = dir.path().join("build/preload.php");
    write_artifact(&target, &render()).unwrap();
    let first = std::fs::read(&target).unwrap();
    write_artifact(&target, &render()).unwrap();
    let second = std::fs::read(&target).unwrap();
    assert_eq!(first, second);

    let text = String::from_utf8(first).unwrap();
    let loads: Vec<&str> = text.lines().filter(|l| l.starts_with("\\class_exists")).collect();
    assert_eq!(
        loads,
        vec![
            "\\class_exists('App\\\\Contracts\\\\HasName');",
            "\\class_exists('Loggable');",
            "\\class_exists('App\\\\Models\\\\User');",
        ]
    );
}
