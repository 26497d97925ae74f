//! `opsync.toml` configuration.
//!
//! Every section has defaults, so an absent file or section is valid.
//! Relative paths are resolved against a base directory with
//! [`Config::rooted`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files::FileFilter;
use crate::manifest::{ExclusionSet, ManifestError};

/// Failure loading or saving the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("read {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`Config`].
    #[error("parse {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
    /// The config could not be rendered as TOML.
    #[error("serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    /// The file could not be written.
    #[error("write {path}: {source}")]
    Write {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Daemon and ctl configuration, one TOML file.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// `[scan]`
    pub scan: ScanConfig,
    /// `[preload]`
    pub preload: PreloadConfig,
    /// `[watch]`
    pub watch: WatchConfig,
    /// `[fleet]`
    pub fleet: FleetConfig,
    /// `[server]`
    pub server: ServerConfig,
}

/// Which files the scanner reads.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScanConfig {
    /// Directories scanned for declarations.
    pub roots: Vec<PathBuf>,
    /// File extensions read, without the dot.
    pub extensions: Vec<String>,
    /// Directory names skipped at any depth, e.g. `tests`.
    pub exclude_dirs: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from("src")],
            extensions: vec!["php".to_string()],
            exclude_dirs: vec![],
        }
    }
}

impl ScanConfig {
    /// File filter built from these settings.
    pub fn filter(&self) -> FileFilter {
        FileFilter::new(self.extensions.clone(), self.exclude_dirs.clone())
    }
}

/// Preload script generation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PreloadConfig {
    /// Where the bootstrap script is written.
    pub output: PathBuf,
    /// Autoloader required by the script prologue.
    pub autoload: PathBuf,
    /// Fully-qualified names never preloaded.
    pub exclude: Vec<String>,
    /// Optional extra exclusion list, one name per line.
    pub exclude_file: Option<PathBuf>,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("preload.php"),
            autoload: PathBuf::from("vendor/autoload.php"),
            exclude: vec![],
            exclude_file: None,
        }
    }
}

impl PreloadConfig {
    /// Inline exclusions plus those from `exclude_file`, if set.
    pub fn exclusions(&self) -> Result<ExclusionSet, ManifestError> {
        let mut set = ExclusionSet::new(&self.exclude);
        if let Some(path) = &self.exclude_file {
            set.extend(ExclusionSet::load_file(path)?);
        }
        Ok(set)
    }
}

/// Local staleness watcher.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchConfig {
    /// Run the watcher at all.
    pub enabled: bool,
    /// Roots to watch; empty means the scan roots.
    pub roots: Vec<PathBuf>,
    /// Seconds between cycles.
    pub interval_secs: u64,
    /// More stale files than this triggers a full reset.
    pub reset_threshold: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            roots: vec![],
            interval_secs: 10,
            reset_threshold: 25,
        }
    }
}

/// Fleet registry watcher.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FleetConfig {
    /// Run the watcher at all.
    pub enabled: bool,
    /// Registry URL of the peer to poll. Unset means poll this process.
    pub peer_url: Option<String>,
    /// Seconds between polls.
    pub interval_secs: u64,
    /// Per-request timeout for the registry fetch.
    pub timeout_ms: u64,
    /// Route the poll through `server.canonical_url`.
    pub use_canonical_host: bool,
    /// More stale scripts than this triggers a full reset.
    pub reset_threshold: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            peer_url: None,
            interval_secs: 30,
            timeout_ms: 2_000,
            use_canonical_host: true,
            reset_threshold: 25,
        }
    }
}

/// HTTP listener and addressing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the daemon binds.
    pub listen: String,
    /// How this process reaches itself; defaults to `http://<listen>`.
    pub self_url: Option<String>,
    /// Externally routable application URL loopback addresses map to.
    pub canonical_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8089".to_string(),
            self_url: None,
            canonical_url: None,
        }
    }
}

impl ServerConfig {
    /// Base URL this process is reachable at.
    pub fn self_url(&self) -> String {
        self.self_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.listen))
    }
}

fn make_abs(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

impl Config {
    /// Reads and parses `path`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&s).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Writes the config as TOML, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let s = toml::to_string_pretty(self)?;
        std::fs::write(path, s).map_err(write_err)
    }

    /// `<project_root>/.opsync/opsync.toml`
    pub fn default_path(project_root: &Path) -> PathBuf {
        project_root.join(".opsync").join("opsync.toml")
    }

    /// Returns a copy with every relative path joined onto `base`.
    pub fn rooted(&self, base: &Path) -> Self {
        let mut cfg = self.clone();
        cfg.scan.roots = cfg.scan.roots.iter().map(|p| make_abs(base, p)).collect();
        cfg.watch.roots = cfg.watch.roots.iter().map(|p| make_abs(base, p)).collect();
        cfg.preload.output = make_abs(base, &cfg.preload.output);
        cfg.preload.autoload = make_abs(base, &cfg.preload.autoload);
        cfg.preload.exclude_file = cfg.preload.exclude_file.as_deref().map(|p| make_abs(base, p));
        cfg
    }

    /// Roots the local watcher enumerates.
    pub fn watch_roots(&self) -> &[PathBuf] {
        if self.watch.roots.is_empty() {
            &self.scan.roots
        } else {
            &self.watch.roots
        }
    }
}
