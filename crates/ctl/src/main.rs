use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use opsync_core::api::{
    CompileRequest, CompileResponse, ErrorResponse, ResetResponse, StatusResponse, REGISTRY_PATH,
};
use opsync_core::config::Config;
use opsync_core::manifest::{self, ManifestStats};
use opsync_core::scan::{self, Scanner};
use opsync_core::{AddressResolver, RegistrySnapshot};
use serde::de::DeserializeOwned;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "opsyncctl", version, about = "Preload and opcode cache control")]
struct Args {
    /// Application root; relative config paths are resolved against it.
    #[arg(long, global = true, default_value = ".")]
    project_root: PathBuf,

    /// Config file. Defaults to <project-root>/.opsync/opsync.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Daemon base URL. Defaults to `server.self_url` from the config.
    #[arg(long, global = true)]
    daemon: Option<String>,

    /// Route daemon requests through `server.canonical_url`.
    #[arg(long, global = true, default_value_t = false)]
    canonical: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Scan sources and write the preload script.
    Preload {
        /// Overrides `preload.output`.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List declared types. Scans the configured roots unless files are given.
    Scan { files: Vec<PathBuf> },
    Status,
    Reset,
    /// Compile the daemon's watch set.
    Compile {
        /// Recompile fresh files too.
        #[arg(long)]
        force: bool,
    },
    /// Print the daemon's registry snapshot.
    Registry,
    /// Write a default config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let project_root =
        std::fs::canonicalize(&args.project_root).unwrap_or_else(|_| args.project_root.clone());
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| Config::default_path(&project_root));

    if let Cmd::InitConfig { force } = args.cmd {
        if config_path.exists() && !force {
            anyhow::bail!("{} already exists (use --force)", config_path.display());
        }
        Config::default().save_to(&config_path)?;
        println!("wrote {}", config_path.display());
        return Ok(());
    }

    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?
        .rooted(&project_root);

    let client = reqwest::Client::new();
    let base = || daemon_url(&config, args.daemon.as_deref(), args.canonical);

    match args.cmd {
        Cmd::Preload { output } => {
            let target = output.unwrap_or_else(|| config.preload.output.clone());
            let stats = preload(&config, &target)?;
            println!(
                "wrote {} ({} types, {} excluded, {} duplicates)",
                target.display(),
                stats.emitted,
                stats.excluded,
                stats.duplicates
            );
        }
        Cmd::Scan { files } => {
            let scanner = Scanner::new(config.scan.filter());
            let results: Box<dyn Iterator<Item = _>> = if files.is_empty() {
                Box::new(scanner.scan(&config.scan.roots))
            } else {
                Box::new(scanner.scan_files(&files))
            };
            let types = scan::collect_types(results, |e| eprintln!("{e}"));
            for ty in types {
                println!("{}\t{}\t{}", ty.kind, ty.name, ty.source.path.display());
            }
        }
        Cmd::Status => {
            let resp: StatusResponse = call(client.get(base()?.join("/v1/status")?)).await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        Cmd::Reset => {
            let resp: ResetResponse = call(client.post(base()?.join("/v1/reset")?)).await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        Cmd::Compile { force } => {
            let req = CompileRequest { force };
            let resp: CompileResponse =
                call(client.post(base()?.join("/v1/compile")?).json(&req)).await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        Cmd::Registry => {
            let resp: RegistrySnapshot = call(client.get(base()?.join(REGISTRY_PATH)?)).await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        Cmd::InitConfig { .. } => {}
    }

    Ok(())
}

/// Scan, compile the manifest and write it to `target`.
fn preload(config: &Config, target: &Path) -> anyhow::Result<ManifestStats> {
    let exclusions = config.preload.exclusions()?;
    let scanner = Scanner::new(config.scan.filter());
    let types = scan::collect_types(scanner.scan(&config.scan.roots), |_| {});
    let (manifest, stats) = manifest::compile_manifest(types, &exclusions);
    let script = manifest::render_preload_script(&manifest, &config.preload.autoload);
    manifest::write_artifact(target, &script)?;
    info!(path = %target.display(), types = stats.emitted, "preload script written");
    Ok(stats)
}

fn daemon_url(config: &Config, explicit: Option<&str>, canonical: bool) -> anyhow::Result<reqwest::Url> {
    let raw = explicit
        .map(str::to_string)
        .unwrap_or_else(|| config.server.self_url());
    let resolver = AddressResolver::new(config.server.canonical_url.clone());
    resolver
        .resolve(&raw, canonical)
        .with_context(|| format!("invalid daemon url {raw}"))
}

async fn call<T: DeserializeOwned>(req: reqwest::RequestBuilder) -> anyhow::Result<T> {
    let resp = req.send().await.context("daemon request failed")?;
    let status = resp.status();
    if !status.is_success() {
        let detail = resp
            .json::<ErrorResponse>()
            .await
            .map(|e| e.error)
            .unwrap_or_default();
        anyhow::bail!("daemon answered {status}: {detail}");
    }
    resp.json().await.context("decoding daemon response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn daemon_url_uses_canonical_host_only_when_asked() {
        let mut config = Config::default();
        config.server.canonical_url = Some("https://app.example.test".into());

        let plain = daemon_url(&config, None, false).unwrap();
        assert_eq!(plain.as_str(), "http://127.0.0.1:8089/");

        let rebased = daemon_url(&config, Some("http://127.0.0.1:8089/"), true).unwrap();
        assert_eq!(rebased.as_str(), "https://app.example.test/");

        assert!(daemon_url(&config, Some("::nope"), true).is_err());
    }

    #[test]
    fn preload_writes_artifact_and_fails_on_unwritable_target() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/A.php"), "<?php namespace App; class A {}").unwrap();
        let config = Config::default().rooted(dir.path());

        let target = dir.path().join("preload.php");
        let stats = preload(&config, &target).unwrap();
        assert_eq!(stats.emitted, 1);
        assert!(std::fs::read_to_string(&target)
            .unwrap()
            .contains("\\class_exists('App\\\\A');"));

        // A regular file where the parent directory should be.
        let blocked = target.join("nested/preload.php");
        assert!(preload(&config, &blocked).is_err());
    }
}
