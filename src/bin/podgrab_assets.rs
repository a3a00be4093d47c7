use std::path::PathBuf;

use podgrab_engine::backup::BackupManager;
use podgrab_engine::config::{EngineConfig, CONFIG_ENV_VAR, DATA_ENV_VAR};
use podgrab_engine::download::AssetDownloader;
use podgrab_engine::outcome::Outcome;
use podgrab_engine::paths::{AssetKind, PathResolver, RemoteAsset};
use podgrab_engine::watermark::ImageLabeler;
use podgrab_engine::{metadata, EngineError, Result};
use tracing_subscriber::EnvFilter;

fn main() -> std::result::Result<(), String> {
    init_logging();
    run().map_err(|e| e.to_string())
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,podgrab_engine=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Default)]
struct Args {
    command: Option<String>,
    data_dir: Option<PathBuf>,
    config_dir: Option<PathBuf>,
    kind: Option<String>,
    url: Option<String>,
    title: Option<String>,
    collection: Option<String>,
    prefix: Option<String>,
    path: Option<PathBuf>,
    user_agent: Option<String>,
}

fn run() -> Result<()> {
    let raw: Vec<String> = std::env::args().collect();

    if raw.len() < 2 || raw.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return Ok(());
    }

    let args = parse_args(&raw[1..])?;
    let command = args.command.clone().unwrap_or_default();

    if command == "label" {
        let path = require(args.path.clone(), "--path")?;
        ImageLabeler::new()?.label(&path)?;
        println!("Labeled: {}", path.to_string_lossy());
        return Ok(());
    }

    let config = load_config(&args)?;

    match command.as_str() {
        "fetch" => {
            let kind_raw = require(args.kind.clone(), "--kind")?;
            let kind = AssetKind::parse(&kind_raw)
                .ok_or_else(|| EngineError::InvalidInput(format!("unknown kind: {kind_raw}")))?;
            let mut asset = RemoteAsset::new(
                kind,
                require(args.url.clone(), "--url")?,
                args.title.clone().unwrap_or_default(),
                require(args.collection.clone(), "--collection")?,
            );
            if let Some(prefix) = args.prefix.clone() {
                asset = asset.with_prefix(prefix);
            }

            let outcome = AssetDownloader::new(config)?.acquire(&asset)?;
            let state = if outcome.value.fetched {
                "downloaded"
            } else {
                "already present"
            };
            println!("{state}: {}", outcome.value.path.to_string_lossy());
            report_warnings(&outcome);
        }
        "size" => {
            let url = require(args.url.clone(), "--url")?;
            let size = AssetDownloader::new(config)?.remote_file_size(&url)?;
            println!("{size}");
        }
        "nfo" => {
            let resolver = PathResolver::new(&config);
            let outcome = metadata::write_collection_metadata(
                &resolver,
                &require(args.collection.clone(), "--collection")?,
                args.url.as_deref().unwrap_or(""),
            )?;
            println!("Metadata: {}", outcome.value.to_string_lossy());
            report_warnings(&outcome);
        }
        "backup" => {
            let outcome = BackupManager::new(&config).create_backup()?;
            println!("Backup: {}", outcome.value);
            report_warnings(&outcome);
        }
        "list-backups" => {
            for path in BackupManager::new(&config).list_backups()? {
                println!("{}", path.to_string_lossy());
            }
        }
        other => {
            return Err(EngineError::InvalidInput(format!(
                "unknown command: {other} (try --help)"
            )));
        }
    }

    Ok(())
}

fn parse_args(raw: &[String]) -> Result<Args> {
    let mut args = Args::default();
    let mut i = 0;
    while i < raw.len() {
        let flag = raw[i].as_str();
        if !flag.starts_with("--") {
            if args.command.is_some() {
                return Err(EngineError::InvalidInput(format!("unexpected argument: {flag}")));
            }
            args.command = Some(flag.to_string());
            i += 1;
            continue;
        }

        i += 1;
        let value = raw
            .get(i)
            .cloned()
            .ok_or_else(|| EngineError::InvalidInput(format!("{flag} requires a value")))?;
        match flag {
            "--data-dir" => args.data_dir = Some(PathBuf::from(value)),
            "--config-dir" => args.config_dir = Some(PathBuf::from(value)),
            "--kind" => args.kind = Some(value),
            "--url" => args.url = Some(value),
            "--title" => args.title = Some(value),
            "--collection" => args.collection = Some(value),
            "--prefix" => args.prefix = Some(value),
            "--path" => args.path = Some(PathBuf::from(value)),
            "--user-agent" => args.user_agent = Some(value),
            other => {
                return Err(EngineError::InvalidInput(format!(
                    "unknown arg: {other} (try --help)"
                )));
            }
        }
        i += 1;
    }
    Ok(args)
}

/// Flags win over the DATA/CONFIG environment; PUID/PGID always come from it.
fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_lookup(|key| {
        let flag = match key {
            DATA_ENV_VAR => args.data_dir.as_ref(),
            CONFIG_ENV_VAR => args.config_dir.as_ref(),
            _ => None,
        };
        flag.map(|p| p.to_string_lossy().to_string())
            .or_else(|| std::env::var(key).ok())
    })?;
    if let Some(user_agent) = &args.user_agent {
        config = config.with_user_agent(user_agent.clone());
    }
    Ok(config)
}

fn require<T>(value: Option<T>, flag: &str) -> Result<T> {
    value.ok_or_else(|| EngineError::InvalidInput(format!("missing required {flag}")))
}

fn report_warnings<T>(outcome: &Outcome<T>) {
    for warning in &outcome.warnings {
        eprintln!(
            "warning ({}): {}: {}",
            warning.effect,
            warning.path.to_string_lossy(),
            warning.message
        );
    }
}

fn print_help() {
    println!(
        r#"podgrab_assets

Fetches podcast assets into the data folder and manages database backups.

Usage:
  podgrab_assets fetch --kind episode-audio --url <url> --title <title> --collection <podcast> [--prefix 001]
  podgrab_assets fetch --kind collection-cover --url <url> --collection <podcast>
  podgrab_assets fetch --kind episode-image --url <url> --title <episode-id> --collection <podcast>
  podgrab_assets nfo --collection <podcast> [--url <thumb-url>]
  podgrab_assets size --url <url>
  podgrab_assets label --path <image>
  podgrab_assets backup
  podgrab_assets list-backups

Options:
  --data-dir <path>     Override DATA (asset root)
  --config-dir <path>   Override CONFIG (database, settings and backups)
  --user-agent <value>  Override the persisted user agent

Ownership of created files follows PUID/PGID when both are numeric.
"#
    );
}
