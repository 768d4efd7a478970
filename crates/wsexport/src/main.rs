use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use wsexport_core::api::{MediaWikiClient, MediaWikiClientConfig, WikiApi};
use wsexport_core::cache::SqliteCache;
use wsexport_core::config::{AppConfig, load_config};
use wsexport_core::onwiki::OnWikiConfig;
use wsexport_core::refresh::refresh_with_api;
use wsexport_core::storage::FileStore;

const CACHE_DB_FILENAME: &str = "wsexport-cache.db";

#[derive(Debug, Parser)]
#[command(
    name = "wsexport",
    version,
    about = "Refresh and cache wiki-hosted export assets"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    cache_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    config: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            cache_dir: cli.cache_dir.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Force-update all artifacts for a language")]
    Refresh(RefreshArgs),
    #[command(about = "Print the default export font configured on the wiki")]
    Font(FontArgs),
    Cache(CacheArgs),
}

#[derive(Debug, Args)]
struct RefreshArgs {
    #[arg(short, long, value_name = "LANG")]
    lang: String,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct FontArgs {
    #[arg(short, long, value_name = "LANG")]
    lang: String,
}

#[derive(Debug, Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheSubcommand,
}

#[derive(Debug, Subcommand)]
enum CacheSubcommand {
    #[command(about = "Delete expired cache entries")]
    Purge,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Commands::Refresh(args) => run_refresh(&runtime, args),
        Commands::Font(args) => run_font(&runtime, args),
        Commands::Cache(CacheArgs { command }) => match command {
            CacheSubcommand::Purge => run_cache_purge(&runtime),
        },
    }
}

fn run_refresh(runtime: &RuntimeOptions, args: RefreshArgs) -> Result<()> {
    let config = load_runtime_config(runtime)?;
    let cache_dir = resolve_cache_dir(runtime, &config);

    let mut api = MediaWikiClient::new(MediaWikiClientConfig::from_config(&config))?;
    api.set_lang(&args.lang);
    let mut store = FileStore::new(&cache_dir);

    let report = refresh_with_api(&mut api, &mut store)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("refresh {}", report.lang);
        println!("store: {}", normalize_path(&cache_dir));
        println!("updated: {}", report.updated);
        println!("failed: {}", report.failed);
        for artifact in &report.artifacts {
            match &artifact.detail {
                Some(detail) => println!("artifact.{}: {detail}", artifact.name),
                None => println!("artifact.{}: updated", artifact.name),
            }
        }
        println!("request_count: {}", report.request_count);
    }

    if !report.success {
        bail!(
            "{} of {} artifacts failed for {}",
            report.failed,
            report.artifacts.len(),
            report.lang
        );
    }
    Ok(())
}

fn run_font(runtime: &RuntimeOptions, args: FontArgs) -> Result<()> {
    let config = load_runtime_config(runtime)?;
    let cache_dir = resolve_cache_dir(runtime, &config);

    let api = MediaWikiClient::new(MediaWikiClientConfig::from_config(&config))?;
    let cache = SqliteCache::open(&cache_dir.join(CACHE_DB_FILENAME))?;
    let onwiki = OnWikiConfig::new(Box::new(api), Box::new(cache));

    let font = onwiki.default_font(&args.lang)?;
    println!("{font}");
    Ok(())
}

fn run_cache_purge(runtime: &RuntimeOptions) -> Result<()> {
    let config = load_runtime_config(runtime)?;
    let cache_dir = resolve_cache_dir(runtime, &config);

    let cache = SqliteCache::open(&cache_dir.join(CACHE_DB_FILENAME))?;
    let removed = cache.purge_expired()?;
    println!("cache purge");
    println!("db_path: {}", normalize_path(&cache_dir.join(CACHE_DB_FILENAME)));
    println!("removed: {removed}");
    Ok(())
}

fn load_runtime_config(runtime: &RuntimeOptions) -> Result<AppConfig> {
    match &runtime.config {
        Some(path) => load_config(path),
        None => Ok(AppConfig::default()),
    }
}

fn resolve_cache_dir(runtime: &RuntimeOptions, config: &AppConfig) -> PathBuf {
    runtime
        .cache_dir
        .clone()
        .unwrap_or_else(|| config.cache_dir())
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
