use anyhow::{anyhow, Context, Result};
use clap::Parser;
use dirkeep_core::{
    ConfigLayer, DaemonConfig, IntentStore, NotifyWatchService, Pattern, ShutdownOutcome,
    Supervisor, INTENT_COLLECTION,
};
use dirkeep_remote_s3::S3Remote;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dirkeep", version, about = "dirkeep – back up a directory tree to S3")]
struct Cli {
    /// Optional settings file (YAML / JSON); flags and environment take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory to watch and back up
    #[arg(short = 'd', long, env = "BACKUP_DIR")]
    backup_dir: Option<PathBuf>,

    #[arg(short, long, env = "S3_BUCKET")]
    bucket: Option<String>,

    /// Key prefix for every uploaded object
    #[arg(short, long, env = "S3_BUCKET_PREFIX")]
    prefix: Option<String>,

    /// How often pending changes are pushed to S3
    #[arg(long, env = "S3_BACKUP_INTERVAL")]
    backup_interval: Option<u64>,

    /// seconds / minutes / hours
    #[arg(long, env = "S3_BACKUP_INTERVAL_UNIT")]
    backup_interval_unit: Option<String>,

    /// How often collected changes are written to the local queue
    #[arg(long, env = "DB_PERSISTENCE_INTERVAL")]
    persist_interval: Option<u64>,

    #[arg(long, env = "DB_PERSISTENCE_INTERVAL_UNIT")]
    persist_interval_unit: Option<String>,

    /// SQLite file holding the pending-change queue
    #[arg(long, env = "DIRKEEP_STORE")]
    store: Option<PathBuf>,

    #[arg(long, env = "DIRKEEP_SHUTDOWN_TIMEOUT")]
    shutdown_timeout_secs: Option<u64>,

    #[arg(long, env = "DIRKEEP_RENAME_TTL")]
    rename_ttl_secs: Option<u64>,

    /// Glob of paths to back up (repeatable); everything when absent
    #[arg(long)]
    include: Vec<String>,

    /// Glob of paths to skip (repeatable)
    #[arg(long)]
    exclude: Vec<String>,

    /// Custom S3 endpoint, e.g. a MinIO server
    #[arg(long, env = "S3_ENDPOINT")]
    endpoint: Option<String>,

    #[arg(long, env = "S3_REGION")]
    region: Option<String>,
}

impl Cli {
    fn into_layer(self) -> (Option<PathBuf>, ConfigLayer) {
        let layer = ConfigLayer {
            backup_dir: self.backup_dir,
            bucket: self.bucket,
            prefix: self.prefix,
            backup_interval: self.backup_interval,
            backup_interval_unit: self.backup_interval_unit,
            persist_interval: self.persist_interval,
            persist_interval_unit: self.persist_interval_unit,
            store: self.store,
            shutdown_timeout_secs: self.shutdown_timeout_secs,
            rename_ttl_secs: self.rename_ttl_secs,
            include: self.include.into_iter().map(Pattern).collect(),
            exclude: self.exclude.into_iter().map(Pattern).collect(),
            endpoint: self.endpoint,
            region: self.region,
        };
        (self.config, layer)
    }
}

fn read_config_file(path: &Path) -> Result<ConfigLayer> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("read config {} failed: {e}", path.display()))?;
    // Detect format by extension
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
    let layer = match ext {
        "json" => serde_json::from_str(&text)?,
        _ => serde_yaml::from_str(&text)?,
    };
    Ok(layer)
}

fn load_config(cli: Cli) -> Result<DaemonConfig> {
    let (file, flags) = cli.into_layer();
    let layer = match file {
        Some(path) => flags.or(read_config_file(&path)?),
        None => flags,
    };
    let mut cfg = layer.build()?;
    cfg.backup_dir = std::fs::canonicalize(&cfg.backup_dir)
        .with_context(|| format!("backup directory {}", cfg.backup_dir.display()))?;
    Ok(cfg)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Arc::new(load_config(Cli::parse())?);

    let store_path = cfg.store_path.clone();
    let store = tokio::task::spawn_blocking(move || IntentStore::open(&store_path, INTENT_COLLECTION))
        .await?
        .with_context(|| format!("open durable store {}", cfg.store_path.display()))?;
    let remote = S3Remote::connect(cfg.bucket.clone(), cfg.endpoint.clone(), cfg.region.clone()).await?;

    let daemon = Supervisor::new(cfg.clone(), Arc::new(store), Arc::new(remote))?
        .start(NotifyWatchService::new())?;

    info!("dirkeep running... press Ctrl+C to stop");
    shutdown_signal().await;
    info!("stop requested, press Ctrl+C again to force");

    match daemon.shutdown(shutdown_signal()).await {
        ShutdownOutcome::Graceful => {
            info!("stopped");
            Ok(ExitCode::SUCCESS)
        }
        outcome => {
            // blocking store work may still hold runtime threads; leave without joining them
            warn!(?outcome, "forced termination");
            std::process::exit(1)
        }
    }
}
