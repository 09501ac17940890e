//! worldstore binary
//!
//! Loads the configured worlds, hands them to the host channel and keeps
//! their locks alive; also carries the operator commands.
//!
//! ## Commands
//!
//! | Command                            | Effect                                       |
//! |------------------------------------|----------------------------------------------|
//! | `serve`                            | startup load, handoff, heartbeat until SIGINT |
//! | `unlock <world> <backend>`         | remove a lock left by a crashed process      |
//! | `list [backend]`                   | worlds stored in a backend                   |
//! | `inspect <file>`                   | header and content summary of a world file   |
//!
//! ## Configuration (TOML via `--config` / `WORLDSTORE_CONFIG`, env `WORLDSTORE__*`)
//!
//! See `worldstore::config` for the keys.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use worldstore::{
    format::{self, Header},
    host::ChannelHost,
    service::WorldService,
    BackendRegistry, FileBackend, HostAdapter, HostVersion, StoreConfig, WorldLoader,
    WorldProperties,
};

const DEFAULT_HOST_VERSION: HostVersion = HostVersion::V1_14_R1;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "worldstore", about = "World persistence service", version)]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "WORLDSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Override `data_dir` of the file backend
    #[arg(long, env = "WORLDSTORE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Host package name or version segment, e.g. `v1_12_R1`
    #[arg(long, env = "WORLDSTORE_HOST_VERSION")]
    host_version: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load configured worlds and hold their locks until interrupted
    Serve,
    /// Remove whatever lock a backend records for a world
    Unlock { world: String, backend: String },
    /// List the worlds a backend stores
    List {
        #[arg(default_value = "file")]
        backend: String,
    },
    /// Print the header and a summary of a world file
    Inspect { file: PathBuf },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("worldstore=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = StoreConfig::load(args.config.as_deref())
        .context("Failed to read worldstore configuration")?;
    if let Some(dir) = args.data_dir.clone() {
        config.data_dir = dir;
    }
    if let Some(version) = args.host_version.clone() {
        config.host_version = Some(version);
    }

    match args.command {
        Command::Serve => serve(config).await,
        Command::Unlock { world, backend } => {
            let loader = build_loader(&config)?;
            if loader.force_unlock(&backend, &world)? {
                println!("Unlocked world '{}' in backend '{}'", world, backend);
            } else {
                println!("World '{}' was not locked in backend '{}'", world, backend);
            }
            Ok(())
        }
        Command::List { backend } => {
            let loader = build_loader(&config)?;
            let store = loader.registry().resolve(&backend)?;
            for world in store.list_worlds()? {
                let lock = store.lock_info(&world)?;
                match lock {
                    Some(info) => println!("{}  (locked by {})", world, info.owner),
                    None => println!("{}", world),
                }
            }
            Ok(())
        }
        Command::Inspect { file } => inspect(&file),
    }
}

fn host_version(config: &StoreConfig) -> Result<HostVersion> {
    match &config.host_version {
        Some(name) => Ok(HostVersion::probe(name)?),
        None => Ok(DEFAULT_HOST_VERSION),
    }
}

fn build_loader(config: &StoreConfig) -> Result<WorldLoader> {
    let version = host_version(config)?;
    let registry = Arc::new(BackendRegistry::new());
    let files = FileBackend::new(&config.data_dir)
        .with_context(|| format!("Failed to open {}", config.data_dir.display()))?
        .with_policy(config.lock_policy());
    registry.register("file", Arc::new(files))?;
    Ok(WorldLoader::new(registry, version.uses_modern_encoding()))
}

async fn serve(config: StoreConfig) -> Result<()> {
    let version = host_version(&config)?;
    let loader = Arc::new(build_loader(&config)?);
    let service = WorldService::new(loader, config.load_timeout());

    log::info!(
        "Starting worldstore (host={}, data_dir={}, {} configured world(s))",
        version,
        config.data_dir.display(),
        config.worlds.len()
    );

    let (host, mut worlds_rx) = ChannelHost::new(version);
    let tick = tokio::spawn(async move {
        while let Some(world) = worlds_rx.recv().await {
            log::info!(
                "Host received world {} ({} chunk(s), {})",
                world.name(),
                world.chunk_count(),
                world.encoding()
            );
        }
    });

    let report = service.load_configured_worlds_on_startup(&config.worlds).await;
    for failure in &report.failures {
        log::error!("[{}] {}", failure.kind, failure.message);
    }
    let handed = service.hand_off(report.loaded, &host);
    log::info!("{} world(s) handed to host {}", handed, host.version());

    service.run_heartbeat(config.heartbeat_interval()).await;

    service.unload_all().await;
    drop(host);
    tick.await.context("Host channel task failed")?;
    Ok(())
}

fn inspect(file: &Path) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let header = Header::parse(&bytes)?;
    println!("version      {}", header.version);
    println!("encoding     {}", header.encoding);
    println!("compression  {:?}", header.compression);
    println!("payload      {} bytes", header.payload_len);

    let name = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("world");
    let world = format::decode("file", name, &bytes, WorldProperties::read_only())?;
    if world.version() != header.version {
        bail!("decoded version {} differs from header", world.version());
    }
    println!("chunks       {}", world.chunk_count());
    println!("tiles        {}", world.tile_entities().len());
    println!("entities     {}", world.entities().len());
    println!("extra keys   {}", world.extra().len());
    Ok(())
}
