//! racetrack - command-line access to race history and the offline asset cache.

use std::io;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use racetrack_core::offline::{AssetRequest, CacheMode, FetchOutcome, WorkerState};
use racetrack_core::{
    CacheStorage, Config, FileStorage, HttpFetcher, OfflineWorker, RaceDatabase, RaceRecord,
    RaceStatus, RecordStore,
};

#[derive(Parser)]
#[command(name = "racetrack", version, about = "Track race sessions and cache app assets offline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage the stored race history
    #[command(subcommand)]
    Races(RacesCommand),
    /// Show or change the current race configuration
    #[command(subcommand)]
    RaceConfig(RaceConfigCommand),
    /// Manage the offline asset cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand)]
enum RacesCommand {
    /// List all stored races
    List {
        /// Print the raw JSON array
        #[arg(long)]
        json: bool,
    },
    /// Show a single race as JSON
    Show { id: String },
    /// Create and store a new race
    New(NewRace),
    /// Store a race given as JSON, replacing any race with the same id
    Put { json: String },
    /// Change the status of a stored race
    SetStatus { id: String, status: RaceStatus },
    /// Delete a race by id
    Delete { id: String },
    /// Remove every stored race
    Clear,
}

#[derive(Args)]
struct NewRace {
    #[arg(long, default_value = "practice")]
    status: RaceStatus,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    laps: Option<u32>,
    /// Racer name, repeat for several racers
    #[arg(long = "racer")]
    racers: Vec<String>,
}

#[derive(Subcommand)]
enum RaceConfigCommand {
    /// Print the current race configuration (a new practice session if none)
    Show,
    /// Use a stored race as the current configuration
    Set { id: String },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Precache the asset manifest for the configured version
    Install {
        /// Activate right after a successful install
        #[arg(long)]
        activate: bool,
    },
    /// Activate the installed version, deleting caches of other versions
    Activate,
    /// Request a URL through the offline cache
    Fetch {
        url: String,
        #[arg(long)]
        only_if_cached: bool,
    },
    /// Show cache partitions and their entries
    Status,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Command::Races(cmd) => run_races(&config, cmd),
        Command::RaceConfig(cmd) => run_race_config(&config, cmd),
        Command::Cache(cmd) => run_cache(&config, cmd).await,
    }
}

fn open_store(config: &Config) -> Result<RecordStore<FileStorage>> {
    let dir = config.data_dir()?;
    let storage = FileStorage::new(dir.clone())
        .with_context(|| format!("Failed to open storage at {}", dir.display()))?;
    let mut store = RecordStore::new(storage);
    store.subscribe(|| info!("Race history changed"));
    Ok(store)
}

fn find(store: &RecordStore<FileStorage>, id: &str) -> Result<RaceRecord> {
    store
        .get_all()
        .into_iter()
        .find(|r| r.id() == id)
        .ok_or_else(|| anyhow::anyhow!("No race with id {}", id))
}

fn ensure(ok: bool, what: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        anyhow::bail!("{} failed, see log output (RUST_LOG=warn) for details", what)
    }
}

fn run_races(config: &Config, cmd: RacesCommand) -> Result<()> {
    let store = open_store(config)?;

    match cmd {
        RacesCommand::List { json } => {
            let races = store.get_all();
            if json {
                println!("{}", serde_json::to_string_pretty(&races)?);
            } else if races.is_empty() {
                println!("No races stored");
            } else {
                for race in &races {
                    let laps = race
                        .lap_count
                        .map(|l| format!("{} laps", l))
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<36}  {:<8}  {:<8}  {} racer(s)  {}",
                        race.id(),
                        race.status,
                        laps,
                        race.racers.len(),
                        race.label()
                    );
                }
            }
        }
        RacesCommand::Show { id } => {
            let race = find(&store, &id)?;
            println!("{}", serde_json::to_string_pretty(&race)?);
        }
        RacesCommand::New(new) => {
            let mut race = RaceRecord::new(new.status);
            race.name = new.name;
            race.lap_count = new.laps;
            for racer in new.racers {
                race.add_racer(racer, None);
            }
            let id = race.id().to_string();
            ensure(store.put(race), "Storing race")?;
            println!("{}", id);
        }
        RacesCommand::Put { json } => {
            let race: RaceRecord = serde_json::from_str(&json).context("Invalid race JSON")?;
            ensure(store.put(race), "Storing race")?;
        }
        RacesCommand::SetStatus { id, status } => {
            let mut race = find(&store, &id)?;
            race.status = status;
            ensure(store.put(race), "Updating race")?;
        }
        RacesCommand::Delete { id } => {
            ensure(store.delete(&id), "Deleting race")?;
        }
        RacesCommand::Clear => {
            ensure(store.set_all(&[]), "Clearing races")?;
        }
    }
    Ok(())
}

fn run_race_config(config: &Config, cmd: RaceConfigCommand) -> Result<()> {
    let store = open_store(config)?;

    match cmd {
        RaceConfigCommand::Show => {
            let current = store.race_config_or_default();
            println!("{}", serde_json::to_string_pretty(&current)?);
        }
        RaceConfigCommand::Set { id } => {
            let race = find(&store, &id)?;
            ensure(store.set_race_config(&race), "Saving race config")?;
        }
    }
    Ok(())
}

async fn run_cache(config: &Config, cmd: CacheCommand) -> Result<()> {
    let manifest = config.manifest()?;
    let caches = CacheStorage::new(config.cache_dir()?)?;
    let fetcher = HttpFetcher::new()?;

    match cmd {
        CacheCommand::Install { activate } => {
            let mut worker = OfflineWorker::new(manifest, caches, fetcher);
            let count = worker.install().await?;
            println!("Cached {} assets in {}", count, worker.cache_names().static_name);
            if activate {
                for name in worker.activate()? {
                    println!("Deleted stale cache {}", name);
                }
            }
        }
        CacheCommand::Activate => {
            let mut worker = OfflineWorker::resume_waiting(manifest, caches, fetcher);
            if worker.state() != WorkerState::Installed {
                anyhow::bail!("Version {} is not installed; run `cache install` first", config.version());
            }
            for name in worker.activate()? {
                println!("Deleted stale cache {}", name);
            }
        }
        CacheCommand::Fetch { url, only_if_cached } => {
            let worker = OfflineWorker::resume(manifest, caches, fetcher);
            let mut request = AssetRequest::parse(&url)?;
            if only_if_cached {
                request = request.with_cache_mode(CacheMode::OnlyIfCached);
            }
            match worker.handle_fetch(&request).await? {
                FetchOutcome::Served { response, source } => {
                    eprintln!("{} {:?} ({} bytes)", response.status, source, response.body.len());
                    println!("{}", String::from_utf8_lossy(&response.body));
                }
                FetchOutcome::Passthrough(reason) => {
                    println!("Not handled by the offline cache: {:?}", reason);
                }
            }
        }
        CacheCommand::Status => {
            let names = manifest.cache_names();
            println!("Version {} ({} assets in manifest)", manifest.version(), manifest.to_cache().len());
            for name in caches.keys()? {
                let marker = if names.contains(&name) { "" } else { " (stale)" };
                let cache = caches.open(&name)?;
                let entries = cache.entries()?;
                println!("{}{}: {} entries", name, marker, entries.len());
                for entry in entries {
                    println!("  {:>3}  {:>8}  {}", entry.data.status, entry.age_display(), entry.data.url);
                }
            }
        }
    }
    Ok(())
}
