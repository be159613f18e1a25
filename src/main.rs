use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};

use gigsync::cache::{CacheStore, DurableStorage, SqliteStorage};
use gigsync::clock::SystemClock;
use gigsync::config::Config;
use gigsync::logging;
use gigsync::market::{CacheEnvironment, CachedMarketplaceClient, MarketplaceClient};
use gigsync::offline::{ActionQueue, PushHandler};

#[derive(Parser, Debug)]
#[command(name = "gigsync")]
#[command(about = "Offline cache and sync for the freelance marketplace")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/gigsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Durable entry counts per namespace
  Stats,
  /// Print a cached entry as JSON
  Get { namespace: String, key: String },
  /// Drop every entry in a namespace
  Clear { namespace: String },
  /// Inspect or replay offline actions
  Queue {
    #[command(subcommand)]
    action: QueueCommand,
  },
  /// Refresh opportunities and skills from the origin
  Refresh,
  /// Render a push payload as the notification that would be shown
  Push { payload: String },
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  List,
  Drain,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let data_dir = Config::data_dir()?;

  let _guard = match logging::init(&data_dir.join("logs")) {
    Ok(guard) => Some(guard),
    Err(e) => {
      logging::init_stderr();
      tracing::warn!(error = %e, "File logging unavailable, using stderr");
      None
    }
  };

  let storage: Arc<dyn DurableStorage> = Arc::new(
    SqliteStorage::open(&data_dir.join("cache.db"))
      .map_err(|e| eyre!("Failed to open cache database: {}", e))?,
  );
  let clock = Arc::new(SystemClock);
  let cache = CacheStore::new(config.namespaces.clone(), storage.clone(), clock.clone());
  let queue = ActionQueue::open(storage, clock, config.queue.retry);

  match args.command {
    Command::Stats => {
      for name in cache.namespace_names() {
        println!("{:<16} {}", name, cache.durable_keys(name)?.len());
      }
    }
    Command::Get { namespace, key } => match cache.get_entry(&namespace, &key)? {
      Some(entry) => println!("{}", serde_json::to_string_pretty(&entry.data)?),
      None => println!("No fresh entry for {} in {}", key, namespace),
    },
    Command::Clear { namespace } => {
      cache.clear(&namespace)?;
      println!("Cleared {}", namespace);
    }
    Command::Queue { action } => match action {
      QueueCommand::List => {
        for pending in queue.pending() {
          println!(
            "{}  {:<24} attempts={}",
            pending.id, pending.kind, pending.attempts
          );
        }
        for dead in queue.dead_letters() {
          println!("{}  {:<24} dead", dead.id, dead.kind);
        }
      }
      QueueCommand::Drain => {
        let client = market_client(&config, cache)?;
        let report = queue.drain(&client).await;
        println!(
          "processed={} remaining={}",
          report.processed, report.remaining
        );
        if let Some(id) = report.halted_on {
          println!("halted on {}", id);
        }
      }
    },
    Command::Refresh => {
      let refreshed = market_client(&config, cache)?.refresh_read_only().await?;
      println!("Refreshed {} records", refreshed);
    }
    Command::Push { payload } => {
      let notification =
        PushHandler::new(config.notifications.clone()).render(Some(payload.as_bytes()));
      println!("{}", serde_json::to_string_pretty(&notification)?);
    }
  }

  Ok(())
}

fn market_client(
  config: &Config,
  cache: CacheStore,
) -> Result<CachedMarketplaceClient<MarketplaceClient>> {
  let env = CacheEnvironment::new(&config.origin.locale, &config.origin.region);
  Ok(CachedMarketplaceClient::new(
    MarketplaceClient::new(config)?,
    cache,
    env,
  ))
}
