use chrono::{DateTime, Duration, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use user_data_explorer::aggregate::{AggregateOptions, TimeBucketing, aggregate_with};
use user_data_explorer::downloader::{to_csv, to_json};
use user_data_explorer::{
    AggregateResult, CollectionSnapshot, ExplorerConfig, ExplorerError, FirestoreCollection,
    Result, SnapshotStore, Source, fetch_live, load_snapshot, normalize,
};

/// Explore the user collection: pull it, keep snapshots, summarize.
#[derive(Debug, Parser)]
#[command(name = "user-data-explorer", version)]
pub struct Cli {
    /// TOML settings file.
    #[arg(long, global = true, env = "EXPLORER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Pull the latest data from the live collection.
    Pull {
        /// Also write the pulled data as a new snapshot.
        #[arg(long)]
        save: bool,
    },
    /// List saved snapshots, most recent first.
    List,
    /// Load a snapshot and print its normalized table.
    Show { snapshot: PathBuf },
    /// Compute metrics over live data or a snapshot.
    Aggregate {
        #[command(flatten)]
        source: SourceArgs,

        /// Metric to compute, e.g. `row_count` or `age_present_count`. Repeatable.
        #[arg(long = "metric", required = true)]
        metrics: Vec<String>,

        /// Start of the first time bucket (RFC 3339).
        #[arg(long, value_parser = parse_rfc3339)]
        bucket_origin: Option<DateTime<Utc>>,

        /// Time bucket width in seconds.
        #[arg(long, default_value_t = 86_400)]
        bucket_width_secs: i64,
    },
    /// Export a snapshot's table.
    Export {
        snapshot: PathBuf,

        /// Write CSV instead of JSON.
        #[arg(long)]
        csv: bool,
    },
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct SourceArgs {
    /// Pull from the live collection.
    #[arg(long)]
    live: bool,

    /// Read a saved snapshot file.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Read the most recent saved snapshot.
    #[arg(long)]
    latest: bool,
}

fn parse_rfc3339(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

pub fn run(cli: Cli) -> Result<()> {
    let config = ExplorerConfig::load(cli.config.as_deref())?;
    let store = SnapshotStore::new(&config.snapshot_dir, &config.collection);

    match cli.command {
        Command::Pull { save } => {
            let collection = FirestoreCollection::from_config(&config)?;
            let snapshot = informational_as_empty(fetch_live(&collection))?;
            println!(
                "pulled {} records at {}",
                snapshot.len(),
                snapshot.captured_at.to_rfc3339()
            );
            if save {
                let path = store.save(&snapshot)?;
                println!("saved {}", path.display());
            }
        }
        Command::List => {
            for line in list_lines(&store)? {
                println!("{line}");
            }
        }
        Command::Show { snapshot } => print_json(&show(&snapshot)?)?,
        Command::Aggregate {
            source,
            metrics,
            bucket_origin,
            bucket_width_secs,
        } => {
            let options = bucket_options(bucket_origin, bucket_width_secs)?;
            let snapshot = acquire(&config, &store, &source)?;
            let result = aggregate_with(&normalize(&snapshot), &metrics, &options)?;
            print_json(&serde_json::to_value(&result).map_err(std::io::Error::other)?)?;
        }
        Command::Export { snapshot, csv } => print!("{}", export(&snapshot, csv)?),
    }
    Ok(())
}

fn list_lines(store: &SnapshotStore) -> Result<Vec<String>> {
    let snapshots = store.list_snapshots()?;
    if snapshots.is_empty() {
        return Ok(vec!["No user data snapshots exist".to_string()]);
    }
    Ok(snapshots
        .into_iter()
        .map(|entry| format!("{}\t{}", entry.captured_at.to_rfc3339(), entry.path.display()))
        .collect())
}

fn show(path: &Path) -> Result<serde_json::Value> {
    let table = normalize(&load_snapshot(path)?);
    Ok(to_json(&table, &AggregateResult::default()))
}

fn export(path: &Path, csv: bool) -> Result<String> {
    let table = normalize(&load_snapshot(path)?);
    if csv {
        return Ok(to_csv(&table));
    }
    let text = serde_json::to_string_pretty(&to_json(&table, &AggregateResult::default()))
        .map_err(std::io::Error::other)?;
    Ok(format!("{text}\n"))
}

fn bucket_options(origin: Option<DateTime<Utc>>, width_secs: i64) -> Result<AggregateOptions> {
    let Some(origin) = origin else {
        return Ok(AggregateOptions::default());
    };
    let width = Duration::try_seconds(width_secs).ok_or_else(|| {
        ExplorerError::Configuration(format!(
            "bucket width of {width_secs} seconds is out of range"
        ))
    })?;
    Ok(AggregateOptions {
        time_buckets: Some(TimeBucketing::new(origin, width)),
    })
}

fn acquire(
    config: &ExplorerConfig,
    store: &SnapshotStore,
    args: &SourceArgs,
) -> Result<CollectionSnapshot> {
    if args.live {
        let collection = FirestoreCollection::from_config(config)?;
        return informational_as_empty(Source::Live(&collection).acquire());
    }
    let path = match (&args.snapshot, args.latest) {
        (Some(path), _) => path.clone(),
        (None, true) => store
            .latest()?
            .map(|entry| entry.path)
            .ok_or_else(|| ExplorerError::NotFound {
                path: store.dir().to_path_buf(),
            })?,
        (None, false) => {
            return Err(ExplorerError::Configuration(
                "choose --live, --snapshot or --latest".to_string(),
            ));
        }
    };
    Source::Snapshot(path).acquire()
}

/// An empty collection is shown as an empty state, not a failure.
fn informational_as_empty(
    pulled: Result<CollectionSnapshot>,
) -> Result<CollectionSnapshot> {
    match pulled {
        Err(err) if err.is_informational() => {
            println!("{err}");
            err.into_empty_snapshot()
        }
        other => other,
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    println!("{text}");
    Ok(())
}
