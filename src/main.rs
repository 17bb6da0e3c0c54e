use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::LevelFilter;
use simple_logger::SimpleLogger;

use transit_feed_pack::codec::calendar::date_to_int;
use transit_feed_pack::{
    apply, diff, inspect_path, merge, Delta, DiffOptions, DirectorySource, Snapshot,
    SnapshotBuilder, WriteOptions,
};

#[derive(Parser, Debug)]
#[command(name = "feedpack")]
#[command(about = "Packs transit feeds into compact snapshots and deltas")]
#[command(version)]
struct Cli {
    /// More output; repeat for debug logging.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Builds a snapshot from a directory of GTFS text files.
    Pack {
        /// Directory containing agency.txt, stops.txt, ...
        dir: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Previous snapshot; ids and strings continue from it.
        #[arg(long)]
        prev: Option<PathBuf>,

        /// Where the feed was downloaded from.
        #[arg(long)]
        url: Option<String>,

        /// Feed date as YYYYMMDD, defaults to today.
        #[arg(long)]
        date: Option<u32>,

        /// Store blocks without compression.
        #[arg(long)]
        raw: bool,
    },
    /// Prints header fields and block statistics as JSON.
    Info { file: PathBuf },
    /// Writes the delta between two snapshots.
    Diff {
        old: PathBuf,
        new: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Reference date for calendar changes, defaults to today.
        #[arg(long)]
        today: Option<NaiveDate>,

        #[arg(long)]
        raw: bool,
    },
    /// Combines two consecutive deltas into one.
    Merge {
        first: PathBuf,
        second: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        raw: bool,
    },
    /// Applies a delta to its base snapshot.
    Apply {
        snapshot: PathBuf,
        delta: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        raw: bool,
    },
}

fn write_options(raw: bool) -> WriteOptions {
    WriteOptions {
        compress: raw.then_some(false),
        ..WriteOptions::default()
    }
}

fn open_snapshot(path: &Path) -> Result<Snapshot> {
    Snapshot::open(path).with_context(|| format!("Failed to read snapshot {:?}", path))
}

fn open_delta(path: &Path) -> Result<Delta> {
    Delta::open(path).with_context(|| format!("Failed to read delta {:?}", path))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    SimpleLogger::new().with_level(level).init()?;

    match cli.command {
        Command::Pack {
            dir,
            output,
            prev,
            url,
            date,
            raw,
        } => {
            let date = date.unwrap_or_else(|| date_to_int(chrono::Local::now().date_naive()));
            let builder = match &prev {
                Some(path) => SnapshotBuilder::continue_from(&open_snapshot(path)?, date),
                None => SnapshotBuilder::new(1, date),
            };
            let builder = match url {
                Some(url) => builder.original_url(&url),
                None => builder,
            };
            log::info!("Loading GTFS tables from {:?}", dir);
            let snapshot = builder
                .compressed(!raw)
                .show_progress(true)
                .build(&mut DirectorySource::new(&dir))
                .with_context(|| format!("Failed to pack {:?}", dir))?;
            log::info!("Writing snapshot to {:?}", output);
            snapshot.save(&output, &WriteOptions::default())?;
        }
        Command::Info { file } => {
            let info = inspect_path(&file).with_context(|| format!("Failed to inspect {:?}", file))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Diff {
            old,
            new,
            output,
            today,
            raw,
        } => {
            let mut old = open_snapshot(&old)?;
            let mut new = open_snapshot(&new)?;
            let options = match today {
                Some(today) => DiffOptions { today },
                None => DiffOptions::default(),
            };
            let delta = diff(&mut old, &mut new, &options)?;
            log::info!("Writing delta to {:?}", output);
            delta.save(&output, &write_options(raw))?;
        }
        Command::Merge {
            first,
            second,
            output,
            raw,
        } => {
            let mut first = open_delta(&first)?;
            let mut second = open_delta(&second)?;
            let merged = merge(&mut first, &mut second)?;
            log::info!("Writing delta to {:?}", output);
            merged.save(&output, &write_options(raw))?;
        }
        Command::Apply {
            snapshot,
            delta,
            output,
            raw,
        } => {
            let mut base = open_snapshot(&snapshot)?;
            let mut delta = open_delta(&delta)?;
            let result = apply(&mut base, &mut delta)?;
            log::info!("Writing snapshot to {:?}", output);
            result.save(&output, &write_options(raw))?;
        }
    }
    Ok(())
}
