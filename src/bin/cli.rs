//! StrataKV CLI
//!
//! Administrative command-line tool over a local database directory.

use std::process;

use clap::{Parser, Subcommand};
use stratakv::{BloomFilterPolicy, Config, Engine, Range, ReadOptions};
use tracing_subscriber::{fmt, EnvFilter};

/// StrataKV CLI
#[derive(Parser, Debug)]
#[command(name = "stratakv-cli")]
#[command(about = "Inspect and edit a StrataKV database")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./stratakv_data")]
    data_dir: String,

    /// Bloom filter bits per key (0 disables filters)
    #[arg(short, long, default_value = "10")]
    bloom_bits: usize,

    /// Fail instead of creating a missing database
    #[arg(long)]
    no_create: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,

        /// fsync the log before returning
        #[arg(long)]
        sync: bool,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// Print keys in order, optionally from a start key
    Scan {
        /// First key to print
        #[arg(long)]
        from: Option<String>,

        /// Maximum number of entries
        #[arg(short, long, default_value = "100")]
        limit: usize,

        /// Walk backwards from the last key
        #[arg(long)]
        reverse: bool,
    },

    /// Approximate on-disk bytes in [start, limit)
    Sizes {
        start: String,
        limit: String,
    },

    /// Compact the whole key space and print the level layout
    Compact,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,stratakv=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!("StrataKV CLI v{}", stratakv::VERSION);

    if let Err(e) = run(args) {
        tracing::error!("Command failed: {}", e);
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> stratakv::Result<()> {
    let mut builder = Config::builder()
        .data_dir(&args.data_dir)
        .create_if_missing(!args.no_create);
    if args.bloom_bits > 0 {
        builder = builder.filter_policy(std::sync::Arc::new(BloomFilterPolicy::new(args.bloom_bits)));
    }
    let engine = Engine::open(builder.build())?;

    match args.command {
        Commands::Get { key } => match engine.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(not found)"),
        },
        Commands::Put { key, value, sync } => {
            let options = stratakv::WriteOptions { sync };
            engine.put_with(&options, key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Delete { key } => {
            engine.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Scan { from, limit, reverse } => {
            let mut iter = engine.new_iterator(&ReadOptions::default())?;
            match (&from, reverse) {
                (Some(from), _) => iter.seek(from.as_bytes()),
                (None, true) => iter.seek_to_last(),
                (None, false) => iter.seek_to_first(),
            }
            let mut printed = 0;
            while iter.valid() && printed < limit {
                println!(
                    "{} => {}",
                    String::from_utf8_lossy(iter.key()),
                    String::from_utf8_lossy(iter.value())
                );
                printed += 1;
                if reverse {
                    iter.prev();
                } else {
                    iter.next();
                }
            }
            iter.status()?;
        }
        Commands::Sizes { start, limit } => {
            let sizes = engine.get_approximate_sizes(&[Range::new(start.as_bytes(), limit.as_bytes())])?;
            println!("{}", sizes[0]);
        }
        Commands::Compact => {
            engine.compact_range(None, None)?;
            println!("{}", engine.level_summary());
        }
    }

    engine.close()
}
