//! patricia CLI - Command line interface for patricia_db
//!
//! Every command opens the database file, runs one operation and prints the
//! result as JSON on stdout. Logs go to stderr.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use patricia_db::{Database, HashAlgorithm, TrieConfig};
use std::path::{Path, PathBuf};
use tracing::Level;

#[derive(Parser)]
#[command(name = "patricia")]
#[command(about = "A merkle-patricia trie backed by a single database file")]
#[command(version)]
struct Cli {
    /// Path to the database file
    #[arg(short, long, default_value = "trie.pdb")]
    database: PathBuf,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    /// Config file (defaults to <database>.json, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new database
    Init {
        /// Hash algorithm for node and value keys (blake3 or sha256)
        #[arg(long)]
        hash: Option<String>,
    },

    /// Store a value under a key
    Put {
        key: String,
        value: String,
        /// Key and value are hex encoded
        #[arg(long)]
        hex: bool,
    },

    /// Get the value stored under a key
    Get {
        key: String,
        /// Key is hex encoded, value is printed as hex
        #[arg(long)]
        hex: bool,
    },

    /// Show the current root hash
    Root,

    /// List keys and values in key order
    List {
        /// Only list keys starting with this prefix
        #[arg(short, long)]
        prefix: Option<String>,
        /// Maximum number of entries
        #[arg(short, long)]
        limit: Option<usize>,
        /// Prefix is hex encoded, keys and values are printed as hex
        #[arg(long)]
        hex: bool,
    },

    /// Check that every reachable node and value is present and intact
    Verify,

    /// Show database status
    Status,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Init { hash } => {
            if cli.database.exists() {
                bail!("database already exists: {}", cli.database.display());
            }
            let config = match hash {
                Some(name) => config.with_hash_algorithm(name.parse::<HashAlgorithm>()?),
                None => config,
            };
            let db = Database::create(&cli.database, config)?;
            db.sync()?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "message": format!("Created database at {}", cli.database.display()),
                    "hash": db.hash_algorithm().name()
                }),
            )?;
        }

        Commands::Put { key, value, hex } => {
            let key_bytes = decode(&key, hex)?;
            let value_bytes = decode(&value, hex)?;
            let mut db = Database::open_or_create(&cli.database, config)?;
            db.put(&key_bytes, &value_bytes)?;
            db.sync()?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "key": key,
                    "root": db.root_hash().map(|h| h.to_hex())
                }),
            )?;
        }

        Commands::Get { key, hex } => {
            let key_bytes = decode(&key, hex)?;
            let db = open_existing(&cli.database, config)?;
            match db.get(&key_bytes)? {
                Some(value) => {
                    output(
                        cli.format,
                        &serde_json::json!({
                            "key": key,
                            "value": encode(&value, hex)
                        }),
                    )?;
                }
                None => {
                    output(
                        cli.format,
                        &serde_json::json!({
                            "status": "error",
                            "message": format!("Key not found: {}", key)
                        }),
                    )?;
                    std::process::exit(1);
                }
            }
        }

        Commands::Root => {
            let db = open_existing(&cli.database, config)?;
            output(
                cli.format,
                &serde_json::json!({
                    "root": db.root_hash().map(|h| h.to_hex())
                }),
            )?;
        }

        Commands::List { prefix, limit, hex } => {
            let prefix = match prefix {
                Some(p) => decode(&p, hex)?,
                None => Vec::new(),
            };
            let db = open_existing(&cli.database, config)?;
            let mut entries = db.entries(&prefix)?;
            if let Some(limit) = limit {
                entries.truncate(limit);
            }
            let items: Vec<_> = entries
                .iter()
                .map(|(k, v)| {
                    serde_json::json!({
                        "key": encode(k, hex),
                        "value": encode(v, hex)
                    })
                })
                .collect();
            output(
                cli.format,
                &serde_json::json!({
                    "count": items.len(),
                    "entries": items
                }),
            )?;
        }

        Commands::Verify => {
            let db = open_existing(&cli.database, config)?;
            let report = db.verify()?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "root": db.root_hash().map(|h| h.to_hex()),
                    "keys": report.keys,
                    "branches": report.branches,
                    "extensions": report.extensions,
                    "leaves": report.leaves,
                    "stored_values": report.stored_values
                }),
            )?;
        }

        Commands::Status => {
            let db = open_existing(&cli.database, config)?;
            let stats = db.stats()?;
            output(
                cli.format,
                &serde_json::json!({
                    "database": cli.database.display().to_string(),
                    "hash": db.hash_algorithm().name(),
                    "root": db.root_hash().map(|h| h.to_hex()),
                    "nodes": stats.nodes,
                    "values": stats.values,
                    "file_size": stats.file_size,
                    "inline_threshold": db.config().inline_threshold
                }),
            )?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<TrieConfig> {
    let config = match &cli.config {
        Some(path) => TrieConfig::load(path)?,
        None => TrieConfig::resolve(&cli.database)?,
    };
    Ok(config)
}

fn open_existing(path: &Path, config: TrieConfig) -> anyhow::Result<Database> {
    if !path.exists() {
        bail!(
            "no database at {} (run `patricia init` first)",
            path.display()
        );
    }
    Ok(Database::open(path, config)?)
}

fn decode(input: &str, hex: bool) -> anyhow::Result<Vec<u8>> {
    if hex {
        hex::decode(input).with_context(|| format!("invalid hex: {}", input))
    } else {
        Ok(input.as_bytes().to_vec())
    }
}

fn encode(bytes: &[u8], hex: bool) -> String {
    if hex {
        hex::encode(bytes)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

fn output(format: OutputFormat, value: &serde_json::Value) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
